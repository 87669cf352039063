//! Slab allocator and precise, non-moving mark & sweep collector for the
//! runtime of generated native code.
//!
//! Memory comes from the OS in megablocks that are sliced into fixed-size
//! blocks. Each block holds objects of a single layout, described by the
//! object size in words and the number of leading words that may hold
//! pointers, and tracks which slots are in use with a bitmap stored right
//! after its header. Collections are triggered by block consumption and run
//! to completion on the allocating thread.
//!
//! ```
//! use slabgc::{gc_frame, Arena, RootSet};
//!
//! let mut arena = Arena::new();
//! let roots = RootSet::new();
//! let pair = arena.resolve_cache(2, 2);
//! gc_frame!(frame = roots, [0]);
//! let head = arena.allocate(pair, &roots);
//! unsafe {
//!     head.write_field(0, 0);
//!     head.write_field(1, 0);
//! }
//! frame.set(0, head.to_usize());
//! arena.collect(&roots);
//! assert_eq!(arena.blocks_in_use(), 1);
//! ```

pub mod address;
pub mod arena;
pub mod bitmap;
pub mod block;
pub mod block_list;
pub mod cache;
pub mod collector;
pub mod globals;
pub mod megablock;
pub mod mmap;
pub mod object_model;
pub mod roots;
pub mod statistics;
pub mod util;


pub use address::Address;
pub use arena::{Arena, ArenaOptions};
pub use cache::{Cache, CacheId, CacheSlot};
pub use collector::set_used_bit;
pub use object_model::{Edge, ObjectModel, UntaggedWords};
pub use roots::{FrameChain, RawFrame, RootSet, Roots};
pub use statistics::HeapStatistics;

pub mod c_api {
    use crate::{
        address::Address,
        arena::{Arena, ArenaOptions},
        cache::CacheId,
        roots::{FrameChain, RawFrame, RootSet, Roots},
    };

    /// Heap handle for generated code: an arena plus its extra roots.
    pub struct Heap {
        arena: Arena,
        extra_roots: RootSet,
    }

    struct HeapRoots<'a> {
        frames: FrameChain,
        extra: &'a RootSet,
    }

    impl Roots for HeapRoots<'_> {
        fn for_each_root(&self, visitor: &mut dyn FnMut(usize)) {
            self.frames.for_each_root(visitor);
            self.extra.for_each_root(visitor);
        }
    }

    unsafe fn with_roots<T>(
        heap: *mut Heap,
        frames: *const RawFrame,
        f: impl FnOnce(&mut Arena, &HeapRoots<'_>) -> T,
    ) -> T {
        let heap = &mut *heap;
        let roots = HeapRoots {
            frames: FrameChain::from_head(frames),
            extra: &heap.extra_roots,
        };
        f(&mut heap.arena, &roots)
    }

    #[no_mangle]
    pub extern "C" fn slab_new_arena(initial_threshold: usize, verbose: bool) -> *mut Heap {
        let mut options = ArenaOptions::default().with_verbose(verbose);
        if initial_threshold != 0 {
            options = options.with_initial_threshold(initial_threshold);
        }
        Box::into_raw(Box::new(Heap {
            arena: Arena::with_options(options, Default::default()),
            extra_roots: RootSet::new(),
        }))
    }

    /// Free the heap and unmap all of its memory.
    #[no_mangle]
    pub extern "C" fn slab_free_arena(heap: *mut Heap) {
        if !heap.is_null() {
            unsafe {
                drop(Box::from_raw(heap));
            }
        }
    }

    /// Returns the cache index for a layout. When `slot` is not null it is
    /// used as a call-site memo: zero means unresolved, otherwise it holds
    /// the index plus one.
    #[no_mangle]
    pub extern "C" fn slab_find_cache(
        heap: *mut Heap,
        slot: *mut usize,
        size: usize,
        num_ptrs: usize,
    ) -> usize {
        unsafe {
            if !slot.is_null() && *slot != 0 {
                return *slot - 1;
            }
            let CacheId(id) = (*heap).arena.resolve_cache(size, num_ptrs);
            if !slot.is_null() {
                *slot = id + 1;
            }
            id
        }
    }

    /// Allocate from cache `cache`. `frames` is the innermost frame of the
    /// caller's root chain and may be null.
    #[no_mangle]
    pub extern "C" fn slab_alloc(
        heap: *mut Heap,
        cache: usize,
        frames: *const RawFrame,
    ) -> *mut usize {
        unsafe {
            if cache >= (*heap).arena.num_caches() {
                log::error!("slab_alloc: unknown cache {}", cache);
                eprintln!("unknown cache {}", cache);
                std::process::abort();
            }
            with_roots(heap, frames, |arena, roots| {
                arena.allocate(CacheId(cache), roots).as_ptr()
            })
        }
    }

    /// Allocate a pointer-free object of at least `bytes` bytes.
    #[no_mangle]
    pub extern "C" fn slab_alloc_bytes(
        heap: *mut Heap,
        bytes: usize,
        frames: *const RawFrame,
    ) -> *mut usize {
        unsafe {
            with_roots(heap, frames, |arena, roots| {
                arena.allocate_bytes(bytes, roots).as_ptr()
            })
        }
    }

    #[no_mangle]
    pub extern "C" fn slab_set_used_bit(object: *mut usize) -> bool {
        match Address::from_usize(object as usize) {
            Some(object) => unsafe { crate::collector::set_used_bit(object) },
            None => false,
        }
    }

    #[no_mangle]
    pub extern "C" fn slab_clear_used_bits(heap: *mut Heap) {
        unsafe {
            (*heap).arena.clear_used_bits();
        }
    }

    #[no_mangle]
    pub extern "C" fn slab_perform_gc(heap: *mut Heap, frames: *const RawFrame) {
        unsafe {
            with_roots(heap, frames, |arena, roots| arena.collect(roots));
        }
    }

    /// Returns `false` if `root` was already registered.
    #[no_mangle]
    pub extern "C" fn slab_add_root(heap: *mut Heap, root: *mut usize) -> bool {
        unsafe { (*heap).extra_roots.add_root(root as usize) }
    }

    /// Returns `false` if `root` was not registered.
    #[no_mangle]
    pub extern "C" fn slab_del_root(heap: *mut Heap, root: *mut usize) -> bool {
        unsafe { (*heap).extra_roots.del_root(root as usize) }
    }

    /// Print heap statistics and every cache to stderr.
    #[no_mangle]
    pub extern "C" fn slab_print_stats(heap: *mut Heap) {
        unsafe {
            let arena = &(*heap).arena;
            eprint!("{}", arena.statistics());
            eprint!("{}", arena.dump_caches());
        }
    }
}
