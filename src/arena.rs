use std::collections::BTreeMap;

use log::{debug, error, trace};

use crate::{
    address::Address,
    block::{Block, BlockRef},
    block_list::BlockList,
    cache::{Cache, CacheId, CacheSlot},
    globals::{
        GROWTH_OCCUPANCY_TENTHS, INITIAL_BLOCK_THRESHOLD, MIN_BYTE_ALLOCATION_WORDS,
        THRESHOLD_GROWTH_FACTOR,
    },
    megablock::Megablock,
    object_model::{ObjectModel, UntaggedWords},
    roots::Roots,
    statistics::{CollectorStats, HeapStatistics},
    util::words_for_bytes,
};

/// Arena configuration.
#[derive(Clone, Copy, Debug)]
pub struct ArenaOptions {
    /// Blocks that may be in use before the first collection runs.
    pub initial_threshold: usize,
    /// Log a one-line summary of every collection.
    pub verbose: bool,
}

impl Default for ArenaOptions {
    fn default() -> Self {
        Self {
            initial_threshold: INITIAL_BLOCK_THRESHOLD,
            verbose: false,
        }
    }
}

impl ArenaOptions {
    pub fn with_initial_threshold(mut self, blocks: usize) -> Self {
        self.initial_threshold = blocks;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// An isolated heap: its megablocks, its size-class caches and the block
/// free list shared between them.
///
/// Dropping the arena unmaps every megablock, so no address it handed out
/// may be used afterwards.
pub struct Arena<M: ObjectModel = UntaggedWords> {
    /// Every megablock, keyed by base address.
    pub(crate) megablocks: BTreeMap<usize, Megablock>,
    /// Key of the megablock blocks are currently sliced from.
    pub(crate) current: Option<usize>,
    pub(crate) free_blocks: BlockList,
    pub(crate) blocks_in_use: usize,
    pub(crate) block_threshold: usize,
    pub(crate) caches: Vec<Cache>,
    pub(crate) model: M,
    pub(crate) options: ArenaOptions,
    pub(crate) stats: CollectorStats,
    /// Mark stack, kept between cycles to reuse its allocation.
    pub(crate) worklist: Vec<Address>,
}

impl Arena<UntaggedWords> {
    pub fn new() -> Self {
        Self::with_options(ArenaOptions::default(), UntaggedWords)
    }
}

impl Default for Arena<UntaggedWords> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: ObjectModel> Arena<M> {
    pub fn with_options(options: ArenaOptions, model: M) -> Self {
        assert!(
            options.initial_threshold > 0,
            "block threshold must be at least one block"
        );
        Self {
            megablocks: BTreeMap::new(),
            current: None,
            free_blocks: BlockList::new(),
            blocks_in_use: 0,
            block_threshold: options.initial_threshold,
            caches: Vec::new(),
            model,
            options,
            stats: CollectorStats::default(),
            worklist: Vec::new(),
        }
    }

    pub fn options(&self) -> &ArenaOptions {
        &self.options
    }

    #[inline]
    pub fn blocks_in_use(&self) -> usize {
        self.blocks_in_use
    }

    #[inline]
    pub fn block_threshold(&self) -> usize {
        self.block_threshold
    }

    pub fn free_blocks(&self) -> &BlockList {
        &self.free_blocks
    }

    pub fn num_megablocks(&self) -> usize {
        self.megablocks.len()
    }

    pub fn num_caches(&self) -> usize {
        self.caches.len()
    }

    pub fn cache(&self, id: CacheId) -> &Cache {
        &self.caches[id.0]
    }

    pub fn caches(&self) -> impl Iterator<Item = (CacheId, &Cache)> {
        self.caches
            .iter()
            .enumerate()
            .map(|(i, cache)| (CacheId(i), cache))
    }

    /// Returns true if `addr` lies in one of this arena's megablocks.
    pub fn contains(&self, addr: usize) -> bool {
        self.megablock_of(addr).is_some()
    }

    fn megablock_of(&self, addr: usize) -> Option<&Megablock> {
        self.megablocks
            .range(..=addr)
            .next_back()
            .map(|(_, megablock)| megablock)
            .filter(|megablock| megablock.contains(addr))
    }

    /// Resolve `addr` to its block and slot if it is the start of an object
    /// slot in a block some cache currently owns.
    pub(crate) fn find_object(&self, addr: usize) -> Option<(BlockRef, usize)> {
        let megablock = self.megablock_of(addr)?;
        if !megablock.is_sliced(addr) {
            return None;
        }
        let object = Address::from_usize(addr)?;
        let block = unsafe { Block::from_object(object) };
        let slot = block.object_slot(addr)?;
        Some((block, slot))
    }

    /// The cache for objects of `size` words whose first `num_ptrs` words
    /// may hold pointers, created on first use.
    pub fn resolve_cache(&mut self, size: usize, num_ptrs: usize) -> CacheId {
        if let Some(i) = self
            .caches
            .iter()
            .position(|cache| cache.matches(size, num_ptrs))
        {
            return CacheId(i);
        }
        let cache = Cache::new(size, num_ptrs);
        debug!(
            "[gc] new cache #{}: size={} nptrs={} num_entries={} color={}",
            self.caches.len(),
            size,
            num_ptrs,
            cache.num_entries(),
            cache.color()
        );
        self.caches.push(cache);
        CacheId(self.caches.len() - 1)
    }

    /// [`Arena::resolve_cache`] memoized in `slot`.
    #[inline]
    pub fn find_cache(&mut self, slot: &CacheSlot, size: usize, num_ptrs: usize) -> CacheId {
        if let Some(id) = slot.get() {
            debug_assert!(
                id.0 < self.caches.len() && self.caches[id.0].matches(size, num_ptrs),
                "cache slot used with a different layout or arena"
            );
            return id;
        }
        let id = self.resolve_cache(size, num_ptrs);
        slot.set(id);
        id
    }

    /// Allocate one object from `cache`. The contents are whatever the slot
    /// held before; callers must initialize the pointer fields before the
    /// next allocation can trigger a collection.
    ///
    /// `roots` is only consulted if a collection runs.
    pub fn allocate<R: Roots + ?Sized>(&mut self, cache: CacheId, roots: &R) -> Address {
        self.stats.objects_allocated += 1;
        if let Some(object) = self.caches[cache.0].try_allocate() {
            return object;
        }
        let block = self.acquire_block(roots);
        self.caches[cache.0].allocate_in_new_block(block)
    }

    pub fn allocate_words<R: Roots + ?Sized>(
        &mut self,
        size: usize,
        num_ptrs: usize,
        roots: &R,
    ) -> Address {
        let cache = self.resolve_cache(size, num_ptrs);
        self.allocate(cache, roots)
    }

    /// Allocate a pointer-free object large enough for `bytes`.
    pub fn allocate_bytes<R: Roots + ?Sized>(&mut self, bytes: usize, roots: &R) -> Address {
        let words = words_for_bytes(bytes, MIN_BYTE_ALLOCATION_WORDS);
        self.allocate_words(words, 0, roots)
    }

    /// Hand a block to a cache. Reuses a free block when possible; otherwise
    /// a new block is sliced, which is where collections are triggered.
    pub(crate) fn acquire_block<R: Roots + ?Sized>(&mut self, roots: &R) -> BlockRef {
        self.blocks_in_use += 1;
        if let Some(block) = self.free_blocks.pop() {
            trace!("[gc] reusing free block {:p}", block.as_ptr());
            return block;
        }

        if self.blocks_in_use >= self.block_threshold {
            self.collect(roots);
            if self.blocks_in_use * 10 >= self.block_threshold * GROWTH_OCCUPANCY_TENTHS {
                self.block_threshold *= THRESHOLD_GROWTH_FACTOR;
                debug!(
                    "[gc] {} blocks in use after collection, threshold raised to {}",
                    self.blocks_in_use, self.block_threshold
                );
            }
        }

        loop {
            let key = match self.current {
                Some(key) => key,
                None => self.map_megablock(),
            };
            let sliced = self
                .megablocks
                .get_mut(&key)
                .and_then(|megablock| megablock.bump());
            match sliced {
                Some(block) => {
                    if self.megablocks.get(&key).map_or(true, Megablock::is_exhausted) {
                        self.current = None;
                    }
                    return block;
                }
                None => self.current = None,
            }
        }
    }

    fn map_megablock(&mut self) -> usize {
        match Megablock::new() {
            Ok(megablock) => {
                let base = megablock.base();
                debug!(
                    "[gc] mapped megablock #{} at {:#x}",
                    self.megablocks.len(),
                    base
                );
                self.megablocks.insert(base, megablock);
                self.current = Some(base);
                base
            }
            Err(err) => {
                error!("[gc] cannot map megablock: {}", err);
                oom_abort()
            }
        }
    }

    pub fn statistics(&self) -> HeapStatistics {
        HeapStatistics {
            megablocks: self.megablocks.len(),
            caches: self.caches.len(),
            blocks_in_use: self.blocks_in_use,
            free_blocks: self.free_blocks.len(),
            block_threshold: self.block_threshold,
            total_gc_cycles_count: self.stats.collections,
            total_objects_allocated: self.stats.objects_allocated,
            total_roots_scanned: self.stats.roots_scanned,
            total_pointers_followed: self.stats.pointers_followed,
            total_indirections_collapsed: self.stats.indirections_collapsed,
            total_blocks_freed: self.stats.blocks_freed,
        }
    }

    /// Human readable dump of every cache and its blocks.
    pub fn dump_caches(&self) -> String {
        let mut out = String::new();
        for (id, cache) in self.caches() {
            out.push_str(&format!("cache #{} ", id.0));
            out.push_str(&cache.to_string());
        }
        out
    }
}

pub fn oom_abort() -> ! {
    eprintln!("OutOfMemory");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::MAX_OBJECT_WORDS;

    #[test]
    fn caches_are_unique_per_layout() {
        let mut arena = Arena::new();
        let a = arena.resolve_cache(2, 1);
        let b = arena.resolve_cache(2, 2);
        assert_ne!(a, b);
        assert_eq!(arena.resolve_cache(2, 1), a);
        assert_eq!(arena.num_caches(), 2);
        assert_eq!(arena.cache(b).num_ptrs(), 2);
    }

    #[test]
    fn cache_slot_memoizes_lookup() {
        let mut arena = Arena::new();
        let slot = CacheSlot::new();
        let id = arena.find_cache(&slot, 3, 0);
        assert_eq!(slot.get(), Some(id));
        assert_eq!(arena.find_cache(&slot, 3, 0), id);
        assert_eq!(arena.num_caches(), 1);
    }

    #[test]
    fn byte_allocations_round_up_to_words() {
        let mut arena = Arena::new();
        arena.allocate_bytes(1, &());
        arena.allocate_bytes(4 * std::mem::size_of::<usize>() + 1, &());
        let sizes: Vec<_> = arena.caches().map(|(_, c)| (c.size(), c.num_ptrs())).collect();
        assert_eq!(sizes, vec![(3, 0), (5, 0)]);
    }

    #[test]
    fn first_block_maps_a_megablock() {
        let mut arena = Arena::new();
        assert_eq!(arena.num_megablocks(), 0);
        let object = arena.allocate_words(MAX_OBJECT_WORDS, 0, &());
        assert_eq!(arena.num_megablocks(), 1);
        assert_eq!(arena.blocks_in_use(), 1);
        assert!(arena.contains(object.to_usize()));
        assert!(arena.find_object(object.to_usize()).is_some());
        assert!(!arena.contains(&arena as *const _ as usize));
    }

    #[test]
    fn options_builder() {
        let options = ArenaOptions::default()
            .with_initial_threshold(32)
            .with_verbose(true);
        let arena = Arena::with_options(options, UntaggedWords);
        assert_eq!(arena.block_threshold(), 32);
        assert!(arena.options().verbose);
    }
}
