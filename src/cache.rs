//! Size-class caches.
//!
//! A cache owns every block holding objects of one `(size, num_ptrs)`
//! layout. Blocks with at least one free slot sit on the partial list and
//! are allocated from head first; exhausted blocks move to the full list
//! until a sweep frees some of their slots.

use std::{cell::Cell, fmt};

use crate::{
    address::Address,
    bitmap::bytes_for,
    block::{compute_layout, Block, BlockInfo, BlockRef, BLOCK_HEADER_SIZE},
    block_list::BlockList,
    globals::MAX_OBJECT_WORDS,
};

/// Index of a cache inside its arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CacheId(pub(crate) usize);

/// Call-site memo for [`Arena::find_cache`](crate::arena::Arena::find_cache).
///
/// A slot remembers the first cache it resolved to; use one slot per layout
/// and per arena.
#[derive(Default, Debug)]
pub struct CacheSlot(Cell<Option<CacheId>>);

impl CacheSlot {
    pub const fn new() -> Self {
        Self(Cell::new(None))
    }

    #[inline]
    pub fn get(&self) -> Option<CacheId> {
        self.0.get()
    }

    #[inline]
    pub(crate) fn set(&self, id: CacheId) {
        self.0.set(Some(id))
    }
}

pub struct Cache {
    /// Blocks with free slots.
    pub(crate) blocks: BlockList,
    pub(crate) full_blocks: BlockList,
    pub(crate) info: BlockInfo,
    pub(crate) num_entries: u16,
}

impl Cache {
    pub fn new(size: usize, num_ptrs: usize) -> Self {
        assert!(
            (1..=MAX_OBJECT_WORDS).contains(&size),
            "object size {} words is outside 1..={}",
            size,
            MAX_OBJECT_WORDS
        );
        assert!(
            num_ptrs <= size,
            "{} pointer fields do not fit in {} words",
            num_ptrs,
            size
        );
        let (num_entries, color) = compute_layout(size);
        assert!(num_entries >= 1);
        Self {
            blocks: BlockList::new(),
            full_blocks: BlockList::new(),
            info: BlockInfo::layout(color as u8, size as u8, num_ptrs as u8),
            num_entries: num_entries as u16,
        }
    }

    #[inline]
    pub fn matches(&self, size: usize, num_ptrs: usize) -> bool {
        self.info.size() as usize == size && self.info.num_ptrs() as usize == num_ptrs
    }

    #[inline]
    pub fn info(&self) -> BlockInfo {
        self.info
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.info.size() as usize
    }

    #[inline]
    pub fn num_ptrs(&self) -> usize {
        self.info.num_ptrs() as usize
    }

    #[inline]
    pub fn color(&self) -> usize {
        self.info.color() as usize
    }

    /// Slots per block.
    #[inline]
    pub fn num_entries(&self) -> usize {
        self.num_entries as usize
    }

    /// Block header plus bitmap, before rounding to words.
    pub fn header_bytes(&self) -> usize {
        BLOCK_HEADER_SIZE + bytes_for(self.num_entries())
    }

    pub fn partial_blocks(&self) -> &BlockList {
        &self.blocks
    }

    pub fn full_blocks(&self) -> &BlockList {
        &self.full_blocks
    }

    pub fn for_each_block(&self, mut visitor: impl FnMut(BlockRef)) {
        self.blocks.for_each(&mut visitor);
        self.full_blocks.for_each(&mut visitor);
    }

    /// Allocate from the current partial block, if there is one.
    #[inline]
    pub(crate) fn try_allocate(&mut self) -> Option<Address> {
        let block = self.blocks.first()?;
        let header = unsafe { block.as_mut() };
        debug_assert!(header.num_free > 0, "full block on the partial list");
        header.num_free -= 1;
        let mut hint = header.next_free();
        let mut bitmap = header.bitmap();
        let slot = bitmap.find_first_clear_bit(&mut hint);
        bitmap.set_bit(slot);
        header.next_free = hint as u16;
        let object = header.slot_address(slot);
        if header.num_free == 0 {
            let exhausted = self.blocks.pop();
            debug_assert_eq!(exhausted, Some(block));
            self.full_blocks.push(block);
        }
        debug_assert_eq!(unsafe { Block::from_object(object) }, block);
        Some(object)
    }

    /// Take ownership of `block` and return its first slot.
    pub(crate) fn allocate_in_new_block(&mut self, block: BlockRef) -> Address {
        let num_entries = self.num_entries();
        let header = unsafe { block.as_mut() };
        header.init(self.info);
        // blocks coming off the arena free list are already cleared for this
        // slot count; freshly sliced ones have `num_free == 0`.
        if header.num_free() != num_entries {
            header.clear_used_bits(num_entries);
        }
        header.bitmap().set_bit(0);
        header.num_free = (num_entries - 1) as u16;
        let object = header.slot_address(0);
        if num_entries == 1 {
            self.full_blocks.push(block);
        } else {
            self.blocks.push(block);
        }
        object
    }

    pub(crate) fn clear_used_bits(&mut self) {
        let num_entries = self.num_entries();
        self.for_each_block(|block| {
            let header = unsafe { block.as_mut() };
            header.clear_used_bits(num_entries);
        });
    }

    /// Rebuild the partial and full lists after marking and move wholly
    /// unreachable blocks to `free_blocks`. Returns the number of blocks freed.
    ///
    /// The partial block with the fewest free slots is put at the head of
    /// the partial list so it gets filled before emptier blocks.
    pub(crate) fn sweep(&mut self, free_blocks: &mut BlockList) -> usize {
        let num_entries = self.num_entries();
        let partial = self.blocks.take();
        let full = self.full_blocks.take();
        let mut best: Option<BlockRef> = None;
        let mut freed = 0;

        for block in partial.drain().chain(full.drain()) {
            debug_assert!(block.info().same_layout(&self.info));
            if block.num_free() == 0 {
                self.full_blocks.push(block);
            } else if block.num_free() == num_entries {
                let header = unsafe { block.as_mut() };
                header.info.set_free(true);
                free_blocks.push(block);
                freed += 1;
            } else {
                match best {
                    None => best = Some(block),
                    Some(current) if block.num_free() < current.num_free() => {
                        self.blocks.push(current);
                        best = Some(block);
                    }
                    Some(_) => self.blocks.push(block),
                }
            }
        }
        if let Some(block) = best {
            self.blocks.push(block);
        }
        freed
    }

    /// Checks layout and bitmap/free-count agreement for every block.
    pub fn is_consistent(&self) -> bool {
        let num_entries = self.num_entries();
        let mut ok = true;
        self.blocks.for_each(|block| {
            ok &= block.info().same_layout(&self.info)
                && block.num_free() > 0
                && block.is_consistent(num_entries);
        });
        self.full_blocks.for_each(|block| {
            ok &= block.info().same_layout(&self.info)
                && block.num_free() == 0
                && block.is_consistent(num_entries);
        });
        ok
    }
}

impl fmt::Display for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "num_entries: {}", self.num_entries())?;
        writeln!(f, "  header: {} bytes", self.header_bytes())?;
        writeln!(f, "  size: {} words", self.size())?;
        writeln!(f, "  nptrs: {} words", self.num_ptrs())?;
        writeln!(
            f,
            "{:>20} {:>9} {:>9} status",
            "block", "num_free", "next_free"
        )?;
        let mut result = Ok(());
        self.blocks.for_each(|block| {
            if result.is_ok() {
                result = writeln!(
                    f,
                    "{:>20p} {:>9} {:>9} P",
                    block.as_ptr(),
                    block.num_free(),
                    block.next_free()
                );
            }
        });
        result?;
        writeln!(f, "  full_blocks:")?;
        let mut result = Ok(());
        self.full_blocks.for_each(|block| {
            if result.is_ok() {
                result = writeln!(
                    f,
                    "{:>20p} {:>9} {:>9} F",
                    block.as_ptr(),
                    block.num_free(),
                    block.next_free()
                );
            }
        });
        result
    }
}
