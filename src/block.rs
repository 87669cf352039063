use std::{
    mem::size_of,
    ops::Deref,
    ptr::{null_mut, NonNull},
};

use modular_bitfield::prelude::*;

use crate::{
    address::Address,
    bitmap::{bytes_for, Bitmap},
    globals::{BLOCK_SIZE, WORD_SIZE},
    util::{align_down, align_up},
};

/// Layout descriptor shared by a cache and every block it owns.
///
/// `color` is the word offset of slot 0, i.e. the block header plus the
/// liveness bitmap rounded up to whole words.
#[bitfield]
#[derive(Clone, Copy, Debug)]
pub struct BlockInfo {
    pub color: B8,
    pub size: B8,
    pub num_ptrs: B8,
    /// Set while the block sits on the arena free list.
    pub free: bool,
    #[skip]
    __: B7,
}

impl BlockInfo {
    pub fn layout(color: u8, size: u8, num_ptrs: u8) -> Self {
        Self::new()
            .with_color(color)
            .with_size(size)
            .with_num_ptrs(num_ptrs)
    }

    #[inline]
    pub fn same_layout(&self, other: &BlockInfo) -> bool {
        self.color() == other.color()
            && self.size() == other.size()
            && self.num_ptrs() == other.num_ptrs()
    }
}

// A block is a BLOCK_SIZE aligned container for objects of one layout.
// The header is followed by the liveness bitmap, then by `num_entries`
// slots of `size` words starting at word `color`.
//
// +--------+------+----------+-----------+---------------------+
// | link   | info | num_free | next_free | used[]  | slots ... |
// +--------+------+----------+-----------+---------------------+
#[repr(C)]
pub struct Block {
    pub(crate) link: *mut Block,
    pub(crate) info: BlockInfo,
    pub(crate) num_free: u16,
    /// Bitmap word at which the next free-slot search starts.
    pub(crate) next_free: u16,
    used: [usize; 0],
}

pub const BLOCK_HEADER_SIZE: usize = size_of::<Block>();
pub const BLOCK_HEADER_WORDS: usize = BLOCK_HEADER_SIZE / WORD_SIZE;
/// Bytes available for the bitmap and the slots.
pub const BLOCK_CAPACITY: usize = BLOCK_SIZE - BLOCK_HEADER_SIZE;

const _: () = assert!(BLOCK_HEADER_SIZE % WORD_SIZE == 0);

impl Block {
    /// Get pointer to block from `object` pointer.
    ///
    /// # Safety
    /// `object` must point into a block handed out by an arena that is still alive.
    #[inline(always)]
    pub unsafe fn from_object(object: Address) -> BlockRef {
        BlockRef::from_raw(align_down(object.to_usize(), BLOCK_SIZE) as *mut Block)
    }

    #[inline(always)]
    pub fn base(&self) -> usize {
        self as *const Self as usize
    }

    #[inline(always)]
    pub fn info(&self) -> BlockInfo {
        self.info
    }

    #[inline(always)]
    pub fn num_free(&self) -> usize {
        self.num_free as usize
    }

    #[inline(always)]
    pub fn next_free(&self) -> usize {
        self.next_free as usize
    }

    #[inline(always)]
    pub fn is_free(&self) -> bool {
        self.info.free()
    }

    /// Words of bitmap storage, derived from `color`.
    #[inline(always)]
    pub fn bitmap_words(&self) -> usize {
        self.info.color() as usize - BLOCK_HEADER_WORDS
    }

    #[inline]
    pub(crate) fn bitmap(&mut self) -> Bitmap<&mut [usize]> {
        let words = self.bitmap_words();
        unsafe { Bitmap::new(std::slice::from_raw_parts_mut(self.used.as_mut_ptr(), words)) }
    }

    /// Read-only view of the liveness bitmap.
    #[inline]
    pub fn used_bits(&self) -> Bitmap<&[usize]> {
        unsafe { Bitmap::new(std::slice::from_raw_parts(self.used.as_ptr(), self.bitmap_words())) }
    }

    /// Stamp a cache layout onto a block that was just taken from the arena.
    pub(crate) fn init(&mut self, info: BlockInfo) {
        self.info = info;
        self.next_free = 0;
        self.link = null_mut();
    }

    /// Every slot becomes free; bits past `num_entries` stay set.
    pub(crate) fn clear_used_bits(&mut self, num_entries: usize) {
        self.num_free = num_entries as u16;
        self.bitmap().clear_all(num_entries);
    }

    #[inline(always)]
    pub fn slot_address(&self, slot: usize) -> Address {
        let offset = (self.info.color() as usize + slot * self.info.size() as usize) * WORD_SIZE;
        unsafe { Address::from_usize_unchecked(self.base() + offset) }
    }

    #[inline(always)]
    pub fn slot_index(&self, object: Address) -> usize {
        let words = (object.to_usize() - self.base()) / WORD_SIZE;
        debug_assert!(
            words >= self.info.color() as usize,
            "{:?} points into the header of block {:#x}",
            object,
            self.base()
        );
        let offset = words - self.info.color() as usize;
        debug_assert_eq!(
            offset % self.info.size() as usize,
            0,
            "interior pointer {:?}",
            object
        );
        offset / self.info.size() as usize
    }

    /// Slot index of `addr` if it is the start of a valid slot in this block.
    /// Unlike [`Block::slot_index`] this accepts arbitrary words.
    pub fn object_slot(&self, addr: usize) -> Option<usize> {
        if self.is_free() || addr < self.base() || addr - self.base() >= BLOCK_SIZE {
            return None;
        }
        let size = self.info.size() as usize;
        let words = (addr - self.base()) / WORD_SIZE;
        let color = self.info.color() as usize;
        if size == 0 || addr % WORD_SIZE != 0 || words < color || (words - color) % size != 0 {
            return None;
        }
        let slot = (words - color) / size;
        if slot < compute_layout(size).0 {
            Some(slot)
        } else {
            None
        }
    }

    /// Marks the slot of `object` used. Returns `true` when the bit was
    /// previously clear and the object has pointer fields, i.e. when the
    /// object still needs to be scanned.
    #[inline]
    pub(crate) fn set_used_bit(&mut self, object: Address) -> bool {
        debug_assert!(!self.is_free(), "{:?} lies in a free block", object);
        let slot = self.slot_index(object);
        if !self.bitmap().set_bit(slot) {
            debug_assert!(self.num_free > 0);
            self.num_free -= 1;
            return self.info.num_ptrs() != 0;
        }
        false
    }

    #[inline]
    pub fn is_used(&self, object: Address) -> bool {
        self.used_bits().test(self.slot_index(object))
    }

    /// Checks that `num_free` agrees with the bitmap and that sentinels are set.
    pub fn is_consistent(&self, num_entries: usize) -> bool {
        let bitmap = self.used_bits();
        bitmap.count_clear(num_entries) == self.num_free() && bitmap.sentinels_intact(num_entries)
    }
}

/// Handle to a block. Only the megablock bump allocator and
/// [`Block::from_object`] construct these, so every `BlockRef` is
/// `BLOCK_SIZE` aligned and lies inside a mapping owned by an arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BlockRef(NonNull<Block>);

impl BlockRef {
    #[inline(always)]
    pub(crate) unsafe fn from_raw(ptr: *mut Block) -> Self {
        debug_assert!(ptr as usize % BLOCK_SIZE == 0, "block is not aligned for block_size");
        Self(NonNull::new_unchecked(ptr))
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut Block {
        self.0.as_ptr()
    }

    /// # Safety
    /// No other reference to the block may be live while the returned one is.
    #[inline(always)]
    pub(crate) unsafe fn as_mut<'a>(self) -> &'a mut Block {
        &mut *self.0.as_ptr()
    }
}

impl Deref for BlockRef {
    type Target = Block;
    #[inline(always)]
    fn deref(&self) -> &Block {
        unsafe { self.0.as_ref() }
    }
}

/// Will set the block layout so that `num_entries` slots of `size` words fit
/// behind the header and a bitmap with one bit per slot. Returns
/// `(num_entries, color)`.
pub const fn compute_layout(size: usize) -> (usize, usize) {
    let num_entries = (8 * BLOCK_CAPACITY) / (8 * WORD_SIZE * size + 1) - 1;
    let header = BLOCK_HEADER_SIZE + bytes_for(num_entries);
    let color = align_up(header, WORD_SIZE) / WORD_SIZE;
    (num_entries, color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::MAX_OBJECT_WORDS;

    #[test]
    fn header_is_word_sized() {
        assert_eq!(BLOCK_HEADER_SIZE % WORD_SIZE, 0);
        assert_eq!(std::mem::size_of::<BlockInfo>(), 4);
    }

    #[test]
    fn layouts_fit_in_a_block() {
        for size in 1..=MAX_OBJECT_WORDS {
            let (num_entries, color) = compute_layout(size);
            assert!(num_entries >= 1, "size {} has no slots", size);
            assert!((color + num_entries * size) * WORD_SIZE <= BLOCK_SIZE);
            assert!(color * WORD_SIZE >= BLOCK_HEADER_SIZE + bytes_for(num_entries));
        }
    }

    #[test]
    fn info_round_trips_fields() {
        let mut info = BlockInfo::layout(10, 2, 1);
        assert_eq!(info.color(), 10);
        assert_eq!(info.size(), 2);
        assert_eq!(info.num_ptrs(), 1);
        assert!(!info.free());
        info.set_free(true);
        assert!(info.free());
        assert!(info.same_layout(&BlockInfo::layout(10, 2, 1)));
        assert!(!info.same_layout(&BlockInfo::layout(10, 2, 0)));
    }

    #[test]
    fn object_slot_rejects_headers_and_interior_words() {
        let mut mb = crate::megablock::Megablock::new().unwrap();
        let block = mb.bump().unwrap();
        let (num_entries, color) = compute_layout(4);
        let header = unsafe { block.as_mut() };
        header.init(BlockInfo::layout(color as u8, 4, 0));
        let base = block.base();
        assert_eq!(block.object_slot(base), None);
        assert_eq!(block.object_slot(block.slot_address(0).to_usize()), Some(0));
        assert_eq!(block.object_slot(block.slot_address(1).to_usize() + WORD_SIZE), None);
        let last = block.slot_address(num_entries - 1).to_usize();
        assert_eq!(block.object_slot(last), Some(num_entries - 1));
        let header = unsafe { block.as_mut() };
        header.info.set_free(true);
        assert_eq!(block.object_slot(last), None);
    }

    #[test]
    fn used_bits_view_tracks_marks() {
        let mut mb = crate::megablock::Megablock::new().unwrap();
        let block = mb.bump().unwrap();
        let (num_entries, color) = compute_layout(3);
        let header = unsafe { block.as_mut() };
        header.init(BlockInfo::layout(color as u8, 3, 1));
        header.clear_used_bits(num_entries);
        let object = block.slot_address(2);
        let header = unsafe { block.as_mut() };
        assert!(header.set_used_bit(object));
        assert!(!header.set_used_bit(object));

        let view = block.used_bits();
        assert!(view.test(2));
        assert!(!view.test(1));
        assert!(block.is_used(object));
        assert_eq!(view.count_clear(num_entries), num_entries - 1);
        assert!(block.is_consistent(num_entries));
    }
}
