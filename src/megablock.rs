use crate::{
    block::{Block, BlockRef},
    globals::{BLOCKS_PER_MEGABLOCK, BLOCK_SIZE, MEGABLOCK_SIZE},
    mmap::{MapError, Mmap},
};

/// A `MEGABLOCK_SIZE` mapping that is bump-sliced into blocks.
pub struct Megablock {
    map: Mmap,
    next_free: usize,
}

impl Megablock {
    pub fn new() -> Result<Self, MapError> {
        let map = Mmap::new(MEGABLOCK_SIZE)?;
        debug_assert!(map.start() as usize % BLOCK_SIZE == 0);
        Ok(Self { map, next_free: 0 })
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.map.start() as usize
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.map.contains(addr)
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.next_free == BLOCKS_PER_MEGABLOCK
    }

    /// Returns true if `addr` lies in a block that has already been sliced.
    #[inline]
    pub fn is_sliced(&self, addr: usize) -> bool {
        self.contains(addr) && (addr - self.base()) / BLOCK_SIZE < self.next_free
    }

    /// Slice the next block off the mapping.
    pub fn bump(&mut self) -> Option<BlockRef> {
        if self.is_exhausted() {
            return None;
        }
        let addr = self.base() + self.next_free * BLOCK_SIZE;
        self.next_free += 1;
        unsafe {
            let block = BlockRef::from_raw(addr as *mut Block);
            let header = block.as_mut();
            header.link = std::ptr::null_mut();
            header.num_free = 0;
            header.next_free = 0;
            Some(block)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_aligned_blocks_until_exhausted() {
        let mut mb = Megablock::new().unwrap();
        let mut last = None;
        for i in 0..BLOCKS_PER_MEGABLOCK {
            let block = mb.bump().expect("megablock exhausted early");
            assert_eq!(block.base(), mb.base() + i * BLOCK_SIZE);
            assert_eq!(block.base() % BLOCK_SIZE, 0);
            assert_eq!(block.num_free(), 0);
            last = Some(block);
        }
        assert!(mb.is_exhausted());
        assert!(mb.bump().is_none());
        assert!(mb.is_sliced(last.unwrap().base()));
    }

    #[test]
    fn unsliced_addresses_are_not_blocks() {
        let mut mb = Megablock::new().unwrap();
        let block = mb.bump().unwrap();
        assert!(mb.is_sliced(block.base() + 64));
        assert!(!mb.is_sliced(block.base() + BLOCK_SIZE));
        assert!(mb.contains(block.base() + BLOCK_SIZE));
    }
}
