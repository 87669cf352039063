use std::ptr::null_mut;

use crate::block::{Block, BlockRef};

/// Intrusive singly-linked list threaded through `Block::link`.
///
/// A block is on at most one list at a time.
pub struct BlockList {
    head: *mut Block,
}

impl Default for BlockList {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockList {
    pub const fn new() -> Self {
        Self { head: null_mut() }
    }

    pub fn len(&self) -> usize {
        let mut c = 0;
        self.for_each(|_| c += 1);
        c
    }

    pub fn first(&self) -> Option<BlockRef> {
        if self.head.is_null() {
            None
        } else {
            Some(unsafe { BlockRef::from_raw(self.head) })
        }
    }

    pub fn for_each(&self, mut visitor: impl FnMut(BlockRef)) {
        unsafe {
            let mut head = self.head;
            while !head.is_null() {
                let next = (*head).link;
                visitor(BlockRef::from_raw(head));
                head = next;
            }
        }
    }

    pub(crate) fn push(&mut self, block: BlockRef) {
        let header = unsafe { block.as_mut() };
        header.link = self.head;
        self.head = block.as_ptr();
    }

    pub(crate) fn pop(&mut self) -> Option<BlockRef> {
        let head = self.first()?;
        let block = unsafe { head.as_mut() };
        self.head = block.link;
        block.link = null_mut();
        Some(head)
    }

    /// Detach the whole chain, leaving `self` empty.
    pub(crate) fn take(&mut self) -> BlockList {
        std::mem::take(self)
    }

    /// Unlink blocks one at a time, head first.
    pub(crate) fn drain(self) -> Drain {
        Drain(self)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub fn contains(&self, block: BlockRef) -> bool {
        let mut found = false;
        self.for_each(|b| found |= b == block);
        found
    }
}

pub(crate) struct Drain(BlockList);

impl Iterator for Drain {
    type Item = BlockRef;

    fn next(&mut self) -> Option<BlockRef> {
        self.0.pop()
    }
}
