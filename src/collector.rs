//! Stop-the-world mark & sweep over every cache of an arena.
//!
//! A cycle clears all liveness bits, marks everything reachable from the
//! roots with an explicit mark stack, and then rebuilds each cache's block
//! lists, returning fully empty blocks to the arena.

use std::time::Instant;

use log::{debug, info, trace};

use crate::{
    address::Address,
    arena::Arena,
    block::Block,
    globals::BLOCK_SIZE,
    object_model::{Edge, ObjectModel},
    roots::Roots,
    util::formatted_size,
};

/// Mark the slot holding `object`. Returns true when the object was not
/// marked before and has pointer fields that still need scanning.
///
/// # Safety
/// `object` must be the start of a slot in a block owned by a live arena.
#[inline]
pub unsafe fn set_used_bit(object: Address) -> bool {
    Block::from_object(object).as_mut().set_used_bit(object)
}

impl<M: ObjectModel> Arena<M> {
    /// Free every slot of every block owned by a cache.
    pub fn clear_used_bits(&mut self) {
        for cache in self.caches.iter_mut() {
            cache.clear_used_bits();
        }
    }

    /// Set the used bit of everything reachable from `roots`.
    ///
    /// Indirections found in object fields are replaced by the word they
    /// resolve to. Roots are never written.
    pub fn mark<R: Roots + ?Sized>(&mut self, roots: &R) {
        let mut worklist = std::mem::take(&mut self.worklist);
        let mut roots_scanned = 0;
        let mut pointers_followed = 0;
        let mut indirections_collapsed = 0;

        roots.for_each_root(&mut |word| {
            roots_scanned += 1;
            let mut edge = self.model.classify(word);
            while let Edge::Indirection { target } = edge {
                edge = self.model.classify(target);
            }
            if let Edge::Object(object) = edge {
                self.visit(object, &mut worklist);
            }
        });

        while let Some(object) = worklist.pop() {
            let block = unsafe { Block::from_object(object) };
            let num_ptrs = block.info().num_ptrs() as usize;
            for i in 0..num_ptrs {
                let mut edge = self.model.classify(unsafe { object.read_field(i) });
                while let Edge::Indirection { target } = edge {
                    unsafe { object.write_field(i, target) };
                    indirections_collapsed += 1;
                    edge = self.model.classify(target);
                }
                if let Edge::Object(child) = edge {
                    pointers_followed += 1;
                    self.visit(child, &mut worklist);
                }
            }
        }

        trace!(
            "[gc] mark: {} roots, {} pointers followed, {} indirections collapsed",
            roots_scanned,
            pointers_followed,
            indirections_collapsed
        );
        self.stats.roots_scanned += roots_scanned;
        self.stats.pointers_followed += pointers_followed;
        self.stats.indirections_collapsed += indirections_collapsed;
        self.worklist = worklist;
    }

    #[inline]
    fn visit(&self, object: Address, worklist: &mut Vec<Address>) {
        if let Some((block, _)) = self.find_object(object.to_usize()) {
            if unsafe { block.as_mut() }.set_used_bit(object) {
                worklist.push(object);
            }
        }
    }

    /// Rebuild every cache's block lists from the used bits. Returns the
    /// number of blocks given back to the free list.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for cache in self.caches.iter_mut() {
            freed += cache.sweep(&mut self.free_blocks);
        }
        debug_assert!(freed <= self.blocks_in_use);
        self.blocks_in_use -= freed;
        self.stats.blocks_freed += freed;
        freed
    }

    /// Run a full collection cycle.
    pub fn collect<R: Roots + ?Sized>(&mut self, roots: &R) {
        let time = if self.options.verbose {
            Some(Instant::now())
        } else {
            None
        };
        let prev = self.blocks_in_use;

        self.clear_used_bits();
        self.mark(roots);
        let freed = self.sweep();

        debug!(
            "[gc] GC({}) swept {} caches, freed {} blocks, {} in use",
            self.stats.collections,
            self.caches.len(),
            freed,
            self.blocks_in_use
        );
        if let Some(time) = time.map(|x| x.elapsed()) {
            info!(
                "[gc] GC({}) Pause MarkSweep {}->{}({}) {:.4}ms",
                self.stats.collections,
                formatted_size(prev * BLOCK_SIZE),
                formatted_size(self.blocks_in_use * BLOCK_SIZE),
                formatted_size(self.block_threshold * BLOCK_SIZE),
                time.as_micros() as f64 / 1000.0
            );
        }
        self.stats.collections += 1;
    }
}
