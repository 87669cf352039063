use crate::{
    globals::{BLOCK_SIZE, MEGABLOCK_SIZE},
    util::formatted_size,
};

/// Counters updated by the arena as it allocates and collects.
#[derive(Clone, Copy, Default, Debug)]
pub struct CollectorStats {
    pub collections: usize,
    pub objects_allocated: usize,
    pub roots_scanned: usize,
    pub pointers_followed: usize,
    pub indirections_collapsed: usize,
    pub blocks_freed: usize,
}

#[derive(Clone, Debug)]
pub struct HeapStatistics {
    pub megablocks: usize,
    pub caches: usize,
    pub blocks_in_use: usize,
    pub free_blocks: usize,
    pub block_threshold: usize,
    pub total_gc_cycles_count: usize,
    pub total_objects_allocated: usize,
    pub total_roots_scanned: usize,
    pub total_pointers_followed: usize,
    pub total_indirections_collapsed: usize,
    pub total_blocks_freed: usize,
}

impl HeapStatistics {
    pub fn heap_size(&self) -> usize {
        self.megablocks * MEGABLOCK_SIZE
    }

    pub fn memory_in_use(&self) -> usize {
        self.blocks_in_use * BLOCK_SIZE
    }
}

impl std::fmt::Display for HeapStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Heap statistics:")?;
        writeln!(
            f,
            "  Memory in use: {} of {} ({} megablocks)",
            formatted_size(self.memory_in_use()),
            formatted_size(self.heap_size()),
            self.megablocks
        )?;
        writeln!(f, "  Caches: {}", self.caches)?;
        writeln!(f, "  Blocks in use: {}", self.blocks_in_use)?;
        writeln!(f, "  Free blocks: {}", self.free_blocks)?;
        writeln!(
            f,
            "  Block threshold: {} ({})",
            self.block_threshold,
            formatted_size(self.block_threshold * BLOCK_SIZE)
        )?;
        writeln!(f, "  Total GC cycles count: {}", self.total_gc_cycles_count)?;
        writeln!(
            f,
            "  Total objects allocated: {}",
            self.total_objects_allocated
        )?;
        writeln!(f, "  Total roots scanned: {}", self.total_roots_scanned)?;
        writeln!(
            f,
            "  Total pointers followed: {}",
            self.total_pointers_followed
        )?;
        writeln!(
            f,
            "  Total indirections collapsed: {}",
            self.total_indirections_collapsed
        )?;
        writeln!(f, "  Total blocks freed: {}", self.total_blocks_freed)?;
        Ok(())
    }
}
