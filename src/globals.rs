use std::mem::size_of;

pub const WORD_SIZE: usize = size_of::<usize>();
pub const BITS_PER_WORD: usize = WORD_SIZE * 8;

pub const BLOCK_SIZE_BITS: usize = 12;
/// Unit of recycling. Every block starts at an address aligned to this size.
pub const BLOCK_SIZE: usize = 1 << BLOCK_SIZE_BITS;

pub const MEGABLOCK_SIZE_BITS: usize = 20;
/// Size of a single OS mapping the arena slices blocks from.
pub const MEGABLOCK_SIZE: usize = 1 << MEGABLOCK_SIZE_BITS;
pub const BLOCKS_PER_MEGABLOCK: usize = MEGABLOCK_SIZE / BLOCK_SIZE;

/// Number of blocks that may be in use before the first collection.
pub const INITIAL_BLOCK_THRESHOLD: usize = 8;
pub const THRESHOLD_GROWTH_FACTOR: usize = 2;
/// Post-collection occupancy, in tenths of the threshold, at which the threshold grows.
pub const GROWTH_OCCUPANCY_TENTHS: usize = 9;

/// Largest object size, in words, that still leaves room for one slot per block.
pub const MAX_OBJECT_WORDS: usize = 254;
/// Byte allocations are rounded up to at least this many words.
pub const MIN_BYTE_ALLOCATION_WORDS: usize = 3;

const _: () = assert!(BLOCK_SIZE.is_power_of_two());
const _: () = assert!(MEGABLOCK_SIZE.is_power_of_two());
const _: () = assert!(MEGABLOCK_SIZE % BLOCK_SIZE == 0);
