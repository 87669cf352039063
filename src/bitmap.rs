//! Per-block liveness bitmap.
//!
//! One bit per object slot, packed into machine words. Bits past the last
//! valid slot are kept set ("sentinels") so that a scan for a clear bit can
//! never return an index outside the block.

use std::ops::{Deref, DerefMut};

use crate::globals::{BITS_PER_WORD, WORD_SIZE};

/// Number of words needed for `num_entries` bits.
#[inline]
pub const fn words_for(num_entries: usize) -> usize {
    (num_entries + BITS_PER_WORD - 1) / BITS_PER_WORD
}

#[inline]
pub const fn bytes_for(num_entries: usize) -> usize {
    words_for(num_entries) * WORD_SIZE
}

/// Mask of the sentinel bits in the last word of a bitmap with `num_entries` slots.
#[inline]
pub const fn sentinel_mask(num_entries: usize) -> usize {
    let excess = num_entries % BITS_PER_WORD;
    if excess == 0 {
        0
    } else {
        !((1usize << excess) - 1)
    }
}

/// Bitmap over borrowed words. `Bitmap<&[usize]>` is a read-only view,
/// `Bitmap<&mut [usize]>` can also be updated.
pub struct Bitmap<S> {
    words: S,
}

impl<S: Deref<Target = [usize]>> Bitmap<S> {
    pub fn new(words: S) -> Self {
        Self { words }
    }

    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        self.words[bit / BITS_PER_WORD] & (1 << (bit % BITS_PER_WORD)) != 0
    }

    /// Finds a clear bit, starting at word `*hint` and wrapping around.
    ///
    /// On return `*hint` holds the word the bit was found in. The caller must
    /// know that a clear bit exists; a full bitmap is an invariant break.
    pub fn find_first_clear_bit(&self, hint: &mut usize) -> usize {
        let n = self.words.len();
        assert!(*hint < n, "scan hint {} out of range ({} words)", *hint, n);
        let start = *hint;
        let mut i = start;
        loop {
            let inverted = !self.words[i];
            if inverted != 0 {
                *hint = i;
                return i * BITS_PER_WORD + inverted.trailing_zeros() as usize;
            }
            i = (i + 1) % n;
            assert!(i != start, "no clear bit in a block that reported free slots");
        }
    }

    /// Number of clear bits among the first `num_entries` slots.
    pub fn count_clear(&self, num_entries: usize) -> usize {
        let full = num_entries / BITS_PER_WORD;
        let mut clear = self.words[..full]
            .iter()
            .map(|w| w.count_zeros() as usize)
            .sum::<usize>();
        if num_entries % BITS_PER_WORD != 0 {
            let valid = !sentinel_mask(num_entries);
            clear += (!self.words[full] & valid).count_ones() as usize;
        }
        clear
    }

    /// Returns true when every bit past `num_entries` is set.
    pub fn sentinels_intact(&self, num_entries: usize) -> bool {
        let mask = sentinel_mask(num_entries);
        mask == 0 || self.words[self.words.len() - 1] & mask == mask
    }
}

impl<S: DerefMut<Target = [usize]>> Bitmap<S> {
    /// Sets `bit` and returns its previous value.
    #[inline]
    pub fn set_bit(&mut self, bit: usize) -> bool {
        let word = &mut self.words[bit / BITS_PER_WORD];
        let mask = 1 << (bit % BITS_PER_WORD);
        let old = *word & mask != 0;
        *word |= mask;
        old
    }

    /// Marks every valid slot free and every slot past `num_entries` used.
    pub fn clear_all(&mut self, num_entries: usize) {
        debug_assert_eq!(self.words.len(), words_for(num_entries));
        let last = self.words.len() - 1;
        self.words[..last].fill(0);
        self.words[last] = sentinel_mask(num_entries);
    }
}
