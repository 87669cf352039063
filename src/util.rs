use crate::globals::WORD_SIZE;

#[inline(always)]
pub const fn align_down(addr: usize, align: usize) -> usize {
    addr & !align.wrapping_sub(1)
}
#[inline(always)]
pub const fn align_up(addr: usize, align: usize) -> usize {
    align_down(addr.wrapping_add(align.wrapping_sub(1)), align)
}
#[inline(always)]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & align.wrapping_sub(1) == 0
}

/// Number of words needed to hold `bytes`, never less than `min`.
#[inline]
pub const fn words_for_bytes(bytes: usize, min: usize) -> usize {
    let words = (bytes + WORD_SIZE - 1) / WORD_SIZE;
    if words < min {
        min
    } else {
        words
    }
}

pub struct FormattedSize {
    pub size: usize,
}

impl std::fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let ksize = (self.size as f64) / 1024f64;

        if ksize < 1f64 {
            return write!(f, "{}B", self.size);
        }

        let msize = ksize / 1024f64;

        if msize < 1f64 {
            return write!(f, "{:.1}K", ksize);
        }

        let gsize = msize / 1024f64;

        if gsize < 1f64 {
            write!(f, "{:.1}M", msize)
        } else {
            write!(f, "{:.1}G", gsize)
        }
    }
}

pub fn formatted_size(size: usize) -> FormattedSize {
    FormattedSize { size }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_down(4097, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_up(4096, 4096), 4096);
        assert!(is_aligned(8192, 4096));
        assert!(!is_aligned(8200, 4096));
    }

    #[test]
    fn byte_sizes_round_to_words() {
        assert_eq!(words_for_bytes(1, 3), 3);
        assert_eq!(words_for_bytes(3 * WORD_SIZE, 3), 3);
        assert_eq!(words_for_bytes(3 * WORD_SIZE + 1, 3), 4);
        assert_eq!(words_for_bytes(0, 1), 1);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(formatted_size(512).to_string(), "512B");
        assert_eq!(formatted_size(4096).to_string(), "4.0K");
        assert_eq!(formatted_size(3 * 1024 * 1024 / 2).to_string(), "1.5M");
    }
}
