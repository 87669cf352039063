//! How the collector interprets the words it finds.
//!
//! Object size and pointer-field count come from the block an object lives
//! in: an object of layout `(size, num_ptrs)` keeps its possibly-pointer
//! fields in words `0..num_ptrs`. What a single word *means* is decided by
//! the code generator's tagging scheme, which plugs in through
//! [`ObjectModel`].

use crate::{address::Address, globals::WORD_SIZE};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Edge {
    /// Not a pointer; nothing to trace.
    Immediate,
    /// Candidate reference to an object. The collector follows it only if
    /// the address belongs to the arena being collected.
    Object(Address),
    /// Placeholder that has been resolved to `target`. Fields holding it are
    /// overwritten with `target` before tracing continues.
    Indirection { target: usize },
}

pub trait ObjectModel {
    fn classify(&self, word: usize) -> Edge;
}

/// Every non-null, word-aligned word is a candidate pointer.
#[derive(Clone, Copy, Default, Debug)]
pub struct UntaggedWords;

impl ObjectModel for UntaggedWords {
    #[inline]
    fn classify(&self, word: usize) -> Edge {
        if word % WORD_SIZE == 0 {
            Address::from_usize(word).map_or(Edge::Immediate, Edge::Object)
        } else {
            Edge::Immediate
        }
    }
}

impl<M: ObjectModel + ?Sized> ObjectModel for &M {
    fn classify(&self, word: usize) -> Edge {
        (**self).classify(word)
    }
}

impl<M: ObjectModel + ?Sized> ObjectModel for Box<M> {
    fn classify(&self, word: usize) -> Edge {
        (**self).classify(word)
    }
}
