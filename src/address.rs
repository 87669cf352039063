use std::{fmt, ptr::NonNull};

use crate::globals::WORD_SIZE;

/// Address of an object slot handed out by an arena.
///
/// Objects are word arrays; field `i` lives at `as_ptr().add(i)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(NonNull<usize>);

impl Address {
    /// # Safety
    /// `addr` must be non-null and word aligned.
    #[inline(always)]
    pub unsafe fn from_usize_unchecked(addr: usize) -> Self {
        Self(NonNull::new_unchecked(addr as *mut usize))
    }

    /// Returns `None` for null or misaligned values.
    #[inline]
    pub fn from_usize(addr: usize) -> Option<Self> {
        if addr % WORD_SIZE != 0 {
            return None;
        }
        NonNull::new(addr as *mut usize).map(Self)
    }

    #[inline(always)]
    pub fn to_usize(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut usize {
        self.0.as_ptr()
    }

    /// Pointer to field `index` of the object.
    #[inline(always)]
    pub fn field(self, index: usize) -> *mut usize {
        unsafe { self.as_ptr().add(index) }
    }

    /// # Safety
    /// `self` must be a live object with more than `index` fields.
    #[inline(always)]
    pub unsafe fn read_field(self, index: usize) -> usize {
        self.field(index).read()
    }

    /// # Safety
    /// `self` must be a live object with more than `index` fields.
    #[inline(always)]
    pub unsafe fn write_field(self, index: usize, value: usize) {
        self.field(index).write(value)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:p})", self.as_ptr())
    }
}

impl fmt::Pointer for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.as_ptr())
    }
}
