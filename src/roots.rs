//! Root enumeration.
//!
//! Generated code registers live values in frames chained into a shadow
//! stack; anything else that must survive is added as an extra root. The
//! collector only reads roots, it never rewrites them.

use std::cell::{Cell, RefCell};

use hashbrown::HashSet;

/// Anything the collector can pull root words from.
pub trait Roots {
    fn for_each_root(&self, visitor: &mut dyn FnMut(usize));
}

impl Roots for () {
    fn for_each_root(&self, _visitor: &mut dyn FnMut(usize)) {}
}

impl Roots for [usize] {
    fn for_each_root(&self, visitor: &mut dyn FnMut(usize)) {
        self.iter().for_each(|&word| visitor(word));
    }
}

impl<const N: usize> Roots for [usize; N] {
    fn for_each_root(&self, visitor: &mut dyn FnMut(usize)) {
        self[..].for_each_root(visitor)
    }
}

/// Frame header as laid out by generated code: a link to the previous
/// frame, the slot count, then the slots themselves.
#[repr(C)]
pub struct RawFrame {
    prev: *const RawFrame,
    nptrs: usize,
    ptrs: [Cell<usize>; 0],
}

impl RawFrame {
    #[inline]
    pub fn prev(&self) -> *const RawFrame {
        self.prev
    }

    /// # Safety
    /// `self` must be followed in memory by `nptrs` initialized slots.
    #[inline]
    pub unsafe fn slots(&self) -> &[Cell<usize>] {
        std::slice::from_raw_parts(self.ptrs.as_ptr(), self.nptrs)
    }
}

/// Shadow stack implementation. Internally this is singly-linked list of on-stack frames.
pub struct ShadowStack {
    head: Cell<*const RawFrame>,
}

impl Default for ShadowStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowStack {
    pub const fn new() -> Self {
        Self {
            head: Cell::new(std::ptr::null()),
        }
    }

    #[inline]
    pub fn head(&self) -> *const RawFrame {
        self.head.get()
    }

    pub fn depth(&self) -> usize {
        let mut n = 0;
        FrameChain(self.head()).walk(|_| n += 1);
        n
    }
}

/// A frame chain produced outside of Rust, identified by its innermost frame.
#[derive(Clone, Copy)]
pub struct FrameChain(*const RawFrame);

impl FrameChain {
    /// # Safety
    /// Every frame reachable from `head` must stay valid and unmodified while
    /// the chain is in use.
    pub unsafe fn from_head(head: *const RawFrame) -> Self {
        Self(head)
    }

    /// Walk frames from the innermost outwards.
    pub fn walk(&self, mut visitor: impl FnMut(&RawFrame)) {
        let mut head = self.0;
        while !head.is_null() {
            unsafe {
                let frame = &*head;
                visitor(frame);
                head = frame.prev;
            }
        }
    }
}

impl Roots for FrameChain {
    fn for_each_root(&self, visitor: &mut dyn FnMut(usize)) {
        self.walk(|frame| unsafe {
            for slot in frame.slots() {
                visitor(slot.get());
            }
        });
    }
}

/// A frame holding `N` root slots. Must only be created through [`gc_frame!`](crate::gc_frame).
#[repr(C)]
pub struct Frame<'a, const N: usize> {
    prev: *const RawFrame,
    nptrs: usize,
    slots: [Cell<usize>; N],
    stack: &'a ShadowStack,
}

impl<'a, const N: usize> Frame<'a, N> {
    #[doc(hidden)]
    /// # Safety
    /// The frame must be linked with [`Frame::link`] after it reaches its final stack slot and must never move afterwards.
    #[inline]
    pub unsafe fn construct(stack: &'a ShadowStack, slots: [Cell<usize>; N]) -> Self {
        Self {
            prev: stack.head(),
            nptrs: N,
            slots,
            stack,
        }
    }

    #[doc(hidden)]
    #[inline]
    pub unsafe fn link(&self) {
        debug_assert_eq!(self.prev, self.stack.head());
        self.stack.head.set(self as *const Self as *const RawFrame);
    }

    #[inline]
    pub fn get(&self, index: usize) -> usize {
        self.slots[index].get()
    }

    #[inline]
    pub fn set(&self, index: usize, word: usize) {
        self.slots[index].set(word)
    }

    #[inline]
    pub const fn len(&self) -> usize {
        N
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        N == 0
    }
}

impl<const N: usize> Drop for Frame<'_, N> {
    /// Pop this frame and restore the previous shadow stack head.
    #[inline(always)]
    fn drop(&mut self) {
        debug_assert_eq!(
            self.stack.head(),
            self as *const Self as *const RawFrame,
            "frames must be released in LIFO order"
        );
        self.stack.head.set(self.prev);
    }
}

/// Push a frame of root slots onto a [`RootSet`]'s shadow stack for the
/// rest of the enclosing scope.
///
/// ```
/// # use slabgc::{gc_frame, roots::RootSet};
/// let roots = RootSet::new();
/// gc_frame!(frame = roots, [0, 0]);
/// frame.set(0, 42);
/// assert_eq!(frame.get(0), 42);
/// ```
#[macro_export]
macro_rules! gc_frame {
    ($name: ident = $roots: expr, [$($value: expr),* $(,)?]) => {
        let stack: &$crate::roots::ShadowStack = $roots.shadow_stack();
        let $name = unsafe {
            $crate::roots::Frame::construct(stack, [$(::core::cell::Cell::new($value)),*])
        };
        unsafe {
            $name.link();
        }
        let $name = &$name;
    };
}

/// Shadow stack plus the set of explicitly registered roots.
#[derive(Default)]
pub struct RootSet {
    stack: ShadowStack,
    extra: RefCell<HashSet<usize>>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn shadow_stack(&self) -> &ShadowStack {
        &self.stack
    }

    /// Register `word` as a root. Returns `false` if it already was one.
    pub fn add_root(&self, word: usize) -> bool {
        self.extra.borrow_mut().insert(word)
    }

    /// Unregister `word`. Returns `false` if it was not a root.
    pub fn del_root(&self, word: usize) -> bool {
        self.extra.borrow_mut().remove(&word)
    }

    pub fn num_extra_roots(&self) -> usize {
        self.extra.borrow().len()
    }
}

impl Roots for RootSet {
    fn for_each_root(&self, visitor: &mut dyn FnMut(usize)) {
        FrameChain(self.stack.head()).for_each_root(visitor);
        self.extra.borrow().iter().for_each(|&word| visitor(word));
    }
}
