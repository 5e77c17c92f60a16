use core::fmt;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::NonNull;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

impl Color {
    /// Returns `true` if the color is [`Red`].
    ///
    /// [`Red`]: Color::Red
    #[must_use]
    fn is_red(&self) -> bool {
        matches!(self, Self::Red)
    }

    /// Returns `true` if the color is [`Black`].
    ///
    /// [`Black`]: Color::Black
    #[must_use]
    fn is_black(&self) -> bool {
        matches!(self, Self::Black)
    }
}

struct Node<T> {
    // data is uninit only for the header node, every payload node holds a
    // live value from link-in to free
    data: MaybeUninit<T>,
    color: Color,
    parent: Option<RawNode<T>>,
    left: Option<RawNode<T>>,
    right: Option<RawNode<T>>,
}

/// Wrapper around `NonNull<Node<T>>` to provide convenient methods in order
/// to make the tree algorithms much more readable.
#[repr(transparent)]
pub(crate) struct RawNode<T> {
    ptr: NonNull<Node<T>>,
}

impl<T> Clone for RawNode<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RawNode<T> {}

impl<T> PartialEq for RawNode<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T> Eq for RawNode<T> {}

impl<T> fmt::Debug for RawNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawNode").field(&self.ptr).finish()
    }
}

impl<T> RawNode<T> {
    fn from_node(node: Node<T>) -> Self {
        Self {
            ptr: unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(node))) },
        }
    }

    #[inline]
    fn as_ptr(&self) -> *mut Node<T> {
        self.ptr.as_ptr()
    }

    #[inline]
    pub(crate) unsafe fn data<'a>(&self) -> &'a T {
        unsafe { (*self.as_ptr()).data.assume_init_ref() }
    }

    #[inline]
    pub(crate) unsafe fn data_mut<'a>(&mut self) -> &'a mut T {
        unsafe { (*self.as_ptr()).data.assume_init_mut() }
    }

    #[inline]
    unsafe fn parent(&self) -> Option<RawNode<T>> {
        unsafe { (*self.as_ptr()).parent }
    }

    #[inline]
    unsafe fn set_parent(&mut self, new_parent: Option<RawNode<T>>) {
        unsafe {
            (*self.as_ptr()).parent = new_parent;
        }
    }

    #[inline]
    unsafe fn left(&self) -> Option<RawNode<T>> {
        unsafe { (*self.as_ptr()).left }
    }

    #[inline]
    unsafe fn set_left(&mut self, new_left: Option<RawNode<T>>) {
        unsafe {
            (*self.as_ptr()).left = new_left;
        }
    }

    #[inline]
    unsafe fn right(&self) -> Option<RawNode<T>> {
        unsafe { (*self.as_ptr()).right }
    }

    #[inline]
    unsafe fn set_right(&mut self, new_right: Option<RawNode<T>>) {
        unsafe {
            (*self.as_ptr()).right = new_right;
        }
    }

    #[inline]
    unsafe fn color(&self) -> Color {
        unsafe { (*self.as_ptr()).color }
    }

    #[inline]
    unsafe fn set_color(&mut self, new_color: Color) {
        unsafe { (*self.as_ptr()).color = new_color }
    }
}

unsafe fn minimum<T>(node: RawNode<T>) -> RawNode<T> {
    let mut node = node;
    while let Some(left) = unsafe { node.left() } {
        node = left;
    }
    node
}

unsafe fn maximum<T>(node: RawNode<T>) -> RawNode<T> {
    let mut node = node;
    while let Some(right) = unsafe { node.right() } {
        node = right;
    }
    node
}

/// Next node in key order. `node` must be a payload node; walking past the
/// maximum surfaces the header, which is the end position.
unsafe fn successor<T>(header: RawNode<T>, node: RawNode<T>) -> RawNode<T> {
    debug_assert!(node != header, "successor of the end position");

    if let Some(right) = unsafe { node.right() } {
        // Everything in the right subtree sits between `node` and the rest
        // of the tree, so the next item is that subtree's minimum.
        return unsafe { minimum(right) };
    }

    // No right subtree: climb until a step up leaves a left child behind.
    // The first ancestor reached through a left-child link is the next
    // larger item; climbing off the root lands on the header.
    let mut node = node;
    let mut parent = unsafe { node.parent() }.unwrap();
    loop {
        if parent == header {
            return header;
        }
        if unsafe { parent.left() } == Some(node) {
            return parent;
        }
        node = parent;
        parent = unsafe { node.parent() }.unwrap();
    }
}

/// Mirror of [`successor`]. The predecessor of the header is the cached
/// maximum, which makes stepping back from the end position O(1).
unsafe fn predecessor<T>(header: RawNode<T>, node: RawNode<T>) -> RawNode<T> {
    if node == header {
        return unsafe { node.right() }.unwrap();
    }

    if let Some(left) = unsafe { node.left() } {
        return unsafe { maximum(left) };
    }

    let mut node = node;
    let mut parent = unsafe { node.parent() }.unwrap();
    loop {
        if parent == header {
            return header;
        }
        if unsafe { parent.right() } == Some(node) {
            return parent;
        }
        node = parent;
        parent = unsafe { node.parent() }.unwrap();
    }
}

/// Points `parent` at `child`, routing through the header's root link when
/// `parent` is the header itself.
unsafe fn set_child<T>(
    mut parent: RawNode<T>,
    left: bool,
    child: Option<RawNode<T>>,
    mut header: RawNode<T>,
) {
    if parent == header {
        unsafe { header.set_parent(child) };
    } else if left {
        unsafe { parent.set_left(child) };
    } else {
        unsafe { parent.set_right(child) };
    }
}

unsafe fn rotate_left_raw<T>(mut node: RawNode<T>, mut right: RawNode<T>) {
    //    p                       p
    //    |                       |
    // +-node-+               +-right-+
    // |      |      -->      |       |
    // a  +-right-+       +-node-+    c
    //    |       |       |      |
    //    b       c       a      b
    // where a, b, c can be any subtrees
    //
    // Only the inner three links move; the caller reattaches `right` under
    // `node`'s old parent.
    unsafe {
        let b = right.left();
        node.set_right(b);
        if let Some(mut b) = b {
            b.set_parent(Some(node));
        }

        right.set_left(Some(node));
        node.set_parent(Some(right));
    }
}

unsafe fn rotate_left<T>(node: RawNode<T>, mut right: RawNode<T>, parent: RawNode<T>, header: RawNode<T>) {
    unsafe {
        let left = parent.left() == Some(node);
        rotate_left_raw(node, right);

        right.set_parent(Some(parent));
        set_child(parent, left, Some(right), header);
    }
}

unsafe fn rotate_right_raw<T>(mut node: RawNode<T>, mut left: RawNode<T>) {
    //         p              p
    //         |              |
    //     +-node-+       +-left-+
    //     |      |       |      |
    // +-left-+   c  -->  a  +-node-+
    // |      |              |      |
    // a      b              b      c
    // where a, b, c can be any subtrees
    unsafe {
        let b = left.right();
        node.set_left(b);
        if let Some(mut b) = b {
            b.set_parent(Some(node));
        }

        left.set_right(Some(node));
        node.set_parent(Some(left));
    }
}

unsafe fn rotate_right<T>(node: RawNode<T>, mut left: RawNode<T>, parent: RawNode<T>, header: RawNode<T>) {
    unsafe {
        let was_left = parent.left() == Some(node);
        rotate_right_raw(node, left);

        left.set_parent(Some(parent));
        set_child(parent, was_left, Some(left), header);
    }
}

/// Restores the coloring invariants after `node` was linked in red.
unsafe fn repair_after_insert<T>(header: RawNode<T>, node: RawNode<T>) {
    let mut node = node;
    unsafe {
        debug_assert!(node.color().is_red());
        loop {
            let mut parent = node.parent().unwrap();
            if parent == header || parent.color().is_black() {
                break;
            }

            // A red parent cannot be the root, so the grandparent is a real
            // node, and it is black because the tree held invariant 3
            // everywhere but at `node` when this iteration started.
            let mut grandparent = parent.parent().unwrap();
            debug_assert!(grandparent != header);
            debug_assert!(grandparent.color().is_black());

            let parent_is_left = grandparent.left() == Some(parent);
            let uncle = if parent_is_left {
                grandparent.right()
            } else {
                grandparent.left()
            };

            grandparent.set_color(Color::Red);
            match uncle {
                Some(mut uncle) if uncle.color().is_red() => {
                    //     +--- g:b ---+               +--- g:r ---+
                    //     |           |               |           |
                    //  + p:r +     + u:r +   -->   + p:b +     + u:b +
                    //  |     |     |     |         |     |     |     |
                    // n:r   a:b   b:b   c:b       n:r   a:b   b:b   c:b
                    // (a, b, c can be any subtrees)
                    //
                    // Black heights are unchanged and the red-red pair moved
                    // two levels up, so repeat from the grandparent.
                    parent.set_color(Color::Black);
                    uncle.set_color(Color::Black);
                    node = grandparent;
                }
                _ => {
                    // Black or absent uncle: one or two rotations finish the
                    // repair.
                    if parent_is_left {
                        if parent.right() == Some(node) {
                            //       +-- g:r --+             +--- g:r ---+
                            //       |         |             |           |
                            //  +-- p:r --+   u:b  -->   +- n:r -+      u:b
                            //  |         |              |       |
                            // a:b    +- n:r -+      +- p:r -+  c:b
                            //        |       |      |       |
                            //       b:b     c:b    a:b     b:b
                            //
                            // Inner grandchild: straighten the zig-zag. The
                            // grandparent still points at the old parent;
                            // the rotation below overwrites that link.
                            rotate_left_raw(parent, node);
                            parent = node;
                        }

                        //        +--- g:r ---+            +---- p:b ----+
                        //        |           |            |             |
                        //   +-- p:r --+     u:b  -->  +- n:r -+    +- g:r -+
                        //   |         |               |       |    |       |
                        // +-n:r-+    c:b             a:b     b:b  c:b     u:b
                        // |     |
                        // a:b  b:b
                        //
                        // The subtree root is black again, so the loop is
                        // done.
                        let great = grandparent.parent().unwrap();
                        rotate_right(grandparent, parent, great, header);
                    } else {
                        // same as above with left/right switched
                        if parent.left() == Some(node) {
                            rotate_right_raw(parent, node);
                            parent = node;
                        }

                        let great = grandparent.parent().unwrap();
                        rotate_left(grandparent, parent, great, header);
                    }
                    parent.set_color(Color::Black);
                    break;
                }
            }
        }

        if let Some(mut root) = header.parent() {
            // The recoloring case can climb all the way up and leave a red
            // root behind.
            root.set_color(Color::Black);
        }
    }
}

/// Restores the black-height invariant after a splice.
///
/// `z` is the erased node (already unlinked, not yet freed), `y` the node
/// that structurally left its original slot (`z` itself, or `z`'s relocated
/// successor), `x` the subtree promoted into `y`'s old slot and `x_parent`
/// its parent after the splice.
unsafe fn repair_after_erase<T>(
    header: RawNode<T>,
    z: RawNode<T>,
    mut y: RawNode<T>,
    x: Option<RawNode<T>>,
    x_parent: RawNode<T>,
) {
    let removed_color = unsafe {
        if y == z {
            z.color()
        } else {
            // `y` takes over `z`'s position and color; the color that left
            // the tree is `y`'s own.
            let color = y.color();
            y.set_color(z.color());
            color
        }
    };

    if removed_color.is_red() {
        // Unlinking a red node changes no black count.
        return;
    }

    let mut x = x;
    let mut x_parent = x_parent;
    unsafe {
        loop {
            if x_parent == header {
                break;
            }
            if let Some(x) = x {
                if x.color().is_red() {
                    // A red `x` absorbs the missing black by the recoloring
                    // after the loop.
                    break;
                }
            }

            // Every path through `x` is one black short. The sibling must
            // exist: before the splice both subtrees of `x_parent` had equal
            // black heights and the side holding `x` contained at least one
            // black node below `x_parent`.
            if x == x_parent.left() {
                let mut sibling = x_parent.right().unwrap();

                if sibling.color().is_red() {
                    //     +--- p:b ---+                     +--- s:b ---+
                    //     |           |                     |           |
                    // +- x:b -+   +- s:r -+    -->      +- p:r -+      d:b
                    // |       |   |       |             |       |
                    // a       b  c:b     d:b        +- x:b -+  c:b
                    //                               |       |
                    //                               a       b
                    //
                    // `x` keeps its deficit but now has a black sibling and
                    // a red parent, which the cases below terminate on.
                    debug_assert!(x_parent.color().is_black());
                    debug_assert!(sibling.left().is_some() && sibling.right().is_some());
                    sibling.set_color(Color::Black);
                    x_parent.set_color(Color::Red);
                    let grandparent = x_parent.parent().unwrap();
                    rotate_left(x_parent, sibling, grandparent, header);
                    sibling = x_parent.right().unwrap();
                }

                debug_assert!(sibling.color().is_black());
                let near = sibling.left();
                let far = sibling.right();
                let near_color = near.map(|n| n.color()).unwrap_or(Color::Black);
                let far_color = far.map(|n| n.color()).unwrap_or(Color::Black);

                if near_color.is_black() && far_color.is_black() {
                    //     +--- p:c ---+                +--- p:c ---+
                    //     |           |                |           |
                    // +- x:b -+   +- s:b -+    -->  +- x:b -+   +- s:r -+
                    // |       |   |       |         |       |   |       |
                    // a       b  c:b     d:b        a       b  c:b     d:b
                    //
                    // Take one black off the sibling side too and push the
                    // shared deficit up to the parent.
                    sibling.set_color(Color::Red);
                    x = Some(x_parent);
                    x_parent = x_parent.parent().unwrap();
                } else {
                    if far_color.is_black() {
                        // Near nephew red, far nephew black: rotate the red
                        // onto the far side so the final case applies.
                        let mut near = near.unwrap();
                        near.set_color(Color::Black);
                        sibling.set_color(Color::Red);
                        rotate_right(sibling, near, x_parent, header);
                        sibling = x_parent.right().unwrap();
                    }

                    //     +--- p:c ---+                     +--- s:c ---+
                    //     |           |                     |           |
                    // +- x:b -+   +- s:b -+    -->      +- p:b -+      d:b
                    // |       |   |       |             |       |
                    // a       b  c:b     d:r        +- x:b -+  c:b
                    //                               |       |
                    //                               a       b
                    //
                    // Paths through `x` gain the black parent they were
                    // missing, the far nephew pays for the black the other
                    // side loses, and the subtree keeps its outside color.
                    sibling.set_color(x_parent.color());
                    x_parent.set_color(Color::Black);
                    if let Some(mut far) = sibling.right() {
                        far.set_color(Color::Black);
                    }
                    let grandparent = x_parent.parent().unwrap();
                    rotate_left(x_parent, sibling, grandparent, header);
                    break;
                }
            } else {
                // same as above with left/right switched
                let mut sibling = x_parent.left().unwrap();

                if sibling.color().is_red() {
                    debug_assert!(x_parent.color().is_black());
                    debug_assert!(sibling.left().is_some() && sibling.right().is_some());
                    sibling.set_color(Color::Black);
                    x_parent.set_color(Color::Red);
                    let grandparent = x_parent.parent().unwrap();
                    rotate_right(x_parent, sibling, grandparent, header);
                    sibling = x_parent.left().unwrap();
                }

                debug_assert!(sibling.color().is_black());
                let near = sibling.right();
                let far = sibling.left();
                let near_color = near.map(|n| n.color()).unwrap_or(Color::Black);
                let far_color = far.map(|n| n.color()).unwrap_or(Color::Black);

                if near_color.is_black() && far_color.is_black() {
                    sibling.set_color(Color::Red);
                    x = Some(x_parent);
                    x_parent = x_parent.parent().unwrap();
                } else {
                    if far_color.is_black() {
                        let mut near = near.unwrap();
                        near.set_color(Color::Black);
                        sibling.set_color(Color::Red);
                        rotate_left(sibling, near, x_parent, header);
                        sibling = x_parent.left().unwrap();
                    }

                    sibling.set_color(x_parent.color());
                    x_parent.set_color(Color::Black);
                    if let Some(mut far) = sibling.left() {
                        far.set_color(Color::Black);
                    }
                    let grandparent = x_parent.parent().unwrap();
                    rotate_right(x_parent, sibling, grandparent, header);
                    break;
                }
            }
        }

        if let Some(mut x) = x {
            x.set_color(Color::Black);
        }
    }
}

/// Frees every node of the subtree without recursing: left children are
/// rotated onto the spine until the current node has none, then the node is
/// released and the walk moves on to its right child.
unsafe fn destruct<T>(root: Option<RawNode<T>>) {
    // TODO: handle panics in `T::drop`
    let mut it = root;
    while let Some(mut node) = it {
        match unsafe { node.left() } {
            Some(mut left) => {
                unsafe {
                    node.set_left(left.right());
                    left.set_right(Some(node));
                }
                it = Some(left);
            }
            None => {
                it = unsafe { node.right() };
                let boxed = unsafe { Box::from_raw(node.as_ptr()) };
                drop(unsafe { boxed.data.assume_init() });
            }
        }
    }
}

unsafe fn clone_node<T: Clone>(src: RawNode<T>, parent: RawNode<T>) -> RawNode<T> {
    RawNode::from_node(Node {
        data: MaybeUninit::new(unsafe { src.data() }.clone()),
        color: unsafe { src.color() },
        parent: Some(parent),
        left: None,
        right: None,
    })
}

/// Projects the ordering key out of a stored element.
///
/// Set-like containers store the key itself, map-like containers store a
/// `(key, value)` pair.
pub trait KeySelect {
    type Element;
    type Key;

    fn key(element: &Self::Element) -> &Self::Key;
}

/// The element is its own key.
pub struct SelectSelf<T>(PhantomData<T>);

impl<T> KeySelect for SelectSelf<T> {
    type Element = T;
    type Key = T;

    fn key(element: &T) -> &T {
        element
    }
}

/// The first component of a `(key, value)` pair is the key.
pub struct SelectFirst<K, V>(PhantomData<(K, V)>);

impl<K, V> KeySelect for SelectFirst<K, V> {
    type Element = (K, V);
    type Key = K;

    fn key(element: &(K, V)) -> &K {
        &element.0
    }
}

/// Strict weak order over keys. Equality is never consulted separately:
/// two keys are considered equal when neither orders before the other.
pub trait Compare<K: ?Sized> {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// Default comparison policy delegating to [`Ord`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> Compare<K> for NaturalOrder {
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}

/// Red-black tree keyed through a [`KeySelect`] policy and ordered by a
/// [`Compare`] policy.
///
/// Erasing a node relocates other nodes only by relinking, never by moving
/// payloads, so erase invalidates references into the erased element only.
pub struct RedBlackTree<S: KeySelect, C = NaturalOrder> {
    // INVARIANTS:
    //  * `header` is allocated in `with_comparator` and freed in `drop`;
    //    its payload is never initialized and its color is always black
    //  * `header.parent` is the root (`None` when empty); the root's parent
    //    is `header`
    //  * `header.left`/`header.right` point at the minimum/maximum payload
    //    node, or at `header` itself when the tree is empty
    //  * no red node has a red child, every path from the root to a missing
    //    child crosses the same number of black nodes
    //  * `len` is the number of payload nodes
    header: RawNode<S::Element>,
    comp: C,
    len: usize,
    marker: PhantomData<Box<Node<S::Element>>>,
}

impl<S: KeySelect, C> Drop for RedBlackTree<S, C> {
    fn drop(&mut self) {
        unsafe {
            destruct(self.header.parent());
            let _: Box<Node<S::Element>> = Box::from_raw(self.header.as_ptr());
        }
    }
}

impl<S: KeySelect> RedBlackTree<S> {
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<S: KeySelect, C> RedBlackTree<S, C> {
    pub fn with_comparator(comp: C) -> Self {
        let header = RawNode::from_node(Node {
            data: MaybeUninit::uninit(),
            color: Color::Black,
            parent: None,
            left: None,
            right: None,
        });
        let mut tree = Self {
            header,
            comp,
            len: 0,
            marker: PhantomData,
        };
        tree.reset();
        tree
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First element in key order, read from the header cache in O(1).
    pub fn first(&self) -> Option<&S::Element> {
        if self.is_empty() {
            return None;
        }
        Some(unsafe { self.begin_node().data() })
    }

    /// Last element in key order, read from the header cache in O(1).
    pub fn last(&self) -> Option<&S::Element> {
        if self.is_empty() {
            return None;
        }
        let last = unsafe { self.header.right() }.unwrap();
        Some(unsafe { last.data() })
    }

    pub fn pop_first(&mut self) -> Option<S::Element> {
        if self.is_empty() {
            return None;
        }
        let node = self.begin_node();
        Some(self.erase_node(node))
    }

    pub fn pop_last(&mut self) -> Option<S::Element> {
        if self.is_empty() {
            return None;
        }
        let node = unsafe { self.header.right() }.unwrap();
        Some(self.erase_node(node))
    }

    pub fn iter(&self) -> Iter<'_, S> {
        Iter {
            raw: self.raw_iter(),
            marker: PhantomData,
        }
    }

    pub fn clear(&mut self) {
        unsafe { destruct(self.root_node()) };
        self.reset();
        self.len = 0;
    }

    /// O(1): the headers are heap-pinned, so the trees swap wholesale and
    /// every root/min/max link keeps pointing into the tree that owns it.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Unlinks `node` and gives back its element. `node` must be a payload
    /// node of this tree.
    pub(crate) fn erase_node(&mut self, z: RawNode<S::Element>) -> S::Element {
        let header = self.header;
        unsafe {
            let z_left = z.left();
            let z_right = z.right();

            // `y` is the node that structurally leaves its slot: `z` itself
            // when it has at most one child, otherwise `z`'s successor. `x`
            // is the subtree promoted into that slot.
            let y;
            let x;
            if z_left.is_none() {
                y = z;
                x = z_right;
            } else if z_right.is_none() {
                y = z;
                x = z_left;
            } else {
                y = minimum(z_right.unwrap());
                x = y.right();
            }

            let x_parent;
            if y == z {
                // Splice `z` out, promoting its only child (or nothing).
                if let Some(mut x) = x {
                    x.set_parent(z.parent());
                }
                let z_parent = z.parent().unwrap();
                x_parent = z_parent;
                set_child(z_parent, z_parent.left() == Some(z), x, header);

                // `z` can be an extreme only in this branch; a node with
                // two children has smaller and larger neighbors.
                let mut header = header;
                if self.begin_node() == z {
                    let new_min = match z_right {
                        Some(right) => minimum(right),
                        None => z_parent,
                    };
                    header.set_left(Some(new_min));
                }
                if header.right() == Some(z) {
                    let new_max = match z_left {
                        Some(left) => maximum(left),
                        None => z_parent,
                    };
                    header.set_right(Some(new_max));
                }
            } else {
                // Relocate the successor into `z`'s slot by relinking, so
                // every surviving node keeps its identity.
                let mut y = y;
                let mut z_left = z_left.unwrap();
                z_left.set_parent(Some(y));
                y.set_left(Some(z_left));

                if Some(y) == z_right {
                    // `y` keeps its own right subtree in place.
                    x_parent = y;
                } else {
                    // First replace `y` (which has no left child) with its
                    // right child, then take over `z`'s right subtree.
                    let mut z_right = z_right.unwrap();
                    y.set_right(Some(z_right));
                    z_right.set_parent(Some(y));

                    let mut y_parent = y.parent().unwrap();
                    debug_assert!(y_parent.left() == Some(y));
                    if let Some(mut x) = x {
                        x.set_parent(Some(y_parent));
                    }
                    y_parent.set_left(x);
                    x_parent = y_parent;
                }

                let z_parent = z.parent().unwrap();
                y.set_parent(Some(z_parent));
                set_child(z_parent, z_parent.left() == Some(z), Some(y), header);
            }

            repair_after_erase(header, z, y, x, x_parent);

            // Free only after relink and repair: the repair reads colors
            // through the post-splice topology.
            let boxed = Box::from_raw(z.as_ptr());
            self.len -= 1;
            boxed.data.assume_init()
        }
    }

    fn reset(&mut self) {
        // Empty tree: no root, min/max caches point back at the header so
        // that begin == end.
        let header = self.header;
        let mut h = header;
        unsafe {
            h.set_parent(None);
            h.set_left(Some(header));
            h.set_right(Some(header));
        }
    }

    fn root_node(&self) -> Option<RawNode<S::Element>> {
        unsafe { self.header.parent() }
    }

    fn begin_node(&self) -> RawNode<S::Element> {
        unsafe { self.header.left() }.unwrap()
    }

    pub(crate) fn end_node(&self) -> RawNode<S::Element> {
        self.header
    }

    pub(crate) fn raw_iter(&self) -> RawIter<S::Element> {
        RawIter {
            front: self.begin_node(),
            back: self.end_node(),
            header: self.header,
        }
    }

    /// Links a freshly allocated red node under `parent` and repairs.
    fn insert_raw(&mut self, mut parent: RawNode<S::Element>, left: bool, element: S::Element) -> RawNode<S::Element> {
        let node = RawNode::from_node(Node {
            data: MaybeUninit::new(element),
            color: Color::Red,
            parent: Some(parent),
            left: None,
            right: None,
        });

        let mut header = self.header;
        unsafe {
            if parent == self.end_node() {
                // First node: root, minimum and maximum all at once.
                header.set_parent(Some(node));
                header.set_left(Some(node));
                header.set_right(Some(node));
            } else if left {
                if parent == self.begin_node() {
                    header.set_left(Some(node));
                }
                parent.set_left(Some(node));
            } else {
                if Some(parent) == header.right() {
                    header.set_right(Some(node));
                }
                parent.set_right(Some(node));
            }

            repair_after_insert(header, node);
        }
        self.len += 1;
        node
    }
}

impl<S: KeySelect, C: Compare<S::Key>> RedBlackTree<S, C> {
    #[inline]
    fn less(&self, lhs: &S::Key, rhs: &S::Key) -> bool {
        self.comp.compare(lhs, rhs) == Ordering::Less
    }

    /// Inserts `element` unless an equally keyed element is already present.
    /// Returns the element in the tree and whether the insertion happened.
    pub fn insert_unique(&mut self, element: S::Element) -> (&S::Element, bool) {
        let (node, rejected) = self.insert_unique_node(None, element);
        (unsafe { node.data() }, rejected.is_none())
    }

    /// Inserts `element`, placing it after all equally keyed elements so
    /// repeated equal-key insertions keep their relative order.
    pub fn insert_multi(&mut self, element: S::Element) -> &S::Element {
        let node = self.insert_multi_node(None, element);
        unsafe { node.data() }
    }

    /// Unique insertion with an optional position hint. A hint is used when
    /// the new key falls strictly between the hint's predecessor and the
    /// hint itself, skipping the descent from the root; anything else falls
    /// back to the full descent. On an equal key the element comes back in
    /// the rejected slot.
    pub(crate) fn insert_unique_node(
        &mut self,
        hint: Option<RawNode<S::Element>>,
        element: S::Element,
    ) -> (RawNode<S::Element>, Option<S::Element>) {
        let mut slot = None;

        if let Some(hint) = hint {
            let key = S::key(&element);
            let before_hint =
                hint == self.end_node() || self.less(key, unsafe { S::key(hint.data()) });
            if before_hint {
                let hint_prev = if hint == self.begin_node() {
                    None
                } else {
                    Some(unsafe { predecessor(self.header, hint) })
                };
                let after_prev = match hint_prev {
                    None => true,
                    Some(prev) => self.less(unsafe { S::key(prev.data()) }, key),
                };
                if after_prev {
                    // The key fits right before `hint`: attach as `hint`'s
                    // left child, or as the predecessor's right child when
                    // that slot is taken.
                    let left = self.root_node().is_none() || unsafe { hint.left() }.is_none();
                    let parent = if left { hint } else { hint_prev.unwrap() };
                    slot = Some((parent, left));
                }
            }
        }

        let (parent, left) = match slot {
            Some(slot) => slot,
            None => {
                let key = S::key(&element);
                let mut parent = self.end_node();
                let mut left = true;
                // Last node the descent did not go left from; the only
                // candidate that can be equal to `key`.
                let mut candidate = self.end_node();
                let mut it = self.root_node();
                while let Some(node) = it {
                    parent = node;
                    left = self.less(key, unsafe { S::key(node.data()) });
                    it = if left {
                        unsafe { node.left() }
                    } else {
                        candidate = node;
                        unsafe { node.right() }
                    };
                }
                if candidate != self.end_node()
                    && !self.less(unsafe { S::key(candidate.data()) }, key)
                {
                    return (candidate, Some(element));
                }
                (parent, left)
            }
        };

        (self.insert_raw(parent, left, element), None)
    }

    /// Multi insertion with an optional position hint. A valid hint places
    /// the element directly; a hint that is too late re-descends with an
    /// upper bound, one that is too early with a lower bound, keeping the
    /// element as close to the hinted position as the ordering allows.
    pub(crate) fn insert_multi_node(
        &mut self,
        hint: Option<RawNode<S::Element>>,
        element: S::Element,
    ) -> RawNode<S::Element> {
        enum Descent {
            UpperBound,
            LowerBound,
        }

        let mut slot = None;
        let mut descent = Descent::UpperBound;

        if let Some(hint) = hint {
            let key = S::key(&element);
            let not_after_hint =
                hint == self.end_node() || !self.less(unsafe { S::key(hint.data()) }, key);
            if not_after_hint {
                let hint_prev = if hint == self.begin_node() {
                    None
                } else {
                    Some(unsafe { predecessor(self.header, hint) })
                };
                let not_before_prev = match hint_prev {
                    None => true,
                    Some(prev) => !self.less(key, unsafe { S::key(prev.data()) }),
                };
                if not_before_prev {
                    let left = self.root_node().is_none() || unsafe { hint.left() }.is_none();
                    let parent = if left { hint } else { hint_prev.unwrap() };
                    slot = Some((parent, left));
                } else {
                    descent = Descent::UpperBound;
                }
            } else {
                descent = Descent::LowerBound;
            }
        }

        let (parent, left) = match slot {
            Some(slot) => slot,
            None => {
                let key = S::key(&element);
                let mut parent = self.end_node();
                let mut it = self.root_node();
                match descent {
                    Descent::UpperBound => {
                        // Equal keys descend right: the new element lands
                        // after every existing equal.
                        while let Some(node) = it {
                            parent = node;
                            it = if self.less(key, unsafe { S::key(node.data()) }) {
                                unsafe { node.left() }
                            } else {
                                unsafe { node.right() }
                            };
                        }
                        let left = parent == self.end_node()
                            || self.less(key, unsafe { S::key(parent.data()) });
                        (parent, left)
                    }
                    Descent::LowerBound => {
                        // Equal keys descend left: the new element lands
                        // before every existing equal, next to the hint.
                        while let Some(node) = it {
                            parent = node;
                            it = if !self.less(unsafe { S::key(node.data()) }, key) {
                                unsafe { node.left() }
                            } else {
                                unsafe { node.right() }
                            };
                        }
                        let left = parent == self.end_node()
                            || !self.less(unsafe { S::key(parent.data()) }, key);
                        (parent, left)
                    }
                }
            }
        };

        self.insert_raw(parent, left, element)
    }

    pub fn find(&self, key: &S::Key) -> Option<&S::Element> {
        self.find_node(key).map(|node| unsafe { node.data() })
    }

    /// Removes the element with an equal key, if any.
    pub fn remove(&mut self, key: &S::Key) -> Option<S::Element> {
        let node = self.find_node(key)?;
        Some(self.erase_node(node))
    }

    /// Number of elements comparing equal to `key`.
    pub fn count(&self, key: &S::Key) -> usize {
        self.equal_range(key).count()
    }

    /// Iterates from the first element not ordered before `key`.
    pub fn lower_bound(&self, key: &S::Key) -> Iter<'_, S> {
        let node = self.lower_bound_node(self.root_node(), self.end_node(), key);
        self.iter_from(node, self.end_node())
    }

    /// Iterates from the first element ordered after `key`.
    pub fn upper_bound(&self, key: &S::Key) -> Iter<'_, S> {
        let node = self.upper_bound_node(self.root_node(), self.end_node(), key);
        self.iter_from(node, self.end_node())
    }

    /// Iterates over the run of elements comparing equal to `key`.
    pub fn equal_range(&self, key: &S::Key) -> Iter<'_, S> {
        let (lower, upper) = self.equal_range_nodes(key);
        self.iter_from(lower, upper)
    }

    pub(crate) fn find_node(&self, key: &S::Key) -> Option<RawNode<S::Element>> {
        let node = self.lower_bound_node(self.root_node(), self.end_node(), key);
        if node == self.end_node() || self.less(key, unsafe { S::key(node.data()) }) {
            return None;
        }
        Some(node)
    }

    fn iter_from(&self, front: RawNode<S::Element>, back: RawNode<S::Element>) -> Iter<'_, S> {
        Iter {
            raw: RawIter {
                front,
                back,
                header: self.header,
            },
            marker: PhantomData,
        }
    }

    fn lower_bound_node(
        &self,
        root: Option<RawNode<S::Element>>,
        end: RawNode<S::Element>,
        key: &S::Key,
    ) -> RawNode<S::Element> {
        let mut result = end;
        let mut it = root;
        while let Some(node) = it {
            it = if self.less(unsafe { S::key(node.data()) }, key) {
                unsafe { node.right() }
            } else {
                result = node;
                unsafe { node.left() }
            };
        }
        result
    }

    fn upper_bound_node(
        &self,
        root: Option<RawNode<S::Element>>,
        end: RawNode<S::Element>,
        key: &S::Key,
    ) -> RawNode<S::Element> {
        let mut result = end;
        let mut it = root;
        while let Some(node) = it {
            it = if self.less(key, unsafe { S::key(node.data()) }) {
                result = node;
                unsafe { node.left() }
            } else {
                unsafe { node.right() }
            };
        }
        result
    }

    /// Fused bound search: one descent to the first node inside the equal
    /// run, then each bound finishes in the subtree that can still hold it.
    fn equal_range_nodes(&self, key: &S::Key) -> (RawNode<S::Element>, RawNode<S::Element>) {
        let mut upper = self.end_node();
        let mut it = self.root_node();
        while let Some(node) = it {
            let node_key = unsafe { S::key(node.data()) };
            if self.less(node_key, key) {
                it = unsafe { node.right() };
            } else if self.less(key, node_key) {
                upper = node;
                it = unsafe { node.left() };
            } else {
                let lower = self.lower_bound_node(unsafe { node.left() }, node, key);
                let upper = self.upper_bound_node(unsafe { node.right() }, upper, key);
                return (lower, upper);
            }
        }
        (upper, upper)
    }

    #[cfg(any(test, debug_assertions))]
    pub(crate) fn validate(&self) {
        unsafe {
            let header = self.header;
            assert!(header.color().is_black());
            let root = match header.parent() {
                None => {
                    assert_eq!(self.len, 0, "empty tree must report len 0");
                    assert!(header.left() == Some(header) && header.right() == Some(header));
                    return;
                }
                Some(root) => root,
            };

            assert!(root.color().is_black(), "root must be black");
            assert!(root.parent() == Some(header));
            assert!(header.left() == Some(minimum(root)), "minimum cache out of date");
            assert!(header.right() == Some(maximum(root)), "maximum cache out of date");

            let (_, count) = self.validate_subtree(root);
            assert_eq!(count, self.len, "len must match the node count");

            let mut prev: Option<&S::Key> = None;
            for element in self.iter() {
                let key = S::key(element);
                if let Some(prev) = prev {
                    assert!(
                        self.comp.compare(prev, key) != Ordering::Greater,
                        "in-order keys must be non-decreasing"
                    );
                }
                prev = Some(key);
            }
        }
    }

    /// Returns (black height including missing children, node count).
    #[cfg(any(test, debug_assertions))]
    unsafe fn validate_subtree(&self, node: RawNode<S::Element>) -> (usize, usize) {
        unsafe {
            if node.color().is_red() {
                assert!(
                    node.left().map(|n| n.color().is_black()).unwrap_or(true),
                    "red node with red left child"
                );
                assert!(
                    node.right().map(|n| n.color().is_black()).unwrap_or(true),
                    "red node with red right child"
                );
            }

            let (left_black, left_count) = match node.left() {
                Some(left) => {
                    assert!(left.parent() == Some(node), "left child not linked back");
                    self.validate_subtree(left)
                }
                None => (1, 0),
            };
            let (right_black, right_count) = match node.right() {
                Some(right) => {
                    assert!(right.parent() == Some(node), "right child not linked back");
                    self.validate_subtree(right)
                }
                None => (1, 0),
            };
            assert_eq!(left_black, right_black, "black height mismatch");

            (left_black + node.color().is_black() as usize, left_count + right_count + 1)
        }
    }
}

impl<S: KeySelect, C: Clone> Clone for RedBlackTree<S, C>
where
    S::Element: Clone,
{
    fn clone(&self) -> Self {
        let mut new = Self::with_comparator(self.comp.clone());
        if let Some(src_root) = self.root_node() {
            unsafe { new.copy_from(src_root) };
            new.len = self.len;
        }
        new
    }
}

impl<S: KeySelect, C> RedBlackTree<S, C>
where
    S::Element: Clone,
{
    /// Structural deep copy preserving colors, iterative so skewed inputs
    /// cannot exhaust the stack. Every step leaves a consistent partial
    /// tree, so a panicking element clone unwinds through the normal drop.
    unsafe fn copy_from(&mut self, src_root: RawNode<S::Element>) {
        let mut header = self.header;
        unsafe {
            let root = clone_node(src_root, header);
            header.set_parent(Some(root));
            header.set_left(Some(root));
            header.set_right(Some(root));

            let mut src = src_root;
            let mut dest = root;
            loop {
                if src.left().is_some() && dest.left().is_none() {
                    let src_left = src.left().unwrap();
                    let node = clone_node(src_left, dest);
                    dest.set_left(Some(node));
                    if header.left() == Some(dest) {
                        // still on the left spine: new minimum
                        header.set_left(Some(node));
                    }
                    src = src_left;
                    dest = node;
                } else if src.right().is_some() && dest.right().is_none() {
                    let src_right = src.right().unwrap();
                    let node = clone_node(src_right, dest);
                    dest.set_right(Some(node));
                    if header.right() == Some(dest) {
                        // still on the right spine: new maximum
                        header.set_right(Some(node));
                    }
                    src = src_right;
                    dest = node;
                } else if src != src_root {
                    src = src.parent().unwrap();
                    dest = dest.parent().unwrap();
                } else {
                    break;
                }
            }
        }
    }
}

impl<S: KeySelect, C: Default> Default for RedBlackTree<S, C> {
    fn default() -> Self {
        Self::with_comparator(C::default())
    }
}

impl<S: KeySelect, C> fmt::Debug for RedBlackTree<S, C>
where
    S::Element: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct Nodes<T> {
            raw: RawIter<T>,
        }

        impl<T: fmt::Debug> fmt::Debug for Nodes<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut f = f.debug_list();
                let mut raw = self.raw;
                while let Some(node) = unsafe { raw.next_node() } {
                    f.entry(&(unsafe { node.data() }, unsafe { node.color() }));
                }
                f.finish()
            }
        }

        f.debug_struct("RedBlackTree")
            .field("len", &self.len)
            .field("nodes", &Nodes { raw: self.raw_iter() })
            .finish()
    }
}

impl<S: KeySelect, C> PartialEq for RedBlackTree<S, C>
where
    S::Element: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl<S: KeySelect, C> Eq for RedBlackTree<S, C> where S::Element: Eq {}

impl<S: KeySelect, C> PartialOrd for RedBlackTree<S, C>
where
    S::Element: PartialOrd,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<S: KeySelect, C> Ord for RedBlackTree<S, C>
where
    S::Element: Ord,
{
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter().cmp(other.iter())
    }
}

/// Cursor pair over payload nodes; `back` is one past the last node and is
/// the header when the range is open-ended.
pub(crate) struct RawIter<T> {
    front: RawNode<T>,
    back: RawNode<T>,
    header: RawNode<T>,
}

impl<T> Clone for RawIter<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RawIter<T> {}

impl<T> RawIter<T> {
    pub(crate) unsafe fn next_node(&mut self) -> Option<RawNode<T>> {
        if self.front == self.back {
            return None;
        }
        let node = self.front;
        self.front = unsafe { successor(self.header, node) };
        Some(node)
    }

    pub(crate) unsafe fn next_back_node(&mut self) -> Option<RawNode<T>> {
        if self.front == self.back {
            return None;
        }
        self.back = unsafe { predecessor(self.header, self.back) };
        Some(self.back)
    }
}

pub struct Iter<'a, S: KeySelect> {
    pub(crate) raw: RawIter<S::Element>,
    pub(crate) marker: PhantomData<&'a S::Element>,
}

impl<'a, S: KeySelect> Clone for Iter<'a, S> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw,
            marker: PhantomData,
        }
    }
}

impl<'a, S: KeySelect> Iterator for Iter<'a, S> {
    type Item = &'a S::Element;

    fn next(&mut self) -> Option<Self::Item> {
        unsafe { self.raw.next_node().map(|node| node.data()) }
    }
}

impl<'a, S: KeySelect> DoubleEndedIterator for Iter<'a, S> {
    fn next_back(&mut self) -> Option<Self::Item> {
        unsafe { self.raw.next_back_node().map(|node| node.data()) }
    }
}

impl<'a, S: KeySelect, C> IntoIterator for &'a RedBlackTree<S, C> {
    type Item = &'a S::Element;
    type IntoIter = Iter<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    type IntTree = RedBlackTree<SelectSelf<i32>>;
    type PairTree = RedBlackTree<SelectFirst<i32, char>>;

    fn items(tree: &IntTree) -> Vec<i32> {
        tree.iter().copied().collect()
    }

    #[test]
    fn insert_find() {
        let mut tree = IntTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.find(&4), None);

        for key in [12, 5, 9, 2, 18, 15, 13, 17, 19] {
            let (element, inserted) = tree.insert_unique(key);
            assert_eq!(*element, key);
            assert!(inserted);
        }
        tree.validate();
        assert_eq!(tree.len(), 9);

        for key in [12, 5, 9, 2, 18, 15, 13, 17, 19] {
            assert_eq!(tree.find(&key), Some(&key));
        }
        assert_eq!(tree.find(&4), None);
        assert_eq!(tree.find(&20), None);
    }

    #[test]
    fn unique_keeps_first_element() {
        let mut tree = PairTree::new();
        tree.insert_unique((1, 'a'));
        let (element, inserted) = tree.insert_unique((1, 'b'));
        assert_eq!(*element, (1, 'a'));
        assert!(!inserted);
        assert_eq!(tree.len(), 1);
        tree.validate();
    }

    #[test]
    fn balances_into_expected_shape() {
        // ascending run forces a left rotation at the root
        let mut tree = IntTree::new();
        for key in [1, 2, 3] {
            tree.insert_unique(key);
        }
        unsafe {
            let root = tree.root_node().unwrap();
            assert_eq!(*root.data(), 2);
            assert!(root.color().is_black());
            let left = root.left().unwrap();
            let right = root.right().unwrap();
            assert_eq!(*left.data(), 1);
            assert_eq!(*right.data(), 3);
            assert!(left.color().is_red());
            assert!(right.color().is_red());
            assert!(left.parent() == Some(root));
            assert!(right.parent() == Some(root));
        }
        tree.validate();

        // zig-zag: the middle key still ends up on top
        let mut tree = IntTree::new();
        for key in [3, 1, 2] {
            tree.insert_unique(key);
        }
        unsafe {
            let root = tree.root_node().unwrap();
            assert_eq!(*root.data(), 2);
        }
        tree.validate();

        let mut tree = IntTree::new();
        for key in [3, 2, 1] {
            tree.insert_unique(key);
        }
        unsafe {
            let root = tree.root_node().unwrap();
            assert_eq!(*root.data(), 2);
        }
        tree.validate();
    }

    #[test]
    fn scenario_bounds_and_root_erase() {
        let mut tree = IntTree::new();
        for key in [5, 3, 8, 1, 4, 7, 9] {
            tree.insert_unique(key);
        }
        tree.validate();
        assert_eq!(items(&tree), [1, 3, 4, 5, 7, 8, 9]);
        assert_eq!(tree.lower_bound(&6).next(), Some(&7));

        assert_eq!(tree.remove(&5), Some(5));
        tree.validate();
        assert_eq!(items(&tree), [1, 3, 4, 7, 8, 9]);
        assert_eq!(tree.find(&5), None);
    }

    #[test]
    fn bounds() {
        let mut tree = IntTree::new();
        for key in [10, 20, 30] {
            tree.insert_unique(key);
        }

        assert_eq!(tree.lower_bound(&10).next(), Some(&10));
        assert_eq!(tree.lower_bound(&15).next(), Some(&20));
        assert_eq!(tree.lower_bound(&31).next(), None);
        assert_eq!(tree.upper_bound(&10).next(), Some(&20));
        assert_eq!(tree.upper_bound(&30).next(), None);
        assert_eq!(tree.upper_bound(&5).next(), Some(&10));

        let tail: Vec<i32> = tree.lower_bound(&20).copied().collect();
        assert_eq!(tail, [20, 30]);
    }

    #[test]
    fn bounds_on_empty_tree() {
        let tree = IntTree::new();
        assert_eq!(tree.iter().next(), None);
        assert_eq!(tree.lower_bound(&1).next(), None);
        assert_eq!(tree.upper_bound(&1).next(), None);
        assert_eq!(tree.equal_range(&1).next(), None);
        assert_eq!(tree.count(&1), 0);
        assert_eq!(tree.first(), None);
        assert_eq!(tree.last(), None);
    }

    #[test]
    fn first_last_track_extremes() {
        let mut tree = IntTree::new();
        tree.insert_unique(5);
        assert_eq!((tree.first(), tree.last()), (Some(&5), Some(&5)));
        tree.insert_unique(2);
        assert_eq!((tree.first(), tree.last()), (Some(&2), Some(&5)));
        tree.insert_unique(9);
        assert_eq!((tree.first(), tree.last()), (Some(&2), Some(&9)));

        tree.remove(&2);
        tree.validate();
        assert_eq!(tree.first(), Some(&5));
        tree.remove(&9);
        tree.validate();
        assert_eq!(tree.last(), Some(&5));
        tree.remove(&5);
        assert_eq!((tree.first(), tree.last()), (None, None));
        assert!(tree.is_empty());
    }

    #[test]
    fn erase_with_deep_successor() {
        // removing 10 relocates 11, the minimum of the right subtree, which
        // is not the right child itself
        let mut tree = IntTree::new();
        for key in [10, 5, 15, 12, 18, 11, 13] {
            tree.insert_unique(key);
        }
        tree.validate();

        assert_eq!(tree.remove(&10), Some(10));
        tree.validate();
        assert_eq!(items(&tree), [5, 11, 12, 13, 15, 18]);

        // successor is the right child itself
        assert_eq!(tree.remove(&12), Some(12));
        tree.validate();
        assert_eq!(items(&tree), [5, 11, 13, 15, 18]);
    }

    #[test]
    fn multi_insert_keeps_equal_keys_in_insertion_order() {
        let mut tree: RedBlackTree<SelectFirst<i32, u32>> = RedBlackTree::new();
        for (i, key) in [3, 1, 3, 2, 3, 1].into_iter().enumerate() {
            tree.insert_multi((key, i as u32));
        }
        tree.validate();
        assert_eq!(tree.len(), 6);

        let items: Vec<(i32, u32)> = tree.iter().copied().collect();
        assert_eq!(items, [(1, 1), (1, 5), (2, 3), (3, 0), (3, 2), (3, 4)]);

        assert_eq!(tree.count(&3), 3);
        assert_eq!(tree.count(&2), 1);
        assert_eq!(tree.count(&4), 0);

        let run: Vec<(i32, u32)> = tree.equal_range(&3).copied().collect();
        assert_eq!(run, [(3, 0), (3, 2), (3, 4)]);
        assert_eq!(tree.equal_range(&4).next(), None);
    }

    #[test]
    fn hinted_insert_matches_unhinted() {
        let mut hinted = IntTree::new();
        let mut plain = IntTree::new();
        for key in 0..100 {
            let end = hinted.end_node();
            hinted.insert_unique_node(Some(end), key);
            plain.insert_unique(key);
        }
        hinted.validate();
        assert_eq!(hinted.len(), plain.len());
        assert!(hinted.iter().eq(plain.iter()));

        // a duplicate with an end hint is still rejected
        let end = hinted.end_node();
        let (_, rejected) = hinted.insert_unique_node(Some(end), 55);
        assert_eq!(rejected, Some(55));

        // a stale hint falls back to the full descent
        let begin = hinted.begin_node();
        let (node, rejected) = hinted.insert_unique_node(Some(begin), 1000);
        assert_eq!(rejected, None);
        assert_eq!(unsafe { *node.data() }, 1000);
        hinted.validate();
        assert_eq!(hinted.last(), Some(&1000));
    }

    #[test]
    fn hinted_multi_insert_stays_stable() {
        let mut hinted: RedBlackTree<SelectFirst<i32, u32>> = RedBlackTree::new();
        for (i, key) in [7, 7, 3, 7, 3].into_iter().enumerate() {
            let end = hinted.end_node();
            hinted.insert_multi_node(Some(end), (key, i as u32));
        }
        hinted.validate();
        let items: Vec<(i32, u32)> = hinted.iter().copied().collect();
        assert_eq!(items, [(3, 2), (3, 4), (7, 0), (7, 1), (7, 3)]);
    }

    #[test]
    fn custom_comparator_reverses_order() {
        struct ReverseOrder;
        impl Compare<i32> for ReverseOrder {
            fn compare(&self, lhs: &i32, rhs: &i32) -> Ordering {
                rhs.cmp(lhs)
            }
        }

        let mut tree: RedBlackTree<SelectSelf<i32>, ReverseOrder> =
            RedBlackTree::with_comparator(ReverseOrder);
        for key in [2, 7, 1, 9] {
            tree.insert_unique(key);
        }
        tree.validate();
        assert_eq!(tree.iter().copied().collect::<Vec<_>>(), [9, 7, 2, 1]);
        assert_eq!(tree.first(), Some(&9));
        assert_eq!(tree.last(), Some(&1));
        assert_eq!(tree.lower_bound(&8).next(), Some(&7));
    }

    #[test]
    fn double_ended_iteration() {
        let mut tree = IntTree::new();
        for key in [4, 1, 3, 2, 5] {
            tree.insert_unique(key);
        }

        let backwards: Vec<i32> = tree.iter().rev().copied().collect();
        assert_eq!(backwards, [5, 4, 3, 2, 1]);

        let mut iter = tree.iter();
        assert_eq!(iter.next(), Some(&1));
        assert_eq!(iter.next_back(), Some(&5));
        assert_eq!(iter.next(), Some(&2));
        assert_eq!(iter.next_back(), Some(&4));
        assert_eq!(iter.next(), Some(&3));
        assert_eq!(iter.next(), None);
        assert_eq!(iter.next_back(), None);
    }

    #[test]
    fn pop_first_and_last() {
        let mut tree = IntTree::new();
        for key in [4, 1, 3, 2, 5] {
            tree.insert_unique(key);
        }

        assert_eq!(tree.pop_first(), Some(1));
        assert_eq!(tree.pop_last(), Some(5));
        tree.validate();
        assert_eq!(items(&tree), [2, 3, 4]);

        tree.clear();
        assert_eq!(tree.pop_first(), None);
        assert_eq!(tree.pop_last(), None);
    }

    #[test]
    fn clear_and_reuse() {
        let mut tree = IntTree::new();
        for key in 0..50 {
            tree.insert_unique(key);
        }
        tree.clear();
        assert!(tree.is_empty());
        assert_eq!(tree.iter().next(), None);
        tree.validate();

        tree.insert_unique(7);
        tree.validate();
        assert_eq!(items(&tree), [7]);
    }

    #[test]
    fn swap_exchanges_contents() {
        let mut a = IntTree::new();
        let mut b = IntTree::new();
        for key in [1, 2, 3] {
            a.insert_unique(key);
        }
        for key in [7, 8] {
            b.insert_unique(key);
        }

        a.swap(&mut b);
        a.validate();
        b.validate();
        assert_eq!(items(&a), [7, 8]);
        assert_eq!(items(&b), [1, 2, 3]);
        assert_eq!(a.first(), Some(&7));
        assert_eq!(b.last(), Some(&3));

        // trees stay usable after the swap
        a.insert_unique(9);
        b.remove(&2);
        a.validate();
        b.validate();
        assert_eq!(items(&a), [7, 8, 9]);
        assert_eq!(items(&b), [1, 3]);
    }

    #[test]
    fn clone_is_deep() {
        let mut tree = PairTree::new();
        for (key, value) in [(2, 'b'), (1, 'a'), (3, 'c'), (0, 'z')] {
            tree.insert_unique((key, value));
        }

        let copy = tree.clone();
        copy.validate();
        assert_eq!(copy.len(), tree.len());
        assert!(copy.iter().eq(tree.iter()));
        assert_eq!(copy.first(), Some(&(0, 'z')));
        assert_eq!(copy.last(), Some(&(3, 'c')));

        tree.remove(&1);
        tree.insert_unique((9, 'x'));
        assert_eq!(copy.len(), 4);
        assert_eq!(copy.find(&1), Some(&(1, 'a')));
        assert_eq!(copy.find(&9), None);
        copy.validate();
    }

    #[test]
    fn lexicographic_comparison() {
        let mut a = IntTree::new();
        let mut b = IntTree::new();
        for key in [1, 2, 3] {
            a.insert_unique(key);
            b.insert_unique(key);
        }
        assert_eq!(a, b);

        b.remove(&3);
        b.insert_unique(4);
        // [1, 2, 3] < [1, 2, 4]
        assert!(a < b);

        b.remove(&4);
        // a prefix orders first: [1, 2] < [1, 2, 3]
        assert!(b < a);
        assert_ne!(a, b);
    }

    #[test]
    fn random_insert_erase_soak() {
        #[cfg(not(miri))]
        const N: usize = 10_000;
        #[cfg(miri)]
        const N: usize = 48;

        let mut rng = ChaCha8Rng::seed_from_u64(0x1d5eed);
        let mut keys: Vec<i32> = (0..N as i32).collect();
        keys.shuffle(&mut rng);

        let mut tree = IntTree::new();
        for &key in &keys {
            tree.insert_unique(key);
        }
        tree.validate();
        assert_eq!(tree.len(), N);
        assert_eq!(tree.first(), Some(&0));
        assert_eq!(tree.last(), Some(&(N as i32 - 1)));

        keys.shuffle(&mut rng);
        for (i, &key) in keys.iter().enumerate() {
            assert_eq!(tree.remove(&key), Some(key));
            tree.validate();
            assert_eq!(tree.len(), N - i - 1);
        }
        assert!(tree.is_empty());
        assert_eq!(tree.iter().next(), None);
        assert_eq!(tree.first(), None);
    }

    mod proptests {
        use std::collections::BTreeMap;

        use proptest::prelude::*;
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        use super::*;

        #[cfg(not(miri))]
        const MAP_SIZE: usize = 1000;
        #[cfg(miri)]
        const MAP_SIZE: usize = 50;

        #[cfg(not(miri))]
        const PROPTEST_CASES: u32 = 1000;
        #[cfg(miri)]
        const PROPTEST_CASES: u32 = 10;

        proptest!(
            #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

            #[test]
            fn insert_find(
                inserts in proptest::collection::vec(0..10000i32, 0..MAP_SIZE),
                access in proptest::collection::vec(0..10000i32, 0..10)
            ) {
                let mut model = BTreeMap::new();
                let mut tree: RedBlackTree<SelectFirst<i32, usize>> = RedBlackTree::new();
                for (i, key) in inserts.iter().copied().enumerate() {
                    model.entry(key).or_insert(i);
                    tree.insert_unique((key, i));
                }
                tree.validate();
                prop_assert_eq!(tree.len(), model.len());

                for key in inserts.iter().chain(access.iter()) {
                    let expected = model.get(key).copied();
                    let actual = tree.find(key).map(|element| element.1);
                    prop_assert_eq!(actual, expected);
                }
            }

            #[test]
            fn order(
                inserts in proptest::collection::hash_set(0..10000i32, 0..MAP_SIZE),
            ) {
                let mut tree: RedBlackTree<SelectSelf<i32>> = RedBlackTree::new();
                for &key in &inserts {
                    tree.insert_unique(key);
                }

                let mut expected: Vec<i32> = inserts.into_iter().collect();
                expected.sort();
                let items: Vec<i32> = tree.iter().copied().collect();
                prop_assert_eq!(items, expected);
            }

            #[test]
            fn bounds(
                inserts in proptest::collection::hash_set(0..10000i32, 0..MAP_SIZE),
                probes in proptest::collection::vec(0..10001i32, 0..20)
            ) {
                let mut tree: RedBlackTree<SelectSelf<i32>> = RedBlackTree::new();
                let mut model: Vec<i32> = inserts.iter().copied().collect();
                model.sort();
                for &key in &inserts {
                    tree.insert_unique(key);
                }

                for probe in probes {
                    let lower = model.iter().find(|&&key| key >= probe);
                    let upper = model.iter().find(|&&key| key > probe);
                    prop_assert_eq!(tree.lower_bound(&probe).next(), lower);
                    prop_assert_eq!(tree.upper_bound(&probe).next(), upper);
                }
            }

            #[test]
            fn erase(
                inserts in proptest::collection::hash_set(0..10000i32, 0..MAP_SIZE),
                access in proptest::collection::vec(0..10000i32, 0..10)
            ) {
                let mut model = BTreeMap::new();
                let mut tree: RedBlackTree<SelectFirst<i32, i32>> = RedBlackTree::new();
                for &key in &inserts {
                    model.insert(key, !key);
                    tree.insert_unique((key, !key));
                }

                let mut keys: Vec<i32> = inserts.into_iter().collect();
                keys.shuffle(&mut thread_rng());
                for key in keys.iter().chain(access.iter()) {
                    let expected = model.remove(key).map(|value| (*key, value));
                    prop_assert_eq!(tree.remove(key), expected);
                    tree.validate();
                }
                prop_assert!(tree.is_empty());
            }

            #[test]
            fn multi_stability(
                inserts in proptest::collection::vec(0..16i32, 0..MAP_SIZE),
            ) {
                let mut tree: RedBlackTree<SelectFirst<i32, usize>> = RedBlackTree::new();
                for (i, key) in inserts.iter().copied().enumerate() {
                    tree.insert_multi((key, i));
                }
                tree.validate();
                prop_assert_eq!(tree.len(), inserts.len());

                let mut expected: Vec<(i32, usize)> = inserts
                    .iter()
                    .copied()
                    .enumerate()
                    .map(|(i, key)| (key, i))
                    .collect();
                // stable sort keeps insertion order inside equal keys
                expected.sort_by_key(|&(key, _)| key);
                let items: Vec<(i32, usize)> = tree.iter().copied().collect();
                prop_assert_eq!(items, expected);
            }
        );
    }
}
