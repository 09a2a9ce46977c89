use crate::arena::{Arena, Handle};
use crate::entry::Entry;
use crate::red_black_tree::node::{Color, Node};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::mem;

/// The core engine of the red black tree.
///
/// Nodes are stored in a flat arena and linked by handle, so the parent back-references needed by
/// the fixup procedures never compete with the ownership of the child links. Both fixup
/// procedures are bottom-up walks along parent handles, bounded by the height of the tree.
pub struct RbTree<T, U> {
    arena: Arena<Node<T, U>>,
    root: Option<Handle>,
}

impl<T, U> RbTree<T, U> {
    pub fn new() -> Self {
        RbTree {
            arena: Arena::new(),
            root: None,
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.arena.clear();
    }

    fn is_red(&self, tree: Option<Handle>) -> bool {
        match tree {
            None => false,
            Some(handle) => self.arena[handle].color == Color::Red,
        }
    }

    fn find<V>(&self, key: &V) -> Option<Handle>
    where
        T: Borrow<V>,
        V: Ord + ?Sized,
    {
        let mut current = self.root;
        while let Some(handle) = current {
            current = match key.cmp(self.arena[handle].entry.key.borrow()) {
                Ordering::Less => self.arena[handle].left,
                Ordering::Greater => self.arena[handle].right,
                Ordering::Equal => return Some(handle),
            };
        }
        None
    }

    pub fn get<V>(&self, key: &V) -> Option<&Entry<T, U>>
    where
        T: Borrow<V>,
        V: Ord + ?Sized,
    {
        self.find(key).map(move |handle| &self.arena[handle].entry)
    }

    pub fn get_mut<V>(&mut self, key: &V) -> Option<&mut Entry<T, U>>
    where
        T: Borrow<V>,
        V: Ord + ?Sized,
    {
        match self.find(key) {
            Some(handle) => Some(&mut self.arena[handle].entry),
            None => None,
        }
    }

    pub fn insert(&mut self, key: T, value: U)
    where
        T: Ord,
    {
        let mut parent = None;
        let mut went_left = false;
        let mut current = self.root;
        while let Some(handle) = current {
            parent = Some(handle);
            // equal keys walk right so that a duplicate lands after the existing occurrence
            went_left = key < self.arena[handle].entry.key;
            current = if went_left {
                self.arena[handle].left
            } else {
                self.arena[handle].right
            };
        }

        let new_handle = self.arena.allocate(Node::new(key, value, parent));
        match parent {
            None => self.root = Some(new_handle),
            Some(parent_handle) => {
                if went_left {
                    self.arena[parent_handle].left = Some(new_handle);
                } else {
                    self.arena[parent_handle].right = Some(new_handle);
                }
            }
        }

        self.insert_fixup(new_handle);
    }

    // Restores the color invariants after a red leaf is attached. The only possible violation is
    // a red node with a red parent; every round either recolors and moves the violation two
    // levels up, or resolves it with at most two rotations.
    fn insert_fixup(&mut self, mut current: Handle) {
        loop {
            let parent = match self.arena[current].parent {
                Some(parent) if self.arena[parent].color == Color::Red => parent,
                _ => break,
            };
            let grandparent = self.arena[parent]
                .parent
                .expect("Expected a red node to have a parent.");

            if Some(parent) == self.arena[grandparent].left {
                let aunt = self.arena[grandparent].right;
                if self.is_red(aunt) {
                    let aunt = aunt.expect("Expected a red aunt node.");
                    self.arena[parent].color = Color::Black;
                    self.arena[aunt].color = Color::Black;
                    self.arena[grandparent].color = Color::Red;
                    current = grandparent;
                } else {
                    if Some(current) == self.arena[parent].right {
                        current = parent;
                        self.rotate_left(current);
                    }
                    let parent = self.arena[current]
                        .parent
                        .expect("Expected a non-root node to have a parent.");
                    self.arena[parent].color = Color::Black;
                    self.arena[grandparent].color = Color::Red;
                    self.rotate_right(grandparent);
                }
            } else {
                let aunt = self.arena[grandparent].left;
                if self.is_red(aunt) {
                    let aunt = aunt.expect("Expected a red aunt node.");
                    self.arena[parent].color = Color::Black;
                    self.arena[aunt].color = Color::Black;
                    self.arena[grandparent].color = Color::Red;
                    current = grandparent;
                } else {
                    if Some(current) == self.arena[parent].left {
                        current = parent;
                        self.rotate_right(current);
                    }
                    let parent = self.arena[current]
                        .parent
                        .expect("Expected a non-root node to have a parent.");
                    self.arena[parent].color = Color::Black;
                    self.arena[grandparent].color = Color::Red;
                    self.rotate_left(grandparent);
                }
            }
        }

        let root = self.root.expect("Expected a non-empty tree.");
        self.arena[root].color = Color::Black;
    }

    pub fn remove<V>(&mut self, key: &V) -> Option<Entry<T, U>>
    where
        T: Borrow<V>,
        V: Ord + ?Sized,
    {
        let target = self.find(key)?;

        let free = if self.arena[target].left.is_some() && self.arena[target].right.is_some() {
            // the in-order predecessor has no right child, so it can be spliced out in place of
            // the target once the entries are swapped
            let mut predecessor = self.arena[target]
                .left
                .expect("Expected a left child node.");
            while let Some(right) = self.arena[predecessor].right {
                predecessor = right;
            }
            let (target_node, predecessor_node) = self.arena.get_pair_mut(target, predecessor);
            mem::swap(&mut target_node.entry, &mut predecessor_node.entry);
            predecessor
        } else {
            target
        };

        let child = self.arena[free].left.or(self.arena[free].right);
        let parent = self.arena[free].parent;
        if let Some(child_handle) = child {
            self.arena[child_handle].parent = parent;
        }
        match parent {
            None => self.root = child,
            Some(parent_handle) => {
                if Some(free) == self.arena[parent_handle].left {
                    self.arena[parent_handle].left = child;
                } else {
                    self.arena[parent_handle].right = child;
                }
            }
        }

        let node = self.arena.free(free);
        if node.color == Color::Black {
            self.remove_fixup(child, parent);
        }
        Some(node.entry)
    }

    // Restores the black-height invariant after a black node is spliced out. `current` is the
    // subtree that is short one black node; it may be an empty leaf, so its position is tracked
    // through `parent`.
    fn remove_fixup(&mut self, mut current: Option<Handle>, mut parent: Option<Handle>) {
        while let Some(parent_handle) = parent {
            if self.is_red(current) {
                break;
            }

            if current == self.arena[parent_handle].left {
                let mut sibling = self.arena[parent_handle]
                    .right
                    .expect("Expected a sibling node.");
                if self.arena[sibling].color == Color::Red {
                    self.arena[sibling].color = Color::Black;
                    self.arena[parent_handle].color = Color::Red;
                    self.rotate_left(parent_handle);
                    sibling = self.arena[parent_handle]
                        .right
                        .expect("Expected a sibling node.");
                }

                if !self.is_red(self.arena[sibling].left) && !self.is_red(self.arena[sibling].right)
                {
                    self.arena[sibling].color = Color::Red;
                    current = Some(parent_handle);
                    parent = self.arena[parent_handle].parent;
                } else {
                    if !self.is_red(self.arena[sibling].right) {
                        let near = self.arena[sibling]
                            .left
                            .expect("Expected a red near child.");
                        self.arena[near].color = Color::Black;
                        self.arena[sibling].color = Color::Red;
                        self.rotate_right(sibling);
                        sibling = self.arena[parent_handle]
                            .right
                            .expect("Expected a sibling node.");
                    }
                    self.arena[sibling].color = self.arena[parent_handle].color;
                    self.arena[parent_handle].color = Color::Black;
                    let far = self.arena[sibling]
                        .right
                        .expect("Expected a red far child.");
                    self.arena[far].color = Color::Black;
                    self.rotate_left(parent_handle);
                    current = self.root;
                    parent = None;
                }
            } else {
                let mut sibling = self.arena[parent_handle]
                    .left
                    .expect("Expected a sibling node.");
                if self.arena[sibling].color == Color::Red {
                    self.arena[sibling].color = Color::Black;
                    self.arena[parent_handle].color = Color::Red;
                    self.rotate_right(parent_handle);
                    sibling = self.arena[parent_handle]
                        .left
                        .expect("Expected a sibling node.");
                }

                if !self.is_red(self.arena[sibling].left) && !self.is_red(self.arena[sibling].right)
                {
                    self.arena[sibling].color = Color::Red;
                    current = Some(parent_handle);
                    parent = self.arena[parent_handle].parent;
                } else {
                    if !self.is_red(self.arena[sibling].left) {
                        let near = self.arena[sibling]
                            .right
                            .expect("Expected a red near child.");
                        self.arena[near].color = Color::Black;
                        self.arena[sibling].color = Color::Red;
                        self.rotate_left(sibling);
                        sibling = self.arena[parent_handle]
                            .left
                            .expect("Expected a sibling node.");
                    }
                    self.arena[sibling].color = self.arena[parent_handle].color;
                    self.arena[parent_handle].color = Color::Black;
                    let far = self.arena[sibling]
                        .left
                        .expect("Expected a red far child.");
                    self.arena[far].color = Color::Black;
                    self.rotate_right(parent_handle);
                    current = self.root;
                    parent = None;
                }
            }
        }

        if let Some(handle) = current {
            self.arena[handle].color = Color::Black;
        }
    }

    fn rotate_left(&mut self, handle: Handle) {
        let pivot = self.arena[handle]
            .right
            .expect("Expected a right child node.");
        let crossing = self.arena[pivot].left;

        self.arena[handle].right = crossing;
        if let Some(crossing_handle) = crossing {
            self.arena[crossing_handle].parent = Some(handle);
        }

        let parent = self.arena[handle].parent;
        self.arena[pivot].parent = parent;
        match parent {
            None => self.root = Some(pivot),
            Some(parent_handle) => {
                if Some(handle) == self.arena[parent_handle].left {
                    self.arena[parent_handle].left = Some(pivot);
                } else {
                    self.arena[parent_handle].right = Some(pivot);
                }
            }
        }

        self.arena[pivot].left = Some(handle);
        self.arena[handle].parent = Some(pivot);
    }

    fn rotate_right(&mut self, handle: Handle) {
        let pivot = self.arena[handle]
            .left
            .expect("Expected a left child node.");
        let crossing = self.arena[pivot].right;

        self.arena[handle].left = crossing;
        if let Some(crossing_handle) = crossing {
            self.arena[crossing_handle].parent = Some(handle);
        }

        let parent = self.arena[handle].parent;
        self.arena[pivot].parent = parent;
        match parent {
            None => self.root = Some(pivot),
            Some(parent_handle) => {
                if Some(handle) == self.arena[parent_handle].left {
                    self.arena[parent_handle].left = Some(pivot);
                } else {
                    self.arena[parent_handle].right = Some(pivot);
                }
            }
        }

        self.arena[pivot].right = Some(handle);
        self.arena[handle].parent = Some(pivot);
    }

    pub fn min(&self) -> Option<&Entry<T, U>> {
        let mut current = self.root?;
        while let Some(left) = self.arena[current].left {
            current = left;
        }
        Some(&self.arena[current].entry)
    }

    pub fn max(&self) -> Option<&Entry<T, U>> {
        let mut current = self.root?;
        while let Some(right) = self.arena[current].right {
            current = right;
        }
        Some(&self.arena[current].entry)
    }

    pub fn floor<V>(&self, key: &V) -> Option<&Entry<T, U>>
    where
        T: Borrow<V>,
        V: Ord + ?Sized,
    {
        let mut current = self.root;
        let mut bound = None;
        while let Some(handle) = current {
            match key.cmp(self.arena[handle].entry.key.borrow()) {
                Ordering::Less => current = self.arena[handle].left,
                Ordering::Greater => {
                    bound = Some(handle);
                    current = self.arena[handle].right;
                }
                Ordering::Equal => return Some(&self.arena[handle].entry),
            }
        }
        bound.map(|handle| &self.arena[handle].entry)
    }

    pub fn ceil<V>(&self, key: &V) -> Option<&Entry<T, U>>
    where
        T: Borrow<V>,
        V: Ord + ?Sized,
    {
        let mut current = self.root;
        let mut bound = None;
        while let Some(handle) = current {
            match key.cmp(self.arena[handle].entry.key.borrow()) {
                Ordering::Greater => current = self.arena[handle].right,
                Ordering::Less => {
                    bound = Some(handle);
                    current = self.arena[handle].left;
                }
                Ordering::Equal => return Some(&self.arena[handle].entry),
            }
        }
        bound.map(|handle| &self.arena[handle].entry)
    }

    /// Checks that the tree upholds the red black invariants: the root is black, a red node
    /// never has a red child, every path from a node down to a leaf passes through the same
    /// number of black nodes, the binary search order holds with duplicates to the right, and
    /// every parent back-reference agrees with the child links.
    pub fn check_invariants(&self) -> bool
    where
        T: Ord,
    {
        if self.is_red(self.root) {
            return false;
        }
        if let Some(root) = self.root {
            if self.arena[root].parent.is_some() {
                return false;
            }
        }
        self.validate(self.root, None, None, None).is_some()
    }

    // Returns the black height of the subtree, or `None` if an invariant is violated below it.
    fn validate(
        &self,
        tree: Option<Handle>,
        parent: Option<Handle>,
        lower: Option<&T>,
        upper: Option<&T>,
    ) -> Option<usize>
    where
        T: Ord,
    {
        let handle = match tree {
            None => return Some(1),
            Some(handle) => handle,
        };
        let node = &self.arena[handle];

        if node.parent != parent {
            return None;
        }
        if node.color == Color::Red && (self.is_red(node.left) || self.is_red(node.right)) {
            return None;
        }
        if let Some(lower_key) = lower {
            if node.entry.key < *lower_key {
                return None;
            }
        }
        if let Some(upper_key) = upper {
            if node.entry.key >= *upper_key {
                return None;
            }
        }

        let left_height = self.validate(node.left, Some(handle), lower, Some(&node.entry.key))?;
        let right_height = self.validate(node.right, Some(handle), Some(&node.entry.key), upper)?;
        if left_height != right_height {
            return None;
        }
        match node.color {
            Color::Black => Some(left_height + 1),
            Color::Red => Some(left_height),
        }
    }

    pub fn iter(&self) -> Iter<'_, T, U> {
        Iter {
            tree: self,
            stack: Vec::new(),
            current: self.root,
        }
    }

    #[cfg(test)]
    fn height(&self) -> usize {
        fn subtree_height<T, U>(tree: &RbTree<T, U>, handle: Option<Handle>) -> usize {
            match handle {
                None => 0,
                Some(handle) => {
                    1 + std::cmp::max(
                        subtree_height(tree, tree.arena[handle].left),
                        subtree_height(tree, tree.arena[handle].right),
                    )
                }
            }
        }
        subtree_height(self, self.root)
    }
}

impl<T, U> IntoIterator for RbTree<T, U> {
    type IntoIter = IntoIter<T, U>;
    type Item = Entry<T, U>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            current: self.root,
            tree: self,
            stack: Vec::new(),
        }
    }
}

/// A borrowing iterator over the entries of the tree, yielded in ascending key order.
///
/// The traversal keeps an explicit stack of nodes whose right subtrees are still pending; any
/// number of these iterators may traverse the same tree at once.
pub struct Iter<'a, T, U> {
    tree: &'a RbTree<T, U>,
    stack: Vec<Handle>,
    current: Option<Handle>,
}

impl<'a, T, U> Iter<'a, T, U> {
    /// Restarts the traversal from the leftmost entry.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.current = self.tree.root;
    }
}

impl<'a, T, U> Iterator for Iter<'a, T, U> {
    type Item = &'a Entry<T, U>;

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        while let Some(handle) = self.current {
            self.stack.push(handle);
            self.current = tree.arena[handle].left;
        }
        self.stack.pop().map(|handle| {
            let node = &tree.arena[handle];
            self.current = node.right;
            &node.entry
        })
    }
}

/// An owning iterator over the entries of the tree, yielded in ascending key order.
///
/// Each node is freed from the arena as its entry is yielded.
pub struct IntoIter<T, U> {
    tree: RbTree<T, U>,
    stack: Vec<Handle>,
    current: Option<Handle>,
}

impl<T, U> Iterator for IntoIter<T, U> {
    type Item = Entry<T, U>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(handle) = self.current {
            self.stack.push(handle);
            self.current = self.tree.arena[handle].left;
        }
        self.stack.pop().map(|handle| {
            let node = self.tree.arena.free(handle);
            self.current = node.right;
            node.entry
        })
    }
}
