//! In-memory form of one on-disk tree node.
//!
//! A node is identified only by the byte offset of its slot in the file.
//! It is a leaf iff it has no child offsets; an internal node always holds
//! exactly one more child offset than elements.

mod layout;

pub use layout::NodeLayout;

use crate::record::Record;
use crate::{Result, StorageError};

/// A record plus its deletion flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Element<R> {
    pub record: R,
    /// Set by delete; the slot stays in place.
    pub tombstone: bool,
}

impl<R: Record> Element<R> {
    pub fn new(record: R) -> Self {
        Self {
            record,
            tombstone: false,
        }
    }

    pub fn key(&self) -> i64 {
        self.record.key()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node<R> {
    offset: u64,
    pub elements: Vec<Element<R>>,
    pub children: Vec<u64>,
}

impl<R: Record> Node<R> {
    pub fn new(offset: u64) -> Self {
        Self {
            offset,
            elements: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// `Ok(i)` when element `i` has `key`, otherwise `Err(i)` where `i` is
    /// the number of elements with a smaller key: the child to descend
    /// into, or the insertion point in a leaf.
    pub fn search(&self, key: i64) -> std::result::Result<usize, usize> {
        self.elements
            .binary_search_by_key(&key, |element| element.key())
    }

    /// True once the node holds more elements than fit in a slot.
    pub fn is_over_populated(&self, max_elements: usize) -> bool {
        self.elements.len() > max_elements - 1
    }

    pub fn insert_element(&mut self, index: usize, element: Element<R>) {
        self.elements.insert(index, element);
    }

    pub fn insert_child(&mut self, index: usize, offset: u64) {
        self.children.insert(index, offset);
    }

    /// Moves everything after the element at `min_elements` into a new node
    /// at `new_offset` and promotes that element into `parent` at
    /// `parent_index`, with the new node as the child right after it.
    pub fn split(
        &mut self,
        min_elements: usize,
        parent: &mut Node<R>,
        parent_index: usize,
        new_offset: u64,
    ) -> Result<Node<R>> {
        if self.elements.len() <= min_elements {
            return Err(StorageError::InvalidArgument(format!(
                "node at offset {} has {} elements, too few to split around index {}",
                self.offset,
                self.elements.len(),
                min_elements
            )));
        }

        let mut sibling = Node::new(new_offset);
        sibling.elements = self.elements.split_off(min_elements + 1);
        if !self.is_leaf() {
            sibling.children = self.children.split_off(min_elements + 1);
        }

        if let Some(middle) = self.elements.pop() {
            parent.insert_element(parent_index, middle);
            parent.insert_child(parent_index + 1, new_offset);
        }

        Ok(sibling)
    }

    pub fn keys(&self) -> Vec<i64> {
        self.elements.iter().map(Element::key).collect()
    }
}
