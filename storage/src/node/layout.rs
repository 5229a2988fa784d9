// storage/src/node/layout.rs

use bytes::{Buf, BufMut};

use super::{Element, Node};
use crate::config::{LENGTH_SIZE, OFFSET_SIZE};
use crate::record::{Record, RecordCodec};
use crate::{Result, StorageError};

/// Byte layout of one node slot:
///
/// ```text
/// [element count: 8][child count: 8]
/// [element slots: (max_elements - 1) x element_size]
/// [child offset slots: max_elements x 8]
/// ```
///
/// An element slot is the encoded record followed by a tombstone byte.
/// Every slot has the same size, so nodes can be addressed by offset alone.
/// Unused trailing slots are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    element_size: usize,
    max_elements: usize,
}

impl NodeLayout {
    const COUNTS_SIZE: usize = LENGTH_SIZE * 2;

    pub fn new(record_size: usize, max_elements: usize) -> Self {
        Self {
            element_size: record_size + 1,
            max_elements,
        }
    }

    /// Like [`NodeLayout::new`], but fails when the slot size would not fit
    /// in memory.
    pub fn checked(record_size: usize, max_elements: usize) -> Result<Self> {
        let node_size = record_size
            .checked_add(1)
            .zip(max_elements.checked_sub(1))
            .and_then(|(element_size, capacity)| element_size.checked_mul(capacity))
            .and_then(|elements| elements.checked_add(Self::COUNTS_SIZE))
            .zip(max_elements.checked_mul(OFFSET_SIZE))
            .and_then(|(head, children)| head.checked_add(children))
            .filter(|size| *size <= isize::MAX as usize);

        match node_size {
            Some(_) => Ok(Self::new(record_size, max_elements)),
            None => Err(StorageError::InvalidArgument(format!(
                "nodes of {} elements with {}-byte records are too large",
                max_elements, record_size
            ))),
        }
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn element_capacity(&self) -> usize {
        self.max_elements - 1
    }

    pub fn child_capacity(&self) -> usize {
        self.max_elements
    }

    fn children_start(&self) -> usize {
        Self::COUNTS_SIZE + self.element_capacity() * self.element_size
    }

    pub fn node_size(&self) -> usize {
        self.children_start() + self.child_capacity() * OFFSET_SIZE
    }

    pub fn encode<R: Record>(&self, node: &Node<R>, codec: &RecordCodec<R>) -> Result<Vec<u8>> {
        if node.elements.len() > self.element_capacity()
            || node.children.len() > self.child_capacity()
        {
            return Err(StorageError::InvalidArgument(format!(
                "node at offset {} holds {} elements and {} children, slot fits {} and {}",
                node.offset(),
                node.elements.len(),
                node.children.len(),
                self.element_capacity(),
                self.child_capacity()
            )));
        }

        let mut buf = vec![0u8; self.node_size()];

        let mut counts = &mut buf[..Self::COUNTS_SIZE];
        counts.put_u64(node.elements.len() as u64);
        counts.put_u64(node.children.len() as u64);

        let mut elements = &mut buf[Self::COUNTS_SIZE..self.children_start()];
        for element in &node.elements {
            elements.put_slice(&codec.encode(&element.record)?);
            elements.put_u8(u8::from(element.tombstone));
        }

        let children_start = self.children_start();
        let mut children = &mut buf[children_start..];
        for child in &node.children {
            children.put_u64(*child);
        }

        Ok(buf)
    }

    pub fn decode<R: Record>(
        &self,
        offset: u64,
        buf: &[u8],
        codec: &RecordCodec<R>,
    ) -> Result<Node<R>> {
        if buf.len() != self.node_size() {
            return Err(StorageError::invalid_data(format!(
                "node at offset {} is {} bytes, expected {}",
                offset,
                buf.len(),
                self.node_size()
            )));
        }

        let mut counts = &buf[..Self::COUNTS_SIZE];
        let element_count = counts.get_u64();
        let child_count = counts.get_u64();

        if element_count > self.element_capacity() as u64
            || child_count > self.child_capacity() as u64
        {
            return Err(StorageError::invalid_data(format!(
                "node at offset {} claims {} elements and {} children",
                offset, element_count, child_count
            )));
        }
        // Both counts fit in a slot, so they fit in usize.
        let element_count = element_count as usize;
        let child_count = child_count as usize;

        if child_count != 0 && child_count != element_count + 1 {
            return Err(StorageError::invalid_data(format!(
                "internal node at offset {} has {} elements but {} children",
                offset, element_count, child_count
            )));
        }

        let record_size = self.element_size - 1;
        let mut node = Node::new(offset);
        node.elements = buf[Self::COUNTS_SIZE..]
            .chunks_exact(self.element_size)
            .take(element_count)
            .map(|slot| -> Result<Element<R>> {
                Ok(Element {
                    record: codec.decode(&slot[..record_size])?,
                    tombstone: slot[record_size] == 1,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut children = &buf[self.children_start()..];
        node.children = (0..child_count).map(|_| children.get_u64()).collect();

        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::Sample;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample_node(offset: u64, keys: std::ops::Range<i64>) -> Node<Sample> {
        let mut node = Node::new(offset);
        node.elements = keys.map(|key| Element::new(Sample::with_key(key))).collect();
        node
    }

    #[test]
    fn test_node_size() {
        let layout = NodeLayout::new(10, 5);
        // 16 + 4 * 11 + 5 * 8
        assert_eq!(layout.node_size(), 100);
        assert_eq!(layout.element_size(), 11);
        assert_eq!(layout.element_capacity(), 4);
        assert_eq!(layout.child_capacity(), 5);
    }

    #[test]
    fn test_checked_layout() {
        assert_eq!(NodeLayout::checked(10, 5).unwrap(), NodeLayout::new(10, 5));

        for (record_size, max_elements) in [
            (10, usize::MAX),
            (usize::MAX, 5),
            (315, usize::MAX / 4),
            (10, 0),
        ] {
            assert!(matches!(
                NodeLayout::checked(record_size, max_elements),
                Err(StorageError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_encode_decode_internal() {
        let codec = RecordCodec::<Sample>::new().unwrap();
        let layout = NodeLayout::new(codec.encoded_size(), 10);

        let mut node = sample_node(8, 0..3);
        node.elements[1].tombstone = true;
        node.children = vec![0, 1, 2, 3];

        let buf = layout.encode(&node, &codec).unwrap();
        assert_eq!(buf.len(), layout.node_size());

        let decoded = layout.decode(8, &buf, &codec).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_encode_decode_full_slot() {
        let codec = RecordCodec::<Sample>::new().unwrap();
        let max_elements = 10;
        let layout = NodeLayout::new(codec.encoded_size(), max_elements);

        let mut node = sample_node(8, 0..(max_elements as i64 - 1));
        node.children = (0..max_elements as u64).collect();

        let buf = layout.encode(&node, &codec).unwrap();
        let decoded = layout.decode(8, &buf, &codec).unwrap();

        assert_eq!(decoded.keys(), node.keys());
        assert_eq!(decoded.children, node.children);
    }

    #[test]
    fn test_unused_slots_are_zero() {
        let codec = RecordCodec::<Sample>::new().unwrap();
        let layout = NodeLayout::new(codec.encoded_size(), 5);
        let node = sample_node(8, 0..1);

        let buf = layout.encode(&node, &codec).unwrap();

        assert_eq!(&buf[0..8], &1u64.to_be_bytes());
        assert_eq!(&buf[8..16], &0u64.to_be_bytes());
        let live_end = 16 + layout.element_size();
        assert!(buf[live_end..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let codec = RecordCodec::<Sample>::new().unwrap();
        let layout = NodeLayout::new(codec.encoded_size(), 5);
        let mut node = sample_node(8, 0..4);
        node.children = vec![100, 200, 300, 400, 500];

        let first = layout.encode(&node, &codec).unwrap();
        let decoded = layout.decode(8, &first, &codec).unwrap();
        assert_eq!(layout.encode(&decoded, &codec).unwrap(), first);
    }

    #[test]
    fn test_encode_over_populated() {
        let codec = RecordCodec::<Sample>::new().unwrap();
        let layout = NodeLayout::new(codec.encoded_size(), 5);
        let node = sample_node(8, 0..5);

        assert!(matches!(
            layout.encode(&node, &codec),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_counts() {
        let codec = RecordCodec::<Sample>::new().unwrap();
        let layout = NodeLayout::new(codec.encoded_size(), 5);

        let mut too_many = vec![0u8; layout.node_size()];
        too_many[0..8].copy_from_slice(&5u64.to_be_bytes());
        assert!(matches!(
            layout.decode::<Sample>(8, &too_many, &codec),
            Err(StorageError::Io(_))
        ));

        let node = sample_node(8, 0..2);
        let mut mismatched = layout.encode(&node, &codec).unwrap();
        mismatched[8..16].copy_from_slice(&2u64.to_be_bytes());
        assert!(matches!(
            layout.decode::<Sample>(8, &mismatched, &codec),
            Err(StorageError::Io(_))
        ));
    }

    #[test]
    fn test_decode_wrong_size() {
        let codec = RecordCodec::<Sample>::new().unwrap();
        let layout = NodeLayout::new(codec.encoded_size(), 5);
        let buf = vec![0u8; layout.node_size() - 1];

        assert!(matches!(
            layout.decode::<Sample>(8, &buf, &codec),
            Err(StorageError::Io(_))
        ));
    }

    #[test]
    fn test_empty_node_round_trip() {
        let codec = RecordCodec::<Sample>::new().unwrap();
        let layout = NodeLayout::new(codec.encoded_size(), 5);
        let node: Node<Sample> = Node::new(8);

        let buf = layout.encode(&node, &codec).unwrap();
        assert!(buf.iter().all(|b| *b == 0));
        assert_eq!(layout.decode(8, &buf, &codec).unwrap(), node);
    }

    #[test]
    fn test_decode_ignores_unused_slots() {
        let codec = RecordCodec::<Sample>::new().unwrap();
        let layout = NodeLayout::new(codec.encoded_size(), 5);

        let mut node = sample_node(8, 0..2);
        node.elements[0].tombstone = true;
        node.children = vec![16, 24, 32];

        let mut buf = layout.encode(&node, &codec).unwrap();
        let elements_end = NodeLayout::COUNTS_SIZE + 2 * layout.element_size();
        let children_end = layout.children_start() + 3 * OFFSET_SIZE;
        buf[elements_end..layout.children_start()].fill(0xFF);
        buf[children_end..].fill(0xFF);

        assert_eq!(layout.decode(8, &buf, &codec).unwrap(), node);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_node_round_trip(
            max_elements in 3usize..12,
            tombstones in prop::collection::vec(any::<bool>(), 0..11),
            internal in any::<bool>(),
            offsets in prop::collection::vec(any::<u64>(), 12),
            offset in any::<u64>(),
        ) {
            let codec = RecordCodec::<Sample>::new().unwrap();
            let layout = NodeLayout::new(codec.encoded_size(), max_elements);

            let count = tombstones.len().min(layout.element_capacity());
            let mut node = sample_node(offset, 0..count as i64);
            for (element, tombstone) in node.elements.iter_mut().zip(&tombstones) {
                element.tombstone = *tombstone;
            }
            if internal {
                node.children = offsets[..count + 1].to_vec();
            }

            let buf = layout.encode(&node, &codec).unwrap();
            prop_assert_eq!(buf.len(), layout.node_size());
            prop_assert_eq!(layout.decode(offset, &buf, &codec).unwrap(), node);
        }
    }
}
