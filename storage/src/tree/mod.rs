//! The B-tree engine.
//!
//! Every operation starts with a traversal from the root that re-reads each
//! node from the file and records the path taken as `(node, index)` steps.
//! Lookups and deletes act on the last step; inserts walk the path back up
//! to split over-populated nodes.
//!
//! Deletes only set a tombstone. Nodes are never merged, freed or moved, so
//! the file only grows: new nodes are always appended at its end.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::{TreeOptions, ROOT_HEADER_SIZE};
use crate::file::NodeFile;
use crate::node::{Element, Node, NodeLayout};
use crate::record::{Record, RecordCodec};
use crate::{Result, StorageError};

/// One node visited by a traversal and the index searched in it.
struct Step<R> {
    node: Node<R>,
    index: usize,
}

struct Traversal<R> {
    found: bool,
    ancestors: Vec<Step<R>>,
    target: Step<R>,
}

/// Summary returned by [`BTree::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Number of levels; a tree whose root is a leaf has height 1.
    pub height: usize,
    pub nodes: usize,
    pub live: usize,
    pub tombstones: usize,
}

/// A disk-resident B-tree of records `R`, keyed by `R::key()`.
///
/// The open file is guarded by a mutex, so a tree can be shared between
/// threads; each public call holds the lock for its whole duration. Only
/// one tree may have a given file open at a time.
pub struct BTree<R> {
    options: TreeOptions,
    codec: RecordCodec<R>,
    layout: NodeLayout,
    path: PathBuf,
    file: Mutex<Option<NodeFile>>,
}

impl<R: Record> BTree<R> {
    /// Opens the tree stored at `path`, creating it when missing.
    ///
    /// A store must always be reopened with the degree and record type it was
    /// created with; neither is recorded in the file.
    pub fn open(path: impl AsRef<Path>, degree: usize) -> Result<Self> {
        Self::open_with(path, TreeOptions::default().with_degree(degree))
    }

    pub fn open_with(path: impl AsRef<Path>, options: TreeOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StorageError::InvalidArgument(
                "Parameter 'path' should not be empty".to_string(),
            ));
        }
        options.validate()?;

        let codec = RecordCodec::<R>::new()?;
        let layout = NodeLayout::checked(codec.encoded_size(), options.max_elements())?;
        let mut file = NodeFile::open(path, layout.node_size(), options.create)?;

        let created = file.is_empty()?;
        if created {
            file.write_root_offset(ROOT_HEADER_SIZE)?;
            let root = Node::<R>::new(ROOT_HEADER_SIZE);
            file.write_node(root.offset(), &layout.encode(&root, &codec)?)?;
            info!("initialised empty tree at {}", path.display());
        } else {
            let end = file.end_offset()?;
            if end < ROOT_HEADER_SIZE || (end - ROOT_HEADER_SIZE) % layout.node_size() as u64 != 0 {
                warn!(
                    "{} is {} bytes, not a whole number of {}-byte nodes; was it created with another degree or record type?",
                    path.display(),
                    end,
                    layout.node_size()
                );
            }
        }

        debug!(
            "opened {} (degree {}, node size {}, created {})",
            path.display(),
            options.degree,
            layout.node_size(),
            created
        );

        Ok(Self {
            options,
            codec,
            layout,
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    pub fn degree(&self) -> usize {
        self.options.degree
    }

    pub fn options(&self) -> TreeOptions {
        self.options
    }

    /// Size in bytes of every node slot in the file.
    pub fn node_size(&self) -> usize {
        self.layout.node_size()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Returns the live record stored under `key`.
    pub fn get(&self, key: i64) -> Result<R> {
        self.with_file(|file| {
            let Traversal {
                found,
                target: Step { mut node, index },
                ..
            } = self.traverse(file, key)?;

            if !found || node.elements[index].tombstone {
                return Err(StorageError::NotFound(key));
            }
            Ok(node.elements.swap_remove(index).record)
        })
    }

    /// True when `key` is present and not deleted.
    pub fn contains(&self, key: i64) -> Result<bool> {
        self.with_file(|file| {
            let traversal = self.traverse(file, key)?;
            let target = &traversal.target;
            Ok(traversal.found && !target.node.elements[target.index].tombstone)
        })
    }

    /// Inserts `record`, or overwrites the record with the same key. An
    /// overwrite also revives a deleted key.
    pub fn put(&self, record: R) -> Result<()> {
        // Encoded again when its node is written. This pass only rejects
        // records that cannot be encoded before any node is read or split.
        self.codec.encode(&record)?;
        let key = self.codec.key(&record);

        self.with_file(|file| {
            let traversal = self.traverse(file, key)?;
            let element = Element::new(record);

            if traversal.found {
                let Step { mut node, index } = traversal.target;
                node.elements[index] = element;
                self.write_node(file, &node)
            } else {
                self.insert(file, traversal, element)
            }
        })
    }

    /// Marks `key` as deleted. The element keeps its slot.
    pub fn delete(&self, key: i64) -> Result<()> {
        self.with_file(|file| {
            let Traversal {
                found,
                target: Step { mut node, index },
                ..
            } = self.traverse(file, key)?;

            if !found || node.elements[index].tombstone {
                return Err(StorageError::NotFound(key));
            }
            node.elements[index].tombstone = true;
            self.write_node(file, &node)
        })
    }

    /// Releases the file. Every later call, including another `close`,
    /// fails with [`StorageError::AlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        let mut file = self.file.lock().take().ok_or(StorageError::AlreadyClosed)?;
        file.sync()?;
        debug!("closed {}", self.path.display());
        Ok(())
    }

    /// Prints every node in pre-order: its offset, element keys and child
    /// offsets.
    pub fn dump<W: Write>(&self, out: &mut W) -> Result<()> {
        self.with_file(|file| {
            let root = file.read_root_offset()?;
            self.dump_node(file, out, root, true)
        })
    }

    pub fn dump_to_string(&self) -> Result<String> {
        let mut out = Vec::new();
        self.dump(&mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Walks the whole tree and checks its shape: internal nodes have one
    /// more child than elements, keys ascend within and across nodes,
    /// non-root nodes hold at least `degree - 1` elements and all leaves sit
    /// at the same depth.
    pub fn verify(&self) -> Result<TreeStats> {
        self.with_file(|file| {
            let root = file.read_root_offset()?;
            let mut walk = Verify {
                stats: TreeStats::default(),
                leaf_depth: None,
                visited: HashSet::new(),
            };
            self.verify_node(file, &mut walk, root, 1, None, None)?;
            walk.stats.height = walk.leaf_depth.unwrap_or(1);
            Ok(walk.stats)
        })
    }

    fn with_file<T>(&self, op: impl FnOnce(&mut NodeFile) -> Result<T>) -> Result<T> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(StorageError::AlreadyClosed)?;
        op(file)
    }

    fn read_node(&self, file: &mut NodeFile, offset: u64) -> Result<Node<R>> {
        let buf = file.read_node(offset)?;
        self.layout.decode(offset, &buf, &self.codec)
    }

    fn write_node(&self, file: &mut NodeFile, node: &Node<R>) -> Result<()> {
        let buf = self.layout.encode(node, &self.codec)?;
        file.write_node(node.offset(), &buf)
    }

    fn traverse(&self, file: &mut NodeFile, key: i64) -> Result<Traversal<R>> {
        // A path longer than the number of slots can only come from a cycle.
        let slots = file.end_offset()?.saturating_sub(ROOT_HEADER_SIZE) / self.node_size() as u64;

        let mut ancestors = Vec::new();
        let mut offset = file.read_root_offset()?;
        loop {
            let node = self.read_node(file, offset)?;
            match node.search(key) {
                Ok(index) => {
                    return Ok(Traversal {
                        found: true,
                        ancestors,
                        target: Step { node, index },
                    });
                }
                Err(index) => match node.children.get(index).copied() {
                    Some(child) => {
                        ancestors.push(Step { node, index });
                        if ancestors.len() as u64 > slots {
                            return Err(StorageError::invalid_data(format!(
                                "traversal for key {} revisits a node",
                                key
                            )));
                        }
                        offset = child;
                    }
                    None => {
                        return Ok(Traversal {
                            found: false,
                            ancestors,
                            target: Step { node, index },
                        });
                    }
                },
            }
        }
    }

    /// Inserts into the leaf at the end of `traversal` and splits
    /// over-populated nodes from the leaf up to the root.
    fn insert(
        &self,
        file: &mut NodeFile,
        traversal: Traversal<R>,
        element: Element<R>,
    ) -> Result<()> {
        let max_elements = self.options.max_elements();
        let min_elements = self.options.min_elements();

        let mut path = traversal.ancestors;
        let mut leaf = traversal.target;
        leaf.node.insert_element(leaf.index, element);
        if !leaf.node.is_over_populated(max_elements) {
            return self.write_node(file, &leaf.node);
        }
        path.push(leaf);

        for i in (1..path.len()).rev() {
            let (upper, lower) = path.split_at_mut(i);
            let parent = &mut upper[i - 1];
            let current = &mut lower[0];

            // Only one element moves up per level, so once a node has room
            // every ancestor has room too.
            if !current.node.is_over_populated(max_elements) {
                return Ok(());
            }

            let new_offset = file.end_offset()?;
            let sibling =
                current
                    .node
                    .split(min_elements, &mut parent.node, parent.index, new_offset)?;
            debug!(
                "split node {} into {} (parent {})",
                current.node.offset(),
                new_offset,
                parent.node.offset()
            );

            self.write_node(file, &current.node)?;
            self.write_node(file, &sibling)?;
            if !parent.node.is_over_populated(max_elements) {
                self.write_node(file, &parent.node)?;
            }
        }

        let root = &mut path[0].node;
        if root.is_over_populated(max_elements) {
            self.grow_root(file, root)?;
        }
        Ok(())
    }

    /// Splits the root under a new root, adding one level to the tree.
    fn grow_root(&self, file: &mut NodeFile, root: &mut Node<R>) -> Result<()> {
        let new_root_offset = file.end_offset()?;
        let sibling_offset = new_root_offset + self.node_size() as u64;

        let mut new_root = Node::new(new_root_offset);
        new_root.insert_child(0, root.offset());
        let sibling = root.split(self.options.min_elements(), &mut new_root, 0, sibling_offset)?;

        self.write_node(file, &new_root)?;
        self.write_node(file, root)?;
        self.write_node(file, &sibling)?;
        file.write_root_offset(new_root_offset)?;

        debug!(
            "root {} split, new root {} with sibling {}",
            root.offset(),
            new_root_offset,
            sibling_offset
        );
        Ok(())
    }

    fn dump_node<W: Write>(
        &self,
        file: &mut NodeFile,
        out: &mut W,
        offset: u64,
        is_root: bool,
    ) -> Result<()> {
        let node = self.read_node(file, offset)?;

        let keys: Vec<String> = node.keys().iter().map(i64::to_string).collect();
        let children: Vec<String> = node.children.iter().map(u64::to_string).collect();

        if is_root {
            writeln!(out, "Offset: {} (root)", offset)?;
        } else {
            writeln!(out, "Offset: {}", offset)?;
        }
        writeln!(out, "| Item Keys: {}", keys.join(","))?;
        writeln!(out, "| Child Offsets: {}", children.join(","))?;
        writeln!(out, "+--------------------")?;

        for child in &node.children {
            self.dump_node(file, out, *child, false)?;
        }
        Ok(())
    }

    fn verify_node(
        &self,
        file: &mut NodeFile,
        walk: &mut Verify,
        offset: u64,
        depth: usize,
        lower: Option<i64>,
        upper: Option<i64>,
    ) -> Result<()> {
        if !walk.visited.insert(offset) {
            return Err(StorageError::invalid_data(format!(
                "node {} is reachable twice",
                offset
            )));
        }

        let node = self.read_node(file, offset)?;
        walk.stats.nodes += 1;
        for element in &node.elements {
            if element.tombstone {
                walk.stats.tombstones += 1;
            } else {
                walk.stats.live += 1;
            }
        }

        if depth > 1 && node.elements.len() < self.options.min_elements() {
            return Err(StorageError::invalid_data(format!(
                "node {} holds {} elements, fewer than {}",
                offset,
                node.elements.len(),
                self.options.min_elements()
            )));
        }

        let keys = node.keys();
        let ordered = keys.windows(2).all(|pair| pair[0] < pair[1]);
        let bounded = keys.iter().all(|key| {
            lower.map_or(true, |low| *key > low) && upper.map_or(true, |high| *key < high)
        });
        if !ordered || !bounded {
            return Err(StorageError::invalid_data(format!(
                "keys {:?} of node {} are out of order",
                keys, offset
            )));
        }

        if node.is_leaf() {
            match walk.leaf_depth {
                None => walk.leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(StorageError::invalid_data(format!(
                        "leaf {} is at depth {}, other leaves at {}",
                        offset, depth, expected
                    )));
                }
                Some(_) => {}
            }
            return Ok(());
        }

        if node.children.len() != keys.len() + 1 {
            return Err(StorageError::invalid_data(format!(
                "internal node {} has {} elements and {} children",
                offset,
                keys.len(),
                node.children.len()
            )));
        }

        for (i, child) in node.children.iter().enumerate() {
            let low = if i == 0 { lower } else { Some(keys[i - 1]) };
            let high = keys.get(i).copied().or(upper);
            self.verify_node(file, walk, *child, depth + 1, low, high)?;
        }
        Ok(())
    }
}

struct Verify {
    stats: TreeStats,
    leaf_depth: Option<usize>,
    visited: HashSet<u64>,
}

impl<R> Drop for BTree<R> {
    fn drop(&mut self) {
        if let Some(mut file) = self.file.get_mut().take() {
            if let Err(err) = file.sync() {
                warn!("failed to sync {} on drop: {}", self.path.display(), err);
            }
        }
    }
}
