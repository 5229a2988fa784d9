//! Storage engine for obtree
//!
//! This crate provides a disk-resident B-tree keyed by `i64`, storing
//! fixed-width records. Nodes live in fixed-size slots of a single file and
//! refer to each other by byte offset; there is no page cache, every node is
//! read from and written to the file directly.

pub mod config;
pub mod file;
pub mod node;
pub mod record;
pub mod tree;

pub use config::{TreeOptions, DEFAULT_DATA_PATH, DEFAULT_DEGREE, DEFAULT_STRING_MAX_LENGTH};
pub use file::NodeFile;
pub use node::{Element, Node, NodeLayout};
pub use record::{Field, FieldKind, Record, RecordCodec, RecordReader, RecordWriter, Schema};
pub use tree::{BTree, TreeStats};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Tree is already closed")]
    AlreadyClosed,

    #[error("Item with key {0} is not found")]
    NotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn invalid_data(msg: impl Into<String>) -> Self {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            msg.into(),
        ))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
