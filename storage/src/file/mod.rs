// storage/src/file/mod.rs

use crate::config::{OFFSET_SIZE, ROOT_HEADER_SIZE};
use crate::{Result, StorageError};
use log::trace;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The backing file of a tree.
///
/// ```text
/// offset 0..8      root node offset (big-endian u64)
/// offset 8..8+S    first node slot
/// offset 8+S..     further node slots, append-only
/// ```
///
/// Every write is followed by `sync_all` before it returns. Nothing is
/// cached: each read goes to the file.
pub struct NodeFile {
    file: File,
    path: PathBuf,
    node_size: usize,
}

impl NodeFile {
    pub fn open(path: &Path, node_size: usize, create: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)
            .map_err(StorageError::Io)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            node_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn node_size(&self) -> usize {
        self.node_size
    }

    /// Offset at which the next node slot will be allocated.
    pub fn end_offset(&self) -> Result<u64> {
        let metadata = self.file.metadata().map_err(StorageError::Io)?;
        Ok(metadata.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.end_offset()? == 0)
    }

    pub fn read_root_offset(&mut self) -> Result<u64> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(StorageError::Io)?;

        let mut buffer = [0u8; OFFSET_SIZE];
        self.file
            .read_exact(&mut buffer)
            .map_err(StorageError::Io)?;

        let root = u64::from_be_bytes(buffer);
        if root < ROOT_HEADER_SIZE {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid root offset {} in {}", root, self.path.display()),
            )));
        }

        Ok(root)
    }

    pub fn write_root_offset(&mut self, root: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(StorageError::Io)?;
        self.file
            .write_all(&root.to_be_bytes())
            .map_err(StorageError::Io)?;

        trace!("root offset set to {}", root);
        self.sync()
    }

    pub fn read_node(&mut self, offset: u64) -> Result<Vec<u8>> {
        if offset < ROOT_HEADER_SIZE {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot read the root offset header as a node",
            )));
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(StorageError::Io)?;

        let mut buffer = vec![0u8; self.node_size];
        self.file
            .read_exact(&mut buffer)
            .map_err(StorageError::Io)?;

        trace!("read node at {} ({} bytes)", offset, buffer.len());
        Ok(buffer)
    }

    pub fn write_node(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        // The header is written only through write_root_offset
        if offset < ROOT_HEADER_SIZE {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot write a node over the root offset header",
            )));
        }

        if bytes.len() != self.node_size {
            return Err(StorageError::InvalidArgument(format!(
                "node buffer is {} bytes, slot size is {}",
                bytes.len(),
                self.node_size
            )));
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(StorageError::Io)?;
        self.file.write_all(bytes).map_err(StorageError::Io)?;

        trace!("wrote node at {} ({} bytes)", offset, bytes.len());
        self.sync()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(StorageError::Io)
    }
}
