// storage/src/config/mod.rs

use crate::{Result, StorageError};

/// Degree used when the caller does not pick one.
pub const DEFAULT_DEGREE: usize = 3;

pub const DEFAULT_DATA_PATH: &str = "btree.bin";

/// Width of a string field that does not declare its own maximum.
pub const DEFAULT_STRING_MAX_LENGTH: usize = 256;

/// Size of a stored node offset (child pointers and the root header).
pub const OFFSET_SIZE: usize = 8;

/// Size of each of the two count fields at the start of a node slot.
pub const LENGTH_SIZE: usize = 8;

/// The root offset header occupies the first bytes of the file.
pub const ROOT_HEADER_SIZE: u64 = OFFSET_SIZE as u64;

/// Options accepted by [`crate::BTree::open_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TreeOptions {
    pub degree: usize,
    /// Create the backing file when it does not exist yet.
    pub create: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            degree: DEFAULT_DEGREE,
            create: true,
        }
    }
}

impl TreeOptions {
    pub fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.degree <= 1 {
            return Err(StorageError::InvalidArgument(format!(
                "degree should be greater than 1, got {}",
                self.degree
            )));
        }
        if self.degree.checked_mul(2).is_none() {
            return Err(StorageError::InvalidArgument(format!(
                "degree {} is too large",
                self.degree
            )));
        }
        Ok(())
    }

    /// Fewest elements a non-root node holds after a split.
    pub fn min_elements(&self) -> usize {
        self.degree.saturating_sub(1)
    }

    pub fn max_elements(&self) -> usize {
        self.degree.saturating_mul(2).saturating_sub(1)
    }
}
