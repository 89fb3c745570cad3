// ABOUTME: Storage layer for entity models and resource files
// ABOUTME: Handles are opened from plain descriptors so any process can reconnect to the same store

pub mod error;
pub mod model;
pub mod resource;

use serde::{Deserialize, Serialize};

use crate::model::Properties;

pub use error::{Result, StorageError};
pub use model::{ModelStorage, SQLITE_API};
pub use resource::{ResourceKind, ResourceStorage, FILESYSTEM_API};

/// Plain-data description of a storage handle: which api to use and how to connect
///
/// Never holds a live connection, so it can be shipped to another process and
/// reopened there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDescriptor {
    pub api: String,
    #[serde(default)]
    pub connection: Properties,
}

impl StorageDescriptor {
    pub fn new(api: impl Into<String>, connection: Properties) -> Self {
        Self {
            api: api.into(),
            connection,
        }
    }

    /// Fetch a required string connection parameter
    pub(crate) fn required_str(&self, key: &str) -> Result<&str> {
        self.connection
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StorageError::InvalidConnection {
                api: self.api.clone(),
                reason: format!("missing '{}' parameter", key),
            })
    }
}
