//! Handle-to-owner attribution.
//!
//! Posts are sometimes registered under the wrong owner. When an extraction
//! reports the post's author handle, the harvester looks it up here and
//! reassigns the item if the directory says it belongs to someone else.

use std::collections::HashMap;
use std::path::Path;

use crate::error::AppError;

const MAX_HANDLE_LEN: usize = 50;

/// Handles must be 1-50 chars of `[A-Za-z0-9_]`.
pub fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= MAX_HANDLE_LEN
        && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Case-insensitive map from account handle to owner name.
#[derive(Debug, Clone, Default)]
pub struct OwnerDirectory {
    by_handle: HashMap<String, String>,
}

impl OwnerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{"Owner": ["handle_a", "handle_b"], ...}`. Invalid handles are
    /// skipped with a warning.
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(json)?;
        let mut directory = Self::new();
        for (owner, handles) in raw {
            for handle in handles {
                directory.insert(&owner, &handle);
            }
        }
        Ok(directory)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read owner directory {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    /// Adds a handle. Returns false if the handle is not well-formed.
    pub fn insert(&mut self, owner: &str, handle: &str) -> bool {
        let handle = handle.trim_start_matches('@');
        if !is_valid_handle(handle) {
            tracing::warn!(%owner, %handle, "Ignoring malformed handle");
            return false;
        }
        self.by_handle
            .insert(handle.to_ascii_lowercase(), owner.to_string());
        true
    }

    pub fn owner_for(&self, handle: &str) -> Option<&str> {
        let handle = handle.trim_start_matches('@');
        if !is_valid_handle(handle) {
            return None;
        }
        self.by_handle
            .get(&handle.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}
