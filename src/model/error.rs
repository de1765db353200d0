//! Error types for item construction and validation.

use thiserror::Error;

/// Errors raised while building or validating a [`DownloadItem`](super::DownloadItem).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    /// The item has no parts to download.
    #[error("download item {item_id} has no parts")]
    Empty {
        /// Id of the rejected item.
        item_id: String,
    },

    /// Two parts resolve to the same final destination.
    #[error("download item {item_id} declares part {part_id} more than once")]
    DuplicatePart {
        /// Id of the rejected item.
        item_id: String,
        /// The repeated part id.
        part_id: String,
    },

    /// A part has an empty filename.
    #[error("download item {item_id} has a part with an empty filename")]
    EmptyFilename {
        /// Id of the rejected item.
        item_id: String,
    },
}

impl ItemError {
    /// Creates an empty-item error.
    pub fn empty(item_id: impl Into<String>) -> Self {
        Self::Empty {
            item_id: item_id.into(),
        }
    }

    /// Creates a duplicate-part error.
    pub fn duplicate_part(item_id: impl Into<String>, part_id: impl Into<String>) -> Self {
        Self::DuplicatePart {
            item_id: item_id.into(),
            part_id: part_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_error_empty_display() {
        let msg = ItemError::empty("li_123").to_string();
        assert!(msg.contains("li_123"), "Expected item id in: {msg}");
        assert!(msg.contains("no parts"), "Expected reason in: {msg}");
    }

    #[test]
    fn test_item_error_duplicate_part_display() {
        let msg = ItemError::duplicate_part("li_1", "abc").to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("more than once"));
    }
}
