//! Uploaded image records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::formats::extension_of;

/// Unique identifier for an uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ImageId(pub String);

impl ImageId {
    /// Generate a new random image ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An uploaded source image. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: ImageId,
    /// Object storage key of the original upload
    pub storage_key: String,
    /// File name as sent by the client
    pub original_file_name: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

impl Image {
    /// Create a new image record for an upload.
    ///
    /// The storage key is `images/<id><ext>`, where the extension is taken from
    /// the client's file name so the stored object keeps its format hint.
    pub fn new(original_file_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        let original_file_name = original_file_name.into();
        let id = ImageId::new();
        let storage_key = format!("images/{}{}", id, extension_of(&original_file_name));

        Self {
            id,
            storage_key,
            original_file_name,
            content_type: content_type.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_keeps_extension() {
        let image = Image::new("cat.PNG", "image/png");
        assert_eq!(image.storage_key, format!("images/{}.png", image.id));
    }

    #[test]
    fn test_storage_key_without_extension() {
        let image = Image::new("blob", "application/octet-stream");
        assert_eq!(image.storage_key, format!("images/{}", image.id));
    }

    #[test]
    fn test_image_serializes_camel_case() {
        let image = Image::new("cat.png", "image/png");
        let json = serde_json::to_value(&image).unwrap();
        assert!(json.get("storageKey").is_some());
        assert!(json.get("originalFileName").is_some());
    }
}
