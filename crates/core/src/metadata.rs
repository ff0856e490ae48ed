//! `Upload-Metadata` header codec.
//!
//! The header is a comma-separated list of `key base64(value)` pairs. Decoding
//! is all-or-nothing: a single malformed pair fails the whole header.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

pub const KEY_ENTITY_TYPE: &str = "entityType";
pub const KEY_ENTITY_BUNDLE: &str = "entityBundle";
pub const KEY_FIELD_NAME: &str = "fieldName";
pub const KEY_FILETYPE: &str = "filetype";
pub const KEY_FILENAME: &str = "filename";
pub const KEY_SIZE: &str = "size";

/// Typed view of the recognized metadata keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub entity_type: Option<String>,
    pub entity_bundle: Option<String>,
    pub field_name: Option<String>,
    /// Declared MIME type, e.g. `application/pdf`.
    pub filetype: Option<String>,
    pub filename: Option<String>,
    pub size: Option<u64>,
}

impl UploadMetadata {
    /// Decode a raw `Upload-Metadata` header.
    ///
    /// Unrecognized keys are ignored. Empty input yields empty metadata.
    pub fn decode(raw: &str) -> crate::Result<Self> {
        let mut out = Self::default();

        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (key, encoded) = entry.split_once(' ').ok_or_else(|| {
                crate::Error::MalformedMetadata(format!("entry {entry:?} has no value"))
            })?;
            let encoded = encoded.trim();

            let bytes = STANDARD.decode(encoded).map_err(|e| {
                crate::Error::MalformedMetadata(format!("invalid base64 for {key:?}: {e}"))
            })?;
            let value = String::from_utf8(bytes).map_err(|_| {
                crate::Error::MalformedMetadata(format!("value of {key:?} is not UTF-8"))
            })?;

            match key {
                KEY_ENTITY_TYPE => out.entity_type = Some(value),
                KEY_ENTITY_BUNDLE => out.entity_bundle = Some(value),
                KEY_FIELD_NAME => out.field_name = Some(value),
                KEY_FILETYPE => out.filetype = Some(value),
                KEY_FILENAME => out.filename = Some(value),
                KEY_SIZE => {
                    let size = value.trim().parse::<u64>().map_err(|_| {
                        crate::Error::MalformedMetadata(format!("size {value:?} is not a number"))
                    })?;
                    out.size = Some(size);
                }
                _ => {}
            }
        }

        Ok(out)
    }

    /// Encode back into header form, in a fixed key order.
    pub fn encode(&self) -> String {
        let size = self.size.map(|s| s.to_string());
        let pairs = [
            (KEY_ENTITY_TYPE, self.entity_type.as_deref()),
            (KEY_ENTITY_BUNDLE, self.entity_bundle.as_deref()),
            (KEY_FIELD_NAME, self.field_name.as_deref()),
            (KEY_FILETYPE, self.filetype.as_deref()),
            (KEY_FILENAME, self.filename.as_deref()),
            (KEY_SIZE, size.as_deref()),
        ];

        pairs
            .iter()
            .filter_map(|(key, value)| value.map(|v| format!("{key} {}", STANDARD.encode(v))))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// True when no recognized key was supplied.
    pub fn is_empty(&self) -> bool {
        self.entity_type.is_none()
            && self.entity_bundle.is_none()
            && self.field_name.is_none()
            && self.filetype.is_none()
            && self.filename.is_none()
            && self.size.is_none()
    }

    /// Extension declared by `filetype`: everything after the last `/`.
    pub fn declared_extension(&self) -> Option<&str> {
        let filetype = self.filetype.as_deref()?;
        Some(match filetype.rfind('/') {
            Some(idx) => &filetype[idx + 1..],
            None => filetype,
        })
    }
}
