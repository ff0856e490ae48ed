//! Field placement policy and upload validation.

use crate::metadata::{
    KEY_ENTITY_BUNDLE, KEY_ENTITY_TYPE, KEY_FIELD_NAME, KEY_FILETYPE, UploadMetadata,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifies the field an upload is attached to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub entity_type: String,
    pub bundle: String,
    pub field_name: String,
}

impl FieldKey {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        field_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.entity_type, self.bundle, self.field_name)
    }
}

/// Placement and acceptance rules for one field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicy {
    /// Accepted extensions, in configuration order.
    pub allowed_extensions: Vec<String>,
    /// Storage scheme, e.g. `public`.
    pub uri_scheme: String,
    /// Directory template, may contain tokens like `[date:custom:Y]`.
    pub file_directory: String,
    /// Maximum declared size in bytes.
    pub max_size: Option<u64>,
}

impl FieldPolicy {
    /// Parse a whitespace-separated extension list such as `"txt pdf doc"`.
    pub fn parse_extensions(list: &str) -> Vec<String> {
        list.split_whitespace().map(str::to_string).collect()
    }

    /// Case-sensitive exact membership.
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == extension)
    }
}

/// Check that the four context keys are present and non-empty.
///
/// Must run before any policy lookup, since the lookup is keyed by them.
pub fn require_context(metadata: &UploadMetadata) -> crate::Result<FieldKey> {
    fn present(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|v| !v.is_empty())
    }

    let entity_type = present(&metadata.entity_type);
    let bundle = present(&metadata.entity_bundle);
    let field_name = present(&metadata.field_name);
    let filetype = present(&metadata.filetype);

    let mut missing = Vec::new();
    if entity_type.is_none() {
        missing.push(KEY_ENTITY_TYPE);
    }
    if bundle.is_none() {
        missing.push(KEY_ENTITY_BUNDLE);
    }
    if field_name.is_none() {
        missing.push(KEY_FIELD_NAME);
    }
    if filetype.is_none() {
        missing.push(KEY_FILETYPE);
    }

    match (entity_type, bundle, field_name) {
        (Some(t), Some(b), Some(f)) if missing.is_empty() => Ok(FieldKey::new(t, b, f)),
        _ => Err(crate::Error::IncompleteMetadata { missing }),
    }
}

/// Validate metadata against a field policy.
pub fn validate(metadata: &UploadMetadata, policy: &FieldPolicy) -> crate::Result<()> {
    require_context(metadata)?;

    let extension = metadata.declared_extension().unwrap_or_default();
    if !policy.allows_extension(extension) {
        return Err(crate::Error::UnsupportedFileType {
            extension: extension.to_string(),
        });
    }

    if let (Some(max), Some(size)) = (policy.max_size, metadata.size)
        && size > max
    {
        return Err(crate::Error::FileTooLarge { size, max });
    }

    Ok(())
}

/// Source of field policies, consulted fresh on every request.
pub trait FieldPolicySource: Send + Sync {
    fn field_policy(&self, key: &FieldKey) -> Option<FieldPolicy>;
}

/// Fixed set of policies, typically built from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticFieldPolicies {
    policies: HashMap<FieldKey, FieldPolicy>,
}

impl StaticFieldPolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: FieldKey, policy: FieldPolicy) -> Option<FieldPolicy> {
        self.policies.insert(key, policy)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl FromIterator<(FieldKey, FieldPolicy)> for StaticFieldPolicies {
    fn from_iter<I: IntoIterator<Item = (FieldKey, FieldPolicy)>>(iter: I) -> Self {
        Self {
            policies: iter.into_iter().collect(),
        }
    }
}

impl FieldPolicySource for StaticFieldPolicies {
    fn field_policy(&self, key: &FieldKey) -> Option<FieldPolicy> {
        self.policies.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn pdf_policy() -> FieldPolicy {
        FieldPolicy {
            allowed_extensions: FieldPolicy::parse_extensions("txt pdf  doc"),
            uri_scheme: "public".to_string(),
            file_directory: "uploads".to_string(),
            max_size: Some(1000),
        }
    }

    fn metadata(filetype: &str) -> UploadMetadata {
        UploadMetadata {
            entity_type: Some("healthcare".to_string()),
            entity_bundle: Some("clinic".to_string()),
            field_name: Some("file".to_string()),
            filetype: Some(filetype.to_string()),
            filename: Some("report.pdf".to_string()),
            size: Some(10),
        }
    }

    #[test]
    fn test_parse_extensions() {
        assert_eq!(pdf_policy().allowed_extensions, vec!["txt", "pdf", "doc"]);
    }

    #[test]
    fn test_require_context_lists_every_missing_key() {
        let meta = UploadMetadata {
            entity_type: Some("healthcare".to_string()),
            field_name: Some("file".to_string()),
            filetype: Some(String::new()),
            ..Default::default()
        };
        match require_context(&meta).unwrap_err() {
            Error::IncompleteMetadata { missing } => {
                assert_eq!(missing, vec![KEY_ENTITY_BUNDLE, KEY_FILETYPE]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_require_context_returns_field_key() {
        let key = require_context(&metadata("application/pdf")).unwrap();
        assert_eq!(key, FieldKey::new("healthcare", "clinic", "file"));
        assert_eq!(key.to_string(), "healthcare.clinic.file");
    }

    #[test]
    fn test_validate_accepts_allowed_extension() {
        validate(&metadata("application/pdf"), &pdf_policy()).unwrap();
    }

    #[test]
    fn test_validate_rejects_unlisted_extension() {
        let err = validate(&metadata("application/exe"), &pdf_policy()).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedFileType {
                extension: "exe".to_string()
            }
        );
    }

    #[test]
    fn test_validate_is_case_sensitive() {
        let err = validate(&metadata("application/PDF"), &pdf_policy()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType { .. }));
    }

    #[test]
    fn test_validate_checks_declared_size() {
        let mut meta = metadata("application/pdf");
        meta.size = Some(1001);
        assert_eq!(
            validate(&meta, &pdf_policy()).unwrap_err(),
            Error::FileTooLarge {
                size: 1001,
                max: 1000
            }
        );

        meta.size = None;
        validate(&meta, &pdf_policy()).unwrap();
    }

    #[test]
    fn test_static_policies_lookup() {
        let key = FieldKey::new("healthcare", "clinic", "file");
        let policies: StaticFieldPolicies = [(key.clone(), pdf_policy())].into_iter().collect();
        assert_eq!(policies.field_policy(&key), Some(pdf_policy()));
        assert_eq!(
            policies.field_policy(&FieldKey::new("healthcare", "clinic", "other")),
            None
        );
    }
}
