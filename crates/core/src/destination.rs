//! Destination paths and object URIs.

use crate::upload::UploadKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between scheme and path, as in `public://uploads/abc`.
pub const SCHEME_SEPARATOR: &str = "://";

/// Resolved directory for one upload: `scheme://directory/upload_key`.
///
/// The upload key is always the last segment, so two uploads never share a
/// directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DestinationPath {
    scheme: String,
    directory: String,
    upload_key: UploadKey,
}

impl DestinationPath {
    /// Build a destination, trimming leading and trailing `/` from `directory`.
    pub fn new(
        scheme: impl Into<String>,
        directory: &str,
        upload_key: UploadKey,
    ) -> crate::Result<Self> {
        let scheme = scheme.into();
        validate_scheme(&scheme)?;

        let directory = directory.trim_matches('/').to_string();
        if directory
            .split('/')
            .any(|seg| seg == ".." || seg == "." || (seg.is_empty() && !directory.is_empty()))
        {
            return Err(crate::Error::InvalidDestination(format!(
                "directory {directory:?} contains empty or relative segments"
            )));
        }

        Ok(Self {
            scheme,
            directory,
            upload_key,
        })
    }

    /// Parse the string form produced by `Display`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (scheme, path) = s.split_once(SCHEME_SEPARATOR).ok_or_else(|| {
            crate::Error::InvalidDestination(format!("{s:?} has no scheme"))
        })?;
        let (directory, key) = match path.rsplit_once('/') {
            Some((dir, key)) => (dir, key),
            None => ("", path),
        };
        Self::new(scheme, directory, UploadKey::parse(key)?)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn upload_key(&self) -> &UploadKey {
        &self.upload_key
    }

    /// Path inside the scheme's backend, without the scheme prefix.
    pub fn path(&self) -> String {
        if self.directory.is_empty() {
            self.upload_key.to_string()
        } else {
            format!("{}/{}", self.directory, self.upload_key)
        }
    }

    /// URI of `filename` placed inside this destination.
    pub fn object_uri(&self, filename: &str) -> crate::Result<ObjectUri> {
        if filename.is_empty()
            || filename == "."
            || filename == ".."
            || filename.contains(['/', '\\'])
            || filename.chars().any(char::is_control)
        {
            return Err(crate::Error::InvalidFilename(filename.to_string()));
        }
        Ok(ObjectUri {
            scheme: self.scheme.clone(),
            path: format!("{}/{}", self.path(), filename),
        })
    }
}

impl fmt::Display for DestinationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SCHEME_SEPARATOR, self.path())
    }
}

impl TryFrom<String> for DestinationPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<DestinationPath> for String {
    fn from(dest: DestinationPath) -> Self {
        dest.to_string()
    }
}

/// Final location of a stored object: `scheme://directory/upload_key/filename`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectUri {
    pub scheme: String,
    /// Path inside the scheme's backend.
    pub path: String,
}

impl ObjectUri {
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (scheme, path) = s.split_once(SCHEME_SEPARATOR).ok_or_else(|| {
            crate::Error::InvalidDestination(format!("{s:?} has no scheme"))
        })?;
        validate_scheme(scheme)?;
        if path.is_empty() {
            return Err(crate::Error::InvalidDestination(format!("{s:?} has no path")));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SCHEME_SEPARATOR, self.path)
    }
}

fn validate_scheme(scheme: &str) -> crate::Result<()> {
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(crate::Error::InvalidDestination(format!(
            "invalid scheme {scheme:?}"
        )));
    }
    Ok(())
}

/// Reduce a client-declared filename to its last path component.
///
/// Falls back to the upload key when nothing usable remains.
pub fn sanitize_filename(declared: Option<&str>, upload_key: &UploadKey) -> String {
    declared
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| {
            !name.is_empty() && *name != "." && *name != ".." && !name.chars().any(char::is_control)
        })
        .map(str::to_string)
        .unwrap_or_else(|| upload_key.to_string())
}
