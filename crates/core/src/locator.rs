//! Locator parsing
//!
//! A locator addresses either one object or a directory-like prefix on some
//! backend:
//! - `s3://bucket/dir/file.csv` - one S3 object
//! - `s3://bucket/dir/` - every S3 object under `dir/`
//! - `file:///tmp/out/` or `/tmp/out/` - a local directory
//! - `./data.csv` - a local file
//!
//! A trailing separator makes a locator a prefix. The one exception is a
//! bare bucket (`s3://bucket`), which has no key to name and so always means
//! the whole bucket.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage backend selected by a locator's scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Local,
    S3,
}

impl Scheme {
    /// All known backends, in registry order
    pub const ALL: [Scheme; 2] = [Scheme::Local, Scheme::S3];

    /// Whether the first path segment names a bucket
    pub fn requires_bucket(self) -> bool {
        matches!(self, Scheme::S3)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Local => "local",
            Scheme::S3 => "s3",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const S3_PREFIX: &str = "s3://";
const FILE_PREFIX: &str = "file://";

/// Parsed source or destination address
///
/// Fields are private so a `Locator` cannot change after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Locator {
    scheme: Scheme,
    bucket: String,
    path: String,
    is_prefix: bool,
}

impl Locator {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Bucket name, empty for local locators
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key or key prefix within the bucket (a filesystem path for local)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True when the locator denotes a directory-like scope
    pub fn is_prefix(&self) -> bool {
        self.is_prefix
    }

    /// Last path segment, ignoring any trailing separator
    pub fn file_name(&self) -> &str {
        let trimmed = self.path.trim_end_matches(is_separator_for(self.scheme));
        trimmed
            .rsplit(is_separator_for(self.scheme))
            .next()
            .unwrap_or(trimmed)
    }

    /// Key of `key` relative to this prefix, if it lies under it
    ///
    /// The remainder is kept verbatim: `dir//x` under `dir/` is `/x`.
    pub fn relative_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.path.as_str())
            .filter(|rest| !rest.is_empty())
    }

    /// Path as the backend stores it
    ///
    /// Local paths collapse repeated separators and `.` segments, so
    /// `/out//x` and `/out/x` name the same file. Object keys are verbatim.
    pub fn storage_path(&self) -> String {
        match self.scheme {
            Scheme::Local => std::path::Path::new(&self.path)
                .components()
                .collect::<std::path::PathBuf>()
                .to_string_lossy()
                .into_owned(),
            Scheme::S3 => self.path.clone(),
        }
    }

    /// Single-object locator for `key` in the same bucket
    pub fn object(&self, key: &str) -> Locator {
        Locator {
            scheme: self.scheme,
            bucket: self.bucket.clone(),
            path: key.to_string(),
            is_prefix: false,
        }
    }

    /// Locator for a single object `relative` below this prefix
    pub fn join(&self, relative: &str) -> Result<Locator> {
        if !self.is_prefix {
            return Err(Error::InvalidLocator(format!(
                "cannot join '{relative}' onto non-prefix locator {self}"
            )));
        }
        if relative.is_empty() {
            return Err(Error::InvalidLocator(format!(
                "empty relative key for {self}"
            )));
        }
        Ok(Locator {
            scheme: self.scheme,
            bucket: self.bucket.clone(),
            path: format!("{}{relative}", self.path),
            is_prefix: relative.ends_with('/'),
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::S3 => write!(f, "{S3_PREFIX}{}/{}", self.bucket, self.path),
            Scheme::Local => f.write_str(&self.path),
        }
    }
}

impl FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_locator(s)
    }
}

fn is_separator_for(scheme: Scheme) -> impl Fn(char) -> bool {
    move |c| c == '/' || (scheme == Scheme::Local && c == std::path::MAIN_SEPARATOR)
}

/// Parse a raw locator string
///
/// Pure and deterministic: no filesystem or network access.
pub fn parse_locator(raw: &str) -> Result<Locator> {
    if raw.is_empty() {
        return Err(Error::InvalidLocator("locator cannot be empty".into()));
    }

    if let Some(rest) = raw.strip_prefix(S3_PREFIX) {
        return parse_bucket_style(Scheme::S3, raw, rest);
    }

    if let Some(rest) = raw.strip_prefix(FILE_PREFIX) {
        return parse_file_url(raw, rest);
    }

    if let Some((scheme, _)) = raw.split_once("://") {
        return Err(Error::InvalidLocator(format!(
            "unrecognized scheme '{scheme}' in {raw}"
        )));
    }

    Ok(Locator {
        scheme: Scheme::Local,
        bucket: String::new(),
        path: raw.to_string(),
        is_prefix: raw.ends_with(is_separator_for(Scheme::Local)),
    })
}

fn parse_bucket_style(scheme: Scheme, raw: &str, rest: &str) -> Result<Locator> {
    let (bucket, path) = rest.split_once('/').unwrap_or((rest, ""));

    if bucket.is_empty() && scheme.requires_bucket() {
        return Err(Error::InvalidLocator(format!(
            "{raw}: bucket name cannot be empty"
        )));
    }

    // `s3://bucket` and `s3://bucket/` both mean the whole bucket
    let is_prefix = raw.ends_with('/') || path.is_empty();

    Ok(Locator {
        scheme,
        bucket: bucket.to_string(),
        path: path.to_string(),
        is_prefix,
    })
}

fn parse_file_url(raw: &str, rest: &str) -> Result<Locator> {
    // Only `file:///abs/path` (empty host) is accepted
    if !rest.starts_with('/') {
        return Err(Error::InvalidLocator(format!(
            "{raw}: file locators must use an absolute path (file:///...)"
        )));
    }

    let url = url::Url::parse(raw)
        .map_err(|e| Error::InvalidLocator(format!("{raw}: {e}")))?;
    let path = url
        .to_file_path()
        .map_err(|_| Error::InvalidLocator(format!("{raw}: not a valid file path")))?;

    let mut path = path.to_string_lossy().into_owned();
    let is_prefix = raw.ends_with('/');
    if is_prefix && !path.ends_with(is_separator_for(Scheme::Local)) {
        path.push(std::path::MAIN_SEPARATOR);
    }

    Ok(Locator {
        scheme: Scheme::Local,
        bucket: String::new(),
        path,
        is_prefix,
    })
}
