//! Backend capability registry
//!
//! What each backend can do is data, not code: one row per backend in
//! [`CAPABILITY_TABLE`]. The planner enforces this table, and the feature
//! matrix printed by `xfer features` is rendered from the same rows.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::locator::Scheme;

/// An operation a backend may or may not support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    ListObjects,
    ReadObject,
    WriteSingleObject,
    WritePrefix,
    DeleteObject,
    /// Reads may start at a byte offset
    RangedRead,
    /// Writes may continue at a byte offset after an interrupted attempt
    ResumableWrite,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::ListObjects,
        OperationKind::ReadObject,
        OperationKind::WriteSingleObject,
        OperationKind::WritePrefix,
        OperationKind::DeleteObject,
        OperationKind::RangedRead,
        OperationKind::ResumableWrite,
    ];

    /// Human-readable feature name used in messages and the feature matrix
    pub fn description(self) -> &'static str {
        match self {
            OperationKind::ListObjects => "list objects",
            OperationKind::ReadObject => "read object",
            OperationKind::WriteSingleObject => "single-object destination",
            OperationKind::WritePrefix => "prefix destination",
            OperationKind::DeleteObject => "delete object",
            OperationKind::RangedRead => "ranged read",
            OperationKind::ResumableWrite => "resumable write",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// What to do when a destination object already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Replace the destination object
    #[default]
    Overwrite,
    /// Leave an identical destination object alone
    Skip,
    /// Fail the task
    Error,
}

impl IfExists {
    pub const ALL: [IfExists; 3] = [IfExists::Overwrite, IfExists::Skip, IfExists::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            IfExists::Overwrite => "overwrite",
            IfExists::Skip => "skip",
            IfExists::Error => "error",
        }
    }
}

impl fmt::Display for IfExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IfExists {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overwrite" => Ok(IfExists::Overwrite),
            "skip" => Ok(IfExists::Skip),
            "error" => Ok(IfExists::Error),
            _ => Err(format!("Invalid if-exists mode: {s}")),
        }
    }
}

/// Static description of one backend's row
struct CapabilityRow {
    backend: Scheme,
    supports: &'static [OperationKind],
    if_exists: &'static [IfExists],
}

/// The registry's source data
///
/// Writing a single named object to S3 is not implemented yet, so the S3
/// row omits `WriteSingleObject`. S3 uploads are atomic, so there is no
/// resumable write either.
const CAPABILITY_TABLE: &[CapabilityRow] = &[
    CapabilityRow {
        backend: Scheme::Local,
        supports: &[
            OperationKind::ListObjects,
            OperationKind::ReadObject,
            OperationKind::WriteSingleObject,
            OperationKind::WritePrefix,
            OperationKind::DeleteObject,
            OperationKind::RangedRead,
            OperationKind::ResumableWrite,
        ],
        if_exists: &[IfExists::Overwrite, IfExists::Skip, IfExists::Error],
    },
    CapabilityRow {
        backend: Scheme::S3,
        supports: &[
            OperationKind::ListObjects,
            OperationKind::ReadObject,
            OperationKind::WritePrefix,
            OperationKind::DeleteObject,
            OperationKind::RangedRead,
        ],
        if_exists: &[IfExists::Overwrite],
    },
];

/// Supported operations of one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub backend: Scheme,
    pub supports: BTreeSet<OperationKind>,
    pub if_exists: BTreeSet<IfExists>,
}

static BUILTIN: LazyLock<CapabilityRegistry> =
    LazyLock::new(|| CapabilityRegistry::from_rows(CAPABILITY_TABLE));

/// Immutable lookup table of backend capabilities
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    rows: Vec<Capability>,
}

impl CapabilityRegistry {
    /// The process-wide registry built from [`CAPABILITY_TABLE`]
    pub fn builtin() -> &'static CapabilityRegistry {
        &BUILTIN
    }

    /// Build a registry from explicit capability rows
    ///
    /// A backend without a row supports nothing.
    pub fn new(rows: Vec<Capability>) -> Self {
        Self { rows }
    }

    fn from_rows(table: &[CapabilityRow]) -> Self {
        let rows = table
            .iter()
            .map(|row| Capability {
                backend: row.backend,
                supports: row.supports.iter().copied().collect(),
                if_exists: row.if_exists.iter().copied().collect(),
            })
            .collect();
        Self { rows }
    }

    pub fn get(&self, backend: Scheme) -> Option<&Capability> {
        self.rows.iter().find(|row| row.backend == backend)
    }

    pub fn supports(&self, backend: Scheme, operation: OperationKind) -> bool {
        self.get(backend)
            .is_some_and(|row| row.supports.contains(&operation))
    }

    pub fn require_support(&self, backend: Scheme, operation: OperationKind) -> Result<()> {
        if self.supports(backend, operation) {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation { backend, operation })
        }
    }

    pub fn supports_if_exists(&self, backend: Scheme, mode: IfExists) -> bool {
        self.get(backend)
            .is_some_and(|row| row.if_exists.contains(&mode))
    }

    pub fn require_if_exists(&self, backend: Scheme, mode: IfExists) -> Result<()> {
        if self.supports_if_exists(backend, mode) {
            Ok(())
        } else {
            Err(Error::UnsupportedIfExists { backend, mode })
        }
    }

    /// One row per backend, in table order
    pub fn feature_matrix(&self) -> Vec<FeatureRow> {
        self.rows
            .iter()
            .map(|row| FeatureRow {
                backend: row.backend,
                features: OperationKind::ALL
                    .iter()
                    .map(|op| (op.description().to_string(), row.supports.contains(op)))
                    .collect(),
                if_exists: row.if_exists.iter().map(|m| m.to_string()).collect(),
            })
            .collect()
    }

    /// Markdown rendering of the feature matrix, for documentation
    pub fn render_markdown(&self) -> String {
        let mut out = String::from("| feature |");
        for row in &self.rows {
            out.push_str(&format!(" {} |", row.backend));
        }
        out.push_str("\n|---|");
        for _ in &self.rows {
            out.push_str("---|");
        }
        for op in OperationKind::ALL {
            out.push_str(&format!("\n| {} |", op.description()));
            for row in &self.rows {
                let mark = if row.supports.contains(&op) { "yes" } else { "no" };
                out.push_str(&format!(" {mark} |"));
            }
        }
        out.push_str("\n| --if-exists |");
        for row in &self.rows {
            let modes: Vec<&str> = row.if_exists.iter().map(|m| m.as_str()).collect();
            out.push_str(&format!(" {} |", modes.join(", ")));
        }
        out
    }
}

/// Feature matrix row, serializable for `--json` output
#[derive(Debug, Clone, Serialize)]
pub struct FeatureRow {
    pub backend: Scheme,
    pub features: Vec<(String, bool)>,
    pub if_exists: Vec<String>,
}
