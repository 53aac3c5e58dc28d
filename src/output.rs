//! Build outcome types: per-document reports and run statistics.

use crate::error::{BuildError, DocumentError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One file written by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: PathBuf,
    pub bytes: usize,
}

/// What happened to one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub name: String,
    /// Artifacts written before the document stopped (all of them on success).
    pub artifacts: Vec<ArtifactRecord>,
    /// `None` when every declared target was produced.
    pub error: Option<DocumentError>,
    /// Time from the start of the document phase until this document's
    /// outcome was final. Engine batches are shared, so this is cumulative.
    pub duration_ms: u64,
}

impl DocumentReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate numbers for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub total_documents: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub artifacts_written: usize,
    /// Output directories that received the bundled css/js.
    pub resource_dirs: usize,
    pub duration_ms: u64,
}

/// Result of a completed build run.
///
/// A run that reaches this value is `Completed`: every document was
/// attempted. Individual documents may still have failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    pub documents: Vec<DocumentReport>,
    pub stats: BuildStats,
}

impl BuildReport {
    pub fn document(&self, name: &str) -> Option<&DocumentReport> {
        self.documents.iter().find(|d| d.name == name)
    }

    pub fn errors(&self) -> impl Iterator<Item = &DocumentError> {
        self.documents.iter().filter_map(|d| d.error.as_ref())
    }

    /// Treat any failed document as an error.
    pub fn into_result(self) -> Result<Self, BuildError> {
        if self.stats.failed > 0 {
            Err(BuildError::PartialFailure {
                failed: self.stats.failed,
                total: self.stats.total_documents,
            })
        } else {
            Ok(self)
        }
    }
}
