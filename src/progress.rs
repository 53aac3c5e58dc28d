//! Progress-callback trait for per-document build events.
//!
//! Inject an [`Arc<dyn BuildProgressCallback>`] via
//! [`crate::config::BuildConfigBuilder::progress_callback`] to receive events
//! as the orchestrator walks the document list.
//!
//! # Example
//!
//! ```rust
//! use docbook_build::{BuildConfig, BuildProgressCallback, DocumentSpec, OutputTarget};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BuildProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, name: &str, artifacts: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{name}: {artifacts} artifacts");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = BuildConfig::builder()
//!     .document(DocumentSpec::new("Course").target(OutputTarget::html("out")))
//!     .progress_callback(counter as Arc<dyn BuildProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each document.
///
/// Documents are processed sequentially, so calls never overlap, but the
/// trait is `Send + Sync` so a callback can be shared with other threads
/// (e.g. a terminal progress bar ticking in the background). All methods
/// have default no-op implementations so callers only override what they
/// care about.
pub trait BuildProgressCallback: Send + Sync {
    /// Called once after the clean phase, before the first document.
    fn on_build_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called just before a document's source is resolved.
    ///
    /// # Arguments
    /// * `name`  — document name
    /// * `index` — 1-indexed position in the build order
    /// * `total` — number of documents in the run
    fn on_document_start(&self, name: &str, index: usize, total: usize) {
        let _ = (name, index, total);
    }

    /// Called when every target of a document was written.
    fn on_document_complete(&self, name: &str, artifacts: usize) {
        let _ = (name, artifacts);
    }

    /// Called when a document stopped at some stage.
    fn on_document_error(&self, name: &str, error: &str) {
        let _ = (name, error);
    }

    /// Called once after every document has been attempted.
    fn on_build_complete(&self, total_documents: usize, succeeded: usize) {
        let _ = (total_documents, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BuildProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BuildConfig`].
pub type ProgressCallback = Arc<dyn BuildProgressCallback>;
