//! Progress-callback trait for pipeline stage and page events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the coordinator moves through the four stages. The CLI uses it
//! to drive a terminal progress bar; a server could forward events to a
//! log or a WebSocket instead.
//!
//! # Example
//!
//! ```rust
//! use pdf_outline::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     extracted: Arc<AtomicUsize>,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page: usize, total_pages: usize) {
//!         self.extracted.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} extracted", page, total_pages);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     extracted: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::Stage;
use std::sync::Arc;

/// Called by the coordinator as it processes a document.
///
/// All methods have default no-op implementations. When
/// `extract_concurrency > 1` the page methods may be called concurrently,
/// so implementations must synchronise shared state.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called when a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage ends. `ok` is `false` for a failed stage,
    /// fatal or not.
    fn on_stage_complete(&self, stage: Stage, ok: bool) {
        let _ = (stage, ok);
    }

    /// Called once Stage A has produced its page images.
    fn on_pages_discovered(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page's extraction is invoked.
    fn on_page_start(&self, page: usize, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// Called when a page's fragment was written.
    fn on_page_complete(&self, page: usize, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// Called when a page's extraction failed.
    fn on_page_error(&self, page: usize, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called when an outline was served from the cache without running.
    fn on_cache_hit(&self) {}
}

/// Shared, type-erased progress callback.
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

/// Callback that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        stages: Mutex<Vec<(Stage, Option<bool>)>>,
        pages_ok: AtomicUsize,
        pages_err: AtomicUsize,
    }

    impl PipelineProgressCallback for Recorder {
        fn on_stage_start(&self, stage: Stage) {
            self.stages.lock().unwrap().push((stage, None));
        }
        fn on_stage_complete(&self, stage: Stage, ok: bool) {
            self.stages.lock().unwrap().push((stage, Some(ok)));
        }
        fn on_page_complete(&self, _page: usize, _total: usize) {
            self.pages_ok.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_error(&self, _page: usize, _total: usize, _error: &str) {
            self.pages_err.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Rasterize);
        cb.on_pages_discovered(3);
        cb.on_page_start(1, 3);
        cb.on_page_complete(1, 3);
        cb.on_page_error(2, 3, "boom");
        cb.on_stage_complete(Stage::Assemble, true);
        cb.on_cache_hit();
    }

    #[test]
    fn recorder_receives_events_through_arc_dyn() {
        let recorder = Arc::new(Recorder::default());
        let cb: ProgressCallback = recorder.clone();

        cb.on_stage_start(Stage::Extract);
        cb.on_page_complete(1, 2);
        cb.on_page_error(2, 2, "timeout");
        cb.on_stage_complete(Stage::Extract, true);

        assert_eq!(recorder.pages_ok.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.pages_err.load(Ordering::SeqCst), 1);
        assert_eq!(
            *recorder.stages.lock().unwrap(),
            vec![(Stage::Extract, None), (Stage::Extract, Some(true))]
        );
    }
}
