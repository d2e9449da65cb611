//! Core of the prism editor-integration server: a versioned document store,
//! a registry of language-feature providers, the dispatch engine that merges
//! their answers per feature, and the debounced diagnostics pipeline on top.

pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod provider;
pub mod region;
pub mod registry;
pub mod schedule;

// Re-export commonly used types
pub use dispatch::{DispatchOptions, Dispatcher, FailureEvent};
pub use document::{DocumentEvent, DocumentSnapshot, DocumentStore};
pub use error::{CoreError, Result};
pub use provider::{CompletionOutput, Feature, LanguageProvider};
pub use region::{EmbeddedRegion, FixedRegions, MonolithicRegions, RegionResolver};
pub use registry::ProviderRegistry;
pub use schedule::{DEFAULT_VALIDATION_INTERVAL, DiagnosticsScheduler, DiagnosticsSink};

/// Cancellation token threaded through every provider call.
pub use tokio_util::sync::CancellationToken;
