//! Debounced and throttled diagnostics republication.
//!
//! Every document moves through `Idle -> Scheduled -> Computing` per cycle.
//! Triggers arriving while a cycle is armed coalesce into it; triggers
//! arriving while a cycle is computing cancel the in-flight pass and arm
//! exactly one follow-up. A burst's recompute runs one interval after the
//! burst's first trigger, so a lone edit gets a quiet period and a continuous
//! stream of edits still produces one recompute per interval.
//!
//! Each computation is tagged with the snapshot version it ran against.
//! Results are discarded when the document has moved on or when a newer
//! version was already published, so publication per document is monotonic
//! in document version.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_lsp_server::ls_types::{Diagnostic, Uri};

use crate::dispatch::Dispatcher;
use crate::document::{DocumentEvent, DocumentStore};
use crate::error::CoreError;

/// Default quiet/throttle interval between recomputes for one document.
pub const DEFAULT_VALIDATION_INTERVAL: Duration = Duration::from_millis(1000);

/// Receiver for published diagnostic sets.
///
/// The transport adapter implements this with the client's
/// `publishDiagnostics` notification.
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn publish(&self, uri: Uri, version: Option<i32>, diagnostics: Vec<Diagnostic>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CycleState {
    #[default]
    Idle,
    Scheduled,
    Computing,
}

#[derive(Default)]
struct DocSchedule {
    state: CycleState,
    /// A trigger arrived while computing; arm one follow-up afterwards.
    pending: bool,
    cancel: Option<CancellationToken>,
    timer: Option<JoinHandle<()>>,
    published_version: Option<i32>,
}

/// Coalesces diagnostics triggers and publishes merged results.
pub struct DiagnosticsScheduler {
    dispatcher: Arc<Dispatcher>,
    store: Arc<DocumentStore>,
    sink: Arc<dyn DiagnosticsSink>,
    interval: Duration,
    docs: DashMap<Uri, DocSchedule>,
}

impl DiagnosticsScheduler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        store: Arc<DocumentStore>,
        sink: Arc<dyn DiagnosticsSink>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            store,
            sink,
            interval,
            docs: DashMap::new(),
        })
    }

    /// Drives the scheduler from document-store events: changes trigger a
    /// recompute, closes clear published diagnostics.
    pub fn attach(self: &Arc<Self>, mut events: UnboundedReceiver<DocumentEvent>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    DocumentEvent::Changed { uri, .. } => scheduler.update(&uri),
                    DocumentEvent::Closed { uri } => scheduler.remove(&uri).await,
                }
            }
        })
    }

    /// Requests a recompute for one document.
    pub fn update(self: &Arc<Self>, uri: &Uri) {
        let mut entry = self.docs.entry(uri.clone()).or_default();
        match entry.state {
            CycleState::Idle => {
                entry.state = CycleState::Scheduled;
                entry.timer = Some(self.arm_cycle(uri.clone()));
            }
            // Already armed: the cycle snapshots the latest text when it
            // fires, so repeated triggers collapse into it.
            CycleState::Scheduled => {}
            CycleState::Computing => {
                entry.pending = true;
                if let Some(cancel) = &entry.cancel {
                    cancel.cancel();
                }
            }
        }
    }

    /// Requests a recompute for every document currently open in the client.
    pub fn update_all(self: &Arc<Self>) {
        for uri in self.store.client_open_uris() {
            self.update(&uri);
        }
    }

    /// Publishes an empty set for the URI so stale markers clear, cancels
    /// any in-flight computation, and stops tracking the document.
    pub async fn remove(self: &Arc<Self>, uri: &Uri) {
        if let Some((_, entry)) = self.docs.remove(uri) {
            if let Some(cancel) = entry.cancel {
                cancel.cancel();
            }
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
        self.sink.publish(uri.clone(), None, Vec::new()).await;
    }

    /// Number of documents the scheduler currently tracks.
    pub fn tracked_count(&self) -> usize {
        self.docs.len()
    }

    fn arm_cycle(self: &Arc<Self>, uri: Uri) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.interval).await;
            scheduler.run_cycle(uri).await;
        })
    }

    async fn run_cycle(self: Arc<Self>, uri: Uri) {
        let cancel = CancellationToken::new();
        {
            // Entry gone means the document was closed while armed.
            let Some(mut entry) = self.docs.get_mut(&uri) else {
                return;
            };
            entry.state = CycleState::Computing;
            entry.cancel = Some(cancel.clone());
            entry.timer = None;
        }

        let computed = match self.store.snapshot(&uri) {
            Ok(snapshot) => {
                let version = snapshot.version;
                match self.dispatcher.diagnostics(&snapshot, &cancel).await {
                    Ok(items) => Some((version, items)),
                    Err(CoreError::Cancelled) => None,
                    Err(error) => {
                        tracing::warn!("diagnostics pass failed for {:?}: {}", uri, error);
                        None
                    }
                }
            }
            // Document vanished mid-cycle: publish nothing this round.
            Err(_) => None,
        };

        let publish = {
            let Some(mut entry) = self.docs.get_mut(&uri) else {
                return;
            };
            match computed {
                // Same-version republish is allowed (configuration changes
                // produce new results for unchanged text); older results are
                // always discarded.
                Some((version, items))
                    if !cancel.is_cancelled()
                        && self.store.version_of(&uri) == Some(version)
                        && entry.published_version.is_none_or(|p| p <= version) =>
                {
                    entry.published_version = Some(version);
                    Some((version, items))
                }
                _ => None,
            }
        };

        if let Some((version, items)) = publish {
            self.sink.publish(uri.clone(), Some(version), items).await;
        }

        let Some(mut entry) = self.docs.get_mut(&uri) else {
            return;
        };
        entry.cancel = None;
        if entry.pending {
            entry.pending = false;
            entry.state = CycleState::Scheduled;
            entry.timer = Some(self.arm_cycle(uri.clone()));
        } else {
            entry.state = CycleState::Idle;
        }
    }
}
