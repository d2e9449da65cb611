//! Versioned document store with snapshot semantics.
//!
//! The store holds the authoritative in-memory text of every document the
//! client has opened (or the host has primed from disk), applies incremental
//! edits in arrival order, and hands out immutable snapshots that stay valid
//! while concurrent edits continue. Subscribers receive change and close
//! events in the same order edits were applied.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tower_lsp_server::ls_types::{Position, TextDocumentContentChangeEvent, Uri};

use crate::error::{CoreError, Result};

/// Immutable point-in-time view of a document.
///
/// A snapshot taken at dispatch time is the only text a feature computation
/// may read: the store keeps mutating the live entry underneath while the
/// computation is suspended, and `Arc<str>` makes the captured text cheap to
/// hold across awaits.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub uri: Uri,
    pub language_id: String,
    pub version: i32,
    pub text: Arc<str>,
}

/// Store notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// Document text changed (open counts as the first change).
    Changed { uri: Uri, version: i32 },
    /// Document left the editor; stale state keyed by the URI should be dropped.
    Closed { uri: Uri },
}

#[derive(Debug, Clone)]
struct DocumentEntry {
    text: Arc<str>,
    version: i32,
    language_id: String,
    opened_in_client: bool,
    from_disk: bool,
}

/// In-memory store for all tracked documents.
///
/// Thread-safe via `DashMap`; one live entry per URI. Documents opened by the
/// client are editable and removed on close. Documents merely read from disk
/// are retained as a read-only cache and never accept edits.
///
/// # Examples
///
/// ```
/// use prism_core::document::DocumentStore;
/// use tower_lsp_server::ls_types::Uri;
///
/// let store = DocumentStore::new();
/// let uri = Uri::from_file_path("/app/index.html").unwrap();
///
/// store.open(uri.clone(), "html", "<p>hi</p>".into(), 1);
/// let snapshot = store.snapshot(&uri).unwrap();
/// assert_eq!(snapshot.version, 1);
/// assert_eq!(&*snapshot.text, "<p>hi</p>");
/// ```
pub struct DocumentStore {
    documents: DashMap<Uri, DocumentEntry>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<DocumentEvent>>>,
}

impl DocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to document events.
    ///
    /// Per-document delivery order matches edit application order. Dropped
    /// receivers are pruned lazily on the next emit.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DocumentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    fn emit(&self, event: &DocumentEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Registers a document the client opened.
    ///
    /// Reopening an already-tracked URI treats the editor as the source of
    /// truth: text, version, and language tag are reset rather than rejected.
    pub fn open(&self, uri: Uri, language_id: impl Into<String>, text: String, version: i32) {
        let language_id = language_id.into();
        {
            let mut entry = self
                .documents
                .entry(uri.clone())
                .or_insert_with(|| DocumentEntry {
                    text: Arc::from(""),
                    version: 0,
                    language_id: language_id.clone(),
                    opened_in_client: false,
                    from_disk: false,
                });
            if entry.opened_in_client {
                tracing::debug!("document reopened, resetting state: {:?}", uri);
            }
            entry.text = Arc::from(text);
            entry.version = version;
            entry.language_id = language_id;
            entry.opened_in_client = true;
            // Emit while the entry guard is held so event order per document
            // matches mutation order.
            self.emit(&DocumentEvent::Changed {
                uri: uri.clone(),
                version,
            });
        }
    }

    /// Registers a document read from disk without the client opening it.
    ///
    /// The entry is read-only (version 0) and serves snapshot requests only.
    /// If the client already opened the URI the editor state wins and the
    /// disk text is ignored; the disk origin is still remembered so a later
    /// close retains the entry instead of dropping it.
    pub fn prime_from_disk(&self, uri: Uri, language_id: impl Into<String>, text: String) {
        let language_id = language_id.into();
        let mut entry = self.documents.entry(uri).or_insert_with(|| DocumentEntry {
            text: Arc::from(""),
            version: 0,
            language_id: language_id.clone(),
            opened_in_client: false,
            from_disk: false,
        });
        entry.from_disk = true;
        if !entry.opened_in_client {
            entry.text = Arc::from(text);
            entry.language_id = language_id;
        }
    }

    /// Applies an ordered sequence of edits to an open document.
    ///
    /// Range-based changes splice the stored text at UTF-16 positions; a
    /// change without a range replaces the whole text. Fails with
    /// `UnknownDocument` if the URI is not open in the client and with
    /// `StaleVersion` if `new_version` does not advance the stored version.
    /// In both failure cases the stored text is left untouched.
    pub fn apply_edits(
        &self,
        uri: &Uri,
        changes: &[TextDocumentContentChangeEvent],
        new_version: i32,
    ) -> Result<()> {
        let mut entry = self
            .documents
            .get_mut(uri)
            .ok_or_else(|| CoreError::UnknownDocument { uri: uri.clone() })?;
        if !entry.opened_in_client {
            return Err(CoreError::UnknownDocument { uri: uri.clone() });
        }
        if new_version <= entry.version {
            return Err(CoreError::StaleVersion {
                uri: uri.clone(),
                current: entry.version,
                proposed: new_version,
            });
        }

        let mut text = entry.text.to_string();
        for change in changes {
            match change.range {
                Some(range) => {
                    let start = offset_at(&text, range.start);
                    let end = offset_at(&text, range.end);
                    text.replace_range(start..end.max(start), &change.text);
                }
                None => text = change.text.clone(),
            }
        }

        entry.text = Arc::from(text);
        entry.version = new_version;
        self.emit(&DocumentEvent::Changed {
            uri: uri.clone(),
            version: new_version,
        });
        Ok(())
    }

    /// Transitions a document out of the editor.
    ///
    /// Client-only documents are removed entirely; documents also known from
    /// disk drop back to the read-only cache. Emits `Closed` either way so
    /// subscribers can clear per-URI state.
    pub fn close(&self, uri: &Uri) -> Result<()> {
        let retain = {
            let mut entry = self
                .documents
                .get_mut(uri)
                .ok_or_else(|| CoreError::UnknownDocument { uri: uri.clone() })?;
            if !entry.opened_in_client {
                return Err(CoreError::UnknownDocument { uri: uri.clone() });
            }
            if entry.from_disk {
                entry.opened_in_client = false;
                true
            } else {
                false
            }
        };
        if !retain {
            self.documents.remove(uri);
        }
        self.emit(&DocumentEvent::Closed { uri: uri.clone() });
        Ok(())
    }

    /// Returns an immutable snapshot of a tracked document.
    pub fn snapshot(&self, uri: &Uri) -> Result<DocumentSnapshot> {
        let entry = self
            .documents
            .get(uri)
            .ok_or_else(|| CoreError::UnknownDocument { uri: uri.clone() })?;
        Ok(DocumentSnapshot {
            uri: uri.clone(),
            language_id: entry.language_id.clone(),
            version: entry.version,
            text: Arc::clone(&entry.text),
        })
    }

    /// Current stored version, if the document is tracked.
    pub fn version_of(&self, uri: &Uri) -> Option<i32> {
        self.documents.get(uri).map(|entry| entry.version)
    }

    /// Whether the URI is currently open in the client.
    pub fn is_open(&self, uri: &Uri) -> bool {
        self.documents
            .get(uri)
            .is_some_and(|entry| entry.opened_in_client)
    }

    /// URIs of all documents currently open in the client.
    pub fn client_open_uris(&self) -> Vec<Uri> {
        self.documents
            .iter()
            .filter(|entry| entry.opened_in_client)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of tracked documents (open and disk-cached).
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true when no documents are tracked.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts an LSP position (UTF-16 line/character) to a byte offset.
///
/// Positions past the end of a line clamp to the line end; lines past the end
/// of the text clamp to the text end.
pub fn offset_at(text: &str, position: Position) -> usize {
    let bytes = text.as_bytes();
    let mut byte = 0usize;
    let mut remaining = position.line;
    while remaining > 0 {
        match bytes[byte..].iter().position(|&b| b == b'\n') {
            Some(i) => {
                byte += i + 1;
                remaining -= 1;
            }
            None => return text.len(),
        }
    }

    let mut units = 0u32;
    for (i, ch) in text[byte..].char_indices() {
        if units >= position.character || ch == '\n' || ch == '\r' {
            return byte + i;
        }
        units += ch.len_utf16() as u32;
    }
    text.len()
}
