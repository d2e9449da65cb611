//! Multi-provider dispatch and result aggregation.
//!
//! For each inbound feature request the dispatcher selects the registered
//! providers that implement the feature and serve the content type of the
//! region under the request, invokes them, and reduces their answers with a
//! feature-specific policy:
//!
//! - first contribution wins, in registration order: hover, definition,
//!   signature help, linked editing ranges;
//! - invoke all and concatenate with per-provider failure isolation, dropping
//!   exact duplicates: diagnostics, code actions, document symbols, folding
//!   ranges, document colors (inlay hints and semantic tokens concatenate the
//!   same way over the requested region);
//! - invoke all and merge with post-filtering: completion (speculative
//!   candidates shadowed by complete ones), rename and file-rename
//!   (conflicting edits resolved in favour of the earlier provider).

use futures::future;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;
use tower_lsp_server::ls_types::{
    CodeActionContext, CodeActionOrCommand, ColorInformation, CompletionItem, CompletionList,
    CompletionTextEdit, Diagnostic, DocumentSymbol, FileRename, FoldingRange,
    GotoDefinitionResponse, Hover, InlayHint, Location, Position, Range, SemanticToken,
    SemanticTokens, SignatureHelp, TextEdit, Uri, WorkspaceEdit,
};

use crate::document::{DocumentSnapshot, offset_at};
use crate::error::{CoreError, Result};
use crate::provider::{Feature, LanguageProvider};
use crate::region::RegionResolver;
use crate::registry::ProviderRegistry;

/// Options captured once at initialization and read by the merge policies.
///
/// They never change mid-session; a full re-initialization builds a new
/// dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Drop speculative completion candidates shadowed by a complete
    /// candidate with the same insertion text.
    pub filter_incomplete_completions: bool,
    /// Client understands `LocationLink` definition results.
    pub definition_link_support: bool,
}

/// A provider error observed during an aggregated request.
///
/// Recorded for observability; the failed provider simply contributes
/// nothing to the merged result.
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub provider: &'static str,
    pub feature: Feature,
    pub message: String,
}

const FAILURE_LOG_CAPACITY: usize = 64;

const ORIGIN_PROVIDER_KEY: &str = "provider";
const ORIGIN_PAYLOAD_KEY: &str = "payload";

/// The dispatch engine.
///
/// Stateless beyond the registry, region resolver, and captured options:
/// document state lives in the store and provider state inside each provider.
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
    regions: Arc<dyn RegionResolver>,
    options: OnceLock<DispatchOptions>,
    failures: Mutex<VecDeque<FailureEvent>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ProviderRegistry>, regions: Arc<dyn RegionResolver>) -> Self {
        Self {
            registry,
            regions,
            options: OnceLock::new(),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Captures initialization options. The first call wins; later calls
    /// return false and change nothing.
    pub fn configure(&self, options: DispatchOptions) -> bool {
        self.options.set(options).is_ok()
    }

    fn options(&self) -> DispatchOptions {
        self.options.get().copied().unwrap_or_default()
    }

    /// Drains the recorded provider failures, oldest first.
    pub fn drain_failures(&self) -> Vec<FailureEvent> {
        self.failures.lock().unwrap().drain(..).collect()
    }

    fn note_failure(&self, provider: &'static str, feature: Feature, error: &CoreError) {
        tracing::warn!(
            provider,
            ?feature,
            error = %error,
            "provider failed, dropping its contribution"
        );
        let mut log = self.failures.lock().unwrap();
        if log.len() == FAILURE_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(FailureEvent {
            provider,
            feature,
            message: error.to_string(),
        });
    }

    /// Providers for a position-scoped request: only the provider responsible
    /// for the region under the position is considered.
    fn providers_at(
        &self,
        feature: Feature,
        doc: &DocumentSnapshot,
        position: Position,
    ) -> Vec<Arc<dyn LanguageProvider>> {
        let offset = offset_at(&doc.text, position);
        match self.regions.content_type_at(doc, offset) {
            Some(content_type) => self.registry.providers_for(feature, &content_type),
            None => Vec::new(),
        }
    }

    /// Providers for a document-scoped request: every content type present in
    /// the document is considered.
    fn providers_in(
        &self,
        feature: Feature,
        doc: &DocumentSnapshot,
    ) -> Vec<Arc<dyn LanguageProvider>> {
        let content_types = self.regions.content_types_in(doc);
        self.registry.providers_for_any(feature, &content_types)
    }

    pub async fn hover(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<Hover>> {
        for provider in self.providers_at(Feature::Hover, doc, position) {
            ensure_live(cancel)?;
            match provider.hover(doc, position, cancel).await {
                Ok(Some(hover)) => {
                    ensure_live(cancel)?;
                    return Ok(Some(hover));
                }
                Ok(None) => {}
                Err(error) => self.note_failure(provider.id(), Feature::Hover, &error),
            }
        }
        ensure_live(cancel)?;
        Ok(None)
    }

    pub async fn definition(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<GotoDefinitionResponse>> {
        for provider in self.providers_at(Feature::Definition, doc, position) {
            ensure_live(cancel)?;
            match provider.definition(doc, position, cancel).await {
                Ok(links) if !links.is_empty() => {
                    ensure_live(cancel)?;
                    return Ok(Some(self.definition_response(links)));
                }
                Ok(_) => {}
                Err(error) => self.note_failure(provider.id(), Feature::Definition, &error),
            }
        }
        ensure_live(cancel)?;
        Ok(None)
    }

    fn definition_response(
        &self,
        links: Vec<tower_lsp_server::ls_types::LocationLink>,
    ) -> GotoDefinitionResponse {
        if self.options().definition_link_support {
            GotoDefinitionResponse::Link(links)
        } else {
            GotoDefinitionResponse::Array(
                links
                    .into_iter()
                    .map(|link| Location::new(link.target_uri, link.target_selection_range))
                    .collect(),
            )
        }
    }

    pub async fn signature_help(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<SignatureHelp>> {
        for provider in self.providers_at(Feature::SignatureHelp, doc, position) {
            ensure_live(cancel)?;
            match provider.signature_help(doc, position, cancel).await {
                Ok(Some(help)) => {
                    ensure_live(cancel)?;
                    return Ok(Some(help));
                }
                Ok(None) => {}
                Err(error) => self.note_failure(provider.id(), Feature::SignatureHelp, &error),
            }
        }
        ensure_live(cancel)?;
        Ok(None)
    }

    pub async fn linked_editing_ranges(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Range>>> {
        for provider in self.providers_at(Feature::LinkedEditingRange, doc, position) {
            ensure_live(cancel)?;
            match provider.linked_editing_ranges(doc, position, cancel).await {
                Ok(Some(ranges)) if !ranges.is_empty() => {
                    ensure_live(cancel)?;
                    return Ok(Some(ranges));
                }
                Ok(_) => {}
                Err(error) => {
                    self.note_failure(provider.id(), Feature::LinkedEditingRange, &error);
                }
            }
        }
        ensure_live(cancel)?;
        Ok(None)
    }

    /// Rename tries every applicable provider and merges the proposed edits;
    /// when two providers touch overlapping ranges of the same file, the
    /// earlier-registered provider's edit is kept.
    pub async fn rename(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        new_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<WorkspaceEdit>> {
        let mut edits = Vec::new();
        for provider in self.providers_at(Feature::Rename, doc, position) {
            ensure_live(cancel)?;
            match provider.rename(doc, position, new_name, cancel).await {
                Ok(Some(edit)) => edits.push(edit),
                Ok(None) => {}
                Err(error) => self.note_failure(provider.id(), Feature::Rename, &error),
            }
        }
        ensure_live(cancel)?;
        Ok(merge_workspace_edits(edits))
    }

    /// Cross-file edits for renamed or moved files, combined across every
    /// provider that implements the feature.
    pub async fn rename_files(
        &self,
        renames: &[FileRename],
        cancel: &CancellationToken,
    ) -> Result<Option<WorkspaceEdit>> {
        let mut edits = Vec::new();
        for provider in self.registry.providers_with(Feature::FileRename) {
            ensure_live(cancel)?;
            match provider.rename_files(renames, cancel).await {
                Ok(Some(edit)) => edits.push(edit),
                Ok(None) => {}
                Err(error) => self.note_failure(provider.id(), Feature::FileRename, &error),
            }
        }
        ensure_live(cancel)?;
        Ok(merge_workspace_edits(edits))
    }

    pub async fn diagnostics(
        &self,
        doc: &DocumentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>> {
        let providers = self.providers_in(Feature::Diagnostics, doc);
        ensure_live(cancel)?;

        let results =
            future::join_all(providers.iter().map(|p| p.diagnostics(doc, cancel))).await;
        ensure_live(cancel)?;

        let mut merged = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(items) => merged.extend(items),
                Err(error) => self.note_failure(provider.id(), Feature::Diagnostics, &error),
            }
        }
        dedupe_in_place(&mut merged);
        Ok(merged)
    }

    pub async fn code_actions(
        &self,
        doc: &DocumentSnapshot,
        range: Range,
        context: &CodeActionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<CodeActionOrCommand>> {
        let providers = self.providers_at(Feature::CodeAction, doc, range.start);
        ensure_live(cancel)?;

        let results = future::join_all(
            providers
                .iter()
                .map(|p| p.code_actions(doc, range, context, cancel)),
        )
        .await;
        ensure_live(cancel)?;

        let mut merged = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(items) => merged.extend(items),
                Err(error) => self.note_failure(provider.id(), Feature::CodeAction, &error),
            }
        }
        dedupe_in_place(&mut merged);
        Ok(merged)
    }

    pub async fn document_symbols(
        &self,
        doc: &DocumentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentSymbol>> {
        let providers = self.providers_in(Feature::DocumentSymbols, doc);
        ensure_live(cancel)?;

        let results =
            future::join_all(providers.iter().map(|p| p.document_symbols(doc, cancel))).await;
        ensure_live(cancel)?;

        let mut merged = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(items) => merged.extend(items),
                Err(error) => self.note_failure(provider.id(), Feature::DocumentSymbols, &error),
            }
        }
        dedupe_in_place(&mut merged);
        Ok(merged)
    }

    pub async fn folding_ranges(
        &self,
        doc: &DocumentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<FoldingRange>> {
        let providers = self.providers_in(Feature::FoldingRanges, doc);
        ensure_live(cancel)?;

        let results =
            future::join_all(providers.iter().map(|p| p.folding_ranges(doc, cancel))).await;
        ensure_live(cancel)?;

        let mut merged = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(items) => merged.extend(items),
                Err(error) => self.note_failure(provider.id(), Feature::FoldingRanges, &error),
            }
        }
        dedupe_in_place(&mut merged);
        Ok(merged)
    }

    pub async fn document_colors(
        &self,
        doc: &DocumentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<ColorInformation>> {
        let providers = self.providers_in(Feature::DocumentColors, doc);
        ensure_live(cancel)?;

        let results =
            future::join_all(providers.iter().map(|p| p.document_colors(doc, cancel))).await;
        ensure_live(cancel)?;

        let mut merged = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(items) => merged.extend(items),
                Err(error) => self.note_failure(provider.id(), Feature::DocumentColors, &error),
            }
        }
        dedupe_in_place(&mut merged);
        Ok(merged)
    }

    pub async fn inlay_hints(
        &self,
        doc: &DocumentSnapshot,
        range: Range,
        cancel: &CancellationToken,
    ) -> Result<Vec<InlayHint>> {
        let providers = self.providers_in(Feature::InlayHints, doc);
        ensure_live(cancel)?;

        let results =
            future::join_all(providers.iter().map(|p| p.inlay_hints(doc, range, cancel))).await;
        ensure_live(cancel)?;

        // Hints are region-disjoint per provider, so plain concatenation is
        // enough here.
        let mut merged = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(items) => merged.extend(items),
                Err(error) => self.note_failure(provider.id(), Feature::InlayHints, &error),
            }
        }
        Ok(merged)
    }

    /// Semantic tokens for a region of the document (`None` = full document).
    ///
    /// Each provider's delta-encoded stream is decoded to absolute positions,
    /// the streams are merged and sorted, and the result re-encoded.
    pub async fn semantic_tokens(
        &self,
        doc: &DocumentSnapshot,
        range: Option<Range>,
        cancel: &CancellationToken,
    ) -> Result<Option<SemanticTokens>> {
        let providers = self.providers_in(Feature::SemanticTokens, doc);
        ensure_live(cancel)?;

        let results = future::join_all(
            providers
                .iter()
                .map(|p| p.semantic_tokens(doc, range, cancel)),
        )
        .await;
        ensure_live(cancel)?;

        let mut absolute = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(tokens) => absolute.extend(decode_tokens(&tokens)),
                Err(error) => self.note_failure(provider.id(), Feature::SemanticTokens, &error),
            }
        }
        if absolute.is_empty() {
            return Ok(None);
        }
        Ok(Some(SemanticTokens {
            result_id: None,
            data: encode_tokens(absolute),
        }))
    }

    /// Completion across all providers of the region, with origin metadata
    /// attached to every item so a later resolve request can be routed back
    /// to the provider that produced it.
    pub async fn completions(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<CompletionList> {
        let providers = self.providers_at(Feature::Completion, doc, position);
        ensure_live(cancel)?;

        let results =
            future::join_all(providers.iter().map(|p| p.completions(doc, position, cancel)))
                .await;
        ensure_live(cancel)?;

        let mut outputs = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(mut output) => {
                    for item in &mut output.items {
                        tag_origin(item, provider.id());
                    }
                    outputs.push(output);
                }
                Err(error) => self.note_failure(provider.id(), Feature::Completion, &error),
            }
        }

        let is_incomplete = outputs.iter().any(|output| output.is_incomplete);
        let mut items = Vec::new();

        if self.options().filter_incomplete_completions {
            let complete_insertions: Vec<String> = outputs
                .iter()
                .filter(|output| !output.is_incomplete)
                .flat_map(|output| output.items.iter().map(|i| insertion_text(i).to_string()))
                .collect();
            for output in outputs {
                if output.is_incomplete {
                    items.extend(output.items.into_iter().filter(|item| {
                        !complete_insertions
                            .iter()
                            .any(|text| text == insertion_text(item))
                    }));
                } else {
                    items.extend(output.items);
                }
            }
        } else {
            for output in outputs {
                items.extend(output.items);
            }
        }

        Ok(CompletionList {
            is_incomplete,
            items,
        })
    }

    /// Routes a resolve request to the provider that produced the item.
    ///
    /// Items without origin metadata (or from a provider that has since
    /// disappeared) are returned unchanged.
    pub async fn resolve_completion(
        &self,
        item: CompletionItem,
        cancel: &CancellationToken,
    ) -> Result<CompletionItem> {
        ensure_live(cancel)?;
        let Some((provider_id, payload)) = take_origin(&item) else {
            return Ok(item);
        };
        let Some(provider) = self.registry.by_id(&provider_id) else {
            tracing::debug!("resolve for unknown provider: {}", provider_id);
            return Ok(item);
        };

        let mut bare = item.clone();
        bare.data = payload;
        match provider.resolve_completion(bare, cancel).await {
            Ok(mut resolved) => {
                ensure_live(cancel)?;
                tag_origin(&mut resolved, provider.id());
                Ok(resolved)
            }
            Err(error) => {
                self.note_failure(provider.id(), Feature::CompletionResolve, &error);
                Ok(item)
            }
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(CoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Removes exact duplicates, keeping first occurrences.
fn dedupe_in_place<T: PartialEq>(items: &mut Vec<T>) {
    let mut kept: Vec<T> = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        if !kept.contains(&item) {
            kept.push(item);
        }
    }
    *items = kept;
}

fn tag_origin(item: &mut CompletionItem, provider_id: &str) {
    let payload = item.data.take();
    item.data = Some(json!({
        ORIGIN_PROVIDER_KEY: provider_id,
        ORIGIN_PAYLOAD_KEY: payload,
    }));
}

fn take_origin(item: &CompletionItem) -> Option<(String, Option<Value>)> {
    let data = item.data.as_ref()?;
    let provider = data.get(ORIGIN_PROVIDER_KEY)?.as_str()?.to_string();
    let payload = match data.get(ORIGIN_PAYLOAD_KEY) {
        Some(Value::Null) | None => None,
        Some(value) => Some(value.clone()),
    };
    Some((provider, payload))
}

fn insertion_text(item: &CompletionItem) -> &str {
    if let Some(text) = item.insert_text.as_deref() {
        return text;
    }
    match &item.text_edit {
        Some(CompletionTextEdit::Edit(edit)) => &edit.new_text,
        Some(CompletionTextEdit::InsertAndReplace(edit)) => &edit.new_text,
        None => &item.label,
    }
}

fn position_before(a: Position, b: Position) -> bool {
    a.line < b.line || (a.line == b.line && a.character < b.character)
}

fn ranges_overlap(a: &Range, b: &Range) -> bool {
    position_before(a.start, b.end) && position_before(b.start, a.end)
}

/// Merges workspace edits in provider order; an edit overlapping an
/// already-accepted edit for the same file is dropped.
fn merge_workspace_edits(edits: Vec<WorkspaceEdit>) -> Option<WorkspaceEdit> {
    let mut merged: HashMap<Uri, Vec<TextEdit>> = HashMap::new();
    for edit in edits {
        let Some(changes) = edit.changes else {
            continue;
        };
        for (uri, text_edits) in changes {
            let accepted = merged.entry(uri).or_default();
            for text_edit in text_edits {
                if accepted
                    .iter()
                    .any(|existing| ranges_overlap(&existing.range, &text_edit.range))
                {
                    tracing::debug!("dropping conflicting rename edit from later provider");
                    continue;
                }
                accepted.push(text_edit);
            }
        }
    }
    if merged.is_empty() {
        None
    } else {
        Some(WorkspaceEdit {
            changes: Some(merged),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AbsoluteToken {
    line: u32,
    start: u32,
    length: u32,
    token_type: u32,
    modifiers: u32,
}

fn decode_tokens(data: &[SemanticToken]) -> Vec<AbsoluteToken> {
    let mut out = Vec::with_capacity(data.len());
    let mut line = 0u32;
    let mut start = 0u32;
    for token in data {
        if token.delta_line > 0 {
            line += token.delta_line;
            start = token.delta_start;
        } else {
            start += token.delta_start;
        }
        out.push(AbsoluteToken {
            line,
            start,
            length: token.length,
            token_type: token.token_type,
            modifiers: token.token_modifiers_bitset,
        });
    }
    out
}

fn encode_tokens(mut tokens: Vec<AbsoluteToken>) -> Vec<SemanticToken> {
    tokens.sort_by_key(|t| (t.line, t.start, t.token_type));
    tokens.dedup();

    let mut out = Vec::with_capacity(tokens.len());
    let mut prev_line = 0u32;
    let mut prev_start = 0u32;
    for token in tokens {
        let delta_line = token.line - prev_line;
        let delta_start = if delta_line == 0 {
            token.start - prev_start
        } else {
            token.start
        };
        out.push(SemanticToken {
            delta_line,
            delta_start,
            length: token.length,
            token_type: token.token_type,
            token_modifiers_bitset: token.modifiers,
        });
        prev_line = token.line;
        prev_start = token.start;
    }
    out
}
