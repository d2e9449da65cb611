use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tower_lsp_server::ls_types::{
    CodeActionContext, CodeActionOrCommand, ColorInformation, CompletionItem, Diagnostic,
    DocumentSymbol, FileRename, FoldingRange, Hover, InlayHint, LocationLink, Position, Range,
    SemanticToken, SemanticTokenModifier, SemanticTokenType, SemanticTokensLegend, SignatureHelp,
    WorkspaceEdit,
};

use crate::document::DocumentSnapshot;
use crate::error::Result;

/// Feature kinds a provider can implement.
///
/// The dispatcher checks a provider's declared capability set before invoking
/// the corresponding query method; a method whose feature is absent from
/// [`LanguageProvider::capabilities`] is never called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Feature {
    Hover,
    Completion,
    CompletionResolve,
    Diagnostics,
    CodeAction,
    DocumentSymbols,
    FoldingRanges,
    DocumentColors,
    Definition,
    Rename,
    SignatureHelp,
    LinkedEditingRange,
    SemanticTokens,
    InlayHints,
    FileRename,
}

/// Completion candidates from one provider.
///
/// `is_incomplete` marks the whole batch as speculative: the provider did not
/// have enough context to produce a final list. The merge step uses the flag
/// both for the response's `isIncomplete` marker and to drop speculative
/// candidates shadowed by a complete candidate with the same insertion text.
#[derive(Debug, Clone, Default)]
pub struct CompletionOutput {
    pub is_incomplete: bool,
    pub items: Vec<CompletionItem>,
}

impl CompletionOutput {
    /// A complete batch of items.
    pub fn complete(items: Vec<CompletionItem>) -> Self {
        Self {
            is_incomplete: false,
            items,
        }
    }

    /// A speculative batch of items.
    pub fn incomplete(items: Vec<CompletionItem>) -> Self {
        Self {
            is_incomplete: true,
            items,
        }
    }
}

/// Main trait that all language-feature providers implement.
///
/// A provider serves one or more content types (a style analyzer serves
/// "css", a markup analyzer "html") and a subset of features. Every query
/// method has a default body that contributes nothing, so implementations
/// only write the features they declare. Providers own their internal caches;
/// the dispatch core never looks inside them.
///
/// Each query receives an immutable [`DocumentSnapshot`] and a cancellation
/// token. Honouring the token is cooperative: a provider that never checks it
/// simply runs to completion, and the dispatcher discards the result.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use prism_core::document::DocumentSnapshot;
/// use prism_core::provider::{Feature, LanguageProvider};
/// use tokio_util::sync::CancellationToken;
/// use tower_lsp_server::ls_types::{Diagnostic, Position, Range};
///
/// struct TabWarner;
///
/// #[async_trait]
/// impl LanguageProvider for TabWarner {
///     fn id(&self) -> &'static str {
///         "tab-warner"
///     }
///
///     fn content_types(&self) -> &[&'static str] {
///         &["plaintext"]
///     }
///
///     fn capabilities(&self) -> &[Feature] {
///         &[Feature::Diagnostics]
///     }
///
///     async fn diagnostics(
///         &self,
///         doc: &DocumentSnapshot,
///         _cancel: &CancellationToken,
///     ) -> prism_core::Result<Vec<Diagnostic>> {
///         let mut out = Vec::new();
///         for (line, content) in doc.text.lines().enumerate() {
///             if content.contains('\t') {
///                 out.push(Diagnostic {
///                     range: Range::new(
///                         Position::new(line as u32, 0),
///                         Position::new(line as u32, 1),
///                     ),
///                     message: "tab character".into(),
///                     ..Default::default()
///                 });
///             }
///         }
///         Ok(out)
///     }
/// }
/// ```
#[async_trait]
pub trait LanguageProvider: Send + Sync {
    /// Unique identifier, also used to route completion-resolve requests
    /// back to the originating provider.
    fn id(&self) -> &'static str;

    /// Content types this provider understands (e.g. `["css"]`).
    ///
    /// For composite documents the dispatcher routes a request to this
    /// provider only when the region under the request belongs to one of
    /// these types.
    fn content_types(&self) -> &[&'static str];

    /// Features this provider implements.
    fn capabilities(&self) -> &[Feature];

    /// Capability check used by the dispatcher.
    fn implements(&self, feature: Feature) -> bool {
        self.capabilities().contains(&feature)
    }

    /// Whether this provider serves the given content type.
    fn handles(&self, content_type: &str) -> bool {
        self.content_types().iter().any(|ct| *ct == content_type)
    }

    async fn hover(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<Hover>> {
        let _ = (doc, position, cancel);
        Ok(None)
    }

    async fn completions(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<CompletionOutput> {
        let _ = (doc, position, cancel);
        Ok(CompletionOutput::default())
    }

    /// Second phase of the completion protocol: fill in expensive detail for
    /// one selected item previously returned by [`Self::completions`].
    async fn resolve_completion(
        &self,
        item: CompletionItem,
        cancel: &CancellationToken,
    ) -> Result<CompletionItem> {
        let _ = cancel;
        Ok(item)
    }

    async fn diagnostics(
        &self,
        doc: &DocumentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>> {
        let _ = (doc, cancel);
        Ok(Vec::new())
    }

    async fn code_actions(
        &self,
        doc: &DocumentSnapshot,
        range: Range,
        context: &CodeActionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<CodeActionOrCommand>> {
        let _ = (doc, range, context, cancel);
        Ok(Vec::new())
    }

    async fn document_symbols(
        &self,
        doc: &DocumentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocumentSymbol>> {
        let _ = (doc, cancel);
        Ok(Vec::new())
    }

    async fn folding_ranges(
        &self,
        doc: &DocumentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<FoldingRange>> {
        let _ = (doc, cancel);
        Ok(Vec::new())
    }

    async fn document_colors(
        &self,
        doc: &DocumentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<ColorInformation>> {
        let _ = (doc, cancel);
        Ok(Vec::new())
    }

    async fn definition(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Vec<LocationLink>> {
        let _ = (doc, position, cancel);
        Ok(Vec::new())
    }

    async fn rename(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        new_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<WorkspaceEdit>> {
        let _ = (doc, position, new_name, cancel);
        Ok(None)
    }

    async fn signature_help(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<SignatureHelp>> {
        let _ = (doc, position, cancel);
        Ok(None)
    }

    async fn linked_editing_ranges(
        &self,
        doc: &DocumentSnapshot,
        position: Position,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Range>>> {
        let _ = (doc, position, cancel);
        Ok(None)
    }

    /// Semantic tokens, delta-encoded from the document start against
    /// [`semantic_tokens_legend`]. `range` bounds the region considered;
    /// `None` means the full document.
    async fn semantic_tokens(
        &self,
        doc: &DocumentSnapshot,
        range: Option<Range>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SemanticToken>> {
        let _ = (doc, range, cancel);
        Ok(Vec::new())
    }

    async fn inlay_hints(
        &self,
        doc: &DocumentSnapshot,
        range: Range,
        cancel: &CancellationToken,
    ) -> Result<Vec<InlayHint>> {
        let _ = (doc, range, cancel);
        Ok(Vec::new())
    }

    /// Cross-file edits (import path updates and the like) caused by files
    /// being renamed or moved.
    async fn rename_files(
        &self,
        renames: &[FileRename],
        cancel: &CancellationToken,
    ) -> Result<Option<WorkspaceEdit>> {
        let _ = (renames, cancel);
        Ok(None)
    }
}

/// Token legend shared by every provider emitting semantic tokens.
///
/// Providers encode `token_type`/`token_modifiers_bitset` as indices into
/// this legend so the merged stream stays consistent across providers.
pub fn semantic_tokens_legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: vec![
            SemanticTokenType::NAMESPACE,
            SemanticTokenType::TYPE,
            SemanticTokenType::CLASS,
            SemanticTokenType::FUNCTION,
            SemanticTokenType::VARIABLE,
            SemanticTokenType::PROPERTY,
            SemanticTokenType::KEYWORD,
            SemanticTokenType::STRING,
            SemanticTokenType::NUMBER,
            SemanticTokenType::COMMENT,
            SemanticTokenType::OPERATOR,
        ],
        token_modifiers: vec![
            SemanticTokenModifier::DECLARATION,
            SemanticTokenModifier::READONLY,
            SemanticTokenModifier::STATIC,
            SemanticTokenModifier::DEPRECATED,
        ],
    }
}
