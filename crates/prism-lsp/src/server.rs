use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use prism_core::config::{ConfigCache, ConfigSource};
use prism_core::provider::semantic_tokens_legend;
use prism_core::{
    CancellationToken, CoreError, DispatchOptions, Dispatcher, DiagnosticsScheduler,
    DiagnosticsSink, DocumentStore, LanguageProvider, MonolithicRegions, ProviderRegistry,
    RegionResolver, DEFAULT_VALIDATION_INTERVAL,
};
use serde_json::Value;
use tower_lsp_server::ls_types::{
    CodeActionParams, CodeActionProviderCapability, CodeActionResponse, ColorInformation,
    ColorProviderCapability, CompletionItem, CompletionOptions, CompletionParams,
    CompletionResponse, ConfigurationItem, Diagnostic, DidChangeConfigurationParams,
    DidChangeTextDocumentParams, DidChangeWatchedFilesParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DidSaveTextDocumentParams, DocumentColorParams,
    DocumentSymbolParams, DocumentSymbolResponse, FileOperationFilter,
    FileOperationPattern, FileOperationRegistrationOptions, FoldingRange, FoldingRangeParams,
    FoldingRangeProviderCapability, GotoDefinitionParams, GotoDefinitionResponse, Hover,
    HoverParams, HoverProviderCapability, InitializeParams, InitializeResult, InitializedParams,
    InlayHint, InlayHintParams, LinkedEditingRangeParams, LinkedEditingRangeServerCapabilities,
    LinkedEditingRanges, MessageType, OneOf, RenameFilesParams, RenameParams,
    SemanticTokensFullOptions, SemanticTokensOptions, SemanticTokensParams,
    SemanticTokensRangeParams, SemanticTokensRangeResult, SemanticTokensResult,
    SemanticTokensServerCapabilities, ServerCapabilities, ServerInfo, SignatureHelp,
    SignatureHelpOptions, SignatureHelpParams, TextDocumentSyncCapability, TextDocumentSyncKind,
    Uri, WorkspaceEdit, WorkspaceFileOperationsServerCapabilities, WorkspaceServerCapabilities,
};
use tower_lsp_server::{Client, LanguageServer, jsonrpc};

use crate::settings::ServerSettings;

const REQUEST_CANCELLED_CODE: i64 = -32800;

/// Host-supplied parts of the server: the feature providers, the region
/// resolver for composite documents, and the diagnostics interval.
pub struct HostConfig {
    pub providers: Vec<Arc<dyn LanguageProvider>>,
    pub regions: Arc<dyn RegionResolver>,
    pub validation_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            regions: Arc::new(MonolithicRegions),
            validation_interval: DEFAULT_VALIDATION_INTERVAL,
        }
    }
}

/// Publishes diagnostics through the LSP client.
struct ClientDiagnosticsSink {
    client: Client,
}

#[async_trait]
impl DiagnosticsSink for ClientDiagnosticsSink {
    async fn publish(&self, uri: Uri, version: Option<i32>, diagnostics: Vec<Diagnostic>) {
        self.client.publish_diagnostics(uri, diagnostics, version).await;
    }
}

/// Resolves configuration through `workspace/configuration` when the client
/// supports it.
struct ClientConfigSource {
    client: Client,
    pull: Arc<AtomicBool>,
}

#[async_trait]
impl ConfigSource for ClientConfigSource {
    fn supports_pull(&self) -> bool {
        self.pull.load(Ordering::SeqCst)
    }

    async fn fetch(&self, section: &str, scope: Option<&Uri>) -> prism_core::Result<Value> {
        let items = vec![ConfigurationItem {
            scope_uri: scope.cloned(),
            section: Some(section.to_string()),
        }];
        match self.client.configuration(items).await {
            Ok(mut values) if !values.is_empty() => Ok(values.remove(0)),
            Ok(_) => Err(CoreError::ConfigUnavailable {
                section: section.into(),
            }),
            Err(error) => {
                tracing::debug!("workspace/configuration failed: {:?}", error);
                Err(CoreError::ConfigUnavailable {
                    section: section.into(),
                })
            }
        }
    }
}

pub struct Backend {
    pub(crate) client: Client,
    store: Arc<DocumentStore>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<DiagnosticsScheduler>,
    config: Arc<ConfigCache>,
    pull_config: Arc<AtomicBool>,
}

impl Backend {
    pub fn new(client: Client, host: HostConfig) -> Self {
        let store = Arc::new(DocumentStore::new());

        let mut registry = ProviderRegistry::new();
        for provider in host.providers {
            registry.register(provider);
        }
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), host.regions));

        let sink = Arc::new(ClientDiagnosticsSink {
            client: client.clone(),
        });
        let scheduler = DiagnosticsScheduler::new(
            Arc::clone(&dispatcher),
            Arc::clone(&store),
            sink,
            host.validation_interval,
        );
        scheduler.attach(store.subscribe());

        let pull_config = Arc::new(AtomicBool::new(false));
        let config = Arc::new(ConfigCache::new(Arc::new(ClientConfigSource {
            client: client.clone(),
            pull: Arc::clone(&pull_config),
        })));

        Self {
            client,
            store,
            dispatcher,
            scheduler,
            config,
            pull_config,
        }
    }

    /// Get a reference to the LSP client (primarily for testing/benchmarking).
    #[doc(hidden)]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The configuration accessor shared with embedded providers.
    pub fn config_cache(&self) -> Arc<ConfigCache> {
        Arc::clone(&self.config)
    }

    fn snapshot(&self, uri: &Uri) -> jsonrpc::Result<prism_core::DocumentSnapshot> {
        self.store.snapshot(uri).map_err(to_rpc_error)
    }

    fn server_capabilities() -> ServerCapabilities {
        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Kind(
                TextDocumentSyncKind::INCREMENTAL,
            )),
            completion_provider: Some(CompletionOptions {
                trigger_characters: Some(vec![".".into(), "<".into(), "\"".into(), "/".into()]),
                resolve_provider: Some(true),
                ..Default::default()
            }),
            hover_provider: Some(HoverProviderCapability::Simple(true)),
            definition_provider: Some(OneOf::Left(true)),
            rename_provider: Some(OneOf::Left(true)),
            signature_help_provider: Some(SignatureHelpOptions {
                trigger_characters: Some(vec!["(".into(), ",".into()]),
                ..Default::default()
            }),
            linked_editing_range_provider: Some(LinkedEditingRangeServerCapabilities::Simple(
                true,
            )),
            code_action_provider: Some(CodeActionProviderCapability::Simple(true)),
            document_symbol_provider: Some(OneOf::Left(true)),
            folding_range_provider: Some(FoldingRangeProviderCapability::Simple(true)),
            color_provider: Some(ColorProviderCapability::Simple(true)),
            semantic_tokens_provider: Some(
                SemanticTokensServerCapabilities::SemanticTokensOptions(SemanticTokensOptions {
                    legend: semantic_tokens_legend(),
                    range: Some(true),
                    full: Some(SemanticTokensFullOptions::Bool(true)),
                    ..Default::default()
                }),
            ),
            inlay_hint_provider: Some(OneOf::Left(true)),
            workspace: Some(WorkspaceServerCapabilities {
                workspace_folders: None,
                file_operations: Some(WorkspaceFileOperationsServerCapabilities {
                    will_rename: Some(FileOperationRegistrationOptions {
                        filters: vec![FileOperationFilter {
                            scheme: Some("file".into()),
                            pattern: FileOperationPattern {
                                glob: "**/*".into(),
                                matches: None,
                                options: None,
                            },
                        }],
                    }),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        }
    }
}

impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        tracing::info!("initializing prism-lsp server");

        let mut settings = ServerSettings::default();
        if let Some(options) = params.initialization_options
            && let Ok(parsed) = serde_json::from_value::<ServerSettings>(options)
        {
            tracing::debug!("loaded initialization options: {:?}", parsed);
            settings = parsed;
        }

        let supports_pull = params
            .capabilities
            .workspace
            .as_ref()
            .and_then(|workspace| workspace.configuration)
            .unwrap_or(false);
        self.pull_config.store(supports_pull, Ordering::SeqCst);

        let client_link_support = params
            .capabilities
            .text_document
            .as_ref()
            .and_then(|text_document| text_document.definition.as_ref())
            .and_then(|definition| definition.link_support)
            .unwrap_or(false);

        // Captured once; the merge policies read these for the whole session.
        self.dispatcher.configure(DispatchOptions {
            filter_incomplete_completions: settings.filter_incomplete_completions,
            definition_link_support: settings
                .definition_link_support
                .unwrap_or(client_link_support),
        });

        Ok(InitializeResult {
            capabilities: Self::server_capabilities(),
            server_info: Some(ServerInfo {
                name: "prism-lsp".into(),
                version: Some(env!("CARGO_PKG_VERSION").into()),
            }),
            offset_encoding: None,
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        tracing::info!("prism-lsp server initialized");
        self.client
            .log_message(MessageType::INFO, "prism-lsp ready")
            .await;
    }

    async fn shutdown(&self) -> jsonrpc::Result<()> {
        tracing::info!("shutting down prism-lsp server");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        tracing::info!("document opened: {:?}", document.uri);
        self.store.open(
            document.uri,
            document.language_id,
            document.text,
            document.version,
        );
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        if let Err(error) = self.store.apply_edits(
            &uri,
            &params.content_changes,
            params.text_document.version,
        ) {
            tracing::warn!("rejected change notification for {:?}: {}", uri, error);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        tracing::debug!("document saved: {:?}", params.text_document.uri);
        self.scheduler.update_all();
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        tracing::info!("document closed: {:?}", uri);
        self.config.evict(&uri);
        if let Err(error) = self.store.close(&uri) {
            tracing::debug!("close for untracked document {:?}: {}", uri, error);
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        if self.pull_config.load(Ordering::SeqCst) {
            // Dynamic configuration: drop everything and re-pull for the
            // documents we already resolved values for.
            self.config.refresh().await;
        } else {
            self.config.set_global(params.settings);
        }
        self.scheduler.update_all();
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        tracing::debug!("received {} file change events", params.changes.len());
        self.scheduler.update_all();
    }

    async fn hover(&self, params: HoverParams) -> jsonrpc::Result<Option<Hover>> {
        let position_params = params.text_document_position_params;
        let snapshot = self.snapshot(&position_params.text_document.uri)?;
        let cancel = CancellationToken::new();
        self.dispatcher
            .hover(&snapshot, position_params.position, &cancel)
            .await
            .map_err(to_rpc_error)
    }

    async fn completion(
        &self,
        params: CompletionParams,
    ) -> jsonrpc::Result<Option<CompletionResponse>> {
        let position_params = params.text_document_position;
        let snapshot = self.snapshot(&position_params.text_document.uri)?;
        let cancel = CancellationToken::new();
        let list = self
            .dispatcher
            .completions(&snapshot, position_params.position, &cancel)
            .await
            .map_err(to_rpc_error)?;
        Ok(Some(CompletionResponse::List(list)))
    }

    async fn completion_resolve(
        &self,
        item: CompletionItem,
    ) -> jsonrpc::Result<CompletionItem> {
        let cancel = CancellationToken::new();
        self.dispatcher
            .resolve_completion(item, &cancel)
            .await
            .map_err(to_rpc_error)
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> jsonrpc::Result<Option<GotoDefinitionResponse>> {
        let position_params = params.text_document_position_params;
        let snapshot = self.snapshot(&position_params.text_document.uri)?;
        let cancel = CancellationToken::new();
        self.dispatcher
            .definition(&snapshot, position_params.position, &cancel)
            .await
            .map_err(to_rpc_error)
    }

    async fn rename(&self, params: RenameParams) -> jsonrpc::Result<Option<WorkspaceEdit>> {
        let position_params = params.text_document_position;
        let snapshot = self.snapshot(&position_params.text_document.uri)?;
        let cancel = CancellationToken::new();
        self.dispatcher
            .rename(&snapshot, position_params.position, &params.new_name, &cancel)
            .await
            .map_err(to_rpc_error)
    }

    async fn signature_help(
        &self,
        params: SignatureHelpParams,
    ) -> jsonrpc::Result<Option<SignatureHelp>> {
        let position_params = params.text_document_position_params;
        let snapshot = self.snapshot(&position_params.text_document.uri)?;
        let cancel = CancellationToken::new();
        self.dispatcher
            .signature_help(&snapshot, position_params.position, &cancel)
            .await
            .map_err(to_rpc_error)
    }

    async fn linked_editing_range(
        &self,
        params: LinkedEditingRangeParams,
    ) -> jsonrpc::Result<Option<LinkedEditingRanges>> {
        let position_params = params.text_document_position_params;
        let snapshot = self.snapshot(&position_params.text_document.uri)?;
        let cancel = CancellationToken::new();
        let ranges = self
            .dispatcher
            .linked_editing_ranges(&snapshot, position_params.position, &cancel)
            .await
            .map_err(to_rpc_error)?;
        Ok(ranges.map(|ranges| LinkedEditingRanges {
            ranges,
            word_pattern: None,
        }))
    }

    async fn code_action(
        &self,
        params: CodeActionParams,
    ) -> jsonrpc::Result<Option<CodeActionResponse>> {
        let snapshot = self.snapshot(&params.text_document.uri)?;
        let cancel = CancellationToken::new();
        let actions = self
            .dispatcher
            .code_actions(&snapshot, params.range, &params.context, &cancel)
            .await
            .map_err(to_rpc_error)?;
        Ok(Some(actions))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> jsonrpc::Result<Option<DocumentSymbolResponse>> {
        let snapshot = self.snapshot(&params.text_document.uri)?;
        let cancel = CancellationToken::new();
        let symbols = self
            .dispatcher
            .document_symbols(&snapshot, &cancel)
            .await
            .map_err(to_rpc_error)?;
        Ok(Some(DocumentSymbolResponse::Nested(symbols)))
    }

    async fn folding_range(
        &self,
        params: FoldingRangeParams,
    ) -> jsonrpc::Result<Option<Vec<FoldingRange>>> {
        let snapshot = self.snapshot(&params.text_document.uri)?;
        let cancel = CancellationToken::new();
        let ranges = self
            .dispatcher
            .folding_ranges(&snapshot, &cancel)
            .await
            .map_err(to_rpc_error)?;
        Ok(Some(ranges))
    }

    async fn document_color(
        &self,
        params: DocumentColorParams,
    ) -> jsonrpc::Result<Vec<ColorInformation>> {
        let snapshot = self.snapshot(&params.text_document.uri)?;
        let cancel = CancellationToken::new();
        self.dispatcher
            .document_colors(&snapshot, &cancel)
            .await
            .map_err(to_rpc_error)
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> jsonrpc::Result<Option<SemanticTokensResult>> {
        let snapshot = self.snapshot(&params.text_document.uri)?;
        let cancel = CancellationToken::new();
        let tokens = self
            .dispatcher
            .semantic_tokens(&snapshot, None, &cancel)
            .await
            .map_err(to_rpc_error)?;
        Ok(tokens.map(SemanticTokensResult::Tokens))
    }

    async fn semantic_tokens_range(
        &self,
        params: SemanticTokensRangeParams,
    ) -> jsonrpc::Result<Option<SemanticTokensRangeResult>> {
        let snapshot = self.snapshot(&params.text_document.uri)?;
        let cancel = CancellationToken::new();
        let tokens = self
            .dispatcher
            .semantic_tokens(&snapshot, Some(params.range), &cancel)
            .await
            .map_err(to_rpc_error)?;
        Ok(tokens.map(SemanticTokensRangeResult::Tokens))
    }

    async fn inlay_hint(
        &self,
        params: InlayHintParams,
    ) -> jsonrpc::Result<Option<Vec<InlayHint>>> {
        let snapshot = self.snapshot(&params.text_document.uri)?;
        let cancel = CancellationToken::new();
        let hints = self
            .dispatcher
            .inlay_hints(&snapshot, params.range, &cancel)
            .await
            .map_err(to_rpc_error)?;
        Ok(Some(hints))
    }

    async fn will_rename_files(
        &self,
        params: RenameFilesParams,
    ) -> jsonrpc::Result<Option<WorkspaceEdit>> {
        let cancel = CancellationToken::new();
        self.dispatcher
            .rename_files(&params.files, &cancel)
            .await
            .map_err(to_rpc_error)
    }
}

fn to_rpc_error(error: CoreError) -> jsonrpc::Error {
    match &error {
        CoreError::Cancelled => jsonrpc::Error {
            code: jsonrpc::ErrorCode::ServerError(REQUEST_CANCELLED_CODE),
            message: "request cancelled".into(),
            data: None,
        },
        CoreError::UnknownDocument { .. } | CoreError::StaleVersion { .. } => {
            jsonrpc::Error::invalid_params(error.to_string())
        }
        _ => {
            let mut rpc = jsonrpc::Error::internal_error();
            rpc.message = error.to_string().into();
            rpc
        }
    }
}
