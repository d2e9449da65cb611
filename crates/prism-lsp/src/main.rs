use prism_lsp::server::{Backend, HostConfig};
use tower_lsp_server::{LspService, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    // The binary ships the dispatch shell; embedders register their feature
    // providers through HostConfig.
    let (service, socket) =
        LspService::new(|client| Backend::new(client, HostConfig::default()));

    Server::new(stdin, stdout, socket).serve(service).await;
}
