//! Common test utilities for integration tests.
//!
//! Provides the `LspClient` used to drive the server binary over stdio with
//! raw JSON-RPC framing.

use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// A captured server-to-client notification.
#[derive(Debug, Clone)]
#[allow(dead_code)] // Not every test inspects every field
pub(crate) struct CapturedNotification {
    /// The LSP method name (e.g., "textDocument/publishDiagnostics").
    pub method: String,
    /// Sequence number for ordering (monotonically increasing).
    pub sequence: u64,
    /// The full notification parameters.
    pub params: Value,
}

/// LSP test client for communicating with the server binary.
pub(crate) struct LspClient {
    process: Child,
    notifications: Arc<RwLock<Vec<CapturedNotification>>>,
    notification_counter: Arc<AtomicU64>,
    reader: Option<BufReader<std::process::ChildStdout>>,
}

impl LspClient {
    /// Spawn the prism-lsp binary.
    pub(crate) fn spawn() -> Self {
        let mut process = Command::new(env!("CARGO_BIN_EXE_prism-lsp"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn prism-lsp binary");

        let stdout = process.stdout.take().expect("Failed to capture stdout");
        let reader = BufReader::new(stdout);

        Self {
            process,
            notifications: Arc::new(RwLock::new(Vec::new())),
            notification_counter: Arc::new(AtomicU64::new(0)),
            reader: Some(reader),
        }
    }

    /// Find a notification by method name from already captured notifications.
    #[allow(dead_code)]
    pub(crate) fn find_notification(&self, method: &str) -> Option<CapturedNotification> {
        self.notifications
            .read()
            .expect("Failed to acquire read lock")
            .iter()
            .find(|n| n.method == method)
            .cloned()
    }

    /// Send a JSON-RPC message to the server.
    pub(crate) fn send(&mut self, message: &Value) {
        let body = serde_json::to_string(message).unwrap();
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        let stdin = self.process.stdin.as_mut().expect("stdin not captured");
        stdin.write_all(header.as_bytes()).unwrap();
        stdin.write_all(body.as_bytes()).unwrap();
        stdin.flush().unwrap();
    }

    /// Read a JSON-RPC response from the server.
    ///
    /// Captures notifications and returns the first response with matching
    /// id, or any response if no id filter is provided.
    pub(crate) fn read_response(&mut self, expected_id: Option<i64>) -> Value {
        let reader = self.reader.as_mut().expect("reader not initialized");

        loop {
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                let bytes_read = reader.read_line(&mut line).expect("Failed to read header");
                assert!(bytes_read != 0, "Server closed connection unexpectedly");

                if line == "\r\n" || line == "\n" {
                    break;
                }

                if line.to_lowercase().starts_with("content-length:") {
                    content_length = line
                        .split(':')
                        .nth(1)
                        .unwrap()
                        .trim()
                        .parse()
                        .expect("Invalid content length");
                }
            }

            if content_length == 0 {
                continue;
            }

            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).expect("Failed to read body");

            let message: Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
                panic!("Invalid JSON: {e} in: {:?}", String::from_utf8_lossy(&body))
            });

            if message.get("id").is_none() {
                if let Some(method) = message.get("method").and_then(|m| m.as_str()) {
                    let params = message.get("params").cloned().unwrap_or(Value::Null);
                    let seq = self.notification_counter.fetch_add(1, Ordering::SeqCst);
                    self.notifications
                        .write()
                        .expect("Failed to acquire write lock")
                        .push(CapturedNotification {
                            method: method.to_string(),
                            sequence: seq,
                            params,
                        });
                }
                continue;
            }

            if let Some(id) = expected_id {
                if message.get("id") == Some(&json!(id)) {
                    return message;
                }
                continue;
            }

            return message;
        }
    }

    /// Initialize the LSP session.
    pub(crate) fn initialize(&mut self) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "processId": null,
                "capabilities": {
                    "textDocument": {
                        "hover": {
                            "contentFormat": ["markdown", "plaintext"]
                        },
                        "definition": {
                            "linkSupport": true
                        },
                        "publishDiagnostics": {}
                    }
                },
                "rootUri": "file:///tmp",
                "workspaceFolders": null
            }
        }));

        let response = self.read_response(Some(1));

        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "initialized",
            "params": {}
        }));

        response
    }

    /// Open a text document.
    pub(crate) fn did_open(&mut self, uri: &str, language_id: &str, text: &str) {
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {
                "textDocument": {
                    "uri": uri,
                    "languageId": language_id,
                    "version": 1,
                    "text": text
                }
            }
        }));
    }

    /// Close a text document.
    #[allow(dead_code)]
    pub(crate) fn did_close(&mut self, uri: &str) {
        self.send(&json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didClose",
            "params": {
                "textDocument": {"uri": uri}
            }
        }));
    }

    /// Request hover information.
    pub(crate) fn hover(&mut self, id: i64, uri: &str, line: u32, character: u32) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "textDocument/hover",
            "params": {
                "textDocument": {"uri": uri},
                "position": {"line": line, "character": character}
            }
        }));
        self.read_response(Some(id))
    }

    /// Request completions.
    pub(crate) fn completion(&mut self, id: i64, uri: &str, line: u32, character: u32) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "textDocument/completion",
            "params": {
                "textDocument": {"uri": uri},
                "position": {"line": line, "character": character}
            }
        }));
        self.read_response(Some(id))
    }

    /// Request folding ranges.
    pub(crate) fn folding_range(&mut self, id: i64, uri: &str) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "textDocument/foldingRange",
            "params": {
                "textDocument": {"uri": uri}
            }
        }));
        self.read_response(Some(id))
    }

    /// Shutdown the server.
    pub(crate) fn shutdown(&mut self) -> Value {
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": 999,
            "method": "shutdown"
        }));
        self.read_response(Some(999))
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}
