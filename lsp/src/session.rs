//! Session: one language server, one workspace root.
//!
//! Owns the connection (and with it the request registry), the semantic
//! token index and the set of opened documents. Construction IS
//! initialization: a `Session` value exists only after the `initialize`
//! handshake has completed, so nothing can be sent before the server is ready.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::Connection;
use crate::protocol;
use crate::registry::RequestRegistry;
use crate::supervisor::ServerProcess;
use crate::tokens::SemanticTokenIndex;
use crate::types::{
    ContentChange, DEFAULT_REQUEST_TIMEOUT, LspPosition, RequestError, ServerConfig, ServerExit,
    SessionError, SessionState, TextDocument,
};

/// Grace period for the `shutdown`/`exit` exchange before killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Caller-side limit on each request; the registry itself never times out.
    pub request_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct Session {
    workspace_root: PathBuf,
    connection: Connection,
    /// `None` when running over a caller-supplied transport.
    process: Option<ServerProcess>,
    state: SessionState,
    index: SemanticTokenIndex,
    opened_docs: HashSet<String>,
    request_timeout: Duration,
}

impl Session {
    /// Spawn the language server and complete the handshake.
    pub async fn start(
        config: &ServerConfig,
        workspace_root: &Path,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let (process, connection) =
            ServerProcess::launch(config, workspace_root).map_err(SessionError::Spawn)?;
        Self::with_process(process, connection, workspace_root, options).await
    }

    /// Run a session over a server spawned by the caller, e.g. with
    /// [`ServerProcess::spawn_command`].
    pub async fn with_process(
        process: ServerProcess,
        connection: Connection,
        workspace_root: &Path,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        Self::initialize(connection, Some(process), workspace_root, options).await
    }

    /// Run a session over an already established connection.
    pub async fn over_connection(
        connection: Connection,
        workspace_root: &Path,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        Self::initialize(connection, None, workspace_root, options).await
    }

    async fn initialize(
        connection: Connection,
        process: Option<ServerProcess>,
        workspace_root: &Path,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let root_uri = protocol::path_to_file_uri(workspace_root)?;
        let params = protocol::initialize_params(root_uri.as_str());

        let result = request(
            connection.registry(),
            "initialize",
            Some(params),
            options.request_timeout,
        )
        .await
        .map_err(|e| match exit_report(process.as_ref(), &e) {
            Some(exit) => SessionError::ServerExited(exit),
            None => SessionError::Initialize(e),
        })?;

        let state = match protocol::legend_from_initialize(&result) {
            Some(legend) => {
                tracing::info!(
                    types = legend.token_types().len(),
                    modifiers = legend.token_modifiers().len(),
                    "Language server provides semantic tokens"
                );
                SessionState::Ready(legend)
            }
            None => {
                tracing::warn!(
                    "Language server does not provide semantic tokens (clangd 11 or newer is required); \
                     refactoring actions are unavailable"
                );
                SessionState::NoSemanticTokens
            }
        };

        connection
            .registry()
            .notify("initialized", Some(serde_json::json!({})))
            .await
            .map_err(|e| match exit_report(process.as_ref(), &e) {
                Some(exit) => SessionError::ServerExited(exit),
                None => e.into(),
            })?;

        let index = match &state {
            SessionState::Ready(legend) => SemanticTokenIndex::new(legend.clone()),
            _ => SemanticTokenIndex::default(),
        };

        Ok(Self {
            workspace_root: workspace_root.to_path_buf(),
            connection,
            process,
            state,
            index,
            opened_docs: HashSet::new(),
            request_timeout: options.request_timeout,
        })
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn index(&self) -> &SemanticTokenIndex {
        &self.index
    }

    #[must_use]
    pub fn registry(&self) -> &RequestRegistry {
        self.connection.registry()
    }

    /// Whether the server is still reachable. Updates the state to `Closed`
    /// once the registry has been failed.
    pub async fn is_alive(&mut self) -> bool {
        if let Some(reason) = self.registry().closed_reason().await {
            self.state = SessionState::Closed(reason);
        }
        !matches!(self.state, SessionState::Closed(_))
    }

    /// Exit report of the server process, if it has exited.
    #[must_use]
    pub fn server_exit(&self) -> Option<ServerExit> {
        self.process.as_ref().and_then(ServerProcess::exit_status)
    }

    /// Send `didOpen` the first time a document is seen; later calls are no-ops.
    pub async fn did_open(&mut self, document: &TextDocument) -> Result<(), SessionError> {
        if self.opened_docs.contains(document.uri()) {
            return Ok(());
        }
        let params = protocol::did_open_params(
            document.uri(),
            document.language_id(),
            document.version(),
            document.text(),
        );
        self.notify("textDocument/didOpen", params).await?;
        self.opened_docs.insert(document.uri().to_string());
        tracing::debug!(
            uri = document.uri(),
            version = document.version(),
            "Opened document"
        );
        Ok(())
    }

    /// Forward an edit. Opens the document first if the server has not seen it.
    pub async fn did_change(
        &mut self,
        document: &TextDocument,
        changes: &[ContentChange],
    ) -> Result<(), SessionError> {
        if !self.opened_docs.contains(document.uri()) {
            return self.did_open(document).await;
        }
        let params = protocol::did_change_params(document.uri(), document.version(), changes);
        self.notify("textDocument/didChange", params).await?;
        tracing::debug!(
            uri = document.uri(),
            version = document.version(),
            changes = changes.len(),
            "Changed document"
        );
        Ok(())
    }

    pub async fn did_close(&mut self, document: &TextDocument) -> Result<(), SessionError> {
        if !self.opened_docs.remove(document.uri()) {
            return Ok(());
        }
        self.index.remove(document.uri());
        let params = serde_json::json!({ "textDocument": { "uri": document.uri() } });
        self.notify("textDocument/didClose", params).await
    }

    /// Make sure the index holds tokens for this exact document version.
    ///
    /// Returns `false` when no tokens are available (no capability, or the
    /// server sent an unusable result).
    pub async fn refresh_tokens(&mut self, document: &TextDocument) -> Result<bool, SessionError> {
        if !matches!(self.state, SessionState::Ready(_)) {
            return Ok(false);
        }
        if !self.index.needs_refresh(document.uri(), document.version()) {
            return Ok(true);
        }

        let params = protocol::semantic_tokens_params(document.uri());
        let result = self
            .request("textDocument/semanticTokens/full", Some(params))
            .await?;

        let Some(data) = protocol::semantic_tokens_data(&result) else {
            tracing::warn!(
                uri = document.uri(),
                "Semantic tokens response carried no usable data"
            );
            return Ok(false);
        };

        self.index
            .upsert(document.uri(), document.version(), document.text(), &data);
        Ok(true)
    }

    /// Semantic token type at a position, refreshing the index if needed.
    pub async fn classify(
        &mut self,
        document: &TextDocument,
        position: LspPosition,
    ) -> Result<Option<String>, SessionError> {
        self.did_open(document).await?;
        if !self.refresh_tokens(document).await? {
            return Ok(None);
        }
        let symbol_type = self
            .index
            .query(document.uri(), position.line, position.character)
            .map(String::from);
        tracing::debug!(
            uri = document.uri(),
            line = position.line,
            character = position.character,
            symbol_type = symbol_type.as_deref().unwrap_or(""),
            "Classified position"
        );
        Ok(symbol_type)
    }

    /// Drain server notifications into the log, up to `budget`.
    pub fn drain_notifications(&mut self, budget: usize) -> usize {
        let notifications = self.connection.drain_notifications(budget);
        for notification in &notifications {
            match notification.method.as_str() {
                "window/logMessage" | "window/showMessage" => {
                    let message = notification
                        .params
                        .as_ref()
                        .and_then(|p| p.get("message"))
                        .and_then(|m| m.as_str())
                        .unwrap_or_default();
                    tracing::debug!("server: {message}");
                }
                method => {
                    tracing::trace!("Ignoring notification: {method}");
                }
            }
        }
        notifications.len()
    }

    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, SessionError> {
        let result = request(self.connection.registry(), method, params, self.request_timeout).await;
        result.map_err(|e| self.request_failed(e))
    }

    async fn notify(&mut self, method: &str, params: serde_json::Value) -> Result<(), SessionError> {
        let result = self.connection.registry().notify(method, Some(params)).await;
        result.map_err(|e| self.request_failed(e))
    }

    /// Close the session on a lost server, reporting its exit when known.
    fn request_failed(&mut self, err: RequestError) -> SessionError {
        if let RequestError::SessionClosed(reason) = &err {
            self.state = SessionState::Closed(reason.clone());
        }
        match exit_report(self.process.as_ref(), &err) {
            Some(exit) => SessionError::ServerExited(exit),
            None => err.into(),
        }
    }

    /// Gracefully shut down the server. Consumes self; every pending
    /// request is failed.
    pub async fn shutdown(mut self) {
        let polite = request(
            self.connection.registry(),
            "shutdown",
            None,
            SHUTDOWN_TIMEOUT,
        )
        .await;
        if polite.is_ok() {
            let _ = self.connection.registry().notify("exit", None).await;
        }

        self.connection.close("session shut down").await;

        if let Some(mut process) = self.process.take() {
            let exited = tokio::time::timeout(SHUTDOWN_TIMEOUT, process.wait()).await;
            if exited.is_err() {
                tracing::debug!("Language server '{}' didn't exit in time, killing", process.name());
                process.kill().await;
            }
        }
    }
}

/// The server's exit report, when `err` means the session ended with it.
fn exit_report(process: Option<&ServerProcess>, err: &RequestError) -> Option<ServerExit> {
    match err {
        RequestError::SessionClosed(_) => process.and_then(ServerProcess::exit_status),
        _ => None,
    }
}

/// Send a request and wait for it, abandoning the pending entry on timeout.
async fn request(
    registry: &RequestRegistry,
    method: &str,
    params: Option<serde_json::Value>,
    timeout: Duration,
) -> Result<serde_json::Value, RequestError> {
    let pending = registry.send(method, params).await?;
    let id = pending.id();
    match tokio::time::timeout(timeout, pending.wait()).await {
        Ok(result) => result,
        Err(_) => {
            registry.abandon(id).await;
            Err(RequestError::TimedOut(timeout))
        }
    }
}
