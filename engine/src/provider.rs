//! Refactor provider: the editor-facing entry point.
//!
//! Owns at most one language server session, keyed by workspace root. A
//! request for a different root, or after the server has died, tears the old
//! session down and starts a new one from that workspace's configuration.

use std::path::Path;

use recpp_config::{ConfigError, RecppConfig};
use recpp_lsp::{
    ContentChange, LspPosition, ServerConfig, Session, SessionError, SessionOptions, TextDocument,
};

use crate::actions::{ActionContext, RefactorAction, decide};
use crate::tool::{ToolError, ToolOutput, ToolTemplate};

/// Maximum number of server notifications logged per request.
const NOTIFICATION_BUDGET: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no workspace folder is open")]
    NoWorkspace,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("'{title}' has no command to run")]
    NotExecutable { title: &'static str },
}

struct ActiveSession {
    session: Session,
    tool: ToolTemplate,
}

#[derive(Default)]
pub struct RefactorProvider {
    active: Option<ActiveSession>,
}

impl RefactorProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already running session.
    #[must_use]
    pub fn with_session(session: Session, tool: ToolTemplate) -> Self {
        Self {
            active: Some(ActiveSession { session, tool }),
        }
    }

    /// Root of the current session, if any.
    #[must_use]
    pub fn workspace_root(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.session.workspace_root())
    }

    /// Refactoring actions available at `position` in `document`.
    pub async fn provide_actions(
        &mut self,
        workspace_root: Option<&Path>,
        document: &TextDocument,
        position: LspPosition,
    ) -> Result<Vec<RefactorAction>, ProviderError> {
        let root = workspace_root.ok_or(ProviderError::NoWorkspace)?;
        let active = self.ensure_session(root).await?;

        active.session.drain_notifications(NOTIFICATION_BUDGET);
        let symbol_type = active.session.classify(document, position).await?;

        let ctx = ActionContext {
            text: document.text(),
            path: document.path(),
            line: position.line,
            character: position.character,
            symbol_type: symbol_type.as_deref(),
        };
        Ok(decide(&ctx, &active.tool))
    }

    /// Forward a newly opened document and prefetch its tokens.
    pub async fn on_document_opened(&mut self, document: &TextDocument) -> Result<(), ProviderError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        active.session.did_open(document).await?;
        active.session.refresh_tokens(document).await?;
        Ok(())
    }

    /// Forward an edit and refresh tokens for the new version.
    pub async fn on_document_changed(
        &mut self,
        document: &TextDocument,
        changes: &[ContentChange],
    ) -> Result<(), ProviderError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        active.session.did_change(document, changes).await?;
        active.session.refresh_tokens(document).await?;
        Ok(())
    }

    /// Run a bound action's tool.
    pub async fn execute(&self, action: &RefactorAction) -> Result<ToolOutput, ProviderError> {
        let command = action.command.as_ref().ok_or(ProviderError::NotExecutable {
            title: action.title(),
        })?;
        Ok(command.run().await?)
    }

    /// Tear down the current session. Pending requests are failed.
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!(
                root = %active.session.workspace_root().display(),
                "Shutting down language server session"
            );
            active.session.shutdown().await;
        }
    }

    async fn ensure_session(&mut self, root: &Path) -> Result<&mut ActiveSession, ProviderError> {
        let mut current = self.active.take();
        if let Some(active) = current.as_mut() {
            let same_root = active.session.workspace_root() == root;
            if !same_root || !active.session.is_alive().await {
                if same_root {
                    match active.session.server_exit() {
                        Some(exit) => tracing::warn!("{}; restarting", exit.describe()),
                        None => tracing::warn!("Language server session closed; restarting"),
                    }
                } else {
                    tracing::info!(
                        from = %active.session.workspace_root().display(),
                        to = %root.display(),
                        "Workspace root changed; restarting language server"
                    );
                }
                if let Some(old) = current.take() {
                    old.session.shutdown().await;
                }
            }
        }

        let active = match current {
            Some(active) => active,
            None => start_session(root).await?,
        };
        Ok(self.active.insert(active))
    }
}

async fn start_session(root: &Path) -> Result<ActiveSession, ProviderError> {
    let settings = RecppConfig::load(root)?.resolve(root)?;
    let server = ServerConfig::new(settings.clangd_path.clone(), settings.build_dir.clone());
    let options = SessionOptions {
        request_timeout: settings.request_timeout,
    };
    let session = Session::start(&server, root, options).await?;
    Ok(ActiveSession {
        session,
        tool: ToolTemplate::from_settings(&settings),
    })
}
