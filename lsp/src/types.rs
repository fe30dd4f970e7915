//! Public types consumed by the refactoring engine.
//!
//! These types define the interface between `recpp-lsp` and `recpp-engine`.
//! The engine constructs [`ServerConfig`] and [`TextDocument`]s, and reads back
//! [`SessionState`] and classification results.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::ResponseError;
use crate::tokens::TokenLegend;

/// Default caller-side timeout for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How to launch the language server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the `clangd` executable.
    command: PathBuf,
    /// Directory containing `compile_commands.json`.
    compile_commands_dir: PathBuf,
}

impl ServerConfig {
    #[must_use]
    pub fn new(command: impl Into<PathBuf>, compile_commands_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            compile_commands_dir: compile_commands_dir.into(),
        }
    }

    #[must_use]
    pub fn command(&self) -> &Path {
        &self.command
    }

    #[must_use]
    pub fn compile_commands_dir(&self) -> &Path {
        &self.compile_commands_dir
    }

    /// Fixed argument set: compile database location plus verbose logging.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        vec![
            format!(
                "--compile-commands-dir={}",
                self.compile_commands_dir.display()
            ),
            "--log=verbose".to_string(),
        ]
    }
}

/// Zero-based LSP position. `character` counts UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LspPosition {
    pub line: u32,
    pub character: u32,
}

impl LspPosition {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LspRange {
    pub start: LspPosition,
    pub end: LspPosition,
}

impl LspRange {
    #[must_use]
    pub const fn new(start: LspPosition, end: LspPosition) -> Self {
        Self { start, end }
    }
}

/// One entry of a `didChange` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    /// `None` replaces the whole document.
    range: Option<LspRange>,
    range_length: Option<u32>,
    text: String,
}

impl ContentChange {
    #[must_use]
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            range_length: None,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn ranged(range: LspRange, range_length: u32, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            range_length: Some(range_length),
            text: text.into(),
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self.range {
            None => serde_json::json!({ "text": self.text }),
            Some(range) => serde_json::json!({
                "range": {
                    "start": { "line": range.start.line, "character": range.start.character },
                    "end": { "line": range.end.line, "character": range.end.character }
                },
                "rangeLength": self.range_length,
                "text": self.text
            }),
        }
    }
}

/// Snapshot of an editor document as the host sees it.
#[derive(Debug, Clone)]
pub struct TextDocument {
    uri: String,
    path: PathBuf,
    language_id: String,
    version: i32,
    text: String,
}

impl TextDocument {
    /// Build a document for a file on disk. The URI is derived from the path.
    pub fn from_path(
        path: impl Into<PathBuf>,
        language_id: impl Into<String>,
        version: i32,
        text: impl Into<String>,
    ) -> Result<Self, crate::protocol::PathToUriError> {
        let path = path.into();
        let uri = crate::protocol::path_to_file_uri(&path)?.to_string();
        Ok(Self {
            uri,
            path,
            language_id: language_id.into(),
            version,
            text: text.into(),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the text and bump to `version`, as the editor does on edit.
    pub fn update(&mut self, version: i32, text: impl Into<String>) {
        self.version = version;
        self.text = text.into();
    }
}

/// Why a request never produced a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("server returned error {}: {}", .0.code, .0.message)]
    Server(ResponseError),
    #[error("session closed: {0}")]
    SessionClosed(String),
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
    #[error("failed to serialize request: {0}")]
    Serialize(String),
    #[error("unreadable response: {0}")]
    Protocol(String),
}

/// How the language server process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerExit {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    /// Last lines the server wrote to stderr.
    pub stderr_tail: Vec<String>,
}

impl ServerExit {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }

    #[must_use]
    pub fn describe(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exited with status {code}"),
            None => "was terminated by a signal".to_string(),
        };
        if self.stderr_tail.is_empty() {
            format!("language server {status}")
        } else {
            format!(
                "language server {status}; stderr:\n{}",
                self.stderr_tail.join("\n")
            )
        }
    }
}

/// Readiness of a session after the capability handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Semantic tokens available; classifications use this legend.
    Ready(TokenLegend),
    /// The server offered no semantic token provider. Document sync still
    /// works, but every classification is unknown.
    NoSemanticTokens,
    Closed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start language server: {0:#}")]
    Spawn(anyhow::Error),
    #[error("initialize failed: {0}")]
    Initialize(RequestError),
    #[error("{}", .0.describe())]
    ServerExited(ServerExit),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Uri(#[from] crate::protocol::PathToUriError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_args() {
        let config = ServerConfig::new("/usr/bin/clangd", "/work/build");
        assert_eq!(
            config.args(),
            vec![
                "--compile-commands-dir=/work/build".to_string(),
                "--log=verbose".to_string()
            ]
        );
    }

    #[test]
    fn test_server_exit_describe() {
        let exit = ServerExit {
            code: Some(1),
            stderr_tail: vec!["E: crashed".to_string()],
        };
        assert!(!exit.is_clean());
        assert_eq!(
            exit.describe(),
            "language server exited with status 1; stderr:\nE: crashed"
        );

        let killed = ServerExit {
            code: None,
            stderr_tail: Vec::new(),
        };
        assert_eq!(killed.describe(), "language server was terminated by a signal");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_document_from_path() {
        let mut doc = TextDocument::from_path("/src/a.h", "cpp", 1, "int x;").unwrap();
        assert_eq!(doc.uri(), "file:///src/a.h");
        assert_eq!(doc.path(), Path::new("/src/a.h"));

        doc.update(2, "int y;");
        assert_eq!(doc.version(), 2);
        assert_eq!(doc.text(), "int y;");
    }

    #[test]
    fn test_document_rejects_relative_path() {
        assert!(TextDocument::from_path("relative.h", "cpp", 1, "").is_err());
    }
}
