//! Minimal clangd client: stdio framing, request correlation, process
//! supervision and a semantic token cache.

pub mod codec;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod tokens;
pub mod types;

pub use connection::Connection;
pub use protocol::{PathToUriError, ResponseError, file_uri_to_path, path_to_file_uri};
pub use registry::{PendingResponse, RequestRegistry, ServerNotification};
pub use session::{Session, SessionOptions};
pub use supervisor::ServerProcess;
pub use tokens::{SemanticToken, SemanticTokenIndex, TokenLegend};
pub use types::{
    ContentChange, DEFAULT_REQUEST_TIMEOUT, LspPosition, LspRange, RequestError, ServerConfig,
    ServerExit, SessionError, SessionState, TextDocument,
};
