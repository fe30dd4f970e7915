//! LSP message serde types for JSON-RPC communication.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::tokens::TokenLegend;
use crate::types::ContentChange;

/// Token types the client declares it understands during `initialize`.
pub const CLIENT_TOKEN_TYPES: &[&str] = &["class", "function"];

/// Token modifiers the client declares it understands during `initialize`.
pub const CLIENT_TOKEN_MODIFIERS: &[&str] = &["static", "declaration", "definition"];

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<&'a serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Error object carried by a failed JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// A decoded JSON-RPC message, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Server-initiated request (has both `id` and `method`).
    Request {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
    Response {
        id: u64,
        result: Result<serde_json::Value, ResponseError>,
    },
    /// A response to one of our ids whose payload could not be read: an
    /// `error` that is not `{code, message}`, or neither `result` nor `error`.
    InvalidResponse { id: u64, reason: String },
}

impl Message {
    /// Classify a raw frame. Returns `None` for frames that fit no JSON-RPC shape.
    #[must_use]
    pub fn from_value(frame: serde_json::Value) -> Option<Self> {
        let serde_json::Value::Object(mut map) = frame else {
            return None;
        };

        let id = map.remove("id");
        let method = map
            .get("method")
            .and_then(|m| m.as_str())
            .map(String::from);
        let params = map.remove("params");

        match (id, method) {
            (Some(id), Some(method)) => Some(Self::Request { id, method, params }),
            (None, Some(method)) => Some(Self::Notification { method, params }),
            (Some(id), None) => {
                let id = id.as_u64()?;
                if let Some(error) = map.remove("error") {
                    match serde_json::from_value(error) {
                        Ok(error) => Some(Self::Response {
                            id,
                            result: Err(error),
                        }),
                        Err(e) => Some(Self::InvalidResponse {
                            id,
                            reason: format!("malformed error object: {e}"),
                        }),
                    }
                } else if let Some(result) = map.remove("result") {
                    Some(Self::Response {
                        id,
                        result: Ok(result),
                    })
                } else {
                    Some(Self::InvalidResponse {
                        id,
                        reason: "response carries neither result nor error".to_string(),
                    })
                }
            }
            (None, None) => None,
        }
    }
}

pub(crate) fn method_not_found(id: &serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

pub(crate) fn initialize_params(root_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "semanticTokens": {
                    "requests": { "full": { "delta": false } },
                    "tokenTypes": CLIENT_TOKEN_TYPES,
                    "tokenModifiers": CLIENT_TOKEN_MODIFIERS,
                    "formats": []
                }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspaceFolder"
        }]
    })
}

/// Extract the semantic token legend from an `initialize` result.
///
/// `None` means the server has no semantic token provider.
pub(crate) fn legend_from_initialize(result: &serde_json::Value) -> Option<TokenLegend> {
    let provider = result.get("capabilities")?.get("semanticTokensProvider")?;
    if provider.is_null() {
        return None;
    }
    let legend = provider.get("legend")?;
    serde_json::from_value(legend.clone()).ok()
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(
    uri: &str,
    version: i32,
    changes: &[ContentChange],
) -> serde_json::Value {
    let changes: Vec<serde_json::Value> = changes.iter().map(ContentChange::to_json).collect();
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": changes
    })
}

pub(crate) fn semantic_tokens_params(uri: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

/// Pull the flat `data` array out of a `semanticTokens/full` result.
pub(crate) fn semantic_tokens_data(result: &serde_json::Value) -> Option<Vec<u32>> {
    let data = result.get("data")?.as_array()?;
    data.iter()
        .map(|v| v.as_u64().and_then(|n| u32::try_from(n).ok()))
        .collect()
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

#[must_use]
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LspPosition, LspRange};

    #[test]
    fn test_initialize_params_declare_semantic_tokens() {
        let params = initialize_params("file:///workspace");
        assert!(params["processId"].is_number());
        assert_eq!(params["rootUri"], "file:///workspace");
        let tokens = &params["capabilities"]["textDocument"]["semanticTokens"];
        assert_eq!(tokens["requests"]["full"]["delta"], false);
        assert_eq!(tokens["tokenTypes"], serde_json::json!(["class", "function"]));
        assert_eq!(
            tokens["tokenModifiers"],
            serde_json::json!(["static", "declaration", "definition"])
        );
    }

    #[test]
    fn test_legend_from_initialize() {
        let result = serde_json::json!({
            "capabilities": {
                "semanticTokensProvider": {
                    "full": true,
                    "legend": {
                        "tokenTypes": ["variable", "function", "class"],
                        "tokenModifiers": ["declaration"]
                    }
                }
            }
        });
        let legend = legend_from_initialize(&result).unwrap();
        assert_eq!(legend.token_type(1), Some("function"));
        assert_eq!(legend.token_modifiers(), ["declaration".to_string()]);
    }

    #[test]
    fn test_legend_absent_without_provider() {
        let result = serde_json::json!({ "capabilities": { "hoverProvider": true } });
        assert!(legend_from_initialize(&result).is_none());

        let result = serde_json::json!({ "capabilities": { "semanticTokensProvider": null } });
        assert!(legend_from_initialize(&result).is_none());
    }

    #[test]
    fn test_did_open_params() {
        let params = did_open_params("file:///test.h", "cpp", 1, "class A {};");
        assert_eq!(params["textDocument"]["uri"], "file:///test.h");
        assert_eq!(params["textDocument"]["languageId"], "cpp");
        assert_eq!(params["textDocument"]["version"], 1);
    }

    #[test]
    fn test_did_change_params_full_and_ranged() {
        let changes = [
            ContentChange::full("int x;"),
            ContentChange::ranged(
                LspRange::new(LspPosition::new(0, 4), LspPosition::new(0, 5)),
                1,
                "y",
            ),
        ];
        let params = did_change_params("file:///test.cpp", 3, &changes);
        assert_eq!(params["textDocument"]["version"], 3);
        assert_eq!(params["contentChanges"][0]["text"], "int x;");
        assert!(params["contentChanges"][0].get("range").is_none());
        assert_eq!(params["contentChanges"][1]["range"]["start"]["character"], 4);
        assert_eq!(params["contentChanges"][1]["rangeLength"], 1);
    }

    #[test]
    fn test_semantic_tokens_data() {
        let result = serde_json::json!({ "resultId": "1", "data": [0, 5, 3, 1, 0] });
        assert_eq!(semantic_tokens_data(&result), Some(vec![0, 5, 3, 1, 0]));

        let result = serde_json::json!({ "data": [0, -1] });
        assert_eq!(semantic_tokens_data(&result), None);

        assert_eq!(semantic_tokens_data(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_message_classification() {
        let response = Message::from_value(serde_json::json!({
            "jsonrpc": "2.0", "id": 4, "result": { "ok": true }
        }));
        assert_eq!(
            response,
            Some(Message::Response {
                id: 4,
                result: Ok(serde_json::json!({ "ok": true }))
            })
        );

        let null_result = Message::from_value(serde_json::json!({
            "jsonrpc": "2.0", "id": 5, "result": null
        }));
        assert!(matches!(
            null_result,
            Some(Message::Response { id: 5, result: Ok(serde_json::Value::Null) })
        ));

        let notification = Message::from_value(serde_json::json!({
            "jsonrpc": "2.0", "method": "window/logMessage", "params": { "type": 3 }
        }));
        assert!(matches!(notification, Some(Message::Notification { method, .. }) if method == "window/logMessage"));

        let request = Message::from_value(serde_json::json!({
            "jsonrpc": "2.0", "id": "abc", "method": "workspace/configuration"
        }));
        assert!(matches!(request, Some(Message::Request { method, .. }) if method == "workspace/configuration"));
    }

    #[test]
    fn test_message_error_response() {
        let msg = Message::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": { "code": -32600, "message": "invalid request" }
        }))
        .unwrap();
        match msg {
            Message::Response { id, result: Err(err) } => {
                assert_eq!(id, 2);
                assert_eq!(err.code, -32600);
                assert_eq!(err.message, "invalid request");
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_unreadable_response_keeps_its_id() {
        let msg = Message::from_value(serde_json::json!({
            "jsonrpc": "2.0", "id": 7, "error": "boom"
        }));
        assert!(matches!(
            msg,
            Some(Message::InvalidResponse { id: 7, ref reason }) if reason.contains("malformed error object")
        ));

        let msg = Message::from_value(serde_json::json!({ "jsonrpc": "2.0", "id": 8 }));
        assert!(matches!(msg, Some(Message::InvalidResponse { id: 8, .. })));
    }

    #[test]
    fn test_message_rejects_shapeless_frames() {
        assert!(Message::from_value(serde_json::json!({"jsonrpc": "2.0"})).is_none());
        assert!(Message::from_value(serde_json::json!([1, 2, 3])).is_none());
        // Response ids we issue are always integers.
        assert!(Message::from_value(serde_json::json!({"id": "x", "result": 1})).is_none());
    }

    #[test]
    fn test_request_serialization_without_params() {
        let req = Request::new(1, "shutdown", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 1);
        assert_eq!(json["method"], "shutdown");
        assert!(
            json.get("params").is_none(),
            "params must be omitted, not null"
        );
    }

    #[test]
    fn test_notification_serialization() {
        let notif = Notification::new("initialized", Some(serde_json::json!({})));
        let json = serde_json::to_value(&notif).unwrap();
        assert_eq!(json["method"], "initialized");
        assert!(json.get("id").is_none());
        assert!(json.get("params").is_some());
    }

    #[test]
    fn test_method_not_found_reply() {
        let reply = method_not_found(&serde_json::json!(5), "client/registerCapability");
        assert_eq!(reply["id"], 5);
        assert_eq!(reply["error"]["code"], -32601);
        assert!(
            reply["error"]["message"]
                .as_str()
                .unwrap()
                .contains("client/registerCapability")
        );
    }

    #[test]
    fn test_path_to_file_uri_and_back() {
        #[cfg(windows)]
        let path = PathBuf::from(r"C:\Users\test\src\main.cpp");
        #[cfg(not(windows))]
        let path = PathBuf::from("/home/test/src/main.cpp");

        let uri = path_to_file_uri(&path).expect("should create URI");
        let roundtrip = file_uri_to_path(uri.as_str()).expect("should parse back to path");
        assert_eq!(roundtrip, path);
    }

    #[test]
    fn test_file_uri_to_path_non_file_scheme() {
        assert!(file_uri_to_path("https://example.com/test.cpp").is_none());
        assert!(file_uri_to_path("not-a-uri").is_none());
    }
}
