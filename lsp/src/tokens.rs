//! Semantic token cache: per-document decoded tokens keyed by URI and version.

use std::collections::HashMap;

use serde::Deserialize;

/// Number of integers per encoded token.
const TOKEN_STRIDE: usize = 5;

/// Name tables that give meaning to token type/modifier indices.
///
/// Received once from the server's `initialize` response and never changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenLegend {
    token_types: Vec<String>,
    #[serde(default)]
    token_modifiers: Vec<String>,
}

impl TokenLegend {
    #[must_use]
    pub fn new(token_types: Vec<String>, token_modifiers: Vec<String>) -> Self {
        Self {
            token_types,
            token_modifiers,
        }
    }

    /// Type name for an index, `None` when the server sent an index outside the legend.
    #[must_use]
    pub fn token_type(&self, index: u32) -> Option<&str> {
        self.token_types.get(index as usize).map(String::as_str)
    }

    #[must_use]
    pub fn token_types(&self) -> &[String] {
        &self.token_types
    }

    #[must_use]
    pub fn token_modifiers(&self) -> &[String] {
        &self.token_modifiers
    }
}

/// One decoded token at an absolute position.
///
/// The modifier bitmask is carried raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticToken {
    /// 0-indexed line.
    pub line: u32,
    /// Start column in UTF-16 code units.
    pub start: u32,
    pub length: u32,
    pub token_type: u32,
    pub modifiers: u32,
}

impl SemanticToken {
    /// Inclusive on both ends: a cursor right after the last character still hits.
    #[must_use]
    pub fn contains(&self, line: u32, column: u32) -> bool {
        self.line == line
            && column >= self.start
            && u64::from(column) <= u64::from(self.start) + u64::from(self.length)
    }
}

/// Decode the relative encoding used by `textDocument/semanticTokens`.
///
/// Lines accumulate by `deltaLine`. The start column resets to the raw delta
/// whenever the line advances and otherwise accumulates on the previous start.
/// A trailing partial tuple is ignored.
#[must_use]
pub fn decode_tokens(data: &[u32]) -> Vec<SemanticToken> {
    let mut tokens = Vec::with_capacity(data.len() / TOKEN_STRIDE);
    let mut line: u32 = 0;
    let mut start: u32 = 0;

    for chunk in data.chunks_exact(TOKEN_STRIDE) {
        let delta_line = chunk[0];
        let delta_start = chunk[1];

        if delta_line == 0 {
            start = start.saturating_add(delta_start);
        } else {
            line = line.saturating_add(delta_line);
            start = delta_start;
        }

        tokens.push(SemanticToken {
            line,
            start,
            length: chunk[2],
            token_type: chunk[3],
            modifiers: chunk[4],
        });
    }

    if data.len() % TOKEN_STRIDE != 0 {
        tracing::debug!(
            len = data.len(),
            "Semantic token data is not a multiple of {TOKEN_STRIDE}; ignoring tail"
        );
    }

    tokens
}

/// Decoded tokens for one version of one document.
#[derive(Debug, Clone)]
pub struct DocumentTokenState {
    version: i32,
    tokens: Vec<SemanticToken>,
    lines: Vec<String>,
}

impl DocumentTokenState {
    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    #[must_use]
    pub fn tokens(&self) -> &[SemanticToken] {
        &self.tokens
    }

    /// Source text covered by a token, sliced from the stored line array.
    #[must_use]
    pub fn token_text(&self, token: &SemanticToken) -> Option<String> {
        let line = self.lines.get(token.line as usize)?;
        let utf16: Vec<u16> = line.encode_utf16().collect();
        let start = token.start as usize;
        let end = start.checked_add(token.length as usize)?;
        let slice = utf16.get(start..end)?;
        String::from_utf16(slice).ok()
    }
}

/// Per-session semantic token cache.
///
/// Exactly one entry per URI; a newer version replaces the old entry
/// wholesale, so stale tokens are never queried.
#[derive(Debug, Default)]
pub struct SemanticTokenIndex {
    legend: TokenLegend,
    documents: HashMap<String, DocumentTokenState>,
}

impl SemanticTokenIndex {
    #[must_use]
    pub fn new(legend: TokenLegend) -> Self {
        Self {
            legend,
            documents: HashMap::new(),
        }
    }

    #[must_use]
    pub fn legend(&self) -> &TokenLegend {
        &self.legend
    }

    /// Decode `data` and store it for `uri` at `version`.
    ///
    /// An upsert older than the cached version is ignored.
    pub fn upsert(&mut self, uri: &str, version: i32, source: &str, data: &[u32]) {
        if let Some(existing) = self.documents.get(uri)
            && existing.version > version
        {
            tracing::debug!(
                uri,
                cached = existing.version,
                incoming = version,
                "Ignoring semantic tokens for stale document version"
            );
            return;
        }

        let tokens = decode_tokens(data);
        tracing::trace!(uri, version, count = tokens.len(), "Indexed semantic tokens");
        self.documents.insert(
            uri.to_string(),
            DocumentTokenState {
                version,
                tokens,
                lines: source.split('\n').map(String::from).collect(),
            },
        );
    }

    /// Token type name at a position, or `None` when nothing is classified there.
    ///
    /// Linear scan; the first token containing the position wins.
    #[must_use]
    pub fn query(&self, uri: &str, line: u32, column: u32) -> Option<&str> {
        let state = self.documents.get(uri)?;
        let token = state.tokens.iter().find(|t| t.contains(line, column))?;
        self.legend.token_type(token.token_type)
    }

    /// `true` unless tokens for exactly `version` are cached.
    #[must_use]
    pub fn needs_refresh(&self, uri: &str, version: i32) -> bool {
        self.documents
            .get(uri)
            .is_none_or(|state| state.version != version)
    }

    #[must_use]
    pub fn document(&self, uri: &str) -> Option<&DocumentTokenState> {
        self.documents.get(uri)
    }

    pub fn remove(&mut self, uri: &str) {
        self.documents.remove(uri);
    }
}
