//! Action decisions: which refactorings make sense at a cursor.
//!
//! Combines the semantic type of the symbol under the cursor with lexical
//! scans of the surrounding source.

use std::path::Path;

use crate::scan;
use crate::tool::{ToolInvocation, ToolTemplate};

/// Code action kind reported for every action.
pub const REFACTOR_KIND: &str = "refactor";

const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx", "c++", "C"];
const HEADER_EXTENSIONS: &[&str] = &["h", "hpp", "hh", "hxx", "h++"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    MoveDefinitionToHeader,
    MoveDefinitionIntoClass,
    MoveDefinitionToSource,
    MoveDefinitionOutOfClass,
    MoveToNewFile,
    MoveAllToSource,
    MoveAllToHeader,
    ImplementVirtuals,
}

impl ActionKind {
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            ActionKind::MoveDefinitionToHeader => "Move definition to header",
            ActionKind::MoveDefinitionIntoClass => "Move definition into class body",
            ActionKind::MoveDefinitionToSource => "Move definition to source file",
            ActionKind::MoveDefinitionOutOfClass => "Move definition out of class body",
            ActionKind::MoveToNewFile => "Move to new file",
            ActionKind::MoveAllToSource => "Move all member functions to source file",
            ActionKind::MoveAllToHeader => "Move all member functions to header",
            ActionKind::ImplementVirtuals => "Implement virtual functions",
        }
    }
}

/// A refactoring offered at a cursor. Bound actions carry the tool command
/// that performs them; the others are informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefactorAction {
    pub kind: ActionKind,
    pub command: Option<ToolInvocation>,
}

impl RefactorAction {
    fn unbound(kind: ActionKind) -> Self {
        Self {
            kind,
            command: None,
        }
    }

    #[must_use]
    pub fn title(&self) -> &'static str {
        self.kind.title()
    }

    #[must_use]
    pub fn code_action_kind(&self) -> &'static str {
        REFACTOR_KIND
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.command.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Source,
    Header,
    Other,
}

impl SourceKind {
    /// Classify by extension. Case-sensitive, so `.C` is a source file.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return SourceKind::Other;
        };
        if SOURCE_EXTENSIONS.contains(&ext) {
            SourceKind::Source
        } else if HEADER_EXTENSIONS.contains(&ext) {
            SourceKind::Header
        } else {
            SourceKind::Other
        }
    }
}

/// Inputs for one decision.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub text: &'a str,
    pub path: &'a Path,
    /// 0-based line.
    pub line: u32,
    /// UTF-16 column, as in LSP positions.
    pub character: u32,
    /// Semantic token type at the cursor; `None` when unknown.
    pub symbol_type: Option<&'a str>,
}

/// Decide the actions available at the cursor.
#[must_use]
pub fn decide(ctx: &ActionContext<'_>, tool: &ToolTemplate) -> Vec<RefactorAction> {
    let Some(symbol_type) = ctx.symbol_type else {
        return Vec::new();
    };
    let Some(line_start) = scan::line_start(ctx.text, ctx.line) else {
        return Vec::new();
    };
    let line = ctx.text[line_start..].split('\n').next().unwrap_or_default();
    let column = scan::utf16_to_byte(line, ctx.character);

    let Some(word) = scan::word_at(line, column) else {
        tracing::debug!(line = ctx.line, character = ctx.character, "No word at cursor");
        return Vec::new();
    };

    let actions = match symbol_type {
        "function" | "member" => {
            let offset = line_start + column;
            function_actions(ctx, tool, line, column, word, offset)
        }
        "class" => {
            let keyword = scan::preceding_word(line, column);
            if keyword == "class" || keyword == "struct" {
                [
                    ActionKind::MoveToNewFile,
                    ActionKind::MoveAllToSource,
                    ActionKind::MoveAllToHeader,
                    ActionKind::ImplementVirtuals,
                ]
                .into_iter()
                .map(RefactorAction::unbound)
                .collect()
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    };

    tracing::debug!(
        symbol = word,
        symbol_type,
        count = actions.len(),
        "Decided refactoring actions"
    );
    actions
}

fn function_actions(
    ctx: &ActionContext<'_>,
    tool: &ToolTemplate,
    line: &str,
    column: usize,
    word: &str,
    offset: usize,
) -> Vec<RefactorAction> {
    if !scan::is_definition_at_point(ctx.text, offset) {
        return Vec::new();
    }

    let move_to_source = || RefactorAction {
        kind: ActionKind::MoveDefinitionToSource,
        command: Some(tool.bind(word, ctx.path, offset)),
    };

    if scan::preceding_qualifier(line, column) {
        match SourceKind::from_path(ctx.path) {
            SourceKind::Source => vec![
                RefactorAction::unbound(ActionKind::MoveDefinitionToHeader),
                RefactorAction::unbound(ActionKind::MoveDefinitionIntoClass),
            ],
            SourceKind::Header => vec![
                move_to_source(),
                RefactorAction::unbound(ActionKind::MoveDefinitionIntoClass),
            ],
            SourceKind::Other => Vec::new(),
        }
    } else {
        vec![
            move_to_source(),
            RefactorAction::unbound(ActionKind::MoveDefinitionOutOfClass),
        ]
    }
}
