//! Refactoring decisions for C++ sources.
//!
//! [`RefactorProvider`] is the entry point: it keeps a clangd session per
//! workspace, classifies the symbol under the cursor through semantic tokens
//! and asks [`actions::decide`] which refactorings apply.

pub mod actions;
pub mod provider;
pub mod scan;
pub mod tool;

pub use actions::{ActionContext, ActionKind, REFACTOR_KIND, RefactorAction, SourceKind, decide};
pub use provider::{ProviderError, RefactorProvider};
pub use tool::{ToolArg, ToolError, ToolInvocation, ToolOutput, ToolTemplate};
