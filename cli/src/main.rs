//! recpp CLI - stands in for an editor.
//!
//! Opens one file, asks the refactor provider what can be done at a position,
//! prints the numbered list and optionally runs one of the actions.
//!
//! ```text
//! recpp actions src/widget.h --line 12 --character 8
//! recpp actions src/widget.h --line 12 --character 8 --apply 0
//! ```
//!
//! Logs go to stderr (`RECPP_LOG`, then `RUST_LOG`; default `info`), so stdout
//! only carries results.

use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use recpp_engine::{ProviderError, RefactorAction, RefactorProvider, ToolError};
use recpp_lsp::{LspPosition, TextDocument};

#[derive(Parser)]
#[command(name = "recpp", version, about = "Suggest and run C++ refactorings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List refactoring actions available at a position
    Actions {
        /// Source or header file
        file: PathBuf,
        /// 0-based line
        #[arg(long)]
        line: u32,
        /// 0-based column in UTF-16 code units
        #[arg(long)]
        character: u32,
        /// Workspace root (defaults to the current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Run the action with this index
        #[arg(long)]
        apply: Option<usize>,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env("RECPP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "Logging initialized");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Command::Actions {
            file,
            line,
            character,
            workspace,
            apply,
        } => {
            let workspace = match workspace {
                Some(dir) => dir,
                None => env::current_dir().context("failed to get current directory")?,
            };
            run_actions(&file, LspPosition::new(line, character), &workspace, apply).await
        }
    }
}

async fn run_actions(
    file: &Path,
    position: LspPosition,
    workspace: &Path,
    apply: Option<usize>,
) -> Result<()> {
    let file = file
        .canonicalize()
        .with_context(|| format!("failed to resolve {}", file.display()))?;
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("failed to resolve workspace {}", workspace.display()))?;
    let text =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let document = TextDocument::from_path(&file, "cpp", 1, text)?;

    tracing::info!(
        file = %file.display(),
        workspace = %workspace.display(),
        line = position.line,
        character = position.character,
        "Looking up refactoring actions"
    );
    let mut provider = RefactorProvider::new();
    let outcome = list_and_apply(&mut provider, &workspace, &document, position, apply).await;
    provider.shutdown().await;
    outcome
}

async fn list_and_apply(
    provider: &mut RefactorProvider,
    workspace: &Path,
    document: &TextDocument,
    position: LspPosition,
    apply: Option<usize>,
) -> Result<()> {
    let actions = match provider
        .provide_actions(Some(workspace), document, position)
        .await
    {
        Ok(actions) => actions,
        Err(err) => {
            tracing::warn!("Could not compute refactoring actions: {err}");
            return Err(err.into());
        }
    };

    if actions.is_empty() {
        println!("No refactoring actions available");
    }
    for (index, action) in actions.iter().enumerate() {
        print_action(index, action);
    }

    let Some(index) = apply else {
        return Ok(());
    };
    let Some(action) = actions.get(index) else {
        bail!("no action with index {index}");
    };

    match provider.execute(action).await {
        Ok(output) => {
            print!("{}", output.stdout);
            println!("Applied: {}", action.title());
            Ok(())
        }
        Err(ProviderError::Tool(err)) => {
            tracing::warn!(action = action.title(), "Refactoring tool failed: {err}");
            if let ToolError::Failed { stderr, .. } = &err {
                eprint!("{stderr}");
            }
            Err(err).with_context(|| format!("'{}' failed", action.title()))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_action(index: usize, action: &RefactorAction) {
    match &action.command {
        Some(command) => println!("{index}: {}\n     {}", action.title(), command.command_line()),
        None => println!("{index}: {}", action.title()),
    }
}
