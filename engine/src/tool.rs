//! External refactoring tool invocation.
//!
//! The tool is opaque: we only build its command line and judge the exit code.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Cap on captured stdout/stderr per stream.
const MAX_OUTPUT_BYTES: usize = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to launch {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("refactoring tool failed ({})", exit_label(.code))]
    Failed { code: Option<i32>, stderr: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by a signal".to_string(),
    }
}

/// One command-line argument. `Quoted` values are shown wrapped in double
/// quotes but passed to the process verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolArg {
    Plain(String),
    Quoted(String),
}

impl ToolArg {
    /// The value the process receives.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            ToolArg::Plain(v) | ToolArg::Quoted(v) => v,
        }
    }

    /// The form shown to users.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            ToolArg::Plain(v) => v.clone(),
            ToolArg::Quoted(v) => format!("\"{v}\""),
        }
    }
}

/// Everything about a tool run that does not depend on the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTemplate {
    program: PathBuf,
    workspace_root: PathBuf,
    build_dir: PathBuf,
    clang_extra_args: Vec<String>,
    extra_args: Vec<String>,
}

impl ToolTemplate {
    #[must_use]
    pub fn new(
        program: PathBuf,
        workspace_root: PathBuf,
        build_dir: PathBuf,
        clang_extra_args: Vec<String>,
        extra_args: Vec<String>,
    ) -> Self {
        Self {
            program,
            workspace_root,
            build_dir,
            clang_extra_args,
            extra_args,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &recpp_config::Settings) -> Self {
        Self::new(
            settings.recpp_path.clone(),
            settings.workspace_root.clone(),
            settings.build_dir.clone(),
            settings.clang_extra_args.clone(),
            settings.extra_args.clone(),
        )
    }

    /// Bind the template to a symbol at a byte offset in `file`.
    ///
    /// `-s <symbol> -f <file> -o <offset> --workspace-folder <root> -p <build dir> <file>`,
    /// then `--extra-arg "<arg>"` per compiler argument and `"<arg>"` per tool argument.
    #[must_use]
    pub fn bind(&self, symbol: &str, file: &Path, byte_offset: usize) -> ToolInvocation {
        let file = file.to_string_lossy().into_owned();
        let mut args = vec![
            ToolArg::Plain("-s".to_string()),
            ToolArg::Plain(symbol.to_string()),
            ToolArg::Plain("-f".to_string()),
            ToolArg::Plain(file.clone()),
            ToolArg::Plain("-o".to_string()),
            ToolArg::Plain(byte_offset.to_string()),
            ToolArg::Plain("--workspace-folder".to_string()),
            ToolArg::Plain(self.workspace_root.to_string_lossy().into_owned()),
            ToolArg::Plain("-p".to_string()),
            ToolArg::Plain(self.build_dir.to_string_lossy().into_owned()),
            ToolArg::Plain(file),
        ];
        for arg in &self.clang_extra_args {
            args.push(ToolArg::Plain("--extra-arg".to_string()));
            args.push(ToolArg::Quoted(arg.clone()));
        }
        for arg in &self.extra_args {
            args.push(ToolArg::Quoted(arg.clone()));
        }

        ToolInvocation {
            program: self.program.clone(),
            cwd: self.workspace_root.clone(),
            args,
        }
    }
}

/// Captured output of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A fully bound tool command, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    program: PathBuf,
    cwd: PathBuf,
    args: Vec<ToolArg>,
}

impl ToolInvocation {
    #[must_use]
    pub fn new(program: PathBuf, cwd: PathBuf, args: Vec<ToolArg>) -> Self {
        Self { program, cwd, args }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[ToolArg] {
        &self.args
    }

    /// Arguments in display form (quoted where applicable).
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        self.args.iter().map(ToolArg::display).collect()
    }

    #[must_use]
    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.display());
        }
        line
    }

    /// Run to completion. Exit code 0 is success; anything else fails with
    /// the captured stderr. Never retried.
    pub async fn run(&self) -> Result<ToolOutput, ToolError> {
        tracing::info!("Running refactoring tool: {}", self.command_line());

        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(ToolArg::value))
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_to_end_limited(out, MAX_OUTPUT_BYTES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_to_end_limited(err, MAX_OUTPUT_BYTES)));

        let status = child.wait().await.map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;

        if !stdout.is_empty() {
            tracing::debug!("recpp stdout:\n{stdout}");
        }
        if !stderr.is_empty() {
            tracing::debug!("recpp stderr:\n{stderr}");
        }

        if status.success() {
            tracing::info!("Refactoring tool finished");
            Ok(ToolOutput { stdout, stderr })
        } else {
            tracing::warn!(code = ?status.code(), "Refactoring tool failed");
            Err(ToolError::Failed {
                code: status.code(),
                stderr,
            })
        }
    }
}

async fn collect(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    let bytes = match task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

async fn read_to_end_limited<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    max_bytes: usize,
) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];

    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        // Keep draining past the cap so the child never blocks on a full pipe.
        let take = max_bytes.saturating_sub(buf.len()).min(n);
        buf.extend_from_slice(&tmp[..take]);
    }

    buf
}
