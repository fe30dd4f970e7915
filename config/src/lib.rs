//! Configuration for recpp.
//!
//! Settings are read from TOML files, highest precedence first:
//! `<workspace>/.recpp.toml`, then `<config dir>/recpp/config.toml`. Keys set in
//! a higher layer win individually. [`RecppConfig::resolve`] validates the
//! merged result against the filesystem and produces [`Settings`].

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is not configured")]
    Missing { key: &'static str },
    #[error("'{}' does not exist (from {key})", path.display())]
    NotFound { key: &'static str, path: PathBuf },
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// One configuration layer as written on disk. Every key is optional here;
/// requirements are enforced by [`RecppConfig::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecppConfig {
    /// Directory holding `compile_commands.json`. Supports `${workspaceFolder}`.
    pub build_dir: Option<String>,
    pub clangd_path: Option<String>,
    /// The external refactoring tool.
    pub recpp_path: Option<String>,
    /// Passed to the tool as `--extra-arg "<arg>"` each.
    pub clang_extra_args: Option<Vec<String>>,
    /// Appended to the tool's command line as `"<arg>"` each.
    pub extra_args: Option<Vec<String>>,
    pub request_timeout_secs: Option<u64>,
}

/// Validated configuration for one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub workspace_root: PathBuf,
    pub build_dir: PathBuf,
    pub clangd_path: PathBuf,
    pub recpp_path: PathBuf,
    pub clang_extra_args: Vec<String>,
    pub extra_args: Vec<String>,
    pub request_timeout: Duration,
}

impl RecppConfig {
    /// Load and merge the workspace and user configuration files.
    pub fn load(workspace_root: &Path) -> Result<Self, ConfigError> {
        let mut paths = vec![workspace_config_path(workspace_root)];
        paths.extend(user_config_path());
        Self::load_from(&paths)
    }

    /// Merge the given files, highest precedence first. Missing files are skipped.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = Self::default();
        for path in paths.iter().rev() {
            if let Some(layer) = Self::from_file(path)? {
                tracing::debug!("Loaded config layer from {}", path.display());
                merged = layer.layered_over(merged);
            }
        }
        Ok(merged)
    }

    /// Parse a single file. `Ok(None)` when it does not exist.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Keys set in `self` win; unset keys fall through to `lower`.
    #[must_use]
    pub fn layered_over(self, lower: Self) -> Self {
        Self {
            build_dir: self.build_dir.or(lower.build_dir),
            clangd_path: self.clangd_path.or(lower.clangd_path),
            recpp_path: self.recpp_path.or(lower.recpp_path),
            clang_extra_args: self.clang_extra_args.or(lower.clang_extra_args),
            extra_args: self.extra_args.or(lower.extra_args),
            request_timeout_secs: self.request_timeout_secs.or(lower.request_timeout_secs),
        }
    }

    /// Validate against the filesystem. Fails on the first empty or
    /// nonexistent path.
    pub fn resolve(&self, workspace_root: &Path) -> Result<Settings, ConfigError> {
        let build_dir = required_path("build_dir", self.build_dir.as_deref(), workspace_root)?;
        let clangd_path =
            required_path("clangd_path", self.clangd_path.as_deref(), workspace_root)?;
        let recpp_path = required_path("recpp_path", self.recpp_path.as_deref(), workspace_root)?;

        let request_timeout_secs = self
            .request_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        Ok(Settings {
            workspace_root: workspace_root.to_path_buf(),
            build_dir,
            clangd_path,
            recpp_path,
            clang_extra_args: self.clang_extra_args.clone().unwrap_or_default(),
            extra_args: self.extra_args.clone().unwrap_or_default(),
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }
}

#[must_use]
pub fn workspace_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".recpp.toml")
}

#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("recpp").join("config.toml"))
}

fn required_path(
    key: &'static str,
    value: Option<&str>,
    workspace_root: &Path,
) -> Result<PathBuf, ConfigError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { key })?;

    let path = PathBuf::from(expand_placeholders(value, workspace_root));
    let path = if path.is_relative() {
        workspace_root.join(path)
    } else {
        path
    };

    if !path.exists() {
        return Err(ConfigError::NotFound { key, path });
    }
    Ok(path)
}

/// Expand `${workspaceFolder}` to the workspace root and `${VAR}` to the
/// environment variable (empty when unset). An unclosed `${` is kept as is.
#[must_use]
pub fn expand_placeholders(value: &str, workspace_root: &Path) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let var = &after[..close];
        if var == "workspaceFolder" {
            out.push_str(&workspace_root.to_string_lossy());
        } else if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    /// Workspace with a build dir and stand-ins for both executables.
    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("build")).unwrap();
        write(&dir.path().join("bin/clangd"), "");
        write(&dir.path().join("bin/recpp"), "");
        dir
    }

    fn complete() -> RecppConfig {
        RecppConfig {
            build_dir: Some("${workspaceFolder}/build".to_string()),
            clangd_path: Some("bin/clangd".to_string()),
            recpp_path: Some("bin/recpp".to_string()),
            ..RecppConfig::default()
        }
    }

    #[test]
    fn load_from_missing_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecppConfig::load_from(&[dir.path().join("nope.toml")]).unwrap();
        assert_eq!(config, RecppConfig::default());
    }

    #[test]
    fn workspace_layer_wins_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("ws/.recpp.toml");
        let user = dir.path().join("user/config.toml");
        write(
            &workspace,
            "build_dir = \"out\"\nextra_args = [\"--verbose\"]\n",
        );
        write(
            &user,
            "build_dir = \"build\"\nclangd_path = \"/usr/bin/clangd\"\nrequest_timeout_secs = 5\n",
        );

        let config = RecppConfig::load_from(&[workspace, user]).unwrap();
        assert_eq!(config.build_dir.as_deref(), Some("out"));
        assert_eq!(config.clangd_path.as_deref(), Some("/usr/bin/clangd"));
        assert_eq!(config.extra_args, Some(vec!["--verbose".to_string()]));
        assert_eq!(config.request_timeout_secs, Some(5));
        assert_eq!(config.recpp_path, None);
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".recpp.toml");
        write(&path, "build_dir = [\n");

        let err = RecppConfig::from_file(&path).unwrap_err();
        assert!(matches!(&err, ConfigError::Parse { path: p, .. } if *p == path));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".recpp.toml");
        write(&path, "buildDir = \"build\"\n");
        assert!(matches!(
            RecppConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn resolve_complete_config() {
        let ws = workspace();
        let settings = complete().resolve(ws.path()).unwrap();

        assert_eq!(settings.build_dir, PathBuf::from(format!("{}/build", ws.path().display())));
        assert_eq!(settings.clangd_path, ws.path().join("bin/clangd"));
        assert_eq!(settings.recpp_path, ws.path().join("bin/recpp"));
        assert!(settings.clang_extra_args.is_empty());
        assert!(settings.extra_args.is_empty());
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn resolve_reports_empty_keys() {
        let ws = workspace();
        let mut config = complete();
        config.build_dir = Some("  ".to_string());
        assert!(matches!(
            config.resolve(ws.path()),
            Err(ConfigError::Missing { key: "build_dir" })
        ));

        let mut config = complete();
        config.recpp_path = None;
        assert!(matches!(
            config.resolve(ws.path()),
            Err(ConfigError::Missing { key: "recpp_path" })
        ));
    }

    #[test]
    fn resolve_reports_nonexistent_paths() {
        let ws = workspace();
        let mut config = complete();
        config.clangd_path = Some("/definitely/not/clangd".to_string());

        match config.resolve(ws.path()) {
            Err(ConfigError::NotFound { key, path }) => {
                assert_eq!(key, "clangd_path");
                assert_eq!(path, PathBuf::from("/definitely/not/clangd"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let ws = workspace();
        let mut config = complete();
        config.request_timeout_secs = Some(0);
        let settings = config.resolve(ws.path()).unwrap();
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn expand_workspace_folder() {
        let root = Path::new("/work/project");
        assert_eq!(
            expand_placeholders("${workspaceFolder}/build", root),
            "/work/project/build"
        );
        assert_eq!(expand_placeholders("plain/path", root), "plain/path");
    }

    #[test]
    fn expand_env_var_and_unclosed_brace() {
        unsafe {
            std::env::set_var("RECPP_TEST_BUILD_ROOT", "/opt/builds");
        }
        let root = Path::new("/work");
        assert_eq!(
            expand_placeholders("${RECPP_TEST_BUILD_ROOT}/debug", root),
            "/opt/builds/debug"
        );
        assert_eq!(expand_placeholders("${UNCLOSED", root), "${UNCLOSED");
        unsafe {
            std::env::remove_var("RECPP_TEST_BUILD_ROOT");
        }
    }
}
