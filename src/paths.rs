//! Project-local persisted state layout. All paths are resolved against a
//! `project_root` captured once at startup — never re-derived from the
//! current working directory, so a `cd` elsewhere mid-run can't drift them.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }

    /// `<root>/.oak/ci/`
    pub fn ci_dir(&self) -> PathBuf {
        self.root.join(".oak").join("ci")
    }

    /// `<root>/.oak/ci/activities.db`
    pub fn activities_db(&self) -> PathBuf {
        self.ci_dir().join("activities.db")
    }

    /// `<root>/.oak/ci/chroma/`
    pub fn vector_index_dir(&self) -> PathBuf {
        self.ci_dir().join("chroma")
    }

    /// `<root>/.oak/ci/chroma/index.db`
    pub fn vector_index_db(&self) -> PathBuf {
        self.vector_index_dir().join("index.db")
    }

    pub fn daemon_log_prefix(&self) -> &'static str {
        "daemon"
    }

    pub fn hooks_log_prefix(&self) -> &'static str {
        "hooks"
    }

    /// `<root>/.oak/ci/.daemon_token`
    pub fn daemon_token(&self) -> PathBuf {
        self.ci_dir().join(".daemon_token")
    }

    /// `<root>/.oak/ci/cli_version`
    pub fn cli_version_stamp(&self) -> PathBuf {
        self.ci_dir().join("cli_version")
    }

    /// `<root>/.oak/ci/install_root`
    pub fn install_root_stamp(&self) -> PathBuf {
        self.ci_dir().join("install_root")
    }

    /// `<root>/.oak/ci/daemon.pid`
    pub fn pid_file(&self) -> PathBuf {
        self.ci_dir().join("daemon.pid")
    }

    /// `<root>/.oak/ci/daemon.port`
    pub fn port_file(&self) -> PathBuf {
        self.ci_dir().join("daemon.port")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("oak-ci.toml")
    }

    /// `<root>/oak/history/` unless overridden by `OAK_CI_BACKUP_DIR`.
    pub fn backup_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var("OAK_CI_BACKUP_DIR") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        self.root.join("oak").join("history")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.ci_dir())?;
        std::fs::create_dir_all(self.vector_index_dir())?;
        std::fs::create_dir_all(self.backup_dir())?;
        Ok(())
    }
}

/// The `{user}` component of a backup filename: whichever of `USER`/`USERNAME`
/// the OS sets for the account running the daemon, falling back to `"user"`
/// when neither is set (e.g. a stripped container environment).
pub fn backup_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "user".to_string())
}

/// Resolves the project root: explicit override, `OAK_CI_PROJECT_ROOT`, or
/// walk up from the current directory looking for `.git`.
pub fn resolve_project_root(explicit: Option<PathBuf>) -> std::io::Result<PathBuf> {
    if let Some(p) = explicit {
        return p.canonicalize();
    }
    if let Ok(env_root) = std::env::var("OAK_CI_PROJECT_ROOT") {
        if !env_root.is_empty() {
            return PathBuf::from(env_root).canonicalize();
        }
    }
    let cwd = std::env::current_dir()?;
    Ok(find_git_root(&cwd).unwrap_or(cwd))
}

fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut cur = Some(start);
    while let Some(dir) = cur {
        if dir.join(".git").exists() {
            return Some(dir.to_path_buf());
        }
        cur = dir.parent();
    }
    None
}
