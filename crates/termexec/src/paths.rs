use std::path::{Path, PathBuf};

use crate::errors::TerminalError;

/// Path construction for the `~/.termexec/` directory layout.
///
/// Use `resolve()` in production code and `from_dir()` in tests.
#[derive(Debug, Clone)]
pub struct TermexecPaths {
    base_dir: PathBuf,
}

impl TermexecPaths {
    /// Resolve paths from the user's home directory (`~/.termexec`).
    pub fn resolve() -> Result<Self, TerminalError> {
        let home = dirs::home_dir().ok_or_else(|| {
            TerminalError::Config("home directory not found, set $HOME".to_string())
        })?;
        Ok(Self {
            base_dir: home.join(".termexec"),
        })
    }

    /// Create paths from an explicit base directory. Use in tests.
    pub fn from_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn user_config(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }
}
