use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::TidemarkConfig;

/// Project context for tidemark commands
pub struct ProjectContext {
    /// Root directory of the project (where Cargo.toml is)
    pub project_root: PathBuf,
    /// Path to .tidemark directory
    pub tidemark_dir: PathBuf,
    /// Path to config file
    pub config_path: PathBuf,
}

impl ProjectContext {
    /// Find project context from current directory or ancestors
    pub fn find() -> Result<Self> {
        let current_dir = std::env::current_dir().context("Failed to get current directory")?;
        Self::find_from(&current_dir)
    }

    /// Find project context starting from the given directory
    pub fn find_from(start: &Path) -> Result<Self> {
        let project_root = Self::find_project_root(start)?;
        Ok(Self::from_root(project_root))
    }

    pub fn from_root(project_root: PathBuf) -> Self {
        let tidemark_dir = project_root.join(".tidemark");
        let config_path = tidemark_dir.join("config.toml");
        Self {
            project_root,
            tidemark_dir,
            config_path,
        }
    }

    /// Find project root by looking for Cargo.toml
    fn find_project_root(start: &Path) -> Result<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            if current.join("Cargo.toml").exists() {
                return Ok(current);
            }

            if !current.pop() {
                anyhow::bail!(
                    "Could not find Cargo.toml in {start:?} or any parent directory. \
                     Are you in a Rust project?"
                );
            }
        }
    }

    /// Check if tidemark is initialized in this project
    pub fn is_initialized(&self) -> bool {
        self.config_path.exists()
    }

    /// Load and validate `.tidemark/config.toml`
    pub fn load_config(&self) -> Result<TidemarkConfig> {
        TidemarkConfig::load(&self.config_path)
            .with_context(|| format!("Failed to load {}", self.config_path.display()))
    }

    /// Write `config` to `.tidemark/config.toml`, creating the directory if needed
    pub fn write_config(&self, config: &TidemarkConfig) -> Result<()> {
        std::fs::create_dir_all(&self.tidemark_dir)
            .with_context(|| format!("Failed to create {}", self.tidemark_dir.display()))?;
        let content = config.to_toml()?;
        std::fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write {}", self.config_path.display()))
    }
}
