//! Oracle configuration: directories, backends, shader tools and reducers.
//!
//! The configuration is a single TOML file. Backend `code` values are part
//! of the file so that signatures are stable across processes and test
//! fixtures need no global reset.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendSpec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode `{path}`: {message}")]
    Decode { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no backend named `{0}` configured")]
    UnknownBackend(String),

    #[error("no reducer named `{0}` configured")]
    UnknownReducer(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirSettings {
    /// Scratch directory every compilation and reduction runs in.
    pub work_dir: PathBuf,
    pub shader_output_dir: PathBuf,
    pub dump_buffer_dir: PathBuf,
    pub kept_buffer_dir: PathBuf,
    pub kept_shader_dir: PathBuf,
}

/// External collaborators invoked as subprocesses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorSettings {
    pub generator: String,
    pub reconditioner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderToolConfig {
    pub name: String,
    pub path: String,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerConfig {
    pub name: String,
    /// Launch command, shell-tokenized verbatim at invocation time.
    pub command: String,
    pub interestingness_test: String,
    pub input_file: String,
    pub output_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    pub dirs: DirSettings,
    pub collaborators: CollaboratorSettings,
    pub backends: Vec<BackendSpec>,
    pub shader_tools: Vec<ShaderToolConfig>,
    pub reducers: Vec<ReducerConfig>,
}

impl OracleConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|error| ConfigError::Decode {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one backend must be configured".to_string(),
            ));
        }
        if self.shader_tools.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one shader tool must be configured".to_string(),
            ));
        }
        if self.reducers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one reducer must be configured".to_string(),
            ));
        }

        let mut names = BTreeSet::new();
        let mut codes = BTreeSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "backend name must not be empty".to_string(),
                ));
            }
            if !names.insert(backend.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "backend name `{}` appears more than once",
                    backend.name
                )));
            }
            if backend.code == 0 {
                return Err(ConfigError::Invalid(format!(
                    "backend `{}` has code 0 (codes start at 1)",
                    backend.name
                )));
            }
            if !codes.insert(backend.code) {
                return Err(ConfigError::Invalid(format!(
                    "backend `{}` reuses code {}",
                    backend.name, backend.code
                )));
            }
        }
        for tool in &self.shader_tools {
            if crate::harness::format_for(&tool.name).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "shader tool `{}` has no supported embedding format",
                    tool.name
                )));
            }
        }
        Ok(())
    }

    /// Restrict the active backend set, preserving declaration order.
    /// An empty restriction keeps every configured backend.
    pub fn restrict_backends(&self, names: &[String]) -> Result<Vec<BackendSpec>, ConfigError> {
        if names.is_empty() {
            return Ok(self.backends.clone());
        }
        for name in names {
            if !self.backends.iter().any(|backend| backend.name == *name) {
                return Err(ConfigError::UnknownBackend(name.clone()));
            }
        }
        Ok(self
            .backends
            .iter()
            .filter(|backend| names.contains(&backend.name))
            .cloned()
            .collect())
    }

    /// An empty name selects the first configured reducer; an unknown name
    /// is an error.
    pub fn select_reducer(&self, name: &str) -> Result<&ReducerConfig, ConfigError> {
        if name.is_empty() {
            return Ok(&self.reducers[0]);
        }
        self.reducers
            .iter()
            .find(|reducer| reducer.name == name)
            .ok_or_else(|| ConfigError::UnknownReducer(name.to_string()))
    }

    /// An empty or unrecognized name falls back to the first configured tool
    /// with a printed notice, matching the historical behavior reducers
    /// depend on.
    pub fn select_shader_tool(&self, name: &str) -> &ShaderToolConfig {
        if let Some(tool) = self.shader_tools.iter().find(|tool| tool.name == name) {
            return tool;
        }
        if !name.is_empty() {
            println!(
                "Host tool `{name}` not configured, defaulting to: {}",
                self.shader_tools[0].name
            );
        }
        &self.shader_tools[0]
    }
}
