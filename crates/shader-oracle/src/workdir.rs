//! Explicit working-directory handle.
//!
//! Every filesystem effect of a compilation or reduction step goes through
//! a [`WorkDir`] instead of the ambient current directory, so callers in
//! different directories can never collide. Listings are sorted to keep
//! downstream group construction deterministic.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::OracleError;

#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>, OracleError> {
        let path = self.path(name);
        fs::read(&path).map_err(|source| OracleError::io("failed to read", &path, source))
    }

    pub fn read_text(&self, name: &str) -> Result<String, OracleError> {
        let path = self.path(name);
        fs::read_to_string(&path).map_err(|source| OracleError::io("failed to read", &path, source))
    }

    pub fn write(&self, name: &str, contents: &[u8]) -> Result<(), OracleError> {
        let path = self.path(name);
        fs::write(&path, contents).map_err(|source| OracleError::io("failed to write", &path, source))
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<(), OracleError> {
        let from_path = self.path(from);
        let to_path = self.path(to);
        fs::rename(&from_path, &to_path)
            .map_err(|source| OracleError::io("failed to rename", &from_path, source))
    }

    /// File names under the root starting with `prefix`, sorted.
    pub fn files_with_prefix(&self, prefix: &str) -> Result<Vec<String>, OracleError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|source| OracleError::io("failed to list", &self.root, source))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| OracleError::io("failed to list", &self.root, source))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_file() && name.starts_with(prefix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn buffer_dumps(&self) -> Result<Vec<String>, OracleError> {
        self.files_with_prefix("buffer_")
    }

    /// Per-buffer dump files (`buffer_<digits>…`), ordered by the numeric
    /// index, which follows buffer declaration order in the shader.
    pub fn numbered_buffer_dumps(&self) -> Result<Vec<String>, OracleError> {
        let mut numbered: Vec<(u64, String)> = self
            .buffer_dumps()?
            .into_iter()
            .filter_map(|name| dump_index(&name).map(|index| (index, name)))
            .collect();
        numbered.sort();
        Ok(numbered.into_iter().map(|(_, name)| name).collect())
    }

    /// Concatenate dump files in the given order into one buffer.
    pub fn concatenate(&self, names: &[String]) -> Result<Vec<u8>, OracleError> {
        let mut combined = Vec::new();
        for name in names {
            combined.extend(self.read(name)?);
        }
        Ok(combined)
    }

    /// Remove a set of files; files already gone are tolerated silently.
    pub fn remove_files(&self, names: &[String]) {
        for name in names {
            let path = self.path(name);
            if path.is_file() {
                let _ = fs::remove_file(path);
            }
        }
    }

    /// Move a file into another directory, keeping its name. Falls back to
    /// copy-and-remove when a plain rename crosses filesystems.
    pub fn move_to(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, OracleError> {
        let from = self.path(name);
        let to = dest_dir.join(name);
        if fs::rename(&from, &to).is_err() {
            fs::copy(&from, &to).map_err(|source| OracleError::io("failed to copy", &from, source))?;
            fs::remove_file(&from)
                .map_err(|source| OracleError::io("failed to remove", &from, source))?;
        }
        Ok(to)
    }
}

fn dump_index(name: &str) -> Option<u64> {
    let rest = name.strip_prefix("buffer_")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
