use std::collections::HashMap;
use std::path::PathBuf;

use uuid::Uuid;

use crate::error::StoreError;

/// Flat `KEY=value` file shared with other tooling (a `.env` file).
///
/// Reads go through `dotenvy` without touching the process environment.
/// Writes only touch the keys being upserted; every other line is written
/// back byte-for-byte.
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Missing file reads as empty. Later duplicates of a key win.
    pub fn load(&self) -> Result<HashMap<String, String>, StoreError> {
        let parse_error = |source| StoreError::Parse {
            path: self.path.display().to_string(),
            source,
        };
        let entries = match dotenvy::from_path_iter(&self.path) {
            Ok(entries) => entries,
            Err(error) if error.not_found() => return Ok(HashMap::new()),
            Err(error) => return Err(parse_error(error)),
        };

        let mut values = HashMap::new();
        for entry in entries {
            let (key, value) = entry.map_err(parse_error)?;
            values.insert(key, value);
        }
        Ok(values)
    }

    pub fn contains_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .read_lines()?
            .iter()
            .any(|line| line_key(line) == Some(key)))
    }

    /// Replace the first line for each key in place, drop later duplicates
    /// of the same key, and append keys that were not present.
    pub fn upsert(&self, pairs: &[(&str, &str)]) -> Result<(), StoreError> {
        let lines = self.read_lines()?;
        let mut written: Vec<&str> = Vec::new();
        let mut out: Vec<String> = Vec::with_capacity(lines.len() + pairs.len());

        for line in lines {
            let existing = line_key(&line).and_then(|key| pairs.iter().find(|(k, _)| *k == key));
            match existing {
                Some((key, value)) => {
                    if written.contains(key) {
                        continue;
                    }
                    out.push(format!("{key}={value}"));
                    written.push(*key);
                }
                None => out.push(line),
            }
        }

        for (key, value) in pairs {
            if !written.contains(key) {
                out.push(format!("{key}={value}"));
            }
        }

        let mut contents = out.join("\n");
        contents.push('\n');
        self.write_atomic(&contents)
    }

    fn read_lines(&self) -> Result<Vec<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw.lines().map(str::to_string).collect()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(StoreError::Read {
                path: self.path.display().to_string(),
                source,
            }),
        }
    }

    fn write_atomic(&self, contents: &str) -> Result<(), StoreError> {
        let write_error = |source| StoreError::Write {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "env".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        std::fs::write(&tmp, contents).map_err(write_error)?;
        std::fs::rename(&tmp, &self.path).map_err(|source| {
            let _ = std::fs::remove_file(&tmp);
            write_error(source)
        })
    }
}

/// Key of an assignment line; `None` for comments, blanks and noise.
fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, _) = trimmed.split_once('=')?;
    Some(key.trim()).filter(|key| !key.is_empty())
}
