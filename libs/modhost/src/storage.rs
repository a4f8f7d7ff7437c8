//! Sandboxed per-module storage.
//!
//! Every module gets an isolated directory under
//! `{data_root}/modules/{module_name}/`. All paths handed to this layer are
//! resolved relative to that root and re-validated on every call: no
//! absolute paths, no `..` segments, and no symlinks that leave the root.
//! Writes go to a sibling temp file which is renamed over the target, so a
//! failed write never leaves a half-written file behind.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

/// Structured errors for the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path not permitted: {path}")]
    PathNotPermitted { path: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("not a file: {path}")]
    NotAFile { path: String },

    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    #[error("invalid JSON in {path}")]
    InvalidJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("value is not JSON-serializable")]
    NotSerializable(#[source] serde_json::Error),

    #[error("I/O failure on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn not_permitted(path: &str) -> Self {
        StorageError::PathNotPermitted {
            path: path.to_owned(),
        }
    }
}

/// Sandboxed file area for a single module.
pub struct ModuleStorage {
    module_name: String,
    base: PathBuf,
}

impl ModuleStorage {
    /// Open (creating if missing) the storage root for `module_name` under
    /// `data_root`.
    ///
    /// # Errors
    /// Returns `StorageError::Io` when the directory cannot be created or
    /// canonicalized.
    pub fn new(data_root: &Path, module_name: &str) -> Result<Self, StorageError> {
        let base = data_root.join("modules").join(module_name);
        fs::create_dir_all(&base).map_err(|e| StorageError::io(&base, e))?;
        // Canonicalize once so later containment checks compare real paths.
        let base = base
            .canonicalize()
            .map_err(|e| StorageError::io(&base, e))?;
        Ok(Self {
            module_name: module_name.to_owned(),
            base,
        })
    }

    /// The module this storage belongs to.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Absolute path of the storage root.
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Resolve and validate a module-supplied relative path.
    ///
    /// Rejects absolute paths and any `..` component outright, then walks
    /// the existing part of the target and verifies that its canonical form
    /// stays inside the storage root. That last step is what catches
    /// symlinks pointing out of the sandbox.
    fn resolve(&self, raw: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(raw);

        if rel.is_absolute() {
            return Err(StorageError::not_permitted(raw));
        }
        for component in rel.components() {
            match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::not_permitted(raw));
                }
                Component::CurDir | Component::Normal(_) => {}
            }
        }

        let joined = self.base.join(rel);

        // Canonicalize the deepest ancestor that exists; intermediate
        // symlinked directories resolve here as well.
        let mut probe = joined.clone();
        let canonical_prefix = loop {
            if probe.symlink_metadata().is_ok() {
                break probe
                    .canonicalize()
                    .map_err(|_| StorageError::not_permitted(raw))?;
            }
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => return Err(StorageError::not_permitted(raw)),
            }
        };

        if !canonical_prefix.starts_with(&self.base) {
            return Err(StorageError::not_permitted(raw));
        }

        Ok(joined)
    }

    /// Read a UTF-8 text file.
    ///
    /// # Errors
    /// `PathNotPermitted`, `NotFound`, `NotAFile`, or `Io`.
    pub fn read_text(&self, path: &str) -> Result<String, StorageError> {
        let resolved = self.resolve(path)?;

        if !resolved.exists() {
            return Err(StorageError::NotFound {
                path: path.to_owned(),
            });
        }
        if !resolved.is_file() {
            return Err(StorageError::NotAFile {
                path: path.to_owned(),
            });
        }

        fs::read_to_string(&resolved).map_err(|e| StorageError::io(&resolved, e))
    }

    /// Atomically write a UTF-8 text file, creating parent directories.
    ///
    /// # Errors
    /// `PathNotPermitted` or `Io`.
    pub fn write_text(&self, path: &str, data: &str) -> Result<(), StorageError> {
        let resolved = self.resolve(path)?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let mut tmp = resolved.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let outcome = (|| -> Result<(), std::io::Error> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &resolved)
        })();

        if let Err(e) = outcome {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::io(&resolved, e));
        }
        Ok(())
    }

    /// Read and deserialize a JSON file.
    ///
    /// # Errors
    /// Everything `read_text` returns, plus `InvalidJson`.
    pub fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, StorageError> {
        let text = self.read_text(path)?;
        serde_json::from_str(&text).map_err(|e| StorageError::InvalidJson {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Serialize a value to pretty JSON and write it atomically.
    ///
    /// # Errors
    /// `NotSerializable` when the value cannot be encoded, otherwise
    /// everything `write_text` returns.
    pub fn write_json<T: Serialize>(&self, path: &str, value: &T) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(value).map_err(StorageError::NotSerializable)?;
        self.write_text(path, &text)
    }

    /// Whether `path` resolves to an existing entry. Paths that fail
    /// validation report `false` rather than erroring.
    pub fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(resolved) => resolved.exists(),
            Err(_) => false,
        }
    }

    /// List all files under `path` (or the storage root for an empty path),
    /// recursively, as sorted root-relative paths.
    ///
    /// # Errors
    /// `PathNotPermitted`, `NotFound`, or `NotADirectory`.
    pub fn list_files(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let dir = if path.is_empty() {
            self.base.clone()
        } else {
            self.resolve(path)?
        };

        if !dir.exists() {
            return Err(StorageError::NotFound {
                path: path.to_owned(),
            });
        }
        if !dir.is_dir() {
            return Err(StorageError::NotADirectory {
                path: path.to_owned(),
            });
        }

        let mut out = Vec::new();
        for entry in WalkDir::new(&dir).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.base) {
                    out.push(rel.to_string_lossy().into_owned());
                }
            }
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn storage() -> (tempfile::TempDir, ModuleStorage) {
        let root = tempfile::tempdir().unwrap();
        let storage = ModuleStorage::new(root.path(), "demo").unwrap();
        (root, storage)
    }

    #[test]
    fn round_trips_text() {
        let (_root, storage) = storage();
        storage.write_text("notes/hello.txt", "hi there").unwrap();
        assert_eq!(storage.read_text("notes/hello.txt").unwrap(), "hi there");
    }

    #[test]
    fn round_trips_json() {
        let (_root, storage) = storage();
        let value = json!({"a": 1, "b": ["x", "y"]});
        storage.write_json("cfg.json", &value).unwrap();
        let back: serde_json::Value = storage.read_json("cfg.json").unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn rejects_absolute_path() {
        let (_root, storage) = storage();
        let err = storage.read_text("/etc/passwd").unwrap_err();
        assert!(matches!(err, StorageError::PathNotPermitted { .. }));
    }

    #[test]
    fn rejects_parent_traversal() {
        let (_root, storage) = storage();
        let err = storage.write_text("../../escape.txt", "x").unwrap_err();
        assert!(matches!(err, StorageError::PathNotPermitted { .. }));
        let err = storage.read_text("ok/../../other/file").unwrap_err();
        assert!(matches!(err, StorageError::PathNotPermitted { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let (root, storage) = storage();
        let outside = root.path().join("secret.txt");
        fs::write(&outside, "confidential").unwrap();

        let link = storage.base_path().join("escape.txt");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        let err = storage.read_text("escape.txt").unwrap_err();
        assert!(matches!(err, StorageError::PathNotPermitted { .. }));
    }

    #[test]
    fn missing_file_reports_not_found() {
        let (_root, storage) = storage();
        let err = storage.read_text("nope.txt").unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(!storage.exists("nope.txt"));
    }

    #[test]
    fn invalid_json_is_reported() {
        let (_root, storage) = storage();
        storage.write_text("bad.json", "{not json").unwrap();
        let err = storage.read_json::<serde_json::Value>("bad.json").unwrap_err();
        assert!(matches!(err, StorageError::InvalidJson { .. }));
    }

    #[test]
    fn write_leaves_no_temp_file() {
        let (_root, storage) = storage();
        storage.write_text("data.txt", "v1").unwrap();
        storage.write_text("data.txt", "v2").unwrap();
        let files = storage.list_files("").unwrap();
        assert_eq!(files, vec!["data.txt".to_owned()]);
        assert_eq!(storage.read_text("data.txt").unwrap(), "v2");
    }

    #[test]
    fn list_files_is_recursive_and_sorted() {
        let (_root, storage) = storage();
        storage.write_text("b.txt", "b").unwrap();
        storage.write_text("sub/a.txt", "a").unwrap();
        let files = storage.list_files("").unwrap();
        assert_eq!(files, vec!["b.txt".to_owned(), "sub/a.txt".to_owned()]);

        let err = storage.list_files("b.txt").unwrap_err();
        assert!(matches!(err, StorageError::NotADirectory { .. }));
    }

    #[test]
    fn exists_is_false_for_invalid_paths() {
        let (_root, storage) = storage();
        assert!(!storage.exists("../outside"));
        assert!(!storage.exists("/abs"));
    }
}
