//! On-disk catalog of published model definitions.
//!
//! Each model lives in `<dir>/<name>.json` as pretty-printed JSON. Writes go
//! through a temp file and a rename so a crash never leaves a truncated
//! definition behind.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::ModelDefinition;

/// Errors from catalog file operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Filesystem operation failed.
    #[error("catalog io error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A definition file could not be parsed or serialized.
    #[error("catalog json error at {path}: {source}")]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Directory of model definition files.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    dir: PathBuf,
}

impl ModelCatalog {
    /// Open the catalog, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| CatalogError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Catalog directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Write `model` to `<name>.json`, replacing any previous file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save(&self, model: &ModelDefinition) -> Result<PathBuf, CatalogError> {
        let path = self.path_for(&model.name);
        let body = serde_json::to_string_pretty(model).map_err(|source| CatalogError::Json {
            path: path.clone(),
            source,
        })?;

        let tmp = self.dir.join(format!(".{}.json.tmp", model.name));
        std::fs::write(&tmp, body).map_err(|source| CatalogError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| CatalogError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(model = %model.name, path = %path.display(), "model definition saved");
        Ok(path)
    }

    /// Read one definition by model name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self, name: &str) -> Result<Option<ModelDefinition>, CatalogError> {
        let path = self.path_for(name);
        match std::fs::read_to_string(&path) {
            Ok(body) => parse(&path, &body).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CatalogError::Io { path, source }),
        }
    }

    /// Read every `*.json` definition, ordered by file name.
    ///
    /// Files that fail to parse are returned as individual errors so one bad
    /// file does not hide the rest.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory itself cannot be listed.
    pub fn load_all(&self) -> Result<Vec<Result<ModelDefinition, CatalogError>>, CatalogError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| CatalogError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                std::fs::read_to_string(&path)
                    .map_err(|source| CatalogError::Io {
                        path: path.clone(),
                        source,
                    })
                    .and_then(|body| parse(&path, &body))
            })
            .collect())
    }
}

fn parse(path: &Path, body: &str) -> Result<ModelDefinition, CatalogError> {
    serde_json::from_str(body).map_err(|source| CatalogError::Json {
        path: path.to_path_buf(),
        source,
    })
}
