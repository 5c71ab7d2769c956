//! Definition Store
//!
//! Reads declarative documents from a definition tree on disk:
//!
//! ```text
//! <data_dir>/
//!   compilers/<name>.yaml        compiler definitions
//!   layers/<type>/<name>.yaml    auxiliary layer files (e.g. linker/lld.yaml)
//! ```
//!
//! The store performs no merging. Parsed documents are cached per path and
//! every caller receives its own copy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cfgstack_doc::{parse_document, DocError, Format};
use serde_json::Value;

/// Extensions tried, in order, when looking up a document by name.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Errors raised while locating or parsing definition documents
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} definition not found: {name} (looked in {}){}", .dir.display(), available_suffix(.available))]
    NotFound {
        kind: &'static str,
        name: String,
        dir: PathBuf,
        available: Vec<String>,
    },

    #[error("invalid {kind} name '{name}': names may not contain path separators or be '.' or '..'")]
    InvalidName { kind: &'static str, name: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid definition {}: {source}", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: DocError,
    },
}

fn available_suffix(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!("; available: {}", available.join(", "))
    }
}

impl StoreError {
    /// Stable identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::InvalidName { .. } => "invalid_name",
            StoreError::Io { .. } => "io",
            StoreError::Invalid { .. } => "invalid_document",
        }
    }
}

/// Filesystem-backed store of compiler and layer documents
#[derive(Debug)]
pub struct DefinitionStore {
    data_dir: PathBuf,
    cache: Mutex<HashMap<PathBuf, Value>>,
}

impl DefinitionStore {
    /// Create a store rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn compilers_dir(&self) -> PathBuf {
        self.data_dir.join("compilers")
    }

    pub fn layers_dir(&self) -> PathBuf {
        self.data_dir.join("layers")
    }

    /// Load a compiler definition document by name.
    ///
    /// A trailing `.yaml` on the name is ignored so `extends: gcc.yaml` works.
    pub fn load_compiler(&self, name: &str) -> Result<Value, StoreError> {
        let name = name.strip_suffix(".yaml").unwrap_or(name);
        check_name("compiler", name)?;
        let dir = self.compilers_dir();
        match find_document(&dir, name) {
            Some(path) => self.load_path(&path),
            None => Err(StoreError::NotFound {
                kind: "compiler",
                name: name.to_string(),
                available: list_documents(&dir),
                dir,
            }),
        }
    }

    /// Load an auxiliary layer file (`<data_dir>/layers/<type>/<name>`), if present
    pub fn load_aux_layer(&self, layer_type: &str, name: &str) -> Result<Option<Value>, StoreError> {
        check_name("layer type", layer_type)?;
        check_name("layer", name)?;
        let dir = self.layers_dir().join(layer_type);
        match find_document(&dir, name) {
            Some(path) => self.load_path(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Load and cache the document at `path`
    pub fn load_path(&self, path: &Path) -> Result<Value, StoreError> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(doc) = cache.get(path) {
                return Ok(doc.clone());
            }
        }

        tracing::debug!(path = %path.display(), "reading definition");
        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc = parse_document(&text, Format::from_path(path)).map_err(|source| {
            StoreError::Invalid {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(path.to_path_buf(), doc.clone());
        Ok(doc)
    }

    /// Names of all compiler definitions, sorted
    pub fn list_compilers(&self) -> Vec<String> {
        list_documents(&self.compilers_dir())
    }
}

/// Whether `name` stays inside the directory it is joined onto
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn check_name(kind: &'static str, name: &str) -> Result<(), StoreError> {
    if is_plain_name(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

/// Find `<dir>/<name>.<ext>` for the first existing extension
pub fn find_document(dir: &Path, name: &str) -> Option<PathBuf> {
    DOCUMENT_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", name, ext)))
        .find(|path| path.is_file())
}

/// Document names (file stems) directly inside `dir`, sorted and de-duplicated.
///
/// A missing directory yields an empty list.
pub fn list_documents(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext))
        })
        .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
        .collect();
    names.sort();
    names.dedup();
    names
}
