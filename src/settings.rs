//! Settings: where definitions and layers are found
//!
//! Resolved with a 4-layer merge:
//! 1. Built-in defaults
//! 2. User config (~/.config/cfgstack/config.toml)
//! 3. Project config (<project_root>/.cfgstack/config.toml)
//! 4. CLI flags
//!
//! ```toml
//! data_dir = "/opt/cfgstack/data"
//! global_layers_dir = "~/.cfgstack/layers"
//! include_builtin = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use cfgstack_doc::{merge_layers, ListMerge};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Directory (under the project root or home) holding cfgstack files
pub const PROJECT_DIR: &str = ".cfgstack";

/// Definition tree shipped with the crate
pub const BUILTIN_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

impl SettingsError {
    /// Stable identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            SettingsError::Io { .. } => "io",
            SettingsError::Parse { .. } | SettingsError::Invalid(_) => "invalid_settings",
        }
    }
}

/// Effective settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Compiler definitions (`compilers/`) and auxiliary layer files (`layers/`)
    pub data_dir: PathBuf,

    /// Project whose `.cfgstack/layers/` take precedence over all others
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,

    /// User layer directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_layers_dir: Option<PathBuf>,

    /// Whether the embedded layer library is consulted
    #[serde(default = "default_true")]
    pub include_builtin: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(BUILTIN_DATA_DIR),
            project_root: None,
            global_layers_dir: home_dir().map(|home| home.join(PROJECT_DIR).join("layers")),
            include_builtin: true,
        }
    }
}

/// Values given on the command line; `None` leaves the lower layers in effect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_layers_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_builtin: Option<bool>,
}

/// Origin of a settings source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingsOrigin {
    Builtin,
    User,
    Project,
    Cli,
}

/// A contributing settings source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSource {
    pub origin: SettingsOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Merged settings plus the sources that contributed, in precedence order
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub sources: Vec<SettingsSource>,
}

impl Settings {
    /// Load from the conventional locations.
    ///
    /// The project root comes from the CLI, falling back to the current
    /// directory when it contains a `.cfgstack/` directory.
    pub fn discover(cli: &SettingsOverrides) -> Result<LoadedSettings, SettingsError> {
        let user_file = home_dir().map(|home| home.join(".config/cfgstack/config.toml"));
        let project_root = cli.project_root.clone().or_else(|| {
            std::env::current_dir()
                .ok()
                .filter(|dir| dir.join(PROJECT_DIR).is_dir())
        });
        let project_file = project_root
            .as_ref()
            .map(|root| root.join(PROJECT_DIR).join("config.toml"));

        let mut cli = cli.clone();
        if cli.project_root.is_none() {
            cli.project_root = project_root;
        }
        Self::load(user_file.as_deref(), project_file.as_deref(), &cli)
    }

    /// Merge defaults, the given files (when they exist) and CLI overrides.
    ///
    /// Relative paths in the project file are resolved against the directory
    /// that contains `.cfgstack/`.
    pub fn load(
        user_file: Option<&Path>,
        project_file: Option<&Path>,
        cli: &SettingsOverrides,
    ) -> Result<LoadedSettings, SettingsError> {
        let mut layers = Vec::new();
        let mut sources = Vec::new();

        layers.push(to_value(&Settings::default())?);
        sources.push(SettingsSource {
            origin: SettingsOrigin::Builtin,
            path: None,
            digest: None,
        });

        if let Some(path) = user_file.filter(|p| p.exists()) {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(SettingsSource {
                origin: SettingsOrigin::User,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(path) = project_file.filter(|p| p.exists()) {
            let (mut value, digest) = load_toml_file(path)?;
            if let Some(root) = path.parent().and_then(Path::parent) {
                resolve_relative_paths(&mut value, root);
            }
            layers.push(value);
            sources.push(SettingsSource {
                origin: SettingsOrigin::Project,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        let cli_value = to_value(cli)?;
        if cli_value.as_object().is_some_and(|map| !map.is_empty()) {
            layers.push(cli_value);
            sources.push(SettingsSource {
                origin: SettingsOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers, ListMerge::Replace);
        let settings: Settings =
            serde_json::from_value(merged).map_err(|e| SettingsError::Invalid(e.to_string()))?;
        tracing::debug!(data_dir = %settings.data_dir.display(), sources = sources.len(), "settings resolved");

        Ok(LoadedSettings { settings, sources })
    }

    /// Project-local layer directory, if a project root is set
    pub fn project_layers_dir(&self) -> Option<PathBuf> {
        self.project_root
            .as_ref()
            .map(|root| root.join(PROJECT_DIR).join("layers"))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, SettingsError> {
    serde_json::to_value(value).map_err(|e| SettingsError::Invalid(e.to_string()))
}

/// Load and parse a TOML file, returning the value and digest
fn load_toml_file(path: &Path) -> Result<(Value, String), SettingsError> {
    let bytes = fs::read(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());

    let parse_error = |reason: String| SettingsError::Parse {
        path: path.to_path_buf(),
        reason,
    };
    let contents = String::from_utf8(bytes).map_err(|e| parse_error(format!("invalid UTF-8: {}", e)))?;
    let table: toml::Value = toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?;

    Ok((toml_to_json(table), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect::<Map<String, Value>>(),
        ),
    }
}

const PATH_KEYS: &[&str] = &["data_dir", "global_layers_dir"];

fn resolve_relative_paths(value: &mut Value, base: &Path) {
    for key in PATH_KEYS {
        if let Some(Value::String(path)) = value.get_mut(*key) {
            let expanded = expand_home(path);
            let resolved = if expanded.is_relative() {
                base.join(expanded)
            } else {
                expanded
            };
            *path = resolved.to_string_lossy().to_string();
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_only() {
        let loaded = Settings::load(None, None, &SettingsOverrides::default()).unwrap();
        assert_eq!(loaded.settings.data_dir, PathBuf::from(BUILTIN_DATA_DIR));
        assert!(loaded.settings.include_builtin);
        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.sources[0].origin, SettingsOrigin::Builtin);
    }

    #[test]
    fn test_layer_precedence() {
        let tmp = TempDir::new().unwrap();
        let user = tmp.path().join("user.toml");
        fs::write(&user, "data_dir = \"/user/data\"\ninclude_builtin = false\n").unwrap();

        let project_root = tmp.path().join("proj");
        fs::create_dir_all(project_root.join(PROJECT_DIR)).unwrap();
        let project = project_root.join(PROJECT_DIR).join("config.toml");
        fs::write(&project, "data_dir = \"/project/data\"\n").unwrap();

        let cli = SettingsOverrides {
            include_builtin: Some(true),
            ..SettingsOverrides::default()
        };
        let loaded = Settings::load(Some(&user), Some(&project), &cli).unwrap();

        assert_eq!(loaded.settings.data_dir, PathBuf::from("/project/data"));
        assert!(loaded.settings.include_builtin);
        let origins: Vec<_> = loaded.sources.iter().map(|s| s.origin).collect();
        assert_eq!(
            origins,
            [
                SettingsOrigin::Builtin,
                SettingsOrigin::User,
                SettingsOrigin::Project,
                SettingsOrigin::Cli
            ]
        );
    }

    #[test]
    fn test_source_digest() {
        let tmp = TempDir::new().unwrap();
        let user = tmp.path().join("user.toml");
        fs::write(&user, "include_builtin = false\n").unwrap();

        let loaded = Settings::load(Some(&user), None, &SettingsOverrides::default()).unwrap();
        let digest = loaded.sources[1].digest.as_ref().unwrap();
        assert_eq!(digest.len(), 64);
        assert!(!loaded.settings.include_builtin);
    }

    #[test]
    fn test_project_relative_paths() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(PROJECT_DIR)).unwrap();
        let project = tmp.path().join(PROJECT_DIR).join("config.toml");
        fs::write(&project, "data_dir = \"toolchains/data\"\n").unwrap();

        let loaded = Settings::load(None, Some(&project), &SettingsOverrides::default()).unwrap();
        assert_eq!(loaded.settings.data_dir, tmp.path().join("toolchains/data"));
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.toml");
        let loaded = Settings::load(Some(&missing), Some(&missing), &SettingsOverrides::default()).unwrap();
        assert_eq!(loaded.sources.len(), 1);
    }

    #[test]
    fn test_parse_error() {
        let tmp = TempDir::new().unwrap();
        let user = tmp.path().join("user.toml");
        fs::write(&user, "data_dir = [unterminated\n").unwrap();

        let err = Settings::load(Some(&user), None, &SettingsOverrides::default()).unwrap_err();
        assert_eq!(err.kind(), "invalid_settings");
    }

    #[test]
    fn test_wrong_type_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let user = tmp.path().join("user.toml");
        fs::write(&user, "include_builtin = \"yes\"\n").unwrap();

        let err = Settings::load(Some(&user), None, &SettingsOverrides::default()).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn test_project_layers_dir() {
        let settings = Settings {
            project_root: Some(PathBuf::from("/work/app")),
            ..Settings::default()
        };
        assert_eq!(
            settings.project_layers_dir(),
            Some(PathBuf::from("/work/app/.cfgstack/layers"))
        );
    }
}
