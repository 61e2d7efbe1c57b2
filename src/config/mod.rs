#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::TaskdeckError;
use crate::storage;
use crate::task::model::TaskFilter;
use crate::task::store::{DEFAULT_KEY, IdPolicy, StoreOptions, WriteOrder};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub store: StoreConfig,
    pub ui: UiConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Empty means the platform data directory.
    pub data_dir: String,
    pub key: String,
    pub on_corrupt: CorruptPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            key: DEFAULT_KEY.to_owned(),
            on_corrupt: CorruptPolicy::Fail,
        }
    }
}

/// What the front end does when the stored collection does not decode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    Fail,
    Empty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub write_order: WriteOrder,
    pub id_policy: IdPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub icons: bool,
    pub default_filter: TaskFilter,
    pub confirm_delete: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            icons: true,
            default_filter: TaskFilter::All,
            confirm_delete: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
}

pub fn default_paths() -> anyhow::Result<ConfigPaths> {
    let unix = home_config_path_unix();
    if !cfg!(windows) {
        return Ok(ConfigPaths { config_file: unix });
    }

    // Windows: prefer the Unix-style path if present for portability.
    if unix.exists() {
        return Ok(ConfigPaths { config_file: unix });
    }

    let proj = project_dirs()?;
    Ok(ConfigPaths {
        config_file: proj.config_dir().join("config.toml"),
    })
}

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from("com", "taskdeck", "taskdeck")
        .context("failed to determine platform directories")
}

fn home_config_path_unix() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join("taskdeck").join("config.toml")
}

fn home_dir() -> Option<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        return Some(PathBuf::from(v));
    }
    if let Some(v) = std::env::var_os("USERPROFILE") {
        return Some(PathBuf::from(v));
    }
    let drive = std::env::var_os("HOMEDRIVE");
    let path = std::env::var_os("HOMEPATH");
    match (drive, path) {
        (Some(d), Some(p)) => Some(PathBuf::from(d).join(PathBuf::from(p))),
        _ => None,
    }
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    input.to_owned()
}

pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

fn expand_env_vars(input: &str) -> String {
    // $VAR and ${VAR}; unknown variables are left as written.
    let Ok(re) = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") else {
        return input.to_owned();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        std::env::var(key).unwrap_or_else(|_| caps[0].to_owned())
    })
    .to_string()
}

impl Config {
    pub fn validate(&self) -> Result<(), TaskdeckError> {
        storage::validate_key(&self.storage.key)
            .map_err(|e| TaskdeckError::Config(format!("storage.key: {e}")))?;
        if crate::logging::normalize_level(&self.log.level).is_none() {
            return Err(TaskdeckError::Config(format!(
                "log.level must be one of: {}",
                crate::logging::LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            key: self.storage.key.clone(),
            write_order: self.store.write_order,
            id_policy: self.store.id_policy,
        }
    }

    /// Resolves `storage.data_dir`, falling back to the platform data directory.
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        if self.storage.data_dir.trim().is_empty() {
            return Ok(project_dirs()?.data_dir().to_path_buf());
        }
        expand_path(&self.storage.data_dir)
    }
}

pub fn load() -> anyhow::Result<(Config, toml_edit::DocumentMut, ConfigPaths)> {
    let paths = default_paths()?;
    let (doc, cfg) = load_from_file(&paths.config_file)?;
    cfg.validate()?;
    Ok((cfg, doc, paths))
}

pub fn list_resolved_toml() -> anyhow::Result<String> {
    let (cfg, _doc, _paths) = load()?;
    Ok(toml::to_string_pretty(&cfg)?)
}

pub fn get_value_string(key: &str) -> anyhow::Result<Option<String>> {
    let paths = default_paths()?;
    get_value_string_at_path(&paths.config_file, key)
}

pub fn set_value_string(key: &str, value: &str) -> anyhow::Result<()> {
    let paths = default_paths()?;
    set_value_string_at_path(&paths.config_file, key, value)
}

pub fn load_from_file(path: &Path) -> anyhow::Result<(toml_edit::DocumentMut, Config)> {
    if !path.exists() {
        return Ok((toml_edit::DocumentMut::new(), Config::default()));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let doc = raw
        .parse::<toml_edit::DocumentMut>()
        .with_context(|| format!("failed to parse TOML in {}", path.display()))?;
    let cfg: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
    Ok((doc, cfg))
}

pub fn get_value_string_at_path(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let (_doc, cfg) = load_from_file(path)?;
    cfg.validate()?;
    Ok(lookup_value(&cfg, key.trim()).map(format_value_for_stdout))
}

pub fn set_value_string_at_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let (mut doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    let key = key.trim();
    let key_type = key_type(key).ok_or_else(|| TaskdeckError::InvalidConfigKey(key.to_owned()))?;
    let item = parse_value(key, key_type, value)?;
    apply_set(&mut doc, key, item)?;

    // The edited document must still deserialize into a valid Config.
    let new_raw = doc.to_string();
    let new_cfg: Config = toml::from_str(&new_raw)
        .with_context(|| format!("config update produced invalid TOML for {}", path.display()))?;
    new_cfg.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, new_raw.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Bool,
    String,
    Enum(&'static [&'static str]),
}

fn key_type(key: &str) -> Option<KeyType> {
    Some(match key {
        "storage.data_dir" | "storage.key" => KeyType::String,
        "storage.on_corrupt" => KeyType::Enum(&["fail", "empty"]),
        "store.write_order" => KeyType::Enum(&["optimistic", "write-first"]),
        "store.id_policy" => KeyType::Enum(&["lenient", "strict"]),
        "ui.icons" | "ui.confirm_delete" => KeyType::Bool,
        "ui.default_filter" => KeyType::Enum(&["all", "completed", "pending"]),
        "log.level" => KeyType::Enum(crate::logging::LEVELS),
        _ => return None,
    })
}

fn parse_value(key: &str, key_type: KeyType, value: &str) -> Result<toml_edit::Item, TaskdeckError> {
    let invalid = |msg: String| TaskdeckError::InvalidConfigValue {
        key: key.to_owned(),
        msg,
    };
    Ok(match key_type {
        KeyType::Bool => toml_edit::value(parse_bool(value).map_err(invalid)?),
        KeyType::String => toml_edit::value(value),
        KeyType::Enum(allowed) => {
            let v = value.trim().to_lowercase();
            if !allowed.contains(&v.as_str()) {
                return Err(invalid(format!("must be one of: {}", allowed.join(", "))));
            }
            toml_edit::value(v)
        }
    })
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true|false, got '{other}'")),
    }
}

fn apply_set(
    doc: &mut toml_edit::DocumentMut,
    key: &str,
    value: toml_edit::Item,
) -> anyhow::Result<()> {
    let Some((section, leaf)) = key.split_once('.') else {
        return Err(TaskdeckError::InvalidConfigKey(key.to_owned()).into());
    };

    let root = doc.as_table_mut();
    if !root.contains_key(section) {
        let mut t = toml_edit::Table::new();
        t.set_implicit(true);
        root.insert(section, toml_edit::Item::Table(t));
    }
    let table = root[section].as_table_mut().ok_or_else(|| {
        TaskdeckError::Config(format!("cannot set {key}: '{section}' is not a table"))
    })?;
    table.insert(leaf, value);
    Ok(())
}

fn lookup_value(cfg: &Config, key: &str) -> Option<serde_json::Value> {
    let mut v = serde_json::to_value(cfg).ok()?;
    for seg in key.split('.').filter(|s| !s.is_empty()) {
        match v {
            serde_json::Value::Object(mut map) => {
                v = map.remove(seg)?;
            }
            _ => return None,
        }
    }
    Some(v)
}

fn format_value_for_stdout(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_owned(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
        let opts = Config::default().store_options();
        assert_eq!(opts.key, "TASKS");
        assert_eq!(opts.write_order, WriteOrder::Optimistic);
        assert_eq!(opts.id_policy, IdPolicy::Lenient);
    }

    #[test]
    fn validation_catches_bad_keys_and_levels() {
        let mut cfg = Config::default();
        cfg.storage.key = "../tasks".to_owned();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.log.level = "loud".to_owned();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_policies_from_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [store]
            write_order = "write-first"
            id_policy = "strict"

            [storage]
            on_corrupt = "empty"

            [ui]
            default_filter = "pending"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.store.write_order, WriteOrder::WriteFirst);
        assert_eq!(cfg.store.id_policy, IdPolicy::Strict);
        assert_eq!(cfg.storage.on_corrupt, CorruptPolicy::Empty);
        assert_eq!(cfg.ui.default_filter, TaskFilter::Pending);
        assert_eq!(cfg.storage.key, "TASKS");
    }

    #[test]
    fn config_set_and_get_dot_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        set_value_string_at_path(&path, "ui.icons", "false").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "ui.icons")
                .unwrap()
                .as_deref(),
            Some("false")
        );

        set_value_string_at_path(&path, "store.write_order", "Write-First").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "store.write_order")
                .unwrap()
                .as_deref(),
            Some("write-first")
        );

        set_value_string_at_path(&path, "storage.data_dir", "~/tasks").unwrap();
        let (_doc, cfg) = load_from_file(&path).unwrap();
        cfg.validate().unwrap();
        assert!(!cfg.ui.icons);
        assert_eq!(cfg.storage.data_dir, "~/tasks");
        assert_eq!(cfg.store.write_order, WriteOrder::WriteFirst);
    }

    #[test]
    fn config_set_rejects_unknown_keys_and_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        assert!(set_value_string_at_path(&path, "ui.colour", "red").is_err());
        assert!(set_value_string_at_path(&path, "store.id_policy", "sometimes").is_err());
        assert!(set_value_string_at_path(&path, "storage.key", "a/b").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn config_set_keeps_comments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# mine\n[ui]\nicons = true\n").unwrap();

        set_value_string_at_path(&path, "ui.confirm_delete", "false").unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("# mine"));
        assert!(raw.contains("confirm_delete = false"));
    }

    #[test]
    fn explicit_data_dir_expands_env_vars() {
        let mut cfg = Config::default();
        cfg.storage.data_dir = "/tmp/$TASKDECK_TEST_UNSET_VAR/data".to_owned();
        assert_eq!(
            cfg.data_dir().unwrap(),
            PathBuf::from("/tmp/$TASKDECK_TEST_UNSET_VAR/data")
        );
    }
}
