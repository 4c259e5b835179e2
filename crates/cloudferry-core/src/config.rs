use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::{BaseDirs, ProjectDirs};
use eyre::{eyre, Context, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::orchestrator::{MigrationOptions, TestMode};
use crate::path_map::ExcludeFilter;
use crate::retry::RetryPolicy;

static CONFIG_DIR_OVERRIDE: Lazy<RwLock<Option<PathBuf>>> = Lazy::new(|| RwLock::new(None));

const MIB: u64 = 1024 * 1024;

/// Override the configuration directory for the current process.
/// Subsequent calls replace the previous override.
pub fn set_config_dir<P: AsRef<Path>>(path: P) {
    *CONFIG_DIR_OVERRIDE.write() = Some(path.as_ref().to_path_buf());
}

/// Clear any previously configured override.
pub fn clear_config_dir_override() {
    CONFIG_DIR_OVERRIDE.write().take();
}

/// Resolve the configuration directory.
/// Priority: explicit override -> platform standard -> ~/.config/cloudferry
pub fn config_dir() -> Result<PathBuf> {
    if let Some(path) = CONFIG_DIR_OVERRIDE.read().clone() {
        return Ok(path);
    }

    if let Some(proj) = ProjectDirs::from("com", "CloudFerry", "CloudFerry") {
        return Ok(proj.config_dir().to_path_buf());
    }

    if let Some(base) = BaseDirs::new() {
        return Ok(base.home_dir().join(".config").join("cloudferry"));
    }

    Err(eyre!(
        "unable to determine configuration directory for cloudferry (no override and no platform default)"
    ))
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

pub fn default_checkpoint_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("checkpoint.jsonl"))
}

pub fn default_report_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("report.json"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub root_folder: String,
    pub exclude_patterns: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root_folder: "/".into(),
            exclude_patterns: vec![
                ".DS_Store".into(),
                "*.tmp".into(),
                "~*".into(),
                "Thumbs.db".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub root_folder: String,
    pub use_shared_drive: bool,
    pub shared_drive_name: Option<String>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            root_folder: "/Dropbox Migration".into(),
            use_shared_drive: false,
            shared_drive_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    pub chunk_size_mb: u64,
    /// Defaults to `chunk_size_mb`.
    pub small_file_threshold_mb: Option<u64>,
    pub parallel_uploads: usize,
    pub max_retries: u32,
    /// Seconds between attempts.
    pub retry_delay: u64,
    /// Seconds a single provider call may take.
    pub call_timeout: u64,
    pub continue_on_error: bool,
    pub preserve_timestamps: bool,
    pub migrate_permissions: bool,
    pub test_limit: usize,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: 50,
            small_file_threshold_mb: None,
            parallel_uploads: 3,
            max_retries: 3,
            retry_delay: 5,
            call_timeout: 300,
            continue_on_error: true,
            preserve_timestamps: true,
            migrate_permissions: true,
            test_limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub options: OptionsConfig,
    pub test_folder: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
            options: OptionsConfig::default(),
            test_folder: "/test".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
        _ => Format::Json,
    }
}

impl MigrationConfig {
    /// Read a JSON or TOML file, chosen by extension (JSON otherwise).
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let config = match format_of(path) {
            Format::Toml => toml::from_str(&content).wrap_err("failed to parse config file")?,
            Format::Json => serde_json::from_str(&content).wrap_err("failed to parse config file")?,
        };
        Ok(config)
    }

    /// Load `path`, writing the default configuration there first if missing.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        log::info!("created default configuration at {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("failed to create config directory {}", parent.display()))?;
        }
        let content = match format_of(path) {
            Format::Toml => toml::to_string_pretty(self).wrap_err("failed to serialize config")?,
            Format::Json => serde_json::to_string_pretty(self).wrap_err("failed to serialize config")?,
        };
        fs::write(path, content)
            .wrap_err_with(|| format!("failed to write config file: {}", path.display()))
    }

    /// Validate and convert into run options.
    pub fn to_options(&self) -> Result<MigrationOptions> {
        let opts = &self.options;
        if opts.chunk_size_mb == 0 {
            return Err(eyre!("options.chunk_size_mb must be greater than zero"));
        }
        ExcludeFilter::new(&self.source.exclude_patterns)
            .wrap_err("source.exclude_patterns is invalid")?;

        let chunk_size = opts.chunk_size_mb.saturating_mul(MIB);
        let options = MigrationOptions {
            source_root: self.source.root_folder.clone(),
            dest_root: self.destination.root_folder.clone(),
            exclude_patterns: self.source.exclude_patterns.clone(),
            use_shared_drive: self.destination.use_shared_drive,
            shared_drive_name: self.destination.shared_drive_name.clone(),
            chunk_size,
            small_file_threshold: opts
                .small_file_threshold_mb
                .map_or(chunk_size, |mb| mb.saturating_mul(MIB)),
            parallel_uploads: opts.parallel_uploads,
            retry: RetryPolicy::new(opts.max_retries, Duration::from_secs(opts.retry_delay))
                .with_call_timeout(Duration::from_secs(opts.call_timeout.max(1))),
            continue_on_error: opts.continue_on_error,
            preserve_timestamps: opts.preserve_timestamps,
            migrate_permissions: opts.migrate_permissions,
            dry_run: false,
            resume: false,
            test_mode: None,
        };
        options.validate().wrap_err("invalid configuration")?;
        Ok(options)
    }

    pub fn test_mode(&self) -> TestMode {
        TestMode {
            folder: self.test_folder.clone(),
            limit: self.options.test_limit,
        }
    }
}
