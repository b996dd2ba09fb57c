//! Application configuration

use app_fs::{SortBy, SortOrder};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
///
/// Read once when a session is built; later edits only take effect for the
/// next session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub navigation: NavigationConfig,
    pub loader: LoaderConfig,
    pub file_ops: FileOpsConfig,
}

/// Media cache budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cache entries (pending + ready)
    pub max_entries: usize,
    /// Maximum aggregate decoded size in MiB
    pub max_memory_mb: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 24,
            max_memory_mb: 300,
        }
    }
}

impl CacheConfig {
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }
}

/// Navigation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Files kept warm on each side of the cursor
    pub prefetch_radius: usize,
    /// Wrap around at list boundaries instead of clamping
    pub wrap_navigation: bool,
    /// Distance beyond the window at which in-flight prefetches are cancelled
    pub eviction_slack: usize,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub show_hidden: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            prefetch_radius: 2,
            wrap_navigation: false,
            eviction_slack: 2,
            sort_by: SortBy::Name,
            sort_order: SortOrder::Ascending,
            show_hidden: false,
        }
    }
}

/// Decode pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Worker threads; 0 picks one less than the available parallelism
    pub worker_threads: usize,
    /// Decoded frames are downsampled so neither side exceeds this
    pub target_max_dimension: u32,
    /// After this long the active file shows a placeholder while loading continues
    pub active_soft_timeout_ms: u64,
    /// Hard limit for full RAW sensor decodes
    pub raw_decode_timeout_ms: u64,
    /// Frames kept per animation
    pub max_animation_frames: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            target_max_dimension: 4096,
            active_soft_timeout_ms: 250,
            raw_decode_timeout_ms: 10_000,
            max_animation_frames: 1000,
        }
    }
}

impl LoaderConfig {
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }

    pub fn active_soft_timeout(&self) -> Duration {
        Duration::from_millis(self.active_soft_timeout_ms)
    }

    pub fn raw_decode_timeout(&self) -> Duration {
        Duration::from_millis(self.raw_decode_timeout_ms)
    }
}

/// File operation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOpsConfig {
    /// Replace an existing file of the same name at the destination
    pub overwrite_on_collision: bool,
    /// Route deletions through the system trash so they can be undone
    pub use_recycle_bin: bool,
    /// Park deleted files here instead of the system trash
    pub staging_dir: Option<PathBuf>,
    /// Undo history length
    pub undo_depth: usize,
    /// Refuse copies that would not fit on the destination volume
    pub check_free_space: bool,
}

impl Default for FileOpsConfig {
    fn default() -> Self {
        Self {
            overwrite_on_collision: false,
            use_recycle_bin: true,
            staging_dir: None,
            undo_depth: 10,
            check_free_space: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::info!("Configuration loaded from {:?}", config_path);
            Ok(config)
        } else {
            tracing::info!("Using default configuration");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        tracing::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "MediaSift", "MediaSift")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./config.toml"))
    }
}
