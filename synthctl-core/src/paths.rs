use std::path::{Path, PathBuf};

/// Directory holding `config.toml` and the log file.
///
/// Fallback chain:
/// 1. `SYNTHCTL_CONFIG_DIR` env var
/// 2. `<platform config dir>/synthctl`
/// 3. `./synthctl`
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SYNTHCTL_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("synthctl")
}

/// Shared (read-mostly) engine data: banks, presets shipped with engines.
///
/// `SYNTHCTL_DATA_DIR` wins over the configured value, which wins over
/// `<platform data dir>/synthctl`.
pub fn data_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = std::env::var_os("SYNTHCTL_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(dir) = configured {
        return dir.to_path_buf();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("synthctl")
}

/// User data: saved presets, favourites.
///
/// `SYNTHCTL_MY_DATA_DIR`, then the configured value, then `<data_dir>/my-data`.
pub fn my_data_dir(configured: Option<&Path>, data_dir: &Path) -> PathBuf {
    if let Some(dir) = std::env::var_os("SYNTHCTL_MY_DATA_DIR") {
        return PathBuf::from(dir);
    }
    configured
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join("my-data"))
}

/// Where an engine's preset favourites are kept.
pub fn preset_favorites_dir(my_data_dir: &Path) -> PathBuf {
    my_data_dir.join("preset-favorites")
}
