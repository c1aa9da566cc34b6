use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use synthctl_types::Preset;

use crate::paths;

#[derive(Debug)]
pub enum FavoritesError {
    Io(io::Error),
    Encode(serde_json::Error),
}

impl fmt::Display for FavoritesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FavoritesError::Io(e) => write!(f, "favourites I/O error: {}", e),
            FavoritesError::Encode(e) => write!(f, "favourites encode error: {}", e),
        }
    }
}

impl std::error::Error for FavoritesError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FavoritesError::Io(e) => Some(e),
            FavoritesError::Encode(e) => Some(e),
        }
    }
}

impl From<io::Error> for FavoritesError {
    fn from(e: io::Error) -> Self {
        FavoritesError::Io(e)
    }
}

impl From<serde_json::Error> for FavoritesError {
    fn from(e: serde_json::Error) -> Self {
        FavoritesError::Encode(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<String>,
    pub preset: Preset,
}

/// One engine's favourite presets, persisted as a JSON object keyed by
/// preset id.
#[derive(Debug)]
pub struct PresetFavorites {
    path: PathBuf,
    entries: BTreeMap<String, FavoriteEntry>,
}

impl PresetFavorites {
    /// Favourites file for an engine nickname. `None` if the nickname is empty.
    pub fn path_for(my_data_dir: &Path, nickname: &str) -> Option<PathBuf> {
        if nickname.trim().is_empty() {
            log::warn!(target: "favorites", "engine has no nickname, preset favourites unavailable");
            return None;
        }
        let file = format!("{}.json", nickname.replace('/', "_"));
        Some(paths::preset_favorites_dir(my_data_dir).join(file))
    }

    pub fn for_engine(my_data_dir: &Path, nickname: &str) -> Option<Self> {
        Self::path_for(my_data_dir, nickname).map(Self::load)
    }

    /// Read the favourites at `path`.
    ///
    /// A missing file is an empty set. A file that cannot be parsed is moved
    /// aside to `<path>.corrupt` and the set starts empty.
    pub fn load(path: PathBuf) -> Self {
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    let aside = corrupt_path(&path);
                    log::warn!(
                        target: "favorites",
                        "corrupt favourites {} ({}), moving to {}",
                        path.display(),
                        e,
                        aside.display()
                    );
                    if let Err(e) = fs::rename(&path, &aside) {
                        log::warn!(target: "favorites", "could not move corrupt favourites: {}", e);
                    }
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                log::warn!(target: "favorites", "could not read {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, preset_id: &str) -> bool {
        self.entries.contains_key(preset_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Favourites ordered by preset id.
    pub fn list(&self) -> impl Iterator<Item = &FavoriteEntry> {
        self.entries.values()
    }

    /// Flip a preset's favourite status and persist. Returns the new status.
    /// On a write error the set is left unchanged.
    pub fn toggle(&mut self, preset: &Preset) -> Result<bool, FavoritesError> {
        let mut entries = self.entries.clone();
        let now_favorite = if entries.remove(&preset.id).is_some() {
            false
        } else {
            entries.insert(
                preset.id.clone(),
                FavoriteEntry {
                    bank: preset.bank.clone(),
                    preset: preset.clone(),
                },
            );
            true
        };
        self.commit(entries)?;
        Ok(now_favorite)
    }

    /// Drop a preset from the favourites. Returns whether it was present.
    pub fn remove(&mut self, preset_id: &str) -> Result<bool, FavoritesError> {
        if !self.entries.contains_key(preset_id) {
            return Ok(false);
        }
        let mut entries = self.entries.clone();
        entries.remove(preset_id);
        self.commit(entries)?;
        Ok(true)
    }

    fn commit(&mut self, entries: BTreeMap<String, FavoriteEntry>) -> Result<(), FavoritesError> {
        self.save(&entries)?;
        self.entries = entries;
        Ok(())
    }

    fn save(&self, entries: &BTreeMap<String, FavoriteEntry>) -> Result<(), FavoritesError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}
