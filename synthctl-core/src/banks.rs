use std::fs;
use std::path::{Path, PathBuf};

/// One file or directory found under a labelled root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub path: PathBuf,
    /// Position in the combined listing.
    pub index: usize,
    pub title: String,
    pub root_label: String,
    pub file_name: String,
}

/// Files with extension `ext` (case-insensitive, no leading dot) under each
/// root, roots in the given order and entries sorted by name.
pub fn list_files(roots: &[(String, PathBuf)], ext: &str) -> Vec<ListEntry> {
    let ext = ext.trim_start_matches('.').to_lowercase();
    let mut out = Vec::new();
    for (label, root) in roots {
        for path in sorted_entries(root) {
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.to_lowercase() == ext);
            if matches {
                push_entry(&mut out, label, path);
            }
        }
    }
    out
}

/// Subdirectories of each root. With `exclude_empty`, directories with no
/// entries are left out.
pub fn list_dirs(roots: &[(String, PathBuf)], exclude_empty: bool) -> Vec<ListEntry> {
    let mut out = Vec::new();
    for (label, root) in roots {
        for path in sorted_entries(root) {
            if !path.is_dir() {
                continue;
            }
            if exclude_empty && is_empty_dir(&path) {
                continue;
            }
            push_entry(&mut out, label, path);
        }
    }
    out
}

/// Display title: file stem with underscores as spaces, prefixed by the root
/// label unless the label is `_`.
pub fn entry_title(label: &str, path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().replace('_', " "))
        .unwrap_or_default();
    if label == "_" {
        stem
    } else {
        format!("{}/{}", label, stem)
    }
}

fn push_entry(out: &mut Vec<ListEntry>, label: &str, path: PathBuf) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    out.push(ListEntry {
        index: out.len(),
        title: entry_title(label, &path),
        root_label: label.to_string(),
        file_name,
        path,
    });
}

fn sorted_entries(root: &Path) -> Vec<PathBuf> {
    let read = match fs::read_dir(root) {
        Ok(read) => read,
        Err(e) => {
            log::debug!(target: "banks", "skipping {}: {}", root.display(), e);
            return Vec::new();
        }
    };
    let mut entries: Vec<PathBuf> = read
        .filter_map(Result::ok)
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .collect();
    entries.sort();
    entries
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut it| it.next().is_none())
        .unwrap_or(true)
}
