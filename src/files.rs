//! Input discovery.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions picked up when a directory is expanded.
pub const IMAGE_EXTENSIONS: [&str; 9] = [
    "png", "jpg", "jpeg", "webp", "avif", "svg", "gif", "tiff", "tif",
];

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// Expands command-line inputs into the list of files to compress.
pub struct FileScanner {
    pub recursive: bool,
}

impl FileScanner {
    pub fn new(recursive: bool) -> Self {
        Self { recursive }
    }

    /// Files stay as given, even with an unknown extension or when missing,
    /// so that each one gets its own result. Directories contribute their
    /// image files, sorted. Duplicates are dropped, first occurrence wins.
    pub fn expand(&self, inputs: &[PathBuf]) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for input in inputs {
            if input.is_dir() {
                for path in self.scan(input) {
                    if seen.insert(path.clone()) {
                        files.push(path);
                    }
                }
            } else if seen.insert(input.clone()) {
                files.push(input.clone());
            }
        }
        files
    }

    /// Image files under `dir`.
    pub fn scan(&self, dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let entries = match fs::read_dir(&current) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %current.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                let path = entry.path();
                if file_type.is_file() && is_image(&path) {
                    found.push(path);
                } else if file_type.is_dir() && self.recursive {
                    pending.push(path);
                }
            }
        }
        found.sort();
        tracing::debug!(dir = %dir.display(), files = found.len(), "Scanned directory");
        found
    }
}
