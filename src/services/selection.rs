use crate::models::{FolderSelection, SelectionSource};
use crate::services::dialog::{DialogCapability, DialogError, NativeDialogAdapter};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Image extensions the face-sorting pipeline understands (lower-case)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

/// Why a folder was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    Empty,
    NotFound,
    NotADirectory,
    Unreadable(String),
    NotUtf8,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Empty => f.write_str("no path given"),
            InvalidReason::NotFound => f.write_str("does not exist"),
            InvalidReason::NotADirectory => f.write_str("is not a directory"),
            InvalidReason::Unreadable(e) => write!(f, "is not readable ({})", e),
            InvalidReason::NotUtf8 => f.write_str("is not valid UTF-8"),
        }
    }
}

/// Errors that can occur while resolving a folder
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Invalid folder {path}: {reason}")]
    InvalidFolder { path: String, reason: InvalidReason },

    #[error(transparent)]
    Dialog(#[from] DialogError),
}

impl SelectionError {
    fn invalid(path: impl Into<String>, reason: InvalidReason) -> Self {
        SelectionError::InvalidFolder {
            path: path.into(),
            reason,
        }
    }
}

/// Turns user input into validated [`FolderSelection`]s.
///
/// Only stat and read-dir calls are made; the target folder is never modified.
#[derive(Debug, Clone, Default)]
pub struct FolderSelectionService;

impl FolderSelectionService {
    pub fn new() -> Self {
        Self
    }

    /// Validate `raw` and normalize it to a canonical absolute path.
    ///
    /// Accepts surrounding whitespace and quotes (as pasted from file managers),
    /// a leading `~`, and paths relative to the current directory.
    pub fn select(&self, source: SelectionSource, raw: &str) -> Result<FolderSelection, SelectionError> {
        let requested = normalize_input(raw).ok_or_else(|| SelectionError::invalid(raw, InvalidReason::Empty))?;

        let path = validate_directory(&requested)
            .map_err(|reason| SelectionError::invalid(requested.display().to_string(), reason))?;

        tracing::debug!("Selected folder {} via {}", path, source);

        Ok(FolderSelection {
            path,
            source,
            resolved_at: Local::now(),
        })
    }

    /// Ask the native picker for a folder, then validate it like manual input.
    pub fn select_from_dialog(
        &self,
        adapter: &NativeDialogAdapter,
        capability: DialogCapability,
    ) -> Result<FolderSelection, SelectionError> {
        let raw = adapter.open_folder_dialog(capability)?;
        self.select(SelectionSource::NativeDialog, &raw)
    }

    /// Re-check a selection; folders may vanish between selection and processing.
    pub fn revalidate(&self, selection: &FolderSelection) -> Result<(), SelectionError> {
        validate_directory(selection.path.as_std_path())
            .map(|_| ())
            .map_err(|reason| SelectionError::invalid(selection.path.as_str(), reason))
    }
}

fn normalize_input(raw: &str) -> Option<PathBuf> {
    let mut text = raw.trim();
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim();
        }
    }
    if text.is_empty() {
        return None;
    }

    let expanded = if text == "~" {
        dirs::home_dir()?
    } else if let Some(rest) = text.strip_prefix("~/").or_else(|| text.strip_prefix("~\\")) {
        dirs::home_dir()?.join(rest)
    } else {
        PathBuf::from(text)
    };

    if expanded.is_absolute() {
        Some(expanded)
    } else {
        std::path::absolute(&expanded).ok()
    }
}

fn validate_directory(path: &Path) -> Result<Utf8PathBuf, InvalidReason> {
    let canonical = fs::canonicalize(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => InvalidReason::NotFound,
        _ => InvalidReason::Unreadable(e.to_string()),
    })?;

    let metadata = fs::metadata(&canonical).map_err(|e| InvalidReason::Unreadable(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(InvalidReason::NotADirectory);
    }

    fs::read_dir(&canonical).map_err(|e| InvalidReason::Unreadable(e.to_string()))?;

    Utf8PathBuf::from_path_buf(canonical).map_err(|_| InvalidReason::NotUtf8)
}

/// Whether `path` has a supported image extension (case-insensitive).
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Count supported images below `folder`, recursively.
///
/// Fails only when `folder` itself cannot be read; unreadable subdirectories
/// are skipped.
pub fn count_images(folder: &Utf8Path) -> Result<usize, walkdir::Error> {
    let mut count = 0;

    for entry in WalkDir::new(folder) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e),
            Err(e) => {
                tracing::debug!("Skipping unreadable entry under {}: {}", folder, e);
                continue;
            }
        };

        if entry.file_type().is_file() && is_image(entry.path()) {
            count += 1;
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn canonical(dir: &Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(fs::canonicalize(dir).unwrap()).unwrap()
    }

    #[test]
    fn test_select_existing_directory() {
        let temp = TempDir::new().unwrap();
        let service = FolderSelectionService::new();

        let selection = service
            .select(SelectionSource::ManualEntry, temp.path().to_str().unwrap())
            .unwrap();

        assert_eq!(selection.path, canonical(temp.path()));
        assert_eq!(selection.source, SelectionSource::ManualEntry);
    }

    #[test]
    fn test_select_strips_quotes_and_whitespace() {
        let temp = TempDir::new().unwrap();
        let service = FolderSelectionService::new();
        let raw = format!("  \"{}\"  ", temp.path().display());

        let selection = service.select(SelectionSource::BrowserUpload, &raw).unwrap();
        assert_eq!(selection.path, canonical(temp.path()));
    }

    #[test]
    fn test_select_resolves_parent_components() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("a")).unwrap();
        let service = FolderSelectionService::new();
        let raw = temp.path().join("a").join("..").display().to_string();

        let selection = service.select(SelectionSource::ManualEntry, &raw).unwrap();
        assert_eq!(selection.path, canonical(temp.path()));
    }

    #[test]
    fn test_select_missing_path() {
        let temp = TempDir::new().unwrap();
        let service = FolderSelectionService::new();
        let missing = temp.path().join("nope");

        let err = service
            .select(SelectionSource::ManualEntry, missing.to_str().unwrap())
            .unwrap_err();

        assert!(matches!(
            err,
            SelectionError::InvalidFolder {
                reason: InvalidReason::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn test_select_file_is_not_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("photo.jpg");
        fs::write(&file, b"jpeg").unwrap();
        let service = FolderSelectionService::new();

        let err = service
            .select(SelectionSource::ManualEntry, file.to_str().unwrap())
            .unwrap_err();

        assert!(matches!(
            err,
            SelectionError::InvalidFolder {
                reason: InvalidReason::NotADirectory,
                ..
            }
        ));
    }

    #[test]
    fn test_select_empty_input() {
        let service = FolderSelectionService::new();
        for raw in ["", "   ", "\"\""] {
            assert!(matches!(
                service.select(SelectionSource::ManualEntry, raw),
                Err(SelectionError::InvalidFolder {
                    reason: InvalidReason::Empty,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_select_does_not_modify_folder() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.jpg"), b"a").unwrap();
        let service = FolderSelectionService::new();

        service
            .select(SelectionSource::ManualEntry, temp.path().to_str().unwrap())
            .unwrap();

        let entries: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_revalidate_detects_vanished_folder() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("album");
        fs::create_dir(&folder).unwrap();
        let service = FolderSelectionService::new();

        let selection = service
            .select(SelectionSource::ManualEntry, folder.to_str().unwrap())
            .unwrap();
        assert!(service.revalidate(&selection).is_ok());

        fs::remove_dir(&folder).unwrap();
        assert!(service.revalidate(&selection).is_err());
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("a.jpg")));
        assert!(is_image(Path::new("a.JPEG")));
        assert!(is_image(Path::new("dir/b.Tiff")));
        assert!(!is_image(Path::new("notes.txt")));
        assert!(!is_image(Path::new("jpg")));
    }

    #[test]
    fn test_count_images_recursive() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("2024").join("july");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp.path().join("a.jpg"), b"a").unwrap();
        fs::write(temp.path().join("b.PNG"), b"b").unwrap();
        fs::write(nested.join("c.webp"), b"c").unwrap();
        fs::write(nested.join("readme.md"), b"d").unwrap();

        let root = canonical(temp.path());
        assert_eq!(count_images(&root).unwrap(), 3);
    }

    #[test]
    fn test_count_images_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        let missing = canonical(temp.path()).join("gone");
        assert!(count_images(&missing).is_err());
    }
}
