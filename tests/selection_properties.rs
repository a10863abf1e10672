//! Property tests for folder selection and result naming

use camino::Utf8PathBuf;
use chrono::{Local, TimeZone};
use facesort::models::{JobId, SelectionSource};
use facesort::services::{FolderSelectionService, InvalidReason, ResultLifecycleManager, SelectionError};
use proptest::prelude::*;
use std::collections::HashSet;
use std::fs;
use tempfile::TempDir;

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]([a-zA-Z0-9 _.-]{0,10}[a-zA-Z0-9_])?"
}

fn canonical_root(temp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::try_from(fs::canonicalize(temp.path()).unwrap()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn existing_directory_resolves_to_canonical_form(
        segments in prop::collection::vec(segment(), 1..4),
        pad in " {0,3}",
        quote in prop::sample::select(vec!["", "\"", "'"]),
    ) {
        let temp = TempDir::new().unwrap();
        let root = canonical_root(&temp);
        let dir = segments.iter().fold(root.clone(), |acc, s| acc.join(s));
        fs::create_dir_all(&dir).unwrap();

        // Reach the directory through a detour and with decoration
        let detour = root.join(&segments[0]).join("..").join(dir.strip_prefix(&root).unwrap());
        let raw = format!("{pad}{quote}{detour}{quote}{pad}");

        let selection = FolderSelectionService::new()
            .select(SelectionSource::ManualEntry, &raw)
            .unwrap();

        prop_assert_eq!(selection.path, dir);
        prop_assert_eq!(selection.source, SelectionSource::ManualEntry);
    }

    #[test]
    fn missing_path_is_rejected(segments in prop::collection::vec(segment(), 1..4)) {
        let temp = TempDir::new().unwrap();
        let missing = segments
            .iter()
            .fold(canonical_root(&temp).join("does-not-exist"), |acc, s| acc.join(s));

        let err = FolderSelectionService::new()
            .select(SelectionSource::ManualEntry, missing.as_str())
            .unwrap_err();

        let is_not_found = matches!(
            err,
            SelectionError::InvalidFolder { reason: InvalidReason::NotFound, .. }
        );
        prop_assert!(is_not_found);
    }

    #[test]
    fn regular_file_is_rejected(name in segment()) {
        let temp = TempDir::new().unwrap();
        let file = canonical_root(&temp).join(&name);
        fs::write(&file, b"not a folder").unwrap();

        let err = FolderSelectionService::new()
            .select(SelectionSource::BrowserUpload, file.as_str())
            .unwrap_err();

        let is_not_dir = matches!(
            err,
            SelectionError::InvalidFolder { reason: InvalidReason::NotADirectory, .. }
        );
        prop_assert!(is_not_dir);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn same_second_results_are_distinct(
        count in 1usize..6,
        secs in 0i64..86_400,
    ) {
        let temp = TempDir::new().unwrap();
        let root = canonical_root(&temp);
        let manager = ResultLifecycleManager::new(root.join("tmp"), root.join("results"));
        let at = Local.timestamp_opt(1_700_000_000 + secs, 0).unwrap();

        let mut paths = HashSet::new();
        for _ in 0..count {
            let mut workspace = manager.allocate_temp(JobId::new()).unwrap();
            let result = manager.materialize_result_at(workspace.job_id(), &workspace, at).unwrap();
            manager.release_temp(&mut workspace).unwrap();
            prop_assert!(result.path.file_name().unwrap().starts_with("facesort_"));
            paths.insert(result.path);
        }

        prop_assert_eq!(paths.len(), count);
        prop_assert_eq!(manager.list_results().unwrap().len(), count);
    }
}
