//! Input collection
//!
//! Turns the paths given on the command line into the list of source files
//! for a run. Explicit files are taken as given; directories are walked for
//! video files; glob patterns are expanded here, so quoted patterns work too.

use glob::{glob_with, MatchOptions};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Video file extensions picked up when walking a directory (case-insensitive).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mkv", ".mp4", ".avi", ".mov", ".m4v", ".ts", ".m2ts", ".webm"];

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Video files below a directory, sorted, skipping hidden directories
fn walk_directory(root: &Path) -> Vec<PathBuf> {
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        // The root itself may be hidden
        if entry.file_type().is_dir() && entry.depth() > 0 {
            if let Some(name) = entry.file_name().to_str() {
                return !name.starts_with('.');
            }
        }
        true
    });

    let mut files: Vec<PathBuf> = walker
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Whether an argument should be expanded as a glob pattern
fn is_glob_pattern(path: &Path) -> bool {
    path.to_str()
        .map(|s| s.contains(['*', '?', '[']))
        .unwrap_or(false)
}

/// Paths matching a glob pattern, in sorted order
///
/// Like a shell, `*` and `?` do not match a leading dot.
fn expand_pattern(pattern: &str) -> Vec<PathBuf> {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };

    let entries = match glob_with(pattern, options) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(pattern, error = %e, "Invalid input pattern, skipping");
            return Vec::new();
        }
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(pattern, error = %e, "Unreadable pattern match, skipping");
                None
            }
        })
        .collect();
    matches.sort();
    matches
}

/// Expand one argument into the files it names
fn expand_argument(path: &Path) -> Vec<PathBuf> {
    if path.is_dir() {
        let files = walk_directory(path);
        debug!(dir = %path.display(), count = files.len(), "Scanned directory");
        return files;
    }
    if path.is_file() {
        return vec![path.to_path_buf()];
    }

    match path.to_str() {
        Some(pattern) if is_glob_pattern(path) => {
            let matches = expand_pattern(pattern);
            if matches.is_empty() {
                warn!(pattern, "Input pattern matched nothing, skipping");
            }
            matches
                .into_iter()
                .flat_map(|m| if m.is_dir() { walk_directory(&m) } else { vec![m] })
                .collect()
        }
        _ => {
            warn!(path = %path.display(), "Input not found, skipping");
            Vec::new()
        }
    }
}

/// Expand the given paths into the ordered, de-duplicated input list
///
/// - a file is taken as given, whatever its extension
/// - a directory contributes every video file below it, sorted
/// - a glob pattern contributes its matches, sorted; matched directories are walked
/// - a missing path or an empty pattern is logged and skipped
///
/// Only the first occurrence of a file is kept.
pub fn collect_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::new();

    for path in paths {
        for file in expand_argument(path) {
            // Compare canonical forms so `./a.mp4` and `a.mp4` are one input
            let key = file.canonicalize().unwrap_or_else(|_| file.clone());
            if seen.insert(key) {
                inputs.push(file);
            } else {
                debug!(path = %file.display(), "Duplicate input ignored");
            }
        }
    }

    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/media/movie.mkv")));
        assert!(is_video_file(Path::new("/media/movie.MKV"))); // case-insensitive
        assert!(is_video_file(Path::new("/media/movie.Mp4")));
        assert!(is_video_file(Path::new("/media/movie.m2ts")));
        assert!(is_video_file(Path::new("/media/clip.webm")));
        assert!(!is_video_file(Path::new("/media/movie.txt")));
        assert!(!is_video_file(Path::new("/media/movie.srt")));
        assert!(!is_video_file(Path::new("/media/movie"))); // no extension
    }

    #[test]
    fn test_explicit_files_kept_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let b = temp_dir.path().join("b.mp4");
        let a = temp_dir.path().join("a.mov");
        let notes = temp_dir.path().join("notes.bin");
        for p in [&a, &b, &notes] {
            File::create(p).unwrap();
        }

        let inputs = collect_inputs(&[b.clone(), a.clone(), notes.clone()]);
        assert_eq!(inputs, vec![b, a, notes]);
    }

    #[test]
    fn test_directory_walk_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("season1")).unwrap();
        File::create(root.join("season1/ep02.mkv")).unwrap();
        File::create(root.join("season1/ep01.mkv")).unwrap();
        File::create(root.join("season1/ep01.srt")).unwrap();
        File::create(root.join("trailer.mp4")).unwrap();

        let inputs = collect_inputs(&[root.to_path_buf()]);
        assert_eq!(
            inputs,
            vec![
                root.join("season1/ep01.mkv"),
                root.join("season1/ep02.mkv"),
                root.join("trailer.mp4"),
            ]
        );
    }

    #[test]
    fn test_missing_paths_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let real = temp_dir.path().join("real.mkv");
        File::create(&real).unwrap();

        let inputs = collect_inputs(&[temp_dir.path().join("missing.mkv"), real.clone()]);
        assert_eq!(inputs, vec![real]);
    }

    #[test]
    fn test_duplicates_removed() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.mkv");
        File::create(&a).unwrap();

        let inputs = collect_inputs(&[a.clone(), temp_dir.path().to_path_buf(), a.clone()]);
        assert_eq!(inputs, vec![a]);
    }

    #[test]
    fn test_glob_pattern_expanded() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("season1")).unwrap();
        File::create(root.join("b.mp4")).unwrap();
        File::create(root.join("a.mp4")).unwrap();
        File::create(root.join("c.mkv")).unwrap();
        File::create(root.join(".hidden.mp4")).unwrap();
        File::create(root.join("season1/ep01.mp4")).unwrap();

        let pattern = root.join("*.mp4");
        let inputs = collect_inputs(&[pattern]);
        assert_eq!(inputs, vec![root.join("a.mp4"), root.join("b.mp4")]);
    }

    #[test]
    fn test_glob_matching_directories_walks_them() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("season1")).unwrap();
        fs::create_dir_all(root.join("season2")).unwrap();
        File::create(root.join("season1/ep01.mkv")).unwrap();
        File::create(root.join("season2/ep01.mkv")).unwrap();
        File::create(root.join("season2/notes.txt")).unwrap();

        let inputs = collect_inputs(&[root.join("season?"), root.join("season1/*.mkv")]);
        assert_eq!(
            inputs,
            vec![root.join("season1/ep01.mkv"), root.join("season2/ep01.mkv")]
        );
    }

    #[test]
    fn test_unmatched_or_invalid_pattern_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let real = temp_dir.path().join("real.mkv");
        File::create(&real).unwrap();

        let inputs = collect_inputs(&[
            temp_dir.path().join("*.webm"),
            temp_dir.path().join("[unclosed"),
            real.clone(),
        ]);
        assert_eq!(inputs, vec![real]);
    }

    #[test]
    fn test_existing_path_with_brackets_taken_literally() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("Show [1080p].mkv");
        File::create(&file).unwrap();

        assert_eq!(collect_inputs(&[file.clone()]), vec![file]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        // Files under hidden directories are never collected
        #[test]
        fn prop_hidden_directory_exclusion(
            visible_dir in "[a-zA-Z0-9]{1,10}",
            hidden_dir in "\\.[a-zA-Z0-9]{1,10}",
            filename in "[a-zA-Z0-9]{1,10}",
        ) {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path();

            let visible_path = root.join(&visible_dir);
            fs::create_dir_all(&visible_path).unwrap();
            let visible_video = visible_path.join(format!("{}.mkv", filename));
            File::create(&visible_video).unwrap();

            let hidden_path = root.join(&hidden_dir);
            fs::create_dir_all(&hidden_path).unwrap();
            let hidden_video = hidden_path.join(format!("{}.mkv", filename));
            File::create(&hidden_video).unwrap();

            let inputs = collect_inputs(&[root.to_path_buf()]);

            prop_assert!(inputs.contains(&visible_video));
            prop_assert!(!inputs.contains(&hidden_video));
        }

        #[test]
        fn prop_video_extension_filtering(
            basename in "[a-zA-Z0-9_-]{1,20}",
            ext in prop_oneof![
                Just("mkv"), Just("MKV"), Just("mp4"), Just("Mp4"),
                Just("avi"), Just("mov"), Just("m4v"), Just("TS"),
                Just("m2ts"), Just("webm"), Just("WebM"),
                Just("txt"), Just("jpg"), Just("srt"), Just("nfo"),
            ],
        ) {
            let path = PathBuf::from(format!("/media/{}.{}", basename, ext));
            let expected = matches!(
                ext.to_lowercase().as_str(),
                "mkv" | "mp4" | "avi" | "mov" | "m4v" | "ts" | "m2ts" | "webm"
            );
            prop_assert_eq!(is_video_file(&path), expected);
        }
    }
}
