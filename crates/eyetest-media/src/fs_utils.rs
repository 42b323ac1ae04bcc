//! Filesystem utilities: cross-device moves, free-space checks, output naming.

use std::path::{Path, PathBuf};
use tokio::fs;

use eyetest_models::encoding::OUTPUT_EXTENSION;
use eyetest_models::FilterPreset;

use crate::error::{MediaError, MediaResult};

/// Longest source stem kept in output file names.
const MAX_STEM_CHARS: usize = 50;

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// This function first attempts a fast rename. If that fails with EXDEV
/// (cross-device link error), it falls back to copy-and-delete.
///
/// The copy is performed to a temporary file first, then renamed to the
/// destination to ensure atomicity on the destination filesystem.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

/// Copy file to destination (via temp file) then delete source.
async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    // Same directory as dst, so the final rename stays on one filesystem
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Failed to copy file during cross-device move: {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        MediaError::from(e)
    })?;

    fs::rename(&tmp_dst, dst).await.map_err(|e| {
        let _ = std::fs::remove_file(&tmp_dst);
        tracing::error!(
            "Failed to rename temp file during cross-device move: {} -> {}: {}",
            tmp_dst.display(),
            dst.display(),
            e
        );
        MediaError::from(e)
    })?;

    // Best effort: the destination is already complete
    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source file after cross-device move: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

/// Free bytes available to unprivileged users on the filesystem holding `path`.
///
/// `path` need not exist yet; its nearest existing ancestor is checked.
/// Returns `None` when the platform gives no answer.
pub fn available_space(path: &Path) -> Option<u64> {
    let existing = path.ancestors().find(|p| p.exists())?;
    statvfs_available(existing)
}

#[cfg(unix)]
fn statvfs_available(path: &Path) -> Option<u64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    Some(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

#[cfg(not(unix))]
fn statvfs_available(_path: &Path) -> Option<u64> {
    None
}

/// Fail with [`MediaError::ResourceLimit`] when less than `required` bytes are free.
///
/// An unknown amount of free space passes the check.
pub fn ensure_disk_space(path: &Path, required: u64) -> MediaResult<()> {
    match available_space(path) {
        Some(free) if free < required => Err(MediaError::ResourceLimit(format!(
            "{} free at {}, {} required",
            format_size(free),
            path.display(),
            format_size(required)
        ))),
        Some(free) => {
            tracing::debug!(path = %path.display(), free = %format_size(free), "Disk space check passed");
            Ok(())
        }
        None => {
            tracing::warn!(path = %path.display(), "Could not determine free disk space");
            Ok(())
        }
    }
}

/// Format bytes as human-readable string (B, KB, MB, GB, TB).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Reduce a source stem to word characters, spaces and dashes, at most 50 chars.
pub fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == ' ' || *c == '-')
        .take(MAX_STEM_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `<dir>/<sanitized stem>_eyetest_<preset>.mp4` for `source`.
pub fn output_path_for(source: &Path, output_dir: &Path, preset: FilterPreset) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!(
        "{}_eyetest_{}.{}",
        sanitize_stem(&stem),
        preset.as_filename_part(),
        OUTPUT_EXTENSION
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_same_filesystem() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.mp4");
        let dst = dir.path().join("dest.mp4");

        fs::write(&src, b"test content").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists(), "Source file should be removed");
        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "test content");
    }

    #[tokio::test]
    async fn test_move_file_to_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.mp4");
        let dst = dir.path().join("out").join("dest.mp4");

        fs::write(&src, b"test content").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert!(dst.exists());
    }

    #[tokio::test]
    async fn test_copy_and_delete_fallback() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.mp4");
        let dst = dir.path().join("dest.mp4");
        fs::write(&src, b"payload").await.unwrap();

        copy_and_delete(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert!(!dst.with_extension("tmp").exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"payload");
    }

    #[test]
    fn test_is_cross_device_error() {
        let exdev_error = std::io::Error::from_raw_os_error(18);
        assert!(is_cross_device_error(&exdev_error));

        let not_found = std::io::Error::from_raw_os_error(2);
        assert!(!is_cross_device_error(&not_found));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0 GB");
    }

    #[test]
    fn test_output_path_for() {
        let path = output_path_for(
            Path::new("/videos/Derby: 2-1 (highlights)!.mov"),
            Path::new("/out"),
            FilterPreset::Cool,
        );
        assert_eq!(
            path,
            PathBuf::from("/out/Derby 2-1 highlights_eyetest_cool.mp4")
        );

        let long = "a".repeat(80);
        let path = output_path_for(Path::new(&format!("{long}.mp4")), Path::new("/out"), FilterPreset::Warm);
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("{}_eyetest_warm.mp4", "a".repeat(50))
        );

        let path = output_path_for(Path::new("???.mp4"), Path::new("/out"), FilterPreset::Warm);
        assert_eq!(path, PathBuf::from("/out/video_eyetest_warm.mp4"));
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_space_checks() {
        let dir = TempDir::new().unwrap();
        assert!(available_space(&dir.path().join("not/yet/created")).is_some());
        assert!(ensure_disk_space(dir.path(), 0).is_ok());
        assert!(matches!(
            ensure_disk_space(dir.path(), u64::MAX),
            Err(MediaError::ResourceLimit(_))
        ));
    }
}
