//! Filesystem helpers for stage outputs and media-root paths.

use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Temp sibling the engine writes before the output is published.
///
/// Keeps the extension so ffmpeg can still pick the muxer from it:
/// `dir/job-cut.mp4` becomes `dir/job-cut.partial.mp4`.
pub fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!("{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!("{}.partial", stem),
    };
    output.with_file_name(name)
}

/// Publish a finished temp file at its final path.
///
/// Fails with `OutputMissing` if the engine did not write the temp file.
/// The rename replaces any output left by an earlier attempt.
pub async fn publish_output(partial: &Path, output: &Path) -> MediaResult<()> {
    match fs::metadata(partial).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(MediaError::OutputMissing(output.to_path_buf())),
    }
    move_file(partial, output).await
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// This function first attempts a fast rename. If that fails with EXDEV
/// (cross-device link error), it falls back to copy-and-delete.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    // Create parent directory if needed before attempting rename
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
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
    // Copy to a temp file in the same directory as dst (ensures same filesystem)
    let tmp_dst = dst.with_extension("tmp");

    fs::copy(src, &tmp_dst).await?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        return Err(MediaError::from(e));
    }

    // Delete source (best effort - log failure but don't fail the operation)
    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source file after cross-device move: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

/// Resolve a client-supplied relative path under `root`.
///
/// Rejects absolute paths and `..` components, then canonicalizes and checks
/// the result still lies under the canonical root (symlinks included).
pub fn resolve_under_root(root: &Path, relative: &str) -> MediaResult<PathBuf> {
    let rel = Path::new(relative);
    let escapes = rel.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if relative.trim().is_empty() || escapes {
        return Err(MediaError::PathOutsideRoot(relative.to_string()));
    }

    let root = std::fs::canonicalize(root)?;
    let joined = root.join(rel);
    let resolved =
        std::fs::canonicalize(&joined).map_err(|_| MediaError::FileNotFound(joined.clone()))?;

    if !resolved.starts_with(&root) {
        return Err(MediaError::PathOutsideRoot(relative.to_string()));
    }
    Ok(resolved)
}

/// Remove a directory tree, logging instead of failing.
pub async fn remove_dir_best_effort(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!("Removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", dir.display(), e),
    }
}
