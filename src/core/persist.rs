//! Crash-safe file publishing.
//!
//! Every persisted document is written to a sibling temp file, flushed to
//! disk and renamed over the target. Readers see either the old file or the
//! complete new one, never a torn write.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::trace;
use serde::Serialize;
use uuid::Uuid;

use crate::core::error::{CoreError, Result};

/// Unique hidden sibling path used while `target` is being written.
///
/// Lives in the same directory so the final rename never crosses filesystems.
pub fn temp_sibling(target: &Path, suffix: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    target.with_file_name(format!(".{}.{}.{}", name, Uuid::new_v4().simple(), suffix))
}

/// Create the parent directory of `path` if needed
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                CoreError::StorageFailed(format!("create {}: {}", parent.display(), e))
            })?;
        }
    }
    Ok(())
}

/// Move a fully written temp file onto `target`, removing it on failure
pub fn publish(temp: &Path, target: &Path) -> Result<()> {
    if let Err(e) = fs::rename(temp, target) {
        let _ = fs::remove_file(temp);
        return Err(CoreError::StorageFailed(format!(
            "publish {}: {}",
            target.display(),
            e
        )));
    }
    trace!("Published {}", target.display());
    Ok(())
}

/// Atomically replace `target` with `bytes`
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(target)?;
    let temp = temp_sibling(target, "tmp");

    let written = File::create(&temp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(CoreError::StorageFailed(format!("write {}: {}", target.display(), e)));
    }

    publish(&temp, target)
}

/// Atomically replace `target` with pretty-printed JSON
pub fn write_json<T: Serialize + ?Sized>(target: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(target, json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("tunehub_persist_{}", Uuid::new_v4().simple()))
    }

    #[test]
    fn test_write_atomic_creates_parents_and_replaces() {
        let dir = scratch_dir();
        let target = dir.join("nested").join("doc.json");

        write_atomic(&target, b"first").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "first");

        write_json(&target, &vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(back, vec![1, 2, 3]);

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_temp_sibling_is_hidden_and_unique() {
        let target = Path::new("/music/song.mp3");
        let a = temp_sibling(target, "part");
        let b = temp_sibling(target, "part");
        assert_ne!(a, b);
        assert_eq!(a.parent(), target.parent());
        assert!(a.file_name().unwrap().to_string_lossy().starts_with(".song.mp3."));
        assert!(a.to_string_lossy().ends_with(".part"));
    }
}
