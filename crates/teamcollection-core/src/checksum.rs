//! Deterministic content digests for book folders.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;
use crate::local::STATUS_FILE_NAME;

/// Relative path (forward slashes) and absolute path of every file that
/// belongs in a book's package, sorted by relative path.
///
/// The status sidecar and its temp file are excluded.
pub fn book_files(folder: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with(STATUS_FILE_NAME)
        {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(folder)
            .map_err(|e| crate::error::CoreError::Custom(e.to_string()))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// SHA-256 over each file's relative path and bytes, in path order, hex encoded.
///
/// Independent of creation order and timestamps.
pub fn book_checksum(folder: &Path) -> Result<String> {
    digest_files(&book_files(folder)?).map(hex::encode)
}

/// Raw digest over an explicit, already sorted file list.
pub fn digest_files(files: &[(String, PathBuf)]) -> Result<Vec<u8>> {
    let mut hasher = Sha256::new();
    for (relative, path) in files {
        let content = std::fs::read(path)?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn populate(folder: &Path, files: &[(String, Vec<u8>)]) {
        for (name, content) in files {
            let path = folder.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn checksum_ignores_status_sidecar() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &[("book.htm".into(), b"<html/>".to_vec())]);
        let before = book_checksum(dir.path()).unwrap();

        fs::write(dir.path().join(STATUS_FILE_NAME), "{}").unwrap();
        fs::write(dir.path().join(format!("{STATUS_FILE_NAME}.tmp")), "{}").unwrap();
        assert_eq!(book_checksum(dir.path()).unwrap(), before);
    }

    #[test]
    fn checksum_changes_with_content_and_names() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &[("a.txt".into(), b"one".to_vec())]);
        let original = book_checksum(dir.path()).unwrap();

        fs::write(dir.path().join("a.txt"), "two").unwrap();
        let edited = book_checksum(dir.path()).unwrap();
        assert_ne!(original, edited);

        fs::rename(dir.path().join("a.txt"), dir.path().join("b.txt")).unwrap();
        assert_ne!(book_checksum(dir.path()).unwrap(), edited);
    }

    #[test]
    fn book_files_uses_forward_slashes() {
        let dir = TempDir::new().unwrap();
        populate(dir.path(), &[("images/cover.png".into(), vec![1, 2, 3])]);
        let files = book_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "images/cover.png");
    }

    proptest! {
        #[test]
        fn checksum_is_order_independent(
            contents in proptest::collection::btree_map("[a-z]{1,8}", proptest::collection::vec(any::<u8>(), 0..64), 1..6)
        ) {
            let files: Vec<(String, Vec<u8>)> = contents.into_iter().collect();
            let mut reversed = files.clone();
            reversed.reverse();

            let first = TempDir::new().unwrap();
            let second = TempDir::new().unwrap();
            populate(first.path(), &files);
            populate(second.path(), &reversed);

            prop_assert_eq!(
                book_checksum(first.path()).unwrap(),
                book_checksum(second.path()).unwrap()
            );
        }
    }
}
