//! Zip packages for books and collection-level files.
//!
//! A book package holds the book folder's files (minus the status sidecar);
//! its archive comment holds the repo copy of the book's status record.
//! Every write goes to `<name>.tmp` first and is renamed into place once
//! complete.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::checksum::book_files;
use crate::error::PackageError;

pub const PACKAGE_EXTENSION: &str = "book";
pub const TEMP_SUFFIX: &str = ".tmp";

/// `<path>.tmp`, the in-flight name of a package being written.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Package every file of `folder` into `dest`.
pub fn write_package(folder: &Path, dest: &Path, comment: &str) -> Result<(), PackageError> {
    let entries = book_files(folder).map_err(|e| PackageError::Io(io::Error::other(e.to_string())))?;
    write_entries(&entries, dest, Some(comment))
}

/// Write `(entry name, source file)` pairs into `dest` via a temp file.
pub fn write_entries(
    entries: &[(String, PathBuf)],
    dest: &Path,
    comment: Option<&str>,
) -> Result<(), PackageError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(dest);
    let result = write_zip(entries, &tmp, comment);
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, dest)?;
    Ok(())
}

fn write_zip(
    entries: &[(String, PathBuf)],
    path: &Path,
    comment: Option<&str>,
) -> Result<(), PackageError> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let options = FileOptions::<()>::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for (name, source) in entries {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&fs::read(source)?)?;
    }
    if let Some(comment) = comment {
        zip.set_comment(comment.to_string());
    }
    let file = zip.finish()?;
    file.sync_all()?;
    Ok(())
}

fn open(path: &Path) -> Result<ZipArchive<File>, PackageError> {
    Ok(ZipArchive::new(File::open(path)?)?)
}

/// The archive comment as text.
pub fn read_comment(path: &Path) -> Result<String, PackageError> {
    let archive = open(path)?;
    String::from_utf8(archive.comment().to_vec())
        .map_err(|e| PackageError::BadComment(e.to_string()))
}

/// Replace the archive comment, copying entries unchanged into a temp package.
pub fn rewrite_comment(path: &Path, comment: &str) -> Result<(), PackageError> {
    let mut archive = open(path)?;
    let tmp = temp_path(path);
    let result = (|| -> Result<(), PackageError> {
        let mut zip = ZipWriter::new(File::create(&tmp)?);
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            zip.raw_copy_file(entry)?;
        }
        zip.set_comment(comment.to_string());
        zip.finish()?.sync_all()?;
        Ok(())
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    drop(archive);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Contents of one entry, `None` when the package has no such file.
pub fn read_entry(path: &Path, name: &str) -> Result<Option<String>, PackageError> {
    let mut archive = open(path)?;
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut content = String::new();
    io::Read::read_to_string(&mut entry, &mut content)?;
    Ok(Some(content))
}

/// Unpack into `dest`, replacing whatever folder is there only once the
/// whole archive has been extracted.
pub fn extract_package(path: &Path, dest: &Path) -> Result<(), PackageError> {
    let mut archive = open(path)?;
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let name = dest.file_name().unwrap_or_default().to_string_lossy().into_owned();
    let incoming = parent.join(format!(".{name}.incoming-{}", Uuid::new_v4()));
    fs::create_dir_all(&incoming)?;

    if let Err(e) = archive.extract(&incoming) {
        let _ = fs::remove_dir_all(&incoming);
        return Err(e.into());
    }
    replace_dir(&incoming, dest)?;
    Ok(())
}

/// Unpack into `dest` without removing files the archive does not contain.
pub fn extract_over(path: &Path, dest: &Path) -> Result<(), PackageError> {
    let mut archive = open(path)?;
    fs::create_dir_all(dest)?;
    archive.extract(dest)?;
    Ok(())
}

fn replace_dir(incoming: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        let name = dest.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let replaced = parent.join(format!(".{name}.replaced-{}", Uuid::new_v4()));
        fs::rename(dest, &replaced)?;
        if let Err(e) = fs::rename(incoming, dest) {
            fs::rename(&replaced, dest)?;
            return Err(e);
        }
        fs::remove_dir_all(&replaced)?;
    } else {
        fs::rename(incoming, dest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::STATUS_FILE_NAME;
    use tempfile::TempDir;

    fn make_book(root: &Path, name: &str, content: &str) -> PathBuf {
        let folder = root.join(name);
        fs::create_dir_all(folder.join("images")).unwrap();
        fs::write(folder.join(format!("{name}.htm")), content).unwrap();
        fs::write(folder.join("images").join("cover.png"), [1u8, 2, 3]).unwrap();
        fs::write(folder.join(STATUS_FILE_NAME), "{}").unwrap();
        folder
    }

    #[test]
    fn package_round_trip_restores_files_without_sidecar() {
        let dir = TempDir::new().unwrap();
        let folder = make_book(dir.path(), "Ducks", "<p>quack</p>");
        let package = dir.path().join("repo").join("Ducks.book");

        write_package(&folder, &package, "{\"checksum\":\"x\"}").unwrap();
        assert!(package.exists());
        assert!(!temp_path(&package).exists());
        assert_eq!(read_comment(&package).unwrap(), "{\"checksum\":\"x\"}");

        let dest = dir.path().join("out").join("Ducks");
        extract_package(&package, &dest).unwrap();
        assert_eq!(
            fs::read_to_string(dest.join("Ducks.htm")).unwrap(),
            "<p>quack</p>"
        );
        assert!(dest.join("images").join("cover.png").exists());
        assert!(!dest.join(STATUS_FILE_NAME).exists());
    }

    #[test]
    fn rewrite_comment_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let folder = make_book(dir.path(), "Geese", "honk");
        let package = dir.path().join("Geese.book");
        write_package(&folder, &package, "old").unwrap();

        rewrite_comment(&package, "new").unwrap();
        assert_eq!(read_comment(&package).unwrap(), "new");
        assert_eq!(
            read_entry(&package, "Geese.htm").unwrap().as_deref(),
            Some("honk")
        );
        assert_eq!(read_entry(&package, "meta.json").unwrap(), None);
    }

    #[test]
    fn extract_replaces_existing_folder() {
        let dir = TempDir::new().unwrap();
        let folder = make_book(dir.path(), "Pigs", "new content");
        let package = dir.path().join("Pigs.book");
        write_package(&folder, &package, "").unwrap();

        let dest = dir.path().join("local").join("Pigs");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        extract_package(&package, &dest).unwrap();
        assert!(!dest.join("stale.txt").exists());
        assert_eq!(fs::read_to_string(dest.join("Pigs.htm")).unwrap(), "new content");
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("local"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn garbage_file_is_not_a_package() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("Broken.book");
        fs::write(&package, "definitely not a zip").unwrap();
        assert!(read_comment(&package).is_err());
        assert!(extract_package(&package, &dir.path().join("Broken")).is_err());
        assert!(!dir.path().join("Broken").exists());
    }
}
