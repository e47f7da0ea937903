//! Zip archive engine.
//!
//! Opens, validates, extracts and creates addon archives. Extraction is
//! all-or-nothing: a partial failure removes the destination so an
//! aborted extraction is never mistaken for a valid addon directory.
//! Creation walks the source tree children-before-parents and writes
//! explicit directory entries so empty directories survive a round trip.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use super::AddonError;

/// An in-flight extraction unit: where it came from, where it went, and
/// the relative manifest of what it contained.
#[derive(Debug, Clone)]
pub struct ArchiveBundle {
    /// Source archive path.
    pub source: PathBuf,
    /// Extraction destination.
    pub dest: PathBuf,
    /// `(relative path, is-directory)` pairs in archive order.
    pub manifest: Vec<(PathBuf, bool)>,
}

/// Stateless archive operations over the `zip` crate.
pub struct ArchiveEngine;

impl ArchiveEngine {
    /// Extracts an archive under `dest`, creating it if needed.
    ///
    /// Fails with `CorruptArchive` if the archive cannot be opened and
    /// `ExtractError` on partial failure; in the latter case `dest` is
    /// removed before returning.
    pub fn extract(archive_path: &Path, dest: &Path) -> Result<ArchiveBundle, AddonError> {
        let file = File::open(archive_path)
            .map_err(|e| AddonError::CorruptArchive(format!("{}: {}", archive_path.display(), e)))?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| AddonError::CorruptArchive(format!("{}: {}", archive_path.display(), e)))?;

        fs::create_dir_all(dest)
            .map_err(|e| AddonError::ExtractError(format!("{}: {}", dest.display(), e)))?;

        let mut manifest = Vec::new();
        for i in 0..archive.len() {
            let result = Self::extract_entry(&mut archive, i, dest);
            match result {
                Ok(Some(entry)) => manifest.push(entry),
                Ok(None) => {}
                Err(e) => {
                    // Never leave a half-populated addon directory behind.
                    if let Err(cleanup) = fs::remove_dir_all(dest) {
                        warn!("cleanup of {} failed: {}", dest.display(), cleanup);
                    }
                    return Err(AddonError::ExtractError(format!(
                        "{}: {}",
                        archive_path.display(),
                        e
                    )));
                }
            }
        }

        Ok(ArchiveBundle {
            source: archive_path.to_path_buf(),
            dest: dest.to_path_buf(),
            manifest,
        })
    }

    /// Extracts one entry. Returns its manifest pair, or `None` for
    /// entries with unsafe names.
    fn extract_entry(
        archive: &mut ZipArchive<File>,
        index: usize,
        dest: &Path,
    ) -> io::Result<Option<(PathBuf, bool)>> {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| io::Error::other(e.to_string()))?;

        // Entries escaping the destination are skipped, not extracted.
        let Some(relative) = entry.enclosed_name() else {
            warn!("skipping archive entry with unsafe name: {}", entry.name());
            return Ok(None);
        };
        let outpath = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
            return Ok(Some((relative, true)));
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile)?;
        Ok(Some((relative, false)))
    }

    /// Packages `source_dir` into a zip at `archive_path`.
    ///
    /// Walks children before parent directories and adds every directory
    /// as an explicit entry; an archive containing only files would
    /// silently drop empty directories and break idempotent round trips.
    pub fn create(source_dir: &Path, archive_path: &Path) -> Result<(), AddonError> {
        if !source_dir.is_dir() {
            return Err(AddonError::NotFound(source_dir.display().to_string()));
        }

        let file = File::create(archive_path)
            .map_err(|e| AddonError::WriteError(format!("{}: {}", archive_path.display(), e)))?;
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        let mut entries = Vec::new();
        walk_child_first(source_dir, Path::new(""), &mut entries)
            .map_err(|e| AddonError::WriteError(format!("{}: {}", source_dir.display(), e)))?;

        let zip_err =
            |e: zip::result::ZipError| AddonError::WriteError(format!("{}: {}", archive_path.display(), e));

        for (relative, is_dir) in &entries {
            let name = relative.to_string_lossy().replace('\\', "/");
            if *is_dir {
                writer.add_directory(name, options).map_err(zip_err)?;
            } else {
                writer.start_file(name, options).map_err(zip_err)?;
                let mut input = File::open(source_dir.join(relative))
                    .map_err(|e| AddonError::WriteError(format!("{}: {}", relative.display(), e)))?;
                io::copy(&mut input, &mut writer)
                    .map_err(|e| AddonError::WriteError(format!("{}: {}", relative.display(), e)))?;
            }
        }

        writer.finish().map_err(zip_err)?;
        Ok(())
    }

    /// Reads one named entry as text without a full extraction. Used to
    /// pre-validate a descriptor before committing to an install.
    pub fn read_entry_text(archive_path: &Path, entry_name: &str) -> Result<String, AddonError> {
        let file = File::open(archive_path)
            .map_err(|e| AddonError::CorruptArchive(format!("{}: {}", archive_path.display(), e)))?;
        let mut archive = ZipArchive::new(file)
            .map_err(|e| AddonError::CorruptArchive(format!("{}: {}", archive_path.display(), e)))?;

        let mut entry = archive.by_name(entry_name).map_err(|_| {
            AddonError::InvalidPackage(format!("archive is missing required entry '{entry_name}'"))
        })?;
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| AddonError::InvalidPackage(format!("entry '{entry_name}': {e}")))?;
        Ok(text)
    }
}

/// Depth-first walk emitting children before their parent directory.
///
/// The ordering keeps removal-style consumers correct (directory entries
/// are not re-created after the files they contain are handled) and is
/// the order entries land in created archives.
fn walk_child_first(
    dir: &Path,
    relative: &Path,
    out: &mut Vec<(PathBuf, bool)>,
) -> io::Result<()> {
    let mut children: Vec<_> = fs::read_dir(dir)?.filter_map(Result::ok).collect();
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let child_relative = relative.join(child.file_name());
        let path = child.path();
        if path.is_dir() {
            walk_child_first(&path, &child_relative, out)?;
            out.push((child_relative, true));
        } else {
            out.push((child_relative, false));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn build_tree(root: &Path) {
        fs::create_dir_all(root.join("assets").join("css")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("info.ini"), "name = shop\n").unwrap();
        fs::write(root.join("assets").join("css").join("style.css"), "body{}").unwrap();
    }

    fn manifest_paths(bundle: &ArchiveBundle) -> BTreeSet<(PathBuf, bool)> {
        bundle.manifest.iter().cloned().collect()
    }

    #[test]
    fn test_round_trip_preserves_files_and_empty_dirs() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        build_tree(&source);

        let archive = dir.path().join("shop.zip");
        ArchiveEngine::create(&source, &archive).unwrap();

        let first = ArchiveEngine::extract(&archive, &dir.path().join("one")).unwrap();
        let rezip = dir.path().join("again.zip");
        ArchiveEngine::create(&first.dest, &rezip).unwrap();
        let second = ArchiveEngine::extract(&rezip, &dir.path().join("two")).unwrap();

        assert_eq!(manifest_paths(&first), manifest_paths(&second));
        assert!(dir.path().join("two").join("empty").is_dir());
        assert!(
            dir.path()
                .join("two")
                .join("assets")
                .join("css")
                .join("style.css")
                .is_file()
        );
    }

    #[test]
    fn test_walk_emits_children_before_parent() {
        let dir = TempDir::new().unwrap();
        build_tree(dir.path());

        let mut entries = Vec::new();
        walk_child_first(dir.path(), Path::new(""), &mut entries).unwrap();

        let position = |target: &str| {
            entries
                .iter()
                .position(|(p, _)| p == Path::new(target))
                .unwrap()
        };
        assert!(position("assets/css/style.css") < position("assets/css"));
        assert!(position("assets/css") < position("assets"));
    }

    #[test]
    fn test_extract_missing_archive_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let result = ArchiveEngine::extract(&dir.path().join("nope.zip"), &dir.path().join("out"));
        assert!(matches!(result, Err(AddonError::CorruptArchive(_))));
    }

    #[test]
    fn test_extract_garbage_cleans_dest() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("fake.zip");
        fs::write(&fake, b"this is not a zip").unwrap();

        let dest = dir.path().join("out");
        let result = ArchiveEngine::extract(&fake, &dest);
        assert!(matches!(result, Err(AddonError::CorruptArchive(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn test_read_entry_text() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        build_tree(&source);
        let archive = dir.path().join("shop.zip");
        ArchiveEngine::create(&source, &archive).unwrap();

        let text = ArchiveEngine::read_entry_text(&archive, "info.ini").unwrap();
        assert_eq!(text, "name = shop\n");

        assert!(matches!(
            ArchiveEngine::read_entry_text(&archive, "missing.ini"),
            Err(AddonError::InvalidPackage(_))
        ));
    }
}
