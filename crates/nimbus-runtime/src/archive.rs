//! Deployment archive extraction.
//!
//! A deployment archive is a zip whose root holds an executable named
//! [`ENTRY_POINT`]. Every entry must resolve inside the destination
//! directory; an entry such as `../../etc/evil` fails the whole extraction
//! before anything is written for it.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use zip::ZipArchive;

/// Executable started for every function.
pub const ENTRY_POINT: &str = "bootstrap";

/// Why an archive was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Not a readable zip.
    #[error("invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An entry would land outside the destination.
    #[error("invalid file path: {0}")]
    PathTraversal(String),

    /// The archive has no entry point at its root.
    #[error("archive has no `bootstrap` entry point at its root")]
    MissingEntryPoint,

    /// Writing the extracted tree failed.
    #[error("extraction failed: {0}")]
    Io(#[from] io::Error),
}

/// Unpacks `archive` into `dest`, which must already exist.
pub fn extract_archive(archive: &[u8], dest: &Path) -> Result<(), ArchiveError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let target = entry_target(dest, entry.name(), entry.enclosed_name())?;

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(&target)?;
        io::copy(&mut entry, &mut file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    if !dest.join(ENTRY_POINT).is_file() {
        return Err(ArchiveError::MissingEntryPoint);
    }
    Ok(())
}

/// Resolves where an entry goes, rejecting anything that escapes `dest`.
///
/// The zip crate's enclosed-name check is applied first; the joined path is
/// then checked lexically as well, so neither check alone is relied on.
fn entry_target(
    dest: &Path,
    raw_name: &str,
    enclosed: Option<PathBuf>,
) -> Result<PathBuf, ArchiveError> {
    let relative = enclosed.ok_or_else(|| ArchiveError::PathTraversal(raw_name.to_string()))?;
    let target = normalize(&dest.join(relative));
    if target.starts_with(dest) && target != dest {
        Ok(target)
    } else {
        Err(ArchiveError::PathTraversal(raw_name.to_string()))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            let options = SimpleFileOptions::default().unix_permissions(0o755);
            writer.start_file(*name, options).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extracts_tree() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_zip(&[
            ("bootstrap", b"#!/bin/sh\n"),
            ("lib/data.txt", b"payload"),
        ]);

        extract_archive(&archive, dir.path()).unwrap();

        assert_eq!(
            fs::read(dir.path().join("lib/data.txt")).unwrap(),
            b"payload"
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("bootstrap"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_rejects_path_traversal() {
        let outer = tempfile::tempdir().unwrap();
        let dest = outer.path().join("a").join("b");
        fs::create_dir_all(&dest).unwrap();

        let archive = build_zip(&[("bootstrap", b"x"), ("../../etc/evil", b"owned")]);
        let err = extract_archive(&archive, &dest).unwrap_err();

        assert!(matches!(err, ArchiveError::PathTraversal(ref name) if name == "../../etc/evil"));
        assert!(!outer.path().join("etc").exists());
        assert!(!outer.path().join("etc/evil").exists());
    }

    #[test]
    fn test_rejects_missing_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_zip(&[("main", b"x")]);
        assert!(matches!(
            extract_archive(&archive, dir.path()),
            Err(ArchiveError::MissingEntryPoint)
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            extract_archive(b"not a zip", dir.path()),
            Err(ArchiveError::Zip(_))
        ));
    }

    #[test]
    fn test_lexical_check() {
        let dest = Path::new("/tmp/fn");
        let escaped = entry_target(dest, "x", Some(PathBuf::from("a/../../escape")));
        assert!(escaped.is_err());
        assert!(entry_target(dest, "x", None).is_err());
        assert_eq!(
            entry_target(dest, "x", Some(PathBuf::from("a/./b"))).unwrap(),
            PathBuf::from("/tmp/fn/a/b")
        );
    }
}
