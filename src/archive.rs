//! Move ingested dump files out of the way.
//!
//! Once a dump has been loaded it is compressed into an `archive/`
//! directory next to the original and the original is removed, so a
//! directory of incoming dumps only ever holds unprocessed files.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;

/// Compress `path` into `<dir>/archive/<name>.gz` and remove the original.
/// Returns the path of the compressed file.
pub fn archive_file(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?;
    let archive_dir = path.parent().unwrap_or(Path::new(".")).join("archive");
    fs::create_dir_all(&archive_dir)
        .with_context(|| format!("Failed to create {}", archive_dir.display()))?;

    let mut gz_name = name.to_os_string();
    gz_name.push(".gz");
    let target = archive_dir.join(gz_name);

    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Failed to read {}", path.display()))?,
    );
    let out = File::create(&target)
        .with_context(|| format!("Failed to create {}", target.display()))?;
    let mut encoder = GzEncoder::new(out, Compression::default());
    io::copy(&mut reader, &mut encoder)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    encoder
        .finish()
        .with_context(|| format!("Failed to write {}", target.display()))?;

    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    #[test]
    fn archives_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("usage.dump");
        fs::write(&dump, b"report body").unwrap();

        let target = archive_file(&dump).unwrap();
        assert_eq!(target, dir.path().join("archive").join("usage.dump.gz"));
        assert!(!dump.exists());

        let mut body = String::new();
        GzDecoder::new(File::open(&target).unwrap())
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "report body");

        // the archive directory is reused for later files
        let dump = dir.path().join("short.dump");
        fs::write(&dump, b"x").unwrap();
        archive_file(&dump).unwrap();
        assert!(dir.path().join("archive").join("short.dump.gz").exists());
    }
}
