//! Write-then-rename output files.
//!
//! Encoders write into a temporary sibling of the target. Only
//! [`AtomicFile::commit`] moves it into place; dropping the value on any
//! error or cancellation deletes the temporary, so a failed save never
//! leaves a truncated file under the target name.

use super::loader::CodecError;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

pub struct AtomicFile {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl AtomicFile {
    pub fn create(target: &Path) -> Result<Self, CodecError> {
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        // Same extension as the target, for encoders that pick a format by name.
        let suffix = target
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let tmp = Builder::new()
            .prefix(".partial-")
            .suffix(&suffix)
            .tempfile_in(dir)
            .map_err(|source| CodecError::Write {
                path: target.to_path_buf(),
                source,
            })?;
        Ok(Self {
            tmp,
            target: target.to_path_buf(),
        })
    }

    /// Location of the temporary file, for encoders that only write by path.
    pub fn path(&self) -> &Path {
        self.tmp.path()
    }

    pub fn file(&mut self) -> &mut File {
        self.tmp.as_file_mut()
    }

    /// Flush to disk and rename over the target.
    pub fn commit(self) -> Result<(), CodecError> {
        self.tmp.as_file().sync_all().map_err(|source| CodecError::Write {
            path: self.target.clone(),
            source,
        })?;
        let target = self.target;
        self.tmp.persist(&target).map_err(|e| CodecError::Write {
            path: target.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn commit_moves_into_place() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.bin");
        let mut file = AtomicFile::create(&target).unwrap();
        file.file().write_all(b"data").unwrap();
        file.commit().unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"data");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn drop_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.bin");
        {
            let mut file = AtomicFile::create(&target).unwrap();
            file.file().write_all(b"partial").unwrap();
        }
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn temporary_keeps_target_extension() {
        let tmp = TempDir::new().unwrap();
        let file = AtomicFile::create(&tmp.path().join("out.qoi")).unwrap();
        assert_eq!(file.path().extension().and_then(|e| e.to_str()), Some("qoi"));
    }

    #[test]
    fn missing_directory_is_write_error() {
        let err = AtomicFile::create(Path::new("/nonexistent-dir/x/out.png")).err().unwrap();
        assert!(matches!(err, CodecError::Write { .. }));
    }
}
