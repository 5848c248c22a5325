//! File-backed ratchet store.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use zeroize::Zeroizing;

use super::SecretStore;
use crate::error::StoreError;

/// A store backed by one file, opened once for read and write.
///
/// [`open`](Self::open) never creates the file: a missing ratchet file is a
/// deployment error, not something to paper over with a fresh secret.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    path: PathBuf,
}

impl FileStore {
    /// Open an existing store file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::Io(format!("{}: {e}", path.display())))?;

        Ok(Self { file, path: path.to_path_buf() })
    }

    /// Create a new, empty store file. Fails if the file already exists.
    ///
    /// On Unix the file is created with mode `0600`.
    pub fn create_new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file =
            options.open(path).map_err(|e| StoreError::Io(format!("{}: {e}", path.display())))?;

        Ok(Self { file, path: path.to_path_buf() })
    }

    /// Path this store was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretStore for FileStore {
    fn read_record(&mut self) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut contents = Zeroizing::new(Vec::new());
        self.file.read_to_end(&mut contents)?;
        Ok(contents)
    }

    fn write_at_start(&mut self, record: &[u8]) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(record)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_does_not_create_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileStore::open(dir.path().join("missing.ratchet"));
        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[test]
    fn create_new_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.ratchet");

        FileStore::create_new(&path).unwrap();
        assert!(FileStore::create_new(&path).is_err());
    }

    #[test]
    fn write_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.ratchet");

        let mut store = FileStore::create_new(&path).unwrap();
        store.write_at_start(b"first record").unwrap();
        store.sync().unwrap();
        store.write_at_start(b"SECOND").unwrap();
        store.sync().unwrap();

        let contents = store.read_record().unwrap();
        assert_eq!(&contents[..], b"SECONDrecord");
        assert_eq!(store.path(), path.as_path());
    }

    #[cfg(unix)]
    #[test]
    fn created_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.ratchet");
        FileStore::create_new(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
