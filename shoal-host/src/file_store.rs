//! Resume blobs on disk: `<hex>.resume` per transfer plus the previous blob as
//! `<hex>.resume.prev`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use shoal_core::{InfoHash, ResumeStore, StoreError};

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn current_path(&self, info_hash: &InfoHash) -> PathBuf {
        self.dir.join(format!("{}.resume", info_hash.to_hex()))
    }

    fn previous_path(&self, info_hash: &InfoHash) -> PathBuf {
        self.dir.join(format!("{}.resume.prev", info_hash.to_hex()))
    }
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_synced(path: &Path, blob: &[u8]) -> io::Result<()> {
    let mut f = fs::File::create(path)?;
    f.write_all(blob)?;
    f.sync_all()
}

fn remove_optional(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl FileStore {
    fn temp_path(&self, info_hash: &InfoHash, suffix: &str) -> PathBuf {
        self.dir.join(format!(
            ".{}.{}.{suffix}",
            info_hash.to_hex(),
            uuid::Uuid::new_v4()
        ))
    }

    /// Atomically replace the checkpoint with the current blob, leaving the
    /// current blob where it is.
    fn rotate_checkpoint(&self, info_hash: &InfoHash, current: &Path) -> io::Result<()> {
        let staged = self.temp_path(info_hash, "prev.tmp");
        if let Err(e) = fs::hard_link(current, &staged) {
            tracing::debug!(error = %e, "hard link failed, copying checkpoint");
            if let Err(e) = fs::copy(current, &staged) {
                let _ = fs::remove_file(&staged);
                return Err(e);
            }
        }
        fs::rename(&staged, self.previous_path(info_hash))
    }
}

impl ResumeStore for FileStore {
    /// Write to a uniquely named temp file and sync it. The current blob then
    /// becomes the checkpoint and the temp file is renamed over it. Each step
    /// is a single rename, so `<hex>.resume` always holds a complete blob once
    /// the first save finished.
    fn save(&self, info_hash: &InfoHash, blob: &[u8]) -> Result<(), StoreError> {
        let current = self.current_path(info_hash);
        let tmp = self.temp_path(info_hash, "tmp");

        if let Err(e) = write_synced(&tmp, blob) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        if current.exists() {
            if let Err(e) = self.rotate_checkpoint(info_hash, &current) {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        }
        fs::rename(&tmp, &current)?;
        tracing::trace!(%info_hash, bytes = blob.len(), "resume blob saved");
        Ok(())
    }

    fn load(&self, info_hash: &InfoHash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(read_optional(&self.current_path(info_hash))?)
    }

    fn load_checkpoint(&self, info_hash: &InfoHash) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(read_optional(&self.previous_path(info_hash))?)
    }

    fn remove(&self, info_hash: &InfoHash) -> Result<(), StoreError> {
        remove_optional(&self.current_path(info_hash))?;
        remove_optional(&self.previous_path(info_hash))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_core::store::save_snapshot;
    use shoal_core::{decode_snapshot, ResumeSnapshot};

    fn id(b: u8) -> InfoHash {
        InfoHash::from_bytes([b; 20])
    }

    #[test]
    fn missing_blob_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.load(&id(1)).unwrap().is_none());
        assert!(store.load_checkpoint(&id(1)).unwrap().is_none());
        store.remove(&id(1)).unwrap();
    }

    #[test]
    fn save_rotates_previous_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("nested")).unwrap();

        store.save(&id(1), b"first").unwrap();
        store.save(&id(1), b"second").unwrap();
        assert_eq!(store.load(&id(1)).unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.load_checkpoint(&id(1)).unwrap(), Some(b"first".to_vec()));
        assert!(store.load(&id(2)).unwrap().is_none());

        // no temp files left behind
        let names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));

        store.remove(&id(1)).unwrap();
        assert!(store.load(&id(1)).unwrap().is_none());
        assert!(store.load_checkpoint(&id(1)).unwrap().is_none());
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut snap = ResumeSnapshot::new(id(7), 12);
        snap.set_verified([0usize, 5, 11]);
        save_snapshot(&FileStore::open(dir.path()).unwrap(), &snap).unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        let blob = reopened.load(&id(7)).unwrap().unwrap();
        assert_eq!(decode_snapshot(&blob).unwrap(), snap);
    }

    #[test]
    fn checkpoint_is_independent_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save(&id(3), b"one").unwrap();
        store.save(&id(3), b"two").unwrap();
        store.save(&id(3), b"three").unwrap();
        assert_eq!(store.load(&id(3)).unwrap(), Some(b"three".to_vec()));
        assert_eq!(store.load_checkpoint(&id(3)).unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn current_blob_survives_interrupted_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.save(&id(4), b"old").unwrap();

        // first half of a save: checkpoint rotated, new blob never renamed in
        store.rotate_checkpoint(&id(4), &store.current_path(&id(4))).unwrap();
        assert_eq!(store.load(&id(4)).unwrap(), Some(b"old".to_vec()));
        assert_eq!(store.load_checkpoint(&id(4)).unwrap(), Some(b"old".to_vec()));
    }
}
