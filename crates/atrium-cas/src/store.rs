// SPDX-License-Identifier: Apache-2.0
//! Filesystem-backed content store.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{hash_data, is_valid_hash, AssetHash, ByteRange, CasError};

/// Disk-backed content-addressed store.
///
/// Blobs live as flat files in a single directory, each named by the
/// lowercase hex of its SHA-256. The store holds no in-memory index; the
/// directory is the index.
#[derive(Debug, Clone)]
pub struct ContentStore {
    files_dir: PathBuf,
}

impl ContentStore {
    /// Open a store rooted at `files_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::StorageIo`] when the directory cannot be created.
    pub fn open(files_dir: impl Into<PathBuf>) -> Result<Self, CasError> {
        let files_dir = files_dir.into();
        fs::create_dir_all(&files_dir)
            .map_err(|e| CasError::io("creating files directory", e))?;
        Ok(Self { files_dir })
    }

    /// Directory the store serves files from.
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Absolute path of the content file for `hash`, whether or not it
    /// exists yet.
    pub fn path_for(&self, hash: &AssetHash) -> PathBuf {
        self.files_dir.join(hash.to_hex())
    }

    /// Store `bytes`, returning their content hash.
    ///
    /// If a file for the hash already exists and re-hashes cleanly, the
    /// write is skipped. A stale or corrupt file is overwritten. The write
    /// is verified on read-back before success is reported; a failed write
    /// removes the partial file.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::StorageIo`] on filesystem failure and
    /// [`CasError::HashMismatch`] when the read-back bytes do not hash to
    /// the expected name.
    pub fn put(&self, bytes: &[u8]) -> Result<AssetHash, CasError> {
        let hash = hash_data(bytes);
        let path = self.path_for(&hash);

        if path.exists() {
            // Contents either match (dedup, skip the write) or the file is
            // stale and gets overwritten below.
            if let Ok(existing) = fs::read(&path) {
                if hash_data(&existing) == hash {
                    return Ok(hash);
                }
            }
        }

        if let Err(err) = fs::write(&path, bytes) {
            // Never leave a partial file behind under a valid hash name.
            let _ = fs::remove_file(&path);
            return Err(CasError::io("writing content file", err));
        }

        let written =
            fs::read(&path).map_err(|e| CasError::io("verifying content file", e))?;
        let computed = hash_data(&written);
        if computed != hash {
            let _ = fs::remove_file(&path);
            return Err(CasError::HashMismatch {
                expected: hash,
                computed,
            });
        }
        Ok(hash)
    }

    /// True if a content file exists for `hash`.
    pub fn exists(&self, hash: &AssetHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Size in bytes of the content file for `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::NotFound`] when no file exists.
    pub fn size(&self, hash: &AssetHash) -> Result<u64, CasError> {
        let path = self.path_for(hash);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(CasError::NotFound { hash: *hash })
            }
            Err(err) => Err(CasError::io("reading content metadata", err)),
        }
    }

    /// Read `range` of the content file for `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::NotFound`] when no file exists,
    /// [`CasError::InvalidRange`] when the range cannot be satisfied against
    /// the file size, and [`CasError::StorageIo`] on read failure.
    pub fn open_range(&self, hash: &AssetHash, range: ByteRange) -> Result<Vec<u8>, CasError> {
        let path = self.path_for(hash);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CasError::NotFound { hash: *hash });
            }
            Err(err) => return Err(CasError::io("opening content file", err)),
        };
        let size = file
            .metadata()
            .map_err(|e| CasError::io("reading content metadata", e))?
            .len();
        let (offset, len) = range.resolve(size).ok_or(CasError::InvalidRange {
            from: range.from_inclusive,
            to: range.to_exclusive,
            size,
        })?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| CasError::io("seeking content file", e))?;
        let mut out = vec![0u8; len as usize];
        file.read_exact(&mut out)
            .map_err(|e| CasError::io("reading content file", e))?;
        Ok(out)
    }

    /// Read and verify the whole content file for `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::HashMismatch`] if the bytes on disk no longer
    /// hash to their name; otherwise as [`ContentStore::open_range`].
    pub fn read_verified(&self, hash: &AssetHash) -> Result<Vec<u8>, CasError> {
        let path = self.path_for(hash);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CasError::NotFound { hash: *hash });
            }
            Err(err) => return Err(CasError::io("reading content file", err)),
        };
        let computed = hash_data(&bytes);
        if computed != *hash {
            return Err(CasError::HashMismatch {
                expected: *hash,
                computed,
            });
        }
        Ok(bytes)
    }

    /// Unlink the content file for `hash`. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::StorageIo`] on any failure other than the file
    /// already being gone.
    pub fn remove(&self, hash: &AssetHash) -> Result<(), CasError> {
        match fs::remove_file(self.path_for(hash)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CasError::io("removing content file", err)),
        }
    }

    /// Enumerate every directory entry whose name is a 64-hex hash.
    ///
    /// Non-hash entries (temp files, strays) are ignored. The result is
    /// sorted by hash.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::StorageIo`] when the directory cannot be read.
    pub fn list_all_hashes(&self) -> Result<BTreeSet<AssetHash>, CasError> {
        let mut hashes = BTreeSet::new();
        let entries = fs::read_dir(&self.files_dir)
            .map_err(|e| CasError::io("listing files directory", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CasError::io("listing files directory", e))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_valid_hash(name) {
                continue;
            }
            if let Ok(hash) = AssetHash::from_hex(name) {
                hashes.insert(hash);
            }
        }
        Ok(hashes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ContentStore) {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path().join("files")).unwrap();
        (dir, store)
    }

    // ── 1. put + whole-file read round-trip ──────────────────────────────

    #[test]
    fn put_read_round_trip() {
        let (_dir, store) = store();
        let hash = store.put(b"hello atrium").unwrap();
        let got = store
            .open_range(&hash, ByteRange::new(0, b"hello atrium".len() as i64))
            .unwrap();
        assert_eq!(got, b"hello atrium");
    }

    // ── 2. put is idempotent and deduplicating ───────────────────────────

    #[test]
    fn put_idempotent() {
        let (_dir, store) = store();
        let h1 = store.put(b"duplicate").unwrap();
        let h2 = store.put(b"duplicate").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.list_all_hashes().unwrap().len(), 1);
    }

    // ── 3. put repairs a stale file under a hash name ────────────────────

    #[test]
    fn put_overwrites_stale_content() {
        let (_dir, store) = store();
        let hash = crate::hash_data(b"the real bytes");
        // Plant a corrupt file at the hash's name.
        std::fs::write(store.path_for(&hash), b"imposter").unwrap();
        let got = store.put(b"the real bytes").unwrap();
        assert_eq!(got, hash);
        assert_eq!(store.read_verified(&hash).unwrap(), b"the real bytes");
    }

    // ── 4. open_range serves forward and tail ranges ─────────────────────

    #[test]
    fn open_range_forms() {
        let (_dir, store) = store();
        let payload: Vec<u8> = (0u8..100).collect();
        let hash = store.put(&payload).unwrap();

        assert_eq!(
            store.open_range(&hash, ByteRange::new(0, 100)).unwrap(),
            payload
        );
        assert_eq!(
            store.open_range(&hash, ByteRange::new(-100, 0)).unwrap(),
            payload
        );
        assert_eq!(
            store.open_range(&hash, ByteRange::new(-10, 0)).unwrap(),
            &payload[90..]
        );
        assert_eq!(
            store.open_range(&hash, ByteRange::new(10, 20)).unwrap(),
            &payload[10..20]
        );
    }

    // ── 5. open_range error taxonomy ─────────────────────────────────────

    #[test]
    fn open_range_errors() {
        let (_dir, store) = store();
        let hash = store.put(&[0u8; 100]).unwrap();

        assert!(matches!(
            store.open_range(&hash, ByteRange::new(0, 101)),
            Err(CasError::InvalidRange { .. })
        ));
        assert!(matches!(
            store.open_range(&hash, ByteRange::new(0, 0)),
            Err(CasError::InvalidRange { .. })
        ));
        let missing = crate::hash_data(b"never stored");
        assert!(matches!(
            store.open_range(&missing, ByteRange::new(0, 1)),
            Err(CasError::NotFound { .. })
        ));
    }

    // ── 6. size and exists ───────────────────────────────────────────────

    #[test]
    fn size_and_exists() {
        let (_dir, store) = store();
        let hash = store.put(b"12345").unwrap();
        assert!(store.exists(&hash));
        assert_eq!(store.size(&hash).unwrap(), 5);

        let missing = crate::hash_data(b"missing");
        assert!(!store.exists(&missing));
        assert!(matches!(
            store.size(&missing),
            Err(CasError::NotFound { .. })
        ));
    }

    // ── 7. remove is tolerant of missing files ───────────────────────────

    #[test]
    fn remove_missing_is_ok() {
        let (_dir, store) = store();
        let hash = store.put(b"short lived").unwrap();
        store.remove(&hash).unwrap();
        assert!(!store.exists(&hash));
        // Second removal is a no-op.
        store.remove(&hash).unwrap();
    }

    // ── 8. list_all_hashes skips non-hash strays ─────────────────────────

    #[test]
    fn list_skips_strays() {
        let (_dir, store) = store();
        let h1 = store.put(b"one").unwrap();
        let h2 = store.put(b"two").unwrap();
        std::fs::write(store.files_dir().join("stray.tmp"), b"x").unwrap();
        std::fs::write(store.files_dir().join("deadbeef"), b"short name").unwrap();

        let listed = store.list_all_hashes().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&h1));
        assert!(listed.contains(&h2));
    }

    // ── 9. read_verified detects corruption ──────────────────────────────

    #[test]
    fn read_verified_detects_corruption() {
        let (_dir, store) = store();
        let hash = store.put(b"pristine").unwrap();
        std::fs::write(store.path_for(&hash), b"tampered").unwrap();
        assert!(matches!(
            store.read_verified(&hash),
            Err(CasError::HashMismatch { .. })
        ));
    }
}
