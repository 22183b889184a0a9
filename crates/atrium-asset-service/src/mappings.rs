// SPDX-License-Identifier: Apache-2.0
//! The path→hash mapping directory with crash-consistent persistence.
//!
//! The whole table lives in memory and is serialized to `map.json` as a flat
//! JSON object on every mutation. Mutations snapshot what they are about to
//! change and roll back if the persist fails, so the in-memory view always
//! equals the last successfully written file.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use atrium_asset_proto::{is_baked_path, is_valid_file_path, is_valid_path, path_is_folder};
use atrium_cas::{is_valid_hash, AssetHash};
use tracing::{debug, info, warn};

/// Errors from mapping operations.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// A path failed validation for the attempted operation.
    #[error("[MAP_INVALID_PATH] invalid path {path:?}")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },
    /// Rename source does not exist.
    #[error("[MAP_NOT_FOUND] no mapping at {path:?}")]
    NotFound {
        /// The missing path.
        path: String,
    },
    /// Rename between a folder path and a file path.
    #[error("[MAP_FOLDER_MISMATCH] cannot rename between file and folder: {old_path:?} => {new_path:?}")]
    FolderMismatch {
        /// Source of the rename.
        old_path: String,
        /// Destination of the rename.
        new_path: String,
    },
    /// `map.json` could not be written; in-memory state was rolled back.
    #[error("[MAP_PERSIST] failed to persist map file: {source}")]
    Persist {
        /// The propagated I/O error.
        #[source]
        source: std::io::Error,
    },
    /// `map.json` exists but does not parse.
    #[error("[MAP_PARSE] failed to parse map file: {source}")]
    Parse {
        /// The propagated parse error.
        #[source]
        source: serde_json::Error,
    },
    /// `map.json` exists but could not be read.
    #[error("[MAP_READ] failed to read map file: {source}")]
    Read {
        /// The propagated I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result of a delete batch.
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    /// How many mappings were removed.
    pub removed: usize,
    /// Removed-value hashes no longer referenced by any remaining mapping.
    pub orphan_candidates: BTreeSet<AssetHash>,
}

/// In-memory path→hash directory backed by a single `map.json` document.
#[derive(Debug)]
pub struct MappingStore {
    entries: HashMap<String, AssetHash>,
    map_file: PathBuf,
}

impl MappingStore {
    /// Load mappings from `map_file`. A missing file yields an empty store;
    /// entries with an invalid path or hash are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed —
    /// serving with a silently-empty directory would orphan every asset.
    pub fn load(map_file: PathBuf) -> Result<Self, MappingError> {
        let raw = match fs::read(&map_file) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %map_file.display(), "no existing mappings; starting empty");
                return Ok(Self {
                    entries: HashMap::new(),
                    map_file,
                });
            }
            Err(err) => return Err(MappingError::Read { source: err }),
        };
        let parsed: HashMap<String, String> =
            serde_json::from_slice(&raw).map_err(|e| MappingError::Parse { source: e })?;

        let mut entries = HashMap::with_capacity(parsed.len());
        for (path, hash) in parsed {
            if !is_valid_file_path(&path) {
                warn!(%path, "dropping mapping with invalid path");
                continue;
            }
            if !is_valid_hash(&hash) {
                warn!(%path, %hash, "dropping mapping with invalid hash");
                continue;
            }
            match AssetHash::from_hex(&hash) {
                Ok(parsed_hash) => {
                    entries.insert(path, parsed_hash);
                }
                Err(_) => warn!(%path, %hash, "dropping mapping with unparsable hash"),
            }
        }
        info!(count = entries.len(), path = %map_file.display(), "loaded mappings");
        Ok(Self { entries, map_file })
    }

    /// Create an empty store that persists to `map_file` (tests, fresh roots).
    pub fn empty(map_file: PathBuf) -> Self {
        Self {
            entries: HashMap::new(),
            map_file,
        }
    }

    /// Look up the hash mapped at `path`.
    pub fn get(&self, path: &str) -> Option<&AssetHash> {
        self.entries.get(path)
    }

    /// True if a mapping exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no mappings exist.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate all mappings in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AssetHash)> {
        self.entries.iter()
    }

    /// All mappings sorted by path.
    pub fn sorted_entries(&self) -> Vec<(String, AssetHash)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(p, h)| (p.clone(), *h))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// The set of hashes referenced by at least one mapping.
    pub fn mapped_hashes(&self) -> HashSet<AssetHash> {
        self.entries.values().copied().collect()
    }

    /// Serialize the whole table and write it to `map.json` in one call.
    fn persist(&self) -> Result<(), MappingError> {
        // Sorted object so the file diffs cleanly between writes.
        let doc: BTreeMap<&str, String> = self
            .entries
            .iter()
            .map(|(path, hash)| (path.as_str(), hash.to_hex()))
            .collect();
        let json = serde_json::to_vec_pretty(&doc)
            .map_err(|e| MappingError::Parse { source: e })?;
        fs::write(&self.map_file, json).map_err(|e| MappingError::Persist { source: e })
    }

    /// Bind `path` to `hash`, persisting the change.
    ///
    /// On persistence failure the previous value (or absence) is restored.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::InvalidPath`] for a malformed file path and
    /// [`MappingError::Persist`] after a rollback.
    pub fn set(&mut self, path: &str, hash: AssetHash) -> Result<(), MappingError> {
        let path = path.trim();
        if !is_valid_file_path(path) {
            warn!(%path, "cannot set mapping for invalid path");
            return Err(MappingError::InvalidPath {
                path: path.to_owned(),
            });
        }

        let old = self.entries.insert(path.to_owned(), hash);
        if let Err(err) = self.persist() {
            // Roll back to the pre-call view.
            match old {
                Some(previous) => {
                    self.entries.insert(path.to_owned(), previous);
                }
                None => {
                    self.entries.remove(path);
                }
            }
            warn!(%path, %hash, "failed to persist mapping, rolled back");
            return Err(err);
        }
        debug!(%path, %hash, "set mapping");
        Ok(())
    }

    /// Remove each path in `paths`; folder paths (trailing `/`) remove their
    /// whole subtree. Missing paths are no-ops. Entries under the reserved
    /// `/.baked/` namespace are never matched by folder prefixes.
    ///
    /// On persistence failure the whole table is restored and the error
    /// returned. On success the outcome lists removed-value hashes that no
    /// remaining mapping references.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::Persist`] after a rollback.
    pub fn delete(&mut self, paths: &[String]) -> Result<DeleteOutcome, MappingError> {
        let snapshot = self.entries.clone();
        let mut removed_hashes: BTreeSet<AssetHash> = BTreeSet::new();
        let mut removed = 0usize;

        for raw in paths {
            let path = raw.trim();
            if path_is_folder(path) {
                let before = self.entries.len();
                self.entries.retain(|key, value| {
                    let matches = key.starts_with(path) && !is_baked_path(key);
                    if matches {
                        removed_hashes.insert(*value);
                    }
                    !matches
                });
                let count = before - self.entries.len();
                removed += count;
                if count > 0 {
                    debug!(%path, count, "deleted mappings in folder");
                } else {
                    debug!(%path, "no mappings to delete in folder");
                }
            } else if let Some(old) = self.entries.remove(path) {
                removed_hashes.insert(old);
                removed += 1;
                debug!(%path, hash = %old, "deleted mapping");
            } else {
                debug!(%path, "no mapping to delete");
            }
        }

        if let Err(err) = self.persist() {
            self.entries = snapshot;
            warn!("failed to persist deleted mappings, rolled back");
            return Err(err);
        }

        let still_mapped = self.mapped_hashes();
        let orphan_candidates = removed_hashes
            .into_iter()
            .filter(|hash| !still_mapped.contains(hash))
            .collect();
        Ok(DeleteOutcome {
            removed,
            orphan_candidates,
        })
    }

    /// Rename `old_path` to `new_path`. Both must be files or both folders;
    /// a folder rename rewrites every key under the old prefix. A file
    /// rename overwrites any existing destination.
    ///
    /// On persistence failure every touched entry is restored.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::InvalidPath`] / [`MappingError::FolderMismatch`]
    /// on validation failure, [`MappingError::NotFound`] for a missing file
    /// source, and [`MappingError::Persist`] after a rollback.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), MappingError> {
        let old_path = old_path.trim();
        let new_path = new_path.trim();

        if !is_valid_path(old_path) {
            return Err(MappingError::InvalidPath {
                path: old_path.to_owned(),
            });
        }
        if !is_valid_path(new_path) {
            return Err(MappingError::InvalidPath {
                path: new_path.to_owned(),
            });
        }
        if path_is_folder(old_path) != path_is_folder(new_path) {
            warn!(%old_path, %new_path, "cannot rename between file and folder paths");
            return Err(MappingError::FolderMismatch {
                old_path: old_path.to_owned(),
                new_path: new_path.to_owned(),
            });
        }

        if path_is_folder(old_path) {
            let snapshot = self.entries.clone();
            let moved: Vec<(String, AssetHash)> = self
                .entries
                .iter()
                .filter(|(key, _)| key.starts_with(old_path) && !is_baked_path(key))
                .map(|(key, value)| (key.clone(), *value))
                .collect();
            for (key, value) in &moved {
                let new_key = format!("{new_path}{}", &key[old_path.len()..]);
                self.entries.remove(key);
                self.entries.insert(new_key, *value);
            }
            if let Err(err) = self.persist() {
                self.entries = snapshot;
                warn!(%old_path, %new_path, "failed to persist folder rename, rolled back");
                return Err(err);
            }
            debug!(%old_path, %new_path, count = moved.len(), "renamed folder mapping");
            Ok(())
        } else {
            let Some(source_hash) = self.entries.remove(old_path) else {
                return Err(MappingError::NotFound {
                    path: old_path.to_owned(),
                });
            };
            // Keep any overwritten destination for rollback.
            let old_destination = self.entries.get(new_path).copied();
            self.entries.insert(new_path.to_owned(), source_hash);

            if let Err(err) = self.persist() {
                self.entries.insert(old_path.to_owned(), source_hash);
                match old_destination {
                    Some(previous) => {
                        self.entries.insert(new_path.to_owned(), previous);
                    }
                    None => {
                        self.entries.remove(new_path);
                    }
                }
                warn!(%old_path, %new_path, "failed to persist rename, rolled back");
                return Err(err);
            }
            debug!(%old_path, %new_path, "renamed mapping");
            Ok(())
        }
    }
}
