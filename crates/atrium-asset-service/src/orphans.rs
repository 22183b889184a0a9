// SPDX-License-Identifier: Apache-2.0
//! Orphan collection: unlink content files no longer referenced by any
//! mapping.
//!
//! Two triggers feed this module: the startup sweep after the mapping store
//! loads, and the post-delete sweep over removed-value hashes. Unlink
//! failures are logged and left for the next startup sweep; they never fail
//! the triggering operation.

use std::collections::BTreeSet;

use atrium_cas::{AssetHash, ContentStore};
use tracing::{debug, info, warn};

use crate::mappings::MappingStore;

/// Sweep the content directory for files not referenced by any mapping and
/// unlink them. Returns the number of files removed.
pub fn startup_sweep(store: &ContentStore, mappings: &MappingStore) -> usize {
    let on_disk = match store.list_all_hashes() {
        Ok(hashes) => hashes,
        Err(err) => {
            warn!(%err, "unmapped asset cleanup skipped; could not list content files");
            return 0;
        }
    };
    info!("performing unmapped asset cleanup");
    let mapped = mappings.mapped_hashes();
    let unmapped: BTreeSet<AssetHash> = on_disk
        .into_iter()
        .filter(|hash| !mapped.contains(hash))
        .collect();
    collect(store, &unmapped)
}

/// Unlink every candidate hash. Callers must have already excluded hashes
/// that any mapping still references. Returns the number of files removed.
pub fn collect(store: &ContentStore, candidates: &BTreeSet<AssetHash>) -> usize {
    let mut removed = 0usize;
    for hash in candidates {
        match store.remove(hash) {
            Ok(()) => {
                debug!(%hash, "deleted unmapped content file");
                removed += 1;
            }
            Err(err) => {
                warn!(%hash, %err, "failed to delete unmapped content file");
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_cas::hash_data;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, ContentStore, MappingStore) {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path().join("files")).unwrap();
        let mappings = MappingStore::empty(dir.path().join("map.json"));
        (dir, store, mappings)
    }

    // ── 1. startup sweep removes only unmapped files ─────────────────────

    #[test]
    fn startup_sweep_removes_unmapped() {
        let (_dir, store, mut mappings) = fixture();
        let kept = store.put(b"kept").unwrap();
        let orphan = store.put(b"orphan").unwrap();
        mappings.set("/kept", kept).unwrap();

        let removed = startup_sweep(&store, &mappings);
        assert_eq!(removed, 1);
        assert!(store.exists(&kept));
        assert!(!store.exists(&orphan));
    }

    // ── 2. collect unlinks candidates and tolerates missing files ────────

    #[test]
    fn collect_tolerates_missing() {
        let (_dir, store, _mappings) = fixture();
        let present = store.put(b"present").unwrap();
        let phantom = hash_data(b"never stored");

        let candidates: BTreeSet<AssetHash> = [present, phantom].into_iter().collect();
        // The phantom unlink is a no-op success at the store layer.
        let removed = collect(&store, &candidates);
        assert_eq!(removed, 2);
        assert!(!store.exists(&present));
    }
}
