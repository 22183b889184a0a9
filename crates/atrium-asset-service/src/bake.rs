// SPDX-License-Identifier: Apache-2.0
//! Bake queue and eligibility predicates.
//!
//! The queue deduplicates by source hash: re-setting a mapping to a hash
//! that is already queued is a no-op. Eligibility is a pure function of the
//! mapping table — models bake unconditionally, textures only after a
//! client opted in by creating the meta record for the source hash.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use atrium_asset_proto::{
    baked_artifact_path, baked_meta_path, is_baked_path, BakingStatus, BAKED_MODEL_SIMPLE_NAME,
    BAKED_TEXTURE_SIMPLE_NAME,
};
use atrium_cas::AssetHash;

use crate::mappings::MappingStore;

/// Model extensions the bake pipeline accepts.
const BAKEABLE_MODEL_EXTENSIONS: &[&str] = &["fbx"];

/// Image extensions the texture baker accepts.
///
/// The real set comes from an external capability query against whatever
/// image reader the deployment links; this is the seam where that answer is
/// injected. [`TextureFormats::default_set`] mirrors the common reader.
#[derive(Debug, Clone)]
pub struct TextureFormats {
    extensions: HashSet<String>,
}

impl TextureFormats {
    /// Build from an explicit extension list (lowercased on the way in).
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// The formats a stock image reader decodes.
    pub fn default_set() -> Self {
        Self::new(["png", "jpg", "jpeg", "gif", "bmp", "tga", "webp", "ktx"])
    }

    /// True if `extension` (any case) is a readable image format.
    pub fn contains(&self, extension: &str) -> bool {
        self.extensions.contains(&extension.to_ascii_lowercase())
    }
}

impl Default for TextureFormats {
    fn default() -> Self {
        Self::default_set()
    }
}

/// Lowercased extension of the final path segment, if any.
pub fn path_extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Which baker class a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakerKind {
    /// Model baker (FBX).
    Model,
    /// Texture baker (KTX output).
    Texture,
}

/// Classify `path` by its extension. `None` means the path never bakes.
pub fn classify(path: &str, textures: &TextureFormats) -> Option<BakerKind> {
    let ext = path_extension(path)?;
    if BAKEABLE_MODEL_EXTENSIONS.contains(&ext.as_str()) {
        Some(BakerKind::Model)
    } else if textures.contains(&ext) {
        Some(BakerKind::Texture)
    } else {
        None
    }
}

/// Canonical primary artifact name for a path's baker class, if bakeable.
pub fn bakeable_artifact_name(path: &str, textures: &TextureFormats) -> Option<&'static str> {
    match classify(path, textures)? {
        BakerKind::Model => Some(BAKED_MODEL_SIMPLE_NAME),
        BakerKind::Texture => Some(BAKED_TEXTURE_SIMPLE_NAME),
    }
}

/// True if the meta record for `hash` exists in the mapping table.
pub fn has_meta_record(mappings: &MappingStore, hash: &AssetHash) -> bool {
    mappings.contains(&baked_meta_path(hash))
}

/// Pure bake-eligibility predicate.
///
/// Baked paths and extensionless paths never bake. A model bakes when its
/// primary artifact mapping is absent. A texture bakes only when the meta
/// record already exists (the opt-in) and the artifact mapping is absent.
pub fn needs_baking(
    mappings: &MappingStore,
    textures: &TextureFormats,
    path: &str,
    hash: &AssetHash,
) -> bool {
    if is_baked_path(path) {
        return false;
    }
    let artifact = match classify(path, textures) {
        Some(BakerKind::Model) => BAKED_MODEL_SIMPLE_NAME,
        Some(BakerKind::Texture) => {
            if !has_meta_record(mappings, hash) {
                return false;
            }
            BAKED_TEXTURE_SIMPLE_NAME
        }
        None => return false,
    };
    !mappings.contains(&baked_artifact_path(hash, artifact))
}

/// Execution phase of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakePhase {
    /// Queued, not yet picked up by the worker.
    Pending,
    /// The worker is currently executing the baker.
    Baking,
}

/// One queued bake, keyed by source hash in [`BakeQueue`].
#[derive(Debug, Clone)]
pub struct BakeJob {
    /// Mapping path that triggered the bake.
    pub path: String,
    /// Current phase.
    pub phase: BakePhase,
}

/// A work order handed to the bake worker.
#[derive(Debug)]
pub struct BakeRequest {
    /// Source content hash.
    pub hash: AssetHash,
    /// Mapping path that triggered the bake.
    pub path: String,
    /// Content file of the source on disk.
    pub file_path: PathBuf,
}

/// Per-source-hash deduplicated job map, owned by the control state.
#[derive(Debug, Default)]
pub struct BakeQueue {
    jobs: HashMap<AssetHash, BakeJob>,
}

impl BakeQueue {
    /// Insert a pending job unless the hash is already queued.
    ///
    /// Returns `true` when a new job was inserted (the caller should then
    /// hand a [`BakeRequest`] to the worker).
    pub fn enqueue(&mut self, hash: AssetHash, path: &str) -> bool {
        if self.jobs.contains_key(&hash) {
            return false;
        }
        self.jobs.insert(
            hash,
            BakeJob {
                path: path.to_owned(),
                phase: BakePhase::Pending,
            },
        );
        true
    }

    /// Transition a job to the baking phase (worker picked it up).
    pub fn mark_baking(&mut self, hash: &AssetHash) {
        if let Some(job) = self.jobs.get_mut(hash) {
            job.phase = BakePhase::Baking;
        }
    }

    /// Remove a job after completion or failure. Either way a future
    /// trigger may re-enqueue the hash.
    pub fn remove(&mut self, hash: &AssetHash) {
        self.jobs.remove(hash);
    }

    /// Current phase of a queued job.
    pub fn phase(&self, hash: &AssetHash) -> Option<BakePhase> {
        self.jobs.get(hash).map(|job| job.phase)
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Baking status of one mapping, as reported in a GetAll reply.
pub fn baking_status(
    mappings: &MappingStore,
    queue: &BakeQueue,
    textures: &TextureFormats,
    path: &str,
    hash: &AssetHash,
) -> BakingStatus {
    if is_baked_path(path) {
        return BakingStatus::NotBaked;
    }
    match queue.phase(hash) {
        Some(BakePhase::Pending) => return BakingStatus::Pending,
        Some(BakePhase::Baking) => return BakingStatus::Baking,
        None => {}
    }
    match bakeable_artifact_name(path, textures) {
        Some(artifact) if mappings.contains(&baked_artifact_path(hash, artifact)) => {
            BakingStatus::Baked
        }
        _ => BakingStatus::NotBaked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_cas::hash_data;
    use tempfile::TempDir;

    fn mappings() -> (TempDir, MappingStore) {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::empty(dir.path().join("map.json"));
        (dir, store)
    }

    fn h(label: &str) -> AssetHash {
        hash_data(label.as_bytes())
    }

    // ── 1. extension extraction ──────────────────────────────────────────

    #[test]
    fn extension_extraction() {
        assert_eq!(path_extension("/a/chair.fbx"), Some("fbx".into()));
        assert_eq!(path_extension("/a/SKY.PNG"), Some("png".into()));
        assert_eq!(path_extension("/a/noext"), None);
        assert_eq!(path_extension("/a.b/noext"), None);
        assert_eq!(path_extension("/trailing."), None);
    }

    // ── 2. models need baking until the artifact mapping exists ──────────

    #[test]
    fn model_eligibility() {
        let (_dir, mut store) = mappings();
        let textures = TextureFormats::default_set();
        let hash = h("model");

        assert!(needs_baking(&store, &textures, "/chair.fbx", &hash));

        store
            .set(&baked_artifact_path(&hash, BAKED_MODEL_SIMPLE_NAME), h("baked"))
            .unwrap();
        assert!(!needs_baking(&store, &textures, "/chair.fbx", &hash));
    }

    // ── 3. textures bake only after the meta opt-in ──────────────────────

    #[test]
    fn texture_opt_in() {
        let (_dir, mut store) = mappings();
        let textures = TextureFormats::default_set();
        let hash = h("texture");

        // No meta record: never eligible.
        assert!(!needs_baking(&store, &textures, "/sky.png", &hash));

        store.set(&baked_meta_path(&hash), h("meta")).unwrap();
        assert!(needs_baking(&store, &textures, "/sky.png", &hash));

        store
            .set(
                &baked_artifact_path(&hash, BAKED_TEXTURE_SIMPLE_NAME),
                h("ktx"),
            )
            .unwrap();
        assert!(!needs_baking(&store, &textures, "/sky.png", &hash));
    }

    // ── 4. baked paths and unknown extensions never bake ─────────────────

    #[test]
    fn ineligible_paths() {
        let (_dir, store) = mappings();
        let textures = TextureFormats::default_set();
        let hash = h("x");
        assert!(!needs_baking(
            &store,
            &textures,
            "/.baked/abc/asset.fbx",
            &hash
        ));
        assert!(!needs_baking(&store, &textures, "/script.js", &hash));
        assert!(!needs_baking(&store, &textures, "/no-extension", &hash));
    }

    // ── 5. queue deduplicates by source hash ─────────────────────────────

    #[test]
    fn queue_dedupe() {
        let mut queue = BakeQueue::default();
        let hash = h("dup");
        assert!(queue.enqueue(hash, "/a.fbx"));
        assert!(!queue.enqueue(hash, "/b.fbx"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.phase(&hash), Some(BakePhase::Pending));

        queue.mark_baking(&hash);
        assert_eq!(queue.phase(&hash), Some(BakePhase::Baking));

        queue.remove(&hash);
        assert!(queue.is_empty());
        // Removed jobs can be re-queued by a later trigger.
        assert!(queue.enqueue(hash, "/a.fbx"));
    }

    // ── 6. baking status ladder ──────────────────────────────────────────

    #[test]
    fn status_ladder() {
        let (_dir, mut store) = mappings();
        let mut queue = BakeQueue::default();
        let textures = TextureFormats::default_set();
        let hash = h("status");
        let path = "/thing.fbx";

        assert_eq!(
            baking_status(&store, &queue, &textures, path, &hash),
            BakingStatus::NotBaked
        );

        queue.enqueue(hash, path);
        assert_eq!(
            baking_status(&store, &queue, &textures, path, &hash),
            BakingStatus::Pending
        );

        queue.mark_baking(&hash);
        assert_eq!(
            baking_status(&store, &queue, &textures, path, &hash),
            BakingStatus::Baking
        );

        queue.remove(&hash);
        store
            .set(&baked_artifact_path(&hash, BAKED_MODEL_SIMPLE_NAME), h("out"))
            .unwrap();
        assert_eq!(
            baking_status(&store, &queue, &textures, path, &hash),
            BakingStatus::Baked
        );
    }
}
