// SPDX-License-Identifier: Apache-2.0
//! Server assembly: configuration, control state, and the bake worker.
//!
//! One logical control thread (the state mutex) owns the mapping store, the
//! bake queue, and the session registry. Transfer jobs never touch it; the
//! bake worker reaches it only to flip job phases and to commit finished
//! outputs, so mapping mutations stay serialized.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use atrium_asset_proto::{baked_artifact_path, baked_meta_path, MAX_UPLOAD_SIZE};
use atrium_asset_proto::{BAKED_MODEL_SIMPLE_NAME, BAKED_TEXTURE_SIMPLE_NAME};
use atrium_cas::{AssetHash, ContentStore};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::bake::{classify, needs_baking, BakeQueue, BakeRequest, TextureFormats};
use crate::bakers::Bakers;
use crate::mappings::MappingStore;
use crate::orphans;
use crate::session::{CounterSnapshot, SessionHandle, SessionId, SessionRegistry};
use crate::stats;
use crate::transfer::{TransferPool, DEFAULT_TRANSFER_WORKERS};

/// Subdirectory of the storage root holding the content files.
pub const ASSET_FILES_SUBDIR: &str = "files";

/// Name of the mapping persistence file in the storage root.
pub const MAP_FILE_NAME: &str = "map.json";

/// Version stamped into the meta record by the current bake pipeline.
pub const BAKE_VERSION: u32 = 1;

/// Everything the server needs at construction. Built once at boot from the
/// settings fetch; no process-wide state.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Storage root holding `map.json` and the `files/` directory.
    pub storage_root: PathBuf,
    /// Upload size cap in bytes.
    pub filesize_limit: u64,
    /// Transfer pool width.
    pub transfer_workers: usize,
    /// Image formats the texture baker accepts.
    pub texture_formats: TextureFormats,
    /// Stats sampling period; `None` disables the sampler.
    pub stats_interval: Option<Duration>,
}

impl ServerConfig {
    /// Config with defaults for everything but the storage root.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            filesize_limit: MAX_UPLOAD_SIZE,
            transfer_workers: DEFAULT_TRANSFER_WORKERS,
            texture_formats: TextureFormats::default_set(),
            stats_interval: Some(Duration::from_secs(1)),
        }
    }
}

/// State owned by the control thread.
#[derive(Debug)]
pub struct ServerState {
    /// The path→hash directory.
    pub mappings: MappingStore,
    /// Deduplicated bake jobs keyed by source hash.
    pub bake: BakeQueue,
    /// Connected senders.
    pub sessions: SessionRegistry,
}

/// The asset server core.
pub struct AssetServer {
    pub(crate) state: Mutex<ServerState>,
    pub(crate) store: ContentStore,
    pub(crate) config: ServerConfig,
    pub(crate) transfer: TransferPool,
    pub(crate) bakers: Bakers,
    bake_tx: mpsc::UnboundedSender<BakeRequest>,
}

impl AssetServer {
    /// Boot the server: open the content store, load the mapping directory,
    /// sweep orphans, start the bake worker and stats sampler, and enqueue
    /// any assets that already need baking.
    ///
    /// # Errors
    ///
    /// Fails when the storage root cannot be prepared or `map.json` exists
    /// but cannot be loaded — the original directory must never be shadowed
    /// by an accidentally-empty one.
    pub async fn start(config: ServerConfig, bakers: Bakers) -> anyhow::Result<Arc<Self>> {
        let files_dir = config.storage_root.join(ASSET_FILES_SUBDIR);
        let store = ContentStore::open(files_dir).context("creating asset files directory")?;

        let mappings = MappingStore::load(config.storage_root.join(MAP_FILE_NAME))
            .context("loading mapping file")?;
        info!(path = %store.files_dir().display(), "serving files from asset directory");
        if let Ok(hashes) = store.list_all_hashes() {
            info!(count = hashes.len(), "asset files present in the files directory");
        }

        // With zero mappings every file on disk would count as an orphan; an
        // empty table is far more likely a fresh root than a mass delete.
        if !mappings.is_empty() {
            orphans::startup_sweep(&store, &mappings);
        }

        let (bake_tx, bake_rx) = mpsc::unbounded_channel();
        let transfer = TransferPool::new(config.transfer_workers);
        let stats_interval = config.stats_interval;

        let server = Arc::new(Self {
            state: Mutex::new(ServerState {
                mappings,
                bake: BakeQueue::default(),
                sessions: SessionRegistry::default(),
            }),
            store,
            config,
            transfer,
            bakers,
            bake_tx,
        });

        tokio::spawn(run_bake_worker(server.clone(), bake_rx));
        if let Some(every) = stats_interval {
            tokio::spawn(stats::run_sampler(server.clone(), every));
        }

        server.bake_eligible_assets().await;
        Ok(server)
    }

    /// Content store backing this server.
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// The configuration the server was booted with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a connected sender.
    pub async fn register_session(
        &self,
        can_write: bool,
        outbox: mpsc::Sender<Vec<u8>>,
    ) -> SessionHandle {
        self.state.lock().await.sessions.register(can_write, outbox)
    }

    /// Drop a sender on disconnect.
    pub async fn unregister_session(&self, id: SessionId) {
        self.state.lock().await.sessions.unregister(id);
    }

    /// Counter snapshots for every live session, for the stats sampler.
    pub async fn session_counter_snapshots(&self) -> Vec<(SessionId, bool, CounterSnapshot)> {
        self.state
            .lock()
            .await
            .sessions
            .handles()
            .iter()
            .map(|handle| (handle.id, handle.can_write, handle.counters.snapshot()))
            .collect()
    }

    /// Evaluate every current mapping against the bake predicate and queue
    /// what qualifies. Runs at startup; cheap to re-run.
    pub async fn bake_eligible_assets(&self) {
        let mut state = self.state.lock().await;
        let entries = state.mappings.sorted_entries();
        for (path, hash) in entries {
            self.maybe_bake_locked(&mut state, &path, &hash);
        }
    }

    /// Queue a bake for `path → hash` if the predicate says it needs one.
    /// Caller holds the control lock.
    pub(crate) fn maybe_bake_locked(&self, state: &mut ServerState, path: &str, hash: &AssetHash) {
        if !needs_baking(&state.mappings, &self.config.texture_formats, path, hash) {
            return;
        }
        if state.bake.enqueue(*hash, path) {
            debug!(%path, %hash, "queuing bake");
            let _ = self.bake_tx.send(BakeRequest {
                hash: *hash,
                path: path.to_owned(),
                file_path: self.store.path_for(hash),
            });
        } else {
            debug!(%hash, "bake already queued for hash");
        }
    }

    /// Store the meta record blob and map it under the source hash's baked
    /// folder. Caller holds the control lock.
    pub(crate) fn create_meta_record_locked(
        &self,
        state: &mut ServerState,
        hash: &AssetHash,
    ) -> anyhow::Result<()> {
        let meta_json = serde_json::to_vec(&serde_json::json!({ "version": BAKE_VERSION }))
            .context("serializing meta record")?;
        let meta_hash = self
            .store
            .put(&meta_json)
            .context("storing meta record blob")?;
        state
            .mappings
            .set(&baked_meta_path(hash), meta_hash)
            .context("mapping meta record")?;
        Ok(())
    }

    /// Execute one bake job end to end. Failures are logged and the queue
    /// entry removed either way so a later trigger can retry.
    pub(crate) async fn run_bake(&self, request: BakeRequest) {
        {
            self.state.lock().await.bake.mark_baking(&request.hash);
        }
        debug!(path = %request.path, hash = %request.hash, "starting bake");

        match self.execute_and_commit(&request).await {
            Ok(artifacts) => {
                info!(
                    path = %request.path,
                    hash = %request.hash,
                    artifacts,
                    "bake complete"
                );
            }
            Err(err) => {
                // Invisible to clients beyond the status reverting to
                // NotBaked on the next GetAll.
                warn!(path = %request.path, hash = %request.hash, %err, "bake failed");
            }
        }

        self.state.lock().await.bake.remove(&request.hash);
    }

    async fn execute_and_commit(&self, request: &BakeRequest) -> anyhow::Result<usize> {
        let kind = classify(&request.path, &self.config.texture_formats)
            .context("asset path is not bakeable")?;
        let baker = self
            .bakers
            .for_kind(kind)
            .context("no baker installed for this asset class")?;

        let scratch = tempfile::tempdir().context("creating bake scratch directory")?;
        let source = request.file_path.clone();
        let (result, scratch) = tokio::task::spawn_blocking(move || {
            let result = baker.bake(&source, scratch.path());
            (result, scratch)
        })
        .await
        .context("bake task join")?;
        let outputs = result.context("baker failed")?;

        let committed = self.commit_bake(request, &outputs).await?;
        drop(scratch);
        Ok(committed)
    }

    /// Commit baked outputs: stage every blob into the content store, then
    /// write the baked mappings and finally the meta record. No meta record
    /// is written if anything before it fails, which is what marks the bake
    /// as incomplete for the next trigger.
    async fn commit_bake(
        &self,
        request: &BakeRequest,
        outputs: &[std::path::PathBuf],
    ) -> anyhow::Result<usize> {
        let source_is_model = request.path.to_ascii_lowercase().ends_with(".fbx");

        let mut staged: Vec<(String, AssetHash)> = Vec::with_capacity(outputs.len());
        for output in outputs {
            let bytes = std::fs::read(output)
                .with_context(|| format!("reading baked output {}", output.display()))?;
            let baked_hash = self
                .store
                .put(&bytes)
                .context("storing baked output blob")?;

            let file_name = output
                .file_name()
                .and_then(|name| name.to_str())
                .context("baked output has no usable file name")?;
            // The primary FBX output gets the simple name so two assets with
            // identical content but different names share their bake; a
            // texture bake's single output likewise. Secondary model outputs
            // keep whatever the baker called them.
            let simple_name = if file_name.to_ascii_lowercase().ends_with(".fbx") {
                BAKED_MODEL_SIMPLE_NAME
            } else if !source_is_model {
                BAKED_TEXTURE_SIMPLE_NAME
            } else {
                file_name
            };
            staged.push((baked_artifact_path(&request.hash, simple_name), baked_hash));
        }

        {
            let mut state = self.state.lock().await;
            for (mapping_path, baked_hash) in &staged {
                state
                    .mappings
                    .set(mapping_path, *baked_hash)
                    .with_context(|| format!("mapping baked output {mapping_path}"))?;
                debug!(path = %mapping_path, hash = %baked_hash, "added baked mapping");
            }
            self.create_meta_record_locked(&mut state, &request.hash)?;
        }
        Ok(staged.len())
    }
}

impl std::fmt::Debug for AssetServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetServer")
            .field("storage_root", &self.config.storage_root)
            .finish_non_exhaustive()
    }
}

/// Single-concurrency worker draining the bake channel.
async fn run_bake_worker(
    server: Arc<AssetServer>,
    mut rx: mpsc::UnboundedReceiver<BakeRequest>,
) {
    while let Some(request) = rx.recv().await {
        server.run_bake(request).await;
    }
}
