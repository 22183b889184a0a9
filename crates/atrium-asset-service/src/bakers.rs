// SPDX-License-Identifier: Apache-2.0
//! Baker seam: the contract external bake implementations plug into.
//!
//! Concrete bakers (FBX model optimizer, KTX texture compressor) live
//! outside this crate. The worker hands them a source file and a scratch
//! directory and expects back the output files to commit. A missing baker
//! simply fails the job; bake failures are invisible to clients beyond the
//! status falling back to `NotBaked`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bake::BakerKind;

/// Contract for an external bake implementation.
///
/// `bake` may run for seconds to minutes; the worker invokes it off the
/// control thread. On success it returns the produced output files, all of
/// which the worker commits. Outputs must live under `scratch_dir` (or at
/// least outlive the call until the commit reads them).
pub trait AssetBaker: Send + Sync {
    /// Transform `source` into one or more output files under `scratch_dir`.
    fn bake(&self, source: &Path, scratch_dir: &Path) -> anyhow::Result<Vec<PathBuf>>;
}

/// The baker instances a server was constructed with.
#[derive(Clone, Default)]
pub struct Bakers {
    model: Option<Arc<dyn AssetBaker>>,
    texture: Option<Arc<dyn AssetBaker>>,
}

impl Bakers {
    /// No bakers at all: every bake job fails silently. Useful for
    /// deployments that only serve and never optimize.
    pub fn none() -> Self {
        Self::default()
    }

    /// Install the model baker.
    pub fn with_model(mut self, baker: Arc<dyn AssetBaker>) -> Self {
        self.model = Some(baker);
        self
    }

    /// Install the texture baker.
    pub fn with_texture(mut self, baker: Arc<dyn AssetBaker>) -> Self {
        self.texture = Some(baker);
        self
    }

    /// Baker for a class, if one was installed.
    pub fn for_kind(&self, kind: BakerKind) -> Option<Arc<dyn AssetBaker>> {
        match kind {
            BakerKind::Model => self.model.clone(),
            BakerKind::Texture => self.texture.clone(),
        }
    }
}

impl std::fmt::Debug for Bakers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bakers")
            .field("model", &self.model.is_some())
            .field("texture", &self.texture.is_some())
            .finish()
    }
}
