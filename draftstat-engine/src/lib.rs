//! Draftstat Engine
//!
//! Draft-frequency matrices for a card-drafting game: per-class coexistence
//! and transition counts, accumulated in time batches, with balance rankings
//! and next-pick recommendations computed from the latest complete batch.
//! This crate holds every piece of logic; storage is abstracted behind
//! [`DocumentStore`] and the binary only wires I/O around [`IndicatorEngine`].

pub mod admin;
pub mod config;
pub mod constants;
pub mod document;
pub mod envelope;
pub mod indicator;
pub mod ingest;
pub mod matrix;
pub mod numbers;
pub mod pool;
pub mod rebalance;
pub mod recommend;
pub mod rng;
pub mod rotation;
pub mod store;
pub mod version;

// Re-export commonly used types
pub use admin::{AdminError, AdminGate};
pub use config::{ConfigError, DraftShape, EngineConfig, RetryPolicy};
pub use document::{
    BatchPrefix, ContextKey, DocumentKey, Ledger, MatrixDocument, MatrixKind,
    generate_context_keys, skeleton_documents,
};
pub use envelope::Envelope;
pub use indicator::{BatchDocuments, IndicatorCache, IndicatorSnapshot, Snapshot};
pub use ingest::{GameEndRecord, IngestEngine, IngestError, IngestRequest, IngestSummary, PlayerLog};
pub use matrix::{Cell, FrequencyMatrix, MatrixError};
pub use pool::{ClassCardPool, PoolConfiguration, PoolError, PoolService, PoolUpdate};
pub use rebalance::{CountRatio, EntryKind, RebalanceAnalyzer, RebalanceEntry, RebalanceError};
pub use recommend::{Recommendation, RecommendError, RecommendRequest, RecommendationScorer};
pub use rng::{CountingRng, RngSource};
pub use rotation::{BatchRotator, RotationError, RotationOutcome};
pub use store::{DocumentStore, FileStore, MemoryStore, StoreError};
pub use version::{PatchSwitch, VersionError, VersionService, VersionState};

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Failure of an administrative operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Rotation(#[from] RotationError),
}

/// Health report: what is configured and where ingestion is writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub version: VersionState,
    pub pool_patch_version: Option<String>,
    pub class_pool: Vec<i32>,
    pub complete_batch: Option<u32>,
}

/// Live pick and win documents of the batch currently being written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveMatrices {
    pub patch_version: String,
    pub batch: u32,
    pub documents: BatchDocuments,
}

/// Main engine that owns every service around a single document store.
#[derive(Debug)]
pub struct IndicatorEngine<S> {
    config: EngineConfig,
    admin: AdminGate,
    pool: PoolService,
    version: VersionService,
    ingest: IngestEngine,
    rotator: BatchRotator,
    rebalance: RebalanceAnalyzer,
    scorer: RecommendationScorer,
    cache: IndicatorCache,
    store: S,
}

impl<S: DocumentStore> IndicatorEngine<S> {
    /// Create a new engine with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration violates an invariant.
    pub fn new(config: EngineConfig, store: S) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            admin: AdminGate::new(config.admin_token.trim()),
            pool: PoolService::new(),
            version: VersionService::new(),
            ingest: IngestEngine::new(&config),
            rotator: BatchRotator,
            rebalance: RebalanceAnalyzer::new(config.draft),
            scorer: RecommendationScorer::new(&config),
            cache: IndicatorCache::new(),
            config,
            store,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn pool(&self) -> Arc<PoolConfiguration> {
        self.pool.snapshot()
    }

    #[must_use]
    pub fn version(&self) -> VersionState {
        self.version.state()
    }

    /// Replace the whole pool configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected or the update is invalid.
    pub fn replace_pool(
        &self,
        token: &str,
        update: &PoolUpdate,
    ) -> Result<Arc<PoolConfiguration>, EngineError> {
        self.admin.authorize(token)?;
        Ok(self.pool.replace(update)?)
    }

    /// Switch the active patch version, creating or re-attaching documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected, the pool is not configured
    /// for `patch_version`, or the store fails.
    pub fn switch_patch(&self, token: &str, patch_version: &str) -> Result<PatchSwitch, EngineError> {
        self.admin.authorize(token)?;
        let switch = self
            .version
            .update_patch_version(patch_version, &self.pool.snapshot(), &self.store)?;
        if switch != PatchSwitch::Unchanged {
            self.refresh_cache();
        }
        Ok(switch)
    }

    /// Fold a batch of finished games into the live batch.
    ///
    /// # Errors
    ///
    /// See [`IngestEngine::ingest`].
    pub fn ingest(&self, request: &IngestRequest) -> Result<IngestSummary, IngestError> {
        self.ingest
            .ingest(request, &self.pool.snapshot(), &self.version, &self.store)
    }

    /// Async flavor of [`Self::ingest`].
    ///
    /// # Errors
    ///
    /// See [`IngestEngine::ingest`].
    #[cfg(feature = "async")]
    pub async fn ingest_async(&self, request: &IngestRequest) -> Result<IngestSummary, IngestError> {
        let pool = self.pool.snapshot();
        self.ingest
            .ingest_async(request, &pool, &self.version, &self.store)
            .await
    }

    /// Scheduled rotation. The indicator cache is refreshed on success.
    ///
    /// # Errors
    ///
    /// See [`BatchRotator::rotate`].
    pub fn rotate(&self) -> Result<RotationOutcome, RotationError> {
        let outcome = self.rotator.rotate(&self.version, &self.store)?;
        if outcome.rotated() {
            self.refresh_cache();
        }
        Ok(outcome)
    }

    /// Manual batch bump behind the administrative token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected or the rotation fails.
    pub fn rotate_now(&self, token: &str) -> Result<RotationOutcome, EngineError> {
        self.admin.authorize(token)?;
        Ok(self.rotate()?)
    }

    /// Catch up with rotations made by another process sharing the store.
    ///
    /// Returns `true` when a newer batch was adopted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn sync_with_store(&self) -> Result<bool, VersionError> {
        let adopted = self.version.sync_latest_batch(&self.store)?;
        if adopted.is_some() {
            self.refresh_cache();
        }
        Ok(adopted.is_some())
    }

    fn refresh_cache(&self) {
        if let Err(err) = self.cache.refresh(&self.version.state(), &self.store) {
            log::error!("indicator cache refresh failed: {err}");
        }
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let version = self.version.state();
        let pool = self.pool.snapshot();
        EngineStatus {
            complete_batch: indicator::complete_batch(&version).map(|(_, batch)| batch),
            pool_patch_version: pool.patch_version().map(str::to_string),
            class_pool: pool.class_pool().to_vec(),
            version,
        }
    }

    /// Aggregate matrices of the latest complete batch.
    ///
    /// Served from the cache when it matches the current batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn indicator(&self) -> Result<Arc<IndicatorSnapshot>, StoreError> {
        let state = self.version.state();
        let expected = indicator::complete_batch(&state);
        if let Some(cached) = self.cache.get() {
            let current = match cached.as_ref() {
                Snapshot::ColdStart => None,
                Snapshot::Ready {
                    patch_version,
                    batch,
                    ..
                } => Some((patch_version.as_str(), *batch)),
            };
            if current == expected {
                return Ok(cached);
            }
        }
        self.cache.refresh(&state, &self.store)
    }

    /// Raw pick and win documents of the live batch, or `None` before the
    /// first patch switch.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn matrices(&self) -> Result<Option<LiveMatrices>, StoreError> {
        let VersionState::Active {
            patch_version,
            batch,
        } = self.version.state()
        else {
            return Ok(None);
        };
        let pick = self
            .store
            .find_batch(&BatchPrefix::new(Ledger::Pick, patch_version.as_str(), batch))?;
        let win = self
            .store
            .find_batch(&BatchPrefix::new(Ledger::Win, patch_version.as_str(), batch))?;
        Ok(Some(LiveMatrices {
            patch_version,
            batch,
            documents: BatchDocuments { pick, win },
        }))
    }

    /// Class-level balance ranking.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn rebalance_classes(&self) -> Result<Snapshot<Vec<RebalanceEntry>>, StoreError> {
        self.rebalance
            .classes(&self.pool.snapshot(), &self.version.state(), &self.store)
    }

    /// Card-level balance ranking of one class.
    ///
    /// # Errors
    ///
    /// Returns an error if the class is unknown or the store cannot be read.
    pub fn rebalance_cards(
        &self,
        class_code: i32,
    ) -> Result<Snapshot<Vec<RebalanceEntry>>, RebalanceError> {
        self.rebalance.cards(
            class_code,
            &self.pool.snapshot(),
            &self.version.state(),
            &self.store,
        )
    }

    /// Score the open cards of a draft.
    ///
    /// # Errors
    ///
    /// See [`RecommendationScorer::recommend`].
    pub fn recommend(
        &self,
        request: &RecommendRequest,
    ) -> Result<Snapshot<Vec<Recommendation>>, RecommendError> {
        self.scorer.recommend(
            request,
            &self.pool.snapshot(),
            &self.version.state(),
            &self.store,
        )
    }
}
