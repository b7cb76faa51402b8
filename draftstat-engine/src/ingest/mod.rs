//! Match ingestion: draft logs in, matrix increments out.
//!
//! One request is one optimistic-concurrency attempt: the live batch is read,
//! every game is folded into working copies, and every touched document is
//! written back with a single [`DocumentStore::put_all`]. A version conflict
//! replays the whole request from a fresh read after a backoff delay.

mod deltas;
mod wire;

pub use deltas::{UnknownCard, coexistence_deltas, resolve_rounds, transition_deltas};
pub use wire::{GameEndRecord, IngestRequest, PlayerLog};

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

use crate::config::{EngineConfig, RetryPolicy};
use crate::document::{BatchPrefix, ContextKey, DocumentKey, Ledger, MatrixDocument, MatrixKind};
use crate::matrix::Cell;
use crate::pool::PoolConfiguration;
use crate::rng::{CountingRng, RngSource};
use crate::store::{DocumentStore, StoreError};
use crate::version::{VersionService, VersionState};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no patch version is active; switch a patch before ingesting")]
    NotInitialized,
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome counters of one ingestion request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub games_seen: usize,
    pub games_applied: usize,
    pub games_skipped_version: usize,
    pub games_malformed: usize,
    pub players_applied: usize,
    pub players_skipped: usize,
    pub winning_players: usize,
    pub documents_written: usize,
    pub attempts: u32,
}

/// Why one player's draft was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlayerSkip {
    Sentinel,
    MissingClass,
    UnknownClass(i32),
    UnknownCard(UnknownCard),
    MissingDocument(DocumentKey),
    UnknownContext { key: DocumentKey, context: ContextKey },
    OutOfRange(DocumentKey),
    /// The stored document indexes a different card pool than the live one.
    PoolMismatch(DocumentKey),
}

/// Deltas of one player, validated against the working documents.
struct PlayerDeltas<'p> {
    class_code: i32,
    card_pool: &'p [i32],
    targets: SmallVec<[ContextKey; 4]>,
    coexistence: Vec<Cell>,
    transition: Vec<Cell>,
}

impl PlayerDeltas<'_> {
    fn cells(&self, kind: MatrixKind) -> &[Cell] {
        match kind {
            MatrixKind::Coexistence => &self.coexistence,
            MatrixKind::Transition => &self.transition,
        }
    }
}

enum Step {
    Done(Result<IngestSummary, IngestError>),
    RetryAfter(Duration),
}

#[derive(Debug)]
pub struct IngestEngine {
    retry: RetryPolicy,
    sentinel_class_code: i32,
    rng: RngSource,
}

impl IngestEngine {
    #[must_use]
    pub const fn new(config: &EngineConfig) -> Self {
        Self {
            retry: config.retry,
            sentinel_class_code: config.sentinel_class_code,
            rng: RngSource::new(config.rng_seed),
        }
    }

    /// Apply a request, sleeping the calling thread between retries.
    ///
    /// # Errors
    ///
    /// Returns an error when no patch is active, the store fails, or
    /// conflicts persist past the retry policy.
    pub fn ingest<S: DocumentStore + ?Sized>(
        &self,
        request: &IngestRequest,
        pool: &PoolConfiguration,
        version: &VersionService,
        store: &S,
    ) -> Result<IngestSummary, IngestError> {
        let stream = self.rng.next_stream();
        let mut attempt = 1;
        loop {
            let result = self.attempt(request, pool, &version.state(), store, &mut stream.clone());
            match self.step(result, attempt) {
                Step::Done(result) => return result,
                Step::RetryAfter(delay) => std::thread::sleep(delay),
            }
            attempt += 1;
        }
    }

    /// Apply a request, yielding to the runtime between retries.
    ///
    /// # Errors
    ///
    /// Same as [`Self::ingest`].
    #[cfg(feature = "async")]
    pub async fn ingest_async<S: DocumentStore + ?Sized>(
        &self,
        request: &IngestRequest,
        pool: &PoolConfiguration,
        version: &VersionService,
        store: &S,
    ) -> Result<IngestSummary, IngestError> {
        let stream = self.rng.next_stream();
        let mut attempt = 1;
        loop {
            let result = self.attempt(request, pool, &version.state(), store, &mut stream.clone());
            match self.step(result, attempt) {
                Step::Done(result) => return result,
                Step::RetryAfter(delay) => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }

    fn step(&self, result: Result<IngestSummary, IngestError>, attempt: u32) -> Step {
        match result {
            Ok(mut summary) => {
                summary.attempts = attempt;
                log::info!(
                    "ingested {}/{} games ({} players, {} winners, {} documents, attempt {attempt})",
                    summary.games_applied,
                    summary.games_seen,
                    summary.players_applied,
                    summary.winning_players,
                    summary.documents_written
                );
                Step::Done(Ok(summary))
            }
            Err(IngestError::Store(err)) if err.is_conflict() => {
                if attempt >= self.retry.max_attempts() {
                    log::error!("ingestion abandoned after {attempt} attempts: {err}");
                    return Step::Done(Err(IngestError::RetriesExhausted {
                        attempts: attempt,
                        source: err,
                    }));
                }
                let delay = self.retry.delay_for(attempt);
                log::warn!("ingestion conflict ({err}); retrying in {delay:?}");
                Step::RetryAfter(delay)
            }
            Err(err) => Step::Done(Err(err)),
        }
    }

    fn attempt<S: DocumentStore + ?Sized>(
        &self,
        request: &IngestRequest,
        pool: &PoolConfiguration,
        state: &VersionState,
        store: &S,
        rng: &mut CountingRng<ChaCha8Rng>,
    ) -> Result<IngestSummary, IngestError> {
        let VersionState::Active {
            patch_version,
            batch,
        } = state
        else {
            return Err(IngestError::NotInitialized);
        };

        let mut working = BTreeMap::new();
        for ledger in Ledger::ALL {
            let prefix = BatchPrefix::new(ledger, patch_version.as_str(), *batch);
            let documents = store.find_batch(&prefix)?;
            let expected = 2 * pool.class_pool().len();
            if documents.len() != expected {
                log::error!(
                    "{ledger} batch {patch_version}/{batch} holds {} documents, expected {expected}",
                    documents.len()
                );
            }
            working.extend(documents.into_iter().map(|doc| (doc.key.clone(), doc)));
        }

        let mut summary = IngestSummary::default();
        let mut touched = BTreeSet::new();
        for game in &request.data {
            summary.games_seen += 1;
            self.apply_game(
                game,
                pool,
                patch_version,
                *batch,
                &mut working,
                &mut touched,
                &mut summary,
                rng,
            );
        }

        if touched.is_empty() {
            return Ok(summary);
        }
        let documents: Vec<MatrixDocument> = touched
            .iter()
            .filter_map(|key| working.remove(key))
            .collect();
        summary.documents_written = documents.len();
        store.put_all(documents)?;
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_game<R: Rng + ?Sized>(
        &self,
        game: &GameEndRecord,
        pool: &PoolConfiguration,
        patch_version: &str,
        batch: u32,
        working: &mut BTreeMap<DocumentKey, MatrixDocument>,
        touched: &mut BTreeSet<DocumentKey>,
        summary: &mut IngestSummary,
        rng: &mut R,
    ) {
        let Some(balance_patch) = game.balance_patch() else {
            log::warn!(
                "game {}: invalid patch version {:?}",
                game.label(),
                game.patch_version
            );
            summary.games_malformed += 1;
            return;
        };
        if balance_patch != patch_version {
            log::debug!(
                "game {}: balance patch {balance_patch} is not live ({patch_version})",
                game.label()
            );
            summary.games_skipped_version += 1;
            return;
        }
        let (Some(map_id), Some(player_count), Some(winner_score)) =
            (game.map_id, game.player_count, game.winner_score())
        else {
            log::warn!("game {}: missing map, player count or players", game.label());
            summary.games_malformed += 1;
            return;
        };

        summary.games_applied += 1;
        let targets = ContextKey::targets(map_id, player_count);
        for player in &game.player_logs {
            let won = player.total_score() == winner_score;
            let ledgers: &[Ledger] = if won { &Ledger::ALL } else { &[Ledger::Pick] };
            let outcome = self
                .player_deltas(player, pool, &targets, rng)
                .and_then(|deltas| {
                    let keys = document_keys(&deltas, ledgers, patch_version, batch);
                    validate(&deltas, &keys, working)?;
                    Ok((deltas, keys))
                });
            match outcome {
                Ok((deltas, keys)) => {
                    for key in keys {
                        if let Some(document) = working.get_mut(&key) {
                            for &context in &deltas.targets {
                                let Some(matrix) = document.matrix_mut(context) else {
                                    continue;
                                };
                                if let Err(err) = matrix.apply(deltas.cells(key.kind)) {
                                    log::error!("{key} {context}: validated deltas rejected: {err}");
                                }
                            }
                        }
                        touched.insert(key);
                    }
                    summary.players_applied += 1;
                    if won {
                        summary.winning_players += 1;
                    }
                }
                Err(PlayerSkip::Sentinel) => summary.players_skipped += 1,
                Err(PlayerSkip::MissingDocument(key)) => {
                    log::error!("game {}: document {key} is missing", game.label());
                    summary.players_skipped += 1;
                }
                Err(PlayerSkip::PoolMismatch(key)) => {
                    log::error!(
                        "game {}: document {key} was built for another card pool; switch to a new patch to apply the pool",
                        game.label()
                    );
                    summary.players_skipped += 1;
                }
                Err(skip) => {
                    log::warn!("game {}: player skipped ({skip:?})", game.label());
                    summary.players_skipped += 1;
                }
            }
        }
    }

    fn player_deltas<'p, R: Rng + ?Sized>(
        &self,
        player: &PlayerLog,
        pool: &'p PoolConfiguration,
        targets: &SmallVec<[ContextKey; 4]>,
        rng: &mut R,
    ) -> Result<PlayerDeltas<'p>, PlayerSkip> {
        let class_code = player.class_code.ok_or(PlayerSkip::MissingClass)?;
        if class_code == self.sentinel_class_code {
            return Err(PlayerSkip::Sentinel);
        }
        let class = pool
            .class(class_code)
            .ok_or(PlayerSkip::UnknownClass(class_code))?;
        let rounds = resolve_rounds(&player.rounds(), class).map_err(PlayerSkip::UnknownCard)?;
        Ok(PlayerDeltas {
            class_code,
            card_pool: class.cards(),
            targets: targets.clone(),
            coexistence: coexistence_deltas(&rounds),
            transition: transition_deltas(&rounds, class.len(), rng),
        })
    }
}

fn document_keys(
    deltas: &PlayerDeltas<'_>,
    ledgers: &[Ledger],
    patch_version: &str,
    batch: u32,
) -> Vec<DocumentKey> {
    ledgers
        .iter()
        .flat_map(|&ledger| {
            MatrixKind::ALL.into_iter().map(move |kind| {
                DocumentKey::new(ledger, patch_version, batch, kind, deltas.class_code)
            })
        })
        .collect()
}

fn validate(
    deltas: &PlayerDeltas<'_>,
    keys: &[DocumentKey],
    working: &BTreeMap<DocumentKey, MatrixDocument>,
) -> Result<(), PlayerSkip> {
    for key in keys {
        let document = working
            .get(key)
            .ok_or_else(|| PlayerSkip::MissingDocument(key.clone()))?;
        if document.card_pool != deltas.card_pool {
            return Err(PlayerSkip::PoolMismatch(key.clone()));
        }
        for &context in &deltas.targets {
            let matrix = document
                .matrix(context)
                .ok_or_else(|| PlayerSkip::UnknownContext {
                    key: key.clone(),
                    context,
                })?;
            matrix
                .check(deltas.cells(key.kind))
                .map_err(|_| PlayerSkip::OutOfRange(key.clone()))?;
        }
    }
    Ok(())
}
