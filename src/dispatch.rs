//! Top-level dispatch orchestration.
//!
//! [`DispatchOrchestrator`] coordinates the whole pipeline: it splits the
//! input into contiguous groups, packs each group into token-budget batches,
//! and drives every batch through the concurrency gate, rate limiter and
//! retry policy into the embedding service and vector store. Groups run
//! concurrently and fail independently; the run always returns a
//! [`DispatchResult`] that callers inspect for degradation, never an error
//! on partial failure.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Notify;

use crate::batch::{AdaptiveBatcher, Batch, Chunk};
use crate::embeddings::{EmbedInput, EmbeddingClient};
use crate::gate::ConcurrencyGate;
use crate::limiter::RateLimiter;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::stores::VectorStore;
use crate::tokens::TokenCounter;
use crate::types::IngestError;

/// Tunable surface of the dispatcher.
///
/// Defaults mirror the documented quota margins of the reference deployment:
/// 20 requests/second against a 1500/minute quota, 3 concurrent requests
/// against a limit of 4, and a 17500-token budget under the service's 20000
/// hard cap.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Contiguous chunks per dispatch group (the unit of concurrency).
    pub group_size: usize,
    /// Requests admitted per trailing one-second window.
    pub rate_ceiling: usize,
    /// Simultaneously outstanding downstream requests.
    pub concurrency_limit: usize,
    /// Retries after the first failed attempt of a batch.
    pub max_retries: u32,
    /// Minimum backoff before the first retry, doubled per attempt.
    pub retry_min_seconds: u64,
    /// Per-request token budget a batch may never exceed.
    pub token_budget: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            group_size: 15,
            rate_ceiling: 20,
            concurrency_limit: 3,
            max_retries: 3,
            retry_min_seconds: 10,
            token_budget: 17_500,
        }
    }
}

impl DispatchConfig {
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Applies `INGESTSMITH_*` environment overrides on top of the defaults.
    ///
    /// Recognized variables: `INGESTSMITH_GROUP_SIZE`,
    /// `INGESTSMITH_RATE_CEILING`, `INGESTSMITH_CONCURRENCY_LIMIT`,
    /// `INGESTSMITH_MAX_RETRIES`, `INGESTSMITH_RETRY_MIN_SECONDS`,
    /// `INGESTSMITH_TOKEN_BUDGET`. Unparseable values are configuration
    /// errors, fatal at startup.
    pub fn from_env() -> Result<Self, IngestError> {
        let mut config = Self::default();
        env_override(&mut config.group_size, "INGESTSMITH_GROUP_SIZE")?;
        env_override(&mut config.rate_ceiling, "INGESTSMITH_RATE_CEILING")?;
        env_override(&mut config.concurrency_limit, "INGESTSMITH_CONCURRENCY_LIMIT")?;
        env_override(&mut config.max_retries, "INGESTSMITH_MAX_RETRIES")?;
        env_override(&mut config.retry_min_seconds, "INGESTSMITH_RETRY_MIN_SECONDS")?;
        env_override(&mut config.token_budget, "INGESTSMITH_TOKEN_BUDGET")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would deadlock or disable the pipeline.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.group_size == 0 {
            return Err(IngestError::Config("group_size must be positive".into()));
        }
        if self.rate_ceiling == 0 {
            return Err(IngestError::Config("rate_ceiling must be positive".into()));
        }
        if self.concurrency_limit == 0 {
            return Err(IngestError::Config(
                "concurrency_limit must be positive".into(),
            ));
        }
        if self.token_budget == 0 {
            return Err(IngestError::Config("token_budget must be positive".into()));
        }
        Ok(())
    }
}

fn env_override<T>(field: &mut T, key: &str) -> Result<(), IngestError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => {
            *field = raw
                .parse()
                .map_err(|err| IngestError::Config(format!("invalid {key}: {err}")))?;
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

/// Builder for [`DispatchConfig`] starting from the defaults; `build`
/// validates.
#[derive(Debug, Clone, Default)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    #[must_use]
    pub fn group_size(mut self, group_size: usize) -> Self {
        self.config.group_size = group_size;
        self
    }

    #[must_use]
    pub fn rate_ceiling(mut self, rate_ceiling: usize) -> Self {
        self.config.rate_ceiling = rate_ceiling;
        self
    }

    #[must_use]
    pub fn concurrency_limit(mut self, concurrency_limit: usize) -> Self {
        self.config.concurrency_limit = concurrency_limit;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn retry_min_seconds(mut self, retry_min_seconds: u64) -> Self {
        self.config.retry_min_seconds = retry_min_seconds;
        self
    }

    #[must_use]
    pub fn token_budget(mut self, token_budget: usize) -> Self {
        self.config.token_budget = token_budget;
        self
    }

    pub fn build(self) -> Result<DispatchConfig, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Cooperative cancellation handle for a dispatch run.
///
/// Raising the token stops new batches from being submitted and lets
/// in-flight suspensions unwind early. Batches already stored stay stored;
/// nothing is double-submitted on the way down.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    raised: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals every holder of this token to stop.
    pub fn shutdown(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` once shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been signalled.
    pub async fn wait(&self) {
        if self.is_shutdown() {
            return;
        }
        let mut notified = std::pin::pin!(self.inner.notify.notified());
        notified.as_mut().enable();
        // Re-check after registering so a signal between the first check and
        // registration is not lost.
        if self.is_shutdown() {
            return;
        }
        notified.await;
    }
}

/// Terminal status of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    /// Embedded and stored.
    Succeeded,
    /// Every attempt failed; carries the final error rendered as text.
    Failed { error: String },
    /// Shutdown was raised before the batch completed.
    ///
    /// An abandoned final attempt may still have reached the store;
    /// cancellation never rolls back a stored batch.
    Cancelled,
}

/// Per-batch record in a [`DispatchResult`].
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// 1-based batch index from the packing plan.
    pub index: usize,
    /// Chunks carried by the batch.
    pub chunk_count: usize,
    /// Summed token cost of the batch.
    pub token_cost: usize,
    /// Attempts consumed (0 when the batch never reached submission).
    pub attempts: u32,
    pub status: BatchStatus,
}

/// Aggregate outcome of one dispatch run; read-only after construction.
///
/// Outcomes are recorded in completion order, which is not submission order.
/// A run with zero successes is still a normal return.
#[derive(Debug)]
pub struct DispatchResult {
    total_batches: usize,
    succeeded: usize,
    failed: usize,
    cancelled: usize,
    skipped_oversized: usize,
    outcomes: Vec<BatchOutcome>,
}

impl DispatchResult {
    /// Number of batches the packing plan produced.
    pub fn total_batches(&self) -> usize {
        self.total_batches
    }

    /// Batches embedded and stored successfully.
    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    /// Batches that exhausted their retry budget.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Batches abandoned because shutdown was raised.
    pub fn cancelled(&self) -> usize {
        self.cancelled
    }

    /// Chunks excluded from every batch for exceeding the budget alone.
    ///
    /// Counted separately from batch successes and failures.
    pub fn skipped_oversized(&self) -> usize {
        self.skipped_oversized
    }

    /// Per-batch outcomes in completion order.
    pub fn outcomes(&self) -> &[BatchOutcome] {
        &self.outcomes
    }

    /// Returns `true` when anything was lost: failed or cancelled batches,
    /// or oversized skips.
    pub fn is_degraded(&self) -> bool {
        self.failed > 0 || self.cancelled > 0 || self.skipped_oversized > 0
    }
}

/// Coordinator driving chunks through packing, throttling and retries into
/// the embedding service and vector store.
pub struct DispatchOrchestrator<C, S> {
    config: DispatchConfig,
    embeddings: Arc<C>,
    store: Arc<S>,
    counter: Arc<dyn TokenCounter>,
    limiter: Arc<RateLimiter>,
    gate: ConcurrencyGate,
    shutdown: ShutdownToken,
}

impl<C, S> DispatchOrchestrator<C, S>
where
    C: EmbeddingClient + 'static,
    S: VectorStore + 'static,
{
    /// Validates the configuration and wires up the shared throttles.
    pub fn new(
        config: DispatchConfig,
        embeddings: Arc<C>,
        store: Arc<S>,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(config.rate_ceiling));
        let gate = ConcurrencyGate::new(config.concurrency_limit);
        Ok(Self {
            config,
            embeddings,
            store,
            counter,
            limiter,
            gate,
            shutdown: ShutdownToken::new(),
        })
    }

    /// Token that cancels this orchestrator's runs when raised.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Embeds a single query under the same rate ceiling and retry policy as
    /// batch traffic.
    ///
    /// A query that exceeds the token budget on its own is rejected rather
    /// than skipped: the caller asked for exactly this text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        let tokens = self.counter.cost(text);
        if tokens > self.config.token_budget {
            return Err(IngestError::OversizedQuery {
                tokens,
                limit: self.config.token_budget,
            });
        }
        let policy = RetryPolicy::new(self.config.max_retries, self.config.retry_min_seconds);
        let inputs = [EmbedInput::query(text)];
        let inputs = inputs.as_slice();
        let limiter = self.limiter.as_ref();
        let embeddings = self.embeddings.as_ref();
        let outcome = policy
            .run(move || async move {
                limiter.admit().await;
                embeddings.embed(inputs).await
            })
            .await;
        match outcome {
            RetryOutcome::Succeeded {
                value: mut vectors, ..
            } => vectors.pop().ok_or_else(|| {
                IngestError::Embedding("endpoint returned no embedding for query".into())
            }),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }

    /// Runs the full dispatch over `chunks` and tallies the outcome.
    ///
    /// Groups are launched concurrently; within a group, batches (and retries
    /// of the same batch) are strictly sequential. One group failing has no
    /// effect on its siblings.
    pub async fn run(&self, chunks: Vec<Chunk>) -> DispatchResult {
        let total_chunks = chunks.len();
        let batcher = AdaptiveBatcher::new(self.config.group_size, self.config.token_budget);

        // Plan every group up front so batch indices stay globally monotonic.
        let mut planned: Vec<Vec<Batch>> = Vec::new();
        let mut skipped_oversized = 0usize;
        let mut next_index = 1usize;
        let mut remaining = chunks;
        while !remaining.is_empty() {
            let rest = if remaining.len() > self.config.group_size {
                remaining.split_off(self.config.group_size)
            } else {
                Vec::new()
            };
            let plan = batcher.pack(remaining, self.counter.as_ref(), next_index);
            next_index += plan.batches.len();
            skipped_oversized += plan.oversized.len();
            if !plan.batches.is_empty() {
                planned.push(plan.batches);
            }
            remaining = rest;
        }
        let total_batches = next_index - 1;

        tracing::info!(
            chunks = total_chunks,
            groups = planned.len(),
            batches = total_batches,
            skipped = skipped_oversized,
            "dispatch run planned"
        );

        let policy = RetryPolicy::new(self.config.max_retries, self.config.retry_min_seconds);
        let mut tasks = FuturesUnordered::new();
        for batches in planned {
            let gate = self.gate.clone();
            let limiter = Arc::clone(&self.limiter);
            let embeddings = Arc::clone(&self.embeddings);
            let store = Arc::clone(&self.store);
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(dispatch_group(
                batches, gate, limiter, policy, embeddings, store, shutdown,
            )));
        }

        // Aggregate in completion order; groups finish whenever they finish.
        let mut outcomes: Vec<BatchOutcome> = Vec::with_capacity(total_batches);
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok(mut group_outcomes) => outcomes.append(&mut group_outcomes),
                Err(err) => tracing::error!(error = %err, "group task panicked"),
            }
        }

        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == BatchStatus::Succeeded)
            .count();
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o.status, BatchStatus::Failed { .. }))
            .count();
        let cancelled = outcomes
            .iter()
            .filter(|o| o.status == BatchStatus::Cancelled)
            .count();

        if succeeded == total_batches {
            tracing::info!(
                succeeded,
                total = total_batches,
                "all batches processed successfully"
            );
        } else {
            tracing::warn!(
                succeeded,
                failed,
                cancelled,
                total = total_batches,
                "dispatch run finished degraded"
            );
        }

        DispatchResult {
            total_batches,
            succeeded,
            failed,
            cancelled,
            skipped_oversized,
            outcomes,
        }
    }
}

/// Drives one group's batches sequentially through the shared throttles.
async fn dispatch_group<C, S>(
    batches: Vec<Batch>,
    gate: ConcurrencyGate,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    embeddings: Arc<C>,
    store: Arc<S>,
    shutdown: ShutdownToken,
) -> Vec<BatchOutcome>
where
    C: EmbeddingClient,
    S: VectorStore,
{
    let mut outcomes = Vec::with_capacity(batches.len());
    for batch in batches {
        let index = batch.index();
        let chunk_count = batch.len();
        let token_cost = batch.token_cost();

        if shutdown.is_shutdown() {
            tracing::warn!(batch = index, "shutdown raised, batch not submitted");
            outcomes.push(BatchOutcome {
                index,
                chunk_count,
                token_cost,
                attempts: 0,
                status: BatchStatus::Cancelled,
            });
            continue;
        }

        // Biased so a submission that has already finished beats a
        // simultaneously raised shutdown and is counted as the success it is.
        let outcome = tokio::select! {
            biased;
            outcome = submit_batch(&batch, &gate, &limiter, policy, embeddings.as_ref(), store.as_ref()) => Some(outcome),
            () = shutdown.wait() => None,
        };

        let outcome = match outcome {
            Some(RetryOutcome::Succeeded { attempts, .. }) => {
                tracing::info!(batch = index, chunks = chunk_count, attempts, "batch stored");
                BatchOutcome {
                    index,
                    chunk_count,
                    token_cost,
                    attempts,
                    status: BatchStatus::Succeeded,
                }
            }
            Some(RetryOutcome::Exhausted {
                last_error,
                attempts,
            }) => {
                tracing::error!(
                    batch = index,
                    error = %last_error,
                    attempts,
                    "batch failed after final retry"
                );
                BatchOutcome {
                    index,
                    chunk_count,
                    token_cost,
                    attempts,
                    status: BatchStatus::Failed {
                        error: last_error.to_string(),
                    },
                }
            }
            None => {
                tracing::warn!(batch = index, "shutdown raised mid-flight, abandoning batch");
                BatchOutcome {
                    index,
                    chunk_count,
                    token_cost,
                    attempts: 0,
                    status: BatchStatus::Cancelled,
                }
            }
        };
        outcomes.push(outcome);
    }
    outcomes
}

/// One batch through the gate, limiter, retry policy and downstream calls.
///
/// The gate permit spans all attempts of the batch; each attempt re-admits
/// through the rate limiter because every attempt is a fresh downstream
/// request.
async fn submit_batch<C, S>(
    batch: &Batch,
    gate: &ConcurrencyGate,
    limiter: &RateLimiter,
    policy: RetryPolicy,
    embeddings: &C,
    store: &S,
) -> RetryOutcome<(), IngestError>
where
    C: EmbeddingClient,
    S: VectorStore,
{
    let _permit = gate.acquire().await;
    let chunks = batch.chunks();
    policy
        .run(move || async move {
            limiter.admit().await;
            let inputs: Vec<EmbedInput> = chunks
                .iter()
                .map(|chunk| EmbedInput::document(&chunk.content))
                .collect();
            let vectors = embeddings.embed(&inputs).await?;
            let entries: Vec<_> = chunks.iter().cloned().zip(vectors).collect();
            store.add_batch(entries).await
        })
        .await
}
