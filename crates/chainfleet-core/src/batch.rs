//! Bounded concurrent batch executor
//!
//! Bundles many independent calls into multicall chunks and keeps at most
//! `parallelism` chunks unconfirmed at once:
//! - `None` operations (caller-signaled no-ops) are dropped first
//! - chunks are submitted in input order, each after acquiring a permit
//! - a permit is released only when its chunk's receipt is in hand
//! - receipts reach the [`ReceiptSink`] in confirmation order
//!
//! A failed chunk stops further submissions. Chunks already in flight are
//! still awaited and delivered to the sink, then the first error returns.

use crate::chain::{BatchSubmitter, Confirmer};
use crate::confirm::{await_receipt, ConfirmationPolicy};
use crate::error::BatchError;
use crate::types::{EncodedCall, PendingRef, Receipt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Confirmed chunk handed to a [`ReceiptSink`]
#[derive(Debug, Clone)]
pub struct ChunkReceipt {
    /// Zero-based chunk index in submission order
    pub index: usize,
    /// Total chunks in this batch
    pub total: usize,
    /// Calls bundled in the chunk
    pub calls: usize,
    /// Confirmed receipt
    pub receipt: Receipt,
}

/// Per-chunk bookkeeping hook
#[async_trait::async_trait]
pub trait ReceiptSink: Send {
    /// Called once per confirmed chunk, in confirmation order
    async fn on_receipt(&mut self, chunk: &ChunkReceipt) -> Result<(), BatchError>;
}

/// Sink collecting receipts back into submission order
#[derive(Debug, Default)]
pub struct CollectReceipts {
    receipts: BTreeMap<usize, Receipt>,
}

impl CollectReceipts {
    /// Receipts ordered by chunk index
    #[must_use]
    pub fn into_ordered(self) -> Vec<Receipt> {
        self.receipts.into_values().collect()
    }
}

#[async_trait::async_trait]
impl ReceiptSink for CollectReceipts {
    async fn on_receipt(&mut self, chunk: &ChunkReceipt) -> Result<(), BatchError> {
        self.receipts.insert(chunk.index, chunk.receipt.clone());
        Ok(())
    }
}

/// Totals for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Operations dropped as no-ops
    pub skipped: usize,
    /// Operations submitted
    pub submitted: usize,
    /// Chunks confirmed
    pub chunks: usize,
}

/// Chunked, parallelism-capped submitter
#[derive(Clone)]
pub struct BatchExecutor {
    submitter: Arc<dyn BatchSubmitter>,
    confirmer: Arc<dyn Confirmer>,
    policy: ConfirmationPolicy,
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl BatchExecutor {
    /// Create executor
    #[must_use]
    pub fn new(
        submitter: Arc<dyn BatchSubmitter>,
        confirmer: Arc<dyn Confirmer>,
        policy: ConfirmationPolicy,
    ) -> Self {
        Self {
            submitter,
            confirmer,
            policy,
        }
    }

    /// Underlying submitter, for single non-bundled calls
    #[inline]
    #[must_use]
    pub fn submitter(&self) -> &Arc<dyn BatchSubmitter> {
        &self.submitter
    }

    /// Submit `operations` in chunks and return receipts in chunk order
    ///
    /// # Errors
    /// `BatchError::InvalidConfig` for a zero chunk size or parallelism,
    /// otherwise the first chunk submission or confirmation failure.
    pub async fn execute_batch(
        &self,
        operations: Vec<Option<EncodedCall>>,
        chunk_size: usize,
        parallelism: usize,
    ) -> Result<Vec<Receipt>, BatchError> {
        let mut sink = CollectReceipts::default();
        self.execute_batch_with(operations, chunk_size, parallelism, &mut sink)
            .await?;
        Ok(sink.into_ordered())
    }

    /// Submit `operations` in chunks, delivering each receipt to `sink` as it confirms
    ///
    /// # Errors
    /// As [`BatchExecutor::execute_batch`], plus sink failures.
    pub async fn execute_batch_with<S: ReceiptSink + ?Sized>(
        &self,
        operations: Vec<Option<EncodedCall>>,
        chunk_size: usize,
        parallelism: usize,
        sink: &mut S,
    ) -> Result<BatchSummary, BatchError> {
        if chunk_size == 0 || parallelism == 0 {
            return Err(BatchError::InvalidConfig {
                chunk_size,
                parallelism,
            });
        }

        let requested = operations.len();
        let calls: Vec<EncodedCall> = operations.into_iter().flatten().collect();
        let mut summary = BatchSummary {
            skipped: requested - calls.len(),
            submitted: calls.len(),
            chunks: 0,
        };
        if calls.is_empty() {
            tracing::info!(skipped = summary.skipped, "nothing to submit");
            return Ok(summary);
        }

        let total = calls.len().div_ceil(chunk_size);
        tracing::info!(
            operations = calls.len(),
            skipped = summary.skipped,
            chunks = total,
            chunk_size,
            parallelism,
            "executing batch"
        );

        let gate = Arc::new(Semaphore::new(parallelism));
        let mut queued = calls.chunks(chunk_size).enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<BatchError> = None;

        loop {
            // Admit queued chunks while slots are free
            while failure.is_none() {
                let Ok(permit) = Arc::clone(&gate).try_acquire_owned() else {
                    break;
                };
                let Some((index, chunk)) = queued.next() else {
                    break;
                };
                match self.submitter.submit_multicall(chunk).await {
                    Ok(pending) => {
                        tracing::debug!(chunk = index + 1, total, pending = %pending, "chunk submitted");
                        in_flight.push(self.confirm_chunk(index, chunk.len(), pending, permit));
                    }
                    Err(source) => {
                        tracing::error!(chunk = index + 1, total, error = %source, "chunk submission failed");
                        failure = Some(BatchError::Submit { index, source });
                    }
                }
            }

            let Some(settled) = in_flight.next().await else {
                break;
            };
            match settled {
                Ok((index, calls, receipt)) => {
                    summary.chunks += 1;
                    tracing::info!(
                        chunk = index + 1,
                        total,
                        block = receipt.block_number,
                        "chunk confirmed"
                    );
                    let chunk = ChunkReceipt {
                        index,
                        total,
                        calls,
                        receipt,
                    };
                    if let Err(err) = sink.on_receipt(&chunk).await {
                        failure.get_or_insert(err);
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "chunk failed");
                    failure.get_or_insert(err);
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Submit one call on its own and await its receipt
    ///
    /// # Errors
    /// Submission or confirmation failure, reported as chunk 0.
    pub async fn submit_single(&self, call: &EncodedCall) -> Result<Receipt, BatchError> {
        let pending = self
            .submitter
            .submit(call)
            .await
            .map_err(|source| BatchError::Submit { index: 0, source })?;
        await_receipt(self.confirmer.as_ref(), &pending, &self.policy)
            .await
            .map_err(|source| BatchError::Confirm { index: 0, source })
    }

    async fn confirm_chunk(
        &self,
        index: usize,
        calls: usize,
        pending: PendingRef,
        permit: OwnedSemaphorePermit,
    ) -> Result<(usize, usize, Receipt), BatchError> {
        let result = await_receipt(self.confirmer.as_ref(), &pending, &self.policy).await;
        drop(permit);
        result
            .map(|receipt| (index, calls, receipt))
            .map_err(|source| BatchError::Confirm { index, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimConfig, SimulatedChain};

    fn executor(chain: &Arc<SimulatedChain>) -> BatchExecutor {
        BatchExecutor::new(chain.clone(), chain.clone(), ConfirmationPolicy::no_retry())
    }

    fn ops(n: usize) -> Vec<Option<EncodedCall>> {
        (0..n)
            .map(|i| Some(EncodedCall::new("noop", i.to_string().into_bytes())))
            .collect()
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let err = executor(&chain).execute_batch(ops(3), 0, 1).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn none_operations_are_never_submitted() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        let receipts = executor(&chain)
            .execute_batch(vec![None, None], 10, 2)
            .await
            .unwrap();
        assert!(receipts.is_empty());
        assert_eq!(chain.stats().multicalls, 0);
    }

    #[tokio::test]
    async fn rejected_chunk_stops_admission_but_drains_in_flight() {
        let chain = Arc::new(SimulatedChain::new(SimConfig::default()));
        chain.revert_multicall(1);

        let mut sink = CollectReceipts::default();
        let err = executor(&chain)
            .execute_batch_with(ops(10), 2, 2, &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Confirm { index: 1, .. }));
        // Chunks 0 and 1 were in flight together; chunk 0 still reached the sink
        let delivered = sink.into_ordered();
        assert_eq!(delivered.len(), chain.stats().multicalls - 1);
        assert!(chain.stats().multicalls < 5);
    }
}
