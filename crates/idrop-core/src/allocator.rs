// SPDX-License-Identifier: AGPL-3.0
// iDrop Core - Transfer ID allocation
//
// Uniqueness is checked against a fresh read of the pending transfers on every
// attempt. Two senders racing between that read and their write can still end
// up with the same code; receivers then get whichever record the store returns
// first. That window is accepted.

use crate::transfer::{TransferId, TransferRepository};
use crate::types::AppError;
use rand::Rng;
use std::collections::HashSet;

pub const MIN_TRANSFER_ID: TransferId = 1000;
pub const MAX_TRANSFER_ID: TransferId = 9999;

/// Picks random 4-digit codes not used by any pending transfer
#[derive(Clone)]
pub struct IdAllocator {
    transfers: TransferRepository,
    max_attempts: u32,
}

impl IdAllocator {
    pub fn new(transfers: TransferRepository, max_attempts: u32) -> Self {
        Self {
            transfers,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Allocate a code uniformly at random from the 4-digit range
    pub async fn allocate(&self) -> Result<TransferId, AppError> {
        self.allocate_from(|| rand::thread_rng().gen_range(MIN_TRANSFER_ID..=MAX_TRANSFER_ID))
            .await
    }

    /// Allocate using a caller-supplied candidate sequence
    pub async fn allocate_from<F>(&self, mut next_candidate: F) -> Result<TransferId, AppError>
    where
        F: FnMut() -> TransferId + Send,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = next_candidate();
            let taken: HashSet<TransferId> = self
                .transfers
                .list_all()
                .await?
                .into_iter()
                .map(|t| t.record.id)
                .collect();

            if !taken.contains(&candidate) {
                if attempt > 1 {
                    tracing::debug!("Allocated transfer ID {} after {} attempts", candidate, attempt);
                }
                return Ok(candidate);
            }
        }

        tracing::warn!("Transfer ID allocation gave up after {} attempts", self.max_attempts);
        Err(AppError::AllocationExhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transfer::TransferRecord;
    use std::sync::Arc;

    async fn repo_with(ids: &[TransferId]) -> TransferRepository {
        let repo = TransferRepository::new(Arc::new(MemoryStore::new()));
        for id in ids {
            repo.create(&TransferRecord::text(*id, "x")).await.unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn test_random_ids_are_in_range_and_unused() {
        let repo = repo_with(&[1000, 5000, 9999]).await;
        let allocator = IdAllocator::new(repo, 100);

        for _ in 0..50 {
            let id = allocator.allocate().await.unwrap();
            assert!((MIN_TRANSFER_ID..=MAX_TRANSFER_ID).contains(&id));
            assert!(![1000, 5000, 9999].contains(&id));
        }
    }

    #[tokio::test]
    async fn test_retries_past_collisions() {
        let repo = repo_with(&[4821, 1234]).await;
        let allocator = IdAllocator::new(repo, 10);

        let mut candidates = vec![4821, 1234, 7777].into_iter();
        let id = allocator
            .allocate_from(|| candidates.next().unwrap())
            .await
            .unwrap();
        assert_eq!(id, 7777);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let repo = repo_with(&[4821]).await;
        let allocator = IdAllocator::new(repo, 3);

        let mut calls = 0;
        let result = allocator
            .allocate_from(|| {
                calls += 1;
                4821
            })
            .await;
        assert!(matches!(
            result,
            Err(AppError::AllocationExhausted { attempts: 3 })
        ));
        assert_eq!(calls, 3);
    }
}
