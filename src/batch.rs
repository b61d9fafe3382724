//! Batch clock: a monotonic batch id plus a cancellation token per batch.
//! Work started under one batch checks its guard before touching the page;
//! `stop`/`reset`/mode changes advance the batch and cancel pending timers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

pub struct BatchClock {
    current_token: RwLock<CancellationToken>,
    batch: Arc<AtomicU64>,
}

impl BatchClock {
    pub fn new() -> Self {
        Self {
            current_token: RwLock::new(CancellationToken::new()),
            batch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel everything tied to the current batch and open a new one.
    pub fn advance(&self) -> u64 {
        let mut token = self.current_token.write();
        token.cancel();
        *token = CancellationToken::new();
        self.batch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Guard for work starting now, bound to the current batch.
    pub fn guard(&self) -> BatchGuard {
        let token = self.current_token.read();
        BatchGuard {
            batch: Arc::clone(&self.batch),
            batch_id: self.batch.load(Ordering::SeqCst),
            token: token.child_token(),
        }
    }

    pub fn current(&self) -> u64 {
        self.batch.load(Ordering::SeqCst)
    }
}

impl Default for BatchClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Checked by a task before it writes results.
#[derive(Clone)]
pub struct BatchGuard {
    batch: Arc<AtomicU64>,
    batch_id: u64,
    token: CancellationToken,
}

impl BatchGuard {
    /// True while no newer batch has started.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.batch.load(Ordering::SeqCst) == self.batch_id
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }
}
