//! Turn cancellation
//!
//! Each turn gets its own `CancellationToken` as soon as it is submitted, even
//! while it still waits for an earlier turn to finish. Aborting cancels every
//! submitted turn that has not finished; turns submitted afterwards start clean.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct AgentCancellation {
    active: Arc<parking_lot::Mutex<Vec<(u64, CancellationToken)>>>,
    next_id: Arc<AtomicU64>,
}

/// Cancellation for one turn. Dropping it retires the turn.
#[derive(Debug)]
pub struct TurnToken {
    id: u64,
    token: CancellationToken,
    owner: AgentCancellation,
}

impl TurnToken {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TurnToken {
    fn drop(&mut self) {
        self.owner.active.lock().retain(|(id, _)| *id != self.id);
    }
}

impl AgentCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new turn, returning its token
    pub fn begin_turn(&self) -> TurnToken {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        self.active.lock().push((id, token.clone()));
        TurnToken {
            id,
            token,
            owner: self.clone(),
        }
    }

    /// Cancel every unfinished turn
    pub fn cancel(&self) {
        for (_, token) in self.active.lock().iter() {
            token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.active.lock().iter().any(|(_, token)| token.is_cancelled())
    }
}
