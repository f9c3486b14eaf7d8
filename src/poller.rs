//! Job poller: turns "is this run done yet?" into one completion signal.
//!
//! A poll chain is a sequence of status checks for one run, each preceded
//! by the same fixed delay. The decision logic is the pure transition
//! [`PollChain::step`]; [`JobPoller::start`] drives it from a tokio task
//! that can be cancelled between checks.
//!
//! ```text
//!            sleep(interval)          fetch status
//!  start ──► [waiting] ──────────► [checking] ─────┬─► completed ──► Finished(Completed)
//!               ▲                                   ├─► failed/... ─► Finished(Failed)
//!               │  attempt < max_retries            ├─► fetch error ► Finished(Aborted)
//!               └───────────────────────────────────┤
//!                                                   └─► attempt == max ► Finished(Exhausted)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::GameApi;
use crate::config::PollConfig;
use crate::error::ApiError;
use crate::session::RunStatus;

/// Identifies one poll chain, so late events from a replaced chain can be
/// told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(u64);

impl ChainId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChainId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chain-{}", self.0)
    }
}

/// The run a chain is polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub thread_id: String,
    pub run_id: String,
}

/// How a chain ended.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The run reached `completed`.
    Completed { attempts: u32 },
    /// The run reached a terminal failure status.
    Failed { status: RunStatus, attempts: u32 },
    /// The retry budget ran out on non-terminal statuses.
    Exhausted { attempts: u32, last_status: RunStatus },
    /// A status fetch failed; the chain stops at that attempt.
    Aborted { attempts: u32, error: ApiError },
    /// The chain was cancelled before reaching an outcome.
    Cancelled,
}

/// State of a chain between checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollChain {
    target: PollTarget,
    attempt: u32,
    max_retries: u32,
}

/// Result of applying one status check to a chain.
#[derive(Debug)]
pub enum PollStep {
    Reschedule(PollChain),
    Finished(PollOutcome),
}

impl PollChain {
    pub fn new(target: PollTarget, max_retries: u32) -> Self {
        Self {
            target,
            attempt: 0,
            max_retries,
        }
    }

    pub fn target(&self) -> &PollTarget {
        &self.target
    }

    /// Checks made so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Apply the response of the next status check.
    pub fn step(self, response: Result<RunStatus, ApiError>) -> PollStep {
        let attempts = self.attempt + 1;

        let status = match response {
            Ok(status) => status,
            Err(error) => {
                return PollStep::Finished(PollOutcome::Aborted { attempts, error });
            }
        };

        if status.is_completed() {
            return PollStep::Finished(PollOutcome::Completed { attempts });
        }
        if status.is_failure() {
            return PollStep::Finished(PollOutcome::Failed { status, attempts });
        }
        if status == RunStatus::RequiresAction {
            // Nothing can answer the action yet; keep waiting on it.
            tracing::info!(run_id = %self.target.run_id, "Run requires action, waiting");
        }

        if attempts < self.max_retries {
            PollStep::Reschedule(Self {
                attempt: attempts,
                ..self
            })
        } else {
            PollStep::Finished(PollOutcome::Exhausted {
                attempts,
                last_status: status,
            })
        }
    }
}

/// Notifications from a running chain.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// A status check succeeded.
    Status {
        chain: ChainId,
        run_id: String,
        status: RunStatus,
    },
    /// The chain ended. Sent exactly once per chain.
    Finished { chain: ChainId, outcome: PollOutcome },
}

/// Handle to a running chain. Dropping it cancels the chain.
#[derive(Debug)]
pub struct PollHandle {
    id: ChainId,
    token: CancellationToken,
}

impl PollHandle {
    pub fn id(&self) -> ChainId {
        self.id
    }

    /// Stop the chain before its next check.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Starts poll chains against a [`GameApi`].
#[derive(Clone)]
pub struct JobPoller {
    api: Arc<dyn GameApi>,
    config: PollConfig,
}

impl JobPoller {
    pub fn new(api: Arc<dyn GameApi>, config: PollConfig) -> Self {
        Self { api, config }
    }

    /// Spawn a chain for `target`, reporting to `events`.
    pub fn start(&self, target: PollTarget, events: mpsc::Sender<PollEvent>) -> PollHandle {
        let id = ChainId::next();
        let token = CancellationToken::new();

        tracing::info!(
            chain = %id,
            run_id = %target.run_id,
            interval = ?self.config.interval,
            max_retries = self.config.max_retries,
            "Starting poll chain"
        );

        let chain = PollChain::new(target, self.config.max_retries);
        tokio::spawn(run_chain(
            id,
            chain,
            Arc::clone(&self.api),
            self.config,
            token.clone(),
            events,
        ));

        PollHandle { id, token }
    }
}

async fn run_chain(
    id: ChainId,
    mut chain: PollChain,
    api: Arc<dyn GameApi>,
    config: PollConfig,
    token: CancellationToken,
    events: mpsc::Sender<PollEvent>,
) {
    let outcome = loop {
        tokio::select! {
            _ = token.cancelled() => break PollOutcome::Cancelled,
            _ = tokio::time::sleep(config.interval) => {}
        }

        let target = chain.target().clone();
        let response = api.run_status(&target.thread_id, &target.run_id).await;
        if token.is_cancelled() {
            break PollOutcome::Cancelled;
        }

        match &response {
            Ok(status) => {
                tracing::debug!(chain = %id, attempt = chain.attempt() + 1, %status, "Poll check");
                let event = PollEvent::Status {
                    chain: id,
                    run_id: target.run_id.clone(),
                    status: status.clone(),
                };
                if events.send(event).await.is_err() {
                    break PollOutcome::Cancelled;
                }
            }
            Err(e) => {
                tracing::error!(chain = %id, run_id = %target.run_id, "Poll check failed: {}", e);
            }
        }

        match chain.step(response) {
            PollStep::Reschedule(next) => chain = next,
            PollStep::Finished(outcome) => break outcome,
        }
    };

    tracing::debug!(chain = %id, ?outcome, "Poll chain finished");
    let _ = events.send(PollEvent::Finished { chain: id, outcome }).await;
}
