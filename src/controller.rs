//! Turn controller: the state machine behind one game session.
//!
//! A single tokio task owns the [`Session`]. Commands from the front end
//! and events from the poll chain are handled one at a time, so every
//! transition sees a consistent session and the three persisted fields are
//! written through to the [`SessionStore`] after each change.
//!
//! ```text
//!            submit_turn                ack                 Completed
//!   Idle ───────────────► AwaitingSubmitAck ───► Polling ──────────────► FetchingLog ──► Idle
//!    │                        │ error                 │ Failed/Exhausted/Aborted
//!    │                        └──────────► Idle ◄─────┘
//!    │ start_new_game         ack                 init delay
//!    └───────────────► AwaitingSubmitAck ───► Starting ───────────► FetchingLog ──► Idle
//! ```
//!
//! Front ends talk to the task through a cloneable [`ControllerHandle`].
//! Operations return explicit results and the latest session is published
//! on a `watch` channel. Side effects such as "log replaced" and "scroll to
//! latest" go out on a `broadcast` channel. How an operation ended is
//! recorded in the session before it returns to `Idle`, so any snapshot
//! that shows `Idle` also shows the outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::api::{ActionRequest, GameApi};
use crate::config::PollConfig;
use crate::error::{ApiError, SessionError};
use crate::poller::{ChainId, JobPoller, PollEvent, PollHandle, PollOutcome, PollTarget};
use crate::session::{Session, SessionField, SessionStore, TurnEnd, TurnPhase};

const COMMAND_BUFFER: usize = 32;
const POLL_EVENT_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 64;

/// Side effects for front ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The message log was replaced with `len` messages.
    LogReplaced { len: usize },
    /// The newest message should be brought into view.
    ScrollToLatest,
    TurnEnded(TurnEnd),
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    StartNewGame(Reply<()>),
    SubmitTurn { text: String, reply: Reply<String> },
    FetchLog(Reply<()>),
    ResumePolling(Reply<String>),
    SetField {
        field: SessionField,
        value: String,
        reply: Reply<()>,
    },
    Shutdown,
}

/// Cloneable front door to a running [`TurnController`].
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<Session>,
    events: broadcast::Sender<SessionEvent>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::ControllerGone)?;
        rx.await.map_err(|_| SessionError::ControllerGone)?
    }

    /// Start a new conversation. Returns once the backend acknowledged it;
    /// the log is fetched after the init delay.
    pub async fn start_new_game(&self) -> Result<(), SessionError> {
        self.request(Command::StartNewGame).await
    }

    /// Submit one turn. Returns the new run handle once the backend
    /// acknowledged it; polling continues in the background.
    pub async fn submit_turn(&self, text: impl Into<String>) -> Result<String, SessionError> {
        let text = text.into();
        self.request(|reply| Command::SubmitTurn { text, reply })
            .await
    }

    /// Replace the message log with the server's copy.
    pub async fn fetch_log(&self) -> Result<(), SessionError> {
        self.request(Command::FetchLog).await
    }

    /// Start a fresh poll chain for the run handle left behind by a chain
    /// that failed, gave up or aborted.
    pub async fn resume_polling(&self) -> Result<String, SessionError> {
        self.request(Command::ResumePolling).await
    }

    /// Overwrite one persisted field. Only valid while idle.
    pub async fn set_field(
        &self,
        field: SessionField,
        value: impl Into<String>,
    ) -> Result<(), SessionError> {
        let value = value.into();
        self.request(|reply| Command::SetField {
            field,
            value,
            reply,
        })
        .await
    }

    /// Latest published session.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Receiver that sees every published session.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Wait until the input surface is enabled again.
    pub async fn wait_until_idle(&self) -> Result<Session, SessionError> {
        let mut rx = self.state.clone();
        let session = rx
            .wait_for(|s| s.phase.accepts_input())
            .await
            .map_err(|_| SessionError::ControllerGone)?;
        Ok(session.clone())
    }

    /// Stop the controller, cancelling any poll chain.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Owns the session and drives the turn cycle.
pub struct TurnController {
    api: Arc<dyn GameApi>,
    store: SessionStore,
    poller: JobPoller,
    init_delay: Duration,
    session: Session,
    active_poll: Option<PollHandle>,
    init_deadline: Option<Instant>,
    poll_tx: mpsc::Sender<PollEvent>,
    poll_rx: mpsc::Receiver<PollEvent>,
    state_tx: watch::Sender<Session>,
    events: broadcast::Sender<SessionEvent>,
}

impl TurnController {
    /// Create a controller over `store`, starting from its persisted fields.
    pub fn new(api: Arc<dyn GameApi>, store: SessionStore) -> Self {
        let session = Session {
            fields: store.fields(),
            ..Session::default()
        };
        let (poll_tx, poll_rx) = mpsc::channel(POLL_EVENT_BUFFER);
        let (state_tx, _) = watch::channel(session.clone());
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            poller: JobPoller::new(Arc::clone(&api), PollConfig::default()),
            api,
            store,
            init_delay: Duration::from_millis(5000),
            session,
            active_poll: None,
            init_deadline: None,
            poll_tx,
            poll_rx,
            state_tx,
            events,
        }
    }

    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poller = JobPoller::new(Arc::clone(&self.api), config);
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    /// Spawn the controller task.
    ///
    /// On start the persisted session is restored: an in-flight run is
    /// polled again, otherwise an existing conversation's log is fetched.
    ///
    /// The restored phase is published before this returns, so
    /// [`ControllerHandle::wait_until_idle`] also waits for the restore.
    pub fn spawn(mut self) -> ControllerHandle {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = ControllerHandle {
            commands,
            state: self.state_tx.subscribe(),
            events: self.events.clone(),
        };

        let fetch_on_start = self.begin_restore();
        tokio::spawn(self.run(command_rx, fetch_on_start));

        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, fetch_on_start: bool) {
        if fetch_on_start {
            if let Err(e) = self.refresh_log(None).await {
                tracing::warn!("Could not restore conversation log: {}", e);
            }
        }

        loop {
            let init_deadline = self.init_deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.poll_rx.recv() => self.handle_poll_event(event).await,
                _ = tokio::time::sleep_until(init_deadline.unwrap_or_else(Instant::now)),
                    if init_deadline.is_some() =>
                {
                    self.init_deadline = None;
                    self.on_init_delay_elapsed().await;
                }
            }
        }

        if let Some(chain) = self.active_poll.take() {
            chain.cancel();
        }
        tracing::debug!("Turn controller stopped");
    }

    /// Pick up where the persisted fields left off. Returns whether the log
    /// still has to be fetched.
    fn begin_restore(&mut self) -> bool {
        let fields = self.session.fields.clone();
        if !fields.has_conversation() {
            return false;
        }

        if fields.has_run_in_flight() {
            tracing::info!(
                thread_id = %fields.thread_id,
                run_id = %fields.run_id,
                status = %fields.run_status,
                "Resuming poll for restored run"
            );
            self.begin_polling();
            false
        } else {
            self.set_phase(TurnPhase::FetchingLog);
            true
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartNewGame(reply) => {
                let _ = reply.send(self.start_new_game().await);
            }
            Command::SubmitTurn { text, reply } => {
                let _ = reply.send(self.submit_turn(text).await);
            }
            Command::FetchLog(reply) => {
                let _ = reply.send(self.fetch_log().await);
            }
            Command::ResumePolling(reply) => {
                let _ = reply.send(self.resume_polling());
            }
            Command::SetField {
                field,
                value,
                reply,
            } => {
                let _ = reply.send(self.set_field(field, &value));
            }
            Command::Shutdown => {}
        }
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.session.phase.accepts_input() {
            Ok(())
        } else {
            Err(SessionError::Busy {
                phase: self.session.phase,
            })
        }
    }

    async fn start_new_game(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.session.last_turn_end = None;
        self.session.pending_input.clear();
        self.set_phase(TurnPhase::AwaitingSubmitAck);

        let init = match self.api.init().await {
            Ok(init) => init,
            Err(e) => {
                tracing::error!("Starting a new game failed: {}", e);
                self.finish(Some(TurnEnd::SubmitFailed(e.to_string())));
                return Err(e.into());
            }
        };

        tracing::info!(
            thread_id = %init.thread_id,
            run_id = %init.run_id,
            status = %init.run_status,
            "New game started"
        );

        self.active_poll = None;
        self.session.fields.thread_id = init.thread_id;
        self.session.fields.run_id = init.run_id;
        self.session.fields.run_status = init.run_status;
        self.session.messages.clear();
        self.session.suggestions.clear();
        self.persist_fields();

        // The log is fetched after a fixed delay without checking the init
        // run's status.
        self.init_deadline = Some(Instant::now() + self.init_delay);
        self.set_phase(TurnPhase::Starting);
        Ok(())
    }

    async fn on_init_delay_elapsed(&mut self) {
        if !self.session.fields.has_conversation() {
            tracing::warn!("Init response carried no thread id, skipping the log fetch");
            self.finish(Some(TurnEnd::LogFetchFailed(
                "the backend returned no thread id".to_string(),
            )));
            return;
        }
        if let Err(e) = self.refresh_log(None).await {
            tracing::warn!("Initial log fetch failed: {}", e);
        }
    }

    async fn submit_turn(&mut self, text: String) -> Result<String, SessionError> {
        self.ensure_idle()?;
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if !self.session.fields.has_conversation() {
            return Err(SessionError::NoConversation);
        }

        self.session.last_turn_end = None;
        self.session.pending_input = text.clone();
        self.set_phase(TurnPhase::AwaitingSubmitAck);

        let request = ActionRequest {
            message: text,
            thread_id: self.session.fields.thread_id.clone(),
        };

        let ack = self.api.submit_action(&request).await.and_then(|ack| {
            if ack.run_id.is_empty() {
                Err(ApiError::InvalidResponse {
                    reason: "action response has an empty run_id".to_string(),
                })
            } else {
                Ok(ack)
            }
        });

        match ack {
            Ok(ack) => {
                tracing::info!(run_id = %ack.run_id, status = %ack.run_status, "Turn submitted");
                self.session.fields.run_id = ack.run_id.clone();
                self.session.fields.run_status = ack.run_status;
                self.session.pending_input.clear();
                self.persist_fields();
                self.begin_polling();
                Ok(ack.run_id)
            }
            Err(e) => {
                // Pending input is kept so the same text can be resubmitted.
                tracing::error!("Submitting turn failed: {}", e);
                self.finish(Some(TurnEnd::SubmitFailed(e.to_string())));
                Err(e.into())
            }
        }
    }

    async fn fetch_log(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        if !self.session.fields.has_conversation() {
            return Err(SessionError::NoConversation);
        }
        self.session.last_turn_end = None;
        self.refresh_log(None).await.map_err(SessionError::from)
    }

    fn resume_polling(&mut self) -> Result<String, SessionError> {
        self.ensure_idle()?;
        if !self.session.fields.has_conversation() {
            return Err(SessionError::NoConversation);
        }
        if self.session.fields.run_id.is_empty() {
            return Err(SessionError::NoActiveRun);
        }

        tracing::info!(run_id = %self.session.fields.run_id, "Resuming poll on request");
        self.session.last_turn_end = None;
        self.begin_polling();
        Ok(self.session.fields.run_id.clone())
    }

    fn set_field(&mut self, field: SessionField, value: &str) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.session.fields.set(field, value);
        self.store.set(field, value)?;
        self.publish();
        Ok(())
    }

    /// Start a chain for the current run, replacing any previous one.
    fn begin_polling(&mut self) {
        let target = PollTarget {
            thread_id: self.session.fields.thread_id.clone(),
            run_id: self.session.fields.run_id.clone(),
        };
        if let Some(previous) = self.active_poll.take() {
            previous.cancel();
        }
        self.active_poll = Some(self.poller.start(target, self.poll_tx.clone()));
        self.set_phase(TurnPhase::Polling);
    }

    fn is_active_chain(&self, chain: ChainId) -> bool {
        self.active_poll.as_ref().map(PollHandle::id) == Some(chain)
    }

    async fn handle_poll_event(&mut self, event: PollEvent) {
        match event {
            PollEvent::Status {
                chain,
                run_id,
                status,
            } => {
                if !self.is_active_chain(chain) {
                    tracing::debug!(%chain, "Ignoring status from inactive poll chain");
                    return;
                }
                tracing::debug!(%run_id, %status, "Run status update");
                self.session.fields.run_status = status;
                self.persist_fields();
                self.publish();
            }
            PollEvent::Finished { chain, outcome } => {
                if !self.is_active_chain(chain) {
                    tracing::debug!(%chain, "Ignoring finish from inactive poll chain");
                    return;
                }
                self.active_poll = None;
                self.on_poll_finished(outcome).await;
            }
        }
    }

    async fn on_poll_finished(&mut self, outcome: PollOutcome) {
        let run_id = self.session.fields.run_id.clone();
        match outcome {
            PollOutcome::Completed { attempts } => {
                tracing::info!(%run_id, attempts, "Run completed");
                self.session.fields.run_id.clear();
                self.persist_fields();
                // A failed fetch is logged and recorded by `refresh_log`.
                let _ = self.refresh_log(Some(TurnEnd::Completed)).await;
            }
            PollOutcome::Failed { status, attempts } => {
                tracing::warn!(%run_id, %status, attempts, "Run ended without completing");
                self.finish(Some(TurnEnd::RunFailed(status)));
            }
            PollOutcome::Exhausted {
                attempts,
                last_status,
            } => {
                tracing::warn!(%run_id, %last_status, attempts, "Gave up polling run");
                self.finish(Some(TurnEnd::GaveUp {
                    attempts,
                    last_status,
                }));
            }
            PollOutcome::Aborted { attempts, error } => {
                tracing::error!(
                    %run_id,
                    attempts,
                    "Polling stopped after a failed check: {}",
                    error
                );
                self.finish(Some(TurnEnd::PollAborted(error.to_string())));
            }
            PollOutcome::Cancelled => {
                tracing::debug!(%run_id, "Poll chain cancelled");
                if self.session.phase == TurnPhase::Polling {
                    self.finish(None);
                }
            }
        }
    }

    /// Fetch the log and replace the in-memory copy. Leaves the phase at
    /// `FetchingLog`; callers finish the operation.
    async fn load_log(&mut self) -> Result<(), ApiError> {
        self.set_phase(TurnPhase::FetchingLog);
        let thread_id = self.session.fields.thread_id.clone();

        match self.api.messages(&thread_id).await {
            Ok(log) => {
                let len = log.messages.len();
                tracing::debug!(%thread_id, messages = len, "Conversation log fetched");
                self.session.messages = log.messages;
                self.session.suggestions = log.suggestions;
                self.emit(SessionEvent::LogReplaced { len });
                self.emit(SessionEvent::ScrollToLatest);
                Ok(())
            }
            Err(e) => {
                tracing::error!(%thread_id, "Fetching conversation log failed: {}", e);
                Err(e)
            }
        }
    }

    /// Fetch the log, then finish with `on_success` or with the fetch error.
    async fn refresh_log(&mut self, on_success: Option<TurnEnd>) -> Result<(), ApiError> {
        match self.load_log().await {
            Ok(()) => {
                self.finish(on_success);
                Ok(())
            }
            Err(e) => {
                self.finish(Some(TurnEnd::LogFetchFailed(e.to_string())));
                Err(e)
            }
        }
    }

    /// Record how the operation ended and return to `Idle`. The outcome is
    /// emitted and stored before the `Idle` snapshot is published.
    fn finish(&mut self, end: Option<TurnEnd>) {
        if let Some(end) = end {
            self.emit(SessionEvent::TurnEnded(end.clone()));
            self.session.last_turn_end = Some(end);
        }
        self.set_phase(TurnPhase::Idle);
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        if self.session.phase != phase {
            tracing::debug!(from = %self.session.phase, to = %phase, "Phase change");
        }
        self.session.phase = phase;
        self.publish();
    }

    /// Write the three fields through to the store. A failed write is
    /// logged; the in-memory session stays authoritative.
    fn persist_fields(&mut self) {
        if let Err(e) = self.store.set_all(&self.session.fields) {
            tracing::error!("Failed to persist session fields: {}", e);
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.session.clone());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
