//! Session data model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Server-reported lifecycle stage of a run.
///
/// The empty string maps to [`RunStatus::Idle`], which is what the session
/// holds before any run exists. Strings the client does not know are kept
/// verbatim in [`RunStatus::Unknown`] and treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    #[default]
    Idle,
    Queued,
    Running,
    RequiresAction,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
    Expired,
    Unknown(String),
}

impl RunStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" | "idle" => RunStatus::Idle,
            "queued" => RunStatus::Queued,
            "running" | "in_progress" => RunStatus::Running,
            "requires_action" => RunStatus::RequiresAction,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelling" => RunStatus::Cancelling,
            "cancelled" => RunStatus::Cancelled,
            "expired" => RunStatus::Expired,
            other => RunStatus::Unknown(other.to_string()),
        }
    }

    /// Wire/persisted form. `Idle` is the empty string.
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Idle => "",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Unknown(s) => s,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }

    /// Terminal without success.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.is_failure()
    }

    /// A turn with this status is still being processed server-side.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            RunStatus::Queued
                | RunStatus::Running
                | RunStatus::RequiresAction
                | RunStatus::Cancelling
        )
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        RunStatus::parse(&s)
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => f.write_str("idle"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// The three persisted session fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionField {
    ThreadId,
    RunId,
    RunStatus,
}

impl SessionField {
    pub const ALL: [SessionField; 3] = [
        SessionField::ThreadId,
        SessionField::RunId,
        SessionField::RunStatus,
    ];

    /// Fixed storage key.
    pub fn key(&self) -> &'static str {
        match self {
            SessionField::ThreadId => "threadId",
            SessionField::RunId => "runId",
            SessionField::RunStatus => "runStatus",
        }
    }
}

impl std::str::FromStr for SessionField {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threadId" | "thread_id" | "thread" => Ok(SessionField::ThreadId),
            "runId" | "run_id" | "run" => Ok(SessionField::RunId),
            "runStatus" | "run_status" | "status" => Ok(SessionField::RunStatus),
            other => Err(StoreError::UnknownField(other.to_string())),
        }
    }
}

impl fmt::Display for SessionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Conversation handle, run handle and last known run status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFields {
    pub thread_id: String,
    pub run_id: String,
    pub run_status: RunStatus,
}

impl SessionFields {
    pub fn get(&self, field: SessionField) -> String {
        match field {
            SessionField::ThreadId => self.thread_id.clone(),
            SessionField::RunId => self.run_id.clone(),
            SessionField::RunStatus => self.run_status.as_str().to_string(),
        }
    }

    pub fn set(&mut self, field: SessionField, value: &str) {
        match field {
            SessionField::ThreadId => self.thread_id = value.to_string(),
            SessionField::RunId => self.run_id = value.to_string(),
            SessionField::RunStatus => self.run_status = RunStatus::parse(value),
        }
    }

    pub fn has_conversation(&self) -> bool {
        !self.thread_id.is_empty()
    }

    /// A run handle is held and its last known status is non-terminal.
    pub fn has_run_in_flight(&self) -> bool {
        !self.run_id.is_empty() && self.run_status.is_in_flight()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    /// Text split on embedded line breaks, blank lines dropped.
    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.text
            .split('\n')
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
    }
}

/// Where the turn cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    /// Action or init request sent, waiting for the run handle.
    AwaitingSubmitAck,
    /// New game acknowledged, waiting out the init delay before fetching.
    Starting,
    Polling,
    FetchingLog,
}

impl TurnPhase {
    /// Whether the input surface is enabled.
    pub fn accepts_input(&self) -> bool {
        matches!(self, TurnPhase::Idle)
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnPhase::Idle => "idle",
            TurnPhase::AwaitingSubmitAck => "awaiting submit ack",
            TurnPhase::Starting => "starting",
            TurnPhase::Polling => "polling",
            TurnPhase::FetchingLog => "fetching log",
        };
        f.write_str(s)
    }
}

/// How a turn (or a new game, or a log fetch) ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEnd {
    /// The run completed and the log was refreshed.
    Completed,
    /// The run reached a terminal failure status. The run handle is kept.
    RunFailed(RunStatus),
    /// The poll chain ran out of retries. The run handle is kept.
    GaveUp { attempts: u32, last_status: RunStatus },
    /// A status check failed and the chain stopped.
    PollAborted(String),
    /// The action or init request failed; nothing was sent to the log.
    SubmitFailed(String),
    LogFetchFailed(String),
}

impl TurnEnd {
    pub fn is_success(&self) -> bool {
        matches!(self, TurnEnd::Completed)
    }
}

/// Full client-side session state, owned by the turn controller and
/// published to subscribers after every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub phase: TurnPhase,
    pub fields: SessionFields,
    /// Text of the turn being submitted, kept after a failed submit.
    pub pending_input: String,
    /// Conversation log, oldest first.
    pub messages: Vec<Message>,
    /// Suggested next moves from the last log fetch.
    pub suggestions: Vec<String>,
    /// Outcome of the last operation that ended one, published in the same
    /// snapshot as the return to `Idle`. Reset when a new operation starts.
    pub last_turn_end: Option<TurnEnd>,
}

impl Session {
    pub fn input_enabled(&self) -> bool {
        self.phase.accepts_input()
    }

    /// The last outcome, if it was a failure.
    pub fn failure(&self) -> Option<&TurnEnd> {
        self.last_turn_end.as_ref().filter(|end| !end.is_success())
    }
}
