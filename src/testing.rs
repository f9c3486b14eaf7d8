//! Scripted [`GameApi`] for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{ActionRequest, ActionResponse, GameApi, InitResponse, MessageLog};
use crate::error::ApiError;
use crate::session::RunStatus;

/// A call the controller or poller made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Init,
    SubmitAction(ActionRequest),
    RunStatus { thread_id: String, run_id: String },
    Messages { thread_id: String },
}

#[derive(Default)]
struct Script {
    inits: VecDeque<Result<InitResponse, ApiError>>,
    actions: VecDeque<Result<ActionResponse, ApiError>>,
    statuses: VecDeque<Result<RunStatus, ApiError>>,
    log: MessageLog,
    log_errors: VecDeque<ApiError>,
    calls: Vec<ApiCall>,
}

/// Replays queued responses and records every call.
#[derive(Default)]
pub struct ScriptedApi {
    script: Mutex<Script>,
}

fn exhausted(what: &str) -> ApiError {
    ApiError::InvalidResponse {
        reason: format!("no scripted {} response", what),
    }
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_init(&self, run_id: &str, run_status: RunStatus, thread_id: &str) {
        self.script.lock().unwrap().inits.push_back(Ok(InitResponse {
            run_id: run_id.to_string(),
            run_status,
            thread_id: thread_id.to_string(),
        }));
    }

    pub fn push_init_error(&self, error: ApiError) {
        self.script.lock().unwrap().inits.push_back(Err(error));
    }

    pub fn push_action(&self, run_id: &str, run_status: RunStatus) {
        self.script.lock().unwrap().actions.push_back(Ok(ActionResponse {
            run_id: run_id.to_string(),
            run_status,
        }));
    }

    pub fn push_action_error(&self, error: ApiError) {
        self.script.lock().unwrap().actions.push_back(Err(error));
    }

    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = RunStatus>) {
        let mut script = self.script.lock().unwrap();
        script.statuses.extend(statuses.into_iter().map(Ok));
    }

    pub fn push_status_error(&self, error: ApiError) {
        self.script.lock().unwrap().statuses.push_back(Err(error));
    }

    /// Log returned by every successful `messages` call.
    pub fn set_log(&self, log: MessageLog) {
        self.script.lock().unwrap().log = log;
    }

    /// Fail the next `messages` call.
    pub fn push_log_error(&self, error: ApiError) {
        self.script.lock().unwrap().log_errors.push_back(error);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn run_status_calls(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::RunStatus { .. }))
    }

    pub fn messages_calls(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::Messages { .. }))
    }

    pub fn action_requests(&self) -> Vec<ActionRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::SubmitAction(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.script.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl GameApi for ScriptedApi {
    async fn init(&self) -> Result<InitResponse, ApiError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(ApiCall::Init);
        script.inits.pop_front().unwrap_or_else(|| Err(exhausted("init")))
    }

    async fn submit_action(&self, request: &ActionRequest) -> Result<ActionResponse, ApiError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(ApiCall::SubmitAction(request.clone()));
        script
            .actions
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("action")))
    }

    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, ApiError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(ApiCall::RunStatus {
            thread_id: thread_id.to_string(),
            run_id: run_id.to_string(),
        });
        script
            .statuses
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("run status")))
    }

    async fn messages(&self, thread_id: &str) -> Result<MessageLog, ApiError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(ApiCall::Messages {
            thread_id: thread_id.to_string(),
        });
        match script.log_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(script.log.clone()),
        }
    }
}
