use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::api::CourseApi;
use crate::error::{ApiError, ErrorType};
use crate::model::{LinkCheckResult, LinkCheckStatus, RequestStatus};
use crate::shared::lock;
use crate::status::StatusBoard;

/// Client-visible stage of a link-check job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStage {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

/// Fixed lookup from raw server stage codes to [`ClientStage`]. Anything not in
/// the table, including a missing code, classifies as `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTable {
    codes: HashMap<String, ClientStage>,
}

impl Default for StageTable {
    fn default() -> Self {
        let codes = [
            ("Uninitiated", ClientStage::NotStarted),
            ("Pending", ClientStage::Running),
            ("In-Progress", ClientStage::Running),
            ("Retrying", ClientStage::Running),
            ("Succeeded", ClientStage::Succeeded),
            ("Failed", ClientStage::Failed),
            ("Canceled", ClientStage::Failed),
        ]
        .into_iter()
        .map(|(code, stage)| (code.to_owned(), stage))
        .collect();
        Self { codes }
    }
}

impl StageTable {
    pub fn new(codes: HashMap<String, ClientStage>) -> Self {
        Self { codes }
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let codes: HashMap<String, ClientStage> =
            serde_json::from_str(raw).context("parse stage table json")?;
        if codes.is_empty() {
            anyhow::bail!("stage table must not be empty");
        }
        Ok(Self { codes })
    }

    pub fn classify(&self, code: Option<&str>) -> ClientStage {
        code.and_then(|code| self.codes.get(code).copied())
            .unwrap_or(ClientStage::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    #[default]
    Idle,
    Starting,
    Polling,
    Succeeded,
    Failed,
}

impl ScanPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanFailure {
    /// The start request itself failed; no job was observed.
    StartRequest { message: String },
    /// The job reported failure, or reported a code outside the stage table.
    Job { code: Option<String> },
    /// A status request failed.
    Transport { message: String },
    /// The caller is not allowed to run or view the scan.
    Denied,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub generation: u64,
    pub phase: ScanPhase,
    pub failure: Option<ScanFailure>,
    pub stage_code: Option<String>,
    pub stage: Option<ClientStage>,
    pub in_progress: bool,
    pub polls: u32,
    pub result: Option<LinkCheckResult>,
    /// Start request.
    pub saving_status: RequestStatus,
    /// Most recent status request.
    pub loading_status: RequestStatus,
}

/// What the poll loop should do after a response was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    Terminal,
    /// The response belonged to a superseded generation and was dropped.
    Stale,
}

/// Drives the link-check job: start, poll until terminal, publish the result.
pub struct ScanJobController {
    course_id: String,
    api: Arc<dyn CourseApi>,
    status: Arc<StatusBoard>,
    table: StageTable,
    poll_interval: Duration,
    state: Mutex<ScanSnapshot>,
    phase_tx: watch::Sender<(u64, ScanPhase)>,
}

impl ScanJobController {
    pub fn new(
        course_id: impl Into<String>,
        api: Arc<dyn CourseApi>,
        status: Arc<StatusBoard>,
        table: StageTable,
        poll_interval: Duration,
    ) -> Self {
        let (phase_tx, _) = watch::channel((0, ScanPhase::Idle));
        Self {
            course_id: course_id.into(),
            api,
            status,
            table,
            poll_interval,
            state: Mutex::new(ScanSnapshot::default()),
            phase_tx,
        }
    }

    /// Begin a new job generation and drive it in the background. Any job still
    /// running is superseded: its later responses are discarded.
    pub fn start_scan(self: &Arc<Self>) -> u64 {
        let generation = self.begin();
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.drive(generation).await;
        });
        generation
    }

    /// Start a scan and wait until it reaches a terminal phase.
    pub async fn run_to_completion(self: &Arc<Self>) -> ScanSnapshot {
        self.start_scan();
        self.wait_settled().await
    }

    /// Wait until the current generation is terminal.
    pub async fn wait_settled(&self) -> ScanSnapshot {
        let mut rx = self.phase_tx.subscribe();
        if rx.wait_for(|(_, phase)| phase.is_terminal()).await.is_err() {
            tracing::debug!("scan phase channel closed while waiting");
        }
        self.snapshot()
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        lock(&self.state).clone()
    }

    fn begin(&self) -> u64 {
        let mut state = lock(&self.state);
        let generation = state.generation + 1;
        *state = ScanSnapshot {
            generation,
            phase: ScanPhase::Starting,
            in_progress: true,
            saving_status: RequestStatus::Pending,
            ..ScanSnapshot::default()
        };
        self.status.reset_errors(ErrorType::LinkCheck);
        self.status.set_error_modal_open(false);
        self.publish(&state);
        tracing::info!(course_id = %self.course_id, generation, "starting link check");
        generation
    }

    async fn drive(&self, generation: u64) {
        let started = self.api.start_link_check(&self.course_id).await;
        if self.apply_start(generation, started) != PollOutcome::Continue {
            return;
        }

        loop {
            if !self.mark_polling(generation) {
                return;
            }
            let response = self.api.link_check_status(&self.course_id).await;
            match self.apply_poll(generation, response) {
                PollOutcome::Continue => tokio::time::sleep(self.poll_interval).await,
                PollOutcome::Terminal | PollOutcome::Stale => return,
            }
        }
    }

    /// Flag the status request as in flight. False once `generation` is superseded.
    fn mark_polling(&self, generation: u64) -> bool {
        let mut state = lock(&self.state);
        if state.generation != generation {
            return false;
        }
        state.loading_status = RequestStatus::InProgress;
        true
    }

    pub(crate) fn apply_start(
        &self,
        generation: u64,
        response: Result<LinkCheckStatus, ApiError>,
    ) -> PollOutcome {
        let mut state = lock(&self.state);
        if state.generation != generation {
            tracing::debug!(generation, current = state.generation, "dropping stale start response");
            return PollOutcome::Stale;
        }

        let outcome = match response {
            Ok(ack) => {
                state.stage = Some(self.table.classify(ack.link_check_status.as_deref()));
                state.stage_code = ack.link_check_status;
                state.phase = ScanPhase::Polling;
                state.saving_status = RequestStatus::Successful;
                PollOutcome::Continue
            }
            Err(err) if err.is_permission() => {
                tracing::warn!(course_id = %self.course_id, ?err, "link check start denied");
                finish(&mut state, ScanFailure::Denied);
                state.saving_status = RequestStatus::Denied;
                PollOutcome::Terminal
            }
            Err(err) => {
                tracing::warn!(course_id = %self.course_id, ?err, "link check start failed");
                finish(
                    &mut state,
                    ScanFailure::StartRequest {
                        message: err.to_string(),
                    },
                );
                state.saving_status = RequestStatus::Failed;
                PollOutcome::Terminal
            }
        };
        self.publish(&state);
        outcome
    }

    pub(crate) fn apply_poll(
        &self,
        generation: u64,
        response: Result<LinkCheckStatus, ApiError>,
    ) -> PollOutcome {
        let mut state = lock(&self.state);
        if state.generation != generation || state.phase != ScanPhase::Polling {
            tracing::debug!(generation, current = state.generation, "dropping stale poll response");
            return PollOutcome::Stale;
        }
        state.polls += 1;

        let outcome = match response {
            Err(err) if err.is_permission() => {
                tracing::warn!(course_id = %self.course_id, ?err, "link check status denied");
                finish(&mut state, ScanFailure::Denied);
                state.loading_status = RequestStatus::Denied;
                PollOutcome::Terminal
            }
            Err(err) => {
                tracing::error!(course_id = %self.course_id, ?err, "link check status request failed");
                finish(
                    &mut state,
                    ScanFailure::Transport {
                        message: err.to_string(),
                    },
                );
                state.loading_status = RequestStatus::Failed;
                self.surface_failure(&err);
                PollOutcome::Terminal
            }
            Ok(status) => {
                state.loading_status = RequestStatus::Successful;
                let stage = self.table.classify(status.link_check_status.as_deref());
                state.stage = Some(stage);
                state.stage_code = status.link_check_status.clone();
                match stage {
                    ClientStage::Running => {
                        tracing::debug!(generation, code = ?state.stage_code, "link check running");
                        PollOutcome::Continue
                    }
                    ClientStage::Succeeded => {
                        state.result = status.link_check_output;
                        state.phase = ScanPhase::Succeeded;
                        state.in_progress = false;
                        tracing::info!(course_id = %self.course_id, generation, "link check succeeded");
                        PollOutcome::Terminal
                    }
                    ClientStage::Failed | ClientStage::NotStarted => {
                        let code = status.link_check_status;
                        tracing::warn!(course_id = %self.course_id, generation, ?code, "link check failed");
                        let err = ApiError::JobFailure {
                            message: match &code {
                                Some(code) => format!("Link Check Failed (status {code:?})"),
                                None => "Link Check Failed (no status reported)".to_owned(),
                            },
                        };
                        finish(&mut state, ScanFailure::Job { code });
                        self.surface_failure(&err);
                        PollOutcome::Terminal
                    }
                }
            }
        };
        self.publish(&state);
        outcome
    }

    fn surface_failure(&self, err: &ApiError) {
        self.status.push_error(ErrorType::LinkCheck, err.to_string());
        self.status.set_error_modal_open(true);
    }

    fn publish(&self, state: &ScanSnapshot) {
        self.phase_tx.send_replace((state.generation, state.phase));
    }
}

fn finish(state: &mut ScanSnapshot, failure: ScanFailure) {
    state.phase = ScanPhase::Failed;
    state.failure = Some(failure);
    state.in_progress = false;
    state.result = None;
}
