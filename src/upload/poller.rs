use super::client::CommodityApi;
use super::error::{DomainErrorCode, Endpoint, OperationError, RequestEcho};
use super::types::{StatusCode, StatusObservation, UploadTaskId};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INTERVAL_MINUTES: u64 = 2;

/// Cooperative cancellation shared between a worker and its caller. It is
/// checked before each attempt and before each sleep; a sleep already in
/// progress runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_minutes(DEFAULT_MAX_ATTEMPTS, DEFAULT_INTERVAL_MINUTES)
    }
}

impl PollSettings {
    pub fn from_minutes(max_attempts: u32, interval_minutes: u64) -> Self {
        Self {
            max_attempts,
            interval: Duration::from_secs(interval_minutes.saturating_mul(60)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollState {
    TerminalReached,
    BudgetExhausted,
    CheckFailed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollReport {
    pub state: PollState,
    pub success: bool,
    /// Last known status; `None` reads as "unknown".
    pub status: Option<StatusCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    pub history: Vec<StatusObservation>,
    pub final_attempt: u32,
    pub completed_early: bool,
}

/// Polls CheckStatus sequentially until a terminal status or the attempt
/// budget runs out. Exhausting the budget is not a failure.
pub struct StatusPoller<'a, A: CommodityApi + ?Sized> {
    api: &'a A,
    settings: PollSettings,
    cancel: Option<CancelFlag>,
}

impl<'a, A: CommodityApi + ?Sized> StatusPoller<'a, A> {
    pub fn new(api: &'a A, settings: PollSettings) -> Self {
        Self {
            api,
            settings,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }

    pub fn poll(&self, task_id: &UploadTaskId) -> PollReport {
        self.poll_with(task_id, |_| {})
    }

    /// Like [`poll`](Self::poll), calling `on_observation` after every attempt.
    pub fn poll_with<F>(&self, task_id: &UploadTaskId, mut on_observation: F) -> PollReport
    where
        F: FnMut(&StatusObservation),
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut history: Vec<StatusObservation> = Vec::new();
        let mut last_status: Option<StatusCode> = None;

        info!(
            %task_id,
            max_attempts,
            interval_secs = self.settings.interval.as_secs(),
            "Starting status polling"
        );

        for attempt in 1..=max_attempts {
            if self.cancelled() {
                return cancelled_report(task_id, last_status, history, attempt - 1);
            }

            match self.api.check_status(task_id) {
                Err(err) => {
                    warn!(%task_id, attempt, error = %err, "Status check failed");
                    let observation = StatusObservation::error(attempt, err.to_string());
                    on_observation(&observation);
                    history.push(observation);

                    if attempt == max_attempts {
                        return PollReport {
                            state: PollState::CheckFailed,
                            success: false,
                            status: last_status,
                            error: Some(err.with_attempts(attempt)),
                            history,
                            final_attempt: attempt,
                            completed_early: false,
                        };
                    }
                }
                Ok(snapshot) => {
                    let observation = StatusObservation::status(attempt, snapshot.status);
                    on_observation(&observation);
                    history.push(observation);
                    last_status = snapshot.status;

                    match snapshot.status {
                        Some(status) if status.is_terminal() => {
                            info!(%task_id, attempt, status = status.code(), "Terminal status reached");
                            return PollReport {
                                state: PollState::TerminalReached,
                                success: true,
                                status: Some(status),
                                error: None,
                                history,
                                final_attempt: attempt,
                                completed_early: true,
                            };
                        }
                        Some(status) => {
                            debug!(%task_id, attempt, status = status.code(), "Still processing");
                        }
                        None => {
                            warn!(%task_id, attempt, raw = ?snapshot.raw_status, "Status unknown");
                        }
                    }
                }
            }

            if attempt < max_attempts {
                if self.cancelled() {
                    return cancelled_report(task_id, last_status, history, attempt);
                }
                if !self.settings.interval.is_zero() {
                    thread::sleep(self.settings.interval);
                }
            }
        }

        info!(
            %task_id,
            status = ?last_status.map(StatusCode::code),
            "Polling budget exhausted"
        );
        PollReport {
            state: PollState::BudgetExhausted,
            success: true,
            status: last_status,
            error: None,
            history,
            final_attempt: max_attempts,
            completed_early: false,
        }
    }
}

fn cancelled_report(
    task_id: &UploadTaskId,
    status: Option<StatusCode>,
    history: Vec<StatusObservation>,
    completed: u32,
) -> PollReport {
    info!(%task_id, completed, "Status polling cancelled");
    let error = OperationError::domain(
        Endpoint::Poll,
        DomainErrorCode::PollCancelled,
        "polling cancelled by caller",
    )
    .with_request(RequestEcho::local([("upload_task_id", task_id.to_string())]))
    .with_attempts(completed);
    PollReport {
        state: PollState::Cancelled,
        success: false,
        status,
        error: Some(error),
        history,
        final_attempt: completed,
        completed_early: false,
    }
}
