//! Precondition-checked submission: look at the server-side status first and
//! only submit once parsing has completed.

use super::client::CommodityApi;
use super::error::{DomainErrorCode, Endpoint, ErrorCode, OperationError, RequestEcho};
use super::poller::{CancelFlag, PollReport, PollSettings, PollState, StatusPoller};
use super::types::{ModelMetadata, PosMode, StatusCode, StatusObservation, UploadTaskId};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeSubmitOptions {
    pub auto_poll: bool,
    pub poll: PollSettings,
    pub pos_mode: PosMode,
}

impl Default for SafeSubmitOptions {
    fn default() -> Self {
        Self {
            auto_poll: true,
            poll: PollSettings::default(),
            pos_mode: PosMode::DefaultSentinel,
        }
    }
}

/// What the status table says to do with the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Submit,
    Skip,
    Poll,
    Fail(DomainErrorCode),
}

pub fn decide(status: Option<StatusCode>, auto_poll: bool) -> Decision {
    match status {
        Some(StatusCode::Ready) | Some(StatusCode::SubmitFailed) => Decision::Submit,
        Some(StatusCode::Submitted) => Decision::Skip,
        Some(StatusCode::Generating) | Some(StatusCode::Analyzing) if auto_poll => Decision::Poll,
        Some(StatusCode::Generating) | Some(StatusCode::Analyzing) => {
            Decision::Fail(DomainErrorCode::ParsingNotComplete)
        }
        Some(StatusCode::ParseFailed) => Decision::Fail(DomainErrorCode::ParsingFailed),
        Some(StatusCode::AnalyzedOffline) => Decision::Fail(DomainErrorCode::OfflineAnalysis),
        None => Decision::Fail(DomainErrorCode::UnknownStatus),
    }
}

/// Branch taken on the status a poll ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterPoll {
    Submit,
    Skip,
    Halt(StatusCode),
    Unexpected,
}

pub fn decide_after_poll(status: Option<StatusCode>) -> AfterPoll {
    match status {
        Some(StatusCode::Ready) => AfterPoll::Submit,
        Some(StatusCode::Submitted) => AfterPoll::Skip,
        Some(
            status @ (StatusCode::ParseFailed
            | StatusCode::SubmitFailed
            | StatusCode::AnalyzedOffline),
        ) => AfterPoll::Halt(status),
        _ => AfterPoll::Unexpected,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SafeSubmitOutcome {
    /// SubmitModel ran; its payload is passed through untouched.
    Submitted { response: Value },
    Skipped { message: String },
    /// Polling ended on a terminal status that does not allow submission.
    Halted { status: StatusCode, message: String },
    Failed { error: OperationError },
}

#[derive(Debug, Clone, Serialize)]
pub struct SafeSubmitReport {
    pub upload_task_id: UploadTaskId,
    pub initial_status: Option<StatusCode>,
    pub final_status: Option<StatusCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollReport>,
    #[serde(flatten)]
    pub outcome: SafeSubmitOutcome,
}

impl SafeSubmitReport {
    pub fn success(&self) -> bool {
        matches!(
            self.outcome,
            SafeSubmitOutcome::Submitted { .. } | SafeSubmitOutcome::Skipped { .. }
        )
    }

    pub fn submission_skipped(&self) -> bool {
        matches!(self.outcome, SafeSubmitOutcome::Skipped { .. })
    }

    pub fn error(&self) -> Option<&OperationError> {
        match &self.outcome {
            SafeSubmitOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<&ErrorCode> {
        self.error().map(|e| &e.code)
    }

    pub fn status_history(&self) -> &[StatusObservation] {
        self.poll.as_ref().map_or(&[], |p| p.history.as_slice())
    }

    pub fn message(&self) -> String {
        match &self.outcome {
            SafeSubmitOutcome::Submitted { .. } => "Model submitted successfully".to_string(),
            SafeSubmitOutcome::Skipped { message } | SafeSubmitOutcome::Halted { message, .. } => {
                message.clone()
            }
            SafeSubmitOutcome::Failed { error } => error.to_string(),
        }
    }
}

pub struct SafeSubmitter<'a, A: CommodityApi + ?Sized> {
    api: &'a A,
    options: SafeSubmitOptions,
    cancel: Option<CancelFlag>,
}

impl<'a, A: CommodityApi + ?Sized> SafeSubmitter<'a, A> {
    pub fn new(api: &'a A, options: SafeSubmitOptions) -> Self {
        Self {
            api,
            options,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run(&self, task_id: &UploadTaskId, model: &ModelMetadata) -> SafeSubmitReport {
        self.run_with(task_id, model, |_| {})
    }

    /// Runs the decision procedure, reporting poll observations as they arrive.
    pub fn run_with<F>(
        &self,
        task_id: &UploadTaskId,
        model: &ModelMetadata,
        on_observation: F,
    ) -> SafeSubmitReport
    where
        F: FnMut(&StatusObservation),
    {
        let mut report = SafeSubmitReport {
            upload_task_id: task_id.clone(),
            initial_status: None,
            final_status: None,
            poll: None,
            outcome: SafeSubmitOutcome::Skipped {
                message: String::new(),
            },
        };

        let snapshot = match self.api.check_status(task_id) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%task_id, error = %err, "Initial status check failed");
                report.outcome = SafeSubmitOutcome::Failed {
                    error: self.failure(
                        task_id,
                        DomainErrorCode::StatusCheckFailed,
                        format!("status check failed: {}", err.message),
                        err.raw.clone(),
                    )
                    .with_cause(err),
                };
                return report;
            }
        };

        let status = snapshot.status;
        report.initial_status = status;
        report.final_status = status;
        let decision = decide(status, self.options.auto_poll);
        info!(%task_id, status = ?status.map(StatusCode::code), ?decision, "Safe submit decision");

        match decision {
            Decision::Submit => self.submit(&mut report, task_id, model),
            Decision::Skip => {
                report.outcome = SafeSubmitOutcome::Skipped {
                    message: "Model has already been submitted".to_string(),
                };
            }
            Decision::Fail(code) => {
                report.outcome = SafeSubmitOutcome::Failed {
                    error: self.failure(task_id, code, fail_message(code, status), Some(snapshot.payload)),
                };
            }
            Decision::Poll => {
                let mut poller = StatusPoller::new(self.api, self.options.poll);
                if let Some(cancel) = &self.cancel {
                    poller = poller.with_cancel(cancel.clone());
                }
                let poll = poller.poll_with(task_id, on_observation);
                self.after_poll(&mut report, task_id, model, poll);
            }
        }
        report
    }

    fn after_poll(
        &self,
        report: &mut SafeSubmitReport,
        task_id: &UploadTaskId,
        model: &ModelMetadata,
        poll: PollReport,
    ) {
        report.final_status = poll.status;

        if !poll.success {
            let code = match poll.state {
                PollState::Cancelled => DomainErrorCode::PollCancelled,
                _ => DomainErrorCode::AutoPollFailed,
            };
            let message = poll
                .error
                .as_ref()
                .map(|e| format!("automatic polling failed: {}", e.message))
                .unwrap_or_else(|| "automatic polling failed".to_string());
            let raw = poll.error.as_ref().and_then(|e| e.raw.clone());
            let mut error = self.failure(task_id, code, message, raw);
            if let Some(cause) = poll.error.clone() {
                error = error.with_cause(cause);
            }
            report.outcome = SafeSubmitOutcome::Failed { error };
            report.poll = Some(poll);
            return;
        }

        let status = poll.status;
        report.poll = Some(poll);
        match decide_after_poll(status) {
            AfterPoll::Submit => self.submit(report, task_id, model),
            AfterPoll::Skip => {
                report.outcome = SafeSubmitOutcome::Skipped {
                    message: "Model was submitted while polling".to_string(),
                };
            }
            AfterPoll::Halt(status) => {
                info!(%task_id, status = status.code(), "Polling ended on a terminal status");
                report.outcome = SafeSubmitOutcome::Halted {
                    status,
                    message: format!("Processing ended with status {}", status),
                };
            }
            AfterPoll::Unexpected => {
                let shown = status.map_or("unknown".to_string(), |s| s.to_string());
                report.outcome = SafeSubmitOutcome::Failed {
                    error: self.failure(
                        task_id,
                        DomainErrorCode::UnexpectedStatus,
                        format!("package still not ready after polling (status {})", shown),
                        None,
                    ),
                };
            }
        }
    }

    fn submit(&self, report: &mut SafeSubmitReport, task_id: &UploadTaskId, model: &ModelMetadata) {
        report.outcome = match self.api.submit_model(task_id, model, self.options.pos_mode) {
            Ok(response) => {
                report.final_status = Some(StatusCode::Submitted);
                SafeSubmitOutcome::Submitted { response }
            }
            Err(error) => SafeSubmitOutcome::Failed { error },
        };
    }

    fn failure(
        &self,
        task_id: &UploadTaskId,
        code: DomainErrorCode,
        message: String,
        raw: Option<Value>,
    ) -> OperationError {
        let error = OperationError::domain(Endpoint::SafeSubmit, code, message)
            .with_request(RequestEcho::local([
                ("upload_task_id", task_id.to_string()),
                ("auto_poll", self.options.auto_poll.to_string()),
            ]));
        match raw {
            Some(raw) => error.with_raw(raw),
            None => error,
        }
    }
}

fn fail_message(code: DomainErrorCode, status: Option<StatusCode>) -> String {
    match code {
        DomainErrorCode::ParsingNotComplete => format!(
            "package not parsed yet (status {}); enable auto-poll or retry later",
            status.map_or(-1, StatusCode::code)
        ),
        DomainErrorCode::ParsingFailed => "package not parsed successfully".to_string(),
        DomainErrorCode::OfflineAnalysis => "package was analyzed offline and cannot be submitted".to_string(),
        DomainErrorCode::UnknownStatus => "could not determine the upload status".to_string(),
        other => other.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::poller::tests::{fast, StatusScript};
    use serde_json::json;

    fn options(auto_poll: bool) -> SafeSubmitOptions {
        SafeSubmitOptions {
            auto_poll,
            poll: fast(3),
            pos_mode: PosMode::DefaultSentinel,
        }
    }

    fn model() -> ModelMetadata {
        ModelMetadata {
            name: "Lamp".into(),
            ..Default::default()
        }
    }

    #[test]
    fn decision_table() {
        use StatusCode::*;
        assert_eq!(decide(Some(Ready), false), Decision::Submit);
        assert_eq!(decide(Some(SubmitFailed), false), Decision::Submit);
        assert_eq!(decide(Some(Submitted), true), Decision::Skip);
        assert_eq!(decide(Some(Generating), true), Decision::Poll);
        assert_eq!(decide(Some(Analyzing), false), Decision::Fail(DomainErrorCode::ParsingNotComplete));
        assert_eq!(decide(Some(ParseFailed), true), Decision::Fail(DomainErrorCode::ParsingFailed));
        assert_eq!(decide(Some(AnalyzedOffline), true), Decision::Fail(DomainErrorCode::OfflineAnalysis));
        assert_eq!(decide(None, true), Decision::Fail(DomainErrorCode::UnknownStatus));
    }

    #[test]
    fn already_submitted_is_skipped_without_submitting() {
        let api = StatusScript::always(StatusCode::Submitted);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        assert!(report.success());
        assert!(report.submission_skipped());
        assert!(api.submits.borrow().is_empty());
    }

    #[test]
    fn parse_failure_blocks_submission() {
        let api = StatusScript::always(StatusCode::ParseFailed);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        assert!(!report.success());
        assert_eq!(
            report.error_code(),
            Some(&ErrorCode::Domain(DomainErrorCode::ParsingFailed))
        );
        assert!(api.submits.borrow().is_empty());
    }

    #[test]
    fn ready_submits_once_and_passes_response_through() {
        let mut api = StatusScript::always(StatusCode::Ready);
        api.submit_response = Ok(json!({"modelId": "m-1"}));
        let report = SafeSubmitter::new(&api, options(false)).run(&UploadTaskId::new("t"), &model());

        assert!(report.success());
        assert!(!report.submission_skipped());
        match &report.outcome {
            SafeSubmitOutcome::Submitted { response } => assert_eq!(response, &json!({"modelId": "m-1"})),
            other => panic!("unexpected outcome {:?}", other),
        }

        let submits = api.submits.borrow();
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0].0.as_str(), "t");
        assert_eq!(submits[0].1, model());
        assert_eq!(submits[0].2, PosMode::DefaultSentinel);
    }

    #[test]
    fn submit_error_is_returned_verbatim() {
        let mut api = StatusScript::always(StatusCode::SubmitFailed);
        let err = OperationError::new(Endpoint::Submit, ErrorCode::Api("200001".into()), "bad category");
        api.submit_response = Err(err);
        let report = SafeSubmitter::new(&api, options(false)).run(&UploadTaskId::new("t"), &model());

        assert!(!report.success());
        let error = report.error().unwrap();
        assert_eq!(error.endpoint, Endpoint::Submit);
        assert_eq!(error.message, "bad category");
    }

    #[test]
    fn processing_without_auto_poll_fails_fast() {
        let api = StatusScript::always(StatusCode::Generating);
        let report = SafeSubmitter::new(&api, options(false)).run(&UploadTaskId::new("t"), &model());

        assert_eq!(
            report.error_code(),
            Some(&ErrorCode::Domain(DomainErrorCode::ParsingNotComplete))
        );
        assert_eq!(*api.checks.borrow(), 1);
        assert!(api.submits.borrow().is_empty());
    }

    #[test]
    fn auto_poll_submits_once_ready() {
        let api = StatusScript::new(vec![
            Ok(Some(StatusCode::Analyzing)),
            Ok(Some(StatusCode::Analyzing)),
            Ok(Some(StatusCode::Ready)),
            Ok(Some(StatusCode::Ready)),
        ]);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        assert!(report.success());
        assert_eq!(report.initial_status, Some(StatusCode::Analyzing));
        let poll = report.poll.as_ref().unwrap();
        assert_eq!(poll.state, PollState::BudgetExhausted);
        assert_eq!(poll.status, Some(StatusCode::Ready));
        assert_eq!(api.submits.borrow().len(), 1);
    }

    #[test]
    fn auto_poll_halts_on_terminal_failure() {
        let api = StatusScript::new(vec![
            Ok(Some(StatusCode::Generating)),
            Ok(Some(StatusCode::AnalyzedOffline)),
        ]);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        assert!(!report.success());
        assert!(matches!(
            report.outcome,
            SafeSubmitOutcome::Halted { status: StatusCode::AnalyzedOffline, .. }
        ));
        assert_eq!(report.status_history().len(), 1);
        assert!(api.submits.borrow().is_empty());
    }

    #[test]
    fn auto_poll_still_processing_is_unexpected() {
        let api = StatusScript::always(StatusCode::Analyzing);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        assert_eq!(
            report.error_code(),
            Some(&ErrorCode::Domain(DomainErrorCode::UnexpectedStatus))
        );
        assert_eq!(report.status_history().len(), 3);
        assert!(api.submits.borrow().is_empty());
    }

    #[test]
    fn failed_poll_maps_to_auto_poll_failed() {
        let failure = OperationError::new(Endpoint::Status, ErrorCode::Http(502), "HTTP error 502");
        let api = StatusScript::new(vec![Ok(Some(StatusCode::Analyzing)), Err(failure)]);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        assert_eq!(
            report.error_code(),
            Some(&ErrorCode::Domain(DomainErrorCode::AutoPollFailed))
        );
        assert!(api.submits.borrow().is_empty());
    }

    #[test]
    fn initial_check_failure_short_circuits() {
        let failure = OperationError::new(Endpoint::Status, ErrorCode::Api("100001".into()), "bad key");
        let api = StatusScript::new(vec![Err(failure)]);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        assert_eq!(
            report.error_code(),
            Some(&ErrorCode::Domain(DomainErrorCode::StatusCheckFailed))
        );
        assert_eq!(report.initial_status, None);
        assert_eq!(*api.checks.borrow(), 1);
    }

    #[test]
    fn initial_check_failure_keeps_underlying_error() {
        let echo = RequestEcho {
            method: "GET".into(),
            path: "/global/commodity/upload/status".into(),
            params: [("timestamp".to_string(), "123".to_string())].into_iter().collect(),
            body: None,
        };
        let failure = OperationError::new(Endpoint::Status, ErrorCode::Http(503), "HTTP error 503")
            .with_request(echo.clone());
        let api = StatusScript::new(vec![Err(failure)]);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        let cause = report.error().and_then(|e| e.cause.as_deref()).unwrap();
        assert_eq!(cause.code, ErrorCode::Http(503));
        assert_eq!(cause.endpoint, Endpoint::Status);
        assert_eq!(cause.request, echo);

        let serialized = serde_json::to_value(report.error().unwrap()).unwrap();
        assert_eq!(serialized["cause"]["request"]["params"]["timestamp"], "123");
    }

    #[test]
    fn failed_poll_keeps_last_check_error() {
        let failure = OperationError::new(Endpoint::Status, ErrorCode::Http(502), "HTTP error 502");
        let api = StatusScript::new(vec![Ok(Some(StatusCode::Analyzing)), Err(failure)]);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        let cause = report.error().and_then(|e| e.cause.as_deref()).unwrap();
        assert_eq!(cause.code, ErrorCode::Http(502));
        assert_eq!(cause.attempts, 3);
    }

    #[test]
    fn auto_poll_skips_when_submitted_while_polling() {
        let api = StatusScript::new(vec![
            Ok(Some(StatusCode::Analyzing)),
            Ok(Some(StatusCode::Ready)),
            Ok(Some(StatusCode::Submitted)),
        ]);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());

        assert!(report.success());
        assert!(report.submission_skipped());
        assert_eq!(report.final_status, Some(StatusCode::Submitted));
        assert_eq!(report.poll.as_ref().unwrap().state, PollState::TerminalReached);
        assert!(api.submits.borrow().is_empty());
    }

    #[test]
    fn cancelled_poll_maps_to_poll_cancelled() {
        let api = StatusScript::always(StatusCode::Generating);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = SafeSubmitter::new(&api, options(true))
            .with_cancel(cancel)
            .run(&UploadTaskId::new("t"), &model());

        assert!(!report.success());
        assert_eq!(
            report.error_code(),
            Some(&ErrorCode::Domain(DomainErrorCode::PollCancelled))
        );
        assert_eq!(report.poll.as_ref().unwrap().state, PollState::Cancelled);
        assert_eq!(*api.checks.borrow(), 1);
        assert!(api.submits.borrow().is_empty());
    }

    #[test]
    fn unknown_status_fails() {
        let api = StatusScript::new(vec![Ok(None)]);
        let report = SafeSubmitter::new(&api, options(true)).run(&UploadTaskId::new("t"), &model());
        assert_eq!(
            report.error_code(),
            Some(&ErrorCode::Domain(DomainErrorCode::UnknownStatus))
        );
    }
}
