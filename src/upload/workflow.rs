//! Workflow state owned by the caller, for both the step-by-step and the
//! automatic variants of the upload.

use super::client::CommodityApi;
use super::error::{DomainErrorCode, Endpoint, OperationError, OperationResult, RequestEcho};
use super::object_store::{upload_object, ObjectStore};
use super::poller::CancelFlag;
use super::safe_submit::{SafeSubmitOptions, SafeSubmitOutcome, SafeSubmitReport, SafeSubmitter};
use super::types::{
    ModelMetadata, PosMode, StatusObservation, StorageGrant, UploadReceipt, UploadTaskId,
};
use crate::utils::file_info::FileInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::mpsc::Sender;
use tracing::{info, warn};

pub const MAX_HISTORY_ITEMS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    NotStarted,
    CredentialsIssued,
    Uploaded,
    ParseRequested,
    Submitted,
}

impl WorkflowStep {
    pub fn label(self) -> &'static str {
        match self {
            WorkflowStep::NotStarted => "Not started",
            WorkflowStep::CredentialsIssued => "Step 1: Upload credentials",
            WorkflowStep::Uploaded => "Step 2: Object storage upload",
            WorkflowStep::ParseRequested => "Step 3: Parse file",
            WorkflowStep::Submitted => "Step 4: Submit model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub file_name: String,
    pub upload_task_id: UploadTaskId,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Most recent uploads first, capped at [`MAX_HISTORY_ITEMS`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadHistory {
    records: VecDeque<UploadRecord>,
}

impl UploadHistory {
    pub fn record(&mut self, file_name: &str, task_id: &UploadTaskId, status: &str) {
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| &r.upload_task_id == task_id)
        {
            existing.status = status.to_string();
            existing.timestamp = Utc::now();
            return;
        }

        self.records.push_front(UploadRecord {
            file_name: file_name.to_string(),
            upload_task_id: task_id.clone(),
            status: status.to_string(),
            timestamp: Utc::now(),
        });
        self.records.truncate(MAX_HISTORY_ITEMS);
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Progress messages sent to the UI thread.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StepStarted(WorkflowStep),
    StepCompleted(WorkflowStep),
    Observation(StatusObservation),
    Finished(Box<WorkflowOutcome>),
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowOutcome {
    pub file_name: String,
    pub upload_task_id: Option<UploadTaskId>,
    pub reached: WorkflowStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<SafeSubmitReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl WorkflowOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.submission.as_ref().is_some_and(SafeSubmitReport::success)
    }
}

/// Explicit replacement for UI session state: one upload's progress.
#[derive(Debug, Default)]
pub struct WorkflowContext {
    file_name: String,
    step: Option<WorkflowStep>,
    task_id: Option<UploadTaskId>,
    grant: Option<StorageGrant>,
    receipt: Option<UploadReceipt>,
    parse_result: Option<Value>,
    submission: Option<Value>,
    safe_submission: Option<SafeSubmitReport>,
    pub history: UploadHistory,
}

impl WorkflowContext {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Default::default()
        }
    }

    /// Starts over for another file, keeping the upload history.
    pub fn restart(&mut self, file_name: impl Into<String>) {
        let history = std::mem::take(&mut self.history);
        *self = Self::new(file_name);
        self.history = history;
    }

    /// Resumes a task created elsewhere, e.g. a manually entered id.
    pub fn resume(&mut self, task_id: UploadTaskId, step: WorkflowStep) {
        self.task_id = Some(task_id);
        self.step = Some(step);
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn step(&self) -> WorkflowStep {
        self.step.unwrap_or(WorkflowStep::NotStarted)
    }

    pub fn upload_task_id(&self) -> Option<&UploadTaskId> {
        self.task_id.as_ref()
    }

    pub fn receipt(&self) -> Option<&UploadReceipt> {
        self.receipt.as_ref()
    }

    pub fn parse_result(&self) -> Option<&Value> {
        self.parse_result.as_ref()
    }

    pub fn submission(&self) -> Option<&Value> {
        self.submission.as_ref()
    }

    pub fn safe_submission(&self) -> Option<&SafeSubmitReport> {
        self.safe_submission.as_ref()
    }

    fn require(&self, needed: WorkflowStep, action: &str) -> OperationResult<UploadTaskId> {
        match &self.task_id {
            Some(task_id) if self.step() >= needed => Ok(task_id.clone()),
            _ => Err(OperationError::domain(
                Endpoint::Workflow,
                DomainErrorCode::InvalidInput,
                format!("cannot {} before '{}' has completed", action, needed.label()),
            )
            .with_request(RequestEcho::local([
                ("file_name", self.file_name.clone()),
                ("current_step", self.step().label().to_string()),
            ]))),
        }
    }

    fn advance(&mut self, step: WorkflowStep, status: &str) {
        self.step = Some(step);
        if let Some(task_id) = &self.task_id {
            self.history.record(&self.file_name, task_id, status);
        }
    }

    pub fn request_credentials<A: CommodityApi + ?Sized>(
        &mut self,
        api: &A,
    ) -> OperationResult<&StorageGrant> {
        let grant = api.request_upload_credentials(&self.file_name)?;
        self.task_id = Some(grant.upload_task_id.clone());
        self.receipt = None;
        self.parse_result = None;
        self.submission = None;
        self.safe_submission = None;
        self.advance(WorkflowStep::CredentialsIssued, "initiated");
        Ok(&*self.grant.insert(grant))
    }

    /// Consumes the storage grant; a failed upload needs fresh credentials.
    pub fn upload<S: ObjectStore + ?Sized>(
        &mut self,
        store: &S,
        bytes: &[u8],
    ) -> OperationResult<&UploadReceipt> {
        let grant = self.grant.take().ok_or_else(|| {
            OperationError::domain(
                Endpoint::ObjectUpload,
                DomainErrorCode::InvalidInput,
                "no unused storage grant; request upload credentials first",
            )
        })?;
        match upload_object(store, bytes, &grant) {
            Ok(receipt) => {
                self.advance(WorkflowStep::Uploaded, "uploaded");
                Ok(&*self.receipt.insert(receipt))
            }
            Err(err) => {
                self.advance(WorkflowStep::CredentialsIssued, "upload failed");
                Err(err)
            }
        }
    }

    pub fn request_parse<A: CommodityApi + ?Sized>(&mut self, api: &A) -> OperationResult<&Value> {
        let task_id = self.require(WorkflowStep::Uploaded, "request parsing")?;
        let payload = api.request_parse(&task_id)?;
        self.advance(WorkflowStep::ParseRequested, "parsing");
        Ok(&*self.parse_result.insert(payload))
    }

    /// Direct submission without a status check.
    pub fn submit<A: CommodityApi + ?Sized>(
        &mut self,
        api: &A,
        model: &ModelMetadata,
        pos_mode: PosMode,
    ) -> OperationResult<&Value> {
        let task_id = self.require(WorkflowStep::ParseRequested, "submit")?;
        let payload = api.submit_model(&task_id, model, pos_mode)?;
        self.advance(WorkflowStep::Submitted, "submitted");
        Ok(&*self.submission.insert(payload))
    }

    pub fn safe_submit<A, F>(
        &mut self,
        api: &A,
        model: &ModelMetadata,
        options: SafeSubmitOptions,
        cancel: Option<CancelFlag>,
        on_observation: F,
    ) -> OperationResult<&SafeSubmitReport>
    where
        A: CommodityApi + ?Sized,
        F: FnMut(&StatusObservation),
    {
        let task_id = self.require(WorkflowStep::ParseRequested, "submit")?;
        let mut submitter = SafeSubmitter::new(api, options);
        if let Some(cancel) = cancel {
            submitter = submitter.with_cancel(cancel);
        }
        let report = submitter.run_with(&task_id, model, on_observation);

        if report.success() {
            let status = if report.submission_skipped() {
                "already submitted"
            } else {
                "submitted"
            };
            self.advance(WorkflowStep::Submitted, status);
        } else {
            let status = match &report.outcome {
                SafeSubmitOutcome::Halted { status, .. } => format!("halted: {}", status),
                _ => report
                    .error_code()
                    .map_or_else(|| "submit failed".to_string(), ToString::to_string),
            };
            self.history.record(&self.file_name, &task_id, &status);
        }
        Ok(&*self.safe_submission.insert(report))
    }
}

/// Sends a progress event if anyone is listening.
pub fn emit(events: Option<&Sender<WorkflowEvent>>, event: WorkflowEvent) {
    if let Some(events) = events {
        // receiver gone means the UI closed; the run still finishes
        let _ = events.send(event);
    }
}

/// Runs all five steps in order: credentials, upload, parse, then safe
/// submit (which checks and polls status before submitting).
#[allow(clippy::too_many_arguments)]
pub fn run_automatic<A, S>(
    api: &A,
    store: &S,
    context: &mut WorkflowContext,
    bytes: &[u8],
    model: &ModelMetadata,
    options: SafeSubmitOptions,
    cancel: Option<CancelFlag>,
    events: Option<&Sender<WorkflowEvent>>,
) -> WorkflowOutcome
where
    A: CommodityApi + ?Sized,
    S: ObjectStore + ?Sized,
{
    let file_name = context.file_name().to_string();
    info!(file_name = %file_name, bytes = bytes.len(), "Starting automatic upload workflow");

    let outcome = |context: &WorkflowContext, error: Option<OperationError>| WorkflowOutcome {
        file_name: context.file_name().to_string(),
        upload_task_id: context.upload_task_id().cloned(),
        reached: context.step(),
        submission: context.safe_submission().cloned(),
        error,
    };

    let result = (|| -> OperationResult<()> {
        FileInfo::new(&file_name, bytes.len() as u64)
            .validate()
            .map_err(|reason| {
                OperationError::domain(Endpoint::Workflow, DomainErrorCode::InvalidInput, reason)
            })?;
        model.validate().map_err(|reason| {
            OperationError::domain(Endpoint::Workflow, DomainErrorCode::InvalidInput, reason)
        })?;

        emit(events, WorkflowEvent::StepStarted(WorkflowStep::CredentialsIssued));
        context.request_credentials(api)?;
        emit(events, WorkflowEvent::StepCompleted(WorkflowStep::CredentialsIssued));

        emit(events, WorkflowEvent::StepStarted(WorkflowStep::Uploaded));
        context.upload(store, bytes)?;
        emit(events, WorkflowEvent::StepCompleted(WorkflowStep::Uploaded));

        emit(events, WorkflowEvent::StepStarted(WorkflowStep::ParseRequested));
        context.request_parse(api)?;
        emit(events, WorkflowEvent::StepCompleted(WorkflowStep::ParseRequested));

        emit(events, WorkflowEvent::StepStarted(WorkflowStep::Submitted));
        let report = context.safe_submit(api, model, options, cancel, |observation| {
            emit(events, WorkflowEvent::Observation(observation.clone()));
        })?;
        if report.success() {
            emit(events, WorkflowEvent::StepCompleted(WorkflowStep::Submitted));
        }
        Ok(())
    })();

    let outcome = match result {
        Ok(()) => outcome(context, None),
        Err(err) => {
            warn!(file_name = %file_name, error = %err, "Automatic workflow stopped");
            outcome(context, Some(err))
        }
    };
    info!(
        file_name = %file_name,
        task_id = ?outcome.upload_task_id.as_ref().map(UploadTaskId::as_str),
        success = outcome.success(),
        "Automatic workflow finished"
    );
    emit(events, WorkflowEvent::Finished(Box::new(outcome.clone())));
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(n: usize) -> UploadTaskId {
        UploadTaskId::new(format!("task-{}", n))
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let mut history = UploadHistory::default();
        for n in 0..25 {
            history.record("chair.zip", &task(n), "initiated");
        }
        assert_eq!(history.len(), MAX_HISTORY_ITEMS);
        assert_eq!(history.iter().next().unwrap().upload_task_id, task(24));
    }

    #[test]
    fn history_updates_existing_task_in_place() {
        let mut history = UploadHistory::default();
        history.record("chair.zip", &task(1), "initiated");
        history.record("chair.zip", &task(1), "submitted");
        assert_eq!(history.len(), 1);
        assert_eq!(history.iter().next().unwrap().status, "submitted");
    }

    #[test]
    fn steps_cannot_run_out_of_order() {
        let context = WorkflowContext::new("chair.zip");
        let err = context.require(WorkflowStep::Uploaded, "request parsing").unwrap_err();
        assert_eq!(err.domain_code(), Some(DomainErrorCode::InvalidInput));
        assert!(err.message.contains("Step 2"));
    }

    #[test]
    fn resumed_context_allows_later_steps() {
        let mut context = WorkflowContext::default();
        context.resume(task(7), WorkflowStep::ParseRequested);
        assert_eq!(context.require(WorkflowStep::ParseRequested, "submit").unwrap(), task(7));
    }

    #[test]
    fn emit_tolerates_closed_receiver() {
        let (sender, receiver) = std::sync::mpsc::channel();
        emit(Some(&sender), WorkflowEvent::StepStarted(WorkflowStep::Uploaded));
        assert!(matches!(
            receiver.try_recv(),
            Ok(WorkflowEvent::StepStarted(WorkflowStep::Uploaded))
        ));

        drop(receiver);
        emit(Some(&sender), WorkflowEvent::StepCompleted(WorkflowStep::Uploaded));
        emit(None, WorkflowEvent::StepCompleted(WorkflowStep::Uploaded));
    }

    #[test]
    fn restart_keeps_history() {
        let mut context = WorkflowContext::new("a.zip");
        context.history.record("a.zip", &task(1), "submitted");
        context.resume(task(1), WorkflowStep::Submitted);
        context.restart("b.zip");

        assert_eq!(context.file_name(), "b.zip");
        assert_eq!(context.step(), WorkflowStep::NotStarted);
        assert!(context.upload_task_id().is_none());
        assert_eq!(context.history.len(), 1);
    }
}
