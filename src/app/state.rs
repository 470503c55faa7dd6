use crate::upload::{
    CancelFlag, ObservationOutcome, OperationError, StatusCode, StatusObservation,
    WorkflowContext, WorkflowEvent, WorkflowStep,
};
use derivative::Derivative;
use serde_json::Value;
use std::sync::mpsc::Receiver;

/// Work that runs on a background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TestConnection,
    Automatic,
    RequestCredentials,
    Upload,
    Parse,
    CheckStatus,
    Submit,
    SafeSubmit,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::TestConnection => "Connection test",
            Action::Automatic => "Automatic upload",
            Action::RequestCredentials => "Upload credentials",
            Action::Upload => "Object storage upload",
            Action::Parse => "Parse request",
            Action::CheckStatus => "Status check",
            Action::Submit => "Direct submit",
            Action::SafeSubmit => "Safe submit",
        }
    }
}

/// What the worker hands back when it is done.
pub struct WorkerResult {
    pub action: Action,
    pub context: WorkflowContext,
    pub outcome: Result<Value, OperationError>,
}

#[derive(Clone, Derivative)]
#[derivative(Default)]
pub enum ActionProgress {
    #[derivative(Default)]
    NotStarted,
    Running {
        action: Action,
        step: Option<WorkflowStep>,
        completed_steps: usize,
    },
    Polling {
        attempt: u32,
        max_attempts: u32,
        status: Option<StatusCode>,
    },
    Completed {
        action: Action,
        success: bool,
        message: String,
    },
}

const AUTOMATIC_STEPS: usize = 4;

#[derive(Default)]
pub struct UploadState {
    pub progress: ActionProgress,
    pub context: WorkflowContext,
    pub observations: Vec<StatusObservation>,
    pub last_response: Option<Value>,
    pub error_message: Option<String>,
    pub show_details: bool,
    pub poll_budget: u32,
    pub cancel: Option<CancelFlag>,
    pub event_receiver: Option<Receiver<WorkflowEvent>>,
    pub result_receiver: Option<Receiver<WorkerResult>>,
}

impl UploadState {
    pub fn is_busy(&self) -> bool {
        self.result_receiver.is_some()
    }

    /// Clears everything except the upload history.
    pub fn clear(&mut self) {
        let history = std::mem::take(&mut self.context.history);
        *self = UploadState::default();
        self.context.history = history;
    }

    pub fn begin(&mut self, action: Action, poll_budget: u32) {
        self.progress = ActionProgress::Running {
            action,
            step: None,
            completed_steps: 0,
        };
        self.poll_budget = poll_budget;
        self.error_message = None;
        self.last_response = None;
        if matches!(action, Action::Automatic | Action::SafeSubmit) {
            self.observations.clear();
        }
    }

    pub fn apply_event(&mut self, event: WorkflowEvent) {
        match event {
            WorkflowEvent::StepStarted(step) => {
                if let ActionProgress::Running { step: current, .. } = &mut self.progress {
                    *current = Some(step);
                }
            }
            WorkflowEvent::StepCompleted(_) => {
                if let ActionProgress::Running {
                    completed_steps, ..
                } = &mut self.progress
                {
                    *completed_steps += 1;
                }
            }
            WorkflowEvent::Observation(observation) => {
                let status = match &observation.outcome {
                    ObservationOutcome::Status(status) => *status,
                    ObservationOutcome::Error(_) => None,
                };
                self.progress = ActionProgress::Polling {
                    attempt: observation.attempt,
                    max_attempts: self.poll_budget,
                    status,
                };
                self.observations.push(observation);
            }
            WorkflowEvent::Finished(_) => {}
        }
    }

    pub fn finish(&mut self, result: WorkerResult) {
        self.context = result.context;
        self.cancel = None;
        self.event_receiver = None;
        self.result_receiver = None;

        let (success, message) = match result.outcome {
            Ok(response) => {
                let success = response
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let message = response
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{} completed", result.action.label()));
                if !success {
                    self.error_message = Some(message.clone());
                }
                self.last_response = Some(response);
                (success, message)
            }
            Err(err) => {
                let message = err.to_string();
                self.last_response = serde_json::to_value(&err).ok();
                self.error_message = Some(message.clone());
                (false, message)
            }
        };

        self.progress = ActionProgress::Completed {
            action: result.action,
            success,
            message,
        };
    }

    pub fn get_progress_percentage(&self) -> f32 {
        match &self.progress {
            ActionProgress::NotStarted => 0.0,
            ActionProgress::Running {
                action: Action::Automatic,
                completed_steps,
                ..
            } => (*completed_steps as f32) / (AUTOMATIC_STEPS as f32),
            ActionProgress::Running { .. } => 0.0,
            ActionProgress::Polling {
                attempt,
                max_attempts,
                ..
            } => {
                if *max_attempts == 0 {
                    0.0
                } else {
                    (*attempt as f32) / (*max_attempts as f32)
                }
            }
            ActionProgress::Completed { .. } => 1.0,
        }
    }

    pub fn get_status_text(&self) -> String {
        match &self.progress {
            ActionProgress::NotStarted => String::new(),
            ActionProgress::Running {
                action,
                step: Some(step),
                ..
            } => format!("{}: {}...", action.label(), step.label()),
            ActionProgress::Running { action, .. } => format!("{}...", action.label()),
            ActionProgress::Polling {
                attempt,
                max_attempts,
                status,
            } => format!(
                "Polling status: attempt {}/{} | {}",
                attempt,
                max_attempts,
                status.map_or("Unknown status", StatusCode::description)
            ),
            ActionProgress::Completed {
                action,
                success,
                message,
            } => {
                let mark = if *success { "✅" } else { "❌" };
                format!("{} {}: {}", mark, action.label(), message)
            }
        }
    }
}
