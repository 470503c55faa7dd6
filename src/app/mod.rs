mod state;
mod ui;

use crate::config::Config;
use crate::upload::{
    emit, run_automatic, CancelFlag, CommodityApi, CoohomClient, Credentials, DomainErrorCode,
    Endpoint, ModelMetadata, OperationError, OperationResult, OssObjectStore, PollSettings,
    PosMode, SafeSubmitOptions, UploadTaskId, WorkflowEvent, WorkflowStep, DEFAULT_POS,
};
use crate::utils::file_info::FileInfo;
use eframe::{egui, App};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{error, info};

pub use state::{Action, ActionProgress, UploadState, WorkerResult};

pub struct CoohomUploader {
    config: Config,
    app_key: String,
    app_secret: String,
    file_path: Option<PathBuf>,
    file_info: Option<FileInfo>,
    model: ModelMetadata,
    brand_categories_text: String,
    use_pos: bool,
    pos_value: u16,
    pos_mode: PosMode,
    auto_poll: bool,
    poll_attempts: u32,
    poll_interval_minutes: u64,
    task_id_text: String,
    state: UploadState,
}

impl CoohomUploader {
    pub fn new(_cc: &eframe::CreationContext<'_>, config: Config) -> Self {
        info!(base_url = %config.base_url, "Initializing Coohom model uploader");
        Self::with_config(config)
    }

    fn with_config(config: Config) -> Self {
        let model = ModelMetadata::default();
        Self {
            app_key: config.credentials.key.clone(),
            app_secret: config.credentials.secret.clone(),
            file_path: None,
            file_info: None,
            brand_categories_text: model.brand_categories.join(", "),
            model,
            use_pos: false,
            pos_value: DEFAULT_POS,
            pos_mode: PosMode::DefaultSentinel,
            auto_poll: config.auto_poll,
            poll_attempts: config.poll.max_attempts,
            poll_interval_minutes: config.poll.interval.as_secs() / 60,
            task_id_text: String::new(),
            state: UploadState::default(),
            config,
        }
    }

    pub fn reset_upload_state(&mut self) {
        info!("Resetting application state");
        self.file_path = None;
        self.file_info = None;
        self.task_id_text.clear();
        self.state.clear();
    }

    pub fn select_file(&mut self, path: PathBuf) {
        let name = file_name(&path);
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        info!(file = %name, size, "Selected file");
        self.file_info = Some(FileInfo::new(&name, size));
        self.state.context.restart(name);
        self.file_path = Some(path);
    }

    fn runtime_config(&self) -> Config {
        let mut config = self.config.clone();
        config.credentials = Credentials::new(self.app_key.trim(), self.app_secret.trim());
        config.poll = PollSettings::from_minutes(self.poll_attempts, self.poll_interval_minutes);
        config.auto_poll = self.auto_poll;
        config
    }

    fn current_model(&self) -> ModelMetadata {
        ModelMetadata {
            brand_categories: self
                .brand_categories_text
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            pos: self.use_pos.then_some(self.pos_value),
            ..self.model.clone()
        }
    }

    fn submit_options(&self, config: &Config) -> SafeSubmitOptions {
        SafeSubmitOptions {
            auto_poll: config.auto_poll,
            poll: config.poll,
            pos_mode: self.pos_mode,
        }
    }

    /// Applies a manually entered task id so later steps can run on it.
    pub fn resume_task(&mut self) {
        let id = self.task_id_text.trim();
        if id.is_empty() {
            self.state.error_message = Some("Enter an upload task id first".to_string());
            return;
        }
        info!(task_id = %id, "Resuming upload task");
        self.state
            .context
            .resume(UploadTaskId::new(id), WorkflowStep::ParseRequested);
        self.state.error_message = None;
    }

    pub fn start(&mut self, action: Action) {
        if self.state.is_busy() {
            return;
        }

        let config = self.runtime_config();
        let model = self.current_model();
        if matches!(action, Action::Automatic | Action::Submit | Action::SafeSubmit) {
            if let Err(reason) = model.validate() {
                self.state.error_message = Some(reason);
                return;
            }
        }

        let options = self.submit_options(&config);
        let file_path = self.file_path.clone();
        let cancel = CancelFlag::new();
        let mut context = std::mem::take(&mut self.state.context);
        let (event_sender, event_receiver) = mpsc::channel();
        let (result_sender, result_receiver) = mpsc::channel();

        self.state.begin(action, config.poll.max_attempts);
        self.state.cancel = Some(cancel.clone());
        self.state.event_receiver = Some(event_receiver);
        self.state.result_receiver = Some(result_receiver);

        info!(action = action.label(), "Starting background action");
        std::thread::spawn(move || {
            let outcome = (|| -> OperationResult<Value> {
                let client = CoohomClient::from_config(&config)?;
                match action {
                    Action::TestConnection => {
                        let grant = client.test_connection()?;
                        Ok(json!({
                            "message": "Connection successful",
                            "uploadTaskId": grant.upload_task_id,
                        }))
                    }
                    Action::Automatic => {
                        let store = object_store(&config)?;
                        let bytes = read_file(file_path.as_deref())?;
                        let outcome = run_automatic(
                            &client,
                            &store,
                            &mut context,
                            &bytes,
                            &model,
                            options,
                            Some(cancel),
                            Some(&event_sender),
                        );
                        if let Some(err) = outcome.error.clone() {
                            return Err(err);
                        }
                        Ok(json!({
                            "success": outcome.success(),
                            "message": outcome
                                .submission
                                .as_ref()
                                .map(|report| report.message())
                                .unwrap_or_default(),
                            "workflow": outcome,
                        }))
                    }
                    Action::RequestCredentials => {
                        let grant = context.request_credentials(&client)?;
                        Ok(json!(grant))
                    }
                    Action::Upload => {
                        let store = object_store(&config)?;
                        let bytes = read_file(file_path.as_deref())?;
                        let receipt = context.upload(&store, &bytes)?;
                        Ok(json!(receipt))
                    }
                    Action::Parse => context.request_parse(&client).cloned(),
                    Action::CheckStatus => {
                        let task_id = context.upload_task_id().cloned().ok_or_else(|| {
                            OperationError::domain(
                                Endpoint::Status,
                                DomainErrorCode::InvalidInput,
                                "no upload task id; request credentials or resume a task first",
                            )
                        })?;
                        let snapshot = client.check_status(&task_id)?;
                        Ok(json!({
                            "message": snapshot
                                .status
                                .map_or("Unknown status", |s| s.description()),
                            "status": snapshot.raw_status,
                            "payload": snapshot.payload,
                        }))
                    }
                    Action::Submit => context.submit(&client, &model, options.pos_mode).cloned(),
                    Action::SafeSubmit => {
                        let report =
                            context.safe_submit(&client, &model, options, Some(cancel), |o| {
                                emit(Some(&event_sender), WorkflowEvent::Observation(o.clone()));
                            })?;
                        Ok(json!({
                            "success": report.success(),
                            "message": report.message(),
                            "report": report,
                        }))
                    }
                }
            })();

            if let Err(err) = &outcome {
                error!(action = action.label(), error = %err, "Background action failed");
            }
            let _ = result_sender.send(WorkerResult {
                action,
                context,
                outcome,
            });
        });
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = &self.state.cancel {
            info!("Cancellation requested");
            cancel.cancel();
        }
    }

    pub fn update_state(&mut self, ctx: &egui::Context) {
        let mut had_updates = false;

        if let Some(receiver) = &self.state.event_receiver {
            let events: Vec<_> = receiver.try_iter().collect();
            had_updates |= !events.is_empty();
            for event in events {
                self.state.apply_event(event);
            }
        }

        if let Some(receiver) = &self.state.result_receiver {
            if let Ok(result) = receiver.try_recv() {
                had_updates = true;
                if let Some(task_id) = result.context.upload_task_id() {
                    self.task_id_text = task_id.to_string();
                }
                self.state.finish(result);
            }
        }

        if had_updates || self.state.is_busy() {
            ctx.request_repaint_after(std::time::Duration::from_millis(200));
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_file(path: Option<&Path>) -> OperationResult<Vec<u8>> {
    let path = path.ok_or_else(|| {
        OperationError::domain(
            Endpoint::Workflow,
            DomainErrorCode::InvalidInput,
            "no file selected",
        )
    })?;
    std::fs::read(path).map_err(|e| {
        OperationError::domain(
            Endpoint::Workflow,
            DomainErrorCode::InvalidInput,
            format!("cannot read {}: {}", path.display(), e),
        )
    })
}

fn object_store(config: &Config) -> OperationResult<OssObjectStore> {
    OssObjectStore::new(config.timeout)
        .map_err(|e| OperationError::transport(Endpoint::ObjectUpload, &e))
}

impl App for CoohomUploader {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.update_state(ctx);
        self.render(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn runtime_config_uses_form_values() {
        let mut app = CoohomUploader::with_config(Config::default());
        app.app_key = " key ".into();
        app.app_secret = "secret".into();
        app.poll_attempts = 2;
        app.poll_interval_minutes = 1;
        app.auto_poll = false;

        let config = app.runtime_config();
        assert_eq!(config.credentials.key, "key");
        assert!(config.credentials.is_complete());
        assert_eq!(config.poll.interval, Duration::from_secs(60));
        assert!(!config.auto_poll);
    }

    #[test]
    fn model_reads_brand_categories_and_optional_pos() {
        let mut app = CoohomUploader::with_config(Config::default());
        app.brand_categories_text = "A1, ,B2".into();
        assert_eq!(app.current_model().brand_categories, vec!["A1", "B2"]);
        assert_eq!(app.current_model().pos, None);

        app.use_pos = true;
        app.pos_value = 12;
        assert_eq!(app.current_model().pos, Some(12));
    }

    #[test]
    fn resume_requires_task_id() {
        let mut app = CoohomUploader::with_config(Config::default());
        app.resume_task();
        assert!(app.state.error_message.is_some());

        app.task_id_text = "task-9".into();
        app.resume_task();
        assert_eq!(
            app.state.context.upload_task_id().map(UploadTaskId::as_str),
            Some("task-9")
        );
    }

    #[test]
    fn missing_file_is_invalid_input() {
        let err = read_file(None).unwrap_err();
        assert_eq!(err.domain_code(), Some(DomainErrorCode::InvalidInput));
    }
}
