use super::{Action, ActionProgress, CoohomUploader};
use crate::upload::{ObservationOutcome, PosMode, StatusCode, WorkflowStep, POS_RANGE};
use crate::utils::color::{self, ColorExt};
use crate::utils::file_info::SUPPORTED_EXTENSIONS;
use crate::utils::file_size::FileSizeUtils;
use eframe::egui::{self, Align, Color32, RichText};
use rfd::FileDialog;

const DOCS_URL: &str = "https://open.coohom.com";

impl CoohomUploader {
    pub fn render(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let total_height = ui.available_height();
            let footer_height = 40.0;
            let footer_margin = 15.0;
            let content_height = total_height - footer_height - footer_margin;

            egui::ScrollArea::vertical()
                .max_height(content_height)
                .show(ui, |ui| {
                    ui.add_space(20.0);
                    ui.vertical_centered(|ui| {
                        ui.heading("Coohom 3D Model Uploader");
                        ui.add_space(5.0);
                        ui.label(
                            RichText::new("Upload, parse and submit models to the Coohom catalog")
                                .color(ui.visuals().text_color().gamma_multiply(0.7)),
                        );
                    });

                    ui.add_space(20.0);
                    self.render_credentials(ui);
                    ui.add_space(10.0);
                    self.render_file_picker(ui);
                    ui.add_space(10.0);
                    self.render_model_form(ui);
                    ui.add_space(10.0);
                    self.render_options(ui);
                    ui.add_space(20.0);
                    self.render_actions(ui);
                    ui.add_space(20.0);

                    if !matches!(self.state.progress, ActionProgress::NotStarted) {
                        ui.group(|ui| {
                            let progress = egui::ProgressBar::new(self.state.get_progress_percentage())
                                .show_percentage()
                                .animate(self.state.is_busy())
                                .fill(color::ACCENT);
                            ui.add(progress);
                            ui.label(self.state.get_status_text());
                        });
                    }

                    if !self.state.observations.is_empty() {
                        ui.add_space(10.0);
                        self.render_status_monitor(ui);
                    }

                    if self.state.last_response.is_some() {
                        ui.add_space(10.0);
                        self.render_details(ui);
                    }

                    if !self.state.context.history.is_empty() {
                        ui.add_space(10.0);
                        self.render_history(ui);
                    }

                    ui.add_space(20.0);
                });

            ui.with_layout(egui::Layout::bottom_up(Align::Center), |ui| {
                ui.add_space(footer_margin);
                self.render_footer(ui);
            });
        });
    }

    fn render_credentials(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.horizontal(|ui| {
                ui.label("API credentials");
                ui.add_space(4.0);
                ui.label("ℹ").on_hover_text_at_pointer(
                    "App key and secret from the Coohom open platform console.\n\
                    They can also be set with COOHOM_APP_KEY and COOHOM_APP_SECRET.",
                );
            });
            ui.add_space(8.0);
            egui::Grid::new("credentials").num_columns(2).show(ui, |ui| {
                ui.label("App key");
                ui.text_edit_singleline(&mut self.app_key);
                ui.end_row();
                ui.label("App secret");
                ui.add(egui::TextEdit::singleline(&mut self.app_secret).password(true));
                ui.end_row();
            });
            ui.add_space(4.0);
            let ready = !self.app_key.trim().is_empty()
                && !self.app_secret.trim().is_empty()
                && !self.state.is_busy();
            ui.add_enabled_ui(ready, |ui| {
                if ui.button("🔌 Test Connection").clicked() {
                    self.start(Action::TestConnection);
                }
            });
        });
    }

    fn render_file_picker(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.horizontal(|ui| {
                if ui.button("📁 Select File").clicked() {
                    if let Some(path) = FileDialog::new()
                        .add_filter("3D models and textures", &SUPPORTED_EXTENSIONS[..])
                        .pick_file()
                    {
                        self.select_file(path);
                    }
                }
                if let Some(path) = &self.file_path {
                    ui.label(format!("Selected: {}", path.display()));
                }
            });

            if let Some(info) = &self.file_info {
                ui.add_space(4.0);
                ui.label(format!(
                    "{} | estimated upload {}{}",
                    info.formatted_size(),
                    info.estimated_upload_time(),
                    if info.is_zip() { " | ZIP archive" } else { "" }
                ));
                if let Err(reason) = info.validate() {
                    ui.colored_label(color::FAILURE, reason);
                } else if let Some(warning) = info.size_warning() {
                    ui.colored_label(color::WARNING, warning);
                }
            }
        });
    }

    fn render_model_form(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label("Model metadata");
            ui.add_space(8.0);
            egui::Grid::new("model").num_columns(2).show(ui, |ui| {
                ui.label("Name");
                ui.text_edit_singleline(&mut self.model.name);
                ui.end_row();
                ui.label("Product category");
                ui.add(egui::DragValue::new(&mut self.model.prod_category));
                ui.end_row();
                ui.label("Brand categories");
                ui.text_edit_singleline(&mut self.brand_categories_text)
                    .on_hover_text("Comma separated category ids");
                ui.end_row();
                ui.label("Brand good code");
                ui.text_edit_singleline(&mut self.model.brand_good_code);
                ui.end_row();
                ui.checkbox(&mut self.use_pos, "Position");
                ui.add_enabled(
                    self.use_pos,
                    egui::DragValue::new(&mut self.pos_value).clamp_range(POS_RANGE),
                );
                ui.end_row();
            });
        });
    }

    fn render_options(&mut self, ui: &mut egui::Ui) {
        ui.collapsing("Submission options", |ui| {
            ui.checkbox(&mut self.auto_poll, "Poll while the file is still processing");
            ui.horizontal(|ui| {
                ui.label("Attempts");
                ui.add(egui::DragValue::new(&mut self.poll_attempts).clamp_range(1..=50));
                ui.label("Interval (minutes)");
                ui.add(egui::DragValue::new(&mut self.poll_interval_minutes).clamp_range(0..=30));
            });
            ui.horizontal(|ui| {
                ui.label("Without a position:");
                ui.radio_value(&mut self.pos_mode, PosMode::DefaultSentinel, "send 99");
                ui.radio_value(&mut self.pos_mode, PosMode::Omit, "omit");
            });
        });
    }

    fn render_actions(&mut self, ui: &mut egui::Ui) {
        let busy = self.state.is_busy();
        let has_file = self
            .file_info
            .as_ref()
            .is_some_and(|info| info.validate().is_ok());
        let has_credentials = !self.app_key.trim().is_empty() && !self.app_secret.trim().is_empty();
        let step = self.state.context.step();

        ui.vertical_centered(|ui| {
            ui.add_enabled_ui(has_file && has_credentials && !busy, |ui| {
                let button =
                    egui::Button::new("🚀 Upload & Submit").min_size(egui::vec2(200.0, 40.0));
                if ui.add(button).clicked() {
                    self.start(Action::Automatic);
                }
            });
            if busy && ui.button("⏹ Cancel").clicked() {
                self.cancel();
            }
        });

        ui.add_space(10.0);
        ui.collapsing("Manual steps", |ui| {
            ui.label(format!("Current step: {}", step.label()));
            let context = &self.state.context;
            if let Some(task_id) = context.upload_task_id() {
                ui.monospace(format!("Task {}", task_id));
            }
            if let Some(receipt) = context.receipt() {
                ui.label(format!(
                    "Uploaded {} to {}/{}",
                    FileSizeUtils::format_size(receipt.bytes as u64),
                    receipt.bucket,
                    receipt.file_path
                ));
            }
            if let Some(parse) = context.parse_result() {
                ui.label(format!("Parse accepted: {}", parse));
            }
            if let Some(submission) = context.submission() {
                ui.colored_label(color::SUCCESS, format!("Submitted: {}", submission));
            }
            ui.horizontal_wrapped(|ui| {
                let ready = has_credentials && !busy;
                let steps = [
                    (Action::RequestCredentials, "1. Credentials", has_file),
                    (Action::Upload, "2. Upload", step >= WorkflowStep::CredentialsIssued),
                    (Action::Parse, "3. Parse", step >= WorkflowStep::Uploaded),
                    (Action::CheckStatus, "Check status", step >= WorkflowStep::CredentialsIssued),
                    (Action::SafeSubmit, "4. Safe submit", step >= WorkflowStep::ParseRequested),
                    (Action::Submit, "Direct submit", step >= WorkflowStep::ParseRequested),
                ];
                for (action, label, enabled) in steps {
                    if ui.add_enabled(ready && enabled, egui::Button::new(label)).clicked() {
                        self.start(action);
                    }
                }
            });
            ui.horizontal(|ui| {
                ui.label("Task id");
                ui.text_edit_singleline(&mut self.task_id_text);
                if ui.add_enabled(!busy, egui::Button::new("Resume")).clicked() {
                    self.resume_task();
                }
            });
            if ui.add_enabled(!busy, egui::Button::new("🗑 Clear")).clicked() {
                self.reset_upload_state();
            }
        });
    }

    fn render_status_monitor(&self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label("Status monitor");
            for observation in &self.state.observations {
                let time = observation.timestamp.format("%H:%M:%S");
                match &observation.outcome {
                    ObservationOutcome::Status(status) => {
                        ui.colored_label(
                            Color32::for_status(*status),
                            format!(
                                "#{} {} {}",
                                observation.attempt,
                                time,
                                status.map_or("Unknown status", StatusCode::description)
                            ),
                        );
                    }
                    ObservationOutcome::Error(detail) => {
                        ui.colored_label(
                            color::FAILURE,
                            format!("#{} {} {}", observation.attempt, time, detail),
                        );
                    }
                }
            }
        });
    }

    fn render_details(&mut self, ui: &mut egui::Ui) {
        if ui
            .button(if self.state.show_details {
                "Hide Response"
            } else {
                "Show Response"
            })
            .clicked()
        {
            self.state.show_details = !self.state.show_details;
        }

        if self.state.show_details {
            if let Some(response) = &self.state.last_response {
                let mut text = serde_json::to_string_pretty(response).unwrap_or_default();
                egui::ScrollArea::vertical()
                    .id_source("response")
                    .max_height(200.0)
                    .show(ui, |ui| {
                        egui::Frame::none()
                            .fill(ui.style().visuals.extreme_bg_color)
                            .show(ui, |ui| {
                                ui.add(
                                    egui::TextEdit::multiline(&mut text)
                                        .font(egui::TextStyle::Monospace)
                                        .desired_width(ui.available_width())
                                        .interactive(false),
                                );
                            });
                    });
            }
        }
    }

    fn render_history(&self, ui: &mut egui::Ui) {
        ui.collapsing("Upload history", |ui| {
            egui::Grid::new("history").striped(true).num_columns(4).show(ui, |ui| {
                for record in self.state.context.history.iter() {
                    ui.label(record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string());
                    ui.label(&record.file_name);
                    ui.monospace(record.upload_task_id.as_str());
                    ui.label(&record.status);
                    ui.end_row();
                }
            });
        });
    }

    fn render_footer(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Coohom open platform");
            if ui
                .add(
                    egui::Label::new(RichText::new("documentation").color(color::ACCENT))
                        .sense(egui::Sense::click()),
                )
                .clicked()
            {
                let _ = open::that(DOCS_URL);
            }
        });

        if let Some(error) = &self.state.error_message {
            ui.add_space(5.0);
            ui.vertical_centered(|ui| {
                ui.colored_label(color::FAILURE, error);
            });
        }
    }
}
