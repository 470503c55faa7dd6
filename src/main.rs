use coohom_uploader::app::CoohomUploader;
use coohom_uploader::config::Config;
use eframe::CreationContext;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), eframe::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("coohom_uploader=info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration, using defaults");
            Config::default()
        }
    };
    info!(
        base_url = %config.base_url,
        credentials = config.credentials.is_complete(),
        "Configuration loaded"
    );

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([720.0, 820.0])
            .with_min_inner_size([480.0, 560.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Coohom 3D Model Uploader",
        options,
        Box::new(move |cc: &CreationContext| Box::new(CoohomUploader::new(cc, config))),
    )
}
