use crate::upload::StatusCode;
use egui::Color32;

pub const ACCENT: Color32 = Color32::from_rgb(0, 122, 204);
pub const SUCCESS: Color32 = Color32::from_rgb(0, 180, 0);
pub const FAILURE: Color32 = Color32::from_rgb(220, 50, 50);
pub const WARNING: Color32 = Color32::from_rgb(230, 160, 30);
pub const MUTED: Color32 = Color32::from_rgb(150, 150, 150);

pub trait ColorExt {
    fn from_hex(hex: &str) -> Option<Self>
    where
        Self: Sized;

    fn for_status(status: Option<StatusCode>) -> Self
    where
        Self: Sized;
}

impl ColorExt for Color32 {
    fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }

        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some(Color32::from_rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    fn for_status(status: Option<StatusCode>) -> Self {
        match status {
            Some(StatusCode::Generating | StatusCode::Analyzing) => ACCENT,
            Some(StatusCode::Ready | StatusCode::Submitted) => SUCCESS,
            Some(StatusCode::AnalyzedOffline) => WARNING,
            Some(StatusCode::ParseFailed | StatusCode::SubmitFailed) => FAILURE,
            None => MUTED,
        }
    }
}
