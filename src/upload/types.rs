use chrono::{DateTime, Utc};
use derivative::Derivative;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Sentinel `pos` used by the safe submit path when the caller left it unset.
pub const DEFAULT_POS: u16 = 99;
pub const POS_RANGE: std::ops::RangeInclusive<u16> = 1..=999;

#[derive(Clone, Default, Derivative)]
#[derivative(Debug)]
pub struct Credentials {
    pub key: String,
    #[derivative(Debug = "ignore")]
    pub secret: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.key.trim().is_empty() && !self.secret.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadTaskId(String);

impl UploadTaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The platform sometimes sends ids as JSON numbers.
fn task_id_from_string_or_number<'de, D>(deserializer: D) -> Result<UploadTaskId, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(UploadTaskId(s)),
        Value::Number(n) => Ok(UploadTaskId(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "invalid uploadTaskId: {}",
            other
        ))),
    }
}

/// Short-lived object storage credentials for exactly one PUT.
#[derive(Clone, Serialize, Deserialize, Derivative)]
#[derivative(Debug)]
#[serde(rename_all = "camelCase")]
pub struct StorageGrant {
    pub access_key_id: String,
    #[derivative(Debug = "ignore")]
    #[serde(skip_serializing)]
    pub access_key_secret: String,
    #[derivative(Debug = "ignore")]
    #[serde(skip_serializing)]
    pub security_token: String,
    pub bucket: String,
    pub region: String,
    pub file_path: String,
    #[serde(deserialize_with = "task_id_from_string_or_number")]
    pub upload_task_id: UploadTaskId,
}

/// Server-side processing state of one upload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum StatusCode {
    Generating,
    Analyzing,
    ParseFailed,
    Ready,
    Submitted,
    SubmitFailed,
    AnalyzedOffline,
}

impl StatusCode {
    pub const TERMINAL: [StatusCode; 4] = [
        StatusCode::ParseFailed,
        StatusCode::Submitted,
        StatusCode::SubmitFailed,
        StatusCode::AnalyzedOffline,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(StatusCode::Generating),
            1 => Some(StatusCode::Analyzing),
            2 => Some(StatusCode::ParseFailed),
            3 => Some(StatusCode::Ready),
            4 => Some(StatusCode::Submitted),
            5 => Some(StatusCode::SubmitFailed),
            6 => Some(StatusCode::AnalyzedOffline),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            StatusCode::Generating => 0,
            StatusCode::Analyzing => 1,
            StatusCode::ParseFailed => 2,
            StatusCode::Ready => 3,
            StatusCode::Submitted => 4,
            StatusCode::SubmitFailed => 5,
            StatusCode::AnalyzedOffline => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn description(self) -> &'static str {
        match self {
            StatusCode::Generating => "Generating - Upload is being processed",
            StatusCode::Analyzing => "Analyzing - ZIP file is being analyzed",
            StatusCode::ParseFailed => "Failed - Failed to analyze the ZIP file",
            StatusCode::Ready => "Ready - ZIP file analyzed and ready to submit",
            StatusCode::Submitted => "Submitted - Model has been submitted successfully",
            StatusCode::SubmitFailed => "Failed - Failed to submit the model",
            StatusCode::AnalyzedOffline => "Offline - ZIP file analyzed offline",
        }
    }
}

impl From<StatusCode> for i64 {
    fn from(status: StatusCode) -> Self {
        status.code()
    }
}

impl TryFrom<i64> for StatusCode {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        StatusCode::from_code(code).ok_or_else(|| format!("unknown status code {}", code))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// One CheckStatus response. `status` is `None` when the payload carried no
/// usable status value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: Option<StatusCode>,
    /// The value found at the status position, before conversion.
    pub raw_status: Option<Value>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationOutcome {
    /// `None` means the status was indeterminate.
    Status(Option<StatusCode>),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusObservation {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub outcome: ObservationOutcome,
}

impl StatusObservation {
    pub fn status(attempt: u32, status: Option<StatusCode>) -> Self {
        Self {
            attempt,
            timestamp: Utc::now(),
            outcome: ObservationOutcome::Status(status),
        }
    }

    pub fn error(attempt: u32, detail: impl Into<String>) -> Self {
        Self {
            attempt,
            timestamp: Utc::now(),
            outcome: ObservationOutcome::Error(detail.into()),
        }
    }
}

/// How an unset `pos` is sent on submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PosMode {
    /// Leave the field out of the payload.
    #[default]
    Omit,
    /// Send [`DEFAULT_POS`].
    DefaultSentinel,
}

/// Metadata submitted for a parsed model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub pos: Option<u16>,
    pub prod_category: i64,
    pub brand_categories: Vec<String>,
    pub brand_good_code: String,
}

impl Default for ModelMetadata {
    fn default() -> Self {
        Self {
            name: "3D Model".to_string(),
            pos: None,
            prod_category: 288,
            brand_categories: vec!["3FO4JXABJ2W6".to_string()],
            brand_good_code: "code".to_string(),
        }
    }
}

impl ModelMetadata {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("model name must not be empty".to_string());
        }
        if let Some(pos) = self.pos {
            if !POS_RANGE.contains(&pos) {
                return Err(format!("pos {} is outside 1..=999", pos));
            }
        }
        if self.prod_category < 1 {
            return Err(format!("invalid product category {}", self.prod_category));
        }
        Ok(())
    }

    pub fn effective_pos(&self, mode: PosMode) -> Option<u16> {
        match (self.pos, mode) {
            (Some(pos), _) => Some(pos),
            (None, PosMode::DefaultSentinel) => Some(DEFAULT_POS),
            (None, PosMode::Omit) => None,
        }
    }

    /// Builds the single-element batch body the submit endpoint expects.
    pub fn submit_body(&self, task_id: &UploadTaskId, mode: PosMode) -> Value {
        let item = SubmitItem {
            upload_task_id: task_id.as_str(),
            name: &self.name,
            pos: self.effective_pos(mode),
            prod_cat: self.prod_category,
            location: 1,
            brand_cats: &self.brand_categories,
            brand_good_code: &self.brand_good_code,
        };
        serde_json::json!([item])
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitItem<'a> {
    upload_task_id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pos: Option<u16>,
    prod_cat: i64,
    location: u8,
    brand_cats: &'a [String],
    brand_good_code: &'a str,
}

/// Result of a successful object storage PUT.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReceipt {
    pub upload_task_id: UploadTaskId,
    pub bucket: String,
    pub file_path: String,
    pub bytes: usize,
}
