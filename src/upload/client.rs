use super::error::{
    DomainErrorCode, Endpoint, ErrorCode, OperationError, OperationResult, RequestEcho,
    TransportError,
};
use super::signer::{self, TimestampUnit, SIGN_PARAM};
use super::status::extract_status;
use super::transport::{ApiRequest, HttpTransport, Method, RawResponse, Transport};
use super::types::{Credentials, ModelMetadata, PosMode, StatusSnapshot, StorageGrant, UploadTaskId};
use crate::config::Config;
use serde_json::{json, Value};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.coohom.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECTION_TEST_FILE: &str = "test.obj";

/// Envelope code for success.
pub const SUCCESS_CODE: &str = "0";
/// Envelope code the platform uses when it is overloaded.
pub const BUSY_CODE: &str = "100004";

const MAX_ECHOED_BODY: usize = 500;

/// Local retry schedule: attempt `n` failing retryably waits `n * backoff_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_step: Duration::ZERO,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// The four platform operations the poller and orchestrator depend on.
pub trait CommodityApi {
    fn request_upload_credentials(&self, file_name: &str) -> OperationResult<StorageGrant>;
    fn request_parse(&self, task_id: &UploadTaskId) -> OperationResult<Value>;
    fn check_status(&self, task_id: &UploadTaskId) -> OperationResult<StatusSnapshot>;
    fn submit_model(
        &self,
        task_id: &UploadTaskId,
        model: &ModelMetadata,
        pos_mode: PosMode,
    ) -> OperationResult<Value>;
}

enum Attempt {
    Success(Value),
    Retryable(OperationError),
    Failed(OperationError),
}

impl Attempt {
    /// Collapses retryable failures for endpoints that never retry.
    fn into_result(self) -> OperationResult<Value> {
        match self {
            Attempt::Success(payload) => Ok(payload),
            Attempt::Retryable(err) | Attempt::Failed(err) => Err(err),
        }
    }
}

pub struct CoohomClient<T: Transport = HttpTransport> {
    credentials: Credentials,
    transport: T,
    timeout: Duration,
    timestamp_unit: TimestampUnit,
    retry: RetryPolicy,
}

impl CoohomClient<HttpTransport> {
    pub fn new(credentials: Credentials, base_url: &str) -> OperationResult<Self> {
        let transport = HttpTransport::new(base_url)
            .map_err(|e| OperationError::transport(Endpoint::Workflow, &e))?;
        Self::checked(credentials, transport)
    }

    pub fn from_config(config: &Config) -> OperationResult<Self> {
        Ok(Self::new(config.credentials.clone(), &config.base_url)?
            .with_timeout(config.timeout)
            .with_timestamp_unit(config.timestamp_unit)
            .with_retry_policy(config.retry))
    }
}

impl<T: Transport> CoohomClient<T> {
    pub fn with_transport(credentials: Credentials, transport: T) -> OperationResult<Self> {
        Self::checked(credentials, transport)
    }

    fn checked(credentials: Credentials, transport: T) -> OperationResult<Self> {
        if !credentials.is_complete() {
            return Err(OperationError::domain(
                Endpoint::Workflow,
                DomainErrorCode::InvalidInput,
                "app key and app secret are required",
            ));
        }
        Ok(Self {
            credentials,
            transport,
            timeout: DEFAULT_TIMEOUT,
            timestamp_unit: TimestampUnit::default(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timestamp_unit(mut self, unit: TimestampUnit) -> Self {
        self.timestamp_unit = unit;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Requests credentials for a dummy file once, with a short timeout.
    pub fn test_connection(&self) -> OperationResult<StorageGrant> {
        info!("Testing platform connection");
        self.request_credentials_with(CONNECTION_TEST_FILE, CONNECTION_TEST_TIMEOUT, RetryPolicy::none())
    }

    fn signed_request(
        &self,
        endpoint: Endpoint,
        method: Method,
        extra: &[(&'static str, String)],
        body: Option<Value>,
        timeout: Duration,
    ) -> (ApiRequest, RequestEcho) {
        let path = endpoint.path().unwrap_or_default().to_string();

        let mut params: Vec<(String, String)> = vec![
            ("appkey".to_string(), self.credentials.key.clone()),
            ("timestamp".to_string(), self.timestamp_unit.now()),
        ];
        params.extend(extra.iter().map(|(k, v)| (k.to_string(), v.clone())));

        let signature = signer::sign(
            &self.credentials.secret,
            params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );

        let echo = RequestEcho {
            method: method.as_str().to_string(),
            path: path.clone(),
            params: params.iter().cloned().collect(),
            body: body.clone(),
        };

        let mut query = params;
        query.push((SIGN_PARAM.to_string(), signature));

        let request = ApiRequest {
            method,
            path,
            query,
            body,
            timeout,
        };
        (request, echo)
    }

    fn execute(&self, endpoint: Endpoint, request: &ApiRequest, echo: &RequestEcho) -> Attempt {
        match self.transport.call(request) {
            Ok(raw) => interpret(endpoint, raw, echo),
            Err(err) => {
                warn!(%endpoint, error = %err, "Transport failure");
                let retryable = matches!(err, TransportError::Timeout(_));
                let err = OperationError::transport(endpoint, &err).with_request(echo.clone());
                if retryable {
                    Attempt::Retryable(err)
                } else {
                    Attempt::Failed(err)
                }
            }
        }
    }

    fn call(
        &self,
        endpoint: Endpoint,
        method: Method,
        extra: &[(&'static str, String)],
        body: Option<Value>,
    ) -> OperationResult<Value> {
        let (request, echo) = self.signed_request(endpoint, method, extra, body, self.timeout);
        self.execute(endpoint, &request, &echo).into_result()
    }

    fn request_credentials_with(
        &self,
        file_name: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> OperationResult<StorageGrant> {
        let endpoint = Endpoint::UploadCredentials;
        let encoded = urlencoding::encode(file_name).into_owned();
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(file_name, attempt, max_attempts, "Requesting upload credentials");

            let extra = [("file_name", encoded.clone())];
            let (request, echo) = self.signed_request(endpoint, Method::Get, &extra, None, timeout);

            match self.execute(endpoint, &request, &echo) {
                Attempt::Success(payload) => {
                    let grant: StorageGrant =
                        serde_json::from_value(payload.clone()).map_err(|e| {
                            OperationError::new(
                                endpoint,
                                ErrorCode::ParseError,
                                format!("credentials payload is incomplete: {}", e),
                            )
                            .with_request(echo.clone())
                            .with_raw(payload)
                            .with_attempts(attempt)
                        })?;
                    info!(
                        task_id = %grant.upload_task_id,
                        bucket = %grant.bucket,
                        region = %grant.region,
                        attempt,
                        "Upload credentials issued"
                    );
                    return Ok(grant);
                }
                Attempt::Retryable(err) if attempt < max_attempts => {
                    let wait = retry.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        code = %err.code,
                        wait_secs = wait.as_secs(),
                        "Platform busy, retrying upload credentials request"
                    );
                    thread::sleep(wait);
                }
                Attempt::Retryable(err) => {
                    let message = format!(
                        "platform still busy after {} attempts: {}",
                        attempt, err.message
                    );
                    return Err(OperationError {
                        message,
                        attempts: attempt,
                        ..err
                    });
                }
                Attempt::Failed(err) => return Err(err.with_attempts(attempt)),
            }
        }
    }
}

impl<T: Transport> CommodityApi for CoohomClient<T> {
    fn request_upload_credentials(&self, file_name: &str) -> OperationResult<StorageGrant> {
        self.request_credentials_with(file_name, self.timeout, self.retry)
    }

    fn request_parse(&self, task_id: &UploadTaskId) -> OperationResult<Value> {
        info!(%task_id, "Requesting parse");
        let payload = self.call(
            Endpoint::Parse,
            Method::Post,
            &[("upload_task_id", task_id.to_string())],
            None,
        )?;
        info!(%task_id, "Parse requested");
        Ok(payload)
    }

    fn check_status(&self, task_id: &UploadTaskId) -> OperationResult<StatusSnapshot> {
        let payload = self.call(
            Endpoint::Status,
            Method::Get,
            &[("upload_task_id", task_id.to_string())],
            None,
        )?;
        let snapshot = extract_status(&payload);
        match snapshot.status {
            Some(status) => debug!(%task_id, status = status.code(), "Status checked"),
            None => warn!(%task_id, raw = ?snapshot.raw_status, "Status is indeterminate"),
        }
        Ok(snapshot)
    }

    fn submit_model(
        &self,
        task_id: &UploadTaskId,
        model: &ModelMetadata,
        pos_mode: PosMode,
    ) -> OperationResult<Value> {
        model.validate().map_err(|reason| {
            OperationError::domain(Endpoint::Submit, DomainErrorCode::InvalidInput, reason)
        })?;

        let body = model.submit_body(task_id, pos_mode);
        info!(%task_id, name = %model.name, "Submitting model");
        let payload = self.call(Endpoint::Submit, Method::Post, &[], Some(body))?;
        info!(%task_id, "Model submitted");
        Ok(payload)
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// `d` is always handed out as an object.
fn normalize_payload(payload: Value) -> Value {
    match payload {
        Value::Object(_) => payload,
        Value::Null => json!({}),
        Value::Array(_) => json!({ "data": payload }),
        other => json!({ "value": other }),
    }
}

fn envelope_code(envelope: &Value) -> Option<String> {
    match envelope.get("c")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn interpret(endpoint: Endpoint, raw: RawResponse, echo: &RequestEcho) -> Attempt {
    if raw.status != 200 {
        warn!(%endpoint, status = raw.status, "HTTP error from platform");
        return Attempt::Failed(
            OperationError::new(
                endpoint,
                ErrorCode::Http(raw.status),
                format!("HTTP error {}", raw.status),
            )
            .with_request(echo.clone())
            .with_raw(Value::String(truncate(&raw.body, MAX_ECHOED_BODY))),
        );
    }

    let envelope: Value = match serde_json::from_str(&raw.body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(%endpoint, error = %e, "Undecodable platform response");
            return Attempt::Failed(
                OperationError::new(
                    endpoint,
                    ErrorCode::ParseError,
                    format!("invalid JSON response: {}", e),
                )
                .with_request(echo.clone())
                .with_raw(Value::String(truncate(&raw.body, MAX_ECHOED_BODY))),
            );
        }
    };

    let message = envelope
        .get("m")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
        .to_string();

    match envelope_code(&envelope).as_deref() {
        Some(SUCCESS_CODE) => {
            let payload = envelope.get("d").cloned().unwrap_or(Value::Null);
            Attempt::Success(normalize_payload(payload))
        }
        Some(code) => {
            let err = OperationError::new(endpoint, ErrorCode::Api(code.to_string()), message)
                .with_request(echo.clone())
                .with_raw(envelope.clone());
            if code == BUSY_CODE {
                Attempt::Retryable(err)
            } else {
                warn!(%endpoint, code, message = %err.message, "Platform rejected request");
                Attempt::Failed(err)
            }
        }
        None => Attempt::Failed(
            OperationError::new(
                endpoint,
                ErrorCode::ParseError,
                "response envelope has no 'c' code",
            )
            .with_request(echo.clone())
            .with_raw(envelope),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::error::TransportErrorKind;
    use crate::upload::types::StatusCode;
    use mockito::Matcher;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn client(server: &mockito::Server) -> CoohomClient {
        CoohomClient::new(Credentials::new("demo-key", "demo-secret"), &server.url())
            .unwrap()
            .with_timeout(Duration::from_secs(5))
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                backoff_step: Duration::ZERO,
            })
    }

    const GRANT: &str = r#"{"c":"0","m":"ok","d":{
        "accessKeyId":"STS.key","accessKeySecret":"sk","securityToken":"tok",
        "bucket":"models","region":"cn-hangzhou","filePath":"upload/chair.zip",
        "uploadTaskId":"task-42"}}"#;

    #[test]
    fn rejects_incomplete_credentials() {
        let err = CoohomClient::new(Credentials::new("key", " "), DEFAULT_BASE_URL)
            .err()
            .unwrap();
        assert_eq!(err.domain_code(), Some(DomainErrorCode::InvalidInput));
    }

    #[test]
    fn credentials_request_is_signed_and_parsed() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/global/commodity/upload/sts")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("appkey".into(), "demo-key".into()),
                Matcher::UrlEncoded("file_name".into(), "my%20chair.zip".into()),
                Matcher::Regex("timestamp=[0-9]{13}".into()),
                Matcher::Regex("sign=[0-9a-f]{32}".into()),
            ]))
            .with_status(200)
            .with_body(GRANT)
            .create();

        let grant = client(&server).request_upload_credentials("my chair.zip").unwrap();
        assert_eq!(grant.upload_task_id.as_str(), "task-42");
        assert_eq!(grant.bucket, "models");
        mock.assert();
    }

    /// Replays canned transport results in order and records each request.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn call(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called more often than scripted")
        }
    }

    fn ok(body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    fn scripted(script: Vec<Result<RawResponse, TransportError>>) -> CoohomClient<ScriptedTransport> {
        CoohomClient::with_transport(Credentials::new("k", "s"), ScriptedTransport::new(script))
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                backoff_step: Duration::ZERO,
            })
    }

    #[test]
    fn busy_code_and_timeouts_are_retried_until_success() {
        let api = scripted(vec![
            ok(r#"{"c":"100004","m":"timeout","d":null}"#),
            Err(TransportError::Timeout("30s".into())),
            ok(GRANT),
        ]);

        let grant = api.request_upload_credentials("a.zip").unwrap();
        assert_eq!(grant.upload_task_id.as_str(), "task-42");

        let seen = api.transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|r| r.query.iter().any(|(k, _)| k == "sign")));
    }

    #[test]
    fn parse_does_not_retry_busy_code() {
        let api = scripted(vec![ok(r#"{"c":"100004","m":"timeout","d":null}"#)]);
        let err = api.request_parse(&UploadTaskId::new("t1")).unwrap_err();
        assert_eq!(err.code, ErrorCode::Api(BUSY_CODE.into()));
        assert_eq!(api.transport.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn connection_test_makes_a_single_short_attempt() {
        let api = scripted(vec![Err(TransportError::Timeout("10s".into()))]);
        let err = api.test_connection().unwrap_err();
        assert_eq!(err.code, ErrorCode::Transport(TransportErrorKind::Timeout));

        let seen = api.transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].timeout, CONNECTION_TEST_TIMEOUT);
    }

    #[test]
    fn envelope_without_payload_still_yields_an_object() {
        let api = scripted(vec![ok(r#"{"c":0,"m":"ok"}"#)]);
        let payload = api.request_parse(&UploadTaskId::new("t1")).unwrap();
        assert_eq!(payload, json!({}));
    }

    #[test]
    fn busy_code_exhausts_retry_budget() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/global/commodity/upload/sts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"c":"100004","m":"server timeout","d":null}"#)
            .expect(3)
            .create();

        let err = client(&server).request_upload_credentials("a.zip").unwrap_err();
        mock.assert();
        assert_eq!(err.code, ErrorCode::Api(BUSY_CODE.into()));
        assert_eq!(err.attempts, 3);
        assert!(err.message.contains("3 attempts"));
        assert_eq!(err.request.params.get("file_name").map(String::as_str), Some("a.zip"));
        assert!(err.request.params.get("sign").is_none());
        assert!(err.raw.is_some());
    }

    #[test]
    fn other_api_codes_fail_without_retry() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/global/commodity/upload/sts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"c":"100002","m":"invalid sign","d":null}"#)
            .expect(1)
            .create();

        let err = client(&server).request_upload_credentials("a.zip").unwrap_err();
        mock.assert();
        assert_eq!(err.code, ErrorCode::Api("100002".into()));
        assert_eq!(err.message, "invalid sign");
        assert_eq!(err.endpoint, Endpoint::UploadCredentials);
        assert_eq!(err.attempts, 1);
    }

    #[test]
    fn http_and_json_failures_are_classified() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/global/commodity/upload/create")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create();
        server
            .mock("GET", "/global/commodity/upload/status")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>not json</html>")
            .create();

        let api = client(&server);
        let task = UploadTaskId::new("t1");

        let err = api.request_parse(&task).unwrap_err();
        assert_eq!(err.code, ErrorCode::Http(503));
        assert_eq!(err.raw, Some(Value::String("unavailable".into())));
        assert_eq!(err.request.params["upload_task_id"], "t1");

        let err = api.check_status(&task).unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
    }

    #[test]
    fn connection_failures_become_transport_errors() {
        let api = CoohomClient::new(Credentials::new("k", "s"), "http://127.0.0.1:1")
            .unwrap()
            .with_retry_policy(RetryPolicy::none());
        let err = api.request_parse(&UploadTaskId::new("t1")).unwrap_err();
        assert!(matches!(err.code, ErrorCode::Transport(_)));
        assert_ne!(err.code, ErrorCode::Transport(TransportErrorKind::Timeout));
    }

    #[test]
    fn parse_posts_task_id_in_query() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/global/commodity/upload/create")
            .match_query(Matcher::UrlEncoded("upload_task_id".into(), "task-42".into()))
            .with_status(200)
            .with_body(r#"{"c":"0","m":"","d":true}"#)
            .create();

        let payload = client(&server).request_parse(&UploadTaskId::new("task-42")).unwrap();
        assert_eq!(payload, json!({"value": true}));
        mock.assert();
    }

    #[test]
    fn status_reads_nested_payloads() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/global/commodity/upload/status")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"c":"0","m":"","d":[{"status":"3"}]}"#)
            .create();

        let snap = client(&server).check_status(&UploadTaskId::new("t")).unwrap();
        assert_eq!(snap.status, Some(StatusCode::Ready));
    }

    #[test]
    fn submit_sends_single_element_batch() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/global/commodity/upload/submit")
            .match_query(Matcher::Regex("sign=".into()))
            .match_body(Matcher::Json(json!([{
                "uploadTaskId": "task-42",
                "name": "Chair",
                "prodCat": 288,
                "location": 1,
                "brandCats": ["B1", "B2"],
                "brandGoodCode": "SKU-1"
            }])))
            .with_status(200)
            .with_body(r#"{"c":"0","m":"","d":{"ok":true}}"#)
            .create();

        let model = ModelMetadata {
            name: "Chair".into(),
            pos: None,
            prod_category: 288,
            brand_categories: vec!["B1".into(), "B2".into()],
            brand_good_code: "SKU-1".into(),
        };
        let payload = client(&server)
            .submit_model(&UploadTaskId::new("task-42"), &model, PosMode::Omit)
            .unwrap();
        assert_eq!(payload, json!({"ok": true}));
        mock.assert();
    }

    #[test]
    fn submit_rejects_invalid_metadata_locally() {
        let server = mockito::Server::new();
        let model = ModelMetadata {
            pos: Some(0),
            ..Default::default()
        };
        let err = client(&server)
            .submit_model(&UploadTaskId::new("t"), &model, PosMode::Omit)
            .unwrap_err();
        assert_eq!(err.domain_code(), Some(DomainErrorCode::InvalidInput));
    }

    #[test]
    fn payload_normalization() {
        assert_eq!(normalize_payload(Value::Null), json!({}));
        assert_eq!(normalize_payload(json!(5)), json!({"value": 5}));
        assert_eq!(normalize_payload(json!([1])), json!({"data": [1]}));
        assert_eq!(normalize_payload(json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn retry_delays_grow_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
    }
}
