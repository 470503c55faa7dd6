//! Object storage upload with the temporary credentials from a
//! [`StorageGrant`]. The production store talks to Alibaba OSS using its V1
//! header signature with an STS security token.

use super::error::{Endpoint, ErrorCode, OperationError, OperationResult, RequestEcho, TransportError};
use super::types::{StorageGrant, UploadReceipt};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::Duration;
use tracing::{info, warn};

pub const CONTENT_TYPE: &str = "application/octet-stream";
pub const SECURITY_TOKEN_HEADER: &str = "x-oss-security-token";

#[derive(Debug, Clone, PartialEq)]
pub struct PutResponse {
    pub status: u16,
    pub body: String,
}

pub trait ObjectStore {
    fn put_object(&self, grant: &StorageGrant, bytes: &[u8]) -> Result<PutResponse, TransportError>;
}

/// Uploads the archive and succeeds only on HTTP 200.
pub fn upload_object<S: ObjectStore + ?Sized>(
    store: &S,
    bytes: &[u8],
    grant: &StorageGrant,
) -> OperationResult<UploadReceipt> {
    let echo = RequestEcho::local([
        ("bucket", grant.bucket.clone()),
        ("region", grant.region.clone()),
        ("file_path", grant.file_path.clone()),
        ("bytes", bytes.len().to_string()),
        ("upload_task_id", grant.upload_task_id.to_string()),
    ]);
    info!(
        task_id = %grant.upload_task_id,
        bucket = %grant.bucket,
        path = %grant.file_path,
        bytes = bytes.len(),
        "Uploading archive to object storage"
    );

    let response = store.put_object(grant, bytes).map_err(|e| {
        warn!(error = %e, "Object storage upload failed");
        OperationError::transport(Endpoint::ObjectUpload, &e).with_request(echo.clone())
    })?;

    if response.status != 200 {
        warn!(status = response.status, "Object storage rejected upload");
        return Err(OperationError::new(
            Endpoint::ObjectUpload,
            ErrorCode::Upload(response.status),
            format!("upload failed with status: {}", response.status),
        )
        .with_request(echo)
        .with_raw(serde_json::Value::String(response.body)));
    }

    Ok(UploadReceipt {
        upload_task_id: grant.upload_task_id.clone(),
        bucket: grant.bucket.clone(),
        file_path: grant.file_path.clone(),
        bytes: bytes.len(),
    })
}

pub struct OssObjectStore {
    client: reqwest::blocking::Client,
    timeout: Duration,
    /// Replaces `https://{bucket}.oss-{region}.aliyuncs.com`.
    endpoint_override: Option<String>,
}

impl OssObjectStore {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            client: reqwest::blocking::Client::builder().build()?,
            timeout,
            endpoint_override: None,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    fn object_key(grant: &StorageGrant) -> &str {
        grant.file_path.trim_start_matches('/')
    }

    fn object_url(&self, grant: &StorageGrant) -> String {
        let key = Self::object_key(grant);
        match &self.endpoint_override {
            Some(endpoint) => format!("{}/{}", endpoint, key),
            None => format!(
                "https://{}.oss-{}.aliyuncs.com/{}",
                grant.bucket, grant.region, key
            ),
        }
    }
}

/// OSS V1 `Authorization` header value for a PUT.
pub fn authorization(
    grant: &StorageGrant,
    content_type: &str,
    date: &str,
) -> Result<String, TransportError> {
    let string_to_sign = format!(
        "PUT\n\n{}\n{}\n{}:{}\n/{}/{}",
        content_type,
        date,
        SECURITY_TOKEN_HEADER,
        grant.security_token,
        grant.bucket,
        OssObjectStore::object_key(grant)
    );
    let mut mac = Hmac::<Sha1>::new_from_slice(grant.access_key_secret.as_bytes())
        .map_err(|e| TransportError::Unexpected(format!("cannot sign upload: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());
    Ok(format!("OSS {}:{}", grant.access_key_id, signature))
}

impl ObjectStore for OssObjectStore {
    fn put_object(&self, grant: &StorageGrant, bytes: &[u8]) -> Result<PutResponse, TransportError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let auth = authorization(grant, CONTENT_TYPE, &date)?;
        let response = self
            .client
            .put(self.object_url(grant))
            .timeout(self.timeout)
            .header("Date", &date)
            .header("Content-Type", CONTENT_TYPE)
            .header(SECURITY_TOKEN_HEADER, &grant.security_token)
            .header("Authorization", auth)
            .body(bytes.to_vec())
            .send()?;

        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Ok(PutResponse { status, body })
    }
}
