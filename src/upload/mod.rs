mod client;
mod error;
mod object_store;
mod poller;
mod safe_submit;
mod signer;
mod status;
mod transport;
mod types;
mod workflow;

pub use client::{
    CommodityApi, CoohomClient, RetryPolicy, BUSY_CODE, CONNECTION_TEST_FILE,
    CONNECTION_TEST_TIMEOUT, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, SUCCESS_CODE,
};
pub use error::{
    DomainErrorCode, Endpoint, ErrorCode, OperationError, OperationResult, RequestEcho,
    TransportError, TransportErrorKind,
};
pub use object_store::{upload_object, ObjectStore, OssObjectStore, PutResponse};
pub use poller::{
    CancelFlag, PollReport, PollSettings, PollState, StatusPoller, DEFAULT_INTERVAL_MINUTES,
    DEFAULT_MAX_ATTEMPTS,
};
pub use safe_submit::{
    decide, decide_after_poll, AfterPoll, Decision, SafeSubmitOptions, SafeSubmitOutcome,
    SafeSubmitReport, SafeSubmitter,
};
pub use signer::{canonical_string, sign, TimestampUnit, SIGN_PARAM};
pub use status::extract_status;
pub use transport::{ApiRequest, HttpTransport, Method, RawResponse, Transport};
pub use types::{
    Credentials, ModelMetadata, ObservationOutcome, PosMode, StatusCode, StatusObservation,
    StatusSnapshot, StorageGrant, UploadReceipt, UploadTaskId, DEFAULT_POS, POS_RANGE,
};
pub use workflow::{
    emit, run_automatic, UploadHistory, UploadRecord, WorkflowContext, WorkflowEvent,
    WorkflowOutcome, WorkflowStep, MAX_HISTORY_ITEMS,
};
