//! Storage and transport seams for gamecat: the session-aware HTTP client and the CSV record store.

pub mod http;
pub mod store;

pub use http::{
    BackoffPolicy, Credentials, HttpClientConfig, HttpResponse, Method, NetworkError,
    RecordedCall, ReqwestTransport, RetryDisposition, ScriptedTransport, SessionClient, Transport,
    TransportError, DEFAULT_USER_AGENT, STORE_ORIGIN,
};
pub use store::{RecordStore, StoreLock};

pub const CRATE_NAME: &str = "gamecat-storage";
