use crate::compression::Encoding;
use crate::error::CallError;
use crate::web::WireMode;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};

/// Default limit on a decoded response message.
pub const DEFAULT_MAX_RECEIVE_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Settings shared by every call of a [`super::CallInvoker`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub mode: WireMode,
    pub max_receive_message_size: usize,
    /// Requests larger than this are rejected before they are sent. Unlimited when `None`.
    pub max_send_message_size: Option<usize>,
    /// Encodings advertised in `grpc-accept-encoding`.
    pub accept_encodings: Vec<Encoding>,
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: WireMode::Binary,
            max_receive_message_size: DEFAULT_MAX_RECEIVE_MESSAGE_SIZE,
            max_send_message_size: None,
            accept_encodings: vec![Encoding::Gzip, Encoding::Deflate],
            user_agent: Some(concat!("gweb/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

impl ClientConfig {
    pub fn with_mode(mut self, mode: WireMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_receive_message_size(mut self, limit: usize) -> Self {
        self.max_receive_message_size = limit;
        self
    }

    pub fn with_max_send_message_size(mut self, limit: usize) -> Self {
        self.max_send_message_size = Some(limit);
        self
    }

    pub fn with_accept_encodings(mut self, encodings: Vec<Encoding>) -> Self {
        self.accept_encodings = encodings;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Per-call settings.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Absolute point in time after which the call fails with `DeadlineExceeded`.
    pub deadline: Option<Instant>,
    /// Request metadata. Binary entries (`-bin` keys) are base64-encoded on the wire.
    pub metadata: MetadataMap,
    /// Cancelling this token cancels the call.
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Appends an ASCII metadata entry.
    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, CallError> {
        let name = MetadataKey::from_str(key).map_err(|source| CallError::InvalidMetadataKey {
            key: key.to_string(),
            source,
        })?;
        let value =
            MetadataValue::from_str(value).map_err(|source| CallError::InvalidMetadataValue {
                key: key.to_string(),
                source,
            })?;
        self.metadata.append(name, value);
        Ok(self)
    }

    /// Builds options from plain `(key, value)` pairs.
    pub fn from_headers(headers: Vec<(String, String)>) -> Result<Self, CallError> {
        headers
            .into_iter()
            .try_fold(Self::new(), |options, (k, v)| options.with_header(&k, &v))
    }
}
