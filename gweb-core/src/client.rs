//! # Dynamic gRPC-Web Client
//!
//! [`GrpcWebClient`] issues calls with `serde_json::Value` payloads. Request and response
//! messages are (de)serialized with [`JsonCodec`] against `prost-reflect` descriptors, so no
//! generated Rust types are needed.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Builds the request path (`/package.Service/Method`) at runtime.
//! * **Metadata Handling**: Converts plain string tuples into request metadata.
//! * **Access Patterns**: One method per RPC shape, plus [`GrpcWebClient::dynamic`] which picks
//!   the shape from the method descriptor.
use crate::BoxError;
use crate::call::{Call, CallInvoker, CallOptions, ClientConfig};
use crate::codec::JsonCodec;
use crate::error::CallError;
use futures_util::{Stream, StreamExt};
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorPool, MethodDescriptor};
use std::str::FromStr;
use std::time::Duration;
use tonic::client::GrpcService;
use tonic::transport::Channel;

/// A request object encapsulating all necessary information to perform a dynamic gRPC call.
#[derive(Debug, Clone)]
pub struct DynamicRequest {
    /// The JSON body of the request.
    /// - For Unary/ServerStreaming: An Object `{}`.
    /// - For ClientStreaming/Bidirectional: An Array of Objects `[{}]`.
    pub body: serde_json::Value,
    /// Custom gRPC metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
    /// The fully qualified name of the service (e.g., `my.package.Service`).
    pub service: String,
    /// The name of the method to call (e.g., `SayHello`).
    pub method: String,
    pub timeout: Option<Duration>,
}

/// The result of a dynamic gRPC call.
#[derive(Debug, Clone)]
pub enum DynamicResponse {
    /// A single response message (for Unary and Client Streaming calls).
    Unary(Result<serde_json::Value, tonic::Status>),
    /// A stream of response messages (for Server Streaming and Bidirectional calls).
    Streaming(Result<Vec<Result<serde_json::Value, tonic::Status>>, tonic::Status>),
}

/// Errors that prevent a dynamic call from being issued.
#[derive(Debug, thiserror::Error)]
pub enum DynamicCallError {
    #[error("Invalid input: '{0}'")]
    InvalidInput(String),
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
    #[error("Method '{0}' not found")]
    MethodNotFound(String),
    #[error("Call error: '{0}'")]
    Call(#[from] CallError),
}

/// Splits an outcome into the RPC status (inner) and usage errors (outer).
fn split_status<T>(result: Result<T, CallError>) -> Result<Result<T, tonic::Status>, CallError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(CallError::Status(status)) => Ok(Err(status)),
        Err(err) => Err(err),
    }
}

/// A gRPC-Web client exchanging JSON payloads.
#[derive(Debug, Clone)]
pub struct GrpcWebClient<S = Channel> {
    invoker: CallInvoker<S>,
}

impl<S> GrpcWebClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = bytes::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self::with_config(service, ClientConfig::default())
    }

    pub fn with_config(service: S, config: ClientConfig) -> Self {
        Self {
            invoker: CallInvoker::with_config(service, config),
        }
    }

    pub fn invoker(&self) -> &CallInvoker<S> {
        &self.invoker
    }

    /// Performs a Unary call (Single Request -> Single Response).
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(Value))` - Successful RPC execution.
    /// * `Ok(Err(Status))` - RPC executed, but the server (or the protocol) reported an error.
    /// * `Err(CallError)` - The call could not be issued.
    pub async fn unary(
        &self,
        method: MethodDescriptor,
        payload: serde_json::Value,
        options: CallOptions,
    ) -> Result<Result<serde_json::Value, tonic::Status>, CallError> {
        let codec = JsonCodec::new(method.input(), method.output());
        let call = self.invoker.unary(http_path(&method), codec, payload, options);

        let response = match call {
            Ok(mut call) => call.response().await,
            Err(err) => Err(err),
        };
        split_status(response)
    }

    /// Performs a Server Streaming call (Single Request -> Stream of Responses).
    pub async fn server_streaming(
        &self,
        method: MethodDescriptor,
        payload: serde_json::Value,
        options: CallOptions,
    ) -> Result<
        Result<impl Stream<Item = Result<serde_json::Value, tonic::Status>>, tonic::Status>,
        CallError,
    > {
        let codec = JsonCodec::new(method.input(), method.output());
        let call = self
            .invoker
            .server_streaming(http_path(&method), codec, payload, options);

        match call {
            Ok(call) => open_stream(call).await,
            Err(err) => split_status(Err(err)),
        }
    }

    /// Performs a Client Streaming call (Stream of Requests -> Single Response).
    pub async fn client_streaming(
        &self,
        method: MethodDescriptor,
        payload_stream: impl Stream<Item = serde_json::Value> + Send + 'static,
        options: CallOptions,
    ) -> Result<Result<serde_json::Value, tonic::Status>, CallError> {
        let codec = JsonCodec::new(method.input(), method.output());
        let (mut sink, mut call) = self
            .invoker
            .client_streaming(http_path(&method), codec, options);

        let mut payload_stream = std::pin::pin!(payload_stream);
        while let Some(message) = payload_stream.next().await {
            if let Err(err) = sink.send(message).await {
                // The call failed while sending, its status explains why.
                if err.status().is_some() {
                    break;
                }
                return Err(err);
            }
        }
        sink.complete();

        split_status(call.response().await)
    }

    /// Performs a Bidirectional Streaming call (Stream of Requests -> Stream of Responses).
    ///
    /// Requests are written from a background task while responses are read.
    pub async fn bidirectional_streaming(
        &self,
        method: MethodDescriptor,
        payload_stream: impl Stream<Item = serde_json::Value> + Send + 'static,
        options: CallOptions,
    ) -> Result<
        Result<impl Stream<Item = Result<serde_json::Value, tonic::Status>>, tonic::Status>,
        CallError,
    > {
        let codec = JsonCodec::new(method.input(), method.output());
        let (mut sink, call) = self
            .invoker
            .duplex_streaming(http_path(&method), codec, options);

        tokio::spawn(async move {
            let mut payload_stream = std::pin::pin!(payload_stream);
            while let Some(message) = payload_stream.next().await {
                if let Err(err) = sink.send(message).await {
                    tracing::debug!(error = %err, "stopped writing the request stream");
                    return;
                }
            }
            sink.complete();
        });

        open_stream(call).await
    }

    /// Executes a dynamic gRPC request, resolving the method in `pool`.
    pub async fn dynamic(
        &self,
        pool: &DescriptorPool,
        request: DynamicRequest,
    ) -> Result<DynamicResponse, DynamicCallError> {
        let method = pool
            .get_service_by_name(&request.service)
            .ok_or_else(|| DynamicCallError::ServiceNotFound(request.service.clone()))?
            .methods()
            .find(|m| m.name() == request.method)
            .ok_or_else(|| DynamicCallError::MethodNotFound(request.method.clone()))?;

        let mut options = CallOptions::from_headers(request.headers)?;
        if let Some(timeout) = request.timeout {
            options = options.with_timeout(timeout);
        }

        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => {
                let result = self.unary(method, request.body, options).await?;
                Ok(DynamicResponse::Unary(result))
            }
            (false, true) => match self.server_streaming(method, request.body, options).await? {
                Ok(stream) => Ok(DynamicResponse::Streaming(Ok(stream.collect().await))),
                Err(status) => Ok(DynamicResponse::Streaming(Err(status))),
            },
            (true, false) => {
                let input_stream =
                    json_array_to_stream(request.body).map_err(DynamicCallError::InvalidInput)?;
                let result = self.client_streaming(method, input_stream, options).await?;
                Ok(DynamicResponse::Unary(result))
            }
            (true, true) => {
                let input_stream =
                    json_array_to_stream(request.body).map_err(DynamicCallError::InvalidInput)?;
                match self
                    .bidirectional_streaming(method, input_stream, options)
                    .await?
                {
                    Ok(stream) => Ok(DynamicResponse::Streaming(Ok(stream.collect().await))),
                    Err(status) => Ok(DynamicResponse::Streaming(Err(status))),
                }
            }
        }
    }
}

/// Waits for the response headers, then exposes the messages as a stream of results.
async fn open_stream(
    mut call: Call<JsonCodec>,
) -> Result<Result<impl Stream<Item = Result<serde_json::Value, tonic::Status>>, tonic::Status>, CallError>
{
    if let Some(err) = call.headers().await.err() {
        return split_status(Err(err));
    }

    let stream = call.into_stream().map(|item| {
        item.map_err(|err| match err {
            CallError::Status(status) => status,
            other => tonic::Status::internal(other.to_string()),
        })
    });
    Ok(Ok(stream))
}

fn http_path(method: &MethodDescriptor) -> http::uri::PathAndQuery {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).expect("valid gRPC path")
}

fn json_array_to_stream(
    json: serde_json::Value,
) -> Result<impl Stream<Item = serde_json::Value> + Send + 'static, String> {
    match json {
        serde_json::Value::Array(items) => Ok(tokio_stream::iter(items)),
        _ => Err("Client streaming requires a JSON Array body".to_string()),
    }
}
