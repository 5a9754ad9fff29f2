use super::options::{CallOptions, ClientConfig};
use super::state::CallState;
use super::status::{GRPC_TIMEOUT, encode_timeout};
use super::streaming::{Call, RequestSink, encode_message};
use crate::BoxError;
use crate::codec::Codec;
use crate::compression::{Encoding, GRPC_ACCEPT_ENCODING};
use crate::error::CallError;
use crate::pool::BufferPool;
use crate::web::{adapt_request, adapt_response};
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::USER_AGENT;
use http::uri::PathAndQuery;
use http::{HeaderValue, Method, Uri};
use http_body::{Body as HttpBody, Frame};
use http_body_util::{Full, StreamBody};
use std::convert::Infallible;
use std::future::poll_fn;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;
use tonic::client::GrpcService;

/// Starts RPC calls over a transport.
///
/// Every call runs the same pipeline: the request is framed and adapted to the configured
/// [`crate::WireMode`], sent through `S`, and the response is normalized by
/// [`adapt_response`] before the returned [`Call`] reads it.
#[derive(Debug, Clone)]
pub struct CallInvoker<S> {
    service: S,
    config: ClientConfig,
    pool: BufferPool,
}

impl<S> CallInvoker<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self::with_config(service, ClientConfig::default())
    }

    pub fn with_config(service: S, config: ClientConfig) -> Self {
        Self {
            service,
            config,
            pool: BufferPool::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Single request, single response. Read it with [`Call::response`].
    pub fn unary<C: Codec>(
        &self,
        path: PathAndQuery,
        codec: C,
        message: C::Encode,
        options: CallOptions,
    ) -> Result<Call<C>, CallError> {
        self.single_request(path, codec, message, options)
    }

    /// Single request, stream of responses.
    pub fn server_streaming<C: Codec>(
        &self,
        path: PathAndQuery,
        codec: C,
        message: C::Encode,
        options: CallOptions,
    ) -> Result<Call<C>, CallError> {
        self.single_request(path, codec, message, options)
    }

    /// Stream of requests, single response.
    pub fn client_streaming<C: Codec>(
        &self,
        path: PathAndQuery,
        codec: C,
        options: CallOptions,
    ) -> (RequestSink<C>, Call<C>) {
        self.streaming_request(path, codec, options)
    }

    /// Stream of requests, stream of responses.
    pub fn duplex_streaming<C: Codec>(
        &self,
        path: PathAndQuery,
        codec: C,
        options: CallOptions,
    ) -> (RequestSink<C>, Call<C>) {
        self.streaming_request(path, codec, options)
    }

    fn single_request<C: Codec>(
        &self,
        path: PathAndQuery,
        mut codec: C,
        message: C::Encode,
        options: CallOptions,
    ) -> Result<Call<C>, CallError> {
        let frame = encode_message(&mut codec, message, self.config.max_send_message_size)?;
        let state = CallState::new(options.deadline, options.cancellation.as_ref());
        Ok(self.start(path, codec, Full::new(frame), options, state))
    }

    fn streaming_request<C: Codec>(
        &self,
        path: PathAndQuery,
        codec: C,
        options: CallOptions,
    ) -> (RequestSink<C>, Call<C>) {
        let (sender, receiver) = mpsc::channel(1);
        let body = StreamBody::new(
            ReceiverStream::new(receiver).map(|frame| Ok::<_, Infallible>(Frame::data(frame))),
        );

        let state = CallState::new(options.deadline, options.cancellation.as_ref());
        let sink = RequestSink::new(
            sender,
            codec.clone(),
            state.clone(),
            self.config.max_send_message_size,
        );
        (sink, self.start(path, codec, body, options, state))
    }

    fn start<C, B>(
        &self,
        path: PathAndQuery,
        codec: C,
        body: B,
        options: CallOptions,
        state: std::sync::Arc<CallState>,
    ) -> Call<C>
    where
        C: Codec,
        B: HttpBody<Data = Bytes> + Unpin + Send + 'static,
        B::Error: Into<BoxError>,
    {
        tracing::debug!(path = %path, mode = ?self.config.mode, "starting call");

        let request = self.build_request(path, body, options);
        let request = adapt_request(request, self.config.mode);

        let mut service = self.service.clone();
        let pool = self.pool.clone();
        let max_receive = self.config.max_receive_message_size;
        let pending = tokio::spawn(async move {
            poll_fn(|cx| service.poll_ready(cx))
                .await
                .map_err(transport_status)?;
            let response = service.call(request).await.map_err(transport_status)?;
            Ok(adapt_response(response.map(tonic::body::Body::new), &pool, max_receive))
        });

        Call::new(state, pending, codec, self.config.max_receive_message_size)
    }

    fn build_request<B>(&self, path: PathAndQuery, body: B, options: CallOptions) -> http::Request<B> {
        let mut request = http::Request::new(body);
        *request.method_mut() = Method::POST;
        *request.uri_mut() = Uri::from(path);
        *request.headers_mut() = options.metadata.into_headers();

        let headers = request.headers_mut();
        if let Some(deadline) = options.deadline {
            let timeout = deadline.saturating_duration_since(Instant::now());
            if let Ok(value) = HeaderValue::from_str(&encode_timeout(timeout)) {
                headers.insert(GRPC_TIMEOUT, value);
            }
        }
        if let Some(accept) = Encoding::accept_header(&self.config.accept_encodings) {
            headers.insert(GRPC_ACCEPT_ENCODING, accept);
        }
        if let Some(value) = self
            .config
            .user_agent
            .as_deref()
            .and_then(|agent| HeaderValue::from_str(agent).ok())
        {
            headers.insert(USER_AGENT, value);
        }

        request
    }
}

/// Maps a transport failure onto the status reported by the call.
fn transport_status(err: impl Into<BoxError>) -> Status {
    let err = err.into();
    match err.downcast::<Status>() {
        Ok(status) => *status,
        Err(err) => Status::unavailable(format!("Transport error: {err}")),
    }
}
