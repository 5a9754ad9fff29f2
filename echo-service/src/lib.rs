//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a native gRPC server implementation
//! and descriptor set for integration testing `gweb-core` and the `gweb` CLI tool.
//! It is not intended for production use.
//!
//! `UnaryEcho` understands two special messages:
//!
//! * `error:<text>` fails with `InvalidArgument` and `<text>` as the status message.
//! * `sleep:<millis>` waits before echoing.
//!
//! Every RPC copies the `x-echo` request header into the response headers.
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::metadata::AsciiMetadataValue;
use tonic::{Request, Response, Status, Streaming};

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/echo.rs"));
}

pub use pb::echo_service_server::{EchoService, EchoServiceServer};
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptors");

use pb::{EchoRequest, EchoResponse};

fn echoed_header<T>(request: &Request<T>) -> Option<AsciiMetadataValue> {
    request.metadata().get("x-echo").cloned()
}

fn respond<T>(message: T, echoed: Option<AsciiMetadataValue>) -> Response<T> {
    let mut response = Response::new(message);
    if let Some(value) = echoed {
        response.metadata_mut().insert("x-echo", value);
    }
    response
}

pub struct EchoServiceImpl;

#[tonic::async_trait]
impl EchoService for EchoServiceImpl {
    type BidirectionalEchoStream = Pin<Box<dyn Stream<Item = Result<EchoResponse, Status>> + Send>>;
    type ServerStreamingEchoStream = ReceiverStream<Result<EchoResponse, Status>>;

    async fn unary_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<EchoResponse>, Status> {
        let echoed = echoed_header(&request);
        let message = request.into_inner().message;

        if let Some(text) = message.strip_prefix("error:") {
            return Err(Status::invalid_argument(text));
        }
        if let Some(millis) = message.strip_prefix("sleep:") {
            let millis = millis
                .parse()
                .map_err(|_| Status::invalid_argument("sleep expects milliseconds"))?;
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        Ok(respond(EchoResponse { message }, echoed))
    }

    async fn server_streaming_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<Self::ServerStreamingEchoStream>, Status> {
        let echoed = echoed_header(&request);
        let msg = request.into_inner().message;
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            for i in 0..3 {
                let response = EchoResponse {
                    message: format!("{} - seq {}", msg, i),
                };
                tx.send(Ok(response)).await.ok();
            }
        });

        Ok(respond(ReceiverStream::new(rx), echoed))
    }

    async fn client_streaming_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<EchoResponse>, Status> {
        let echoed = echoed_header(&request);
        let mut stream = request.into_inner();
        let mut full_msg = String::new();

        while let Some(req) = stream.next().await {
            let req = req?;
            full_msg.push_str(&req.message);
        }

        Ok(respond(EchoResponse { message: full_msg }, echoed))
    }

    async fn bidirectional_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<Self::BidirectionalEchoStream>, Status> {
        let echoed = echoed_header(&request);
        let mut in_stream = request.into_inner();
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            while let Some(result) = in_stream.next().await {
                match result {
                    Ok(req) => {
                        let resp = EchoResponse {
                            message: format!("echo: {}", req.message),
                        };
                        if tx.send(Ok(resp)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        let stream: Self::BidirectionalEchoStream = Box::pin(ReceiverStream::new(rx));
        Ok(respond(stream, echoed))
    }
}

pub type EchoServer = EchoServiceServer<EchoServiceImpl>;

/// The echo server as a tower service, ready to be wrapped in layers.
pub fn server() -> EchoServer {
    EchoServiceServer::new(EchoServiceImpl)
}
