//! # gweb CLI Entry Point
//!
//! The main executable for the gweb tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Installs the log subscriber and parses arguments using [`cli::Cli`].
//! 2. **Schema**: Loads the descriptor set that describes the target service.
//! 3. **Connection**: Opens a channel to the target server.
//! 4. **Execution**: Delegates the request processing to the `GrpcWebClient`.
//! 5. **Presentation**: Formats and prints the resulting data or error status to standard output/error.

mod cli;
mod formatter;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use formatter::{FormattedString, GenericError};
use gweb_core::WireMode;
use gweb_core::call::ClientConfig;
use gweb_core::client::{DynamicRequest, DynamicResponse, GrpcWebClient};
use gweb_core::prost_reflect::DescriptorPool;
use gweb_core::tonic::transport::{Channel, Endpoint};
use std::path::Path;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let url = args.url;

    match args.command {
        Commands::Call {
            endpoint,
            body,
            headers,
            file_descriptor_set,
            text,
            timeout,
        } => {
            let (service, method) = endpoint;
            let mode = if text {
                WireMode::Text
            } else {
                WireMode::Binary
            };
            let request = DynamicRequest {
                body,
                headers,
                service,
                method,
                timeout,
            };
            run_call(&url, &file_descriptor_set, mode, request).await;
        }
    }
}

async fn connect(url: &str) -> anyhow::Result<Channel> {
    let endpoint = Endpoint::from_shared(url.to_string())
        .with_context(|| format!("Invalid server URL '{url}'"))?
        .connect_timeout(Duration::from_secs(10));

    endpoint
        .connect()
        .await
        .with_context(|| format!("Failed to connect to '{url}'"))
}

fn load_pool(path: &Path) -> DescriptorPool {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    };

    match DescriptorPool::decode(bytes.as_slice()) {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    }
}

async fn run_call(url: &str, file_descriptor_set: &Path, mode: WireMode, request: DynamicRequest) {
    let pool = load_pool(file_descriptor_set);

    let channel = match connect(url).await {
        Ok(channel) => channel,
        Err(err) => {
            eprintln!("{}", FormattedString::from(GenericError("Connection Error", err)));
            process::exit(1);
        }
    };

    tracing::debug!(url, service = %request.service, method = %request.method, ?mode, "calling");
    let client = GrpcWebClient::with_config(channel, ClientConfig::default().with_mode(mode));

    match client.dynamic(&pool, request).await {
        Ok(DynamicResponse::Unary(Ok(value))) => println!("{}", FormattedString::from(value)),
        Ok(DynamicResponse::Unary(Err(status))) => println!("{}", FormattedString::from(status)),
        Ok(DynamicResponse::Streaming(Ok(values))) => print_stream(values),
        Ok(DynamicResponse::Streaming(Err(status))) => {
            println!("{}", FormattedString::from(status))
        }
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    }
}

fn print_stream(stream: Vec<Result<serde_json::Value, gweb_core::tonic::Status>>) {
    for elem in stream {
        match elem {
            Ok(val) => println!("{}", FormattedString::from(val)),
            Err(status) => println!("{}", FormattedString::from(status)),
        }
    }
}
