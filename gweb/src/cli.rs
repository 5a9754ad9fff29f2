//! # CLI
//!
//! This module defines the command-line interface of `gweb` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers are `key:value`);
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "gweb", version, about = "gRPC-Web CLI")]
pub struct Cli {
    /// The server URL to connect to (e.g. http://localhost:8080)
    pub url: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Perform a gRPC-Web call to a server
    ///
    /// This command connects to a gRPC-Web endpoint and executes a method using a JSON body.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// gweb http://localhost:8080 call my.pkg.Service/Method --file-descriptor-set api.bin --body '{"key": "value"}'
    /// ```
    Call {
        /// Endpoint (package.Service/Method)
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),
        /// "JSON body (Object for Unary, Array for Streaming)"
        #[arg(long, value_parser = parse_body)]
        body: serde_json::Value,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Path to the descriptor set (.bin)
        #[arg(long)]
        file_descriptor_set: PathBuf,

        /// Use the base64 `application/grpc-web-text` format
        #[arg(long)]
        text: bool,

        /// Call deadline in seconds
        #[arg(long, value_parser = parse_timeout)]
        timeout: Option<Duration>,
    },
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    let (service, method) = value.split_once('/').ok_or_else(|| {
        format!("Invalid endpoint format: '{value}'. Expected 'package.Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok((service.to_string(), method.to_string()))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("Invalid timeout: '{value}'. Expected seconds"))?;

    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid timeout: '{value}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_call() {
        let cli = Cli::try_parse_from([
            "gweb",
            "http://localhost:8080",
            "call",
            "echo.EchoService/UnaryEcho",
            "--body",
            r#"{"message": "hi"}"#,
            "-H",
            "x-echo: yes",
            "--file-descriptor-set",
            "echo.bin",
            "--text",
            "--timeout",
            "1.5",
        ])
        .unwrap();

        assert_eq!(cli.url, "http://localhost:8080");
        let Commands::Call {
            endpoint,
            body,
            headers,
            text,
            timeout,
            ..
        } = cli.command;
        assert_eq!(endpoint, ("echo.EchoService".into(), "UnaryEcho".into()));
        assert_eq!(body["message"], "hi");
        assert_eq!(headers, vec![("x-echo".into(), "yes".into())]);
        assert!(text);
        assert_eq!(timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_endpoint("NoSlash").is_err());
        assert!(parse_endpoint("/Method").is_err());
        assert!(parse_header("no-colon").is_err());
        assert!(parse_body("{not json").is_err());
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("soon").is_err());
    }
}
