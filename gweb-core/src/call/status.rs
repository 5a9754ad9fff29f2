use http::{HeaderMap, StatusCode};
use std::time::Duration;
use tonic::{Code, Status};

pub const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Largest value a `grpc-timeout` header may carry (8 ASCII digits).
const MAX_TIMEOUT_VALUE: u128 = 99_999_999;

/// Units of the `grpc-timeout` header with their length in nanoseconds, finest first.
const TIMEOUT_UNITS: [(char, u128); 6] = [
    ('n', 1),
    ('u', 1_000),
    ('m', 1_000_000),
    ('S', 1_000_000_000),
    ('M', 60 * 1_000_000_000),
    ('H', 3_600 * 1_000_000_000),
];

/// Maps a non-`200 OK` HTTP status onto the gRPC code reported for the call.
pub fn code_from_http(status: StatusCode) -> Code {
    match status {
        StatusCode::BAD_REQUEST => Code::Internal,
        StatusCode::UNAUTHORIZED => Code::Unauthenticated,
        StatusCode::FORBIDDEN => Code::PermissionDenied,
        StatusCode::NOT_FOUND => Code::Unimplemented,
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Code::Unavailable,
        _ => Code::Unknown,
    }
}

pub fn status_from_http(status: StatusCode) -> Status {
    Status::new(
        code_from_http(status),
        format!("Received HTTP status {status} instead of 200 OK"),
    )
}

/// Extracts the final status from trailing metadata.
///
/// A missing `grpc-status` is a protocol violation reported as `Internal`.
pub fn status_from_trailers(trailers: &HeaderMap) -> Status {
    Status::from_header_map(trailers)
        .unwrap_or_else(|| Status::internal("Response ended without a 'grpc-status' trailer"))
}

/// Formats the remaining time of a call as a `grpc-timeout` value.
///
/// Uses the finest unit whose value fits in 8 digits, truncating toward zero. Durations
/// beyond the range of the header are clamped to `99999999H`.
pub fn encode_timeout(timeout: Duration) -> String {
    let nanos = timeout.as_nanos();

    for (unit, unit_nanos) in TIMEOUT_UNITS {
        let value = nanos / unit_nanos;
        if value <= MAX_TIMEOUT_VALUE {
            return format!("{value}{unit}");
        }
    }
    format!("{MAX_TIMEOUT_VALUE}H")
}
