use crate::base64::encoded_len;
use http::{HeaderMap, HeaderValue, header::CONTENT_TYPE};

pub(crate) mod content_types {
    pub(crate) const GRPC: &str = "application/grpc";
    pub(crate) const GRPC_WEB: &str = "application/grpc-web";
    pub(crate) const GRPC_WEB_TEXT: &str = "application/grpc-web-text";
}

/// How a gRPC-Web body is carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireMode {
    /// `application/grpc-web`: frames are sent as raw bytes.
    #[default]
    Binary,
    /// `application/grpc-web-text`: the whole body is base64 text.
    Text,
}

impl WireMode {
    pub fn content_type(self) -> &'static str {
        match self {
            WireMode::Binary => content_types::GRPC_WEB,
            WireMode::Text => content_types::GRPC_WEB_TEXT,
        }
    }

    pub fn content_type_header(self) -> HeaderValue {
        HeaderValue::from_static(self.content_type())
    }

    /// Length on the wire of a body holding `n` framed bytes.
    pub fn wire_len(self, n: u64) -> u64 {
        match self {
            WireMode::Binary => n,
            WireMode::Text => encoded_len(n),
        }
    }
}

/// The gRPC flavour announced by a `content-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Native `application/grpc[+format]`.
    Grpc,
    /// `application/grpc-web[-text][+format]`.
    GrpcWeb(WireMode),
}

impl ContentKind {
    /// Classifies a `content-type` value.
    ///
    /// Matching ignores case and media type parameters. A `+format` suffix (`+proto`, `+json`)
    /// is accepted for every flavour.
    pub fn from_content_type(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        let essence = essence.to_ascii_lowercase();
        let base = essence
            .split_once('+')
            .map_or(essence.as_str(), |(base, _format)| base);

        match base {
            content_types::GRPC => Some(ContentKind::Grpc),
            content_types::GRPC_WEB => Some(ContentKind::GrpcWeb(WireMode::Binary)),
            content_types::GRPC_WEB_TEXT => Some(ContentKind::GrpcWeb(WireMode::Text)),
            _ => None,
        }
    }

    /// Classifies the `content-type` header of a request or response.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
        Self::from_content_type(value)
    }

    pub fn wire_mode(self) -> Option<WireMode> {
        match self {
            ContentKind::Grpc => None,
            ContentKind::GrpcWeb(mode) => Some(mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_are_classified() {
        let cases = [
            ("application/grpc", Some(ContentKind::Grpc)),
            ("application/grpc+proto", Some(ContentKind::Grpc)),
            ("application/grpc-web", Some(ContentKind::GrpcWeb(WireMode::Binary))),
            ("Application/GRPC-Web+proto", Some(ContentKind::GrpcWeb(WireMode::Binary))),
            ("application/grpc-web-text", Some(ContentKind::GrpcWeb(WireMode::Text))),
            (
                "application/grpc-web-text+proto; charset=utf-8",
                Some(ContentKind::GrpcWeb(WireMode::Text)),
            ),
            ("application/grpc-webby", None),
            ("application/json", None),
            ("", None),
        ];

        for (value, expected) in cases {
            assert_eq!(ContentKind::from_content_type(value), expected, "{value}");
        }
    }

    #[test]
    fn missing_header_is_not_grpc() {
        assert_eq!(ContentKind::from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn text_mode_reports_expanded_length() {
        assert_eq!(WireMode::Binary.wire_len(10), 10);
        assert_eq!(WireMode::Text.wire_len(10), 16);
        assert_eq!(WireMode::Text.wire_len(0), 0);
    }
}
