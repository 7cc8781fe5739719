//! Content-type tags attached to stored values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content types the built-in codecs and presets produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportedContentType {
    Json,
    OctetStream,
    Tensor,
    TimeSeries,
    Audio,
    Text,
    Image,
}

impl SupportedContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportedContentType::Json => "application/json",
            SupportedContentType::OctetStream => "application/octet-stream",
            SupportedContentType::Tensor => "application/tensor+octet-stream",
            SupportedContentType::TimeSeries => "application/time-series+octet-stream",
            SupportedContentType::Audio => "audio/wav",
            SupportedContentType::Text => "text/plain",
            SupportedContentType::Image => "image/png",
        }
    }

    /// Parse a MIME string produced by [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "application/json" => Some(SupportedContentType::Json),
            "application/octet-stream" => Some(SupportedContentType::OctetStream),
            "application/tensor+octet-stream" => Some(SupportedContentType::Tensor),
            "application/time-series+octet-stream" => Some(SupportedContentType::TimeSeries),
            "audio/wav" => Some(SupportedContentType::Audio),
            "text/plain" => Some(SupportedContentType::Text),
            "image/png" => Some(SupportedContentType::Image),
            _ => None,
        }
    }
}

impl fmt::Display for SupportedContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for SupportedContentType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inverts_as_str() {
        for ct in [
            SupportedContentType::Json,
            SupportedContentType::OctetStream,
            SupportedContentType::Tensor,
            SupportedContentType::TimeSeries,
            SupportedContentType::Audio,
            SupportedContentType::Text,
            SupportedContentType::Image,
        ] {
            assert_eq!(SupportedContentType::parse(ct.as_str()), Some(ct));
        }
        assert_eq!(SupportedContentType::parse("video/mp4"), None);
    }
}
