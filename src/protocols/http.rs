//! HTTP protocol classifier for Strix
//!
//! Recognises HTTP/1.x request and response starts over TCP and extracts
//! the request line and Host header.

use crate::core::packet::{PacketInfo, TransportProto};
use crate::dissector::AppProtocol;
use crate::protocols::{ProtocolClassifier, ProtocolFields};

const METHODS: [&str; 9] = [
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "CONNECT", "TRACE", "PATCH",
];

/// HTTP/1.x classifier
pub struct HttpClassifier;

impl HttpClassifier {
    pub fn new() -> Self {
        Self
    }

    fn starts_with_method(payload: &[u8]) -> Option<&'static str> {
        METHODS.iter().copied().find(|m| {
            payload.len() > m.len()
                && payload.starts_with(m.as_bytes())
                && payload[m.len()] == b' '
        })
    }

    fn header_value<'a>(lines: impl Iterator<Item = &'a str>, name: &str) -> Option<String> {
        for line in lines {
            if let Some((key, value)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case(name) {
                    return Some(value.trim().to_string());
                }
            }
        }
        None
    }

    fn parse_request(&self, text: &str) -> Option<ProtocolFields> {
        let mut lines = text.split("\r\n");
        let request_line = lines.next()?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?;
        let uri = parts.next()?;
        let version = parts.next()?;
        if !version.starts_with("HTTP/") {
            return None;
        }
        Some(ProtocolFields::Http {
            method: Some(method.to_string()),
            uri: Some(uri.to_string()),
            host: Self::header_value(lines, "Host"),
            status_code: None,
        })
    }

    fn parse_response(&self, text: &str) -> Option<ProtocolFields> {
        let status_line = text.split("\r\n").next()?;
        let mut parts = status_line.split_whitespace();
        let version = parts.next()?;
        if !version.starts_with("HTTP/") {
            return None;
        }
        let status_code = parts.next()?.parse::<u16>().ok()?;
        Some(ProtocolFields::Http {
            method: None,
            uri: None,
            host: None,
            status_code: Some(status_code),
        })
    }
}

impl ProtocolClassifier for HttpClassifier {
    fn name(&self) -> &'static str {
        "http"
    }

    fn app_protocol(&self) -> AppProtocol {
        AppProtocol::Http
    }

    fn matches(&self, info: &PacketInfo, payload: &[u8]) -> bool {
        if info.proto != TransportProto::Tcp || payload.len() < 8 {
            return false;
        }
        payload.starts_with(b"HTTP/") || Self::starts_with_method(payload).is_some()
    }

    fn extract(&self, _info: &PacketInfo, payload: &[u8]) -> Option<ProtocolFields> {
        // Only the head of the message is needed; tolerate a body that is
        // not valid UTF-8 by cutting at the first invalid byte.
        let head = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&payload[..e.valid_up_to()]).ok()?,
        };
        if head.starts_with("HTTP/") {
            self.parse_response(head)
        } else {
            self.parse_request(head)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::SystemTime;

    fn tcp_info(dst_port: u16) -> PacketInfo {
        PacketInfo {
            ip_version: 4,
            proto: TransportProto::Tcp,
            src_ip: "192.168.1.10".parse().unwrap(),
            dst_ip: "93.184.216.34".parse().unwrap(),
            src_port: 49152,
            dst_port,
            l7_offset: 0,
            tcp_flags: Some(0x18),
            data: Bytes::new(),
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_matches_request_and_response() {
        let classifier = HttpClassifier::new();
        assert!(classifier.matches(&tcp_info(80), b"GET /index.html HTTP/1.1\r\n"));
        assert!(classifier.matches(&tcp_info(80), b"HTTP/1.1 200 OK\r\n"));
        assert!(!classifier.matches(&tcp_info(80), b"\x16\x03\x01\x00\x50"));
        assert!(!classifier.matches(&tcp_info(80), b"GETX/ HTTP/1.1"));
    }

    #[test]
    fn test_extract_request_fields() {
        let classifier = HttpClassifier::new();
        let payload = b"GET /search?q=1 HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n";
        match classifier.extract(&tcp_info(80), payload) {
            Some(ProtocolFields::Http {
                method,
                uri,
                host,
                status_code,
            }) => {
                assert_eq!(method.as_deref(), Some("GET"));
                assert_eq!(uri.as_deref(), Some("/search?q=1"));
                assert_eq!(host.as_deref(), Some("example.com"));
                assert_eq!(status_code, None);
            }
            other => panic!("unexpected fields {:?}", other),
        }
    }

    #[test]
    fn test_extract_response_status() {
        let classifier = HttpClassifier::new();
        let payload = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
        match classifier.extract(&tcp_info(80), payload) {
            Some(ProtocolFields::Http { status_code, .. }) => {
                assert_eq!(status_code, Some(404));
            }
            other => panic!("unexpected fields {:?}", other),
        }
    }
}
