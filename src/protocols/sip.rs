//! SIP protocol classifier for Strix
//!
//! Recognises SIP requests and responses (RFC 3261 start lines) and
//! extracts the method and request URI.

use crate::core::packet::PacketInfo;
use crate::dissector::AppProtocol;
use crate::protocols::{ProtocolClassifier, ProtocolFields};

const METHODS: [&str; 10] = [
    "INVITE",
    "REGISTER",
    "ACK",
    "BYE",
    "CANCEL",
    "OPTIONS",
    "SUBSCRIBE",
    "NOTIFY",
    "MESSAGE",
    "INFO",
];

/// SIP classifier
pub struct SipClassifier;

impl SipClassifier {
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
}

impl ProtocolClassifier for SipClassifier {
    fn name(&self) -> &'static str {
        "sip"
    }

    fn app_protocol(&self) -> AppProtocol {
        AppProtocol::Sip
    }

    fn matches(&self, _info: &PacketInfo, payload: &[u8]) -> bool {
        if payload.len() < 12 {
            return false;
        }
        if payload.starts_with(b"SIP/2.0 ") {
            return true;
        }
        match Self::starts_with_method(payload) {
            // The request line must name the SIP version.
            Some(_) => payload
                .split(|&b| b == b'\r')
                .next()
                .map(|line| line.ends_with(b"SIP/2.0"))
                .unwrap_or(false),
            None => false,
        }
    }

    fn extract(&self, _info: &PacketInfo, payload: &[u8]) -> Option<ProtocolFields> {
        let line_end = payload
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
            .unwrap_or(payload.len());
        let line = std::str::from_utf8(&payload[..line_end]).ok()?;

        if let Some(status) = line.strip_prefix("SIP/2.0 ") {
            return Some(ProtocolFields::Sip {
                method: format!("RESPONSE {}", status.split_whitespace().next()?),
                request_uri: None,
            });
        }

        let mut parts = line.split_whitespace();
        let method = parts.next()?;
        let request_uri = parts.next()?;
        Some(ProtocolFields::Sip {
            method: method.to_string(),
            request_uri: Some(request_uri.to_string()),
        })
    }
}
