//! Protocol classifiers for Strix
//!
//! This module contains the payload classifiers the default dissector runs
//! against a flow until one of them claims it: DNS, HTTP, TLS and SIP.

pub mod dns;
pub mod http;
pub mod sip;
pub mod tls;

use crate::core::packet::PacketInfo;
use crate::dissector::AppProtocol;

/// Fields extracted by a classifier from one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFields {
    Dns {
        query_name: String,
        query_type: String,
        is_response: bool,
    },
    Http {
        method: Option<String>,
        uri: Option<String>,
        host: Option<String>,
        status_code: Option<u16>,
    },
    Tls {
        version: String,
        server_name: Option<String>,
    },
    Sip {
        method: String,
        request_uri: Option<String>,
    },
}

/// A payload classifier for one application protocol
pub trait ProtocolClassifier: Send + Sync {
    /// Protocol name
    fn name(&self) -> &'static str;

    /// Verdict this classifier produces on a match
    fn app_protocol(&self) -> AppProtocol;

    /// Whether this payload belongs to the protocol. A false return on a
    /// non-empty payload rules the protocol out for the flow.
    fn matches(&self, info: &PacketInfo, payload: &[u8]) -> bool;

    /// Extract fields from a payload already attributed to this protocol
    fn extract(&self, info: &PacketInfo, payload: &[u8]) -> Option<ProtocolFields>;
}

/// The classifier set the default dissector runs, in matching order
pub fn default_classifiers() -> Vec<Box<dyn ProtocolClassifier>> {
    vec![
        Box::new(dns::DnsClassifier::new()),
        Box::new(tls::TlsClassifier::new()),
        Box::new(http::HttpClassifier::new()),
        Box::new(sip::SipClassifier::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_is_stable() {
        let classifiers = default_classifiers();
        let names: Vec<&str> = classifiers.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["dns", "tls", "http", "sip"]);
        assert!(classifiers.len() <= 16); // exclusion mask is a u16
    }
}
