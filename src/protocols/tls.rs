//! TLS protocol classifier for Strix
//!
//! Recognises TLS record starts over TCP and extracts the negotiated
//! version and, from a ClientHello, the server name indication.

use crate::core::packet::{PacketInfo, TransportProto};
use crate::dissector::AppProtocol;
use crate::protocols::{ProtocolClassifier, ProtocolFields};
use std::fmt;

const RECORD_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const EXTENSION_SERVER_NAME: u16 = 0;

/// TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    SSLv3,
    TLSv1_0,
    TLSv1_1,
    TLSv1_2,
    TLSv1_3,
    Unknown(u16),
}

impl From<u16> for TlsVersion {
    fn from(value: u16) -> Self {
        match value {
            0x0300 => TlsVersion::SSLv3,
            0x0301 => TlsVersion::TLSv1_0,
            0x0302 => TlsVersion::TLSv1_1,
            0x0303 => TlsVersion::TLSv1_2,
            0x0304 => TlsVersion::TLSv1_3,
            _ => TlsVersion::Unknown(value),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::SSLv3 => write!(f, "SSLv3"),
            TlsVersion::TLSv1_0 => write!(f, "TLSv1.0"),
            TlsVersion::TLSv1_1 => write!(f, "TLSv1.1"),
            TlsVersion::TLSv1_2 => write!(f, "TLSv1.2"),
            TlsVersion::TLSv1_3 => write!(f, "TLSv1.3"),
            TlsVersion::Unknown(code) => write!(f, "TLS({:#06x})", code),
        }
    }
}

/// TLS classifier
pub struct TlsClassifier;

impl TlsClassifier {
    pub fn new() -> Self {
        Self
    }

    fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
        Some(u16::from_be_bytes([
            *data.get(offset)?,
            *data.get(offset + 1)?,
        ]))
    }

    /// Walk a ClientHello body looking for the server_name extension
    fn find_sni(&self, hello: &[u8]) -> Option<String> {
        // client_version(2) random(32)
        let mut offset = 34usize;
        let session_id_len = *hello.get(offset)? as usize;
        offset += 1 + session_id_len;
        let cipher_suites_len = Self::read_u16(hello, offset)? as usize;
        offset += 2 + cipher_suites_len;
        let compression_len = *hello.get(offset)? as usize;
        offset += 1 + compression_len;

        let extensions_len = Self::read_u16(hello, offset)? as usize;
        offset += 2;
        let extensions_end = offset.checked_add(extensions_len)?.min(hello.len());

        while offset + 4 <= extensions_end {
            let ext_type = Self::read_u16(hello, offset)?;
            let ext_len = Self::read_u16(hello, offset + 2)? as usize;
            offset += 4;
            if ext_type == EXTENSION_SERVER_NAME {
                // server_name_list: list_len(2) name_type(1) name_len(2) name
                let name_len = Self::read_u16(hello, offset + 3)? as usize;
                let name_start = offset + 5;
                let name = hello.get(name_start..name_start + name_len)?;
                return String::from_utf8(name.to_vec()).ok();
            }
            offset += ext_len;
        }
        None
    }

    fn parse_handshake(&self, payload: &[u8]) -> Option<ProtocolFields> {
        let record_version = TlsVersion::from(Self::read_u16(payload, 1)?);
        let record_len = Self::read_u16(payload, 3)? as usize;
        let record = payload.get(5..(5 + record_len).min(payload.len()))?;

        let server_name = if record.first() == Some(&HANDSHAKE_CLIENT_HELLO) {
            // handshake_type(1) length(3), then the hello body
            self.find_sni(record.get(4..)?)
        } else {
            None
        };

        Some(ProtocolFields::Tls {
            version: record_version.to_string(),
            server_name,
        })
    }
}

impl ProtocolClassifier for TlsClassifier {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn app_protocol(&self) -> AppProtocol {
        AppProtocol::Tls
    }

    fn matches(&self, info: &PacketInfo, payload: &[u8]) -> bool {
        if info.proto != TransportProto::Tcp || payload.len() < 6 {
            return false;
        }
        // Record type 20..=24 with a plausible protocol version.
        if !(20..=24).contains(&payload[0]) {
            return false;
        }
        payload[1] == 0x03 && payload[2] <= 0x04
    }

    fn extract(&self, _info: &PacketInfo, payload: &[u8]) -> Option<ProtocolFields> {
        if payload.first() == Some(&RECORD_HANDSHAKE) {
            self.parse_handshake(payload)
        } else {
            Some(ProtocolFields::Tls {
                version: TlsVersion::from(Self::read_u16(payload, 1)?).to_string(),
                server_name: None,
            })
        }
    }
}
