//! XBee API frames (API mode 1, unescaped).
//!
//! # Frame Format
//!
//! ```text
//! [0x7E] [length: 2 BE] [frame data: length bytes] [checksum: 1]
//!
//! checksum = 0xFF - (sum of frame data bytes & 0xFF)
//! ```
//!
//! Only the frame types the bridge needs are decoded field by field;
//! anything else surfaces as [`ApiFrame::Unknown`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Start-of-frame delimiter.
pub const START_DELIMITER: u8 = 0x7E;

/// Largest frame data length accepted by the decoder.
pub const MAX_FRAME_DATA: usize = 0x0FFF;

/// Frame type, frame id, destination, network address, radius and options.
const TRANSMIT_REQUEST_HEADER: usize = 14;

/// Largest RF payload a single transmit request can carry.
pub const MAX_TRANSMIT_DATA: usize = MAX_FRAME_DATA - TRANSMIT_REQUEST_HEADER;

/// 16-bit destination used when the network address is unknown.
pub const UNKNOWN_NETWORK_ADDRESS: u16 = 0xFFFE;

/// API frame type identifiers.
pub mod frame_type {
    pub const TRANSMIT_REQUEST: u8 = 0x10;
    pub const TRANSMIT_STATUS: u8 = 0x8B;
    pub const RECEIVE_PACKET: u8 = 0x90;
    pub const EXPLICIT_RX_INDICATOR: u8 = 0x91;
}

/// 64-bit XBee node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XBeeAddress(u64);

impl XBeeAddress {
    /// The broadcast address: every node on the network receives the frame.
    pub const BROADCAST: XBeeAddress = XBeeAddress(0x0000_0000_0000_FFFF);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Big-endian wire representation.
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for XBeeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Error parsing an [`XBeeAddress`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid 64-bit XBee address '{0}'")]
pub struct AddressParseError(pub String);

impl FromStr for XBeeAddress {
    type Err = AddressParseError;

    /// Accepts up to 16 hex digits, optionally prefixed with `0x` and
    /// grouped with `:`, `-` or spaces (`00:13:A2:00:41:52:74:21`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let digits: String = body
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .collect();

        if digits.is_empty()
            || digits.len() > 16
            || !digits.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(AddressParseError(s.to_string()));
        }

        u64::from_str_radix(&digits, 16)
            .map(XBeeAddress)
            .map_err(|_| AddressParseError(s.to_string()))
    }
}

impl Serialize for XBeeAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for XBeeAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors decoding an API frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid frame length {0}")]
    Length(usize),

    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("frame type {frame_type:#04x} needs at least {expected} bytes, got {actual}")]
    Truncated {
        frame_type: u8,
        expected: usize,
        actual: usize,
    },
}

/// A decoded XBee API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    /// 0x10: send RF data to a node.
    TransmitRequest {
        frame_id: u8,
        destination: XBeeAddress,
        network_address: u16,
        broadcast_radius: u8,
        options: u8,
        data: Vec<u8>,
    },
    /// 0x8B: local radio's report on a previous transmit request.
    TransmitStatus {
        frame_id: u8,
        network_address: u16,
        retry_count: u8,
        delivery_status: u8,
        discovery_status: u8,
    },
    /// 0x90: RF data received from a node.
    ReceivePacket {
        source: XBeeAddress,
        network_address: u16,
        options: u8,
        data: Vec<u8>,
    },
    /// 0x91: RF data received with explicit addressing (AO=1).
    ExplicitRx {
        source: XBeeAddress,
        network_address: u16,
        source_endpoint: u8,
        destination_endpoint: u8,
        cluster_id: u16,
        profile_id: u16,
        options: u8,
        data: Vec<u8>,
    },
    /// Any other frame type, kept raw.
    Unknown { frame_type: u8, data: Vec<u8> },
}

impl ApiFrame {
    /// Transmit request with default radius and options.
    pub fn transmit_request(frame_id: u8, destination: XBeeAddress, data: &[u8]) -> Self {
        ApiFrame::TransmitRequest {
            frame_id,
            destination,
            network_address: UNKNOWN_NETWORK_ADDRESS,
            broadcast_radius: 0,
            options: 0,
            data: data.to_vec(),
        }
    }

    pub fn frame_type(&self) -> u8 {
        match self {
            ApiFrame::TransmitRequest { .. } => frame_type::TRANSMIT_REQUEST,
            ApiFrame::TransmitStatus { .. } => frame_type::TRANSMIT_STATUS,
            ApiFrame::ReceivePacket { .. } => frame_type::RECEIVE_PACKET,
            ApiFrame::ExplicitRx { .. } => frame_type::EXPLICIT_RX_INDICATOR,
            ApiFrame::Unknown { frame_type, .. } => *frame_type,
        }
    }

    /// Sender and RF payload, for the two receive frame types.
    pub fn received_data(&self) -> Option<(XBeeAddress, &[u8])> {
        match self {
            ApiFrame::ReceivePacket { source, data, .. }
            | ApiFrame::ExplicitRx { source, data, .. } => Some((*source, data)),
            _ => None,
        }
    }

    /// Serialize to wire bytes, including delimiter, length and checksum.
    ///
    /// Fails when the frame data would not fit the decoder's length limit.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let body = self.frame_data();
        let len = u16::try_from(body.len())
            .ok()
            .filter(|len| usize::from(*len) <= MAX_FRAME_DATA)
            .ok_or(FrameError::Length(body.len()))?;

        let mut out = Vec::with_capacity(body.len() + 4);
        out.push(START_DELIMITER);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&body);
        out.push(checksum(&body));
        Ok(out)
    }

    fn frame_data(&self) -> Vec<u8> {
        let mut out = vec![self.frame_type()];
        match self {
            ApiFrame::TransmitRequest {
                frame_id,
                destination,
                network_address,
                broadcast_radius,
                options,
                data,
            } => {
                out.push(*frame_id);
                out.extend_from_slice(&destination.to_bytes());
                out.extend_from_slice(&network_address.to_be_bytes());
                out.push(*broadcast_radius);
                out.push(*options);
                out.extend_from_slice(data);
            }
            ApiFrame::TransmitStatus {
                frame_id,
                network_address,
                retry_count,
                delivery_status,
                discovery_status,
            } => {
                out.push(*frame_id);
                out.extend_from_slice(&network_address.to_be_bytes());
                out.extend_from_slice(&[*retry_count, *delivery_status, *discovery_status]);
            }
            ApiFrame::ReceivePacket {
                source,
                network_address,
                options,
                data,
            } => {
                out.extend_from_slice(&source.to_bytes());
                out.extend_from_slice(&network_address.to_be_bytes());
                out.push(*options);
                out.extend_from_slice(data);
            }
            ApiFrame::ExplicitRx {
                source,
                network_address,
                source_endpoint,
                destination_endpoint,
                cluster_id,
                profile_id,
                options,
                data,
            } => {
                out.extend_from_slice(&source.to_bytes());
                out.extend_from_slice(&network_address.to_be_bytes());
                out.push(*source_endpoint);
                out.push(*destination_endpoint);
                out.extend_from_slice(&cluster_id.to_be_bytes());
                out.extend_from_slice(&profile_id.to_be_bytes());
                out.push(*options);
                out.extend_from_slice(data);
            }
            ApiFrame::Unknown { data, .. } => out.extend_from_slice(data),
        }
        out
    }

    /// Parse frame data (frame type byte onwards, without checksum).
    pub fn parse(frame_data: &[u8]) -> Result<Self, FrameError> {
        let Some(&kind) = frame_data.first() else {
            return Err(FrameError::Length(0));
        };

        let need = |expected: usize| {
            if frame_data.len() < expected {
                Err(FrameError::Truncated {
                    frame_type: kind,
                    expected,
                    actual: frame_data.len(),
                })
            } else {
                Ok(())
            }
        };

        let d = frame_data;
        let frame = match kind {
            frame_type::TRANSMIT_REQUEST => {
                need(TRANSMIT_REQUEST_HEADER)?;
                ApiFrame::TransmitRequest {
                    frame_id: d[1],
                    destination: address_at(d, 2),
                    network_address: u16_at(d, 10),
                    broadcast_radius: d[12],
                    options: d[13],
                    data: d[TRANSMIT_REQUEST_HEADER..].to_vec(),
                }
            }
            frame_type::TRANSMIT_STATUS => {
                need(7)?;
                ApiFrame::TransmitStatus {
                    frame_id: d[1],
                    network_address: u16_at(d, 2),
                    retry_count: d[4],
                    delivery_status: d[5],
                    discovery_status: d[6],
                }
            }
            frame_type::RECEIVE_PACKET => {
                need(12)?;
                ApiFrame::ReceivePacket {
                    source: address_at(d, 1),
                    network_address: u16_at(d, 9),
                    options: d[11],
                    data: d[12..].to_vec(),
                }
            }
            frame_type::EXPLICIT_RX_INDICATOR => {
                need(18)?;
                ApiFrame::ExplicitRx {
                    source: address_at(d, 1),
                    network_address: u16_at(d, 9),
                    source_endpoint: d[11],
                    destination_endpoint: d[12],
                    cluster_id: u16_at(d, 13),
                    profile_id: u16_at(d, 15),
                    options: d[17],
                    data: d[18..].to_vec(),
                }
            }
            other => ApiFrame::Unknown {
                frame_type: other,
                data: d[1..].to_vec(),
            },
        };

        Ok(frame)
    }
}

fn address_at(data: &[u8], offset: usize) -> XBeeAddress {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    XBeeAddress::from_bytes(bytes)
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// XBee checksum over frame data.
pub fn checksum(frame_data: &[u8]) -> u8 {
    0xFF - frame_data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Incremental decoder for a serial byte stream.
///
/// Bytes before a start delimiter are discarded. On a bad length or
/// checksum only the delimiter is dropped, so a real frame hidden inside
/// the garbage is still found.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the port.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Result<ApiFrame, FrameError>> {
        match self.buf.iter().position(|b| *b == START_DELIMITER) {
            Some(start) => {
                self.buf.drain(..start);
            }
            None => {
                self.buf.clear();
                return None;
            }
        }

        if self.buf.len() < 3 {
            return None;
        }

        let len = u16::from_be_bytes([self.buf[1], self.buf[2]]) as usize;
        if len == 0 || len > MAX_FRAME_DATA {
            self.buf.drain(..1);
            return Some(Err(FrameError::Length(len)));
        }

        if self.buf.len() < len + 4 {
            return None;
        }

        let expected = checksum(&self.buf[3..3 + len]);
        let actual = self.buf[3 + len];
        if expected != actual {
            self.buf.drain(..1);
            return Some(Err(FrameError::Checksum { expected, actual }));
        }

        let frame: Vec<u8> = self.buf.drain(..len + 4).collect();
        Some(ApiFrame::parse(&frame[3..3 + len]))
    }
}
