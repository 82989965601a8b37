//! Decoded-event boundary over the radio's packet envelope.
//!
//! The wire protocol is a fixed external contract: the radio emits one
//! UTF-8 envelope per frame in `KEY:value` form with `MSG:` consuming the
//! remainder of the line, e.g.
//!
//!   `LANE:radio FROM:0x08AF21C3 TO:^all KIND:text CH:0 HOP:2 SNR:9.5 RSSI:-81 MSG:hello mesh`
//!
//! Everything downstream works on [`DecodedEvent`]; in particular the source
//! lane is set HERE, once, from the envelope's explicit lane tag -- it is
//! carried as plain data and never re-derived by inspecting content.

use chrono::Utc;
use thiserror::Error;

use super::{DecodedEvent, PacketKind, SourceLane};

/// Broadcast destination marker used by the radio envelope.
pub const BROADCAST_DEST: &str = "^all";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("unknown source lane '{0}'")]
    UnknownLane(String),
    #[error("unknown packet kind '{0}'")]
    UnknownKind(String),
    #[error("malformed {field} value '{value}'")]
    BadValue { field: &'static str, value: String },
}

fn parse_node_id(field: &'static str, raw: &str) -> Result<u32, DecodeError> {
    let parsed = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        raw.parse::<u32>().ok()
    };
    parsed.ok_or_else(|| DecodeError::BadValue {
        field,
        value: raw.to_string(),
    })
}

/// Decode one raw frame into a [`DecodedEvent`].
///
/// A frame that fails to decode into any known packet kind is an error here
/// and a `Rejected` outcome downstream: it is never persisted and never
/// touches dedup state.
pub fn decode_frame(frame: &[u8]) -> Result<DecodedEvent, DecodeError> {
    let text = std::str::from_utf8(frame).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim_end_matches(['\r', '\n']);

    let mut lane: Option<SourceLane> = None;
    let mut origin: Option<u32> = None;
    let mut dest: Option<u32> = None;
    let mut dest_is_broadcast = false;
    let mut kind: Option<PacketKind> = None;
    let mut channel: u32 = 0;
    let mut hop_count: u8 = 0;
    let mut snr: Option<f32> = None;
    let mut rssi: Option<i32> = None;
    let mut payload_text: Option<String> = None;

    let mut rest = text;
    while !rest.is_empty() {
        let rest_trimmed = rest.trim_start();
        // MSG: consumes everything that follows, including spaces and colons
        if let Some(msg) = rest_trimmed.strip_prefix("MSG:") {
            payload_text = Some(msg.to_string());
            break;
        }
        let token_end = rest_trimmed.find(' ').unwrap_or(rest_trimmed.len());
        let token = &rest_trimmed[..token_end];
        rest = &rest_trimmed[token_end..];

        let Some((key, value)) = token.split_once(':') else {
            // Stray token without a key; the envelope is fixed, skip it
            continue;
        };
        match key {
            "LANE" => {
                lane = Some(match value {
                    "radio" => SourceLane::Radio,
                    "companion" => SourceLane::Companion,
                    other => return Err(DecodeError::UnknownLane(other.to_string())),
                });
            }
            "FROM" => origin = Some(parse_node_id("FROM", value)?),
            "TO" => {
                if value == BROADCAST_DEST {
                    dest_is_broadcast = true;
                } else {
                    dest = Some(parse_node_id("TO", value)?);
                }
            }
            "KIND" => {
                kind = Some(match value {
                    "text" => PacketKind::Text,
                    "position" => PacketKind::Position,
                    "telemetry" => PacketKind::Telemetry,
                    "nodeinfo" => PacketKind::NodeInfo,
                    other => return Err(DecodeError::UnknownKind(other.to_string())),
                });
            }
            "CH" => {
                channel = value.parse().map_err(|_| DecodeError::BadValue {
                    field: "CH",
                    value: value.to_string(),
                })?;
            }
            "HOP" => {
                hop_count = value.parse().map_err(|_| DecodeError::BadValue {
                    field: "HOP",
                    value: value.to_string(),
                })?;
            }
            "SNR" => {
                snr = Some(value.parse().map_err(|_| DecodeError::BadValue {
                    field: "SNR",
                    value: value.to_string(),
                })?);
            }
            "RSSI" => {
                rssi = Some(value.parse().map_err(|_| DecodeError::BadValue {
                    field: "RSSI",
                    value: value.to_string(),
                })?);
            }
            _ => {
                // Forward compatibility: unknown keys are ignored
            }
        }
    }

    let source_lane = lane.ok_or(DecodeError::MissingField("LANE"))?;
    let origin_id = origin.ok_or(DecodeError::MissingField("FROM"))?;
    let kind = kind.ok_or(DecodeError::MissingField("KIND"))?;
    let is_broadcast = dest_is_broadcast || dest.is_none();

    Ok(DecodedEvent {
        source_lane,
        origin_id,
        destination_id: dest,
        kind,
        channel,
        payload_text,
        snr,
        rssi,
        hop_count,
        size_bytes: frame.len() as u32,
        is_broadcast,
        received_at: Utc::now(),
    })
}

/// Encode an outbound text message for the radio. `destination` of None is a
/// broadcast on the given channel.
pub fn encode_text(destination: Option<u32>, channel: u32, text: &str) -> Vec<u8> {
    let dest = match destination {
        Some(id) => format!("0x{:08X}", id),
        None => BROADCAST_DEST.to_string(),
    };
    format!("TO:{} CH:{} MSG:{}", dest, channel, text).into_bytes()
}
