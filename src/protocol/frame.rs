//! Control-byte framing of the monitor protocol
//!
//! ```text
//! <BEL> <advertised-port> <ETX>                    new monitor handshake
//! <snapshot-bytes> <ETX>                           initial payload, same connection
//! <SOH> <monitor-id> <ETX> <snapshot-bytes> <ETX>  update on a later connection
//! ```

use std::ops::RangeInclusive;

use crate::error::{BrokerError, BrokerResult};

pub const SOH: u8 = 0x01;
pub const ETX: u8 = 0x03;
pub const BEL: u8 = 0x07;

/// Upper bound for a single frame, delimiter excluded
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorHeader {
    /// `BEL <port>`: a monitor announcing itself for the first time
    NewMonitor { port: String },
    /// `SOH <id>`: a known monitor pushing a fresh snapshot
    Update { id: String },
}

impl MonitorHeader {
    pub fn parse(frame: &[u8]) -> BrokerResult<Self> {
        let Some((&head, rest)) = frame.split_first() else {
            return Err(BrokerError::BadMessage("empty header".to_string()));
        };

        let argument = std::str::from_utf8(rest)
            .map_err(|_| BrokerError::BadMessage("header is not valid UTF-8".to_string()))?
            .trim()
            .to_string();

        match head {
            BEL => Ok(MonitorHeader::NewMonitor { port: argument }),
            SOH if argument.is_empty() => {
                Err(BrokerError::BadMessage("missing monitor id".to_string()))
            }
            SOH => Ok(MonitorHeader::Update { id: argument }),
            other => Err(BrokerError::BadMessage(format!(
                "unknown message header 0x{other:02x}"
            ))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (head, argument) = match self {
            MonitorHeader::NewMonitor { port } => (BEL, port),
            MonitorHeader::Update { id } => (SOH, id),
        };

        let mut out = Vec::with_capacity(argument.len() + 3);
        out.push(head);
        out.push(b' ');
        out.extend_from_slice(argument.as_bytes());
        out.push(ETX);
        out
    }
}

/// Validate the port a new monitor advertised in its handshake.
pub fn parse_advertised_port(raw: &str, valid: &RangeInclusive<u16>) -> BrokerResult<u16> {
    let port = raw
        .parse::<i64>()
        .map_err(|_| BrokerError::BadMessage(format!("invalid port value '{raw}'")))?;

    let out_of_range = || {
        BrokerError::BadMessage(format!(
            "port value ({port}) out of range [{}-{}]",
            valid.start(),
            valid.end()
        ))
    };

    let port = u16::try_from(port).map_err(|_| out_of_range())?;
    if !valid.contains(&port) {
        return Err(out_of_range());
    }
    Ok(port)
}

/// Terminate a snapshot payload with ETX.
///
/// Fails if the payload carries one of the reserved control bytes.
pub fn encode_payload(payload: &[u8]) -> BrokerResult<Vec<u8>> {
    if let Some(byte) = payload.iter().find(|b| matches!(**b, SOH | ETX | BEL)) {
        return Err(BrokerError::Internal(format!(
            "payload contains reserved control byte 0x{byte:02x}"
        )));
    }

    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(ETX);
    Ok(out)
}

/// Full update message as sent by a known monitor.
pub fn encode_update(id: &str, payload: &[u8]) -> BrokerResult<Vec<u8>> {
    let mut out = MonitorHeader::Update { id: id.to_string() }.encode();
    out.extend(encode_payload(payload)?);
    Ok(out)
}
