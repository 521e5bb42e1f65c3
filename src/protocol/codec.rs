//! Codecs framing both grammars on a byte stream
//!
//! ```text
//! monitor ──frames──► MonitorCodec ──responses──► monitor
//! client  ──lines───► CommandCodec ──responses──► client
//! ```
//!
//! Peers of a broker (the command client, the agent) use [`ResponseCodec`]:
//! requests go out as given, complete responses come back.

use std::io;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, StreamExt};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::frame::{ETX, MAX_FRAME_LEN};
use super::response::Response;
use crate::error::{BrokerError, BrokerResult};

/// Longest accepted command line, newline excluded
pub const MAX_COMMAND_LEN: usize = 4096;

/// Broker side of a monitor connection: ETX-terminated frames in, responses out
#[derive(Debug, Default)]
pub struct MonitorCodec {
    /// Bytes of the pending frame already searched for ETX
    next_index: usize,
}

impl MonitorCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MonitorCodec {
    /// Frame content, delimiter excluded
    type Item = Bytes;
    type Error = BrokerError;

    fn decode(&mut self, buf: &mut BytesMut) -> BrokerResult<Option<Bytes>> {
        let Some(offset) = buf[self.next_index..].iter().position(|b| *b == ETX) else {
            if buf.len() > MAX_FRAME_LEN {
                return Err(frame_too_long());
            }
            self.next_index = buf.len();
            return Ok(None);
        };

        let end = self.next_index + offset;
        self.next_index = 0;
        if end > MAX_FRAME_LEN {
            return Err(frame_too_long());
        }

        let mut frame = buf.split_to(end + 1);
        frame.truncate(end);
        Ok(Some(frame.freeze()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> BrokerResult<Option<Bytes>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(BrokerError::BadMessage(
                "connection closed before end of frame".to_string(),
            )),
        }
    }
}

impl Encoder<&Response> for MonitorCodec {
    type Error = BrokerError;

    fn encode(&mut self, response: &Response, buf: &mut BytesMut) -> BrokerResult<()> {
        buf.extend_from_slice(&response.encode());
        Ok(())
    }
}

fn frame_too_long() -> BrokerError {
    BrokerError::BadMessage(format!("frame exceeds {MAX_FRAME_LEN} bytes"))
}

/// Server side of a line session: command lines in, responses out.
///
/// A line that is not UTF-8 is yielded as a failed item and the stream goes
/// on. A line longer than [`MAX_COMMAND_LEN`] fails the stream itself.
#[derive(Debug)]
pub struct CommandCodec {
    lines: LinesCodec,
}

impl CommandCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_COMMAND_LEN),
        }
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CommandCodec {
    type Item = BrokerResult<String>;
    type Error = BrokerError;

    fn decode(&mut self, buf: &mut BytesMut) -> BrokerResult<Option<Self::Item>> {
        command_line(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> BrokerResult<Option<Self::Item>> {
        command_line(self.lines.decode_eof(buf))
    }
}

impl Encoder<&Response> for CommandCodec {
    type Error = BrokerError;

    fn encode(&mut self, response: &Response, buf: &mut BytesMut) -> BrokerResult<()> {
        buf.extend_from_slice(&response.encode());
        Ok(())
    }
}

fn command_line(
    decoded: Result<Option<String>, LinesCodecError>,
) -> BrokerResult<Option<BrokerResult<String>>> {
    match decoded {
        Ok(line) => Ok(line.map(Ok)),
        // the line is consumed already, only this command fails
        Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => Ok(Some(Err(
            BrokerError::BadMessage("command is not valid UTF-8".to_string()),
        ))),
        Err(LinesCodecError::MaxLineLengthExceeded) => Err(BrokerError::BadMessage(format!(
            "command longer than {MAX_COMMAND_LEN} bytes"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Client side of either protocol: raw requests out, responses in
#[derive(Debug, Default)]
pub struct ResponseCodec {
    /// Bytes of the pending response already searched for the blank line
    next_index: usize,
}

impl ResponseCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for ResponseCodec {
    type Item = Response;
    type Error = BrokerError;

    fn decode(&mut self, buf: &mut BytesMut) -> BrokerResult<Option<Response>> {
        // status and body lines are never empty, so the first "\n\n" ends the response
        let start = self.next_index.saturating_sub(1);
        let Some(offset) = buf[start..].windows(2).position(|w| w == b"\n\n") else {
            self.next_index = buf.len();
            return Ok(None);
        };

        let end = start + offset;
        self.next_index = 0;
        let raw = buf.split_to(end + 2);
        Response::decode(&raw[..end]).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> BrokerResult<Option<Response>> {
        if let Some(response) = self.decode(buf)? {
            return Ok(Some(response));
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            buf.clear();
            return Ok(None);
        }

        // peer closed without the blank line
        self.next_index = 0;
        let raw = buf.split();
        Response::decode(&raw).map(Some)
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for ResponseCodec {
    type Error = BrokerError;

    fn encode(&mut self, request: T, buf: &mut BytesMut) -> BrokerResult<()> {
        buf.extend_from_slice(request.as_ref());
        Ok(())
    }
}

/// Wait for the next response, failing if the peer closed the connection first.
pub async fn next_response<S>(responses: &mut S) -> BrokerResult<Response>
where
    S: Stream<Item = BrokerResult<Response>> + Unpin,
{
    responses.next().await.unwrap_or_else(|| {
        Err(BrokerError::BadMessage(
            "connection closed before response".to_string(),
        ))
    })
}
