//! Response lines shared by the monitor and command protocols
//!
//! ```text
//! <code> <status-word>[ <detail>]\n
//! [<body>\n]
//! \n
//! ```
//!
//! A response always ends with a blank line, so bodies must never contain an
//! empty line themselves.

use std::fmt;

use crate::error::{BrokerError, BrokerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Ok,
    Error,
    NotFound,
    Unreachable,
    BadMessage,
    Timeout,
    UnknownCommand,
}

impl ResponseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ResponseCode::Ok => 200,
            ResponseCode::Error => 500,
            ResponseCode::NotFound => 501,
            ResponseCode::Unreachable => 502,
            ResponseCode::BadMessage => 503,
            ResponseCode::Timeout => 504,
            ResponseCode::UnknownCommand => 505,
        }
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            200 => ResponseCode::Ok,
            500 => ResponseCode::Error,
            501 => ResponseCode::NotFound,
            502 => ResponseCode::Unreachable,
            503 => ResponseCode::BadMessage,
            504 => ResponseCode::Timeout,
            505 => ResponseCode::UnknownCommand,
            _ => return None,
        })
    }

    pub fn status_word(self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::Error => "ERROR",
            ResponseCode::NotFound => "NOT_FOUND",
            ResponseCode::Unreachable => "UNREACHABLE",
            ResponseCode::BadMessage => "BAD_MESSAGE",
            ResponseCode::Timeout => "TIMEOUT",
            ResponseCode::UnknownCommand => "UNKNOWN_COMMAND",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.status_word())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: ResponseCode,
    pub detail: String,
    pub body: String,
}

impl Response {
    pub fn new(code: ResponseCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            body: String::new(),
        }
    }

    pub fn ok(detail: impl Into<String>) -> Self {
        Self::new(ResponseCode::Ok, detail)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }

    /// First line of the response, without the trailing newline
    pub fn status_line(&self) -> String {
        if self.detail.is_empty() {
            self.code.to_string()
        } else {
            format!("{} {}", self.code, single_line(&self.detail))
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.status_line();
        out.push('\n');

        let body = self.body.trim_end_matches('\n');
        if !body.is_empty() {
            // a blank line inside the body would end the response early
            for line in body.lines().filter(|line| !line.is_empty()) {
                out.push_str(line);
                out.push('\n');
            }
        }

        out.push('\n');
        out.into_bytes()
    }

    /// Parse a status line such as `200 OK Update successful`.
    pub fn parse_status_line(line: &str) -> BrokerResult<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (code, rest) = line.split_once(' ').unwrap_or((line, ""));

        let code = code
            .parse::<u16>()
            .ok()
            .and_then(ResponseCode::from_u16)
            .ok_or_else(|| BrokerError::BadMessage(format!("invalid response line '{line}'")))?;

        // the status word is optional for peers that only send "<code> <detail>"
        let detail = match rest.split_once(' ') {
            Some((word, detail)) if word == code.status_word() => detail,
            None if rest == code.status_word() => "",
            _ => rest,
        };

        Ok(Response::new(code, detail))
    }

    /// Parse one response without its terminating blank line.
    pub fn decode(raw: &[u8]) -> BrokerResult<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| BrokerError::BadMessage("response is not valid UTF-8".to_string()))?;

        let mut lines = text.lines();
        let mut response = Self::parse_status_line(lines.next().unwrap_or_default())?;
        response.body = lines
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(response)
    }
}

impl From<&BrokerError> for Response {
    fn from(err: &BrokerError) -> Self {
        Response::new(err.code(), err.to_string())
    }
}

impl From<BrokerError> for Response {
    fn from(err: BrokerError) -> Self {
        Response::from(&err)
    }
}

fn single_line(text: &str) -> String {
    text.lines().collect::<Vec<_>>().join(" ")
}
