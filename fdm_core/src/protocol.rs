//! Serial line discipline at the upstream boundary.
//!
//! Commands arrive CRLF-terminated, optionally wrapped as `Nnnn ...*cc`
//! where `cc` is the XOR checksum of every byte before the `*` and `nnn`
//! must be exactly one past the last accepted line number. Any framing
//! failure is answered with `error:` plus `Resend:<expected>` and nothing
//! is enqueued. `M110 Nnnn` resets the expected line number.

use crate::error::ProtocolError;

/// A response owed to the sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Ok,
    Echo(String),
    Error(String),
    Resend(u32),
}

impl Response {
    /// Wire form, without the trailing newline.
    pub fn render(&self) -> String {
        match self {
            Response::Ok => "ok".to_string(),
            Response::Echo(msg) => format!("echo:{msg}"),
            Response::Error(msg) => format!("error:{msg}"),
            Response::Resend(n) => format!("Resend:{n}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct LineProtocol {
    last_line_number: u32,
}

impl LineProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// The line number a `Resend:` should request.
    pub fn expected_line_number(&self) -> u32 {
        self.last_line_number.wrapping_add(1)
    }

    /// Validate one raw line. Returns the payload to execute, `None` for
    /// blank/comment-only lines, or the framing error (the caller answers
    /// with `error:` + `Resend:`).
    pub fn accept(&mut self, raw: &str) -> Result<Option<String>, ProtocolError> {
        let line = raw.trim_end_matches(['\r', '\n']);
        // Strip ';' comments before framing: a checksum never covers them.
        let line = match line.find(';') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        if let Some(rest) = line.strip_prefix('N') {
            return self.accept_numbered(line, rest);
        }

        // A checksum without a line number is as garbled as the reverse.
        if line.contains('*') {
            return Err(ProtocolError::Garbled);
        }
        Ok(Some(line.to_string()))
    }

    fn accept_numbered(&mut self, full: &str, rest: &str) -> Result<Option<String>, ProtocolError> {
        let expected = self.expected_line_number();

        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let number: u32 = rest[..digits_end]
            .parse()
            .map_err(|_| ProtocolError::Garbled)?;

        let star = full.rfind('*').ok_or(ProtocolError::MissingChecksum { expected })?;
        let claimed: u32 = full[star + 1..]
            .trim()
            .parse()
            .map_err(|_| ProtocolError::Garbled)?;
        let computed = full.bytes().take(star).fold(0u8, |acc, b| acc ^ b);
        if u32::from(computed) != claimed {
            return Err(ProtocolError::Checksum { expected });
        }

        let payload = full[1 + digits_end..star].trim();
        let is_line_reset = payload.starts_with("M110");
        if number != expected && !is_line_reset {
            return Err(ProtocolError::LineNumber { expected });
        }

        self.last_line_number = number;
        if payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(payload.to_string()))
    }

    /// The standard answer for a rejected line.
    pub fn resend_responses(&self, err: &ProtocolError) -> [Response; 2] {
        [
            Response::Error(err.to_string()),
            Response::Resend(self.expected_line_number()),
        ]
    }
}

/// XOR checksum over a payload, for writers that frame outgoing lines.
pub fn checksum_of(payload: &str) -> u8 {
    payload.bytes().fold(0u8, |acc, b| acc ^ b)
}
