//! RCON wire framing
//!
//! Every frame is `size | request_id | type | body | 0x00 | 0x00` with all
//! integers little-endian. `size` counts every byte that follows it, so the
//! smallest legal frame carries `size = 10` (two ids and the terminator).

use thiserror::Error;

/// Request type for an authentication packet
pub const SERVERDATA_AUTH: i32 = 3;
/// Request type for a command execution packet
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
/// Request id the server answers with when the shared secret is wrong
pub const AUTH_REJECTED_ID: i32 = -1;

/// Request id used for the single auth packet of a session
pub const AUTH_REQUEST_ID: i32 = 1;
/// Request id used for every exec packet of a session
pub const EXEC_REQUEST_ID: i32 = 2;

/// Length of the size prefix
pub const HEADER_LEN: usize = 4;
/// Upper bound accepted for the size prefix
pub const MAX_FRAME_SIZE: usize = 65536;
/// Request id + type
const ID_TYPE_LEN: usize = 8;
const TERMINATOR: [u8; 2] = [0, 0];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid frame size: {0}")]
    InvalidSize(i32),

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("frame has {0} trailing bytes")]
    TrailingBytes(usize),

    #[error("body of {0} bytes does not fit in one frame")]
    BodyTooLarge(usize),
}

/// One decoded RCON packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub request_id: i32,
    pub kind: i32,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(request_id: i32, kind: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id,
            kind,
            body: body.into(),
        }
    }

    pub fn auth(secret: &str) -> Self {
        Self::new(AUTH_REQUEST_ID, SERVERDATA_AUTH, secret.as_bytes())
    }

    pub fn exec(command: &str) -> Self {
        Self::new(EXEC_REQUEST_ID, SERVERDATA_EXECCOMMAND, command.as_bytes())
    }

    /// A response carrying request id -1 is a rejected login whatever its type
    pub fn is_auth_rejected(&self) -> bool {
        self.request_id == AUTH_REJECTED_ID
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.request_id, self.kind, &self.body)
    }
}

/// Builds a complete frame including the size prefix
pub fn encode(request_id: i32, kind: i32, body: &[u8]) -> Result<Vec<u8>, FrameError> {
    let size = ID_TYPE_LEN + body.len() + TERMINATOR.len();
    if size > MAX_FRAME_SIZE {
        return Err(FrameError::BodyTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + size);
    frame.extend_from_slice(&(size as i32).to_le_bytes());
    frame.extend_from_slice(&request_id.to_le_bytes());
    frame.extend_from_slice(&kind.to_le_bytes());
    frame.extend_from_slice(body);
    frame.extend_from_slice(&TERMINATOR);
    Ok(frame)
}

/// Validates the 4-byte size prefix and returns how many bytes follow it
pub fn parse_size(header: [u8; HEADER_LEN]) -> Result<usize, FrameError> {
    let size = i32::from_le_bytes(header);
    if size <= 0 || size as usize > MAX_FRAME_SIZE {
        return Err(FrameError::InvalidSize(size));
    }
    Ok(size as usize)
}

/// Decodes everything after the size prefix
pub fn decode_payload(payload: &[u8]) -> Result<Packet, FrameError> {
    if payload.len() < ID_TYPE_LEN {
        return Err(FrameError::Truncated {
            expected: ID_TYPE_LEN,
            actual: payload.len(),
        });
    }

    let request_id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let kind = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);

    // Strip the terminator only, so bodies with their own NULs survive.
    // Some servers send a single NUL, accept that too.
    let mut body = &payload[ID_TYPE_LEN..];
    if body.ends_with(&TERMINATOR) {
        body = &body[..body.len() - 2];
    } else if body.ends_with(&[0]) {
        body = &body[..body.len() - 1];
    }

    Ok(Packet {
        request_id,
        kind,
        body: body.to_vec(),
    })
}

/// Decodes one complete frame, size prefix included
pub fn decode(frame: &[u8]) -> Result<Packet, FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            expected: HEADER_LEN,
            actual: frame.len(),
        });
    }

    let size = parse_size([frame[0], frame[1], frame[2], frame[3]])?;
    let payload = &frame[HEADER_LEN..];
    if payload.len() < size {
        return Err(FrameError::Truncated {
            expected: size,
            actual: payload.len(),
        });
    }
    if payload.len() > size {
        return Err(FrameError::TrailingBytes(payload.len() - size));
    }

    decode_payload(payload)
}
