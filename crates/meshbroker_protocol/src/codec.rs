//! Wire framing for both router sockets.
//!
//! Every message is two ZMQ frames: `[identity, envelope]` on receipt (the
//! identity frame is stripped by the ROUTER socket and handled by the
//! broker, not this module); `envelope` itself is:
//!
//! ```text
//! [VERSION:u8][SERVICE:u8][JOBTYPE_IN:u16][JOBTYPE_OUT:u16][PAYLOAD_LEN:u32][payload...]
//! ```
//!
//! 10-byte header, network byte order, followed by `payload` bytes whose
//! encoding depends on `ServiceType` (see the `encode_*`/`decode_*`
//! functions below, one pair per §6 wire descriptor).

use crate::domain::JobType;
use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use meshbroker_ids::JobId;
use std::io::Cursor;

pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 10;

/// Stable integer codes reserved for the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceType {
    Invalid = 0,
    CanMesh = 1,
    MakeMesh = 2,
    MeshStatus = 3,
    RetrieveMesh = 4,
    Shutdown = 5,
}

impl ServiceType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ServiceType::Invalid),
            1 => Ok(ServiceType::CanMesh),
            2 => Ok(ServiceType::MakeMesh),
            3 => Ok(ServiceType::MeshStatus),
            4 => Ok(ServiceType::RetrieveMesh),
            5 => Ok(ServiceType::Shutdown),
            other => Err(ProtocolError::InvalidServiceType(other)),
        }
    }
}

/// A decoded, validated message read off either router socket.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub service: ServiceType,
    pub job_type: JobType,
    pub payload: Vec<u8>,
}

impl IncomingMessage {
    pub fn new(service: ServiceType, job_type: JobType, payload: Vec<u8>) -> Self {
        Self {
            service,
            job_type,
            payload,
        }
    }

    /// Encode a message into its single envelope frame (header + payload).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.write_u8(PROTOCOL_VERSION).unwrap();
        buf.write_u8(self.service.as_u8()).unwrap();
        buf.write_u16::<BigEndian>(self.job_type.input_format).unwrap();
        buf.write_u16::<BigEndian>(self.job_type.output_format).unwrap();
        buf.write_u32::<BigEndian>(self.payload.len() as u32).unwrap();
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a single envelope frame. Fails with `MalformedFrame`
    /// (`ProtocolError::HeaderTooShort`/`PayloadLengthMismatch`/etc.) on any
    /// parse failure — never panics on attacker-controlled input.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_SIZE {
            return Err(ProtocolError::HeaderTooShort {
                expected: HEADER_SIZE,
                got: frame.len(),
            });
        }

        let mut cursor = Cursor::new(&frame[..HEADER_SIZE]);
        let version = cursor.read_u8().map_err(|_| ProtocolError::HeaderTooShort {
            expected: HEADER_SIZE,
            got: frame.len(),
        })?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let service_raw = cursor.read_u8().unwrap();
        let service = ServiceType::from_u8(service_raw)?;
        let input_format = cursor.read_u16::<BigEndian>().unwrap();
        let output_format = cursor.read_u16::<BigEndian>().unwrap();
        let payload_len = cursor.read_u32::<BigEndian>().unwrap() as usize;

        let payload = &frame[HEADER_SIZE..];
        if payload.len() != payload_len {
            return Err(ProtocolError::PayloadLengthMismatch {
                expected: payload_len,
                got: payload.len(),
            });
        }

        Ok(Self {
            service,
            job_type: JobType::new(input_format, output_format),
            payload: payload.to_vec(),
        })
    }
}

/// `<uuid-text>\n<jobtype>\n<payload-length>\n<payload-bytes>`.
pub fn encode_job_descriptor(id: JobId, job_type: JobType, payload: &[u8]) -> Vec<u8> {
    let mut buf = format!("{}\n{}\n{}\n", id, job_type, payload.len()).into_bytes();
    buf.extend_from_slice(payload);
    buf
}

pub fn decode_job_descriptor(bytes: &[u8]) -> Result<(JobId, JobType, Vec<u8>)> {
    let (id, job_type, rest) = split_id_and_type(bytes)?;
    let (len_str, payload) = split_line(rest)?;
    let len: usize = len_str
        .parse()
        .map_err(|_| ProtocolError::Malformed("non-numeric payload length".into()))?;
    if payload.len() != len {
        return Err(ProtocolError::Malformed(format!(
            "job descriptor declared length {len}, got {}",
            payload.len()
        )));
    }
    Ok((id, job_type, payload.to_vec()))
}

/// `<uuid-text>\n<status-code>`.
pub fn encode_job_status(id: JobId, status: crate::domain::Status) -> Vec<u8> {
    format!("{}\n{}", id, status.to_code()).into_bytes()
}

pub fn decode_job_status(bytes: &[u8]) -> Result<(JobId, crate::domain::Status)> {
    let text = ascii_str(bytes)?;
    let (id_str, code_str) = text
        .split_once('\n')
        .ok_or_else(|| ProtocolError::Malformed("job status missing status code".into()))?;
    let id = parse_job_id(id_str)?;
    let code: u8 = code_str
        .trim()
        .parse()
        .map_err(|_| ProtocolError::Malformed("non-numeric status code".into()))?;
    let status = crate::domain::Status::from_code(code)
        .ok_or_else(|| ProtocolError::Malformed(format!("unknown status code {code}")))?;
    Ok((id, status))
}

/// `<uuid-text>\n<length>\n<bytes>`.
pub fn encode_job_result(id: JobId, result: &[u8]) -> Vec<u8> {
    let mut buf = format!("{}\n{}\n", id, result.len()).into_bytes();
    buf.extend_from_slice(result);
    buf
}

pub fn decode_job_result(bytes: &[u8]) -> Result<(JobId, Vec<u8>)> {
    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ProtocolError::Malformed("job result missing id line".into()))?;
    let id = parse_job_id(ascii_str(&bytes[..newline])?)?;
    let rest = &bytes[newline + 1..];
    let (len_str, payload) = split_line(rest)?;
    let len: usize = len_str
        .parse()
        .map_err(|_| ProtocolError::Malformed("non-numeric result length".into()))?;
    if payload.len() != len {
        return Err(ProtocolError::Malformed(format!(
            "job result declared length {len}, got {}",
            payload.len()
        )));
    }
    Ok((id, payload.to_vec()))
}

/// Bare job id, used as the request payload for MeshStatus/RetrieveMesh/
/// Shutdown.
pub fn encode_job_id(id: JobId) -> Vec<u8> {
    id.to_string().into_bytes()
}

pub fn decode_job_id(bytes: &[u8]) -> Result<JobId> {
    parse_job_id(ascii_str(bytes)?)
}

/// Single-byte boolean reply to CanMesh: a single ASCII byte rather than
/// a one-off binary bit, matching the terse style of the other payloads.
pub fn encode_bool(value: bool) -> Vec<u8> {
    vec![if value { b'1' } else { b'0' }]
}

pub fn decode_bool(bytes: &[u8]) -> Result<bool> {
    match bytes {
        [b'1'] => Ok(true),
        [b'0'] => Ok(false),
        _ => Err(ProtocolError::Malformed("expected single '0'/'1' byte".into())),
    }
}

fn ascii_str(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| ProtocolError::Malformed("payload is not valid UTF-8".into()))
}

fn parse_job_id(text: &str) -> Result<JobId> {
    JobId::parse(text.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn split_line(bytes: &[u8]) -> Result<(&str, &[u8])> {
    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ProtocolError::Malformed("missing expected newline".into()))?;
    let line = ascii_str(&bytes[..newline])?;
    Ok((line, &bytes[newline + 1..]))
}

fn split_id_and_type(bytes: &[u8]) -> Result<(JobId, JobType, &[u8])> {
    let (id_line, rest) = split_line(bytes)?;
    let id = parse_job_id(id_line)?;
    let (type_line, rest) = split_line(rest)?;
    let mut parts = type_line.split_whitespace();
    let input_format: u16 = parts
        .next()
        .ok_or_else(|| ProtocolError::Malformed("missing job type input format".into()))?
        .parse()
        .map_err(|_| ProtocolError::Malformed("non-numeric job type input format".into()))?;
    let output_format: u16 = parts
        .next()
        .ok_or_else(|| ProtocolError::Malformed("missing job type output format".into()))?
        .parse()
        .map_err(|_| ProtocolError::Malformed("non-numeric job type output format".into()))?;
    Ok((id, JobType::new(input_format, output_format), rest))
}
