// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::api::StreamId;
use crate::packet::AsSerializableTlv;
use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::parameter::RawParameter;
use crate::packet::parameter::write_parameter_header;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::unknown_parameter::UnknownParameter;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;
use std::fmt;

pub(crate) const CAUSE_INVALID_STREAM_IDENTIFIER: u16 = 1;
pub(crate) const CAUSE_STALE_COOKIE: u16 = 3;
pub(crate) const CAUSE_UNRECOGNIZED_CHUNK_TYPE: u16 = 6;
pub(crate) const CAUSE_NO_USER_DATA: u16 = 9;
pub(crate) const CAUSE_COOKIE_RECEIVED_WHILE_SHUTTING_DOWN: u16 = 10;
pub(crate) const CAUSE_USER_INITIATED_ABORT: u16 = 12;
pub(crate) const CAUSE_PROTOCOL_VIOLATION: u16 = 13;

/// Error causes carried by ERROR and ABORT chunks.
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.10>. Every cause uses the
/// parameter framing, with the cause code in place of the parameter type.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Cause Code           |         Cause Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                    Cause-Specific Information                 /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ErrorCause {
    /// DATA sent to a stream that wasn't negotiated. Stream id followed by two reserved bytes.
    InvalidStreamIdentifier(StreamId),
    /// A COOKIE ECHO arrived too late. Carries how late, in microseconds.
    StaleCookie { staleness_us: u32 },
    /// The complete chunk that wasn't understood.
    UnrecognizedChunkType(Vec<u8>),
    /// A DATA chunk with this TSN had no payload.
    NoUserData(Tsn),
    CookieReceivedWhileShuttingDown,
    UserInitiatedAbort(String),
    ProtocolViolation(String),
    Unknown(UnknownParameter),
}

impl ErrorCause {
    fn code(&self) -> u16 {
        match self {
            ErrorCause::InvalidStreamIdentifier(_) => CAUSE_INVALID_STREAM_IDENTIFIER,
            ErrorCause::StaleCookie { .. } => CAUSE_STALE_COOKIE,
            ErrorCause::UnrecognizedChunkType(_) => CAUSE_UNRECOGNIZED_CHUNK_TYPE,
            ErrorCause::NoUserData(_) => CAUSE_NO_USER_DATA,
            ErrorCause::CookieReceivedWhileShuttingDown => {
                CAUSE_COOKIE_RECEIVED_WHILE_SHUTTING_DOWN
            }
            ErrorCause::UserInitiatedAbort(_) => CAUSE_USER_INITIATED_ABORT,
            ErrorCause::ProtocolViolation(_) => CAUSE_PROTOCOL_VIOLATION,
            ErrorCause::Unknown(p) => p.typ,
        }
    }
}

impl TryFrom<RawParameter<'_>> for ErrorCause {
    type Error = Error;

    fn try_from(raw: RawParameter<'_>) -> Result<Self, Error> {
        let value = raw.value;
        Ok(match raw.typ {
            CAUSE_INVALID_STREAM_IDENTIFIER => {
                ensure!(value.len() == 4, ChunkParseError::InvalidLength);
                ErrorCause::InvalidStreamIdentifier(StreamId(read_u16_be!(value)))
            }
            CAUSE_STALE_COOKIE => {
                ensure!(value.len() == 4, ChunkParseError::InvalidLength);
                ErrorCause::StaleCookie { staleness_us: read_u32_be!(value) }
            }
            CAUSE_UNRECOGNIZED_CHUNK_TYPE => ErrorCause::UnrecognizedChunkType(value.to_vec()),
            CAUSE_NO_USER_DATA => {
                ensure!(value.len() == 4, ChunkParseError::InvalidLength);
                ErrorCause::NoUserData(Tsn(read_u32_be!(value)))
            }
            CAUSE_COOKIE_RECEIVED_WHILE_SHUTTING_DOWN => {
                ErrorCause::CookieReceivedWhileShuttingDown
            }
            CAUSE_USER_INITIATED_ABORT => {
                ErrorCause::UserInitiatedAbort(String::from_utf8_lossy(value).into_owned())
            }
            CAUSE_PROTOCOL_VIOLATION => {
                ErrorCause::ProtocolViolation(String::from_utf8_lossy(value).into_owned())
            }
            _ => ErrorCause::Unknown(UnknownParameter::try_from(raw)?),
        })
    }
}

impl SerializableTlv for ErrorCause {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_parameter_header(self.code(), self.value_size(), output);
        match self {
            ErrorCause::InvalidStreamIdentifier(stream_id) => {
                write_u16_be!(&mut value[0..2], stream_id.0);
                write_u16_be!(&mut value[2..4], 0);
            }
            ErrorCause::StaleCookie { staleness_us } => {
                write_u32_be!(value, *staleness_us);
            }
            ErrorCause::UnrecognizedChunkType(chunk) => value.copy_from_slice(chunk),
            ErrorCause::NoUserData(tsn) => {
                write_u32_be!(value, tsn.0);
            }
            ErrorCause::CookieReceivedWhileShuttingDown => {}
            ErrorCause::UserInitiatedAbort(s) | ErrorCause::ProtocolViolation(s) => {
                value.copy_from_slice(s.as_bytes())
            }
            ErrorCause::Unknown(p) => value.copy_from_slice(&p.value),
        }
    }

    fn value_size(&self) -> usize {
        match self {
            ErrorCause::InvalidStreamIdentifier(_)
            | ErrorCause::StaleCookie { .. }
            | ErrorCause::NoUserData(_) => 4,
            ErrorCause::UnrecognizedChunkType(chunk) => chunk.len(),
            ErrorCause::CookieReceivedWhileShuttingDown => 0,
            ErrorCause::UserInitiatedAbort(s) | ErrorCause::ProtocolViolation(s) => s.len(),
            ErrorCause::Unknown(p) => p.value.len(),
        }
    }
}

impl AsSerializableTlv for ErrorCause {
    fn as_serializable(&self) -> &dyn SerializableTlv {
        self
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::InvalidStreamIdentifier(id) => write!(f, "Invalid Stream Identifier={id}"),
            ErrorCause::StaleCookie { staleness_us } => {
                write!(f, "Stale Cookie, staleness={staleness_us}us")
            }
            ErrorCause::UnrecognizedChunkType(chunk) => match chunk.first() {
                Some(typ) => write!(f, "Unrecognized Chunk Type={typ}"),
                None => write!(f, "Unrecognized Chunk Type"),
            },
            ErrorCause::NoUserData(tsn) => write!(f, "No User Data, tsn={tsn}"),
            ErrorCause::CookieReceivedWhileShuttingDown => {
                write!(f, "Cookie Received While Shutting Down")
            }
            ErrorCause::UserInitiatedAbort(reason) => write!(f, "User-Initiated Abort: {reason}"),
            ErrorCause::ProtocolViolation(info) => write!(f, "Protocol Violation: {info}"),
            ErrorCause::Unknown(p) => write!(f, "Unknown error cause, code={}", p.typ),
        }
    }
}

pub(crate) fn error_causes_from_bytes(data: &[u8]) -> Result<Vec<ErrorCause>, Error> {
    let mut result = Vec::<ErrorCause>::with_capacity(2);
    let mut remaining = data;
    while !remaining.is_empty() {
        let (raw, next_remaining) = RawParameter::from_bytes(remaining)?;
        result.push(ErrorCause::try_from(raw)?);
        remaining = next_remaining;
    }
    Ok(result)
}

/// Human readable summary of a list of causes, for logs and indications.
pub(crate) fn describe_error_causes(causes: &[ErrorCause]) -> String {
    causes.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::parameter::parameters_serialize_to;
    use crate::packet::parameter::parameters_serialized_size;

    fn reparse(causes: &[ErrorCause]) -> Vec<ErrorCause> {
        let mut out = vec![0; parameters_serialized_size(causes)];
        parameters_serialize_to(causes, &mut out);
        error_causes_from_bytes(&out).unwrap()
    }

    #[test]
    fn user_initiated_abort_from_capture() {
        const BYTES: &[u8] = &[0x00, 0x0c, 0x00, 0x04];
        assert_eq!(
            error_causes_from_bytes(BYTES).unwrap(),
            vec![ErrorCause::UserInitiatedAbort(String::new())]
        );
    }

    #[test]
    fn invalid_stream_layout() {
        let cause = ErrorCause::InvalidStreamIdentifier(StreamId(0x1234));
        let mut out = vec![0; cause.serialized_size()];
        cause.serialize_to(&mut out);
        assert_eq!(out, [0x00, 0x01, 0x00, 0x08, 0x12, 0x34, 0x00, 0x00]);
    }

    #[test]
    fn mixed_list_survives_reparsing() {
        let causes = vec![
            ErrorCause::StaleCookie { staleness_us: 1_500_000 },
            ErrorCause::ProtocolViolation("Invalid foo".into()),
            ErrorCause::NoUserData(Tsn(77)),
            ErrorCause::CookieReceivedWhileShuttingDown,
            ErrorCause::UnrecognizedChunkType(vec![0x4f, 0x00, 0x00, 0x04]),
        ];
        assert_eq!(reparse(&causes), causes);
        assert_eq!(
            describe_error_causes(&causes[..2]),
            "Stale Cookie, staleness=1500000us, Protocol Violation: Invalid foo"
        );
    }

    #[test]
    fn unknown_cause_is_kept() {
        let causes = vec![ErrorCause::Unknown(UnknownParameter { typ: 99, value: vec![1, 2] })];
        assert_eq!(reparse(&causes), causes);
    }

    #[test]
    fn short_no_user_data_is_rejected() {
        const BYTES: &[u8] = &[0x00, 0x09, 0x00, 0x06, 0x00, 0x01, 0x00, 0x00];
        assert!(error_causes_from_bytes(BYTES).is_err());
    }
}
