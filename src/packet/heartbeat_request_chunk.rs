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

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use crate::packet::heartbeat_info_parameter::HeartbeatInfoParameter;
use crate::packet::parameter::Parameter;
use crate::packet::parameter::parameters_from_bytes;
use anyhow::Error;
use anyhow::ensure;
use std::fmt;

pub(crate) const CHUNK_TYPE: u8 = 4;

/// Heartbeat Request (HEARTBEAT) chunk
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.5>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 4    |  Chunk Flags  |       Heartbeat Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /          Heartbeat Information TLV (Variable-Length)          /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct HeartbeatRequestChunk {
    pub info: HeartbeatInfoParameter,
}

/// Extracts the mandatory Heartbeat Info parameter from a HEARTBEAT or HEARTBEAT ACK value.
pub(crate) fn heartbeat_info_from_bytes(value: &[u8]) -> Result<HeartbeatInfoParameter, Error> {
    parameters_from_bytes(value)?
        .into_iter()
        .find_map(|p| match p {
            Parameter::HeartbeatInfo(info) => Some(info),
            _ => None,
        })
        .ok_or_else(|| ChunkParseError::MissingParameter.into())
}

impl TryFrom<RawChunk<'_>> for HeartbeatRequestChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == CHUNK_TYPE, ChunkParseError::InvalidType);
        Ok(Self { info: heartbeat_info_from_bytes(raw.value)? })
    }
}

impl SerializableTlv for HeartbeatRequestChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(CHUNK_TYPE, 0, self.value_size(), output);
        self.info.serialize_to(value);
    }

    fn value_size(&self) -> usize {
        self.info.serialized_size()
    }
}

impl fmt::Display for HeartbeatRequestChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HEARTBEAT, info_length={}", self.info.info.len())
    }
}
