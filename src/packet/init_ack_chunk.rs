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
use crate::packet::init_chunk::FIXED_FIELDS_SIZE;
use crate::packet::init_chunk::InitFields;
use crate::packet::init_chunk::write_init_fields;
use crate::packet::parameter::Parameter;
use crate::packet::parameter::addresses_in;
use crate::packet::parameter::forward_tsn_supported_in;
use crate::packet::parameter::parameters_serialized_size;
use crate::packet::parameter::state_cookie_in;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;
use std::fmt;
use std::net::IpAddr;

pub(crate) const CHUNK_TYPE: u8 = 2;

/// Initiation Acknowledgement (INIT ACK) chunk
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.3>. Same layout as INIT, but
/// must carry a State Cookie parameter.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 2    |  Chunk Flags  |         Chunk Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Initiate Tag                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               Advertised Receiver Window Credit               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Number of Outbound Streams   |   Number of Inbound Streams   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Initial TSN                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /              Optional/Variable-Length Parameters              /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct InitAckChunk {
    pub initiate_tag: u32,
    pub a_rwnd: u32,
    pub nbr_outbound_streams: u16,
    pub nbr_inbound_streams: u16,
    pub initial_tsn: Tsn,
    pub parameters: Vec<Parameter>,
}

impl InitAckChunk {
    pub fn addresses(&self) -> Vec<IpAddr> {
        addresses_in(&self.parameters)
    }

    pub fn forward_tsn_supported(&self) -> bool {
        forward_tsn_supported_in(&self.parameters)
    }

    pub fn state_cookie(&self) -> Option<&[u8]> {
        state_cookie_in(&self.parameters)
    }
}

impl TryFrom<RawChunk<'_>> for InitAckChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == CHUNK_TYPE, ChunkParseError::InvalidType);
        let f = InitFields::read(raw.value)?;
        ensure!(state_cookie_in(&f.parameters).is_some(), ChunkParseError::MissingParameter);
        Ok(Self {
            initiate_tag: f.initiate_tag,
            a_rwnd: f.a_rwnd,
            nbr_outbound_streams: f.nbr_outbound_streams,
            nbr_inbound_streams: f.nbr_inbound_streams,
            initial_tsn: f.initial_tsn,
            parameters: f.parameters,
        })
    }
}

impl SerializableTlv for InitAckChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(CHUNK_TYPE, 0, self.value_size(), output);
        write_init_fields(
            value,
            self.initiate_tag,
            self.a_rwnd,
            (self.nbr_outbound_streams, self.nbr_inbound_streams),
            self.initial_tsn,
            &self.parameters,
        );
    }

    fn value_size(&self) -> usize {
        FIXED_FIELDS_SIZE + parameters_serialized_size(&self.parameters)
    }
}

impl fmt::Display for InitAckChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "INIT-ACK, initiate_tag={:#010x}, initial_tsn={}, streams={}/{}",
            self.initiate_tag, self.initial_tsn, self.nbr_outbound_streams, self.nbr_inbound_streams
        )
    }
}
