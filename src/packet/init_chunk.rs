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
use crate::packet::parameter::Parameter;
use crate::packet::parameter::addresses_in;
use crate::packet::parameter::forward_tsn_supported_in;
use crate::packet::parameter::parameters_from_bytes;
use crate::packet::parameter::parameters_serialize_to;
use crate::packet::parameter::parameters_serialized_size;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;
use std::fmt;
use std::net::IpAddr;

pub(crate) const CHUNK_TYPE: u8 = 1;

// Fixed fields preceding the parameters, shared with INIT ACK.
pub(crate) const FIXED_FIELDS_SIZE: usize = 16;

/// The fields INIT and INIT ACK have in common.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct InitFields {
    pub initiate_tag: u32,
    pub a_rwnd: u32,
    pub nbr_outbound_streams: u16,
    pub nbr_inbound_streams: u16,
    pub initial_tsn: Tsn,
    pub parameters: Vec<Parameter>,
}

impl InitFields {
    pub(crate) fn read(value: &[u8]) -> Result<Self, Error> {
        ensure!(value.len() >= FIXED_FIELDS_SIZE, ChunkParseError::InvalidLength);
        let fields = Self {
            initiate_tag: read_u32_be!(&value[0..4]),
            a_rwnd: read_u32_be!(&value[4..8]),
            nbr_outbound_streams: read_u16_be!(&value[8..10]),
            nbr_inbound_streams: read_u16_be!(&value[10..12]),
            initial_tsn: Tsn(read_u32_be!(&value[12..16])),
            parameters: parameters_from_bytes(&value[16..])?,
        };
        // A zero tag, or no streams in either direction, can't be used for an association.
        ensure!(fields.initiate_tag != 0, ChunkParseError::InvalidValue);
        ensure!(
            fields.nbr_outbound_streams != 0 && fields.nbr_inbound_streams != 0,
            ChunkParseError::InvalidValue
        );
        Ok(fields)
    }
}

/// Writes the fixed INIT / INIT ACK fields and the parameters following them.
pub(crate) fn write_init_fields(
    value: &mut [u8],
    initiate_tag: u32,
    a_rwnd: u32,
    nbr_streams: (u16, u16),
    initial_tsn: Tsn,
    parameters: &[Parameter],
) {
    write_u32_be!(&mut value[0..4], initiate_tag);
    write_u32_be!(&mut value[4..8], a_rwnd);
    write_u16_be!(&mut value[8..10], nbr_streams.0);
    write_u16_be!(&mut value[10..12], nbr_streams.1);
    write_u32_be!(&mut value[12..16], initial_tsn.0);
    parameters_serialize_to(parameters, &mut value[FIXED_FIELDS_SIZE..]);
}

/// Initiation (INIT) chunk
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.2>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 1    |  Chunk Flags  |      Chunk Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         Initiate Tag                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Advertised Receiver Window Credit (a_rwnd)           |
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
pub(crate) struct InitChunk {
    pub initiate_tag: u32,
    pub a_rwnd: u32,
    pub nbr_outbound_streams: u16,
    pub nbr_inbound_streams: u16,
    pub initial_tsn: Tsn,
    pub parameters: Vec<Parameter>,
}

impl InitChunk {
    /// The sender's transport addresses, in addition to the packet's source address.
    pub fn addresses(&self) -> Vec<IpAddr> {
        addresses_in(&self.parameters)
    }

    pub fn forward_tsn_supported(&self) -> bool {
        forward_tsn_supported_in(&self.parameters)
    }
}

impl From<InitFields> for InitChunk {
    fn from(f: InitFields) -> Self {
        Self {
            initiate_tag: f.initiate_tag,
            a_rwnd: f.a_rwnd,
            nbr_outbound_streams: f.nbr_outbound_streams,
            nbr_inbound_streams: f.nbr_inbound_streams,
            initial_tsn: f.initial_tsn,
            parameters: f.parameters,
        }
    }
}

impl TryFrom<RawChunk<'_>> for InitChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == CHUNK_TYPE, ChunkParseError::InvalidType);
        InitFields::read(raw.value).map(InitChunk::from)
    }
}

impl SerializableTlv for InitChunk {
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

impl fmt::Display for InitChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "INIT, initiate_tag={:#010x}, initial_tsn={}, streams={}/{}",
            self.initiate_tag, self.initial_tsn, self.nbr_outbound_streams, self.nbr_inbound_streams
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::address_parameter::AddressParameter;
    use crate::packet::forward_tsn_supported_parameter::ForwardTsnSupportedParameter;
    use std::net::Ipv4Addr;

    #[test]
    fn init_from_capture() {
        const BYTES: &[u8] = &[
            0x01, 0x00, 0x00, 0x5a, 0xde, 0x7a, 0x16, 0x90, 0x00, 0x02, 0x00, 0x00, 0x03, 0xe8,
            0x03, 0xe8, 0x25, 0x0d, 0x37, 0xe8, 0x80, 0x00, 0x00, 0x04, 0xc0, 0x00, 0x00, 0x04,
            0x80, 0x08, 0x00, 0x09, 0xc0, 0x0f, 0xc1, 0x80, 0x82, 0x00, 0x00, 0x00, 0x80, 0x02,
            0x00, 0x24, 0xab, 0x31, 0x44, 0x62, 0x12, 0x1a, 0x15, 0x13, 0xfd, 0x5a, 0x5f, 0x69,
            0xef, 0xaa, 0x06, 0xe9, 0xab, 0xd7, 0x48, 0xcc, 0x3b, 0xd1, 0x4b, 0x60, 0xed, 0x7f,
            0xa6, 0x44, 0xce, 0x4d, 0xd2, 0xad, 0x80, 0x04, 0x00, 0x06, 0x00, 0x01, 0x00, 0x00,
            0x80, 0x03, 0x00, 0x06, 0x80, 0xc1, 0x00, 0x00,
        ];
        let c = InitChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap();
        assert_eq!(c.initiate_tag, 0xde7a1690);
        assert_eq!(c.a_rwnd, 131072);
        assert_eq!(c.nbr_outbound_streams, 1000);
        assert_eq!(c.nbr_inbound_streams, 1000);
        assert_eq!(c.initial_tsn, Tsn(621623272));
        assert_eq!(c.parameters.len(), 6);
        assert!(c.forward_tsn_supported());
        assert!(c.addresses().is_empty());
    }

    #[test]
    fn serialize_and_deserialize() {
        let address = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        let chunk = InitChunk {
            initiate_tag: 123,
            a_rwnd: 456,
            nbr_outbound_streams: 65535,
            nbr_inbound_streams: 65534,
            initial_tsn: Tsn(789),
            parameters: vec![
                Parameter::Address(AddressParameter { address }),
                Parameter::ForwardTsnSupported(ForwardTsnSupportedParameter {}),
            ],
        };
        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);

        let deserialized =
            InitChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();
        assert_eq!(deserialized, chunk);
        assert_eq!(deserialized.addresses(), vec![address]);
    }

    #[test]
    fn zero_tag_is_rejected() {
        let chunk = InitChunk {
            initiate_tag: 0,
            a_rwnd: 456,
            nbr_outbound_streams: 1,
            nbr_inbound_streams: 1,
            initial_tsn: Tsn(789),
            parameters: vec![],
        };
        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert!(InitChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).is_err());
    }
}
