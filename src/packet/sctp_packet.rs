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

use crate::api::Options;
use crate::math::is_divisible_by_4;
use crate::math::round_down_to_4;
use crate::math::round_up_to_4;
use crate::packet::AsSerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::chunk::Chunk;
use crate::packet::chunk::RawChunk;
use crate::packet::crc32c::Crc32c;
use crate::packet::crc32c::crc32c;
use crate::packet::ensure;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use thiserror::Error;

pub const COMMON_HEADER_SIZE: usize = 12;

/// Upper bound on accepted datagrams, only there to reject garbage early.
const MAX_PACKET_SIZE: usize = 65535;

/// SCTP common header
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.1>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Source Port Number       |    Destination Port Number    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Verification Tag                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Checksum                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The checksum is stored in the byte order it's computed in (least significant byte first), so
/// reading the field as a big-endian number doesn't give the CRC value itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct CommonHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub verification_tag: u32,
    pub checksum: u32,
}

impl CommonHeader {
    fn read(data: &[u8]) -> Self {
        Self {
            source_port: read_u16_be!(&data[0..2]),
            destination_port: read_u16_be!(&data[2..4]),
            verification_tag: read_u32_be!(&data[4..8]),
            checksum: read_u32_be!(&data[8..12]),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SctpPacket {
    pub common_header: CommonHeader,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub(crate) enum PacketParseError {
    #[error("Invalid packet size")]
    InvalidPacketSize,
    #[error("Invalid packet checksum")]
    InvalidChecksum,
    #[error("Failed to parse chunk: {0}")]
    FailedParseChunk(String),
}

/// What can be learnt from a datagram without trusting its contents: the common header and the
/// types of the chunks that could be framed. Used to react to corrupted handshake replies.
#[derive(Debug, PartialEq)]
pub(crate) struct PacketPeek {
    pub common_header: CommonHeader,
    pub chunk_types: Vec<u8>,
}

fn compute_checksum(data: &[u8]) -> u32 {
    const FOUR_ZEROES: &[u8] = &[0, 0, 0, 0];
    let mut crc = Crc32c::new();
    crc.update(&data[0..8]);
    crc.update(FOUR_ZEROES);
    crc.update(&data[COMMON_HEADER_SIZE..]);
    crc.finish()
}

impl SctpPacket {
    pub fn from_bytes(data: &[u8], options: &Options) -> Result<SctpPacket, PacketParseError> {
        ensure!(
            data.len() >= COMMON_HEADER_SIZE + TLV_HEADER_SIZE && data.len() <= MAX_PACKET_SIZE,
            PacketParseError::InvalidPacketSize
        );

        let common_header = CommonHeader::read(data);
        if !options.disable_checksum_verification {
            let received = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
            ensure!(compute_checksum(data) == received, PacketParseError::InvalidChecksum);
        }

        let mut chunks: Vec<Chunk> = Vec::with_capacity(4);
        let mut remaining = &data[COMMON_HEADER_SIZE..];
        while !remaining.is_empty() {
            let (raw, next_remaining) = RawChunk::from_bytes(remaining)
                .map_err(|e| PacketParseError::FailedParseChunk(e.to_string()))?;
            let chunk = Chunk::try_from(raw)
                .map_err(|e| PacketParseError::FailedParseChunk(e.to_string()))?;
            chunks.push(chunk);
            remaining = next_remaining;
        }

        Ok(SctpPacket { common_header, chunks })
    }

    /// Reads the common header and the chunk types of a datagram, ignoring the checksum. Framing
    /// stops at the first chunk with an implausible length.
    pub fn peek(data: &[u8]) -> Option<PacketPeek> {
        if data.len() < COMMON_HEADER_SIZE || data.len() > MAX_PACKET_SIZE {
            return None;
        }
        let common_header = CommonHeader::read(data);
        let mut chunk_types = Vec::new();
        let mut remaining = &data[COMMON_HEADER_SIZE..];
        while let Ok((raw, next_remaining)) = RawChunk::from_bytes(remaining) {
            chunk_types.push(raw.typ);
            remaining = next_remaining;
        }
        Some(PacketPeek { common_header, chunk_types })
    }
}

pub(crate) struct SctpPacketBuilder {
    verification_tag: u32,
    source_port: u16,
    dest_port: u16,
    max_packet_size: usize,
    data: Vec<u8>,
}

impl SctpPacketBuilder {
    pub(crate) fn new(
        verification_tag: u32,
        source_port: u16,
        dest_port: u16,
        max_packet_size: usize,
    ) -> Self {
        Self {
            verification_tag,
            source_port,
            dest_port,
            max_packet_size: round_down_to_4!(max_packet_size),
            data: vec![],
        }
    }

    pub(crate) fn verification_tag(&self) -> u32 {
        self.verification_tag
    }

    pub(crate) fn add(&mut self, chunk: &Chunk) -> &mut Self {
        if self.data.is_empty() {
            self.data.reserve(self.max_packet_size);
            self.data.resize(COMMON_HEADER_SIZE, 0);
            write_u16_be!(&mut self.data[0..2], self.source_port);
            write_u16_be!(&mut self.data[2..4], self.dest_port);
            write_u32_be!(&mut self.data[4..8], self.verification_tag);
        }
        debug_assert!(is_divisible_by_4!(self.data.len()));

        let chunk_offset = self.data.len();
        let chunk_size = chunk.as_serializable().serialized_size();
        self.data.resize(round_up_to_4!(self.data.len() + chunk_size), 0);
        chunk
            .as_serializable()
            .serialize_to(&mut self.data[chunk_offset..chunk_offset + chunk_size]);
        self
    }

    pub fn bytes_remaining(&self) -> usize {
        let used = if self.data.is_empty() { COMMON_HEADER_SIZE } else { self.data.len() };
        self.max_packet_size.saturating_sub(used)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Finishes the packet, writes its checksum and resets the builder for the next packet.
    pub fn build(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.data);
        if !out.is_empty() {
            out[8..12].fill(0);
            let checksum = crc32c(&out);
            out[8..12].copy_from_slice(&checksum.to_le_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PpId;
    use crate::api::StreamId;
    use crate::packet::abort_chunk::AbortChunk;
    use crate::packet::data::Data;
    use crate::packet::data_chunk;
    use crate::packet::data_chunk::DataChunk;
    use crate::packet::error_causes::ErrorCause;
    use crate::packet::init_chunk::InitChunk;
    use crate::packet::sack_chunk::GapAckBlock;
    use crate::packet::sack_chunk::SackChunk;
    use crate::types::Ssn;
    use crate::types::Tsn;

    const VERIFICATION_TAG: u32 = 0x12345678;

    // INIT (outbound 1000, inbound 1000, initial TSN 1426601527) carrying ECN, Forward-TSN
    // Supported, Supported Extensions, Random, Requested HMAC Algorithm and Authenticated Chunk
    // list parameters. Checksum field 0xaa019d33.
    const INIT_CAPTURE: &[u8] = &[
        0x13, 0x88, 0x13, 0x88, 0x00, 0x00, 0x00, 0x00, 0xaa, 0x01, 0x9d, 0x33, 0x01, 0x00, 0x00,
        0x5a, 0x0e, 0xdd, 0xca, 0x08, 0x00, 0x02, 0x00, 0x00, 0x03, 0xe8, 0x03, 0xe8, 0x55, 0x08,
        0x36, 0x37, 0x80, 0x00, 0x00, 0x04, 0xc0, 0x00, 0x00, 0x04, 0x80, 0x08, 0x00, 0x09, 0xc0,
        0x0f, 0xc1, 0x80, 0x82, 0x00, 0x00, 0x00, 0x80, 0x02, 0x00, 0x24, 0xc5, 0xa8, 0x61, 0x55,
        0x09, 0x0e, 0x6f, 0x42, 0x00, 0x50, 0x63, 0x4c, 0xc8, 0xd6, 0xb9, 0x08, 0xdf, 0xd5, 0x3e,
        0x17, 0xc9, 0x9c, 0xb1, 0x43, 0x28, 0x4e, 0xaf, 0x64, 0x68, 0x2a, 0xc2, 0x97, 0x80, 0x04,
        0x00, 0x06, 0x00, 0x01, 0x00, 0x00, 0x80, 0x03, 0x00, 0x06, 0x80, 0xc1, 0x00, 0x00,
    ];

    // SACK (cum TSN 1426601536, a_rwnd 131072) with checksum field 0x2a81f531, which is wrong.
    const SACK_WITH_BAD_CHECKSUM: &[u8] = &[
        0x13, 0x88, 0x13, 0x88, 0x0e, 0xdd, 0xca, 0x08, 0x2a, 0x81, 0xf5, 0x31, 0x03, 0x00, 0x00,
        0x10, 0x55, 0x08, 0x36, 0x40, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    fn builder() -> SctpPacketBuilder {
        SctpPacketBuilder::new(VERIFICATION_TAG, 5000, 5001, 1500)
    }

    #[test]
    fn deserialize_init_from_capture() {
        let packet = SctpPacket::from_bytes(INIT_CAPTURE, &Options::default()).unwrap();
        assert_eq!(packet.common_header.source_port, 5000);
        assert_eq!(packet.common_header.destination_port, 5000);
        assert_eq!(packet.common_header.verification_tag, 0);
        assert_eq!(packet.common_header.checksum, 0xaa019d33);

        assert_eq!(packet.chunks.len(), 1);
        let Chunk::Init(init) = &packet.chunks[0] else { panic!() };
        assert_eq!(init.initiate_tag, 0x0eddca08);
        assert_eq!(init.initial_tsn, Tsn(1426601527));
        assert!(init.forward_tsn_supported());
    }

    #[test]
    fn deserialize_packet_with_two_chunks() {
        // COOKIE_ACK followed by SACK (cum TSN 2930332242, a_rwnd 131072), tag 0x697e3a4e.
        let bytes: &[u8] = &[
            0x04, 0xd2, 0x10, 0xe1, 0x69, 0x7e, 0x3a, 0x4e, 0xc0, 0x6e, 0x8b, 0x36, 0x0b, 0x00,
            0x00, 0x04, 0x03, 0x00, 0x00, 0x10, 0xae, 0xa9, 0x52, 0x52, 0x00, 0x02, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
        ];

        let packet = SctpPacket::from_bytes(bytes, &Options::default()).unwrap();
        assert_eq!(packet.common_header.source_port, 1234);
        assert_eq!(packet.common_header.destination_port, 4321);
        assert_eq!(packet.common_header.verification_tag, 0x697e3a4e);
        assert_eq!(packet.chunks.len(), 2);
        assert!(matches!(packet.chunks[0], Chunk::CookieAck(_)));
        let Chunk::Sack(sack) = &packet.chunks[1] else { panic!() };
        assert_eq!(sack.cumulative_tsn_ack, Tsn(2930332242));
        assert_eq!(sack.a_rwnd, 131072);
    }

    #[test]
    fn rejects_wrong_checksum() {
        assert_eq!(
            SctpPacket::from_bytes(SACK_WITH_BAD_CHECKSUM, &Options::default()).unwrap_err(),
            PacketParseError::InvalidChecksum
        );
    }

    #[test]
    fn checksum_verification_can_be_disabled() {
        let options = Options { disable_checksum_verification: true, ..Default::default() };
        let packet = SctpPacket::from_bytes(SACK_WITH_BAD_CHECKSUM, &options).unwrap();
        assert_eq!(packet.common_header.verification_tag, 0x0eddca08);
        assert_eq!(packet.common_header.checksum, 0x2a81f531);
    }

    #[test]
    fn peek_ignores_checksum() {
        let peek = SctpPacket::peek(SACK_WITH_BAD_CHECKSUM).unwrap();
        assert_eq!(peek.common_header.verification_tag, 0x0eddca08);
        assert_eq!(peek.chunk_types, vec![3]);
        assert!(SctpPacket::peek(&[0; 8]).is_none());
    }

    #[test]
    fn built_packet_has_valid_checksum() {
        let bytes = builder().add(&Chunk::Sack(SackChunk::default())).build();
        assert!(SctpPacket::from_bytes(&bytes, &Options::default()).is_ok());

        let mut corrupted = bytes.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0x40;
        assert_eq!(
            SctpPacket::from_bytes(&corrupted, &Options::default()).unwrap_err(),
            PacketParseError::InvalidChecksum
        );
    }

    #[test]
    fn serialize_and_deserialize_single_chunk() {
        let serialized = builder()
            .add(&Chunk::Init(InitChunk {
                initiate_tag: 123,
                a_rwnd: 456,
                nbr_outbound_streams: 65535,
                nbr_inbound_streams: 65534,
                initial_tsn: Tsn(789),
                parameters: vec![],
            }))
            .build();

        let packet = SctpPacket::from_bytes(&serialized, &Options::default()).unwrap();
        assert_eq!(packet.common_header.verification_tag, VERIFICATION_TAG);
        assert_eq!(packet.common_header.source_port, 5000);
        assert_eq!(packet.common_header.destination_port, 5001);
        let Chunk::Init(init) = &packet.chunks[0] else { panic!() };
        assert_eq!(init.initiate_tag, 123);
        assert_eq!(init.a_rwnd, 456);
        assert_eq!(init.nbr_outbound_streams, 65535);
        assert_eq!(init.nbr_inbound_streams, 65534);
        assert_eq!(init.initial_tsn, Tsn(789));
    }

    #[test]
    fn serialize_and_deserialize_three_chunks() {
        let mut b = builder();
        b.add(&Chunk::Sack(SackChunk {
            cumulative_tsn_ack: Tsn(999),
            a_rwnd: 456,
            gap_ack_blocks: vec![GapAckBlock::new(2, 3)],
            duplicate_tsns: vec![Tsn(1), Tsn(2), Tsn(3)],
        }));
        for (tsn, sid) in [(123, 456), (124, 654)] {
            b.add(&Chunk::Data(DataChunk {
                tsn: Tsn(tsn),
                data: Data {
                    stream_id: StreamId(sid),
                    ssn: Ssn(789),
                    ppid: PpId(9090),
                    payload: vec![1, 2, 3, 4, 5],
                    is_beginning: true,
                    is_end: true,
                    ..Default::default()
                },
            }));
        }
        let serialized = b.build();
        assert!(b.is_empty());

        let packet = SctpPacket::from_bytes(&serialized, &Options::default()).unwrap();
        assert_eq!(packet.chunks.len(), 3);
        let Chunk::Sack(sack) = &packet.chunks[0] else { panic!() };
        assert_eq!(sack.cumulative_tsn_ack, Tsn(999));
        let Chunk::Data(first) = &packet.chunks[1] else { panic!() };
        assert_eq!(first.tsn, Tsn(123));
        let Chunk::Data(second) = &packet.chunks[2] else { panic!() };
        assert_eq!(second.tsn, Tsn(124));
        assert_eq!(second.data.stream_id, StreamId(654));
    }

    #[test]
    fn parse_abort_with_empty_cause() {
        let bytes = builder()
            .add(&Chunk::Abort(AbortChunk {
                error_causes: vec![ErrorCause::UserInitiatedAbort(String::new())],
                ..Default::default()
            }))
            .build();

        let packet = SctpPacket::from_bytes(&bytes, &Options::default()).unwrap();
        let Chunk::Abort(abort) = &packet.chunks[0] else { panic!() };
        assert_eq!(abort.error_causes, vec![ErrorCause::UserInitiatedAbort(String::new())]);
    }

    #[test]
    fn detect_packet_with_zero_size_chunk() {
        let bytes: &[u8] = &[
            0xff, 0xff, 0xff, 0xff, 0xff, 0x0a, 0x0a, 0x0a, 0x5c, 0x0a, 0x0a, 0x0a, 0x0a, 0x0a,
            0x00, 0x00, 0x00,
        ];
        let options = Options { disable_checksum_verification: true, ..Default::default() };
        assert!(matches!(
            SctpPacket::from_bytes(bytes, &options),
            Err(PacketParseError::FailedParseChunk(_))
        ));
    }

    #[test]
    fn returns_correct_space_available_to_stay_within_mtu() {
        // Chunks are padded to 4 bytes, so the packet size limit is rounded down.
        const MTU: usize = 1191;
        const MAX_SIZE: usize = round_down_to_4!(MTU);

        let mut builder = SctpPacketBuilder::new(VERIFICATION_TAG, 1, 2, MTU);
        assert_eq!(builder.bytes_remaining(), MAX_SIZE - COMMON_HEADER_SIZE);

        let payload = vec![0; 183];
        builder.add(&Chunk::Data(DataChunk {
            tsn: Tsn(1),
            data: Data { payload: payload.clone(), ..Default::default() },
        }));
        let chunk1_size = round_up_to_4!(data_chunk::HEADER_SIZE + payload.len());
        assert_eq!(builder.bytes_remaining(), MAX_SIZE - COMMON_HEADER_SIZE - chunk1_size);
        assert_eq!(builder.bytes_remaining(), 976);

        let payload = vec![0; 957];
        builder.add(&Chunk::Data(DataChunk {
            tsn: Tsn(2),
            data: Data { payload, ..Default::default() },
        }));
        assert_eq!(builder.bytes_remaining(), 0);
    }
}
