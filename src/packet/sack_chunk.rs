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
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::types::Tsn;
use anyhow::Error;
use anyhow::ensure;
use std::fmt;

pub(crate) const CHUNK_TYPE: u8 = 3;

// Cumulative TSN ack, a_rwnd and the two counters.
pub(crate) const FIXED_FIELDS_SIZE: usize = 12;

/// Selective Acknowledgement (SACK) chunk
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.4>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Type = 3    |  Chunk Flags  |         Chunk Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Cumulative TSN Ack                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Advertised Receiver Window Credit (a_rwnd)           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Number of Gap Ack Blocks = N  |  Number of Duplicate TSNs = M |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    Gap Ack Block #1 Start     |     Gap Ack Block #1 End      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                                                               /
/// \                              ...                              \
/// /                                                               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    Gap Ack Block #N Start     |     Gap Ack Block #N End      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Duplicate TSN 1                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                                                               /
/// \                              ...                              \
/// /                                                               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Duplicate TSN M                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Gap ack block offsets are relative to the cumulative TSN ack.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct GapAckBlock {
    pub start: u16,
    pub end: u16,
}

impl GapAckBlock {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// The absolute, inclusive TSN range this block covers.
    pub fn tsn_range(&self, cumulative_tsn_ack: Tsn) -> (Tsn, Tsn) {
        (cumulative_tsn_ack + self.start as u32, cumulative_tsn_ack + self.end as u32)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SackChunk {
    pub cumulative_tsn_ack: Tsn,
    pub a_rwnd: u32,
    pub gap_ack_blocks: Vec<GapAckBlock>,
    pub duplicate_tsns: Vec<Tsn>,
}

impl TryFrom<RawChunk<'_>> for SackChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        ensure!(raw.typ == CHUNK_TYPE, ChunkParseError::InvalidType);
        ensure!(raw.value.len() >= FIXED_FIELDS_SIZE, ChunkParseError::InvalidLength);

        let cumulative_tsn_ack = Tsn(read_u32_be!(&raw.value[0..4]));
        let a_rwnd = read_u32_be!(&raw.value[4..8]);
        let nbr_of_gap_blocks = read_u16_be!(&raw.value[8..10]) as usize;
        let nbr_of_dup_tsns = read_u16_be!(&raw.value[10..12]) as usize;
        let gap_blocks_end = FIXED_FIELDS_SIZE + nbr_of_gap_blocks * 4;
        ensure!(
            raw.value.len() == gap_blocks_end + nbr_of_dup_tsns * 4,
            ChunkParseError::InvalidLength
        );

        let gap_ack_blocks = raw.value[FIXED_FIELDS_SIZE..gap_blocks_end]
            .chunks_exact(4)
            .map(|c| GapAckBlock::new(read_u16_be!(&c[0..2]), read_u16_be!(&c[2..4])))
            .collect::<Vec<_>>();
        ensure!(
            gap_ack_blocks.iter().all(|b| b.start != 0 && b.start <= b.end),
            ChunkParseError::InvalidValue
        );
        let duplicate_tsns =
            raw.value[gap_blocks_end..].chunks_exact(4).map(|c| Tsn(read_u32_be!(c))).collect();

        Ok(Self { cumulative_tsn_ack, a_rwnd, gap_ack_blocks, duplicate_tsns })
    }
}

impl SerializableTlv for SackChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(CHUNK_TYPE, 0, self.value_size(), output);
        write_u32_be!(&mut value[0..4], self.cumulative_tsn_ack.0);
        write_u32_be!(&mut value[4..8], self.a_rwnd);
        write_u16_be!(&mut value[8..10], self.gap_ack_blocks.len() as u16);
        write_u16_be!(&mut value[10..12], self.duplicate_tsns.len() as u16);
        let gap_blocks_end = FIXED_FIELDS_SIZE + self.gap_ack_blocks.len() * 4;
        let gap_blocks_out = value[FIXED_FIELDS_SIZE..gap_blocks_end].chunks_exact_mut(4);
        for (block, out) in self.gap_ack_blocks.iter().zip(gap_blocks_out) {
            write_u16_be!(&mut out[0..2], block.start);
            write_u16_be!(&mut out[2..4], block.end);
        }
        let dup_tsns_out = value[gap_blocks_end..].chunks_exact_mut(4);
        for (dup_tsn, out) in self.duplicate_tsns.iter().zip(dup_tsns_out) {
            write_u32_be!(out, dup_tsn.0);
        }
    }

    fn value_size(&self) -> usize {
        FIXED_FIELDS_SIZE + self.gap_ack_blocks.len() * 4 + self.duplicate_tsns.len() * 4
    }
}

impl fmt::Display for SackChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SACK, cum_ack_tsn={}, a_rwnd={}", self.cumulative_tsn_ack, self.a_rwnd)?;
        for block in &self.gap_ack_blocks {
            let (start, end) = block.tsn_range(self.cumulative_tsn_ack);
            write!(f, ", gap={start}--{end}")?;
        }
        if !self.duplicate_tsns.is_empty() {
            write!(f, ", dup_tsns={}", self.duplicate_tsns.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_capture() {
        // SACK chunk (Cumulative TSN: 916312075, a_rwnd: 126323, gaps: 2, duplicate TSNs: 1)
        const BYTES: &[u8] = &[
            0x03, 0x00, 0x00, 0x1c, 0x36, 0x9d, 0xd0, 0x0b, 0x00, 0x01, 0xed, 0x73, 0x00, 0x02,
            0x00, 0x01, 0x00, 0x02, 0x00, 0x06, 0x00, 0x08, 0x00, 0x08, 0x36, 0x9d, 0xd0, 0x11,
        ];
        let c = SackChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap();
        let cum_ack_tsn = Tsn(916312075);
        assert_eq!(c.cumulative_tsn_ack, cum_ack_tsn);
        assert_eq!(c.a_rwnd, 126323);
        assert_eq!(c.gap_ack_blocks.len(), 2);
        assert_eq!(c.gap_ack_blocks[0].tsn_range(cum_ack_tsn), (Tsn(916312077), Tsn(916312081)));
        assert_eq!(c.gap_ack_blocks[1].tsn_range(cum_ack_tsn), (Tsn(916312083), Tsn(916312083)));
        assert_eq!(c.duplicate_tsns, vec![Tsn(916312081)]);
    }

    #[test]
    fn serialize_and_deserialize() {
        let chunk = SackChunk {
            cumulative_tsn_ack: Tsn(123),
            a_rwnd: 456,
            gap_ack_blocks: vec![GapAckBlock::new(2, 3)],
            duplicate_tsns: vec![Tsn(1), Tsn(2), Tsn(3)],
        };
        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);

        let deserialized =
            SackChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).unwrap();
        assert_eq!(deserialized, chunk);
        assert_eq!(
            deserialized.to_string(),
            "SACK, cum_ack_tsn=123, a_rwnd=456, gap=125--126, dup_tsns=3"
        );
    }

    #[test]
    fn rejects_inverted_gap_block() {
        let chunk = SackChunk {
            cumulative_tsn_ack: Tsn(123),
            a_rwnd: 456,
            gap_ack_blocks: vec![GapAckBlock::new(5, 3)],
            duplicate_tsns: vec![],
        };
        let mut serialized = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut serialized);
        assert!(SackChunk::try_from(RawChunk::from_bytes(&serialized).unwrap().0).is_err());
    }

    #[test]
    fn rejects_counts_not_matching_length() {
        const BYTES: &[u8] = &[
            0x03, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x10, 0x00, 0x00, 0x01,
            0x00, 0x00,
        ];
        assert!(SackChunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).is_err());
    }
}
