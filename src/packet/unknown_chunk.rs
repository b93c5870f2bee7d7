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

use crate::packet::SerializableTlv;
use crate::packet::chunk::RawChunk;
use crate::packet::chunk::write_chunk_header;
use anyhow::Error;
use std::fmt;

/// A chunk of a type that isn't understood. What to do with it is encoded in the two highest bits
/// of its type, see <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2-3.2.1>.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct UnknownChunk {
    pub typ: u8,
    pub flags: u8,
    pub value: Vec<u8>,
}

impl UnknownChunk {
    /// Whether the rest of the packet should still be processed.
    pub fn skip_and_continue(&self) -> bool {
        self.typ & 0x80 != 0
    }

    /// Whether the sender wants an "Unrecognized Chunk Type" error back.
    pub fn report(&self) -> bool {
        self.typ & 0x40 != 0
    }

    /// The chunk as it was received, for echoing back in an error cause.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0; self.serialized_size()];
        self.serialize_to(&mut out);
        out
    }
}

impl TryFrom<RawChunk<'_>> for UnknownChunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        Ok(Self { typ: raw.typ, flags: raw.flags, value: raw.value.to_vec() })
    }
}

impl SerializableTlv for UnknownChunk {
    fn serialize_to(&self, output: &mut [u8]) {
        let value = write_chunk_header(self.typ, self.flags, self.value_size(), output);
        value.copy_from_slice(&self.value)
    }

    fn value_size(&self) -> usize {
        self.value.len()
    }
}

impl fmt::Display for UnknownChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown chunk, type={}", self.typ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_bits() {
        let chunk = |typ| UnknownChunk { typ, flags: 0, value: vec![] };
        assert!(!chunk(0x3f).skip_and_continue() && !chunk(0x3f).report());
        assert!(!chunk(0x4f).skip_and_continue() && chunk(0x4f).report());
        assert!(chunk(0x8f).skip_and_continue() && !chunk(0x8f).report());
        assert!(chunk(0xcf).skip_and_continue() && chunk(0xcf).report());
        assert_eq!(chunk(0x4f).to_bytes(), vec![0x4f, 0, 0, 4]);
    }
}
