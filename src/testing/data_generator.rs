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

use crate::api::PpId;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::types::Ssn;

/// Creates DATA payloads for one stream. `flags` is any combination of "B" (beginning) and "E"
/// (end); the stream sequence number of ordered data advances after every end fragment.
pub struct DataGenerator {
    stream_id: StreamId,
    ssn: Ssn,
}

impl DataGenerator {
    pub fn new(stream_id: StreamId) -> Self {
        DataGenerator { stream_id, ssn: Ssn(0) }
    }

    pub fn ordered(&mut self, payload: &str, flags: &str) -> Data {
        let data = self.make(payload, flags, false);
        if data.is_end {
            self.ssn += 1;
        }
        data
    }

    pub fn unordered(&mut self, payload: &str, flags: &str) -> Data {
        self.make(payload, flags, true)
    }

    fn make(&self, payload: &str, flags: &str, is_unordered: bool) -> Data {
        Data {
            stream_id: self.stream_id,
            ssn: if is_unordered { Ssn(0) } else { self.ssn },
            ppid: PpId(53),
            payload: payload.as_bytes().to_vec(),
            is_beginning: flags.contains('B'),
            is_end: flags.contains('E'),
            is_unordered,
        }
    }
}
