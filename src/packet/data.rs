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
use crate::queue::QueueEntry;
use crate::types::Ssn;

/// User data carried by one DATA chunk, without its TSN. The TSN is assigned only when the chunk
/// is first sent, and is kept alongside this structure by the queues holding it.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Data {
    pub stream_id: StreamId,
    /// Only meaningful for ordered data.
    pub ssn: Ssn,
    pub ppid: PpId,
    pub payload: Vec<u8>,
    pub is_beginning: bool,
    pub is_end: bool,
    pub is_unordered: bool,
}

impl Data {
    /// A message that was not fragmented.
    pub fn is_complete(&self) -> bool {
        self.is_beginning && self.is_end
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }
}

impl QueueEntry for Data {
    fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
