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

use crate::api::ReceivedMessage;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::queue::Queue;
use crate::queue::QueueEntry;
use crate::types::Ssn;
use crate::types::Tsn;
use std::collections::BTreeMap;
use std::collections::VecDeque;

impl QueueEntry for ReceivedMessage {
    fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Receive side of one inbound stream.
///
/// Fragments wait in a reassembly queue (one for ordered and one for unordered data) until a
/// contiguous run of TSNs from a beginning fragment to an end fragment is present. Reassembled
/// unordered messages go straight to the delivery queue. Reassembled ordered messages wait until
/// their SSN is the expected one.
pub(crate) struct ReceiveStream {
    stream_id: StreamId,
    expected_ssn: Ssn,
    ordered: Queue<Tsn, Data>,
    unordered: Queue<Tsn, Data>,
    /// Reassembled ordered messages waiting for earlier SSNs.
    ordered_ready: BTreeMap<Ssn, ReceivedMessage>,
    ordered_ready_bytes: usize,
    delivery: VecDeque<ReceivedMessage>,
    delivery_bytes: usize,
}

impl ReceiveStream {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            expected_ssn: Ssn(0),
            ordered: Queue::new(),
            unordered: Queue::new(),
            ordered_ready: BTreeMap::new(),
            ordered_ready_bytes: 0,
            delivery: VecDeque::new(),
            delivery_bytes: 0,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn expected_ssn(&self) -> Ssn {
        self.expected_ssn
    }

    /// Bytes held by this stream, whether still in fragments or reassembled and not yet read.
    pub fn queued_bytes(&self) -> usize {
        self.ordered.num_bytes()
            + self.unordered.num_bytes()
            + self.ordered_ready_bytes
            + self.delivery_bytes
    }

    pub fn delivery_queue(&self) -> &VecDeque<ReceivedMessage> {
        &self.delivery
    }

    /// Takes a newly received fragment. Returns the number of messages that became deliverable as
    /// a result, which are at the end of [`ReceiveStream::delivery_queue`].
    pub fn enqueue_new_data_chunk(&mut self, tsn: Tsn, data: Data) -> usize {
        debug_assert_eq!(data.stream_id, self.stream_id);
        if !data.is_unordered && data.ssn < self.expected_ssn {
            log::debug!("Dropping fragment of already delivered ssn={} tsn={}", data.ssn, tsn);
            return 0;
        }

        if data.is_complete() {
            return self.put_in_delivery_q(Self::message_from(tsn, data));
        }

        let is_unordered = data.is_unordered;
        let queue = if is_unordered { &mut self.unordered } else { &mut self.ordered };
        if !queue.check_and_insert(tsn, data) {
            return 0;
        }
        match Self::reassemble(queue, tsn) {
            Some(message) => self.put_in_delivery_q(message),
            None => 0,
        }
    }

    fn message_from(tsn: Tsn, data: Data) -> ReceivedMessage {
        ReceivedMessage {
            stream_id: data.stream_id,
            ssn: data.ssn.0,
            ppid: data.ppid,
            tsn: tsn.0,
            unordered: data.is_unordered,
            payload: data.payload,
        }
    }

    /// Looks backwards from `tsn` for the beginning fragment and forwards for the end fragment,
    /// requiring every TSN in between to be present. If both are found, the fragments are removed
    /// and concatenated in TSN order.
    fn reassemble(queue: &mut Queue<Tsn, Data>, tsn: Tsn) -> Option<ReceivedMessage> {
        let mut first = tsn;
        while !queue.get(&first)?.is_beginning {
            first -= 1;
        }
        let mut last = tsn;
        while !queue.get(&last)?.is_end {
            last += 1;
        }

        let mut message = Self::message_from(first, queue.get_and_extract(&first)?);
        let mut fragment = first;
        while fragment != last {
            fragment += 1;
            let mut data = queue.get_and_extract(&fragment)?;
            message.payload.append(&mut data.payload);
        }
        Some(message)
    }

    /// Hands a reassembled message to the delivery queue, respecting the SSN order of ordered
    /// messages. Returns the number of messages moved to the delivery queue.
    pub fn put_in_delivery_q(&mut self, message: ReceivedMessage) -> usize {
        if message.unordered {
            self.push_delivery(message);
            return 1;
        }
        let ssn = Ssn(message.ssn);
        if ssn != self.expected_ssn {
            self.ordered_ready_bytes += message.payload.len();
            if let Some(old) = self.ordered_ready.insert(ssn, message) {
                self.ordered_ready_bytes -= old.payload.len();
            }
            return 0;
        }
        self.push_delivery(message);
        self.expected_ssn += 1;
        1 + self.release_ordered_ready()
    }

    fn push_delivery(&mut self, message: ReceivedMessage) {
        self.delivery_bytes += message.payload_size();
        self.delivery.push_back(message);
    }

    fn release_ordered_ready(&mut self) -> usize {
        let mut released = 0;
        while let Some(message) = self.ordered_ready.remove(&self.expected_ssn) {
            self.ordered_ready_bytes -= message.payload.len();
            self.push_delivery(message);
            self.expected_ssn += 1;
            released += 1;
        }
        released
    }

    pub fn pop_delivery(&mut self) -> Option<ReceivedMessage> {
        let message = self.delivery.pop_front()?;
        self.delivery_bytes -= message.payload_size();
        Some(message)
    }

    /// Abandons everything up to `ssn` for ordered data and up to `cumulative_tsn` for unordered
    /// data, as the sender requested with FORWARD-TSN. Returns the number of messages that became
    /// deliverable.
    pub fn skip_to_ssn(&mut self, ssn: Option<Ssn>, cumulative_tsn: Tsn) -> usize {
        self.unordered.extract_if(|tsn, _| *tsn <= cumulative_tsn);
        self.ordered.extract_if(|tsn, _| *tsn <= cumulative_tsn);

        let Some(ssn) = ssn else {
            return 0;
        };
        self.ordered.extract_if(|_, data| data.ssn <= ssn);
        let stale: Vec<Ssn> = self.ordered_ready.range(..=ssn).map(|(s, _)| *s).collect();
        for s in stale {
            if let Some(m) = self.ordered_ready.remove(&s) {
                self.ordered_ready_bytes -= m.payload.len();
            }
        }
        if ssn >= self.expected_ssn {
            self.expected_ssn = ssn + 1;
        }
        self.release_ordered_ready()
    }

    /// The highest TSN held as an incomplete fragment.
    pub fn highest_fragment_tsn(&self) -> Option<Tsn> {
        match (self.ordered.last_key(), self.unordered.last_key()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Incomplete fragments with a TSN above `floor` and their sizes, lowest TSN first.
    pub fn fragments_above(&self, floor: Tsn) -> Vec<(Tsn, usize)> {
        let mut fragments: Vec<(Tsn, usize)> = self
            .ordered
            .iter()
            .chain(self.unordered.iter())
            .filter(|(tsn, _)| **tsn > floor)
            .map(|(tsn, data)| (*tsn, data.payload.len()))
            .collect();
        fragments.sort_by_key(|(tsn, _)| *tsn);
        fragments
    }

    /// Drops an incomplete fragment, returning the number of bytes released.
    pub fn remove_fragment(&mut self, tsn: Tsn) -> usize {
        [&mut self.ordered, &mut self.unordered]
            .into_iter()
            .find_map(|q| q.get_and_extract(&tsn))
            .map_or(0, |data| data.payload.len())
    }

    pub fn has_unassembled_fragments(&self) -> bool {
        !self.ordered.is_empty() || !self.unordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::data_generator::DataGenerator;

    const STREAM: StreamId = StreamId(1);

    fn payloads(stream: &mut ReceiveStream) -> Vec<String> {
        std::iter::from_fn(|| stream.pop_delivery())
            .map(|m| String::from_utf8(m.payload).unwrap())
            .collect()
    }

    #[test]
    fn single_fragment_is_delivered_directly() {
        let mut gen = DataGenerator::new(STREAM);
        let mut s = ReceiveStream::new(STREAM);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(10), gen.ordered("abc", "BE")), 1);
        assert_eq!(s.queued_bytes(), 3);
        let m = s.pop_delivery().unwrap();
        assert_eq!(m.tsn, 10);
        assert_eq!(m.ssn, 0);
        assert_eq!(s.queued_bytes(), 0);
        assert_eq!(s.expected_ssn(), Ssn(1));
    }

    #[test]
    fn reassembles_in_any_order() {
        use itertools::Itertools;
        for order in [10_u32, 11, 12].into_iter().permutations(3) {
            let mut gen = DataGenerator::new(STREAM);
            let fragments = [gen.ordered("ab", "B"), gen.ordered("cde", ""), gen.ordered("f", "E")];
            let mut s = ReceiveStream::new(STREAM);
            let mut delivered = 0;
            for tsn in &order {
                let data = fragments[(*tsn - 10) as usize].clone();
                delivered += s.enqueue_new_data_chunk(Tsn(*tsn), data);
            }
            assert_eq!(delivered, 1, "order {order:?}");
            let m = s.pop_delivery().unwrap();
            assert_eq!(m.payload, b"abcdef");
            assert_eq!(m.tsn, 10);
            assert!(!s.has_unassembled_fragments());
            assert_eq!(s.queued_bytes(), 0);
        }
    }

    #[test]
    fn ordered_messages_wait_for_earlier_ssn() {
        let mut gen = DataGenerator::new(STREAM);
        let first = gen.ordered("1", "BE");
        let second = gen.ordered("2", "BE");
        let third = gen.ordered("3", "BE");

        let mut s = ReceiveStream::new(STREAM);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(12), third), 0);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(11), second), 0);
        assert_eq!(s.queued_bytes(), 2);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(10), first), 3);
        assert_eq!(payloads(&mut s), ["1", "2", "3"]);
    }

    #[test]
    fn unordered_bypasses_ssn_gate() {
        let mut gen = DataGenerator::new(STREAM);
        let _lost = gen.ordered("lost", "BE");
        let mut s = ReceiveStream::new(STREAM);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(11), gen.ordered("ordered", "BE")), 0);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(12), gen.unordered("x", "B")), 0);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(13), gen.unordered("y", "E")), 1);
        assert_eq!(payloads(&mut s), ["xy"]);
    }

    #[test]
    fn interleaved_streams_do_not_mix() {
        let mut gen = DataGenerator::new(STREAM);
        let mut s = ReceiveStream::new(STREAM);
        // TSN 11 belongs to another stream, so 10 and 12 are not contiguous here.
        assert_eq!(s.enqueue_new_data_chunk(Tsn(10), gen.unordered("a", "B")), 0);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(12), gen.unordered("b", "E")), 0);
        assert!(s.has_unassembled_fragments());
        assert_eq!(s.highest_fragment_tsn(), Some(Tsn(12)));
    }

    #[test]
    fn skip_to_ssn_releases_waiting_messages() {
        let mut gen = DataGenerator::new(STREAM);
        let partial = gen.ordered("p", "B");
        let mut s = ReceiveStream::new(STREAM);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(10), partial), 0);
        let mut next = gen.ordered("n", "BE");
        next.ssn = Ssn(1);
        assert_eq!(s.enqueue_new_data_chunk(Tsn(13), next), 0);

        // The sender abandoned ssn 0 (TSNs 10 to 12).
        assert_eq!(s.skip_to_ssn(Some(Ssn(0)), Tsn(12)), 1);
        assert_eq!(payloads(&mut s), ["n"]);
        assert!(!s.has_unassembled_fragments());
        assert_eq!(s.expected_ssn(), Ssn(2));
        assert_eq!(s.queued_bytes(), 0);
    }

    #[test]
    fn late_fragments_of_skipped_messages_are_dropped() {
        let mut gen = DataGenerator::new(STREAM);
        let mut s = ReceiveStream::new(STREAM);
        s.skip_to_ssn(Some(Ssn(3)), Tsn(20));
        assert_eq!(s.enqueue_new_data_chunk(Tsn(21), gen.ordered("old", "BE")), 0);
        assert_eq!(s.queued_bytes(), 0);
    }

    #[test]
    fn fragments_can_be_removed() {
        let mut gen = DataGenerator::new(STREAM);
        let mut s = ReceiveStream::new(STREAM);
        s.enqueue_new_data_chunk(Tsn(10), gen.ordered("abcd", "B"));
        s.enqueue_new_data_chunk(Tsn(11), gen.ordered("ef", ""));
        assert_eq!(s.highest_fragment_tsn(), Some(Tsn(11)));
        assert_eq!(s.remove_fragment(Tsn(11)), 2);
        assert_eq!(s.remove_fragment(Tsn(11)), 0);
        assert_eq!(s.highest_fragment_tsn(), Some(Tsn(10)));
        assert_eq!(s.fragments_above(Tsn(9)), vec![(Tsn(10), 4)]);
        assert!(s.fragments_above(Tsn(10)).is_empty());
        assert_eq!(s.queued_bytes(), 4);
    }
}
