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

use crate::api::Message;
use crate::api::SctpTime;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::tx::send_queue::DataToSend;
use crate::types::OutgoingMessageId;
use crate::types::Ssn;
use std::collections::VecDeque;

/// A message waiting in a send stream, possibly partially sent.
pub(crate) struct OutgoingMessage {
    pub message_id: OutgoingMessageId,
    pub message: Message,
    pub unordered: bool,
    pub enqueued_at: SctpTime,
    pub expires_at: Option<SctpTime>,
    pub max_retransmissions: Option<u16>,

    /// How much of the payload has already been handed out as fragments.
    offset: usize,

    /// Assigned when the first fragment is produced.
    ssn: Option<Ssn>,
}

impl OutgoingMessage {
    pub fn new(
        message_id: OutgoingMessageId,
        message: Message,
        unordered: bool,
        enqueued_at: SctpTime,
    ) -> Self {
        Self {
            message_id,
            message,
            unordered,
            enqueued_at,
            expires_at: None,
            max_retransmissions: None,
            offset: 0,
            ssn: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.message.payload.len() - self.offset
    }

    pub fn is_started(&self) -> bool {
        self.offset > 0
    }

    fn has_expired(&self, now: SctpTime) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// The outgoing side of one stream: an ordered and an unordered FIFO and the stream sequence
/// number counter of ordered messages.
///
/// A message that has started to be fragmented is always finished before any other message of
/// the same stream is started, so that fragments of two messages never interleave within a stream.
pub(crate) struct SendStream {
    stream_id: StreamId,
    priority: u16,
    next_ssn: Ssn,
    ordered: VecDeque<OutgoingMessage>,
    unordered: VecDeque<OutgoingMessage>,
    queued_bytes: usize,
    bytes_sent: u64,
}

impl SendStream {
    pub fn new(stream_id: StreamId, priority: u16) -> Self {
        Self {
            stream_id,
            priority,
            next_ssn: Ssn(0),
            ordered: VecDeque::new(),
            unordered: VecDeque::new(),
            queued_bytes: 0,
            bytes_sent: 0,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn next_ssn(&self) -> Ssn {
        self.next_ssn
    }

    /// Payload bytes not yet handed out as fragments.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Payload bytes handed out as fragments so far, used by fair bandwidth scheduling.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn has_data(&self) -> bool {
        !self.ordered.is_empty() || !self.unordered.is_empty()
    }

    pub fn push(&mut self, message: OutgoingMessage) {
        self.queued_bytes += message.remaining();
        if message.unordered {
            self.unordered.push_back(message);
        } else {
            self.ordered.push_back(message);
        }
    }

    /// The queue the next fragment is taken from: a started message first, otherwise unordered
    /// messages before ordered ones.
    fn head_queue(&mut self) -> Option<&mut VecDeque<OutgoingMessage>> {
        let unordered_started = self.unordered.front().is_some_and(|m| m.is_started());
        let ordered_started = self.ordered.front().is_some_and(|m| m.is_started());
        if unordered_started {
            Some(&mut self.unordered)
        } else if ordered_started || self.unordered.is_empty() {
            (!self.ordered.is_empty()).then_some(&mut self.ordered)
        } else {
            Some(&mut self.unordered)
        }
    }

    pub fn head(&self) -> Option<&OutgoingMessage> {
        let unordered_started = self.unordered.front().is_some_and(|m| m.is_started());
        let ordered_started = self.ordered.front().is_some_and(|m| m.is_started());
        if unordered_started || (!ordered_started && !self.unordered.is_empty()) {
            self.unordered.front()
        } else {
            self.ordered.front()
        }
    }

    /// Produces the next fragment of at most `max_payload` bytes.
    pub fn produce(&mut self, max_payload: usize) -> Option<DataToSend> {
        if max_payload == 0 {
            return None;
        }
        let stream_id = self.stream_id;
        let mut next_ssn = self.next_ssn;
        let queue = self.head_queue()?;
        let message = queue.front_mut()?;

        let ssn = match (message.unordered, message.ssn) {
            (true, _) => Ssn(0),
            (false, Some(ssn)) => ssn,
            (false, None) => {
                let ssn = next_ssn;
                next_ssn += 1;
                message.ssn = Some(ssn);
                ssn
            }
        };

        let size = message.remaining().min(max_payload);
        let start = message.offset;
        let is_beginning = start == 0;
        let is_end = size == message.remaining();
        message.offset += size;

        let data = Data {
            stream_id,
            ssn,
            ppid: message.message.ppid,
            payload: message.message.payload[start..start + size].to_vec(),
            is_beginning,
            is_end,
            is_unordered: message.unordered,
        };
        let to_send = DataToSend {
            message_id: message.message_id,
            data,
            expires_at: message.expires_at,
            max_retransmissions: message.max_retransmissions,
        };
        if is_end {
            queue.pop_front();
        }

        self.next_ssn = next_ssn;
        self.queued_bytes -= size;
        self.bytes_sent += size as u64;
        Some(to_send)
    }

    /// Removes messages whose lifetime has passed before any of their fragments were produced.
    pub fn expire(&mut self, now: SctpTime) -> Vec<OutgoingMessage> {
        let mut expired = Vec::new();
        for queue in [&mut self.ordered, &mut self.unordered] {
            let mut kept = VecDeque::with_capacity(queue.len());
            for message in queue.drain(..) {
                if !message.is_started() && message.has_expired(now) {
                    expired.push(message);
                } else {
                    kept.push_back(message);
                }
            }
            *queue = kept;
        }
        self.queued_bytes -= expired.iter().map(|m| m.remaining()).sum::<usize>();
        expired
    }

    /// Removes what's left of a message, started or not. Returns the number of bytes dropped.
    pub fn discard(&mut self, message_id: OutgoingMessageId) -> Option<usize> {
        for queue in [&mut self.ordered, &mut self.unordered] {
            if let Some(pos) = queue.iter().position(|m| m.message_id == message_id) {
                let message = queue.remove(pos)?;
                self.queued_bytes -= message.remaining();
                return Some(message.remaining());
            }
        }
        None
    }

    /// Drops everything, returning the number of bytes dropped.
    pub fn clear(&mut self) -> usize {
        self.ordered.clear();
        self.unordered.clear();
        std::mem::take(&mut self.queued_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PpId;

    const SID: StreamId = StreamId(1);

    fn message(id: u64, len: usize, unordered: bool) -> OutgoingMessage {
        OutgoingMessage::new(
            OutgoingMessageId(id),
            Message::new(SID, PpId(53), vec![id as u8; len]),
            unordered,
            SctpTime::zero(),
        )
    }

    #[test]
    fn produces_whole_small_message() {
        let mut s = SendStream::new(SID, 0);
        s.push(message(1, 10, false));
        assert_eq!(s.queued_bytes(), 10);

        let d = s.produce(100).unwrap();
        assert!(d.data.is_beginning && d.data.is_end);
        assert_eq!(d.data.ssn, Ssn(0));
        assert_eq!(d.data.payload.len(), 10);
        assert_eq!(s.queued_bytes(), 0);
        assert_eq!(s.bytes_sent(), 10);
        assert!(!s.has_data());
        assert!(s.produce(100).is_none());
    }

    #[test]
    fn fragments_share_one_ssn() {
        let mut s = SendStream::new(SID, 0);
        s.push(message(1, 25, false));
        s.push(message(2, 5, false));

        let f1 = s.produce(10).unwrap();
        let f2 = s.produce(10).unwrap();
        let f3 = s.produce(10).unwrap();
        assert!(f1.data.is_beginning && !f1.data.is_end);
        assert!(!f2.data.is_beginning && !f2.data.is_end);
        assert!(!f3.data.is_beginning && f3.data.is_end);
        assert_eq!(f3.data.payload.len(), 5);
        assert!([&f1, &f2, &f3].iter().all(|f| f.data.ssn == Ssn(0)));

        let next = s.produce(10).unwrap();
        assert_eq!(next.data.ssn, Ssn(1));
        assert_eq!(s.next_ssn(), Ssn(2));
    }

    #[test]
    fn unordered_messages_go_first_but_never_interrupt_a_started_one() {
        let mut s = SendStream::new(SID, 0);
        s.push(message(1, 20, false));
        let first = s.produce(10).unwrap();
        assert_eq!(first.message_id, OutgoingMessageId(1));

        s.push(message(2, 5, true));
        assert_eq!(s.produce(10).unwrap().message_id, OutgoingMessageId(1));

        let unordered = s.produce(10).unwrap();
        assert_eq!(unordered.message_id, OutgoingMessageId(2));
        assert!(unordered.data.is_unordered);
        assert_eq!(unordered.data.ssn, Ssn(0));
        assert_eq!(s.next_ssn(), Ssn(1));
    }

    #[test]
    fn expires_only_unstarted_messages() {
        let mut s = SendStream::new(SID, 0);
        let mut m1 = message(1, 20, false);
        m1.expires_at = Some(SctpTime::from_millis(100));
        let mut m2 = message(2, 30, false);
        m2.expires_at = Some(SctpTime::from_millis(100));
        s.push(m1);
        s.push(m2);
        s.produce(10).unwrap();

        let expired = s.expire(SctpTime::from_millis(100));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].message_id, OutgoingMessageId(2));
        assert_eq!(s.queued_bytes(), 10);
    }

    #[test]
    fn expired_message_does_not_consume_an_ssn() {
        let mut s = SendStream::new(SID, 0);
        let mut m1 = message(1, 20, false);
        m1.expires_at = Some(SctpTime::from_millis(100));
        s.push(m1);
        s.push(message(2, 20, false));
        assert_eq!(s.expire(SctpTime::from_millis(200)).len(), 1);
        assert_eq!(s.produce(100).unwrap().data.ssn, Ssn(0));
    }

    #[test]
    fn discards_started_message() {
        let mut s = SendStream::new(SID, 0);
        s.push(message(1, 20, false));
        s.push(message(2, 7, false));
        s.produce(10).unwrap();
        assert_eq!(s.discard(OutgoingMessageId(1)), Some(10));
        assert_eq!(s.discard(OutgoingMessageId(1)), None);
        assert_eq!(s.queued_bytes(), 7);
        assert_eq!(s.head().map(|m| m.message_id), Some(OutgoingMessageId(2)));
        assert_eq!(s.clear(), 7);
        assert!(!s.has_data());
    }
}
