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

use crate::EventSink;
use crate::api::AppHandle;
use crate::api::Indication;
use crate::api::Options;
use crate::api::ReceivedMessage;
use crate::api::SctpEvent;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::packet::forward_tsn_chunk::SkippedStream;
use crate::rx::receive_stream::ReceiveStream;
use crate::types::Tsn;
use std::cell::RefCell;
use std::rc::Rc;

/// The receive buffer of an association: one [`ReceiveStream`] per negotiated inbound stream and
/// the accounting behind the advertised receiver window.
///
/// Completed messages are either handed to the application right away, or announced with a
/// notification and kept until the application asks for them, depending on
/// [`Options::deliver_immediately`]. Until read, they occupy the receive window.
pub(crate) struct ReassemblyQueue {
    log_prefix: String,
    handle: AppHandle,
    streams: Vec<ReceiveStream>,
    capacity: usize,
    sws_limit: usize,
    queued_bytes: usize,
    deliver_immediately: bool,
    /// Set when the last advertised window was closed (or held at 1 by SWS avoidance).
    window_was_small: bool,
    events: Rc<RefCell<dyn EventSink>>,
}

impl ReassemblyQueue {
    pub fn new(
        log_prefix: &str,
        handle: AppHandle,
        inbound_streams: u16,
        options: &Options,
        events: Rc<RefCell<dyn EventSink>>,
    ) -> Self {
        Self {
            log_prefix: log_prefix.to_string(),
            handle,
            streams: (0..inbound_streams).map(|id| ReceiveStream::new(StreamId(id))).collect(),
            capacity: options.local_rwnd as usize,
            sws_limit: options.sws_limit as usize,
            queued_bytes: 0,
            deliver_immediately: options.deliver_immediately,
            window_was_small: false,
            events,
        }
    }

    pub fn is_valid_stream(&self, stream_id: StreamId) -> bool {
        (stream_id.0 as usize) < self.streams.len()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    fn free_bytes(&self) -> usize {
        self.capacity.saturating_sub(self.queued_bytes)
    }

    /// Whether a fragment of `len` bytes fits without evicting anything.
    pub fn has_room_for(&self, len: usize) -> bool {
        self.free_bytes() >= len
    }

    /// The window to advertise. While the free space is below the silly window syndrome limit, a
    /// window of 1 is advertised, so that the sender doesn't trickle tiny chunks.
    pub fn a_rwnd(&mut self) -> u32 {
        let free = self.free_bytes();
        let a_rwnd = if free == 0 {
            0
        } else if free < self.sws_limit {
            1
        } else {
            free
        };
        self.window_was_small = a_rwnd <= 1;
        u32::try_from(a_rwnd).unwrap_or(u32::MAX)
    }

    /// Whether the window has opened up again after having been advertised as (almost) closed,
    /// in which case the peer should learn about it with a window update SACK.
    pub fn window_reopened(&self) -> bool {
        self.window_was_small && self.free_bytes() >= self.sws_limit.max(1)
    }

    fn update_stream<R>(&mut self, id: StreamId, f: impl FnOnce(&mut ReceiveStream) -> R) -> R {
        let stream = &mut self.streams[id.0 as usize];
        let before = stream.queued_bytes();
        let result = f(stream);
        self.queued_bytes = self.queued_bytes - before + stream.queued_bytes();
        result
    }

    /// Adds a newly received fragment. The caller has checked that the stream is valid and that
    /// the TSN has not been received before.
    pub fn add(&mut self, tsn: Tsn, data: Data) {
        debug_assert!(self.is_valid_stream(data.stream_id));
        let stream_id = data.stream_id;
        let ready = self.update_stream(stream_id, |s| s.enqueue_new_data_chunk(tsn, data));
        self.deliver(stream_id, ready);
    }

    fn deliver(&mut self, stream_id: StreamId, ready: usize) {
        if ready == 0 {
            return;
        }
        if self.deliver_immediately {
            for _ in 0..ready {
                if let Some(message) = self.update_stream(stream_id, |s| s.pop_delivery()) {
                    self.emit(Indication::Data(message));
                }
            }
            return;
        }
        let notifications: Vec<Indication> = self.streams[stream_id.0 as usize]
            .delivery_queue()
            .iter()
            .rev()
            .take(ready)
            .map(|m| Indication::DataNotification {
                stream_id: m.stream_id,
                ssn: m.ssn,
                tsn: m.tsn,
                length: m.payload.len(),
            })
            .collect();
        for notification in notifications.into_iter().rev() {
            self.emit(notification);
        }
    }

    fn emit(&self, indication: Indication) {
        self.events.borrow_mut().add(SctpEvent::Indication(self.handle, indication));
    }

    /// Pulls the next reassembled message of a stream, in response to an application read.
    pub fn receive(&mut self, stream_id: StreamId) -> Option<ReceivedMessage> {
        if !self.is_valid_stream(stream_id) {
            return None;
        }
        self.update_stream(stream_id, |s| s.pop_delivery())
    }

    /// Abandons data as instructed by a FORWARD-TSN chunk. Unordered fragments up to
    /// `new_cumulative_tsn` are dropped on every stream, ordered ones up to the SSN given for
    /// their stream.
    pub fn handle_forward_tsn(&mut self, new_cumulative_tsn: Tsn, skipped: &[SkippedStream]) {
        for id in 0..self.streams.len() {
            let stream_id = self.streams[id].stream_id();
            let ssn = skipped.iter().find(|s| s.stream_id == stream_id).map(|s| s.ssn);
            let ready = self.update_stream(stream_id, |s| s.skip_to_ssn(ssn, new_cumulative_tsn));
            self.deliver(stream_id, ready);
        }
    }

    /// Tries to free `needed` bytes for a fragment with `tsn`, by dropping incomplete fragments
    /// with higher TSNs, highest first. Fragments at or below `cumulative_tsn` are never dropped,
    /// and neither are reassembled messages. Nothing is dropped unless enough room can be made.
    ///
    /// Returns the dropped TSNs, which the caller must forget having received.
    pub fn make_room_for_tsn(
        &mut self,
        tsn: Tsn,
        needed: usize,
        cumulative_tsn: Tsn,
    ) -> Option<Vec<Tsn>> {
        let floor = tsn.max(cumulative_tsn);
        let mut candidates: Vec<(Tsn, StreamId, usize)> = Vec::new();
        let mut free = self.free_bytes();
        let mut scratch: Vec<(StreamId, Vec<(Tsn, usize)>)> = self
            .streams
            .iter()
            .filter(|s| s.highest_fragment_tsn().is_some_and(|t| t > floor))
            .map(|s| (s.stream_id(), s.fragments_above(floor)))
            .collect();

        while free < needed {
            // Pick the highest TSN across all streams.
            let best = scratch
                .iter_mut()
                .filter(|(_, f)| !f.is_empty())
                .max_by_key(|(_, f)| f.last().map(|(t, _)| *t))?;
            let (stream_id, fragments) = best;
            let (evict_tsn, len) = fragments.pop()?;
            candidates.push((evict_tsn, *stream_id, len));
            free += len;
        }

        for (evict_tsn, stream_id, _) in &candidates {
            self.update_stream(*stream_id, |s| s.remove_fragment(*evict_tsn));
        }
        if !candidates.is_empty() {
            log::debug!(
                "{}Evicted {} fragments to make room for tsn={}",
                self.log_prefix,
                candidates.len(),
                tsn
            );
        }
        Some(candidates.into_iter().map(|(t, _, _)| t).collect())
    }
}
