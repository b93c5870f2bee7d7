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
use crate::api::Message;
use crate::api::Options;
use crate::api::SctpEvent;
use crate::api::SctpTime;
use crate::api::SendOptions;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::tx::send_stream::OutgoingMessage;
use crate::tx::send_stream::SendStream;
use crate::tx::stream_scheduler::PathView;
use crate::tx::stream_scheduler::StreamCandidate;
use crate::tx::stream_scheduler::StreamScheduler;
use crate::types::OutgoingMessageId;
use std::cell::RefCell;
use std::rc::Rc;

#[cfg(not(test))]
use log::debug;
#[cfg(test)]
use std::println as debug;

/// A fragment produced by the send queue, not yet assigned a TSN.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DataToSend {
    pub message_id: OutgoingMessageId,
    pub data: Data,
    pub expires_at: Option<SctpTime>,
    pub max_retransmissions: Option<u16>,
}

/// Messages accepted from the application and not yet fragmented into DATA chunks.
///
/// Messages are split into fragments when they are dequeued, sized to what fits in the packet
/// being built. The queue limit is soft: a message is always accepted, but the application is told
/// with [`Indication::SendQueueFull`] when the queue goes above the limit and with
/// [`Indication::SendQueueAbated`] when it goes below it again.
pub(crate) struct SendQueue {
    log_prefix: String,
    handle: AppHandle,
    streams: Vec<SendStream>,
    scheduler: StreamScheduler,
    limit: usize,
    queued_bytes: usize,
    full: bool,
    next_message_id: OutgoingMessageId,
    events: Rc<RefCell<dyn EventSink>>,
}

impl SendQueue {
    pub fn new(
        log_prefix: &str,
        handle: AppHandle,
        stream_count: u16,
        options: &Options,
        scheduler_seed: u64,
        events: Rc<RefCell<dyn EventSink>>,
    ) -> Self {
        let streams = (0..stream_count)
            .map(|id| {
                let stream_id = StreamId(id);
                let priority = options
                    .stream_priorities
                    .iter()
                    .find(|(sid, _)| *sid == stream_id)
                    .map_or(0, |(_, p)| *p);
                SendStream::new(stream_id, priority)
            })
            .collect();
        Self {
            log_prefix: log_prefix.to_string(),
            handle,
            streams,
            scheduler: StreamScheduler::new(options, scheduler_seed),
            limit: options.send_queue_limit,
            queued_bytes: 0,
            full: false,
            next_message_id: OutgoingMessageId(0),
            events,
        }
    }

    pub fn stream_count(&self) -> u16 {
        self.streams.len() as u16
    }

    /// Payload bytes accepted but not yet fragmented.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.queued_bytes == 0
    }

    /// Enqueues a message. The caller has validated the stream id and that the payload is not
    /// empty.
    pub fn add(&mut self, now: SctpTime, message: Message, options: &SendOptions) {
        let Some(stream) = self.streams.get_mut(message.stream_id.0 as usize) else {
            return;
        };
        let message_id = self.next_message_id;
        self.next_message_id = OutgoingMessageId(message_id.0 + 1);

        let len = message.payload.len();
        let mut outgoing = OutgoingMessage::new(message_id, message, options.unordered, now);
        outgoing.expires_at = options.lifetime.map(|lifetime| now + lifetime);
        outgoing.max_retransmissions = options.max_retransmissions;
        stream.push(outgoing);
        self.queued_bytes += len;

        if self.limit > 0 && !self.full && self.queued_bytes >= self.limit {
            self.full = true;
            debug!("{}send queue full at {} bytes", self.log_prefix, self.queued_bytes);
            self.events.borrow_mut().add(SctpEvent::Indication(
                self.handle,
                Indication::SendQueueFull { queued_bytes: self.queued_bytes },
            ));
        }
    }

    fn release(&mut self, bytes: usize) {
        self.queued_bytes -= bytes;
        if self.full && self.queued_bytes < self.limit {
            self.full = false;
            debug!("{}send queue abated at {} bytes", self.log_prefix, self.queued_bytes);
            self.events.borrow_mut().add(SctpEvent::Indication(
                self.handle,
                Indication::SendQueueAbated { queued_bytes: self.queued_bytes },
            ));
        }
    }

    fn candidates(&self) -> Vec<StreamCandidate> {
        self.streams
            .iter()
            .filter_map(|s| {
                s.head().map(|head| StreamCandidate {
                    stream_id: s.stream_id(),
                    priority: s.priority(),
                    bytes_sent: s.bytes_sent(),
                    head_enqueued_at: head.enqueued_at,
                })
            })
            .collect()
    }

    /// Must be called before filling a new packet, for the per-packet schedulers.
    pub fn begin_packet(&mut self) {
        self.scheduler.begin_packet();
    }

    /// Drops unsent messages whose lifetime has passed.
    pub fn expire(&mut self, now: SctpTime) {
        let mut released = 0;
        for stream in &mut self.streams {
            for message in stream.expire(now) {
                debug!(
                    "{}message {:?} on stream {} expired before being sent",
                    self.log_prefix,
                    message.message_id,
                    stream.stream_id()
                );
                released += message.remaining();
            }
        }
        if released > 0 {
            self.release(released);
        }
    }

    /// Returns how many bytes of the message at the head of the stream that would be selected
    /// next are left to send, without committing to that selection.
    pub fn peek_next(&mut self, now: SctpTime, path: &PathView<'_>) -> Option<usize> {
        self.expire(now);
        let candidates = self.candidates();
        let stream_id = self.scheduler.select(&candidates, path, true)?;
        self.streams[stream_id.0 as usize].head().map(|m| m.remaining())
    }

    /// Produces the next fragment, of at most `max_payload` bytes, to be sent on `path`.
    pub fn dequeue(
        &mut self,
        now: SctpTime,
        path: &PathView<'_>,
        max_payload: usize,
    ) -> Option<DataToSend> {
        if max_payload == 0 {
            return None;
        }
        self.expire(now);
        let candidates = self.candidates();
        let stream_id = self.scheduler.select(&candidates, path, false)?;
        let fragment = self.streams[stream_id.0 as usize].produce(max_payload)?;
        self.release(fragment.data.payload.len());
        Some(fragment)
    }

    /// Drops what's left of a message whose sent fragments have been abandoned.
    pub fn discard(&mut self, stream_id: StreamId, message_id: OutgoingMessageId) {
        let Some(stream) = self.streams.get_mut(stream_id.0 as usize) else {
            return;
        };
        if let Some(bytes) = stream.discard(message_id) {
            debug!(
                "{}discarded the unsent {} bytes of message {:?}",
                self.log_prefix, bytes, message_id
            );
            self.release(bytes);
        }
    }

    /// Reduces the number of outbound streams to what the peer accepted, dropping messages queued
    /// on streams beyond that.
    pub fn truncate_streams(&mut self, count: u16) {
        let dropped: usize =
            self.streams.iter_mut().skip(count as usize).map(|s| s.clear()).sum();
        self.streams.truncate(count as usize);
        if dropped > 0 {
            debug!("{}dropped {} bytes on streams >= {}", self.log_prefix, dropped, count);
            self.release(dropped);
        }
    }

    pub fn clear(&mut self) {
        let dropped: usize = self.streams.iter_mut().map(|s| s.clear()).sum();
        self.queued_bytes -= dropped;
        self.full = false;
    }
}
