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
use crate::api::SctpTime;
use crate::api::StreamId;
use crate::association::path::PathVariables;
use crate::association::path::alternate_path;
use crate::math::round_up_to_4;
use crate::packet::data::Data;
use crate::packet::data_chunk;
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::forward_tsn_chunk::SkippedStream;
use crate::packet::sack_chunk::SackChunk;
use crate::queue::Queue;
use crate::queue::QueueEntry;
use crate::tx::congestion_control::AckedOnPath;
use crate::tx::congestion_control::CongestionControl;
use crate::tx::send_queue::DataToSend;
use crate::types::OutgoingMessageId;
use crate::types::PathId;
use crate::types::Ssn;
use crate::types::Tsn;
use std::collections::BTreeMap;
use std::time::Duration;

#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::info;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;

/// Where a sent DATA chunk is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ChunkState {
    /// Waiting in the transmission queue to be retransmitted. Not charged to any path.
    Unsent,
    /// On the wire towards a path, and charged against that path's outstanding bytes.
    Outstanding(PathId),
    /// Reported received in a gap ack block. The peer may still renege on it.
    Acked,
    /// Given up on (partial reliability). Never sent again.
    Abandoned,
}

/// The number of bytes a DATA chunk occupies on the wire, and is charged to a path for.
pub(crate) fn booksize(data: &Data) -> usize {
    round_up_to_4!(data_chunk::HEADER_SIZE + data.payload.len())
}

#[derive(Debug)]
struct OutboundChunk {
    message_id: OutgoingMessageId,
    data: Data,
    state: ChunkState,
    /// Where the chunk was last sent.
    last_path: PathId,
    /// Where the chunk goes when it's retransmitted.
    next_path: PathId,
    transmissions: u32,
    gap_reports: u32,
    fast_retransmitted: bool,
    /// Set while a fast retransmission is waiting to be sent.
    fast_rtx_pending: bool,
    sent_at: SctpTime,
    expires_at: Option<SctpTime>,
    max_retransmissions: Option<u16>,
}

impl OutboundChunk {
    fn has_expired(&self, now: SctpTime) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    fn exhausted_retransmissions(&self) -> bool {
        self.max_retransmissions.is_some_and(|max| self.transmissions > max as u32)
    }

    fn is_settled(&self) -> bool {
        matches!(self.state, ChunkState::Acked | ChunkState::Abandoned)
    }
}

impl QueueEntry for OutboundChunk {
    fn payload_size(&self) -> usize {
        self.data.payload.len()
    }
}

/// What a processed SACK did.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct SackOutcome {
    pub cum_ack_advanced: bool,
    /// Some chunk was newly acked, cumulatively or in a gap ack block.
    pub new_data_acked: bool,
    /// Chunks moved to the transmission queue for fast retransmission.
    pub fast_retransmits: Vec<Tsn>,
}

/// Every DATA chunk that has been sent and not yet cumulatively acked, and the transmission queue
/// of those waiting to be retransmitted.
///
/// Outstanding bytes are accounted on the paths, with each chunk in
/// [`ChunkState::Outstanding`] charged exactly once to the path it was last sent on.
pub(crate) struct RetransmissionQueue {
    log_prefix: String,
    partial_reliability: bool,
    num_gap_reports: u32,
    next_tsn: Tsn,
    last_cumulative_tsn_ack: Tsn,
    /// RFC 3758 Advanced.Peer.Ack.Point.
    advanced_peer_ack_point: Tsn,
    peer_rwnd: u32,
    chunks: Queue<Tsn, OutboundChunk>,
    unsent_messages_to_discard: Vec<(StreamId, OutgoingMessageId)>,
}

impl RetransmissionQueue {
    pub fn new(
        log_prefix: &str,
        initial_tsn: Tsn,
        peer_rwnd: u32,
        options: &Options,
        partial_reliability: bool,
    ) -> Self {
        Self {
            log_prefix: log_prefix.to_string(),
            partial_reliability,
            num_gap_reports: options.num_gap_reports,
            next_tsn: initial_tsn,
            last_cumulative_tsn_ack: initial_tsn - 1,
            advanced_peer_ack_point: initial_tsn - 1,
            peer_rwnd,
            chunks: Queue::new(),
            unsent_messages_to_discard: Vec::new(),
        }
    }

    pub fn next_tsn(&self) -> Tsn {
        self.next_tsn
    }

    pub fn last_cumulative_tsn_ack(&self) -> Tsn {
        self.last_cumulative_tsn_ack
    }

    pub fn peer_rwnd(&self) -> u32 {
        self.peer_rwnd
    }

    /// True when everything sent has been cumulatively acked.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn outstanding_bytes(paths: &[PathVariables]) -> usize {
        paths.iter().map(|p| p.outstanding_bytes()).sum()
    }

    /// Assigns a TSN to a new fragment that is being sent on `path`.
    pub fn add_sent(
        &mut self,
        now: SctpTime,
        path: PathId,
        paths: &mut [PathVariables],
        to_send: DataToSend,
    ) -> (Tsn, Data) {
        let tsn = self.next_tsn;
        self.next_tsn += 1;
        let size = booksize(&to_send.data);
        paths[path.0].charge(size);
        self.peer_rwnd = self.peer_rwnd.saturating_sub(to_send.data.payload.len() as u32);
        let data = to_send.data.clone();
        self.chunks.check_and_insert(
            tsn,
            OutboundChunk {
                message_id: to_send.message_id,
                data: to_send.data,
                state: ChunkState::Outstanding(path),
                last_path: path,
                next_path: path,
                transmissions: 1,
                gap_reports: 0,
                fast_retransmitted: false,
                fast_rtx_pending: false,
                sent_at: now,
                expires_at: to_send.expires_at,
                max_retransmissions: to_send.max_retransmissions,
            },
        );
        (tsn, data)
    }

    pub fn has_chunks_to_retransmit(&self, path: PathId) -> bool {
        self.chunks.iter().any(|(_, c)| c.state == ChunkState::Unsent && c.next_path == path)
    }

    /// A fast retransmission for `path` is waiting. Its first packet may be sent regardless of
    /// the congestion window.
    pub fn has_fast_retransmit(&self, path: PathId) -> bool {
        self.chunks.iter().any(|(_, c)| {
            c.state == ChunkState::Unsent && c.next_path == path && c.fast_rtx_pending
        })
    }

    /// Takes chunks from the transmission queue that are to be sent on `path`, in TSN order, as
    /// long as they fit in `max_bytes`.
    pub fn take_chunks_to_retransmit(
        &mut self,
        now: SctpTime,
        path: PathId,
        paths: &mut [PathVariables],
        max_bytes: usize,
    ) -> Vec<(Tsn, Data)> {
        let candidates: Vec<(Tsn, usize)> = self
            .chunks
            .iter()
            .filter(|(_, c)| c.state == ChunkState::Unsent && c.next_path == path)
            .map(|(tsn, c)| (*tsn, booksize(&c.data)))
            .collect();

        let mut remaining = max_bytes;
        let mut taken = Vec::new();
        for (tsn, size) in candidates {
            if size > remaining {
                break;
            }
            remaining -= size;
            let data = self.chunks.update(&tsn, |c| {
                c.state = ChunkState::Outstanding(path);
                c.last_path = path;
                c.transmissions += 1;
                c.gap_reports = 0;
                c.fast_rtx_pending = false;
                c.sent_at = now;
                c.data.clone()
            });
            if let Some(data) = data {
                paths[path.0].charge(size);
                self.peer_rwnd = self.peer_rwnd.saturating_sub(data.payload.len() as u32);
                taken.push((tsn, data));
            }
        }
        if !taken.is_empty() {
            debug!(
                "{}retransmitting {:?} on {}",
                self.log_prefix,
                taken.iter().map(|(tsn, _)| *tsn).collect::<Vec<_>>(),
                path
            );
        }
        taken
    }

    fn earliest_outstanding_per_path(&self, path_count: usize) -> Vec<Option<Tsn>> {
        let mut earliest = vec![None; path_count];
        for (tsn, chunk) in self.chunks.iter() {
            if let ChunkState::Outstanding(p) = chunk.state {
                if earliest[p.0].is_none() {
                    earliest[p.0] = Some(*tsn);
                }
            }
        }
        earliest
    }

    /// Marks a chunk as received by the peer, releasing it from its path. Returns true if the
    /// chunk wasn't already acked.
    fn acknowledge(
        now: SctpTime,
        chunk: &mut OutboundChunk,
        paths: &mut [PathVariables],
        acked_on_path: &mut [usize],
        rtt_on_path: &mut [Option<Duration>],
    ) -> bool {
        match chunk.state {
            ChunkState::Outstanding(p) => {
                let size = booksize(&chunk.data);
                paths[p.0].discharge(size);
                acked_on_path[p.0] += size;
                // Karn's algorithm: only chunks sent once give an unambiguous measurement.
                if chunk.transmissions == 1 {
                    rtt_on_path[p.0] = Some(now - chunk.sent_at);
                }
                chunk.state = ChunkState::Acked;
                true
            }
            ChunkState::Unsent => {
                chunk.state = ChunkState::Acked;
                true
            }
            ChunkState::Acked | ChunkState::Abandoned => false,
        }
    }

    /// Moves an outstanding chunk back to the transmission queue, towards `to`.
    fn requeue(chunk: &mut OutboundChunk, to: PathId, paths: &mut [PathVariables]) {
        if let ChunkState::Outstanding(p) = chunk.state {
            paths[p.0].discharge(booksize(&chunk.data));
        }
        chunk.state = ChunkState::Unsent;
        chunk.next_path = to;
    }

    /// Processes a SACK. Returns `None` if it was stale or acked TSNs that were never sent.
    pub fn process_sack(
        &mut self,
        now: SctpTime,
        sack: &SackChunk,
        paths: &mut [PathVariables],
        cc: &dyn CongestionControl,
    ) -> Option<SackOutcome> {
        let cum = sack.cumulative_tsn_ack;

        // (a) Stale and invalid SACKs.
        if cum < self.last_cumulative_tsn_ack {
            debug!(
                "{}ignoring stale SACK, cum_ack={} < {}",
                self.log_prefix, cum, self.last_cumulative_tsn_ack
            );
            return None;
        }
        if cum >= self.next_tsn {
            info!(
                "{}ignoring SACK acking unsent TSN {}, next_tsn={}",
                self.log_prefix, cum, self.next_tsn
            );
            return None;
        }

        let flight_before: Vec<usize> = paths.iter().map(|p| p.outstanding_bytes()).collect();
        let earliest_before = self.earliest_outstanding_per_path(paths.len());
        let mut acked_on_path = vec![0; paths.len()];
        let mut rtt_on_path = vec![None; paths.len()];
        let mut outcome = SackOutcome::default();

        // (b) Advance the cumulative ack point.
        outcome.cum_ack_advanced = cum > self.last_cumulative_tsn_ack;
        while let Some(tsn) = self.chunks.first_key() {
            if tsn > cum {
                break;
            }
            if let Some((_, mut chunk)) = self.chunks.extract_oldest() {
                outcome.new_data_acked |= Self::acknowledge(
                    now,
                    &mut chunk,
                    paths,
                    &mut acked_on_path,
                    &mut rtt_on_path,
                );
            }
        }
        self.last_cumulative_tsn_ack = cum;
        if self.advanced_peer_ack_point < cum {
            self.advanced_peer_ack_point = cum;
        }

        // (c) Leave fast recovery once its exit point is acked.
        for path in paths.iter_mut() {
            if path.cc.fast_recovery_exit.is_some_and(|exit| cum >= exit) {
                debug!("{}{} leaves fast recovery", self.log_prefix, path.id);
                path.cc.fast_recovery_exit = None;
            }
        }

        // (d) Gap ack blocks.
        let blocks: Vec<(Tsn, Tsn)> = sack
            .gap_ack_blocks
            .iter()
            .map(|b| b.tsn_range(cum))
            .filter(|(start, end)| start <= end && *end < self.next_tsn)
            .collect();
        let in_block = |tsn: Tsn| blocks.iter().any(|(start, end)| tsn >= *start && tsn <= *end);
        let highest_gap_acked = blocks.iter().map(|(_, end)| *end).max();

        let tsns: Vec<Tsn> = self.chunks.keys().collect();
        let mut lossy_paths = vec![false; paths.len()];
        let mut to_abandon = Vec::new();
        for tsn in tsns {
            let Some(highest) = highest_gap_acked else {
                break;
            };
            if tsn > highest {
                break;
            }
            let num_gap_reports = self.num_gap_reports;
            let partial_reliability = self.partial_reliability;
            let log_prefix = &self.log_prefix;
            self.chunks.update(&tsn, |chunk| {
                if in_block(tsn) {
                    outcome.new_data_acked |= Self::acknowledge(
                        now,
                        chunk,
                        paths,
                        &mut acked_on_path,
                        &mut rtt_on_path,
                    );
                    return;
                }
                match chunk.state {
                    ChunkState::Acked => {
                        info!("{}peer reneged on TSN {}", log_prefix, tsn);
                        let last_path = chunk.last_path;
                        Self::requeue(chunk, last_path, paths);
                    }
                    ChunkState::Outstanding(p) => {
                        chunk.gap_reports += 1;
                        if chunk.gap_reports >= num_gap_reports && !chunk.fast_retransmitted {
                            if partial_reliability && chunk.exhausted_retransmissions() {
                                to_abandon.push(chunk.message_id);
                                return;
                            }
                            let to = alternate_path(paths, p);
                            info!("{}fast retransmit of TSN {} on {}", log_prefix, tsn, to);
                            Self::requeue(chunk, to, paths);
                            chunk.fast_retransmitted = true;
                            chunk.fast_rtx_pending = true;
                            lossy_paths[p.0] = true;
                            outcome.fast_retransmits.push(tsn);
                        }
                    }
                    ChunkState::Unsent | ChunkState::Abandoned => {}
                }
            });
        }
        let highest_outstanding = self.next_tsn - 1;
        for (path, lossy) in paths.iter_mut().zip(&lossy_paths) {
            if *lossy {
                cc.after_fast_retransmit(&mut path.cc, path.mtu, highest_outstanding);
            }
        }

        // (e) Peer receiver window and congestion windows.
        let outstanding = Self::outstanding_bytes(paths);
        self.peer_rwnd = sack.a_rwnd.saturating_sub(outstanding as u32);
        for (i, path) in paths.iter_mut().enumerate() {
            if acked_on_path[i] > 0 {
                path.confirmed = true;
                path.error_count = 0;
                cc.bytes_acked(
                    &mut path.cc,
                    path.mtu,
                    AckedOnPath {
                        bytes_acked: acked_on_path[i],
                        flight_size: flight_before[i],
                        cum_ack_advanced: outcome.cum_ack_advanced,
                    },
                );
            }
            if let Some(rtt) = rtt_on_path[i] {
                path.rto.observe_rtt(rtt);
            }
            let mtu = path.mtu;
            let remaining = path.outstanding_bytes();
            cc.after_sack(&mut path.cc, mtu, remaining);
        }

        // (f) T3-rtx per path.
        for (i, path) in paths.iter_mut().enumerate() {
            if path.outstanding_bytes() == 0 {
                path.t3_rtx.stop();
            } else if let Some(earliest) = earliest_before[i] {
                let still_outstanding = self
                    .chunks
                    .get(&earliest)
                    .is_some_and(|c| c.state == ChunkState::Outstanding(path.id));
                if !still_outstanding {
                    path.t3_rtx.start_with(now, path.rto.rto());
                }
            }
        }

        for message_id in to_abandon {
            self.abandon_message(message_id, paths);
        }
        self.advance_peer_ack_point();
        debug_assert!(self.is_consistent(paths));
        Some(outcome)
    }

    /// Handles an expired T3-rtx timer of `path`: backs off, collapses the congestion window and
    /// moves everything outstanding on the path to the transmission queue towards `new_path`.
    pub fn handle_t3_expiry(
        &mut self,
        path: PathId,
        new_path: PathId,
        paths: &mut [PathVariables],
        cc: &dyn CongestionControl,
    ) {
        let p = &mut paths[path.0];
        let mtu = p.mtu;
        cc.after_rtx_timeout(&mut p.cc, mtu);
        p.rto.back_off();

        let tsns: Vec<Tsn> = self
            .chunks
            .iter()
            .filter(|(_, c)| {
                c.state == ChunkState::Outstanding(path)
                    || (c.state == ChunkState::Unsent && c.next_path == path)
            })
            .map(|(tsn, _)| *tsn)
            .collect();
        let mut to_abandon = Vec::new();
        for tsn in &tsns {
            self.chunks.update(tsn, |c| {
                Self::requeue(c, new_path, paths);
                if self.partial_reliability && c.exhausted_retransmissions() {
                    to_abandon.push(c.message_id);
                }
            });
        }
        info!(
            "{}T3-rtx expired on {}, {} chunks to retransmit on {}, rto={:?}",
            self.log_prefix,
            path,
            tsns.len(),
            new_path,
            paths[path.0].rto.rto()
        );
        for message_id in to_abandon {
            self.abandon_message(message_id, paths);
        }
        self.advance_peer_ack_point();
        debug_assert!(self.is_consistent(paths));
    }

    /// Moves a single chunk to the transmission queue towards `to`. Returns false if the chunk
    /// isn't in the queue or is already settled.
    pub fn move_chunk_to_path(
        &mut self,
        tsn: Tsn,
        to: PathId,
        paths: &mut [PathVariables],
    ) -> bool {
        let moved = self
            .chunks
            .update(&tsn, |c| {
                if c.is_settled() {
                    return false;
                }
                Self::requeue(c, to, paths);
                true
            })
            .unwrap_or(false);
        debug_assert!(self.is_consistent(paths));
        moved
    }

    /// Redirects chunks waiting for retransmission on `from` to `to`, as `from` has failed.
    pub fn retarget_unsent(&mut self, from: PathId, to: PathId) {
        let tsns: Vec<Tsn> = self
            .chunks
            .iter()
            .filter(|(_, c)| c.state == ChunkState::Unsent && c.next_path == from)
            .map(|(tsn, _)| *tsn)
            .collect();
        for tsn in tsns {
            self.chunks.update(&tsn, |c| c.next_path = to);
        }
    }

    /// Abandons every message with a fragment whose lifetime has passed. Only done when partial
    /// reliability has been negotiated.
    pub fn abandon_expired(&mut self, now: SctpTime, paths: &mut [PathVariables]) {
        if !self.partial_reliability {
            return;
        }
        let mut expired: Vec<OutgoingMessageId> = self
            .chunks
            .iter()
            .filter(|(_, c)| !c.is_settled() && c.has_expired(now))
            .map(|(_, c)| c.message_id)
            .collect();
        expired.dedup();
        for message_id in expired {
            self.abandon_message(message_id, paths);
        }
        self.advance_peer_ack_point();
    }

    fn abandon_message(&mut self, message_id: OutgoingMessageId, paths: &mut [PathVariables]) {
        let tsns: Vec<Tsn> = self
            .chunks
            .iter()
            .filter(|(_, c)| c.message_id == message_id)
            .map(|(tsn, _)| *tsn)
            .collect();
        let mut end_found = false;
        let mut template = None;
        for tsn in &tsns {
            self.chunks.update(tsn, |c| {
                end_found |= c.data.is_end;
                if template.is_none() {
                    template = Some((c.data.stream_id, c.data.ssn, c.data.is_unordered));
                }
                match c.state {
                    ChunkState::Outstanding(p) => paths[p.0].discharge(booksize(&c.data)),
                    ChunkState::Acked | ChunkState::Abandoned => return,
                    ChunkState::Unsent => {}
                }
                c.state = ChunkState::Abandoned;
            });
        }
        let Some((stream_id, ssn, is_unordered)) = template else {
            return;
        };
        info!("{}abandoning message {:?} on stream {}", self.log_prefix, message_id, stream_id);
        if end_found {
            return;
        }

        // The rest of the message was never sent. A placeholder end fragment takes a TSN of its
        // own, so that the FORWARD-TSN covers the whole message and the peer never sees the next
        // message of the stream before this one is skipped.
        let tsn = self.next_tsn;
        self.next_tsn += 1;
        let data = Data { stream_id, ssn, is_end: true, is_unordered, ..Default::default() };
        self.chunks.check_and_insert(
            tsn,
            OutboundChunk {
                message_id,
                data,
                state: ChunkState::Abandoned,
                last_path: PathId(0),
                next_path: PathId(0),
                transmissions: 0,
                gap_reports: 0,
                fast_retransmitted: false,
                fast_rtx_pending: false,
                sent_at: SctpTime::zero(),
                expires_at: None,
                max_retransmissions: None,
            },
        );
        self.unsent_messages_to_discard.push((stream_id, message_id));
    }

    /// Messages that were abandoned while the send queue still held some of their fragments.
    pub fn take_unsent_messages_to_discard(&mut self) -> Vec<(StreamId, OutgoingMessageId)> {
        std::mem::take(&mut self.unsent_messages_to_discard)
    }

    // From <https://datatracker.ietf.org/doc/html/rfc3758#section-3.5>:
    //
    //   C2) Try to further advance the "Advanced.Peer.Ack.Point" locally, that is, to move
    //   "Advanced.Peer.Ack.Point" up as long as the chunk next in the out-queue space is marked
    //   as "abandoned".
    //
    // Chunks the peer has already acked in gap ack blocks are stepped over as well.
    fn advance_peer_ack_point(&mut self) {
        let mut point = self.advanced_peer_ack_point;
        for (tsn, chunk) in self.chunks.iter() {
            if *tsn <= point {
                continue;
            }
            if *tsn != point + 1 || !chunk.is_settled() {
                break;
            }
            point = *tsn;
        }
        self.advanced_peer_ack_point = point;
    }

    pub fn should_send_forward_tsn(&self) -> bool {
        self.partial_reliability && self.advanced_peer_ack_point > self.last_cumulative_tsn_ack
    }

    pub fn create_forward_tsn(&self) -> ForwardTsnChunk {
        let mut skipped: BTreeMap<StreamId, Ssn> = BTreeMap::new();
        for (tsn, chunk) in self.chunks.iter() {
            if *tsn > self.advanced_peer_ack_point {
                break;
            }
            if chunk.state == ChunkState::Abandoned && !chunk.data.is_unordered {
                let ssn = skipped.entry(chunk.data.stream_id).or_insert(chunk.data.ssn);
                if chunk.data.ssn > *ssn {
                    *ssn = chunk.data.ssn;
                }
            }
        }
        ForwardTsnChunk {
            new_cumulative_tsn: self.advanced_peer_ack_point,
            skipped_streams: skipped
                .into_iter()
                .map(|(stream_id, ssn)| SkippedStream { stream_id, ssn })
                .collect(),
        }
    }

    /// Every path's outstanding byte counter equals the booksize of the chunks charged to it.
    pub(crate) fn is_consistent(&self, paths: &[PathVariables]) -> bool {
        let mut charged = vec![0; paths.len()];
        for (_, chunk) in self.chunks.iter() {
            if let ChunkState::Outstanding(p) = chunk.state {
                charged[p.0] += booksize(&chunk.data);
            }
        }
        paths.iter().zip(charged).all(|(p, c)| p.outstanding_bytes() == c)
    }

    #[cfg(test)]
    pub(crate) fn chunk_states(&self) -> Vec<(Tsn, ChunkState)> {
        self.chunks.iter().map(|(tsn, c)| (*tsn, c.state)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PpId;
    use crate::association::path::tests::make_paths;
    use crate::packet::sack_chunk::GapAckBlock;
    use crate::tx::congestion_control::Rfc4960;

    const START_TIME: SctpTime = SctpTime::zero();
    const SID: StreamId = StreamId(1);
    const P0: PathId = PathId(0);
    const P1: PathId = PathId(1);
    const PAYLOAD_SIZE: usize = 100;
    const BOOKSIZE: usize = 116;

    fn fragment(id: u64, is_beginning: bool, is_end: bool) -> DataToSend {
        DataToSend {
            message_id: OutgoingMessageId(id),
            data: Data {
                stream_id: SID,
                ssn: Ssn(id as u16),
                ppid: PpId(53),
                payload: vec![0; PAYLOAD_SIZE],
                is_beginning,
                is_end,
                is_unordered: false,
            },
            expires_at: None,
            max_retransmissions: None,
        }
    }

    fn message(id: u64) -> DataToSend {
        fragment(id, true, true)
    }

    fn create_queue(initial_tsn: u32) -> RetransmissionQueue {
        RetransmissionQueue::new("", Tsn(initial_tsn), 100_000, &Options::default(), true)
    }

    fn sack(cum: u32, blocks: &[(u16, u16)]) -> SackChunk {
        SackChunk {
            cumulative_tsn_ack: Tsn(cum),
            a_rwnd: 100_000,
            gap_ack_blocks: blocks.iter().map(|(s, e)| GapAckBlock::new(*s, *e)).collect(),
            duplicate_tsns: vec![],
        }
    }

    fn send(q: &mut RetransmissionQueue, paths: &mut [PathVariables], n: u64) -> Vec<Tsn> {
        (0..n).map(|i| q.add_sent(START_TIME, P0, paths, message(i)).0).collect()
    }

    #[test]
    fn booksize_includes_header_and_padding() {
        assert_eq!(booksize(&message(0).data), BOOKSIZE);
        let mut odd = message(0).data;
        odd.payload = vec![0; 3];
        assert_eq!(booksize(&odd), 20);
    }

    #[test]
    fn assigns_consecutive_tsns_and_charges_path() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(100);
        assert_eq!(q.last_cumulative_tsn_ack(), Tsn(99));
        assert_eq!(send(&mut q, &mut paths, 3), vec![Tsn(100), Tsn(101), Tsn(102)]);
        assert_eq!(q.next_tsn(), Tsn(103));
        assert_eq!(paths[0].outstanding_bytes(), 3 * BOOKSIZE);
        assert_eq!(q.peer_rwnd(), 100_000 - 3 * PAYLOAD_SIZE as u32);
        assert!(q.is_consistent(&paths));
    }

    #[test]
    fn cumulative_ack_removes_acked_chunks() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(100);
        send(&mut q, &mut paths, 5);

        let outcome = q.process_sack(START_TIME, &sack(102, &[]), &mut paths, &Rfc4960).unwrap();
        assert!(outcome.cum_ack_advanced);
        assert!(outcome.new_data_acked);
        assert_eq!(
            q.chunk_states(),
            vec![(Tsn(103), ChunkState::Outstanding(P0)), (Tsn(104), ChunkState::Outstanding(P0))]
        );
        assert_eq!(paths[0].outstanding_bytes(), 2 * BOOKSIZE);
        assert_eq!(q.peer_rwnd(), 100_000 - 2 * BOOKSIZE as u32);
        assert!(q.is_consistent(&paths));
    }

    #[test]
    fn ignores_stale_and_invalid_sacks() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(100);
        send(&mut q, &mut paths, 3);
        assert!(q.process_sack(START_TIME, &sack(101, &[]), &mut paths, &Rfc4960).is_some());
        assert!(q.process_sack(START_TIME, &sack(100, &[]), &mut paths, &Rfc4960).is_none());
        assert!(q.process_sack(START_TIME, &sack(103, &[]), &mut paths, &Rfc4960).is_none());
        assert_eq!(q.last_cumulative_tsn_ack(), Tsn(101));
        assert_eq!(paths[0].outstanding_bytes(), BOOKSIZE);
    }

    #[test]
    fn gap_acked_chunks_are_no_longer_outstanding() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(10);
        send(&mut q, &mut paths, 4);

        q.process_sack(START_TIME, &sack(10, &[(2, 3)]), &mut paths, &Rfc4960).unwrap();
        assert_eq!(
            q.chunk_states(),
            vec![
                (Tsn(11), ChunkState::Outstanding(P0)),
                (Tsn(12), ChunkState::Acked),
                (Tsn(13), ChunkState::Acked),
            ]
        );
        assert_eq!(paths[0].outstanding_bytes(), BOOKSIZE);
        assert!(q.is_consistent(&paths));
    }

    #[test]
    fn fast_retransmits_after_three_gap_reports_on_alternate_path() {
        let mut paths = make_paths(2, &Options::default());
        let mut q = create_queue(105);
        send(&mut q, &mut paths, 4);

        for _ in 0..2 {
            let outcome =
                q.process_sack(START_TIME, &sack(104, &[(2, 4)]), &mut paths, &Rfc4960).unwrap();
            assert!(outcome.fast_retransmits.is_empty());
            assert!(!q.has_chunks_to_retransmit(P1));
        }
        let outcome =
            q.process_sack(START_TIME, &sack(104, &[(2, 4)]), &mut paths, &Rfc4960).unwrap();
        assert_eq!(outcome.fast_retransmits, vec![Tsn(105)]);
        assert_eq!(q.chunk_states()[0], (Tsn(105), ChunkState::Unsent));
        assert!(q.has_fast_retransmit(P1));
        assert!(!q.has_chunks_to_retransmit(P0));
        assert_eq!(paths[0].outstanding_bytes(), 0);
        assert!(paths[0].cc.in_fast_recovery());
        assert_eq!(paths[0].cc.ssthresh, 4 * 1500);

        let rtx = q.take_chunks_to_retransmit(START_TIME, P1, &mut paths, 1500);
        assert_eq!(rtx.iter().map(|(tsn, _)| *tsn).collect::<Vec<_>>(), vec![Tsn(105)]);
        assert_eq!(paths[1].outstanding_bytes(), BOOKSIZE);
        assert!(q.is_consistent(&paths));

        // Not fast retransmitted a second time.
        for _ in 0..3 {
            let outcome =
                q.process_sack(START_TIME, &sack(104, &[(2, 4)]), &mut paths, &Rfc4960).unwrap();
            assert!(outcome.fast_retransmits.is_empty());
        }
    }

    #[test]
    fn fast_retransmits_on_same_path_when_it_is_the_only_one() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(105);
        send(&mut q, &mut paths, 4);
        for _ in 0..3 {
            q.process_sack(START_TIME, &sack(104, &[(2, 4)]), &mut paths, &Rfc4960).unwrap();
        }
        assert!(q.has_fast_retransmit(P0));
    }

    #[test]
    fn exits_fast_recovery_when_exit_point_is_acked() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(1);
        send(&mut q, &mut paths, 5);
        for _ in 0..3 {
            q.process_sack(START_TIME, &sack(0, &[(2, 3)]), &mut paths, &Rfc4960).unwrap();
        }
        assert_eq!(paths[0].cc.fast_recovery_exit, Some(Tsn(5)));
        q.process_sack(START_TIME, &sack(3, &[]), &mut paths, &Rfc4960).unwrap();
        assert!(paths[0].cc.in_fast_recovery());
        q.process_sack(START_TIME, &sack(5, &[]), &mut paths, &Rfc4960).unwrap();
        assert!(!paths[0].cc.in_fast_recovery());
    }

    #[test]
    fn reneged_chunks_are_queued_again() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(1);
        send(&mut q, &mut paths, 4);
        q.process_sack(START_TIME, &sack(0, &[(2, 2), (4, 4)]), &mut paths, &Rfc4960).unwrap();
        q.process_sack(START_TIME, &sack(0, &[(4, 4)]), &mut paths, &Rfc4960).unwrap();
        assert_eq!(q.chunk_states()[1], (Tsn(2), ChunkState::Unsent));
        assert!(q.has_chunks_to_retransmit(P0));
        assert!(q.is_consistent(&paths));
    }

    #[test]
    fn t3_expiry_requeues_outstanding_chunks() {
        let mut paths = make_paths(2, &Options::default());
        let mut q = create_queue(1);
        send(&mut q, &mut paths, 3);
        q.process_sack(START_TIME, &sack(0, &[(2, 2)]), &mut paths, &Rfc4960).unwrap();
        let rto = paths[0].rto.rto();

        q.handle_t3_expiry(P0, P1, &mut paths, &Rfc4960);
        assert_eq!(
            q.chunk_states(),
            vec![
                (Tsn(1), ChunkState::Unsent),
                (Tsn(2), ChunkState::Acked),
                (Tsn(3), ChunkState::Unsent),
            ]
        );
        assert_eq!(paths[0].outstanding_bytes(), 0);
        assert_eq!(paths[0].cc.cwnd, 1500);
        assert_eq!(paths[0].rto.rto(), rto * 2);
        assert!(q.has_chunks_to_retransmit(P1));

        // Only what fits is taken, in TSN order.
        let rtx = q.take_chunks_to_retransmit(START_TIME, P1, &mut paths, BOOKSIZE + 10);
        assert_eq!(rtx.len(), 1);
        assert_eq!(rtx[0].0, Tsn(1));
        assert!(q.is_consistent(&paths));
    }

    #[test]
    fn moving_a_chunk_discharges_old_path() {
        let mut paths = make_paths(2, &Options::default());
        let mut q = create_queue(1);
        send(&mut q, &mut paths, 2);
        assert!(q.move_chunk_to_path(Tsn(2), P1, &mut paths));
        assert_eq!(paths[0].outstanding_bytes(), BOOKSIZE);
        assert_eq!(paths[1].outstanding_bytes(), 0);
        assert!(!q.move_chunk_to_path(Tsn(7), P1, &mut paths));

        q.retarget_unsent(P1, P0);
        assert!(q.has_chunks_to_retransmit(P0));
        assert!(!q.has_chunks_to_retransmit(P1));
    }

    #[test]
    fn t3_restarts_when_earliest_outstanding_is_acked() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(1);
        send(&mut q, &mut paths, 2);
        paths[0].t3_rtx.start(START_TIME);

        let now = START_TIME + Duration::from_millis(500);
        q.process_sack(now, &sack(1, &[]), &mut paths, &Rfc4960).unwrap();
        assert_eq!(paths[0].t3_rtx.next_expiry(), Some(now + paths[0].rto.rto()));

        q.process_sack(now, &sack(2, &[]), &mut paths, &Rfc4960).unwrap();
        assert!(!paths[0].t3_rtx.is_running());
        assert!(q.is_empty());
    }

    #[test]
    fn measures_rtt_only_on_chunks_sent_once() {
        let mut paths = make_paths(2, &Options::default());
        let mut q = create_queue(1);
        send(&mut q, &mut paths, 2);
        q.handle_t3_expiry(P0, P0, &mut paths, &Rfc4960);
        q.take_chunks_to_retransmit(START_TIME, P0, &mut paths, 1500);
        let later = START_TIME + Duration::from_secs(1);
        q.process_sack(later, &sack(2, &[]), &mut paths, &Rfc4960).unwrap();
        assert_eq!(paths[0].rto.srtt(), None);

        q.add_sent(START_TIME, P1, &mut paths, message(3));
        let acked_at = START_TIME + Duration::from_millis(120);
        q.process_sack(acked_at, &sack(3, &[]), &mut paths, &Rfc4960).unwrap();
        assert_eq!(paths[1].rto.srtt(), Some(Duration::from_millis(120)));
        assert!(paths[1].confirmed);
    }

    #[test]
    fn abandons_message_after_max_retransmissions() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(1);
        let mut limited = message(0);
        limited.max_retransmissions = Some(0);
        q.add_sent(START_TIME, P0, &mut paths, limited);
        q.add_sent(START_TIME, P0, &mut paths, message(1));

        q.handle_t3_expiry(P0, P0, &mut paths, &Rfc4960);
        assert_eq!(
            q.chunk_states(),
            vec![(Tsn(1), ChunkState::Abandoned), (Tsn(2), ChunkState::Unsent)]
        );
        assert!(q.should_send_forward_tsn());
        let fwd = q.create_forward_tsn();
        assert_eq!(fwd.new_cumulative_tsn, Tsn(1));
        assert_eq!(fwd.skipped_streams, vec![SkippedStream { stream_id: SID, ssn: Ssn(0) }]);
        assert!(q.take_unsent_messages_to_discard().is_empty());
        assert!(q.is_consistent(&paths));
    }

    #[test]
    fn does_not_abandon_without_partial_reliability() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = RetransmissionQueue::new("", Tsn(1), 100_000, &Options::default(), false);
        let mut limited = message(0);
        limited.max_retransmissions = Some(0);
        limited.expires_at = Some(START_TIME);
        q.add_sent(START_TIME, P0, &mut paths, limited);
        q.handle_t3_expiry(P0, P0, &mut paths, &Rfc4960);
        q.abandon_expired(START_TIME + Duration::from_secs(1), &mut paths);
        assert_eq!(q.chunk_states(), vec![(Tsn(1), ChunkState::Unsent)]);
        assert!(!q.should_send_forward_tsn());
    }

    #[test]
    fn fast_retransmits_exhausted_chunk_without_partial_reliability() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = RetransmissionQueue::new("", Tsn(1), 100_000, &Options::default(), false);
        let mut limited = message(0);
        limited.max_retransmissions = Some(0);
        q.add_sent(START_TIME, P0, &mut paths, limited);
        send(&mut q, &mut paths, 3);

        for _ in 0..3 {
            q.process_sack(START_TIME, &sack(0, &[(2, 4)]), &mut paths, &Rfc4960).unwrap();
        }
        assert_eq!(q.chunk_states()[0], (Tsn(1), ChunkState::Unsent));
        assert!(q.has_fast_retransmit(P0));
        assert!(!q.should_send_forward_tsn());
        assert!(q.is_consistent(&paths));
    }

    #[test]
    fn abandoning_partially_sent_message_adds_placeholder_end() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(1);
        let mut first = fragment(7, true, false);
        first.expires_at = Some(START_TIME + Duration::from_millis(100));
        q.add_sent(START_TIME, P0, &mut paths, first);

        q.abandon_expired(START_TIME + Duration::from_millis(100), &mut paths);
        assert_eq!(
            q.chunk_states(),
            vec![(Tsn(1), ChunkState::Abandoned), (Tsn(2), ChunkState::Abandoned)]
        );
        assert_eq!(q.next_tsn(), Tsn(3));
        assert_eq!(paths[0].outstanding_bytes(), 0);
        assert_eq!(q.take_unsent_messages_to_discard(), vec![(SID, OutgoingMessageId(7))]);
        assert_eq!(q.create_forward_tsn().new_cumulative_tsn, Tsn(2));

        q.process_sack(START_TIME, &sack(2, &[]), &mut paths, &Rfc4960).unwrap();
        assert!(!q.should_send_forward_tsn());
        assert!(q.is_empty());
    }

    #[test]
    fn forward_tsn_steps_over_gap_acked_chunks() {
        let mut paths = make_paths(1, &Options::default());
        let mut q = create_queue(1);
        let mut expiring = message(0);
        expiring.expires_at = Some(START_TIME);
        q.add_sent(START_TIME, P0, &mut paths, expiring);
        q.add_sent(START_TIME, P0, &mut paths, message(1));
        q.add_sent(START_TIME, P0, &mut paths, message(2));
        q.process_sack(START_TIME, &sack(0, &[(2, 2)]), &mut paths, &Rfc4960).unwrap();

        q.abandon_expired(START_TIME, &mut paths);
        assert_eq!(q.create_forward_tsn().new_cumulative_tsn, Tsn(2));
    }
}
