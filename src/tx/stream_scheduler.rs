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
use crate::api::StreamSchedulerKind;
use std::collections::HashMap;
use std::net::IpAddr;

/// A send stream that has data to send, as seen by the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StreamCandidate {
    pub stream_id: StreamId,
    pub priority: u16,
    pub bytes_sent: u64,
    /// When the message at the head of the stream was enqueued.
    pub head_enqueued_at: SctpTime,
}

/// The destination a packet is being filled for.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PathView<'a> {
    pub address: IpAddr,
    pub primary: IpAddr,
    /// Addresses of all active paths, in path order.
    pub active: &'a [IpAddr],
}

/// Decides which send stream feeds the next DATA chunk.
///
/// Candidates are passed in stream id order. The scheduler remembers the last selected stream for
/// round-robin continuation, and for the "packet" variants the stream that the current packet is
/// being filled from, until [`StreamScheduler::begin_packet`] is called.
///
/// A peek selects without committing. The peeked stream is remembered, so that the following
/// committing selection picks the same stream even for the random disciplines.
pub(crate) struct StreamScheduler {
    kind: StreamSchedulerKind,
    path_map: HashMap<StreamId, IpAddr>,
    last: Option<StreamId>,
    packet_stream: Option<StreamId>,
    peeked: Option<StreamId>,
    rng: fastrand::Rng,
}

impl StreamScheduler {
    pub fn new(options: &Options, seed: u64) -> Self {
        Self {
            kind: options.stream_scheduler,
            path_map: options.stream_path_map.iter().copied().collect(),
            last: None,
            packet_stream: None,
            peeked: None,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn kind(&self) -> StreamSchedulerKind {
        self.kind
    }

    pub fn begin_packet(&mut self) {
        self.packet_stream = None;
    }

    fn is_eligible(&self, stream_id: StreamId, path: &PathView<'_>) -> bool {
        match self.kind {
            StreamSchedulerKind::PathMapToPath => {
                match self.path_map.get(&stream_id) {
                    Some(addr) if path.active.contains(addr) => *addr == path.address,
                    // Unmapped streams, and streams mapped to a failed path, use the primary path.
                    _ => path.address == path.primary,
                }
            }
            StreamSchedulerKind::PathMapByHash => {
                if path.active.is_empty() {
                    path.address == path.primary
                } else {
                    path.active[stream_id.0 as usize % path.active.len()] == path.address
                }
            }
            _ => path.address == path.primary,
        }
    }

    /// Among `eligible`, the first one after the last selected stream, wrapping around.
    fn round_robin(&self, eligible: &[&StreamCandidate]) -> Option<StreamId> {
        let after_last = self
            .last
            .and_then(|last| eligible.iter().find(|c| c.stream_id > last))
            .or_else(|| eligible.first());
        after_last.map(|c| c.stream_id)
    }

    /// Round-robin among the candidates minimizing `key`.
    fn round_robin_min_by<K: Ord>(
        &self,
        eligible: &[&StreamCandidate],
        key: impl Fn(&StreamCandidate) -> K,
    ) -> Option<StreamId> {
        let best = eligible.iter().map(|c| key(c)).min()?;
        let tied: Vec<&StreamCandidate> =
            eligible.iter().copied().filter(|c| key(c) == best).collect();
        self.round_robin(&tied)
    }

    fn random(&mut self, eligible: &[&StreamCandidate]) -> Option<StreamId> {
        if eligible.is_empty() {
            return None;
        }
        Some(eligible[self.rng.usize(..eligible.len())].stream_id)
    }

    fn current_packet_stream(&self, eligible: &[&StreamCandidate]) -> Option<StreamId> {
        self.packet_stream.filter(|id| eligible.iter().any(|c| c.stream_id == *id))
    }

    /// Selects the stream to produce the next chunk for `path` from. Returns `None` if no
    /// candidate may be sent on that path.
    pub fn select(
        &mut self,
        candidates: &[StreamCandidate],
        path: &PathView<'_>,
        peek: bool,
    ) -> Option<StreamId> {
        let eligible: Vec<&StreamCandidate> =
            candidates.iter().filter(|c| self.is_eligible(c.stream_id, path)).collect();
        if eligible.is_empty() {
            return None;
        }

        let peeked = self.peeked.take().filter(|id| eligible.iter().any(|c| c.stream_id == *id));
        let chosen = match peeked {
            Some(id) => Some(id),
            None => match self.kind {
                StreamSchedulerKind::RoundRobin
                | StreamSchedulerKind::PathMapToPath
                | StreamSchedulerKind::PathMapByHash => self.round_robin(&eligible),
                StreamSchedulerKind::RoundRobinPacket => self
                    .current_packet_stream(&eligible)
                    .or_else(|| self.round_robin(&eligible)),
                StreamSchedulerKind::Random => self.random(&eligible),
                StreamSchedulerKind::RandomPacket => match self.current_packet_stream(&eligible) {
                    Some(id) => Some(id),
                    None => self.random(&eligible),
                },
                StreamSchedulerKind::Priority => {
                    self.round_robin_min_by(&eligible, |c| c.priority)
                }
                StreamSchedulerKind::FairBandwidth => {
                    self.round_robin_min_by(&eligible, |c| c.bytes_sent)
                }
                StreamSchedulerKind::FairBandwidthPacket => self
                    .current_packet_stream(&eligible)
                    .or_else(|| self.round_robin_min_by(&eligible, |c| c.bytes_sent)),
                StreamSchedulerKind::Fcfs => eligible
                    .iter()
                    .min_by_key(|c| (c.head_enqueued_at, c.stream_id))
                    .map(|c| c.stream_id),
            },
        }?;

        if peek {
            self.peeked = Some(chosen);
        } else {
            self.last = Some(chosen);
            self.packet_stream = Some(chosen);
        }
        Some(chosen)
    }
}
