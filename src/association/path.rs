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
use crate::api::PathStatus;
use crate::timer::Timer;
use crate::tx::congestion_control::CongestionControl;
use crate::tx::congestion_control::CongestionState;
use crate::tx::retransmission_timeout::RetransmissionTimeout;
use crate::types::PathId;
use std::net::IpAddr;

/// Everything an association knows about one destination transport address of the peer.
///
/// The outstanding byte counter can only be changed through [`PathVariables::charge`] and
/// [`PathVariables::discharge`]; the retransmission queue is the only caller and charges each
/// in-flight chunk exactly once.
pub(crate) struct PathVariables {
    pub id: PathId,
    pub address: IpAddr,
    /// The local address packets to this path are sent from.
    pub local_address: IpAddr,
    pub mtu: usize,
    pub active: bool,
    /// Set once the address has been shown to be reachable, by data or a heartbeat ack.
    pub confirmed: bool,
    pub error_count: u32,
    pub cc: CongestionState,
    pub rto: RetransmissionTimeout,
    outstanding_bytes: usize,

    /// T3-rtx.
    pub t3_rtx: Timer,
    /// Fires when it's time to send a heartbeat on this path.
    pub heartbeat_interval: Timer,
    /// Fires when a heartbeat wasn't acked in time.
    pub heartbeat_timeout: Timer,
    /// Identifies the heartbeat in flight, if any.
    pub heartbeat_nonce: Option<u64>,
    /// Fires when the path has been idle for the configured decay interval.
    pub cwnd_decay: Option<Timer>,
}

impl PathVariables {
    pub fn new(
        id: PathId,
        address: IpAddr,
        local_address: IpAddr,
        options: &Options,
        cc: &dyn CongestionControl,
        peer_rwnd: u32,
    ) -> Self {
        Self {
            id,
            address,
            local_address,
            mtu: options.mtu,
            active: true,
            confirmed: false,
            error_count: 0,
            cc: cc.initialize(options.mtu, peer_rwnd as usize),
            rto: RetransmissionTimeout::new(options),
            outstanding_bytes: 0,
            t3_rtx: Timer::one_shot(options.rto_initial),
            heartbeat_interval: Timer::one_shot(options.hb_interval),
            heartbeat_timeout: Timer::one_shot(options.rto_initial),
            heartbeat_nonce: None,
            cwnd_decay: options.cwnd_decay_interval.map(Timer::one_shot),
        }
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes
    }

    /// Accounts for a chunk that has been put on the wire towards this path.
    pub fn charge(&mut self, bytes: usize) {
        self.outstanding_bytes += bytes;
    }

    /// Releases a chunk previously charged to this path, because it got acked, abandoned or
    /// moved to another path.
    pub fn discharge(&mut self, bytes: usize) {
        debug_assert!(self.outstanding_bytes >= bytes);
        self.outstanding_bytes = self.outstanding_bytes.saturating_sub(bytes);
    }

    /// Bytes that can be sent without exceeding the congestion window.
    pub fn cwnd_room(&self) -> usize {
        self.cc.cwnd.saturating_sub(self.outstanding_bytes)
    }

    pub fn status(&self) -> PathStatus {
        PathStatus {
            address: self.address,
            active: self.active,
            confirmed: self.confirmed,
            cwnd: self.cc.cwnd,
            ssthresh: self.cc.ssthresh,
            outstanding_bytes: self.outstanding_bytes,
            srtt: self.rto.srtt(),
            rto: self.rto.rto(),
            error_count: self.error_count,
        }
    }

    /// Drops every timer, as the path stops being used.
    pub fn stop_timers(&mut self) {
        self.t3_rtx.stop();
        self.heartbeat_interval.stop();
        self.heartbeat_timeout.stop();
        if let Some(t) = &mut self.cwnd_decay {
            t.stop();
        }
    }
}

/// The first active path after `from`, in path order and wrapping around. If no other path is
/// active, `from` itself is returned.
pub(crate) fn alternate_path(paths: &[PathVariables], from: PathId) -> PathId {
    let n = paths.len();
    (1..n).map(|i| PathId((from.0 + i) % n)).find(|id| paths[id.0].active).unwrap_or(from)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tx::congestion_control::Rfc4960;
    use std::net::Ipv4Addr;

    pub(crate) fn make_paths(n: usize, options: &Options) -> Vec<PathVariables> {
        (0..n)
            .map(|i| {
                PathVariables::new(
                    PathId(i),
                    IpAddr::V4(Ipv4Addr::new(10, 0, 0, i as u8 + 1)),
                    IpAddr::V4(Ipv4Addr::new(10, 1, 0, 1)),
                    options,
                    &Rfc4960,
                    65536,
                )
            })
            .collect()
    }

    #[test]
    fn charging_is_balanced() {
        let mut paths = make_paths(1, &Options::default());
        let p = &mut paths[0];
        p.charge(100);
        p.charge(50);
        assert_eq!(p.outstanding_bytes(), 150);
        assert_eq!(p.cwnd_room(), 4380 - 150);
        p.discharge(100);
        assert_eq!(p.outstanding_bytes(), 50);
        assert_eq!(p.status().outstanding_bytes, 50);
    }

    #[test]
    fn alternate_path_skips_inactive_paths() {
        let mut paths = make_paths(3, &Options::default());
        assert_eq!(alternate_path(&paths, PathId(0)), PathId(1));
        assert_eq!(alternate_path(&paths, PathId(2)), PathId(0));
        paths[1].active = false;
        assert_eq!(alternate_path(&paths, PathId(0)), PathId(2));
        paths[2].active = false;
        paths[0].active = false;
        assert_eq!(alternate_path(&paths, PathId(1)), PathId(1));
    }

    #[test]
    fn single_path_is_its_own_alternate() {
        let paths = make_paths(1, &Options::default());
        assert_eq!(alternate_path(&paths, PathId(0)), PathId(0));
    }
}
