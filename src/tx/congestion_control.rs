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

use crate::api::CongestionControlKind;
use crate::types::Tsn;
use std::cmp::max;
use std::cmp::min;

/// Per-path congestion control variables.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CongestionState {
    pub cwnd: usize,
    pub ssthresh: usize,
    pub partial_bytes_acked: usize,

    /// If set, the path is in fast recovery until this TSN has been cumulatively acked.
    pub fast_recovery_exit: Option<Tsn>,
}

impl CongestionState {
    pub fn in_fast_recovery(&self) -> bool {
        self.fast_recovery_exit.is_some()
    }
}

/// What a SACK did to one path, as input to [`CongestionControl::bytes_acked`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct AckedOnPath {
    /// Bytes of chunks sent on this path that were newly acked, cumulatively or by gap blocks.
    pub bytes_acked: usize,
    /// Bytes outstanding on this path before the SACK was processed.
    pub flight_size: usize,
    /// Whether the SACK advanced the cumulative TSN ack point.
    pub cum_ack_advanced: bool,
}

/// A congestion control algorithm. It's stateless itself; all state lives in the paths'
/// [`CongestionState`], so that one algorithm instance serves all paths of an association.
pub(crate) trait CongestionControl {
    fn initialize(&self, mtu: usize, peer_rwnd: usize) -> CongestionState;

    /// Called for every path that had bytes acked by a SACK.
    fn bytes_acked(&self, state: &mut CongestionState, mtu: usize, acked: AckedOnPath);

    /// Called for every path after a SACK has been processed, with the bytes still outstanding.
    fn after_sack(&self, state: &mut CongestionState, mtu: usize, outstanding: usize);

    /// Called when missing chunks last sent on the path are fast retransmitted.
    /// `highest_outstanding` becomes the fast recovery exit point.
    fn after_fast_retransmit(
        &self,
        state: &mut CongestionState,
        mtu: usize,
        highest_outstanding: Tsn,
    );

    fn after_rtx_timeout(&self, state: &mut CongestionState, mtu: usize);

    /// Called when the path has been idle for a while.
    fn after_cwnd_timeout(&self, state: &mut CongestionState, mtu: usize);
}

pub(crate) fn create(kind: CongestionControlKind) -> Box<dyn CongestionControl> {
    match kind {
        CongestionControlKind::Rfc4960 => Box::new(Rfc4960),
    }
}

/// The window algorithm of <https://datatracker.ietf.org/doc/html/rfc4960#section-7.2>.
pub(crate) struct Rfc4960;

impl Rfc4960 {
    fn initial_cwnd(mtu: usize) -> usize {
        min(4 * mtu, max(2 * mtu, 4380))
    }

    fn min_ssthresh(mtu: usize) -> usize {
        4 * mtu
    }

    fn reduced_ssthresh(state: &CongestionState, mtu: usize) -> usize {
        max(state.cwnd / 2, Self::min_ssthresh(mtu))
    }
}

impl CongestionControl for Rfc4960 {
    fn initialize(&self, mtu: usize, peer_rwnd: usize) -> CongestionState {
        // From <https://datatracker.ietf.org/doc/html/rfc4960#section-7.2.1>:
        //
        //   The initial value of ssthresh MAY be arbitrarily high (for example, implementations
        //   MAY use the size of the receiver advertised window).
        CongestionState {
            cwnd: Self::initial_cwnd(mtu),
            ssthresh: max(peer_rwnd, Self::min_ssthresh(mtu)),
            partial_bytes_acked: 0,
            fast_recovery_exit: None,
        }
    }

    fn bytes_acked(&self, state: &mut CongestionState, mtu: usize, acked: AckedOnPath) {
        if !acked.cum_ack_advanced || acked.bytes_acked == 0 {
            return;
        }
        let is_fully_utilized = acked.flight_size >= state.cwnd;
        let old_cwnd = state.cwnd;

        if state.cwnd <= state.ssthresh {
            // From <https://datatracker.ietf.org/doc/html/rfc4960#section-7.2.1>:
            //
            //   When cwnd is less than or equal to ssthresh, an SCTP endpoint MUST use the
            //   slow-start algorithm to increase cwnd only if the current congestion window is
            //   being fully utilized, an incoming SACK advances the Cumulative TSN Ack Point, and
            //   the data sender is not in Fast Recovery.
            if is_fully_utilized && !state.in_fast_recovery() {
                state.cwnd += min(acked.bytes_acked, mtu);
                log::debug!("SS increase cwnd={} ({})", state.cwnd, old_cwnd);
            }
            return;
        }

        // From <https://datatracker.ietf.org/doc/html/rfc4960#section-7.2.2>:
        //
        //   Whenever cwnd is greater than ssthresh, upon each SACK arrival that advances the
        //   Cumulative TSN Ack Point, increase partial_bytes_acked by the total number of bytes of
        //   all new chunks acknowledged in that SACK including chunks acknowledged by the new
        //   Cumulative TSN Ack and by Gap Ack Blocks.
        state.partial_bytes_acked += acked.bytes_acked;
        if state.partial_bytes_acked >= state.cwnd && is_fully_utilized {
            state.partial_bytes_acked -= state.cwnd;
            state.cwnd += mtu;
            log::debug!(
                "CA increase cwnd={} ({}), ssthresh={}, pba={}",
                state.cwnd,
                old_cwnd,
                state.ssthresh,
                state.partial_bytes_acked
            );
        }
    }

    fn after_sack(&self, state: &mut CongestionState, _mtu: usize, outstanding: usize) {
        // From <https://datatracker.ietf.org/doc/html/rfc4960#section-7.2.2>:
        //
        //   When all of the data transmitted by the sender has been acknowledged by the receiver,
        //   partial_bytes_acked is initialized to 0.
        if outstanding == 0 {
            state.partial_bytes_acked = 0;
        }
    }

    fn after_fast_retransmit(
        &self,
        state: &mut CongestionState,
        mtu: usize,
        highest_outstanding: Tsn,
    ) {
        if state.in_fast_recovery() {
            // From <https://datatracker.ietf.org/doc/html/rfc4960#section-7.2.4>:
            //
            //   While in Fast Recovery, the ssthresh and cwnd SHOULD NOT change for any
            //   destinations due to a subsequent Fast Recovery event.
            log::debug!("packet loss detected (fast recovery). No changes.");
            return;
        }
        let old_cwnd = state.cwnd;
        state.ssthresh = Self::reduced_ssthresh(state, mtu);
        state.cwnd = state.ssthresh;
        state.partial_bytes_acked = 0;
        state.fast_recovery_exit = Some(highest_outstanding);
        log::debug!(
            "packet loss detected. cwnd={} ({}), ssthresh={}, fast recovery until {}",
            state.cwnd,
            old_cwnd,
            state.ssthresh,
            highest_outstanding
        );
    }

    fn after_rtx_timeout(&self, state: &mut CongestionState, mtu: usize) {
        // From <https://datatracker.ietf.org/doc/html/rfc4960#section-7.2.3>:
        //
        //   When the T3-rtx timer expires on an address, SCTP should perform slow start by:
        //
        //      ssthresh = max(cwnd/2, 4*MTU)
        //      cwnd = 1*MTU
        state.ssthresh = Self::reduced_ssthresh(state, mtu);
        state.cwnd = mtu;
        state.partial_bytes_acked = 0;
    }

    fn after_cwnd_timeout(&self, state: &mut CongestionState, mtu: usize) {
        // From <https://datatracker.ietf.org/doc/html/rfc4960#section-7.2.1>:
        //
        //   When the endpoint does not transmit data on a given transport address, the cwnd of
        //   the transport address should be adjusted to max(cwnd/2, 4*MTU) per RTO.
        //
        // The floor used here is the initial window, which is what a fresh path would start with.
        let initial = Self::initial_cwnd(mtu);
        if state.cwnd > initial {
            state.cwnd = max(state.cwnd / 2, initial);
        }
        state.partial_bytes_acked = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MTU: usize = 1500;

    fn acked(bytes_acked: usize, flight_size: usize) -> AckedOnPath {
        AckedOnPath { bytes_acked, flight_size, cum_ack_advanced: true }
    }

    #[test]
    fn initial_window() {
        let cc = Rfc4960;
        assert_eq!(cc.initialize(1500, 65536).cwnd, 4380);
        assert_eq!(cc.initialize(1000, 65536).cwnd, 4000);
        assert_eq!(cc.initialize(3000, 65536).cwnd, 6000);
        assert_eq!(cc.initialize(1500, 65536).ssthresh, 65536);
        assert_eq!(cc.initialize(1500, 1000).ssthresh, 4 * 1500);
    }

    #[test]
    fn slow_start_grows_by_at_most_one_mtu() {
        let cc = Rfc4960;
        let mut s = cc.initialize(MTU, 65536);
        cc.bytes_acked(&mut s, MTU, acked(3000, 4380));
        assert_eq!(s.cwnd, 4380 + MTU);
        cc.bytes_acked(&mut s, MTU, acked(500, 6000));
        assert_eq!(s.cwnd, 4380 + MTU + 500);
    }

    #[test]
    fn slow_start_needs_full_window() {
        let cc = Rfc4960;
        let mut s = cc.initialize(MTU, 65536);
        cc.bytes_acked(&mut s, MTU, acked(1000, 2000));
        assert_eq!(s.cwnd, 4380);
        cc.bytes_acked(
            &mut s,
            MTU,
            AckedOnPath { bytes_acked: 1000, flight_size: 5000, cum_ack_advanced: false },
        );
        assert_eq!(s.cwnd, 4380);
    }

    #[test]
    fn congestion_avoidance_grows_one_mtu_per_window() {
        let cc = Rfc4960;
        let mut s = CongestionState {
            cwnd: 10000,
            ssthresh: 8000,
            partial_bytes_acked: 0,
            fast_recovery_exit: None,
        };
        cc.bytes_acked(&mut s, MTU, acked(6000, 10000));
        assert_eq!(s.cwnd, 10000);
        assert_eq!(s.partial_bytes_acked, 6000);
        cc.bytes_acked(&mut s, MTU, acked(6000, 10000));
        assert_eq!(s.cwnd, 10000 + MTU);
        assert_eq!(s.partial_bytes_acked, 2000);

        cc.after_sack(&mut s, MTU, 0);
        assert_eq!(s.partial_bytes_acked, 0);
    }

    #[test]
    fn fast_retransmit_halves_once_per_recovery() {
        let cc = Rfc4960;
        let mut s = CongestionState {
            cwnd: 20000,
            ssthresh: 30000,
            partial_bytes_acked: 100,
            fast_recovery_exit: None,
        };
        cc.after_fast_retransmit(&mut s, MTU, Tsn(50));
        assert_eq!(s.ssthresh, 10000);
        assert_eq!(s.cwnd, 10000);
        assert_eq!(s.fast_recovery_exit, Some(Tsn(50)));

        cc.after_fast_retransmit(&mut s, MTU, Tsn(60));
        assert_eq!(s.cwnd, 10000);
        assert_eq!(s.fast_recovery_exit, Some(Tsn(50)));
    }

    #[test]
    fn no_slow_start_growth_in_fast_recovery() {
        let cc = Rfc4960;
        let mut s = cc.initialize(MTU, 65536);
        s.fast_recovery_exit = Some(Tsn(10));
        cc.bytes_acked(&mut s, MTU, acked(3000, 5000));
        assert_eq!(s.cwnd, 4380);
    }

    #[test]
    fn rtx_timeout_collapses_window_and_keeps_floor() {
        let cc = Rfc4960;
        let mut s = cc.initialize(MTU, 65536);
        cc.after_rtx_timeout(&mut s, MTU);
        assert_eq!(s.cwnd, MTU);
        assert_eq!(s.ssthresh, 4 * MTU);
    }

    #[test]
    fn idle_path_decays_towards_initial_window() {
        let cc = Rfc4960;
        let mut s = CongestionState {
            cwnd: 40000,
            ssthresh: 30000,
            partial_bytes_acked: 0,
            fast_recovery_exit: None,
        };
        cc.after_cwnd_timeout(&mut s, MTU);
        assert_eq!(s.cwnd, 20000);
        cc.after_cwnd_timeout(&mut s, MTU);
        cc.after_cwnd_timeout(&mut s, MTU);
        cc.after_cwnd_timeout(&mut s, MTU);
        assert_eq!(s.cwnd, 4380);
        cc.after_cwnd_timeout(&mut s, MTU);
        assert_eq!(s.cwnd, 4380);
    }
}
