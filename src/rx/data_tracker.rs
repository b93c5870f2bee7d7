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
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::sack_chunk;
use crate::packet::sack_chunk::GapAckBlock;
use crate::packet::sack_chunk::SackChunk;
use crate::timer::Timer;
use crate::types::Tsn;
use std::ops::Range;

/// The maximum number of accepted in-flight DATA chunks beyond the cumulative TSN. Anything
/// further ahead is dropped, which forces the sender to fill the holes first.
const MAX_ACCEPTED_OUTSTANDING_FRAGMENTS: u32 = 100000;

/// The maximum number of duplicate TSNs that will be reported in a SACK.
const MAX_DUPLICATE_TSN_REPORTED: usize = 20;

/// Keeps track of received TSNs and decides _when_ a SACK is due and _what_ it contains.
///
/// Received TSNs above the cumulative TSN are kept in a gap list of half-open ranges. The list is
/// sorted, its ranges never overlap or touch, and no range starts at `cumulative_tsn + 1` (such a
/// range is folded into the cumulative TSN as soon as it appears).
///
/// SACKs are sent for every `sack_frequency` packets carrying DATA, or when the SACK delay timer
/// fires, whichever happens first. The first DATA of an association, duplicates and out of order
/// arrivals are acknowledged immediately.
pub struct DataTracker {
    seen_data: bool,

    /// All TSNs up until (and including) this value have been seen.
    cumulative_tsn: Tsn,

    gaps: Vec<Range<Tsn>>,

    highest_tsn_received: Tsn,
    duplicates: Vec<Tsn>,

    /// Packets with DATA received since the last SACK was sent.
    packets_since_sack: u32,
    data_in_current_packet: bool,
    sack_immediately: bool,
    sack_frequency: u32,
    sack_timer: Timer,
}

impl DataTracker {
    pub fn new(peer_initial_tsn: Tsn, options: &Options) -> DataTracker {
        DataTracker {
            seen_data: false,
            cumulative_tsn: peer_initial_tsn - 1,
            gaps: vec![],
            highest_tsn_received: peer_initial_tsn - 1,
            duplicates: vec![],
            packets_since_sack: 0,
            data_in_current_packet: false,
            sack_immediately: false,
            sack_frequency: options.sack_frequency.max(1),
            sack_timer: Timer::one_shot(options.sack_delay),
        }
    }

    pub fn cumulative_tsn(&self) -> Tsn {
        self.cumulative_tsn
    }

    pub fn highest_tsn_received(&self) -> Tsn {
        self.highest_tsn_received
    }

    /// The gap list, as half-open ranges.
    pub fn gaps(&self) -> &[Range<Tsn>] {
        &self.gaps
    }

    pub fn next_timeout(&self) -> Option<SctpTime> {
        self.sack_timer.next_expiry()
    }

    /// Whether `tsn` is close enough to the cumulative TSN to be tracked. Old TSNs are valid, as
    /// receiving them again must be reported as duplicates.
    pub fn is_tsn_valid(&self, tsn: Tsn) -> bool {
        tsn.distance_to(self.cumulative_tsn) <= MAX_ACCEPTED_OUTSTANDING_FRAGMENTS
    }

    pub fn is_duplicate(&self, tsn: Tsn) -> bool {
        tsn <= self.cumulative_tsn || self.gaps.iter().any(|r| r.contains(&tsn))
    }

    pub fn will_increase_cum_tsn(&self, tsn: Tsn) -> bool {
        tsn == self.cumulative_tsn + 1
    }

    /// Records `tsn` as received. Returns false if it had been received before.
    pub fn update_gap_list(&mut self, tsn: Tsn) -> bool {
        if tsn <= self.cumulative_tsn {
            return false;
        }
        if tsn > self.highest_tsn_received {
            self.highest_tsn_received = tsn;
        }

        if tsn == self.cumulative_tsn + 1 {
            self.cumulative_tsn = tsn;
            self.merge_first_gap();
            return true;
        }

        let idx = self.gaps.partition_point(|r| r.start <= tsn);
        if idx > 0 && self.gaps[idx - 1].contains(&tsn) {
            return false;
        }

        let extend_prev = idx > 0 && self.gaps[idx - 1].end == tsn;
        let extend_next = idx < self.gaps.len() && self.gaps[idx].start == tsn + 1;
        match (extend_prev, extend_next) {
            (true, true) => {
                self.gaps[idx - 1].end = self.gaps[idx].end;
                self.gaps.remove(idx);
            }
            (true, false) => self.gaps[idx - 1].end = tsn + 1,
            (false, true) => self.gaps[idx].start = tsn,
            (false, false) => self.gaps.insert(idx, tsn..tsn + 1),
        }
        true
    }

    /// Forgets that `tsn` was received, which happens when its data had to be dropped to make room
    /// in the receive buffer. Only TSNs above the cumulative TSN can be forgotten.
    pub fn remove_from_gap_list(&mut self, tsn: Tsn) -> bool {
        let idx = self.gaps.partition_point(|r| r.start <= tsn);
        if idx == 0 || !self.gaps[idx - 1].contains(&tsn) {
            return false;
        }
        let range = self.gaps[idx - 1].clone();
        match (range.start == tsn, range.end == tsn + 1) {
            (true, true) => {
                self.gaps.remove(idx - 1);
            }
            (true, false) => self.gaps[idx - 1].start = tsn + 1,
            (false, true) => self.gaps[idx - 1].end = tsn,
            (false, false) => {
                self.gaps[idx - 1].end = tsn;
                self.gaps.insert(idx, tsn + 1..range.end);
            }
        }
        if tsn == self.highest_tsn_received {
            self.highest_tsn_received = self.gaps.last().map_or(self.cumulative_tsn, |r| r.end - 1);
        }
        true
    }

    fn merge_first_gap(&mut self) {
        if self.gaps.first().is_some_and(|r| r.start == self.cumulative_tsn + 1) {
            self.cumulative_tsn = self.gaps.remove(0).end - 1;
        }
    }

    fn add_duplicate(&mut self, tsn: Tsn) {
        if self.duplicates.len() < MAX_DUPLICATE_TSN_REPORTED {
            self.duplicates.push(tsn);
        }
    }

    /// Call for every received DATA chunk. Returns true if `tsn` was seen for the first time.
    pub fn observe(&mut self, tsn: Tsn) -> bool {
        debug_assert!(self.is_tsn_valid(tsn));
        self.data_in_current_packet = true;

        let is_new = self.update_gap_list(tsn);
        if !is_new {
            // <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2>: duplicates are
            // reported without delay.
            self.add_duplicate(tsn);
            self.sack_immediately = true;
        }
        if !self.gaps.is_empty() {
            // <https://datatracker.ietf.org/doc/html/rfc9260#section-6.7>: a SACK is sent for
            // every packet that doesn't fill the gap.
            self.sack_immediately = true;
        }
        if !self.seen_data {
            // <https://datatracker.ietf.org/doc/html/rfc9260#section-5.1-8>
            self.seen_data = true;
            self.sack_immediately = true;
        }
        is_new
    }

    /// Moves the cumulative TSN forward as requested by a FORWARD-TSN chunk. Returns false if the
    /// chunk was out of date.
    pub fn handle_forward_tsn(&mut self, new_cumulative_tsn: Tsn) -> bool {
        self.data_in_current_packet = true;
        if new_cumulative_tsn <= self.cumulative_tsn {
            // <https://datatracker.ietf.org/doc/html/rfc3758#section-3.6>: a stale FORWARD-TSN may
            // mean that the last SACK was lost.
            self.sack_immediately = true;
            return false;
        }

        self.cumulative_tsn = new_cumulative_tsn;
        if new_cumulative_tsn > self.highest_tsn_received {
            self.highest_tsn_received = new_cumulative_tsn;
        }
        self.gaps.retain_mut(|r| {
            if r.end <= new_cumulative_tsn + 1 {
                return false;
            }
            if r.start <= new_cumulative_tsn {
                r.start = new_cumulative_tsn + 1;
            }
            true
        });
        self.merge_first_gap();
        true
    }

    /// Called when all chunks of a received packet have been processed. Decides whether the SACK
    /// goes out now or is delayed.
    pub fn schedule_sack(&mut self, now: SctpTime) {
        if !std::mem::take(&mut self.data_in_current_packet) {
            return;
        }
        self.packets_since_sack += 1;
        if self.packets_since_sack >= self.sack_frequency {
            self.sack_immediately = true;
        }
        if !self.sack_immediately {
            self.sack_timer.ensure_started(now);
        }
    }

    /// Whether a SACK should be bundled into the next packet. With `also_if_delayed`, data that is
    /// merely waiting for the delayed SACK timer counts as well.
    pub fn time_for_sack(&self, also_if_delayed: bool) -> bool {
        self.sack_immediately || (also_if_delayed && self.packets_since_sack > 0)
    }

    pub fn force_immediate_sack(&mut self) {
        self.sack_immediately = true;
    }

    pub fn handle_timeout(&mut self, now: SctpTime) {
        if self.sack_timer.expire(now) {
            self.sack_immediately = true;
        }
    }

    /// Must be called whenever a SACK created by [`DataTracker::create_sack`] was sent.
    pub fn sack_sent(&mut self) {
        self.sack_immediately = false;
        self.packets_since_sack = 0;
        self.sack_timer.stop();
    }

    /// Creates a SACK that fits in `max_size` bytes (including the chunk header). Gap ack blocks
    /// are reported lowest first and the ones that don't fit are left out, and so are duplicate
    /// TSNs. The reported duplicates are cleared.
    pub fn create_sack(&mut self, a_rwnd: u32, max_size: usize) -> SackChunk {
        let cumulative_tsn_ack = self.cumulative_tsn;
        let mut room =
            max_size.saturating_sub(TLV_HEADER_SIZE + sack_chunk::FIXED_FIELDS_SIZE) / 4;

        let gap_ack_blocks: Vec<GapAckBlock> = self
            .gaps
            .iter()
            .map_while(|r| {
                let start = u16::try_from(r.start.distance_to(cumulative_tsn_ack)).ok()?;
                let end = u16::try_from((r.end - 1).distance_to(cumulative_tsn_ack)).ok()?;
                Some(GapAckBlock::new(start, end))
            })
            .take(room)
            .collect();
        room -= gap_ack_blocks.len();

        let mut duplicate_tsns = std::mem::take(&mut self.duplicates);
        duplicate_tsns.truncate(room);

        SackChunk { cumulative_tsn_ack, a_rwnd, gap_ack_blocks, duplicate_tsns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::SerializableTlv;
    use std::time::Duration;

    const INITIAL_TSN: Tsn = Tsn(11);
    const A_RWND: u32 = 10000;
    const START_TIME: SctpTime = SctpTime::zero();
    const MTU: usize = 1500;

    fn observe(d: &mut DataTracker, tsns: &[u32]) {
        for tsn in tsns {
            d.observe(Tsn(*tsn));
        }
    }

    fn expect_gaps(sack: &SackChunk, offsets: &[(u16, u16)]) {
        let gaps: Vec<(u16, u16)> = sack.gap_ack_blocks.iter().map(|b| (b.start, b.end)).collect();
        assert_eq!(gaps, offsets);
    }

    fn assert_gap_list_invariant(d: &DataTracker) {
        for pair in d.gaps().windows(2) {
            assert!(pair[0].end < pair[1].start, "{:?}", d.gaps());
        }
        for r in d.gaps() {
            assert!(r.start < r.end);
            assert!(r.start > d.cumulative_tsn() + 1, "{:?} at {}", d.gaps(), d.cumulative_tsn());
        }
    }

    #[test]
    fn empty() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        let sack = d.create_sack(A_RWND, MTU);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(10));
        assert!(sack.gap_ack_blocks.is_empty());
        assert!(sack.duplicate_tsns.is_empty());
        assert_eq!(sack.a_rwnd, A_RWND);
    }

    #[test]
    fn in_order_moves_cumulative_tsn() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        observe(&mut d, &[11, 12, 13]);
        let sack = d.create_sack(A_RWND, MTU);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(13));
        assert!(sack.gap_ack_blocks.is_empty());
    }

    #[test]
    fn out_of_order_moves_cumulative_tsn() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        observe(&mut d, &[12, 13, 14, 11]);
        assert_eq!(d.cumulative_tsn(), Tsn(14));
        assert!(d.gaps().is_empty());
        assert_eq!(d.highest_tsn_received(), Tsn(14));
    }

    #[test]
    fn example_from_rfc9260_section334() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        observe(&mut d, &[11, 12, 14, 15, 17]);
        let sack = d.create_sack(A_RWND, MTU);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(12));
        expect_gaps(&sack, &[(2, 3), (5, 5)]);
        assert!(sack.duplicate_tsns.is_empty());
    }

    #[test]
    fn duplicates_are_reported_once() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        observe(&mut d, &[11, 13]);
        assert!(!d.observe(Tsn(11)));
        assert!(!d.observe(Tsn(13)));
        assert!(d.is_duplicate(Tsn(13)));
        assert!(!d.is_duplicate(Tsn(12)));

        let sack = d.create_sack(A_RWND, MTU);
        assert_eq!(sack.duplicate_tsns, vec![Tsn(11), Tsn(13)]);
        let sack = d.create_sack(A_RWND, MTU);
        assert!(sack.duplicate_tsns.is_empty());
    }

    #[test]
    fn duplicate_list_is_bounded() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        observe(&mut d, &[11]);
        for _ in 0..50 {
            d.observe(Tsn(11));
        }
        assert_eq!(d.create_sack(A_RWND, MTU).duplicate_tsns.len(), MAX_DUPLICATE_TSN_REPORTED);
    }

    #[test]
    fn gap_list_stays_sorted_and_merged() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        for tsn in [20, 15, 17, 16, 30, 18, 19, 12, 25, 13, 14, 11, 26, 24] {
            d.update_gap_list(Tsn(tsn));
            assert_gap_list_invariant(&d);
        }
        assert_eq!(d.cumulative_tsn(), Tsn(20));
        assert_eq!(d.gaps(), &[Tsn(24)..Tsn(27), Tsn(30)..Tsn(31)]);
        assert_eq!(d.highest_tsn_received(), Tsn(30));
    }

    #[test]
    fn removing_from_gap_list_splits_ranges() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        observe(&mut d, &[13, 14, 15, 16, 20]);
        assert!(d.remove_from_gap_list(Tsn(14)));
        assert_gap_list_invariant(&d);
        assert_eq!(d.gaps(), &[Tsn(13)..Tsn(14), Tsn(15)..Tsn(17), Tsn(20)..Tsn(21)]);

        assert!(!d.remove_from_gap_list(Tsn(14)));
        assert!(!d.remove_from_gap_list(Tsn(10)));
        assert!(d.remove_from_gap_list(Tsn(20)));
        assert_eq!(d.highest_tsn_received(), Tsn(16));
        assert!(d.remove_from_gap_list(Tsn(13)));
        assert_eq!(d.gaps(), &[Tsn(15)..Tsn(17)]);

        // Forgotten TSNs are new again when retransmitted.
        assert!(d.observe(Tsn(14)));
        assert_gap_list_invariant(&d);
        assert_eq!(d.gaps(), &[Tsn(14)..Tsn(17)]);
    }

    #[test]
    fn wraps_around() {
        let mut d = DataTracker::new(Tsn(u32::MAX - 1), &Options::default());
        observe(&mut d, &[u32::MAX - 1, 1, 2]);
        let sack = d.create_sack(A_RWND, MTU);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(u32::MAX - 1));
        expect_gaps(&sack, &[(3, 4)]);
        observe(&mut d, &[u32::MAX, 0]);
        assert_eq!(d.cumulative_tsn(), Tsn(2));
        assert!(d.gaps().is_empty());
    }

    #[test]
    fn forward_tsn_simple() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        observe(&mut d, &[11, 12, 15]);
        assert!(d.handle_forward_tsn(Tsn(13)));
        let sack = d.create_sack(A_RWND, MTU);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(13));
        expect_gaps(&sack, &[(2, 2)]);
    }

    #[test]
    fn forward_tsn_skips_into_gap_block() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        observe(&mut d, &[11, 12, 14]);
        d.handle_forward_tsn(Tsn(13));
        assert_eq!(d.cumulative_tsn(), Tsn(14));
        assert!(d.gaps().is_empty());
    }

    #[test]
    fn example_from_rfc3758() {
        let mut d = DataTracker::new(Tsn(101), &Options::default());
        observe(&mut d, &[102, 104, 105, 107]);
        d.handle_forward_tsn(Tsn(103));
        let sack = d.create_sack(A_RWND, MTU);
        assert_eq!(sack.cumulative_tsn_ack, Tsn(105));
        expect_gaps(&sack, &[(2, 2)]);
    }

    #[test]
    fn stale_forward_tsn_asks_for_sack() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        observe(&mut d, &[11, 12]);
        d.sack_sent();
        assert!(!d.handle_forward_tsn(Tsn(12)));
        assert!(d.time_for_sack(false));
    }

    #[test]
    fn sack_is_truncated_to_fit() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        for i in 0..10 {
            d.observe(Tsn(13 + i * 2));
        }
        d.observe(Tsn(13));
        d.observe(Tsn(15));

        // Room for the fixed part and three 4-byte entries.
        let sack = d.create_sack(A_RWND, 16 + 12);
        assert_eq!(sack.gap_ack_blocks.len(), 3);
        assert!(sack.duplicate_tsns.is_empty());
        assert!(sack.serialized_size() <= 28);

        d.observe(Tsn(13));
        let sack = d.create_sack(A_RWND, MTU);
        assert_eq!(sack.gap_ack_blocks.len(), 10);
        assert_eq!(sack.duplicate_tsns, vec![Tsn(13)]);
    }

    #[test]
    fn first_data_is_acked_immediately() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        d.observe(Tsn(11));
        d.schedule_sack(START_TIME);
        assert!(d.time_for_sack(false));
        d.sack_sent();
        assert!(!d.time_for_sack(true));
    }

    #[test]
    fn every_second_packet_is_acked() {
        let options = Options { sack_frequency: 2, ..Default::default() };
        let mut d = DataTracker::new(INITIAL_TSN, &options);
        d.observe(Tsn(11));
        d.schedule_sack(START_TIME);
        d.sack_sent();

        d.observe(Tsn(12));
        d.schedule_sack(START_TIME);
        assert!(!d.time_for_sack(false));
        assert!(d.time_for_sack(true));
        assert_eq!(d.next_timeout(), Some(START_TIME + options.sack_delay));

        d.observe(Tsn(13));
        d.schedule_sack(START_TIME);
        assert!(d.time_for_sack(false));
        d.sack_sent();
        assert_eq!(d.next_timeout(), None);
    }

    #[test]
    fn delayed_sack_timer_fires() {
        let options = Options {
            sack_frequency: 4,
            sack_delay: Duration::from_millis(200),
            ..Default::default()
        };
        let mut d = DataTracker::new(INITIAL_TSN, &options);
        d.observe(Tsn(11));
        d.schedule_sack(START_TIME);
        d.sack_sent();

        d.observe(Tsn(12));
        d.schedule_sack(START_TIME);
        assert!(!d.time_for_sack(false));
        d.handle_timeout(START_TIME + Duration::from_millis(199));
        assert!(!d.time_for_sack(false));
        d.handle_timeout(START_TIME + Duration::from_millis(200));
        assert!(d.time_for_sack(false));
    }

    #[test]
    fn gaps_ask_for_immediate_sack() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        d.observe(Tsn(11));
        d.schedule_sack(START_TIME);
        d.sack_sent();

        d.observe(Tsn(13));
        d.schedule_sack(START_TIME);
        assert!(d.time_for_sack(false));
    }

    #[test]
    fn packets_without_data_do_not_count() {
        let mut d = DataTracker::new(INITIAL_TSN, &Options::default());
        d.schedule_sack(START_TIME);
        assert!(!d.time_for_sack(true));
        assert_eq!(d.next_timeout(), None);
    }

    #[test]
    fn rejects_tsns_far_ahead() {
        let d = DataTracker::new(INITIAL_TSN, &Options::default());
        assert!(d.is_tsn_valid(Tsn(11)));
        assert!(d.is_tsn_valid(Tsn(5)));
        assert!(!d.is_tsn_valid(Tsn(11 + MAX_ACCEPTED_OUTSTANDING_FRAGMENTS)));
        assert!(d.will_increase_cum_tsn(Tsn(11)));
        assert!(!d.will_increase_cum_tsn(Tsn(12)));
    }
}
