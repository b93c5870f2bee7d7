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
use crate::api::Options;
use crate::api::SctpTime;
use crate::api::UNSPECIFIED_ADDRESS;
use crate::association::path::PathVariables;
use crate::association::state_cookie::StateCookie;
use crate::packet::chunk::Chunk;
use crate::packet::sctp_packet::SctpPacketBuilder;
use crate::rx::data_tracker::DataTracker;
use crate::rx::reassembly_queue::ReassemblyQueue;
use crate::tx::congestion_control;
use crate::tx::congestion_control::CongestionControl;
use crate::tx::retransmission_queue::RetransmissionQueue;
use crate::types::PathId;
use crate::types::Tsn;
use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;

/// What the two endpoints agreed on during the four-way handshake.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Handshake {
    pub my_verification_tag: u32,
    pub my_initial_tsn: Tsn,
    pub peer_verification_tag: u32,
    pub peer_initial_tsn: Tsn,
    pub peer_rwnd: u32,
    pub tie_tag: u64,
    pub inbound_streams: u16,
    pub outbound_streams: u16,
    pub partial_reliability: bool,
}

impl From<&StateCookie> for Handshake {
    fn from(cookie: &StateCookie) -> Self {
        Self {
            my_verification_tag: cookie.my_tag,
            my_initial_tsn: cookie.my_initial_tsn,
            peer_verification_tag: cookie.peer_tag,
            peer_initial_tsn: cookie.peer_initial_tsn,
            peer_rwnd: cookie.a_rwnd,
            tie_tag: cookie.tie_tag,
            inbound_streams: cookie.inbound_streams,
            outbound_streams: cookie.outbound_streams,
            partial_reliability: cookie.partial_reliability,
        }
    }
}

/// The Transmission Control Block: all state of an association that exists once the peer's
/// verification tag is known.
pub(crate) struct TransmissionControlBlock {
    pub my_verification_tag: u32,
    pub my_initial_tsn: Tsn,
    pub peer_verification_tag: u32,
    pub peer_initial_tsn: Tsn,
    pub tie_tag: u64,
    pub inbound_streams: u16,
    pub outbound_streams: u16,
    pub partial_reliability: bool,

    /// One entry per peer transport address. Never shrinks.
    pub paths: Vec<PathVariables>,
    pub primary: PathId,
    /// The primary path as last chosen at setup or by the application. It becomes primary again
    /// when it recovers, if [`Options::reactivate_primary_path`] is set.
    pub original_primary: PathId,

    pub data_tracker: DataTracker,
    pub reassembly_queue: ReassemblyQueue,
    pub retransmission_queue: RetransmissionQueue,
    pub cc: Box<dyn CongestionControl>,

    local_port: u16,
    remote_port: u16,
    max_packet_size: usize,
}

impl TransmissionControlBlock {
    /// Creates the TCB. `primary_address` becomes the primary path and is the only path that
    /// starts out confirmed; every other address in `peer_addresses` gets a path of its own.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: &Options,
        log_prefix: &str,
        handle: AppHandle,
        handshake: &Handshake,
        ports: (u16, u16),
        primary_address: IpAddr,
        peer_addresses: &[IpAddr],
        local_address: IpAddr,
        events: Rc<RefCell<dyn EventSink>>,
    ) -> Self {
        let cc = congestion_control::create(options.congestion_control);
        let mut addresses = vec![primary_address];
        for address in peer_addresses {
            if !addresses.contains(address) && *address != UNSPECIFIED_ADDRESS {
                addresses.push(*address);
            }
        }
        let mut paths: Vec<PathVariables> = addresses
            .into_iter()
            .enumerate()
            .map(|(i, address)| {
                PathVariables::new(
                    PathId(i),
                    address,
                    local_address,
                    options,
                    cc.as_ref(),
                    handshake.peer_rwnd,
                )
            })
            .collect();
        paths[0].confirmed = true;

        TransmissionControlBlock {
            my_verification_tag: handshake.my_verification_tag,
            my_initial_tsn: handshake.my_initial_tsn,
            peer_verification_tag: handshake.peer_verification_tag,
            peer_initial_tsn: handshake.peer_initial_tsn,
            tie_tag: handshake.tie_tag,
            inbound_streams: handshake.inbound_streams,
            outbound_streams: handshake.outbound_streams,
            partial_reliability: handshake.partial_reliability,
            paths,
            primary: PathId(0),
            original_primary: PathId(0),
            data_tracker: DataTracker::new(handshake.peer_initial_tsn, options),
            reassembly_queue: ReassemblyQueue::new(
                log_prefix,
                handle,
                handshake.inbound_streams,
                options,
                events,
            ),
            retransmission_queue: RetransmissionQueue::new(
                log_prefix,
                handshake.my_initial_tsn,
                handshake.peer_rwnd,
                options,
                handshake.partial_reliability,
            ),
            cc,
            local_port: ports.0,
            remote_port: ports.1,
            max_packet_size: options.mtu,
        }
    }

    pub fn new_packet(&self) -> SctpPacketBuilder {
        SctpPacketBuilder::new(
            self.peer_verification_tag,
            self.local_port,
            self.remote_port,
            self.max_packet_size,
        )
    }

    pub fn primary_path(&self) -> &PathVariables {
        &self.paths[self.primary.0]
    }

    pub fn path_by_address(&self, address: IpAddr) -> Option<PathId> {
        self.paths.iter().find(|p| p.address == address).map(|p| p.id)
    }

    pub fn remote_addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.paths.iter().map(|p| p.address)
    }

    /// Addresses of the active paths, in path order.
    pub fn active_addresses(&self) -> Vec<IpAddr> {
        self.paths.iter().filter(|p| p.active).map(|p| p.address).collect()
    }

    pub fn outstanding_bytes(&self) -> usize {
        RetransmissionQueue::outstanding_bytes(&self.paths)
    }

    /// Adds a SACK reflecting what has been received so far.
    pub fn add_sack(&mut self, builder: &mut SctpPacketBuilder) {
        let a_rwnd = self.reassembly_queue.a_rwnd();
        let sack = self.data_tracker.create_sack(a_rwnd, builder.bytes_remaining());
        builder.add(&Chunk::Sack(sack));
        self.data_tracker.sack_sent();
    }

    /// The earliest deadline of the timers owned by the TCB.
    pub fn next_timeout(&self) -> Option<SctpTime> {
        self.paths
            .iter()
            .flat_map(|p| {
                [
                    p.t3_rtx.next_expiry(),
                    p.heartbeat_interval.next_expiry(),
                    p.heartbeat_timeout.next_expiry(),
                    p.cwnd_decay.as_ref().and_then(|t| t.next_expiry()),
                ]
            })
            .chain(std::iter::once(self.data_tracker.next_timeout()))
            .flatten()
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Events;
    use std::net::Ipv4Addr;

    fn handshake() -> Handshake {
        Handshake {
            my_verification_tag: 1,
            my_initial_tsn: Tsn(100),
            peer_verification_tag: 2,
            peer_initial_tsn: Tsn(200),
            peer_rwnd: 10000,
            tie_tag: 3,
            inbound_streams: 5,
            outbound_streams: 6,
            partial_reliability: false,
        }
    }

    fn addr(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn primary_is_first_and_duplicates_are_merged() {
        let tcb = TransmissionControlBlock::new(
            &Options::default(),
            "",
            AppHandle::new(1, 1),
            &handshake(),
            (5000, 5001),
            addr(2),
            &[addr(1), addr(2), UNSPECIFIED_ADDRESS, addr(3)],
            addr(9),
            Rc::new(RefCell::new(Events::new())),
        );
        assert_eq!(tcb.remote_addresses().collect::<Vec<_>>(), vec![addr(2), addr(1), addr(3)]);
        assert_eq!(tcb.primary_path().address, addr(2));
        assert!(tcb.paths[0].confirmed);
        assert!(!tcb.paths[1].confirmed);
        assert_eq!(tcb.path_by_address(addr(3)), Some(PathId(2)));
        assert_eq!(tcb.path_by_address(addr(4)), None);
        assert_eq!(tcb.new_packet().verification_tag(), 2);
        assert_eq!(tcb.next_timeout(), None);
    }
}
