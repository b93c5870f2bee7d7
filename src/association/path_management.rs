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

use crate::api::Indication;
use crate::api::SctpError;
use crate::api::SctpTime;
use crate::association::context::Context;
use crate::association::path::alternate_path;
use crate::association::state::State;
use crate::association::transmission_control_block::TransmissionControlBlock;
use crate::types::PathId;
#[cfg(not(test))]
use log::info;
#[cfg(not(test))]
use log::warn;
use std::net::IpAddr;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;

/// Accounts for a retransmission timeout or an unanswered heartbeat on `id`. A path that has
/// failed too many times in a row is marked inactive, and if it was the primary path, another
/// active path takes over.
pub(crate) fn record_path_error(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    id: PathId,
) {
    ctx.tx_error_counter.increment();
    let p = &mut tcb.paths[id.0];
    p.error_count += 1;

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.2-4>:
    //
    //   When the value of this counter exceeds the limit indicated in the protocol parameter
    //   'Path.Max.Retrans', the endpoint SHOULD mark the destination transport address as
    //   inactive, and a notification SHOULD be sent to the upper layer.
    if !p.active || p.error_count <= ctx.options.path_max_retrans {
        return;
    }
    p.active = false;
    warn!("{}Path to {} is inactive after {} errors", ctx.log_prefix, p.address, p.error_count);
    ctx.emit(Indication::PathStatus { address: p.address, active: false });

    if id == tcb.primary {
        let new_primary = alternate_path(&tcb.paths, id);
        if new_primary != id {
            info!(
                "{}Primary path switched from {} to {}",
                ctx.log_prefix, tcb.paths[id.0].address, tcb.paths[new_primary.0].address
            );
            tcb.primary = new_primary;
        }
    }
    // Retransmissions waiting for the failed path go to the primary instead.
    if tcb.primary != id {
        tcb.retransmission_queue.retarget_unsent(id, tcb.primary);
    }
}

/// Whether every destination of the association has failed.
pub(crate) fn all_paths_inactive(tcb: &TransmissionControlBlock) -> bool {
    tcb.paths.iter().all(|p| !p.active)
}

/// Keeps T3-rtx running on the primary path while a FORWARD-TSN is pending, so that a lost one is
/// sent again.
pub(crate) fn ensure_forward_tsn_timer(tcb: &mut TransmissionControlBlock, now: SctpTime) {
    if !tcb.retransmission_queue.should_send_forward_tsn() {
        return;
    }
    let primary = tcb.primary;
    let p = &mut tcb.paths[primary.0];
    if !p.t3_rtx.is_running() {
        let rto = p.rto.rto();
        p.t3_rtx.start_with(now, rto);
    }
}

pub(crate) fn handle_t3_rtx_timeouts(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let Some(tcb) = state.tcb_mut() else {
        return;
    };
    let mut expired = false;
    for idx in 0..tcb.paths.len() {
        if !tcb.paths[idx].t3_rtx.expire(now) {
            continue;
        }
        expired = true;
        let id = PathId(idx);

        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.4.1>:
        //
        //   [...] when its peer is multi-homed, an endpoint SHOULD try to retransmit a chunk
        //   that timed out to an active destination transport address that is different from
        //   the last destination address to which the DATA chunk was sent.
        let new_path = alternate_path(&tcb.paths, id);
        tcb.retransmission_queue.handle_t3_expiry(id, new_path, &mut tcb.paths, tcb.cc.as_ref());
        record_path_error(tcb, ctx, id);
        if tcb.retransmission_queue.should_send_forward_tsn() {
            ctx.limit_forward_tsn_until = now;
        }
    }
    if !expired {
        return;
    }

    ctx.send_buffered_packets(state, now);
    if let Some(tcb) = state.tcb_mut() {
        ensure_forward_tsn_timer(tcb, now);
    }
}

pub(crate) fn handle_cwnd_decay_timeouts(state: &mut State, now: SctpTime) {
    let Some(tcb) = state.tcb_mut() else {
        return;
    };
    for p in tcb.paths.iter_mut() {
        if p.cwnd_decay.as_mut().is_some_and(|t| t.expire(now)) {
            let mtu = p.mtu;
            tcb.cc.after_cwnd_timeout(&mut p.cc, mtu);
        }
    }
}

pub(crate) fn set_primary(
    state: &mut State,
    ctx: &mut Context,
    address: IpAddr,
) -> Result<(), SctpError> {
    let Some(tcb) = state.tcb_mut() else {
        return Err(SctpError::NotConnected);
    };
    let Some(id) = tcb.path_by_address(address) else {
        return Err(SctpError::UnsupportedOperation);
    };
    info!("{}Primary path set to {}", ctx.log_prefix, address);
    tcb.primary = id;
    tcb.original_primary = id;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AppHandle;
    use crate::api::Options;
    use crate::api::PpId;
    use crate::api::StreamId;
    use crate::association::transmission_control_block::Handshake;
    use crate::events::Events;
    use crate::packet::data::Data;
    use crate::tx::send_queue::DataToSend;
    use crate::types::OutgoingMessageId;
    use crate::types::Ssn;
    use crate::types::Tsn;
    use std::cell::RefCell;
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    fn tcb(options: &Options, addresses: &[IpAddr]) -> TransmissionControlBlock {
        let handshake = Handshake {
            my_verification_tag: 1,
            my_initial_tsn: Tsn(10),
            peer_verification_tag: 2,
            peer_initial_tsn: Tsn(20),
            peer_rwnd: 10000,
            tie_tag: 0,
            inbound_streams: 1,
            outbound_streams: 1,
            partial_reliability: false,
        };
        TransmissionControlBlock::new(
            options,
            "",
            AppHandle::new(1, 1),
            &handshake,
            (1, 2),
            addresses[0],
            addresses,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Rc::new(RefCell::new(Events::new())),
        )
    }

    fn addr(i: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, i))
    }

    #[test]
    fn primary_fails_over_after_path_max_retrans() {
        let options = Options { path_max_retrans: 2, ..Default::default() };
        let mut tcb = tcb(&options, &[addr(1), addr(2)]);
        let mut ctx = crate::association::tests::context(&options);

        for _ in 0..2 {
            record_path_error(&mut tcb, &mut ctx, PathId(0));
        }
        assert!(tcb.paths[0].active);
        assert_eq!(tcb.primary, PathId(0));

        record_path_error(&mut tcb, &mut ctx, PathId(0));
        assert!(!tcb.paths[0].active);
        assert_eq!(tcb.primary, PathId(1));
        assert!(!all_paths_inactive(&tcb));
        assert_eq!(ctx.tx_error_counter.value(), 3);
    }

    #[test]
    fn failed_secondary_path_hands_its_retransmissions_to_primary() {
        let options = Options { path_max_retrans: 0, ..Default::default() };
        let mut tcb = tcb(&options, &[addr(1), addr(2)]);
        let mut ctx = crate::association::tests::context(&options);
        let data = DataToSend {
            message_id: OutgoingMessageId(1),
            data: Data {
                stream_id: StreamId(0),
                ssn: Ssn(0),
                ppid: PpId(0),
                payload: vec![1, 2, 3],
                is_beginning: true,
                is_end: true,
                is_unordered: false,
            },
            expires_at: None,
            max_retransmissions: None,
        };
        let q = &mut tcb.retransmission_queue;
        q.add_sent(SctpTime::zero(), PathId(1), &mut tcb.paths, data);
        q.handle_t3_expiry(PathId(1), PathId(1), &mut tcb.paths, tcb.cc.as_ref());
        assert!(q.has_chunks_to_retransmit(PathId(1)));

        record_path_error(&mut tcb, &mut ctx, PathId(1));
        assert!(!tcb.paths[1].active);
        assert_eq!(tcb.primary, PathId(0));
        assert!(!tcb.retransmission_queue.has_chunks_to_retransmit(PathId(1)));
        assert!(tcb.retransmission_queue.has_chunks_to_retransmit(PathId(0)));
    }

    #[test]
    fn single_path_failure_leaves_no_active_path() {
        let options = Options { path_max_retrans: 0, ..Default::default() };
        let mut tcb = tcb(&options, &[addr(1)]);
        let mut ctx = crate::association::tests::context(&options);

        record_path_error(&mut tcb, &mut ctx, PathId(0));
        assert!(all_paths_inactive(&tcb));
        assert_eq!(tcb.primary, PathId(0));
    }

    #[test]
    fn set_primary_requires_known_address() {
        let options = Options::default();
        let mut state = State::Established(tcb(&options, &[addr(1), addr(2)]));
        let mut ctx = crate::association::tests::context(&options);

        assert_eq!(
            set_primary(&mut state, &mut ctx, addr(3)),
            Err(SctpError::UnsupportedOperation)
        );
        assert_eq!(set_primary(&mut state, &mut ctx, addr(2)), Ok(()));
        let tcb = state.tcb().unwrap();
        assert_eq!(tcb.primary, PathId(1));
        assert_eq!(tcb.original_primary, PathId(1));
    }
}
