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

use crate::api::ErrorKind;
use crate::api::Indication;
use crate::api::SctpTime;
use crate::association::Incoming;
use crate::association::context::Context;
use crate::association::path_management::record_path_error;
use crate::association::state::State;
use crate::association::state_cookie::read_address;
use crate::association::state_cookie::write_address;
use crate::association::transmission_control_block::TransmissionControlBlock;
use crate::packet::chunk::Chunk;
use crate::packet::heartbeat_ack_chunk::HeartbeatAckChunk;
use crate::packet::heartbeat_info_parameter::HeartbeatInfoParameter;
use crate::packet::heartbeat_request_chunk::HeartbeatRequestChunk;
use crate::packet::read_u64_be;
use crate::types::PathId;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::info;
use rand::Rng;
use std::net::IpAddr;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;
use std::time::Duration;

/// Heartbeat info: the nonce, the send time in milliseconds and the destination address.
fn make_info(nonce: u64, now: SctpTime, address: IpAddr) -> Vec<u8> {
    let mut info = Vec::with_capacity(16 + 17);
    info.extend_from_slice(&nonce.to_be_bytes());
    info.extend_from_slice(&(now.as_duration().as_millis() as u64).to_be_bytes());
    write_address(&mut info, address);
    info
}

fn parse_info(info: &[u8]) -> Option<(u64, SctpTime, IpAddr)> {
    if info.len() < 16 {
        return None;
    }
    let nonce = read_u64_be!(&info[0..8]);
    let sent_at = SctpTime::from_millis(read_u64_be!(&info[8..16]));
    let (address, _) = read_address(&info[16..])?;
    Some((nonce, sent_at, address))
}

/// The time until the next heartbeat on an idle path.
fn jittered_interval(ctx: &mut Context, rto: Duration) -> Duration {
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.3-3>:
    //
    //   On an idle destination address that is allowed to heartbeat, it is RECOMMENDED that a
    //   HEARTBEAT chunk is sent once per RTO of that destination address plus the protocol
    //   parameter 'HB.interval', with jittering of +/- 50% of the RTO value, and exponential
    //   backoff of the RTO if the previous HEARTBEAT chunk is unanswered.
    let jitter = rto.as_secs_f64() * ctx.rng.random_range(-0.5..=0.5);
    Duration::from_secs_f64(((ctx.options.hb_interval + rto).as_secs_f64() + jitter).max(0.0))
}

/// Starts the heartbeat interval timers of all paths. Paths other than the primary haven't been
/// confirmed yet, so they are probed after one RTO.
pub(crate) fn start_heartbeats(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    now: SctpTime,
) {
    let primary = tcb.primary;
    for p in tcb.paths.iter_mut() {
        let rto = p.rto.rto();
        let delay = if p.id != primary && !p.confirmed { rto } else { jittered_interval(ctx, rto) };
        p.heartbeat_interval.start_with(now, delay);
    }
}

fn send_heartbeat(
    tcb: &mut TransmissionControlBlock,
    ctx: &mut Context,
    now: SctpTime,
    id: PathId,
) {
    let nonce: u64 = ctx.rng.random();
    let mut builder = tcb.new_packet();
    let p = &mut tcb.paths[id.0];
    builder.add(&Chunk::HeartbeatRequest(HeartbeatRequestChunk {
        info: HeartbeatInfoParameter { info: make_info(nonce, now, p.address) },
    }));
    debug!("{}Sending HEARTBEAT to {}", ctx.log_prefix, p.address);
    let rto = p.rto.rto();
    p.heartbeat_nonce = Some(nonce);
    p.heartbeat_timeout.start_with(now, rto);
    ctx.send_to_path(p, &mut builder);
}

pub(crate) fn handle_heartbeat_timeouts(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let Some(tcb) = state.tcb_mut() else {
        return;
    };
    for idx in 0..tcb.paths.len() {
        let id = PathId(idx);
        if tcb.paths[idx].heartbeat_timeout.expire(now) {
            let p = &mut tcb.paths[idx];
            info!("{}HEARTBEAT to {} was not acked", ctx.log_prefix, p.address);
            p.heartbeat_nonce = None;
            p.rto.back_off();
            record_path_error(tcb, ctx, id);
        }

        if tcb.paths[idx].heartbeat_interval.expire(now) {
            let rto = tcb.paths[idx].rto.rto();
            let next = jittered_interval(ctx, rto);
            let p = &mut tcb.paths[idx];
            p.heartbeat_interval.start_with(now, next);
            if p.heartbeat_timeout.is_running() || (p.confirmed && p.outstanding_bytes() > 0) {
                // Either a heartbeat is already in flight, or data is probing the path.
                continue;
            }
            send_heartbeat(tcb, ctx, now, id);
        }
    }
}

pub(crate) fn handle_heartbeat_request(
    state: &mut State,
    ctx: &mut Context,
    incoming: &Incoming,
    chunk: HeartbeatRequestChunk,
) {
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.3-9>:
    //
    //   The receiver of the HEARTBEAT chunk SHOULD immediately respond with a HEARTBEAT ACK
    //   chunk that contains the Heartbeat Information TLV, together with any other received
    //   TLVs, copied unchanged from the received HEARTBEAT chunk.
    if let Some(tcb) = state.tcb() {
        let mut builder = tcb.new_packet();
        builder.add(&Chunk::HeartbeatAck(HeartbeatAckChunk { info: chunk.info }));
        ctx.send_packet(incoming.dst, incoming.src, builder.build());
    }
}

pub(crate) fn handle_heartbeat_ack(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
    chunk: HeartbeatAckChunk,
) {
    let Some(tcb) = state.tcb_mut() else {
        return;
    };
    let Some((nonce, sent_at, address)) = parse_info(&chunk.info.info) else {
        ctx.emit(Indication::Error {
            kind: ErrorKind::ParseFailed,
            message: "Failed to parse HEARTBEAT-ACK; Invalid info parameter".into(),
        });
        return;
    };
    let Some(id) = tcb.path_by_address(address) else {
        return;
    };
    let p = &mut tcb.paths[id.0];
    if p.heartbeat_nonce != Some(nonce) {
        debug!("{}Ignoring HEARTBEAT-ACK with unexpected nonce from {}", ctx.log_prefix, address);
        return;
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.3-11>:
    //
    //   Upon the receipt of the HEARTBEAT ACK chunk, the sender of the HEARTBEAT chunk MUST
    //   clear the error counter of the destination transport address to which the HEARTBEAT
    //   chunk was sent and mark the destination transport address as active if it is not so
    //   marked. The endpoint SHOULD also clear the association overall error counter.
    p.heartbeat_nonce = None;
    p.heartbeat_timeout.stop();
    p.confirmed = true;
    p.error_count = 0;
    p.rto.observe_rtt(now - sent_at);
    ctx.tx_error_counter.reset();

    if !p.active {
        p.active = true;
        info!("{}Path to {} is active again", ctx.log_prefix, address);
        ctx.emit(Indication::PathStatus { address, active: true });
        if ctx.options.reactivate_primary_path
            && id == tcb.original_primary
            && tcb.primary != id
        {
            info!("{}Switching primary path back to {}", ctx.log_prefix, address);
            tcb.primary = id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::net::Ipv6Addr;

    #[test]
    fn info_reads_back() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let info = make_info(0xdead_beef_0000_0001, SctpTime::from_millis(12345), v4);
        assert_eq!(
            parse_info(&info),
            Some((0xdead_beef_0000_0001, SctpTime::from_millis(12345), v4))
        );

        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        let info = make_info(7, SctpTime::zero(), v6);
        assert_eq!(parse_info(&info), Some((7, SctpTime::zero(), v6)));
    }

    #[test]
    fn truncated_info_is_rejected() {
        let info = make_info(1, SctpTime::zero(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(parse_info(&info[..info.len() - 1]), None);
        assert_eq!(parse_info(&info[..10]), None);
    }
}
