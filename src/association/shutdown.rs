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
use crate::association::Incoming;
use crate::association::context::Context;
use crate::association::state::CookieEchoState;
use crate::association::state::ShutdownState;
use crate::association::state::State;
use crate::association::transmission_control_block::TransmissionControlBlock;
use crate::packet::chunk::Chunk;
use crate::packet::sack_chunk::SackChunk;
use crate::packet::sctp_packet::SctpPacketBuilder;
use crate::packet::shutdown_ack_chunk::ShutdownAckChunk;
use crate::packet::shutdown_chunk::ShutdownChunk;
use crate::packet::shutdown_complete_chunk::ShutdownCompleteChunk;
use crate::timer::Timer;
use crate::transition_between;
use crate::types::Tsn;
#[cfg(not(test))]
use log::info;
#[cfg(test)]
use std::println as info;

pub(crate) fn do_shutdown(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
) -> Result<(), SctpError> {
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-2>:
    //
    //   Upon receipt of the SHUTDOWN primitive from its upper layer, the endpoint enters the
    //   SHUTDOWN-PENDING state and remains there until all outstanding data has been
    //   acknowledged by its peer.
    match state {
        State::Closed => Err(SctpError::NotConnected),
        State::ShutdownPending(_)
        | State::ShutdownSent(_)
        | State::ShutdownAckSent(_)
        | State::ShutdownReceived(_) => {
            // Already shutting down.
            Ok(())
        }
        State::CookieWait(_) => {
            // Nothing has been sent that needs to be acknowledged.
            ctx.internal_close(state, Indication::Closed);
            Ok(())
        }
        State::CookieEchoed(_) | State::Established(_) => {
            transition_between!(*state,
                State::CookieEchoed(CookieEchoState { tcb, .. }) | State::Established(tcb) =>
                    State::ShutdownPending(tcb)
            );
            maybe_send_shutdown(state, ctx, now);
            Ok(())
        }
    }
}

/// Applies the Cumulative TSN Ack of a SHUTDOWN chunk as if it were a SACK without gap ack blocks.
fn process_cumulative_ack(tcb: &mut TransmissionControlBlock, now: SctpTime, cumulative: Tsn) {
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-11>:
    //
    //   Since the SHUTDOWN chunk does not contain Gap Ack Blocks, the receiver of the SHUTDOWN
    //   chunk MUST NOT interpret the lack of a Gap Ack Block as a renege.
    let outstanding = u32::try_from(tcb.outstanding_bytes()).unwrap_or(u32::MAX);
    let sack = SackChunk {
        cumulative_tsn_ack: cumulative,
        a_rwnd: tcb.retransmission_queue.peer_rwnd().saturating_add(outstanding),
        ..Default::default()
    };
    tcb.retransmission_queue.process_sack(now, &sack, &mut tcb.paths, tcb.cc.as_ref());
}

pub(crate) fn handle_shutdown(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
    chunk: ShutdownChunk,
) {
    match state {
        State::Closed
        | State::ShutdownAckSent(_)
        | State::CookieWait(_)
        | State::CookieEchoed(_) => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-21>:
            //
            //   If a SHUTDOWN chunk is received in the COOKIE-WAIT or COOKIE ECHOED state, the
            //   SHUTDOWN chunk SHOULD be silently discarded.
        }
        State::Established(tcb) | State::ShutdownPending(tcb) => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-6>:
            //
            //   Upon reception of the SHUTDOWN chunk, the peer endpoint does the following:
            //   enter the SHUTDOWN-RECEIVED state, stop accepting new data from its SCTP user,
            //   and verify, by checking the Cumulative TSN Ack field of the chunk, that all its
            //   outstanding DATA chunks have been received by the SHUTDOWN chunk sender.
            process_cumulative_ack(tcb, now, chunk.cumulative_tsn_ack);
            transition_between!(*state,
                State::Established(tcb) | State::ShutdownPending(tcb) =>
                    State::ShutdownReceived(tcb)
            );
            info!("{}Received SHUTDOWN", ctx.log_prefix);
            ctx.emit(Indication::ShutdownReceived);
            maybe_send_shutdown_ack(state, ctx, now);
        }
        State::ShutdownReceived(tcb) => {
            process_cumulative_ack(tcb, now, chunk.cumulative_tsn_ack);
            maybe_send_shutdown_ack(state, ctx, now);
        }
        State::ShutdownSent(s) => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-22>:
            //
            //   If an endpoint is in the SHUTDOWN-SENT state and receives a SHUTDOWN chunk from
            //   its peer, the endpoint SHOULD respond immediately with a SHUTDOWN ACK chunk to
            //   its peer and move into the SHUTDOWN-ACK-SENT state, restarting its T2-shutdown
            //   timer.
            process_cumulative_ack(&mut s.tcb, now, chunk.cumulative_tsn_ack);
            s.t2_shutdown.start(now);
            transition_between!(*state,
                State::ShutdownSent(s) => State::ShutdownAckSent(s)
            );
            send_shutdown_ack(state, ctx);
        }
    }
}

pub(crate) fn handle_shutdown_ack(state: &mut State, ctx: &mut Context, incoming: &Incoming) {
    match state {
        State::ShutdownSent(ShutdownState { tcb, .. })
        | State::ShutdownAckSent(ShutdownState { tcb, .. }) => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-14>:
            //
            //   Upon the receipt of the SHUTDOWN ACK chunk, the sender of the SHUTDOWN chunk
            //   MUST stop the T2-shutdown timer, send a SHUTDOWN COMPLETE chunk to its peer,
            //   and remove all record of the association.
            let mut builder = tcb.new_packet();
            builder.add(&Chunk::ShutdownComplete(ShutdownCompleteChunk { tag_reflected: false }));
            ctx.send_to_path(tcb.primary_path(), &mut builder);
            ctx.internal_close(state, Indication::Closed);
        }
        State::CookieWait(_) | State::CookieEchoed(_) => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.4-3.5.1>:
            //
            //   If the packet contains a SHUTDOWN ACK chunk, the receiver SHOULD respond to the
            //   sender of the OOTB packet with a SHUTDOWN COMPLETE chunk. When sending the
            //   SHUTDOWN COMPLETE chunk, the receiver of the OOTB packet MUST fill in the
            //   Verification Tag field of the outbound packet with the Verification Tag
            //   received in the SHUTDOWN ACK chunk and set the T bit in the Chunk Flags to
            //   indicate that the Verification Tag is reflected.
            let mut builder = SctpPacketBuilder::new(
                incoming.header.verification_tag,
                incoming.header.destination_port,
                incoming.header.source_port,
                ctx.options.mtu,
            );
            builder.add(&Chunk::ShutdownComplete(ShutdownCompleteChunk { tag_reflected: true }));
            ctx.send_packet(incoming.dst, incoming.src, builder.build());
        }
        _ => {}
    }
}

pub(crate) fn handle_shutdown_complete(state: &mut State, ctx: &mut Context) {
    if let State::ShutdownAckSent(_) = state {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-15>:
        //
        //   Upon reception of the SHUTDOWN COMPLETE chunk, the endpoint verifies that it is in
        //   the SHUTDOWN-ACK-SENT state; if it is not, the chunk SHOULD be discarded. If the
        //   endpoint is in the SHUTDOWN-ACK-SENT state, the endpoint SHOULD stop the
        //   T2-shutdown timer and remove all knowledge of the association (and thus the
        //   association enters the CLOSED state).
        ctx.internal_close(state, Indication::PeerClosed);
    }
}

pub(crate) fn handle_t2_shutdown_timeout(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let (State::ShutdownSent(s) | State::ShutdownAckSent(s)) = state else {
        return;
    };
    if !s.t2_shutdown.expire(now) {
        return;
    }

    if s.t2_shutdown.is_running() {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-3>:
        //
        //   If the timer expires, the endpoint MUST resend the SHUTDOWN chunk with the updated
        //   last sequential TSN received from its peer.
        info!("{}T2-shutdown expired, retransmitting", ctx.log_prefix);
        if matches!(state, State::ShutdownSent(_)) {
            send_shutdown(state, ctx);
        } else {
            send_shutdown_ack(state, ctx);
        }
        return;
    }

    ctx.send_abort(state, None);
    ctx.internal_close(
        state,
        Indication::ConnectionLost { reason: "Too many retransmissions of SHUTDOWN".into() },
    );
}

/// Handles T5-shutdown-guard, which bounds the time a graceful shutdown may take.
pub(crate) fn handle_shutdown_guard_timeout(state: &mut State, ctx: &mut Context, now: SctpTime) {
    if !ctx.shutdown_guard.expire(now) {
        return;
    }
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-4>:
    //
    //   If the T5-shutdown-guard timer expires, the endpoint SHOULD abort the association by
    //   sending an ABORT chunk.
    info!("{}T5-shutdown-guard expired", ctx.log_prefix);
    ctx.send_abort(state, None);
    ctx.internal_close(
        state,
        Indication::Aborted { reason: "Shutdown guard timer expired".into() },
    );
}

pub(crate) fn maybe_send_shutdown_on_packet_received(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
    has_data: bool,
) {
    if let State::ShutdownSent(s) = state {
        if has_data {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-10>:
            //
            //   While in the SHUTDOWN-SENT state, the SHUTDOWN chunk sender MUST immediately
            //   respond to each received packet containing one or more DATA chunks with a
            //   SHUTDOWN chunk and restart the T2-shutdown timer.
            let rto = s.tcb.primary_path().rto.rto();
            s.t2_shutdown.set_duration(rto);
            s.t2_shutdown.start(now);
            send_shutdown(state, ctx);
        }
    }
}

fn new_t2_timer(tcb: &TransmissionControlBlock, ctx: &Context, now: SctpTime) -> Timer {
    let mut t2 = Timer::with_backoff(
        tcb.primary_path().rto.rto(),
        ctx.options.rto_max,
        ctx.options.assoc_max_retrans,
    );
    t2.start(now);
    t2
}

/// Whether everything the application asked to send has been acknowledged.
fn all_data_acked(tcb: &TransmissionControlBlock, ctx: &Context) -> bool {
    ctx.send_queue.is_empty() && tcb.retransmission_queue.is_empty()
}

pub(crate) fn maybe_send_shutdown(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let State::ShutdownPending(tcb) = state else {
        return;
    };
    if !all_data_acked(tcb, ctx) {
        return;
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-3>:
    //
    //   Once all its outstanding data has been acknowledged, the endpoint sends a SHUTDOWN
    //   chunk to its peer, including in the Cumulative TSN Ack field the last sequential TSN it
    //   has received from the peer. It SHOULD then start the T2-shutdown timer and enter the
    //   SHUTDOWN-SENT state.
    let t2_shutdown = new_t2_timer(tcb, ctx, now);
    transition_between!(*state,
        State::ShutdownPending(tcb) =>
            State::ShutdownSent(ShutdownState { tcb, t2_shutdown })
    );
    ctx.shutdown_guard.ensure_started(now);
    send_shutdown(state, ctx);
}

pub(crate) fn maybe_send_shutdown_ack(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let State::ShutdownReceived(tcb) = state else {
        return;
    };
    if !all_data_acked(tcb, ctx) {
        return;
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-12>:
    //
    //   If the receiver of the SHUTDOWN chunk has no more outstanding DATA chunks, the SHUTDOWN
    //   chunk receiver MUST send a SHUTDOWN ACK chunk and start a T2-shutdown timer of its own,
    //   entering the SHUTDOWN-ACK-SENT state. If the timer expires, the endpoint MUST resend
    //   the SHUTDOWN ACK chunk [...]
    let t2_shutdown = new_t2_timer(tcb, ctx, now);
    transition_between!(*state,
        State::ShutdownReceived(tcb) =>
            State::ShutdownAckSent(ShutdownState { tcb, t2_shutdown })
    );
    ctx.shutdown_guard.ensure_started(now);
    send_shutdown_ack(state, ctx);
}

pub(crate) fn send_shutdown(state: &mut State, ctx: &mut Context) {
    let State::ShutdownSent(ShutdownState { tcb, .. }) = state else { unreachable!() };
    let mut builder = tcb.new_packet();
    builder.add(&Chunk::Shutdown(ShutdownChunk {
        cumulative_tsn_ack: tcb.data_tracker.cumulative_tsn(),
    }));
    ctx.send_to_path(tcb.primary_path(), &mut builder);
}

pub(crate) fn send_shutdown_ack(state: &mut State, ctx: &mut Context) {
    let State::ShutdownAckSent(ShutdownState { tcb, .. }) = state else { unreachable!() };
    let mut builder = tcb.new_packet();
    builder.add(&Chunk::ShutdownAck(ShutdownAckChunk {}));
    ctx.send_to_path(tcb.primary_path(), &mut builder);
}
