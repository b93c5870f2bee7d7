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
use crate::api::Message;
use crate::api::SctpError;
use crate::api::SctpTime;
use crate::api::SendOptions;
use crate::api::StreamId;
use crate::association::Incoming;
use crate::association::context::Context;
use crate::association::path_management::ensure_forward_tsn_timer;
use crate::association::shutdown::maybe_send_shutdown;
use crate::association::shutdown::maybe_send_shutdown_ack;
use crate::association::state::State;
use crate::packet::abort_chunk::AbortChunk;
use crate::packet::chunk::Chunk;
use crate::packet::data::Data;
use crate::packet::error_causes::ErrorCause;
use crate::packet::error_causes::describe_error_causes;
use crate::packet::error_chunk::ErrorChunk;
use crate::packet::SerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::forward_tsn_chunk;
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::sack_chunk::SackChunk;
use crate::packet::sctp_packet::SctpPacketBuilder;
use crate::packet::unknown_chunk::UnknownChunk;
use crate::types::Tsn;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::info;
#[cfg(not(test))]
use log::warn;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;

pub(crate) fn handle_data(state: &mut State, ctx: &mut Context, tsn: Tsn, data: Data) {
    if data.payload.is_empty() {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2-6>:
        //
        //   If an endpoint receives a DATA chunk with no user data (i.e., the Length field is
        //   set to 16), it MUST send an ABORT chunk with a "No User Data" error cause.
        ctx.send_abort(state, Some(ErrorCause::NoUserData(tsn)));
        ctx.internal_close(
            state,
            Indication::Aborted { reason: "Received DATA chunk with no user data".into() },
        );
        return;
    }

    let kind = state.kind();
    let tcb = match state {
        State::Established(tcb) | State::ShutdownPending(tcb) | State::ShutdownReceived(tcb) => {
            tcb
        }
        State::ShutdownSent(s) => &mut s.tcb,
        _ => {
            debug!("{}Dropping DATA in state {}", ctx.log_prefix, kind);
            return;
        }
    };

    if !tcb.data_tracker.is_tsn_valid(tsn) {
        debug!("{}Dropping DATA with TSN {} outside of the window", ctx.log_prefix, tsn);
        return;
    }

    if !tcb.reassembly_queue.is_valid_stream(data.stream_id) {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.5-5>:
        //
        //   Upon receipt of a DATA chunk with an invalid Stream Identifier, the endpoint MUST
        //   acknowledge the reception of the DATA chunk following the normal procedure,
        //   immediately send an ERROR chunk with cause set to "Invalid Stream Identifier", and
        //   discard the DATA chunk.
        tcb.data_tracker.observe(tsn);
        let mut builder = tcb.new_packet();
        builder.add(&Chunk::Error(ErrorChunk {
            error_causes: vec![ErrorCause::InvalidStreamIdentifier(data.stream_id)],
        }));
        ctx.send_to_path(tcb.primary_path(), &mut builder);
        return;
    }

    if tcb.data_tracker.is_duplicate(tsn) {
        tcb.data_tracker.observe(tsn);
        return;
    }

    if !tcb.reassembly_queue.has_room_for(data.len()) {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.2-12>:
        //
        //   When the receiver's advertised window is 0, the receiver MUST drop any new incoming
        //   DATA chunk with a TSN larger than the largest TSN received so far. [...] If the new
        //   incoming DATA chunk holds a TSN value less than the largest TSN received so far,
        //   then the receiver SHOULD drop the largest TSN held for reordering and accept the
        //   new incoming DATA chunk.
        let cumulative_tsn = tcb.data_tracker.cumulative_tsn();
        match tcb.reassembly_queue.make_room_for_tsn(tsn, data.len(), cumulative_tsn) {
            Some(evicted) => {
                for evicted_tsn in evicted {
                    tcb.data_tracker.remove_from_gap_list(evicted_tsn);
                }
            }
            None => {
                info!("{}Receive buffer full, dropping DATA with TSN {}", ctx.log_prefix, tsn);
                tcb.data_tracker.force_immediate_sack();
                return;
            }
        }
    }

    if tcb.data_tracker.observe(tsn) {
        tcb.reassembly_queue.add(tsn, data);
    }
}

pub(crate) fn handle_sack(state: &mut State, ctx: &mut Context, now: SctpTime, sack: SackChunk) {
    if matches!(state, State::CookieEchoed(_)) {
        return;
    }
    let Some(tcb) = state.tcb_mut() else {
        return;
    };

    let Some(outcome) =
        tcb.retransmission_queue.process_sack(now, &sack, &mut tcb.paths, tcb.cc.as_ref())
    else {
        return;
    };
    if outcome.new_data_acked {
        ctx.tx_error_counter.reset();
    }
    if !outcome.fast_retransmits.is_empty() {
        debug!("{}TSNs to fast retransmit: {:?}", ctx.log_prefix, outcome.fast_retransmits);
    }
    ensure_forward_tsn_timer(tcb, now);

    match state {
        State::ShutdownPending(_) => maybe_send_shutdown(state, ctx, now),
        State::ShutdownReceived(_) => maybe_send_shutdown_ack(state, ctx, now),
        _ => (),
    }

    // Acked data frees up congestion window and receiver window, and fast retransmissions may be
    // pending.
    ctx.send_buffered_packets(state, now);
}

pub(crate) fn handle_forward_tsn(
    state: &mut State,
    ctx: &mut Context,
    incoming: &Incoming,
    chunk: ForwardTsnChunk,
) -> bool {
    let Some(tcb) = state.tcb_mut() else {
        return true;
    };
    if !tcb.partial_reliability {
        // From <https://datatracker.ietf.org/doc/html/rfc3758#section-3.3.1>:
        //
        //   [...] a receiver that did not negotiate PR-SCTP treats it as an unrecognized chunk
        //   type, with the upper bits "11": report it and skip it.
        let mut raw = vec![0; chunk.serialized_size()];
        chunk.serialize_to(&mut raw);
        let value = raw[TLV_HEADER_SIZE..].to_vec();
        return handle_unknown_chunk(
            state,
            ctx,
            incoming,
            UnknownChunk { typ: forward_tsn_chunk::CHUNK_TYPE, flags: 0, value },
        );
    }
    if tcb.data_tracker.handle_forward_tsn(chunk.new_cumulative_tsn) {
        tcb.reassembly_queue.handle_forward_tsn(chunk.new_cumulative_tsn, &chunk.skipped_streams);
    }
    true
}

/// Handles a chunk of an unknown type, as instructed by its two highest type bits. Returns
/// whether the rest of the packet should be processed.
pub(crate) fn handle_unknown_chunk(
    state: &mut State,
    ctx: &mut Context,
    incoming: &Incoming,
    chunk: UnknownChunk,
) -> bool {
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2-3.2.1>:
    //
    //   00: Stop processing this SCTP packet; discard the unrecognized chunk and all further
    //   chunks.
    //   01: Stop processing this SCTP packet, discard the unrecognized chunk and all further
    //   chunks, and report the unrecognized chunk in an ERROR chunk using the "Unrecognized
    //   Chunk Type" error cause.
    //   10: Skip this chunk and continue processing.
    //   11: Skip this chunk and continue processing, but report in an ERROR chunk using the
    //   "Unrecognized Chunk Type" error cause.
    info!("{}Received unknown chunk type {}", ctx.log_prefix, chunk.typ);
    if chunk.report() {
        let error = Chunk::Error(ErrorChunk {
            error_causes: vec![ErrorCause::UnrecognizedChunkType(chunk.to_bytes())],
        });
        match state.tcb() {
            Some(tcb) => {
                let mut builder = tcb.new_packet();
                builder.add(&error);
                ctx.send_to_path(tcb.primary_path(), &mut builder);
            }
            None => {
                let mut builder = SctpPacketBuilder::new(
                    incoming.header.verification_tag,
                    incoming.header.destination_port,
                    incoming.header.source_port,
                    ctx.options.mtu,
                );
                builder.add(&error);
                ctx.send_packet(incoming.dst, incoming.src, builder.build());
            }
        }
    }
    chunk.skip_and_continue()
}

pub(crate) fn handle_error(ctx: &mut Context, chunk: ErrorChunk) {
    let message = describe_error_causes(&chunk.error_causes);
    warn!("{}Received ERROR: {}", ctx.log_prefix, message);
    ctx.emit(Indication::Error { kind: ErrorKind::PeerReported, message });
}

pub(crate) fn handle_abort(state: &mut State, ctx: &mut Context, chunk: AbortChunk) {
    if matches!(state, State::Closed) {
        return;
    }
    let reason = describe_error_causes(&chunk.error_causes);
    info!("{}Received ABORT: {}", ctx.log_prefix, reason);
    ctx.internal_close(state, Indication::Aborted { reason });
}

/// Called after all chunks of a packet have been processed, to acknowledge received data.
pub(crate) fn maybe_send_sack(state: &mut State, ctx: &mut Context, now: SctpTime) {
    if matches!(state, State::CookieEchoed(_)) {
        return;
    }
    let Some(tcb) = state.tcb_mut() else {
        return;
    };
    tcb.data_tracker.schedule_sack(now);
    if tcb.data_tracker.time_for_sack(false) {
        let mut builder = tcb.new_packet();
        tcb.add_sack(&mut builder);
        ctx.send_buffered_packets_with(state, now, &mut builder);
    }
}

pub(crate) fn do_send(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
    message: Message,
    options: SendOptions,
) -> Result<(), SctpError> {
    match state {
        State::Closed => return Err(SctpError::NotConnected),
        State::ShutdownPending(_)
        | State::ShutdownSent(_)
        | State::ShutdownReceived(_)
        | State::ShutdownAckSent(_) => return Err(SctpError::UnsupportedOperation),
        State::CookieWait(_) | State::CookieEchoed(_) | State::Established(_) => {}
    }
    if message.payload.is_empty() {
        return Err(SctpError::EmptyPayload);
    }
    if message.stream_id.0 >= ctx.send_queue.stream_count() {
        return Err(SctpError::InvalidStream(message.stream_id));
    }

    ctx.send_queue.add(now, message, &options);
    if matches!(state, State::Established(_)) {
        ctx.send_buffered_packets(state, now);
    }
    Ok(())
}

/// Hands the next complete message on `stream_id` to the application. If that opened the
/// receive window again after it had been advertised as closed, the peer is told right away.
pub(crate) fn do_receive(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
    stream_id: StreamId,
) -> Result<(), SctpError> {
    let Some(tcb) = state.tcb_mut() else {
        return Err(SctpError::NotConnected);
    };
    if !tcb.reassembly_queue.is_valid_stream(stream_id) {
        return Err(SctpError::InvalidStream(stream_id));
    }
    let Some(message) = tcb.reassembly_queue.receive(stream_id) else {
        return Ok(());
    };
    ctx.emit(Indication::Data(message));

    if tcb.reassembly_queue.window_reopened() {
        debug!("{}Receive window reopened, sending window update", ctx.log_prefix);
        tcb.data_tracker.force_immediate_sack();
        ctx.send_buffered_packets(state, now);
    }
    Ok(())
}
