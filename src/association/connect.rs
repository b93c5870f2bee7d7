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
use crate::api::UNSPECIFIED_ADDRESS;
use crate::association::Incoming;
use crate::association::context::Context;
use crate::association::heartbeat;
use crate::association::shutdown::send_shutdown_ack;
use crate::association::state::CookieEchoState;
use crate::association::state::CookieWaitState;
use crate::association::state::ShutdownState;
use crate::association::state::State;
use crate::association::state_cookie::StateCookie;
use crate::association::transmission_control_block::Handshake;
use crate::association::transmission_control_block::TransmissionControlBlock;
use crate::packet::abort_chunk::AbortChunk;
use crate::packet::address_parameter::AddressParameter;
use crate::packet::chunk::Chunk;
use crate::packet::cookie_ack_chunk::CookieAckChunk;
use crate::packet::cookie_echo_chunk::CookieEchoChunk;
use crate::packet::error_causes::ErrorCause;
use crate::packet::error_chunk::ErrorChunk;
use crate::packet::forward_tsn_supported_parameter::ForwardTsnSupportedParameter;
use crate::packet::init_ack_chunk::InitAckChunk;
use crate::packet::init_chunk::InitChunk;
use crate::packet::parameter::Parameter;
use crate::packet::sctp_packet::CommonHeader;
use crate::packet::sctp_packet::SctpPacketBuilder;
use crate::packet::shutdown_ack_chunk::ShutdownAckChunk;
use crate::packet::state_cookie_parameter::StateCookieParameter;
use crate::timer::Timer;
use crate::transition_between;
use crate::types::Tsn;
#[cfg(not(test))]
use log::info;
#[cfg(not(test))]
use log::warn;
use rand::Rng;
use std::cmp::min;
#[cfg(test)]
use std::println as info;
#[cfg(test)]
use std::println as warn;

const MIN_VERIFICATION_TAG: u32 = 1;
const MAX_VERIFICATION_TAG: u32 = u32::MAX;

/// Represents the action to take after analyzing the Cookie against the current state.
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.4>.
#[derive(Debug, PartialEq)]
enum CookieResolution {
    /// Case A: Peer restarted.
    RestartDetected,
    /// Case B: Simultaneous INIT.
    SimultaneousInit,
    /// Case C: Late arrival, silently discard.
    Discard,
    /// Case D: Tags match, proceed with existing TCB.
    MaintainExisting,
    /// No existing TCB, but tags match. Start new.
    EstablishNew,
    /// Tags do not match expected values.
    InvalidTag,
}

impl CookieResolution {
    fn from_tcb(
        header: &CommonHeader,
        tcb: &TransmissionControlBlock,
        cookie: &StateCookie,
    ) -> Self {
        let v_tag_mismatch = header.verification_tag != tcb.my_verification_tag;
        let peer_tag_mismatch = tcb.peer_verification_tag != cookie.peer_tag;

        if v_tag_mismatch && peer_tag_mismatch && cookie.tie_tag == tcb.tie_tag {
            CookieResolution::RestartDetected
        } else if !v_tag_mismatch && peer_tag_mismatch {
            CookieResolution::SimultaneousInit
        } else if v_tag_mismatch && !peer_tag_mismatch && cookie.tie_tag == 0 {
            CookieResolution::Discard
        } else if !v_tag_mismatch && !peer_tag_mismatch {
            CookieResolution::MaintainExisting
        } else {
            CookieResolution::InvalidTag
        }
    }
}

fn new_t1_timer(ctx: &Context, now: SctpTime) -> Timer {
    let mut t1 = Timer::with_backoff(
        ctx.options.init_rto,
        ctx.options.init_rto_max,
        ctx.options.max_init_retransmits,
    );
    t1.start(now);
    t1
}

fn random_tag(ctx: &mut Context) -> u32 {
    ctx.rng.random_range(MIN_VERIFICATION_TAG..=MAX_VERIFICATION_TAG)
}

pub(crate) fn do_connect(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let t1_init = new_t1_timer(ctx, now);
    let initial_tsn = Tsn(ctx.rng.random());
    let verification_tag = random_tag(ctx);
    info!("{}connecting to {}:{}", ctx.log_prefix, ctx.remote_address, ctx.remote_port);
    *state = State::CookieWait(CookieWaitState { t1_init, initial_tsn, verification_tag });
    send_init(state, ctx);
}

/// The address list and capabilities announced in INIT and INIT-ACK.
fn local_parameters(ctx: &Context) -> Vec<Parameter> {
    let mut parameters: Vec<Parameter> = ctx
        .local_addresses
        .iter()
        .filter(|a| **a != UNSPECIFIED_ADDRESS)
        .map(|address| Parameter::Address(AddressParameter { address: *address }))
        .collect();
    if ctx.options.enable_partial_reliability {
        parameters.push(Parameter::ForwardTsnSupported(ForwardTsnSupportedParameter {}));
    }
    parameters
}

pub(crate) fn handle_init(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
    incoming: &Incoming,
    chunk: InitChunk,
) {
    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.5.1>:
    //
    //   A) The receiver of an INIT chunk MUST NOT accept it if the Verification Tag in the
    //   common header is not 0.
    if incoming.header.verification_tag != 0 {
        warn!("{}Received INIT with non-zero verification tag", ctx.log_prefix);
        return;
    }

    let my_verification_tag: u32;
    let my_initial_tsn: Tsn;
    let tie_tag: u64;

    match state {
        State::Closed => {
            if !ctx.listening {
                return;
            }
            my_initial_tsn = Tsn(ctx.rng.random());
            my_verification_tag = random_tag(ctx);
            tie_tag = 0;
        }
        State::CookieWait(CookieWaitState { verification_tag, initial_tsn, .. })
        | State::CookieEchoed(CookieEchoState { verification_tag, initial_tsn, .. }) => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.1>:
            //
            //   This usually indicates an initialization collision, i.e., each endpoint is
            //   attempting, at about the same time, to establish an association with the other
            //   endpoint.
            info!("{}Received INIT indicating simultaneous connections", ctx.log_prefix);
            my_verification_tag = *verification_tag;
            my_initial_tsn = *initial_tsn;
            tie_tag = 0;
        }
        State::ShutdownAckSent(_) => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-18>:
            //
            //   If an endpoint is in the SHUTDOWN-ACK-SENT state and receives an INIT chunk
            //   (e.g., if the SHUTDOWN COMPLETE chunk was lost) with source and destination
            //   transport addresses (either in the IP addresses or in the INIT chunk) that
            //   belong to this association, it SHOULD discard the INIT chunk and retransmit
            //   the SHUTDOWN ACK chunk.
            send_shutdown_ack(state, ctx);
            return;
        }
        State::Established(tcb)
        | State::ShutdownPending(tcb)
        | State::ShutdownSent(ShutdownState { tcb, .. })
        | State::ShutdownReceived(tcb) => {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.2>:
            //
            //   The outbound SCTP packet containing this INIT ACK chunk MUST carry a
            //   Verification Tag value equal to the Initiate Tag found in the unexpected INIT
            //   chunk. And the INIT ACK chunk MUST contain a new Initiate Tag (randomly
            //   generated; see Section 5.3.1). Other parameters for the endpoint SHOULD be
            //   copied from the existing parameters of the association (e.g., number of
            //   outbound streams) into the INIT ACK chunk and cookie.
            my_initial_tsn = tcb.retransmission_queue.next_tsn() + 1000000;
            tie_tag = tcb.tie_tag;
            my_verification_tag = random_tag(ctx);
        }
    }

    let mut peer_addresses = vec![incoming.src];
    peer_addresses.extend(chunk.addresses());
    let cookie = StateCookie {
        peer_tag: chunk.initiate_tag,
        my_tag: my_verification_tag,
        peer_initial_tsn: chunk.initial_tsn,
        my_initial_tsn,
        a_rwnd: chunk.a_rwnd,
        tie_tag,
        inbound_streams: min(ctx.inbound_streams, chunk.nbr_outbound_streams),
        outbound_streams: min(ctx.outbound_streams, chunk.nbr_inbound_streams),
        partial_reliability: ctx.options.enable_partial_reliability
            && chunk.forward_tsn_supported(),
        created_at: now,
        peer_addresses,
    };

    let mut parameters = local_parameters(ctx);
    parameters.push(Parameter::StateCookie(StateCookieParameter {
        cookie: cookie.serialize(ctx.cookie_secret),
    }));
    let init_ack = InitAckChunk {
        initiate_tag: my_verification_tag,
        a_rwnd: ctx.options.local_rwnd,
        nbr_outbound_streams: ctx.outbound_streams,
        nbr_inbound_streams: ctx.inbound_streams,
        initial_tsn: my_initial_tsn,
        parameters,
    };

    let mut builder = SctpPacketBuilder::new(
        chunk.initiate_tag,
        incoming.header.destination_port,
        incoming.header.source_port,
        ctx.options.mtu,
    );
    builder.add(&Chunk::InitAck(init_ack));
    ctx.send_packet(incoming.dst, incoming.src, builder.build());
}

pub(crate) fn handle_init_ack(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
    incoming: &Incoming,
    chunk: InitAckChunk,
) {
    let State::CookieWait(s) = state else {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.3>:
        //
        //   If an INIT ACK chunk is received by an endpoint in any state other than the
        //   COOKIE-WAIT or CLOSED state, the endpoint SHOULD discard the INIT ACK chunk. An
        //   unexpected INIT ACK chunk usually indicates the processing of an old or duplicated
        //   INIT chunk.
        info!("{}Received INIT_ACK in unexpected state", ctx.log_prefix);
        return;
    };
    let verification_tag = s.verification_tag;
    let initial_tsn = s.initial_tsn;

    let Some(cookie) = chunk.state_cookie() else {
        ctx.send_abort(state, Some(ErrorCause::ProtocolViolation("INIT-ACK malformed".into())));
        ctx.internal_close(
            state,
            Indication::Aborted { reason: "INIT-ACK chunk doesn't contain a cookie".into() },
        );
        return;
    };
    let cookie_echo_chunk = CookieEchoChunk { cookie: cookie.to_vec() };

    let handshake = Handshake {
        my_verification_tag: verification_tag,
        my_initial_tsn: initial_tsn,
        peer_verification_tag: chunk.initiate_tag,
        peer_initial_tsn: chunk.initial_tsn,
        peer_rwnd: chunk.a_rwnd,
        tie_tag: ctx.rng.random(),
        inbound_streams: min(ctx.inbound_streams, chunk.nbr_outbound_streams),
        outbound_streams: min(ctx.outbound_streams, chunk.nbr_inbound_streams),
        partial_reliability: ctx.options.enable_partial_reliability
            && chunk.forward_tsn_supported(),
    };
    ctx.send_queue.truncate_streams(handshake.outbound_streams);

    let mut peer_addresses = chunk.addresses();
    peer_addresses.push(incoming.src);
    let tcb = TransmissionControlBlock::new(
        &ctx.options,
        &ctx.log_prefix,
        ctx.handle,
        &handshake,
        (ctx.local_port, ctx.remote_port),
        ctx.remote_address,
        &peer_addresses,
        incoming.dst,
        ctx.events.clone(),
    );

    let t1_cookie = new_t1_timer(ctx, now);
    *state = State::CookieEchoed(CookieEchoState {
        t1_cookie,
        cookie_echo_chunk,
        initial_tsn,
        verification_tag,
        tcb,
    });

    // The connection isn't fully established just yet.
    send_cookie_echo(state, ctx, now);
}

/// Whether a COOKIE-ECHO carries a cookie that this stack issued and that is still fresh. Used
/// by listeners to decide whether to fork a new association for it.
pub(crate) fn is_acceptable_cookie(ctx: &Context, now: SctpTime, chunk: &CookieEchoChunk) -> bool {
    StateCookie::from_bytes(&chunk.cookie, ctx.cookie_secret)
        .is_ok_and(|cookie| now - cookie.created_at <= ctx.options.valid_cookie_lifetime)
}

/// Answers a COOKIE-ECHO with an ABORT addressed with the tag from its cookie.
fn abort_cookie_sender(ctx: &mut Context, incoming: &Incoming, peer_tag: u32, cause: ErrorCause) {
    let mut builder = SctpPacketBuilder::new(
        peer_tag,
        incoming.header.destination_port,
        incoming.header.source_port,
        ctx.options.mtu,
    );
    builder.add(&Chunk::Abort(AbortChunk { tag_reflected: false, error_causes: vec![cause] }));
    ctx.send_packet(incoming.dst, incoming.src, builder.build());
}

pub(crate) fn handle_cookie_echo(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
    incoming: &Incoming,
    chunk: CookieEchoChunk,
) {
    let cookie = match StateCookie::from_bytes(&chunk.cookie, ctx.cookie_secret) {
        Ok(c) => c,
        Err(s) => {
            warn!("{}Dropping COOKIE_ECHO: {}", ctx.log_prefix, s);
            return ctx.emit(Indication::Error { kind: ErrorKind::ParseFailed, message: s.into() });
        }
    };

    let age = now - cookie.created_at;
    if age > ctx.options.valid_cookie_lifetime {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.1.5>:
        //
        //   3) Compare the creation timestamp in the State Cookie to the current local time. If
        //   the elapsed time is longer than the lifespan carried in the State Cookie, then the
        //   packet, including the COOKIE ECHO and any attached DATA chunks, SHOULD be
        //   discarded, and the endpoint MUST transmit an ERROR chunk with a "Stale Cookie"
        //   error cause to the peer endpoint.
        //
        // The stale cookie is answered with an ABORT carrying that cause, so that the peer gives
        // up on the handshake instead of waiting for its timer.
        let staleness = age - ctx.options.valid_cookie_lifetime;
        info!("{}Received stale cookie, {:?} too old", ctx.log_prefix, staleness);
        abort_cookie_sender(
            ctx,
            incoming,
            cookie.peer_tag,
            ErrorCause::StaleCookie {
                staleness_us: u32::try_from(staleness.as_micros()).unwrap_or(u32::MAX),
            },
        );
        ctx.emit(Indication::Error {
            kind: ErrorKind::StaleCookie,
            message: "Received COOKIE-ECHO with a stale cookie".into(),
        });
        return;
    }

    let resolution = if let Some(tcb) = state.tcb() {
        CookieResolution::from_tcb(&incoming.header, tcb, &cookie)
    } else if incoming.header.verification_tag != cookie.my_tag {
        CookieResolution::InvalidTag
    } else if ctx.listening {
        // Accepted cookies are handed to a new association by the stack.
        return;
    } else {
        CookieResolution::EstablishNew
    };
    info!("{}COOKIE_ECHO resolution: {:?}", ctx.log_prefix, resolution);

    match resolution {
        CookieResolution::Discard => return,
        CookieResolution::InvalidTag => {
            let reason = "COOKIE-ECHO with invalid verification tags";
            abort_cookie_sender(
                ctx,
                incoming,
                cookie.peer_tag,
                ErrorCause::ProtocolViolation(reason.into()),
            );
            // A listener keeps listening, and a fork that never got a TCB just goes away.
            if !matches!(state, State::Closed) {
                ctx.internal_close(state, Indication::Aborted { reason: reason.into() });
            }
            return;
        }
        CookieResolution::RestartDetected => {
            if let State::ShutdownAckSent(s) = state {
                // From <https://datatracker.ietf.org/doc/html/rfc9260#section-9.2-19>:
                //
                //   If an endpoint is in the SHUTDOWN-ACK-SENT state and receives a COOKIE ECHO
                //   chunk [...] it SHOULD [...] send a SHUTDOWN ACK chunk [...] and an ERROR
                //   chunk with a "Cookie Received While Shutting Down" error cause.
                let mut builder = s.tcb.new_packet();
                builder.add(&Chunk::ShutdownAck(ShutdownAckChunk {})).add(&Chunk::Error(
                    ErrorChunk { error_causes: vec![ErrorCause::CookieReceivedWhileShuttingDown] },
                ));
                ctx.send_to_path(s.tcb.primary_path(), &mut builder);
                ctx.emit(Indication::Error {
                    kind: ErrorKind::WrongSequence,
                    message: "Received COOKIE-ECHO while shutting down".into(),
                });
                return;
            }
            ctx.emit(Indication::Restarted);
            establish_new_tcb(state, ctx, now, incoming, &cookie, true);
        }
        CookieResolution::SimultaneousInit => {
            establish_new_tcb(state, ctx, now, incoming, &cookie, false);
        }
        CookieResolution::EstablishNew => {
            establish_new_tcb(state, ctx, now, incoming, &cookie, false);
        }
        CookieResolution::MaintainExisting => {
            if matches!(state, State::CookieEchoed(_)) {
                transition_between!(*state,
                   State::CookieEchoed(s) => State::Established(s.tcb)
                );
                on_established(state, ctx, now);
            }
        }
    }

    let mut builder = SctpPacketBuilder::new(
        cookie.peer_tag,
        ctx.local_port,
        ctx.remote_port,
        ctx.options.mtu,
    );
    builder.add(&Chunk::CookieAck(CookieAckChunk {}));
    ctx.send_buffered_packets_with(state, now, &mut builder);
}

pub(crate) fn handle_cookie_ack(state: &mut State, ctx: &mut Context, now: SctpTime) {
    if !matches!(state, State::CookieEchoed(_)) {
        // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.2.5>:
        //
        //   At any state other than COOKIE-ECHOED, an endpoint SHOULD silently discard a
        //   received COOKIE ACK chunk.
        warn!("{}Received COOKIE_ACK not in COOKIE_ECHOED state", ctx.log_prefix);
        return;
    }

    transition_between!(*state,
       State::CookieEchoed(s) => State::Established(s.tcb)
    );
    on_established(state, ctx, now);
    ctx.send_buffered_packets(state, now);
}

pub(crate) fn handle_t1init_timeout(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let State::CookieWait(s) = state else { unreachable!() };
    if s.t1_init.expire(now) {
        if s.t1_init.is_running() {
            info!("{}T1-init expired, retransmitting INIT", ctx.log_prefix);
            send_init(state, ctx);
        } else {
            ctx.internal_close(state, Indication::TimedOut);
        }
    }
}

pub(crate) fn handle_t1cookie_timeout(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let State::CookieEchoed(s) = state else { unreachable!() };
    if s.t1_cookie.expire(now) {
        if !s.t1_cookie.is_running() {
            ctx.internal_close(state, Indication::TimedOut);
        } else {
            info!("{}T1-cookie expired, retransmitting COOKIE_ECHO", ctx.log_prefix);
            send_cookie_echo(state, ctx, now);
        }
    }
}

/// Transitions the association to Established using the data in the cookie. A restart starts
/// over with fresh send streams, as the peer's receive streams have been reset.
fn establish_new_tcb(
    state: &mut State,
    ctx: &mut Context,
    now: SctpTime,
    incoming: &Incoming,
    cookie: &StateCookie,
    restart: bool,
) {
    if restart {
        ctx.reset_send_queue();
    }
    let mut handshake = Handshake::from(cookie);
    handshake.tie_tag = ctx.rng.random();
    ctx.send_queue.truncate_streams(handshake.outbound_streams);
    ctx.remote_address = incoming.src;
    ctx.tx_error_counter.reset();

    let tcb = TransmissionControlBlock::new(
        &ctx.options,
        &ctx.log_prefix,
        ctx.handle,
        &handshake,
        (ctx.local_port, ctx.remote_port),
        incoming.src,
        &cookie.peer_addresses,
        incoming.dst,
        ctx.events.clone(),
    );
    *state = State::Established(tcb);
    on_established(state, ctx, now);
}

fn on_established(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let Some(tcb) = state.tcb_mut() else {
        return;
    };
    heartbeat::start_heartbeats(tcb, ctx, now);
    info!(
        "{}Association established with {}:{}, streams in={} out={}",
        ctx.log_prefix,
        tcb.primary_path().address,
        ctx.remote_port,
        tcb.inbound_streams,
        tcb.outbound_streams
    );
    ctx.emit(Indication::Established {
        remote_address: tcb.primary_path().address,
        remote_port: ctx.remote_port,
        inbound_streams: tcb.inbound_streams,
        outbound_streams: tcb.outbound_streams,
    });
}

pub(crate) fn send_init(state: &mut State, ctx: &mut Context) {
    let State::CookieWait(s) = state else {
        unreachable!();
    };
    let mut builder =
        SctpPacketBuilder::new(0, ctx.local_port, ctx.remote_port, ctx.options.mtu);
    builder.add(&Chunk::Init(InitChunk {
        initiate_tag: s.verification_tag,
        a_rwnd: ctx.options.local_rwnd,
        nbr_outbound_streams: ctx.outbound_streams,
        nbr_inbound_streams: ctx.inbound_streams,
        initial_tsn: s.initial_tsn,
        parameters: local_parameters(ctx),
    }));
    ctx.send_packet(ctx.local_address(), ctx.remote_address, builder.build());
}

pub(crate) fn send_cookie_echo(state: &mut State, ctx: &mut Context, now: SctpTime) {
    let State::CookieEchoed(s) = state else {
        unreachable!();
    };

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.1-2.3.2>:
    //
    //   The COOKIE ECHO chunk MAY be bundled with any pending outbound DATA chunks, but it MUST
    //   be the first chunk in the packet [...]
    let mut builder = s.tcb.new_packet();
    builder.add(&Chunk::CookieEcho(s.cookie_echo_chunk.clone()));
    ctx.send_buffered_packets_with(state, now, &mut builder);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AppHandle;
    use crate::api::Options;
    use crate::events::Events;
    use std::cell::RefCell;
    use std::net::IpAddr;
    use std::net::Ipv4Addr;
    use std::rc::Rc;

    fn tcb(my_tag: u32, peer_tag: u32, tie_tag: u64) -> TransmissionControlBlock {
        let handshake = Handshake {
            my_verification_tag: my_tag,
            my_initial_tsn: Tsn(1),
            peer_verification_tag: peer_tag,
            peer_initial_tsn: Tsn(2),
            peer_rwnd: 1000,
            tie_tag,
            inbound_streams: 1,
            outbound_streams: 1,
            partial_reliability: false,
        };
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        TransmissionControlBlock::new(
            &Options::default(),
            "",
            AppHandle::new(1, 1),
            &handshake,
            (1, 2),
            addr,
            &[],
            addr,
            Rc::new(RefCell::new(Events::new())),
        )
    }

    fn cookie(my_tag: u32, peer_tag: u32, tie_tag: u64) -> StateCookie {
        StateCookie {
            peer_tag,
            my_tag,
            peer_initial_tsn: Tsn(2),
            my_initial_tsn: Tsn(1),
            a_rwnd: 1000,
            tie_tag,
            inbound_streams: 1,
            outbound_streams: 1,
            partial_reliability: false,
            created_at: SctpTime::zero(),
            peer_addresses: vec![],
        }
    }

    fn header(verification_tag: u32) -> CommonHeader {
        CommonHeader { source_port: 2, destination_port: 1, verification_tag, checksum: 0 }
    }

    #[test]
    fn cookie_resolution_follows_rfc_table() {
        let tcb = tcb(10, 20, 99);
        assert_eq!(
            CookieResolution::from_tcb(&header(11), &tcb, &cookie(11, 21, 99)),
            CookieResolution::RestartDetected
        );
        assert_eq!(
            CookieResolution::from_tcb(&header(10), &tcb, &cookie(10, 21, 0)),
            CookieResolution::SimultaneousInit
        );
        assert_eq!(
            CookieResolution::from_tcb(&header(11), &tcb, &cookie(11, 20, 0)),
            CookieResolution::Discard
        );
        assert_eq!(
            CookieResolution::from_tcb(&header(10), &tcb, &cookie(10, 20, 0)),
            CookieResolution::MaintainExisting
        );
        assert_eq!(
            CookieResolution::from_tcb(&header(11), &tcb, &cookie(11, 21, 98)),
            CookieResolution::InvalidTag
        );
    }
}
