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

//! One SCTP association: its state machine and everything it owns.
//!
//! An [`Association`] doesn't know about other associations. The [`crate::Sctp`] demultiplexer
//! finds the association an incoming packet belongs to and calls into it with the packet and the
//! current time.

use crate::EventSink;
use crate::api::AppCommand;
use crate::api::AppHandle;
use crate::api::AssociateRequest;
use crate::api::AssociationState;
use crate::api::AssociationStatus;
use crate::api::ErrorKind;
use crate::api::Indication;
use crate::api::ListenRequest;
use crate::api::Options;
use crate::api::SctpError;
use crate::api::SctpTime;
use crate::association::context::Context;
use crate::association::context::TxErrorCounter;
use crate::association::state::State;
use crate::packet::chunk::Chunk;
use crate::packet::cookie_ack_chunk;
use crate::packet::cookie_echo_chunk::CookieEchoChunk;
use crate::packet::data_chunk::DataChunk;
use crate::packet::error_causes::ErrorCause;
use crate::packet::init_ack_chunk;
use crate::packet::sctp_packet::CommonHeader;
use crate::packet::sctp_packet::SctpPacket;
use crate::timer::Timer;
use crate::tx::send_queue::SendQueue;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::info;
use rand::Rng;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::net::IpAddr;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;
use std::rc::Rc;

pub(crate) mod connect;
pub(crate) mod context;
pub(crate) mod data;
pub(crate) mod heartbeat;
pub(crate) mod path;
pub(crate) mod path_management;
pub(crate) mod shutdown;
pub(crate) mod state;
pub(crate) mod state_cookie;
pub(crate) mod transmission_control_block;


/// Where a received packet came from and went to, with its common header.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Incoming {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub header: CommonHeader,
}

/// The transport addresses and stream counts of an association.
struct Endpoint {
    local_port: u16,
    local_addresses: Vec<IpAddr>,
    remote_port: u16,
    remote_address: IpAddr,
    inbound_streams: u16,
    outbound_streams: u16,
}

pub(crate) struct Association {
    state: State,
    ctx: Context,
}

fn closest_timeout(a: Option<SctpTime>, b: Option<SctpTime>) -> Option<SctpTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

impl Association {
    fn new(
        options: &Options,
        handle: AppHandle,
        events: Rc<RefCell<dyn EventSink>>,
        mut rng: StdRng,
        cookie_secret: u64,
        endpoint: Endpoint,
    ) -> Self {
        let log_prefix = format!("{handle}: ");
        let send_queue = SendQueue::new(
            &log_prefix,
            handle,
            endpoint.outbound_streams,
            options,
            rng.random(),
            events.clone(),
        );
        let ctx = Context {
            options: options.clone(),
            handle,
            log_prefix,
            events,
            send_queue,
            local_port: endpoint.local_port,
            remote_port: endpoint.remote_port,
            local_addresses: endpoint.local_addresses,
            remote_address: endpoint.remote_address,
            inbound_streams: endpoint.inbound_streams,
            outbound_streams: endpoint.outbound_streams,
            listening: false,
            rng,
            cookie_secret,
            tx_error_counter: TxErrorCounter::new(options.assoc_max_retrans),
            limit_forward_tsn_until: SctpTime::zero(),
            shutdown_guard: Timer::one_shot(options.shutdown_guard_timeout),
        };
        Self { state: State::Closed, ctx }
    }

    /// Creates an association and starts connecting to the peer by sending INIT.
    pub fn connect(
        now: SctpTime,
        options: &Options,
        handle: AppHandle,
        events: Rc<RefCell<dyn EventSink>>,
        rng: StdRng,
        cookie_secret: u64,
        request: &AssociateRequest,
    ) -> Self {
        let endpoint = Endpoint {
            local_port: request.local_port,
            local_addresses: request.local_addresses.clone(),
            remote_port: request.remote_port,
            remote_address: request.remote_address,
            inbound_streams: request.inbound_streams.unwrap_or(options.inbound_streams),
            outbound_streams: request.outbound_streams.unwrap_or(options.outbound_streams),
        };
        let mut association = Self::new(options, handle, events, rng, cookie_secret, endpoint);
        connect::do_connect(&mut association.state, &mut association.ctx, now);
        association
    }

    /// Creates a listener, which answers INIT chunks without keeping any state and accepts
    /// associations through [`Association::fork`].
    pub fn listen(
        options: &Options,
        handle: AppHandle,
        events: Rc<RefCell<dyn EventSink>>,
        rng: StdRng,
        cookie_secret: u64,
        request: &ListenRequest,
    ) -> Self {
        let endpoint = Endpoint {
            local_port: request.local_port,
            local_addresses: request.local_addresses.clone(),
            remote_port: 0,
            remote_address: crate::api::UNSPECIFIED_ADDRESS,
            inbound_streams: request.inbound_streams.unwrap_or(options.inbound_streams),
            outbound_streams: request.outbound_streams.unwrap_or(options.outbound_streams),
        };
        let mut association = Self::new(options, handle, events, rng, cookie_secret, endpoint);
        association.ctx.listening = true;
        info!("{}Listening on port {}", association.ctx.log_prefix, request.local_port);
        association
    }

    /// Creates the association that a listener accepts a valid COOKIE-ECHO with. The packet
    /// carrying it must then be handled by the new association.
    pub fn fork(&self, handle: AppHandle, rng: StdRng, incoming: &Incoming) -> Self {
        let endpoint = Endpoint {
            local_port: self.ctx.local_port,
            local_addresses: self.ctx.local_addresses.clone(),
            remote_port: incoming.header.source_port,
            remote_address: incoming.src,
            inbound_streams: self.ctx.inbound_streams,
            outbound_streams: self.ctx.outbound_streams,
        };
        info!("{}Accepting association from {}", self.ctx.log_prefix, incoming.src);
        Self::new(
            &self.ctx.options,
            handle,
            self.ctx.events.clone(),
            rng,
            self.ctx.cookie_secret,
            endpoint,
        )
    }

    pub fn handle(&self) -> AppHandle {
        self.ctx.handle
    }

    pub fn state(&self) -> AssociationState {
        self.state.kind()
    }

    pub fn is_listening(&self) -> bool {
        self.ctx.listening
    }

    /// Whether the association is closed for good and can be removed.
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, State::Closed) && !self.ctx.listening
    }

    pub fn local_port(&self) -> u16 {
        self.ctx.local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.ctx.remote_port
    }

    pub fn local_addresses(&self) -> &[IpAddr] {
        &self.ctx.local_addresses
    }

    /// Every known address of the peer. Before the handshake, that's the address INIT is sent to.
    pub fn remote_addresses(&self) -> Vec<IpAddr> {
        match self.state.tcb() {
            Some(tcb) => tcb.remote_addresses().collect(),
            None if self.ctx.listening => Vec::new(),
            None => vec![self.ctx.remote_address],
        }
    }

    pub fn verification_tag(&self) -> u32 {
        self.state.my_verification_tag()
    }

    /// Whether a listener should accept the association in `chunk`.
    pub fn accepts_cookie(&self, now: SctpTime, chunk: &CookieEchoChunk) -> bool {
        self.ctx.listening && connect::is_acceptable_cookie(&self.ctx, now, chunk)
    }

    /// Surfaces a problem with a packet that couldn't be handed to the association.
    pub fn report_error(&self, kind: ErrorKind, message: String) {
        self.ctx.emit(Indication::Error { kind, message });
    }

    /// Validates the verification tag of a received packet, as described in
    /// <https://datatracker.ietf.org/doc/html/rfc9260#section-8.5>.
    fn has_valid_tag(&self, packet: &SctpPacket) -> bool {
        let tag = packet.common_header.verification_tag;
        let my_tag = self.state.my_verification_tag();
        let peer_tag = self.state.tcb().map(|tcb| tcb.peer_verification_tag);
        match packet.chunks.first() {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.5.1>:
            //
            //   A) [...] If the packet contains an INIT chunk, the Verification Tag in the common
            //   header MUST be 0 and the INIT chunk MUST be the only chunk in the packet.
            Some(Chunk::Init(_)) => tag == 0 && packet.chunks.len() == 1,
            //   B) The receiver of an ABORT chunk MUST accept the packet if the Verification Tag
            //   field of the packet matches its own tag and the T bit is not set OR if it is set
            //   to its Peer's Tag and the T bit is set in the Chunk Flags.
            Some(Chunk::Abort(c)) if c.tag_reflected => peer_tag == Some(tag),
            Some(Chunk::ShutdownComplete(c)) if c.tag_reflected => peer_tag == Some(tag),
            Some(Chunk::Abort(_)) | Some(Chunk::ShutdownComplete(_)) => my_tag == tag,
            //   D) [...] the Verification Tag value of a COOKIE ECHO chunk is checked against the
            //   tag in the State Cookie.
            Some(Chunk::CookieEcho(_)) => true,
            //   E) [...] a SHUTDOWN ACK chunk received in COOKIE-WAIT or COOKIE-ECHOED state is
            //   treated as out of the blue.
            Some(Chunk::ShutdownAck(_))
                if matches!(self.state, State::CookieWait(_) | State::CookieEchoed(_)) =>
            {
                true
            }
            _ => my_tag != 0 && my_tag == tag,
        }
    }

    pub fn handle_packet(&mut self, now: SctpTime, incoming: Incoming, packet: SctpPacket) {
        if !self.has_valid_tag(&packet) {
            debug!(
                "{}Dropping packet with invalid verification tag {}",
                self.ctx.log_prefix, incoming.header.verification_tag
            );
            return;
        }

        let state = &mut self.state;
        let ctx = &mut self.ctx;
        let has_data = packet.chunks.iter().any(|c| matches!(c, Chunk::Data(_)));
        shutdown::maybe_send_shutdown_on_packet_received(state, ctx, now, has_data);

        for chunk in packet.chunks {
            let was_open = !matches!(state, State::Closed);
            match chunk {
                Chunk::Data(DataChunk { tsn, data }) => data::handle_data(state, ctx, tsn, data),
                Chunk::Init(c) => connect::handle_init(state, ctx, now, &incoming, c),
                Chunk::InitAck(c) => connect::handle_init_ack(state, ctx, now, &incoming, c),
                Chunk::Sack(c) => data::handle_sack(state, ctx, now, c),
                Chunk::HeartbeatRequest(c) => {
                    heartbeat::handle_heartbeat_request(state, ctx, &incoming, c)
                }
                Chunk::HeartbeatAck(c) => heartbeat::handle_heartbeat_ack(state, ctx, now, c),
                Chunk::Abort(c) => data::handle_abort(state, ctx, c),
                Chunk::Shutdown(c) => shutdown::handle_shutdown(state, ctx, now, c),
                Chunk::ShutdownAck(_) => shutdown::handle_shutdown_ack(state, ctx, &incoming),
                Chunk::Error(c) => data::handle_error(ctx, c),
                Chunk::CookieEcho(c) => connect::handle_cookie_echo(state, ctx, now, &incoming, c),
                Chunk::CookieAck(_) => connect::handle_cookie_ack(state, ctx, now),
                Chunk::ShutdownComplete(_) => shutdown::handle_shutdown_complete(state, ctx),
                Chunk::ForwardTsn(c) => {
                    if !data::handle_forward_tsn(state, ctx, &incoming, c) {
                        break;
                    }
                }
                Chunk::Unknown(c) => {
                    if !data::handle_unknown_chunk(state, ctx, &incoming, c) {
                        break;
                    }
                }
            }
            if was_open && matches!(state, State::Closed) {
                // The association was torn down by this chunk.
                return;
            }
        }
        data::maybe_send_sack(state, ctx, now);
    }

    /// Handles a packet that failed checksum validation or was flagged with a bit error by
    /// lower layers. Its contents can't be trusted, but a damaged handshake reply is answered by
    /// retransmitting the request right away rather than waiting for T1 to expire.
    pub fn handle_corrupted(&mut self, now: SctpTime, chunk_types: &[u8]) {
        match self.state {
            State::CookieWait(_) if chunk_types.contains(&init_ack_chunk::CHUNK_TYPE) => {
                info!("{}Received corrupted INIT-ACK, retransmitting INIT", self.ctx.log_prefix);
                connect::send_init(&mut self.state, &mut self.ctx);
            }
            State::CookieEchoed(_) if chunk_types.contains(&cookie_ack_chunk::CHUNK_TYPE) => {
                info!(
                    "{}Received corrupted COOKIE-ACK, retransmitting COOKIE-ECHO",
                    self.ctx.log_prefix
                );
                connect::send_cookie_echo(&mut self.state, &mut self.ctx, now);
            }
            _ => {
                debug!("{}Dropping corrupted packet", self.ctx.log_prefix);
            }
        }
    }

    pub fn handle_command(&mut self, now: SctpTime, command: AppCommand) -> Result<(), SctpError> {
        if matches!(command, AppCommand::StatusRequest) {
            self.ctx.emit(Indication::Status(self.status()));
            return Ok(());
        }
        let state = &mut self.state;
        let ctx = &mut self.ctx;
        match command {
            AppCommand::Associate(_) | AppCommand::OpenPassive(_) => {
                Err(SctpError::AlreadyExists(ctx.handle))
            }
            AppCommand::Send { message, options } => {
                data::do_send(state, ctx, now, message, options)
            }
            AppCommand::Receive { stream_id } => data::do_receive(state, ctx, now, stream_id),
            AppCommand::Shutdown => shutdown::do_shutdown(state, ctx, now),
            AppCommand::Close => match state {
                State::Closed | State::CookieWait(_) => {
                    ctx.internal_close(state, Indication::Closed);
                    Ok(())
                }
                _ => shutdown::do_shutdown(state, ctx, now),
            },
            AppCommand::Abort => {
                let cause = ErrorCause::UserInitiatedAbort("Abort requested".into());
                ctx.send_abort(state, Some(cause));
                ctx.internal_close(
                    state,
                    Indication::Aborted { reason: "Aborted by the application".into() },
                );
                Ok(())
            }
            AppCommand::StatusRequest => Ok(()),
            AppCommand::SetPrimary(address) => path_management::set_primary(state, ctx, address),
        }
    }

    pub fn advance_time(&mut self, now: SctpTime) {
        let state = &mut self.state;
        let ctx = &mut self.ctx;
        match state {
            State::Closed => return,
            State::CookieWait(_) => connect::handle_t1init_timeout(state, ctx, now),
            State::CookieEchoed(s) => {
                // Only the T1-cookie timer drives retransmissions.
                s.tcb.data_tracker.handle_timeout(now);
                connect::handle_t1cookie_timeout(state, ctx, now);
            }
            State::Established(_)
            | State::ShutdownPending(_)
            | State::ShutdownSent(_)
            | State::ShutdownReceived(_)
            | State::ShutdownAckSent(_) => {
                if let Some(tcb) = state.tcb_mut() {
                    tcb.data_tracker.handle_timeout(now);
                }
                path_management::handle_t3_rtx_timeouts(state, ctx, now);
                heartbeat::handle_heartbeat_timeouts(state, ctx, now);
                path_management::handle_cwnd_decay_timeouts(state, now);
                shutdown::handle_t2_shutdown_timeout(state, ctx, now);
                shutdown::handle_shutdown_guard_timeout(state, ctx, now);
            }
        }

        if matches!(state, State::CookieEchoed(_)) {
            return;
        }
        let lost = match state.tcb() {
            Some(tcb) => {
                ctx.tx_error_counter.is_exhausted() || path_management::all_paths_inactive(tcb)
            }
            None => return,
        };
        if lost {
            let reason = "Too many retransmissions";
            ctx.send_abort(state, None);
            ctx.internal_close(
                state,
                Indication::ConnectionLost { reason: reason.into() },
            );
            return;
        }
        ctx.send_buffered_packets(state, now);
    }

    /// The earliest time at which [`Association::advance_time`] has something to do.
    pub fn poll_timeout(&self) -> Option<SctpTime> {
        let timeout = match &self.state {
            State::Closed => None,
            State::CookieWait(s) => s.t1_init.next_expiry(),
            State::CookieEchoed(s) => {
                closest_timeout(s.t1_cookie.next_expiry(), s.tcb.data_tracker.next_timeout())
            }
            State::ShutdownSent(s) | State::ShutdownAckSent(s) => {
                closest_timeout(s.t2_shutdown.next_expiry(), s.tcb.next_timeout())
            }
            State::Established(tcb)
            | State::ShutdownPending(tcb)
            | State::ShutdownReceived(tcb) => tcb.next_timeout(),
        };
        closest_timeout(timeout, self.ctx.shutdown_guard.next_expiry())
    }

    pub fn status(&self) -> AssociationStatus {
        let ctx = &self.ctx;
        let tcb = self.state.tcb();
        AssociationStatus {
            state: self.state.kind(),
            local_port: ctx.local_port,
            remote_port: ctx.remote_port,
            primary_path: tcb.map(|tcb| tcb.primary_path().address),
            paths: tcb
                .map(|tcb| tcb.paths.iter().map(|p| p.status()).collect())
                .unwrap_or_default(),
            inbound_streams: tcb.map_or(ctx.inbound_streams, |tcb| tcb.inbound_streams),
            outbound_streams: tcb.map_or(ctx.outbound_streams, |tcb| tcb.outbound_streams),
            local_rwnd: tcb.map_or(ctx.options.local_rwnd, |tcb| {
                let queued = u32::try_from(tcb.reassembly_queue.queued_bytes()).unwrap_or(u32::MAX);
                ctx.options.local_rwnd.saturating_sub(queued)
            }),
            peer_rwnd: tcb.map_or(0, |tcb| tcb.retransmission_queue.peer_rwnd()),
            queued_send_bytes: ctx.send_queue.queued_bytes(),
            queued_received_bytes: tcb.map_or(0, |tcb| tcb.reassembly_queue.queued_bytes()),
            outstanding_bytes: tcb.map_or(0, |tcb| tcb.outstanding_bytes()),
        }
    }
}
