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
use crate::api::Datagram;
use crate::api::Indication;
use crate::api::Options;
use crate::api::SctpEvent;
use crate::api::SctpTime;
use crate::api::UNSPECIFIED_ADDRESS;
use crate::association::path::PathVariables;
use crate::association::state::State;
use crate::association::transmission_control_block::TransmissionControlBlock;
use crate::packet::abort_chunk::AbortChunk;
use crate::packet::chunk::Chunk;
use crate::packet::data_chunk;
use crate::packet::data_chunk::DataChunk;
use crate::packet::error_causes::ErrorCause;
use crate::packet::sctp_packet::SctpPacketBuilder;
use crate::timer::Timer;
use crate::tx::send_queue::SendQueue;
use crate::tx::stream_scheduler::PathView;
use crate::types::PathId;
use rand::Rng;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::cmp::min;
use std::net::IpAddr;
use std::rc::Rc;
use std::time::Duration;

#[cfg(not(test))]
use log::info;
#[cfg(test)]
use std::println as info;

/// Counts consecutive retransmission timeouts and unanswered heartbeats of the whole association.
pub(crate) struct TxErrorCounter {
    error_counter: u32,
    limit: u32,
}

impl TxErrorCounter {
    pub fn new(limit: u32) -> Self {
        Self { error_counter: 0, limit }
    }

    pub fn increment(&mut self) {
        if self.error_counter <= self.limit {
            self.error_counter += 1;
        }
    }

    pub fn reset(&mut self) {
        self.error_counter = 0;
    }

    pub fn value(&self) -> u32 {
        self.error_counter
    }

    pub fn is_exhausted(&self) -> bool {
        self.error_counter > self.limit
    }
}

/// Association state that lives independently of the connection state, from creation until the
/// association is removed.
pub(crate) struct Context {
    pub options: Options,
    pub handle: AppHandle,
    pub log_prefix: String,
    pub events: Rc<RefCell<dyn EventSink>>,
    pub send_queue: SendQueue,

    pub local_port: u16,
    pub remote_port: u16,
    pub local_addresses: Vec<IpAddr>,
    /// Where INIT is sent to. Once established, the primary path takes over.
    pub remote_address: IpAddr,
    /// Stream counts announced in INIT and INIT-ACK.
    pub inbound_streams: u16,
    pub outbound_streams: u16,
    /// Set on a passive open, until the listener is closed.
    pub listening: bool,

    pub rng: StdRng,
    /// Signs the state cookies. Shared by all associations of a stack.
    pub cookie_secret: u64,

    pub tx_error_counter: TxErrorCounter,
    pub limit_forward_tsn_until: SctpTime,
    /// T5-shutdown-guard.
    pub shutdown_guard: Timer,
}

impl Context {
    /// The address to send from when the packet doesn't go to a known path.
    pub fn local_address(&self) -> IpAddr {
        self.local_addresses.first().copied().unwrap_or(UNSPECIFIED_ADDRESS)
    }

    pub fn emit(&self, indication: Indication) {
        self.events.borrow_mut().add(SctpEvent::Indication(self.handle, indication));
    }

    pub fn send_packet(&self, src: IpAddr, dst: IpAddr, payload: Vec<u8>) {
        if !payload.is_empty() {
            self.events.borrow_mut().add(SctpEvent::SendPacket(Datagram::new(src, dst, payload)));
        }
    }

    pub fn send_to_path(&self, path: &PathVariables, builder: &mut SctpPacketBuilder) {
        self.send_packet(path.local_address, path.address, builder.build());
    }

    /// Sends an ABORT, with `cause` if there is one, to the peer. Before the peer's tag is known,
    /// the own tag is reflected.
    pub fn send_abort(&self, state: &State, cause: Option<ErrorCause>) {
        let error_causes: Vec<ErrorCause> = cause.into_iter().collect();
        match state {
            State::CookieWait(s) => {
                let mut builder = SctpPacketBuilder::new(
                    s.verification_tag,
                    self.local_port,
                    self.remote_port,
                    self.options.mtu,
                );
                builder.add(&Chunk::Abort(AbortChunk { tag_reflected: true, error_causes }));
                self.send_packet(self.local_address(), self.remote_address, builder.build());
            }
            _ => {
                if let Some(tcb) = state.tcb() {
                    let mut builder = tcb.new_packet();
                    builder.add(&Chunk::Abort(AbortChunk { tag_reflected: false, error_causes }));
                    self.send_to_path(tcb.primary_path(), &mut builder);
                }
            }
        }
    }

    /// Replaces the send queue with an empty one, so that all stream sequence numbers start over.
    pub fn reset_send_queue(&mut self) {
        let seed = self.rng.random();
        self.send_queue = SendQueue::new(
            &self.log_prefix,
            self.handle,
            self.outbound_streams,
            &self.options,
            seed,
            self.events.clone(),
        );
    }

    pub fn send_buffered_packets(&mut self, state: &mut State, now: SctpTime) {
        if let Some(tcb) = state.tcb() {
            let mut builder = tcb.new_packet();
            self.send_buffered_packets_with(state, now, &mut builder);
        }
    }

    /// Given a builder that is either empty, or only contains control chunks for the primary
    /// path, adds more control chunks and data chunks to it, and sends it and possibly more
    /// packets on every path, as allowed by the congestion windows and the peer's receiver
    /// window.
    pub fn send_buffered_packets_with(
        &mut self,
        state: &mut State,
        now: SctpTime,
        builder: &mut SctpPacketBuilder,
    ) {
        let cookie_echoed = matches!(state, State::CookieEchoed(_));
        let Some(tcb) = state.tcb_mut() else {
            return;
        };

        tcb.retransmission_queue.abandon_expired(now, &mut tcb.paths);
        for (stream_id, message_id) in tcb.retransmission_queue.take_unsent_messages_to_discard() {
            self.send_queue.discard(stream_id, message_id);
        }

        let primary = tcb.primary;
        // Inactive paths only see heartbeats, which aren't sent from here.
        let order: Vec<PathId> = std::iter::once(primary)
            .chain(tcb.paths.iter().filter(|p| p.active && p.id != primary).map(|p| p.id))
            .collect();
        let active = tcb.active_addresses();

        for path in order {
            for packet_idx in 0..self.options.max_burst {
                if path == primary && packet_idx == 0 {
                    self.add_control_chunks(tcb, now, builder);
                }
                let sent_data = self.add_data_chunks(tcb, now, path, &active, builder, packet_idx);
                if builder.is_empty() {
                    break;
                }
                let p = &mut tcb.paths[path.0];
                self.send_packet(p.local_address, p.address, builder.build());
                if sent_data {
                    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.3.2>:
                    //
                    //   R1) Every time a DATA chunk is sent to any address (including a
                    //   retransmission), if the T3-rtx timer of that address is not running, start
                    //   it running so that it will expire after the RTO of that address.
                    if !p.t3_rtx.is_running() {
                        let rto = p.rto.rto();
                        p.t3_rtx.start_with(now, rto);
                    }
                    if let Some(decay) = &mut p.cwnd_decay {
                        decay.start(now);
                    }
                }

                // From <https://datatracker.ietf.org/doc/html/rfc9260#section-5.1-2.3.2>:
                //
                //   [...] until the COOKIE ACK chunk is returned, the sender MUST NOT send any
                //   other packets to the peer.
                //
                // Let the cookie echo timeout drive sending that chunk and any data.
                if cookie_echoed {
                    return;
                }
                if !sent_data {
                    break;
                }
            }
        }
    }

    fn add_control_chunks(
        &mut self,
        tcb: &mut TransmissionControlBlock,
        now: SctpTime,
        builder: &mut SctpPacketBuilder,
    ) {
        // Add SACKs if it's likely that a DATA chunk would also be added.
        let also_if_delayed = !self.send_queue.is_empty()
            || tcb.retransmission_queue.has_chunks_to_retransmit(tcb.primary);
        if tcb.data_tracker.time_for_sack(also_if_delayed) {
            tcb.add_sack(builder);
        }
        if now >= self.limit_forward_tsn_until
            && tcb.retransmission_queue.should_send_forward_tsn()
        {
            builder.add(&Chunk::ForwardTsn(tcb.retransmission_queue.create_forward_tsn()));
            // From <https://datatracker.ietf.org/doc/html/rfc3758#section-3.5>:
            //
            //   IMPLEMENTATION NOTE: An implementation may wish to limit the number of
            //   duplicate FORWARD TSN chunks it sends by [...] waiting a full RTT before
            //   sending a duplicate FORWARD TSN. [...] Any delay applied to the sending of
            //   FORWARD TSN chunk SHOULD NOT exceed 200ms and MUST NOT exceed 500ms.
            let rto = &tcb.primary_path().rto;
            let rtt = rto.srtt().unwrap_or(rto.rto());
            self.limit_forward_tsn_until = now + min(Duration::from_millis(200), rtt);
        }
    }

    /// Fills the packet for `path` with retransmissions and then new data. Returns whether any
    /// DATA chunk was added.
    fn add_data_chunks(
        &mut self,
        tcb: &mut TransmissionControlBlock,
        now: SctpTime,
        path: PathId,
        active: &[IpAddr],
        builder: &mut SctpPacketBuilder,
        packet_idx: usize,
    ) -> bool {
        let mut added = false;

        if tcb.retransmission_queue.has_chunks_to_retransmit(path) {
            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-7.2.4>:
            //
            //   5) [...] the sender SHOULD ignore the value of cwnd and SHOULD NOT delay
            //   retransmission for this single packet.
            let budget = if packet_idx == 0 && tcb.retransmission_queue.has_fast_retransmit(path)
            {
                builder.bytes_remaining()
            } else {
                min(builder.bytes_remaining(), tcb.paths[path.0].cwnd_room())
            };
            let chunks = tcb.retransmission_queue.take_chunks_to_retransmit(
                now,
                path,
                &mut tcb.paths,
                budget,
            );
            for (tsn, data) in chunks {
                builder.add(&Chunk::Data(DataChunk { tsn, data }));
                added = true;
            }
            if tcb.retransmission_queue.has_chunks_to_retransmit(path) {
                return added;
            }
        }

        let view = PathView {
            address: tcb.paths[path.0].address,
            primary: tcb.primary_path().address,
            active,
        };
        self.send_queue.begin_packet();
        loop {
            let p = &tcb.paths[path.0];
            if p.outstanding_bytes() >= p.cc.cwnd {
                break;
            }
            let room = builder.bytes_remaining();
            if room <= data_chunk::HEADER_SIZE {
                break;
            }
            let Some(next) = self.send_queue.peek_next(now, &view) else {
                break;
            };
            let max_payload = room - data_chunk::HEADER_SIZE;

            // From <https://datatracker.ietf.org/doc/html/rfc9260#section-6.1>:
            //
            //   A) At any given time, the data sender MUST NOT transmit new data to any
            //   destination transport address if its peer's rwnd indicates that the peer has no
            //   buffer space [...]. However, regardless of the value of rwnd [...], if the data
            //   sender has no DATA chunks outstanding, it can always have one DATA chunk in
            //   flight to the receiver if allowed by cwnd.
            let nothing_in_flight = !added && p.outstanding_bytes() == 0;
            let peer_rwnd = tcb.retransmission_queue.peer_rwnd() as usize;
            if min(next, max_payload) > peer_rwnd && !nothing_in_flight {
                break;
            }

            // Nagle: hold back a packet that wouldn't be filled while data is in flight.
            if self.options.nagle_enabled
                && !added
                && p.outstanding_bytes() > 0
                && self.send_queue.queued_bytes() + data_chunk::HEADER_SIZE < room
            {
                break;
            }

            let Some(to_send) = self.send_queue.dequeue(now, &view, max_payload) else {
                break;
            };
            let (tsn, data) =
                tcb.retransmission_queue.add_sent(now, path, &mut tcb.paths, to_send);
            builder.add(&Chunk::Data(DataChunk { tsn, data }));
            added = true;
            if peer_rwnd == 0 {
                break;
            }
        }
        added
    }

    /// Moves the association to CLOSED, dropping all of its timers, and tells the application
    /// why with `indication`.
    pub fn internal_close(&mut self, state: &mut State, indication: Indication) {
        if matches!(state, State::Closed) && !self.listening {
            return;
        }
        info!("{}closing: {:?}", self.log_prefix, indication);
        self.listening = false;
        self.shutdown_guard.stop();
        self.send_queue.clear();
        self.emit(indication);
        *state = State::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_counter_is_exhausted_above_limit() {
        let mut counter = TxErrorCounter::new(2);
        counter.increment();
        counter.increment();
        assert!(!counter.is_exhausted());
        counter.increment();
        assert!(counter.is_exhausted());
        counter.increment();
        assert_eq!(counter.value(), 3);
        counter.reset();
        assert!(!counter.is_exhausted());
        assert_eq!(counter.value(), 0);
    }
}
