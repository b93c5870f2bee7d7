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

//! The demultiplexer that owns every association of one SCTP stack.

use crate::EventSink;
use crate::api::AppCommand;
use crate::api::AppHandle;
use crate::api::AssociationState;
use crate::api::AssociationStatus;
use crate::api::Datagram;
use crate::api::ErrorKind;
use crate::api::Options;
use crate::api::SctpError;
use crate::api::SctpEvent;
use crate::api::SctpTime;
use crate::association::Association;
use crate::association::Incoming;
use crate::events::Events;
use crate::logging::log_packet;
use crate::packet::abort_chunk::AbortChunk;
use crate::packet::chunk::Chunk;
use crate::packet::error_causes::ErrorCause;
use crate::packet::sctp_packet::CommonHeader;
use crate::packet::sctp_packet::PacketParseError;
use crate::packet::sctp_packet::SctpPacket;
use crate::packet::sctp_packet::SctpPacketBuilder;
use crate::packet::shutdown_complete_chunk::ShutdownCompleteChunk;
#[cfg(not(test))]
use log::debug;
#[cfg(not(test))]
use log::info;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::net::Ipv6Addr;
use std::rc::Rc;
#[cfg(test)]
use std::println as debug;
#[cfg(test)]
use std::println as info;

/// Forwards events to the real sink, dumping every sent packet on the way.
struct LoggingEvents {
    parent: Rc<RefCell<dyn EventSink>>,
    now: Rc<RefCell<SctpTime>>,
}

impl EventSink for LoggingEvents {
    fn add(&mut self, event: SctpEvent) {
        match event {
            SctpEvent::SendPacket(ref d) => {
                let now = *self.now.borrow();
                log_packet("sctp", now.as_duration(), true, &d.payload);
            }
            SctpEvent::Indication(handle, ref indication) => {
                info!("{handle}: {indication:?}");
            }
        }
        self.parent.borrow_mut().add(event);
    }

    fn next_event(&mut self) -> Option<SctpEvent> {
        self.parent.borrow_mut().next_event()
    }
}

/// Whether the association is bound to the wildcard address.
fn binds_any(local_addresses: &[IpAddr]) -> bool {
    local_addresses.is_empty() || local_addresses.iter().any(IpAddr::is_unspecified)
}

/// The local address under which associations bound to the wildcard address are indexed.
const ANY_ADDRESS: IpAddr = IpAddr::V6(Ipv6Addr::UNSPECIFIED);

/// Local address, local port, remote address and remote port.
type Tuple = (IpAddr, u16, IpAddr, u16);

/// Own verification tag, local port and remote port.
type TagKey = (u32, u16, u16);

/// Everything an association can be looked up by.
#[derive(Debug, Default, PartialEq)]
struct IndexKeys {
    tuples: Vec<Tuple>,
    tag: Option<TagKey>,
    listening_port: Option<u16>,
}

impl IndexKeys {
    fn of(association: &Association) -> Self {
        let local_port = association.local_port();
        if association.is_listening() {
            return Self { listening_port: Some(local_port), ..Default::default() };
        }
        let remote_port = association.remote_port();
        let mut locals: Vec<IpAddr> =
            association.local_addresses().iter().copied().filter(|a| !a.is_unspecified()).collect();
        if binds_any(association.local_addresses()) {
            locals.push(ANY_ADDRESS);
        }
        let remotes = association.remote_addresses();
        let tuples = locals
            .iter()
            .flat_map(|&local| remotes.iter().map(move |&r| (local, local_port, r, remote_port)))
            .collect();
        let tag = Some(association.verification_tag())
            .filter(|&tag| tag != 0)
            .map(|tag| (tag, local_port, remote_port));
        Self { tuples, tag, listening_port: None }
    }
}

fn attach<K: Eq + Hash>(map: &mut HashMap<K, BTreeSet<AppHandle>>, key: K, handle: AppHandle) {
    map.entry(key).or_default().insert(handle);
}

fn detach<K: Eq + Hash>(map: &mut HashMap<K, BTreeSet<AppHandle>>, key: &K, handle: AppHandle) {
    if let Some(handles) = map.get_mut(key) {
        handles.remove(&handle);
        if handles.is_empty() {
            map.remove(key);
        }
    }
}

/// Finds associations by the addressing of incoming packets.
///
/// Tags and peer addresses are only learnt during the handshake, so the keys of an association
/// are refreshed every time it has handled something. When keys collide, the lowest handle wins.
#[derive(Default)]
struct AssociationIndex {
    by_tuple: HashMap<Tuple, BTreeSet<AppHandle>>,
    by_tag: HashMap<TagKey, BTreeSet<AppHandle>>,
    listeners: HashMap<u16, BTreeSet<AppHandle>>,
    keys: HashMap<AppHandle, IndexKeys>,
}

impl AssociationIndex {
    /// Replaces the keys of `handle`, or forgets it when `keys` is `None`.
    fn update(&mut self, handle: AppHandle, keys: Option<IndexKeys>) {
        if self.keys.get(&handle) == keys.as_ref() {
            return;
        }
        if let Some(old) = self.keys.remove(&handle) {
            for tuple in &old.tuples {
                detach(&mut self.by_tuple, tuple, handle);
            }
            if let Some(tag) = &old.tag {
                detach(&mut self.by_tag, tag, handle);
            }
            if let Some(port) = &old.listening_port {
                detach(&mut self.listeners, port, handle);
            }
        }
        if let Some(keys) = keys {
            for &tuple in &keys.tuples {
                attach(&mut self.by_tuple, tuple, handle);
            }
            if let Some(tag) = keys.tag {
                attach(&mut self.by_tag, tag, handle);
            }
            if let Some(port) = keys.listening_port {
                attach(&mut self.listeners, port, handle);
            }
            self.keys.insert(handle, keys);
        }
    }

    fn by_tuple(&self, tuple: &Tuple) -> Option<AppHandle> {
        self.by_tuple.get(tuple).and_then(|handles| handles.first().copied())
    }

    fn by_tag(&self, tag: &TagKey) -> Option<AppHandle> {
        self.by_tag.get(tag).and_then(|handles| handles.first().copied())
    }

    fn listeners(&self, port: u16) -> impl Iterator<Item = AppHandle> + '_ {
        self.listeners.get(&port).into_iter().flatten().copied()
    }
}

/// An SCTP stack: finds the association every incoming packet and application command belongs
/// to, answers out-of-the-blue packets, and runs the timers of all associations.
///
/// Associations are created with [`AppCommand::Associate`] and [`AppCommand::OpenPassive`], and
/// removed as soon as they are closed. Everything the stack wants to happen is drained with
/// [`Sctp::poll_event`].
pub struct Sctp {
    options: Options,
    rng: StdRng,
    events: Rc<RefCell<dyn EventSink>>,
    now: Rc<RefCell<SctpTime>>,
    associations: BTreeMap<AppHandle, Association>,
    index: AssociationIndex,
    cookie_secret: u64,
}

impl Sctp {
    pub fn new(options: &Options, seed: u64) -> Self {
        Self::with_rng(options, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(options: &Options, mut rng: StdRng) -> Self {
        let now = Rc::new(RefCell::new(SctpTime::zero()));
        let events: Rc<RefCell<dyn EventSink>> = Rc::new(RefCell::new(Events::new()));
        let events: Rc<RefCell<dyn EventSink>> = if options.log_packets {
            Rc::new(RefCell::new(LoggingEvents { parent: events, now: Rc::clone(&now) }))
        } else {
            events
        };
        let cookie_secret = rng.random();
        Self {
            options: options.clone(),
            rng,
            events,
            now,
            associations: BTreeMap::new(),
            index: AssociationIndex::default(),
            cookie_secret,
        }
    }

    fn set_now(&mut self, now: SctpTime) {
        // Time is not allowed to go backwards.
        if now > *self.now.borrow() {
            self.now.replace(now);
        }
    }

    fn new_rng(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.rng.random())
    }

    fn reindex(&mut self, handle: AppHandle) {
        let keys = self.associations.get(&handle).map(IndexKeys::of);
        self.index.update(handle, keys);
    }

    fn remove_terminated(&mut self) {
        let index = &mut self.index;
        self.associations.retain(|handle, a| {
            if a.is_terminated() {
                debug!("{handle}: Removing association");
                index.update(*handle, None);
                false
            } else {
                true
            }
        });
    }

    pub fn handle_command(
        &mut self,
        now: SctpTime,
        handle: AppHandle,
        command: AppCommand,
    ) -> Result<(), SctpError> {
        self.set_now(now);
        let result = match command {
            AppCommand::Associate(request) => {
                if self.associations.contains_key(&handle) {
                    return Err(SctpError::AlreadyExists(handle));
                }
                let rng = self.new_rng();
                let association = Association::connect(
                    now,
                    &self.options,
                    handle,
                    self.events.clone(),
                    rng,
                    self.cookie_secret,
                    &request,
                );
                self.associations.insert(handle, association);
                Ok(())
            }
            AppCommand::OpenPassive(request) => {
                if self.associations.contains_key(&handle) {
                    return Err(SctpError::AlreadyExists(handle));
                }
                let rng = self.new_rng();
                let association = Association::listen(
                    &self.options,
                    handle,
                    self.events.clone(),
                    rng,
                    self.cookie_secret,
                    &request,
                );
                self.associations.insert(handle, association);
                Ok(())
            }
            command => match self.associations.get_mut(&handle) {
                Some(association) => association.handle_command(now, command),
                None => Err(SctpError::UnknownAssociation(handle)),
            },
        };
        self.reindex(handle);
        self.remove_terminated();
        result
    }

    pub fn handle_datagram(&mut self, now: SctpTime, datagram: Datagram) {
        self.set_now(now);
        if self.options.log_packets {
            log_packet("sctp", now.as_duration(), false, &datagram.payload);
        }
        if datagram.bit_error {
            self.handle_corrupted(now, &datagram);
            return;
        }

        let packet = match SctpPacket::from_bytes(&datagram.payload, &self.options) {
            Ok(packet) => packet,
            Err(PacketParseError::InvalidChecksum) => {
                self.handle_corrupted(now, &datagram);
                return;
            }
            Err(e) => {
                debug!("Dropping unparseable packet from {}: {}", datagram.src, e);
                let handle = SctpPacket::peek(&datagram.payload).and_then(|peek| {
                    self.find_by_tuple(datagram.src, datagram.dst, &peek.common_header)
                });
                if let Some(handle) = handle {
                    if let Some(association) = self.associations.get(&handle) {
                        association.report_error(ErrorKind::ParseFailed, e.to_string());
                    }
                }
                return;
            }
        };

        let incoming =
            Incoming { src: datagram.src, dst: datagram.dst, header: packet.common_header };
        let Some(mut handle) = self.find_association(&incoming, &packet) else {
            self.handle_out_of_the_blue(&incoming, &packet);
            return;
        };

        let accept = match (self.associations.get(&handle), packet.chunks.first()) {
            (Some(listener), Some(Chunk::CookieEcho(cookie))) => {
                listener.is_listening() && listener.accepts_cookie(now, cookie)
            }
            _ => false,
        };
        if accept {
            handle = self.fork(handle, &incoming);
        }
        if let Some(association) = self.associations.get_mut(&handle) {
            association.handle_packet(now, incoming, packet);
        }
        self.reindex(handle);
        self.remove_terminated();
    }

    /// A packet whose contents can't be trusted. The association it most likely belongs to is
    /// told which chunk types it seemed to carry, and nothing else happens.
    fn handle_corrupted(&mut self, now: SctpTime, datagram: &Datagram) {
        let Some(peek) = SctpPacket::peek(&datagram.payload) else {
            return;
        };
        let handle = self
            .find_by_tuple(datagram.src, datagram.dst, &peek.common_header)
            .or_else(|| self.find_by_tag(&peek.common_header));
        match handle.and_then(|h| self.associations.get_mut(&h)) {
            Some(association) => association.handle_corrupted(now, &peek.chunk_types),
            None => debug!("Dropping corrupted packet from {}", datagram.src),
        }
    }

    fn find_by_tuple(&self, src: IpAddr, dst: IpAddr, header: &CommonHeader) -> Option<AppHandle> {
        let tuple = |local| (local, header.destination_port, src, header.source_port);
        self.index.by_tuple(&tuple(dst)).or_else(|| self.index.by_tuple(&tuple(ANY_ADDRESS)))
    }

    fn find_by_tag(&self, header: &CommonHeader) -> Option<AppHandle> {
        if header.verification_tag == 0 {
            return None;
        }
        self.index.by_tag(&(header.verification_tag, header.destination_port, header.source_port))
    }

    fn find_association(&self, incoming: &Incoming, packet: &SctpPacket) -> Option<AppHandle> {
        let header = &incoming.header;
        if let Some(handle) = self.find_by_tuple(incoming.src, incoming.dst, header) {
            return Some(handle);
        }
        match packet.chunks.first() {
            Some(Chunk::Init(_)) | Some(Chunk::CookieEcho(_)) => {
                let listener = self.index.listeners(header.destination_port).find(|h| {
                    self.associations.get(h).is_some_and(|a| {
                        binds_any(a.local_addresses())
                            || a.local_addresses().contains(&incoming.dst)
                    })
                });
                if listener.is_some() {
                    return listener;
                }
            }
            // The INIT-ACK may come from another address of the peer than INIT was sent to.
            Some(Chunk::InitAck(chunk)) => {
                let association = chunk
                    .addresses()
                    .into_iter()
                    .filter_map(|remote| self.find_by_tuple(remote, incoming.dst, header))
                    .find(|h| {
                        self.associations
                            .get(h)
                            .is_some_and(|a| a.state() == AssociationState::CookieWait)
                    });
                if association.is_some() {
                    return association;
                }
            }
            _ => {}
        }
        self.find_by_tag(header)
    }

    /// Creates the association a listener accepts, under the same gate and the first free
    /// association id after the listener's.
    fn fork(&mut self, listener: AppHandle, incoming: &Incoming) -> AppHandle {
        let mut handle = AppHandle::new(listener.gate, listener.assoc_id.wrapping_add(1));
        while self.associations.contains_key(&handle) {
            handle.assoc_id = handle.assoc_id.wrapping_add(1);
        }
        let rng = self.new_rng();
        if let Some(association) =
            self.associations.get(&listener).map(|l| l.fork(handle, rng, incoming))
        {
            self.associations.insert(handle, association);
        }
        handle
    }

    // From <https://datatracker.ietf.org/doc/html/rfc9260#section-8.4>:
    //
    //   An SCTP packet is called an "out of the blue" (OOTB) packet if it is correctly formed
    //   (i.e., passed the receiver's checksum check; see Section 6.8), but the receiver is not
    //   able to identify the association to which this packet belongs.
    fn handle_out_of_the_blue(&mut self, incoming: &Incoming, packet: &SctpPacket) {
        let header = &incoming.header;
        let reply = |tag: u32, chunk: Chunk| {
            let mut builder = SctpPacketBuilder::new(
                tag,
                header.destination_port,
                header.source_port,
                self.options.mtu,
            );
            builder.add(&chunk);
            let payload = builder.build();
            self.events
                .borrow_mut()
                .add(SctpEvent::SendPacket(Datagram::new(incoming.dst, incoming.src, payload)));
        };

        //   2)  If the OOTB packet contains an ABORT chunk, the receiver MUST silently discard
        //       the OOTB packet and take no further action.
        //   6)  If the packet contains a SHUTDOWN COMPLETE chunk, the receiver should silently
        //       discard the packet and take no further action.
        //   7)  If the packet contains an ERROR chunk with the "Stale Cookie" error cause or a
        //       COOKIE ACK, the SCTP packet should be silently discarded.
        let silent = packet.chunks.iter().any(|c| match c {
            Chunk::Abort(_) | Chunk::ShutdownComplete(_) | Chunk::CookieAck(_) => true,
            Chunk::Error(e) => {
                e.error_causes.iter().any(|cause| matches!(cause, ErrorCause::StaleCookie { .. }))
            }
            _ => false,
        });
        if silent {
            debug!("Discarding out-of-the-blue packet from {}", incoming.src);
            return;
        }

        match packet.chunks.first() {
            //   5)  If the packet contains a SHUTDOWN ACK chunk, the receiver should respond to
            //       the sender of the OOTB packet with a SHUTDOWN COMPLETE chunk. When sending the
            //       SHUTDOWN COMPLETE chunk, the receiver of the OOTB packet MUST fill in the
            //       Verification Tag field of the outbound packet with the Verification Tag
            //       received in the SHUTDOWN ACK chunk and set the T bit in the Chunk Flags to
            //       indicate that the Verification Tag is reflected.
            Some(Chunk::ShutdownAck(_)) => {
                info!("Answering out-of-the-blue SHUTDOWN-ACK from {}", incoming.src);
                reply(
                    header.verification_tag,
                    Chunk::ShutdownComplete(ShutdownCompleteChunk { tag_reflected: true }),
                );
            }
            // No listener: the INIT is refused with the tag it asked for.
            Some(Chunk::Init(init)) => {
                info!("Refusing INIT from {}:{}", incoming.src, header.source_port);
                reply(
                    init.initiate_tag,
                    Chunk::Abort(AbortChunk { tag_reflected: false, error_causes: vec![] }),
                );
            }
            //   8)  The receiver should respond to the sender of the OOTB packet with an ABORT
            //       chunk. When sending the ABORT chunk, the receiver of the OOTB packet MUST fill
            //       in the Verification Tag field of the outbound packet with the value found in
            //       the Verification Tag field of the OOTB packet and set the T bit in the Chunk
            //       Flags to indicate that the Verification Tag is reflected.
            Some(_) => {
                info!("Aborting out-of-the-blue packet from {}", incoming.src);
                reply(
                    header.verification_tag,
                    Chunk::Abort(AbortChunk { tag_reflected: true, error_causes: vec![] }),
                );
            }
            None => {}
        }
    }

    pub fn advance_time(&mut self, now: SctpTime) {
        if now < *self.now.borrow() {
            // Time is not allowed to go backwards.
            return;
        }
        self.now.replace(now);
        for (handle, association) in self.associations.iter_mut() {
            association.advance_time(now);
            self.index.update(*handle, Some(IndexKeys::of(association)));
        }
        self.remove_terminated();
    }

    /// The earliest time at which [`Sctp::advance_time`] should be called. Never in the past.
    pub fn poll_timeout(&self) -> SctpTime {
        let now = *self.now.borrow();
        self.associations
            .values()
            .filter_map(Association::poll_timeout)
            .min()
            .map_or(SctpTime::infinite_future(), |t| t.max(now))
    }

    pub fn poll_event(&mut self) -> Option<SctpEvent> {
        self.events.borrow_mut().next_event()
    }

    pub fn status(&self, handle: AppHandle) -> Option<AssociationStatus> {
        self.associations.get(&handle).map(Association::status)
    }

    pub fn state(&self, handle: AppHandle) -> Option<AssociationState> {
        self.associations.get(&handle).map(Association::state)
    }

    /// Number of associations, listeners included.
    pub fn association_count(&self) -> usize {
        self.associations.len()
    }

    /// Every association handle, in order.
    pub fn handles(&self) -> impl Iterator<Item = AppHandle> + '_ {
        self.associations.keys().copied()
    }
}
