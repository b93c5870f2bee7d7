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

use crate::api::SctpTime;
use crate::packet::crc32c::Crc32c;
use crate::packet::read_u16_be;
use crate::packet::read_u32_be;
use crate::packet::read_u64_be;
use crate::packet::write_u16_be;
use crate::packet::write_u32_be;
use crate::packet::write_u64_be;
use crate::types::Tsn;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

const FIXED_SIZE: usize = 50;
const SIGNATURE_SIZE: usize = 4;
const MAGIC_1: u32 = 1399025747;
const MAGIC_2: u32 = 1129270091;

const FAMILY_IPV4: u8 = 4;
const FAMILY_IPV6: u8 = 6;

/// Everything needed to create the TCB of an association, carried by the peer in the state
/// cookie so that the listening side doesn't keep any state until the handshake completes.
///
/// The cookie is signed with a secret that never leaves the [`crate::Sctp`] stack, which is the
/// only thing preventing a peer from forging an association.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct StateCookie {
    pub peer_tag: u32,
    pub my_tag: u32,
    pub peer_initial_tsn: Tsn,
    pub my_initial_tsn: Tsn,
    pub a_rwnd: u32,
    pub tie_tag: u64,
    /// Negotiated number of streams from the peer.
    pub inbound_streams: u16,
    /// Negotiated number of streams towards the peer.
    pub outbound_streams: u16,
    pub partial_reliability: bool,
    pub created_at: SctpTime,
    /// The peer's transport addresses, the INIT's source address first.
    pub peer_addresses: Vec<IpAddr>,
}

impl StateCookie {
    pub fn from_bytes(data: &[u8], secret: u64) -> Result<Self, &'static str> {
        if data.len() < FIXED_SIZE + SIGNATURE_SIZE {
            return Err("Invalid state cookie size");
        }
        let (body, signature) = data.split_at(data.len() - SIGNATURE_SIZE);
        if read_u32_be!(signature) != sign(body, secret) {
            return Err("Invalid state cookie signature");
        }

        let magic1 = read_u32_be!(&body[0..4]);
        let magic2 = read_u32_be!(&body[4..8]);
        if magic1 != MAGIC_1 || magic2 != MAGIC_2 {
            return Err("Invalid state cookie magic");
        }

        let address_count = body[41] as usize;
        let mut peer_addresses = Vec::with_capacity(address_count);
        let mut rest = &body[FIXED_SIZE..];
        for _ in 0..address_count {
            let (address, remaining) = read_address(rest).ok_or("Invalid state cookie address")?;
            peer_addresses.push(address);
            rest = remaining;
        }
        if !rest.is_empty() {
            return Err("Invalid state cookie size");
        }

        Ok(StateCookie {
            peer_tag: read_u32_be!(&body[8..12]),
            my_tag: read_u32_be!(&body[12..16]),
            peer_initial_tsn: Tsn(read_u32_be!(&body[16..20])),
            my_initial_tsn: Tsn(read_u32_be!(&body[20..24])),
            a_rwnd: read_u32_be!(&body[24..28]),
            tie_tag: read_u64_be!(&body[28..36]),
            inbound_streams: read_u16_be!(&body[36..38]),
            outbound_streams: read_u16_be!(&body[38..40]),
            partial_reliability: body[40] != 0,
            created_at: SctpTime::from_millis(read_u64_be!(&body[42..50])),
            peer_addresses,
        })
    }

    pub fn serialize(&self, secret: u64) -> Vec<u8> {
        let mut data: Vec<u8> = vec![0; FIXED_SIZE];
        write_u32_be!(&mut data[0..4], MAGIC_1);
        write_u32_be!(&mut data[4..8], MAGIC_2);
        write_u32_be!(&mut data[8..12], self.peer_tag);
        write_u32_be!(&mut data[12..16], self.my_tag);
        write_u32_be!(&mut data[16..20], self.peer_initial_tsn.0);
        write_u32_be!(&mut data[20..24], self.my_initial_tsn.0);
        write_u32_be!(&mut data[24..28], self.a_rwnd);
        write_u64_be!(&mut data[28..36], self.tie_tag);
        write_u16_be!(&mut data[36..38], self.inbound_streams);
        write_u16_be!(&mut data[38..40], self.outbound_streams);
        data[40] = self.partial_reliability as u8;
        let addresses = &self.peer_addresses[..self.peer_addresses.len().min(u8::MAX as usize)];
        data[41] = addresses.len() as u8;
        write_u64_be!(&mut data[42..50], self.created_at.as_duration().as_millis() as u64);
        for address in addresses {
            write_address(&mut data, *address);
        }
        let signature = sign(&data, secret);
        data.extend_from_slice(&signature.to_be_bytes());
        data
    }
}

fn sign(body: &[u8], secret: u64) -> u32 {
    let mut crc = Crc32c::new();
    crc.update(&secret.to_be_bytes());
    crc.update(body);
    crc.finish()
}

/// Appends an address as a family byte followed by the address bytes.
pub(crate) fn write_address(out: &mut Vec<u8>, address: IpAddr) {
    match address {
        IpAddr::V4(a) => {
            out.push(FAMILY_IPV4);
            out.extend_from_slice(&a.octets());
        }
        IpAddr::V6(a) => {
            out.push(FAMILY_IPV6);
            out.extend_from_slice(&a.octets());
        }
    }
}

/// Reads an address written by [`write_address`], returning it and what follows it.
pub(crate) fn read_address(data: &[u8]) -> Option<(IpAddr, &[u8])> {
    let (family, rest) = data.split_first()?;
    match *family {
        FAMILY_IPV4 if rest.len() >= 4 => {
            let octets: [u8; 4] = rest[..4].try_into().ok()?;
            Some((IpAddr::V4(Ipv4Addr::from(octets)), &rest[4..]))
        }
        FAMILY_IPV6 if rest.len() >= 16 => {
            let octets: [u8; 16] = rest[..16].try_into().ok()?;
            Some((IpAddr::V6(Ipv6Addr::from(octets)), &rest[16..]))
        }
        _ => None,
    }
}
