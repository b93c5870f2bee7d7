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

use crate::math::round_up_to_4;
use crate::packet::AsSerializableTlv;
use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::address_parameter;
use crate::packet::address_parameter::AddressParameter;
use crate::packet::forward_tsn_supported_parameter;
use crate::packet::forward_tsn_supported_parameter::ForwardTsnSupportedParameter;
use crate::packet::heartbeat_info_parameter;
use crate::packet::heartbeat_info_parameter::HeartbeatInfoParameter;
use crate::packet::read_u16_be;
use crate::packet::state_cookie_parameter;
use crate::packet::state_cookie_parameter::StateCookieParameter;
use crate::packet::unknown_parameter::UnknownParameter;
use crate::packet::write_u16_be;
use anyhow::Error;
use anyhow::ensure;
use std::cmp;
use std::net::IpAddr;

/// Represents the raw optional/variable-length parameter format, as defined in
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2.1>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        Parameter Type         |       Parameter Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /                        Parameter Value                        /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Error causes share this framing, which is why they are parsed through it as well.
#[derive(Debug)]
pub(crate) struct RawParameter<'a> {
    pub(crate) typ: u16,
    pub(crate) value: &'a [u8],
}

impl<'a> RawParameter<'a> {
    pub(crate) fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Error> {
        ensure!(bytes.len() >= TLV_HEADER_SIZE, ChunkParseError::InvalidLength);
        let typ = read_u16_be!(&bytes[0..2]);
        let length = read_u16_be!(&bytes[2..4]) as usize;
        ensure!(length >= TLV_HEADER_SIZE && length <= bytes.len(), ChunkParseError::InvalidLength);
        let end_offset = cmp::min(round_up_to_4!(length), bytes.len());
        Ok((Self { typ, value: &bytes[TLV_HEADER_SIZE..length] }, &bytes[end_offset..]))
    }
}

/// Writes a parameter header with the provided arguments and returns the remaining part of the
/// parameter (its value) that may be filled in by the caller with additional data.
#[inline]
pub(crate) fn write_parameter_header(typ: u16, value_size: usize, output: &mut [u8]) -> &mut [u8] {
    let serialized_size = TLV_HEADER_SIZE + value_size;
    debug_assert!(output.len() >= serialized_size);
    write_u16_be!(&mut output[0..2], typ);
    write_u16_be!(&mut output[2..4], serialized_size as u16);
    &mut output[TLV_HEADER_SIZE..serialized_size]
}

/// Parameters that can appear in INIT, INIT ACK and HEARTBEAT chunks.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Parameter {
    HeartbeatInfo(HeartbeatInfoParameter),
    Address(AddressParameter),
    StateCookie(StateCookieParameter),
    ForwardTsnSupported(ForwardTsnSupportedParameter),
    Unknown(UnknownParameter),
}

impl TryFrom<RawParameter<'_>> for Parameter {
    type Error = Error;

    fn try_from(raw: RawParameter<'_>) -> Result<Self, Error> {
        match raw.typ {
            heartbeat_info_parameter::PARAMETER_TYPE => {
                HeartbeatInfoParameter::try_from(raw).map(Parameter::HeartbeatInfo)
            }
            address_parameter::PARAMETER_TYPE_IPV4 | address_parameter::PARAMETER_TYPE_IPV6 => {
                AddressParameter::try_from(raw).map(Parameter::Address)
            }
            state_cookie_parameter::PARAMETER_TYPE => {
                StateCookieParameter::try_from(raw).map(Parameter::StateCookie)
            }
            forward_tsn_supported_parameter::PARAMETER_TYPE => {
                ForwardTsnSupportedParameter::try_from(raw).map(Parameter::ForwardTsnSupported)
            }
            _ => UnknownParameter::try_from(raw).map(Parameter::Unknown),
        }
    }
}

impl AsSerializableTlv for Parameter {
    fn as_serializable(&self) -> &dyn SerializableTlv {
        match self {
            Parameter::HeartbeatInfo(p) => p,
            Parameter::Address(p) => p,
            Parameter::StateCookie(p) => p,
            Parameter::ForwardTsnSupported(p) => p,
            Parameter::Unknown(p) => p,
        }
    }
}

pub(crate) fn parameters_from_bytes(data: &[u8]) -> Result<Vec<Parameter>, Error> {
    let mut result = Vec::<Parameter>::with_capacity(4);
    let mut remaining = data;
    while !remaining.is_empty() {
        let (raw, next_remaining) = RawParameter::from_bytes(remaining)?;
        result.push(Parameter::try_from(raw)?);
        remaining = next_remaining;
    }
    Ok(result)
}

/// Serialized size of a parameter list; every parameter but the last is padded.
pub(crate) fn parameters_serialized_size<T: AsSerializableTlv>(params: &[T]) -> usize {
    let mut size: usize = 0;
    for (idx, p) in params.iter().enumerate() {
        size += p.as_serializable().serialized_size();
        if idx != params.len() - 1 {
            size = round_up_to_4!(size);
        }
    }
    size
}

pub(crate) fn parameters_serialize_to<T: AsSerializableTlv>(params: &[T], out: &mut [u8]) {
    let mut offset: usize = 0;
    for p in params {
        let serializable = p.as_serializable();
        let size = serializable.serialized_size();
        serializable.serialize_to(&mut out[offset..offset + size]);
        offset += round_up_to_4!(size);
    }
}

/// All transport addresses listed in `params`, in order.
pub(crate) fn addresses_in(params: &[Parameter]) -> Vec<IpAddr> {
    params
        .iter()
        .filter_map(|p| match p {
            Parameter::Address(a) => Some(a.address),
            _ => None,
        })
        .collect()
}

pub(crate) fn state_cookie_in(params: &[Parameter]) -> Option<&[u8]> {
    params.iter().find_map(|p| match p {
        Parameter::StateCookie(c) => Some(c.cookie.as_slice()),
        _ => None,
    })
}

pub(crate) fn forward_tsn_supported_in(params: &[Parameter]) -> bool {
    params.iter().any(|p| matches!(p, Parameter::ForwardTsnSupported(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::net::Ipv6Addr;

    #[test]
    fn truncated_parameter_is_an_error() {
        const DATA: &[u8] = &[0, 16, 0, 8, 0, 0, 0];
        assert!(parameters_from_bytes(DATA).is_err());
    }

    #[test]
    fn list_round_trip_keeps_order() {
        let params = vec![
            Parameter::Address(AddressParameter {
                address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            }),
            Parameter::StateCookie(StateCookieParameter { cookie: vec![1, 2, 3] }),
            Parameter::Address(AddressParameter { address: IpAddr::V6(Ipv6Addr::LOCALHOST) }),
            Parameter::ForwardTsnSupported(ForwardTsnSupportedParameter {}),
        ];
        // 8 + (7 padded to 8) + 20 + 4
        assert_eq!(parameters_serialized_size(&params), 40);
        let mut out = vec![0; parameters_serialized_size(&params)];
        parameters_serialize_to(&params, &mut out);

        let parsed = parameters_from_bytes(&out).unwrap();
        assert_eq!(parsed, params);
        assert_eq!(
            addresses_in(&parsed),
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), IpAddr::V6(Ipv6Addr::LOCALHOST)]
        );
        assert_eq!(state_cookie_in(&parsed), Some(&[1u8, 2, 3][..]));
        assert!(forward_tsn_supported_in(&parsed));
    }

    #[test]
    fn unknown_parameters_are_kept() {
        // ECN capable (0x8000), not understood.
        const DATA: &[u8] = &[0x80, 0x00, 0x00, 0x04];
        let parsed = parameters_from_bytes(DATA).unwrap();
        assert!(matches!(&parsed[0], Parameter::Unknown(p) if p.typ == 0x8000));
        assert!(!forward_tsn_supported_in(&parsed));
    }
}
