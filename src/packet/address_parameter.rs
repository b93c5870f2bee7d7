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

use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::parameter::RawParameter;
use crate::packet::parameter::write_parameter_header;
use anyhow::Error;
use anyhow::ensure;
use std::fmt;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

pub(crate) const PARAMETER_TYPE_IPV4: u16 = 5;
pub(crate) const PARAMETER_TYPE_IPV6: u16 = 6;

/// IPv4 Address and IPv6 Address parameters
///
/// See <https://datatracker.ietf.org/doc/html/rfc9260#section-3.3.2.1.1> and the section
/// following it.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        Type = 5 or 6          |        Length = 8 or 20       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                 IPv4 or IPv6 Address (4 or 16)                /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AddressParameter {
    pub address: IpAddr,
}

impl TryFrom<RawParameter<'_>> for AddressParameter {
    type Error = Error;

    fn try_from(raw: RawParameter<'_>) -> Result<Self, Error> {
        let address = match raw.typ {
            PARAMETER_TYPE_IPV4 => {
                let octets: [u8; 4] =
                    raw.value.try_into().map_err(|_| ChunkParseError::InvalidLength)?;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            PARAMETER_TYPE_IPV6 => {
                let octets: [u8; 16] =
                    raw.value.try_into().map_err(|_| ChunkParseError::InvalidLength)?;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => return Err(ChunkParseError::InvalidType.into()),
        };
        ensure!(!address.is_unspecified(), ChunkParseError::InvalidValue);
        Ok(Self { address })
    }
}

impl SerializableTlv for AddressParameter {
    fn serialize_to(&self, output: &mut [u8]) {
        match self.address {
            IpAddr::V4(a) => {
                let value = write_parameter_header(PARAMETER_TYPE_IPV4, 4, output);
                value.copy_from_slice(&a.octets());
            }
            IpAddr::V6(a) => {
                let value = write_parameter_header(PARAMETER_TYPE_IPV6, 16, output);
                value.copy_from_slice(&a.octets());
            }
        }
    }

    fn value_size(&self) -> usize {
        match self.address {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 16,
        }
    }
}

impl fmt::Display for AddressParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address parameter, address={}", self.address)
    }
}
