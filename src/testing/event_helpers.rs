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
use crate::api::SctpEvent;

macro_rules! expect_sent_packet {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match e {
                crate::api::SctpEvent::SendPacket(d) => d,
                _ => panic!("Expected SendPacket, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_indication {
    ($event:expr) => {
        match $event {
            None => panic!("No event emitted"),
            Some(e) => match e {
                crate::api::SctpEvent::Indication(handle, indication) => (handle, indication),
                _ => panic!("Expected Indication, got {:?}", e),
            },
        }
    };
}

macro_rules! expect_no_event {
    ($event:expr) => {
        match $event {
            None => {}
            Some(e) => panic!("Expected no event, got {:?}", e),
        }
    };
}

/// Matches indications of the same variant, ignoring their payload.
pub fn is_indication(expected: &Indication) -> impl Fn(&SctpEvent) -> bool + '_ {
    move |e| match e {
        SctpEvent::Indication(_, i) => {
            std::mem::discriminant(i) == std::mem::discriminant(expected)
        }
        _ => false,
    }
}

pub(crate) use expect_indication;
pub(crate) use expect_no_event;
pub(crate) use expect_sent_packet;
