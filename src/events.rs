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
use crate::api::SctpEvent;
use std::collections::VecDeque;

/// The event queue shared by the demultiplexer and all of its associations.
pub struct Events {
    events: VecDeque<SctpEvent>,
}

impl Events {
    pub fn new() -> Self {
        Self { events: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSink for Events {
    fn add(&mut self, event: SctpEvent) {
        self.events.push_back(event);
    }

    fn next_event(&mut self) -> Option<SctpEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AppHandle;
    use crate::api::Datagram;
    use crate::api::Indication;
    use crate::testing::event_helpers::expect_indication;
    use crate::testing::event_helpers::expect_no_event;
    use crate::testing::event_helpers::expect_sent_packet;
    use std::net::IpAddr;
    use std::net::Ipv4Addr;

    #[test]
    fn events_are_drained_in_order() {
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let handle = AppHandle::new(1, 1);
        let mut events = Events::new();
        events.add(SctpEvent::Indication(handle, Indication::Restarted));
        events.add(SctpEvent::SendPacket(Datagram::new(addr, addr, vec![1, 2, 3])));
        assert_eq!(events.len(), 2);

        let (h, indication) = expect_indication!(events.next_event());
        assert_eq!(h, handle);
        assert_eq!(indication, Indication::Restarted);
        assert_eq!(expect_sent_packet!(events.next_event()).payload, vec![1, 2, 3]);
        expect_no_event!(events.next_event());
        assert!(events.is_empty());
    }
}
