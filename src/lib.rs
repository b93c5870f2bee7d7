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

//! A sans-IO SCTP association engine.
//!
//! The crate never touches sockets or clocks. Datagrams and application commands are fed into a
//! [`Sctp`] demultiplexer together with the current time, and everything it wants to happen
//! (packets to send, indications for the application) is drained as [`api::SctpEvent`]s.

pub mod api;
pub mod sctp;

pub(crate) mod association;
pub(crate) mod events;
pub(crate) mod packet;
pub(crate) mod queue;
pub(crate) mod rx;
pub(crate) mod timer;
pub(crate) mod tx;
pub(crate) mod types;

pub use sctp::Sctp;

trait EventSink {
    fn add(&mut self, event: api::SctpEvent);
    fn next_event(&mut self) -> Option<api::SctpEvent>;
}

#[cfg(test)]
pub(crate) mod testing;

/// Returns the version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub(crate) mod logging {
    #[cfg(not(test))]
    use log::info;
    use std::fmt::Write;
    #[cfg(test)]
    use std::println as info;
    use std::time::Duration;

    /// Dumps `data` in a format that `text2pcap -D -t "%H:%M:%S." -i 132` understands.
    pub fn log_packet(name: &str, ts: Duration, sent: bool, data: &[u8]) {
        let mut hex = String::with_capacity(data.len() * 3);
        for byte in data {
            let _ = write!(hex, " {byte:02x}");
        }
        let millis_of_day = ts.as_millis() % (24 * 60 * 60 * 1000);
        let (hours, rest) = (millis_of_day / 3_600_000, millis_of_day % 3_600_000);
        let (minutes, rest) = (rest / 60_000, rest % 60_000);
        let (seconds, ms) = (rest / 1000, rest % 1000);
        info!(
            "{} {:02}:{:02}:{:02}.{:03} 0000{} # SCTP_PACKET {}",
            if sent { "O" } else { "I" },
            hours,
            minutes,
            seconds,
            ms,
            hex,
            name
        );
    }
}

pub(crate) mod math {
    macro_rules! round_up_to_4 {
        ($a: expr) => {
            ($a + 3) & !3
        };
    }

    macro_rules! round_down_to_4 {
        ($a: expr) => {
            $a & !3
        };
    }

    macro_rules! is_divisible_by_4 {
        ($a: expr) => {
            ($a % 4) == 0
        };
    }

    pub(crate) use is_divisible_by_4;
    pub(crate) use round_down_to_4;
    pub(crate) use round_up_to_4;
}

#[cfg(test)]
mod tests {
    use crate::math::*;

    #[test]
    fn rounds_up_to_multiple_of_four() {
        let cases: &[(usize, usize)] = &[(0, 0), (1, 4), (3, 4), (4, 4), (5, 8), (1499, 1500)];
        for &(input, expected) in cases {
            assert_eq!(round_up_to_4!(input), expected, "input {input}");
        }
        assert_eq!(round_up_to_4!(-3_i32), 0);
        assert_eq!(round_up_to_4!(10000000001_u64), 10000000004);
    }

    #[test]
    fn rounds_down_to_multiple_of_four() {
        let cases: &[(usize, usize)] =
            &[(0, 0), (3, 0), (4, 4), (7, 4), (1500, 1500), (1501, 1500)];
        for &(input, expected) in cases {
            assert_eq!(round_down_to_4!(input), expected, "input {input}");
        }
        assert_eq!(round_down_to_4!(-1_i32), -4);
    }

    #[test]
    fn checks_divisibility_by_four() {
        assert!(is_divisible_by_4!(0_u32));
        assert!(is_divisible_by_4!(1500_usize));
        assert!(!is_divisible_by_4!(1501_usize));
        assert!(!is_divisible_by_4!(-3_i32));
    }

    #[test]
    fn version_is_set() {
        assert!(!crate::version().is_empty());
    }
}
