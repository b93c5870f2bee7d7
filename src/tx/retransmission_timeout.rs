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

use crate::api::Options;
use std::time::Duration;

const RTO_ALPHA: f64 = 0.125;
const RTO_BETA: f64 = 0.25;

/// Retransmission timeout of one destination path, see
/// <https://datatracker.ietf.org/doc/html/rfc4960#section-6.3.1>.
pub(crate) struct RetransmissionTimeout {
    min_rto: f64,
    max_rto: f64,
    /// None until the first RTT measurement.
    srtt: Option<f64>,
    rtt_var: f64,
    rto: Duration,
}

impl RetransmissionTimeout {
    pub fn new(options: &Options) -> Self {
        Self {
            min_rto: options.rto_min.as_secs_f64(),
            max_rto: options.rto_max.as_secs_f64(),
            srtt: None,
            rtt_var: 0.0,
            rto: options.rto_initial,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt.map(Duration::from_secs_f64)
    }

    pub fn observe_rtt(&mut self, measured_rtt: Duration) {
        let rtt = measured_rtt.as_secs_f64();
        let srtt = match self.srtt {
            None => {
                self.rtt_var = rtt / 2.0;
                rtt
            }
            Some(srtt) => {
                self.rtt_var = (1.0 - RTO_BETA) * self.rtt_var + RTO_BETA * (srtt - rtt).abs();
                (1.0 - RTO_ALPHA) * srtt + RTO_ALPHA * rtt
            }
        };
        self.srtt = Some(srtt);

        let rto = (srtt + 4.0 * self.rtt_var).clamp(self.min_rto, self.max_rto);
        self.rto = Duration::from_secs_f64(rto);
    }

    /// Doubles the RTO after a retransmission timeout (rule E2 of section 6.3.3), up to the
    /// maximum.
    pub fn back_off(&mut self) {
        self.rto = Duration::from_secs_f64((self.rto.as_secs_f64() * 2.0).min(self.max_rto));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIAL_RTO: Duration = Duration::from_millis(200);
    const MAX_RTO: Duration = Duration::from_millis(800);
    const MIN_RTO: Duration = Duration::from_millis(120);

    fn make_options() -> Options {
        Options {
            rto_initial: INITIAL_RTO,
            rto_max: MAX_RTO,
            rto_min: MIN_RTO,
            ..Options::default()
        }
    }

    #[test]
    fn has_valid_initial_rto() {
        let rto = RetransmissionTimeout::new(&make_options());
        assert_eq!(rto.rto(), INITIAL_RTO);
        assert_eq!(rto.srtt(), None);
    }

    #[test]
    fn first_measurement_sets_srtt() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rtt(Duration::from_millis(124));
        assert_eq!(rto.srtt(), Some(Duration::from_millis(124)));
        assert_eq!(rto.rto().as_millis(), 372);
    }

    #[test]
    fn calculates_rto_for_stable_rtt() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.observe_rtt(Duration::from_millis(124));
        assert_eq!(rto.rto().as_millis(), 372);
        rto.observe_rtt(Duration::from_millis(128));
        assert_eq!(rto.rto().as_millis(), 314);
        rto.observe_rtt(Duration::from_millis(123));
        assert_eq!(rto.rto().as_millis(), 268);
    }

    #[test]
    fn will_never_go_below_minimum_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rtt(Duration::from_millis(1));
        }
        assert_eq!(rto.rto(), MIN_RTO);
    }

    #[test]
    fn will_never_go_above_maximum_rto() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        for _ in 0..1000 {
            rto.observe_rtt(Duration::from_millis(7900));
        }
        assert_eq!(rto.rto(), MAX_RTO);
    }

    #[test]
    fn backs_off_up_to_the_maximum() {
        let mut rto = RetransmissionTimeout::new(&make_options());
        rto.back_off();
        assert_eq!(rto.rto(), Duration::from_millis(400));
        rto.back_off();
        assert_eq!(rto.rto(), MAX_RTO);
        rto.back_off();
        assert_eq!(rto.rto(), MAX_RTO);

        // A new measurement recomputes it from the estimators.
        rto.observe_rtt(Duration::from_millis(124));
        assert_eq!(rto.rto().as_millis(), 372);
    }
}
