//! Recovery of a sender's clock from PCR values and local packet arrival times.
//!
//! Network and buffering delays add jitter to the time at which each PCR-bearing packet arrives,
//! but that jitter only ever makes a packet *later*.  The smallest difference between elapsed
//! arrival time and elapsed PCR time, taken over a sliding window of recent samples, is therefore
//! the best estimate of the fixed offset between the two clocks.  `ClockSkew` maintains that
//! estimate and uses it to assign each PCR a smooth, monotonic output time.
//!
//! All times handled here are in nanoseconds.

use crate::time::{self, NANOS_PER_SECOND, PCR_MAX_NANOS};
use log::{debug, trace, warn};

/// The maximum number of samples held in the window
pub const MAX_WINDOW: usize = 512;
/// The maximum span of PCR time covered while the window is filling
const MAX_TIME: i64 = 2 * NANOS_PER_SECOND as i64;
/// A backwards PCR step larger than this, with arrival times available, is taken to be a reset
/// of the sender's clock
pub(crate) const RESET_THRESHOLD: i64 = 15 * NANOS_PER_SECOND as i64;
/// Backwards PCR steps smaller than this are taken to be jitter
const JITTER_THRESHOLD: i64 = NANOS_PER_SECOND as i64;

const PCR_MAX: i64 = PCR_MAX_NANOS as i64;

/// Windowed low-point clock skew estimator for the PCRs of one PID.
#[derive(Debug, Clone)]
pub struct ClockSkew {
    base_time: Option<i64>,
    base_pcrtime: Option<i64>,
    prev_out_time: Option<i64>,
    prev_in_time: Option<i64>,
    prev_send_diff: Option<i64>,
    last_pcrtime: Option<i64>,
    pcroffset: i64,

    window: Vec<i64>,
    window_pos: usize,
    window_size: usize,
    window_filling: bool,
    window_min: i64,
    skew: i64,
}

impl Default for ClockSkew {
    fn default() -> ClockSkew {
        ClockSkew {
            base_time: None,
            base_pcrtime: None,
            prev_out_time: None,
            prev_in_time: None,
            prev_send_diff: None,
            last_pcrtime: None,
            pcroffset: 0,
            window: vec![0; MAX_WINDOW],
            window_pos: 0,
            window_size: 0,
            window_filling: true,
            window_min: 0,
            skew: 0,
        }
    }
}

fn to_nanos(t: u64) -> i64 {
    i64::try_from(t).unwrap_or(i64::MAX)
}

impl ClockSkew {
    /// Creates an estimator which has seen no samples.
    pub fn new() -> ClockSkew {
        Default::default()
    }

    /// The current skew estimate; the amount by which output times lead the PCR timeline.
    pub fn skew(&self) -> i64 {
        self.skew
    }

    /// true until enough samples (or a long enough span of PCR time) have been seen for the
    /// window minimum alone to determine the skew.
    pub fn is_filling(&self) -> bool {
        self.window_filling
    }

    /// Arrival time of the sample anchoring the timeline.
    pub fn base_time(&self) -> Option<u64> {
        self.base_time.and_then(|t| u64::try_from(t).ok())
    }

    /// The correction applied to raw PCR times to account for wraparound and resets seen so far.
    pub fn pcr_offset(&self) -> i64 {
        self.pcroffset
    }

    /// The most recent corrected PCR time.
    pub fn last_pcrtime(&self) -> Option<i64> {
        self.last_pcrtime
    }

    /// Re-anchor the timeline on the given sample.  With `reset_skew`, the window is emptied and
    /// the skew estimate starts again from zero.
    fn resync(&mut self, time: Option<i64>, pcrtime: i64, reset_skew: bool) {
        self.base_time = time;
        self.base_pcrtime = Some(pcrtime);
        self.prev_out_time = None;
        self.prev_send_diff = None;
        if reset_skew {
            self.window_filling = true;
            self.window_pos = 0;
            self.window_min = 0;
            self.window_size = 0;
            self.skew = 0;
        }
    }

    /// Start filling the window again, keeping the current skew estimate as the starting point.
    pub fn restart_window(&mut self) {
        self.window_filling = true;
        self.window_pos = 0;
        self.window_min = 0;
        self.window_size = 0;
    }

    /// Treat the next sample as the first.
    pub(crate) fn forget_base_time(&mut self) {
        self.base_time = None;
    }

    /// Use the given arrival time and PCR time as the anchor, unless one is already set.  For
    /// streams without PCR, where presentation timestamps stand in for it.
    pub(crate) fn anchor_if_unset(&mut self, time: u64, pcrtime: u64) {
        if self.base_time.is_none() {
            self.base_time = Some(to_nanos(time));
            self.base_pcrtime = Some(to_nanos(pcrtime));
        }
    }

    /// Process one PCR sample.
    ///
    /// `pcr` is the PCR in 27MHz ticks, `time` the arrival time of the packet carrying it (if
    /// known) and `threshold` the largest jump in observed skew tolerated without starting
    /// again.  Returns the smoothed output time for the sample.
    pub fn calculate(&mut self, pcr: u64, time: Option<u64>, threshold: u64) -> Option<u64> {
        let pcr_nanos = to_nanos(time::pcr_to_nanos(pcr));
        let mut time = time.map(to_nanos);
        let mut pcrtime = pcr_nanos + self.pcroffset;

        if self.base_time.is_none() {
            self.base_time = time;
            self.prev_out_time = None;
        }
        let base_pcrtime = match self.base_pcrtime {
            Some(t) => t,
            None => {
                self.base_pcrtime = Some(pcrtime);
                self.prev_send_diff = None;
                pcrtime
            }
        };

        let mut send_diff = match self.last_pcrtime {
            Some(last) if pcrtime < last => {
                let backwards = last - pcrtime;
                if backwards > PCR_MAX / 2 {
                    self.pcroffset += PCR_MAX;
                    pcrtime = pcr_nanos + self.pcroffset;
                    debug!("PCR wraparound, pcr offset now {}", self.pcroffset);
                    pcrtime - base_pcrtime
                } else if let (Some(t), Some(base_time), true) =
                    (time, self.base_time, backwards > RESET_THRESHOLD)
                {
                    // pick the offset which keeps elapsed PCR time in step with elapsed arrival
                    // time
                    self.pcroffset += t - base_time + base_pcrtime - pcrtime;
                    pcrtime = pcr_nanos + self.pcroffset;
                    warn!(
                        "PCR reset ({}ns backwards), pcr offset now {}",
                        backwards, self.pcroffset
                    );
                    pcrtime - base_pcrtime
                } else {
                    if time == self.base_time {
                        // arrival times are not advancing, so there is nothing to judge the
                        // step against
                    } else if backwards < JITTER_THRESHOLD {
                        warn!("small backward PCR step ({}ns), ignoring", backwards);
                        time = None;
                    } else {
                        warn!(
                            "backward PCR step ({}ns), resyncing base PCR time",
                            backwards
                        );
                        self.base_pcrtime = None;
                    }
                    0
                }
            }
            _ => pcrtime - base_pcrtime,
        };
        self.last_pcrtime = Some(pcrtime);

        if let (Some(t), Some(base_time)) = (time, self.base_time) {
            if Some(t) != self.prev_in_time {
                let recv_diff = t - base_time;
                let mut delta = recv_diff - send_diff;
                trace!(
                    "send_diff {} recv_diff {} delta {} skew {}",
                    send_diff,
                    recv_diff,
                    delta,
                    self.skew
                );
                if (delta - self.skew).unsigned_abs() > threshold {
                    warn!(
                        "delta - skew: {} too big, resetting skew",
                        delta - self.skew
                    );
                    self.resync(Some(t), pcrtime, true);
                    send_diff = 0;
                    delta = 0;
                }
                self.update_window(delta, send_diff);
            }
        }

        let out_time = match self.base_time {
            Some(base_time) => {
                let mut out_time = (base_time + send_diff + self.skew).max(0);
                if let (Some(prev_out), Some(prev_send_diff)) =
                    (self.prev_out_time, self.prev_send_diff)
                {
                    if (send_diff > prev_send_diff && out_time < prev_out)
                        || (send_diff < prev_send_diff && out_time > prev_out)
                        || send_diff == prev_send_diff
                    {
                        trace!("backwards timestamps, using previous time");
                        out_time = prev_out;
                    }
                }
                Some(out_time)
            }
            None => time,
        };
        self.prev_out_time = out_time;
        self.prev_in_time = time;
        self.prev_send_diff = Some(send_diff);
        trace!("skew {}, out {:?}", self.skew, out_time);
        out_time.and_then(|t| u64::try_from(t).ok())
    }

    fn update_window(&mut self, delta: i64, send_diff: i64) {
        let mut pos = self.window_pos;
        if self.window_filling {
            self.window[pos] = delta;
            pos += 1;
            if pos == 1 || delta < self.window_min {
                self.window_min = delta;
            }
            if send_diff < 0 || send_diff >= MAX_TIME || pos >= MAX_WINDOW {
                self.window_size = pos;
                self.skew = self.window_min;
                self.window_filling = false;
                debug!("skew window filled with {} samples, skew {}", pos, self.skew);
            } else {
                let perc_time = send_diff * 100 / MAX_TIME;
                let perc_window = (pos * 100 / MAX_WINDOW) as i64;
                let perc = perc_time.max(perc_window);
                // parabolic, so that early samples barely move the estimate
                let perc = perc * perc;
                self.skew = (perc * self.window_min + (10000 - perc) * self.skew) / 10000;
                self.window_size = pos + 1;
            }
        } else {
            let old = self.window[pos];
            self.window[pos] = delta;
            pos += 1;
            if delta <= self.window_min {
                self.window_min = delta;
            } else if old == self.window_min {
                let mut min = i64::MAX;
                for &v in &self.window[..self.window_size] {
                    if v == old {
                        min = old;
                        break;
                    }
                    min = min.min(v);
                }
                self.window_min = min;
            }
            self.skew = (self.window_min + 124 * self.skew) / 125;
        }
        if pos >= self.window_size {
            pos = 0;
        }
        self.window_pos = pos;
    }

    /// Maps a timestamp on the sender's clock (in nanoseconds, already corrected for PTS
    /// wraparound if needed) to output time.  With `check_diff`, timestamps more than 15 seconds
    /// away from the last PCR are refused.
    pub(crate) fn stream_time(&self, pts: u64, extra_shift: i64, check_diff: bool) -> Option<u64> {
        let base_time = self.base_time?;
        let base_pcrtime = self.base_pcrtime.unwrap_or(0);
        let res = to_nanos(pts) + self.pcroffset + extra_shift;
        if check_diff {
            if let Some(last) = self.last_pcrtime {
                if (res - last).unsigned_abs() > RESET_THRESHOLD as u64 {
                    return None;
                }
            }
        }
        let tmp = base_time + self.skew;
        let res = if tmp + res >= base_pcrtime {
            res + tmp - base_pcrtime
        } else if !check_diff || (tmp + res + PCR_MAX - base_pcrtime).abs() < PCR_MAX / 2 {
            // the timestamp has wrapped since the base PCR
            res + tmp + PCR_MAX - base_pcrtime
        } else {
            return None;
        };
        u64::try_from(res).ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::{nanos_to_pcr, PCR_MAX_VALUE, PCR_MSECOND, PCR_SECOND};

    const MS: u64 = 1_000_000;
    const THRESHOLD: u64 = NANOS_PER_SECOND;

    #[test]
    fn steady_stream() {
        let mut skew = ClockSkew::new();
        let mut out = None;
        for i in 0..10 {
            out = skew.calculate(i * 40 * PCR_MSECOND, Some(5000 * MS + i * 40 * MS), THRESHOLD);
        }
        assert_eq!(out, Some(5000 * MS + 360 * MS));
        assert!(skew.is_filling());
        assert_eq!(skew.skew(), 0);
    }

    #[test]
    fn window_fills_after_two_seconds() {
        let mut skew = ClockSkew::new();
        for i in 0..60 {
            skew.calculate(i * 40 * PCR_MSECOND, Some(i * 40 * MS), THRESHOLD);
        }
        assert!(!skew.is_filling());
    }

    #[test]
    fn window_fills_after_max_samples() {
        let mut skew = ClockSkew::new();
        for i in 0..MAX_WINDOW as u64 {
            skew.calculate(i * PCR_MSECOND, Some(i * MS), THRESHOLD);
        }
        assert!(!skew.is_filling());
    }

    #[test]
    fn monotonic_with_jitter() {
        let mut skew = ClockSkew::new();
        let mut last = 0;
        let mut jitter = 17u64;
        for i in 0..2000u64 {
            // deterministic pseudo-random jitter in [0, 50ms)
            jitter = (jitter * 1103515245 + 12345) % (1 << 31);
            let j = jitter % (50 * MS);
            let out = skew
                .calculate(i * 20 * PCR_MSECOND, Some(1000 * MS + i * 20 * MS + j), THRESHOLD)
                .unwrap();
            assert!(out >= last, "sample {}: {} < {}", i, out, last);
            last = out;
        }
        assert!(!skew.is_filling());
        // the estimate should have settled near the smallest observed delay
        assert!(skew.skew() < 10 * MS as i64, "skew {}", skew.skew());
    }

    #[test]
    fn wraparound_absorbed() {
        let mut skew = ClockSkew::new();
        let start = PCR_MAX_VALUE + 1 - 10 * 40 * PCR_MSECOND;
        let mut prev: Option<u64> = None;
        for i in 0..20u64 {
            let pcr = (start + i * 40 * PCR_MSECOND) % (PCR_MAX_VALUE + 1);
            let out = skew.calculate(pcr, Some(i * 40 * MS), THRESHOLD).unwrap();
            if let Some(p) = prev {
                let step = out - p;
                assert!(step > 39 * MS && step < 41 * MS, "step {} at {}", step, i);
            }
            prev = Some(out);
        }
        assert_eq!(skew.pcr_offset(), PCR_MAX_NANOS as i64);
    }

    #[test]
    fn reset_keeps_output_in_step_with_arrival() {
        let mut skew = ClockSkew::new();
        for i in 0..10u64 {
            skew.calculate(3600 * PCR_SECOND + i * 40 * PCR_MSECOND, Some(i * 40 * MS), THRESHOLD);
        }
        // the sender restarts its clock from zero
        let out = skew.calculate(0, Some(400 * MS), THRESHOLD).unwrap();
        assert_eq!(out, 400 * MS);
        let out = skew.calculate(40 * PCR_MSECOND, Some(440 * MS), THRESHOLD).unwrap();
        assert_eq!(out, 440 * MS);
    }

    #[test]
    fn small_backward_step_ignored() {
        let mut skew = ClockSkew::new();
        for i in 0..10u64 {
            skew.calculate(i * 40 * PCR_MSECOND, Some(i * 40 * MS), THRESHOLD);
        }
        skew.calculate(300 * PCR_MSECOND, Some(400 * MS), THRESHOLD);
        assert_eq!(skew.pcr_offset(), 0);
        let out = skew.calculate(400 * PCR_MSECOND, Some(440 * MS), THRESHOLD);
        assert_eq!(out, Some(400 * MS));
    }

    #[test]
    fn skew_jump_resyncs() {
        let mut skew = ClockSkew::new();
        for i in 0..10u64 {
            skew.calculate(i * 40 * PCR_MSECOND, Some(i * 40 * MS), THRESHOLD);
        }
        // arrival time jumps 5s ahead of the PCR timeline
        let out = skew.calculate(400 * PCR_MSECOND, Some(5400 * MS), THRESHOLD);
        assert_eq!(out, Some(5400 * MS));
        assert_eq!(skew.base_time(), Some(5400 * MS));
        assert!(skew.is_filling());
    }

    #[test]
    fn no_arrival_times() {
        let mut skew = ClockSkew::new();
        assert_eq!(skew.calculate(0, None, THRESHOLD), None);
        assert_eq!(skew.calculate(nanos_to_pcr(40 * MS), None, THRESHOLD), None);
        assert_eq!(skew.base_time(), None);
    }

    #[test]
    fn stream_time_of_pts() {
        let mut skew = ClockSkew::new();
        for i in 0..10u64 {
            skew.calculate(PCR_SECOND + i * 40 * PCR_MSECOND, Some(100 * MS + i * 40 * MS), THRESHOLD);
        }
        // PTS 1.5s corresponds to 500ms after the first PCR
        assert_eq!(skew.stream_time(1500 * MS, 0, true), Some(600 * MS));
        assert_eq!(skew.stream_time(1500 * MS, 20 * MS as i64, true), Some(620 * MS));
        // too far from the last PCR
        assert_eq!(skew.stream_time(30_000 * MS, 0, true), None);
        assert!(skew.stream_time(30_000 * MS, 0, false).is_some());
    }
}
