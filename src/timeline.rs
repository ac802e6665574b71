//! Stream timing recovered from PCRs, shared between the thread processing packets and any
//! threads querying it.
//!
//! Each PID carrying PCR values gets its own observation state: a [`ClockSkew`](../skew/struct.ClockSkew.html)
//! estimator and a set of [`OffsetGroups`](../offset/struct.OffsetGroups.html).  All of it sits
//! behind a single lock, so that (for instance) a seek handler can map times to byte offsets
//! while packets are still being processed.

use crate::offset::{GroupHeuristics, OffsetGroups};
use crate::packet::{ClockRef, Pid};
use crate::packetizer::PacketizerConfig;
use crate::pid_table::PidTable;
use crate::skew::ClockSkew;
use crate::time::{self, duration_to_nanos};
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

struct PcrObservation {
    skew: ClockSkew,
    groups: OffsetGroups,
    // nanoseconds, without any wraparound correction
    last_pcrtime: Option<u64>,
}

impl PcrObservation {
    fn new(heuristics: &GroupHeuristics) -> PcrObservation {
        PcrObservation {
            skew: ClockSkew::new(),
            groups: OffsetGroups::new(heuristics.clone()),
            last_pcrtime: None,
        }
    }
}

struct TimelineState {
    calculate_skew: bool,
    calculate_offset: bool,
    refoffset: Option<u64>,
    pcr_discont_threshold: u64,
    extra_shift: i64,
    pid_extra_shift: PidTable<i64>,
    heuristics: GroupHeuristics,
    last_in_time: Option<u64>,
    observations: PidTable<PcrObservation>,
}

fn shift_nanos(d: Duration) -> i64 {
    i64::try_from(duration_to_nanos(d)).unwrap_or(i64::MAX)
}

impl TimelineState {
    fn observation(&mut self, pid: Pid) -> &mut PcrObservation {
        let heuristics = &self.heuristics;
        self.observations
            .get_or_insert_with(pid, || PcrObservation::new(heuristics))
    }

    fn shift_for(&self, pid: Pid) -> i64 {
        self.pid_extra_shift
            .get(pid)
            .copied()
            .unwrap_or(self.extra_shift)
    }

    fn pts_to_stream_time(
        &mut self,
        pts: u64,
        pcr_pid: Pid,
        read_offset: u64,
        check_diff: bool,
    ) -> Option<u64> {
        let shift = self.shift_for(pcr_pid);
        let last_in_time = self.last_in_time;
        let (calculate_skew, calculate_offset) = (self.calculate_skew, self.calculate_offset);
        let obs = self.observation(pcr_pid);
        if pcr_pid == Pid::NULL {
            // no PCR in this stream; the timestamps themselves anchor the timeline
            if let Some(t) = last_in_time {
                obs.skew.anchor_if_unset(t, pts);
            }
        }
        let res = if calculate_skew && obs.skew.base_time().is_some() {
            obs.skew
                .stream_time(pts, shift, check_diff && pcr_pid != Pid::NULL)
        } else if calculate_offset && !obs.groups.is_empty() {
            obs.groups.pts_to_stream_time(pts, read_offset)
        } else {
            debug!("not enough information to convert timestamp for {:?}", pcr_pid);
            None
        };
        trace!("pts {} for {:?} -> {:?}", pts, pcr_pid, res);
        res
    }
}

/// Timing information for every PCR PID of a stream, behind a single lock.
///
/// A `Timeline` is owned by a [`Packetizer`](../packetizer/struct.Packetizer.html), which feeds it
/// PCR values, and may be shared (it is `Sync`) with code that only needs to make queries.
pub struct Timeline {
    state: Mutex<TimelineState>,
    read_offset: AtomicU64,
}

impl Timeline {
    /// Create a timeline with no observations, configured per the given settings.
    pub fn new(config: &PacketizerConfig) -> Timeline {
        Timeline {
            state: Mutex::new(TimelineState {
                calculate_skew: config.calculate_skew,
                calculate_offset: config.calculate_offset,
                refoffset: None,
                pcr_discont_threshold: duration_to_nanos(config.pcr_discont_threshold),
                extra_shift: shift_nanos(config.extra_shift),
                pid_extra_shift: PidTable::default(),
                heuristics: config.heuristics.clone(),
                last_in_time: None,
                observations: PidTable::default(),
            }),
            read_offset: AtomicU64::new(0),
        }
    }

    /// Turn clock-skew estimation on or off for PCRs seen from now on.
    pub fn set_calculate_skew(&self, enabled: bool) {
        self.state.lock().calculate_skew = enabled;
    }

    /// Turn tracking of PCR / byte-offset correspondence on or off for PCRs seen from now on.
    pub fn set_calculate_offset(&self, enabled: bool) {
        self.state.lock().calculate_offset = enabled;
    }

    /// Sets the stream offset which `offset_to_time()` treats as time zero.
    pub fn set_reference_offset(&self, offset: u64) {
        debug!("reference offset {}", offset);
        self.state.lock().refoffset = Some(offset);
    }

    /// Sets the largest jump in observed clock skew which is tolerated without starting the
    /// estimate again.
    pub fn set_pcr_discont_threshold(&self, threshold: Duration) {
        self.state.lock().pcr_discont_threshold = duration_to_nanos(threshold);
    }

    /// Sets an amount added to every timestamp converted while clock skew is being estimated.
    pub fn set_extra_shift(&self, shift: Duration) {
        self.state.lock().extra_shift = shift_nanos(shift);
    }

    /// Overrides `set_extra_shift()` for timestamps converted against the given PCR PID.
    pub fn set_pid_extra_shift(&self, pcr_pid: Pid, shift: Duration) {
        self.state
            .lock()
            .pid_extra_shift
            .insert(pcr_pid, shift_nanos(shift));
    }

    /// Replaces the thresholds used to group PCR observations, for existing and future PIDs.
    pub fn set_heuristics(&self, heuristics: GroupHeuristics) {
        let mut state = self.state.lock();
        for (_, obs) in state.observations.iter_mut() {
            obs.groups.set_heuristics(heuristics.clone());
        }
        state.heuristics = heuristics;
    }

    /// true if clock-skew estimation is enabled
    pub fn calculate_skew(&self) -> bool {
        self.state.lock().calculate_skew
    }

    /// true if offset tracking is enabled
    pub fn calculate_offset(&self) -> bool {
        self.state.lock().calculate_offset
    }

    pub(crate) fn set_arrival_time(&self, time: Duration) {
        self.state.lock().last_in_time = Some(duration_to_nanos(time));
    }

    pub(crate) fn set_read_offset(&self, offset: u64) {
        self.read_offset.store(offset, Ordering::Relaxed);
    }

    /// Stream offset of the next byte to be processed.
    pub fn read_offset(&self) -> u64 {
        self.read_offset.load(Ordering::Relaxed)
    }

    /// Record a PCR value found on the given PID in the packet starting at stream offset
    /// `offset`, returning the smoothed output time assigned to it by the clock-skew estimator
    /// (if that is enabled and an arrival time is known).
    pub fn observe(&self, pid: Pid, pcr: ClockRef, offset: u64) -> Option<Duration> {
        let mut state = self.state.lock();
        if !state.calculate_skew && !state.calculate_offset {
            return None;
        }
        let ticks = u64::from(pcr);
        let last_in_time = state.last_in_time;
        let threshold = state.pcr_discont_threshold;
        let (calculate_skew, calculate_offset) = (state.calculate_skew, state.calculate_offset);
        let obs = state.observation(pid);
        let mut out = None;
        if calculate_skew {
            if let Some(t) = last_in_time {
                out = obs.skew.calculate(ticks, Some(t), threshold);
            }
        }
        if calculate_offset {
            obs.groups.record(ticks, offset);
        }
        obs.last_pcrtime = Some(time::pcr_to_nanos(ticks));
        out.map(Duration::from_nanos)
    }

    /// Stream time of the most recent PCR seen on the given PID.
    pub fn current_time(&self, pcr_pid: Pid) -> Option<Duration> {
        let mut state = self.state.lock();
        let last = state.observations.get(pcr_pid)?.last_pcrtime?;
        state
            .pts_to_stream_time(last, pcr_pid, self.read_offset(), true)
            .map(Duration::from_nanos)
    }

    /// Stream time at the given byte offset, relative to the reference offset.
    ///
    /// Needs offset tracking to be enabled, a reference offset no greater than `offset`, and at
    /// least two PCR observations on the PID.
    pub fn offset_to_time(&self, offset: u64, pcr_pid: Pid) -> Option<Duration> {
        let mut state = self.state.lock();
        if !state.calculate_offset {
            return None;
        }
        let refoffset = state.refoffset.filter(|&r| offset >= r)?;
        state
            .observations
            .get_mut(pcr_pid)?
            .groups
            .offset_to_time(offset, refoffset)
            .map(Duration::from_nanos)
    }

    /// The byte offset at which the given stream time is reached.
    ///
    /// This is the inverse of `offset_to_time()`: once a reference offset has been set,
    /// `time` is measured from the stream time at that offset, not from the start of the PCR
    /// timeline.  So `time_to_offset(offset_to_time(x)?)` gives back `x`, give or take rounding.
    /// Without a reference offset, `time` is a position on the PCR timeline itself.
    pub fn time_to_offset(&self, time: Duration, pcr_pid: Pid) -> Option<u64> {
        let mut state = self.state.lock();
        if !state.calculate_offset {
            return None;
        }
        let refoffset = state.refoffset;
        state
            .observations
            .get_mut(pcr_pid)?
            .groups
            .time_to_offset(duration_to_nanos(time), refoffset)
    }

    /// Maps a presentation timestamp (already converted from 90kHz units, and unwrapped) of a
    /// stream timed by the given PCR PID to stream time.
    ///
    /// Timestamps more than 15 seconds away from the last PCR are rejected while clock skew is
    /// being estimated.  Use [`Pid::NULL`](../packet/struct.Pid.html#associatedconstant.NULL)
    /// for programs with no PCR.
    pub fn pts_to_stream_time(&self, pts: Duration, pcr_pid: Pid) -> Option<Duration> {
        self.state
            .lock()
            .pts_to_stream_time(duration_to_nanos(pts), pcr_pid, self.read_offset(), true)
            .map(Duration::from_nanos)
    }

    /// As `pts_to_stream_time()`, but without the check against the last PCR.
    pub fn pts_to_stream_time_unchecked(&self, pts: Duration, pcr_pid: Pid) -> Option<Duration> {
        self.state
            .lock()
            .pts_to_stream_time(duration_to_nanos(pts), pcr_pid, self.read_offset(), false)
            .map(Duration::from_nanos)
    }

    /// Moves the offset timeline of the given PID so that it begins at `time`.
    pub fn set_current_pcr_offset(&self, time: Duration, pcr_pid: Pid) {
        let mut state = self.state.lock();
        if let Some(obs) = state.observations.get_mut(pcr_pid) {
            obs.groups.set_current_pcr_offset(duration_to_nanos(time));
        }
    }

    /// Current clock skew estimate for the given PID, in nanoseconds, and whether the estimator
    /// is still filling its window.
    pub fn skew(&self, pcr_pid: Pid) -> Option<(i64, bool)> {
        let state = self.state.lock();
        let obs = state.observations.get(pcr_pid)?;
        Some((obs.skew.skew(), obs.skew.is_filling()))
    }

    /// Number of PCR-offset groups recorded for the given PID.
    pub fn group_count(&self, pcr_pid: Pid) -> usize {
        self.state
            .lock()
            .observations
            .get(pcr_pid)
            .map(|obs| obs.groups.groups().len())
            .unwrap_or(0)
    }

    pub(crate) fn flush(&self, hard: bool) {
        let mut state = self.state.lock();
        state.last_in_time = None;
        if let Some(obs) = state.observations.get_mut(Pid::NULL) {
            obs.skew.forget_base_time();
        }
        for (_, obs) in state.observations.iter_mut() {
            obs.groups.close_current_group();
            obs.skew.restart_window();
        }
        if hard {
            debug!("dropping all PCR observations");
            state.observations.clear();
        }
        self.read_offset.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::{PCR_MAX_VALUE, PCR_MSECOND, PCR_SECOND};

    const PCR_PID: Pid = Pid::new(0x100);

    fn timeline(skew: bool, offset: bool) -> Timeline {
        let config = PacketizerConfig::default()
            .with_calculate_skew(skew)
            .with_calculate_offset(offset);
        Timeline::new(&config)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn ten_steady_samples() {
        let timeline = timeline(true, false);
        for i in 0..10 {
            timeline.set_arrival_time(ms(i * 40));
            timeline.observe(PCR_PID, ClockRef::from_ticks(i * 40 * PCR_MSECOND), i * 188);
        }
        let now = timeline.current_time(PCR_PID).unwrap();
        assert!(now >= ms(359) && now <= ms(361), "{:?}", now);
        assert_eq!(timeline.skew(PCR_PID), Some((0, true)));
    }

    #[test]
    fn nothing_enabled() {
        let timeline = timeline(false, false);
        timeline.set_arrival_time(ms(0));
        assert_eq!(timeline.observe(PCR_PID, ClockRef::from_ticks(0), 0), None);
        assert_eq!(timeline.current_time(PCR_PID), None);
        assert_eq!(timeline.pts_to_stream_time(ms(1), PCR_PID), None);
    }

    #[test]
    fn wraparound_continuity() {
        let timeline = timeline(true, false);
        let start = PCR_MAX_VALUE + 1 - 400 * PCR_MSECOND;
        let mut prev: Option<Duration> = None;
        for i in 0..20 {
            timeline.set_arrival_time(ms(1000 + i * 40));
            let pcr = (start + i * 40 * PCR_MSECOND) % (PCR_MAX_VALUE + 1);
            timeline.observe(PCR_PID, ClockRef::from_ticks(pcr), 0);
            let now = timeline.current_time(PCR_PID).unwrap();
            if let Some(prev) = prev {
                let step = now - prev;
                assert!(step >= ms(39) && step <= ms(41), "step {:?} at {}", step, i);
            }
            prev = Some(now);
        }
    }

    #[test]
    fn pts_checked_against_last_pcr() {
        let timeline = timeline(true, false);
        for i in 0..10 {
            timeline.set_arrival_time(ms(500 + i * 40));
            timeline.observe(PCR_PID, ClockRef::from_ticks((100 + i * 40) * PCR_MSECOND), 0);
        }
        // arrival time 500ms corresponds to PCR time 100ms
        assert_eq!(timeline.pts_to_stream_time(ms(300), PCR_PID), Some(ms(700)));
        assert_eq!(timeline.pts_to_stream_time(ms(20_000), PCR_PID), None);
        assert_eq!(timeline.pts_to_stream_time_unchecked(ms(20_000), PCR_PID), Some(ms(20_400)));

        timeline.set_pid_extra_shift(PCR_PID, ms(50));
        assert_eq!(timeline.pts_to_stream_time(ms(300), PCR_PID), Some(ms(750)));
    }

    #[test]
    fn pts_without_pcr() {
        let timeline = timeline(true, false);
        assert_eq!(timeline.pts_to_stream_time(ms(10_000), Pid::NULL), None);
        timeline.set_arrival_time(ms(2000));
        assert_eq!(timeline.pts_to_stream_time(ms(10_000), Pid::NULL), Some(ms(2000)));
        assert_eq!(timeline.pts_to_stream_time(ms(10_040), Pid::NULL), Some(ms(2040)));
        // far from the base, but there is no PCR to compare against
        assert_eq!(timeline.pts_to_stream_time(ms(40_000), Pid::NULL), Some(ms(32_000)));
        timeline.flush(false);
        timeline.set_arrival_time(ms(9000));
        assert_eq!(timeline.pts_to_stream_time(ms(50_000), Pid::NULL), Some(ms(9000)));
    }

    fn feed_offsets(timeline: &Timeline, start_pcr: u64, start_offset: u64, count: u64) {
        for i in 0..count {
            // 1MB/s
            timeline.observe(
                PCR_PID,
                ClockRef::from_ticks(start_pcr + i * 40 * PCR_MSECOND),
                start_offset + i * 40_000,
            );
        }
    }

    #[test]
    fn offset_queries() {
        let timeline = timeline(false, true);
        feed_offsets(&timeline, 3 * PCR_SECOND, 0, 50);
        // no reference yet: times are positions on the PCR timeline
        assert_eq!(timeline.offset_to_time(500_000, PCR_PID), None);
        assert_eq!(timeline.time_to_offset(ms(500), PCR_PID), Some(500_000));
        timeline.set_reference_offset(100_000);
        assert_eq!(timeline.offset_to_time(50_000, PCR_PID), None);
        assert_eq!(timeline.offset_to_time(600_000, PCR_PID), Some(ms(500)));
        let offset = timeline.time_to_offset(ms(500), PCR_PID).unwrap();
        assert!(offset.abs_diff(600_000) <= 1, "{}", offset);
        assert_eq!(timeline.pts_to_stream_time(ms(3500), PCR_PID), Some(ms(500)));
        assert_eq!(timeline.group_count(PCR_PID), 1);
    }

    #[test]
    fn offset_timeline_rebased() {
        let timeline = timeline(false, true);
        feed_offsets(&timeline, 3 * PCR_SECOND, 0, 10);
        timeline.set_current_pcr_offset(Duration::from_secs(60), PCR_PID);
        assert_eq!(timeline.pts_to_stream_time(ms(3100), PCR_PID), Some(ms(60_100)));
    }

    #[test]
    fn flush_keeps_groups_unless_hard() {
        let timeline = timeline(true, true);
        timeline.set_arrival_time(ms(0));
        feed_offsets(&timeline, 0, 0, 10);
        timeline.flush(false);
        assert_eq!(timeline.group_count(PCR_PID), 1);
        assert_eq!(timeline.skew(PCR_PID).map(|(_, filling)| filling), Some(true));
        timeline.flush(true);
        assert_eq!(timeline.group_count(PCR_PID), 0);
        assert_eq!(timeline.current_time(PCR_PID), None);
    }

    #[test]
    fn query_from_another_thread() {
        let timeline = timeline(false, true);
        timeline.set_reference_offset(0);
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..100 {
                    let _ = timeline.offset_to_time(100_000, PCR_PID);
                    let _ = timeline.time_to_offset(ms(100), PCR_PID);
                }
            });
            feed_offsets(&timeline, 0, 0, 100);
        });
        assert_eq!(timeline.offset_to_time(400_000, PCR_PID), Some(ms(400)));
    }
}
