//! Mapping between byte offsets in a stream and stream time, built from the PCR values observed at
//! known offsets.
//!
//! Observations are collected into [`PcrOffsetGroup`](struct.PcrOffsetGroup.html)s: runs of PCR
//! values which increase steadily with offset.  A new group begins wherever the PCR jumps
//! (wraparound, reset or gap) or where observation resumes at an offset not adjacent to an
//! existing group (after a seek, for example).  Each group records its position on a single
//! timeline covering the whole stream in its `pcr_offset`.  For groups that were not observed
//! contiguously with their predecessor this position is estimated from neighbouring bitrates,
//! and re-estimated as more data arrives.
//!
//! All PCR quantities here are in 27MHz ticks.

use crate::time::{self, absdiff, scale, NANOS_PER_SECOND, PCR_MAX_NANOS, PCR_MAX_VALUE, PCR_SECOND};
use bitflags::bitflags;
use log::{debug, trace, warn};
use std::time::Duration;

/// Size of the window of recent observations used to detect bitrate changes
const PCR_BITRATE_NEEDED: usize = 8;

bitflags! {
    /// State of a [`PcrOffsetGroup`](struct.PcrOffsetGroup.html).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GroupFlags: u8 {
        /// The group's `pcr_offset` is a guess based on the bitrate of the preceding group
        const ESTIMATED = 0b0001;
        /// The group was followed directly by another, so will receive no more observations
        const CLOSED = 0b0010;
        /// The PCR wrapped around between this group and the next
        const WRAPOVER = 0b0100;
        /// The PCR was reset between this group and the next
        const RESET = 0b1000;
    }
}

/// A PCR value and the offset at which it was seen, both relative to the first observation of a
/// group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PcrOffset {
    /// ticks since the group's first PCR
    pub pcr: u64,
    /// bytes since the group's first offset
    pub offset: u64,
}

/// A run of observations in which PCR increases steadily with offset.
#[derive(Debug, Clone)]
pub struct PcrOffsetGroup {
    /// The first PCR value observed, as found in the stream
    pub first_pcr: u64,
    /// The stream offset of the first observation
    pub first_offset: u64,
    /// Position of `first_pcr` on the timeline of the whole stream
    pub pcr_offset: u64,
    /// See `GroupFlags`
    pub flags: GroupFlags,
    values: Vec<PcrOffset>,
}

impl PcrOffsetGroup {
    fn new(first_pcr: u64, first_offset: u64, pcr_offset: u64, flags: GroupFlags) -> PcrOffsetGroup {
        PcrOffsetGroup {
            first_pcr,
            first_offset,
            pcr_offset,
            flags,
            values: vec![PcrOffset::default()],
        }
    }

    /// The observations committed to this group so far.  The first entry is always zero.
    pub fn values(&self) -> &[PcrOffset] {
        &self.values
    }

    /// The most recently committed observation
    pub fn last_value(&self) -> PcrOffset {
        self.values[self.values.len() - 1]
    }

    fn append(&mut self, value: PcrOffset) {
        if self.last_value() != value {
            self.values.push(value);
        }
    }
}

/// Thresholds used when splitting observations into groups, and when estimating the position of
/// groups which were not observed contiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHeuristics {
    /// Difference between recent and earlier bitrate, in percent, at which a group commits its
    /// observations so far and starts measuring afresh
    pub bitrate_change_percent: u64,
    /// A PCR wraparound between two groups is assumed if the resulting bitrate is within this
    /// percentage of the earlier group's bitrate
    pub wrap_match_percent: u64,
    /// Within this percentage, the wraparound is taken as certain and the group is no longer
    /// considered estimated
    pub wrap_certain_percent: u64,
    /// Safety margin added after a PCR reset
    pub reset_margin: Duration,
    /// A forward PCR jump larger than this starts a new group
    pub gap_threshold: Duration,
    /// An observation resumes an existing group if its PCR follows the group's last one within
    /// this time
    pub continuation_window: Duration,
    /// Backward PCR steps within a group larger than this share of the PCR range, in permille,
    /// are wraparounds rather than resets
    pub wrap_detect_permille: u64,
    /// The same test, applied between groups while re-estimating their positions
    pub reevaluate_wrap_permille: u64,
}

impl Default for GroupHeuristics {
    fn default() -> GroupHeuristics {
        GroupHeuristics {
            bitrate_change_percent: 10,
            wrap_match_percent: 10,
            wrap_certain_percent: 1,
            reset_margin: Duration::from_millis(100),
            gap_threshold: Duration::from_millis(500),
            continuation_window: Duration::from_millis(100),
            wrap_detect_permille: 990,
            reevaluate_wrap_permille: 900,
        }
    }
}

fn ticks(d: Duration) -> u64 {
    time::nanos_to_pcr(time::duration_to_nanos(d))
}

/// Observations not yet committed to the group being extended.
#[derive(Debug, Clone)]
struct Current {
    group: usize,
    first_pcr: u64,
    first_offset: u64,
    pending: [PcrOffset; PCR_BITRATE_NEEDED],
    first: usize,
    last: usize,
    write: usize,
    last_value: PcrOffset,
    // the start of the run of observations with a consistent bitrate
    prev: PcrOffset,
}

impl Current {
    fn latest(&self) -> PcrOffset {
        self.pending[self.last]
    }
}

enum Placement {
    Covered,
    Resume(usize),
    After(Option<usize>),
}

/// The groups of PCR observations for one PCR PID.  See the module documentation.
#[derive(Debug, Clone, Default)]
pub struct OffsetGroups {
    groups: Vec<PcrOffsetGroup>,
    current: Option<Current>,
    heuristics: GroupHeuristics,
}

impl OffsetGroups {
    /// Creates an empty set of groups using the given thresholds
    pub fn new(heuristics: GroupHeuristics) -> OffsetGroups {
        OffsetGroups {
            groups: vec![],
            current: None,
            heuristics,
        }
    }

    /// The groups, in order of offset
    pub fn groups(&self) -> &[PcrOffsetGroup] {
        &self.groups
    }

    /// true if no observations have been recorded
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The group currently receiving observations, if any
    pub fn current_group(&self) -> Option<&PcrOffsetGroup> {
        self.current.as_ref().map(|c| &self.groups[c.group])
    }

    /// Replace the thresholds used for future observations
    pub fn set_heuristics(&mut self, heuristics: GroupHeuristics) {
        self.heuristics = heuristics;
    }

    fn use_group(&mut self, idx: usize) {
        let group = &self.groups[idx];
        let last = group.last_value();
        let mut pending = [PcrOffset::default(); PCR_BITRATE_NEEDED];
        pending[0] = last;
        self.current = Some(Current {
            group: idx,
            first_pcr: group.first_pcr,
            first_offset: group.first_offset,
            pending,
            first: 0,
            last: 0,
            write: 1,
            last_value: last,
            prev: last,
        });
    }

    /// Commit the latest pending observation to the current group and stop extending it.  The
    /// next observation will search for the group it belongs to.
    pub fn close_current_group(&mut self) {
        if let Some(current) = self.current.take() {
            self.groups[current.group].append(current.latest());
        }
    }

    fn place(&self, pcr: u64, offset: u64) -> Placement {
        let mut prev = None;
        let mut resume = false;
        for (i, group) in self.groups.iter().enumerate() {
            if offset < group.first_offset {
                break;
            }
            let last = group.last_value();
            if offset <= group.first_offset + last.offset {
                return Placement::Covered;
            }
            let follows = pcr
                .checked_sub(group.first_pcr + last.pcr)
                .map(|d| d <= ticks(self.heuristics.continuation_window))
                .unwrap_or(false);
            // only the last group starting at or before the offset may be extended
            resume = follows && !group.flags.contains(GroupFlags::CLOSED);
            prev = Some(i);
        }
        match prev {
            Some(i) if resume => Placement::Resume(i),
            _ => Placement::After(prev),
        }
    }

    /// true if `offset` has reached the start of the group following the current one
    fn reached_next_group(&self, offset: u64) -> bool {
        self.current
            .as_ref()
            .and_then(|c| self.groups.get(c.group + 1))
            .map(|next| offset >= next.first_offset)
            .unwrap_or(false)
    }

    /// Create a group starting with the given observation, following `prev`, and make it current.
    fn set_current_group(&mut self, prev: Option<usize>, pcr: u64, offset: u64, contiguous: bool) {
        let mut flags = GroupFlags::empty();
        let mut pcr_offset = 0;
        match prev {
            Some(p) if contiguous => {
                let h = &self.heuristics;
                let prev = &mut self.groups[p];
                prev.flags |= GroupFlags::CLOSED;
                pcr_offset = prev.pcr_offset;
                let last = prev.last_value();
                let lastpcr = prev.first_pcr + last.pcr;
                if lastpcr > pcr {
                    if lastpcr - pcr > PCR_MAX_VALUE / 1000 * h.wrap_detect_permille {
                        warn!("PCR wraparound detected, diff {}", lastpcr - pcr);
                        pcr_offset += PCR_MAX_VALUE - prev.first_pcr + pcr;
                    } else {
                        warn!("PCR reset detected, diff {}", lastpcr - pcr);
                        pcr_offset += last.pcr + ticks(h.reset_margin);
                    }
                } else if lastpcr + ticks(h.gap_threshold) < pcr {
                    warn!("PCR gap detected, diff {}", pcr - lastpcr);
                    pcr_offset += last.pcr + ticks(h.gap_threshold);
                } else {
                    pcr_offset += pcr - prev.first_pcr;
                }
            }
            Some(_) => flags = GroupFlags::ESTIMATED,
            None => (),
        }
        debug!(
            "new group at offset {} pcr {} pcr_offset {} flags {:?}",
            offset, pcr, pcr_offset, flags
        );
        let idx = self.groups.partition_point(|g| g.first_offset <= offset);
        self.groups
            .insert(idx, PcrOffsetGroup::new(pcr, offset, pcr_offset, flags));
        self.use_group(idx);
        if !contiguous {
            self.reevaluate();
        }
    }

    /// Record that the given PCR was found at the given stream offset.
    pub fn record(&mut self, pcr: u64, offset: u64) {
        if self.reached_next_group(offset) {
            debug!("offset {} reached the next group, closing current group", offset);
            self.close_current_group();
            self.record(pcr, offset);
            return;
        }
        let current = match self.current.as_mut() {
            Some(current) => current,
            None => {
                match self.place(pcr, offset) {
                    Placement::Covered => trace!("offset {} already covered by a group", offset),
                    Placement::Resume(idx) => self.use_group(idx),
                    Placement::After(prev) => self.set_current_group(prev, pcr, offset, false),
                }
                return;
            }
        };
        let latest = current.latest();
        if offset < current.first_offset + latest.offset {
            debug!("offset {} went backwards, closing current group", offset);
            self.close_current_group();
            self.record(pcr, offset);
            return;
        }
        let coroffset = offset - current.first_offset;
        let gap = ticks(self.heuristics.gap_threshold);
        let corpcr = match pcr.checked_sub(current.first_pcr) {
            Some(corpcr) if corpcr >= latest.pcr && corpcr - latest.pcr <= gap => corpcr,
            corpcr => {
                if corpcr.map(|c| c < latest.pcr).unwrap_or(true) {
                    debug!("PCR smaller than previously observed one, closing group");
                } else {
                    debug!("PCR jumped forward, closing group");
                }
                let group = current.group;
                self.groups[group].append(latest);
                self.set_current_group(Some(group), pcr, offset, true);
                return;
            }
        };
        if corpcr == current.last_value.pcr {
            return;
        }
        let value = PcrOffset {
            pcr: corpcr,
            offset: coroffset,
        };
        current.pending[current.write] = value;
        current.last_value = value;
        current.last = (current.last + 1) % PCR_BITRATE_NEEDED;
        current.write = (current.write + 1) % PCR_BITRATE_NEEDED;
        if current.write != current.first {
            return;
        }
        let first = current.pending[current.first];
        if first.pcr.saturating_sub(current.prev.pcr) > PCR_SECOND {
            let cur_bitrate = scale(
                PCR_SECOND,
                value.offset - first.offset,
                value.pcr - first.pcr,
            );
            let prev_bitrate = scale(
                PCR_SECOND,
                first.offset - current.prev.offset,
                first.pcr - current.prev.pcr,
            );
            if absdiff(cur_bitrate, prev_bitrate) * 100
                > prev_bitrate.saturating_mul(self.heuristics.bitrate_change_percent)
            {
                debug!(
                    "bitrate changed from {} to {} bytes/s",
                    prev_bitrate, cur_bitrate
                );
                self.groups[current.group].append(first);
                current.prev = first;
                current.first = current.last;
                current.write = (current.first + 1) % PCR_BITRATE_NEEDED;
                return;
            }
        }
        current.first = (current.first + 1) % PCR_BITRATE_NEEDED;
    }

    /// Re-estimate the `pcr_offset` of every group flagged `ESTIMATED`, from its predecessor.
    pub fn reevaluate(&mut self) {
        let mut prev: Option<usize> = None;
        for i in 0..self.groups.len() {
            if !self.groups[i].flags.contains(GroupFlags::ESTIMATED) {
                prev = Some(i);
                continue;
            }
            let p = match prev {
                Some(p) => p,
                None => {
                    // the first group anchors the timeline
                    let first = &mut self.groups[i];
                    first.pcr_offset = 0;
                    first.flags.remove(GroupFlags::ESTIMATED);
                    return;
                }
            };
            let (prev_group, cur) = (&self.groups[p], &self.groups[i]);
            if cur.first_pcr < prev_group.first_pcr {
                let (prevoffset, prevpcr, prevbr) = match &self.current {
                    Some(c) if c.group == p && c.latest().offset != 0 => {
                        let v = c.latest();
                        (
                            v.offset + prev_group.first_offset,
                            v.pcr + prev_group.first_pcr,
                            scale(PCR_SECOND, v.offset, v.pcr),
                        )
                    }
                    _ => {
                        let v = prev_group.last_value();
                        let prevbr = if v.offset != 0 {
                            scale(PCR_SECOND, v.offset, v.pcr)
                        } else {
                            scale(PCR_SECOND, prev_group.first_offset, prev_group.pcr_offset)
                        };
                        (
                            v.offset + prev_group.first_offset,
                            v.pcr + prev_group.first_pcr,
                            prevbr,
                        )
                    }
                };
                let lastoffset = cur.last_value().offset + cur.first_offset;
                let wrapped = prevpcr
                    .checked_sub(cur.first_pcr)
                    .map(|d| d > PCR_MAX_VALUE / 1000 * self.heuristics.reevaluate_wrap_permille)
                    .unwrap_or(false);
                if wrapped {
                    let guess = PCR_MAX_VALUE - prev_group.first_pcr + cur.first_pcr;
                    let lastbr = scale(
                        PCR_SECOND,
                        lastoffset.saturating_sub(prevoffset),
                        (guess + cur.last_value().pcr).saturating_sub(prevpcr - prev_group.first_pcr),
                    );
                    let matched = if prevbr == 0 || prevbr == u64::MAX {
                        None
                    } else {
                        Some(absdiff(prevbr, lastbr) as f64 * 100.0 / prevbr as f64)
                    };
                    debug!(
                        "group {} wraparound guess {}, bitrate {} vs {} ({:?}%)",
                        i, guess, lastbr, prevbr, matched
                    );
                    if let Some(diff) = matched {
                        if diff < self.heuristics.wrap_match_percent as f64 {
                            let certain = diff < self.heuristics.wrap_certain_percent as f64;
                            let cur = &mut self.groups[i];
                            cur.pcr_offset = guess;
                            if certain {
                                cur.flags.remove(GroupFlags::ESTIMATED);
                            }
                        }
                    }
                    self.groups[p].flags.insert(GroupFlags::WRAPOVER);
                } else {
                    let distance = match cur.first_offset.checked_sub(prev_group.first_offset) {
                        Some(d) => d,
                        None => {
                            warn!("group {} starts before its predecessor, not re-estimating", i);
                            prev = Some(i);
                            continue;
                        }
                    };
                    let resetprev = if prevbr == 0 || prevbr == u64::MAX {
                        0
                    } else {
                        scale(PCR_SECOND, distance, prevbr)
                    };
                    let pcr_offset = prev_group.pcr_offset
                        + resetprev
                        + ticks(self.heuristics.reset_margin);
                    debug!("group {} after reset, pcr_offset {}", i, pcr_offset);
                    self.groups[i].pcr_offset = pcr_offset;
                    self.groups[p].flags.insert(GroupFlags::RESET);
                }
            } else {
                let pcr_offset = prev_group.pcr_offset + cur.first_pcr - prev_group.first_pcr;
                self.groups[i].pcr_offset = pcr_offset;
                self.groups[p]
                    .flags
                    .remove(GroupFlags::RESET | GroupFlags::WRAPOVER);
            }
            prev = Some(i);
        }
    }

    /// Moves every group along the timeline so that the first begins at `time` (nanoseconds).
    /// Has no effect unless a group is currently receiving observations.
    pub fn set_current_pcr_offset(&mut self, time: u64) {
        if self.current.is_none() {
            return;
        }
        let pcr_offset = time::nanos_to_pcr(time);
        let delta = pcr_offset as i64 - self.groups[0].pcr_offset as i64;
        if delta == 0 {
            return;
        }
        debug!("shifting groups by {} ticks", delta);
        for group in &mut self.groups {
            group.pcr_offset = group.pcr_offset.wrapping_add_signed(delta);
        }
    }

    /// (offset, timeline position) pairs of every observation, ordered by offset.
    fn anchors(&self) -> Vec<(i128, i128)> {
        let mut anchors: Vec<(i128, i128)> = vec![];
        for (i, group) in self.groups.iter().enumerate() {
            let pending = self
                .current
                .as_ref()
                .filter(|c| c.group == i)
                .map(|c| c.latest());
            for v in group.values.iter().chain(pending.iter()) {
                let anchor = (
                    i128::from(group.first_offset + v.offset),
                    i128::from(group.pcr_offset + v.pcr),
                );
                match anchors.last() {
                    Some(last) if last.0 == anchor.0 => (),
                    _ => anchors.push(anchor),
                }
            }
        }
        anchors
    }

    /// Position on the timeline, in ticks, of the given stream offset.
    fn offset_to_pcr(anchors: &[(i128, i128)], offset: i128) -> Option<i128> {
        interpolate(anchors, offset)
    }

    /// Stream time, in nanoseconds, of the given offset, relative to the stream time of
    /// `refoffset`.  Needs at least two observations.
    pub fn offset_to_time(&mut self, offset: u64, refoffset: u64) -> Option<u64> {
        self.reevaluate();
        let anchors = self.anchors();
        if anchors.len() < 2 {
            return None;
        }
        let pcr = Self::offset_to_pcr(&anchors, i128::from(offset))?
            - Self::offset_to_pcr(&anchors, i128::from(refoffset))?;
        let pcr = u64::try_from(pcr.max(0)).unwrap_or(u64::MAX);
        Some(time::pcr_to_nanos(pcr))
    }

    /// Stream offset at which the given stream time (nanoseconds) is reached.  If `refoffset` is
    /// given, `time` is relative to the stream time at that offset, making this the inverse of
    /// `offset_to_time()`.  Otherwise `time` is an absolute position on the groups' timeline.
    pub fn time_to_offset(&mut self, time: u64, refoffset: Option<u64>) -> Option<u64> {
        self.reevaluate();
        let anchors = self.anchors();
        match anchors.len() {
            0 => return None,
            1 => return u64::try_from(anchors[0].0).ok(),
            _ => (),
        }
        let shift = match refoffset {
            Some(r) => Self::offset_to_pcr(&anchors, i128::from(r))?,
            None => 0,
        };
        let query = i128::from(time::nanos_to_pcr(time)) + shift;
        let inverse: Vec<(i128, i128)> = anchors.iter().map(|&(o, p)| (p, o)).collect();
        let offset = interpolate(&inverse, query)?;
        u64::try_from(offset.max(0)).ok()
    }

    /// The group which should be used to interpret timestamps found at the given offset.
    fn group_for_offset(&self, offset: u64) -> Option<&PcrOffsetGroup> {
        let mut found = None;
        for group in &self.groups {
            if group.first_offset > offset {
                break;
            }
            found = Some(group);
            if group.first_offset + group.last_value().offset > offset {
                break;
            }
        }
        // the timeline position of groups before a reset is not reliable
        found.filter(|g| !g.flags.contains(GroupFlags::RESET))
    }

    /// Maps a timestamp (nanoseconds) found at stream offset `offset` to stream time, using the
    /// current group, or else the group containing the offset.
    pub fn pts_to_stream_time(&self, pts: u64, offset: u64) -> Option<u64> {
        let group = match self.current_group() {
            Some(group) => group,
            None => self.group_for_offset(offset)?,
        };
        let first = time::pcr_to_nanos(group.first_pcr);
        let mut pts = pts;
        if pts < first {
            // only a timestamp well before the group is taken to have wrapped
            if first - pts > NANOS_PER_SECOND {
                pts += PCR_MAX_NANOS;
            } else {
                return None;
            }
        }
        Some(pts - first + time::pcr_to_nanos(group.pcr_offset))
    }
}

/// Piecewise-linear interpolation of `x` over `points`, extrapolating from the end segments.
fn interpolate(points: &[(i128, i128)], x: i128) -> Option<i128> {
    if points.len() < 2 {
        return None;
    }
    let seg = points
        .windows(2)
        .position(|w| w[0].0 <= x && x <= w[1].0)
        .unwrap_or(if x < points[0].0 { 0 } else { points.len() - 2 });
    let (a, b) = (points[seg], points[seg + 1]);
    if a.0 == b.0 {
        return Some(a.1);
    }
    Some(a.1 + (x - a.0) * (b.1 - a.1) / (b.0 - a.0))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::PCR_MSECOND;

    const BYTES_PER_SECOND: u64 = 1_000_000;
    const MS: u64 = 1_000_000;

    /// Record `count` observations 40ms apart at `BYTES_PER_SECOND`
    fn feed(groups: &mut OffsetGroups, pcr: u64, offset: u64, count: u64) {
        for i in 0..count {
            groups.record(
                (pcr + i * 40 * PCR_MSECOND) % (PCR_MAX_VALUE + 1),
                offset + i * 40 * BYTES_PER_SECOND / 1000,
            );
        }
    }

    fn first_offsets(groups: &OffsetGroups) -> Vec<u64> {
        groups.groups().iter().map(|g| g.first_offset).collect()
    }

    #[test]
    fn steady_stream_single_group() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 0, 0, 100);
        assert_eq!(groups.groups().len(), 1);
        assert_eq!(groups.current_group().map(|g| g.flags), Some(GroupFlags::empty()));
        assert_eq!(groups.offset_to_time(400_000, 0), Some(400 * MS));
        assert_eq!(groups.time_to_offset(400 * MS, None), Some(400_000));
        groups.close_current_group();
        let values = groups.groups()[0].values();
        assert_eq!(values.last(), Some(&PcrOffset { pcr: 99 * 40 * PCR_MSECOND, offset: 3_960_000 }));
    }

    #[test]
    fn offset_time_inverse() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 12_345 * PCR_SECOND, 1000, 50);
        // bitrate doubles
        feed(&mut groups, 12_345 * PCR_SECOND + 2000 * PCR_MSECOND, 1000 + 2_000_000, 1);
        for i in 1..50u64 {
            groups.record(
                12_345 * PCR_SECOND + (2000 + i * 40) * PCR_MSECOND,
                1000 + 2_000_000 + i * 80_000,
            );
        }
        assert_eq!(groups.groups().len(), 1);
        assert!(groups.groups()[0].values().len() > 1);
        for x in [1000u64, 77_777, 1_999_999, 2_500_000, 5_800_000] {
            let t = groups.offset_to_time(x, 1000).unwrap();
            let back = groups.time_to_offset(t, Some(1000)).unwrap();
            assert!(absdiff(back, x) <= 2, "{} -> {}ns -> {}", x, t, back);
        }
        // exact away from the change of bitrate
        assert_eq!(groups.offset_to_time(1000 + 1_000_000, 1000), Some(1000 * MS));
        assert_eq!(groups.offset_to_time(1000 + 2_000_000 + 2_400_000, 1000), Some(3200 * MS));
    }

    #[test]
    fn gap_starts_contiguous_group() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 0, 0, 10);
        groups.record(2 * PCR_SECOND, 400_000);
        let g = groups.groups();
        assert_eq!(g.len(), 2);
        assert!(g[0].flags.contains(GroupFlags::CLOSED));
        assert_eq!(g[1].pcr_offset, 360 * PCR_MSECOND + 500 * PCR_MSECOND);
        assert_eq!(g[1].flags, GroupFlags::empty());
    }

    #[test]
    fn wraparound_within_stream() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, PCR_MAX_VALUE + 1 - 200 * PCR_MSECOND, 0, 10);
        let g = groups.groups();
        assert_eq!(g.len(), 2);
        assert_eq!(g[1].first_pcr, 0);
        assert_eq!(g[1].pcr_offset, 200 * PCR_MSECOND - 1);
    }

    #[test]
    fn reset_within_stream() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 10 * PCR_SECOND, 0, 10);
        groups.record(PCR_SECOND, 400_000);
        let g = groups.groups();
        assert_eq!(g.len(), 2);
        assert_eq!(g[1].pcr_offset, 360 * PCR_MSECOND + 100 * PCR_MSECOND);
    }

    #[test]
    fn resume_and_covered() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 0, 0, 10);
        groups.close_current_group();
        // inside the known range: ignored
        groups.record(100 * PCR_MSECOND, 100_000);
        assert!(groups.current_group().is_none());
        // just after: resumes the group
        groups.record(400 * PCR_MSECOND, 400_000);
        assert_eq!(groups.groups().len(), 1);
        assert!(groups.current_group().is_some());
    }

    #[test]
    fn seek_forward_estimates_position() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 10 * PCR_SECOND, 0, 50);
        groups.close_current_group();
        feed(&mut groups, 30 * PCR_SECOND, 20_000_000, 5);
        let g = groups.groups();
        assert_eq!(g.len(), 2);
        assert!(g[1].flags.contains(GroupFlags::ESTIMATED));
        assert_eq!(g[1].pcr_offset, 20 * PCR_SECOND);
    }

    #[test]
    fn seek_across_wraparound() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, PCR_MAX_VALUE - 10 * PCR_SECOND, 0, 50);
        groups.close_current_group();
        groups.record(5 * PCR_SECOND, 15_000_000);
        let g = groups.groups();
        assert_eq!(g.len(), 2);
        assert_eq!(g[1].pcr_offset, 15 * PCR_SECOND);
        assert!(!g[1].flags.contains(GroupFlags::ESTIMATED));
        assert!(g[0].flags.contains(GroupFlags::WRAPOVER));
    }

    #[test]
    fn seek_across_reset() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 100 * PCR_SECOND, 0, 50);
        groups.close_current_group();
        groups.record(PCR_SECOND, 5_000_000);
        let g = groups.groups();
        assert_eq!(g.len(), 2);
        assert_eq!(g[1].pcr_offset, 5 * PCR_SECOND + 100 * PCR_MSECOND);
        assert!(g[0].flags.contains(GroupFlags::RESET));
        // timestamps found before the reset can no longer be placed on the timeline
        groups.close_current_group();
        assert_eq!(groups.pts_to_stream_time(100_500 * MS, 500_000), None);
        assert_eq!(groups.pts_to_stream_time(1_100 * MS, 5_100_000), Some(5_200 * MS));
    }

    #[test]
    fn shift_timeline() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 0, 0, 10);
        groups.record(2 * PCR_SECOND, 400_000);
        groups.set_current_pcr_offset(10 * NANOS_PER_SECOND);
        let g = groups.groups();
        assert_eq!(g[0].pcr_offset, 10 * PCR_SECOND);
        assert_eq!(g[1].pcr_offset, 10 * PCR_SECOND + 860 * PCR_MSECOND);
    }

    #[test]
    fn pts_in_current_group() {
        let mut groups = OffsetGroups::default();
        assert_eq!(groups.pts_to_stream_time(0, 0), None);
        feed(&mut groups, 10 * PCR_SECOND, 0, 10);
        assert_eq!(groups.pts_to_stream_time(10_500 * MS, 0), Some(500 * MS));
        // just before the group: not available
        assert_eq!(groups.pts_to_stream_time(9_500 * MS, 0), None);
        // long before: assumed to have wrapped
        assert_eq!(
            groups.pts_to_stream_time(MS, 0),
            Some(MS + PCR_MAX_NANOS - 10 * NANOS_PER_SECOND)
        );
    }

    #[test]
    fn resume_past_estimated_group() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 10 * PCR_SECOND, 0, 10);
        groups.close_current_group();
        feed(&mut groups, 30 * PCR_SECOND, 1_000_000, 3);
        groups.close_current_group();
        // back to where the first group ended, then play on past the second group's start
        groups.record(10 * PCR_SECOND + 400 * PCR_MSECOND, 400_000);
        assert_eq!(groups.current_group().map(|g| g.first_offset), Some(0));
        feed(&mut groups, 10 * PCR_SECOND + 440 * PCR_MSECOND, 440_000, 20);
        assert_eq!(groups.groups()[0].last_value().offset, 960_000);
        // PCR gap
        groups.record(40 * PCR_SECOND, 1_240_000);
        assert_eq!(first_offsets(&groups), vec![0, 1_000_000, 1_120_000, 1_240_000]);
        assert_eq!(groups.offset_to_time(1_100_000, 0), Some(20_150 * MS));
        assert_eq!(first_offsets(&groups), vec![0, 1_000_000, 1_120_000, 1_240_000]);
    }

    #[test]
    fn seek_back_before_first_group() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, 10 * PCR_SECOND, 1_000_000, 10);
        groups.close_current_group();
        // from the start of the stream, running into the known group and beyond its end
        feed(&mut groups, 9 * PCR_SECOND, 0, 36);
        assert_eq!(first_offsets(&groups), vec![0, 1_000_000]);
        assert_eq!(groups.groups()[0].last_value().offset, 960_000);
        assert_eq!(groups.current_group().map(|g| g.first_offset), Some(1_000_000));
        feed(&mut groups, 10 * PCR_SECOND + 440 * PCR_MSECOND, 1_440_000, 5);
        groups.close_current_group();
        assert_eq!(first_offsets(&groups), vec![0, 1_000_000]);
        assert_eq!(groups.groups()[1].last_value().offset, 600_000);
    }

    #[test]
    fn wraparound_in_resumed_group() {
        let mut groups = OffsetGroups::default();
        feed(&mut groups, PCR_MAX_VALUE + 1 - 400 * PCR_MSECOND, 0, 5);
        groups.close_current_group();
        feed(&mut groups, 50 * PCR_SECOND, 2_000_000, 3);
        groups.close_current_group();
        // resumes the first group, which then wraps
        feed(&mut groups, PCR_MAX_VALUE + 1 - 200 * PCR_MSECOND, 200_000, 10);
        assert_eq!(first_offsets(&groups), vec![0, 400_000, 2_000_000]);
        let g = groups.groups();
        assert!(g[0].flags.contains(GroupFlags::CLOSED));
        assert_eq!(g[1].first_pcr, 0);
        assert_eq!(g[1].pcr_offset, 400 * PCR_MSECOND - 1);
        let t = groups.offset_to_time(2_000_000, 0).unwrap();
        assert!(t > 50 * NANOS_PER_SECOND, "{}", t);
        assert_eq!(first_offsets(&groups), vec![0, 400_000, 2_000_000]);
    }
}
