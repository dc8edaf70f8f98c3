//! C1: Audio Timeline.
//!
//! Monotonic accounting of user audio vs. injected silence, and the
//! projection from vendor-relative timestamps to absolute stream offsets.
//! See `spec.md` §3 (AudioTimeline) and §4.1.

/// One interval recorded on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalKind {
    User,
    Silence,
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    kind: IntervalKind,
    duration_ms: u64,
    /// Cumulative *user* audio duration at the end of this interval.
    user_total_after_ms: u64,
}

/// Ordered record of user/silence intervals, robust across resets.
///
/// `audio_before(t)` answers "how much user audio had the vendor received
/// by the time its own clock reached `t`", which is what lets results
/// reported against a vendor-relative clock be projected onto the
/// session's continuous wall-clock timeline.
#[derive(Debug, Default)]
pub struct AudioTimeline {
    intervals: Vec<Interval>,
    total_user_ms: u64,
    /// Vendor-clock position at the end of the last interval (sum of all
    /// interval durations, user + silence).
    vendor_clock_ms: u64,
}

impl AudioTimeline {
    /// Creates a fresh, empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `ms` of user audio at the current vendor-clock position.
    pub fn add_user(&mut self, ms: u64) {
        self.vendor_clock_ms += ms;
        self.total_user_ms += ms;
        self.intervals.push(Interval {
            kind: IntervalKind::User,
            duration_ms: ms,
            user_total_after_ms: self.total_user_ms,
        });
    }

    /// Records `ms` of injected silence (e.g. a finalize mute package) at
    /// the current vendor-clock position. Does not count toward
    /// `total_user_ms`.
    pub fn add_silence(&mut self, ms: u64) {
        self.vendor_clock_ms += ms;
        self.intervals.push(Interval {
            kind: IntervalKind::Silence,
            duration_ms: ms,
            user_total_after_ms: self.total_user_ms,
        });
    }

    /// Total user audio duration recorded so far (silence excluded).
    #[must_use]
    pub fn total_user_ms(&self) -> u64 {
        self.total_user_ms
    }

    /// Returns the total user audio duration whose vendor-timeline end is
    /// `<= t_vendor_ms`. Negative vendor times return 0; times beyond the
    /// last interval return the full `total_user_ms()`.
    #[must_use]
    pub fn audio_before(&self, t_vendor_ms: i64) -> u64 {
        if t_vendor_ms < 0 {
            return 0;
        }
        let t = t_vendor_ms as u64;
        let mut elapsed = 0u64;
        for interval in &self.intervals {
            let end = elapsed + interval.duration_ms;
            if end <= t {
                elapsed = end;
                continue;
            }
            // t falls inside this interval: only the portion of *user*
            // audio up to t counts, proportional within a user interval,
            // or the total before this interval if it's silence.
            return match interval.kind {
                IntervalKind::Silence => interval.user_total_after_ms,
                IntervalKind::User => {
                    let into = t - elapsed;
                    let before_interval =
                        interval.user_total_after_ms - interval.duration_ms;
                    before_interval + into
                }
            };
        }
        self.total_user_ms
    }

    /// Starts a fresh timeline. Callers (the orchestrator) are expected to
    /// snapshot `total_user_ms()` into their own `offset_before_last_reset_ms`
    /// before calling this, so projected timestamps stay continuous across
    /// reconnects (`spec.md` §4.1).
    pub fn reset(&mut self) {
        self.intervals.clear();
        self.total_user_ms = 0;
        self.vendor_clock_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_does_not_count_toward_total_user_ms() {
        let mut tl = AudioTimeline::new();
        tl.add_user(1000);
        tl.add_silence(800);
        tl.add_user(500);
        assert_eq!(tl.total_user_ms(), 1500);
    }

    #[test]
    fn audio_before_is_monotonic_and_bounded() {
        let mut tl = AudioTimeline::new();
        tl.add_user(1000);
        tl.add_silence(800);
        tl.add_user(500);

        assert_eq!(tl.audio_before(-1), 0);
        assert_eq!(tl.audio_before(0), 0);
        assert_eq!(tl.audio_before(500), 500);
        assert_eq!(tl.audio_before(1000), 1000);
        // Inside the silence interval: total user audio stays pinned at 1000.
        assert_eq!(tl.audio_before(1400), 1000);
        assert_eq!(tl.audio_before(1800), 1000);
        // Into the second user interval.
        assert_eq!(tl.audio_before(2000), 1200);
        // Beyond the last interval: full total.
        assert_eq!(tl.audio_before(100_000), 1500);
    }

    #[test]
    fn reset_clears_intervals_but_caller_tracks_offset() {
        let mut tl = AudioTimeline::new();
        tl.add_user(2000);
        let offset = tl.total_user_ms();
        tl.reset();
        assert_eq!(tl.total_user_ms(), 0);
        assert_eq!(offset, 2000);
    }

    #[test]
    fn continuity_across_reconnect_scenario() {
        // spec.md §8 scenario 6: 2s audio, reconnect, 1s audio, vendor
        // reports start_ms=200 post-reconnect -> absolute 2200ms.
        let mut tl = AudioTimeline::new();
        tl.add_user(2000);
        let mut offset_before_last_reset_ms = tl.total_user_ms();
        tl.reset();
        tl.add_user(1000);

        let absolute =
            tl.audio_before(200) + offset_before_last_reset_ms;
        assert_eq!(absolute, 2200);

        // Sanity: offset accumulates, it isn't overwritten.
        offset_before_last_reset_ms += tl.total_user_ms();
        assert_eq!(offset_before_last_reset_ms, 3000);
    }
}
