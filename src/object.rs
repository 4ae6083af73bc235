use std::collections::VecDeque;

use crate::model::LogLine;

/// Self-healing defaults applied to an object that receives `add` before
/// any `set_limit` call, in release builds (see §4.2/§4.3 of the design
/// notes: debug builds abort instead).
pub const DEFAULT_MAX_LINES: u64 = 50;
pub const DEFAULT_MAX_TIME: u64 = 86_400;

/// A named history container, typically a channel.
///
/// Lines are kept in a `VecDeque` rather than a hand-rolled doubly-linked
/// list: it gives the same O(1) push-back/pop-front behavior the original
/// design asked a linked list for, without unsafe code.
#[derive(Clone, Debug)]
pub struct LogObject {
    pub name: String,
    lines: VecDeque<LogLine>,
    oldest_t: u64,
    pub max_lines: u64,
    pub max_time: u64,
    pub dirty: bool,
}

impl LogObject {
    pub fn new(name: impl Into<String>) -> Self {
        LogObject {
            name: name.into(),
            lines: VecDeque::new(),
            oldest_t: 0,
            max_lines: 0,
            max_time: 0,
            dirty: false,
        }
    }

    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn oldest_t(&self) -> u64 {
        self.oldest_t
    }

    pub fn lines(&self) -> impl DoubleEndedIterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn has_limits(&self) -> bool {
        self.max_lines > 0
    }

    /// Applies the documented release-build self-heal defaults.
    pub fn apply_default_limits(&mut self) {
        self.max_lines = DEFAULT_MAX_LINES;
        self.max_time = DEFAULT_MAX_TIME;
    }

    pub fn set_limits(&mut self, max_lines: u64, max_time: u64) {
        self.max_lines = max_lines;
        self.max_time = max_time;
    }

    /// Drops the head line unconditionally; used to make room before an
    /// overflowing append. The dropped line may have been the current
    /// `oldest_t`, so it is recomputed from the new front rather than left
    /// stale (§3: "after any mutation that deletes the currently-oldest
    /// line, `oldest_t` is either recomputed or reset to 0").
    pub fn drop_head(&mut self) {
        self.lines.pop_front();
        self.recompute_oldest_t();
    }

    pub fn push_back(&mut self, line: LogLine) {
        let t = line.t;
        self.lines.push_back(line);
        self.oldest_t = min_unset(self.oldest_t, t);
    }

    /// Enforces age then size caps, exactly as specified in §4.3: the age
    /// sweep is skipped whenever the cached `oldest_t` is already above the
    /// red line, which is the common case between cleaner ticks.
    pub fn cleanup(&mut self, now: u64) {
        if self.max_time > 0 {
            let redline = now.saturating_sub(self.max_time);
            if self.oldest_t != 0 && self.oldest_t < redline {
                self.oldest_t = 0;
                while let Some(front) = self.lines.front() {
                    if front.t < redline {
                        self.lines.pop_front();
                    } else {
                        break;
                    }
                }
                self.recompute_oldest_t();
            }
        }

        if self.max_lines > 0 && self.lines.len() as u64 > self.max_lines {
            self.oldest_t = 0;
            while self.lines.len() as u64 > self.max_lines {
                self.lines.pop_front();
            }
            self.recompute_oldest_t();
        }
    }

    fn recompute_oldest_t(&mut self) {
        self.oldest_t = self.lines.front().map(|l| l.t).unwrap_or(0);
    }

    /// Frees all lines without maintaining `oldest_t`/count bookkeeping,
    /// per §4.6 — the object is about to be dropped entirely.
    pub fn clear_for_destroy(&mut self) {
        self.lines.clear();
        self.oldest_t = 0;
    }
}

fn min_unset(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, b) => b,
        (a, 0) => a,
        (a, b) => a.min(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogLine;

    fn line(t: u64, text: &str) -> LogLine {
        LogLine {
            t,
            tags: vec![],
            line: text.to_string(),
        }
    }

    #[test]
    fn caps_line_count() {
        let mut obj = LogObject::new("#a");
        obj.set_limits(3, 3600);
        for (i, text) in ["one", "two", "three", "four"].iter().enumerate() {
            if obj.num_lines() as u64 >= obj.max_lines {
                obj.drop_head();
            }
            obj.push_back(line(1000 + i as u64, text));
        }
        let texts: Vec<_> = obj.lines().map(|l| l.line.as_str()).collect();
        assert_eq!(texts, vec!["two", "three", "four"]);
        assert_eq!(obj.num_lines(), 3);
        assert_eq!(obj.oldest_t(), 1001);
    }

    #[test]
    fn age_trim_clears_everything_when_all_expired() {
        let mut obj = LogObject::new("#a");
        obj.set_limits(3, 3600);
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            obj.push_back(line(1000 + i as u64, text));
        }
        obj.cleanup(1000 + 4000);
        assert_eq!(obj.num_lines(), 0);
        assert_eq!(obj.oldest_t(), 0);
    }

    #[test]
    fn cleanup_skips_age_sweep_when_oldest_above_redline() {
        let mut obj = LogObject::new("#a");
        obj.set_limits(10, 3600);
        obj.push_back(line(10_000, "fresh"));
        obj.cleanup(10_050);
        assert_eq!(obj.num_lines(), 1);
    }
}
