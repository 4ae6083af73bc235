use chrono::{SecondsFormat, TimeZone, Utc};

/// A single name/value pair attached to a recorded message.
///
/// `value` is `None` for a bare tag (no `=value` suffix).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub value: Option<String>,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        Tag {
            name: name.into(),
            value: value.map(Into::into),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Tag {
            name: name.into(),
            value: None,
        }
    }
}

/// One recorded message: timestamp, tags, and raw line text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub t: u64,
    pub tags: Vec<Tag>,
    pub line: String,
}

impl LogLine {
    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.name == name)
    }
}

/// Resolves the timestamp of an incoming line the way [`add`](crate::backend::HistoryBackend::add)
/// is specified to: trust an explicit `"time"` tag, synthesize one from the
/// wall clock when absent, and fall back to the wall clock when the tag's
/// value fails to parse.
///
/// Returns the resolved timestamp and, when one was synthesized or
/// substituted, the tag that should be recorded alongside the line.
pub(crate) fn resolve_timestamp(tags: &[Tag], now: u64) -> (u64, Option<Tag>) {
    match tags.iter().find(|tag| tag.name == "time") {
        Some(tag) => match tag.value.as_deref().and_then(parse_iso8601) {
            Some(t) => (t, None),
            None => {
                tracing::warn!(
                    value = tag.value.as_deref().unwrap_or(""),
                    "malformed time tag, falling back to current time"
                );
                (now, Some(Tag::new("time", Some(format_iso8601(now)))))
            }
        },
        None => (now, Some(Tag::new("time", Some(format_iso8601(now))))),
    }
}

pub fn format_iso8601(t: u64) -> String {
    Utc.timestamp_opt(t as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_iso8601(s: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp().max(0) as u64)
}

/// A query's age/length bounds, as requested by the caller.
///
/// `last_seconds == 0` means "no age restriction beyond the object's own
/// `max_time`"; the effective window is always clamped to the object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub last_seconds: u64,
    pub last_lines: usize,
}

impl HistoryFilter {
    pub fn new(last_seconds: u64, last_lines: usize) -> Self {
        HistoryFilter {
            last_seconds,
            last_lines,
        }
    }
}

/// A filtered, owned snapshot of an object's history, returned by
/// [`request`](crate::backend::HistoryBackend::request).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryResult {
    pub object: String,
    pub lines: Vec<LogLine>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_iso8601() {
        let t = 1_700_000_000;
        let formatted = format_iso8601(t);
        assert!(formatted.ends_with('Z'));
        assert_eq!(parse_iso8601(&formatted), Some(t));
    }

    #[test]
    fn resolves_explicit_time_tag() {
        let tags = vec![Tag::new("time", Some("2023-11-14T22:13:20.000Z"))];
        let (t, synthesized) = resolve_timestamp(&tags, 0);
        assert_eq!(t, 1_700_000_000);
        assert!(synthesized.is_none());
    }

    #[test]
    fn synthesizes_time_when_absent() {
        let tags = vec![Tag::bare("foo")];
        let (t, synthesized) = resolve_timestamp(&tags, 42);
        assert_eq!(t, 42);
        assert!(synthesized.is_some());
    }

    #[test]
    fn falls_back_to_now_on_malformed_time() {
        let tags = vec![Tag::new("time", Some("not-a-timestamp"))];
        let (t, synthesized) = resolve_timestamp(&tags, 99);
        assert_eq!(t, 99);
        assert!(synthesized.is_some());
    }
}
