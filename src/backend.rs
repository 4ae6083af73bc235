//! The host-facing surface (§6): registers as a history backend named
//! `"mem"` providing `add`/`request`/`destroy`/`set_limit`, plus the cleaner
//! tick and the mode-char-del/rehash/capability hooks the host drives this
//! module with. Everything in [`crate::index`], [`crate::object`], and
//! [`crate::persist`] is wired together here.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::{HashIndex, NUM_BUCKETS};
use crate::model::{resolve_timestamp, HistoryFilter, HistoryResult, LogLine, Tag};
use crate::object::LogObject;
use crate::persist::master::MasterDb;
use crate::persist::object as persist_object;

/// How many ticks it takes the cleaner to sweep the whole bucket table once
/// (§4.7). Production recommendation: 60.
pub const SPREAD: u64 = 60;
/// Acceptable staleness ceiling between a mutation and its write to disk
/// (§4.7). Production recommendation: 300 seconds.
pub const MAX_OFF_SECS: u64 = 300;

/// Host seam answering "is `name` currently eligible for persistence?" — in
/// the reference host, "does this channel have mode `+P` set" (§6). Any
/// `Fn(&str) -> bool` implements this automatically.
pub trait PersistenceEligibility {
    fn is_eligible(&self, name: &str) -> bool;
}

impl<F: Fn(&str) -> bool> PersistenceEligibility for F {
    fn is_eligible(&self, name: &str) -> bool {
        self(name)
    }
}

struct AlwaysEligible;
impl PersistenceEligibility for AlwaysEligible {
    fn is_eligible(&self, _name: &str) -> bool {
        true
    }
}

/// The history backend the host registers under the name `"mem"` (§6).
///
/// Owns the hash index, resolved configuration, loaded master-DB (when
/// persistence is enabled), and the cleaner's bucket cursor. There is
/// deliberately no interior mutability or locking anywhere in here: per §5
/// the host drives this type from a single cooperative event loop thread,
/// and every mutation is an ordinary `&mut self` call.
pub struct HistoryBackend {
    index: HashIndex,
    config: Config,
    master: Option<MasterDb>,
    eligibility: Box<dyn PersistenceEligibility + Send + Sync>,
    bucket_cursor: usize,
    clean_per_loop: usize,
}

impl HistoryBackend {
    /// Builds a backend from an already-`post_test`ed configuration. If
    /// `persist` is set this loads (or creates) the master-DB immediately;
    /// any failure other than "absent" is fatal per §7.
    pub fn new(
        config: Config,
        eligibility: impl PersistenceEligibility + Send + Sync + 'static,
    ) -> Result<Self> {
        config.post_test()?;

        let master = if config.persist {
            let secret = config
                .db_secret
                .as_deref()
                .ok_or_else(|| Error::Config("persist = yes requires db-secret".into()))?;
            Some(MasterDb::load_or_create(&config.master_db_path(), secret)?)
        } else {
            None
        };

        Ok(HistoryBackend {
            index: HashIndex::new(),
            config,
            master,
            eligibility: Box::new(eligibility),
            bucket_cursor: 0,
            // Ceiling division so the whole table is covered within SPREAD
            // ticks: 1019 buckets / 60 ticks -> 17 buckets/tick, matching
            // §4.7's recommended production pacing.
            clean_per_loop: ((NUM_BUCKETS as u64 + SPREAD - 1) / SPREAD).max(1) as usize,
        })
    }

    /// Convenience constructor for hosts (and tests) that don't need a
    /// persistence-eligibility predicate: every object is treated as
    /// eligible whenever `persist` is on.
    pub fn new_always_eligible(config: Config) -> Result<Self> {
        Self::new(config, AlwaysEligible)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read-only lookup, mainly useful to tests and to the host when
    /// inspecting state without mutating it.
    pub fn object(&self, name: &str) -> Option<&LogObject> {
        self.index.find(name)
    }

    /// Replays every `*.db` file in the configured directory into the live
    /// object set (§4.10 "Read", §2). Per §9's "load after channeldb"
    /// ordering note, the host must call `set_limit` for every
    /// persistence-eligible object *before* calling this, so replayed
    /// `add`s land on an object whose limits are already known; objects the
    /// host never registered have their files deleted instead of loaded.
    ///
    /// A no-op when persistence is disabled.
    pub fn reconcile(&mut self) -> Result<()> {
        let Some(master) = &self.master else {
            return Ok(());
        };
        let secret = self.config.db_secret.as_deref().unwrap_or_default();
        persist_object::reconcile_directory(&self.config.directory, master, secret, &mut self.index)?;
        Ok(())
    }

    /// Appends one message to `name`'s log (§4.2).
    ///
    /// `now` is the caller's wall-clock reading in seconds since the epoch;
    /// it is used both to synthesize a `"time"` tag when one is absent or
    /// malformed, and as the "current time" for the eviction check.
    pub fn add(&mut self, name: &str, mut tags: Vec<Tag>, line: String, now: u64) {
        let obj = self.index.find_or_add(name);

        if !obj.has_limits() {
            tracing::warn!(object = %name, "add() called with no configured limits");
            if cfg!(debug_assertions) {
                panic!(
                    "history::add() called for {name:?} before set_limit(); this is a host bug"
                );
            }
            obj.apply_default_limits();
        }

        if obj.num_lines() as u64 >= obj.max_lines {
            obj.drop_head();
        }

        let (t, synthesized) = resolve_timestamp(&tags, now);
        if let Some(tag) = synthesized {
            tags.retain(|existing| existing.name != "time");
            tags.push(tag);
        }

        obj.push_back(LogLine { t, tags, line });
        obj.dirty = true;
    }

    /// Builds a filtered replay snapshot for `name` (§4.4). Returns `None`
    /// ("no history") when no object has ever been created for `name`,
    /// distinct from `Some` with an empty line list ("empty history").
    pub fn request(&self, name: &str, filter: HistoryFilter, now: u64) -> Option<HistoryResult> {
        let obj = self.index.find(name)?;

        let window = if filter.last_seconds > 0 {
            filter.last_seconds.min(obj.max_time)
        } else {
            obj.max_time
        };
        let redline = now.saturating_sub(window);

        let sendable = obj.lines().filter(|l| l.t >= redline).count();
        let skip = if filter.last_lines == 0 {
            0
        } else {
            sendable.saturating_sub(filter.last_lines)
        };

        let mut seen = 0usize;
        let mut lines = Vec::new();
        for line in obj.lines() {
            if line.t < redline {
                continue;
            }
            seen += 1;
            if seen > skip {
                lines.push(line.clone());
            }
        }

        Some(HistoryResult {
            object: obj.name.clone(),
            lines,
        })
    }

    /// Finds-or-adds `name`, assigns its limits, and runs retention
    /// immediately so the new caps bind at once (§4.5).
    pub fn set_limit(&mut self, name: &str, max_lines: u64, max_time: u64, now: u64) {
        let obj = self.index.find_or_add(name);
        obj.set_limits(max_lines, max_time);
        obj.cleanup(now);
    }

    /// Destroys `name`'s object and, if persistence is on, its on-disk file
    /// (§4.6). Returns `false` ("not found") if no object existed.
    pub fn destroy(&mut self, name: &str) -> bool {
        let Some(mut obj) = self.index.remove(name) else {
            return false;
        };
        obj.clear_for_destroy();

        if self.config.persist {
            if let Some(master) = &self.master {
                if let Err(e) = persist_object::remove(&self.config.directory, name, master) {
                    tracing::warn!(object = %name, error = %e, "failed to remove history file on destroy");
                }
            }
        }
        true
    }

    /// One amortized cleaner sweep (§4.7): visits `clean_per_loop` buckets
    /// starting at the cursor, enforces retention on every object found
    /// there, and — when persistence is on and the object qualifies — writes
    /// dirty objects to disk, clearing `dirty` only on a fully successful
    /// write.
    pub fn tick(&mut self, now: u64) {
        let buckets = self.index.bucket_count();
        for _ in 0..self.clean_per_loop {
            let idx = self.bucket_cursor;
            self.bucket_cursor = (self.bucket_cursor + 1) % buckets;

            let chain = self.index.bucket_mut(idx);
            for obj in chain.iter_mut() {
                obj.cleanup(now);

                if !self.config.persist || !obj.dirty {
                    continue;
                }
                if !self.eligibility.is_eligible(&obj.name) {
                    continue;
                }
                let Some(master) = &self.master else { continue };
                let secret = self.config.db_secret.as_deref().unwrap_or_default();
                match persist_object::write(&self.config.directory, master, secret, obj) {
                    Ok(()) => obj.dirty = false,
                    Err(e) => {
                        tracing::warn!(object = %obj.name, error = %e, "history write failed, retrying next tick");
                    }
                }
            }
        }
    }

    /// Drives `tick` enough times to sweep every bucket at least once.
    ///
    /// A single `tick` only visits `clean_per_loop` of the table's buckets
    /// (§4.7's amortization), so which objects it reaches depends on where
    /// the cursor and the keyed hash happen to place them — a single call
    /// is not a reliable way to flush a specific object. This covers the
    /// whole table deterministically (`ceil(bucket_count / clean_per_loop)`
    /// calls, which is `SPREAD` ticks at the recommended pacing), for hosts
    /// and tests that need every dirty object written before proceeding
    /// rather than waiting out the amortized schedule.
    pub fn flush_all(&mut self, now: u64) {
        let buckets = self.index.bucket_count();
        let per_loop = self.clean_per_loop.max(1);
        let sweeps = (buckets + per_loop - 1) / per_loop;
        for _ in 0..sweeps {
            self.tick(now);
        }
    }

    /// Mode-char-del hook (§6): when a channel loses mode `P`, its
    /// persistence file is removed immediately and the object is marked
    /// dirty so a later re-enable causes a rewrite on the next tick.
    pub fn mode_char_del(&mut self, name: &str, modechar: char) {
        if modechar != 'P' {
            return;
        }
        let Some(master) = &self.master else {
            return;
        };
        if let Some(obj) = self.index.find_mut(name) {
            if self.config.persist {
                if let Err(e) = persist_object::remove(&self.config.directory, name, master) {
                    tracing::warn!(object = %name, error = %e, "failed to remove history file on mode -P");
                }
            }
            obj.dirty = true;
        }
    }

    /// Clears configuration to defaults ahead of the next rehash run pass
    /// (§6); the master-DB salts are untouched.
    pub fn rehash(&mut self) {
        self.config.rehash();
    }

    /// The client-visible capability value this backend contributes (§6).
    pub fn capability(&self) -> &'static str {
        self.config.capability_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn backend_memory_only() -> HistoryBackend {
        HistoryBackend::new_always_eligible(Config::default()).unwrap()
    }

    /// §8 scenario 1: ingest and cap.
    #[test]
    fn ingest_and_cap() {
        let mut b = backend_memory_only();
        b.set_limit("#a", 3, 3600, 1000);
        for (i, text) in ["one", "two", "three", "four"].iter().enumerate() {
            b.add(
                "#a",
                vec![Tag::new("time", Some(crate::model::format_iso8601(1000 + i as u64)))],
                text.to_string(),
                1000 + i as u64,
            );
        }
        let obj = b.object("#a").unwrap();
        let texts: Vec<_> = obj.lines().map(|l| l.line.as_str()).collect();
        assert_eq!(texts, vec!["two", "three", "four"]);
        assert_eq!(obj.num_lines(), 3);
        assert_eq!(obj.oldest_t(), 1001);
    }

    /// §8 scenario 2: age trim.
    #[test]
    fn age_trim_clears_everything() {
        let mut b = backend_memory_only();
        b.set_limit("#a", 3, 3600, 1000);
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            b.add(
                "#a",
                vec![Tag::new("time", Some(crate::model::format_iso8601(1000 + i as u64)))],
                text.to_string(),
                1000 + i as u64,
            );
        }
        let obj = b.index.find_mut("#a").unwrap();
        obj.cleanup(1000 + 4000);
        assert_eq!(obj.num_lines(), 0);
        assert_eq!(obj.oldest_t(), 0);
    }

    /// §8 scenario 3: query with skip.
    #[test]
    fn query_with_skip() {
        let mut b = backend_memory_only();
        b.set_limit("#b", 10, 3600, 0);
        for i in 1..=6u64 {
            b.add(
                "#b",
                vec![Tag::new("time", Some(crate::model::format_iso8601(1000 + i)))],
                format!("L{i}"),
                1000 + i,
            );
        }
        let result = b
            .request("#b", HistoryFilter::new(3600, 4), 1000 + 6)
            .unwrap();
        let texts: Vec<_> = result.lines.iter().map(|l| l.line.as_str()).collect();
        assert_eq!(texts, vec!["L3", "L4", "L5", "L6"]);
    }

    /// §8 scenario 4: no-history vs empty.
    #[test]
    fn no_history_vs_empty_history() {
        let mut b = backend_memory_only();
        assert!(b.request("#never", HistoryFilter::default(), 1000).is_none());

        b.set_limit("#e", 5, 60, 1000);
        let result = b.request("#e", HistoryFilter::default(), 1000).unwrap();
        assert!(result.lines.is_empty());
    }

    /// §8 scenario 5: persistence round-trip across a simulated restart.
    #[test]
    fn persistence_round_trip() {
        let dir = tempdir().unwrap();
        let config = Config {
            persist: true,
            directory: dir.path().to_path_buf(),
            db_secret: Some("s3cr3t".into()),
        };

        let mut b = HistoryBackend::new_always_eligible(config.clone()).unwrap();
        b.set_limit("#c", 5, 3600, 1000);
        b.add(
            "#c",
            vec![Tag::new("time", Some(crate::model::format_iso8601(1000)))],
            "one".into(),
            1000,
        );
        b.add(
            "#c",
            vec![
                Tag::new("time", Some(crate::model::format_iso8601(1001))),
                Tag::new("foo", Some("bar")),
            ],
            "two".into(),
            1001,
        );
        b.add(
            "#c",
            vec![Tag::new("time", Some(crate::model::format_iso8601(1002)))],
            "three".into(),
            1002,
        );
        b.flush_all(1002);
        assert!(!b.object("#c").unwrap().dirty);

        // Simulate a restart: fresh backend against the same directory.
        let mut restarted = HistoryBackend::new_always_eligible(config).unwrap();
        restarted.set_limit("#c", 5, 3600, 1002);
        restarted.reconcile().unwrap();

        let obj = restarted.object("#c").unwrap();
        let lines: Vec<_> = obj.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].line, "one");
        assert_eq!(lines[1].line, "two");
        assert_eq!(lines[1].tag("foo").unwrap().value.as_deref(), Some("bar"));
        assert_eq!(lines[2].line, "three");
        assert!(!obj.dirty);
    }

    /// §8 scenario 6: mode-toggle cleanup.
    #[test]
    fn mode_toggle_removes_and_recreates_file() {
        let dir = tempdir().unwrap();
        let config = Config {
            persist: true,
            directory: dir.path().to_path_buf(),
            db_secret: Some("s3cr3t".into()),
        };
        let mut b = HistoryBackend::new_always_eligible(config).unwrap();
        b.set_limit("#d", 5, 3600, 1000);
        b.add("#d", vec![], "hi".into(), 1000);
        b.flush_all(1000);
        let master = b.object("#d").is_some();
        assert!(master);
        assert!(!b.object("#d").unwrap().dirty);

        let path = persist_object::path_for(
            b.config().directory.as_path(),
            "#d",
            &MasterDb::load_or_create(&b.config().master_db_path(), "s3cr3t").unwrap(),
        );
        assert!(path.exists());

        b.mode_char_del("#d", 'P');
        assert!(!path.exists());
        assert!(b.object("#d").unwrap().dirty);

        b.flush_all(1000);
        assert!(path.exists());
    }

    #[test]
    fn destroy_removes_persisted_file() {
        let dir = tempdir().unwrap();
        let config = Config {
            persist: true,
            directory: dir.path().to_path_buf(),
            db_secret: Some("s3cr3t".into()),
        };
        let mut b = HistoryBackend::new_always_eligible(config).unwrap();
        b.set_limit("#x", 5, 3600, 1000);
        b.add("#x", vec![], "hi".into(), 1000);
        b.flush_all(1000);

        assert!(b.destroy("#x"));
        assert!(b.object("#x").is_none());
        assert!(!b.destroy("#x"));
    }

    #[test]
    fn capability_reflects_config() {
        let b = backend_memory_only();
        assert_eq!(b.capability(), "memory");
    }
}
