//! Per-object DB filenames (§4.9), encoded read/write with atomic replace
//! (§4.10), and quarantine of unreadable files.

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::codec::{
    Reader, Writer, CURRENT_VERSION, MAGIC_ENTRY_END, MAGIC_ENTRY_START, MAGIC_FILE_END,
    MAGIC_FILE_START, MIN_SUPPORTED_VERSION,
};
use crate::crypto;
use crate::index::HashIndex;
use crate::model::{LogLine, Tag};
use crate::object::LogObject;
use crate::persist::master::MasterDb;

/// The on-disk filename of an object: `SHA256(prehash + " " + lowercase(name)
/// + " " + posthash)` hex-encoded, plus `.db` (§4.9). Depends only on the
/// lower-cased name and the two master salts, so it is stable across
/// restarts and hides the object name from anyone browsing the directory.
pub fn filename(name: &str, prehash: &str, posthash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prehash.as_bytes());
    hasher.update(b" ");
    hasher.update(name.to_lowercase().as_bytes());
    hasher.update(b" ");
    hasher.update(posthash.as_bytes());
    format!("{}.db", hex::encode(hasher.finalize()))
}

pub fn path_for(dir: &Path, name: &str, master: &MasterDb) -> PathBuf {
    dir.join(filename(name, &master.prehash, &master.posthash))
}

fn encode(master: &MasterDb, object: &LogObject) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(MAGIC_FILE_START).expect("in-memory write");
    w.write_u32(CURRENT_VERSION).expect("in-memory write");
    w.write_string(&master.prehash).expect("in-memory write");
    w.write_string(&master.posthash).expect("in-memory write");
    w.write_string(&object.name).expect("in-memory write");
    w.write_u64(object.max_lines).expect("in-memory write");
    w.write_u64(object.max_time).expect("in-memory write");
    for line in object.lines() {
        w.write_u32(MAGIC_ENTRY_START).expect("in-memory write");
        w.write_u64(line.t).expect("in-memory write");
        for tag in &line.tags {
            w.write_optional_string(Some(tag.name.as_str()))
                .expect("in-memory write");
            w.write_optional_string(tag.value.as_deref())
                .expect("in-memory write");
        }
        w.write_optional_string(None).expect("in-memory write");
        w.write_string(&line.line).expect("in-memory write");
        w.write_u32(MAGIC_ENTRY_END).expect("in-memory write");
    }
    w.write_u32(MAGIC_FILE_END).expect("in-memory write");
    w.into_bytes()
}

/// Atomically replaces `target` with the contents currently at `tmp`.
///
/// Elsewhere this is a single `rename`. On Windows, where `rename` cannot
/// replace an existing file, the target is unlinked first; the crash window
/// this opens (neither file exists) is a documented limitation (§9) rather
/// than one this crate silently "fixes" with an unavailable platform
/// primitive.
#[cfg(windows)]
fn replace(tmp: &Path, target: &Path) -> io::Result<()> {
    if target.exists() {
        std::fs::remove_file(target)?;
    }
    std::fs::rename(tmp, target)
}

#[cfg(not(windows))]
fn replace(tmp: &Path, target: &Path) -> io::Result<()> {
    std::fs::rename(tmp, target)
}

/// Writes `object` to its per-object file under `dir`, sealing the encoded
/// payload with `secret`. On any failure the prior real file, if any, is left
/// untouched (§4.10 step 3); the caller is responsible for keeping `dirty`
/// set so the next cleaner tick retries.
pub fn write(dir: &Path, master: &MasterDb, secret: &str, object: &LogObject) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let target = path_for(dir, &object.name, master);
    let tmp = {
        let mut p = target.clone().into_os_string();
        p.push(".tmp");
        PathBuf::from(p)
    };

    let envelope = crypto::seal(secret, &encode(master, object))
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    std::fs::write(&tmp, envelope)?;
    replace(&tmp, &target)?;
    Ok(())
}

/// Removes an object's on-disk file, if any. Used by `destroy` (§4.6) and
/// the mode-del hook (§6).
pub fn remove(dir: &Path, name: &str, master: &MasterDb) -> io::Result<()> {
    let target = path_for(dir, name, master);
    match std::fs::remove_file(target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Moves a suspect file into `dir/bad/<basename>`, replacing any prior file
/// of the same name there (§4.10 "Quarantine").
fn quarantine(dir: &Path, path: &Path) {
    let bad_dir = dir.join("bad");
    if let Err(e) = std::fs::create_dir_all(&bad_dir) {
        tracing::warn!(error = %e, "could not create quarantine directory");
        return;
    }
    let Some(basename) = path.file_name() else {
        return;
    };
    let dest = bad_dir.join(basename);
    if let Err(e) = std::fs::rename(path, &dest) {
        tracing::warn!(path = %path.display(), error = %e, "failed to quarantine file");
    } else {
        tracing::warn!(path = %path.display(), dest = %dest.display(), "quarantined corrupt history file");
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// The file opened and decrypted cleanly but carries a different
    /// installation's salts (§4.10 read step 4) — skipped, not quarantined.
    ForeignInstallation,
    /// The file could not be opened or its AEAD envelope failed to
    /// authenticate (§4.10 read step 1: "open failure, warn and skip").
    /// This covers both a wrong secret and genuine on-disk corruption of
    /// the ciphertext — the envelope gives no way to tell those apart
    /// before a key is available, so it is *not* folded into
    /// `Quarantined`, which is reserved for corruption discovered after a
    /// successful decrypt (bad magic/length inside the plaintext).
    OpenFailed,
    UnknownObjectDeleted,
    Quarantined,
}

/// Decodes one tag-list-terminated entry from `r`, returning `None` at the
/// `(null, null)` terminator.
fn read_one_tag(r: &mut Reader<'_>) -> io::Result<Option<Tag>> {
    match r.read_optional_string()? {
        None => Ok(None),
        Some(name) => {
            let value = r.read_optional_string()?;
            Ok(Some(Tag { name, value }))
        }
    }
}

/// Loads one `*.db` file, replaying its entries through `add` on the live
/// object already registered via `set_limit` (§4.10 "Read"). Files that
/// fail to open or authenticate are skipped (`OpenFailed`) rather than
/// quarantined, since a wrong secret and genuine ciphertext corruption are
/// indistinguishable at that point; files belonging to a different
/// installation (salt mismatch, `ForeignInstallation`) or with no live
/// object (`UnknownObjectDeleted`) are likewise handled without treating
/// them as corruption. Only a bad magic/length discovered after a
/// successful decrypt is quarantined.
pub fn load_one(path: &Path, dir: &Path, master: &MasterDb, secret: &str, index: &mut HashIndex) -> LoadOutcome {
    let envelope = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to open history file");
            return LoadOutcome::OpenFailed;
        }
    };

    let plaintext = match crypto::open(secret, &envelope) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to decrypt history file (wrong secret or corrupt envelope), skipping");
            return LoadOutcome::OpenFailed;
        }
    };

    let mut r = Reader::new(&plaintext);

    let ok = (|| -> io::Result<LoadOutcome> {
        if r.read_u32()? != MAGIC_FILE_START {
            return Ok(LoadOutcome::Quarantined);
        }
        let version = r.read_u32()?;
        if !(MIN_SUPPORTED_VERSION..=CURRENT_VERSION).contains(&version) {
            tracing::warn!(path = %path.display(), version, "unsupported history file version");
            return Ok(LoadOutcome::Quarantined);
        }
        let prehash = r.read_string()?;
        let posthash = r.read_string()?;
        if prehash != master.prehash || posthash != master.posthash {
            return Ok(LoadOutcome::ForeignInstallation);
        }
        let name = r.read_string()?;
        let max_lines = r.read_u64()?;
        let max_time = r.read_u64()?;

        let Some(live) = index.find_mut(&name) else {
            return Ok(LoadOutcome::UnknownObjectDeleted);
        };
        live.set_limits(max_lines, max_time);

        loop {
            let magic = r.read_u32()?;
            if magic == MAGIC_FILE_END {
                break;
            }
            if magic != MAGIC_ENTRY_START {
                return Ok(LoadOutcome::Quarantined);
            }
            let t = r.read_u64()?;
            let mut tags = Vec::new();
            while let Some(tag) = read_one_tag(&mut r)? {
                tags.push(tag);
            }
            let text = r.read_string()?;
            if r.read_u32()? != MAGIC_ENTRY_END {
                return Ok(LoadOutcome::Quarantined);
            }
            live.push_back(LogLine { t, tags, line: text });
        }

        live.dirty = false;
        Ok(LoadOutcome::Loaded)
    })();

    match ok {
        Ok(LoadOutcome::Quarantined) => {
            quarantine(dir, path);
            LoadOutcome::Quarantined
        }
        Ok(LoadOutcome::UnknownObjectDeleted) => {
            tracing::warn!(path = %path.display(), "no live object registered for history file, deleting");
            let _ = std::fs::remove_file(path);
            LoadOutcome::UnknownObjectDeleted
        }
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "short or malformed read, quarantining");
            quarantine(dir, path);
            LoadOutcome::Quarantined
        }
    }
}

/// Enumerates every `*.db` file in `dir` other than `master.db` and loads
/// it (§4.10 "Read", §2 "Directory reconciliation"). Called once at
/// startup, after the host has registered live object limits via
/// `set_limit`.
pub fn reconcile_directory(dir: &Path, master: &MasterDb, secret: &str, index: &mut HashIndex) -> io::Result<Vec<LoadOutcome>> {
    let mut outcomes = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(outcomes),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) == Some("master.db") {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("db") {
            continue;
        }
        outcomes.push(load_one(&path, dir, master, secret, index));
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogLine;
    use tempfile::tempdir;

    fn master() -> MasterDb {
        MasterDb::fresh()
    }

    #[test]
    fn filename_depends_only_on_name_and_salts() {
        let m = master();
        let a = filename("#Test", &m.prehash, &m.posthash);
        let b = filename("#test", &m.prehash, &m.posthash);
        assert_eq!(a, b);

        let m2 = master();
        let c = filename("#test", &m2.prehash, &m2.posthash);
        assert_ne!(a, c);
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let m = master();
        let mut obj = LogObject::new("#c");
        obj.set_limits(5, 3600);
        obj.push_back(LogLine {
            t: 1000,
            tags: vec![Tag::new("foo", Some("bar"))],
            line: "hello".into(),
        });
        obj.push_back(LogLine {
            t: 1001,
            tags: vec![],
            line: "world".into(),
        });
        write(dir.path(), &m, "secret", &obj).unwrap();

        let mut index = HashIndex::new();
        index.find_or_add("#c").set_limits(5, 3600);
        let outcomes = reconcile_directory(dir.path(), &m, "secret", &mut index).unwrap();
        assert_eq!(outcomes, vec![LoadOutcome::Loaded]);

        let loaded = index.find("#c").unwrap();
        assert_eq!(loaded.num_lines(), 2);
        let lines: Vec<_> = loaded.lines().collect();
        assert_eq!(lines[0].line, "hello");
        assert_eq!(lines[0].tag("foo").unwrap().value.as_deref(), Some("bar"));
        assert_eq!(lines[1].line, "world");
        assert!(!loaded.dirty);
    }

    #[test]
    fn unknown_object_file_is_deleted() {
        let dir = tempdir().unwrap();
        let m = master();
        let mut obj = LogObject::new("#ghost");
        obj.set_limits(5, 3600);
        write(dir.path(), &m, "secret", &obj).unwrap();

        let mut index = HashIndex::new();
        let outcomes = reconcile_directory(dir.path(), &m, "secret", &mut index).unwrap();
        assert_eq!(outcomes, vec![LoadOutcome::UnknownObjectDeleted]);
        assert!(index.find("#ghost").is_none());
    }

    #[test]
    fn foreign_salts_are_skipped_not_quarantined() {
        let dir = tempdir().unwrap();
        let m1 = master();
        let m2 = master();
        let mut obj = LogObject::new("#c");
        obj.set_limits(5, 3600);
        write(dir.path(), &m1, "secret", &obj).unwrap();

        let mut index = HashIndex::new();
        index.find_or_add("#c").set_limits(5, 3600);
        let outcomes = reconcile_directory(dir.path(), &m2, "secret", &mut index).unwrap();
        assert_eq!(outcomes, vec![LoadOutcome::ForeignInstallation]);
        assert!(!dir.path().join("bad").exists());
    }

    #[test]
    fn corrupt_magic_is_quarantined() {
        let dir = tempdir().unwrap();
        let m = master();
        let mut obj = LogObject::new("#c");
        obj.set_limits(5, 3600);
        write(dir.path(), &m, "secret", &obj).unwrap();

        let target = path_for(dir.path(), "#c", &m);
        let mut plaintext = crypto::open("secret", &std::fs::read(&target).unwrap()).unwrap();
        plaintext[0] ^= 0xFF;
        let tampered = crypto::seal("secret", &plaintext).unwrap();
        std::fs::write(&target, tampered).unwrap();

        let mut index = HashIndex::new();
        index.find_or_add("#c").set_limits(5, 3600);
        let outcomes = reconcile_directory(dir.path(), &m, "secret", &mut index).unwrap();
        assert_eq!(outcomes, vec![LoadOutcome::Quarantined]);
        assert!(!target.exists());
        assert!(dir.path().join("bad").join(target.file_name().unwrap()).exists());
        assert_eq!(index.find("#c").unwrap().num_lines(), 0);
    }

    /// A byte flip against the raw envelope (as opposed to re-sealed
    /// tampering of the plaintext) fails AEAD authentication outright. That
    /// is indistinguishable from "wrong secret" at this layer, so it is
    /// skipped rather than quarantined, and the file is left in place.
    #[test]
    fn genuine_envelope_corruption_is_skipped_not_quarantined() {
        let dir = tempdir().unwrap();
        let m = master();
        let mut obj = LogObject::new("#c");
        obj.set_limits(5, 3600);
        write(dir.path(), &m, "secret", &obj).unwrap();

        let target = path_for(dir.path(), "#c", &m);
        let mut envelope = std::fs::read(&target).unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0xFF;
        std::fs::write(&target, &envelope).unwrap();

        let mut index = HashIndex::new();
        index.find_or_add("#c").set_limits(5, 3600);
        let outcomes = reconcile_directory(dir.path(), &m, "secret", &mut index).unwrap();
        assert_eq!(outcomes, vec![LoadOutcome::OpenFailed]);
        assert!(target.exists());
        assert!(!dir.path().join("bad").exists());
    }
}
