use std::io::ErrorKind;
use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::codec::{Reader, Writer, CURRENT_VERSION, MIN_SUPPORTED_VERSION};
use crate::crypto;
use crate::error::Error;

const SALT_LEN: usize = 128;

/// The version and two random salts that bind every per-object file to this
/// installation (§4.8). `prehash`/`posthash` are never rotated once
/// generated; a rehash only re-reads them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterDb {
    pub version: u32,
    pub prehash: String,
    pub posthash: String,
}

impl MasterDb {
    fn generate_salt() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect()
    }

    pub(crate) fn fresh() -> Self {
        MasterDb {
            version: CURRENT_VERSION,
            prehash: Self::generate_salt(),
            posthash: Self::generate_salt(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u32(self.version).expect("in-memory write");
        w.write_string(&self.prehash).expect("in-memory write");
        w.write_string(&self.posthash).expect("in-memory write");
        w.into_bytes()
    }

    fn decode(path: &Path, bytes: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(bytes);
        let version = r
            .read_u32()
            .map_err(|_| Error::MasterDbCorrupt(path.to_path_buf()))?;
        if !(MIN_SUPPORTED_VERSION..=CURRENT_VERSION).contains(&version) {
            return Err(Error::UnsupportedVersion {
                found: version,
                min: MIN_SUPPORTED_VERSION,
                max: CURRENT_VERSION,
            });
        }
        let prehash = r
            .read_string()
            .map_err(|_| Error::MasterDbCorrupt(path.to_path_buf()))?;
        let posthash = r
            .read_string()
            .map_err(|_| Error::MasterDbCorrupt(path.to_path_buf()))?;
        Ok(MasterDb {
            version,
            prehash,
            posthash,
        })
    }

    /// Loads the master-DB if present, generating and persisting a fresh
    /// one otherwise. Any open failure other than "not found" is a fatal
    /// configuration error, per §7.
    pub fn load_or_create(path: &Path, secret: &str) -> Result<Self, Error> {
        match std::fs::read(path) {
            Ok(envelope) => {
                let plaintext = crypto::open(secret, &envelope)?;
                let db = Self::decode(path, &plaintext)?;
                tracing::info!(path = %path.display(), "loaded master database");
                Ok(db)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "master database absent, generating salts");
                let db = Self::fresh();
                db.write(path, secret)?;
                Ok(db)
            }
            Err(source) => Err(Error::MasterDbUnopenable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn write(&self, path: &Path, secret: &str) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let envelope = crypto::seal(secret, &self.encode())?;
        std::fs::write(path, envelope)?;
        Ok(())
    }
}
