use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Recognized options under the host's `set.history.channel` subtree (§6).
///
/// Resolution is layered: compiled-in [`Default`], optionally overridden by
/// an on-disk config file, then by host-supplied overrides at config-test
/// time. Every layer is validated by [`Config::post_test`] before it takes
/// effect.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub persist: bool,
    pub directory: PathBuf,
    #[serde(rename = "db-secret")]
    pub db_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            persist: false,
            directory: PathBuf::from("history"),
            db_secret: None,
        }
    }
}

/// Host-supplied overrides applied on top of compiled defaults and any
/// on-disk file, the outermost of the three layers §4.12 describes. Each
/// field left `None` leaves the corresponding `Config` field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub persist: Option<bool>,
    pub directory: Option<PathBuf>,
    pub db_secret: Option<String>,
}

impl Config {
    /// Parses a `set.history.channel` subtree from its on-disk TOML
    /// representation (§4.12's "optional on-disk config file" layer).
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        toml::from_str(s).map_err(|e| Error::Config(format!("invalid history config: {e}")))
    }

    /// Resolves the three configuration layers §4.12 describes, in order:
    /// compiled-in defaults, an optional on-disk file, then host-supplied
    /// overrides. Does not run [`Config::post_test`]; callers must still do
    /// that before treating the result as live.
    pub fn load_layered(file_contents: Option<&str>, overrides: ConfigOverrides) -> Result<Self, Error> {
        let mut config = match file_contents {
            Some(s) => Self::from_toml_str(s)?,
            None => Config::default(),
        };
        config.apply_overrides(overrides);
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(persist) = overrides.persist {
            self.persist = persist;
        }
        if let Some(directory) = overrides.directory {
            self.directory = directory;
        }
        if let Some(db_secret) = overrides.db_secret {
            self.db_secret = Some(db_secret);
        }
    }

    /// Makes `directory` absolute against the host's permanent-data root,
    /// as §6 specifies.
    pub fn rooted_at(mut self, data_root: &Path) -> Self {
        if self.directory.is_relative() {
            self.directory = data_root.join(&self.directory);
        }
        self
    }

    pub fn master_db_path(&self) -> PathBuf {
        self.directory.join("master.db")
    }

    pub fn bad_dir(&self) -> PathBuf {
        self.directory.join("bad")
    }

    /// The config-test / post-test validation enumerated in §6:
    /// `db-secret` requires `persist`, `persist` requires `db-secret`, and
    /// the directory must exist or be creatable. This does not touch the
    /// master-DB itself — that check happens once persistence actually
    /// starts up, since it needs the secret to attempt a decrypt.
    pub fn post_test(&self) -> Result<(), Error> {
        match (self.persist, &self.db_secret) {
            (true, None) => {
                return Err(Error::Config(
                    "persist = yes requires db-secret to be set".into(),
                ))
            }
            (false, Some(_)) => {
                return Err(Error::Config(
                    "db-secret is set but persist = no; remove one or the other".into(),
                ))
            }
            _ => {}
        }

        if self.persist {
            std::fs::create_dir_all(&self.directory).map_err(|e| {
                Error::Config(format!(
                    "directory {:?} does not exist and could not be created: {e}",
                    self.directory
                ))
            })?;
        }

        Ok(())
    }

    /// Resets to compiled-in defaults, as the host's rehash hook requires
    /// (§6: "clears the configuration to defaults before the next run
    /// pass").
    pub fn rehash(&mut self) {
        *self = Config::default();
    }

    /// The client-visible capability string §6 asks this backend to
    /// advertise.
    pub fn capability_value(&self) -> &'static str {
        if self.persist {
            "memory,disk=encrypted"
        } else {
            "memory"
        }
    }
}
