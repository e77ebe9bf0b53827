//! Open-time configuration: per-call options plus optional ambient defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::policy::ResizePolicy;

/// Read/write mode for an open file (spec.md §6 `omode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open (and create if missing) for read and write.
    ReadWrite,
    /// Open for read only; any growth attempt fails `READONLY`.
    ReadOnly,
}

impl OpenMode {
    #[must_use]
    pub(crate) fn is_writable(self) -> bool {
        matches!(self, OpenMode::ReadWrite)
    }
}

/// Parameters for [`crate::file::ExtendableFile::open`] (spec.md §6).
pub struct OpenOptions {
    /// Path to the backing file. Required.
    pub path: PathBuf,
    /// Size to grow to immediately at open, if the file is smaller.
    pub initial_size: u64,
    /// Read-only vs read-write.
    pub omode: OpenMode,
    /// Whether the reader/writer lock is engaged at all.
    pub use_locks: bool,
    /// Hard ceiling on file size; `0` means unbounded.
    pub maxoff: u64,
    /// Resize policy to use for this instance.
    pub rspolicy: ResizePolicy,
    /// Truncate the file to empty at open, discarding existing contents.
    pub truncate_on_open: bool,
}

impl OpenOptions {
    /// Starts a builder for `path`, with every other field at its default.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            initial_size: 0,
            omode: OpenMode::ReadWrite,
            use_locks: true,
            maxoff: 0,
            rspolicy: ResizePolicy::default(),
            truncate_on_open: false,
        }
    }

    /// Sets the initial size to grow to at open.
    #[must_use]
    pub fn initial_size(mut self, size: u64) -> Self {
        self.initial_size = size;
        self
    }

    /// Sets the open mode.
    #[must_use]
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.omode = mode;
        self
    }

    /// Sets whether the reader/writer lock is engaged.
    #[must_use]
    pub fn use_locks(mut self, use_locks: bool) -> Self {
        self.use_locks = use_locks;
        self
    }

    /// Sets the hard ceiling on file size (`0` = unbounded).
    #[must_use]
    pub fn maxoff(mut self, maxoff: u64) -> Self {
        self.maxoff = maxoff;
        self
    }

    /// Sets the resize policy.
    #[must_use]
    pub fn rspolicy(mut self, rspolicy: ResizePolicy) -> Self {
        self.rspolicy = rspolicy;
        self
    }

    /// Applies an [`ExFileDefaults`] layer for any field the caller didn't
    /// already override, mirroring how VelesDB's collection/server config
    /// layers deployment defaults under explicit call-site overrides.
    #[must_use]
    pub fn with_defaults(mut self, defaults: &ExFileDefaults) -> Self {
        if self.initial_size == 0 {
            self.initial_size = defaults.initial_size;
        }
        if self.maxoff == 0 {
            self.maxoff = defaults.maxoff;
        }
        self.use_locks = defaults.use_locks;
        self
    }
}

/// Deployment-level defaults, loaded via `figment` layering TOML and
/// environment variables over built-in values — the same pattern VelesDB's
/// higher layers use for collection/server configuration. Not tied to any
/// particular open call; a process typically loads one and reuses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExFileDefaults {
    /// Default `initial_size` for opens that don't specify one.
    pub initial_size: u64,
    /// Default `maxoff` for opens that don't specify one.
    pub maxoff: u64,
    /// Default `use_locks`.
    pub use_locks: bool,
}

impl Default for ExFileDefaults {
    fn default() -> Self {
        Self { initial_size: 0, maxoff: 0, use_locks: true }
    }
}

impl ExFileDefaults {
    /// Loads defaults from a TOML file layered over environment variables
    /// prefixed `EXFILE_` (e.g. `EXFILE_INITIAL_SIZE`), falling back to
    /// built-in defaults for anything neither source sets.
    pub fn load(toml_path: Option<&Path>) -> Result<Self, figment::Error> {
        use figment::providers::{Env, Format, Toml};
        use figment::Figment;

        let mut figment = Figment::from(figment::providers::Serialized::defaults(Self::default()));
        if let Some(path) = toml_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("EXFILE_"));
        figment.extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let opts = OpenOptions::new("/tmp/x").initial_size(4096).maxoff(8192).use_locks(false);
        assert_eq!(opts.initial_size, 4096);
        assert_eq!(opts.maxoff, 8192);
        assert!(!opts.use_locks);
    }

    #[test]
    fn defaults_fill_unset_fields_only() {
        let defaults = ExFileDefaults { initial_size: 1024, maxoff: 2048, use_locks: false };
        let opts = OpenOptions::new("/tmp/x").initial_size(4096).with_defaults(&defaults);
        // explicit initial_size wins over the default
        assert_eq!(opts.initial_size, 4096);
        // maxoff was unset (0), so the default applies
        assert_eq!(opts.maxoff, 2048);
        assert!(!opts.use_locks);
    }

    #[test]
    fn load_with_no_toml_file_uses_builtin_defaults() {
        let defaults = ExFileDefaults::load(None).unwrap();
        assert_eq!(defaults.initial_size, 0);
        assert!(defaults.use_locks);
    }
}
