//! Cache configuration and storage root resolution

use crate::{Error, Result};
use dirs::cache_dir;
use std::path::{Path, PathBuf};

/// Explicit cache directory override
pub const CACHE_DIR_ENV: &str = "CLCACHE_DIR";
/// Set to a truthy value to bypass the cache entirely
pub const DISABLE_ENV: &str = "CLCACHE_DISABLE";

/// What to do when the backend fails to build a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildFailurePolicy {
    /// Print the build log and terminate the process
    #[default]
    Halt,
    /// Return [`Error::Build`] to the caller
    Return,
}

/// Kernel cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one binary per cache key
    pub root: PathBuf,
    /// When false, every request compiles and nothing is read or written
    pub enabled: bool,
    /// Behaviour on kernel build failure
    pub on_build_failure: BuildFailurePolicy,
}

impl CacheConfig {
    /// Configuration rooted at an explicit directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            enabled: true,
            on_build_failure: BuildFailurePolicy::default(),
        }
    }

    /// Resolve configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when `CLCACHE_DISABLE` holds an
    /// unrecognised value or no writable cache root can be found.
    pub fn from_env() -> Result<Self> {
        let inputs = CacheInputs {
            clcache_dir: env_path(CACHE_DIR_ENV),
            xdg_cache_home: env_path("XDG_CACHE_HOME"),
            os_cache_dir: cache_dir(),
            temp_dir: std::env::temp_dir(),
        };
        let root = cache_root_from_inputs(inputs)?;
        let enabled = match std::env::var(DISABLE_ENV) {
            Ok(value) => !parse_flag(DISABLE_ENV, &value)?,
            Err(_) => true,
        };
        Ok(Self {
            root,
            enabled,
            on_build_failure: BuildFailurePolicy::default(),
        })
    }

    /// Enable or disable caching
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the build failure policy
    #[must_use]
    pub fn with_build_failure_policy(mut self, policy: BuildFailurePolicy) -> Self {
        self.on_build_failure = policy;
        self
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::configuration(format!(
            "{name} must be a boolean flag, got {other:?}"
        ))),
    }
}

/// Inputs for determining the cache root directory
#[derive(Debug, Clone)]
struct CacheInputs {
    clcache_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn cache_root_from_inputs(inputs: CacheInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) CLCACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/clcache
    // 3) OS cache dir/clcache
    // 4) TMPDIR/clcache
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.clcache_dir {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("clcache"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("clcache"));
    }
    candidates.push(inputs.temp_dir.join("clcache"));

    for path in candidates {
        if path.starts_with("/homeless-shelter") {
            continue;
        }
        if path.exists() {
            if is_writable(&path) {
                return Ok(path);
            }
            tracing::debug!(path = %path.display(), "Cache candidate not writable, skipping");
            continue;
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable kernel cache directory",
    ))
}

fn is_writable(dir: &Path) -> bool {
    tempfile::Builder::new()
        .prefix(".write_probe")
        .tempfile_in(dir)
        .is_ok()
}
