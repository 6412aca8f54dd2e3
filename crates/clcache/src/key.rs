//! Cache key derivation
//!
//! A [`CacheKey`] identifies one compiled binary. It is derived from every input
//! that can change the compiler's output, plus the call site that issued the
//! request so identical source compiled from two places is cached separately:
//!
//! 1. platform version string (driver/runtime upgrades invalidate old binaries)
//! 2. call-site file
//! 3. call-site line (decimal)
//! 4. call-site function
//! 5. kernel source text
//! 6. build arguments
//!
//! Each field is hashed with an 8-byte little-endian length prefix so that
//! shifting bytes between neighbouring fields always changes the key. The
//! digest is SHA-256 truncated to 64 bits. Collisions are possible in principle
//! and would load the wrong binary; this is a cache-efficiency hash, not a
//! security boundary.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Version tag hashed ahead of the fields. Bump when the layout changes.
const KEY_DOMAIN: &[u8] = b"clcache/v1";

/// Number of hex characters in a rendered key
pub const KEY_HEX_LEN: usize = 16;

/// Location in calling code that requested a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite<'a> {
    /// Source file of the caller
    pub file: &'a str,
    /// Line within `file`
    pub line: u32,
    /// Enclosing function path
    pub function: &'a str,
}

impl<'a> CallSite<'a> {
    /// Create a call site from its parts
    #[must_use]
    pub const fn new(file: &'a str, line: u32, function: &'a str) -> Self {
        Self {
            file,
            line,
            function,
        }
    }
}

impl fmt::Display for CallSite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.file, self.line, self.function)
    }
}

/// Capture the current file, line and enclosing function as a [`CallSite`]
///
/// ```
/// let site = clcache::call_site!();
/// assert_eq!(site.file, file!());
/// assert!(site.function.ends_with("main"));
/// ```
#[macro_export]
macro_rules! call_site {
    () => {{
        fn __clcache_here() {}
        fn __clcache_type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = __clcache_type_name_of(__clcache_here);
        $crate::CallSite::new(
            file!(),
            line!(),
            name.strip_suffix("::__clcache_here").unwrap_or(name),
        )
    }};
}

/// Everything a key is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInputs<'a> {
    /// Platform version reported by the backend for the target device
    pub platform_version: &'a str,
    /// Kernel source text
    pub source: &'a str,
    /// Compiler options
    pub args: &'a str,
    /// Requesting call site
    pub call_site: CallSite<'a>,
}

/// A 64-bit cache key, rendered as 16 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(u64);

impl CacheKey {
    /// Wrap a raw 64-bit value
    #[must_use]
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Derive the key for a compile request
    #[must_use]
    pub fn derive(inputs: &KeyInputs<'_>) -> Self {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, KEY_DOMAIN);
        hash_field(&mut hasher, inputs.platform_version.as_bytes());
        hash_field(&mut hasher, inputs.call_site.file.as_bytes());
        hash_field(&mut hasher, inputs.call_site.line.to_string().as_bytes());
        hash_field(&mut hasher, inputs.call_site.function.as_bytes());
        hash_field(&mut hasher, inputs.source.as_bytes());
        hash_field(&mut hasher, inputs.args.as_bytes());
        let digest = hasher.finalize();

        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(head))
    }

    /// The raw 64-bit value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Fixed-width lowercase hex rendering used as the storage address
    #[must_use]
    pub fn to_hex(self) -> String {
        hex::encode(self.0.to_be_bytes())
    }
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for CacheKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != KEY_HEX_LEN {
            return Err(Error::invalid_key(
                s,
                format!("expected {KEY_HEX_LEN} hex characters, got {}", s.len()),
            ));
        }
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::invalid_key(s, "only lowercase hex digits are allowed"));
        }
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| Error::invalid_key(s, e.to_string()))?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}
