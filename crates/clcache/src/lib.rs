//! Persistent cache of compiled GPU kernel binaries
//!
//! Just-in-time kernel compilation is slow and repeats on every process start.
//! This crate keeps the device binary of every kernel it compiles and hands it
//! back to the backend's binary loader the next time the same kernel is
//! requested.
//!
//! # Overview
//!
//! - [`CacheKey`]: 64-bit key derived from platform version, call site,
//!   source and build arguments
//! - [`BinaryStore`]: key-addressed blob storage ([`FileStore`] on disk,
//!   [`MemoryStore`] in process)
//! - [`CompilerBackend`]: compile / load binary / extract binary for a device
//!   family (OpenCL behind the `opencl` feature)
//! - [`ProgramCache`]: the compile-or-load protocol
//!
//! # Failure handling
//!
//! Anything that goes wrong on the cache side (missing entry, unreadable
//! file, binary rejected by the driver, failed write) degrades to compiling
//! from source. Only a kernel build failure is reported, with the compiler
//! log attached; by default it halts the process, see [`BuildFailurePolicy`].
//!
//! # Usage
//!
//! ```rust,no_run
//! # #[cfg(feature = "opencl")]
//! # fn demo() -> clcache::Result<()> {
//! use clcache::opencl::{OpenClBackend, OpenClDevice};
//! use clcache::{CacheConfig, ProgramCache, call_site};
//!
//! let platform = ocl::Platform::default();
//! let device = ocl::Device::first(platform).map_err(|e| clcache::Error::backend(e.to_string()))?;
//! let device = OpenClDevice::new(platform, device)?;
//!
//! let cache = ProgramCache::with_file_store(OpenClBackend, CacheConfig::from_env()?);
//! let program = cache.program_from_file(&device, "kernels/warp.cl", "-DWIDTH=1164", call_site!())?;
//! # let _ = program;
//! # Ok(())
//! # }
//! ```

mod backend;
mod config;
mod error;
mod key;
mod program;
mod store;

#[cfg(feature = "opencl")]
pub mod opencl;

pub use backend::CompilerBackend;
pub use config::{BuildFailurePolicy, CACHE_DIR_ENV, CacheConfig, DISABLE_ENV};
pub use error::{Error, Result};
pub use key::{CacheKey, CallSite, KEY_HEX_LEN, KeyInputs};
pub use program::{BuildOutput, CacheStats, CacheStatus, ProgramCache};
pub use store::{BinaryStore, ENTRY_EXTENSION, FileStore, MemoryStore, StoredEntry};
