//! Compile-or-load orchestration
//!
//! [`ProgramCache`] ties the key deriver, a [`BinaryStore`] and a
//! [`CompilerBackend`] together. For each request it either rebuilds the
//! program from a cached binary or compiles the source and caches the result.
//! A cached binary the backend refuses to load counts as a miss; the caller
//! only ever sees a usable program or a build failure.

use crate::backend::CompilerBackend;
use crate::config::{BuildFailurePolicy, CacheConfig};
use crate::key::{CacheKey, CallSite, KeyInputs};
use crate::store::{BinaryStore, FileStore};
use crate::{Error, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// How a program was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Loaded from a cached binary, no compilation
    Hit,
    /// Compiled from source; the binary was offered to the store
    Miss,
    /// Caching is turned off; compiled from source
    Disabled,
}

/// A program together with how it was produced
#[derive(Debug)]
pub struct BuildOutput<P> {
    /// The ready-to-use program
    pub program: P,
    /// Key the request mapped to, `None` when caching is disabled
    pub key: Option<CacheKey>,
    /// Hit, miss or disabled
    pub status: CacheStatus,
}

/// Counters describing cache activity since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests served from a cached binary
    pub hits: u64,
    /// Requests that had to compile
    pub misses: u64,
    /// Backend compile calls, including failed ones
    pub compiles: u64,
    /// Binaries written to the store
    pub stores: u64,
    /// Binaries that could not be extracted or written
    pub store_failures: u64,
    /// Cached binaries the backend refused to load
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    compiles: AtomicU64,
    stores: AtomicU64,
    store_failures: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compiles: self.compiles.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Compiles kernels through a persistent binary cache
#[derive(Debug)]
pub struct ProgramCache<B, S = FileStore> {
    backend: B,
    store: S,
    config: CacheConfig,
    counters: Counters,
}

impl<B: CompilerBackend> ProgramCache<B, FileStore> {
    /// Cache backed by a [`FileStore`] at `config.root`
    pub fn with_file_store(backend: B, config: CacheConfig) -> Self {
        let store = FileStore::new(&config.root);
        Self::new(backend, store, config)
    }
}

impl<B: CompilerBackend, S: BinaryStore> ProgramCache<B, S> {
    /// Create a cache and prepare its store.
    ///
    /// A store that cannot be prepared is logged and kept; lookups will miss
    /// and writes will fail quietly, but compilation still works.
    pub fn new(backend: B, store: S, config: CacheConfig) -> Self {
        if config.enabled
            && let Err(e) = store.prepare()
        {
            tracing::warn!(
                root = %config.root.display(),
                error = %e,
                "Kernel cache unavailable; programs will be compiled from source"
            );
        }
        Self {
            backend,
            store,
            config,
            counters: Counters::default(),
        }
    }

    /// The compiler backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The binary store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Activity counters
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Key a request would be cached under on `device`
    ///
    /// # Errors
    ///
    /// Propagates the backend's error when the platform version cannot be read.
    pub fn key_for(
        &self,
        device: &B::Device,
        source: &str,
        args: &str,
        call_site: CallSite<'_>,
    ) -> Result<CacheKey> {
        let platform_version = self.backend.platform_version(device)?;
        Ok(CacheKey::derive(&KeyInputs {
            platform_version: &platform_version,
            source,
            args,
            call_site,
        }))
    }

    /// Get a program for `source`, reusing a cached binary when possible
    ///
    /// # Errors
    ///
    /// See [`Self::build`].
    pub fn program_from_source(
        &self,
        device: &B::Device,
        source: &str,
        args: &str,
        call_site: CallSite<'_>,
    ) -> Result<B::Program> {
        self.build(device, source, args, call_site)
            .map(|output| output.program)
    }

    /// Read kernel source from `path` and get a program for it
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when `path` cannot be read, otherwise see [`Self::build`].
    pub fn program_from_file(
        &self,
        device: &B::Device,
        path: impl AsRef<Path>,
        args: &str,
        call_site: CallSite<'_>,
    ) -> Result<B::Program> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        self.program_from_source(device, &source, args, call_site)
    }

    /// Like [`Self::program_from_source`], also reporting the key and cache status
    ///
    /// Cache-side failures never surface here; they fall back to compiling.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for empty source
    /// - the backend's error when the platform version cannot be read
    /// - [`Error::Build`] when compilation fails and the policy is
    ///   [`BuildFailurePolicy::Return`]
    pub fn build(
        &self,
        device: &B::Device,
        source: &str,
        args: &str,
        call_site: CallSite<'_>,
    ) -> Result<BuildOutput<B::Program>> {
        if source.is_empty() {
            return Err(Error::invalid_request("kernel source is empty"));
        }

        if !self.config.enabled {
            let program = self.compile(device, source, args)?;
            return Ok(BuildOutput {
                program,
                key: None,
                status: CacheStatus::Disabled,
            });
        }

        let key = self.key_for(device, source, args, call_site)?;
        let span = tracing::debug_span!("kernel_program", key = %key, call_site = %call_site);
        let _guard = span.enter();

        if let Some(program) = self.load_cached(device, &key) {
            Counters::bump(&self.counters.hits);
            tracing::debug!("Kernel cache hit");
            return Ok(BuildOutput {
                program,
                key: Some(key),
                status: CacheStatus::Hit,
            });
        }

        Counters::bump(&self.counters.misses);
        tracing::debug!("Kernel cache miss, compiling from source");
        let program = self.compile(device, source, args)?;
        self.cache_binary(&key, &program);

        Ok(BuildOutput {
            program,
            key: Some(key),
            status: CacheStatus::Miss,
        })
    }

    fn load_cached(&self, device: &B::Device, key: &CacheKey) -> Option<B::Program> {
        let binary = self.store.lookup(key)?;
        match self.backend.load_precompiled(device, &binary) {
            Ok(program) => Some(program),
            Err(e) => {
                Counters::bump(&self.counters.rejected);
                tracing::debug!(
                    size = binary.len(),
                    error = %e,
                    "Cached binary rejected by backend"
                );
                None
            }
        }
    }

    fn compile(&self, device: &B::Device, source: &str, args: &str) -> Result<B::Program> {
        Counters::bump(&self.counters.compiles);
        match self.backend.compile(device, source, args) {
            Ok(program) => Ok(program),
            Err(err @ Error::Build { .. }) => match self.config.on_build_failure {
                BuildFailurePolicy::Return => Err(err),
                BuildFailurePolicy::Halt => halt(err),
            },
            Err(err) => Err(err),
        }
    }

    fn cache_binary(&self, key: &CacheKey, program: &B::Program) {
        let stored = self
            .backend
            .extract_binary(program)
            .and_then(|binary| self.store.store(key, &binary).map(|()| binary.len()));
        match stored {
            Ok(size) => {
                Counters::bump(&self.counters.stores);
                tracing::debug!(size, "Kernel binary cached");
            }
            Err(e) => {
                Counters::bump(&self.counters.store_failures);
                tracing::warn!(error = %e, "Failed to cache kernel binary");
            }
        }
    }
}

#[allow(clippy::print_stderr)]
fn halt(err: Error) -> ! {
    tracing::error!(error = %err, "Kernel build failed, halting");
    eprintln!("{:?}", miette::Report::new(err));
    std::process::exit(1)
}
