//! Compiler backend abstraction
//!
//! The cache never compiles anything itself. A backend knows how to turn
//! kernel source into a program for a device, how to rebuild a program from a
//! binary it produced earlier, and how to pull that binary back out.

use crate::Result;

/// A kernel compiler and loader for one device family
pub trait CompilerBackend {
    /// Handle identifying the target device (and whatever context it needs)
    type Device;
    /// Live compiled program handed back to callers
    type Program;

    /// Version string of the platform `device` belongs to.
    ///
    /// Hashed into every key, so binaries from an older driver are never reused.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the platform cannot be queried.
    fn platform_version(&self, device: &Self::Device) -> Result<String>;

    /// Compile `source` with compiler options `args`.
    ///
    /// A failed build must be reported as [`crate::Error::Build`] carrying the
    /// compiler's log.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Build`] when the source does not compile, or
    /// [`crate::Error::Backend`] when the driver fails for another reason.
    fn compile(&self, device: &Self::Device, source: &str, args: &str) -> Result<Self::Program>;

    /// Rebuild a program from a binary previously returned by [`Self::extract_binary`].
    ///
    /// Corrupt or incompatible binaries must be rejected with an error rather
    /// than producing an unusable program.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Load`] when the driver refuses the binary.
    fn load_precompiled(&self, device: &Self::Device, binary: &[u8]) -> Result<Self::Program>;

    /// The device binary of a compiled program
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] when the program has no single
    /// non-empty binary.
    fn extract_binary(&self, program: &Self::Program) -> Result<Vec<u8>>;
}
