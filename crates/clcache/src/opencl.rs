//! OpenCL compiler backend
//!
//! Builds programs through the `ocl` crate. Device selection is left to the
//! caller: pick a platform and device, then wrap them in an [`OpenClDevice`].

use crate::backend::CompilerBackend;
use crate::{Error, Result};
use ocl::core::{ProgramInfo, ProgramInfoResult};
use ocl::{Context, Device, Platform, Program};

/// A device together with the context programs are created in
#[derive(Debug, Clone)]
pub struct OpenClDevice {
    platform: Platform,
    device: Device,
    context: Context,
}

impl OpenClDevice {
    /// Create a single-device context for `device` on `platform`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backend`] when the context cannot be created.
    pub fn new(platform: Platform, device: Device) -> Result<Self> {
        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(|e| Error::backend(format!("failed to create OpenCL context: {e}")))?;
        Ok(Self::with_context(platform, device, context))
    }

    /// Use an existing context that includes `device`
    #[must_use]
    pub fn with_context(platform: Platform, device: Device, context: Context) -> Self {
        Self {
            platform,
            device,
            context,
        }
    }

    /// The platform the device belongs to
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// The device programs are built for
    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// The context programs are created in
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }
}

/// [`CompilerBackend`] for OpenCL devices
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClBackend;

impl CompilerBackend for OpenClBackend {
    type Device = OpenClDevice;
    type Program = Program;

    fn platform_version(&self, device: &OpenClDevice) -> Result<String> {
        device
            .platform
            .version()
            .map_err(|e| Error::backend(format!("failed to query platform version: {e}")))
    }

    fn compile(&self, device: &OpenClDevice, source: &str, args: &str) -> Result<Program> {
        // ocl folds the program build log into the error it returns
        Program::builder()
            .src(source)
            .devices(device.device)
            .cmplr_opt(args)
            .build(&device.context)
            .map_err(|e| build_failure(&e))
    }

    fn load_precompiled(&self, device: &OpenClDevice, binary: &[u8]) -> Result<Program> {
        Program::builder()
            .binaries(&[binary])
            .devices(device.device)
            .build(&device.context)
            .map_err(|e| Error::load(e.to_string()))
    }

    fn extract_binary(&self, program: &Program) -> Result<Vec<u8>> {
        let info = ocl::core::get_program_info(program.as_core(), ProgramInfo::Binaries)
            .map_err(|e| Error::backend(format!("failed to read program binary: {e}")))?;

        let ProgramInfoResult::Binaries(binaries) = info else {
            return Err(Error::backend("unexpected program info result"));
        };
        let mut binaries = binaries.into_iter();
        match (binaries.next(), binaries.next()) {
            (Some(binary), None) if !binary.is_empty() => Ok(binary),
            (Some(_), None) => Err(Error::backend("program binary is empty")),
            (None, _) => Err(Error::backend("program has no binary")),
            (Some(_), Some(_)) => Err(Error::backend(
                "program was built for more than one device",
            )),
        }
    }
}

/// Build error carrying the OpenCL status code when `ocl` reports one
fn build_failure(err: &ocl::Error) -> Error {
    let status = err.api_status().map(|status| format!("{status:?}"));
    Error::build(status, err.to_string())
}
