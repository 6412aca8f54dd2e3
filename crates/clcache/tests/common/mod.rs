//! Shared test backend for integration tests

#![allow(dead_code)]

use clcache::{CompilerBackend, Error, Result};
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

const MAGIC: &[u8] = b"SCRIPTv1";

/// Install a tracing subscriber that writes through the test harness
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("clcache=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Identifies a simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub u32);

/// A "compiled" kernel: remembers what it was built from and for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedProgram {
    pub device: u32,
    pub args: String,
    pub source: String,
}

impl ScriptedProgram {
    /// Stand-in for executing the kernel: output depends on everything that was compiled in
    pub fn run(&self, input: u32) -> String {
        format!("{}:{}:{}:{}", self.device, self.args, self.source.len(), input)
    }
}

/// In-process compiler with call counters.
///
/// Sources with unbalanced braces fail to build. Binaries carry a magic tag
/// and the device id; a binary for another device is rejected on load.
#[derive(Debug)]
pub struct ScriptedBackend {
    platform_version: String,
    compiles: AtomicUsize,
    loads: AtomicUsize,
    rejected_loads: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(platform_version: impl Into<String>) -> Self {
        Self {
            platform_version: platform_version.into(),
            compiles: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            rejected_loads: AtomicUsize::new(0),
        }
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn rejected_loads(&self) -> usize {
        self.rejected_loads.load(Ordering::SeqCst)
    }

    fn reject(&self, reason: &str) -> Error {
        self.rejected_loads.fetch_add(1, Ordering::SeqCst);
        Error::load(reason)
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new("Scripted CL 3.0 driver 1.2.3")
    }
}

impl CompilerBackend for ScriptedBackend {
    type Device = DeviceId;
    type Program = ScriptedProgram;

    fn platform_version(&self, _device: &DeviceId) -> Result<String> {
        Ok(self.platform_version.clone())
    }

    fn compile(&self, device: &DeviceId, source: &str, args: &str) -> Result<ScriptedProgram> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let mut depth: i64 = 0;
        for (col, ch) in source.chars().enumerate() {
            match ch {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(Error::build(
                    Some("CL_BUILD_ERROR".into()),
                    format!("<source>:1:{}: error: extraneous closing brace ('}}')", col + 1),
                ));
            }
        }
        if depth != 0 {
            return Err(Error::build(
                Some("CL_BUILD_ERROR".into()),
                format!(
                    "<source>:1:{}: error: expected '}}'\n1 error generated.",
                    source.chars().count()
                ),
            ));
        }
        Ok(ScriptedProgram {
            device: device.0,
            args: args.to_string(),
            source: source.to_string(),
        })
    }

    fn load_precompiled(&self, device: &DeviceId, binary: &[u8]) -> Result<ScriptedProgram> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let Some(rest) = binary.strip_prefix(MAGIC) else {
            return Err(self.reject("invalid binary header"));
        };
        if rest.len() < 8 {
            return Err(self.reject("truncated binary"));
        }
        let (head, rest) = rest.split_at(8);
        let built_for = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let args_len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
        if built_for != device.0 {
            return Err(self.reject("binary built for another device"));
        }
        if rest.len() < args_len {
            return Err(self.reject("truncated binary"));
        }
        let (args, source) = rest.split_at(args_len);
        let args = String::from_utf8(args.to_vec()).map_err(|_| self.reject("bad args"))?;
        let source = String::from_utf8(source.to_vec()).map_err(|_| self.reject("bad source"))?;
        Ok(ScriptedProgram {
            device: built_for,
            args,
            source,
        })
    }

    fn extract_binary(&self, program: &ScriptedProgram) -> Result<Vec<u8>> {
        let mut binary = MAGIC.to_vec();
        binary.extend_from_slice(&program.device.to_le_bytes());
        binary.extend_from_slice(&(program.args.len() as u32).to_le_bytes());
        binary.extend_from_slice(program.args.as_bytes());
        binary.extend_from_slice(program.source.as_bytes());
        Ok(binary)
    }
}
