//! Build-and-load driver.
//!
//! Hands emitted source to the native C toolchain, loads the resulting
//! shared object into the process, and resolves the exported entry points.
//! The artifact file is unlinked immediately after loading; the mapped image
//! stays valid until the driver is dropped.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::process::Command;

use libloading::{Library, Symbol};

use crate::error::{err, Result};
use crate::util::{temp_dir, temp_tag, TempPath};
use crate::VERSION;

type VersionFn = unsafe extern "C" fn() -> c_int;
type MemorySizeFn = unsafe extern "C" fn() -> usize;
type MemoryHardFn = unsafe extern "C" fn() -> usize;
type InitializeFn = unsafe extern "C" fn(*mut c_void);
type ActivateFn = unsafe extern "C" fn(*mut c_void, *const c_void) -> *mut c_void;
type TrainFn = unsafe extern "C" fn(*mut c_void, *const c_void, *const c_void);

/// A compiled, loaded and resolved network module.
#[derive(Debug)]
pub struct NativeModule {
    version: VersionFn,
    memory_size: MemorySizeFn,
    memory_hard: MemoryHardFn,
    initialize: InitializeFn,
    activate: ActivateFn,
    train: TrainFn,
    /// Keeps the image mapped for as long as the resolved pointers live.
    _lib: Library,
}

impl NativeModule {
    /// Compile `source` and load the result.
    ///
    /// `prefix` must match the `.prefix` the module was emitted with; the
    /// six exported symbols are resolved eagerly. A missing symbol or a
    /// version mismatch means the pipeline emitted something other than what
    /// it believes it emitted, and panics.
    pub fn open(source: &Path, prefix: &str) -> Result<Self> {
        let artifact = TempPath::new(temp_dir().join(format!("_{}_.so", temp_tag())));
        compile(source, artifact.path())?;
        let lib = load(artifact.path())?;
        drop(artifact);

        let version = unsafe { *resolve::<VersionFn>(&lib, prefix, "version") };
        let memory_size = unsafe { *resolve::<MemorySizeFn>(&lib, prefix, "memory_size") };
        let memory_hard = unsafe { *resolve::<MemoryHardFn>(&lib, prefix, "memory_hard") };
        let initialize = unsafe { *resolve::<InitializeFn>(&lib, prefix, "initialize") };
        let activate = unsafe { *resolve::<ActivateFn>(&lib, prefix, "activate") };
        let train = unsafe { *resolve::<TrainFn>(&lib, prefix, "train") };
        let module = NativeModule {
            version,
            memory_size,
            memory_hard,
            initialize,
            activate,
            train,
            _lib: lib,
        };
        let got = module.version();
        assert!(
            got == VERSION,
            "loaded module reports version {got}, expected {VERSION}"
        );
        Ok(module)
    }

    pub fn version(&self) -> i32 {
        unsafe { (self.version)() }
    }

    pub fn memory_size(&self) -> usize {
        unsafe { (self.memory_size)() }
    }

    pub fn memory_hard(&self) -> usize {
        unsafe { (self.memory_hard)() }
    }

    /// # Safety
    ///
    /// `m` must point to a zeroed arena of at least `memory_size()` bytes,
    /// aligned for the module's element type.
    pub unsafe fn initialize(&self, m: *mut c_void) {
        (self.initialize)(m)
    }

    /// # Safety
    ///
    /// `m` as for [`NativeModule::initialize`]; `x` must hold one input
    /// vector in the module's element type. The returned pointer aliases the
    /// arena and is only valid until the next call into the module.
    pub unsafe fn activate(&self, m: *mut c_void, x: *const c_void) -> *mut c_void {
        (self.activate)(m, x)
    }

    /// # Safety
    ///
    /// `m` as for [`NativeModule::initialize`]; `x` and `y` must hold one
    /// batch of inputs and labels in the module's element type.
    pub unsafe fn train(&self, m: *mut c_void, x: *const c_void, y: *const c_void) {
        (self.train)(m, x, y)
    }
}

/// Resolve the toolchain binary: `$CC`, else `cc` on the path, else the
/// conventional location.
fn toolchain() -> PathBuf {
    if let Ok(cc) = std::env::var("CC") {
        if !cc.is_empty() {
            return PathBuf::from(cc);
        }
    }
    which::which("cc").unwrap_or_else(|_| PathBuf::from("/usr/bin/cc"))
}

/// Compile `input` into a position-independent shared object at `output`.
fn compile(input: &Path, output: &Path) -> Result<()> {
    let status = Command::new(toolchain())
        .args([
            "-ansi",
            "-pedantic",
            "-Wshadow",
            "-Wall",
            "-Wextra",
            "-Werror",
            "-Wfatal-errors",
            "-fPIC",
            "-O3",
            "-shared",
        ])
        .arg(input)
        .arg("-o")
        .arg(output)
        .status()
        .map_err(|e| err!(System, "unable to run the C toolchain: {e}"))?;
    if !status.success() {
        return Err(err!(Jitc, "C toolchain failed with {status}"));
    }
    Ok(())
}

#[cfg(unix)]
fn load(path: &Path) -> Result<Library> {
    use libloading::os::unix;
    let lib = unsafe { unix::Library::open(Some(path), libc::RTLD_LAZY | libc::RTLD_LOCAL) }
        .map_err(|e| err!(Jitc, "unable to load '{}': {e}", path.display()))?;
    Ok(lib.into())
}

#[cfg(not(unix))]
fn load(path: &Path) -> Result<Library> {
    unsafe { Library::new(path) }
        .map_err(|e| err!(Jitc, "unable to load '{}': {e}", path.display()))
}

unsafe fn resolve<'a, T>(lib: &'a Library, prefix: &str, name: &str) -> Symbol<'a, T> {
    let symbol = format!("{prefix}_{name}\0");
    lib.get(symbol.as_bytes())
        .unwrap_or_else(|e| panic!("missing export '{prefix}_{name}': {e}"))
}
