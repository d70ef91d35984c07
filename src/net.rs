//! Network facade.
//!
//! Orchestrates the whole pipeline behind one handle: writes a specification
//! from the caller's strings, compiles and loads the module, owns the tensor
//! arena, and forwards `activate`/`train` to the resolved entry points.
//!
//! The generated `RANDOM` instruction draws from the C library PRNG, which
//! is process-global state; seed it with `libc::srand` before
//! [`Network::open`] (and before each epoch) when deterministic replay
//! matters. The facade never seeds it.

use std::ffi::c_void;
use std::fs;

use crate::dsl;
use crate::emit;
use crate::error::{err, Result};
use crate::ir::Precision;
use crate::jit::NativeModule;
use crate::synth::synthesize;
use crate::util::{temp_dir, temp_tag, TempPath};

/// Most hidden layers one network may declare through the facade.
pub const MAX_HIDDEN: usize = 10;

/// A compiled, loaded network together with its tensor arena.
#[derive(Debug)]
pub struct Network {
    module: NativeModule,
    /// 64-bit words so that every unit-multiple byte offset inside is
    /// validly aligned for the generated float/double aliases.
    arena: Vec<u64>,
    size: usize,
    unit: usize,
    batch: usize,
    n_in: usize,
    n_out: usize,
    precision: Precision,
}

impl Network {
    /// Compile and load a network.
    ///
    /// Arguments are the DSL right-hand sides, e.g. `open("sgd 0.1",
    /// "float", "cross_entropy", "8", "784", "10 softmax", &["30 sigmoid"])`.
    /// The facade writes the specification with a fresh anonymous module
    /// name and an empty prefix, so the emitted entry points are
    /// `_version`, `_memory_size`, `_memory_hard`, `_initialize`,
    /// `_activate` and `_train`.
    pub fn open(
        optimizer: &str,
        precision: &str,
        cost_fn: &str,
        batch: &str,
        input: &str,
        output: &str,
        hidden: &[&str],
    ) -> Result<Self> {
        for (name, value) in [
            ("optimizer", optimizer),
            ("precision", precision),
            ("costfnc", cost_fn),
            ("batch", batch),
            ("input", input),
            ("output", output),
        ] {
            if value.is_empty() {
                return Err(err!(Argument, "empty {name} argument"));
            }
        }
        if hidden.is_empty() {
            return Err(err!(Argument, "at least one hidden layer is required"));
        }
        if hidden.len() > MAX_HIDDEN {
            return Err(err!(Argument, "more than {MAX_HIDDEN} hidden layers"));
        }

        let tmp = temp_dir();
        let tag = temp_tag();

        let mut text = format!(
            ".module \"_{tag}_\" ;\n.prefix \"\" ;\n.optimizer {optimizer} ;\n.precision {precision} ;\n.costfnc {cost_fn} ;\n.batch {batch} ;\n.input {input} ;\n.output {output} ;\n"
        );
        for h in hidden {
            text.push_str(&format!(".hidden {h} ;\n"));
        }
        let spec = TempPath::new(tmp.join(format!("_{tag}_.g")));
        fs::write(spec.path(), text)
            .map_err(|e| err!(File, "unable to write '{}': {e}", spec.path().display()))?;

        let ir = dsl::parse_file(spec.path())?;
        let syn = synthesize(&ir)?;
        let (src, hdr) = emit::write_files(&syn, &tmp)?;
        let src = TempPath::new(src);
        let _hdr = TempPath::new(hdr);
        let module = NativeModule::open(src.path(), &syn.prefix)?;

        let size = module.memory_size();
        let words = (size + 7) / 8;
        let mut arena: Vec<u64> = Vec::new();
        arena
            .try_reserve_exact(words)
            .map_err(|_| err!(Memory, "unable to allocate {size} arena bytes"))?;
        arena.resize(words, 0);

        let unit = syn.layout.unit as usize;
        let mut net = Network {
            module,
            arena,
            size,
            unit,
            batch: ir.batch as usize,
            n_in: ir.input().size as usize,
            n_out: ir.output().size as usize,
            precision: ir.precision,
        };
        let ptr = net.arena_ptr();
        unsafe { net.module.initialize(ptr) };
        Ok(net)
    }

    fn arena_ptr(&mut self) -> *mut c_void {
        self.arena.as_mut_ptr() as *mut c_void
    }

    /// Version constant baked into the loaded module.
    pub fn version(&self) -> i32 {
        self.module.version()
    }

    /// Full arena size in bytes.
    pub fn memory_size(&self) -> usize {
        self.module.memory_size()
    }

    /// Parameter-only byte size.
    pub fn memory_hard(&self) -> usize {
        self.module.memory_hard()
    }

    /// The whole arena as bytes.
    pub fn memory(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.arena)[..self.size]
    }

    /// The leading parameter-only region: persist this to save a trained
    /// model.
    pub fn memory_hard_bytes(&self) -> &[u8] {
        &self.memory()[..self.memory_hard()]
    }

    /// Run the forward pass over one input vector of `unit * n_in` bytes.
    ///
    /// The returned output activation vector aliases the arena and is valid
    /// until the next call on this network.
    pub fn activate(&mut self, x: &[u8]) -> Result<&[u8]> {
        let want = self.unit * self.n_in;
        if x.len() != want {
            return Err(err!(
                Argument,
                "input is {} bytes, expected {want}",
                x.len()
            ));
        }
        let ptr = self.arena_ptr();
        let out = unsafe { self.module.activate(ptr, x.as_ptr() as *const c_void) };
        Ok(unsafe { std::slice::from_raw_parts(out as *const u8, self.unit * self.n_out) })
    }

    /// Run one training step over a full batch: `x` holds `batch` input
    /// vectors back to back, `y` the matching label vectors.
    pub fn train(&mut self, x: &[u8], y: &[u8]) -> Result<()> {
        let want_x = self.unit * self.batch * self.n_in;
        let want_y = self.unit * self.batch * self.n_out;
        if x.len() != want_x {
            return Err(err!(
                Argument,
                "input batch is {} bytes, expected {want_x}",
                x.len()
            ));
        }
        if y.len() != want_y {
            return Err(err!(
                Argument,
                "label batch is {} bytes, expected {want_y}",
                y.len()
            ));
        }
        let ptr = self.arena_ptr();
        unsafe {
            self.module.train(
                ptr,
                x.as_ptr() as *const c_void,
                y.as_ptr() as *const c_void,
            );
        }
        Ok(())
    }

    /// Typed forward pass for `float` modules.
    pub fn activate_f32(&mut self, x: &[f32]) -> Result<&[f32]> {
        if self.precision != Precision::Float {
            return Err(err!(Argument, "module element type is not float"));
        }
        let out = self.activate(bytemuck::cast_slice(x))?;
        Ok(bytemuck::cast_slice(out))
    }

    /// Typed training step for `float` modules.
    pub fn train_f32(&mut self, x: &[f32], y: &[f32]) -> Result<()> {
        if self.precision != Precision::Float {
            return Err(err!(Argument, "module element type is not float"));
        }
        self.train(bytemuck::cast_slice(x), bytemuck::cast_slice(y))
    }

    /// Typed forward pass for `double` modules.
    pub fn activate_f64(&mut self, x: &[f64]) -> Result<&[f64]> {
        if self.precision != Precision::Double {
            return Err(err!(Argument, "module element type is not double"));
        }
        let out = self.activate(bytemuck::cast_slice(x))?;
        Ok(bytemuck::cast_slice(out))
    }

    /// Typed training step for `double` modules.
    pub fn train_f64(&mut self, x: &[f64], y: &[f64]) -> Result<()> {
        if self.precision != Precision::Double {
            return Err(err!(Argument, "module element type is not double"));
        }
        self.train(bytemuck::cast_slice(x), bytemuck::cast_slice(y))
    }
}
