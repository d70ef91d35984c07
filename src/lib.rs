//! annc - Ahead-of-Time Neural Network Compiler
//!
//! Compiles a textual description of a feed-forward network into a
//! self-contained native module with fully unrolled, shape-specialized
//! tensor code. There is no runtime shape dispatch anywhere in the generated
//! code; specialization is the point.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────┐
//! │   DSL text   │  .module / .input / .hidden / .output / ...
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │      IR      │  validated network record
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │    Layout    │  byte offset of every tensor in one flat arena
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │   Programs   │  INITIALIZE / ACTIVATE / BACKPROP / TRAIN
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │   C source   │  literal offsets, literal loop bounds
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │ cc + dlopen  │  six exported entry points
//! └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use annc::Network;
//!
//! let mut net = Network::open(
//!     "sgd 0.1",
//!     "float",
//!     "cross_entropy",
//!     "1",
//!     "2",
//!     "2 softmax",
//!     &["2 relu"],
//! )
//! .unwrap();
//!
//! let x = [0.5f32, -0.5];
//! let y = net.activate_f32(&x).unwrap();
//! assert_eq!(y.len(), 2);
//! ```
//!
//! The offline surface is also available piecewise: [`dsl::parse_str`] →
//! [`synth::synthesize`] → [`emit::write_files`] produce the specialized
//! source and header without building or loading anything.

#![warn(clippy::all)]

pub mod dsl;
pub mod emit;
pub mod error;
pub mod ir;
pub mod jit;
pub mod layout;
pub mod net;
pub mod program;
pub mod synth;

mod util;

pub use error::{set_debug, Error, Result};
pub use ir::{Activation, CostFn, Ir, IrBuilder, Node, Optimizer, Precision};
pub use jit::NativeModule;
pub use layout::Layout;
pub use net::Network;
pub use program::{Inst, Program, ProgramKind, MAX_PROGRAM_LEN};
pub use synth::{synthesize, Synthesis};

/// Version constant baked into every generated module; `<prefix>_version()`
/// returns it and the driver checks it after loading.
pub const VERSION: i32 = 10;
