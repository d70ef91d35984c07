//! Arena layout planner.
//!
//! Assigns every tensor of the network a byte offset inside one flat memory
//! arena, in a single pass:
//!
//! ```text
//! | w[1] b[1] .. w[L-1] b[L-1] | gw[1] gb[1] .. gw[L-1] gb[L-1] | a[0] a[1] d[1] .. a[L-1] d[L-1] |
//! '------ hard (parameters) --'
//! ```
//!
//! Offsets are multiples of the element size because every region length is.
//! `hard` is the byte size of the parameter-only region, which is what must
//! be persisted to save a trained model.

use crate::error::{err, Result};
use crate::ir::Ir;

/// Byte offsets of every tensor, plus the arena totals.
///
/// Index vectors have one entry per layer; layer 0 carries no weights,
/// biases, gradients or deltas, so those entries are unused and remain 0.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Bytes per element (4 for float, 8 for double).
    pub unit: u64,
    /// Weight matrices, `n_l x n_{l-1}` row-major.
    pub w: Vec<u64>,
    /// Bias vectors, length `n_l`.
    pub b: Vec<u64>,
    /// Weight-gradient accumulators, same shape as `w`.
    pub grad_w: Vec<u64>,
    /// Bias-gradient accumulators, same shape as `b`.
    pub grad_b: Vec<u64>,
    /// Forward activation vectors, length `n_l`, present for every layer.
    pub act: Vec<u64>,
    /// Delta vectors, length `n_l`, present for layers `l >= 1`.
    pub delta: Vec<u64>,
    /// Full arena size in bytes.
    pub size: u64,
    /// Parameter-only byte size.
    pub hard: u64,
}

impl Layout {
    /// Plan the arena for a validated network description.
    pub fn plan(ir: &Ir) -> Result<Self> {
        let unit = match ir.precision.unit() {
            Some(u) => u,
            None => {
                return Err(err!(
                    Software,
                    "fixed-point precision is not implemented"
                ));
            }
        };
        let layers = ir.layers();
        let mut layout = Layout {
            unit,
            w: vec![0; layers],
            b: vec![0; layers],
            grad_w: vec![0; layers],
            grad_b: vec![0; layers],
            act: vec![0; layers],
            delta: vec![0; layers],
            size: 0,
            hard: 0,
        };
        for l in 1..layers {
            let n = ir.nodes[l].size;
            let m = ir.nodes[l - 1].size;
            layout.w[l] = layout.size;
            layout.size += unit * n * m;
            layout.b[l] = layout.size;
            layout.size += unit * n;
        }
        layout.hard = layout.size;
        for l in 1..layers {
            let n = ir.nodes[l].size;
            let m = ir.nodes[l - 1].size;
            layout.grad_w[l] = layout.size;
            layout.size += unit * n * m;
            layout.grad_b[l] = layout.size;
            layout.size += unit * n;
        }
        for l in 0..layers {
            let n = ir.nodes[l].size;
            layout.act[l] = layout.size;
            layout.size += unit * n;
            if l > 0 {
                layout.delta[l] = layout.size;
                layout.size += unit * n;
            }
        }
        Ok(layout)
    }
}
