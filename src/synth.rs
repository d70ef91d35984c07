//! Program synthesizer.
//!
//! Lowers a validated network description into the four instruction
//! programs. All offsets come from the layout planner; all shape constants
//! are frozen here, which is what lets the emitter produce fully unrolled,
//! shape-specialized code.

use crate::error::{err, Result};
use crate::ir::{Activation, CostFn, Ir, Optimizer, Precision};
use crate::layout::Layout;
use crate::program::{Inst, Program, ProgramKind};

/// Result of lowering: everything the emitter and the facade need.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub module: String,
    pub prefix: String,
    pub precision: Precision,
    pub cuda: bool,
    pub layout: Layout,
    pub initialize: Program,
    pub activate: Program,
    pub backprop: Program,
    pub train: Program,
}

impl Synthesis {
    pub fn program(&self, kind: ProgramKind) -> &Program {
        match kind {
            ProgramKind::Initialize => &self.initialize,
            ProgramKind::Activate => &self.activate,
            ProgramKind::Backprop => &self.backprop,
            ProgramKind::Train => &self.train,
        }
    }

    pub fn programs(&self) -> [&Program; 4] {
        [&self.initialize, &self.activate, &self.backprop, &self.train]
    }
}

/// Lower `ir` into the four programs.
pub fn synthesize(ir: &Ir) -> Result<Synthesis> {
    let layout = Layout::plan(ir)?;
    Ok(Synthesis {
        module: ir.module.clone(),
        prefix: ir.prefix.clone(),
        precision: ir.precision,
        cuda: ir.cuda,
        initialize: lower_initialize(ir, &layout),
        activate: lower_activate(ir, &layout)?,
        backprop: lower_backprop(ir, &layout)?,
        train: lower_train(ir, &layout)?,
        layout,
    })
}

/// INITIALIZE: for each layer, fill the weights with uniform samples and
/// zero the biases.
///
/// The sampling operands are kept exactly as the classic formulation
/// computes them: `lo = (-6/(n+m)) * 1` and `span = (+6/(n+m)) * 2`, with
/// generated code drawing `lo + u * span`.
fn lower_initialize(ir: &Ir, layout: &Layout) -> Program {
    let mut p = Program::new(ProgramKind::Initialize);
    p.push(Inst::Ret);
    for l in 1..ir.layers() {
        let n = ir.nodes[l].size;
        let m = ir.nodes[l - 1].size;
        let half = 6.0 / ((n + m) as f64);
        p.push(Inst::Random {
            dst: layout.w[l],
            lo: -half,
            span: 2.0 * half,
            len: n * m,
        });
        p.push(Inst::Clear {
            dst: layout.b[l],
            len: n,
        });
    }
    p
}

/// ACTIVATE: copy the input into `a[0]`, then per layer
/// `a[l] = activation(w[l] * a[l-1] + b[l])`, returning `a[L-1]`.
fn lower_activate(ir: &Ir, layout: &Layout) -> Result<Program> {
    let mut p = Program::new(ProgramKind::Activate);
    let last = ir.layers() - 1;
    p.push(Inst::RetArg {
        src: layout.act[last],
    });
    p.push(Inst::CopyX {
        dst: layout.act[0],
        len: ir.nodes[0].size,
    });
    for l in 1..ir.layers() {
        let n = ir.nodes[l].size;
        let m = ir.nodes[l - 1].size;
        p.push(Inst::Mac1 {
            dst: layout.act[l],
            mat: layout.w[l],
            vec: layout.act[l - 1],
            rows: n,
            cols: m,
        });
        p.push(Inst::Add {
            dst: layout.act[l],
            src: layout.b[l],
            len: n,
        });
        let dst = layout.act[l];
        p.push(match ir.nodes[l].activation {
            Activation::Relu => Inst::Relu { dst, len: n },
            Activation::Linear => Inst::Linear { dst, len: n },
            Activation::Softmax => Inst::Softmax { dst, len: n },
            Activation::Sigmoid => Inst::Sigmoid { dst, len: n },
            Activation::None => {
                return Err(err!(
                    Software,
                    "layer {l} has no activation function"
                ));
            }
        });
    }
    Ok(p)
}

/// BACKPROP: seed the output delta with the cross-entropy + softmax fusion
/// `d[L-1] = a[L-1] - y`, walk the deltas back through the hidden layers,
/// then accumulate bias and weight gradients.
fn lower_backprop(ir: &Ir, layout: &Layout) -> Result<Program> {
    let mut p = Program::new(ProgramKind::Backprop);
    p.push(Inst::Ret);

    let mut l = ir.layers() - 1;
    let n = ir.nodes[l].size;
    if ir.cost_fn != CostFn::CrossEntropy || ir.nodes[l].activation != Activation::Softmax {
        // The initial delta is only this simple for the fused pair; anything
        // else must be refused rather than miscompiled.
        return Err(err!(
            Software,
            "only the cross_entropy cost function with softmax output is supported"
        ));
    }
    p.push(Inst::SubY {
        dst: layout.delta[l],
        src: layout.act[l],
        len: n,
    });

    while l > 1 {
        let n = ir.nodes[l].size;
        let m = ir.nodes[l - 1].size;
        let wit = layout.act[l - 1];
        let dst = layout.delta[l - 1];
        let deriv = match ir.nodes[l - 1].activation {
            Activation::Relu => Inst::ReluD { dst, wit, len: m },
            Activation::Sigmoid => Inst::SigmoidD { dst, wit, len: m },
            other => {
                return Err(err!(
                    Software,
                    "{other:?} activation is not supported for hidden layers"
                ));
            }
        };
        p.push(Inst::Mac2 {
            dst,
            mat: layout.w[l],
            vec: layout.delta[l],
            rows: n,
            cols: m,
        });
        p.push(deriv);
        l -= 1;
    }

    for l in 1..ir.layers() {
        let n = ir.nodes[l].size;
        let m = ir.nodes[l - 1].size;
        p.push(Inst::Add {
            dst: layout.grad_b[l],
            src: layout.delta[l],
            len: n,
        });
        p.push(Inst::Mac3 {
            dst: layout.grad_w[l],
            row: layout.delta[l],
            col: layout.act[l - 1],
            rows: n,
            cols: m,
        });
    }
    Ok(p)
}

/// TRAIN: clear the gradient accumulators (one contiguous region by
/// construction), run the batch loop, then apply the SGD step
/// `p += (-eta/k) * grad_p` to every parameter tensor.
fn lower_train(ir: &Ir, layout: &Layout) -> Result<Program> {
    let mut p = Program::new(ProgramKind::Train);
    p.push(Inst::Ret);

    if ir.optimizer != Optimizer::Sgd {
        return Err(err!(Software, "only the sgd optimizer is supported"));
    }

    let mut grads = 0u64;
    for l in 1..ir.layers() {
        let n = ir.nodes[l].size;
        let m = ir.nodes[l - 1].size;
        grads += n * m + n;
    }
    p.push(Inst::Clear {
        dst: layout.grad_w[1],
        len: grads,
    });

    let last = ir.layers() - 1;
    p.push(Inst::BatchLoop {
        count: ir.batch,
        stride_x: ir.nodes[0].size,
        stride_y: ir.nodes[last].size,
    });

    let scale = -(ir.learning_rate / ir.batch as f64);
    for l in 1..ir.layers() {
        let n = ir.nodes[l].size;
        let m = ir.nodes[l - 1].size;
        p.push(Inst::Mac4 {
            dst: layout.w[l],
            src: layout.grad_w[l],
            scale,
            len: n * m,
        });
        p.push(Inst::Mac4 {
            dst: layout.b[l],
            src: layout.grad_b[l],
            scale,
            len: n,
        });
    }
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse_str;
    use crate::error::Error;

    fn tiny() -> Ir {
        parse_str(
            r#"
            .module "tiny" ;
            .optimizer sgd 0.1 ;
            .input 2 ;
            .hidden 2 relu ;
            .output 2 softmax ;
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_program_tails() {
        let s = synthesize(&tiny()).unwrap();
        assert_eq!(s.initialize.tail(), &Inst::Ret);
        assert_eq!(s.backprop.tail(), &Inst::Ret);
        assert_eq!(s.train.tail(), &Inst::Ret);
        assert_eq!(
            s.activate.tail(),
            &Inst::RetArg {
                src: s.layout.act[2]
            }
        );
    }

    #[test]
    fn test_initialize_shape() {
        let s = synthesize(&tiny()).unwrap();
        // Per layer: RANDOM weights then CLEAR biases.
        let body = s.initialize.body();
        assert_eq!(body.len(), 4);
        match body[0] {
            Inst::Random { dst, lo, span, len } => {
                assert_eq!(dst, s.layout.w[1]);
                assert_eq!(len, 4);
                assert!((lo - (-1.5)).abs() < 1e-12);
                assert!((span - 3.0).abs() < 1e-12);
            }
            other => panic!("expected RANDOM, got {other:?}"),
        }
        assert_eq!(
            body[1],
            Inst::Clear {
                dst: s.layout.b[1],
                len: 2
            }
        );
    }

    #[test]
    fn test_activate_sequence() {
        let s = synthesize(&tiny()).unwrap();
        let body = s.activate.body();
        assert_eq!(body[0].mnemonic(), "COPYX");
        let names: Vec<&str> = body.iter().map(|i| i.mnemonic()).collect();
        assert_eq!(
            names,
            vec!["COPYX", "MAC1", "ADD", "RELU", "MAC1", "ADD", "SOFTMAX"]
        );
    }

    #[test]
    fn test_backprop_sequence() {
        let s = synthesize(&tiny()).unwrap();
        let names: Vec<&str> = s.backprop.body().iter().map(|i| i.mnemonic()).collect();
        assert_eq!(
            names,
            vec!["SUBY", "MAC2", "RELUD", "ADD", "MAC3", "ADD", "MAC3"]
        );
    }

    #[test]
    fn test_train_sequence_and_scale() {
        let ir = parse_str(
            r#"
            .module "m" ;
            .optimizer sgd 0.5 ;
            .batch 5 ;
            .input 2 ;
            .hidden 3 relu ;
            .output 2 softmax ;
        "#,
        )
        .unwrap();
        let s = synthesize(&ir).unwrap();
        let body = s.train.body();
        assert_eq!(body[0], Inst::Clear { dst: s.layout.grad_w[1], len: 3 * 2 + 3 + 2 * 3 + 2 });
        assert_eq!(
            body[1],
            Inst::BatchLoop {
                count: 5,
                stride_x: 2,
                stride_y: 2
            }
        );
        match body[2] {
            Inst::Mac4 { scale, .. } => assert!((scale - (-0.1)).abs() < 1e-12),
            other => panic!("expected MAC4, got {other:?}"),
        }
    }

    #[test]
    fn test_hidden_softmax_rejected() {
        let ir = parse_str(
            r#"
            .module "m" ;
            .input 2 ;
            .hidden 2 softmax ;
            .output 2 softmax ;
        "#,
        )
        .unwrap();
        assert!(matches!(synthesize(&ir), Err(Error::Software(_))));
    }

    #[test]
    fn test_hidden_linear_rejected() {
        let ir = parse_str(
            r#"
            .module "m" ;
            .input 2 ;
            .hidden 2 linear ;
            .output 2 softmax ;
        "#,
        )
        .unwrap();
        assert!(matches!(synthesize(&ir), Err(Error::Software(_))));
    }

    #[test]
    fn test_non_softmax_output_rejected() {
        let ir = parse_str(
            r#"
            .module "m" ;
            .input 2 ;
            .hidden 2 relu ;
            .output 2 sigmoid ;
        "#,
        )
        .unwrap();
        assert!(matches!(synthesize(&ir), Err(Error::Software(_))));
    }

    #[test]
    fn test_non_cross_entropy_rejected() {
        let ir = parse_str(
            r#"
            .module "m" ;
            .costfnc quadratic ;
            .input 2 ;
            .hidden 2 relu ;
            .output 2 softmax ;
        "#,
        )
        .unwrap();
        assert!(matches!(synthesize(&ir), Err(Error::Software(_))));
    }

    #[test]
    fn test_optimizer_none_rejected() {
        let ir = parse_str(
            r#"
            .module "m" ;
            .optimizer none ;
            .input 2 ;
            .hidden 2 relu ;
            .output 2 softmax ;
        "#,
        )
        .unwrap();
        assert!(matches!(synthesize(&ir), Err(Error::Software(_))));
    }

    #[test]
    fn test_opcode_set_is_closed() {
        // Only table opcodes appear; reserved derivatives never do.
        let s = synthesize(&tiny()).unwrap();
        for prog in s.programs() {
            for inst in prog.iter() {
                assert!(!matches!(
                    inst,
                    Inst::LinearD { .. } | Inst::SoftmaxD { .. }
                ));
            }
        }
    }
}
