//! Network intermediate representation and its builder.
//!
//! The front end drives [`IrBuilder`] callback-style, one call per DSL
//! directive, and seals the record with [`IrBuilder::finalize`]. The
//! resulting [`Ir`] is read-only for the rest of the pipeline and releases
//! everything it owns on drop.

use crate::error::{err, Result};
use crate::util::valid_ident;

/// Upper bound for `.batch`.
pub const MAX_BATCH: u64 = 1000;

/// Upper bound for any layer size.
pub const MAX_LAYER_SIZE: u64 = 1_000_000;

/// Weight-update strategy for the TRAIN program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimizer {
    /// No updates; TRAIN synthesis rejects this.
    None,
    /// Plain stochastic gradient descent.
    Sgd,
}

/// Numeric representation of every tensor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// 32-bit IEEE.
    Float,
    /// 64-bit IEEE.
    Double,
    /// Fixed point, reserved in the IR but unimplemented downstream.
    Fixed { whole: u32, fraction: u32 },
}

impl Precision {
    /// Bytes per element, when the representation is implemented.
    pub fn unit(&self) -> Option<u64> {
        match self {
            Precision::Float => Some(4),
            Precision::Double => Some(8),
            Precision::Fixed { .. } => None,
        }
    }
}

/// Cost function; only cross-entropy survives synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostFn {
    Quadratic,
    Exponential,
    CrossEntropy,
}

/// Per-layer activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    None,
    Relu,
    Linear,
    Softmax,
    Sigmoid,
}

/// One layer: element count and activation. The input layer's activation is
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub size: u64,
    pub activation: Activation,
}

/// Validated description of the target network.
#[derive(Debug, Clone)]
pub struct Ir {
    pub module: String,
    pub prefix: String,
    pub optimizer: Optimizer,
    pub learning_rate: f64,
    pub precision: Precision,
    pub cost_fn: CostFn,
    pub batch: u64,
    pub cuda: bool,
    /// Input first, hidden layers in declaration order, output last.
    pub nodes: Vec<Node>,
}

impl Ir {
    /// Total layer count, input and output included.
    pub fn layers(&self) -> usize {
        self.nodes.len()
    }

    pub fn input(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn output(&self) -> &Node {
        &self.nodes[self.nodes.len() - 1]
    }
}

/// Accumulates DSL directives into a validated [`Ir`].
///
/// Every setter may be called at most once (`add_hidden` excepted); a second
/// call, or an out-of-range argument, is a syntax error and aborts parsing.
#[derive(Debug, Default)]
pub struct IrBuilder {
    module: Option<String>,
    prefix: Option<String>,
    optimizer: Option<(Optimizer, f64)>,
    precision: Option<Precision>,
    cost_fn: Option<CostFn>,
    batch: Option<u64>,
    cuda: Option<bool>,
    input: Option<Node>,
    output: Option<Node>,
    hidden: Vec<Node>,
}

impl IrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_module(&mut self, s: &str) -> Result<()> {
        if self.module.is_some() {
            return Err(err!(Syntax, "duplicate .module specification"));
        }
        if s.is_empty() || !valid_ident(s) {
            return Err(err!(Syntax, "invalid .module specification '{s}'"));
        }
        self.module = Some(s.to_string());
        Ok(())
    }

    pub fn set_prefix(&mut self, s: &str) -> Result<()> {
        if self.prefix.is_some() {
            return Err(err!(Syntax, "duplicate .prefix specification"));
        }
        if !valid_ident(s) {
            return Err(err!(Syntax, "invalid .prefix specification '{s}'"));
        }
        self.prefix = Some(s.to_string());
        Ok(())
    }

    pub fn set_optimizer(&mut self, optimizer: Optimizer, learning_rate: f64) -> Result<()> {
        if self.optimizer.is_some() {
            return Err(err!(Syntax, "duplicate .optimizer specification"));
        }
        if learning_rate <= 0.0 || learning_rate > 1.0 {
            return Err(err!(
                Syntax,
                "invalid .optimizer learning rate '{learning_rate}'"
            ));
        }
        self.optimizer = Some((optimizer, learning_rate));
        Ok(())
    }

    pub fn set_precision(&mut self, precision: Precision) -> Result<()> {
        if self.precision.is_some() {
            return Err(err!(Syntax, "duplicate .precision specification"));
        }
        if let Precision::Fixed { whole, fraction } = precision {
            if whole < 1 || whole + fraction > 64 {
                return Err(err!(
                    Syntax,
                    "invalid .precision 'fixed [{whole}, {fraction}]'"
                ));
            }
        }
        self.precision = Some(precision);
        Ok(())
    }

    pub fn set_cost_fn(&mut self, cost_fn: CostFn) -> Result<()> {
        if self.cost_fn.is_some() {
            return Err(err!(Syntax, "duplicate .costfnc specification"));
        }
        self.cost_fn = Some(cost_fn);
        Ok(())
    }

    pub fn set_batch(&mut self, batch: u64) -> Result<()> {
        if self.batch.is_some() {
            return Err(err!(Syntax, "duplicate .batch specification"));
        }
        if batch < 1 || batch > MAX_BATCH {
            return Err(err!(Syntax, "invalid .batch specification '{batch}'"));
        }
        self.batch = Some(batch);
        Ok(())
    }

    pub fn set_cuda(&mut self, cuda: bool) -> Result<()> {
        if self.cuda.is_some() {
            return Err(err!(Syntax, "duplicate .cuda specification"));
        }
        self.cuda = Some(cuda);
        Ok(())
    }

    pub fn add_input(&mut self, size: u64) -> Result<()> {
        if self.input.is_some() {
            return Err(err!(Syntax, "duplicate .input specification"));
        }
        check_size(size, ".input")?;
        self.input = Some(Node {
            size,
            activation: Activation::None,
        });
        Ok(())
    }

    pub fn add_output(&mut self, size: u64, activation: Activation) -> Result<()> {
        if self.output.is_some() {
            return Err(err!(Syntax, "duplicate .output specification"));
        }
        check_size(size, ".output")?;
        self.output = Some(Node { size, activation });
        Ok(())
    }

    pub fn add_hidden(&mut self, size: u64, activation: Activation) -> Result<()> {
        check_size(size, ".hidden")?;
        self.hidden.push(Node { size, activation });
        Ok(())
    }

    /// Apply defaults, check completeness, and produce the ordered record.
    pub fn finalize(self) -> Result<Ir> {
        let module = match self.module {
            Some(m) => m,
            None => return Err(err!(Syntax, "missing .module specification")),
        };
        let input = match self.input {
            Some(n) => n,
            None => return Err(err!(Syntax, "missing .input specification")),
        };
        let output = match self.output {
            Some(n) => n,
            None => return Err(err!(Syntax, "missing .output specification")),
        };
        if self.hidden.is_empty() {
            return Err(err!(Syntax, "missing .hidden specification"));
        }
        let (optimizer, learning_rate) = self.optimizer.unwrap_or((Optimizer::Sgd, 0.1));

        let mut nodes = Vec::with_capacity(2 + self.hidden.len());
        nodes.push(input);
        nodes.extend(self.hidden);
        nodes.push(output);

        Ok(Ir {
            module,
            prefix: self.prefix.unwrap_or_else(|| "g".to_string()),
            optimizer,
            learning_rate,
            precision: self.precision.unwrap_or(Precision::Float),
            cost_fn: self.cost_fn.unwrap_or(CostFn::CrossEntropy),
            batch: self.batch.unwrap_or(1),
            cuda: self.cuda.unwrap_or(false),
            nodes,
        })
    }
}

fn check_size(size: u64, what: &str) -> Result<()> {
    if size < 1 || size > MAX_LAYER_SIZE {
        return Err(err!(Syntax, "invalid {what} specification '{size}'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn minimal() -> IrBuilder {
        let mut b = IrBuilder::new();
        b.set_module("mnist").unwrap();
        b.add_input(784).unwrap();
        b.add_output(10, Activation::Softmax).unwrap();
        b.add_hidden(30, Activation::Sigmoid).unwrap();
        b
    }

    #[test]
    fn test_defaults() {
        let ir = minimal().finalize().unwrap();
        assert_eq!(ir.prefix, "g");
        assert_eq!(ir.optimizer, Optimizer::Sgd);
        assert_eq!(ir.learning_rate, 0.1);
        assert_eq!(ir.precision, Precision::Float);
        assert_eq!(ir.cost_fn, CostFn::CrossEntropy);
        assert_eq!(ir.batch, 1);
        assert!(!ir.cuda);
        assert_eq!(ir.layers(), 3);
    }

    #[test]
    fn test_hidden_declaration_order() {
        let mut b = minimal();
        b.add_hidden(20, Activation::Relu).unwrap();
        b.add_hidden(15, Activation::Relu).unwrap();
        let ir = b.finalize().unwrap();
        let sizes: Vec<u64> = ir.nodes.iter().map(|n| n.size).collect();
        assert_eq!(sizes, vec![784, 30, 20, 15, 10]);
    }

    #[test]
    fn test_duplicate_directives_rejected() {
        let mut b = minimal();
        assert!(matches!(b.set_module("again"), Err(Error::Syntax(_))));
        assert!(matches!(b.add_input(1), Err(Error::Syntax(_))));
        assert!(matches!(
            b.add_output(1, Activation::Softmax),
            Err(Error::Syntax(_))
        ));
        b.set_batch(8).unwrap();
        assert!(matches!(b.set_batch(8), Err(Error::Syntax(_))));
    }

    #[test]
    fn test_range_validation() {
        let mut b = IrBuilder::new();
        assert!(b.set_batch(0).is_err());
        assert!(b.set_batch(1001).is_err());
        assert!(b.add_input(0).is_err());
        assert!(b.add_hidden(1_000_001, Activation::Relu).is_err());
        assert!(b.set_optimizer(Optimizer::Sgd, 0.0).is_err());
        assert!(b.set_optimizer(Optimizer::Sgd, 1.5).is_err());
        assert!(b.set_optimizer(Optimizer::Sgd, 1.0).is_ok());
    }

    #[test]
    fn test_fixed_precision_bounds() {
        let mut b = IrBuilder::new();
        assert!(b
            .set_precision(Precision::Fixed {
                whole: 0,
                fraction: 8
            })
            .is_err());
        assert!(b
            .set_precision(Precision::Fixed {
                whole: 33,
                fraction: 32
            })
            .is_err());
        assert!(b
            .set_precision(Precision::Fixed {
                whole: 32,
                fraction: 32
            })
            .is_ok());
    }

    #[test]
    fn test_missing_sections() {
        let mut b = IrBuilder::new();
        b.set_module("m").unwrap();
        b.add_input(2).unwrap();
        b.add_output(2, Activation::Softmax).unwrap();
        assert!(matches!(b.finalize(), Err(Error::Syntax(_))));
    }

    #[test]
    fn test_module_ident_validation() {
        let mut b = IrBuilder::new();
        assert!(b.set_module("").is_err());
        assert!(b.set_module("9lives").is_err());
        assert!(b.set_module("_ok9").is_ok());
        let mut b = IrBuilder::new();
        assert!(b.set_prefix("").is_ok());
    }
}
