//! Line-oriented DSL front end.
//!
//! A specification is a sequence of `;`-terminated directives:
//!
//! ```text
//! .module "mnist" ;
//! .optimizer sgd 0.1 ;
//! .precision float ;
//! .costfnc cross_entropy ;
//! .batch 8 ;
//! .input 784 ;
//! .hidden 30 sigmoid ;
//! .output 10 softmax ;
//! ```
//!
//! Keywords are case-insensitive; module and prefix names are quoted
//! identifiers. The parser drives the [`IrBuilder`] callbacks and surfaces
//! the builder's first error.

use std::fs;
use std::path::Path;

use crate::error::{err, Result};
use crate::ir::{Activation, CostFn, Ir, IrBuilder, Optimizer, Precision};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// Bare word (directive, keyword, or number).
    Word(String),
    /// Double-quoted string, quotes stripped.
    Str(String),
    /// Statement terminator.
    Semi,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut toks = Vec::new();
    let mut line = 1usize;
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            ';' => {
                chars.next();
                toks.push(Token {
                    tok: Tok::Semi,
                    line,
                });
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\n') | None => {
                            return Err(err!(Syntax, "line {line}: unterminated string"));
                        }
                        Some(c) => s.push(c),
                    }
                }
                toks.push(Token {
                    tok: Tok::Str(s),
                    line,
                });
            }
            _ => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == ';' || c == '"' {
                        break;
                    }
                    s.push(c);
                    chars.next();
                }
                toks.push(Token {
                    tok: Tok::Word(s),
                    line,
                });
            }
        }
    }
    Ok(toks)
}

/// Parse a full specification into a validated [`Ir`].
pub fn parse_str(src: &str) -> Result<Ir> {
    let toks = tokenize(src)?;
    let mut builder = IrBuilder::new();
    let mut stmt: Vec<Token> = Vec::new();
    for t in toks {
        if t.tok == Tok::Semi {
            if !stmt.is_empty() {
                directive(&mut builder, &stmt)?;
                stmt.clear();
            }
            continue;
        }
        stmt.push(t);
    }
    if let Some(t) = stmt.first() {
        return Err(err!(Syntax, "line {}: missing ';'", t.line));
    }
    builder.finalize()
}

/// Read and parse a specification file.
pub fn parse_file(path: &Path) -> Result<Ir> {
    let src = fs::read_to_string(path)
        .map_err(|e| err!(File, "unable to read '{}': {e}", path.display()))?;
    parse_str(&src)
}

fn directive(builder: &mut IrBuilder, stmt: &[Token]) -> Result<()> {
    let line = stmt[0].line;
    let head = match &stmt[0].tok {
        Tok::Word(w) => w.to_ascii_lowercase(),
        Tok::Str(_) => return Err(err!(Syntax, "line {line}: expected directive")),
        Tok::Semi => unreachable!(),
    };
    let args = &stmt[1..];
    match head.as_str() {
        ".module" => builder.set_module(&one_str(args, line, ".module")?),
        ".prefix" => builder.set_prefix(&one_str(args, line, ".prefix")?),
        ".optimizer" => {
            let (kind, rest) = keyword(args, line, ".optimizer")?;
            match kind.as_str() {
                "none" => {
                    expect_empty(rest, line)?;
                    builder.set_optimizer(Optimizer::None, 0.1)
                }
                "sgd" => {
                    let rate = one_real(rest, line, ".optimizer sgd")?;
                    builder.set_optimizer(Optimizer::Sgd, rate)
                }
                other => Err(err!(Syntax, "line {line}: unknown optimizer '{other}'")),
            }
        }
        ".precision" => {
            let (kind, rest) = keyword(args, line, ".precision")?;
            match kind.as_str() {
                "float" => {
                    expect_empty(rest, line)?;
                    builder.set_precision(Precision::Float)
                }
                "double" => {
                    expect_empty(rest, line)?;
                    builder.set_precision(Precision::Double)
                }
                "fixed" => {
                    let (whole, fraction) = two_ints(rest, line, ".precision fixed")?;
                    if whole > 64 || fraction > 64 {
                        return Err(err!(
                            Syntax,
                            "line {line}: invalid .precision 'fixed [{whole}, {fraction}]'"
                        ));
                    }
                    builder.set_precision(Precision::Fixed {
                        whole: whole as u32,
                        fraction: fraction as u32,
                    })
                }
                other => Err(err!(Syntax, "line {line}: unknown precision '{other}'")),
            }
        }
        ".costfnc" => {
            let (kind, rest) = keyword(args, line, ".costfnc")?;
            expect_empty(rest, line)?;
            let cost = match kind.as_str() {
                "quadratic" => CostFn::Quadratic,
                "exponential" => CostFn::Exponential,
                "cross_entropy" => CostFn::CrossEntropy,
                other => {
                    return Err(err!(Syntax, "line {line}: unknown cost function '{other}'"));
                }
            };
            builder.set_cost_fn(cost)
        }
        ".batch" => builder.set_batch(one_int(args, line, ".batch")?),
        ".input" => builder.add_input(one_int(args, line, ".input")?),
        ".output" => {
            let (size, act) = size_and_activation(args, line, ".output")?;
            builder.add_output(size, act)
        }
        ".hidden" => {
            let (size, act) = size_and_activation(args, line, ".hidden")?;
            builder.add_hidden(size, act)
        }
        ".cuda" => {
            let v = one_int(args, line, ".cuda")?;
            if v > 1 {
                return Err(err!(Syntax, "line {line}: invalid .cuda specification '{v}'"));
            }
            builder.set_cuda(v == 1)
        }
        other => Err(err!(Syntax, "line {line}: unknown directive '{other}'")),
    }
}

fn word(t: &Token) -> Result<String> {
    match &t.tok {
        Tok::Word(w) => Ok(w.to_ascii_lowercase()),
        _ => Err(err!(Syntax, "line {}: unexpected token", t.line)),
    }
}

fn keyword<'a>(args: &'a [Token], line: usize, what: &str) -> Result<(String, &'a [Token])> {
    match args.first() {
        Some(t) => Ok((word(t)?, &args[1..])),
        None => Err(err!(Syntax, "line {line}: {what} expects an argument")),
    }
}

fn expect_empty(rest: &[Token], line: usize) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(err!(Syntax, "line {line}: trailing tokens in directive"))
    }
}

fn one_str(args: &[Token], line: usize, what: &str) -> Result<String> {
    match args {
        [t] => match &t.tok {
            Tok::Str(s) => Ok(s.clone()),
            _ => Err(err!(
                Syntax,
                "line {line}: {what} expects a quoted identifier"
            )),
        },
        _ => Err(err!(
            Syntax,
            "line {line}: {what} expects a quoted identifier"
        )),
    }
}

fn parse_int(t: &Token, what: &str) -> Result<u64> {
    let w = word(t)?;
    w.parse::<u64>()
        .map_err(|_| err!(Syntax, "line {}: invalid {what} number '{w}'", t.line))
}

fn one_int(args: &[Token], line: usize, what: &str) -> Result<u64> {
    match args {
        [t] => parse_int(t, what),
        _ => Err(err!(Syntax, "line {line}: {what} expects one number")),
    }
}

fn two_ints(args: &[Token], line: usize, what: &str) -> Result<(u64, u64)> {
    match args {
        [a, b] => Ok((parse_int(a, what)?, parse_int(b, what)?)),
        _ => Err(err!(Syntax, "line {line}: {what} expects two numbers")),
    }
}

fn one_real(args: &[Token], line: usize, what: &str) -> Result<f64> {
    match args {
        [t] => {
            let w = word(t)?;
            w.parse::<f64>()
                .map_err(|_| err!(Syntax, "line {line}: invalid {what} number '{w}'"))
        }
        _ => Err(err!(Syntax, "line {line}: {what} expects one number")),
    }
}

fn size_and_activation(args: &[Token], line: usize, what: &str) -> Result<(u64, Activation)> {
    match args {
        [s, a] => {
            let size = parse_int(s, what)?;
            let act = match word(a)?.as_str() {
                "relu" => Activation::Relu,
                "linear" => Activation::Linear,
                "softmax" => Activation::Softmax,
                "sigmoid" => Activation::Sigmoid,
                other => {
                    return Err(err!(Syntax, "line {line}: unknown activation '{other}'"));
                }
            };
            Ok((size, act))
        }
        _ => Err(err!(
            Syntax,
            "line {line}: {what} expects a size and an activation"
        )),
    }
}
