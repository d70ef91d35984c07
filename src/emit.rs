//! Specialized C source emitter.
//!
//! Each instruction program becomes one translation-unit-local function;
//! each instruction becomes a small commented block that aliases typed
//! pointers over the arena and performs the tensor operation with literal
//! loop bounds and stride constants. Exported wrappers are trivial
//! type-erased forwarders.
//!
//! Emission is total: once synthesis has succeeded, the only way to fail is
//! file I/O. A reserved opcode reaching the emitter is a broken internal
//! invariant and panics.
//!
//! The `.cuda` flag only changes the source file extension; the module body
//! is identical.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{err, Result};
use crate::ir::Precision;
use crate::program::{Inst, Program};
use crate::synth::Synthesis;
use crate::VERSION;

/// C scalar type for the element representation.
fn scalar(p: Precision) -> &'static str {
    match p {
        Precision::Float => "float",
        Precision::Double => "double",
        Precision::Fixed { .. } => panic!("fixed-point precision reached the emitter"),
    }
}

/// Narrowest unsigned counter type wide enough for `max` iterations.
fn index_type(max: u64) -> &'static str {
    if max <= 0xffff_ffff {
        "uint32_t"
    } else {
        "uint64_t"
    }
}

/// Literal with the fixed six fractional digits the generated code uses for
/// every real constant.
fn real(v: f64) -> String {
    format!("{v:.6}")
}

/// Human-readable `major.minor` rendering of [`VERSION`].
pub fn version_string() -> String {
    format!("{}.{}", VERSION / 10, VERSION % 10)
}

fn banner(out: &mut String) {
    let now = chrono::Local::now().format("%c");
    out.push_str(&format!(
        "/*\n * Generated by annc {} - {}\n */\n\n",
        version_string(),
        now
    ));
}

fn emit_inst(out: &mut String, inst: &Inst, t: &'static str) {
    match *inst {
        Inst::Ret => {
            out.push_str("  { /* RET */\n    return;\n  }\n");
        }
        Inst::RetArg { src } => {
            out.push_str(&format!(
                "  {{ /* RETARG */\n    return ({t} *)( m_ + {src} );\n  }}\n"
            ));
        }
        Inst::BatchLoop {
            count,
            stride_x,
            stride_y,
        } => {
            let it = index_type(count * stride_x.max(stride_y));
            out.push_str(&format!(
                "  {{ /* BATCHLOOP */
    {it} i;
    for (i=0; i<{count}; ++i) {{
        _activate_(m_, x_ + i * {stride_x});
        _backprop_(m_, y_ + i * {stride_y});
    }}
  }}

"
            ));
        }
        Inst::Random { dst, lo, span, len } => {
            let it = index_type(len);
            let lo = real(lo);
            let span = real(span);
            out.push_str(&format!(
                "  {{ /* RANDOM */
    {t} r, *z = ({t} *)( m_ + {dst} );
    {it} i;
    for (i=0; i<{len}; ++i) {{
      r = ({t})rand() / RAND_MAX;
      z[i] = {lo} + r * {span};
    }}
  }}

"
            ));
        }
        Inst::Clear { dst, len } => {
            out.push_str(&format!(
                "  {{ /* CLEAR */\n    memset(m_ + {dst}, 0, {len} * sizeof ({t}));\n  }}\n\n"
            ));
        }
        Inst::CopyX { dst, len } => {
            out.push_str(&format!(
                "  {{ /* COPYX */\n    memcpy(m_ + {dst}, x_, {len} * sizeof ({t}));\n  }}\n\n"
            ));
        }
        Inst::Mac1 {
            dst,
            mat,
            vec,
            rows,
            cols,
        } => {
            let it = index_type(rows.max(cols));
            out.push_str(&format!(
                "  {{ /* MAC1 */
    {t} *z = ({t} *)( m_ + {dst} );
    const {t} *A = (const {t} *)( m_ + {mat} );
    const {t} *B = (const {t} *)( m_ + {vec} );
    {it} i, j;
    for (i=0; i<{rows}; ++i) {{
      z[i] = 0.0;
      for (j=0; j<{cols}; ++j) {{
        z[i] += A[i * {cols} + j] * B[j];
      }}
    }}
  }}

"
            ));
        }
        Inst::Mac2 {
            dst,
            mat,
            vec,
            rows,
            cols,
        } => {
            let it = index_type(rows.max(cols));
            out.push_str(&format!(
                "  {{ /* MAC2 */
    {t} *z = ({t} *)( m_ + {dst} );
    const {t} *A = (const {t} *)( m_ + {mat} );
    const {t} *B = (const {t} *)( m_ + {vec} );
    {it} i, j;
    for (i=0; i<{cols}; ++i) {{
      z[i] = 0.0;
      for (j=0; j<{rows}; ++j) {{
        z[i] += A[j * {cols} + i] * B[j];
      }}
    }}
  }}

"
            ));
        }
        Inst::Mac3 {
            dst,
            row,
            col,
            rows,
            cols,
        } => {
            let it = index_type(rows.max(cols));
            out.push_str(&format!(
                "  {{ /* MAC3 */
    {t} *za = ({t} *)( m_ + {dst} );
    const {t} *B = (const {t} *)( m_ + {row} );
    const {t} *C = (const {t} *)( m_ + {col} );
    {it} i, j;
    for (i=0; i<{rows}; ++i) {{
      for (j=0; j<{cols}; ++j) {{
        za[i * {cols} + j] += B[i] * C[j];
      }}
    }}
  }}

"
            ));
        }
        Inst::Mac4 {
            dst,
            src,
            scale,
            len,
        } => {
            let it = index_type(len);
            let scale = real(scale);
            out.push_str(&format!(
                "  {{ /* MAC4 */
    {t} *za = ({t} *)( m_ + {dst} );
    const {t} *B = (const {t} *)( m_ + {src} );
    {it} i;
    for (i=0; i<{len}; ++i) {{
      za[i] += B[i] * {scale};
    }}
  }}

"
            ));
        }
        Inst::Add { dst, src, len } => {
            let it = index_type(len);
            out.push_str(&format!(
                "  {{ /* ADD */
    {t} *za = ({t} *)( m_ + {dst} );
    const {t} *B = (const {t} *)( m_ + {src} );
    {it} i;
    for (i=0; i<{len}; ++i) {{
      za[i] += B[i];
    }}
  }}

"
            ));
        }
        Inst::SubY { dst, src, len } => {
            let it = index_type(len);
            out.push_str(&format!(
                "  {{ /* SUBY */
    {t} *z = ({t} *)( m_ + {dst} );
    const {t} *A = (const {t} *)( m_ + {src} );
    {it} i;
    for (i=0; i<{len}; ++i) {{
      z[i] = A[i] - y_[i];
    }}
  }}

"
            ));
        }
        Inst::Relu { dst, len } => {
            let it = index_type(len);
            out.push_str(&format!(
                "  {{ /* RELU */
    {t} *za = ({t} *)( m_ + {dst} );
    {it} i;
    for (i=0; i<{len}; ++i) {{
      if (0.0 >= za[i]) {{
        za[i] = 0.0;
      }}
    }}
  }}

"
            ));
        }
        Inst::Linear { .. } => {
            out.push_str("  { /* LINEAR */\n    /* nothing to do */\n  }\n\n");
        }
        Inst::Softmax { dst, len } => {
            let it = index_type(len);
            out.push_str(&format!(
                "  {{ /* SOFTMAX */
    {t} *za = ({t} *)( m_ + {dst} );
    {t} max=za[0], sum=0.0;
    {it} i;
    for (i=1; i<{len}; ++i) {{
      if (max < za[i]) {{
        max = za[i];
      }}
    }}
    for (i=0; i<{len}; ++i) {{
      za[i] -= max;
      sum += ({t})exp(za[i]);
    }}
    for (i=0; i<{len}; ++i) {{
      za[i] = ({t})exp(za[i]) / sum;
    }}
  }}

"
            ));
        }
        Inst::Sigmoid { dst, len } => {
            let it = index_type(len);
            out.push_str(&format!(
                "  {{ /* SIGMOID */
    {t} *za = ({t} *)( m_ + {dst} );
    {t} zee;
    {it} i;
    for (i=0; i<{len}; ++i) {{
      if (0.0 <= za[i]) {{
        zee = ({t})exp(-za[i]);
        za[i] = 1.0 / (1.0 + zee);
      }}
      else {{
        zee = ({t})exp(za[i]);
        za[i] = zee / (1.0 + zee);
      }}
    }}
  }}

"
            ));
        }
        Inst::ReluD { dst, wit, len } => {
            let it = index_type(len);
            out.push_str(&format!(
                "  {{ /* RELUD */
    {t} *za = ({t} *)( m_ + {dst} );
    const {t} *B = (const {t} *)( m_ + {wit} );
    {it} i;
    for (i=0; i<{len}; ++i) {{
      if (0.0 >= B[i]) {{
        za[i] = 0.0;
      }}
    }}
  }}

"
            ));
        }
        Inst::SigmoidD { dst, wit, len } => {
            let it = index_type(len);
            out.push_str(&format!(
                "  {{ /* SIGMOIDD */
    {t} *za = ({t} *)( m_ + {dst} );
    const {t} *B = (const {t} *)( m_ + {wit} );
    {it} i;
    for (i=0; i<{len}; ++i) {{
      za[i] *= B[i] * (1.0 - B[i]);
    }}
  }}

"
            ));
        }
        Inst::LinearD { .. } | Inst::SoftmaxD { .. } => {
            panic!("reserved opcode {} reached the emitter", inst.mnemonic());
        }
    }
}

/// Body first, tail last.
fn emit_program(out: &mut String, prog: &Program, t: &'static str) {
    for inst in prog.body() {
        emit_inst(out, inst, t);
    }
    emit_inst(out, prog.tail(), t);
}

/// Render the full module source.
pub fn emit_source(s: &Synthesis) -> String {
    let t = scalar(s.precision);
    let prefix = &s.prefix;
    let mut out = String::new();

    banner(&mut out);
    out.push_str(&format!(
        "#include <stdlib.h>\n#include <stdint.h>\n#include <string.h>\n#include <math.h>\n#include \"{}.h\"\n\n",
        s.module
    ));

    out.push_str("static void _initialize_(char *m_) {\n");
    emit_program(&mut out, &s.initialize, t);
    out.push_str("}\n\n");

    out.push_str(&format!(
        "static {t} *_activate_(char *m_, const {t} *x_) {{\n"
    ));
    emit_program(&mut out, &s.activate, t);
    out.push_str("}\n\n");

    out.push_str(&format!(
        "static void _backprop_(char *m_, const {t} *y_) {{\n"
    ));
    emit_program(&mut out, &s.backprop, t);
    out.push_str("}\n\n");

    out.push_str(&format!(
        "static void _train_(char *m_, const {t} *x_, const {t} *y_) {{\n"
    ));
    emit_program(&mut out, &s.train, t);
    out.push_str("}\n\n");

    out.push_str(&format!(
        "int {prefix}_version(void) {{\n  return {VERSION};\n}}\n\n"
    ));
    out.push_str(&format!(
        "size_t {prefix}_memory_size(void) {{\n  return {};\n}}\n\n",
        s.layout.size
    ));
    out.push_str(&format!(
        "size_t {prefix}_memory_hard(void) {{\n  return {};\n}}\n\n",
        s.layout.hard
    ));
    out.push_str(&format!(
        "void {prefix}_initialize(void *m) {{\n  _initialize_((char *)m);\n}}\n\n"
    ));
    out.push_str(&format!(
        "void *{prefix}_activate(void *m, const void *x) {{\n  return _activate_((char *)m, (const {t} *)x);\n}}\n\n"
    ));
    out.push_str(&format!(
        "void {prefix}_train(void *m, const void *x, const void *y) {{\n  _train_((char *)m, (const {t} *)x, (const {t} *)y);\n}}\n"
    ));
    out
}

/// Render the module header, guarded against duplicate inclusion and marked
/// for C-linkage consumers.
pub fn emit_header(s: &Synthesis) -> String {
    let prefix = &s.prefix;
    let guard = prefix.to_uppercase();
    let mut out = String::new();

    banner(&mut out);
    out.push_str(&format!(
        "#ifndef _{guard}_H_\n#define _{guard}_H_\n\n#include <stddef.h>\n\n#ifdef __cplusplus\nextern \"C\" {{\n#endif /* __cplusplus */\n\n"
    ));
    out.push_str(&format!("int {prefix}_version(void);\n"));
    out.push_str(&format!("size_t {prefix}_memory_size(void);\n"));
    out.push_str(&format!("size_t {prefix}_memory_hard(void);\n"));
    out.push_str(&format!("void {prefix}_initialize(void *m);\n"));
    out.push_str(&format!("void *{prefix}_activate(void *m, const void *x);\n"));
    out.push_str(&format!(
        "void {prefix}_train(void *m, const void *x, const void *y);\n\n"
    ));
    out.push_str(&format!(
        "#ifdef __cplusplus\n}}\n#endif /* __cplusplus */\n\n#endif /* _{guard}_H_ */\n"
    ));
    out
}

/// Write `<module>.c` (or `.cu`) and `<module>.h` into `dir`, returning the
/// two paths.
pub fn write_files(s: &Synthesis, dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let ext = if s.cuda { "cu" } else { "c" };
    let src_path = dir.join(format!("{}.{ext}", s.module));
    let hdr_path = dir.join(format!("{}.h", s.module));
    fs::write(&src_path, emit_source(s))
        .map_err(|e| err!(File, "unable to write '{}': {e}", src_path.display()))?;
    fs::write(&hdr_path, emit_header(s))
        .map_err(|e| err!(File, "unable to write '{}': {e}", hdr_path.display()))?;
    Ok((src_path, hdr_path))
}
