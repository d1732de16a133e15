//! Text forms of values
//!
//! Two renderings, matching the two printing operators:
//!
//! | Function      | Used by          | Strings      | Names | Composites           |
//! |---------------|------------------|--------------|-------|----------------------|
//! | [`cvs_text`]  | `cvs`, `=`       | raw bytes    | `n`   | `--nostringval--`    |
//! | [`repr_text`] | `==`, `pstack`   | `(escaped)`  | `/n`  | `[..]`, `{..}`, `-dict-` |
//!
//! Error reports use [`repr_text`] for the offending object.

use crate::context::Context;
use psi_core::{Payload, Value};
use std::fmt::Write;

/// Nesting depth beyond which arrays print as `...`.
const MAX_DEPTH: usize = 8;

fn real_text(r: f64) -> String {
    if r.is_finite() && r.fract() == 0.0 && r.abs() < 1e16 {
        format!("{:.1}", r)
    } else {
        format!("{}", r)
    }
}

fn operator_text(ctx: &Context, v: &Value) -> String {
    format!("--{}--", ctx.operator_name(v).unwrap_or_else(|| "unknown".to_string()))
}

/// The `cvs` rendering.
pub fn cvs_text(ctx: &Context, v: &Value) -> String {
    match v.payload {
        Payload::Integer(i) => i.to_string(),
        Payload::Real(r) => real_text(r),
        Payload::Boolean(b) => b.to_string(),
        Payload::String(s) => String::from_utf8_lossy(ctx.heap.string_bytes(s)).into_owned(),
        Payload::Name(n) => ctx.names.display(n),
        Payload::Operator { .. } | Payload::OpArray(_) => operator_text(ctx, v),
        Payload::Null => "null".to_string(),
        _ => "--nostringval--".to_string(),
    }
}

fn escape_into(out: &mut String, bytes: &[u8]) {
    out.push('(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out.push(')');
}

fn repr_into(ctx: &Context, v: &Value, depth: usize, out: &mut String) {
    match v.payload {
        Payload::String(s) => escape_into(out, ctx.heap.string_bytes(s)),
        Payload::Name(n) if !v.is_executable() => {
            out.push('/');
            out.push_str(&ctx.names.display(n));
        }
        Payload::Array(r) | Payload::PackedArray(r) => {
            let (open, close) = if v.is_executable() { ('{', '}') } else { ('[', ']') };
            if depth >= MAX_DEPTH {
                out.push(open);
                out.push_str("...");
                out.push(close);
                return;
            }
            out.push(open);
            for i in 0..r.len {
                if i > 0 {
                    out.push(' ');
                }
                if let Some(elem) = ctx.heap.array_get(r, i) {
                    repr_into(ctx, &elem, depth + 1, out);
                }
            }
            out.push(close);
        }
        Payload::Dict(_) => out.push_str("-dict-"),
        Payload::File(_) => out.push_str("-file-"),
        Payload::Mark => out.push_str("-mark-"),
        Payload::Save(_) => out.push_str("-save-"),
        Payload::FontId(_) => out.push_str("-fontID-"),
        Payload::Struct(o) | Payload::AStruct(o) => {
            let _ = write!(out, "-{}-", o.type_name);
        }
        Payload::Device(_) => out.push_str("-device-"),
        _ => out.push_str(&cvs_text(ctx, v)),
    }
}

/// The `==` rendering.
pub fn repr_text(ctx: &Context, v: &Value) -> String {
    let mut out = String::new();
    repr_into(ctx, v, 0, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;

    #[test]
    fn test_cvs_forms() {
        let mut ctx = Context::new(InterpConfig::default());
        assert_eq!(cvs_text(&ctx, &Value::real(3.0)), "3.0");
        assert_eq!(cvs_text(&ctx, &Value::real(0.25)), "0.25");
        assert_eq!(cvs_text(&ctx, &Value::NULL), "null");
        let add = ctx.lookup_text("add").unwrap();
        assert_eq!(cvs_text(&ctx, &add), "--add--");
        let d = ctx.alloc_dict(1);
        assert_eq!(cvs_text(&ctx, &d), "--nostringval--");
    }

    #[test]
    fn test_repr_nested_procedure() {
        let mut ctx = Context::new(InterpConfig::default());
        let x = ctx.names.intern(b"x");
        let s = ctx.alloc_string(b"a(b)\n".to_vec());
        let inner = ctx.alloc_array(vec![Value::exec_name(x), s]).unwrap().cvx();
        let outer = ctx
            .alloc_array(vec![Value::name(x), Value::integer(1), inner])
            .unwrap();
        assert_eq!(repr_text(&ctx, &outer), "[/x 1 {x (a\\(b\\)\\n)}]");
    }
}
