//! Output and file operators
//!
//! Output goes to the context's writer (stdout unless the embedder supplied
//! another). Files are read-only byte sources consumed by the scanner;
//! executing a file value runs the tokens it yields.

use super::{OpDef, OpResult, OpStatus};
use crate::context::Context;
use crate::estack::push_exec;
use crate::print::{cvs_text, repr_text};
use psi_core::{ErrorCode, FileObj, Payload, Value};
use std::io::Write;
use tracing::debug;

pub const OPS: &[OpDef] = &[
    OpDef { name: "print", proc: op_print },
    OpDef { name: "=", proc: op_eq_print },
    OpDef { name: "==", proc: op_eqeq_print },
    OpDef { name: "flush", proc: op_flush },
    OpDef { name: "pstack", proc: op_pstack },
    OpDef { name: "stack", proc: op_stack },
    OpDef { name: "file", proc: op_file },
    OpDef { name: "closefile", proc: op_closefile },
    OpDef { name: "run", proc: op_run },
];

fn emit(ctx: &mut Context, bytes: &[u8]) -> Result<(), ErrorCode> {
    ctx.out.write_all(bytes).map_err(|_| ErrorCode::IoError)
}

/// `string print -`
pub fn op_print(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let bytes = ctx.string_operand(0)?;
    emit(ctx, &bytes)?;
    ctx.pop(1)?;
    Ok(OpStatus::Normal)
}

/// `any = -`
pub fn op_eq_print(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let mut text = cvs_text(ctx, &ctx.operand(0));
    text.push('\n');
    emit(ctx, text.as_bytes())?;
    ctx.pop(1)?;
    Ok(OpStatus::Normal)
}

/// `any == -`
pub fn op_eqeq_print(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let mut text = repr_text(ctx, &ctx.operand(0));
    text.push('\n');
    emit(ctx, text.as_bytes())?;
    ctx.pop(1)?;
    Ok(OpStatus::Normal)
}

pub fn op_flush(ctx: &mut Context) -> OpResult {
    ctx.out.flush().map_err(|_| ErrorCode::IoError)?;
    Ok(OpStatus::Normal)
}

fn dump_stack(ctx: &mut Context, render: fn(&Context, &Value) -> String) -> OpResult {
    let mut text = String::new();
    for v in ctx.ostack.iter_from_top() {
        text.push_str(&render(ctx, &v));
        text.push('\n');
    }
    emit(ctx, text.as_bytes())?;
    Ok(OpStatus::Normal)
}

/// Print the operand stack, top first, without changing it.
pub fn op_pstack(ctx: &mut Context) -> OpResult {
    dump_stack(ctx, repr_text)
}

pub fn op_stack(ctx: &mut Context) -> OpResult {
    dump_stack(ctx, cvs_text)
}

/// Open a file for reading. `%stdin` names standard input.
pub(crate) fn open_file(ctx: &mut Context, name: &str) -> Result<Value, ErrorCode> {
    let chunk = ctx.config.file_chunk;
    let obj = if name == "%stdin" {
        FileObj::from_reader(name, Box::new(std::io::stdin()), chunk)
    } else {
        let file = std::fs::File::open(name).map_err(|e| {
            debug!(file = name, error = %e, "open failed");
            ErrorCode::UndefinedFileName
        })?;
        FileObj::from_reader(name, Box::new(file), chunk)
    };
    let id = ctx.heap.alloc_file(obj);
    Ok(Value::file(id))
}

/// `filename access file file`
pub fn op_file(ctx: &mut Context) -> OpResult {
    ctx.check_ops(2)?;
    let mode = ctx.string_operand(0)?;
    let name = ctx.string_operand(1)?;
    if mode != b"r" {
        return Err(ErrorCode::InvalidFileAccess);
    }
    let name = String::from_utf8_lossy(&name).into_owned();
    let file = open_file(ctx, &name)?;
    ctx.pop(1)?;
    ctx.set_operand(0, file);
    Ok(OpStatus::Normal)
}

pub fn op_closefile(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let Payload::File(id) = ctx.operand(0).payload else {
        return Err(ErrorCode::TypeCheck);
    };
    ctx.heap.file_mut(id).close();
    ctx.pop(1)?;
    Ok(OpStatus::Normal)
}

/// `filename run -`
pub fn op_run(ctx: &mut Context) -> OpResult {
    ctx.check_ops(1)?;
    let name = ctx.string_operand(0)?;
    let name = String::from_utf8_lossy(&name).into_owned();
    ctx.estack.check_room(1)?;
    let file = open_file(ctx, &name)?;
    push_exec(ctx, file.cvx())?;
    ctx.pop(1)?;
    Ok(OpStatus::PushEstack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture_ctx() -> (Context, Capture) {
        let out = Capture::default();
        let ctx = Context::with_output(InterpConfig::default(), Box::new(out.clone()));
        (ctx, out)
    }

    fn text(out: &Capture) -> String {
        String::from_utf8(out.0.borrow().clone()).unwrap()
    }

    #[test]
    fn test_equals_forms() {
        let (mut ctx, out) = capture_ctx();
        let s = ctx.alloc_string(b"hi".to_vec());
        ctx.push(s).unwrap();
        op_eq_print(&mut ctx).unwrap();
        ctx.push(s).unwrap();
        op_eqeq_print(&mut ctx).unwrap();
        assert_eq!(text(&out), "hi\n(hi)\n");
    }

    #[test]
    fn test_pstack_keeps_stack() {
        let (mut ctx, out) = capture_ctx();
        ctx.push(Value::integer(1)).unwrap();
        ctx.push(Value::integer(2)).unwrap();
        op_pstack(&mut ctx).unwrap();
        assert_eq!(text(&out), "2\n1\n");
        assert_eq!(ctx.ostack.count(), 2);
    }

    #[test]
    fn test_file_errors() {
        let (mut ctx, _) = capture_ctx();
        let name = ctx.alloc_string(b"/nonexistent/psi/file.ps".to_vec());
        let read = ctx.alloc_string(b"r".to_vec());
        let write = ctx.alloc_string(b"w".to_vec());
        ctx.push(name).unwrap();
        ctx.push(write).unwrap();
        assert_eq!(op_file(&mut ctx), Err(ErrorCode::InvalidFileAccess));
        ctx.pop(1).unwrap();
        ctx.push(read).unwrap();
        assert_eq!(op_file(&mut ctx), Err(ErrorCode::UndefinedFileName));
        assert_eq!(ctx.ostack.count(), 2);
    }

    #[test]
    fn test_file_reads_existing() {
        let (mut ctx, _) = capture_ctx();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"1 2 add").unwrap();
        let path = tmp.path().to_string_lossy().into_owned();
        let name = ctx.alloc_string(path.into_bytes());
        let read = ctx.alloc_string(b"r".to_vec());
        ctx.push(name).unwrap();
        ctx.push(read).unwrap();
        op_file(&mut ctx).unwrap();
        let Payload::File(id) = ctx.operand(0).payload else {
            panic!("expected file");
        };
        assert!(ctx.heap.file_mut(id).fill().unwrap() > 0);
        assert_eq!(ctx.heap.file(id).window(), b"1 2 add");
    }
}
