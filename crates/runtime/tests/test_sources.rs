//! Executing files and streams
//!
//! File sources are scanned a chunk at a time; a source with no data yet
//! suspends the run instead of blocking the thread.

use psi_core::{ErrorCode, FileObj, Value};
use psi_runtime::{InterpConfig, Interpreter, Step};
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;

fn write_program(dir: &tempfile::TempDir, name: &str, src: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, src).unwrap();
    path
}

#[test]
fn test_run_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(
        &dir,
        "square.ps",
        "% squares\n/sq { dup mul } def\n1 1 4 { sq } for\n",
    );
    let mut interp = Interpreter::new(InterpConfig {
        file_chunk: 8,
        ..Default::default()
    });
    interp.run_file(&path).unwrap();
    let expected: Vec<Value> = [1, 4, 9, 16].into_iter().map(Value::integer).collect();
    assert_eq!(interp.ostack_values(), expected);
}

#[test]
fn test_run_operator_nests_files() {
    let dir = tempfile::tempdir().unwrap();
    let inner = write_program(&dir, "inner.ps", "/x 40 def\n");
    let outer = write_program(
        &dir,
        "outer.ps",
        &format!("({}) run x 2 add\n", inner.display()),
    );
    let mut interp = Interpreter::new(InterpConfig::default());
    interp.run_file(&outer).unwrap();
    assert_eq!(interp.ostack_values(), vec![Value::integer(42)]);
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.ps");
    let mut interp = Interpreter::new(InterpConfig::default());
    let err = interp.run_file(&path).unwrap_err();
    assert_eq!(err.code, ErrorCode::UndefinedFileName);
    assert_eq!(err.object, path.to_string_lossy());
}

#[test]
fn test_error_in_file_names_token() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(&dir, "bad.ps", "1 2 add\nundefined_thing\n3\n");
    let mut interp = Interpreter::new(InterpConfig::default());
    let err = interp.run_file(&path).unwrap_err();
    assert_eq!(err.code, ErrorCode::Undefined);
    assert_eq!(err.object, "undefined_thing");
    // Scanning stopped at the error; the trailing 3 was never read.
    assert_eq!(interp.index_from_top(2), Some(Value::integer(3)));
    assert!(!interp.is_running());
}

/// A pipe that has nothing to offer on its first read.
struct SlowPipe {
    reads: usize,
    data: io::Cursor<Vec<u8>>,
}

impl Read for SlowPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads += 1;
        if self.reads == 1 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.data.read(buf)
    }
}

fn slow_pipe(src: &str) -> Box<dyn Read> {
    Box::new(SlowPipe {
        reads: 0,
        data: io::Cursor::new(src.as_bytes().to_vec()),
    })
}

#[test]
fn test_source_without_data_suspends() {
    let mut interp = Interpreter::new(InterpConfig::default());
    let ctx = interp.context_mut();
    let id = ctx.heap.alloc_file(FileObj::from_reader("pipe", slow_pipe("20 22 add"), 4));
    interp.begin(Value::file(id).cvx()).unwrap();

    assert_eq!(interp.step_slice().unwrap(), Step::Blocked);
    assert!(interp.ostack_values().is_empty());
    assert_eq!(interp.step_slice().unwrap(), Step::Finished);
    assert_eq!(interp.ostack_values(), vec![Value::integer(42)]);
}

#[test]
fn test_run_reader_waits_for_data() {
    let mut interp = Interpreter::new(InterpConfig::default());
    interp.run_reader("pipe", slow_pipe("{ 1 2 } exec add")).unwrap();
    assert_eq!(interp.ostack_values(), vec![Value::integer(3)]);
}

#[derive(Clone, Default)]
struct Capture(Rc<RefCell<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_file_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_program(&dir, "hello.ps", "(hello) print 6 7 mul =\n");
    let out = Capture::default();
    let mut interp = Interpreter::with_output(InterpConfig::default(), Box::new(out.clone()));
    interp.run_file(&path).unwrap();
    assert_eq!(out.0.borrow().as_slice(), b"hello42\n");
}
