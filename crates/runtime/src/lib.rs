//! psi Runtime: the interpreter loop and everything it drives
//!
//! Key design principles:
//! - Dispatcher: one flat state machine; procedures are entered as tail calls
//!   and the estack holds every continuation, so a suspended run is just data
//! - Operators: plain `fn(&mut Context)` procedures that report how they left
//!   the execution stack
//! - Driver: every fault the dispatcher stops with is either absorbed (stack
//!   growth, collection, time slice) or turned into a call of the matching
//!   `errordict` handler
//!
//! # Modules
//!
//! - `interp`: the dispatcher, its inline fast path and the packed/plain slots
//! - `estack`: marks, protected calls and the estack walking helpers
//! - `operators`: the operator table and the built-in operators
//! - `driver`: the error and recovery driver and the public `Interpreter`
//! - `scheduler`: cooperative round-robin over several interpreters
//! - `scanner`: the token scanner used by string and file sources
//! - `context`, `config`, `stats`, `print`, `color`: supporting state
//! - `report`, `signal`: at-exit report and the SIGINT interrupt flag

pub mod color;
pub mod config;
pub mod context;
pub mod driver;
pub mod estack;
pub mod interp;
pub mod operators;
pub mod print;
pub mod report;
pub mod scanner;
pub mod scheduler;
pub mod signal;
pub mod stats;

pub use config::{ConfigError, InterpConfig};
pub use context::Context;
pub use driver::{Interpreter, RunError, Step};
pub use interp::{Fault, interp};
pub use operators::{OpDef, OpProc, OpResult, OpStatus, OperatorTable};
pub use report::{ReportConfig, ReportData, emit_from_env};
pub use scheduler::{Scheduler, SchedulerStats, TaskId};
pub use stats::InterpStats;
