//! Interpreter for the OpenCL C subset accepted by the host backend.
//!
//! Supported:
//! - `__kernel void name(__global [const] int *arg, ...)` entry points
//! - `int` locals, buffer loads/stores, compound assignment, `++`/`--` statements
//! - `if`/`else`, blocks, `return`
//! - integer arithmetic, comparison, bitwise and logical operators, `?:`
//! - `get_global_id(0)`, `get_global_size(0)`, `get_local_id(0)`,
//!   `get_local_size(0)`, `get_group_id(0)`, `get_num_groups(0)`
//!
//! Arithmetic wraps. Division by zero and out-of-bounds accesses abort the
//! dispatch instead of invoking undefined behaviour.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

use std::fmt;

pub use ast::{KernelDef, Module};
pub use eval::{Fault, Interpreter, Memory, WorkItem};
pub use parser::parse;

/// A compiler message anchored at a source position (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: error: {}", self.line, self.column, self.message)
    }
}

/// Render diagnostics the way a C compiler prints its build log.
pub fn build_log(diagnostics: &[Diagnostic]) -> String {
    let mut log = String::new();
    for diagnostic in diagnostics {
        log.push_str(&diagnostic.to_string());
        log.push('\n');
    }
    let count = diagnostics.len();
    log.push_str(&format!("{count} error{} generated.", if count == 1 { "" } else { "s" }));
    log
}

/// Byte offset to line/column lookup.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let starts = std::iter::once(0).chain(source.match_indices('\n').map(|(i, _)| i + 1)).collect();
        Self { starts }
    }

    pub fn locate(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&start| start <= offset).saturating_sub(1);
        (line + 1, offset - self.starts[line] + 1)
    }

    pub fn diagnostic(&self, offset: usize, message: impl Into<String>) -> Diagnostic {
        let (line, column) = self.locate(offset);
        Diagnostic { line, column, message: message.into() }
    }
}
