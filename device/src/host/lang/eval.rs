use snafu::Snafu;

use super::ast::{BinaryOp, Builtin, Expr, KernelDef, Stmt, UnaryOp};

/// Position of one work-item inside a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub global_id: usize,
    pub global_size: usize,
    pub local_id: usize,
    pub local_size: usize,
    pub group_id: usize,
}

impl WorkItem {
    fn builtin(&self, builtin: Builtin) -> i32 {
        let value = match builtin {
            Builtin::GlobalId => self.global_id,
            Builtin::GlobalSize => self.global_size,
            Builtin::LocalId => self.local_id,
            Builtin::LocalSize => self.local_size,
            Builtin::GroupId => self.group_id,
            Builtin::NumGroups => self.global_size / self.local_size.max(1),
        };
        value as i32
    }
}

/// Runtime error raised by a single work-item.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum Fault {
    #[snafu(display("integer division by zero"))]
    DivisionByZero,

    #[snafu(display("out-of-bounds access to argument '{buffer}': index {index}, length {len}"))]
    OutOfBounds { buffer: String, index: i32, len: usize },

    #[snafu(display("store to read-only buffer bound to argument '{buffer}'"))]
    ReadOnlyStore { buffer: String },
}

/// Device memory visible to a kernel during one dispatch.
///
/// Several parameters may be bound to the same buffer, so parameters map to
/// slots in `buffers` rather than owning their storage.
#[derive(Debug)]
pub struct Memory<'m> {
    pub buffers: &'m mut [Vec<i32>],
    /// Parameter index to buffer slot.
    pub bindings: &'m [usize],
    /// Whether the buffer bound to each parameter accepts kernel stores.
    pub writable: &'m [bool],
}

enum Flow {
    Next,
    Return,
}

/// Tree-walking evaluator for one kernel. Reused across work-items.
#[derive(Debug)]
pub struct Interpreter<'k> {
    kernel: &'k KernelDef,
    locals: Vec<i32>,
}

impl<'k> Interpreter<'k> {
    pub fn new(kernel: &'k KernelDef) -> Self {
        Self { kernel, locals: vec![0; kernel.local_count] }
    }

    /// Run the kernel body for `item`.
    pub fn run(&mut self, item: &WorkItem, memory: &mut Memory<'_>) -> Result<(), Fault> {
        self.locals.fill(0);
        let kernel = self.kernel;
        self.block(&kernel.body, item, memory).map(|_| ())
    }

    fn block(&mut self, stmts: &[Stmt], item: &WorkItem, memory: &mut Memory<'_>) -> Result<Flow, Fault> {
        for stmt in stmts {
            if let Flow::Return = self.stmt(stmt, item, memory)? {
                return Ok(Flow::Return);
            }
        }
        Ok(Flow::Next)
    }

    fn stmt(&mut self, stmt: &Stmt, item: &WorkItem, memory: &mut Memory<'_>) -> Result<Flow, Fault> {
        match stmt {
            Stmt::Set { slot, value } => {
                self.locals[*slot] = self.eval(value, item, memory)?;
            }
            Stmt::Store { param, index, value } => {
                let index = self.eval(index, item, memory)?;
                let value = self.eval(value, item, memory)?;
                if !memory.writable[*param] {
                    return ReadOnlyStoreSnafu { buffer: self.param_name(*param) }.fail();
                }
                let slot = self.element(*param, index, memory)?;
                memory.buffers[memory.bindings[*param]][slot] = value;
            }
            Stmt::If { cond, then_branch, else_branch } => {
                let branch = if self.eval(cond, item, memory)? != 0 { then_branch } else { else_branch };
                return self.block(branch, item, memory);
            }
            Stmt::Return => return Ok(Flow::Return),
        }
        Ok(Flow::Next)
    }

    fn eval(&self, expr: &Expr, item: &WorkItem, memory: &Memory<'_>) -> Result<i32, Fault> {
        let value = match expr {
            Expr::Const(value) => *value,
            Expr::Local(slot) => self.locals[*slot],
            Expr::Builtin(builtin) => item.builtin(*builtin),
            Expr::Load { param, index } => {
                let index = self.eval(index, item, memory)?;
                let slot = self.element(*param, index, memory)?;
                memory.buffers[memory.bindings[*param]][slot]
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand, item, memory)?;
                match op {
                    UnaryOp::Neg => operand.wrapping_neg(),
                    UnaryOp::Not => i32::from(operand == 0),
                    UnaryOp::BitNot => !operand,
                }
            }
            Expr::Binary(BinaryOp::LogicalAnd, lhs, rhs) => {
                i32::from(self.eval(lhs, item, memory)? != 0 && self.eval(rhs, item, memory)? != 0)
            }
            Expr::Binary(BinaryOp::LogicalOr, lhs, rhs) => {
                i32::from(self.eval(lhs, item, memory)? != 0 || self.eval(rhs, item, memory)? != 0)
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, item, memory)?;
                let rhs = self.eval(rhs, item, memory)?;
                apply(*op, lhs, rhs)?
            }
            Expr::Select { cond, then_value, else_value } => {
                if self.eval(cond, item, memory)? != 0 {
                    self.eval(then_value, item, memory)?
                } else {
                    self.eval(else_value, item, memory)?
                }
            }
        };
        Ok(value)
    }

    fn element(&self, param: usize, index: i32, memory: &Memory<'_>) -> Result<usize, Fault> {
        let len = memory.buffers[memory.bindings[param]].len();
        match usize::try_from(index) {
            Ok(slot) if slot < len => Ok(slot),
            _ => OutOfBoundsSnafu { buffer: self.param_name(param), index, len }.fail(),
        }
    }

    fn param_name(&self, param: usize) -> String {
        self.kernel.params[param].name.clone()
    }
}

/// Two's-complement `int` semantics: everything wraps, shift counts are
/// taken modulo 32 and only a zero divisor is an error.
pub fn apply(op: BinaryOp, lhs: i32, rhs: i32) -> Result<i32, Fault> {
    let value = match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::Div => {
            snafu::ensure!(rhs != 0, DivisionByZeroSnafu);
            lhs.wrapping_div(rhs)
        }
        BinaryOp::Rem => {
            snafu::ensure!(rhs != 0, DivisionByZeroSnafu);
            lhs.wrapping_rem(rhs)
        }
        BinaryOp::Shl => lhs.wrapping_shl(rhs as u32),
        BinaryOp::Shr => lhs.wrapping_shr(rhs as u32),
        BinaryOp::Lt => i32::from(lhs < rhs),
        BinaryOp::Le => i32::from(lhs <= rhs),
        BinaryOp::Gt => i32::from(lhs > rhs),
        BinaryOp::Ge => i32::from(lhs >= rhs),
        BinaryOp::Eq => i32::from(lhs == rhs),
        BinaryOp::Ne => i32::from(lhs != rhs),
        BinaryOp::BitAnd => lhs & rhs,
        BinaryOp::BitXor => lhs ^ rhs,
        BinaryOp::BitOr => lhs | rhs,
        BinaryOp::LogicalAnd => i32::from(lhs != 0 && rhs != 0),
        BinaryOp::LogicalOr => i32::from(lhs != 0 || rhs != 0),
    };
    Ok(value)
}
