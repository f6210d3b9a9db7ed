//! Resolved kernel syntax tree.
//!
//! Names are resolved during parsing: locals become frame slots and buffer
//! arguments become parameter indices, so evaluation never looks up strings.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub kernels: Vec<KernelDef>,
}

impl Module {
    pub fn kernel(&self, name: &str) -> Option<&KernelDef> {
        self.kernels.iter().find(|kernel| kernel.name == name)
    }

    pub fn kernel_index(&self, name: &str) -> Option<usize> {
        self.kernels.iter().position(|kernel| kernel.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    /// Number of `int` slots the body needs.
    pub local_count: usize,
}

impl KernelDef {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A `__global int *` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub is_const: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Write a local slot.
    Set { slot: usize, value: Expr },
    /// Write `params[param][index]`.
    Store { param: usize, index: Expr, value: Expr },
    If { cond: Expr, then_branch: Vec<Stmt>, else_branch: Vec<Stmt> },
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(i32),
    Local(usize),
    Load { param: usize, index: Box<Expr> },
    Builtin(Builtin),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Select { cond: Box<Expr>, then_value: Box<Expr>, else_value: Box<Expr> },
}

/// Work-item functions (dimension 0 only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    GlobalId,
    GlobalSize,
    LocalId,
    LocalSize,
    GroupId,
    NumGroups,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "get_global_id" => Builtin::GlobalId,
            "get_global_size" => Builtin::GlobalSize,
            "get_local_id" => Builtin::LocalId,
            "get_local_size" => Builtin::LocalSize,
            "get_group_id" => Builtin::GroupId,
            "get_num_groups" => Builtin::NumGroups,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
}
