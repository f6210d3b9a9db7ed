use std::collections::HashMap;

use super::ast::{BinaryOp, Builtin, Expr, KernelDef, Module, Param, Stmt, UnaryOp};
use super::lexer::{Spanned, Token, lex};
use super::{Diagnostic, LineIndex};

type PResult<T> = Result<T, Diagnostic>;

/// Parse and resolve a kernel source. Returns every diagnostic on failure.
pub fn parse(source: &str) -> Result<Module, Vec<Diagnostic>> {
    let index = LineIndex::new(source);
    let (tokens, mut diagnostics) = lex(source, &index);

    let mut parser = Parser::new(source, tokens, &index);
    match parser.module() {
        Ok(module) if diagnostics.is_empty() => Ok(module),
        Ok(_) => Err(diagnostics),
        Err(diagnostic) => {
            diagnostics.push(diagnostic);
            diagnostics.sort_by_key(|d| (d.line, d.column));
            Err(diagnostics)
        }
    }
}

/// Number of binary precedence levels handled by [`binary_op`].
const PRECEDENCE_LEVELS: usize = 10;

/// Deepest nesting of blocks or sub-expressions the parser accepts.
pub const MAX_NESTING: usize = 64;

/// Binary operator for `token` at precedence `level` (0 binds loosest).
fn binary_op(level: usize, token: &Token) -> Option<BinaryOp> {
    let op = match (level, token) {
        (0, Token::OrOr) => BinaryOp::LogicalOr,
        (1, Token::AndAnd) => BinaryOp::LogicalAnd,
        (2, Token::Pipe) => BinaryOp::BitOr,
        (3, Token::Caret) => BinaryOp::BitXor,
        (4, Token::Amp) => BinaryOp::BitAnd,
        (5, Token::EqEq) => BinaryOp::Eq,
        (5, Token::NotEq) => BinaryOp::Ne,
        (6, Token::Lt) => BinaryOp::Lt,
        (6, Token::Le) => BinaryOp::Le,
        (6, Token::Gt) => BinaryOp::Gt,
        (6, Token::Ge) => BinaryOp::Ge,
        (7, Token::Shl) => BinaryOp::Shl,
        (7, Token::Shr) => BinaryOp::Shr,
        (8, Token::Plus) => BinaryOp::Add,
        (8, Token::Minus) => BinaryOp::Sub,
        (9, Token::Star) => BinaryOp::Mul,
        (9, Token::Slash) => BinaryOp::Div,
        (9, Token::Percent) => BinaryOp::Rem,
        _ => return None,
    };
    Some(op)
}

/// What an identifier refers to inside a kernel body.
enum Binding {
    Local(usize),
    Param(usize),
}

/// Assignment target after resolution.
enum Place {
    Local(usize),
    Element { param: usize, index: Expr },
}

impl Place {
    fn read(&self) -> Expr {
        match self {
            Place::Local(slot) => Expr::Local(*slot),
            Place::Element { param, index } => Expr::Load { param: *param, index: Box::new(index.clone()) },
        }
    }

    fn write(self, value: Expr) -> Stmt {
        match self {
            Place::Local(slot) => Stmt::Set { slot, value },
            Place::Element { param, index } => Stmt::Store { param, index, value },
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    index: &'a LineIndex,
    eof: usize,
    params: Vec<Param>,
    scopes: Vec<HashMap<String, usize>>,
    local_count: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Spanned>, index: &'a LineIndex) -> Self {
        let eof = source.len();
        Self { source, tokens, pos: 0, index, eof, params: Vec::new(), scopes: Vec::new(), local_count: 0, depth: 0 }
    }

    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(token, _)| token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.eof, |(_, span)| span.start)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(token, _)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Run `parse` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(&mut self, what: &str, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return self.error(format!("{what} nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(self.index.diagnostic(self.offset(), message))
    }

    /// The current token as it appears in the source.
    fn found(&self) -> Option<String> {
        let (token, span) = self.tokens.get(self.pos)?;
        let text = &self.source[span.clone()];
        Some(match token {
            Token::Ident(_) => format!("identifier '{text}'"),
            _ => format!("'{text}'"),
        })
    }

    /// "expected X, found Y" at the current token.
    fn expected<T>(&self, what: &str) -> PResult<T> {
        match self.found() {
            Some(found) => self.error(format!("expected {what}, found {found}")),
            None => self.error(format!("expected {what} at end of input")),
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> PResult<()> {
        if self.eat(&expected) { Ok(()) } else { self.expected(what) }
    }

    fn ident(&mut self, what: &str) -> PResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => self.expected(what),
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn module(&mut self) -> PResult<Module> {
        let mut module = Module::default();
        while self.peek().is_some() {
            let start = self.offset();
            let kernel = self.kernel()?;
            if module.kernel(&kernel.name).is_some() {
                return Err(self.index.diagnostic(start, format!("redefinition of kernel '{}'", kernel.name)));
            }
            module.kernels.push(kernel);
        }
        Ok(module)
    }

    fn kernel(&mut self) -> PResult<KernelDef> {
        if !self.eat(&Token::Kernel) {
            return match self.peek() {
                Some(Token::Void | Token::Int) => self.error("only __kernel functions are supported"),
                _ => self.expected("'__kernel'"),
            };
        }
        if !self.eat(&Token::Void) {
            return self.error("kernel functions must return void");
        }
        let name = self.ident("kernel name")?;

        self.params.clear();
        self.scopes.clear();
        self.local_count = 0;

        self.expect(Token::LParen, "'('")?;
        if !self.eat(&Token::RParen) {
            if self.peek() == Some(&Token::Void) && self.peek_at(1) == Some(&Token::RParen) {
                self.pos += 2;
            } else {
                loop {
                    let param = self.param()?;
                    self.params.push(param);
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    self.expect(Token::Comma, "',' or ')'")?;
                }
            }
        }

        let body = self.block()?;
        Ok(KernelDef { name, params: std::mem::take(&mut self.params), body, local_count: self.local_count })
    }

    fn param(&mut self) -> PResult<Param> {
        let mut is_const = self.eat(&Token::Const);
        if !self.eat(&Token::Global) {
            return self.error("kernel arguments must be __global buffers");
        }
        is_const |= self.eat(&Token::Const);

        match self.peek() {
            Some(Token::Int) => self.pos += 1,
            Some(Token::Ident(ty)) => {
                return self.error(format!("unsupported element type '{ty}'; only 'int' buffers are supported"));
            }
            _ => return self.expected("element type"),
        }
        is_const |= self.eat(&Token::Const);
        self.expect(Token::Star, "'*'")?;

        let offset = self.offset();
        let name = self.ident("argument name")?;
        if self.params.iter().any(|p| p.name == name) {
            return Err(self.index.diagnostic(offset, format!("redefinition of argument '{name}'")));
        }
        Ok(Param { name, is_const })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.nested("block", Self::scoped_block)
    }

    fn scoped_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::LBrace, "'{'")?;
        self.scopes.push(HashMap::new());
        let mut stmts = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return self.error("expected '}' at end of input");
            }
            stmts.extend(self.statement()?);
        }
        self.scopes.pop();
        Ok(stmts)
    }

    /// A statement used as an `if` branch gets its own scope.
    fn branch(&mut self) -> PResult<Vec<Stmt>> {
        if self.peek() == Some(&Token::LBrace) {
            return self.block();
        }
        self.scopes.push(HashMap::new());
        let stmts = self.statement();
        self.scopes.pop();
        stmts
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        match self.peek() {
            Some(Token::Semi) => {
                self.pos += 1;
                Ok(Vec::new())
            }
            Some(Token::LBrace) => self.block(),
            Some(Token::Int) => self.declaration(),
            Some(Token::Const) if self.peek_at(1) == Some(&Token::Int) => {
                self.pos += 1;
                self.declaration()
            }
            Some(Token::If) => {
                self.pos += 1;
                self.expect(Token::LParen, "'(' after 'if'")?;
                let cond = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                let then_branch = self.branch()?;
                let else_branch = if self.eat(&Token::Else) { self.branch()? } else { Vec::new() };
                Ok(vec![Stmt::If { cond, then_branch, else_branch }])
            }
            Some(Token::Return) => {
                self.pos += 1;
                if !self.eat(&Token::Semi) {
                    return self.error("void kernel cannot return a value");
                }
                Ok(vec![Stmt::Return])
            }
            Some(Token::Increment | Token::Decrement) => {
                let op = if self.bump() == Some(Token::Increment) { BinaryOp::Add } else { BinaryOp::Sub };
                let place = self.place()?;
                self.expect(Token::Semi, "';'")?;
                Ok(vec![step(place, op)])
            }
            Some(Token::Ident(_)) => {
                let stmt = self.assignment()?;
                self.expect(Token::Semi, "';'")?;
                Ok(vec![stmt])
            }
            Some(Token::Void | Token::Kernel) => self.error("nested functions are not supported"),
            _ => self.expected("statement"),
        }
    }

    fn declaration(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::Int, "'int'")?;
        let mut stmts = Vec::new();
        loop {
            if self.peek() == Some(&Token::Star) {
                return self.error("pointer locals are not supported");
            }
            let offset = self.offset();
            let name = self.ident("variable name")?;
            let value = if self.eat(&Token::Assign) { self.ternary()? } else { Expr::Const(0) };

            if self.params.iter().any(|p| p.name == name) {
                return Err(self.index.diagnostic(offset, format!("declaration of '{name}' shadows a kernel argument")));
            }
            let slot = self.local_count;
            let Some(scope) = self.scopes.last_mut() else {
                return Err(self.index.diagnostic(offset, "declaration outside of a block"));
            };
            if scope.insert(name.clone(), slot).is_some() {
                return Err(self.index.diagnostic(offset, format!("redefinition of '{name}'")));
            }
            self.local_count += 1;
            stmts.push(Stmt::Set { slot, value });

            if self.eat(&Token::Semi) {
                return Ok(stmts);
            }
            self.expect(Token::Comma, "',' or ';'")?;
        }
    }

    fn assignment(&mut self) -> PResult<Stmt> {
        let place = self.place()?;

        let op = match self.peek() {
            Some(Token::Assign) => None,
            Some(Token::AddAssign) => Some(BinaryOp::Add),
            Some(Token::SubAssign) => Some(BinaryOp::Sub),
            Some(Token::MulAssign) => Some(BinaryOp::Mul),
            Some(Token::DivAssign) => Some(BinaryOp::Div),
            Some(Token::RemAssign) => Some(BinaryOp::Rem),
            Some(Token::AndAssign) => Some(BinaryOp::BitAnd),
            Some(Token::OrAssign) => Some(BinaryOp::BitOr),
            Some(Token::XorAssign) => Some(BinaryOp::BitXor),
            Some(Token::ShlAssign) => Some(BinaryOp::Shl),
            Some(Token::ShrAssign) => Some(BinaryOp::Shr),
            Some(Token::Increment) => {
                self.pos += 1;
                return Ok(step(place, BinaryOp::Add));
            }
            Some(Token::Decrement) => {
                self.pos += 1;
                return Ok(step(place, BinaryOp::Sub));
            }
            _ => return self.expected("assignment operator"),
        };
        self.pos += 1;

        let rhs = self.ternary()?;
        let value = match op {
            Some(op) => Expr::Binary(op, Box::new(place.read()), Box::new(rhs)),
            None => rhs,
        };
        Ok(place.write(value))
    }

    /// An lvalue: a local or a buffer element.
    fn place(&mut self) -> PResult<Place> {
        let offset = self.offset();
        let name = self.ident("assignment target")?;
        match self.resolve(&name, offset)? {
            Binding::Local(slot) => {
                if self.peek() == Some(&Token::LBracket) {
                    return self.error(format!("subscripted value '{name}' is not a buffer"));
                }
                Ok(Place::Local(slot))
            }
            Binding::Param(param) => {
                if self.params[param].is_const {
                    return Err(self.index.diagnostic(offset, format!("cannot assign to read-only buffer '{name}'")));
                }
                if !self.eat(&Token::LBracket) {
                    return self.error(format!("buffer argument '{name}' must be indexed"));
                }
                let index = self.expr()?;
                self.expect(Token::RBracket, "']'")?;
                Ok(Place::Element { param, index })
            }
        }
    }

    fn resolve(&self, name: &str, offset: usize) -> PResult<Binding> {
        if let Some(slot) = self.scopes.iter().rev().find_map(|scope| scope.get(name)) {
            return Ok(Binding::Local(*slot));
        }
        if let Some(param) = self.params.iter().position(|p| p.name == name) {
            return Ok(Binding::Param(param));
        }
        Err(self.index.diagnostic(offset, format!("use of undeclared identifier '{name}'")))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr(&mut self) -> PResult<Expr> {
        self.nested("expression", Self::ternary)
    }

    fn ternary(&mut self) -> PResult<Expr> {
        let cond = self.binary(0)?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then_value = self.expr()?;
        self.expect(Token::Colon, "':'")?;
        let else_value = self.expr()?;
        Ok(Expr::Select { cond: Box::new(cond), then_value: Box::new(then_value), else_value: Box::new(else_value) })
    }

    fn binary(&mut self, level: usize) -> PResult<Expr> {
        if level == PRECEDENCE_LEVELS {
            return self.unary();
        }

        let mut lhs = self.binary(level + 1)?;
        loop {
            let Some(op) = self.peek().and_then(|token| binary_op(level, token)) else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Tilde) => UnaryOp::BitNot,
            Some(Token::Plus) => {
                self.pos += 1;
                return self.nested("expression", Self::unary);
            }
            Some(Token::Increment | Token::Decrement) => {
                return self.error("increment and decrement are only supported as statements");
            }
            _ => return self.primary(),
        };
        self.pos += 1;
        Ok(Expr::Unary(op, Box::new(self.nested("expression", Self::unary)?)))
    }

    fn primary(&mut self) -> PResult<Expr> {
        let offset = self.offset();
        match self.bump() {
            Some(Token::Number(value)) => Ok(Expr::Const(value as i32)),
            Some(Token::LParen) => {
                // `(int)` casts are identity on the only supported type.
                if self.peek() == Some(&Token::Int) && self.peek_at(1) == Some(&Token::RParen) {
                    self.pos += 2;
                    return self.nested("expression", Self::unary);
                }
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    return self.call(&name, offset);
                }
                match self.resolve(&name, offset)? {
                    Binding::Local(slot) => {
                        if self.peek() == Some(&Token::LBracket) {
                            return self.error(format!("subscripted value '{name}' is not a buffer"));
                        }
                        Ok(Expr::Local(slot))
                    }
                    Binding::Param(param) => {
                        if !self.eat(&Token::LBracket) {
                            return self.error(format!("buffer argument '{name}' must be indexed"));
                        }
                        let index = self.expr()?;
                        self.expect(Token::RBracket, "']'")?;
                        Ok(Expr::Load { param, index: Box::new(index) })
                    }
                }
            }
            Some(_) => {
                self.pos -= 1;
                self.expected("expression")
            }
            None => self.expected("expression"),
        }
    }

    fn call(&mut self, name: &str, offset: usize) -> PResult<Expr> {
        let Some(builtin) = Builtin::from_name(name) else {
            return Err(self.index.diagnostic(offset, format!("call to undeclared function '{name}'")));
        };
        self.expect(Token::LParen, "'('")?;
        if self.peek() != Some(&Token::Number(0)) {
            return self.error(format!("'{name}': only dimension 0 is supported"));
        }
        self.pos += 1;
        self.expect(Token::RParen, "')'")?;
        Ok(Expr::Builtin(builtin))
    }
}

/// `place = place <op> 1`
fn step(place: Place, op: BinaryOp) -> Stmt {
    let value = Expr::Binary(op, Box::new(place.read()), Box::new(Expr::Const(1)));
    place.write(value)
}
