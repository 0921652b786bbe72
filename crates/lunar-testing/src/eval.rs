//! A miniature Lua-flavoured language: lexer, parser, and a resumable
//! evaluator.
//!
//! The subset is deliberately small: literals, locals, globals, table
//! constructors and indexing, function declarations, calls, arithmetic,
//! concatenation, comparison, `error(v)`, `type(v)`, and `await(expr)` at
//! statement positions. `await` compiles to a suspension point: the
//! coroutine yields the awaited value and is resumed with `(ok, v)`,
//! returning `v` into the await destination when `ok` is true and raising
//! it otherwise. Suspension is only legal in a coroutine body; everywhere
//! else an await raises the classic yield-outside-coroutine error.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::vm::{fmt_number, Builtin, FuncRec, MiniLua, Value};

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub(crate) stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    Local(String, Expr),
    Assign(Target, Expr),
    Return(Vec<Expr>),
    Expr(Expr),
    FunctionDecl {
        name: String,
        params: Vec<String>,
        body: Rc<Program>,
    },
    Await {
        expr: Expr,
        dest: AwaitDest,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum AwaitDest {
    Local(String),
    Return,
    Discard,
}

#[derive(Debug, Clone)]
pub(crate) enum Target {
    Name(String),
    Index(Expr, Expr),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Nil,
    True,
    False,
    Number(f64),
    Str(String),
    Var(String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Table(Vec<TableItem>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum TableItem {
    Named(String, Expr),
    Keyed(Expr, Expr),
    Positional(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Name(String),
    Number(f64),
    Str(String),
    // keywords
    Nil,
    True,
    False,
    Local,
    Return,
    Function,
    End,
    Await,
    // symbols
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Concat,
    Dot,
    Comma,
    Semi,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eof,
}

fn lex(source: &str) -> Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '-' => {
                chars.next();
                if chars.peek() == Some(&'-') {
                    // comment to end of line
                    for nc in chars.by_ref() {
                        if nc == '\n' {
                            break;
                        }
                    }
                } else {
                    toks.push(Tok::Minus);
                }
            }
            '0'..='9' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        // ".." terminates a number
                        if d == '.' && text.contains('.') {
                            break;
                        }
                        if d == '.' {
                            let mut ahead = chars.clone();
                            ahead.next();
                            if ahead.peek() == Some(&'.') {
                                break;
                            }
                        }
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = text
                    .parse()
                    .map_err(|_| format!("malformed number near '{text}'"))?;
                toks.push(Tok::Number(n));
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some(nc) = chars.next() {
                    if nc == quote {
                        closed = true;
                        break;
                    }
                    if nc == '\\' {
                        match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('\\') => text.push('\\'),
                            Some('\'') => text.push('\''),
                            Some('"') => text.push('"'),
                            Some(other) => {
                                return Err(format!("invalid escape '\\{other}'"));
                            }
                            None => return Err("unfinished string".into()),
                        }
                    } else {
                        text.push(nc);
                    }
                }
                if !closed {
                    return Err("unfinished string".into());
                }
                toks.push(Tok::Str(text));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&nc) = chars.peek() {
                    if nc.is_ascii_alphanumeric() || nc == '_' {
                        name.push(nc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push(match name.as_str() {
                    "nil" => Tok::Nil,
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "local" => Tok::Local,
                    "return" => Tok::Return,
                    "function" => Tok::Function,
                    "end" => Tok::End,
                    "await" => Tok::Await,
                    _ => Tok::Name(name),
                });
            }
            _ => {
                chars.next();
                let tok = match c {
                    '=' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Tok::EqEq
                        } else {
                            Tok::Assign
                        }
                    }
                    '~' => {
                        if chars.next() == Some('=') {
                            Tok::NotEq
                        } else {
                            return Err("unexpected character '~'".into());
                        }
                    }
                    '<' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Tok::Le
                        } else {
                            Tok::Lt
                        }
                    }
                    '>' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Tok::Ge
                        } else {
                            Tok::Gt
                        }
                    }
                    '+' => Tok::Plus,
                    '*' => Tok::Star,
                    '/' => Tok::Slash,
                    '.' => {
                        if chars.peek() == Some(&'.') {
                            chars.next();
                            Tok::Concat
                        } else {
                            Tok::Dot
                        }
                    }
                    ',' => Tok::Comma,
                    ';' => Tok::Semi,
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    other => return Err(format!("unexpected character '{other}'")),
                };
                toks.push(tok);
            }
        }
    }
    toks.push(Tok::Eof);
    Ok(toks)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

/// Parse a chunk into a statement list.
pub(crate) fn parse(source: &str) -> Result<Program, String> {
    let toks = lex(source)?;
    let mut p = Parser { toks, pos: 0 };
    let program = p.block(&[Tok::Eof])?;
    p.expect(Tok::Eof)?;
    Ok(program)
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos]
    }

    fn next(&mut self) -> Tok {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn accept(&mut self, t: Tok) -> bool {
        if *self.peek() == t {
            self.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: Tok) -> Result<(), String> {
        if self.accept(t.clone()) {
            Ok(())
        } else {
            Err(format!("expected {t:?}, found {:?}", self.peek()))
        }
    }

    fn name(&mut self) -> Result<String, String> {
        match self.next() {
            Tok::Name(n) => Ok(n),
            other => Err(format!("expected a name, found {other:?}")),
        }
    }

    fn block(&mut self, terminators: &[Tok]) -> Result<Program, String> {
        let mut stmts = Vec::new();
        loop {
            while self.accept(Tok::Semi) {}
            if terminators.contains(self.peek()) {
                return Ok(Program { stmts });
            }
            stmts.push(self.stmt()?);
        }
    }

    fn stmt(&mut self) -> Result<Stmt, String> {
        match self.peek().clone() {
            Tok::Local => {
                self.next();
                let name = self.name()?;
                self.expect(Tok::Assign)?;
                if self.accept(Tok::Await) {
                    let expr = self.await_operand()?;
                    Ok(Stmt::Await {
                        expr,
                        dest: AwaitDest::Local(name),
                    })
                } else {
                    Ok(Stmt::Local(name, self.expr()?))
                }
            }
            Tok::Return => {
                self.next();
                if self.accept(Tok::Await) {
                    let expr = self.await_operand()?;
                    return Ok(Stmt::Await {
                        expr,
                        dest: AwaitDest::Return,
                    });
                }
                let mut exprs = Vec::new();
                if !matches!(self.peek(), Tok::Eof | Tok::End | Tok::Semi) {
                    exprs.push(self.expr()?);
                    while self.accept(Tok::Comma) {
                        exprs.push(self.expr()?);
                    }
                }
                Ok(Stmt::Return(exprs))
            }
            Tok::Function => {
                self.next();
                let name = self.name()?;
                self.expect(Tok::LParen)?;
                let mut params = Vec::new();
                if !self.accept(Tok::RParen) {
                    params.push(self.name()?);
                    while self.accept(Tok::Comma) {
                        params.push(self.name()?);
                    }
                    self.expect(Tok::RParen)?;
                }
                let body = self.block(&[Tok::End])?;
                self.expect(Tok::End)?;
                Ok(Stmt::FunctionDecl {
                    name,
                    params,
                    body: Rc::new(body),
                })
            }
            Tok::Await => {
                self.next();
                let expr = self.await_operand()?;
                Ok(Stmt::Await {
                    expr,
                    dest: AwaitDest::Discard,
                })
            }
            _ => {
                let e = self.prefix_expr()?;
                if self.accept(Tok::Assign) {
                    let target = match e {
                        Expr::Var(n) => Target::Name(n),
                        Expr::Index(obj, key) => Target::Index(*obj, *key),
                        _ => return Err("cannot assign to this expression".into()),
                    };
                    Ok(Stmt::Assign(target, self.expr()?))
                } else if matches!(e, Expr::Call(..)) {
                    Ok(Stmt::Expr(e))
                } else {
                    Err("expected a statement".into())
                }
            }
        }
    }

    fn await_operand(&mut self) -> Result<Expr, String> {
        self.expect(Tok::LParen)?;
        let expr = self.expr()?;
        self.expect(Tok::RParen)?;
        Ok(expr)
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.concat_expr()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinOp::Eq,
                Tok::NotEq => BinOp::Ne,
                Tok::Lt => BinOp::Lt,
                Tok::Le => BinOp::Le,
                Tok::Gt => BinOp::Gt,
                Tok::Ge => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.next();
            let rhs = self.concat_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn concat_expr(&mut self) -> Result<Expr, String> {
        let lhs = self.add_expr()?;
        if self.accept(Tok::Concat) {
            // right-associative
            let rhs = self.concat_expr()?;
            Ok(Expr::Binary(BinOp::Concat, Box::new(lhs), Box::new(rhs)))
        } else {
            Ok(lhs)
        }
    }

    fn add_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.next();
            let rhs = self.mul_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn mul_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.next();
            let rhs = self.unary_expr()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary_expr(&mut self) -> Result<Expr, String> {
        if self.accept(Tok::Minus) {
            Ok(Expr::Neg(Box::new(self.unary_expr()?)))
        } else {
            self.prefix_expr()
        }
    }

    fn prefix_expr(&mut self) -> Result<Expr, String> {
        let mut e = self.primary_expr()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.next();
                    let field = self.name()?;
                    e = Expr::Index(Box::new(e), Box::new(Expr::Str(field)));
                }
                Tok::LBracket => {
                    self.next();
                    let key = self.expr()?;
                    self.expect(Tok::RBracket)?;
                    e = Expr::Index(Box::new(e), Box::new(key));
                }
                Tok::LParen => {
                    self.next();
                    let mut args = Vec::new();
                    if !self.accept(Tok::RParen) {
                        args.push(self.expr()?);
                        while self.accept(Tok::Comma) {
                            args.push(self.expr()?);
                        }
                        self.expect(Tok::RParen)?;
                    }
                    e = Expr::Call(Box::new(e), args);
                }
                _ => return Ok(e),
            }
        }
    }

    fn primary_expr(&mut self) -> Result<Expr, String> {
        match self.next() {
            Tok::Nil => Ok(Expr::Nil),
            Tok::True => Ok(Expr::True),
            Tok::False => Ok(Expr::False),
            Tok::Number(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Name(n) => Ok(Expr::Var(n)),
            Tok::LParen => {
                let e = self.expr()?;
                self.expect(Tok::RParen)?;
                Ok(e)
            }
            Tok::LBrace => self.table_ctor(),
            Tok::Await => Err("await is only allowed at statement level".into()),
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    fn table_ctor(&mut self) -> Result<Expr, String> {
        let mut items = Vec::new();
        loop {
            if self.accept(Tok::RBrace) {
                return Ok(Expr::Table(items));
            }
            let item = match self.peek().clone() {
                Tok::Name(n) if self.toks.get(self.pos + 1) == Some(&Tok::Assign) => {
                    self.next();
                    self.next();
                    TableItem::Named(n, self.expr()?)
                }
                Tok::LBracket => {
                    self.next();
                    let key = self.expr()?;
                    self.expect(Tok::RBracket)?;
                    self.expect(Tok::Assign)?;
                    TableItem::Keyed(key, self.expr()?)
                }
                _ => TableItem::Positional(self.expr()?),
            };
            items.push(item);
            if !self.accept(Tok::Comma) && !self.accept(Tok::Semi) {
                self.expect(Tok::RBrace)?;
                return Ok(Expr::Table(items));
            }
        }
    }
}

// ============================================================================
// Evaluator
// ============================================================================

const YIELD_OUTSIDE: &str = "attempt to yield from outside a coroutine";

/// A paused chunk execution: the body, its frame, and where the next
/// resume value goes.
pub(crate) struct Coroutine {
    body: Rc<Program>,
    locals: FxHashMap<String, Value>,
    pc: usize,
    pending: Option<AwaitDest>,
}

/// Result of driving a coroutine.
pub(crate) enum Run {
    Yielded(Value),
    Done(Vec<Value>),
}

enum StmtFlow {
    Next,
    Yield(Value, AwaitDest),
    Return(Vec<Value>),
}

impl Coroutine {
    pub(crate) fn new(body: Rc<Program>, params: &[String], args: Vec<Value>) -> Self {
        Self {
            body,
            locals: bind_params(params, args),
            pc: 0,
            pending: None,
        }
    }

    /// Continue execution. `args` is empty on first entry and `(ok, v)` on
    /// re-entry after a suspension. A raised value surfaces as `Err`.
    pub(crate) fn resume(
        &mut self,
        vm: &MiniLua,
        root: u32,
        args: Vec<Value>,
    ) -> Result<Run, Value> {
        if let Some(dest) = self.pending.take() {
            let ok = truthy(args.first().unwrap_or(&Value::Nil));
            let v = args.get(1).cloned().unwrap_or(Value::Nil);
            if !ok {
                return Err(v);
            }
            match dest {
                AwaitDest::Local(name) => {
                    self.locals.insert(name, v);
                }
                AwaitDest::Return => return Ok(Run::Done(vec![v])),
                AwaitDest::Discard => {}
            }
        }
        let body = Rc::clone(&self.body);
        while self.pc < body.stmts.len() {
            let stmt = &body.stmts[self.pc];
            self.pc += 1;
            match exec_stmt(vm, root, &mut self.locals, stmt, true)? {
                StmtFlow::Next => {}
                StmtFlow::Yield(v, dest) => {
                    self.pending = Some(dest);
                    return Ok(Run::Yielded(v));
                }
                StmtFlow::Return(vs) => return Ok(Run::Done(vs)),
            }
        }
        Ok(Run::Done(Vec::new()))
    }
}

fn bind_params(params: &[String], mut args: Vec<Value>) -> FxHashMap<String, Value> {
    args.resize(params.len().max(args.len()), Value::Nil);
    params
        .iter()
        .cloned()
        .zip(args)
        .collect::<FxHashMap<_, _>>()
}

/// Call a function value synchronously (no suspension allowed).
pub(crate) fn call_function(
    vm: &MiniLua,
    root: u32,
    fid: u32,
    args: Vec<Value>,
) -> Result<Vec<Value>, Value> {
    let rec = vm
        .func_rec(fid)
        .ok_or_else(|| Value::Str("attempt to call a stale function".into()))?;
    match rec {
        FuncRec::Builtin(b) => call_builtin(b, args),
        FuncRec::Host(host_id) => vm.call_host(root, host_id, args),
        FuncRec::Chunk { params, body } => {
            let mut locals = bind_params(&params, args);
            for stmt in &body.stmts {
                match exec_stmt(vm, root, &mut locals, stmt, false)? {
                    StmtFlow::Next => {}
                    StmtFlow::Yield(..) => return Err(Value::Str(YIELD_OUTSIDE.into())),
                    StmtFlow::Return(vs) => return Ok(vs),
                }
            }
            Ok(Vec::new())
        }
    }
}

fn call_builtin(b: Builtin, args: Vec<Value>) -> Result<Vec<Value>, Value> {
    let first = args.into_iter().next().unwrap_or(Value::Nil);
    match b {
        Builtin::Error => Err(first),
        Builtin::Type => Ok(vec![Value::Str(type_name(&first).into())]),
    }
}

pub(crate) fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Nil => "nil",
        Value::Boolean(_) => "boolean",
        Value::Number(_) => "number",
        Value::Str(_) => "string",
        Value::Table(_) => "table",
        Value::Function(_) => "function",
        Value::Userdata(_) => "userdata",
        Value::Thread(_) => "thread",
    }
}

fn truthy(v: &Value) -> bool {
    !matches!(v, Value::Nil | Value::Boolean(false))
}

fn exec_stmt(
    vm: &MiniLua,
    root: u32,
    locals: &mut FxHashMap<String, Value>,
    stmt: &Stmt,
    allow_yield: bool,
) -> Result<StmtFlow, Value> {
    match stmt {
        Stmt::Local(name, expr) => {
            let v = eval_expr(vm, root, locals, expr)?;
            locals.insert(name.clone(), v);
            Ok(StmtFlow::Next)
        }
        Stmt::Assign(target, expr) => {
            let v = eval_expr(vm, root, locals, expr)?;
            match target {
                Target::Name(name) => {
                    if locals.contains_key(name) {
                        locals.insert(name.clone(), v);
                    } else {
                        vm.set_global_value(root, name, v);
                    }
                }
                Target::Index(obj, key) => {
                    let table = eval_expr(vm, root, locals, obj)?;
                    let key = eval_expr(vm, root, locals, key)?;
                    match table {
                        Value::Table(tid) => vm.table_set(tid, key, v),
                        other => {
                            return Err(Value::Str(format!(
                                "attempt to index a {} value",
                                type_name(&other)
                            )))
                        }
                    }
                }
            }
            Ok(StmtFlow::Next)
        }
        Stmt::Return(exprs) => {
            let mut out = Vec::with_capacity(exprs.len());
            for e in exprs {
                out.push(eval_expr(vm, root, locals, e)?);
            }
            Ok(StmtFlow::Return(out))
        }
        Stmt::Expr(e) => {
            eval_expr(vm, root, locals, e)?;
            Ok(StmtFlow::Next)
        }
        Stmt::FunctionDecl { name, params, body } => {
            let fid = vm.alloc_function(FuncRec::Chunk {
                params: params.clone(),
                body: Rc::clone(body),
            });
            vm.set_global_value(root, name, Value::Function(fid));
            Ok(StmtFlow::Next)
        }
        Stmt::Await { expr, dest } => {
            if !allow_yield {
                return Err(Value::Str(YIELD_OUTSIDE.into()));
            }
            let v = eval_expr(vm, root, locals, expr)?;
            Ok(StmtFlow::Yield(v, dest.clone()))
        }
    }
}

fn eval_expr(
    vm: &MiniLua,
    root: u32,
    locals: &mut FxHashMap<String, Value>,
    expr: &Expr,
) -> Result<Value, Value> {
    match expr {
        Expr::Nil => Ok(Value::Nil),
        Expr::True => Ok(Value::Boolean(true)),
        Expr::False => Ok(Value::Boolean(false)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Var(name) => Ok(locals
            .get(name)
            .cloned()
            .unwrap_or_else(|| vm.get_global_value(root, name))),
        Expr::Index(obj, key) => {
            let table = eval_expr(vm, root, locals, obj)?;
            let key = eval_expr(vm, root, locals, key)?;
            match table {
                Value::Table(tid) => Ok(vm.table_get(tid, &key)),
                other => Err(Value::Str(format!(
                    "attempt to index a {} value",
                    type_name(&other)
                ))),
            }
        }
        Expr::Call(callee, arg_exprs) => {
            let f = eval_expr(vm, root, locals, callee)?;
            let mut args = Vec::with_capacity(arg_exprs.len());
            for a in arg_exprs {
                args.push(eval_expr(vm, root, locals, a)?);
            }
            match f {
                Value::Function(fid) => {
                    let results = call_function(vm, root, fid, args)?;
                    Ok(results.into_iter().next().unwrap_or(Value::Nil))
                }
                other => Err(Value::Str(format!(
                    "attempt to call a {} value",
                    type_name(&other)
                ))),
            }
        }
        Expr::Table(items) => {
            let mut entries: Vec<(Value, Value)> = Vec::with_capacity(items.len());
            let mut positional = 0usize;
            for item in items {
                let (k, v) = match item {
                    TableItem::Named(name, e) => (
                        Value::Str(name.clone()),
                        eval_expr(vm, root, locals, e)?,
                    ),
                    TableItem::Keyed(ke, ve) => (
                        eval_expr(vm, root, locals, ke)?,
                        eval_expr(vm, root, locals, ve)?,
                    ),
                    TableItem::Positional(e) => {
                        positional += 1;
                        (
                            Value::Number(positional as f64),
                            eval_expr(vm, root, locals, e)?,
                        )
                    }
                };
                if let Some(slot) = entries.iter_mut().find(|(ek, _)| *ek == k) {
                    slot.1 = v;
                } else {
                    entries.push((k, v));
                }
            }
            Ok(Value::Table(vm.alloc_table(entries)))
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = eval_expr(vm, root, locals, lhs)?;
            let b = eval_expr(vm, root, locals, rhs)?;
            eval_binop(*op, a, b)
        }
        Expr::Neg(e) => match eval_expr(vm, root, locals, e)? {
            Value::Number(n) => Ok(Value::Number(-n)),
            other => Err(Value::Str(format!(
                "attempt to perform arithmetic on a {} value",
                type_name(&other)
            ))),
        },
    }
}

fn eval_binop(op: BinOp, a: Value, b: Value) -> Result<Value, Value> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
            let (x, y) = match (&a, &b) {
                (Value::Number(x), Value::Number(y)) => (*x, *y),
                _ => {
                    let offender = if matches!(a, Value::Number(_)) { &b } else { &a };
                    return Err(Value::Str(format!(
                        "attempt to perform arithmetic on a {} value",
                        type_name(offender)
                    )));
                }
            };
            Ok(Value::Number(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                _ => x / y,
            }))
        }
        BinOp::Concat => {
            let render = |v: &Value| -> Result<String, Value> {
                match v {
                    Value::Str(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(fmt_number(*n)),
                    other => Err(Value::Str(format!(
                        "attempt to concatenate a {} value",
                        type_name(other)
                    ))),
                }
            };
            Ok(Value::Str(format!("{}{}", render(&a)?, render(&b)?)))
        }
        BinOp::Eq => Ok(Value::Boolean(a == b)),
        BinOp::Ne => Ok(Value::Boolean(a != b)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => Ok(Value::Boolean(match op {
                BinOp::Lt => x < y,
                BinOp::Le => x <= y,
                BinOp::Gt => x > y,
                _ => x >= y,
            })),
            (Value::Str(x), Value::Str(y)) => Ok(Value::Boolean(match op {
                BinOp::Lt => x < y,
                BinOp::Le => x <= y,
                BinOp::Gt => x > y,
                _ => x >= y,
            })),
            _ => Err(Value::Str(format!(
                "attempt to compare {} with {}",
                type_name(&a),
                type_name(&b)
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_locals_and_returns() {
        let p = parse("local x = 1 + 2\nreturn x").unwrap();
        assert_eq!(p.stmts.len(), 2);
        assert!(matches!(p.stmts[0], Stmt::Local(..)));
        assert!(matches!(p.stmts[1], Stmt::Return(..)));
    }

    #[test]
    fn parses_await_destinations() {
        let p = parse("local a = await(f())\nawait(g())\nreturn await(h())").unwrap();
        assert!(matches!(
            p.stmts[0],
            Stmt::Await {
                dest: AwaitDest::Local(_),
                ..
            }
        ));
        assert!(matches!(
            p.stmts[1],
            Stmt::Await {
                dest: AwaitDest::Discard,
                ..
            }
        ));
        assert!(matches!(
            p.stmts[2],
            Stmt::Await {
                dest: AwaitDest::Return,
                ..
            }
        ));
    }

    #[test]
    fn rejects_await_inside_expressions() {
        let err = parse("local x = 1 + await(f())").unwrap_err();
        assert!(err.contains("statement level"));
    }

    #[test]
    fn parses_table_constructors() {
        let p = parse("return { a = 1, [2] = 'two', 'pos' }").unwrap();
        match &p.stmts[0] {
            Stmt::Return(exprs) => match &exprs[0] {
                Expr::Table(items) => {
                    assert_eq!(items.len(), 3);
                    assert!(matches!(items[0], TableItem::Named(..)));
                    assert!(matches!(items[1], TableItem::Keyed(..)));
                    assert!(matches!(items[2], TableItem::Positional(..)));
                }
                other => panic!("expected a table constructor, got {other:?}"),
            },
            other => panic!("expected return, got {other:?}"),
        }
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(parse("local = 3").is_err());
        assert!(parse("return 'unfinished").is_err());
        assert!(parse("return 1 +").is_err());
    }

    #[test]
    fn comments_and_semicolons_are_skipped() {
        let p = parse("-- header\nlocal x = 1; return x -- trailing").unwrap();
        assert_eq!(p.stmts.len(), 2);
    }
}
