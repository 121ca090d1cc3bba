//! Syntax tree for the script language.

use std::sync::Arc;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub binding: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        mutable: bool,
        decls: Vec<Declarator>,
        line: usize,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Expr>,
        body: Vec<Stmt>,
    },
    ForOf {
        name: String,
        mutable: bool,
        iterable: Expr,
        body: Vec<Stmt>,
        line: usize,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        catch: Option<CatchClause>,
        finally: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
    Function(Arc<Function>),
    /// Cooperative cancellation point.
    Checkpoint,
    /// Where staged code is spliced into the harness.
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    Typeof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident {
        name: String,
        line: usize,
    },
    Template(Vec<TemplatePart>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
        line: usize,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        line: usize,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        line: usize,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        line: usize,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `op` is `None` for plain `=`.
    Assign {
        target: Box<Expr>,
        op: Option<BinaryOp>,
        value: Box<Expr>,
        line: usize,
    },
    Update {
        target: Box<Expr>,
        delta: f64,
        prefix: bool,
        line: usize,
    },
    Await(Box<Expr>),
}

impl Expr {
    pub fn ident_name(&self) -> Option<&str> {
        match self {
            Self::Ident { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Namespaces whose members are forwarded to the world's skill surface.
pub const SKILL_NAMESPACES: &[&str] = &["skills", "world"];

/// Every `skills.X(..)` / `world.X(..)` call in `stmts`, with its line.
pub fn skill_calls(stmts: &[Stmt]) -> Vec<(String, usize)> {
    let mut found = Vec::new();
    for stmt in stmts {
        walk_stmt(stmt, &mut found);
    }
    found
}

fn walk_block(stmts: &[Stmt], found: &mut Vec<(String, usize)>) {
    for stmt in stmts {
        walk_stmt(stmt, found);
    }
}

fn walk_stmt(stmt: &Stmt, found: &mut Vec<(String, usize)>) {
    match stmt {
        Stmt::Let { decls, .. } => {
            for decl in decls {
                if let Some(init) = &decl.init {
                    walk_expr(init, found);
                }
            }
        }
        Stmt::Expr(e) | Stmt::Throw(e) | Stmt::Return(Some(e)) => walk_expr(e, found),
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            walk_expr(cond, found);
            walk_block(then, found);
            walk_block(otherwise, found);
        }
        Stmt::While { cond, body } => {
            walk_expr(cond, found);
            walk_block(body, found);
        }
        Stmt::For {
            init,
            cond,
            update,
            body,
        } => {
            if let Some(init) = init {
                walk_stmt(init, found);
            }
            for e in cond.iter().chain(update.iter()) {
                walk_expr(e, found);
            }
            walk_block(body, found);
        }
        Stmt::ForOf { iterable, body, .. } => {
            walk_expr(iterable, found);
            walk_block(body, found);
        }
        Stmt::Try {
            body,
            catch,
            finally,
        } => {
            walk_block(body, found);
            if let Some(catch) = catch {
                walk_block(&catch.body, found);
            }
            walk_block(finally, found);
        }
        Stmt::Block(body) => walk_block(body, found),
        Stmt::Function(f) => walk_block(&f.body, found),
        Stmt::Return(None)
        | Stmt::Break
        | Stmt::Continue
        | Stmt::Checkpoint
        | Stmt::Placeholder => {}
    }
}

fn walk_expr(expr: &Expr, found: &mut Vec<(String, usize)>) {
    match expr {
        Expr::Call { callee, args, line } => {
            if let Expr::Member {
                object, property, ..
            } = callee.as_ref()
            {
                if object
                    .ident_name()
                    .is_some_and(|ns| SKILL_NAMESPACES.contains(&ns))
                {
                    found.push((property.clone(), *line));
                }
            }
            walk_expr(callee, found);
            for arg in args {
                walk_expr(arg, found);
            }
        }
        Expr::Template(parts) => {
            for part in parts {
                if let TemplatePart::Expr(e) = part {
                    walk_expr(e, found);
                }
            }
        }
        Expr::Array(items) => {
            for item in items {
                walk_expr(item, found);
            }
        }
        Expr::Object(fields) => {
            for (_, value) in fields {
                walk_expr(value, found);
            }
        }
        Expr::Member { object, .. } => walk_expr(object, found),
        Expr::Index { object, index, .. } => {
            walk_expr(object, found);
            walk_expr(index, found);
        }
        Expr::Unary { operand, .. } => walk_expr(operand, found),
        Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
            walk_expr(lhs, found);
            walk_expr(rhs, found);
        }
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            walk_expr(cond, found);
            walk_expr(then, found);
            walk_expr(otherwise, found);
        }
        Expr::Assign { target, value, .. } => {
            walk_expr(target, found);
            walk_expr(value, found);
        }
        Expr::Update { target, .. } => walk_expr(target, found),
        Expr::Await(inner) => walk_expr(inner, found),
        Expr::Literal(_) | Expr::Ident { .. } => {}
    }
}
