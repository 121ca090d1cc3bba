//! Recursive-descent parser for the script language.

use std::sync::Arc;

use serde_json::Value;

use crate::ast::{
    BinaryOp, CatchClause, Declarator, Expr, Function, LogicalOp, Program, Stmt, TemplatePart,
    UnaryOp,
};
use crate::error::ScriptError;
use crate::lexer::{Keyword, Lexer, Punct, TemplateChunk, Tok, Token};
use crate::value::number;

/// Deepest nesting of statements and expressions a script may use.
pub const MAX_NEST_DEPTH: usize = 64;

/// Parse a whole script or harness template.
pub fn parse_program(source: &str) -> Result<Program, ScriptError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens, 0);
    let mut body = Vec::new();
    while !parser.at_end() {
        if parser.eat_punct(Punct::Semi) {
            continue;
        }
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

/// Parse a lone expression, e.g. a template substitution.
pub fn parse_expression(source: &str, line: usize) -> Result<Expr, ScriptError> {
    parse_nested_expression(source, line, 0)
}

fn parse_nested_expression(source: &str, line: usize, depth: usize) -> Result<Expr, ScriptError> {
    let tokens = Lexer::starting_at(source, line).tokenize()?;
    let mut parser = Parser::new(tokens, depth);
    let expr = parser.expression()?;
    if !parser.at_end() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
        }
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<T, ScriptError> {
        if self.depth >= MAX_NEST_DEPTH {
            return Err(self.error(format!("code is nested more than {MAX_NEST_DEPTH} levels deep")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), Tok::Eof)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn unexpected(&self) -> ScriptError {
        let found = match self.peek() {
            Tok::Eof => "end of input".to_string(),
            Tok::Ident(name) => format!("`{name}`"),
            Tok::Kw(kw) => format!("keyword {kw:?}").to_lowercase(),
            Tok::Punct(p) => format!("{p:?}"),
            Tok::Num(n) => n.to_string(),
            Tok::Str(_) | Tok::Template(_) => "string".to_string(),
            Tok::Placeholder => "code placeholder".to_string(),
        };
        self.error(format!("unexpected {found}"))
    }

    fn check_punct(&self, punct: Punct) -> bool {
        matches!(self.peek(), Tok::Punct(p) if *p == punct)
    }

    fn check_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), Tok::Kw(k) if *k == kw)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct, what: &str) -> Result<(), ScriptError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn ident(&mut self) -> Result<String, ScriptError> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn end_statement(&mut self) {
        self.eat_punct(Punct::Semi);
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> Result<Stmt, ScriptError> {
        match self.peek().clone() {
            Tok::Placeholder => {
                self.advance();
                Ok(Stmt::Placeholder)
            }
            Tok::Punct(Punct::LBrace) => Ok(Stmt::Block(self.block()?)),
            Tok::Kw(Keyword::Let) | Tok::Kw(Keyword::Var) | Tok::Kw(Keyword::Const) => {
                let stmt = self.declaration()?;
                self.end_statement();
                Ok(stmt)
            }
            Tok::Kw(Keyword::If) => self.if_statement(),
            Tok::Kw(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen, "`(` after while")?;
                let cond = self.expression()?;
                self.expect_punct(Punct::RParen, "`)` after loop condition")?;
                let body = self.body()?;
                Ok(Stmt::While { cond, body })
            }
            Tok::Kw(Keyword::For) => self.for_statement(),
            Tok::Kw(Keyword::Async) | Tok::Kw(Keyword::Function) => self.function(),
            Tok::Kw(Keyword::Break) => {
                self.advance();
                self.end_statement();
                Ok(Stmt::Break)
            }
            Tok::Kw(Keyword::Continue) => {
                self.advance();
                self.end_statement();
                Ok(Stmt::Continue)
            }
            Tok::Kw(Keyword::Return) => {
                self.advance();
                let value = if self.check_punct(Punct::Semi)
                    || self.check_punct(Punct::RBrace)
                    || self.at_end()
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement();
                Ok(Stmt::Return(value))
            }
            Tok::Kw(Keyword::Throw) => {
                self.advance();
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Throw(value))
            }
            Tok::Kw(Keyword::Try) => self.try_statement(),
            _ => {
                let expr = self.expression()?;
                self.end_statement();
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect_punct(Punct::LBrace, "`{`")?;
        let mut body = Vec::new();
        loop {
            if self.eat_punct(Punct::RBrace) {
                return Ok(body);
            }
            if self.at_end() {
                return Err(self.error("missing `}`"));
            }
            if self.eat_punct(Punct::Semi) {
                continue;
            }
            body.push(self.statement()?);
        }
    }

    /// Loop or branch body: a block, or a single statement.
    fn body(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        if self.check_punct(Punct::LBrace) {
            self.block()
        } else {
            Ok(vec![self.statement()?])
        }
    }

    fn declaration(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        let mutable = !matches!(self.advance(), Tok::Kw(Keyword::Const));
        let mut decls = Vec::new();
        loop {
            if self.check_punct(Punct::LBrace) || self.check_punct(Punct::LBracket) {
                return Err(self.error("destructuring declarations are not supported"));
            }
            let name = self.ident()?;
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.expression()?)
            } else if !mutable {
                return Err(self.error(format!("missing initializer in const declaration of `{name}`")));
            } else {
                None
            };
            decls.push(Declarator { name, init });
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(Stmt::Let {
            mutable,
            decls,
            line,
        })
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        self.expect_punct(Punct::LParen, "`(` after if")?;
        let cond = self.expression()?;
        self.expect_punct(Punct::RParen, "`)` after condition")?;
        let then = self.body()?;
        let otherwise = if self.eat_kw(Keyword::Else) {
            if self.check_kw(Keyword::If) {
                vec![self.if_statement()?]
            } else {
                self.body()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        self.advance();
        if self.check_kw(Keyword::Await) {
            return Err(self.error("for await is not supported"));
        }
        self.expect_punct(Punct::LParen, "`(` after for")?;

        let declares = matches!(
            self.peek(),
            Tok::Kw(Keyword::Let) | Tok::Kw(Keyword::Const) | Tok::Kw(Keyword::Var)
        );
        if declares && matches!(self.peek_next(), Tok::Ident(_)) {
            let is_of = matches!(self.tokens.get(self.pos + 2).map(|t| &t.tok), Some(Tok::Kw(Keyword::Of)));
            if is_of {
                let mutable = !matches!(self.advance(), Tok::Kw(Keyword::Const));
                let name = self.ident()?;
                self.advance();
                let iterable = self.expression()?;
                self.expect_punct(Punct::RParen, "`)` after for..of")?;
                let body = self.body()?;
                return Ok(Stmt::ForOf {
                    name,
                    mutable,
                    iterable,
                    body,
                    line,
                });
            }
        }

        let init = if self.check_punct(Punct::Semi) {
            None
        } else if declares {
            Some(Box::new(self.declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(Punct::Semi, "`;` after loop initializer")?;
        let cond = if self.check_punct(Punct::Semi) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::Semi, "`;` after loop condition")?;
        let update = if self.check_punct(Punct::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::RParen, "`)` after loop header")?;
        let body = self.body()?;
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn function(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        self.eat_kw(Keyword::Async);
        if !self.eat_kw(Keyword::Function) {
            return Err(self.error("expected `function` after async"));
        }
        let name = self.ident()?;
        self.expect_punct(Punct::LParen, "`(` after function name")?;
        let mut params = Vec::new();
        while !self.eat_punct(Punct::RParen) {
            params.push(self.ident()?);
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen, "`)` after parameters")?;
                break;
            }
        }
        let body = self.block()?;
        Ok(Stmt::Function(Arc::new(Function {
            name,
            params,
            body,
            line,
        })))
    }

    fn try_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        let body = self.block()?;
        let catch = if self.eat_kw(Keyword::Catch) {
            let binding = if self.eat_punct(Punct::LParen) {
                let name = self.ident()?;
                self.expect_punct(Punct::RParen, "`)` after catch binding")?;
                Some(name)
            } else {
                None
            };
            Some(CatchClause {
                binding,
                body: self.block()?,
            })
        } else {
            None
        };
        let finally = if self.eat_kw(Keyword::Finally) {
            self.block()?
        } else {
            Vec::new()
        };
        if catch.is_none() && finally.is_empty() {
            return Err(self.error("missing catch or finally after try"));
        }
        Ok(Stmt::Try {
            body,
            catch,
            finally,
        })
    }

    // ---- expressions ----

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, ScriptError> {
        self.nested(Self::assignment_inner)
    }

    fn assignment_inner(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        let target = self.conditional()?;
        let op = match self.peek() {
            Tok::Punct(Punct::Assign) => None,
            Tok::Punct(Punct::PlusEq) => Some(BinaryOp::Add),
            Tok::Punct(Punct::MinusEq) => Some(BinaryOp::Sub),
            Tok::Punct(Punct::StarEq) => Some(BinaryOp::Mul),
            Tok::Punct(Punct::SlashEq) => Some(BinaryOp::Div),
            Tok::Punct(Punct::PercentEq) => Some(BinaryOp::Rem),
            Tok::Punct(Punct::Arrow) => return Err(self.error("arrow functions are not supported")),
            _ => return Ok(target),
        };
        if !is_place(&target) {
            return Err(self.error("invalid assignment target"));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
            line,
        })
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let cond = self.logical(0)?;
        if !self.eat_punct(Punct::Question) {
            return Ok(cond);
        }
        let then = self.assignment()?;
        self.expect_punct(Punct::Colon, "`:` in conditional expression")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    /// `??` binds loosest, then `||`, then `&&`.
    fn logical(&mut self, level: usize) -> Result<Expr, ScriptError> {
        const LEVELS: [(Punct, LogicalOp); 3] = [
            (Punct::Nullish, LogicalOp::Nullish),
            (Punct::Or, LogicalOp::Or),
            (Punct::And, LogicalOp::And),
        ];
        let Some(&(punct, op)) = LEVELS.get(level) else {
            return self.equality();
        };
        let mut lhs = self.logical(level + 1)?;
        while self.eat_punct(punct) {
            let rhs = self.logical(level + 1)?;
            lhs = Expr::Logical {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn binary_level(
        &mut self,
        ops: &[(Punct, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
    ) -> Result<Expr, ScriptError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for &(punct, op) in ops {
                if self.check_punct(punct) {
                    let line = self.line();
                    self.advance();
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        line,
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[(Punct::Eq, BinaryOp::Eq), (Punct::NotEq, BinaryOp::NotEq)],
            Self::relational,
        )
    }

    fn relational(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                (Punct::Lt, BinaryOp::Lt),
                (Punct::LtEq, BinaryOp::LtEq),
                (Punct::Gt, BinaryOp::Gt),
                (Punct::GtEq, BinaryOp::GtEq),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            &[
                (Punct::Star, BinaryOp::Mul),
                (Punct::Slash, BinaryOp::Div),
                (Punct::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        let op = match self.peek() {
            Tok::Punct(Punct::Not) => UnaryOp::Not,
            Tok::Punct(Punct::Minus) => UnaryOp::Neg,
            Tok::Punct(Punct::Plus) => UnaryOp::Plus,
            Tok::Kw(Keyword::Typeof) => UnaryOp::Typeof,
            Tok::Kw(Keyword::Await) => {
                self.advance();
                let operand = self.nested(Self::unary)?;
                return Ok(Expr::Await(Box::new(operand)));
            }
            Tok::Punct(p @ (Punct::PlusPlus | Punct::MinusMinus)) => {
                let delta = if *p == Punct::PlusPlus { 1.0 } else { -1.0 };
                self.advance();
                let target = self.nested(Self::unary)?;
                if !is_place(&target) {
                    return Err(self.error("invalid increment target"));
                }
                return Ok(Expr::Update {
                    target: Box::new(target),
                    delta,
                    prefix: true,
                    line,
                });
            }
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        let expr = self.call()?;
        let delta = match self.peek() {
            Tok::Punct(Punct::PlusPlus) => 1.0,
            Tok::Punct(Punct::MinusMinus) => -1.0,
            _ => return Ok(expr),
        };
        if !is_place(&expr) {
            return Err(self.error("invalid increment target"));
        }
        self.advance();
        Ok(Expr::Update {
            target: Box::new(expr),
            delta,
            prefix: false,
            line,
        })
    }

    fn call(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary()?;
        loop {
            let line = self.line();
            if self.eat_punct(Punct::Dot) {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                    line,
                };
            } else if self.eat_punct(Punct::QuestionDot) {
                if self.check_punct(Punct::LParen) || self.check_punct(Punct::LBracket) {
                    return Err(self.error("optional calls and indexing are not supported"));
                }
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: true,
                    line,
                };
            } else if self.eat_punct(Punct::LBracket) {
                let index = self.expression()?;
                self.expect_punct(Punct::RBracket, "`]`")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    line,
                };
            } else if self.eat_punct(Punct::LParen) {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    line,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Member names may be keywords (`x.of`, `list.null`).
    fn property_name(&mut self) -> Result<String, ScriptError> {
        match self.advance() {
            Tok::Ident(name) => Ok(name),
            Tok::Kw(kw) => Ok(format!("{kw:?}").to_lowercase()),
            _ => Err(self.error("expected property name")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut args = Vec::new();
        while !self.eat_punct(Punct::RParen) {
            args.push(self.assignment()?);
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen, "`)` after arguments")?;
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        match self.advance() {
            Tok::Num(n) => Ok(Expr::Literal(number(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Template(chunks) => {
                let mut parts = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    parts.push(match chunk {
                        TemplateChunk::Text(text) => TemplatePart::Text(text),
                        TemplateChunk::Code { source, line } => {
                            TemplatePart::Expr(parse_nested_expression(&source, line, self.depth + 1)?)
                        }
                    });
                }
                Ok(Expr::Template(parts))
            }
            Tok::Ident(name) => {
                if self.check_punct(Punct::Arrow) {
                    return Err(self.error("arrow functions are not supported"));
                }
                Ok(Expr::Ident { name, line })
            }
            Tok::Kw(Keyword::True) => Ok(Expr::Literal(Value::Bool(true))),
            Tok::Kw(Keyword::False) => Ok(Expr::Literal(Value::Bool(false))),
            Tok::Kw(Keyword::Null) | Tok::Kw(Keyword::Undefined) => Ok(Expr::Literal(Value::Null)),
            Tok::Kw(Keyword::Function) | Tok::Kw(Keyword::Async) => Err(ScriptError::Syntax {
                line,
                message: "function expressions are not supported; declare a named function".into(),
            }),
            Tok::Kw(Keyword::New) => {
                let constructed = self.nested(Self::call)?;
                match &constructed {
                    Expr::Call { callee, .. } if callee.ident_name() == Some("Error") => Ok(constructed),
                    _ => Err(ScriptError::Syntax {
                        line,
                        message: "only `new Error(..)` is supported".into(),
                    }),
                }
            }
            Tok::Punct(Punct::LParen) => {
                let inner = self.expression()?;
                self.expect_punct(Punct::RParen, "`)`")?;
                if self.check_punct(Punct::Arrow) {
                    return Err(self.error("arrow functions are not supported"));
                }
                Ok(inner)
            }
            Tok::Punct(Punct::LBracket) => {
                let mut items = Vec::new();
                while !self.eat_punct(Punct::RBracket) {
                    items.push(self.assignment()?);
                    if !self.eat_punct(Punct::Comma) {
                        self.expect_punct(Punct::RBracket, "`]` after array elements")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Tok::Punct(Punct::LBrace) => self.object(),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected())
            }
        }
    }

    fn object(&mut self) -> Result<Expr, ScriptError> {
        let mut fields = Vec::new();
        while !self.eat_punct(Punct::RBrace) {
            let line = self.line();
            let key = match self.advance() {
                Tok::Ident(name) => name,
                Tok::Str(s) => s,
                Tok::Num(n) => crate::value::display(&number(n)),
                Tok::Kw(kw) => format!("{kw:?}").to_lowercase(),
                _ => return Err(self.error("expected property name")),
            };
            let value = if self.eat_punct(Punct::Colon) {
                self.assignment()?
            } else {
                Expr::Ident {
                    name: key.clone(),
                    line,
                }
            };
            fields.push((key, value));
            if !self.eat_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace, "`}` after object fields")?;
                break;
            }
        }
        Ok(Expr::Object(fields))
    }
}

fn is_place(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident { .. } | Expr::Member { optional: false, .. } | Expr::Index { .. }
    )
}
