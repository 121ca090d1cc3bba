//! Tree-walking interpreter for staged scripts.
//!
//! Evaluation is async so skill calls can suspend. Every `Checkpoint`
//! statement and every loop iteration polls the action's interrupt token and
//! yields to the scheduler, which bounds cancellation latency even in loops
//! that never call into the world.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use hearth_core::{ActionContext, Interrupted};
use serde_json::{Map, Value};

use crate::ast::{BinaryOp, Expr, Function, LogicalOp, Program, Stmt, TemplatePart, UnaryOp, SKILL_NAMESPACES};
use crate::builtins;
use crate::error::ScriptError;
use crate::value::{add, compare, display, number, strict_eq, to_number, truthy, type_of};

/// Name of the entry function a harness must define.
pub const ENTRY_POINT: &str = "main";

const MAX_CALL_DEPTH: usize = 64;

/// Names resolved by the interpreter rather than by scope lookup.
const HELPER_NAMESPACES: &[&str] = &["Math", "JSON", "Object", "Array"];

struct Binding {
    value: Value,
    mutable: bool,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

type Eval<'s, T> = BoxFuture<'s, Result<T, ScriptError>>;

impl From<Interrupted> for ScriptError {
    fn from(_: Interrupted) -> Self {
        ScriptError::Interrupted
    }
}

pub struct Interpreter<'a> {
    cx: &'a ActionContext,
    scopes: Vec<HashMap<String, Binding>>,
    functions: HashMap<String, Arc<Function>>,
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(cx: &'a ActionContext) -> Self {
        Self {
            cx,
            scopes: vec![HashMap::new()],
            functions: HashMap::new(),
            depth: 0,
        }
    }

    /// Run the program's top level, then its entry point if it defines one.
    pub async fn run(&mut self, program: &Program) -> Result<Value, ScriptError> {
        self.hoist(&program.body);
        if let Flow::Return(value) = self.exec_stmts(&program.body).await? {
            return Ok(value);
        }
        match self.functions.get(ENTRY_POINT).cloned() {
            Some(main) => {
                let bot = self.bot_snapshot();
                self.call_function(main, vec![bot]).await
            }
            None => Ok(Value::Null),
        }
    }

    async fn checkpoint(&self) -> Result<(), ScriptError> {
        self.cx.checkpoint()?;
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Read-only view of the bot, fresh on every read.
    fn bot_snapshot(&self) -> Value {
        let status = self.cx.world().status();
        let mut value = serde_json::to_value(&status).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            let mut entity = Map::new();
            entity.insert("position".into(), map.get("position").cloned().unwrap_or(Value::Null));
            map.insert("entity".into(), Value::Object(entity));
        }
        value
    }

    fn hoist(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            if let Stmt::Function(f) = stmt {
                self.functions.insert(f.name.clone(), Arc::clone(f));
            }
        }
    }

    fn declare(&mut self, name: &str, value: Value, mutable: bool) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), Binding { value, mutable });
        }
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name))
    }

    // ---- statements ----

    fn exec_block<'s>(&'s mut self, stmts: &'s [Stmt]) -> Eval<'s, Flow> {
        async move {
            let depth = self.scopes.len();
            self.scopes.push(HashMap::new());
            self.hoist(stmts);
            let flow = self.exec_stmts(stmts).await;
            self.scopes.truncate(depth);
            flow
        }
        .boxed()
    }

    fn exec_stmts<'s>(&'s mut self, stmts: &'s [Stmt]) -> Eval<'s, Flow> {
        async move {
            for stmt in stmts {
                match self.exec(stmt).await? {
                    Flow::Normal => {}
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        }
        .boxed()
    }

    fn exec<'s>(&'s mut self, stmt: &'s Stmt) -> Eval<'s, Flow> {
        async move {
            match stmt {
                Stmt::Let { mutable, decls, .. } => {
                    for decl in decls {
                        let value = match &decl.init {
                            Some(init) => self.eval(init).await?,
                            None => Value::Null,
                        };
                        self.declare(&decl.name, value, *mutable);
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Expr(expr) => {
                    self.eval(expr).await?;
                    Ok(Flow::Normal)
                }
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if truthy(&self.eval(cond).await?) {
                        self.exec_block(then).await
                    } else {
                        self.exec_block(otherwise).await
                    }
                }
                Stmt::While { cond, body } => {
                    loop {
                        self.checkpoint().await?;
                        if !truthy(&self.eval(cond).await?) {
                            break;
                        }
                        match self.exec_block(body).await? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::For {
                    init,
                    cond,
                    update,
                    body,
                } => {
                    let depth = self.scopes.len();
                    self.scopes.push(HashMap::new());
                    let flow = self.exec_for(init.as_deref(), cond.as_ref(), update.as_ref(), body).await;
                    self.scopes.truncate(depth);
                    flow
                }
                Stmt::ForOf {
                    name,
                    mutable,
                    iterable,
                    body,
                    line,
                } => {
                    let items = match self.eval(iterable).await? {
                        Value::Array(items) => items,
                        Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                        other => {
                            return Err(ScriptError::Type {
                                line: *line,
                                message: format!("{} is not iterable", type_of(&other)),
                            })
                        }
                    };
                    for item in items {
                        self.checkpoint().await?;
                        let depth = self.scopes.len();
                        self.scopes.push(HashMap::new());
                        self.declare(name, item, *mutable);
                        let flow = self.exec_block(body).await;
                        self.scopes.truncate(depth);
                        match flow? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Break => Ok(Flow::Break),
                Stmt::Continue => Ok(Flow::Continue),
                Stmt::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval(expr).await?,
                        None => Value::Null,
                    };
                    Ok(Flow::Return(value))
                }
                Stmt::Throw(expr) => {
                    let value = self.eval(expr).await?;
                    let message = match &value {
                        Value::Object(map) => map.get("message").map(display).unwrap_or_else(|| display(&value)),
                        other => display(other),
                    };
                    Err(ScriptError::Thrown(message))
                }
                Stmt::Try {
                    body,
                    catch,
                    finally,
                } => {
                    let mut outcome = self.exec_block(body).await;
                    if let Some(clause) = catch {
                        let caught = match &outcome {
                            Err(ScriptError::Interrupted) | Ok(_) => None,
                            Err(e) => Some(caught_value(e)),
                        };
                        if let Some(caught) = caught {
                            let depth = self.scopes.len();
                            self.scopes.push(HashMap::new());
                            if let Some(binding) = &clause.binding {
                                self.declare(binding, caught, true);
                            }
                            outcome = self.exec_block(&clause.body).await;
                            self.scopes.truncate(depth);
                        }
                    }
                    if !matches!(outcome, Err(ScriptError::Interrupted)) && !finally.is_empty() {
                        match self.exec_block(finally).await? {
                            Flow::Normal => {}
                            other => return Ok(other),
                        }
                    }
                    outcome
                }
                Stmt::Block(body) => self.exec_block(body).await,
                Stmt::Checkpoint => {
                    self.checkpoint().await?;
                    Ok(Flow::Normal)
                }
                Stmt::Function(_) | Stmt::Placeholder => Ok(Flow::Normal),
            }
        }
        .boxed()
    }

    fn exec_for<'s>(
        &'s mut self,
        init: Option<&'s Stmt>,
        cond: Option<&'s Expr>,
        update: Option<&'s Expr>,
        body: &'s [Stmt],
    ) -> Eval<'s, Flow> {
        async move {
            if let Some(init) = init {
                self.exec(init).await?;
            }
            loop {
                self.checkpoint().await?;
                if let Some(cond) = cond {
                    if !truthy(&self.eval(cond).await?) {
                        break;
                    }
                }
                match self.exec_block(body).await? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
                if let Some(update) = update {
                    self.eval(update).await?;
                }
            }
            Ok(Flow::Normal)
        }
        .boxed()
    }

    fn call_function<'s>(&'s mut self, function: Arc<Function>, args: Vec<Value>) -> Eval<'s, Value> {
        async move {
            if self.depth >= MAX_CALL_DEPTH {
                return Err(ScriptError::Type {
                    line: function.line,
                    message: "Maximum call stack size exceeded".into(),
                });
            }
            self.depth += 1;
            let depth = self.scopes.len();
            self.scopes.push(HashMap::new());
            let mut args = args.into_iter();
            for param in &function.params {
                let value = args.next().unwrap_or(Value::Null);
                self.declare(param, value, true);
            }
            let flow = self.exec_block(&function.body).await;
            self.scopes.truncate(depth);
            self.depth -= 1;
            match flow? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Null),
            }
        }
        .boxed()
    }

    // ---- expressions ----

    fn eval<'s>(&'s mut self, expr: &'s Expr) -> Eval<'s, Value> {
        async move {
            match expr {
                Expr::Literal(value) => Ok(value.clone()),
                Expr::Ident { name, line } => self.read_ident(name, *line),
                Expr::Template(parts) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            TemplatePart::Text(text) => out.push_str(text),
                            TemplatePart::Expr(e) => out.push_str(&display(&self.eval(e).await?)),
                        }
                    }
                    Ok(Value::String(out))
                }
                Expr::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Ok(Value::Array(out))
                }
                Expr::Object(fields) => {
                    let mut map = Map::new();
                    for (key, value) in fields {
                        let value = self.eval(value).await?;
                        map.insert(key.clone(), value);
                    }
                    Ok(Value::Object(map))
                }
                Expr::Member {
                    object,
                    property,
                    optional,
                    line,
                } => {
                    if let Some(ns) = object.ident_name() {
                        if ns == "Math" && self.lookup(ns).is_none() {
                            if let Some(constant) = builtins::math_constant(property) {
                                return Ok(constant);
                            }
                        }
                    }
                    let target = self.eval(object).await?;
                    builtins::property(&target, property, *optional, *line)
                }
                Expr::Index { object, index, line } => {
                    let target = self.eval(object).await?;
                    let index = self.eval(index).await?;
                    builtins::index(&target, &index, *line)
                }
                Expr::Call { callee, args, line } => self.eval_call(callee, args, *line).await,
                Expr::Unary { op, operand } => {
                    if let (UnaryOp::Typeof, Some(name)) = (op, operand.ident_name()) {
                        if name != "bot" && self.lookup(name).is_none() {
                            return Ok(Value::String("undefined".into()));
                        }
                    }
                    let value = self.eval(operand).await?;
                    Ok(match op {
                        UnaryOp::Neg => number(-to_number(&value)),
                        UnaryOp::Plus => number(to_number(&value)),
                        UnaryOp::Not => Value::Bool(!truthy(&value)),
                        UnaryOp::Typeof => Value::String(type_of(&value).into()),
                    })
                }
                Expr::Binary { op, lhs, rhs, line } => {
                    let lhs = self.eval(lhs).await?;
                    let rhs = self.eval(rhs).await?;
                    binary(*op, &lhs, &rhs, *line)
                }
                Expr::Logical { op, lhs, rhs } => {
                    let left = self.eval(lhs).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !truthy(&left),
                        LogicalOp::Or => truthy(&left),
                        LogicalOp::Nullish => !left.is_null(),
                    };
                    if short_circuit {
                        Ok(left)
                    } else {
                        self.eval(rhs).await
                    }
                }
                Expr::Conditional {
                    cond,
                    then,
                    otherwise,
                } => {
                    if truthy(&self.eval(cond).await?) {
                        self.eval(then).await
                    } else {
                        self.eval(otherwise).await
                    }
                }
                Expr::Assign {
                    target,
                    op,
                    value,
                    line,
                } => {
                    let place = self.resolve_place(target).await?;
                    let rhs = self.eval(value).await?;
                    let slot = self.place_mut(&place, *line)?;
                    let new_value = match op {
                        Some(op) => binary(*op, slot, &rhs, *line)?,
                        None => rhs,
                    };
                    *slot = new_value.clone();
                    Ok(new_value)
                }
                Expr::Update {
                    target,
                    delta,
                    prefix,
                    line,
                } => {
                    let place = self.resolve_place(target).await?;
                    let slot = self.place_mut(&place, *line)?;
                    let old = to_number(slot);
                    *slot = number(old + delta);
                    Ok(if *prefix { number(old + delta) } else { number(old) })
                }
                Expr::Await(inner) => self.eval(inner).await,
            }
        }
        .boxed()
    }

    fn read_ident(&self, name: &str, line: usize) -> Result<Value, ScriptError> {
        if name == "bot" {
            return Ok(self.bot_snapshot());
        }
        if let Some(binding) = self.lookup(name) {
            return Ok(binding.value.clone());
        }
        if self.functions.contains_key(name) {
            return Ok(Value::String(format!("[function {name}]")));
        }
        Err(ScriptError::Reference {
            line,
            name: name.to_string(),
        })
    }

    async fn eval_args(&mut self, args: &[Expr], strip_bot: bool) -> Result<Vec<Value>, ScriptError> {
        let skip = usize::from(strip_bot && args.first().and_then(Expr::ident_name) == Some("bot"));
        let mut out = Vec::with_capacity(args.len());
        for arg in &args[skip..] {
            out.push(self.eval(arg).await?);
        }
        Ok(out)
    }

    fn log(&self, args: &[Value]) {
        let line = args.iter().map(display).collect::<Vec<_>>().join(" ");
        self.cx.log(line);
    }

    async fn wait(&self, args: &[Value]) -> Result<Value, ScriptError> {
        let ms = to_number(args.first().unwrap_or(&Value::Null));
        let ms = if ms.is_finite() && ms > 0.0 { ms as u64 } else { 0 };
        self.cx.wait(Duration::from_millis(ms)).await?;
        Ok(Value::Null)
    }

    fn eval_call<'s>(&'s mut self, callee: &'s Expr, args: &'s [Expr], line: usize) -> Eval<'s, Value> {
        async move {
            match callee {
                Expr::Ident { name, .. } => {
                    if let Some(function) = self.functions.get(name.as_str()).cloned() {
                        let args = self.eval_args(args, false).await?;
                        return self.call_function(function, args).await;
                    }
                    match name.as_str() {
                        "log" => {
                            let args = self.eval_args(args, true).await?;
                            self.log(&args);
                            Ok(Value::Null)
                        }
                        "wait" => {
                            let args = self.eval_args(args, true).await?;
                            self.wait(&args).await
                        }
                        _ => {
                            let values = self.eval_args(args, false).await?;
                            builtins::global_function(name, &values).ok_or_else(|| {
                                if self.lookup(name).is_some() {
                                    ScriptError::Type {
                                        line,
                                        message: format!("{name} is not a function"),
                                    }
                                } else {
                                    ScriptError::Reference {
                                        line,
                                        name: name.clone(),
                                    }
                                }
                            })
                        }
                    }
                }
                Expr::Member {
                    object, property, ..
                } => {
                    if let Some(ns) = object.ident_name() {
                        if self.lookup(ns).is_none() {
                            if SKILL_NAMESPACES.contains(&ns) {
                                return self.call_skill(property, args, line).await;
                            }
                            if ns == "console" && property == "log" {
                                let args = self.eval_args(args, true).await?;
                                self.log(&args);
                                return Ok(Value::Null);
                            }
                            if HELPER_NAMESPACES.contains(&ns) {
                                let values = self.eval_args(args, false).await?;
                                if let Some(result) = builtins::namespaced(ns, property, &values, line) {
                                    return result;
                                }
                                return Err(ScriptError::Type {
                                    line,
                                    message: format!("{ns}.{property} is not a function"),
                                });
                            }
                        }
                    }
                    self.call_method(object, property, args, line).await
                }
                _ => Err(ScriptError::Type {
                    line,
                    message: "expression is not callable".into(),
                }),
            }
        }
        .boxed()
    }

    async fn call_skill(&mut self, skill: &str, args: &[Expr], line: usize) -> Result<Value, ScriptError> {
        let values = self.eval_args(args, true).await?;
        if skill == "wait" {
            return self.wait(&values).await;
        }
        tracing::debug!(skill, line, "script calls skill");
        match self.cx.skill(skill, &values).await {
            Ok(value) => Ok(value),
            Err(_) if self.cx.is_interrupted() => Err(ScriptError::Interrupted),
            Err(e) if e.downcast_ref::<Interrupted>().is_some() => Err(ScriptError::Interrupted),
            Err(e) => Err(ScriptError::Skill {
                skill: skill.to_string(),
                message: format!("{e:#}"),
            }),
        }
    }

    async fn call_method(
        &mut self,
        object: &Expr,
        method: &str,
        args: &[Expr],
        line: usize,
    ) -> Result<Value, ScriptError> {
        if builtins::MUTATING_METHODS.contains(&method) && is_place(object) {
            let place = self.resolve_place(object).await?;
            let values = self.eval_args(args, false).await?;
            let target = self.place_mut(&place, line)?;
            if let Some(result) = builtins::mutating_method(target, method, &values, line) {
                return result;
            }
        }
        let receiver = self.eval(object).await?;
        let values = self.eval_args(args, false).await?;
        if let Some(result) = builtins::mutating_method(&mut receiver.clone(), method, &values, line) {
            return result;
        }
        builtins::method(&receiver, method, &values, line)
    }

    // ---- assignment targets ----

    fn resolve_place<'s>(&'s mut self, expr: &'s Expr) -> Eval<'s, Place> {
        async move {
            match expr {
                Expr::Ident { name, .. } => Ok(Place {
                    root: name.clone(),
                    path: Vec::new(),
                }),
                Expr::Member {
                    object, property, ..
                } => {
                    let mut place = self.resolve_place(object).await?;
                    place.path.push(Value::String(property.clone()));
                    Ok(place)
                }
                Expr::Index { object, index, .. } => {
                    let mut place = self.resolve_place(object).await?;
                    let key = self.eval(index).await?;
                    place.path.push(key);
                    Ok(place)
                }
                _ => Err(ScriptError::Syntax {
                    line: 0,
                    message: "invalid assignment target".into(),
                }),
            }
        }
        .boxed()
    }

    /// Mutable slot for `place`. Writing to a `const` binding itself fails;
    /// members of a `const` object may still change.
    fn place_mut(&mut self, place: &Place, line: usize) -> Result<&mut Value, ScriptError> {
        if place.root == "bot" {
            return Err(ScriptError::Type {
                line,
                message: "bot is read-only".into(),
            });
        }
        let Some(binding) = self.lookup_mut(&place.root) else {
            return Err(ScriptError::Reference {
                line,
                name: place.root.clone(),
            });
        };
        if place.path.is_empty() && !binding.mutable {
            return Err(ScriptError::Type {
                line,
                message: "Assignment to constant variable.".into(),
            });
        }
        let mut slot = &mut binding.value;
        for key in &place.path {
            let kind = type_of(slot);
            slot = match slot {
                Value::Array(items) if key.is_number() => {
                    let i = to_number(key);
                    if i < 0.0 || i.fract() != 0.0 || i > (items.len() + 1024) as f64 {
                        return Err(ScriptError::Type {
                            line,
                            message: format!("invalid array index {}", display(key)),
                        });
                    }
                    let i = i as usize;
                    if i >= items.len() {
                        items.resize(i + 1, Value::Null);
                    }
                    &mut items[i]
                }
                Value::Object(map) => map.entry(display(key)).or_insert(Value::Null),
                _ => {
                    return Err(ScriptError::Type {
                        line,
                        message: format!("Cannot set properties of {kind} (setting '{}')", display(key)),
                    })
                }
            };
        }
        Ok(slot)
    }
}

struct Place {
    root: String,
    path: Vec<Value>,
}

fn is_place(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident { .. } | Expr::Member { optional: false, .. } | Expr::Index { .. }
    )
}

/// What a `catch` clause binds: an error-like object.
fn caught_value(error: &ScriptError) -> Value {
    let (name, message) = match error {
        ScriptError::Thrown(message) => ("Error", message.clone()),
        ScriptError::Reference { .. } => ("ReferenceError", error.to_string()),
        ScriptError::Type { .. } => ("TypeError", error.to_string()),
        ScriptError::Syntax { .. } => ("SyntaxError", error.to_string()),
        ScriptError::Skill { .. } | ScriptError::Interrupted => ("Error", error.to_string()),
    };
    let mut map = Map::new();
    map.insert("name".into(), Value::String(name.into()));
    map.insert("message".into(), Value::String(message));
    Value::Object(map)
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value, line: usize) -> Result<Value, ScriptError> {
    use std::cmp::Ordering::{Equal, Greater, Less};

    let arith = |f: fn(f64, f64) -> f64| number(f(to_number(lhs), to_number(rhs)));
    Ok(match op {
        BinaryOp::Add => add(lhs, rhs),
        BinaryOp::Sub => arith(|a, b| a - b),
        BinaryOp::Mul => arith(|a, b| a * b),
        BinaryOp::Div => arith(|a, b| a / b),
        BinaryOp::Rem => arith(|a, b| a % b),
        BinaryOp::Eq => Value::Bool(strict_eq(lhs, rhs)),
        BinaryOp::NotEq => Value::Bool(!strict_eq(lhs, rhs)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            if (lhs.is_array() || lhs.is_object()) && (rhs.is_array() || rhs.is_object()) {
                return Err(ScriptError::Type {
                    line,
                    message: "cannot order objects".into(),
                });
            }
            let ord = compare(lhs, rhs);
            Value::Bool(match op {
                BinaryOp::Lt => ord == Some(Less),
                BinaryOp::LtEq => matches!(ord, Some(Less | Equal)),
                BinaryOp::Gt => ord == Some(Greater),
                _ => matches!(ord, Some(Greater | Equal)),
            })
        }
    })
}
