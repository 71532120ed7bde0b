//! Restricted expression language used by mappings, conditions and guards.
//!
//! Expressions are parsed into a small AST and evaluated by a tree-walking
//! interpreter against a [`Scope`].  Nothing outside the scope is reachable:
//! the only identifiers are the path roots `trigger`, `event`, `variables`
//! and `nodes`, and the only callables are the `$`-prefixed helpers below.
//!
//! Supported syntax:
//! - Literals: numbers, strings (single or double quoted), `true`, `false`,
//!   `null`, array literals `[a, b]`
//! - Access: `trigger.order.total`, `nodes["fetch"].items[0]`
//! - Unary `!` and `-`, arithmetic `+ - * / %` (`+` concatenates strings)
//! - Comparisons `== != === !== < <= > >=` (numeric equality ignores
//!   integer/float representation)
//! - `&&` / `||` returning the deciding operand, ternary `a ? b : c`
//! - Helpers: `$get $len $exists $empty $now $lower $upper $trim $number
//!   $string $json $parse`

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::context::{ExecutionContext, Root, Scope};
use crate::resolver::{display, step};

const MAX_SOURCE_LEN: usize = 4096;
const MAX_DEPTH: usize = 64;

/// Errors from expression parsing or evaluation.
#[derive(Debug, Error, PartialEq)]
pub enum ExpressionError {
    #[error("parse error: {message}")]
    Parse { message: String },
    #[error("evaluation error: {message}")]
    Eval { message: String },
}

fn parse_err<T>(message: impl Into<String>) -> Result<T, ExpressionError> {
    Err(ExpressionError::Parse { message: message.into() })
}

fn eval_err<T>(message: impl Into<String>) -> Result<T, ExpressionError> {
    Err(ExpressionError::Eval { message: message.into() })
}

/// Evaluate `source` against the context.  Parse and runtime failures are
/// logged at debug level and yield `None`.
pub fn evaluate_expression(source: &str, context: &ExecutionContext) -> Option<Value> {
    match Expression::parse(source).and_then(|expr| expr.evaluate(&context.scope())) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(expression = source, "expression evaluation failed: {}", e);
            None
        }
    }
}

/// JavaScript-style truthiness over JSON values.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Equality that treats `1` and `1.0` as equal.
pub fn loose_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => l == r,
        },
        _ => left == right,
    }
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Helper {
    Get,
    Len,
    Exists,
    Empty,
    Now,
    Lower,
    Upper,
    Trim,
    Number,
    String,
    Json,
    Parse,
}

impl Helper {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "$get" => Helper::Get,
            "$len" => Helper::Len,
            "$exists" => Helper::Exists,
            "$empty" => Helper::Empty,
            "$now" => Helper::Now,
            "$lower" => Helper::Lower,
            "$upper" => Helper::Upper,
            "$trim" => Helper::Trim,
            "$number" => Helper::Number,
            "$string" => Helper::String,
            "$json" => Helper::Json,
            "$parse" => Helper::Parse,
            _ => return None,
        })
    }

    /// Accepted argument counts, inclusive.
    fn arity(self) -> (usize, usize) {
        match self {
            Helper::Now => (0, 0),
            Helper::Get => (2, 3),
            _ => (1, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Root(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Call(Helper, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Helper(String),
    Str(String),
    Num(f64),
    Punct(&'static str),
}

// Longest operators first so `===` is not read as `==` `=`.
const PUNCTUATION: [&str; 24] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%",
    "?", ":", "(", ")", "[", "]", ",", ".",
];

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '"' || c == '\'' {
            let (s, next) = read_string(&chars, i)?;
            tokens.push(Token::Str(s));
            i = next;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let num: f64 = match text.parse() {
                Ok(n) => n,
                Err(_) => return parse_err(format!("invalid number: {text}")),
            };
            tokens.push(Token::Num(num));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            if ident.starts_with('$') {
                tokens.push(Token::Helper(ident));
            } else {
                tokens.push(Token::Ident(ident));
            }
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match PUNCTUATION.iter().find(|p| rest.starts_with(*p)) {
            Some(&p) => {
                tokens.push(Token::Punct(p));
                i += p.len();
            }
            None => return parse_err(format!("unexpected character: {c}")),
        }
    }
    Ok(tokens)
}

fn read_string(chars: &[char], open: usize) -> Result<(String, usize), ExpressionError> {
    let quote = chars[open];
    let mut out = String::new();
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    parse_err("unterminated string literal")
}

// ---------------------------------------------------------------------------
// Parser. Precedence: ?: < || < && < equality < relational < + - < * / % < unary < postfix
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExpressionError> {
        if self.eat(punct) {
            Ok(())
        } else {
            parse_err(format!("expected '{punct}', found {:?}", self.peek()))
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return parse_err("expression nested too deeply");
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let condition = self.binary(0)?;
        let expr = if self.eat("?") {
            let then = self.expression()?;
            self.expect(":")?;
            let otherwise = self.expression()?;
            Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise))
        } else {
            condition
        };
        self.depth -= 1;
        Ok(expr)
    }

    /// Precedence climbing over the binary operator levels.
    fn binary(&mut self, level: usize) -> Result<Expr, ExpressionError> {
        const LEVELS: [&[(&str, BinaryOp)]; 6] = [
            &[("||", BinaryOp::Or)],
            &[("&&", BinaryOp::And)],
            &[
                ("===", BinaryOp::Eq),
                ("!==", BinaryOp::Ne),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
        ];

        if level == LEVELS.len() {
            return self.unary();
        }

        let mut left = self.binary(level + 1)?;
        'outer: loop {
            for (punct, op) in LEVELS[level] {
                if self.eat(punct) {
                    let right = self.binary(level + 1)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Neg
        } else {
            return self.postfix();
        };
        self.enter()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                match self.tokens.get(self.pos).cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    other => return parse_err(format!("expected property name, found {other:?}")),
                }
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let token = match self.tokens.get(self.pos).cloned() {
            Some(t) => t,
            None => return parse_err("unexpected end of expression"),
        };
        self.pos += 1;

        match token {
            Token::Num(n) => Ok(Expr::Literal(number(n).unwrap_or(Value::Null))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                root if Scope::ROOTS.iter().any(|r| *r == root) => Ok(Expr::Root(name)),
                other => parse_err(format!("unknown identifier '{other}'")),
            },
            Token::Helper(name) => {
                let Some(helper) = Helper::from_name(&name) else {
                    return parse_err(format!("unknown helper '{name}'"));
                };
                self.expect("(")?;
                let args = self.list(")")?;
                let (min, max) = helper.arity();
                if args.len() < min || args.len() > max {
                    return parse_err(format!("{name} takes {min}..={max} arguments, got {}", args.len()));
                }
                Ok(Expr::Call(helper, args))
            }
            Token::Punct("(") => {
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => Ok(Expr::Array(self.list("]")?)),
            Token::Punct(p) => parse_err(format!("unexpected token '{p}'")),
        }
    }

    /// Comma-separated expressions up to and including `close`.
    fn list(&mut self, close: &str) -> Result<Vec<Expr>, ExpressionError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(",")?;
        }
    }
}

// ---------------------------------------------------------------------------
// Expression
// ---------------------------------------------------------------------------

/// A parsed expression, reusable across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    ast: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        if source.len() > MAX_SOURCE_LEN {
            return parse_err(format!("expression longer than {MAX_SOURCE_LEN} bytes"));
        }
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return parse_err("empty expression");
        }

        let mut parser = Parser { tokens, pos: 0, depth: 0 };
        let ast = parser.expression()?;
        if let Some(token) = parser.peek() {
            return parse_err(format!("unexpected token: {token:?}"));
        }
        Ok(Self { ast })
    }

    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
        eval(&self.ast, scope)
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// JSON number from an `f64`, integral values as integers so that `1 + 1`
/// compares equal to `2`.
fn number(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Some(Value::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map(Value::Number)
    }
}

fn numeric_result(n: f64) -> Result<Value, ExpressionError> {
    number(n).ok_or_else(|| ExpressionError::Eval {
        message: "arithmetic produced a non-finite number".into(),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Root(_) | Expr::Member(..) | Expr::Index(..) => place(expr, scope).map(Place::into_value),
        Expr::Array(items) => items
            .iter()
            .map(|item| eval(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Call(helper, args) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(*helper, args)
        }
        Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!is_truthy(&eval(operand, scope)?))),
        Expr::Unary(UnaryOp::Neg, operand) => match eval(operand, scope)?.as_f64() {
            Some(n) => numeric_result(-n),
            None => eval_err("cannot negate a non-number"),
        },
        Expr::Binary(BinaryOp::And, left, right) => {
            let left = eval(left, scope)?;
            if is_truthy(&left) {
                eval(right, scope)
            } else {
                Ok(left)
            }
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = eval(left, scope)?;
            if is_truthy(&left) {
                Ok(left)
            } else {
                eval(right, scope)
            }
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            binary(*op, &left, &right)
        }
        Expr::Conditional(condition, then, otherwise) => {
            if is_truthy(&eval(condition, scope)?) {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
    }
}

/// Where a path expression points.  Roots and their descendants stay
/// borrowed from the scope; only the final value is cloned.
enum Place<'a> {
    Map(&'a Map<String, Value>),
    Value(&'a Value),
    Owned(Value),
}

impl<'a> Place<'a> {
    fn member(self, key: &str) -> Place<'a> {
        match self {
            Place::Map(map) => map.get(key).map_or(Place::Owned(Value::Null), Place::Value),
            Place::Value(value) if key == "length" && (value.is_array() || value.is_string()) => {
                Place::Owned(member(value, key))
            }
            Place::Value(value) => step(value, key).map_or(Place::Owned(Value::Null), Place::Value),
            Place::Owned(value) => Place::Owned(member(&value, key)),
        }
    }

    fn index(self, index: &Value) -> Place<'a> {
        let position = match index {
            Value::String(key) => return self.member(key),
            Value::Number(n) => n.as_u64().map(|i| i as usize),
            _ => None,
        };
        match (self, position) {
            (Place::Value(Value::Array(items)), Some(i)) => {
                items.get(i).map_or(Place::Owned(Value::Null), Place::Value)
            }
            (Place::Owned(Value::Array(items)), Some(i)) => {
                Place::Owned(items.into_iter().nth(i).unwrap_or(Value::Null))
            }
            _ => Place::Owned(Value::Null),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Place::Map(map) => Value::Object(map.clone()),
            Place::Value(value) => value.clone(),
            Place::Owned(value) => value,
        }
    }
}

fn place<'s>(expr: &Expr, scope: &Scope<'s>) -> Result<Place<'s>, ExpressionError> {
    match expr {
        Expr::Root(name) => match scope.root(name) {
            Some(Root::Value(value)) => Ok(Place::Value(value)),
            Some(Root::Map(map)) => Ok(Place::Map(map)),
            None => eval_err(format!("unknown root '{name}'")),
        },
        Expr::Member(object, key) => Ok(place(object, scope)?.member(key)),
        Expr::Index(object, index) => {
            let object = place(object, scope)?;
            let index = eval(index, scope)?;
            Ok(object.index(&index))
        }
        other => eval(other, scope).map(Place::Owned),
    }
}

fn member(object: &Value, key: &str) -> Value {
    match (object, key) {
        (Value::Array(items), "length") => Value::from(items.len()),
        (Value::String(s), "length") => Value::from(s.chars().count()),
        _ => step(object, key).cloned().unwrap_or(Value::Null),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(loose_equal(left, right))),
        BinaryOp::Ne => return Ok(Value::Bool(!loose_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(l), Value::Number(r)) => l
                    .as_f64()
                    .zip(r.as_f64())
                    .and_then(|(l, r)| l.partial_cmp(&r)),
                (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
                _ => None,
            };
            let result = ordering.is_some_and(|o| match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::Le => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            });
            return Ok(Value::Bool(result));
        }
        BinaryOp::Add if left.is_string() || right.is_string() => {
            return Ok(Value::String(format!("{}{}", display(left), display(right))));
        }
        _ => {}
    }

    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return eval_err(format!(
            "arithmetic on {} and {}",
            type_name(left),
            type_name(right)
        ));
    };
    match op {
        BinaryOp::Add => numeric_result(l + r),
        BinaryOp::Sub => numeric_result(l - r),
        BinaryOp::Mul => numeric_result(l * r),
        BinaryOp::Div | BinaryOp::Rem if r == 0.0 => eval_err("division by zero"),
        BinaryOp::Div => numeric_result(l / r),
        BinaryOp::Rem => numeric_result(l % r),
        _ => eval_err("unsupported operator"),
    }
}

fn call(helper: Helper, args: Vec<Value>) -> Result<Value, ExpressionError> {
    let mut args = args.into_iter();
    let first = args.next().unwrap_or(Value::Null);

    Ok(match helper {
        Helper::Get => {
            let path = args.next().map(|p| display(&p)).unwrap_or_default();
            let default = args.next().unwrap_or(Value::Null);
            let mut current = Some(&first);
            for segment in path.split('.').filter(|s| !s.is_empty()) {
                current = current.and_then(|v| step(v, segment));
            }
            match current {
                Some(v) if !v.is_null() => v.clone(),
                _ => default,
            }
        }
        Helper::Len => Value::from(match &first {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            _ => 0,
        }),
        Helper::Exists => Value::Bool(!first.is_null()),
        Helper::Empty => Value::Bool(match &first {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }),
        Helper::Now => Value::String(Utc::now().to_rfc3339()),
        Helper::Lower => Value::String(display(&first).to_lowercase()),
        Helper::Upper => Value::String(display(&first).to_uppercase()),
        Helper::Trim => Value::String(display(&first).trim().to_string()),
        Helper::Number => match &first {
            Value::Number(_) => first,
            Value::Bool(b) => Value::from(u8::from(*b)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(number)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Helper::String => Value::String(display(&first)),
        Helper::Json => Value::String(first.to_string()),
        Helper::Parse => match &first {
            Value::String(s) => match serde_json::from_str(s) {
                Ok(v) => v,
                Err(e) => return eval_err(format!("$parse: {e}")),
            },
            _ => return eval_err(format!("$parse expects a string, got {}", type_name(&first))),
        },
    })
}
