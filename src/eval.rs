//! Expression evaluation against a variable environment and extension hook.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::env::{Environment, Site};
use crate::expr::{parse_expression, BinaryOp, Expr, UnaryOp};
use crate::extension::Extension;
use crate::value::{Value, ValueType};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("type mismatch: '{op}' is not defined for {}", describe_operands(.operands))]
    TypeMismatch { op: String, operands: Vec<ValueType> },
    #[error("unknown function '{name}' with {arity} argument(s)")]
    UnknownFunction { name: String, arity: usize },
    #[error("syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("invalid argument for '{function}': {message}")]
    InvalidArgument { function: String, message: String },
    #[error("cannot assign '{name}': resolver '{resolver}' is read-only")]
    ReadOnly { resolver: String, name: String },
    #[error("extension failure: {0}")]
    Extension(String),
}

fn describe_operands(operands: &[ValueType]) -> String {
    operands
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Parse and evaluate `text`.
pub fn evaluate(
    text: &str,
    env: &Environment,
    site: Site,
    extension: &mut dyn Extension,
) -> Result<Value, EvalError> {
    let expr = parse_expression(text)?;
    Evaluator::new(env, site, extension).eval(&expr)
}

/// Walks an expression tree; `&&` and `||` short-circuit.
pub struct Evaluator<'a, 'x> {
    env: &'a Environment,
    site: Site<'a>,
    extension: &'x mut dyn Extension,
}

impl<'a, 'x> Evaluator<'a, 'x> {
    pub fn new(env: &'a Environment, site: Site<'a>, extension: &'x mut dyn Extension) -> Self {
        Evaluator {
            env,
            site,
            extension,
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Variable(name) => self.env.resolve(name, &self.site),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                apply_unary(*op, value)
            }
            Expr::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => self.logical(*op, left, right),
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                apply_binary(*op, l, r)
            }
            Expr::Call { name, args } => self.call(name, args),
            Expr::SetLiteral(items) => {
                let mut set = BTreeSet::new();
                for item in items {
                    set.insert(self.eval(item)?.to_text());
                }
                Ok(Value::Set(set))
            }
        }
    }

    fn logical(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, EvalError> {
        let l = self.eval(left)?;
        let Some(lb) = l.as_bool() else {
            return Err(mismatch(op, &[l.value_type()]));
        };
        match (op, lb) {
            (BinaryOp::And, false) => return Ok(Value::Bool(false)),
            (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
            _ => {}
        }
        let r = self.eval(right)?;
        match r.as_bool() {
            Some(rb) => Ok(Value::Bool(rb)),
            None => Err(mismatch(op, &[l.value_type(), r.value_type()])),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        if name == "defined" {
            return self.defined(args);
        }
        if is_builtin(name) {
            let values = self.eval_args(args)?;
            return call_builtin(name, &values);
        }
        if self.extension.has_user_function(name, args.len()) {
            let values = self.eval_args(args)?;
            return self
                .extension
                .process_user_function(&self.site, name, &values);
        }
        Err(EvalError::UnknownFunction {
            name: name.to_string(),
            arity: args.len(),
        })
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn defined(&mut self, args: &[Expr]) -> Result<Value, EvalError> {
        let name = match args {
            [Expr::Variable(name)] => name.clone(),
            [Expr::Literal(Value::Str(name))] => name.clone(),
            _ => {
                return Err(invalid_arg(
                    "defined",
                    "expected a single variable name",
                ))
            }
        };
        Ok(Value::Bool(self.env.is_defined(&name, &self.site)))
    }
}

fn mismatch(op: BinaryOp, operands: &[ValueType]) -> EvalError {
    EvalError::TypeMismatch {
        op: op.symbol().to_string(),
        operands: operands.to_vec(),
    }
}

fn binary_mismatch(op: BinaryOp, l: &Value, r: &Value) -> EvalError {
    mismatch(op, &[l.value_type(), r.value_type()])
}

fn invalid_arg(function: &str, message: impl Into<String>) -> EvalError {
    EvalError::InvalidArgument {
        function: function.to_string(),
        message: message.into(),
    }
}

fn overflow(op: BinaryOp) -> EvalError {
    EvalError::Arithmetic(format!("integer overflow in '{}'", op.symbol()))
}

fn apply_unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, &value) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| EvalError::Arithmetic("integer overflow in negation".to_string())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, _) => Err(EvalError::TypeMismatch {
            op: "!".to_string(),
            operands: vec![value.value_type()],
        }),
        (UnaryOp::Neg, _) => Err(EvalError::TypeMismatch {
            op: "-".to_string(),
            operands: vec![value.value_type()],
        }),
    }
}

/// Apply a non-logical binary operator following the documented coercion table.
pub fn apply_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Add => add(l, r),
        BinaryOp::Sub => subtract(l, r),
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, l, r),
        BinaryOp::Eq => equals(op, &l, &r).map(Value::Bool),
        BinaryOp::NotEq => equals(op, &l, &r).map(|eq| Value::Bool(!eq)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = compare(op, &l, &r)?;
            let result = match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
                (BinaryOp::LtEq, Some(o)) => o != Ordering::Greater,
                (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In => membership(op, &l, &r).map(Value::Bool),
        BinaryOp::And | BinaryOp::Or => match (l.as_bool(), r.as_bool()) {
            (Some(a), Some(b)) if op == BinaryOp::And => Ok(Value::Bool(a && b)),
            (Some(a), Some(b)) => Ok(Value::Bool(a || b)),
            _ => Err(binary_mismatch(op, &l, &r)),
        },
    }
}

fn add(l: Value, r: Value) -> Result<Value, EvalError> {
    let op = BinaryOp::Add;
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a.checked_add(b).map(Value::Int).ok_or_else(|| overflow(op)),
        (Value::Set(mut a), Value::Set(b)) => {
            a.extend(b);
            Ok(Value::Set(a))
        }
        (Value::Set(mut a), Value::Str(b)) => {
            a.insert(b);
            Ok(Value::Set(a))
        }
        (l @ Value::Str(_), r) | (l, r @ Value::Str(_)) => {
            Ok(Value::Str(format!("{}{}", l.to_text(), r.to_text())))
        }
        (l, r) if l.is_numeric() && r.is_numeric() => float_op(op, &l, &r),
        (l, r) => Err(binary_mismatch(op, &l, &r)),
    }
}

fn subtract(l: Value, r: Value) -> Result<Value, EvalError> {
    let op = BinaryOp::Sub;
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow(op)),
        (Value::Set(a), Value::Set(b)) => Ok(Value::Set(a.difference(&b).cloned().collect())),
        (Value::Set(mut a), Value::Str(b)) => {
            a.remove(&b);
            Ok(Value::Set(a))
        }
        (l, r) if l.is_numeric() && r.is_numeric() => float_op(op, &l, &r),
        (l, r) => Err(binary_mismatch(op, &l, &r)),
    }
}

fn arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value, EvalError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 && op != BinaryOp::Mul {
                return Err(EvalError::Arithmetic("division by zero".to_string()));
            }
            let result = match op {
                BinaryOp::Mul => a.checked_mul(*b),
                BinaryOp::Div => a.checked_div(*b),
                _ => a.checked_rem(*b),
            };
            result.map(Value::Int).ok_or_else(|| overflow(op))
        }
        _ if l.is_numeric() && r.is_numeric() => float_op(op, &l, &r),
        _ => Err(binary_mismatch(op, &l, &r)),
    }
}

/// Numeric operation after widening both operands to float
fn float_op(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(binary_mismatch(op, l, r));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return Err(binary_mismatch(op, l, r)),
    };
    Ok(Value::Float(result))
}

fn equals(op: BinaryOp, l: &Value, r: &Value) -> Result<bool, EvalError> {
    match (l, r) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            Ok(l.as_f64() == r.as_f64())
        }
        _ if l.value_type() == r.value_type() => Ok(l == r),
        _ => Err(binary_mismatch(op, l, r)),
    }
}

/// `None` means the operands are unordered (a NaN is involved)
fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Option<Ordering>, EvalError> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.as_str().cmp(b.as_str()))),
        _ if l.is_numeric() && r.is_numeric() => {
            let (a, b) = (l.as_f64().unwrap_or(f64::NAN), r.as_f64().unwrap_or(f64::NAN));
            Ok(a.partial_cmp(&b))
        }
        _ => Err(binary_mismatch(op, l, r)),
    }
}

fn membership(op: BinaryOp, needle: &Value, haystack: &Value) -> Result<bool, EvalError> {
    match (needle, haystack) {
        (Value::Str(n), Value::Set(set)) => Ok(set.contains(n)),
        (Value::Str(n), Value::Str(h)) => Ok(h.contains(n.as_str())),
        _ => Err(binary_mismatch(op, needle, haystack)),
    }
}

const BUILTINS: &[&str] = &[
    "str", "int", "float", "bool", "strlen", "upper", "lower", "trim", "substr", "abs", "round",
    "contains", "set", "size",
];

fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

fn expect_arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        Err(EvalError::UnknownFunction {
            name: name.to_string(),
            arity: args.len(),
        })
    } else {
        Ok(())
    }
}

fn string_arg<'v>(name: &str, value: &'v Value) -> Result<&'v str, EvalError> {
    value
        .as_str()
        .ok_or_else(|| invalid_arg(name, format!("expected string, found {}", value.value_type())))
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "str" => {
            expect_arity(name, args, 1, 1)?;
            Ok(Value::Str(args[0].to_text()))
        }
        "int" => {
            expect_arity(name, args, 1, 1)?;
            to_int(&args[0])
        }
        "float" => {
            expect_arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| invalid_arg(name, format!("'{}' is not a number", s))),
                other => Err(invalid_arg(name, format!("cannot convert {}", other.value_type()))),
            }
        }
        "bool" => {
            expect_arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::Int(i) => Ok(Value::Bool(*i != 0)),
                Value::Str(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
                other => Err(invalid_arg(name, format!("cannot convert '{}'", other))),
            }
        }
        "strlen" => {
            expect_arity(name, args, 1, 1)?;
            Ok(Value::Int(string_arg(name, &args[0])?.chars().count() as i64))
        }
        "upper" => {
            expect_arity(name, args, 1, 1)?;
            Ok(Value::Str(string_arg(name, &args[0])?.to_uppercase()))
        }
        "lower" => {
            expect_arity(name, args, 1, 1)?;
            Ok(Value::Str(string_arg(name, &args[0])?.to_lowercase()))
        }
        "trim" => {
            expect_arity(name, args, 1, 1)?;
            Ok(Value::Str(string_arg(name, &args[0])?.trim().to_string()))
        }
        "substr" => {
            expect_arity(name, args, 2, 3)?;
            let s = string_arg(name, &args[0])?;
            let index = |v: &Value| match v {
                Value::Int(i) if *i >= 0 => Ok(*i as usize),
                other => Err(invalid_arg(name, format!("expected non-negative int, found '{}'", other))),
            };
            let start = index(&args[1])?;
            let len = match args.get(2) {
                Some(v) => index(v)?,
                None => usize::MAX,
            };
            Ok(Value::Str(s.chars().skip(start).take(len).collect()))
        }
        "abs" => {
            expect_arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError::Arithmetic("integer overflow in abs".to_string())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(invalid_arg(name, format!("expected number, found {}", other.value_type()))),
            }
        }
        "round" => {
            expect_arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) if f.is_finite() => float_to_int(f.round(), name).map(Value::Int),
                other => Err(invalid_arg(name, format!("cannot round '{}'", other))),
            }
        }
        "contains" => {
            expect_arity(name, args, 2, 2)?;
            membership(BinaryOp::In, &args[1], &args[0]).map(Value::Bool)
        }
        "set" => {
            let mut set = BTreeSet::new();
            for arg in args {
                match arg {
                    Value::Set(items) => set.extend(items.iter().cloned()),
                    other => {
                        set.insert(other.to_text());
                    }
                }
            }
            Ok(Value::Set(set))
        }
        "size" => {
            expect_arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Set(items) => Ok(Value::Int(items.len() as i64)),
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => Err(invalid_arg(name, format!("expected set or string, found {}", other.value_type()))),
            }
        }
        _ => Err(EvalError::UnknownFunction {
            name: name.to_string(),
            arity: args.len(),
        }),
    }
}

fn to_int(value: &Value) -> Result<Value, EvalError> {
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) if f.is_finite() => float_to_int(f.trunc(), "int").map(Value::Int),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Str(s) => match Value::parse_literal(s) {
            Value::Int(i) => Ok(Value::Int(i)),
            _ => Err(invalid_arg("int", format!("'{}' is not an integer", s))),
        },
        other => Err(invalid_arg("int", format!("cannot convert '{}'", other))),
    }
}

/// `f` must already be integral.
fn float_to_int(f: f64, function: &str) -> Result<i64, EvalError> {
    // 2^63, exactly representable
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if (-LIMIT..LIMIT).contains(&f) {
        Ok(f as i64)
    } else {
        Err(EvalError::Arithmetic(format!(
            "{} is out of integer range in '{}'",
            f, function
        )))
    }
}
