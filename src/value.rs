use miette::Diagnostic;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// A host-provided function exposed to expressions through the environment.
pub type HostFn = Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>>;

/// A runtime value. Expressions are dynamically typed; the host seeds the
/// environment with values of any variant and reads whichever comes back.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Func(HostFn),
}

impl Value {
    pub fn func(f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static) -> Self {
        Value::Func(Rc::new(f))
    }

    /// `false`, the empty string and null are falsy; everything else,
    /// including `0`, is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(false) | Value::Null => false,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::Num(n) => Ok(*n),
            other => Err(EvalError::ExpectedNumber {
                found: other.clone(),
            }),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Num(n) => write!(f, "Num({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Func(_) => write!(f, "Func(<function>)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Func(_) => write!(f, "<function>"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// Everything that can go wrong while evaluating. These never cross the
/// session boundary as `Err`; they are delivered on the live value's error
/// channel. Only direct environment calls (`get`, `set`, `notify`, `live`)
/// return them to the host.
#[derive(Diagnostic, Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("undefined variable {0}")]
    UndefinedVariable(String),
    #[error("expected a number but got {found}")]
    ExpectedNumber { found: Value },
    #[error("divide by zero")]
    DivideByZero,
    #[error("expected a function but got {found}")]
    ExpectedFunction { found: Value },
    #[error("don't know how to evaluate {0}")]
    Unevaluable(&'static str),
    #[error("{0}")]
    Host(String),
}
