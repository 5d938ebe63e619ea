use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::env::{Environment, WeakEnvironment};
use crate::live::LiveValue;
use crate::parser::{BinaryOp, Expr};
use crate::value::{EvalError, Value};

/// One live evaluation: the program, the scope it runs against, the output
/// and the variable names observed so far. The watcher callbacks stored in
/// the environment own the session; the session only holds its environment
/// weakly, so a scope chain dropped by the host takes its sessions with it.
struct Session {
    expr: Rc<Expr>,
    env: WeakEnvironment,
    live: LiveValue,
    observed: RefCell<HashSet<String>>,
}

/// Starts a live evaluation of `expr` against `env`.
///
/// The result is computed immediately and re-computed synchronously from the
/// root every time a variable the program has ever read changes. Failures
/// never surface here; they are delivered on the returned value's error
/// channel, and a later re-evaluation may replace them with a result.
pub fn evaluate(expr: Rc<Expr>, env: &Environment) -> LiveValue {
    let session = Rc::new(Session {
        expr,
        env: env.downgrade(),
        live: LiveValue::new(Value::Null),
        observed: RefCell::new(HashSet::new()),
    });
    reevaluate(&session);
    session.live.clone()
}

fn reevaluate(session: &Rc<Session>) {
    let Some(env) = session.env.upgrade() else {
        return;
    };
    match eval(session, &session.expr, &env) {
        Ok(value) => session.live.set_value(value),
        Err(error) => session.live.set_error(error),
    }
}

fn eval(session: &Rc<Session>, expr: &Expr, env: &Environment) -> Result<Value, EvalError> {
    match expr {
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Var(name) => {
            let value = env.get(name)?;
            // First read of this name in this session: subscribe to it on
            // the scope where its change notifications fire. The observed
            // set only ever grows; a dependency read on one branch keeps
            // waking the session even when the current branch skips it.
            if session.observed.borrow_mut().insert(name.clone()) {
                let watcher = Rc::clone(session);
                env.watch_binding(name, move |_| reevaluate(&watcher));
            }
            Ok(value)
        }
        Expr::List(items) => items
            .iter()
            .map(|item| eval(session, item, env))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Binary { op, left, right } => {
            let left = eval(session, left, env)?;
            let right = eval(session, right, env)?;
            apply_op(*op, left, right)
        }
        // Assignment parses but has no evaluation semantics.
        Expr::Assign { .. } => Err(EvalError::Unevaluable("assignment")),
        Expr::Cond {
            cond,
            then,
            otherwise,
        } => {
            if eval(session, cond, env)?.is_truthy() {
                eval(session, then, env)
            } else if let Some(otherwise) = otherwise {
                eval(session, otherwise, env)
            } else {
                Ok(Value::Bool(false))
            }
        }
        Expr::Prog(exprs) => {
            let mut value = Value::Bool(false);
            for expr in exprs {
                value = eval(session, expr, env)?;
            }
            Ok(value)
        }
        Expr::Call { func, args } => {
            let callee = eval(session, func, env)?;
            let args = args
                .iter()
                .map(|arg| eval(session, arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            match callee {
                Value::Func(f) => f(&args),
                other => Err(EvalError::ExpectedFunction { found: other }),
            }
        }
    }
}

// Both operands are already evaluated; `&&` and `||` select between the raw
// operand values rather than producing a boolean.
fn apply_op(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    let value = match op {
        BinaryOp::Add => Value::Num(left.as_number()? + right.as_number()?),
        BinaryOp::Sub => Value::Num(left.as_number()? - right.as_number()?),
        BinaryOp::Mul => Value::Num(left.as_number()? * right.as_number()?),
        BinaryOp::Div => Value::Num(left.as_number()? / nonzero(&right)?),
        BinaryOp::Rem => Value::Num(left.as_number()? % nonzero(&right)?),
        BinaryOp::And => {
            if left.is_truthy() {
                right
            } else {
                Value::Bool(false)
            }
        }
        BinaryOp::Or => {
            if left.is_truthy() {
                left
            } else {
                right
            }
        }
        BinaryOp::Less => Value::Bool(left.as_number()? < right.as_number()?),
        BinaryOp::LessEqual => Value::Bool(left.as_number()? <= right.as_number()?),
        BinaryOp::Greater => Value::Bool(left.as_number()? > right.as_number()?),
        BinaryOp::GreaterEqual => Value::Bool(left.as_number()? >= right.as_number()?),
        BinaryOp::Equal => Value::Bool(left == right),
        BinaryOp::NotEqual => Value::Bool(left != right),
    };
    Ok(value)
}

fn nonzero(value: &Value) -> Result<f64, EvalError> {
    let n = value.as_number()?;
    if n == 0.0 {
        return Err(EvalError::DivideByZero);
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run;
    use std::cell::Cell;

    fn eval_str(input: &str, env: &Environment) -> LiveValue {
        run(input, env).unwrap()
    }

    #[test]
    fn test_literals_round_trip() {
        let env = Environment::new();

        assert_eq!(eval_str("42", &env).value(), Value::Num(42.0));
        assert_eq!(
            eval_str("\"hello\"", &env).value(),
            Value::Str("hello".to_string())
        );
        assert_eq!(eval_str("true", &env).value(), Value::Bool(true));
        assert_eq!(eval_str("false", &env).value(), Value::Bool(false));
        assert_eq!(
            eval_str("[1, 2]", &env).value(),
            Value::List(vec![Value::Num(1.0), Value::Num(2.0)])
        );
    }

    #[test]
    fn test_precedence_evaluation() {
        let env = Environment::new();
        assert_eq!(eval_str("1 + 2 * 3", &env).value(), Value::Num(7.0));
    }

    #[test]
    fn test_nested_ternary() {
        let env = Environment::new();
        assert_eq!(
            eval_str("true ? 1 : false ? 2 : 3", &env).value(),
            Value::Num(1.0)
        );
    }

    #[test]
    fn test_if_without_else_is_false() {
        let env = Environment::new();
        assert_eq!(
            eval_str("if false then 1", &env).value(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_program_yields_last_value() {
        let env = Environment::new();
        assert_eq!(eval_str("1; 2; 3", &env).value(), Value::Num(3.0));
        assert_eq!(eval_str("{ 1; 2 }", &env).value(), Value::Num(2.0));
        assert_eq!(eval_str("{}", &env).value(), Value::Bool(false));
    }

    #[test]
    fn test_logical_operators_select_raw_operands() {
        let env = Environment::new();

        // 0 is truthy, so && yields the right operand unchanged.
        assert_eq!(eval_str("0 && 2", &env).value(), Value::Num(2.0));
        assert_eq!(eval_str("false && 1", &env).value(), Value::Bool(false));
        assert_eq!(eval_str("\"\" && 1", &env).value(), Value::Bool(false));
        assert_eq!(eval_str("5 || 1", &env).value(), Value::Num(5.0));
        assert_eq!(
            eval_str("\"\" || \"fallback\"", &env).value(),
            Value::Str("fallback".to_string())
        );
    }

    #[test]
    fn test_strict_equality() {
        let env = Environment::new();
        assert_eq!(eval_str("1 == 1", &env).value(), Value::Bool(true));
        assert_eq!(eval_str("1 == \"1\"", &env).value(), Value::Bool(false));
        assert_eq!(eval_str("1 != \"1\"", &env).value(), Value::Bool(true));
    }

    #[test]
    fn test_dependency_tracking() {
        let env = Environment::new();
        env.define("x", Value::Num(1.0));

        let live = eval_str("x + 1", &env);
        assert_eq!(live.value(), Value::Num(2.0));

        env.set("x", Value::Num(5.0)).unwrap();
        assert_eq!(live.value(), Value::Num(6.0));
    }

    #[test]
    fn test_dependencies_accumulate_monotonically() {
        let env = Environment::new();
        env.define("x", Value::Bool(true));
        env.define("y", Value::Num(1.0));
        env.define("z", Value::Num(2.0));

        let live = eval_str("if x then y else z", &env);
        assert_eq!(live.value(), Value::Num(1.0));

        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        live.watch(move |_| counter.set(counter.get() + 1));
        assert_eq!(runs.get(), 1); // subscription replay

        // z has not been read yet, so changing it is invisible.
        env.set("z", Value::Num(3.0)).unwrap();
        assert_eq!(runs.get(), 1);

        // Switching the branch reads z for the first time.
        env.set("x", Value::Bool(false)).unwrap();
        assert_eq!(live.value(), Value::Num(3.0));
        assert_eq!(runs.get(), 2);

        // y is no longer read by the taken branch but stays watched.
        env.set("y", Value::Num(10.0)).unwrap();
        assert_eq!(runs.get(), 3);

        // And z is watched from now on.
        env.set("z", Value::Num(4.0)).unwrap();
        assert_eq!(live.value(), Value::Num(4.0));
    }

    #[test]
    fn test_noop_set_does_not_reevaluate() {
        let env = Environment::new();
        env.define("x", Value::Num(1.0));

        let live = eval_str("x + 1", &env);
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        live.watch(move |_| counter.set(counter.get() + 1));
        assert_eq!(runs.get(), 1);

        env.set("x", Value::Num(1.0)).unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_undefined_variable_is_an_error_signal() {
        let env = Environment::new();
        let live = eval_str("missing + 1", &env);

        assert_eq!(
            live.error(),
            Some(EvalError::UndefinedVariable("missing".to_string()))
        );
        assert_eq!(live.value(), Value::Null);
    }

    #[test]
    fn test_divide_by_zero_is_an_error_signal() {
        let env = Environment::new();
        let live = eval_str("1 / 0", &env);

        assert_eq!(live.error(), Some(EvalError::DivideByZero));
        assert_eq!(live.value(), Value::Null);

        let live = eval_str("1 % 0", &env);
        assert_eq!(live.error(), Some(EvalError::DivideByZero));
    }

    #[test]
    fn test_type_mismatch_is_an_error_signal() {
        let env = Environment::new();
        let live = eval_str("1 + \"a\"", &env);

        assert_eq!(
            live.error(),
            Some(EvalError::ExpectedNumber {
                found: Value::Str("a".to_string()),
            })
        );
    }

    #[test]
    fn test_error_recovery_on_dependency_change() {
        let env = Environment::new();
        env.define("x", Value::Num(0.0));

        let live = eval_str("10 / x", &env);
        assert_eq!(live.error(), Some(EvalError::DivideByZero));

        env.set("x", Value::Num(2.0)).unwrap();
        assert_eq!(live.error(), None);
        assert_eq!(live.value(), Value::Num(5.0));
    }

    #[test]
    fn test_call_host_function() {
        let env = Environment::new();
        env.define(
            "double",
            Value::func(|args| Ok(Value::Num(args[0].as_number()? * 2.0))),
        );

        assert_eq!(eval_str("double(21)", &env).value(), Value::Num(42.0));
    }

    #[test]
    fn test_call_arguments_are_live() {
        let env = Environment::new();
        env.define("x", Value::Num(1.0));
        env.define(
            "double",
            Value::func(|args| Ok(Value::Num(args[0].as_number()? * 2.0))),
        );

        let live = eval_str("double(x)", &env);
        assert_eq!(live.value(), Value::Num(2.0));

        env.set("x", Value::Num(8.0)).unwrap();
        assert_eq!(live.value(), Value::Num(16.0));
    }

    #[test]
    fn test_host_function_failure_is_an_error_signal() {
        let env = Environment::new();
        env.define(
            "fail",
            Value::func(|_| Err(EvalError::Host("backend unavailable".to_string()))),
        );

        let live = eval_str("fail()", &env);
        assert_eq!(
            live.error(),
            Some(EvalError::Host("backend unavailable".to_string()))
        );
    }

    #[test]
    fn test_calling_a_non_function_is_an_error_signal() {
        let env = Environment::new();
        let live = eval_str("1(2)", &env);

        assert_eq!(
            live.error(),
            Some(EvalError::ExpectedFunction {
                found: Value::Num(1.0),
            })
        );
    }

    #[test]
    fn test_assignment_has_no_evaluation_semantics() {
        let env = Environment::new();
        env.define("x", Value::Num(1.0));

        let live = eval_str("x = 2", &env);

        assert_eq!(live.error(), Some(EvalError::Unevaluable("assignment")));
        // The environment is untouched.
        assert_eq!(env.get("x"), Ok(Value::Num(1.0)));
    }

    #[test]
    fn test_evaluation_through_extended_scope() {
        let root = Environment::new();
        root.define("x", Value::Num(1.0));
        let child = root.extend();

        let live = eval_str("x + 1", &child);
        assert_eq!(live.value(), Value::Num(2.0));

        // The binding lives in the root, so setting it there wakes the
        // session even though evaluation ran against the child.
        root.set("x", Value::Num(5.0)).unwrap();
        assert_eq!(live.value(), Value::Num(6.0));
    }

    #[test]
    fn test_aliased_dependency_tracking() {
        let env = Environment::new();
        env.define("temperature", Value::Num(20.0));
        env.alias("temperature", "temp");

        let live = eval_str("temp + 1", &env);
        assert_eq!(live.value(), Value::Num(21.0));

        env.set("temperature", Value::Num(25.0)).unwrap();
        assert_eq!(live.value(), Value::Num(26.0));
    }

    #[test]
    fn test_repeated_reads_register_one_watcher() {
        let env = Environment::new();
        env.define("x", Value::Num(2.0));

        let live = eval_str("x + x", &env);
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        live.watch(move |_| counter.set(counter.get() + 1));
        assert_eq!(runs.get(), 1);

        env.set("x", Value::Num(3.0)).unwrap();
        assert_eq!(live.value(), Value::Num(6.0));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_derived_value_follows_session() {
        let env = Environment::new();
        env.define("x", Value::Num(1.0));

        let doubled = eval_str("x", &env).map(|value| match value {
            Value::Num(n) => Value::Num(n * 2.0),
            other => other.clone(),
        });
        assert_eq!(doubled.value(), Value::List(vec![Value::Num(2.0)]));

        env.set("x", Value::Num(3.0)).unwrap();
        assert_eq!(doubled.value(), Value::List(vec![Value::Num(6.0)]));
    }
}
