use std::cell::RefCell;
use std::rc::Rc;

use crate::value::{EvalError, Value};

type ValueFn = Rc<dyn Fn(&Value)>;
type ErrorFn = Rc<dyn Fn(&EvalError)>;

struct Subscriber {
    on_value: ValueFn,
    on_error: Option<ErrorFn>,
}

struct Inner {
    value: Value,
    error: Option<EvalError>,
    subscribers: Vec<Subscriber>,
}

/// A push-based container for a value that changes over time. Subscribers
/// immediately receive the current value when they attach, then every
/// subsequent value or error as it occurs. `map` and `reduce` derive new
/// live values, forming a one-directional dataflow graph that is recomputed
/// eagerly at the moment the source changes.
#[derive(Clone)]
pub struct LiveValue {
    inner: Rc<RefCell<Inner>>,
}

impl LiveValue {
    pub fn new(value: Value) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                value,
                error: None,
                subscribers: Vec::new(),
            })),
        }
    }

    /// The current value; null while in the error state.
    pub fn value(&self) -> Value {
        self.inner.borrow().value.clone()
    }

    pub fn error(&self) -> Option<EvalError> {
        self.inner.borrow().error.clone()
    }

    /// Stores `value`, clears any error state and notifies every value
    /// subscriber in registration order.
    pub fn set_value(&self, value: Value) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.value = value.clone();
            inner.error = None;
        }
        // Snapshot first: a callback may subscribe or set on re-entry.
        let callbacks: Vec<ValueFn> = self
            .inner
            .borrow()
            .subscribers
            .iter()
            .map(|subscriber| subscriber.on_value.clone())
            .collect();
        for callback in callbacks {
            callback(&value);
        }
    }

    /// Clears the value to null and notifies only the error subscribers;
    /// the error is not delivered through the value channel.
    pub fn set_error(&self, error: EvalError) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.value = Value::Null;
            inner.error = Some(error.clone());
        }
        let callbacks: Vec<ErrorFn> = self
            .inner
            .borrow()
            .subscribers
            .iter()
            .filter_map(|subscriber| subscriber.on_error.clone())
            .collect();
        for callback in callbacks {
            callback(&error);
        }
    }

    pub fn watch(&self, on_value: impl Fn(&Value) + 'static) -> LiveValue {
        self.subscribe(Rc::new(on_value), None)
    }

    pub fn watch_with(
        &self,
        on_value: impl Fn(&Value) + 'static,
        on_error: impl Fn(&EvalError) + 'static,
    ) -> LiveValue {
        self.subscribe(Rc::new(on_value), Some(Rc::new(on_error)))
    }

    fn subscribe(&self, on_value: ValueFn, on_error: Option<ErrorFn>) -> LiveValue {
        let current = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.push(Subscriber {
                on_value: on_value.clone(),
                on_error,
            });
            inner.value.clone()
        };
        on_value(&current);
        self.clone()
    }

    /// Derives a live value by applying `transform` to every element of this
    /// value. A non-list value is treated as a one-element list first, so
    /// the result is always list-shaped even for scalar sources.
    pub fn map(&self, transform: impl Fn(&Value) -> Value + 'static) -> LiveValue {
        let derived = LiveValue::new(Value::Null);

        let out = derived.clone();
        let apply = move |value: &Value| {
            let items = as_items(value).iter().map(&transform).collect();
            out.set_value(Value::List(items));
        };
        let out = derived.clone();
        let forward = move |error: &EvalError| out.set_error(error.clone());

        self.subscribe(Rc::new(apply), Some(Rc::new(forward)));
        derived
    }

    /// Derives a live value by folding the elements of this value from
    /// `seed`. A non-list value is treated as a one-element list first.
    pub fn reduce(
        &self,
        fold: impl Fn(Value, &Value) -> Value + 'static,
        seed: Value,
    ) -> LiveValue {
        let derived = LiveValue::new(Value::Null);

        let out = derived.clone();
        let apply = move |value: &Value| {
            let folded = as_items(value)
                .iter()
                .fold(seed.clone(), |acc, item| fold(acc, item));
            out.set_value(folded);
        };
        let out = derived.clone();
        let forward = move |error: &EvalError| out.set_error(error.clone());

        self.subscribe(Rc::new(apply), Some(Rc::new(forward)));
        derived
    }
}

fn as_items(value: &Value) -> Vec<Value> {
    match value {
        Value::List(items) => items.clone(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_watch_replays_current_value() {
        let live = LiveValue::new(Value::Num(5.0));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        live.watch(move |value| sink.borrow_mut().push(value.clone()));

        assert_eq!(*seen.borrow(), vec![Value::Num(5.0)]);
    }

    #[test]
    fn test_set_value_notifies_in_order() {
        let live = LiveValue::new(Value::Null);

        let order = Rc::new(RefCell::new(Vec::new()));
        let first = order.clone();
        live.watch(move |value| first.borrow_mut().push((1, value.clone())));
        let second = order.clone();
        live.watch(move |value| second.borrow_mut().push((2, value.clone())));
        order.borrow_mut().clear();

        live.set_value(Value::Num(1.0));

        assert_eq!(
            *order.borrow(),
            vec![(1, Value::Num(1.0)), (2, Value::Num(1.0))]
        );
    }

    #[test]
    fn test_error_goes_to_error_subscribers_only() {
        let live = LiveValue::new(Value::Num(1.0));

        let values = Rc::new(Cell::new(0));
        let errors = Rc::new(Cell::new(0));
        let value_counter = values.clone();
        let error_counter = errors.clone();
        live.watch_with(
            move |_| value_counter.set(value_counter.get() + 1),
            move |_| error_counter.set(error_counter.get() + 1),
        );

        live.set_error(EvalError::DivideByZero);

        // One value delivery from the subscription replay, none from the
        // error signal.
        assert_eq!(values.get(), 1);
        assert_eq!(errors.get(), 1);
        assert_eq!(live.value(), Value::Null);
        assert_eq!(live.error(), Some(EvalError::DivideByZero));
    }

    #[test]
    fn test_set_value_clears_error() {
        let live = LiveValue::new(Value::Null);
        live.set_error(EvalError::DivideByZero);
        live.set_value(Value::Num(2.0));

        assert_eq!(live.error(), None);
        assert_eq!(live.value(), Value::Num(2.0));
    }

    #[test]
    fn test_map_coerces_scalar_to_list() {
        let live = LiveValue::new(Value::Num(5.0));
        let mapped = live.map(|value| value.clone());

        assert_eq!(mapped.value(), Value::List(vec![Value::Num(5.0)]));
    }

    #[test]
    fn test_map_over_list() {
        let live = LiveValue::new(Value::List(vec![Value::Num(1.0), Value::Num(2.0)]));
        let doubled = live.map(|value| match value {
            Value::Num(n) => Value::Num(n * 2.0),
            other => other.clone(),
        });

        assert_eq!(
            doubled.value(),
            Value::List(vec![Value::Num(2.0), Value::Num(4.0)])
        );
    }

    #[test]
    fn test_map_recomputes_on_source_change() {
        let live = LiveValue::new(Value::Num(1.0));
        let mapped = live.map(|value| value.clone());

        live.set_value(Value::Num(9.0));

        assert_eq!(mapped.value(), Value::List(vec![Value::Num(9.0)]));
    }

    #[test]
    fn test_reduce_folds_from_seed() {
        let live = LiveValue::new(Value::List(vec![
            Value::Num(1.0),
            Value::Num(2.0),
            Value::Num(3.0),
        ]));
        let sum = live.reduce(
            |acc, item| match (acc, item) {
                (Value::Num(a), Value::Num(b)) => Value::Num(a + b),
                (acc, _) => acc,
            },
            Value::Num(0.0),
        );

        assert_eq!(sum.value(), Value::Num(6.0));
    }

    #[test]
    fn test_reduce_coerces_scalar_to_list() {
        let live = LiveValue::new(Value::Num(5.0));
        let collected = live.reduce(
            |acc, item| match acc {
                Value::List(mut items) => {
                    items.push(item.clone());
                    Value::List(items)
                }
                acc => acc,
            },
            Value::List(vec![]),
        );

        assert_eq!(collected.value(), Value::List(vec![Value::Num(5.0)]));
    }

    #[test]
    fn test_errors_propagate_to_derived_values() {
        let live = LiveValue::new(Value::Num(1.0));
        let mapped = live.map(|value| value.clone());

        live.set_error(EvalError::DivideByZero);

        assert_eq!(mapped.error(), Some(EvalError::DivideByZero));
        assert_eq!(mapped.value(), Value::Null);
    }
}
