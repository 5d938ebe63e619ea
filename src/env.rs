use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::live::LiveValue;
use crate::value::{EvalError, Value};

pub type WatchFn = Rc<dyn Fn(&Value)>;

/// A lexical scope: variable bindings delegating lookup to a parent, an
/// alias table with the same delegation, and a watcher table that is local
/// to this scope only. The handle is cheap to clone and shares the scope.
#[derive(Clone)]
pub struct Environment {
    scope: Rc<RefCell<Scope>>,
}

struct Scope {
    vars: HashMap<String, Value>,
    aliases: HashMap<String, String>,
    watchers: HashMap<String, Vec<WatchFn>>,
    parent: Option<Environment>,
}

/// A non-owning environment handle. Evaluation sessions hold one of these so
/// that the watcher graph never keeps a scope chain alive by itself.
#[derive(Clone)]
pub struct WeakEnvironment {
    scope: Weak<RefCell<Scope>>,
}

impl WeakEnvironment {
    pub fn upgrade(&self) -> Option<Environment> {
        self.scope.upgrade().map(|scope| Environment { scope })
    }
}

impl PartialEq for Environment {
    /// Two handles are equal when they share the same scope object.
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.scope, &other.scope)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("vars", &self.list())
            .finish_non_exhaustive()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<Environment>) -> Self {
        Self {
            scope: Rc::new(RefCell::new(Scope {
                vars: HashMap::new(),
                aliases: HashMap::new(),
                watchers: HashMap::new(),
                parent,
            })),
        }
    }

    /// Returns a child scope that delegates reads to this one.
    pub fn extend(&self) -> Environment {
        Self::with_parent(Some(self.clone()))
    }

    pub fn downgrade(&self) -> WeakEnvironment {
        WeakEnvironment {
            scope: Rc::downgrade(&self.scope),
        }
    }

    /// Creates or overwrites a binding in this scope only. Ancestors are not
    /// searched and watchers are not notified; a caller that wants a change
    /// signal for the initial value must `watch` after defining.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.scope.borrow_mut().vars.insert(name.into(), value);
    }

    // Aliases resolve one step, with chain delegation.
    fn resolve_alias(&self, name: &str) -> String {
        let mut scope = Some(self.scope.clone());
        while let Some(current) = scope {
            let guard = current.borrow();
            if let Some(target) = guard.aliases.get(name) {
                return target.clone();
            }
            scope = guard.parent.as_ref().map(|parent| parent.scope.clone());
        }
        name.to_string()
    }

    fn lookup_canonical(&self, canonical: &str) -> Option<Environment> {
        let mut env = Some(self.clone());
        while let Some(current) = env {
            if current.scope.borrow().vars.contains_key(canonical) {
                return Some(current);
            }
            let parent = current.scope.borrow().parent.clone();
            env = parent;
        }
        None
    }

    /// Returns the scope that defines `name`, if any. Change notifications
    /// for `name` fire on that scope's watcher table.
    pub fn lookup(&self, name: &str) -> Option<Environment> {
        self.lookup_canonical(&self.resolve_alias(name))
    }

    /// Resolves aliases, then walks the scope chain for the value.
    pub fn get(&self, name: &str) -> Result<Value, EvalError> {
        let canonical = self.resolve_alias(name);
        let mut env = Some(self.clone());
        while let Some(current) = env {
            let guard = current.scope.borrow();
            if let Some(value) = guard.vars.get(&canonical) {
                return Ok(value.clone());
            }
            let parent = guard.parent.clone();
            drop(guard);
            env = parent;
        }
        Err(EvalError::UndefinedVariable(canonical))
    }

    /// Mutates the nearest enclosing scope that already defines `name`, or
    /// fails; assignment never creates a binding. Watchers of that scope
    /// fire only when the value actually changed.
    ///
    /// Notification is synchronous and re-entrant: a watcher may call `set`
    /// again, re-entering further watchers on the same call stack. A
    /// notification cycle (a watcher of `a` sets `b` while a watcher of `b`
    /// sets `a`) recurses until the values stop changing or the stack runs
    /// out; guarding against such cycles is the caller's responsibility.
    pub fn set(&self, name: &str, value: Value) -> Result<(), EvalError> {
        let canonical = self.resolve_alias(name);
        let defining = self
            .lookup_canonical(&canonical)
            .ok_or_else(|| EvalError::UndefinedVariable(canonical.clone()))?;

        let changed = {
            let mut scope = defining.scope.borrow_mut();
            if scope.vars.get(&canonical) == Some(&value) {
                false
            } else {
                scope.vars.insert(canonical.clone(), value.clone());
                true
            }
        };

        if changed {
            defining.fire(&canonical, &value);
        }
        Ok(())
    }

    /// Registers a change callback for `name` in this scope's watcher table.
    /// Watchers are never unregistered.
    pub fn watch(&self, name: &str, callback: impl Fn(&Value) + 'static) {
        let canonical = self.resolve_alias(name);
        self.scope
            .borrow_mut()
            .watchers
            .entry(canonical)
            .or_default()
            .push(Rc::new(callback));
    }

    // Registers `callback` where change notifications for `name` actually
    // fire: under the canonical name, in the scope that defines it. The
    // alias table consulted is this scope's chain, not the defining one's.
    pub(crate) fn watch_binding(&self, name: &str, callback: impl Fn(&Value) + 'static) {
        let canonical = self.resolve_alias(name);
        let defining = self
            .lookup_canonical(&canonical)
            .unwrap_or_else(|| self.clone());
        defining
            .scope
            .borrow_mut()
            .watchers
            .entry(canonical)
            .or_default()
            .push(Rc::new(callback));
    }

    /// Reads the current (post-alias-resolved) value and invokes this
    /// scope's watchers for `name` with it, in registration order.
    pub fn notify(&self, name: &str) -> Result<(), EvalError> {
        let canonical = self.resolve_alias(name);
        let value = self.get(&canonical)?;
        self.fire(&canonical, &value);
        Ok(())
    }

    // The watcher list is snapshotted before any callback runs; callbacks
    // may re-enter this scope to read, set or register new watchers.
    fn fire(&self, canonical: &str, value: &Value) {
        let callbacks: Vec<WatchFn> = match self.scope.borrow().watchers.get(canonical) {
            Some(list) => list.clone(),
            None => return,
        };
        for callback in callbacks {
            callback(value);
        }
    }

    /// Makes `get`/`set` on `alias_name` in this scope and its descendants
    /// resolve to `target`.
    pub fn alias(&self, target: &str, alias_name: &str) {
        self.scope
            .borrow_mut()
            .aliases
            .insert(alias_name.to_string(), target.to_string());
    }

    /// The names bound in this scope itself, sorted; ancestors excluded.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scope.borrow().vars.keys().cloned().collect();
        names.sort();
        names
    }

    /// A live view of one variable: seeded with its current value and
    /// updated whenever the variable changes.
    pub fn live(&self, name: &str) -> Result<LiveValue, EvalError> {
        let live = LiveValue::new(self.get(name)?);
        let handle = live.clone();
        self.watch_binding(name, move |value| handle.set_value(value.clone()));
        Ok(live)
    }
}
