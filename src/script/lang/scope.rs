//! Lexical scope chains for the rule interpreters.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub(crate) struct Scope<V> {
    vars: RefCell<HashMap<String, V>>,
    parent: Option<Rc<Scope<V>>>,
}

impl<V: Clone> Scope<V> {
    pub(crate) fn root() -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    pub(crate) fn child(parent: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    /// Look a name up along the chain.
    pub(crate) fn get(&self, name: &str) -> Option<V> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// First value along the chain accepted by `pred`.
    pub(crate) fn find(&self, name: &str, pred: &dyn Fn(&V) -> bool) -> Option<V> {
        if let Some(v) = self.vars.borrow().get(name).filter(|v| pred(v)) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.find(name, pred))
    }

    /// Bind in this scope, shadowing outer bindings.
    pub(crate) fn define(&self, name: &str, value: V) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    /// Update the nearest existing binding; false when the name is unbound.
    pub(crate) fn assign(&self, name: &str, value: V) -> bool {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => false,
        }
    }

    /// Update the nearest binding outside this scope, defining it in the
    /// root when none exists.
    pub(crate) fn assign_outer(&self, name: &str, value: V) {
        match &self.parent {
            Some(parent) => {
                if !parent.assign(name, value.clone()) {
                    parent.root_define(name, value);
                }
            }
            None => self.define(name, value),
        }
    }

    fn root_define(&self, name: &str, value: V) {
        match &self.parent {
            Some(parent) => parent.root_define(name, value),
            None => self.define(name, value),
        }
    }

    pub(crate) fn has_local(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    /// Names bound directly in this scope.
    pub(crate) fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every binding in this scope.
    ///
    /// Closures hold their defining scope, so a scope that stores closures
    /// forms a reference cycle until it is cleared.
    pub(crate) fn clear(&self) {
        let drained: Vec<V> = self.vars.borrow_mut().drain().map(|(_, v)| v).collect();
        drop(drained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_assignment() {
        let root: Rc<Scope<i32>> = Scope::root();
        root.define("x", 1);
        let inner = Scope::child(&root);
        assert_eq!(inner.get("x"), Some(1));
        inner.define("x", 2);
        assert_eq!(inner.get("x"), Some(2));
        assert_eq!(root.get("x"), Some(1));
        assert!(inner.assign("x", 3));
        assert_eq!(root.get("x"), Some(1));
        assert!(!inner.assign("y", 0));
        inner.assign_outer("z", 9);
        assert_eq!(root.get("z"), Some(9));
        assert_eq!(inner.find("x", &|v| *v > 100), None);
    }
}
