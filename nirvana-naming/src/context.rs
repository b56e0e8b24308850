//! CosNaming-style `NamingContext` (spec.md §4.12): `bind`, `bind_context`,
//! `rebind`, `resolve`, `list`, `unbind`, `bind_new_context`, iterated via
//! [`BindingIterator`].

use crate::component::{Name, NameComponent};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("name not found")]
    NotFound,
    #[error("name already bound")]
    AlreadyBound,
    #[error("intermediate component is not a context")]
    NotContext,
    #[error("empty name")]
    InvalidName,
}

#[derive(Clone)]
pub enum Binding {
    Object(Arc<dyn Any + Send + Sync>),
    Context(Arc<NamingContext>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Object,
    Context,
}

impl From<&Binding> for BindingKind {
    fn from(b: &Binding) -> Self {
        match b {
            Binding::Object(_) => BindingKind::Object,
            Binding::Context(_) => BindingKind::Context,
        }
    }
}

pub struct NamingContext {
    entries: Mutex<BTreeMap<NameComponent, Binding>>,
}

impl NamingContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { entries: Mutex::new(BTreeMap::new()) })
    }

    /// Walks every component but the last through nested contexts,
    /// returning the context that should own the final component plus
    /// that component itself.
    fn resolve_path(self: &Arc<Self>, name: &Name) -> Result<(Arc<NamingContext>, NameComponent), NamingError> {
        let (last, head) = name.split_last().ok_or(NamingError::InvalidName)?;
        let mut ctx = self.clone();
        for comp in head {
            let next = {
                let entries = ctx.entries.lock();
                match entries.get(comp) {
                    Some(Binding::Context(c)) => c.clone(),
                    Some(Binding::Object(_)) => return Err(NamingError::NotContext),
                    None => return Err(NamingError::NotFound),
                }
            };
            ctx = next;
        }
        Ok((ctx, last.clone()))
    }

    pub fn bind(self: &Arc<Self>, name: &Name, object: Arc<dyn Any + Send + Sync>) -> Result<(), NamingError> {
        let (ctx, last) = self.resolve_path(name)?;
        let mut entries = ctx.entries.lock();
        if entries.contains_key(&last) {
            return Err(NamingError::AlreadyBound);
        }
        entries.insert(last, Binding::Object(object));
        Ok(())
    }

    pub fn bind_context(self: &Arc<Self>, name: &Name, context: Arc<NamingContext>) -> Result<(), NamingError> {
        let (ctx, last) = self.resolve_path(name)?;
        let mut entries = ctx.entries.lock();
        if entries.contains_key(&last) {
            return Err(NamingError::AlreadyBound);
        }
        entries.insert(last, Binding::Context(context));
        Ok(())
    }

    pub fn rebind(self: &Arc<Self>, name: &Name, object: Arc<dyn Any + Send + Sync>) -> Result<(), NamingError> {
        let (ctx, last) = self.resolve_path(name)?;
        ctx.entries.lock().insert(last, Binding::Object(object));
        Ok(())
    }

    pub fn resolve(self: &Arc<Self>, name: &Name) -> Result<Binding, NamingError> {
        let (ctx, last) = self.resolve_path(name)?;
        let entries = ctx.entries.lock();
        entries.get(&last).cloned().ok_or(NamingError::NotFound)
    }

    pub fn unbind(self: &Arc<Self>, name: &Name) -> Result<(), NamingError> {
        let (ctx, last) = self.resolve_path(name)?;
        let result = ctx.entries.lock().remove(&last).map(|_| ()).ok_or(NamingError::NotFound);
        result
    }

    /// Creates and binds a fresh subdirectory.
    pub fn bind_new_context(self: &Arc<Self>, name: &Name) -> Result<Arc<NamingContext>, NamingError> {
        let child = NamingContext::new();
        self.bind_context(name, child.clone())?;
        Ok(child)
    }

    /// Returns at least `how_many` entries (or all of them), plus a
    /// [`BindingIterator`] over the remainder when there is one
    /// (spec.md §4.12).
    pub fn list(self: &Arc<Self>, how_many: usize) -> (Vec<(NameComponent, BindingKind)>, Option<BindingIterator>) {
        let entries = self.entries.lock();
        let all: Vec<(NameComponent, BindingKind)> = entries.iter().map(|(k, v)| (k.clone(), v.into())).collect();
        if all.len() <= how_many {
            (all, None)
        } else {
            let mut rest = all;
            let head = rest.split_off(rest.len().min(how_many)).into_iter().collect::<Vec<_>>();
            // `split_off` keeps the prefix in `rest`; swap names for clarity.
            let (head, rest) = (rest, head);
            (head, Some(BindingIterator::new(rest)))
        }
    }
}

pub struct BindingIterator {
    remaining: std::collections::VecDeque<(NameComponent, BindingKind)>,
}

impl BindingIterator {
    fn new(items: Vec<(NameComponent, BindingKind)>) -> Self {
        Self { remaining: items.into() }
    }

    pub fn next_one(&mut self) -> Option<(NameComponent, BindingKind)> {
        self.remaining.pop_front()
    }

    pub fn next_n(&mut self, n: usize) -> Vec<(NameComponent, BindingKind)> {
        (0..n).filter_map(|_| self.next_one()).collect()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::NameComponent as C;

    fn name(comps: &[(&str, &str)]) -> Name {
        comps.iter().map(|(id, kind)| C::new(*id, *kind)).collect()
    }

    #[test]
    fn bind_then_resolve_finds_object() {
        let root = NamingContext::new();
        let obj: Arc<dyn Any + Send + Sync> = Arc::new(42u32);
        root.bind(&name(&[("a", "")]), obj).unwrap();
        let resolved = root.resolve(&name(&[("a", "")])).unwrap();
        assert!(matches!(resolved, Binding::Object(_)));
    }

    #[test]
    fn bind_new_context_then_nested_bind_resolves() {
        let root = NamingContext::new();
        let sub = root.bind_new_context(&name(&[("usr", "dir")])).unwrap();
        let obj: Arc<dyn Any + Send + Sync> = Arc::new(7u32);
        sub.bind(&name(&[("leaf", "")]), obj).unwrap();
        let resolved = root.resolve(&name(&[("usr", "dir"), ("leaf", "")])).unwrap();
        assert!(matches!(resolved, Binding::Object(_)));
    }

    #[test]
    fn double_bind_fails_rebind_succeeds() {
        let root = NamingContext::new();
        let a: Arc<dyn Any + Send + Sync> = Arc::new(1u32);
        let b: Arc<dyn Any + Send + Sync> = Arc::new(2u32);
        root.bind(&name(&[("x", "")]), a).unwrap();
        assert!(matches!(root.bind(&name(&[("x", "")]), b.clone()), Err(NamingError::AlreadyBound)));
        root.rebind(&name(&[("x", "")]), b).unwrap();
    }

    #[test]
    fn unbind_removes_entry() {
        let root = NamingContext::new();
        let obj: Arc<dyn Any + Send + Sync> = Arc::new(1u32);
        root.bind(&name(&[("x", "")]), obj).unwrap();
        root.unbind(&name(&[("x", "")])).unwrap();
        assert!(matches!(root.resolve(&name(&[("x", "")])), Err(NamingError::NotFound)));
    }

    #[test]
    fn list_splits_remainder_into_iterator() {
        let root = NamingContext::new();
        for i in 0..5u32 {
            let obj: Arc<dyn Any + Send + Sync> = Arc::new(i);
            root.bind(&name(&[(&format!("n{i}"), "")]), obj).unwrap();
        }
        let (head, rest) = root.list(2);
        assert_eq!(head.len(), 2);
        let mut iter = rest.unwrap();
        let mut total = head.len();
        while let Some(_) = iter.next_one() {
            total += 1;
        }
        assert_eq!(total, 5);
    }
}
