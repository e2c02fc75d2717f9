//! Live bindings between configuration keys and running objects.
//!
//! A [`Binding`] never keeps its target alive. It either holds a `Weak` to the
//! target or a liveness probe supplied by the owner; a dead binding is
//! equivalent to no binding and is never invoked.

mod registry;
pub mod template;
pub use registry::*;

#[cfg(test)]
mod registry_test;

use std::fmt;
use std::fmt::Display;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Weak;

use crate::BindingError;

/// The host dependency container a binding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub u64);

impl fmt::Display for OwnerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

/// Identity used to de-duplicate registrations: same target, same member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingIdentity {
    pub target_id: usize,
    pub member: String,
}

/// Pushes a rendered value into a bound object.
pub trait BindingAccessor: Send + Sync {
    fn is_alive(&self) -> bool;

    /// Stable identity of the bound object while it is alive.
    fn target_id(&self) -> usize;

    fn apply(
        &self,
        value: &str,
    ) -> Result<(), BindingError>;
}

struct WeakSetter<T, F> {
    target: Weak<T>,
    member: String,
    setter: F,
}

impl<T, F> BindingAccessor for WeakSetter<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(&T, &str) -> Result<(), BindingError> + Send + Sync,
{
    fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    fn target_id(&self) -> usize {
        self.target.as_ptr() as *const () as usize
    }

    fn apply(
        &self,
        value: &str,
    ) -> Result<(), BindingError> {
        let target = self
            .target
            .upgrade()
            .ok_or_else(|| BindingError::TargetDropped(self.member.clone()))?;
        (self.setter)(&target, value)
    }
}

struct ProbedSetter<L, F> {
    target_id: usize,
    is_alive: L,
    setter: F,
}

impl<L, F> BindingAccessor for ProbedSetter<L, F>
where
    L: Fn() -> bool + Send + Sync,
    F: Fn(&str) -> Result<(), BindingError> + Send + Sync,
{
    fn is_alive(&self) -> bool {
        (self.is_alive)()
    }

    fn target_id(&self) -> usize {
        self.target_id
    }

    fn apply(
        &self,
        value: &str,
    ) -> Result<(), BindingError> {
        (self.setter)(value)
    }
}

/// One bound field or setter.
#[derive(Clone)]
pub struct Binding {
    raw_template: String,
    member: String,
    accessor: Arc<dyn BindingAccessor>,
}

impl Binding {
    /// Binds a string setter on `target`, held weakly.
    pub fn new<T, F>(
        target: &Arc<T>,
        member: impl Into<String>,
        raw_template: impl Into<String>,
        setter: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T, &str) -> Result<(), BindingError> + Send + Sync + 'static,
    {
        let member = member.into();
        Self {
            raw_template: raw_template.into(),
            member: member.clone(),
            accessor: Arc::new(WeakSetter {
                target: Arc::downgrade(target),
                member,
                setter,
            }),
        }
    }

    /// Binds a typed setter; the rendered value is parsed with `FromStr`
    /// and a parse failure is reported as [`BindingError::Coercion`].
    pub fn parsed<T, V, F>(
        target: &Arc<T>,
        member: impl Into<String>,
        raw_template: impl Into<String>,
        setter: F,
    ) -> Self
    where
        T: Send + Sync + 'static,
        V: FromStr,
        V::Err: Display,
        F: Fn(&T, V) + Send + Sync + 'static,
    {
        let member = member.into();
        let name = member.clone();
        Self::new(target, member, raw_template, move |t: &T, value: &str| {
            let parsed = value.parse::<V>().map_err(|e| BindingError::Coercion {
                member: name.clone(),
                value: value.to_string(),
                reason: e.to_string(),
            })?;
            setter(t, parsed);
            Ok(())
        })
    }

    /// Binds through an explicit liveness probe instead of a weak reference.
    pub fn with_probe<L, F>(
        target_id: usize,
        member: impl Into<String>,
        raw_template: impl Into<String>,
        is_alive: L,
        setter: F,
    ) -> Self
    where
        L: Fn() -> bool + Send + Sync + 'static,
        F: Fn(&str) -> Result<(), BindingError> + Send + Sync + 'static,
    {
        Self {
            raw_template: raw_template.into(),
            member: member.into(),
            accessor: Arc::new(ProbedSetter {
                target_id,
                is_alive,
                setter,
            }),
        }
    }

    pub fn raw_template(&self) -> &str {
        &self.raw_template
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn is_alive(&self) -> bool {
        self.accessor.is_alive()
    }

    pub fn identity(&self) -> BindingIdentity {
        BindingIdentity {
            target_id: self.accessor.target_id(),
            member: self.member.clone(),
        }
    }

    /// Invokes the setter. Panics raised by user code are caught.
    pub fn apply(
        &self,
        value: &str,
    ) -> Result<(), BindingError> {
        if !self.accessor.is_alive() {
            return Err(BindingError::TargetDropped(self.member.clone()));
        }
        match catch_unwind(AssertUnwindSafe(|| self.accessor.apply(value))) {
            Ok(result) => result,
            Err(_) => Err(BindingError::SetterPanicked(self.member.clone())),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Binding")
            .field("member", &self.member)
            .field("raw_template", &self.raw_template)
            .field("alive", &self.is_alive())
            .finish()
    }
}
