//! Variable environments.
//!
//! An [`Environ`] is a read-only view of variables. [`MapEnviron`] is the
//! immutable base a host hands to the runner, and [`Overlay`] layers
//! copy-on-write scopes on top of it: reads fall through the local layer to
//! the parent chain, writes only ever land in the local layer.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shell variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// The string value.
    pub value: String,
    /// Whether the variable is passed on to commands' environments.
    pub exported: bool,
    /// Whether assignments to the variable are rejected.
    pub read_only: bool,
}

impl Variable {
    /// A plain, unexported variable.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// An exported variable.
    pub fn exported(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            exported: true,
            read_only: false,
        }
    }

    /// Mark the variable read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Errors raised when writing to an environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// The variable is read-only.
    #[error("{0}: readonly variable")]
    ReadOnly(String),
}

/// Read-only view of a set of variables.
pub trait Environ: Send + Sync + fmt::Debug {
    /// Look up a variable; `None` means unset.
    fn get(&self, name: &str) -> Option<Variable>;

    /// Visit every set variable once, in no particular order.
    fn each(&self, f: &mut dyn FnMut(&str, &Variable));

    /// Collect every set variable into a sorted map.
    fn to_map(&self) -> BTreeMap<String, Variable> {
        let mut out = BTreeMap::new();
        self.each(&mut |name, var| {
            out.insert(name.to_string(), var.clone());
        });
        out
    }
}

/// Immutable environment built from name/value pairs.
#[derive(Debug, Clone, Default)]
pub struct MapEnviron {
    vars: BTreeMap<String, Variable>,
}

impl MapEnviron {
    /// Build an environment whose variables are all exported.
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Variable::exported(v)))
                .collect(),
        }
    }

    /// Build an environment from the host process's variables.
    pub fn from_process() -> Self {
        Self::new(std::env::vars())
    }
}

impl Environ for MapEnviron {
    fn get(&self, name: &str) -> Option<Variable> {
        self.vars.get(name).cloned()
    }

    fn each(&self, f: &mut dyn FnMut(&str, &Variable)) {
        for (name, var) in &self.vars {
            f(name, var);
        }
    }
}

/// Copy-on-write variable scope.
///
/// A `None` entry in the local layer is a tombstone: the name reads as unset
/// even if a parent defines it.
pub struct Overlay {
    parent: Option<Arc<dyn Environ>>,
    values: RwLock<HashMap<String, Option<Variable>>>,
}

impl fmt::Debug for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("has_parent", &self.parent.is_some())
            .finish_non_exhaustive()
    }
}

impl Overlay {
    /// A scope layered over `parent`.
    pub fn new(parent: Arc<dyn Environ>) -> Self {
        Self {
            parent: Some(parent),
            values: RwLock::new(HashMap::new()),
        }
    }

    /// A scope for concurrent use, detached from `parent`.
    ///
    /// The merged view of `parent` is copied at creation, so later writes on
    /// either side are never observed by the other.
    pub fn detached(parent: &dyn Environ) -> Self {
        let mut values = HashMap::new();
        parent.each(&mut |name, var| {
            values.insert(name.to_string(), Some(var.clone()));
        });
        Self {
            parent: None,
            values: RwLock::new(values),
        }
    }

    /// Assign `var` to `name` in the local layer.
    pub fn set(&self, name: &str, var: Variable) -> Result<(), EnvError> {
        self.check_writable(name)?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Some(var));
        Ok(())
    }

    /// Mark `name` unset in the local layer.
    pub fn unset(&self, name: &str) -> Result<(), EnvError> {
        self.check_writable(name)?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), None);
        Ok(())
    }

    fn check_writable(&self, name: &str) -> Result<(), EnvError> {
        match self.get(name) {
            Some(var) if var.read_only => Err(EnvError::ReadOnly(name.to_string())),
            _ => Ok(()),
        }
    }
}

impl Environ for Overlay {
    fn get(&self, name: &str) -> Option<Variable> {
        let local = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        match local {
            Some(entry) => entry,
            None => self.parent.as_ref().and_then(|p| p.get(name)),
        }
    }

    fn each(&self, f: &mut dyn FnMut(&str, &Variable)) {
        let mut merged = match &self.parent {
            Some(parent) => parent.to_map(),
            None => BTreeMap::new(),
        };
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        for (name, entry) in values.iter() {
            match entry {
                Some(var) => {
                    merged.insert(name.clone(), var.clone());
                }
                None => {
                    merged.remove(name);
                }
            }
        }
        drop(values);
        for (name, var) in &merged {
            f(name, var);
        }
    }
}
