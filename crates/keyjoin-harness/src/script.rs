#![forbid(unsafe_code)]

//! JSON event scripts.
//!
//! A script is a list of writes against a [`MemoryStore`], kept as a JSON
//! fixture:
//!
//! ```json
//! {
//!   "name": "swap unresolved key",
//!   "steps": [
//!     { "op": "push", "path": "/sel", "key": "x", "value": true },
//!     { "op": "set", "path": "/users/y", "value": "Y" },
//!     { "op": "cancel", "path": "/users/x", "reason": "permission_denied" }
//!   ]
//! }
//! ```
//!
//! Omitted `after` means "front"; omitted `value` in a `set` deletes.

use std::fmt;

use keyjoin_core::{CancelReason, Cancellation, KeyjoinError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::MemoryStore;
use crate::shrink;

/// One write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptStep<V> {
    Insert {
        path: String,
        key: String,
        value: V,
        after: Option<String>,
    },
    Push {
        path: String,
        key: String,
        value: V,
    },
    Change {
        path: String,
        key: String,
        value: V,
    },
    Remove {
        path: String,
        key: String,
    },
    Move {
        path: String,
        key: String,
        after: Option<String>,
    },
    Set {
        path: String,
        value: Option<V>,
    },
    Cancel {
        path: String,
        #[serde(default)]
        reason: CancelReason,
        #[serde(default)]
        message: String,
    },
}

impl<V> ScriptStep<V> {
    /// Path of the node the step writes to.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Insert { path, .. }
            | Self::Push { path, .. }
            | Self::Change { path, .. }
            | Self::Remove { path, .. }
            | Self::Move { path, .. }
            | Self::Set { path, .. }
            | Self::Cancel { path, .. } => path,
        }
    }
}

/// A named list of writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventScript<V> {
    #[serde(default)]
    pub name: String,
    pub steps: Vec<ScriptStep<V>>,
}

/// Failure to load or run a script.
#[derive(Debug)]
pub enum ScriptError {
    /// Malformed JSON or a shape that does not match [`EventScript`].
    Json(serde_json::Error),
    /// The store rejected step `index`.
    Step { index: usize, error: KeyjoinError },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid script: {err}"),
            Self::Step { index, error } => write!(f, "step {index} rejected: {error}"),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Step { error, .. } => Some(error),
        }
    }
}

impl From<serde_json::Error> for ScriptError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl<V> EventScript<V>
where
    V: Clone + Serialize + DeserializeOwned + 'static,
{
    /// Build a script from steps.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<ScriptStep<V>>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Parse a script.
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> Result<String, ScriptError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Apply every step in order. Stops at the first rejected step.
    ///
    /// Returns the number of steps applied.
    pub fn run(&self, store: &MemoryStore<V>) -> Result<usize, ScriptError> {
        debug!(message = "script.run", name = %self.name, steps = self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            apply_step(store, step).map_err(|error| ScriptError::Step { index, error })?;
        }
        Ok(self.steps.len())
    }

    /// Smallest sub-script (steps in original order) for which `failing`
    /// still holds.
    #[must_use]
    pub fn minimized<F>(&self, failing: F) -> Self
    where
        F: Fn(&EventScript<V>) -> bool,
    {
        let steps = shrink::minimize(self.steps.clone(), |steps| {
            failing(&EventScript {
                name: self.name.clone(),
                steps: steps.to_vec(),
            })
        });
        Self {
            name: self.name.clone(),
            steps,
        }
    }
}

fn apply_step<V: Clone + 'static>(
    store: &MemoryStore<V>,
    step: &ScriptStep<V>,
) -> Result<(), KeyjoinError> {
    let node = store.reference(step.path());
    match step {
        ScriptStep::Insert {
            key, value, after, ..
        } => node.insert_child(key, value.clone(), after.as_deref()),
        ScriptStep::Push { key, value, .. } => node.push_child(key, value.clone()),
        ScriptStep::Change { key, value, .. } => node.change_child(key, value.clone()),
        ScriptStep::Remove { key, .. } => node.remove_child(key),
        ScriptStep::Move { key, after, .. } => node.move_child(key, after.as_deref()),
        ScriptStep::Set { value, .. } => node.set_value(value.clone()),
        ScriptStep::Cancel {
            reason, message, ..
        } => {
            node.cancel(Cancellation::new(*reason, message.clone()));
            Ok(())
        }
    }
}
