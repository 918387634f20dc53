//! Batched set/unset with a reverse-set generator (spec.md §4.13
//! "Change sets", C14).

use error::ConfResult;
use value::Value;

use crate::Client;

/// One operation in a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSetOp {
    Set { key: String, value: Value },
    Unset { key: String },
}

impl ChangeSetOp {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            ChangeSetOp::Set { key, .. } | ChangeSetOp::Unset { key } => key,
        }
    }
}

/// An ordered batch of set/unset operations (spec.md §4.13 point 6).
/// Iteration and commit order follow insertion order; the spec leaves
/// commit order unspecified beyond "iterates in unspecified order", so
/// insertion order is as good as any and makes replay deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    ops: Vec<ChangeSetOp>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.ops.push(ChangeSetOp::Set {
            key: key.into(),
            value,
        });
        self
    }

    pub fn unset(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(ChangeSetOp::Unset { key: key.into() });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeSetOp> {
        self.ops.iter()
    }
}

impl Client {
    /// Applies every operation in `cs` in order via `set`/`unset`,
    /// stopping and reporting on the first failure (spec.md §4.13
    /// point 6 "on first error, stops and reports").
    ///
    /// When `remove_committed` is set, each operation that commits
    /// successfully is removed from `cs` so a caller can retry just
    /// the remainder.
    pub fn commit(&mut self, cs: &mut ChangeSet, remove_committed: bool) -> ConfResult<()> {
        let mut committed = 0;
        let result = (|| {
            for op in &cs.ops {
                match op {
                    ChangeSetOp::Set { key, value } => self.set(key, value.clone())?,
                    ChangeSetOp::Unset { key } => self.unset(key)?,
                }
                committed += 1;
            }
            Ok(())
        })();
        if remove_committed {
            cs.ops.drain(0..committed);
        }
        result
    }

    /// Returns a new [`ChangeSet`] whose application would undo `cs`,
    /// computed against the *current* state: for each entry in `cs`,
    /// the reverse restores whatever is observable right now (restore
    /// the current value, or unset if currently unset), matching
    /// spec.md §4.13 point 6's "reverse_change_set".
    pub fn reverse_change_set(&mut self, cs: &ChangeSet) -> ConfResult<ChangeSet> {
        let mut reverse = ChangeSet::new();
        for op in &cs.ops {
            let key = op.key();
            match self.get(key)? {
                Some(value) => {
                    reverse.set(key, value);
                }
                None => {
                    reverse.unset(key);
                }
            }
        }
        Ok(reverse)
    }
}
