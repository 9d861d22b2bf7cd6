// assertions.rs — Typed assertion sets and boolean state maps.
//
// Preconditions and effects are ordered sets of opaque assertion names.
// Goal state and world state are ordered maps from assertion name to a
// boolean. Insertion order is kept so that "missing" lists and rendered
// state come out in the order the caller declared them.

use indexmap::{IndexMap, IndexSet};

/// An ordered, de-duplicated set of assertion names (preconditions or effects).
pub type AssertionSet = IndexSet<String>;

/// An ordered map from assertion name to boolean (goal state or world state).
pub type AssertionMap = IndexMap<String, bool>;

/// Build an [`AssertionSet`] from anything string-like. Duplicates collapse.
pub fn assertion_set<I, S>(names: I) -> AssertionSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

/// Build an [`AssertionMap`] from `(name, value)` pairs. Later pairs win.
pub fn assertion_map<I, S>(pairs: I) -> AssertionMap
where
    I: IntoIterator<Item = (S, bool)>,
    S: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// True when `name` is present and `true` in `state`.
pub fn holds(state: &AssertionMap, name: &str) -> bool {
    state.get(name).copied().unwrap_or(false)
}
