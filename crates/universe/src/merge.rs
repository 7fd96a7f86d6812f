//! Deep merge of instance options over type default options.
//!
//! The rules, applied at every path:
//!
//! * a path-specific [`MergeStrategy`] registered in [`MergeHooks`] wins first
//! * if one side is zero (absent, null, empty list or map) the other side is
//!   taken; scalars are never zero
//! * maps and structs recurse per key / field
//! * `Option` recurses on the pointee when both sides are present
//! * anything else: the instance side wins
//!
//! Paths are dotted field names starting at the root `"."`; a top-level field
//! is `".name"`, a nested one `".name.inner"`.
//!
//! ```rust
//! use universe::merge::{merge, MergeHooks};
//! use universe::options::ObjectOptions;
//!
//! let instance = ObjectOptions { editable: Some(false), ..Default::default() };
//! let defaults = ObjectOptions { editable: Some(true), minimap: Some(true), ..Default::default() };
//!
//! let merged = merge(Some(&instance), Some(&defaults), &MergeHooks::default()).unwrap();
//! assert_eq!(merged.editable, Some(false));
//! assert_eq!(merged.minimap, Some(true));
//! ```

use std::collections::{BTreeMap, HashMap};

/// Root path of a merge.
pub const ROOT_PATH: &str = ".";

/// Override of the default rule at one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Instance value if non-zero, else default. No recursion.
    PreferInstance,
    /// Default value if non-zero, else instance. No recursion.
    PreferDefault,
    /// Instance items followed by default items.
    Append,
    /// Like [`MergeStrategy::Append`] but keeps only the first occurrence of
    /// each item.
    AppendUnique,
}

/// Path-keyed registry of merge strategies.
#[derive(Debug, Clone, Default)]
pub struct MergeHooks {
    strategies: HashMap<String, MergeStrategy>,
}

impl MergeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `strategy` for `path`, replacing any earlier entry.
    pub fn with(mut self, path: impl Into<String>, strategy: MergeStrategy) -> Self {
        self.strategies.insert(path.into(), strategy);
        self
    }

    pub fn get(&self, path: &str) -> Option<MergeStrategy> {
        self.strategies.get(path).copied()
    }

    /// Hooks used for object options: list-valued permissions accumulate
    /// across instance and type instead of replacing each other.
    pub fn object_options() -> Self {
        Self::new()
            .with(".allowed_subobjects", MergeStrategy::AppendUnique)
            .with(".dashboard_plugins", MergeStrategy::AppendUnique)
    }
}

/// Builds the path of `key` below `parent`.
pub fn child_path(parent: &str, key: &str) -> String {
    if parent == ROOT_PATH {
        format!(".{key}")
    } else {
        format!("{parent}.{key}")
    }
}

/// A value that can take part in an options merge.
pub trait Mergeable: Clone {
    /// Whether this value loses against any other value.
    fn is_zero(&self) -> bool;

    /// Merges two non-zero values. Containers recurse; leaves keep `self`.
    fn merge_fields(&self, _default: &Self, _path: &str, _hooks: &MergeHooks) -> Self {
        self.clone()
    }

    /// Concatenation used by the append strategies. `None` for types that
    /// cannot be concatenated, in which case the default rule applies.
    fn concat(&self, _default: &Self, _unique: bool) -> Option<Self> {
        None
    }
}

/// Merges `instance` over `default` at `path`.
pub fn merge_value<T: Mergeable>(instance: &T, default: &T, path: &str, hooks: &MergeHooks) -> T {
    if let Some(strategy) = hooks.get(path) {
        match strategy {
            MergeStrategy::PreferInstance => {
                return if instance.is_zero() {
                    default.clone()
                } else {
                    instance.clone()
                };
            }
            MergeStrategy::PreferDefault => {
                return if default.is_zero() {
                    instance.clone()
                } else {
                    default.clone()
                };
            }
            MergeStrategy::Append | MergeStrategy::AppendUnique => {
                let unique = strategy == MergeStrategy::AppendUnique;
                if let Some(joined) = instance.concat(default, unique) {
                    return joined;
                }
            }
        }
    }

    if instance.is_zero() {
        return default.clone();
    }
    if default.is_zero() {
        return instance.clone();
    }
    instance.merge_fields(default, path, hooks)
}

/// Entry point: merges optional instance options over optional defaults.
///
/// `merge(None, d) == d` and `merge(o, None) == o`.
pub fn merge<T: Mergeable>(instance: Option<&T>, default: Option<&T>, hooks: &MergeHooks) -> Option<T> {
    match (instance, default) {
        (None, None) => None,
        (Some(o), None) => Some(o.clone()),
        (None, Some(d)) => Some(d.clone()),
        (Some(o), Some(d)) => Some(merge_value(o, d, ROOT_PATH, hooks)),
    }
}

// Scalars are never zero: an explicit `false`, `0` or `""` on the instance
// side still wins. Absence is expressed with `Option`.
macro_rules! scalar_mergeable {
    ($($t:ty),* $(,)?) => {
        $(
            impl Mergeable for $t {
                fn is_zero(&self) -> bool {
                    false
                }
            }
        )*
    };
}

scalar_mergeable!(bool, i64, u8, u32, f64, String, uuid::Uuid);

impl<T: Mergeable> Mergeable for Option<T> {
    fn is_zero(&self) -> bool {
        self.is_none()
    }

    fn merge_fields(&self, default: &Self, path: &str, hooks: &MergeHooks) -> Self {
        match (self, default) {
            (Some(o), Some(d)) => Some(merge_value(o, d, path, hooks)),
            (Some(o), None) => Some(o.clone()),
            (None, d) => d.clone(),
        }
    }

    fn concat(&self, default: &Self, unique: bool) -> Option<Self> {
        match (self, default) {
            (Some(o), Some(d)) => o.concat(d, unique).map(Some),
            _ => None,
        }
    }
}

impl<T: Mergeable + PartialEq> Mergeable for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn concat(&self, default: &Self, unique: bool) -> Option<Self> {
        let mut joined: Vec<T> = Vec::with_capacity(self.len() + default.len());
        for item in self.iter().chain(default.iter()) {
            if unique && joined.contains(item) {
                continue;
            }
            joined.push(item.clone());
        }
        Some(joined)
    }
}

impl<K, V> Mergeable for BTreeMap<K, V>
where
    K: Ord + Clone + ToString,
    V: Mergeable,
{
    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn merge_fields(&self, default: &Self, path: &str, hooks: &MergeHooks) -> Self {
        let mut merged = default.clone();
        for (key, value) in self {
            let entry = match default.get(key) {
                Some(d) => merge_value(value, d, &child_path(path, &key.to_string()), hooks),
                None => value.clone(),
            };
            merged.insert(key.clone(), entry);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_missing_side_yields_other() {
        let hooks = MergeHooks::default();
        let d = map(&[("a", 1)]);
        assert_eq!(merge(None, Some(&d), &hooks), Some(d.clone()));
        assert_eq!(merge(Some(&d), None, &hooks), Some(d.clone()));
        assert_eq!(merge::<BTreeMap<String, i64>>(None, None, &hooks), None);
    }

    #[test]
    fn test_map_keys_union_with_instance_precedence() {
        let o = map(&[("a", 5), ("b", 0)]);
        let d = map(&[("a", 1), ("b", 2), ("c", 3)]);
        let merged = merge(Some(&o), Some(&d), &MergeHooks::default()).unwrap();
        assert_eq!(merged, map(&[("a", 5), ("b", 0), ("c", 3)]));
    }

    #[test]
    fn test_explicit_scalar_zero_values_win() {
        let hooks = MergeHooks::default();
        assert!(!merge(Some(&false), Some(&true), &hooks).unwrap());
        assert_eq!(merge(Some(&String::new()), Some(&"x".to_string()), &hooks).unwrap(), "");
        assert_eq!(merge(Some(&Some(0u32)), Some(&Some(7u32)), &hooks).unwrap(), Some(0));
        assert_eq!(merge(Some(&None), Some(&Some(7u32)), &hooks).unwrap(), Some(7));
    }

    #[test]
    fn test_lists_replace_without_hook() {
        let o = vec!["x".to_string()];
        let d = vec!["y".to_string()];
        let merged = merge(Some(&o), Some(&d), &MergeHooks::default()).unwrap();
        assert_eq!(merged, vec!["x".to_string()]);
    }

    #[test]
    fn test_append_unique_hook_at_root() {
        let hooks = MergeHooks::new().with(ROOT_PATH, MergeStrategy::AppendUnique);
        let o = vec![1i64, 2, 3];
        let d = vec![3i64, 4, 1];
        assert_eq!(merge(Some(&o), Some(&d), &hooks).unwrap(), vec![1, 2, 3, 4]);

        let hooks = MergeHooks::new().with(ROOT_PATH, MergeStrategy::Append);
        assert_eq!(merge(Some(&o), Some(&d), &hooks).unwrap(), vec![1, 2, 3, 3, 4, 1]);
    }

    #[test]
    fn test_prefer_default_hook_on_nested_key() {
        let hooks = MergeHooks::new().with(".a", MergeStrategy::PreferDefault);
        let o = map(&[("a", 5), ("b", 6)]);
        let d = map(&[("a", 1), ("b", 2)]);
        let merged = merge(Some(&o), Some(&d), &hooks).unwrap();
        assert_eq!(merged, map(&[("a", 1), ("b", 6)]));
    }

    #[test]
    fn test_merge_is_deterministic() {
        let hooks = MergeHooks::object_options();
        let o = map(&[("z", 1), ("a", 0), ("m", 3)]);
        let d = map(&[("a", 9), ("q", 4)]);
        let first = merge(Some(&o), Some(&d), &hooks);
        for _ in 0..10 {
            assert_eq!(merge(Some(&o), Some(&d), &hooks), first);
        }
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path(ROOT_PATH, "subs"), ".subs");
        assert_eq!(child_path(".subs", "x"), ".subs.x");
    }
}
