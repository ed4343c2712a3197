//! Order-insensitive comparisons used by the desired-state predicates.

use std::collections::BTreeMap;

/// Multiset equality: same elements with the same multiplicity, in any order.
pub fn unordered_eq<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; a.len()];
    b.iter().all(|elem| {
        match a
            .iter()
            .enumerate()
            .position(|(i, candidate)| !used[i] && candidate == elem)
        {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

/// Every element of `needed` occurs in `checked`.
pub fn unordered_contains<T: PartialEq>(checked: &[T], needed: &[T]) -> bool {
    needed.iter().all(|elem| checked.contains(elem))
}

/// Every key produced by `key` over `needed` is produced by some element of `checked`.
pub fn unordered_contains_by<T, F>(checked: &[T], needed: &[T], key: F) -> bool
where
    F: Fn(&T) -> String,
{
    let present: Vec<String> = checked.iter().map(&key).collect();
    needed.iter().all(|elem| present.contains(&key(elem)))
}

/// True iff every pair of `needed` is present in `checked` with an equal value.
/// Extra entries in `checked` are tolerated.
pub fn map_has_all_pairs<V: PartialEq>(checked: &BTreeMap<String, V>, needed: &BTreeMap<String, V>) -> bool {
    needed
        .iter()
        .all(|(key, value)| checked.get(key).is_some_and(|found| found == value))
}

pub fn map_has_all_keys<V1, V2>(checked: &BTreeMap<String, V1>, needed: &BTreeMap<String, V2>) -> bool {
    needed.keys().all(|key| checked.contains_key(key))
}

/// Copy of `base` with every entry of `overrides` written on top.
pub fn merge_maps(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn superset_keeps_map_in_desired_state() {
        let expected = map(&[("app", "reporter"), ("release", "lsr")]);
        let actual = map(&[("app", "reporter"), ("release", "lsr"), ("added-by", "webhook")]);
        assert!(map_has_all_pairs(&actual, &expected));
        assert!(map_has_all_pairs(&actual, &BTreeMap::new()));
    }

    #[test]
    fn missing_or_changed_pair_breaks_desired_state() {
        let expected = map(&[("app", "reporter"), ("release", "lsr")]);
        assert!(!map_has_all_pairs(&map(&[("app", "reporter")]), &expected));
        assert!(!map_has_all_pairs(
            &map(&[("app", "reporter"), ("release", "other")]),
            &expected
        ));
        assert!(!map_has_all_pairs(&BTreeMap::new(), &expected));
    }

    #[test]
    fn keys_only_check_ignores_values() {
        let checked = map(&[("token", "")]);
        assert!(map_has_all_keys(&checked, &map(&[("token", "abc")])));
        assert!(!map_has_all_keys(&checked, &map(&[("password", "abc")])));
    }

    #[test]
    fn unordered_eq_respects_multiplicity() {
        assert!(unordered_eq(&["a", "b", "a"], &["a", "a", "b"]));
        assert!(!unordered_eq(&["a", "b", "b"], &["a", "a", "b"]));
        assert!(!unordered_eq(&["a"], &["a", "a"]));
        assert!(unordered_eq::<&str>(&[], &[]));
    }

    #[test]
    fn contains_checks() {
        assert!(unordered_contains(&[1, 2, 3], &[3, 1]));
        assert!(!unordered_contains(&[1, 2], &[4]));
        assert!(unordered_contains_by(&["a:1", "b:2"], &["b:2"], |s| s.to_string()));
        assert!(!unordered_contains_by(&["a:1"], &["a:2"], |s| s.to_string()));
    }

    #[test]
    fn merge_lets_overrides_win() {
        let merged = merge_maps(&map(&[("a", "1"), ("b", "2")]), &map(&[("b", "3"), ("c", "4")]));
        assert_eq!(merged, map(&[("a", "1"), ("b", "3"), ("c", "4")]));
    }
}
