//! Network normalisation
//!
//! Coalesces `(network, value)` pairs into the smallest equivalent set: two
//! sibling networks (the halves of one parent) carrying equal values become
//! the parent, repeatedly, bottom-up. The merge runs on a stack over the
//! sorted input, so each pair is merged as soon as both halves are seen and
//! a merged parent can immediately merge with its own sibling.

use crate::network::{Entry, Network};

/// Merge sibling networks with equal values
///
/// The input is sorted by `(base, prefix_len)` first, so the result does not
/// depend on input order. When the same network appears more than once the
/// later value wins, matching [`crate::mmdb_builder::MmdbBuilder`]. Input
/// entries are expected to be disjoint, as produced by walking a tree; nested
/// input is accepted and keeps longest-prefix semantics, but is not
/// guaranteed to be minimal.
pub fn normalize<V: PartialEq>(mut items: Vec<(Network, V)>) -> Vec<(Network, V)> {
    let input_len = items.len();
    items.sort_by_key(|(network, _)| *network);

    let mut stack: Vec<(Network, V)> = Vec::with_capacity(items.len());
    for item in items {
        stack.push(item);
        reduce_top(&mut stack);
    }

    log::debug!(
        "Normalized {} networks into {} ({} merged)",
        input_len,
        stack.len(),
        input_len - stack.len()
    );
    stack
}

/// [`normalize`] over [`Entry`] values
pub fn normalize_entries(entries: Vec<Entry>) -> Vec<Entry> {
    normalize(
        entries
            .into_iter()
            .map(|entry| (entry.network, entry.record))
            .collect(),
    )
    .into_iter()
    .map(|(network, record)| Entry::new(network, record))
    .collect()
}

/// Merge the top of the stack until it no longer changes
fn reduce_top<V: PartialEq>(stack: &mut Vec<(Network, V)>) {
    while stack.len() >= 2 {
        let n = stack.len();
        let (left, right) = (&stack[n - 2], &stack[n - 1]);

        if left.0 == right.0 {
            // Duplicate network: keep the later value
            stack.swap_remove(n - 2);
            continue;
        }

        let mergeable =
            left.0.is_left_child() && left.0.sibling() == Some(right.0) && left.1 == right.1;
        if !mergeable {
            break;
        }

        stack.pop();
        let top = &mut stack[n - 2];
        match top.0.parent() {
            Some(parent) => top.0 = parent,
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(list: &[(&str, u8)]) -> Vec<(Network, u8)> {
        list.iter().map(|(n, v)| (n.parse().unwrap(), *v)).collect()
    }

    fn render(list: &[(Network, u8)]) -> Vec<(String, u8)> {
        list.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn test_siblings_with_equal_values_merge() {
        let out = normalize(items(&[("203.0.113.0/25", 1), ("203.0.113.128/25", 1)]));
        assert_eq!(render(&out), vec![("203.0.113.0/24".to_string(), 1)]);
    }

    #[test]
    fn test_siblings_with_different_values_stay() {
        let input = items(&[("203.0.113.0/25", 1), ("203.0.113.128/25", 2)]);
        let out = normalize(input.clone());
        assert_eq!(out, input);
    }

    #[test]
    fn test_adjacent_non_siblings_stay() {
        // Adjacent, but 10.0.1.0/24 and 10.0.2.0/24 have different parents
        let input = items(&[("10.0.1.0/24", 1), ("10.0.2.0/24", 1)]);
        assert_eq!(normalize(input.clone()), input);
    }

    #[test]
    fn test_cascading_merge() {
        let out = normalize(items(&[
            ("10.0.0.0/26", 7),
            ("10.0.0.64/26", 7),
            ("10.0.0.128/25", 7),
            ("10.0.1.0/24", 7),
        ]));
        assert_eq!(render(&out), vec![("10.0.0.0/23".to_string(), 7)]);
    }

    #[test]
    fn test_unsorted_input() {
        let out = normalize(items(&[
            ("10.0.1.0/24", 7),
            ("10.0.0.128/25", 7),
            ("10.0.0.0/25", 7),
        ]));
        assert_eq!(render(&out), vec![("10.0.0.0/23".to_string(), 7)]);
    }

    #[test]
    fn test_duplicates_collapse_later_wins() {
        let out = normalize(items(&[("8.8.8.0/24", 1), ("8.8.8.0/24", 2)]));
        assert_eq!(render(&out), vec![("8.8.8.0/24".to_string(), 2)]);
    }

    #[test]
    fn test_whole_space_from_halves() {
        let out = normalize(items(&[("::/1", 3), ("8000::/1", 3)]));
        assert_eq!(out, vec![(Network::ALL, 3)]);
    }

    #[test]
    fn test_nested_input_keeps_longest_prefix() {
        // Both halves of the /8 become CN: the merged /8 overrides the XX /8
        let out = normalize(items(&[
            ("1.0.0.0/8", 0),
            ("1.0.0.0/9", 1),
            ("1.128.0.0/9", 1),
        ]));
        assert_eq!(render(&out), vec![("1.0.0.0/8".to_string(), 1)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(normalize::<u8>(Vec::new()).is_empty());
    }
}
