//! Workspace queue derivation

use std::collections::HashSet;

/// Derive the next queue from the current one and the names of the workspace's
/// pending (not completed) runs, given in list order.
///
/// Surviving entries keep their relative order, newcomers are appended at the
/// tail and duplicates are dropped.
pub fn recompute_queue(current: &[String], pending: &[String]) -> Vec<String> {
    let pending_set: HashSet<&str> = pending.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(pending.len());
    let mut queue = Vec::with_capacity(pending.len());

    for name in current {
        if pending_set.contains(name.as_str()) && seen.insert(name.as_str()) {
            queue.push(name.clone());
        }
    }

    for name in pending {
        if seen.insert(name.as_str()) {
            queue.push(name.clone());
        }
    }

    queue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_workspace_gets_runs_in_list_order() {
        let queue = recompute_queue(&[], &names(&["b", "a"]));
        assert_eq!(queue, names(&["b", "a"]));
    }

    #[test]
    fn duplicates_in_current_queue_are_collapsed() {
        let queue = recompute_queue(&names(&["a", "a", "b"]), &names(&["a", "b"]));
        assert_eq!(queue, names(&["a", "b"]));
    }

    #[test]
    fn queue_empties_when_nothing_is_pending() {
        assert!(recompute_queue(&names(&["a", "b"]), &[]).is_empty());
    }
}
