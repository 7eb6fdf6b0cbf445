//! Multicast groups (spec.md §3, §4.6): a keyword maps to a set of SIDs;
//! `sendMulticast` fans a command out to every group whose keyword is the
//! wildcard `"*"` or a literal prefix of the command.

use crate::session::Sid;
use std::collections::HashMap;

/// Hard cap on groups (spec.md §3).
pub const MAX_GROUPS: usize = 100;
/// Hard cap on members per group (spec.md §3).
pub const MAX_MEMBERS: usize = 100;

pub const WILDCARD: &str = "*";

#[derive(Default)]
pub struct MulticastTable {
    groups: HashMap<String, Vec<Sid>>,
}

impl MulticastTable {
    pub fn new() -> MulticastTable {
        MulticastTable { groups: HashMap::new() }
    }

    /// Idempotent: adding the same `(keyword, sid)` pair twice is a no-op.
    /// Creates the group on first use. Silently declines once either
    /// capacity invariant would be exceeded (spec.md §3).
    pub fn add(&mut self, sid: Sid, keyword: &str) {
        if !self.groups.contains_key(keyword) && self.groups.len() >= MAX_GROUPS {
            return;
        }
        let members = self.groups.entry(keyword.to_string()).or_default();
        if members.contains(&sid) {
            return;
        }
        if members.len() >= MAX_MEMBERS {
            return;
        }
        members.push(sid);
    }

    /// Every SID that should receive `command`: the union of members of
    /// the wildcard group and every group whose keyword prefixes `command`.
    pub fn matching_sids(&self, command: &str) -> Vec<Sid> {
        let mut sids = Vec::new();
        for (keyword, members) in &self.groups {
            if keyword == WILDCARD || command.starts_with(keyword.as_str()) {
                for &sid in members {
                    if !sids.contains(&sid) {
                        sids.push(sid);
                    }
                }
            }
        }
        sids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut table = MulticastTable::new();
        table.add(1, "foo");
        table.add(1, "foo");
        assert_eq!(table.groups.get("foo").unwrap().len(), 1);
    }

    #[test]
    fn wildcard_matches_everything() {
        let mut table = MulticastTable::new();
        table.add(1, WILDCARD);
        assert_eq!(table.matching_sids("anything"), vec![1]);
    }

    #[test]
    fn prefix_match_and_union() {
        let mut table = MulticastTable::new();
        table.add(1, "foo");
        table.add(2, "foo");
        table.add(3, "bar");
        let mut sids = table.matching_sids("foo bar");
        sids.sort();
        assert_eq!(sids, vec![1, 2]);
    }
}
