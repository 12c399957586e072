//! Role hierarchy flattening
//!
//! A role holds its own grants plus everything its ancestors grant. The
//! graph is walked once when a user's cache is rebuilt, never at check time.

use crate::models::role::{RoleGrant, RoleParentEdge};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

#[derive(Debug, Default, Clone)]
pub struct RoleGraph {
    parents: HashMap<i32, Vec<i32>>,
    grants: HashMap<i32, BTreeSet<String>>,
}

impl RoleGraph {
    pub fn new(edges: &[RoleParentEdge], grants: &[RoleGrant]) -> Self {
        let mut graph = Self::default();
        for edge in edges {
            graph.add_parent(edge.role_id, edge.parent_role_id);
        }
        for grant in grants {
            graph.grant(grant.role_id, &grant.tag);
        }
        graph
    }

    pub fn add_parent(&mut self, role_id: i32, parent_role_id: i32) {
        let parents = self.parents.entry(role_id).or_default();
        if !parents.contains(&parent_role_id) {
            parents.push(parent_role_id);
        }
    }

    pub fn grant(&mut self, role_id: i32, tag: &str) {
        self.grants
            .entry(role_id)
            .or_default()
            .insert(tag.to_string());
    }

    /// The roles plus all of their ancestors; cycles are tolerated
    pub fn closure(&self, role_ids: &[i32]) -> BTreeSet<i32> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<i32> = role_ids.iter().copied().collect();

        while let Some(role_id) = queue.pop_front() {
            if !visited.insert(role_id) {
                continue;
            }
            if let Some(parents) = self.parents.get(&role_id) {
                queue.extend(parents.iter().copied().filter(|p| !visited.contains(p)));
            }
        }

        visited.into_iter().collect()
    }

    /// Union of the grants of `role_ids`, their ancestors and `direct`
    pub fn effective_permissions<I, S>(&self, role_ids: &[i32], direct: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut permissions: BTreeSet<String> = direct.into_iter().map(Into::into).collect();

        for role_id in self.closure(role_ids) {
            if let Some(tags) = self.grants.get(&role_id) {
                permissions.extend(tags.iter().cloned());
            }
        }

        permissions
    }
}
