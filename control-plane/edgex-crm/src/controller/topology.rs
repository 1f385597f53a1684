//! Pool-topology entries on YurtAppSets. Each EdgeX owns exactly the entry
//! named after its pool and never touches the others.

use k8s_openapi::api::core::v1::{NodeSelectorRequirement, NodeSelectorTerm};

use crate::crd::yurt_app_set::{LABEL_CURRENT_NODE_POOL, Pool, YurtAppSetSpec};

/// Replicas requested per pool.
pub const POOL_REPLICAS: i32 = 1;

pub fn pool_entry(pool: &str) -> Pool {
    Pool {
        name: pool.to_string(),
        node_selector_term: NodeSelectorTerm {
            match_expressions: Some(vec![NodeSelectorRequirement {
                key: LABEL_CURRENT_NODE_POOL.to_string(),
                operator: "In".to_string(),
                values: Some(vec![pool.to_string()]),
            }]),
            match_fields: None,
        },
        replicas: Some(POOL_REPLICAS),
        ..Default::default()
    }
}

pub fn has_pool(spec: &YurtAppSetSpec, pool: &str) -> bool {
    spec.topology.pools.iter().any(|p| p.name == pool)
}

/// Append an entry for `pool` unless one exists. Returns whether it did.
pub fn ensure_pool(spec: &mut YurtAppSetSpec, pool: &str) -> bool {
    if has_pool(spec, pool) {
        return false;
    }
    spec.topology.pools.push(pool_entry(pool));
    true
}

/// Drop the entries named `pool`. Returns whether any were removed.
pub fn remove_pool(spec: &mut YurtAppSetSpec, pool: &str) -> bool {
    let before = spec.topology.pools.len();
    spec.topology.pools.retain(|p| p.name != pool);
    spec.topology.pools.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_entry_selects_the_pool() {
        let p = pool_entry("hangzhou");
        assert_eq!(p.replicas, Some(1));
        let expr = &p.node_selector_term.match_expressions.unwrap()[0];
        assert_eq!(expr.key, "apps.openyurt.io/nodepool");
        assert_eq!(expr.operator, "In");
        assert_eq!(expr.values.as_deref(), Some(&["hangzhou".to_string()][..]));
    }

    #[test]
    fn ensure_and_remove_leave_other_pools_alone() {
        let mut spec = YurtAppSetSpec::default();
        assert!(ensure_pool(&mut spec, "east"));
        assert!(!ensure_pool(&mut spec, "east"));
        let mut west = pool_entry("west");
        west.replicas = Some(3);
        spec.topology.pools.push(west.clone());

        assert!(remove_pool(&mut spec, "east"));
        assert!(!remove_pool(&mut spec, "east"));
        assert_eq!(spec.topology.pools, vec![west]);
    }
}
