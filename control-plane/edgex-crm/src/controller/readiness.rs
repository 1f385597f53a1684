use std::collections::HashMap;

use crate::crd::edgex::ComponentSpec;
use crate::crd::yurt_app_set::YurtAppSet;

use super::topology;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub ready: i32,
    pub unready: i32,
    pub components_available: bool,
}

/// A workload counts as ready for `pool` once the pool is in its topology,
/// the workload controller reports the pool, and all replicas are ready.
pub fn workload_ready(pool: &str, yas: &YurtAppSet) -> bool {
    if !topology::has_pool(&yas.spec, pool) {
        return false;
    }
    yas.status.as_ref().is_some_and(|s| {
        s.pool_replicas.contains_key(pool) && s.ready_replicas == s.replicas
    })
}

/// Count ready components. `live` maps component name to its YurtAppSet as
/// read before this pass mutated it; components absent from it were just
/// created and are not ready yet.
pub fn aggregate(
    pool: &str,
    desired: &[ComponentSpec],
    live: &HashMap<String, YurtAppSet>,
) -> Readiness {
    let ready = desired
        .iter()
        .filter(|c| {
            c.deployment.is_none()
                || live.get(&c.name).is_some_and(|y| workload_ready(pool, y))
        })
        .count() as i32;
    let total = desired.len() as i32;
    Readiness {
        ready,
        unready: total - ready,
        components_available: ready == total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::yurt_app_set::{YurtAppSetSpec, YurtAppSetStatus};
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use std::collections::BTreeMap;

    fn component(name: &str, workload: bool) -> ComponentSpec {
        ComponentSpec {
            name: name.into(),
            service: None,
            deployment: workload.then(DeploymentSpec::default),
        }
    }

    fn yas(pools: &[&str], reported: &[&str], replicas: i32, ready: i32) -> YurtAppSet {
        let mut spec = YurtAppSetSpec::default();
        for p in pools {
            topology::ensure_pool(&mut spec, p);
        }
        let mut y = YurtAppSet::new("x", spec);
        y.status = Some(YurtAppSetStatus {
            replicas,
            ready_replicas: ready,
            pool_replicas: reported
                .iter()
                .map(|p| (p.to_string(), 1))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        });
        y
    }

    #[test]
    fn counts_two_of_three_ready() {
        let desired = vec![
            component("edgex-core-data", true),
            component("edgex-core-metadata", true),
            component("edgex-core-command", true),
        ];
        let live = HashMap::from([
            ("edgex-core-data".to_string(), yas(&["east"], &["east"], 1, 1)),
            ("edgex-core-metadata".to_string(), yas(&["east"], &["east"], 1, 1)),
            ("edgex-core-command".to_string(), yas(&["east"], &["east"], 1, 0)),
        ]);
        let r = aggregate("east", &desired, &live);
        assert_eq!((r.ready, r.unready), (2, 1));
        assert!(!r.components_available);
    }

    #[test]
    fn pool_must_be_in_topology_and_reported() {
        assert!(!workload_ready("east", &yas(&[], &["east"], 1, 1)));
        assert!(!workload_ready("east", &yas(&["east"], &[], 1, 1)));
        assert!(!workload_ready("east", &YurtAppSet::new("x", YurtAppSetSpec::default())));
        assert!(workload_ready("east", &yas(&["east", "west"], &["east", "west"], 2, 2)));
    }

    #[test]
    fn serviceless_and_workloadless_components_are_ready() {
        let desired = vec![component("edgex-ui", false)];
        let r = aggregate("east", &desired, &HashMap::new());
        assert_eq!((r.ready, r.unready), (1, 0));
        assert!(r.components_available);
    }

    #[test]
    fn just_created_workload_is_not_ready() {
        let desired = vec![component("edgex-redis", true)];
        let r = aggregate("east", &desired, &HashMap::new());
        assert_eq!((r.ready, r.unready), (0, 1));
    }
}
