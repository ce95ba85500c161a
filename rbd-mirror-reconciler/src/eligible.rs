// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use rbd_mirror_types::PoolDirectory;

/// Application tag marking a pool as holding RBD images.
pub const RBD_APPLICATION: &str = "rbd";

/// Returns the pools that should be mirrored: those tagged with the `rbd`
/// application.
///
/// Pools are returned unmodified. A pool with no applications is never
/// eligible.
pub fn eligible_pools(pools: &PoolDirectory) -> PoolDirectory {
    pools
        .iter()
        .filter(|pool| pool.has_application(RBD_APPLICATION))
        .cloned()
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use rbd_mirror_types::Pool;
    use std::collections::BTreeMap;
    use test_strategy::proptest;

    #[test]
    fn keeps_only_rbd_pools() {
        let mut rbd_pool = Pool::new("cinder-ceph", ["rbd"]);
        rbd_pool.parameters.size = Some(3);
        let pools: PoolDirectory = [
            rbd_pool.clone(),
            Pool::new("glance", ["rbd", "rgw"]),
            Pool::new("default.rgw.log", ["rgw"]),
            Pool::new("untagged", Vec::<String>::new()),
        ]
        .into_iter()
        .collect();

        let eligible = eligible_pools(&pools);
        assert_eq!(
            eligible.names().collect::<Vec<_>>(),
            ["cinder-ceph", "glance"]
        );
        assert_eq!(eligible.get("cinder-ceph"), Some(&rbd_pool));
    }

    #[test]
    fn empty_directory() {
        assert!(eligible_pools(&PoolDirectory::new()).is_empty());
    }

    // Each pool is described by which of `rbd`, `rgw` and `cephfs` it is
    // tagged with.
    #[proptest]
    fn eligible_pools_are_exactly_the_rbd_tagged_ones(
        pools: BTreeMap<String, (bool, bool, bool)>,
    ) {
        let directory: PoolDirectory = pools
            .iter()
            .map(|(name, &(rbd, rgw, cephfs))| {
                let tags = [(rbd, "rbd"), (rgw, "rgw"), (cephfs, "cephfs")];
                Pool::new(
                    name.clone(),
                    tags.into_iter().filter(|(set, _)| *set).map(|(_, t)| t),
                )
            })
            .collect();

        let eligible = eligible_pools(&directory);

        let expected = pools
            .iter()
            .filter(|(_, (rbd, _, _))| *rbd)
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(eligible.names().collect::<Vec<_>>(), expected);
        for pool in &eligible {
            assert_eq!(directory.get(&pool.name), Some(pool));
        }
    }
}
