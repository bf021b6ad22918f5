//! Larder Storage - Cache Store Boundary and Adapter
//!
//! [`CacheStore`] is the byte-level boundary a persistence backend
//! implements. [`CacheAdapter`] layers typed records, collection indexes
//! and partial-failure bookkeeping on top of it.

pub mod adapter;
pub mod store;

pub use adapter::{CacheAdapter, CacheStats, CollectionRead, CollectionWriteReport};
pub use store::{CacheStore, InMemoryCacheStore};

#[cfg(test)]
mod prop_tests {
    use super::*;
    use larder_core::Providable;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Member {
        id: String,
    }

    impl Providable for Member {
        fn identifier(&self) -> String {
            self.id.clone()
        }
    }

    fn member_ids() -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set("[a-z]{1,8}", 1..12).prop_map(|set| set.into_iter().collect())
    }

    proptest! {
        /// Property: with N indexed members of which F were removed, a
        /// collection read yields N - F items and F failures naming exactly
        /// the removed keys.
        #[test]
        fn prop_partial_failure_counts(
            ids in member_ids(),
            removal_mask in prop::collection::vec(any::<bool>(), 12),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime should build");

            runtime.block_on(async {
                let store = Arc::new(InMemoryCacheStore::new());
                let adapter = CacheAdapter::new(store.clone());
                let members: Vec<Member> = ids.iter().map(|id| Member { id: id.clone() }).collect();
                adapter.write_collection("index", &members, None).await;

                let mut removed = BTreeSet::new();
                for (id, remove) in ids.iter().zip(removal_mask.iter()) {
                    if *remove {
                        store.remove(id).await.expect("remove should succeed");
                        removed.insert(id.clone());
                    }
                }

                let read = adapter
                    .read_collection::<Member>("index")
                    .await
                    .expect("index should be readable");

                prop_assert_eq!(read.items.len(), ids.len() - removed.len());
                prop_assert_eq!(read.failures.len(), removed.len());
                let failed: BTreeSet<String> = read.failures.iter().map(|f| f.key.clone()).collect();
                prop_assert_eq!(failed, removed);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
