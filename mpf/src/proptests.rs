use std::collections::BTreeMap;

use proptest::prelude::*;

use mpf_storage::MemoryStore;

use crate::Trie;

fn block_on<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("tokio runtime")
        .block_on(future)
}

/// Actions to replay against the trie and a BTreeMap model in lockstep.
#[derive(Debug, Clone)]
enum Action {
    Insert(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
    Get(Vec<u8>),
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    // A narrow alphabet of short keys makes overwrites, deletes of present
    // keys, and shared path prefixes actually happen.
    prop::collection::vec(prop::num::u8::ANY, 0..3)
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (key_strategy(), prop::collection::vec(prop::num::u8::ANY, 0..4))
            .prop_map(|(k, v)| Action::Insert(k, v)),
        key_strategy().prop_map(Action::Delete),
        key_strategy().prop_map(Action::Get),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn trie_agrees_with_model(actions in prop::collection::vec(action_strategy(), 1..40)) {
        block_on(async {
            let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
            let mut trie = Trie::new(MemoryStore::new());

            for action in &actions {
                match action {
                    Action::Insert(key, value) => {
                        model.insert(key.clone(), value.clone());
                        trie.insert(key, value).await.expect("insert");
                    }
                    Action::Delete(key) => {
                        model.remove(key);
                        trie.delete(key).await.expect("delete");
                    }
                    Action::Get(key) => {
                        let got = trie.get(key).await.expect("get");
                        prop_assert_eq!(&got, &model.get(key).cloned());
                    }
                }
            }

            for (key, value) in &model {
                let got = trie.get(key).await.expect("get");
                prop_assert_eq!(got.as_deref(), Some(value.as_slice()));
            }

            // Replaying the surviving entries alone, in model (sorted)
            // order, lands on the same root: content determines the
            // commitment, history does not.
            let replayed = Trie::from_entries(MemoryStore::new(), model.iter())
                .await
                .expect("replay");
            prop_assert_eq!(replayed.root_hash(), trie.root_hash());

            if let Some(node) = trie.root_link().node() {
                node.check_invariants(0).expect("invariants");
            }
            Ok(())
        })?;
    }

    #[test]
    fn proofs_verify_in_both_modes(
        entries in prop::collection::btree_map(key_strategy(), prop::collection::vec(prop::num::u8::ANY, 0..4), 1..12),
        probe in key_strategy(),
    ) {
        block_on(async {
            let mut trie = Trie::from_entries(MemoryStore::new(), entries.iter())
                .await
                .expect("build");
            let root = trie.root_hash();

            for (key, value) in &entries {
                let proof = trie.prove(key).await.expect("prove");
                prop_assert_eq!(proof.verify(key, Some(value), true), Some(root));

                let without = Trie::from_entries(
                    MemoryStore::new(),
                    entries.iter().filter(|(k, _)| *k != key),
                )
                .await
                .expect("build without");
                prop_assert_eq!(proof.verify(key, None, false), Some(without.root_hash()));
            }

            if !entries.contains_key(&probe) {
                let proof = trie.prove(&probe).await.expect("prove absent");
                prop_assert_eq!(proof.verify(&probe, None, false), Some(root));

                let mut with = Trie::from_entries(MemoryStore::new(), entries.iter())
                    .await
                    .expect("rebuild");
                with.insert(&probe, b"probe").await.expect("insert probe");
                prop_assert_eq!(
                    proof.verify(&probe, Some(b"probe"), true),
                    Some(with.root_hash())
                );
            }
            Ok(())
        })?;
    }
}
