//! Property tests over whole sync exchanges.

use proptest::prelude::*;

use keysync_testkit::{item_from_params, EnginePair, ItemParams};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_two_keychains_converge(
        left in prop::collection::vec(any::<ItemParams>(), 0..8),
        right in prop::collection::vec(any::<ItemParams>(), 0..8),
    ) {
        let left: Vec<_> = left.iter().map(item_from_params).collect();
        let right: Vec<_> = right.iter().map(item_from_params).collect();

        let (a, b) = runtime().block_on(async {
            let pair = EnginePair::new(&left, &right);
            pair.converge(64).await.unwrap();
            (
                pair.a.local_manifest().await.unwrap(),
                pair.b.local_manifest().await.unwrap(),
            )
        });

        prop_assert_eq!(a, b);
    }
}
