use airgap_custody::shamir::{combine, split, ShamirError, Share};
use proptest::prelude::*;
use proptest::sample::subsequence;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_threshold_subset_recovers(
        (threshold, total, picks) in (2u8..=50u8)
            .prop_flat_map(|m| (Just(m), m..=50u8))
            .prop_flat_map(|(m, n)| {
                (Just(m), Just(n), subsequence((0..n as usize).collect::<Vec<_>>(), m as usize))
            }),
        secret in proptest::collection::vec(any::<u8>(), 1..65)
    ) {
        let set = split(&secret, threshold, total).unwrap();
        prop_assert_eq!(set.shares.len(), total as usize);

        let subset: Vec<Share> = picks.iter().map(|&i| set.shares[i].clone()).collect();
        let recovered = combine(&subset).unwrap();
        prop_assert_eq!(recovered.as_slice(), secret.as_slice());
    }

    #[test]
    fn fewer_than_threshold_is_refused(
        (threshold, total, picks) in (2u8..=50u8)
            .prop_flat_map(|m| (Just(m), m..=50u8))
            .prop_flat_map(|(m, n)| {
                (Just(m), Just(n), subsequence((0..n as usize).collect::<Vec<_>>(), m as usize - 1))
            }),
        secret in proptest::collection::vec(any::<u8>(), 1..33)
    ) {
        let set = split(&secret, threshold, total).unwrap();
        let subset: Vec<Share> = picks.iter().map(|&i| set.shares[i].clone()).collect();
        prop_assert_eq!(
            combine(&subset),
            Err(ShamirError::InsufficientShares { needed: threshold, have: threshold as usize - 1 })
        );
    }

    #[test]
    fn share_hex_roundtrip_keeps_index(secret in proptest::collection::vec(any::<u8>(), 1..33)) {
        let set = split(&secret, 2, 3).unwrap();
        for share in &set.shares {
            let parsed = Share::from_hex(&share.to_hex()).unwrap();
            prop_assert_eq!(parsed.index(), share.index());
            prop_assert_eq!(parsed.threshold(), 2);
        }
    }
}
