#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::engine::test_keys::{alice, bob};
    use crate::engine::CryptoEngine;

    proptest! {
        // RSA operations are slow; a handful of cases covers both paths.
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_encrypt_decrypt_round_trip(plaintext in prop::collection::vec(any::<u8>(), 0..2048)) {
            let ciphertext = alice().encrypt(&plaintext, bob().public_key()).unwrap();
            prop_assert_eq!(bob().decrypt(&ciphertext).unwrap(), plaintext);
        }

        #[test]
        fn prop_sign_verify(data in any::<Vec<u8>>()) {
            let sig = alice().sign(&data).unwrap();
            prop_assert!(CryptoEngine::verify(&data, &sig, alice().public_key()));
        }

        #[test]
        fn prop_bit_flip_in_data_fails(
            data in prop::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let sig = alice().sign(&data).unwrap();
            let mut tampered = data.clone();
            let i = index.index(tampered.len());
            tampered[i] ^= 1 << bit;
            prop_assert!(!CryptoEngine::verify(&tampered, &sig, alice().public_key()));
        }

        #[test]
        fn prop_bit_flip_in_signature_fails(
            data in any::<Vec<u8>>(),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut sig = alice().sign(&data).unwrap();
            let i = index.index(sig.len());
            sig[i] ^= 1 << bit;
            prop_assert!(!CryptoEngine::verify(&data, &sig, alice().public_key()));
        }

        #[test]
        fn prop_garbage_never_panics(data in any::<Vec<u8>>()) {
            let _ = bob().decrypt(&data);
        }
    }
}
