//! Property tests for tamper detection and bounded decompression

use jfe_codec::{
    decompress, decrypt_payload, encrypt_payload, Aes256GcmKey, CompressionAlgorithm, Compressor,
    JfeError, TypeMarker,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn key() -> Aes256GcmKey {
    Aes256GcmKey::new([7u8; 32])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_single_bit_flip_is_detected(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = key();
        let mut payload = Vec::new();
        encrypt_payload(&key, TypeMarker::String, &plaintext, &mut payload).unwrap();

        // Byte 0 is the clear-text marker; everything after it is authenticated.
        let i = 1 + index.index(payload.len() - 1);
        payload[i] ^= 1 << bit;

        let mut out = Vec::new();
        let result = decrypt_payload(&key, &payload, &mut out);
        prop_assert!(matches!(result, Err(JfeError::DecryptionFailed(_))));
    }

    #[test]
    fn truncated_payloads_never_decrypt(
        plaintext in prop::collection::vec(any::<u8>(), 0..64),
        cut in any::<prop::sample::Index>(),
    ) {
        let key = key();
        let mut payload = Vec::new();
        encrypt_payload(&key, TypeMarker::Object, &plaintext, &mut payload).unwrap();
        let keep = cut.index(payload.len());
        payload.truncate(keep);

        let mut out = Vec::new();
        let result = decrypt_payload(&key, &payload, &mut out);
        prop_assert!(matches!(
            result,
            Err(JfeError::MalformedPayload(_)) | Err(JfeError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn forged_lengths_are_bounded(
        claimed in prop_oneof![i64::MIN..=0i64, (32i64 << 20) + 1..=i64::MAX],
        junk in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let result = decompress(CompressionAlgorithm::Brotli, &junk, claimed, 32 << 20);
        prop_assert!(matches!(result, Err(JfeError::LimitExceeded(_))));
    }

    #[test]
    fn compressed_payloads_restore_exactly(
        text in "[a-c]{0,2000}",
        algo in prop::sample::select(vec![CompressionAlgorithm::Brotli, CompressionAlgorithm::Zstd]),
    ) {
        let compressor = Compressor::new(algo, 3, 16).unwrap();
        let mut recorded = BTreeMap::new();
        let out = compressor.compress_payload("/p", text.as_bytes(), &mut recorded).unwrap();

        match recorded.get("/p") {
            Some(&len) => {
                let restored = decompress(algo, &out, len, 1 << 20).unwrap();
                prop_assert_eq!(restored, text.as_bytes());
            }
            None => {
                prop_assert!(text.len() < 16);
                prop_assert_eq!(&out[..], text.as_bytes());
            }
        }
    }
}
