//! Property tests for the streaming engine
//!
//! Arbitrary object documents must survive encrypt/decrypt unchanged no
//! matter which properties are selected or how the input is chunked.

use jfe_codec::{Aes256GcmKey, StaticKeyProvider, AES_256_GCM_RANDOMIZED};
use jfe_io::{
    decrypt_stream_single_pass, encrypt_stream, BufferPool, CompressionAlgorithm,
    CompressionOptions, EncryptionOptions, OperationContext, StreamConfig,
};
use proptest::prelude::*;
use serde_json::{Map, Value};
use std::io::Read;

struct Chunked<'a> {
    data: &'a [u8],
    step: usize,
}

impl Read for Chunked<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.step.min(buf.len()).min(self.data.len());
        buf[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Ok(n)
    }
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 \"\\\\/\u{e9}\u{1F600}\n\t]{0,24}".prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,6}", inner), 0..4)
                .prop_map(|members| Value::Object(members.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn object_document() -> impl Strategy<Value = (Value, Vec<String>)> {
    prop::collection::vec(("[a-z]{1,4}", json_value(), any::<bool>()), 1..8).prop_map(|members| {
        let mut object = Map::new();
        let mut paths = Vec::new();
        for (name, value, selected) in members {
            if name == "id" || object.contains_key(&name) {
                continue;
            }
            if selected {
                paths.push(format!("/{}", name));
            }
            object.insert(name, value);
        }
        (Value::Object(object), paths)
    })
}

fn provider() -> StaticKeyProvider {
    StaticKeyProvider::with_key("prop", Aes256GcmKey::new([0x5a; 32]))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn round_trip_under_any_chunking(
        (document, paths) in object_document(),
        step in 1usize..48,
        initial in 1usize..64,
        compress in any::<bool>(),
    ) {
        let input = serde_json::to_vec(&document).unwrap();
        let options = EncryptionOptions {
            paths_to_encrypt: paths.clone(),
            compression: if compress {
                CompressionOptions {
                    algorithm: CompressionAlgorithm::Zstd,
                    level: 1,
                    min_compressed_length: 8,
                }
            } else {
                CompressionOptions::default()
            },
            ..EncryptionOptions::new("prop", AES_256_GCM_RANDOMIZED)
        };
        let config = StreamConfig { initial_buffer_size: initial, ..StreamConfig::default() };
        let pool = BufferPool::default();
        let ctx = OperationContext::new(&pool);

        let encrypted = encrypt_stream(
            &mut Chunked { data: &input, step },
            Vec::new(),
            &provider(),
            &options,
            &config,
            &ctx,
        )
        .unwrap();
        let properties = encrypted.properties.unwrap();

        // Every listed path with a non-null value is encrypted, in document order.
        let expected: Vec<String> = document
            .as_object()
            .unwrap()
            .iter()
            .filter(|(name, value)| !value.is_null() && paths.contains(&format!("/{}", name)))
            .map(|(name, _)| format!("/{}", name))
            .collect();
        prop_assert_eq!(&properties.encrypted_paths, &expected);

        let decrypted = decrypt_stream_single_pass(
            &mut Chunked { data: &encrypted.output, step },
            Vec::new(),
            &provider(),
            Some(properties),
            &config,
            &ctx,
        )
        .unwrap();
        let restored: Value = serde_json::from_slice(&decrypted.output).unwrap();
        prop_assert_eq!(restored, document);
    }

    #[test]
    fn arbitrary_bytes_never_panic(input in prop::collection::vec(any::<u8>(), 0..256)) {
        let pool = BufferPool::default();
        let options = EncryptionOptions {
            paths_to_encrypt: vec!["/a".into()],
            ..EncryptionOptions::new("prop", AES_256_GCM_RANDOMIZED)
        };
        let _ = encrypt_stream(
            &mut input.as_slice(),
            Vec::new(),
            &provider(),
            &options,
            &StreamConfig::default(),
            &OperationContext::new(&pool),
        );
        let _ = jfe_io::decrypt_bytes(&input, &provider());
    }
}
