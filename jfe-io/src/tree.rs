//! Tree-model variant over `serde_json::Value`
//!
//! Applies the same value codec, key and metadata handling as the streaming
//! pipelines, but to a fully parsed document. Used by
//! [`JsonProcessor::Tree`](crate::JsonProcessor::Tree) and to cross-check the
//! streaming engine.
//!
//! The tree parser is strict JSON: comments and trailing commas are rejected
//! regardless of [`ReaderOptions`](crate::ReaderOptions).

use crate::decryptor::{
    decode_base64, write_plaintext, DecryptOutcome, DecryptionContext, DecryptionPlan,
};
use crate::encryptor::{EncryptOutcome, EncryptionPlan};
use crate::json::JsonWriter;
use crate::metrics::{DecryptMetrics, EncryptMetrics};
use crate::{CancellationToken, StreamConfig};
use base64::prelude::*;
use jfe_codec::EncryptionKeyProvider;
use jfe_format::constants::{ENCRYPTED_INFO, FIELD_COMPRESSED_PATHS};
use jfe_format::value::{classify_number, serialize_bool, serialize_str};
use jfe_format::{EncryptionProperties, JfeError, Limits, Result, TypeMarker};
use serde_json::Value;
use std::io::{Read, Write};

/// Encrypt the matching top-level properties of `document` in place.
///
/// Returns the metadata that was attached, or `None` when the root is not an
/// object.
pub fn encrypt_tree(
    document: &mut Value,
    plan: &EncryptionPlan,
    limits: &Limits,
) -> Result<Option<EncryptionProperties>> {
    let Value::Object(members) = document else {
        tracing::debug!("document root is not an object; leaving it unchanged");
        return Ok(None);
    };
    if members.contains_key(ENCRYPTED_INFO) {
        return Err(JfeError::InvalidConfiguration(format!(
            "document already carries a top-level {} property",
            ENCRYPTED_INFO
        )));
    }

    let mut properties = plan.new_properties();
    let mut sealed = Vec::new();

    for (name, value) in members.iter_mut() {
        let Some(path) = plan.candidates().matches(name.as_bytes()) else {
            continue;
        };

        let (marker, plaintext) = match &*value {
            Value::Null => continue,
            Value::String(text) => (TypeMarker::String, serialize_str(text).to_vec()),
            Value::Bool(flag) => (TypeMarker::Boolean, serialize_bool(*flag).to_vec()),
            Value::Number(number) => {
                let number = classify_number(number.to_string().as_bytes())?;
                (number.marker(), number.serialize().to_vec())
            }
            Value::Array(_) => (TypeMarker::Array, serde_json::to_vec(&*value)?),
            Value::Object(_) => (TypeMarker::Object, serde_json::to_vec(&*value)?),
        };
        if marker.is_container() && plaintext.len() > limits.max_container_bytes {
            return Err(JfeError::LimitExceeded(format!(
                "container value at {} exceeds {} bytes",
                path, limits.max_container_bytes
            )));
        }

        plan.seal(path, marker, &plaintext, &mut properties, &mut sealed)?;
        *value = Value::String(BASE64_STANDARD.encode(&sealed));
    }

    members.insert(ENCRYPTED_INFO.to_string(), serde_json::to_value(&properties)?);
    Ok(Some(properties))
}

/// Decrypt `document` in place using its own `_ei` metadata.
///
/// Documents without metadata, and non-object roots, are left unchanged.
pub fn decrypt_tree(
    document: &mut Value,
    provider: &dyn EncryptionKeyProvider,
    limits: &Limits,
) -> Result<Option<DecryptionContext>> {
    let Value::Object(members) = document else {
        return Ok(None);
    };
    let Some(metadata) = members.shift_remove(ENCRYPTED_INFO) else {
        return Ok(None);
    };
    let properties: EncryptionProperties = serde_json::from_value(metadata).map_err(|e| {
        JfeError::malformed_payload(format!("invalid {} metadata: {}", ENCRYPTED_INFO, e))
    })?;
    let plan = DecryptionPlan::new(properties, provider)?;

    let mut decoded = Vec::new();
    let mut plain = Vec::new();
    let mut decrypted_paths = Vec::new();

    for (name, value) in members.iter_mut() {
        let Some(path) = plan.candidates().matches(name.as_bytes()) else {
            continue;
        };
        let Value::String(text) = &*value else {
            continue;
        };

        decode_base64(path, text.as_bytes(), &mut decoded)?;
        let (marker, _) = plan.open(path, &decoded, &mut plain, limits)?;

        let mut writer = JsonWriter::new(Vec::with_capacity(plain.len() + 2));
        write_plaintext(&mut writer, path, marker, &plain, limits)?;
        *value = serde_json::from_slice(&writer.into_inner())?;
        decrypted_paths.push(path.to_string());
    }

    Ok(plan.context(decrypted_paths))
}

fn read_document<R: Read>(
    input: &mut R,
    config: &StreamConfig,
    cancel: &CancellationToken,
) -> Result<(Value, u64)> {
    if cancel.is_cancelled() {
        return Err(JfeError::Cancelled);
    }
    let mut raw = Vec::with_capacity(config.initial_buffer_size);
    let limit = config.limits.max_buffer_bytes as u64;
    let read = input.take(limit + 1).read_to_end(&mut raw)?;
    if read as u64 > limit {
        return Err(JfeError::LimitExceeded(format!(
            "document exceeds {} bytes",
            limit
        )));
    }
    if cancel.is_cancelled() {
        return Err(JfeError::Cancelled);
    }
    Ok((serde_json::from_slice(&raw)?, read as u64))
}

fn write_document<W: Write>(output: &mut W, document: &Value) -> Result<u64> {
    let bytes = serde_json::to_vec(document)?;
    output.write_all(&bytes)?;
    output.flush()?;
    Ok(bytes.len() as u64)
}

/// Tree-model counterpart of the streaming encryptor.
pub(crate) fn encrypt_reader<R: Read, W: Write>(
    input: &mut R,
    mut output: W,
    plan: &EncryptionPlan,
    config: &StreamConfig,
    cancel: &CancellationToken,
) -> Result<EncryptOutcome<W>> {
    let (mut document, bytes_read) = read_document(input, config, cancel)?;
    let properties = encrypt_tree(&mut document, plan, &config.limits)?;
    let bytes_written = write_document(&mut output, &document)?;

    let metrics = EncryptMetrics {
        bytes_read,
        bytes_written,
        properties_encrypted: properties
            .as_ref()
            .map_or(0, |p| p.encrypted_paths.len() as u64),
        compressed_paths: properties
            .as_ref()
            .map_or(0, |p| p.compressed_paths.len() as u64),
        ..EncryptMetrics::default()
    };
    Ok(EncryptOutcome {
        writer: output,
        metrics,
        properties,
    })
}

/// Tree-model counterpart of the streaming decryptor.
pub(crate) fn decrypt_reader<R: Read, W: Write>(
    input: &mut R,
    mut output: W,
    provider: &dyn EncryptionKeyProvider,
    config: &StreamConfig,
    cancel: &CancellationToken,
) -> Result<DecryptOutcome<W>> {
    let (mut document, bytes_read) = read_document(input, config, cancel)?;
    let compressed = match &document {
        Value::Object(members) => members
            .get(ENCRYPTED_INFO)
            .and_then(|ei| ei.get(FIELD_COMPRESSED_PATHS))
            .and_then(Value::as_object)
            .map_or(0, |cp| cp.len() as u64),
        _ => 0,
    };
    let context = decrypt_tree(&mut document, provider, &config.limits)?;
    let bytes_written = write_document(&mut output, &document)?;

    let metrics = DecryptMetrics {
        bytes_read,
        bytes_written,
        properties_decrypted: context
            .as_ref()
            .map_or(0, |c| c.decrypted_paths.len() as u64),
        compressed_paths: compressed,
        ..DecryptMetrics::default()
    };
    Ok(DecryptOutcome {
        writer: output,
        metrics,
        context,
    })
}
