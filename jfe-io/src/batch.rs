//! Parallel processing of independent documents
//!
//! Documents are distributed over a rayon pool. Configuration, the resolved
//! key and the buffer pool are shared read-only; each document gets its own
//! pipeline, so one failing document does not affect the others.

use crate::decryptor::DecryptionContext;
use crate::encryptor::EncryptionPlan;
use crate::{
    decrypt_stream, encrypt_with_plan, DecryptStrategy, EncryptionOptions, OperationContext,
    StreamConfig,
};
use jfe_codec::EncryptionKeyProvider;
use jfe_format::{JfeError, Result};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::io::Cursor;

/// Worker pool settings for batch operations
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Dedicated pool size; `None` runs on rayon's global pool
    pub max_threads: Option<usize>,
}

/// One decrypted document
#[derive(Debug)]
pub struct DecryptedDocument {
    /// Plaintext JSON
    pub json: Vec<u8>,
    /// What was decrypted
    pub context: Option<DecryptionContext>,
}

/// Encrypt every document with the same options.
///
/// The outer error covers configuration and key resolution; per-document
/// failures are reported in place.
pub fn encrypt_batch<D>(
    documents: &[D],
    provider: &dyn EncryptionKeyProvider,
    options: &EncryptionOptions,
    config: &StreamConfig,
    batch: &BatchOptions,
    ctx: &OperationContext<'_>,
) -> Result<Vec<Result<Vec<u8>>>>
where
    D: AsRef<[u8]> + Sync,
{
    let plan = EncryptionPlan::new(options, provider)?;
    config.validate()?;

    run(batch, || {
        documents
            .par_iter()
            .map(|document| {
                let input = document.as_ref();
                let summary = encrypt_with_plan(
                    &mut Cursor::new(input),
                    Vec::with_capacity(input.len() * 2),
                    &plan,
                    options.processor,
                    config,
                    ctx,
                )?;
                Ok(summary.output)
            })
            .collect()
    })
}

/// Decrypt every document using its own metadata.
pub fn decrypt_batch<D>(
    documents: &[D],
    provider: &dyn EncryptionKeyProvider,
    config: &StreamConfig,
    batch: &BatchOptions,
    ctx: &OperationContext<'_>,
) -> Result<Vec<Result<DecryptedDocument>>>
where
    D: AsRef<[u8]> + Sync,
{
    config.validate()?;

    run(batch, || {
        documents
            .par_iter()
            .map(|document| {
                let input = document.as_ref();
                let summary = decrypt_stream(
                    &mut Cursor::new(input),
                    Vec::with_capacity(input.len()),
                    provider,
                    &DecryptStrategy::Prescan,
                    config,
                    ctx,
                )?;
                Ok(DecryptedDocument {
                    json: summary.output,
                    context: summary.context,
                })
            })
            .collect()
    })
}

fn run<T, F>(batch: &BatchOptions, job: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    match batch.max_threads {
        None => Ok(job()),
        Some(threads) => {
            let pool = ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|idx| format!("jfe-batch-{}", idx))
                .build()
                .map_err(|e| {
                    JfeError::InvalidConfiguration(format!("failed to create thread pool: {}", e))
                })?;
            Ok(pool.install(job))
        }
    }
}
