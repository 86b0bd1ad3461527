//! JFE CLI - Command-line tool for JSON field-level encryption
//!
//! This binary provides command-line interfaces for:
//! - encrypt: encrypt selected top-level properties of a JSON document
//! - decrypt: restore an encrypted document and drop its `_ei` metadata
//! - inspect: print the encryption metadata of a document
//! - keygen: generate a random base64 AES-256 data encryption key

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use jfe_codec::{Aes256GcmKey, DataEncryptionKey, AES_256_GCM_RANDOMIZED};
use jfe_io::{
    decrypt_stream, encrypt_stream, read_encryption_properties_seekable, BufferPool,
    CancellationToken, CompressionAlgorithm, CompressionOptions, DecryptStrategy,
    EncryptionKeyProvider, EncryptionOptions, EncryptionProperties, JfeError, JsonProcessor,
    Limits, OperationContext, StreamConfig,
};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the base64 data encryption key
const KEY_ENV: &str = "JFE_KEY";
/// Environment variable holding a `tracing` filter directive
const LOG_ENV: &str = "JFE_LOG";
/// Path argument that stands for stdin/stdout
const STDIO: &str = "-";

#[derive(Parser)]
#[command(name = "jfe")]
#[command(about = "JSON field-level encryption CLI tool")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); JFE_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt top-level properties of a JSON document
    ///
    /// Examples:
    ///   jfe encrypt patient.json -o patient.enc.json --path /ssn --path /dob
    ///   jfe encrypt patient.json --config jfe.toml --compression brotli
    Encrypt {
        /// Input JSON document ("-" for stdin)
        input: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Top-level property to encrypt, as "/name" (repeatable)
        #[arg(short, long = "path")]
        paths: Vec<String>,
        /// Encryption algorithm identifier
        #[arg(long)]
        algorithm: Option<String>,
        /// Compress payloads before encryption
        #[arg(long, value_enum)]
        compression: Option<CompressionArg>,
        /// Compression level (Brotli 0-11, Zstandard 1-22)
        #[arg(long)]
        compression_level: Option<u32>,
        /// Payloads shorter than this are never compressed
        #[arg(long)]
        min_compressed_length: Option<usize>,
        /// JSON processing engine
        #[arg(long, value_enum)]
        processor: Option<ProcessorArg>,
        #[command(flatten)]
        key: KeyArgs,
        /// Show progress spinner while encrypting
        #[arg(long)]
        progress: bool,
    },
    /// Decrypt a document produced by `jfe encrypt`
    ///
    /// Examples:
    ///   jfe decrypt patient.enc.json -o patient.json
    ///   JFE_KEY=... jfe decrypt patient.enc.json --strategy tree
    Decrypt {
        /// Encrypted JSON document ("-" for stdin)
        input: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// How the `_ei` metadata is located
        #[arg(long, value_enum, default_value_t = StrategyArg::Prescan)]
        strategy: StrategyArg,
        #[command(flatten)]
        key: KeyArgs,
        /// Print the decryption context as JSON on stderr
        #[arg(long)]
        context: bool,
        /// Show progress spinner while decrypting
        #[arg(long)]
        progress: bool,
    },
    /// Print the encryption metadata of a document
    Inspect {
        /// Encrypted JSON document ("-" for stdin)
        input: PathBuf,
        /// Output format (table, json)
        #[arg(long, value_enum, default_value_t = InspectFormat::Table)]
        format: InspectFormat,
    },
    /// Generate a random AES-256 data encryption key
    Keygen {
        /// Write the key to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct KeyArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Base64 data encryption key (falls back to JFE_KEY, then the config file)
    #[arg(long)]
    key: Option<String>,
    /// Data encryption key identifier
    #[arg(long)]
    key_id: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CompressionArg {
    None,
    Brotli,
    Zstd,
}

impl From<CompressionArg> for CompressionAlgorithm {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::None => CompressionAlgorithm::None,
            CompressionArg::Brotli => CompressionAlgorithm::Brotli,
            CompressionArg::Zstd => CompressionAlgorithm::Zstd,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ProcessorArg {
    Stream,
    Tree,
}

impl From<ProcessorArg> for JsonProcessor {
    fn from(arg: ProcessorArg) -> Self {
        match arg {
            ProcessorArg::Stream => JsonProcessor::Stream,
            ProcessorArg::Tree => JsonProcessor::Tree,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum StrategyArg {
    /// Read the metadata first, then rewind and decrypt
    Prescan,
    /// Parse the whole document into memory
    Tree,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum InspectFormat {
    Table,
    Json,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Jfe(#[from] JfeError),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration file {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}")]
    Usage(String),
}

impl CliError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CliError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage(_) | CliError::Config { .. } => 2,
            _ => 1,
        }
    }
}

type CliResult<T> = Result<T, CliError>;

/// Contents of a `--config` TOML file. Every field is optional; flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    key_id: Option<String>,
    algorithm: Option<String>,
    key: Option<String>,
    paths: Vec<String>,
    processor: Option<String>,
    compression: Option<FileCompression>,
    limits: Option<FileLimits>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileCompression {
    algorithm: Option<String>,
    level: Option<u32>,
    min_length: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileLimits {
    max_buffer_bytes: Option<usize>,
    max_decompressed_bytes: Option<usize>,
    max_container_bytes: Option<usize>,
    initial_buffer_size: Option<usize>,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> CliResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
        toml::from_str(&text).map_err(|source| CliError::Config {
            path: path.display().to_string(),
            source,
        })
    }

    fn stream_config(&self) -> StreamConfig {
        let mut config = StreamConfig::default();
        if let Some(limits) = &self.limits {
            let defaults = Limits::default();
            config.limits = Limits {
                max_buffer_bytes: limits.max_buffer_bytes.unwrap_or(defaults.max_buffer_bytes),
                max_decompressed_bytes: limits
                    .max_decompressed_bytes
                    .unwrap_or(defaults.max_decompressed_bytes),
                max_container_bytes: limits
                    .max_container_bytes
                    .unwrap_or(defaults.max_container_bytes),
                ..defaults
            };
            if let Some(size) = limits.initial_buffer_size {
                config.initial_buffer_size = size;
            }
        }
        config
    }
}

/// Hands out the one key given on the command line.
///
/// The document names its own key id on decrypt; `--key-id`, when given,
/// must agree with it.
struct CliKeyProvider {
    key_id: Option<String>,
    key: Arc<dyn DataEncryptionKey>,
}

impl EncryptionKeyProvider for CliKeyProvider {
    fn key(&self, key_id: &str, algorithm: &str) -> jfe_io::Result<Arc<dyn DataEncryptionKey>> {
        if let Some(expected) = &self.key_id {
            if expected != key_id {
                return Err(JfeError::EncryptionBackendError(format!(
                    "document uses key '{}' but key '{}' was supplied",
                    key_id, expected
                )));
            }
        }
        if self.key.algorithm() != algorithm {
            return Err(JfeError::EncryptionBackendError(format!(
                "supplied key implements {}, not {}",
                self.key.algorithm(),
                algorithm
            )));
        }
        Ok(Arc::clone(&self.key))
    }
}

fn resolve_key(args: &KeyArgs, config: &FileConfig) -> CliResult<CliKeyProvider> {
    let encoded = args
        .key
        .clone()
        .or_else(|| std::env::var(KEY_ENV).ok().filter(|v| !v.trim().is_empty()))
        .or_else(|| config.key.clone())
        .ok_or_else(|| {
            CliError::Usage(format!(
                "no key supplied; use --key, {} or `key` in the config file",
                KEY_ENV
            ))
        })?;
    let key = Aes256GcmKey::from_base64(&encoded)?;

    Ok(CliKeyProvider {
        key_id: args.key_id.clone().or_else(|| config.key_id.clone()),
        key: Arc::new(key),
    })
}

#[allow(clippy::too_many_arguments)]
fn encryption_options(
    key_id: Option<String>,
    algorithm: Option<String>,
    paths: Vec<String>,
    compression: Option<CompressionArg>,
    compression_level: Option<u32>,
    min_compressed_length: Option<usize>,
    processor: Option<ProcessorArg>,
    config: &FileConfig,
) -> CliResult<EncryptionOptions> {
    let key_id = key_id
        .or_else(|| config.key_id.clone())
        .ok_or_else(|| CliError::Usage("encrypt needs --key-id or `key_id` in the config file".into()))?;
    let algorithm = algorithm
        .or_else(|| config.algorithm.clone())
        .unwrap_or_else(|| AES_256_GCM_RANDOMIZED.to_string());
    let paths_to_encrypt = if paths.is_empty() {
        config.paths.clone()
    } else {
        paths
    };

    let file_compression = config.compression.as_ref();
    let algorithm_from_file = file_compression
        .and_then(|c| c.algorithm.as_deref())
        .map(|name| {
            CompressionAlgorithm::from_name(name)
                .ok_or_else(|| CliError::Usage(format!("unknown compression algorithm '{}'", name)))
        })
        .transpose()?;
    let defaults = CompressionOptions::default();
    let compression_algorithm = compression
        .map(CompressionAlgorithm::from)
        .or(algorithm_from_file)
        .unwrap_or(defaults.algorithm);
    let level = compression_level
        .or_else(|| file_compression.and_then(|c| c.level))
        .unwrap_or(match compression_algorithm {
            CompressionAlgorithm::Zstd => 3,
            _ => defaults.level,
        });

    let processor = match processor {
        Some(arg) => arg.into(),
        None => match config.processor.as_deref() {
            None | Some("stream") => JsonProcessor::Stream,
            Some("tree") => JsonProcessor::Tree,
            Some(other) => {
                return Err(CliError::Usage(format!("unknown processor '{}'", other)));
            }
        },
    };

    let options = EncryptionOptions {
        paths_to_encrypt,
        compression: CompressionOptions {
            algorithm: compression_algorithm,
            level,
            min_compressed_length: min_compressed_length
                .or_else(|| file_compression.and_then(|c| c.min_length))
                .unwrap_or(defaults.min_compressed_length),
        },
        processor,
        ..EncryptionOptions::new(key_id, algorithm)
    };
    options.validate()?;
    Ok(options)
}

trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Open `path`, buffering stdin so it can be rewound.
fn open_input(path: &Path) -> CliResult<Box<dyn ReadSeek>> {
    if path.as_os_str() == STDIO {
        let mut data = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut data)
            .map_err(|e| CliError::io(path, e))?;
        return Ok(Box::new(Cursor::new(data)));
    }
    let file = File::open(path).map_err(|e| CliError::io(path, e))?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(path: Option<&Path>) -> CliResult<Box<dyn Write>> {
    match path {
        None => Ok(Box::new(BufWriter::new(std::io::stdout().lock()))),
        Some(path) if path.as_os_str() == STDIO => {
            Ok(Box::new(BufWriter::new(std::io::stdout().lock())))
        }
        Some(path) => {
            let file = File::create(path).map_err(|e| CliError::io(path, e))?;
            Ok(Box::new(BufWriter::new(file)))
        }
    }
}

/// Remove a half-written output file after a failure.
fn discard_output(path: Option<&Path>) {
    if let Some(path) = path.filter(|p| p.as_os_str() != STDIO) {
        if let Err(err) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %err, "could not remove partial output");
        }
    }
}

fn describe_output(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "stdout".to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Encrypt {
            input,
            output,
            paths,
            algorithm,
            compression,
            compression_level,
            min_compressed_length,
            processor,
            key,
            progress,
        } => {
            let config = FileConfig::load(key.config.as_deref())?;
            let options = encryption_options(
                key.key_id.clone(),
                algorithm,
                paths,
                compression,
                compression_level,
                min_compressed_length,
                processor,
                &config,
            )?;
            let provider = resolve_key(&key, &config)?;
            handle_encrypt(
                &input,
                output.as_deref(),
                &options,
                &provider,
                &config.stream_config(),
                progress,
            )
        }
        Commands::Decrypt {
            input,
            output,
            strategy,
            key,
            context,
            progress,
        } => {
            let config = FileConfig::load(key.config.as_deref())?;
            let provider = resolve_key(&key, &config)?;
            handle_decrypt(
                &input,
                output.as_deref(),
                strategy,
                &provider,
                &config.stream_config(),
                context,
                progress,
            )
        }
        Commands::Inspect { input, format } => handle_inspect(&input, format),
        Commands::Keygen { output } => handle_keygen(output.as_deref()),
    }
}

fn handle_encrypt(
    input: &Path,
    output: Option<&Path>,
    options: &EncryptionOptions,
    provider: &dyn EncryptionKeyProvider,
    config: &StreamConfig,
    show_progress: bool,
) -> CliResult<()> {
    let start = Instant::now();
    let mut reader = open_input(input)?;
    let writer = open_output(output)?;
    let pool = BufferPool::default();
    let cancel = CancellationToken::new();
    let ctx = OperationContext::new(&pool).with_cancel(&cancel);

    let mut progress_bar = show_progress.then(|| create_spinner("Encrypting document"));
    let summary = match encrypt_stream(&mut reader, writer, provider, options, config, &ctx) {
        Ok(summary) => summary,
        Err(err) => {
            discard_output(output);
            return Err(err.into());
        }
    };
    let elapsed = start.elapsed();
    drop(summary.output);

    let encrypted = summary
        .properties
        .as_ref()
        .map_or(0, |p| p.encrypted_paths.len());
    if let Some(pb) = progress_bar.take() {
        pb.finish_with_message(format!(
            "Encrypted {} properties in {:.2?}",
            encrypted, elapsed
        ));
    }
    if summary.properties.is_none() {
        tracing::warn!("document root is not an object; copied unchanged");
    }

    report(&format!(
        "Encrypted to {} (properties: {}, compressed: {}, bytes read: {}, bytes written: {}, elapsed: {:.2?}, {:.2} MiB/s)",
        describe_output(output),
        encrypted,
        summary.metrics.compressed_paths,
        summary.metrics.bytes_read,
        summary.metrics.bytes_written,
        elapsed,
        mib_per_sec(summary.metrics.bytes_read, elapsed),
    ))
}

fn handle_decrypt(
    input: &Path,
    output: Option<&Path>,
    strategy: StrategyArg,
    provider: &dyn EncryptionKeyProvider,
    config: &StreamConfig,
    print_context: bool,
    show_progress: bool,
) -> CliResult<()> {
    let start = Instant::now();
    let mut reader = open_input(input)?;
    let writer = open_output(output)?;
    let pool = BufferPool::default();
    let cancel = CancellationToken::new();
    let ctx = OperationContext::new(&pool).with_cancel(&cancel);
    let strategy = match strategy {
        StrategyArg::Prescan => DecryptStrategy::Prescan,
        StrategyArg::Tree => DecryptStrategy::Tree,
    };

    let mut progress_bar = show_progress.then(|| create_spinner("Decrypting document"));
    let summary = match decrypt_stream(&mut reader, writer, provider, &strategy, config, &ctx) {
        Ok(summary) => summary,
        Err(err) => {
            discard_output(output);
            return Err(err.into());
        }
    };
    let elapsed = start.elapsed();
    drop(summary.output);

    let decrypted = summary
        .context
        .as_ref()
        .map_or(0, |c| c.decrypted_paths.len());
    if let Some(pb) = progress_bar.take() {
        pb.finish_with_message(format!(
            "Decrypted {} properties in {:.2?}",
            decrypted, elapsed
        ));
    }
    if print_context {
        let json = serde_json::to_string(&summary.context).map_err(JfeError::from)?;
        report(&json)?;
    }

    report(&format!(
        "Decrypted to {} (properties: {}, decompressed: {}, bytes read: {}, bytes written: {}, elapsed: {:.2?}, {:.2} MiB/s)",
        describe_output(output),
        decrypted,
        summary.metrics.compressed_paths,
        summary.metrics.bytes_read,
        summary.metrics.bytes_written,
        elapsed,
        mib_per_sec(summary.metrics.bytes_read, elapsed),
    ))
}

fn handle_inspect(input: &Path, format: InspectFormat) -> CliResult<()> {
    let mut reader = open_input(input)?;
    let properties = read_encryption_properties_seekable(
        &mut reader,
        &StreamConfig::default(),
        &BufferPool::default(),
        &CancellationToken::new(),
    )?;

    let mut stdout = std::io::stdout().lock();
    let rendered = match format {
        InspectFormat::Json => {
            serde_json::to_string_pretty(&properties).map_err(JfeError::from)? + "\n"
        }
        InspectFormat::Table => match &properties {
            Some(properties) => render_table(properties),
            None => "No encryption metadata found\n".to_string(),
        },
    };
    stdout
        .write_all(rendered.as_bytes())
        .map_err(|e| CliError::io(Path::new(STDIO), e))
}

fn render_table(properties: &EncryptionProperties) -> String {
    let compression = CompressionAlgorithm::from_i32(properties.compression_algorithm)
        .map(|c| format!("{:?}", c))
        .unwrap_or_else(|| format!("unknown ({})", properties.compression_algorithm));

    let mut out = String::new();
    out.push_str(&format!("Format version:  {}\n", properties.format_version));
    out.push_str(&format!("Algorithm:       {}\n", properties.algorithm));
    out.push_str(&format!("Key id:          {}\n", properties.key_id));
    out.push_str(&format!("Compression:     {}\n", compression));
    out.push_str(&format!(
        "Encrypted paths: {}\n",
        properties.encrypted_paths.len()
    ));
    for path in &properties.encrypted_paths {
        match properties.compressed_len(path) {
            Some(len) => out.push_str(&format!("  {:<24} compressed, {} bytes\n", path, len)),
            None => out.push_str(&format!("  {}\n", path)),
        }
    }
    out
}

fn handle_keygen(output: Option<&Path>) -> CliResult<()> {
    let encoded = Aes256GcmKey::generate().to_base64();
    match output {
        Some(path) => {
            fs::write(path, format!("{}\n", encoded)).map_err(|e| CliError::io(path, e))?;
            report(&format!("Wrote key to {}", path.display()))
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", encoded).map_err(|e| CliError::io(Path::new(STDIO), e))
        }
    }
}

fn report(message: &str) -> CliResult<()> {
    let mut stderr = std::io::stderr().lock();
    writeln!(&mut stderr, "{}", message).map_err(|e| CliError::io(Path::new("stderr"), e))
}

fn mib_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    bytes as f64 / (1024.0 * 1024.0) / secs
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
