//! CLI binary for edgequake-vlm.
//!
//! A thin shim over the library crate: maps flags and environment variables
//! onto `ServiceConfig`, runs one invocation and prints the payload.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_vlm::{
    ImageEncoding, InvocationClient, InvocationOutcome, InvocationRequest, LlmUsage, OutputFormat,
    ResponseSchema, ServiceConfig, ServiceRegistry,
};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a table as JSON using a schema file
  vlm-call "Convert this table to HTML." --image table.png --schema table.schema.json

  # Several images, in order
  vlm-call "Are these two figures the same chart?" --image a.png --image b.png

  # Local OpenAI-compatible server, no fallback envelope
  vlm-call "Transcribe the equation as LaTeX." --image eq.png \
      --base-url http://localhost:8000/v1 --model qwen2-vl --no-fallback

  # Anthropic via edgequake-llm (reads ANTHROPIC_API_KEY)
  vlm-call "Describe the form fields." --image form.png --service anthropic \
      --model claude-sonnet-4-20250514

ENVIRONMENT VARIABLES:
  LLM_SERVICE           Service name (openai, anthropic, gemini, ollama, …)
  OPENAI_BASE_URL       OpenAI-compatible endpoint
  OPENAI_MODEL          Model identifier
  OPENAI_API_KEY        Bearer credential for the openai service
  MAX_RETRIES           Retries on timeout / rate limit
  VLM_TIMEOUT           Per-attempt timeout in seconds
  OUTPUT_FORMAT         Format tag for the text fallback (markdown, json, html, chunks)
  OUTPUT_IMAGE_FORMAT   Image wire encoding (webp, png, jpeg)
  VLM_TEMPERATURE       Sampling temperature (ignored with --no-temperature)

EXIT STATUS:
  0  a payload was produced (structured or text fallback)
  1  invalid arguments or configuration
  2  the invocation ended with no result (retries exhausted or fatal error)
"#;

/// Send images and an instruction to a vision LLM and print structured JSON.
#[derive(Parser, Debug)]
#[command(
    name = "vlm-call",
    version,
    about = "Send images and an instruction to a vision LLM and print structured JSON",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Instruction sent verbatim as the text part of the message.
    instruction: String,

    /// Image file to attach (repeatable; order is preserved).
    #[arg(short, long = "image", value_name = "PATH")]
    images: Vec<PathBuf>,

    /// JSON-Schema file describing the expected response.
    #[arg(long, value_name = "PATH")]
    schema: Option<PathBuf>,

    /// Schema name reported to the service.
    #[arg(long, default_value = "response")]
    schema_name: String,

    /// Service name from the registry.
    #[arg(long, env = "LLM_SERVICE", default_value = "openai")]
    service: String,

    /// OpenAI-compatible base URL.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = edgequake_vlm::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Model identifier.
    #[arg(long, env = "OPENAI_MODEL", default_value = edgequake_vlm::config::DEFAULT_MODEL)]
    model: String,

    /// API key for the openai service.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Retries on timeout or rate limit.
    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-attempt timeout in seconds.
    #[arg(long, env = "VLM_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Format tag for the text fallback envelope.
    #[arg(long, env = "OUTPUT_FORMAT", default_value = "markdown")]
    output_format: String,

    /// Image wire encoding.
    #[arg(long, env = "OUTPUT_IMAGE_FORMAT", default_value = "webp")]
    image_format: String,

    /// Sampling temperature.
    #[arg(long, env = "VLM_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Omit the temperature field (reasoning models reject non-default values).
    #[arg(long)]
    no_temperature: bool,

    /// Fail instead of returning {content, format} when no JSON is recoverable.
    #[arg(long)]
    no_fallback: bool,

    /// List registered services and exit.
    #[arg(long)]
    list_services: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VLM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VLM_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.list_services {
        for name in ServiceRegistry::names() {
            println!("{name}");
        }
        return Ok(());
    }

    // ── Build client ─────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    let client = InvocationClient::from_config(config).context("Failed to initialise service")?;

    // ── Build request ────────────────────────────────────────────────────
    let schema = load_schema(&cli).await?;
    let mut request = InvocationRequest::new(cli.instruction.clone(), schema);
    for path in &cli.images {
        let img = image::open(path).with_context(|| format!("Failed to read image {:?}", path))?;
        request = request.with_image(img);
    }

    // ── Invoke ───────────────────────────────────────────────────────────
    let mut usage = LlmUsage::default();
    let outcome = client.invoke(&request, &mut usage).await;

    match outcome {
        InvocationOutcome::Success { payload, .. } => {
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("Failed to serialise payload")?
            );
            if !cli.quiet {
                eprintln!(
                    "{} tokens, {} request(s) via {}",
                    usage.llm_tokens_used,
                    usage.llm_request_count,
                    client.service_name()
                );
            }
            Ok(())
        }
        InvocationOutcome::Empty => {
            println!("{{}}");
            if !cli.quiet {
                eprintln!("No result from {} (see warnings above)", client.service_name());
            }
            std::process::exit(2);
        }
    }
}

/// Map CLI args to `ServiceConfig`.
fn build_config(cli: &Cli) -> Result<ServiceConfig> {
    let output_format: OutputFormat = cli.output_format.parse()?;
    let image_encoding: ImageEncoding = cli.image_format.parse()?;

    let mut builder = ServiceConfig::builder()
        .service(&cli.service)
        .base_url(&cli.base_url)
        .model(&cli.model)
        .max_retries(cli.max_retries)
        .timeout_secs(cli.timeout)
        .fallback_to_text(!cli.no_fallback)
        .output_format(output_format)
        .image_encoding(image_encoding);

    builder = if cli.no_temperature {
        builder.without_temperature()
    } else {
        builder.temperature(cli.temperature)
    };

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }

    builder.build().context("Invalid configuration")
}

async fn load_schema(cli: &Cli) -> Result<ResponseSchema> {
    let Some(ref path) = cli.schema else {
        return Ok(ResponseSchema::any_object(&cli.schema_name));
    };
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read schema from {:?}", path))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Schema {:?} is not valid JSON", path))?;
    Ok(ResponseSchema::new(&cli.schema_name, value))
}
