//! OADA Formats CLI
//!
//! Command-line interface for resolving media types and validating payloads
//! against the schema corpus.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use oada_formats::{
    check_all, content_type_echo, describedby_link, load_schema, resolve_keys, KeyStatus,
    MediaType, RegistryOptions, ResolutionMode, SchemaRegistry, Severity,
    ValidateError, DEFAULT_BASE_URL,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oada-formats")]
#[command(about = "Resolve OADA media types to schemas and validate payloads")]
#[command(version)]
struct Cli {
    /// Directory containing the schema sources
    #[arg(long, global = true, env = "OADA_FORMATS_ROOT", default_value = "schemas")]
    root: PathBuf,

    /// Site that schema keys are rooted at
    #[arg(long, global = true, env = "OADA_FORMATS_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Never fetch remote meta-schemas
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a media type to its schema identifiers
    Resolve {
        /// Media type, e.g. application/vnd.oada.bookmarks.1+json
        media_type: String,

        /// Include legacy candidates (unversioned document and fragments)
        #[arg(long)]
        legacy: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::List)]
        format: OutputFormat,
    },

    /// List every schema key in the corpus
    List,

    /// Validate a payload file against a schema key, URL or media type
    Validate {
        /// Schema key, site URL or media type
        reference: String,

        /// Payload file to validate
        payload: PathBuf,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Print a schema with its $refs inlined
    Deref {
        /// Schema key, site URL or media type
        key: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Check that every schema loads, compiles and accepts its examples
    Check {
        /// Output the report as JSON
        #[arg(long)]
        json: bool,

        /// Only show failures
        #[arg(long, short)]
        quiet: bool,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One identifier per line
    List,
    /// `Link` header value
    Link,
    /// `Content-Type` echo with a schema parameter
    ContentType,
    /// JSON object
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = RegistryOptions::new(&cli.root)
        .base_url(&cli.base_url)
        .offline(cli.offline);

    let result = match cli.command {
        Commands::Resolve {
            media_type,
            legacy,
            format,
        } => run_resolve(&media_type, legacy, format, &options),
        Commands::List => run_list(options),
        Commands::Validate {
            reference,
            payload,
            json,
        } => run_validate(&reference, &payload, json, options),
        Commands::Deref { key, pretty } => run_deref(&key, pretty, options),
        Commands::Check {
            json,
            quiet,
            strict,
        } => run_check(json, quiet, strict, options),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run_resolve(
    input: &str,
    legacy: bool,
    format: OutputFormat,
    options: &RegistryOptions,
) -> Result<(), u8> {
    let Some(media_type) = MediaType::parse(input) else {
        eprintln!("Error: not a vendor JSON media type: {}", input);
        return Err(1);
    };
    let mode = ResolutionMode::from_legacy_flag(legacy);
    let keys = resolve_keys(&media_type, mode).map_err(|reason| {
        eprintln!("Error: no schema for {}: {}", input, reason);
        1u8
    })?;

    // Canonical keys are shown as URLs; override tokens verbatim.
    let ids: Vec<String> = keys
        .iter()
        .map(|k| {
            if k.is_canonical() {
                k.to_url(&options.base_url)
            } else {
                k.to_string()
            }
        })
        .collect();

    match format {
        OutputFormat::List => {
            for id in &ids {
                println!("{}", id);
            }
        }
        OutputFormat::Link => {
            if let Some(link) = describedby_link(&keys, &options.base_url, None) {
                println!("{}", link);
            }
        }
        OutputFormat::ContentType => println!("{}", content_type_echo(&media_type, &keys)),
        OutputFormat::Json => {
            let output = serde_json::json!({
                "media_type": media_type.essence,
                "mode": if legacy { "legacy" } else { "strict" },
                "keys": keys,
                "ids": ids,
            });
            println!("{}", output);
        }
    }
    Ok(())
}

fn open_registry(options: RegistryOptions) -> Result<SchemaRegistry, u8> {
    SchemaRegistry::new(options).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })
}

fn run_list(options: RegistryOptions) -> Result<(), u8> {
    let registry = open_registry(options)?;
    for key in registry.index().keys() {
        println!("{}", key);
    }
    Ok(())
}

fn run_validate(
    reference: &str,
    payload_path: &std::path::Path,
    json_output: bool,
    options: RegistryOptions,
) -> Result<(), u8> {
    let payload = load_schema(payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        e.exit_code() as u8
    })?;
    let registry = open_registry(options)?;

    match registry.validate(reference, &payload) {
        Ok(()) => {
            if json_output {
                println!(r#"{{"valid":true}}"#);
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(ValidateError::Invalid { key, errors }) => {
            if json_output {
                let output = serde_json::json!({
                    "valid": false,
                    "schema": key,
                    "errors": errors
                });
                println!("{}", output);
            } else {
                eprintln!("Validation against {} failed:", key);
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
            Err(1)
        }
        Err(e) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn run_deref(reference: &str, pretty: bool, options: RegistryOptions) -> Result<(), u8> {
    let registry = open_registry(options)?;
    let bundled = registry.dereference(reference).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let output = if pretty {
        serde_json::to_string_pretty(&bundled)
    } else {
        serde_json::to_string(&bundled)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);
    Ok(())
}

fn run_check(json: bool, quiet: bool, strict: bool, options: RegistryOptions) -> Result<(), u8> {
    let root = options.root.clone();
    let registry = open_registry(options)?;
    let report = check_all(&registry, strict);

    if json {
        let output = serde_json::to_string_pretty(&report).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", output);
    } else {
        if !quiet {
            println!("Checking {} ...\n", root.display());
        }

        for result in &report.results {
            let status_icon = match result.status {
                KeyStatus::Ok => "\x1b[32m✓\x1b[0m",
                KeyStatus::Warning => "\x1b[33m⚠\x1b[0m",
                KeyStatus::Error => "\x1b[31m✗\x1b[0m",
            };
            if !quiet || result.status != KeyStatus::Ok {
                println!("  {} {}", status_icon, result.key);
            }

            for diag in &result.diagnostics {
                if quiet && diag.severity != Severity::Error {
                    continue;
                }
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                println!(
                    "    {}{}[{}]\x1b[0m: {} - {}",
                    color, label, diag.code, diag.path, diag.message
                );
            }
        }

        println!();
        if report.failed == 0 {
            println!(
                "\x1b[32m✓ {} schemas checked, all passed\x1b[0m",
                report.keys_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} schemas checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                report.keys_checked, report.passed, report.failed, report.errors, report.warnings
            );
        }
    }

    if report.failed == 0 {
        Ok(())
    } else {
        Err(1)
    }
}
