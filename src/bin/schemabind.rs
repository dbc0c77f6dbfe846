//! schemabind CLI
//!
//! Command-line interface for compiling, validating, generating from and
//! linting JSON Schemas.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use schemabind::{
    compile_schema, generate_module_with, lint, load_document, source_uri, CompileOptions,
    DefaultFetcher, DescriptorSet, FileStatus, GenerateOptions, SchemaError, Severity,
    TypeDescriptor,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemabind")]
#[command(about = "Compile JSON Schemas into validated types and Rust code")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a schema and print a summary of its types as JSON
    Compile {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Close objects that do not declare additionalProperties
        #[arg(long)]
        strict: bool,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a payload against a compiled type
    Validate {
        /// Payload file to validate (JSON or YAML)
        payload: PathBuf,

        /// Schema source: file path or URL
        #[arg(long)]
        schema: String,

        /// Type to validate against, by name or URI (default: the root type)
        #[arg(long = "type")]
        type_name: Option<String>,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,

        /// Close objects that do not declare additionalProperties
        #[arg(long)]
        strict: bool,
    },

    /// Generate Rust types for every type in a schema
    Generate {
        /// Schema source: file path or URL
        schema: String,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Crate path the generated code calls into
        #[arg(long, default_value = "schemabind")]
        runtime_crate: String,

        /// Close objects that do not declare additionalProperties
        #[arg(long)]
        strict: bool,
    },

    /// Lint schema files for errors (syntax, broken refs, uncompilable types)
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Compile {
            schema,
            strict,
            pretty,
        } => run_compile(&schema, strict, pretty),

        Commands::Validate {
            payload,
            schema,
            type_name,
            json,
            strict,
        } => run_validate(&payload, &schema, type_name.as_deref(), json, strict),

        Commands::Generate {
            schema,
            output,
            runtime_crate,
            strict,
        } => run_generate(&schema, output, runtime_crate, strict),

        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn load_types(source: &str, strict: bool) -> Result<DescriptorSet, SchemaErrorOrUri> {
    let uri = source_uri(source).map_err(SchemaErrorOrUri::Uri)?;
    let options = CompileOptions::default().strict(strict);
    compile_schema(uri.as_str(), &DefaultFetcher::new(), &options).map_err(SchemaErrorOrUri::Schema)
}

/// Why a schema source could not be turned into types.
enum SchemaErrorOrUri {
    Uri(String),
    Schema(SchemaError),
}

impl SchemaErrorOrUri {
    fn report(&self, json_output: bool) -> u8 {
        match self {
            SchemaErrorOrUri::Uri(message) => {
                report_error(json_output, &format!("invalid schema source: {}", message));
                2
            }
            SchemaErrorOrUri::Schema(e) => {
                report_error(json_output, &e.to_string());
                exit_code(e.exit_code())
            }
        }
    }
}

fn exit_code(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

fn run_compile(schema: &str, strict: bool, pretty: bool) -> Result<(), u8> {
    let types = load_types(schema, strict).map_err(|e| e.report(false))?;

    let summary = json!({
        "root": types.root().map(|d| d.uri.clone()),
        "types": types.iter().map(|d| describe(d)).collect::<Vec<_>>(),
    });
    let output = if pretty {
        serde_json::to_string_pretty(&summary)
    } else {
        serde_json::to_string(&summary)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);
    Ok(())
}

fn describe(descriptor: &TypeDescriptor) -> Value {
    let fields: Vec<Value> = descriptor
        .fields
        .iter()
        .map(|field| {
            let mut entry = json!({
                "name": field.name,
                "type": field.schema.declared.describe(),
                "required": field.required,
            });
            if field.read_only {
                entry["readOnly"] = Value::Bool(true);
            }
            if !field.serialized {
                entry["serialized"] = Value::Bool(false);
            }
            if let Some(default) = &field.default {
                entry["default"] = default.clone();
            }
            entry
        })
        .collect();

    json!({
        "uri": descriptor.uri,
        "name": descriptor.name,
        "kind": descriptor.kind,
        "composition": descriptor.composition,
        "allowsExtra": descriptor.allows_extra(),
        "fields": fields,
    })
}

fn run_validate(
    payload_path: &Path,
    schema: &str,
    type_name: Option<&str>,
    json_output: bool,
    strict: bool,
) -> Result<(), u8> {
    let payload = load_document(payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        match e {
            schemabind::FetchError::Parse { .. } => 2u8,
            _ => 3u8,
        }
    })?;

    let types = load_types(schema, strict).map_err(|e| e.report(json_output))?;

    let descriptor = match type_name {
        Some(wanted) => types.get(wanted).or_else(|| types.by_name(wanted)),
        None => types.root(),
    };
    let Some(descriptor) = descriptor else {
        let message = match type_name {
            Some(wanted) => format!("no type '{}' in schema", wanted),
            None => "schema root is not an object type; use --type".to_string(),
        };
        report_error(json_output, &message);
        return Err(2);
    };

    match types.check(&descriptor.uri, &payload) {
        Ok(()) => {
            if json_output {
                println!(r#"{{"valid":true}}"#);
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(e) => {
            if json_output {
                let output = json!({
                    "valid": false,
                    "errors": e.violations,
                });
                println!("{}", output);
            } else {
                eprintln!("Validation failed:");
                for violation in &e.violations {
                    eprintln!("  {}", violation);
                }
            }
            Err(1)
        }
    }
}

fn run_generate(
    schema: &str,
    output: Option<PathBuf>,
    runtime_crate: String,
    strict: bool,
) -> Result<(), u8> {
    let types = load_types(schema, strict).map_err(|e| e.report(false))?;
    let options = GenerateOptions::new().runtime_crate(runtime_crate);
    let source = generate_module_with(&types, &options).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &source).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => print!("{}", source),
    }
    Ok(())
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict);

    if format == "json" {
        let rendered = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", rendered);
    } else {
        if !quiet {
            println!("Linting {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() && (!strict || result.warnings == 0) {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() && (!strict || result.warnings == 0) {
        Ok(())
    } else {
        Err(1)
    }
}
