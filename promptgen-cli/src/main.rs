use clap::Parser;
use env_logger::Env;
use log::debug;
use promptgen_config::{Config, ConfigError, LoadOutcome, load_or_init, save};
use promptgen_files::{MaterializeError, MaterializeReport, parse_records, write_records};
use promptgen_gemini::{GeminiClient, GeminiError, GenerationRequest, Generator};
use std::error::Error as StdError;
use std::ffi::OsString;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

const PROMPT_CUE: &str = "Enter your prompt: ";

/// Flags accepted with a single leading dash, Go `flag` style.
const LONG_FLAGS: &[&str] = &["key", "output", "model", "timeout", "set-gemini-api-key"];

/// promptgen CLI entry point.
///
/// Reads a prompt from standard input, asks Gemini for a JSON list of files
/// and writes each file below the output directory.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "promptgen",
    author,
    version,
    about = "Generate source files from a natural-language prompt.",
    long_about = None
)]
struct Cli {
    /// API key for the Gemini API. Falls back to the config file.
    #[arg(long, value_name = "KEY")]
    key: Option<String>,
    /// Directory the generated files are written to [default: output].
    #[arg(long, value_name = "DIR")]
    output: Option<String>,
    /// Gemini model used for generation.
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,
    /// Request deadline in seconds, 0 disables it.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
    /// Persist the Gemini API key in the promptgen config file.
    #[arg(long, value_name = "KEY")]
    set_gemini_api_key: Option<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("API key is required")]
    MissingApiKey,
    #[error("Error creating client: {0}")]
    Client(GeminiError),
    #[error("Error reading prompt: {0}")]
    Prompt(io::Error),
    #[error("Error generating content: {}", describe(.0))]
    Generate(GeminiError),
    #[error("Failed to parse generated files: {0}")]
    Parse(MaterializeError),
    #[error("{}", describe(.0))]
    Materialize(MaterializeError),
    #[error("Error writing output: {0}")]
    Output(#[from] io::Error),
}

impl From<MaterializeError> for CliError {
    fn from(error: MaterializeError) -> Self {
        match error {
            MaterializeError::Parse(_) => CliError::Parse(error),
            MaterializeError::OutputDir { .. } => CliError::Materialize(error),
        }
    }
}

/// Fully resolved run configuration, built once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    api_key: String,
    output_dir: PathBuf,
    model: String,
    timeout: Option<Duration>,
}

/// Combines CLI flags with the persisted configuration. Flags win.
fn resolve_settings(cli: &Cli, config: &Config) -> Result<Settings, CliError> {
    let api_key = cli
        .key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .unwrap_or_else(|| config.gemini_api_key.clone());
    if api_key.trim().is_empty() {
        return Err(CliError::MissingApiKey);
    }

    let output_dir = PathBuf::from(cli.output.as_deref().unwrap_or(&config.output_dir));
    let model = cli.model.clone().unwrap_or_else(|| config.model.clone());
    let timeout_secs = cli.timeout.unwrap_or(config.request_timeout_secs);
    let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

    Ok(Settings {
        api_key,
        output_dir,
        model,
        timeout,
    })
}

/// Rewrites `-key value` / `-key=value` style arguments into the double-dash
/// form clap understands. Everything after `--` is left alone.
fn normalize_go_style_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut normalized = Vec::new();
    let mut passthrough = false;

    for arg in args {
        if passthrough {
            normalized.push(arg);
            continue;
        }

        let rewritten = arg.to_str().and_then(|text| {
            if text == "--" {
                return None;
            }
            let flag = text.strip_prefix('-')?;
            if flag.starts_with('-') {
                return None;
            }
            let name = flag.split_once('=').map_or(flag, |(name, _)| name);
            LONG_FLAGS
                .contains(&name)
                .then(|| OsString::from(format!("-{text}")))
        });

        if arg == "--" {
            passthrough = true;
        }
        normalized.push(rewritten.unwrap_or(arg));
    }

    normalized
}

#[derive(Debug)]
struct RunContext {
    infos: Vec<String>,
    warnings: Vec<String>,
    settings: Result<Settings, CliError>,
}

fn run(cli: Cli) -> RunContext {
    apply_config(cli, load_or_init())
}

/// Folds a config load result into the run, persisting
/// `--set-gemini-api-key` when the file is usable.
fn apply_config(cli: Cli, loaded: Result<LoadOutcome, ConfigError>) -> RunContext {
    let mut infos = Vec::new();
    let mut warnings = Vec::new();

    let config = match loaded {
        Ok(outcome) => {
            if outcome.created {
                infos.push(format!(
                    "Created promptgen configuration at {}",
                    outcome.path.display()
                ));
            }

            let mut config = outcome.config;

            if let Some(key) = cli.set_gemini_api_key.clone() {
                config.gemini_api_key = key;
                match save(&config, &outcome.path) {
                    Ok(()) => infos.push(format!(
                        "Updated gemini_api_key in {}",
                        outcome.path.display()
                    )),
                    Err(error) => warnings.push(format!(
                        "Warning: failed to update gemini_api_key ({error})."
                    )),
                }
            }

            config
        }
        Err(error) => {
            warnings.push(format!(
                "Warning: failed to load promptgen configuration ({error}). Falling back to defaults."
            ));

            let mut config = Config::default();
            if let Some(key) = cli.set_gemini_api_key.clone() {
                warnings.push(
                    "Warning: cannot persist gemini_api_key because the configuration could not be loaded."
                        .to_string(),
                );
                config.gemini_api_key = key;
            }
            config
        }
    };

    let settings = resolve_settings(&cli, &config);

    RunContext {
        infos,
        warnings,
        settings,
    }
}

/// Prints the cue and reads one line. EOF yields an empty prompt.
fn read_prompt<R, W>(input: &mut R, out: &mut W) -> Result<String, CliError>
where
    R: BufRead,
    W: Write,
{
    write!(out, "{PROMPT_CUE}")?;
    out.flush()?;

    let mut line = Vec::new();
    input
        .read_until(b'\n', &mut line)
        .map_err(CliError::Prompt)?;
    let line = line
        .strip_suffix(b"\n")
        .map(|rest| rest.strip_suffix(b"\r").unwrap_or(rest))
        .unwrap_or(&line);
    // Invalid UTF-8 becomes U+FFFD instead of failing the run.
    Ok(String::from_utf8_lossy(line).into_owned())
}

/// Reformats JSON responses for display; anything else is shown as-is.
fn pretty_response(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text.trim())
        .and_then(|value| serde_json::to_string_pretty(&value))
        .unwrap_or_else(|_| text.to_string())
}

fn describe(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Runs prompt → Gemini → filesystem and reports progress on `out`.
fn generate_files<G, R, W>(
    settings: &Settings,
    generator: &G,
    input: &mut R,
    out: &mut W,
) -> Result<MaterializeReport, CliError>
where
    G: Generator,
    R: BufRead,
    W: Write,
{
    let prompt = read_prompt(input, out)?;
    let request = GenerationRequest::for_prompt(&prompt);
    debug!("requesting files from {}", settings.model);

    let response = generator
        .generate(&request)
        .map_err(CliError::Generate)?;

    writeln!(out, "\nAPI Response:")?;
    writeln!(out, "{}", pretty_response(&response))?;

    let records = parse_records(&response)?;
    writeln!(out, "\nSuccessfully parsed {} file(s)", records.len())?;

    let report = write_records(&records, &settings.output_dir)?;

    let mut written = report.written.iter().peekable();
    let mut failures = report.failures.iter().peekable();
    for index in 1..=report.attempted {
        if let Some(file) = written.next_if(|file| file.index == index) {
            writeln!(
                out,
                "\nFile {}: {} written to {}",
                file.index,
                file.name,
                file.path.display()
            )?;
        } else if let Some(failure) = failures.next_if(|failure| failure.index == index) {
            writeln!(
                out,
                "\nError writing file {}: {}",
                failure.name,
                describe(&failure.error)
            )?;
        }
    }

    writeln!(
        out,
        "\nAll files have been written to the '{}' directory",
        settings.output_dir.display()
    )?;
    writeln!(
        out,
        "Wrote {} of {} file(s)",
        report.written.len(),
        report.attempted
    )?;

    Ok(report)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse_from(normalize_go_style_flags(std::env::args_os()));
    let context = run(cli);

    for message in &context.infos {
        eprintln!("{message}");
    }

    for warning in &context.warnings {
        eprintln!("{warning}");
    }

    let settings = match context.settings {
        Ok(settings) => settings,
        Err(error) => {
            println!("{error}");
            return ExitCode::FAILURE;
        }
    };

    let result = GeminiClient::new(&settings.api_key, &settings.model, settings.timeout)
        .map_err(CliError::Client)
        .and_then(|client| {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut out = io::stdout();
            generate_files(&settings, &client, &mut input, &mut out)
        });

    match result {
        Ok(report) => {
            if !report.is_complete() {
                eprintln!(
                    "Warning: {} of {} file(s) could not be written.",
                    report.failures.len(),
                    report.attempted
                );
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}
