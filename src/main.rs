//! Purpose: `framestore` CLI entry point and command dispatch bootstrap.
//! Role: Binary crate root; parses args, runs commands, writes frame text on stdout.
//! Invariants: stdout carries only command payloads (frame text or JSON reports).
//! Invariants: Non-interactive errors and notices are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::fs::File;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use framestore::api::{Error, ErrorKind, ParseOutcome, PrintOptions, Store, parse, to_exit_code};
use framestore::notice::{Notice, notice_json, notice_time_now, unresolved_symbol_notice};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `framestore --help`."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command, cli.globals.as_deref())
        .map_err(add_text_hint)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
}

#[derive(Parser)]
#[command(
    name = "framestore",
    version,
    about = "Parse, check, and pretty-print frame store text",
    long_about = r#"Read frame text (files or stdin), load it into a frame store, and print it back.

Frame text looks like:
  {=alice :person name: "Alice" knows: bob}
  {=bob :person name: "Bob"}

Names may be used before they are defined; references left undefined at the end of
the input are reported as notices on stderr."#
)]
struct Cli {
    /// Parse this file into a frozen global store that every input can reference.
    #[arg(long, global = true, value_name = "FILE", value_hint = ValueHint::FilePath)]
    globals: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse frame text and print every top-level object in canonical form.
    Fmt {
        /// Input file, or `-` for stdin.
        #[arg(value_name = "INPUT", default_value = "-", value_hint = ValueHint::FilePath)]
        input: String,
        #[command(flatten)]
        print: PrintArgs,
    },
    /// Parse frame text and report objects and unresolved symbols.
    Check {
        /// Input file, or `-` for stdin.
        #[arg(value_name = "INPUT", default_value = "-", value_hint = ValueHint::FilePath)]
        input: String,
        /// Fail when any symbol stays unresolved.
        #[arg(long)]
        strict: bool,
        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Parse frame text and print every frame bound to a symbol, one per line.
    Dump {
        /// Input file, or `-` for stdin.
        #[arg(value_name = "INPUT", default_value = "-", value_hint = ValueHint::FilePath)]
        input: String,
        #[command(flatten)]
        print: PrintArgs,
    },
}

#[derive(Args, Debug, Default)]
struct PrintArgs {
    /// Spaces per nesting level (0 prints each object on one line).
    #[arg(long, value_name = "N")]
    indent: Option<usize>,
    /// Re-expand shared anonymous frames instead of using `#n` references.
    #[arg(long)]
    by_id: bool,
    /// Print named frames in link position as their id only.
    #[arg(long)]
    shallow: bool,
    /// Expand frames that live in the global store.
    #[arg(long)]
    global: bool,
    /// Load print options from a JSON file; flags override it.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
}

impl PrintArgs {
    fn resolve(&self) -> Result<PrintOptions, Error> {
        let mut options = match &self.config {
            Some(path) => read_print_config(path)?,
            None => PrintOptions::default(),
        };
        if let Some(indent) = self.indent {
            options.indent = indent;
        }
        if self.by_id {
            options.byref = false;
        }
        if self.shallow {
            options.shallow = true;
        }
        if self.global {
            options.global = true;
        }
        Ok(options)
    }
}

fn read_print_config(path: &Path) -> Result<PrintOptions, Error> {
    let bytes = std::fs::read(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to read config {}", path.display()))
            .with_source(err)
    })?;
    serde_json::from_slice(&bytes).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid print config {}", path.display()))
            .with_hint(
                "Expected a JSON object with optional keys indent, byref, shallow, global.",
            )
            .with_source(err)
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn open_input(input: &str) -> Result<Box<dyn Read>, Error> {
    if input == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(input).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to open {input}"))
            .with_source(err)
    })?;
    Ok(Box::new(file))
}

/// Parses `input` into `store`, reporting unresolved names as notices.
fn parse_input(store: &mut Store<'_>, cmd: &str, input: &str) -> Result<ParseOutcome, Error> {
    let outcome = parse(store, open_input(input)?)?;
    emit_unresolved(&outcome, cmd, input);
    Ok(outcome)
}

/// Global store for `path`, frozen and ready to back local stores.
fn load_globals(path: Option<&Path>) -> Result<Store<'static>, Error> {
    let mut globals = Store::new();
    if let Some(path) = path {
        let label = path.to_string_lossy().to_string();
        parse_input(&mut globals, "globals", &label)?;
    }
    globals.freeze()?;
    Ok(globals)
}

fn emit_unresolved(outcome: &ParseOutcome, cmd: &str, input: &str) {
    let time = notice_time_now().unwrap_or_default();
    for name in &outcome.unresolved {
        emit_notice(&unresolved_symbol_notice(cmd, input, name, time.clone()));
    }
}

fn emit_json(value: Value) {
    let json = serde_json::to_string_pretty(&value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_notice(notice: &Notice) {
    if io::stderr().is_terminal() {
        eprintln!("notice: {} ({})", notice.message, notice.input);
        return;
    }

    let value = notice_json(notice);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"notice\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::InvalidReference => "invalid reference".to_string(),
        ErrorKind::ReadOnly => "store is read-only".to_string(),
        ErrorKind::MalformedText => "malformed frame text".to_string(),
        ErrorKind::DanglingIndexReference => "dangling index reference".to_string(),
        ErrorKind::UnresolvedSymbol => "unresolved symbol".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    if let Some((line, column)) = err.position() {
        inner.insert("line".to_string(), json!(line));
        inner.insert("column".to_string(), json!(column));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some((line, column)) = err.position() {
        lines.push(format!("at: line {line}, column {column}"));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn add_text_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::MalformedText => {
            err.with_hint("Check the frame text at the reported line and column.")
        }
        ErrorKind::DanglingIndexReference => {
            err.with_hint("Define `=#n` inside a frame before referencing `#n`.")
        }
        ErrorKind::UnresolvedSymbol => err.with_hint(
            "Define the symbol with `{=name ...}`, pass --globals, or drop --strict.",
        ),
        _ => err,
    }
}

fn add_io_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Io || err.hint().is_some() {
        return err;
    }
    err.with_hint("I/O error. Check the path and file permissions.")
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}
