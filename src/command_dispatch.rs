//! Purpose: Hold top-level CLI command dispatch for `framestore`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every command parses into a local store layered on the frozen globals.

use std::io::{self, BufWriter, Write};

use framestore::api::Printer;
use tracing::debug;

use super::*;

pub(super) fn dispatch_command(
    command: Command,
    globals_path: Option<&Path>,
) -> Result<RunOutcome, Error> {
    let globals = load_globals(globals_path)?;
    let mut store = Store::local(&globals)?;
    match command {
        Command::Fmt { input, print } => {
            let options = print.resolve()?;
            let outcome = parse_input(&mut store, "fmt", &input)?;
            let mut printer = Printer::new(&store, stdout_writer(), options);
            for &object in &outcome.objects {
                printer.print_line(object)?;
            }
            flush(printer.into_inner())?;
            Ok(RunOutcome::ok())
        }
        Command::Check {
            input,
            strict,
            json,
        } => {
            let outcome = parse_input(&mut store, "check", &input)?;
            debug!(
                objects = outcome.objects.len(),
                datums = store.num_datums(),
                symbols = store.num_symbols(),
                "checked input"
            );
            if json {
                emit_json(json!({
                    "input": input,
                    "objects": outcome.objects.len(),
                    "datums": store.num_datums(),
                    "symbols": store.num_symbols(),
                    "unresolved": outcome.unresolved,
                }));
            } else {
                println!(
                    "ok: {} objects, {} unresolved symbols",
                    outcome.objects.len(),
                    outcome.unresolved.len()
                );
            }
            if strict {
                outcome.strict()?;
            }
            Ok(RunOutcome::ok())
        }
        Command::Dump { input, print } => {
            let options = print.resolve()?;
            parse_input(&mut store, "dump", &input)?;
            let mut printer = Printer::new(&store, stdout_writer(), options);
            printer.print_all()?;
            flush(printer.into_inner())?;
            Ok(RunOutcome::ok())
        }
    }
}

fn stdout_writer() -> BufWriter<io::StdoutLock<'static>> {
    BufWriter::new(io::stdout().lock())
}

fn flush(mut writer: impl Write) -> Result<(), Error> {
    writer.flush().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to flush stdout")
            .with_source(err)
    })
}
