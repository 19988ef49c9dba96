//! Line-oriented interactive front end.

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use client_core::{ControllerHandle, FuseValues, StartCommand, UploadSource, UserIntent};
use shared::domain::Fuse;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const HELP: &str = "\
commands:
  upload <file.hex|file.bin|http(s)://url>   flash firmware
  erase                                      erase the chip
  read-fuses                                 read lfuse, hfuse and efuse
  write-fuses lfuse=0xFF [hfuse=..] [efuse=..]
  stop                                       ask the service to stop
  clear                                      clear the activity log
  status                                     show the operation state
  help                                       show this text
  quit                                       leave the console";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Upload(String),
    Intent(UserIntent),
    Status,
    Help,
    Quit,
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let parsed = match (command.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("upload", [source]) => ConsoleCommand::Upload(source.to_string()),
        ("upload", _) => bail!("usage: upload <file|url>"),
        ("erase", []) => ConsoleCommand::Intent(UserIntent::Start(StartCommand::Erase)),
        ("read-fuses", []) => ConsoleCommand::Intent(UserIntent::Start(StartCommand::ReadFuses)),
        ("write-fuses", args) => ConsoleCommand::Intent(UserIntent::Start(
            StartCommand::WriteFuses(parse_fuse_args(args)?),
        )),
        ("stop", []) => ConsoleCommand::Intent(UserIntent::Stop),
        ("clear", []) => ConsoleCommand::Intent(UserIntent::ClearLog),
        ("status", []) => ConsoleCommand::Status,
        ("help" | "?", _) => ConsoleCommand::Help,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        (other, _) => bail!("unknown command '{other}', type 'help'"),
    };
    Ok(Some(parsed))
}

fn parse_fuse_args(args: &[&str]) -> Result<FuseValues> {
    let mut values = FuseValues::default();
    for arg in args {
        let Some((name, value)) = arg.split_once('=') else {
            bail!("expected <fuse>=<value>, got '{arg}'");
        };
        let fuse = Fuse::from_memory_name(name)
            .with_context(|| format!("unknown fuse '{name}', expected lfuse, hfuse or efuse"))?;
        values.set(fuse, value);
    }
    Ok(values)
}

/// Resolve an upload argument: URLs pass through, anything else is read from disk.
pub fn load_upload_source(arg: &str) -> Result<UploadSource> {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        return Ok(UploadSource::url(arg));
    }
    let path = Path::new(arg);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("'{arg}' does not name a file"))?;
    let bytes = fs::read(path).with_context(|| format!("failed to read firmware '{arg}'"))?;
    Ok(UploadSource::file(file_name, bytes))
}

/// Read commands from stdin until `quit` or end of input.
pub async fn run_console(handle: ControllerHandle) -> Result<()> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("error: {err:#}");
                continue;
            }
        };
        match command {
            ConsoleCommand::Upload(arg) => match load_upload_source(&arg) {
                Ok(source) => {
                    handle.submit(UserIntent::Start(StartCommand::Upload(source)));
                }
                Err(err) => eprintln!("error: {err:#}"),
            },
            ConsoleCommand::Intent(intent) => {
                handle.submit(intent);
            }
            ConsoleCommand::Status => {
                let state = handle.state();
                println!(
                    "running={} last_outcome={:?} source={:?}",
                    state.running(),
                    state.last_outcome(),
                    state.source()
                );
            }
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => break,
        }
        if handle.is_closed() {
            bail!("controller stopped");
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/console_tests.rs"]
mod tests;
