mod config;
mod console;
mod terminal;

use std::{process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    FlasherApi, FuseValues, HttpFlasherApi, Outcome, Session, StartCommand, UserIntent,
};
use shared::domain::{AvrdudeOptions, Fuse};
use tracing_subscriber::EnvFilter;

use crate::{config::Settings, terminal::TerminalSink};

/// How long a one-shot command waits for the push channel before dispatching.
const PUSH_CONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "flasher", about = "Drive a remote AVR flashing service")]
struct Cli {
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[arg(long, global = true)]
    port: Option<String>,
    #[arg(long, global = true)]
    part: Option<String>,
    #[arg(long, global = true)]
    programmer: Option<String>,
    #[arg(long, global = true)]
    baud: Option<u32>,
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,
    /// Ask avrdude for verbose output.
    #[arg(long, global = true)]
    verbose: bool,
    /// Tracing filter, e.g. `debug` or `client_core=trace`. Defaults to RUST_LOG, then `warn`.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(flatten)]
    avrdude: AvrdudeArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct AvrdudeArgs {
    #[arg(long, global = true)]
    disable_auto_erase: bool,
    #[arg(long, global = true)]
    disable_verify: bool,
    #[arg(long, global = true)]
    extra_verbose: bool,
    #[arg(long, global = true)]
    quiet: bool,
    #[arg(long, global = true)]
    force: bool,
    #[arg(long, global = true)]
    bitclock: Option<String>,
    #[arg(long, global = true)]
    config_file: Option<String>,
    /// Extra `-x` parameter; may be repeated.
    #[arg(long = "extended-param", global = true)]
    extended_params: Vec<String>,
}

impl From<AvrdudeArgs> for AvrdudeOptions {
    fn from(args: AvrdudeArgs) -> Self {
        AvrdudeOptions {
            disable_auto_erase: args.disable_auto_erase,
            disable_verify: args.disable_verify,
            extra_verbose: args.extra_verbose,
            quiet: args.quiet,
            force: args.force,
            bitclock: args.bitclock,
            config_file: args.config_file,
            extended_params: args.extended_params,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flash a local .hex/.bin file or a firmware URL.
    Upload { source: String },
    Erase,
    ReadFuses,
    WriteFuses {
        #[arg(long)]
        lfuse: Option<String>,
        #[arg(long)]
        hfuse: Option<String>,
        #[arg(long)]
        efuse: Option<String>,
    },
    /// Ask the service to stop the running operation.
    Stop,
    Status,
    Capabilities,
    /// Print the service's recent log buffer.
    ServerLogs,
    /// Interactive session.
    Console,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn merge_flags(mut settings: Settings, cli: &Cli) -> Settings {
    if let Some(v) = &cli.server_url {
        settings.server_url = v.clone();
    }
    if let Some(v) = &cli.port {
        settings.port = v.clone();
    }
    if let Some(v) = &cli.part {
        settings.part = v.clone();
    }
    if let Some(v) = &cli.programmer {
        settings.programmer = v.clone();
    }
    if let Some(v) = cli.baud {
        settings.baud = v;
    }
    if let Some(v) = cli.poll_interval_ms {
        settings.poll_interval_ms = v;
    }
    settings
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    let settings = merge_flags(config::load_settings(), &cli);
    tracing::debug!(?settings, "loaded settings");

    let Cli {
        verbose,
        avrdude,
        command,
        ..
    } = cli;
    let options = AvrdudeOptions::from(avrdude);

    let start = match command {
        Command::Status => return query_status(&settings).await,
        Command::Capabilities => {
            let api = HttpFlasherApi::new(&settings.server_url)?;
            let capabilities = api.capabilities().await?;
            println!("{}", serde_json::to_string_pretty(&capabilities)?);
            return Ok(ExitCode::SUCCESS);
        }
        Command::ServerLogs => {
            let api = HttpFlasherApi::new(&settings.server_url)?;
            for line in api.server_logs().await? {
                print!("{line}");
                if !line.ends_with('\n') {
                    println!();
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Console => {
            let (sink, _push_link) = TerminalSink::new();
            let session = Session::start(
                settings.session_config(verbose, options),
                Box::new(sink),
            )?;
            let result = console::run_console(session.handle()).await;
            session.shutdown().await;
            result?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Stop => None,
        Command::Upload { source } => Some(StartCommand::Upload(
            console::load_upload_source(&source)?,
        )),
        Command::Erase => Some(StartCommand::Erase),
        Command::ReadFuses => Some(StartCommand::ReadFuses),
        Command::WriteFuses {
            lfuse,
            hfuse,
            efuse,
        } => {
            let mut values = FuseValues::default();
            for (fuse, value) in [(Fuse::Low, lfuse), (Fuse::High, hfuse), (Fuse::Extended, efuse)]
            {
                if let Some(value) = value {
                    values.set(fuse, value);
                }
            }
            Some(StartCommand::WriteFuses(values))
        }
    };

    let (sink, mut push_link) = TerminalSink::new();
    let session = Session::start(settings.session_config(verbose, options), Box::new(sink))?;
    let handle = session.handle();
    // A missed push connection only costs the precise verdict; polling still sees the end.
    let _ = tokio::time::timeout(PUSH_CONNECT_GRACE, push_link.wait_for(|up| *up)).await;

    let code = match start {
        None => {
            let result = handle.request(UserIntent::Stop).await;
            if result.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Some(command) => match handle.request(UserIntent::Start(command)).await {
            Ok(_) => {
                let state = handle.wait_until_idle().await;
                exit_code_for(state.last_outcome())
            }
            Err(_) => ExitCode::FAILURE,
        },
    };

    session.shutdown().await;
    Ok(code)
}

async fn query_status(settings: &Settings) -> Result<ExitCode> {
    let api = HttpFlasherApi::new(&settings.server_url)?;
    let health = api
        .health()
        .await
        .with_context(|| format!("flashing service at {} did not answer", settings.server_url))?;
    let status = api.status().await?;
    println!(
        "server: {} (version {})",
        health.status,
        health.version.as_deref().unwrap_or("unknown")
    );
    println!("running: {}", status.is_running);
    if let Some(operation) = &status.operation_type {
        println!("operation: {operation}");
    }
    if let Some(start_time) = status.start_time {
        println!("started: {start_time}");
    }
    if let Some(queue_size) = status.queue_size {
        println!("queued log lines: {queue_size}");
    }
    Ok(ExitCode::SUCCESS)
}

fn exit_code_for(outcome: Outcome) -> ExitCode {
    match outcome {
        Outcome::Success => ExitCode::SUCCESS,
        Outcome::Failure => ExitCode::FAILURE,
        Outcome::Unknown | Outcome::None => ExitCode::from(2),
    }
}
