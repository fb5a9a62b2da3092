use anyhow::Context;
use clap::Parser;
use shui_print::console::{self, ConsoleCommand};
use shui_print::{
    init_logging, AppEvent, Config, ConnectionEvent, EventCategory, EventFilter, HistoryEntry,
    LogFormat, PrinterCore, UploadHistory, UploadOutcome, BUILD_DATE, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

/// Console client for SHUI WiFi 3D printers
#[derive(Debug, Parser)]
#[command(name = "shui-print", version, about)]
struct Cli {
    /// Config file (.toml or .json); defaults to the platform config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Printer IP address, overriding the config file
    #[arg(long)]
    ip: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format)?;
    tracing::info!("shui-print {} (built {})", VERSION, BUILD_DATE);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(ip) = cli.ip {
        config.printer.printer_ip = ip;
    }
    config.validate()?;

    let history = UploadHistory::new(config.history_path());
    let core = Arc::new(PrinterCore::start(config.core_config())?);
    println!(
        "Connecting to {}:{} (type 'help' for commands)",
        config.printer.printer_ip, config.printer.tcp_port
    );

    let reporter = tokio::spawn(report_changes(core.clone()));
    let mut uploads: Vec<JoinHandle<()>> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            },
        };

        let Some(command) = ConsoleCommand::parse(&line) else {
            continue;
        };

        match command {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => println!("{}", console::HELP),
            ConsoleCommand::Status => {
                println!("{}", console::format_snapshot(&core.snapshot()));
                println!("{}", console::format_job(&core.job()));
            }
            ConsoleCommand::Upload(path) => match core.request_upload(&path).await {
                Ok(handle) => {
                    uploads.retain(|task| !task.is_finished());
                    uploads.push(tokio::spawn(follow_upload(
                        handle,
                        history.clone(),
                        config.job.default_cooling_secs,
                    )));
                }
                Err(e) => println!("upload rejected: {}", e),
            },
            ConsoleCommand::Cancel => {
                if !core.cancel_upload() {
                    println!("no upload in progress");
                }
            }
            ConsoleCommand::Pause => report("pause", core.pause().await),
            ConsoleCommand::Resume => report("resume", core.resume().await),
            ConsoleCommand::Stop => report("stop", core.stop().await),
            ConsoleCommand::History => {
                let entries = history.load();
                if entries.is_empty() {
                    println!("no uploads yet");
                }
                for entry in entries.iter().rev().take(20) {
                    println!("{}", console::format_history(entry));
                }
            }
            ConsoleCommand::Raw(text) => match core.send_terminal_command(&text).await {
                Ok(response) => println!("{}", response.text()),
                Err(e) => println!("{} failed: {}", text, e),
            },
        }
    }

    core.shutdown().await;
    for upload in uploads {
        let _ = upload.await;
    }
    reporter.abort();
    Ok(())
}

fn report(action: &str, result: shui_print::Result<()>) {
    if let Err(e) = result {
        println!("{} failed: {}", action, e);
    }
}

/// Print snapshot, job and connection changes as they are published
async fn report_changes(core: Arc<PrinterCore>) {
    let mut snapshots = core.watch_snapshot();
    let mut jobs = core.watch_job();
    let mut connection = core.events(EventFilter::only(EventCategory::Connection));

    loop {
        tokio::select! {
            event = connection.recv() => match event {
                Some(AppEvent::Connection(ConnectionEvent::StateChanged { address, state })) => {
                    println!("connection {}: {}", address, state);
                }
                Some(_) => {}
                None => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = console::format_snapshot(&snapshots.borrow_and_update());
                println!("{}", line);
            }
            changed = jobs.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = console::format_job(&jobs.borrow_and_update());
                println!("{}", line);
            }
        }
    }
}

/// Print progress until the upload settles, then record it
async fn follow_upload(handle: shui_print::UploadHandle, history: UploadHistory, cooling: u32) {
    let file = handle.file_name().to_string();
    let mut progress = handle.watch_progress();

    let progress_task = {
        let file = file.clone();
        tokio::spawn(async move {
            let mut last = None;
            while progress.changed().await.is_ok() {
                let update = *progress.borrow_and_update();
                // One line per 10% step
                let step = update.percent() / 10;
                if last != Some(step) {
                    last = Some(step);
                    println!("{}", console::format_progress(&file, &update));
                }
            }
        })
    };

    let outcome = handle.outcome().await;
    progress_task.abort();

    match &outcome {
        UploadOutcome::Completed { bytes, .. } => println!(
            "upload {} complete: {} bytes at {:.1} kB/s",
            file,
            bytes,
            outcome.throughput_bps().unwrap_or_default() / 1000.0
        ),
        UploadOutcome::Failed(reason) => println!("upload {} failed: {}", file, reason),
        UploadOutcome::Cancelled => println!("upload {} cancelled", file),
    }

    if let Err(e) = history.append(HistoryEntry::now(file, cooling, outcome.is_success())) {
        tracing::warn!("Could not record upload history: {}", e);
    }
}
