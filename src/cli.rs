use crate::model::{ChartId, ChartType, DataFile, ServiceConfig, SessionEvent, SessionSnapshot};
use crate::orchestrator::{run_controller, ExportOutcome, Intent};
use crate::session::Session;
use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

fn parse_chart_type(s: &str) -> Result<ChartType, String> {
    s.parse::<ChartType>().map_err(|e| e.to_string())
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "chart-deck",
    version,
    about = "Turn a CSV/Excel file into a PowerPoint chart"
)]
pub struct Cli {
    /// Base URL of the chart generation service
    #[arg(long, default_value = "https://chart-generator-api.onrender.com")]
    pub base_url: String,

    /// Path of the generate operation on the service
    #[arg(long, default_value = "/generate-chart")]
    pub generate_path: String,

    /// Upper bound for a single export request
    #[arg(long, default_value = "60s")]
    pub timeout: humantime::Duration,

    /// Where generated files are saved (defaults to the download directory)
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Only print the link to the generated file, do not download it
    #[arg(long)]
    pub no_download: bool,

    /// Data file to export without prompting (requires --chart-type)
    #[arg(long, requires = "chart_type")]
    pub file: Option<PathBuf>,

    /// Chart type for scripted mode: bar, line, pie, area, scatter or combo
    #[arg(long, value_parser = parse_chart_type, requires = "file")]
    pub chart_type: Option<ChartType>,

    /// Print session state as JSON
    #[arg(long)]
    pub json: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    match (args.file.as_deref(), args.chart_type) {
        (Some(path), Some(chart_type)) => run_scripted(&args, &cfg, path, chart_type).await,
        _ => run_interactive(&args, &cfg).await,
    }
}

/// Build a `ServiceConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<ServiceConfig> {
    Url::parse(&args.base_url).with_context(|| format!("invalid --base-url {:?}", args.base_url))?;
    let download_dir = match args.download_dir.clone() {
        Some(dir) => dir,
        None => dirs::download_dir()
            .map(Ok)
            .unwrap_or_else(std::env::current_dir)
            .context("get current directory")?,
    };
    Ok(ServiceConfig {
        base_url: args.base_url.clone(),
        generate_path: args.generate_path.clone(),
        request_timeout: Duration::from(args.timeout),
        download_dir,
        user_agent: format!("chart-deck/{}", env!("CARGO_PKG_VERSION")),
        retrieve: !args.no_download,
    })
}

/// Read and validate a data file from disk.
pub async fn load_data_file(path: &Path) -> Result<DataFile> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(DataFile::new(name, None, content)?)
}

fn render_snapshot(snap: &SessionSnapshot, json: bool) -> Result<Vec<String>> {
    if json {
        return Ok(vec![serde_json::to_string_pretty(snap)?]);
    }
    Ok(crate::text_summary::build_text_summary(snap).lines)
}

/// Wait for downloads started by the session's retriever.
async fn finish_retrievals(session: &Session) {
    for handle in session.export().retriever().take_pending() {
        let _ = handle.await;
    }
}

/// Run the whole wizard for one file and chart type, then export.
async fn run_scripted(
    args: &Cli,
    cfg: &ServiceConfig,
    path: &Path,
    chart_type: ChartType,
) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let mut session = Session::from_config(cfg)?;

    session.file_chosen(load_data_file(path).await?);
    session.next()?;
    session.type_chosen(chart_type);
    if let Some(chart) = session.next()? {
        let _ = out_tx.send(OutputLine::Stderr(format!("Created {}", chart.title)));
    }
    let ticket = session.request_export()?;
    let _ = out_tx.send(OutputLine::Stderr(format!(
        "Generating your PowerPoint file for {}…",
        ticket.chart_title
    )));
    let mut failure = None;
    if let Some(done) = session.settle_export().await {
        for n in &done.notices {
            let _ = out_tx.send(OutputLine::Stderr(n.to_message()));
        }
        if let ExportOutcome::Failed { error, .. } = done.outcome {
            failure = Some(error);
        }
    }
    finish_retrievals(&session).await;

    let snap = session.snapshot();
    for line in render_snapshot(&snap, args.json)? {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    drop(out_tx);
    let _ = out_handle.await;

    match failure {
        Some(error) => Err(anyhow::Error::new(error).context("export failed")),
        None => Ok(()),
    }
}

const HELP: &[&str] = &[
    "Commands:",
    "  file <path>      choose a CSV/Excel data file",
    "  remove           remove the data file",
    "  type <tag>       choose a chart type (bar, line, pie, area, scatter, combo)",
    "  next | prev      move between steps",
    "  jump <1-3>       go back to an earlier step",
    "  another          create another chart from the same file",
    "  select <id>      show a previously created chart",
    "  export           generate the PowerPoint file for the active chart",
    "  show             print the current state",
    "  quit",
];

/// One line typed at the prompt.
#[derive(Debug)]
enum Command {
    Intent(Intent),
    LoadFile(PathBuf),
    Help,
    Empty,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let need_arg = |what: &str| -> Result<(), String> {
        if rest.is_empty() {
            Err(format!("{word} needs {what}"))
        } else {
            Ok(())
        }
    };
    let cmd = match word.to_ascii_lowercase().as_str() {
        "" => Command::Empty,
        "help" | "?" => Command::Help,
        "file" | "upload" => {
            need_arg("a path")?;
            Command::LoadFile(PathBuf::from(rest))
        }
        "remove" => Command::Intent(Intent::FileRemoved),
        "type" => {
            need_arg("a chart type")?;
            Command::Intent(Intent::TypeChosen(parse_chart_type(rest)?))
        }
        "next" | "n" => Command::Intent(Intent::Next),
        "prev" | "previous" | "p" => Command::Intent(Intent::Previous),
        "jump" => {
            need_arg("a step number")?;
            let step: usize = rest
                .parse()
                .map_err(|_| format!("'{rest}' is not a step number"))?;
            // Steps are shown 1-based.
            let index = step
                .checked_sub(1)
                .ok_or_else(|| format!("steps are numbered from 1, got {step}"))?;
            Command::Intent(Intent::Jump(index))
        }
        "another" | "new" => Command::Intent(Intent::CreateAnother),
        "select" => {
            need_arg("a chart id")?;
            Command::Intent(Intent::SelectChart(ChartId::new(rest)))
        }
        "export" => Command::Intent(Intent::RequestExport),
        "show" => Command::Intent(Intent::Refresh),
        "quit" | "exit" | "q" => Command::Intent(Intent::Quit),
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(cmd)
}

/// Line-driven presentation: reads commands from stdin, renders session events.
async fn run_interactive(args: &Cli, cfg: &ServiceConfig) -> Result<()> {
    let session = Session::from_config(cfg)?;
    let (out_tx, out_handle) = spawn_output_writer();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (intent_tx, intent_rx) = mpsc::unbounded_channel::<Intent>();

    let controller = tokio::spawn(run_controller(session, event_tx, intent_rx));

    let json = args.json;
    let printer_tx = out_tx.clone();
    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            match ev {
                SessionEvent::Info(info) => {
                    let _ = printer_tx.send(OutputLine::Stderr(info.to_message()));
                }
                SessionEvent::Snapshot(snap) => match render_snapshot(&snap, json) {
                    Ok(lines) => {
                        for line in lines {
                            let _ = printer_tx.send(OutputLine::Stdout(line));
                        }
                    }
                    Err(e) => {
                        let _ = printer_tx.send(OutputLine::Stderr(format!("render failed: {e:#}")));
                    }
                },
            }
        }
    });

    let _ = out_tx.send(OutputLine::Stderr("Type 'help' for commands.".into()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let intent = match parse_command(&line) {
            Ok(Command::Intent(i)) => i,
            Ok(Command::LoadFile(path)) => match load_data_file(&path).await {
                Ok(file) => Intent::FileChosen(file),
                Err(e) => {
                    let _ = out_tx.send(OutputLine::Stderr(format!("{e:#}")));
                    continue;
                }
            },
            Ok(Command::Help) => {
                for l in HELP {
                    let _ = out_tx.send(OutputLine::Stderr((*l).to_string()));
                }
                continue;
            }
            Ok(Command::Empty) => continue,
            Err(msg) => {
                let _ = out_tx.send(OutputLine::Stderr(msg));
                continue;
            }
        };
        let quit = matches!(intent, Intent::Quit);
        if intent_tx.send(intent).is_err() || quit {
            break;
        }
    }
    // Closing the channel quits the controller once any running export finishes.
    drop(intent_tx);

    let session = controller.await.context("controller task failed")??;
    let _ = printer.await;
    finish_retrievals(&session).await;
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
