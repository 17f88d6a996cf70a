use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use url::Url;

use paystub_fetch::app::{App, ProgressSink, Trigger};
use paystub_fetch::builder::QueueBuilder;
use paystub_fetch::classify::PageClassifier;
use paystub_fetch::config::{ConfigLoader, ResolvedConfig};
use paystub_fetch::download::{Downloader, HttpDownloader};
use paystub_fetch::error::FetchError;
use paystub_fetch::output::{ConsoleOutput, JsonOutput, OutputMode};
use paystub_fetch::session::{HttpBrowser, Session, build_client};
use paystub_fetch::store::{FileKvStore, QueueStore};

#[derive(Parser)]
#[command(name = "paystub-fetch")]
#[command(about = "Download every paystub behind the imaging viewer, one navigation at a time")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build the queue from the paystub table and download everything")]
    Start(RunArgs),
    #[command(about = "Reload a page (default: the current item) and continue the queue")]
    Resume(RunArgs),
    #[command(about = "Show the persisted queue and cursor")]
    Status,
    #[command(about = "Give up on the current item and move to the next one")]
    Skip,
    #[command(about = "Forget the persisted queue")]
    Clear,
}

#[derive(Args, Clone)]
struct RunArgs {
    url: Option<String>,

    #[arg(long)]
    output_dir: Option<String>,

    #[arg(long)]
    cookie: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<FetchError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FetchError) -> u8 {
    match error {
        FetchError::EmptyQueue | FetchError::MissingStartUrl | FetchError::NoActiveQueue => 2,
        FetchError::Http(_)
        | FetchError::HttpStatus { .. }
        | FetchError::Download { .. }
        | FetchError::FrameUnavailable(_)
        | FetchError::Stuck { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Start(args) => run_session(args, config, Trigger::Start, output_mode),
        Commands::Resume(args) => run_session(args, config, Trigger::Observe, output_mode),
        Commands::Status => {
            let app = offline_app(&config);
            let result = app.status();
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_status(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    ConsoleOutput::print_status(&result);
                    Ok(())
                }
            }
        }
        Commands::Skip => {
            let app = offline_app(&config);
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.skip_current(&JsonOutput)?;
                    JsonOutput::print_skip(&result).into_diagnostic()
                }
                OutputMode::Interactive => {
                    let result = app.skip_current(&ConsoleOutput)?;
                    ConsoleOutput::print_skip(&result);
                    Ok(())
                }
            }
        }
        Commands::Clear => {
            let app = offline_app(&config);
            match output_mode {
                OutputMode::NonInteractive => {
                    let result = app.clear(&JsonOutput)?;
                    JsonOutput::print_clear(&result).into_diagnostic()
                }
                OutputMode::Interactive => {
                    app.clear(&ConsoleOutput)?;
                    Ok(())
                }
            }
        }
    }
}

fn run_session(
    args: RunArgs,
    mut config: ResolvedConfig,
    trigger: Trigger,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let RunArgs {
        url,
        output_dir,
        cookie,
    } = args;
    if let Some(output_dir) = output_dir {
        config.output_dir = Utf8PathBuf::from(output_dir);
    }
    if cookie.is_some() {
        config.http.cookie = cookie;
    }

    let client = build_client(&config.http)?;
    let downloader = HttpDownloader::new(client.clone(), config.output_dir.clone());
    let app = configure(App::new(state_store(&config), downloader), &config);
    let browser = HttpBrowser::new(client);

    let url = resolve_url(url, &config, trigger, &app)?;
    let session = Session::new(&browser, &app);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &ConsoleOutput,
    };
    let result = session.run(&url, trigger, sink)?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_run(&result).into_diagnostic()?,
        OutputMode::Interactive => ConsoleOutput::print_run(&result),
    }
    match result.outcome.failure() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// `start` needs the listing page; `resume` defaults to the current item's redirect.
fn resolve_url<D: Downloader>(
    url: Option<String>,
    config: &ResolvedConfig,
    trigger: Trigger,
    app: &App<FileKvStore, D>,
) -> miette::Result<Url> {
    if let Some(raw) = url {
        let url =
            Url::parse(&raw).map_err(|err| FetchError::InvalidUrl(format!("{raw}: {err}")))?;
        return Ok(url);
    }
    let url = match trigger {
        Trigger::Start => config
            .start_url
            .clone()
            .ok_or(FetchError::MissingStartUrl)?,
        Trigger::Observe => app
            .status()
            .current
            .map(|item| item.target_url)
            .ok_or(FetchError::NoActiveQueue)?,
    };
    Ok(url)
}

fn state_store(config: &ResolvedConfig) -> QueueStore<FileKvStore> {
    QueueStore::new(FileKvStore::new(config.state_path.clone()))
}

fn configure<D: Downloader>(
    app: App<FileKvStore, D>,
    config: &ResolvedConfig,
) -> App<FileKvStore, D> {
    app.with_classifier(PageClassifier::new(config.imaging_prefix.clone()))
        .with_builder(QueueBuilder::new(config.file_extension.clone()))
        .with_poller(config.poller)
}

fn offline_app(config: &ResolvedConfig) -> App<FileKvStore, NopDownloader> {
    configure(App::new(state_store(config), NopDownloader), config)
}

struct NopDownloader;

impl Downloader for NopDownloader {
    fn download(&self, _url: &Url, filename: &str) -> Result<Utf8PathBuf, FetchError> {
        Err(FetchError::Download {
            filename: filename.to_string(),
            message: "downloader not configured".to_string(),
        })
    }
}
