use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use iprstats::app::{App, LoadedSession, ProgressSink, ProgressSinkKind};
use iprstats::config::{Capabilities, ConfigLoader};
use iprstats::domain::{AppName, BackendKind, SessionId};
use iprstats::error::IprError;
use iprstats::export::IPS_EXTENSION;
use iprstats::go::{FileGoConnector, GoHttpClient};
use iprstats::output::{JsonOutput, OutputMode};
use iprstats::source::NoServer;
use iprstats::store::SessionStore;
use iprstats::tui::Tui;

type IprApp = App<NoServer, FileGoConnector>;

#[derive(Parser)]
#[command(name = "iprstats")]
#[command(about = "Member database statistics for InterProScan results")]
#[command(version, author)]
struct Cli {
    /// Configuration file (default: <data_dir>/iprstats.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep the data directory in $HOME instead of the working directory.
    #[arg(long, global = true)]
    installed: bool,

    /// Override the configured cache backend.
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Import an InterProScan XML file or restore a saved .ips session")]
    Open(OpenArgs),
    #[command(about = "Browse the cached statistics of a session")]
    Show(ShowArgs),
    #[command(about = "Export a session")]
    Export(ExportArgs),
    #[command(about = "Manage session directories")]
    Sessions(SessionsArgs),
    #[command(about = "Gene Ontology term data")]
    Go(GoArgs),
}

#[derive(Args)]
struct OpenArgs {
    file: PathBuf,

    /// Rows per app in the non-interactive summary.
    #[arg(long, default_value_t = 10)]
    top: usize,
}

#[derive(Args)]
struct ShowArgs {
    session: String,

    #[arg(long, default_value_t = 10)]
    top: usize,
}

#[derive(Args)]
struct ExportArgs {
    #[command(subcommand)]
    command: ExportCommand,
}

#[derive(Subcommand)]
enum ExportCommand {
    #[command(about = "One HTML page per member database")]
    Html { session: String, dest: Utf8PathBuf },
    #[command(about = "Spreadsheet with one worksheet per member database")]
    Xls {
        session: String,
        dest: Option<PathBuf>,
        #[arg(long)]
        app: Option<String>,
    },
    #[command(about = "Save the session as a .ips archive")]
    Ips { session: String, dest: Utf8PathBuf },
}

#[derive(Args)]
struct SessionsArgs {
    #[command(subcommand)]
    command: SessionsCommand,
}

#[derive(Subcommand)]
enum SessionsCommand {
    #[command(about = "List session directories")]
    List,
    #[command(about = "Remove one session, or all of them")]
    Clear { session: Option<String> },
}

#[derive(Args)]
struct GoArgs {
    #[command(subcommand)]
    command: GoCommand,
}

#[derive(Subcommand)]
enum GoCommand {
    #[command(about = "Download go-basic.obo into the data directory")]
    Fetch,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<IprError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IprError) -> u8 {
    match error {
        IprError::SessionNotFound(_)
        | IprError::InvalidSessionId(_)
        | IprError::InvalidAppName(_)
        | IprError::ConfigRead(_)
        | IprError::ConfigParse(_)
        | IprError::ConfigInvalid(_)
        | IprError::EngineUnavailable(_)
        | IprError::NotPopulated(_) => 2,
        IprError::Connection(_)
        | IprError::LookupUnavailable(_)
        | IprError::GoHttp(_)
        | IprError::GoStatus { .. } => 3,
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

    let store = SessionStore::new(cli.installed)?;
    let mut settings = ConfigLoader::resolve(
        cli.config.as_deref(),
        store.data_dir().as_std_path(),
        Capabilities::embedded(),
    )?;
    if let Some(backend) = cli.backend {
        settings = settings.with_backend(backend);
    }
    let go = FileGoConnector::new(store.data_dir().to_path_buf());
    let app = App::new(store, settings, NoServer, go);

    match cli.command {
        Commands::Open(args) => run_open(args, app, output_mode),
        Commands::Show(args) => run_show(args, app, output_mode),
        Commands::Export(args) => run_export(args.command, app, output_mode),
        Commands::Sessions(args) => run_sessions(args.command, app, output_mode),
        Commands::Go(args) => match args.command {
            GoCommand::Fetch => run_go_fetch(app, output_mode),
        },
    }
}

fn run_open(args: OpenArgs, app: IprApp, output_mode: OutputMode) -> miette::Result<()> {
    let is_archive = args
        .file
        .extension()
        .is_some_and(|ext| ext == OsStr::new(IPS_EXTENSION));
    let file = args.file;
    let open = move |app: &IprApp, sink: &dyn ProgressSink| -> Result<LoadedSession, IprError> {
        if is_archive {
            let path = Utf8PathBuf::from_path_buf(file.clone()).map_err(|path| {
                IprError::Filesystem(format!("non UTF-8 path {}", path.display()))
            })?;
            app.open_archive(&path, sink)
        } else {
            app.open_xml(&file, sink)
        }
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let loaded = open(&app, &JsonOutput)?;
            JsonOutput::print_summary(&app.summary(&loaded, args.top)).into_diagnostic()
        }
        OutputMode::Interactive => {
            let worker = app.clone();
            let mut tui = Tui::new(ProgressSinkKind::Open);
            let loaded = tui.run(move |sink| open(&worker, sink))?;
            tui.browse(&loaded)
        }
    }
}

fn run_show(args: ShowArgs, app: IprApp, output_mode: OutputMode) -> miette::Result<()> {
    let id: SessionId = args.session.parse()?;
    match output_mode {
        OutputMode::NonInteractive => {
            let loaded = app.reopen_session(&id, &JsonOutput)?;
            JsonOutput::print_summary(&app.summary(&loaded, args.top)).into_diagnostic()
        }
        OutputMode::Interactive => {
            let loaded = reopen_with_progress(&app, id, ProgressSinkKind::Show)?;
            Tui::new(ProgressSinkKind::Show).browse(&loaded)
        }
    }
}

fn run_export(command: ExportCommand, app: IprApp, output_mode: OutputMode) -> miette::Result<()> {
    let result = match command {
        ExportCommand::Html { session, dest } => {
            let loaded = load_for_export(&app, &session, output_mode)?;
            app.export_html(&loaded, &dest, &JsonOutput)?
        }
        ExportCommand::Xls {
            session,
            dest,
            app: member,
        } => {
            let member = member.map(|value| value.parse::<AppName>()).transpose()?;
            let loaded = load_for_export(&app, &session, output_mode)?;
            app.export_xls(&loaded, member.as_ref(), dest.as_deref(), &JsonOutput)?
        }
        ExportCommand::Ips { session, dest } => {
            let id: SessionId = session.parse()?;
            app.save_session(&id, &dest, &JsonOutput)?
        }
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_export(&result).into_diagnostic(),
        OutputMode::Interactive => {
            for path in &result.paths {
                println!("wrote {path}");
            }
            Ok(())
        }
    }
}

fn run_sessions(
    command: SessionsCommand,
    app: IprApp,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        SessionsCommand::List => {
            let result = app.list_sessions()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_sessions(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    if result.sessions.is_empty() {
                        println!("no sessions in {}", app.store().sessions_dir());
                    }
                    for info in &result.sessions {
                        let state = if info.cached { "cached" } else { "raw" };
                        println!("{}  {state:<6}  {:>10}  {}", info.id, bytes_to_human(info.bytes), info.path);
                    }
                    Ok(())
                }
            }
        }
        SessionsCommand::Clear { session } => {
            let id = session.map(|value| value.parse::<SessionId>()).transpose()?;
            if matches!(output_mode, OutputMode::Interactive) {
                let target = match &id {
                    Some(id) => format!("session {id}"),
                    None => "all sessions".to_string(),
                };
                if !Tui::new(ProgressSinkKind::Sessions).confirm_clear(&target)? {
                    return Ok(());
                }
            }
            let result = app.clear_session(id.as_ref())?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_clear(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    println!("removed {} session(s)", result.cleared);
                    Ok(())
                }
            }
        }
    }
}

fn run_go_fetch(app: IprApp, output_mode: OutputMode) -> miette::Result<()> {
    let client = GoHttpClient::new()?;
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.fetch_go_terms(&client, &JsonOutput)?;
            JsonOutput::print_go(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Go);
            let result = tui.run(move |sink| app.fetch_go_terms(&client, sink))?;
            println!(
                "{} GO terms in {} (version {}, {})",
                result.terms,
                result.path,
                result.version.as_deref().unwrap_or("unknown"),
                result.date.as_deref().unwrap_or("undated"),
            );
            Ok(())
        }
    }
}

fn load_for_export(
    app: &IprApp,
    session: &str,
    output_mode: OutputMode,
) -> miette::Result<LoadedSession> {
    let id: SessionId = session.parse()?;
    match output_mode {
        OutputMode::NonInteractive => Ok(app.reopen_session(&id, &JsonOutput)?),
        OutputMode::Interactive => reopen_with_progress(app, id, ProgressSinkKind::Export),
    }
}

fn reopen_with_progress(
    app: &IprApp,
    id: SessionId,
    kind: ProgressSinkKind,
) -> miette::Result<LoadedSession> {
    let worker = app.clone();
    Tui::new(kind).run(move |sink| worker.reopen_session(&id, sink))
}

fn bytes_to_human(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
