//! `retrace`: replay, list and inspect saved input macros.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use retrace::backends::{self, BackendKind};
use retrace::shutdown::{self, OnceAction};
use retrace::{
    translate, Channel, Connected, Error, LoadReport, MacroLibrary, RepeatPolicy, ReplaySummary,
    Replayer, Settings, TranslationReport,
};

#[derive(Parser, Debug)]
#[command(name = "retrace", version, about = "Replay recorded keyboard and mouse macros")]
struct Cli {
    /// Settings file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding saved macros (overrides the settings file).
    #[arg(long, global = true, value_name = "DIR")]
    macro_dir: Option<PathBuf>,

    /// More logging (-v debug, -vv trace). RUST_LOG applies when absent.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a saved macro.
    Replay {
        /// Macro name.
        name: String,

        /// Times to replay. Without a value, or with -1, replays until interrupted.
        #[arg(
            long,
            value_name = "N",
            num_args = 0..=1,
            default_missing_value = "-1",
            allow_negative_numbers = true
        )]
        repeat: Option<i64>,

        /// Replay against the virtual injector instead of the real input devices.
        #[arg(long)]
        dry_run: bool,

        /// Print the replay summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List saved macros.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show what a macro contains and what would be dropped on replay.
    Inspect {
        name: String,

        #[arg(long)]
        json: bool,
    },
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ExitCode {
    /// Done, including replays stopped by a signal.
    Success = 0,
    /// Bad arguments or settings.
    ConfigError = 2,
    /// Macro directory could not be created.
    StorageError = 3,
    /// Macro missing or invalid name.
    MacroError = 4,
    /// No input injection available.
    InjectorError = 5,
    IoError = 6,
    InternalError = 99,
}

impl ExitCode {
    fn for_error(err: &Error) -> Self {
        match err {
            Error::ConfigParse { .. }
            | Error::ConfigValue(_)
            | Error::UnknownKey(_)
            | Error::InvalidRepeatCount(_) => ExitCode::ConfigError,
            Error::MacroDirectory { .. } => ExitCode::StorageError,
            Error::MacroNotFound(_) | Error::MacroExists(_) | Error::InvalidMacroName(_) => {
                ExitCode::MacroError
            }
            Error::Backend(_) | Error::InjectorUnavailable { .. } => ExitCode::InjectorError,
            Error::Io(_) => ExitCode::IoError,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::Success.into(),
        Err(err) => {
            error!(error = ?err, "fatal");
            eprintln!("error: {err}");
            ExitCode::for_error(&err).into()
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> retrace::Result<()> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(dir) = cli.macro_dir {
        settings.macro_dir = dir;
    }
    let library = MacroLibrary::open(&settings.macro_dir)?;

    match cli.command {
        Command::List { json } => list(&library, json),
        Command::Inspect { name, json } => inspect(&library, &name, json),
        Command::Replay {
            name,
            repeat,
            dry_run,
            json,
        } => {
            let policy = RepeatPolicy::from_count(repeat.unwrap_or(1))?;
            replay(&library, &settings, &name, policy, dry_run, json)
        }
    }
}

fn list(library: &MacroLibrary, json: bool) -> retrace::Result<()> {
    let names = library.list()?;
    if json {
        return print_json(&names);
    }
    let mut out = io::stdout().lock();
    if names.is_empty() {
        writeln!(out, "no macros in {}", library.dir().display())?;
    } else {
        for name in names {
            writeln!(out, "{name}")?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Inspection<'a> {
    name: &'a str,
    key_events: usize,
    pointer_events: usize,
    duration_ms: u64,
    load: LoadReport,
    translation: TranslationReport,
}

fn inspect(library: &MacroLibrary, name: &str, json: bool) -> retrace::Result<()> {
    let loaded = library.load(name)?;
    let translation = translate(&loaded.log);
    let report = Inspection {
        name,
        key_events: loaded.log.events(Channel::Key).len(),
        pointer_events: loaded.log.events(Channel::Pointer).len(),
        duration_ms: loaded.log.duration().as_millis() as u64,
        load: loaded.report,
        translation: translation.report,
    };
    if json {
        return print_json(&report);
    }

    let mut out = io::stdout().lock();
    writeln!(out, "{}", report.name)?;
    writeln!(out, "  key events:     {}", report.key_events)?;
    writeln!(out, "  pointer events: {}", report.pointer_events)?;
    writeln!(out, "  duration:       {} ms", report.duration_ms)?;
    if report.load.malformed > 0 || report.load.synthesized > 0 {
        writeln!(
            out,
            "  repaired:       {} malformed lines skipped, {} releases added",
            report.load.malformed, report.load.synthesized
        )?;
    }
    for unmapped in &report.translation.unmapped {
        writeln!(
            out,
            "  unmapped {} code {} ({}): {} events dropped",
            unmapped.channel,
            unmapped.code,
            unmapped.name.unwrap_or("unknown"),
            unmapped.events
        )?;
    }
    Ok(())
}

fn replay(
    library: &MacroLibrary,
    settings: &Settings,
    name: &str,
    policy: RepeatPolicy,
    dry_run: bool,
    json: bool,
) -> retrace::Result<()> {
    let loaded = library.load(name)?;
    let kind = if dry_run {
        BackendKind::Virtual
    } else {
        settings.injector
    };
    let (injector, virtual_log) = backends::connect(kind)?;
    let replayer = Replayer::new(Connected::new(injector), settings.replay_options());

    let cancel = replayer.cancel_handle();
    let cleanup = Arc::new(OnceAction::new(move || {
        cancel.cancel();
    }));
    shutdown::install(Arc::clone(&cleanup))?;

    let summary = replayer.run(&loaded.log, policy)?;
    // Later signals fall through to the default disposition.
    cleanup.run();

    if json {
        return print_json(&summary);
    }
    print_summary(name, &summary)?;
    if let Some(log) = virtual_log {
        writeln!(io::stdout(), "dry run: {} injection calls recorded", log.len())?;
    }
    Ok(())
}

fn print_summary(name: &str, summary: &ReplaySummary) -> io::Result<()> {
    let mut out = io::stdout().lock();
    write!(
        out,
        "{name}: {} iteration(s), {} events fired, {} failed, {} forced releases",
        summary.iterations,
        summary.fired(),
        summary.failed(),
        summary.forced_releases()
    )?;
    if summary.cancelled {
        write!(out, " (interrupted)")?;
    }
    writeln!(out)?;
    if summary.translation.dropped > 0 {
        writeln!(
            out,
            "{} events dropped for unmapped codes",
            summary.translation.dropped
        )?;
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> retrace::Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value).map_err(io::Error::from)?;
    writeln!(out)?;
    Ok(())
}
