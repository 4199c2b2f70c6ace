//! tourist-shell - Walk through code tours from the terminal.
//!
//! Starts `tourist serve`, opens any tour files given on the command line,
//! and reads commands until `quit`. Every change the session reports is
//! echoed as a one-line status, which is this host's redraw.
//!
//! # Usage
//!
//! ```bash
//! tourist-shell intro.tour
//! tourist-shell --edit --binary ./target/debug/tourist
//! ```

use crate::cmd::completions::ShellType;
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tourist_client::TouristClient;
use tourist_core::{LocateMode, StopId, TourId};
use tourist_session::config::BINARY_ENV;
use tourist_session::{Config, NavigationState, Session, SessionError, SessionEvent, StopVisit};

/// Walk through code tours served by `tourist serve`.
#[derive(Parser, Debug)]
#[command(name = "tourist-shell")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Generate shell completions for the specified shell.
    #[arg(long, value_name = "SHELL")]
    generate_completions: Option<ShellType>,

    /// Tourist executable (overrides the config file and TOURIST_BINARY).
    #[arg(long, value_name = "PATH")]
    binary: Option<PathBuf>,

    /// Request timeout in seconds, 0 to wait forever.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Config file to use instead of the default location.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Open tours given on the command line in edit mode.
    #[arg(long)]
    edit: bool,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Tour files to open at startup.
    #[arg(value_name = "TOUR_FILE")]
    tours: Vec<PathBuf>,
}

/// Main entry point for the shell.
pub fn main() -> ExitCode {
    main_with_name("tourist-shell")
}

/// Main entry point with a custom binary name.
pub fn main_with_name(bin_name: &str) -> ExitCode {
    let args = Args::parse();

    if let Some(shell) = args.generate_completions {
        crate::cmd::completions::generate_completions::<Args>(shell, bin_name);
        return ExitCode::SUCCESS;
    }

    init_tracing(args.verbose);

    let result = tokio::runtime::Runtime::new()
        .context("failed to start async runtime")
        .and_then(|runtime| runtime.block_on(run(&args)));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "tourist=info",
        1 => "tourist=debug",
        _ => "tourist=trace",
    };
    // Logs go to stderr so they never mix with command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration and apply command line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(binary) = &args.binary {
        config.binary_path.clone_from(binary);
    }
    if let Some(secs) = args.timeout {
        config.request_timeout_secs = secs;
    }
    Ok(config)
}

/// Run the shell.
pub async fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;

    let client = Arc::new(TouristClient::new(config.client_options()));
    client.connect(&config.binary_path).await.with_context(|| {
        format!("set `binary_path` in the config file or {BINARY_ENV} to the tourist executable")
    })?;
    tracing::debug!("Connected to {}", config.binary_path.display());

    let session = Session::new(Arc::clone(&client));
    session.subscribe(|event| println!("{}", describe_event(event)));

    let shell = Shell::new(session, config);
    let edit = args.edit || shell.config.default_edit();
    for tour in &args.tours {
        if let Err(e) = shell.open(tour, edit).await {
            eprintln!("error: {e:#}");
        }
    }

    let result = shell.interactive().await;
    shell.session.close();
    client.disconnect().await;
    result
}

/// One-line status for a session event.
pub fn describe_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Refreshed { tour: Some(tour) } => format!("[refreshed {tour}]"),
        SessionEvent::Refreshed { tour: None } => "[refreshed]".to_string(),
        SessionEvent::Navigated(NavigationState::NoTour) => "[no active tour]".to_string(),
        SessionEvent::Navigated(NavigationState::TourActive { tour, stop: None }) => {
            format!("[touring {tour}]")
        }
        SessionEvent::Navigated(NavigationState::TourActive {
            tour,
            stop: Some(stop),
        }) => format!("[touring {tour} at {stop}]"),
        SessionEvent::Closed => "[session closed]".to_string(),
    }
}

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `tours`
    Tours,
    /// `open FILE [--edit]`
    Open {
        /// Tour file.
        path: PathBuf,
        /// Explicit edit flag, if given.
        edit: Option<bool>,
    },
    /// `new TITLE`
    New(String),
    /// `start TOUR`
    Start(TourId),
    /// `stop`
    Stop,
    /// `show`
    Show,
    /// `stop-info [STOP]`
    StopInfo(Option<String>),
    /// `goto STOP`
    Goto(String),
    /// `next`
    Next,
    /// `prev`
    Prev,
    /// `add FILE:LINE TITLE`
    Add {
        /// File of the new stop.
        path: PathBuf,
        /// 1-based line.
        line: usize,
        /// Stop title.
        title: String,
    },
    /// `move FILE:LINE`
    Move {
        /// New file.
        path: PathBuf,
        /// New 1-based line.
        line: usize,
    },
    /// `up`
    Up,
    /// `down`
    Down,
    /// `title TEXT`
    Title(String),
    /// `describe TEXT`
    Describe(String),
    /// `link TOUR [STOP]`
    Link(TourId, Option<StopId>),
    /// `unlink TOUR [STOP]`
    Unlink(TourId, Option<StopId>),
    /// `rm [STOP]`
    Remove(Option<String>),
    /// `refresh [COMMIT]`
    Refresh(Option<String>),
    /// `save [PATH]`
    Save(Option<PathBuf>),
    /// `save-all`
    SaveAll,
    /// `delete [TOUR]`
    Delete(Option<TourId>),
    /// `forget [TOUR]`
    Forget(Option<TourId>),
    /// `edit on|off`
    Edit(bool),
    /// `map NAME PATH`
    Map(String, PathBuf),
    /// `unmap NAME`
    Unmap(String),
    /// `broken`
    Broken,
    /// `breakpoints`
    Breakpoints,
    /// `markers FILE`
    Markers(PathBuf),
    /// `discover`
    Discover,
    /// `help`
    Help,
    /// `quit`
    Quit,
}

const HELP: &str = "\
tours                   list tours known to the server
open FILE [--edit]      open a tour file and go to its first stop
new TITLE               create a tour and start it
start TOUR              make TOUR the active tour
stop                    leave the active tour
show                    show the active tour
stop-info [STOP]        show a stop (default: the active stop)
goto STOP               go to a stop, by id or 1-based position
next | prev             step through the tour
add FILE:LINE TITLE     add a stop
move FILE:LINE          move the active stop
up | down               reorder the active stop
title TEXT              retitle the active stop, or the tour when no stop is active
describe TEXT           describe the active stop, or the tour when no stop is active
link TOUR [STOP]        link the active stop to another tour or stop
unlink TOUR [STOP]      remove that link
rm [STOP]               remove a stop (default: the active stop)
refresh [COMMIT]        recompute locations against COMMIT or HEAD
save [PATH]             save the active tour
save-all                save every tour
delete [TOUR]           delete a tour and its file
forget [TOUR]           stop tracking a tour
edit on|off             toggle edit mode
map NAME PATH           map a repository name to a checkout
unmap NAME              remove a repository mapping
broken                  list stops that cannot be located
breakpoints             list recorded stop locations
markers FILE            list stops recorded in FILE
discover                list tour files in the configured directories
help                    show this help
quit                    leave the shell";

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let mut args = rest.split_whitespace();
        let optional = |rest: &str| (!rest.is_empty()).then(|| rest.to_string());

        let command = match word {
            "tours" | "ls" => Self::Tours,
            "open" => {
                let mut path = None;
                let mut edit = None;
                for arg in args {
                    match arg {
                        "--edit" => edit = Some(true),
                        "--read-only" => edit = Some(false),
                        other => path = Some(PathBuf::from(other)),
                    }
                }
                let Some(path) = path else {
                    bail!("usage: open FILE [--edit|--read-only]");
                };
                Self::Open { path, edit }
            }
            "new" => Self::New(required(rest, "new TITLE")?),
            "start" => Self::Start(TourId::new(required(rest, "start TOUR")?)),
            "stop" => Self::Stop,
            "show" => Self::Show,
            "stop-info" | "info" => Self::StopInfo(optional(rest)),
            "goto" => Self::Goto(required(rest, "goto STOP")?),
            "next" | "n" => Self::Next,
            "prev" | "p" => Self::Prev,
            "add" => {
                let location = args.next().context("usage: add FILE:LINE TITLE")?;
                let (path, line) = parse_location(location)?;
                let title = rest[location.len()..].trim();
                if title.is_empty() {
                    bail!("usage: add FILE:LINE TITLE");
                }
                Self::Add {
                    path,
                    line,
                    title: title.to_string(),
                }
            }
            "move" => {
                let (path, line) = parse_location(&required(rest, "move FILE:LINE")?)?;
                Self::Move { path, line }
            }
            "up" => Self::Up,
            "down" => Self::Down,
            "title" => Self::Title(required(rest, "title TEXT")?),
            "describe" => Self::Describe(required(rest, "describe TEXT")?),
            "link" | "unlink" => {
                let tour = args
                    .next()
                    .with_context(|| format!("usage: {word} TOUR [STOP]"))?;
                let tour = TourId::new(tour);
                let stop = args.next().map(StopId::new);
                if word == "link" {
                    Self::Link(tour, stop)
                } else {
                    Self::Unlink(tour, stop)
                }
            }
            "rm" | "remove" => Self::Remove(optional(rest)),
            "refresh" => Self::Refresh(optional(rest)),
            "save" => Self::Save(optional(rest).map(PathBuf::from)),
            "save-all" => Self::SaveAll,
            "delete" => Self::Delete(optional(rest).map(TourId::new)),
            "forget" => Self::Forget(optional(rest).map(TourId::new)),
            "edit" => match rest {
                "on" | "true" => Self::Edit(true),
                "off" | "false" => Self::Edit(false),
                _ => bail!("usage: edit on|off"),
            },
            "map" => {
                let (Some(name), Some(path)) = (args.next(), args.next()) else {
                    bail!("usage: map NAME PATH");
                };
                Self::Map(name.to_string(), PathBuf::from(path))
            }
            "unmap" => Self::Unmap(required(rest, "unmap NAME")?),
            "broken" => Self::Broken,
            "breakpoints" => Self::Breakpoints,
            "markers" => Self::Markers(PathBuf::from(required(rest, "markers FILE")?)),
            "discover" => Self::Discover,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => bail!("unknown command `{other}` (try `help`)"),
        };
        Ok(command)
    }
}

fn required(rest: &str, usage: &str) -> Result<String> {
    if rest.is_empty() {
        bail!("usage: {usage}");
    }
    Ok(rest.to_string())
}

/// Parse `FILE:LINE` with a 1-based line.
pub fn parse_location(text: &str) -> Result<(PathBuf, usize)> {
    let (path, line) = text
        .rsplit_once(':')
        .with_context(|| format!("expected FILE:LINE, got `{text}`"))?;
    let line: usize = line
        .parse()
        .with_context(|| format!("invalid line number `{line}`"))?;
    if path.is_empty() || line == 0 {
        bail!("expected FILE:LINE with a line of at least 1, got `{text}`");
    }
    Ok((PathBuf::from(path), line))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    Ok(cwd.join(path))
}

/// Whether the shell should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next command.
    Continue,
    /// Leave the shell.
    Quit,
}

/// The shell state: a session and the configuration it was built from.
pub struct Shell {
    session: Session,
    config: Config,
}

fn history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("tourist").join("history"))
}

impl Shell {
    /// Create a shell around `session`.
    pub const fn new(session: Session, config: Config) -> Self {
        Self { session, config }
    }

    /// The session.
    pub const fn session(&self) -> &Session {
        &self.session
    }

    async fn interactive(&self) -> Result<()> {
        let mut rl = DefaultEditor::new()?;
        if let Some(history_path) = history_path() {
            if let Some(parent) = history_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = rl.load_history(&history_path);
        }

        println!("tourist-shell {} (type `help` for commands)", env!("CARGO_PKG_VERSION"));

        let outcome = loop {
            let prompt = match self.session.active_tour() {
                Some(tour) => format!("tourist [{tour}]> "),
                None => "tourist> ".to_string(),
            };
            let line = match rl.readline(&prompt) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => {
                    println!("(interrupted)");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("quit");
                    break Ok(());
                }
                Err(err) => break Err(err.into()),
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let _ = rl.add_history_entry(line);

            let command = match Command::parse(line) {
                Ok(command) => command,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    continue;
                }
            };
            match self.execute_with_recovery(&command, &mut rl).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break Ok(()),
                Err(e) => {
                    if is_fatal(&e) {
                        break Err(e.context("lost connection to the tourist server"));
                    }
                    eprintln!("error: {e:#}");
                }
            }
        };

        if let Some(history_path) = history_path() {
            let _ = rl.save_history(&history_path);
        }
        outcome
    }

    /// Run `command`; if the server wants a repository mapped, ask for one and retry once.
    async fn execute_with_recovery(
        &self,
        command: &Command,
        rl: &mut DefaultEditor,
    ) -> Result<Flow> {
        match self.execute(command).await {
            Err(e) if needs_repository_mapping(&e) => {
                eprintln!("{e:#}");
                eprintln!("The file is not in a mapped repository. Map one now (empty name to skip).");
                let name = rl.readline("repository name: ")?;
                let name = name.trim();
                if name.is_empty() {
                    return Ok(Flow::Continue);
                }
                let path = rl.readline("repository path: ")?;
                let path = absolute(Path::new(path.trim()))?;
                self.session.map_repository(name, &path).await?;
                self.execute(command).await
            }
            other => other,
        }
    }

    /// Run one command.
    pub async fn execute(&self, command: &Command) -> Result<Flow> {
        let session = &self.session;
        match command {
            Command::Tours => {
                let active = session.active_tour();
                for (id, title) in session.list_tours().await? {
                    let marker = if active.as_ref() == Some(&id) { '*' } else { ' ' };
                    println!("{marker} {id}  {title}");
                }
            }
            Command::Open { path, edit } => {
                let edit = edit.unwrap_or_else(|| self.config.default_edit());
                self.open(path, edit).await?;
            }
            Command::New(title) => {
                let path = self.config.new_tour_path(title);
                let tour = session.new_tour(title, path.clone()).await?;
                match path {
                    Some(path) => println!("created {tour}, will save to {}", path.display()),
                    None => println!("created {tour}"),
                }
            }
            Command::Start(tour) => {
                let view = session.view_tour(tour).await?;
                session.start_tour(tour.clone());
                println!("{}", view.title);
            }
            Command::Stop => session.stop_tour(),
            Command::Show => println!("{}", self.render_tour().await?),
            Command::StopInfo(stop) => {
                let stop = self.resolve_stop(stop.as_deref()).await?;
                println!("{}", self.render_stop(&stop).await?);
            }
            Command::Goto(stop) => {
                let stop = self.resolve_stop(Some(stop)).await?;
                print_visit(&session.goto_stop(&stop).await?);
            }
            Command::Next | Command::Prev => {
                let visit = if *command == Command::Next {
                    session.next().await?
                } else {
                    session.prev().await?
                };
                match visit {
                    Some(visit) => print_visit(&visit),
                    None if session.active_stop().is_none() => {
                        println!("no active stop (use `goto`)");
                    }
                    None => println!("no more stops"),
                }
            }
            Command::Add { path, line, title } => {
                let stop = session.add_stop(title, &absolute(path)?, *line).await?;
                println!("added {stop}");
            }
            Command::Move { path, line } => {
                let stop = session.require_stop()?;
                session.move_stop(&stop, &absolute(path)?, *line).await?;
            }
            Command::Up => session.move_stop_up(&session.require_stop()?).await?,
            Command::Down => session.move_stop_down(&session.require_stop()?).await?,
            Command::Title(text) => match session.active_stop() {
                Some(stop) => session.edit_stop_title(&stop, text).await?,
                None => session.rename_tour(text).await?,
            },
            Command::Describe(text) => match session.active_stop() {
                Some(stop) => session.edit_stop_description(&stop, text).await?,
                None => session.edit_tour_description(text).await?,
            },
            Command::Link(tour, stop) => {
                let here = session.require_stop()?;
                session.link_stop(&here, tour, stop.as_ref()).await?;
            }
            Command::Unlink(tour, stop) => {
                let here = session.require_stop()?;
                session.unlink_stop(&here, tour, stop.as_ref()).await?;
            }
            Command::Remove(stop) => {
                let stop = self.resolve_stop(stop.as_deref()).await?;
                session.remove_stop(&stop).await?;
            }
            Command::Refresh(commit) => session.refresh_tour(commit.as_deref()).await?,
            Command::Save(path) => {
                let path = path.as_deref().map(absolute).transpose()?;
                session.save(path.as_deref()).await?;
                println!("saved");
            }
            Command::SaveAll => {
                session.save_all().await?;
                println!("saved all tours");
            }
            Command::Delete(tour) => {
                let tour = self.resolve_tour(tour.as_ref())?;
                session.delete_tour(&tour).await?;
            }
            Command::Forget(tour) => {
                let tour = self.resolve_tour(tour.as_ref())?;
                session.forget_tour(&tour).await?;
            }
            Command::Edit(edit) => session.set_edit(*edit).await?,
            Command::Map(name, path) => session.map_repository(name, &absolute(path)?).await?,
            Command::Unmap(name) => session.unmap_repository(name).await?,
            Command::Broken => {
                let broken = session.broken_stops().await?;
                if broken.is_empty() {
                    println!("no broken stops");
                }
                for (stop, title) in broken {
                    println!("{stop}  {title}");
                }
            }
            Command::Breakpoints => {
                for marker in session.breakpoints().await? {
                    println!("{}  {}", marker.location, marker.title);
                }
            }
            Command::Markers(path) => {
                for marker in session.stop_markers(&absolute(path)?).await? {
                    println!("{:>5}  {}", marker.location.line, marker.title);
                }
            }
            Command::Discover => {
                let tours = self.config.discover_tours()?;
                if tours.is_empty() {
                    println!("no tour files found (set `tour_directories` in the config file)");
                }
                for tour in tours {
                    println!("{}", tour.display());
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    async fn open(&self, path: &Path, edit: bool) -> Result<()> {
        let path = absolute(path)?;
        let tour = self
            .session
            .open_tour(&path, edit)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let view = self.session.view_tour(&tour).await?;
        println!(
            "opened {} ({}, {} stops{})",
            view.title,
            tour,
            view.stops.len(),
            if view.edit { ", editing" } else { "" }
        );
        if let Some(stop) = self.session.active_stop() {
            print_visit(&self.session.goto_stop(&stop).await?);
        }
        Ok(())
    }

    fn resolve_tour(&self, tour: Option<&TourId>) -> Result<TourId> {
        match tour {
            Some(tour) => Ok(tour.clone()),
            None => Ok(self.session.active_tour().ok_or(SessionError::NoActiveTour)?),
        }
    }

    /// A stop id, a 1-based position in the active tour, or the active stop.
    async fn resolve_stop(&self, stop: Option<&str>) -> Result<StopId> {
        let Some(stop) = stop else {
            return Ok(self.session.require_stop()?);
        };
        match stop.parse::<usize>() {
            Ok(position) => {
                let view = self.session.view_active_tour().await?;
                position
                    .checked_sub(1)
                    .and_then(|index| view.stops.get(index))
                    .map(|(id, _)| id.clone())
                    .with_context(|| {
                        format!("the tour has {} stops, no stop {position}", view.stops.len())
                    })
            }
            Err(_) => Ok(StopId::new(stop)),
        }
    }

    async fn render_tour(&self) -> Result<String> {
        let view = self.session.view_active_tour().await?;
        let active = self.session.active_stop();
        let mut out = String::new();
        writeln!(out, "{}{}", view.title, if view.edit { " (editing)" } else { "" })?;
        if !view.description.is_empty() {
            writeln!(out, "{}", view.description)?;
        }
        for (repository, commit) in &view.repositories {
            writeln!(out, "  repository {repository} @ {commit}")?;
        }
        for (i, (id, title)) in view.stops.iter().enumerate() {
            let marker = if active.as_ref() == Some(id) { '>' } else { ' ' };
            writeln!(out, "{marker} {:>3}. {title}  ({id})", i + 1)?;
        }
        if view.stops.is_empty() {
            writeln!(out, "  (no stops)")?;
        }
        Ok(out.trim_end().to_string())
    }

    async fn render_stop(&self, stop: &StopId) -> Result<String> {
        let tour = self
            .session
            .active_tour()
            .ok_or(SessionError::NoActiveTour)?;
        let view = self.session.view_stop(&tour, stop).await?;
        let location = self
            .session
            .locate_stop(&tour, stop, LocateMode::Adjusted)
            .await?;
        let mut out = String::new();
        writeln!(out, "{}  ({stop})", view.title)?;
        match location {
            Some(location) => writeln!(out, "  at {location} in {}", view.repository)?,
            None => writeln!(out, "  broken: cannot be located in {}", view.repository)?,
        }
        if !view.description.is_empty() {
            writeln!(out, "{}", view.description)?;
        }
        for child in &view.children {
            writeln!(out, "  -> {}", child.label())?;
        }
        Ok(out.trim_end().to_string())
    }
}

fn print_visit(visit: &StopVisit) {
    match &visit.location {
        Some(location) => println!("{}  {location}", visit.title),
        None => println!("{}  (broken)", visit.title),
    }
}

fn session_error(e: &anyhow::Error) -> Option<&SessionError> {
    e.chain().find_map(|cause| cause.downcast_ref::<SessionError>())
}

fn needs_repository_mapping(e: &anyhow::Error) -> bool {
    session_error(e).is_some_and(SessionError::needs_repository_mapping)
}

fn is_fatal(e: &anyhow::Error) -> bool {
    session_error(e).is_some_and(SessionError::is_fatal)
}
