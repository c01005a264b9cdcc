//! Tutor CLI
//!
//! Interactive terminal front-end for the streaming tutor.

mod command;
mod render;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use tutor_history::{
    AnalysisRecord, ConversationRecord, HistoryStore, SummaryGenerator, TranscriptGenerator,
};
use tutor_session::{
    load_image, Config, HttpTransport, Language, Outcome, Point, Recognizer, Session,
    SessionEvent,
};

use crate::command::{Command, HELP};
use crate::render::Renderer;

type TutorSession = Session<HttpTransport>;

/// Streaming Tutor - interactive homework helper
///
/// Ask questions, upload exam pages to find mistakes, and get walked through
/// each mistake step by step.
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Backend base URL (overrides apiBaseUrl)
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Interface language: zh or en (overrides language)
    #[arg(short, long, value_name = "CODE")]
    language: Option<String>,

    /// History file (overrides history.file)
    #[arg(long, value_name = "FILE")]
    history_file: Option<String>,

    /// Do not read or write history
    #[arg(long)]
    no_history: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Tutor starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, wires the session to the backend and runs the
/// input loop until `/quit` or end of input.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref url) = args.api_url {
        config.api_base_url.clone_from(url);
    }
    if let Some(ref code) = args.language {
        config.language = Language::from_code(code).ok_or_else(|| {
            anyhow::anyhow!("Unknown language '{code}'\n\nSuggestion: Use --language zh or --language en")
        })?;
    }
    if let Some(ref file) = args.history_file {
        config.history.file.clone_from(file);
    }

    // Re-validate after overrides
    config.validate()?;
    print_config(&config);

    let transport = HttpTransport::new(
        &config.api_base_url,
        config.connect_timeout(),
        config.read_timeout(),
    )?;
    let session = Session::new(Arc::new(transport), config.clone())?;
    let history = if args.no_history {
        None
    } else {
        Some(open_history(&config))
    };

    let mut repl = Repl {
        session,
        history,
        started: Utc::now(),
    };
    repl.run().await
}

// ============================================================================
// Input loop
// ============================================================================

struct Repl {
    session: TutorSession,
    history: Option<HistoryStore>,
    started: DateTime<Utc>,
}

impl Repl {
    async fn run(&mut self) -> anyhow::Result<()> {
        let printer = spawn_printer(&self.session);
        println!("Type a question, /image <path> to upload a page, or /help.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            prompt();
            let Some(line) = lines.next_line().await? else {
                break;
            };
            match Command::parse(&line) {
                Ok(Command::Quit) => break,
                Ok(command) => self.dispatch(command).await,
                Err(usage) => println!("! {usage}"),
            }
        }

        self.save_conversation();
        printer.abort();
        println!("Bye!");
        Ok(())
    }

    async fn dispatch(&mut self, command: Command) {
        match command {
            Command::Submit(text) => {
                let result = self.session.submit(&text).await;
                self.after_turn(result);
            }
            Command::Image(path) => match self.session.attach_image_file(&path) {
                Ok(_) => println!("Image ready. Press Enter to detect mistakes or type a question."),
                Err(e) => println!("! {e}"),
            },
            Command::Detect => {
                let result = self.session.detect_mistakes().await;
                self.after_turn(result);
            }
            Command::Box { x1, y1, x2, y2 } => {
                match self
                    .session
                    .annotations_mut()
                    .draw(Point::new(x1, y1), Point::new(x2, y2))
                {
                    Some(b) => println!(
                        "Box {} added ({:.1}, {:.1}) {:.1}x{:.1}",
                        self.session.annotations().boxes().len(),
                        b.x,
                        b.y,
                        b.width,
                        b.height
                    ),
                    None => println!("! Box is too small or off the page"),
                }
            }
            Command::Boxes => self.print_boxes(),
            Command::Undo => match self.session.annotations_mut().undo_last() {
                Some(_) => println!("Last box removed"),
                None => println!("No boxes to remove"),
            },
            Command::Unbox(n) => {
                let id = self.session.annotations().boxes().get(n - 1).map(|b| b.id);
                let removed = id.is_some_and(|id| self.session.annotations_mut().remove_box(id));
                if removed {
                    println!("Box {n} removed");
                } else {
                    println!("! No box {n}");
                }
            }
            Command::ClearBoxes => {
                self.session.annotations_mut().clear_all();
                println!("All boxes removed");
            }
            Command::Diagnose { question, answer } => {
                let result = self.session.diagnose(&question, answer.as_deref()).await;
                self.after_turn(result);
            }
            Command::Recognize(path) => self.recognize(&path),
            Command::New => {
                self.save_conversation();
                self.session.new_session();
                self.started = Utc::now();
                println!("New conversation started");
            }
            Command::History => self.print_history(),
            Command::Summary => self.print_summary(),
            Command::Export(path) => self.export(&path),
            Command::Status => self.print_status(),
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
    }

    /// Reports validation errors and persists history after a backend turn.
    fn after_turn(&mut self, result: tutor_session::Result<Outcome>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                println!("! {e}");
                return;
            }
        };
        tracing::debug!(?outcome, "Turn finished");

        if matches!(
            outcome,
            Outcome::AwaitingConfirmation { .. } | Outcome::NoMistakesFound
        ) {
            if let (Some(history), Some(report)) =
                (self.history.as_mut(), self.session.last_detection())
            {
                history.record_analysis(AnalysisRecord::capture(report, Utc::now()));
            }
        }
        if outcome != Outcome::Ignored {
            self.save_conversation();
        }
    }

    fn recognize(&self, path: &Path) {
        let image = match load_image(path, self.session.config().max_image_bytes) {
            Ok(image) => image,
            Err(e) => {
                println!("! {e}");
                return;
            }
        };
        let recognizer: Recognizer<HttpTransport> = self.session.recognizer();
        println!("Recognizing {} in the background...", path.display());
        tokio::spawn(async move {
            match recognizer.analyze(&image).await {
                Ok(response) if response.success => {
                    let data = response.data.unwrap_or_default();
                    println!(
                        "\n[recognized] {}",
                        serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string())
                    );
                }
                Ok(response) => println!(
                    "\n! Recognition failed: {}",
                    response.error.unwrap_or_default()
                ),
                Err(e) => println!("\n! Recognition failed: {e}"),
            }
            prompt();
        });
    }

    fn save_conversation(&mut self) {
        let Some(history) = self.history.as_mut() else {
            return;
        };
        if let Some(record) =
            ConversationRecord::capture(self.session.conversation(), self.started, Utc::now())
        {
            history.record_conversation(record);
        }
        if let Err(e) = history.save() {
            tracing::warn!(error = %e, "Failed to save history");
        }
    }

    // ------------------------------------------------------------------------
    // Printing
    // ------------------------------------------------------------------------

    fn print_boxes(&self) {
        let boxes = self.session.annotations().boxes();
        if boxes.is_empty() {
            println!("No boxes");
            return;
        }
        for (idx, b) in boxes.iter().enumerate() {
            println!(
                "  {}. ({:.1}, {:.1}) {:.1}x{:.1}",
                idx + 1,
                b.x,
                b.y,
                b.width,
                b.height
            );
        }
    }

    fn print_history(&self) {
        let Some(history) = &self.history else {
            println!("History is disabled");
            return;
        };
        println!("Conversations ({}):", history.conversations().len());
        for record in history.conversations() {
            println!(
                "  {}  {}{}",
                record.timestamp.format("%Y-%m-%d %H:%M"),
                record.preview,
                if record.has_image { " [image]" } else { "" }
            );
        }
        println!("Analyses ({}):", history.analyses().len());
        for record in history.analyses() {
            println!(
                "  {}  {} mistake(s)",
                record.timestamp.format("%Y-%m-%d %H:%M"),
                record.mistake_count
            );
        }
    }

    fn print_summary(&self) {
        let Some(history) = &self.history else {
            println!("History is disabled");
            return;
        };
        let summary = history.summary(Utc::now());
        println!("{}", SummaryGenerator::new(&summary).generate());
    }

    fn export(&self, path: &Path) {
        let title = format!("Tutor Session {}", self.started.format("%Y-%m-%d %H:%M"));
        let markdown =
            TranscriptGenerator::new(&title, self.session.conversation().messages()).generate();
        match std::fs::write(path, markdown) {
            Ok(()) => println!("Transcript written to {}", path.display()),
            Err(e) => println!("! Failed to write {}: {e}", path.display()),
        }
    }

    fn print_status(&self) {
        let snapshot = self.session.snapshot();
        println!("Status:");
        println!("  Mode: {}", snapshot.mode);
        println!("  Messages: {}", snapshot.messages.len());
        println!("  Detected mistakes: {}", snapshot.mistakes.len());
        println!("  Guidance: {}", snapshot.guidance);
        println!("  Boxes: {}", snapshot.boxes.len());
        println!(
            "  Image waiting: {}",
            if snapshot.has_working_image { "yes" } else { "no" }
        );
        println!("  Busy: {}", if snapshot.busy { "yes" } else { "no" });
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Prints session events as they arrive.
fn spawn_printer(session: &TutorSession) -> tokio::task::JoinHandle<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        let mut renderer = Renderer::new();
        loop {
            match events.recv().await {
                Ok(event) => print_event(&mut renderer, &event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(renderer: &mut Renderer, event: &SessionEvent) {
    if let Some(text) = renderer.render(event) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Opens the history file, falling back to an empty history if it is
/// unreadable.
fn open_history(config: &Config) -> HistoryStore {
    let path = PathBuf::from(&config.history.file);
    let (max_conversations, max_analyses) =
        (config.history.max_conversations, config.history.max_analyses);
    HistoryStore::load(&path, max_conversations, max_analyses).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Starting with empty history");
        HistoryStore::new(path, max_conversations, max_analyses)
    })
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Backend: {}", config.api_base_url);
    println!("  Language: {}", config.language.code());
    println!("  Max image size: {} bytes", config.max_image_bytes);
    println!("  History file: {}", config.history.file);
}
