mod config;
mod error;
mod host;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use runtime::{Agent, Answer, AnswerStatus, Session, ToolProvider, Transcript};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::{ANSWER_MARKER, CONFIG_FILE, Config, Provider};
use error::{Error, Result};
use host::{HostBackend, HostTools};

type HostSession = Session<HostBackend, HostTools>;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Answer questions with a model and MCP tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Model provider: anthropic, openai, azure or mock (default: inferred
    /// from the credentials present)
    #[arg(long, global = true, value_name = "NAME")]
    provider: Option<Provider>,

    /// Replay a JSON script instead of calling a model (MOCK=true for the
    /// built-in canned reply)
    #[arg(long, global = true, value_name = "SCRIPT")]
    mock: Option<PathBuf>,

    /// Write a transcript of each query into this directory
    #[arg(long, global = true, value_name = "DIR")]
    transcript: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one query and exit
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Start an interactive session
    Chat,
    /// List the tools the configured server offers
    Tools,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = load_config(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(provider) = cli.provider {
        config.backend.provider = Some(provider);
    }
    if let Some(script) = &cli.mock {
        config.backend.provider = Some(Provider::Mock);
        config.backend.script = Some(script.clone());
    }

    match cli.command {
        Some(Commands::Ask { query }) => {
            cmd_ask(&config, &query.join(" "), cli.transcript.as_deref()).await
        }
        Some(Commands::Chat) | None => cmd_chat(&config, cli.transcript.as_deref()).await,
        Some(Commands::Tools) => cmd_tools(&config).await,
    }
}

/// An explicit path must exist; the default file is optional.
fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if Path::new(CONFIG_FILE).exists() => Ok(Config::load(CONFIG_FILE)?),
        None => {
            debug!("no {CONFIG_FILE}; using defaults");
            Ok(Config::default())
        }
    }
}

async fn build_session(config: &Config) -> Result<HostSession> {
    let loop_config = config.loop_config()?;
    let backend = HostBackend::build(config.backend()?)?;
    let tools = HostTools::connect(config.server.as_ref()).await?;
    info!(
        backend = %backend,
        tools = tools.list_tools().len(),
        max_iterations = loop_config.max_iterations,
        "session ready"
    );
    Ok(Session::new(Agent::new(backend, tools, loop_config)?))
}

async fn close_session(session: HostSession) -> Result<()> {
    let (_, tools) = session.into_agent().into_parts();
    tools.shutdown().await
}

/// Cancels the token on Ctrl-C until dropped.
struct CtrlC {
    token: CancellationToken,
    watcher: tokio::task::JoinHandle<()>,
}

impl CtrlC {
    fn watch() -> Self {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        Self { token, watcher }
    }
}

impl Drop for CtrlC {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Run one query, report it, and write its transcript when asked.
async fn answer_query(
    session: &mut HostSession,
    query: &str,
    transcript_dir: Option<&Path>,
) -> Result<Answer> {
    let ctrl_c = CtrlC::watch();
    let result = session.chat_until_cancelled(query, &ctrl_c.token).await;
    drop(ctrl_c);

    if let Some(dir) = transcript_dir {
        let transcript = Transcript::from_exchange(session.last_exchange());
        let transcript = match &result {
            Ok(answer) => transcript.with_answer(answer),
            Err(e) => transcript.with_error(e),
        };
        match transcript.write_to(dir).await {
            Ok(path) => info!(path = %path.display(), "transcript written"),
            Err(e) => warn!("could not write transcript: {e}"),
        }
    }

    Ok(result?)
}

/// Answer text without the marker the default system prompt asks for.
/// When the loop itself has a marker configured it is already gone.
fn display_text(text: &str) -> &str {
    match text.find(ANSWER_MARKER) {
        Some(at) => text[at + ANSWER_MARKER.len()..].trim(),
        None => text,
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", display_text(&answer.text));
    match answer.status {
        AnswerStatus::Final => {}
        AnswerStatus::BestEffort => println!(
            "\n[iteration limit reached after {} iterations; this answer may be incomplete]",
            answer.iterations
        ),
        AnswerStatus::Incomplete => println!("\n[no answer: iteration limit reached]"),
    }
}

async fn cmd_ask(config: &Config, query: &str, transcript: Option<&Path>) -> Result<ExitCode> {
    let mut session = build_session(config).await?;
    let result = answer_query(&mut session, query, transcript).await;
    close_session(session).await?;

    match result {
        Ok(answer) => {
            print_answer(&answer);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_endpoint_failure() => {
            eprintln!("Error: {e}");
            Ok(ExitCode::FAILURE)
        }
        Err(Error::Runtime(runtime::Error::Cancelled)) => {
            eprintln!("Cancelled.");
            Ok(ExitCode::from(130))
        }
        Err(e) => Err(e),
    }
}

async fn cmd_chat(config: &Config, transcript: Option<&Path>) -> Result<ExitCode> {
    let mut session = build_session(config).await?;
    println!("tether v{}", env!("CARGO_PKG_VERSION"));
    println!("Session ID: {}", session.id);
    println!("Tools: {}", session.agent().tools().list_tools().len());
    println!("Type 'quit' or Ctrl+D to exit, '/reset' to start over.");
    println!("Ctrl+C cancels a running query.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }
        if input == "/reset" {
            session.reset();
            println!("History cleared. Session ID: {}\n", session.id);
            continue;
        }

        match answer_query(&mut session, input, transcript).await {
            Ok(answer) => {
                println!();
                print_answer(&answer);
                println!();
            }
            Err(Error::Runtime(runtime::Error::Cancelled)) => println!("\n[cancelled]\n"),
            Err(e) => eprintln!("\nError: {e}\n"),
        }
    }

    close_session(session).await?;
    println!("\nSession ended.");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_tools(config: &Config) -> Result<ExitCode> {
    let tools = HostTools::connect(config.server.as_ref()).await?;
    let specs = tools.list_tools();
    if specs.is_empty() {
        println!("No tools available.");
    }
    for spec in specs {
        println!("{}", spec.name);
        if !spec.description.is_empty() {
            println!("    {}", spec.description);
        }
        let required = spec.required_params();
        if !required.is_empty() {
            println!("    required: {}", required.join(", "));
        }
    }
    tools.shutdown().await?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_flag_parses() {
        let cli = Cli::try_parse_from(["tether", "--provider", "azure", "tools"]).unwrap();
        assert_eq!(cli.provider, Some(Provider::Azure));
        assert!(matches!(cli.command, Some(Commands::Tools)));

        let cli = Cli::try_parse_from(["tether", "ask", "--provider", "Mock", "2+2?"]).unwrap();
        assert_eq!(cli.provider, Some(Provider::Mock));

        assert!(Cli::try_parse_from(["tether", "--provider", "llama", "chat"]).is_err());
    }

    #[test]
    fn display_drops_answer_marker() {
        assert_eq!(display_text(host::MOCK_FALLBACK), "This is a mock response.");
        assert_eq!(
            display_text("Thought: done.\nFinal Answer: 42\n"),
            "42"
        );
        assert_eq!(display_text("Plain reply."), "Plain reply.");
        assert!(config::REACT_PROMPT.contains(ANSWER_MARKER));
    }
}
