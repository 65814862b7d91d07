use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowagent_capability_registry::BackendCapabilityFactory;
use flowagent_config::{Message, PlanProposal, RunEvent, Settings, WorkflowPlan};
use flowagent_framing::{FrameFormat, StreamFramer};
use flowagent_model::{EchoBackend, ModelBackend, OpenAiBackend};
use flowagent_orchestrator::{ChatService, ExecutionContext, Orchestrator};
use flowagent_session::InMemorySessionStore;

/// Flowagent - plan and run chains of agent steps
#[derive(Parser)]
#[command(name = "flowagent")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the settings file (default: ~/.flowagent/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Use the offline echo backend instead of the configured model endpoint
  #[arg(long, global = true)]
  offline: bool,

  /// Model for every step and the planner, overriding the settings
  #[arg(long, global = true)]
  model: Option<String>,

  /// Frame format for streamed output: markers or jsonl. `run` defaults to
  /// markers; `chat` frames its output only when this is given
  #[arg(long, global = true)]
  format: Option<FrameFormat>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow plan and stream its output to stdout
  Run {
    /// Path to the plan file (JSON), or `-` for stdin
    plan_file: PathBuf,
  },

  /// Run a single step of a plan, without streaming or prior context
  Step {
    /// Path to the plan file (JSON), or `-` for stdin
    plan_file: PathBuf,

    /// Name of the step to run
    #[arg(long)]
    step: String,
  },

  /// Chat with the planner; `/run` executes the last proposed plan
  Chat {
    /// Session id; history is kept for the lifetime of the process
    #[arg(long, default_value = "default")]
    session: String,
  },
}

struct App {
  orchestrator: Orchestrator,
  chat: ChatService,
  framer: StreamFramer,
  chat_output: ChatOutput,
}

fn main() -> Result<()> {
  init_tracing();
  let cli = Cli::parse();

  let Some(command) = cli.command.as_ref() else {
    println!("flowagent - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let app = build_app(&cli)?;
    match command {
      Commands::Run { plan_file } => run_plan_file(&app, plan_file).await,
      Commands::Step { plan_file, step } => run_single_step(&app, plan_file, step).await,
      Commands::Chat { session } => chat_repl(&app, session).await,
    }
  })
}

/// Logs go to stderr; stdout carries only frames.
fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .compact()
    .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
  if let Some(path) = path {
    return Settings::load(path).context("failed to load settings");
  }

  match dirs::home_dir() {
    Some(home) => {
      let path = home.join(".flowagent").join("config.json");
      Settings::load_or_default(&path).context("failed to load settings")
    }
    None => {
      warn!("could not determine home directory, using default settings");
      Ok(Settings::default())
    }
  }
}

fn build_app(cli: &Cli) -> Result<App> {
  let settings = load_settings(cli.config.as_deref())?;

  let backend: Arc<dyn ModelBackend> = if cli.offline {
    Arc::new(EchoBackend::new())
  } else {
    Arc::new(
      OpenAiBackend::from_settings(&settings.backend)
        .context("failed to configure model backend (use --offline to run without one)")?,
    )
  };

  let factory = BackendCapabilityFactory::new(backend.clone(), settings.capabilities.clone())
    .with_model(cli.model.clone());

  let sessions = Arc::new(InMemorySessionStore::new());
  let mut chat = ChatService::new(backend, sessions)
    .with_model(cli.model.clone().or(settings.chat.model.clone()))
    .with_serialized_turns(settings.sessions.serialize_turns);
  if let Some(instructions) = &settings.chat.instructions {
    chat = chat.with_instructions(instructions.clone());
  }

  info!(
    offline = cli.offline,
    format = ?cli.format,
    model = ?cli.model,
    "flowagent_started"
  );

  Ok(App {
    orchestrator: Orchestrator::new(Arc::new(factory)),
    chat,
    framer: StreamFramer::new(cli.format.unwrap_or_default()),
    chat_output: ChatOutput::for_format(cli.format),
  })
}

/// Accepts a bare plan (`{"steps": [...]}` or `{"agents": [...]}`) or a full
/// planner reply (`{"flow": {...}, "message": ...}`).
async fn read_plan(path: &Path) -> Result<WorkflowPlan> {
  let content = if path == Path::new("-") {
    let mut content = String::new();
    tokio::io::stdin()
      .read_to_string(&mut content)
      .await
      .context("failed to read plan from stdin")?;
    content
  } else {
    tokio::fs::read_to_string(path)
      .await
      .with_context(|| format!("failed to read plan file: {}", path.display()))?
  };

  if let Ok(plan) = serde_json::from_str::<WorkflowPlan>(&content) {
    return Ok(plan);
  }
  let proposal: PlanProposal = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse plan file: {}", path.display()))?;
  Ok(proposal.flow)
}

/// Cancels its token on the first Ctrl-C while alive.
struct Interrupt {
  token: CancellationToken,
  watcher: JoinHandle<()>,
}

impl Interrupt {
  fn watch() -> Self {
    let token = CancellationToken::new();
    let cancel = token.clone();
    let watcher = tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted");
        cancel.cancel();
      }
    });
    Self { token, watcher }
  }

  fn token(&self) -> CancellationToken {
    self.token.clone()
  }
}

impl Drop for Interrupt {
  fn drop(&mut self) {
    self.watcher.abort();
  }
}

async fn run_plan_file(app: &App, plan_file: &Path) -> Result<()> {
  let plan = read_plan(plan_file).await?;
  let framer = app.framer;
  run_plan(app, &plan, |event| {
    let frame = framer.frame(event)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(frame.as_bytes())?;
    stdout.flush()?;
    Ok(())
  })
  .await
}

/// Submit a plan and hand every event to `emit` as it arrives.
async fn run_plan(
  app: &App,
  plan: &WorkflowPlan,
  mut emit: impl FnMut(&RunEvent) -> Result<()>,
) -> Result<()> {
  let interrupt = Interrupt::watch();
  let mut run = app
    .orchestrator
    .submit(plan, interrupt.token())
    .context("plan rejected")?;

  while let Some(event) = run.next_event().await {
    emit(&event)?;
  }

  let outcome = run.finish().await.context("workflow run failed")?;
  info!(
    run_id = %outcome.run_id,
    steps = outcome.records.len(),
    "workflow_finished"
  );
  Ok(())
}

async fn run_single_step(app: &App, plan_file: &Path, step: &str) -> Result<()> {
  let plan = read_plan(plan_file).await?;
  let Some(task) = plan.steps.iter().find(|candidate| candidate.name == step) else {
    bail!("plan has no step named '{step}'");
  };

  let output = app
    .orchestrator
    .execute_step(task, &ExecutionContext::new())
    .await
    .with_context(|| format!("step '{step}' failed"))?;
  println!("{}", output.content);
  Ok(())
}

/// Human-readable rendering for the interactive chat.
fn render_plain(event: &RunEvent) -> String {
  match event {
    RunEvent::StepStart { step } => format!("\n== {step} ==\n"),
    RunEvent::TextDelta { text } => text.clone(),
    RunEvent::StepEnd { .. } => "\n".to_string(),
    RunEvent::Failure { step: Some(step), error } => format!("\n[{step} failed] {error}\n"),
    RunEvent::Failure { step: None, error } => format!("\n[failed] {error}\n"),
  }
}

fn write_stdout(text: &str) -> Result<()> {
  let mut stdout = std::io::stdout().lock();
  stdout.write_all(text.as_bytes())?;
  stdout.flush()?;
  Ok(())
}

/// How the chat writes events to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatOutput {
  /// Readable text. Reply deltas are held back so a plan proposal can be
  /// summarized instead of dumped as JSON.
  Plain,
  /// Every event, reply deltas included, framed as it arrives.
  Framed(StreamFramer),
}

impl ChatOutput {
  fn for_format(format: Option<FrameFormat>) -> Self {
    match format {
      Some(format) => ChatOutput::Framed(StreamFramer::new(format)),
      None => ChatOutput::Plain,
    }
  }

  /// Text for one chat reply event, `None` when it is held back.
  fn reply_event(&self, event: &RunEvent) -> Result<Option<String>> {
    match (self, event) {
      (ChatOutput::Plain, RunEvent::TextDelta { .. }) => Ok(None),
      (ChatOutput::Plain, other) => Ok(Some(render_plain(other))),
      (ChatOutput::Framed(framer), event) => Ok(Some(framer.frame(event)?)),
    }
  }

  /// Text for one event of a workflow started from the chat.
  fn run_event(&self, event: &RunEvent) -> Result<String> {
    match self {
      ChatOutput::Plain => Ok(render_plain(event)),
      ChatOutput::Framed(framer) => Ok(framer.frame(event)?),
    }
  }
}

async fn chat_repl(app: &App, session: &str) -> Result<()> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut proposal: Option<PlanProposal> = None;
  let output = app.chat_output;

  eprintln!("session '{session}': /run executes the last proposed plan, /quit or Ctrl-D exits");
  loop {
    eprint!("> ");
    std::io::stderr().flush()?;

    let Some(line) = lines.next_line().await? else {
      break;
    };
    match line.trim() {
      "" => continue,
      "/quit" | "/exit" => break,
      "/run" => match &proposal {
        Some(current) => {
          let emit = |event: &RunEvent| write_stdout(&output.run_event(event)?);
          if let Err(e) = run_plan(app, &current.flow, emit).await {
            eprintln!("error: {e:#}");
          }
        }
        None => eprintln!("no plan has been proposed yet"),
      },
      text => {
        let interrupt = Interrupt::watch();
        let mut turn = app
          .chat
          .turn_stream(session, Message::user(text), interrupt.token())?;

        while let Some(event) = turn.next_event().await {
          if let Some(text) = output.reply_event(&event)? {
            write_stdout(&text)?;
          }
        }

        match turn.finish().await {
          Ok(message) => {
            proposal = PlanProposal::from_reply(&message.content);
            // Framed output already carried the reply; the summary goes to
            // stderr so stdout stays frames only.
            let summary = match &proposal {
              Some(current) => proposal_summary(current),
              None if output == ChatOutput::Plain => format!("{}\n", message.content),
              None => String::new(),
            };
            match output {
              ChatOutput::Plain => write_stdout(&summary)?,
              ChatOutput::Framed(_) => eprint!("{summary}"),
            }
          }
          Err(e) => eprintln!("error: {e:#}"),
        }
      }
    }
  }

  Ok(())
}

fn proposal_summary(proposal: &PlanProposal) -> String {
  let mut summary = format!("{}\n", proposal.message);
  for (index, step) in proposal.flow.steps.iter().enumerate() {
    summary.push_str(&format!("  {}. {} ({})\n", index + 1, step.name, step.step_type));
  }
  summary.push_str("(/run to execute this plan)\n");
  summary
}
