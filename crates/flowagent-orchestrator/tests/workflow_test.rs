//! Integration tests for workflow runs using scripted capabilities.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flowagent_capability::{
  Capability, CapabilityError, CapabilityKind, CapabilityOutput, CapabilityStream,
};
use flowagent_capability_registry::CapabilityFactory;
use flowagent_config::{Message, RunEvent, TaskStep, WorkflowPlan};
use flowagent_model::BackendError;
use flowagent_orchestrator::{
  ExecutionContext, Orchestrator, OrchestratorError, RunState, StepStatus, ValidationError,
};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Script {
  /// Stream the fragments, then complete with their concatenation.
  Reply(Vec<&'static str>),
  /// Stream the fragments, then fail.
  FailAfter(Vec<&'static str>, &'static str),
  /// Stream the fragments, then never produce anything again.
  Hang(Vec<&'static str>),
  /// Stream the fragments, then end without a final message.
  Truncated(Vec<&'static str>),
  /// Construction itself fails.
  Unconstructible,
}

#[derive(Default)]
struct Counters {
  constructed: AtomicUsize,
  released: AtomicUsize,
  inputs: Mutex<Vec<(String, Vec<Message>)>>,
}

impl Counters {
  fn constructed(&self) -> usize {
    self.constructed.load(Ordering::SeqCst)
  }

  fn released(&self) -> usize {
    self.released.load(Ordering::SeqCst)
  }

  fn input_of(&self, step: &str) -> Vec<Message> {
    self
      .inputs
      .lock()
      .unwrap()
      .iter()
      .find(|(name, _)| name == step)
      .map(|(_, input)| input.clone())
      .unwrap()
  }
}

struct ScriptedFactory {
  scripts: HashMap<String, Script>,
  counters: Arc<Counters>,
}

impl ScriptedFactory {
  fn new(scripts: &[(&str, Script)]) -> (Arc<Self>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let factory = Arc::new(Self {
      scripts: scripts
        .iter()
        .map(|(name, script)| (name.to_string(), script.clone()))
        .collect(),
      counters: counters.clone(),
    });
    (factory, counters)
  }
}

#[async_trait]
impl CapabilityFactory for ScriptedFactory {
  async fn construct(
    &self,
    kind: CapabilityKind,
    step_name: &str,
  ) -> Result<Box<dyn Capability>, CapabilityError> {
    let script = self.scripts[step_name].clone();
    if matches!(script, Script::Unconstructible) {
      return Err(CapabilityError::tool_server("tool-server", "spawn failed"));
    }
    self.counters.constructed.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(ScriptedCapability {
      name: step_name.to_string(),
      kind,
      script,
      counters: self.counters.clone(),
    }))
  }
}

struct ScriptedCapability {
  name: String,
  kind: CapabilityKind,
  script: Script,
  counters: Arc<Counters>,
}

fn fragments(parts: &[&'static str]) -> CapabilityStream {
  let parts: Vec<Result<CapabilityOutput, CapabilityError>> = parts
    .iter()
    .map(|part| Ok(CapabilityOutput::Fragment(part.to_string())))
    .collect();
  Box::pin(stream::iter(parts))
}

#[async_trait]
impl Capability for ScriptedCapability {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> CapabilityKind {
    self.kind
  }

  async fn execute(&mut self, input: Vec<Message>) -> Result<Message, CapabilityError> {
    self.execute_stream(input).await?;
    match &self.script {
      Script::Reply(parts) => Ok(Message::assistant(parts.concat())),
      _ => Err(CapabilityError::MissingCompletion {
        capability: self.name.clone(),
      }),
    }
  }

  async fn execute_stream(
    &mut self,
    input: Vec<Message>,
  ) -> Result<CapabilityStream, CapabilityError> {
    self
      .counters
      .inputs
      .lock()
      .unwrap()
      .push((self.name.clone(), input));

    let stream = match &self.script {
      Script::Reply(parts) => {
        let done = Ok(CapabilityOutput::Completed(Message::assistant(parts.concat())));
        fragments(parts).chain(stream::once(async move { done })).boxed()
      }
      Script::FailAfter(parts, message) => {
        let error = CapabilityError::backend(self.name.clone(), BackendError::rejected(*message));
        fragments(parts)
          .chain(stream::once(async move { Err(error) }))
          .boxed()
      }
      Script::Hang(parts) => fragments(parts).chain(stream::pending()).boxed(),
      Script::Truncated(parts) => fragments(parts),
      Script::Unconstructible => unreachable!(),
    };
    Ok(stream)
  }

  async fn release(&mut self) -> Result<(), CapabilityError> {
    self.counters.released.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

fn plan(steps: &[(&str, &str, &str)]) -> WorkflowPlan {
  WorkflowPlan::new(
    steps
      .iter()
      .map(|(name, tag, instructions)| TaskStep::new(*name, *tag, *instructions))
      .collect(),
  )
}

fn assert_event_balance(events: &[RunEvent]) {
  let starts = events
    .iter()
    .filter(|e| matches!(e, RunEvent::StepStart { .. }))
    .count();
  let ends = events
    .iter()
    .filter(|e| matches!(e, RunEvent::StepEnd { .. } | RunEvent::Failure { .. }))
    .count();
  assert_eq!(starts, ends);
}

#[tokio::test]
async fn test_filesystem_then_assistant_scenario() {
  let (factory, counters) = ScriptedFactory::new(&[
    ("s1", Script::Reply(vec!["a.txt", " b.txt"])),
    ("s2", Script::Reply(vec!["two ", "files"])),
  ]);
  let orchestrator = Orchestrator::new(factory);

  let run = orchestrator
    .submit(
      &plan(&[
        ("s1", "filesystem", "list files in /tmp"),
        ("s2", "assistant", "summarize"),
      ]),
      CancellationToken::new(),
    )
    .unwrap();
  let progress = run.progress().clone();
  let (events, outcome) = run.collect_events().await;
  let outcome = outcome.unwrap();

  assert_eq!(
    events,
    vec![
      RunEvent::step_start("s1"),
      RunEvent::text_delta("a.txt"),
      RunEvent::text_delta(" b.txt"),
      RunEvent::step_end("s1"),
      RunEvent::step_start("s2"),
      RunEvent::text_delta("two "),
      RunEvent::text_delta("files"),
      RunEvent::step_end("s2"),
    ]
  );

  assert_eq!(
    counters.input_of("s2"),
    vec![
      Message::user("list files in /tmp"),
      Message::assistant("a.txt b.txt"),
      Message::user("summarize"),
    ]
  );

  assert_eq!(outcome.final_output(), Some("two files"));
  assert_eq!(outcome.context.len(), 4);
  assert!(outcome.records.iter().all(|r| r.status == StepStatus::Done));
  assert_eq!(outcome.records[0].final_output.as_deref(), Some("a.txt b.txt"));
  assert_eq!(progress.state(), RunState::Completed);
  assert_eq!(counters.constructed(), 2);
  assert_eq!(counters.released(), 2);
}

#[tokio::test]
async fn test_unknown_type_rejected_before_anything_runs() {
  let (factory, counters) = ScriptedFactory::new(&[("s1", Script::Reply(vec!["x"]))]);
  let orchestrator = Orchestrator::new(factory);

  let result = orchestrator.submit(
    &plan(&[("s1", "assistant", "a"), ("s2", "unknown", "b")]),
    CancellationToken::new(),
  );

  assert!(matches!(
    result,
    Err(ValidationError::UnknownCapabilityType { ref step, ref tag })
      if step == "s2" && tag == "unknown"
  ));
  tokio::task::yield_now().await;
  assert_eq!(counters.constructed(), 0);
}

#[tokio::test]
async fn test_failure_mid_stream_stops_the_run() {
  let (factory, counters) = ScriptedFactory::new(&[
    ("s1", Script::FailAfter(vec!["par"], "model overloaded")),
    ("s2", Script::Reply(vec!["never"])),
  ]);
  let orchestrator = Orchestrator::new(factory);

  let run = orchestrator
    .submit(
      &plan(&[("s1", "assistant", "a"), ("s2", "assistant", "b")]),
      CancellationToken::new(),
    )
    .unwrap();
  let progress = run.progress().clone();
  let (events, outcome) = run.collect_events().await;

  assert_eq!(events.len(), 3);
  assert_eq!(events[0], RunEvent::step_start("s1"));
  assert_eq!(events[1], RunEvent::text_delta("par"));
  match &events[2] {
    RunEvent::Failure { step, error } => {
      assert_eq!(step.as_deref(), Some("s1"));
      assert!(error.contains("model overloaded"));
    }
    other => panic!("expected failure, got {other:?}"),
  }
  assert_event_balance(&events);

  assert!(matches!(
    outcome,
    Err(OrchestratorError::Capability { ref step, .. }) if step == "s1"
  ));
  assert!(matches!(progress.state(), RunState::Failed { step_index: 0, .. }));
  let records = progress.records();
  assert_eq!(records[0].status, StepStatus::Failed);
  assert_eq!(records[1].status, StepStatus::Planned);
  assert_eq!(counters.constructed(), 1);
  assert_eq!(counters.released(), 1);
}

#[tokio::test]
async fn test_construction_failure_emits_failure_without_release() {
  let (factory, counters) = ScriptedFactory::new(&[("s1", Script::Unconstructible)]);
  let orchestrator = Orchestrator::new(factory);

  let run = orchestrator
    .submit(&plan(&[("s1", "filesystem", "a")]), CancellationToken::new())
    .unwrap();
  let (events, outcome) = run.collect_events().await;

  assert_eq!(events.len(), 2);
  assert!(matches!(events[1], RunEvent::Failure { .. }));
  assert!(outcome.is_err());
  assert_eq!(counters.released(), 0);
}

#[tokio::test]
async fn test_stream_without_final_message_fails_step() {
  let (factory, counters) = ScriptedFactory::new(&[("s1", Script::Truncated(vec!["half"]))]);
  let orchestrator = Orchestrator::new(factory);

  let run = orchestrator
    .submit(&plan(&[("s1", "assistant", "a")]), CancellationToken::new())
    .unwrap();
  let (events, outcome) = run.collect_events().await;

  assert_event_balance(&events);
  assert!(matches!(
    outcome,
    Err(OrchestratorError::Capability {
      source: CapabilityError::MissingCompletion { .. },
      ..
    })
  ));
  assert_eq!(counters.released(), 1);
}

#[tokio::test]
async fn test_step_k_sees_every_earlier_step() {
  let (factory, counters) = ScriptedFactory::new(&[
    ("s1", Script::Reply(vec!["one"])),
    ("s2", Script::Reply(vec!["two"])),
    ("s3", Script::Reply(vec!["three"])),
  ]);
  let orchestrator = Orchestrator::new(factory);

  let run = orchestrator
    .submit(
      &plan(&[
        ("s1", "websearch", "find"),
        ("s2", "assistant", "compare"),
        ("s3", "filesystem", "save"),
      ]),
      CancellationToken::new(),
    )
    .unwrap();
  let (events, outcome) = run.collect_events().await;
  outcome.unwrap();
  assert_event_balance(&events);

  let input = counters.input_of("s3");
  assert_eq!(
    input,
    vec![
      Message::user("find"),
      Message::assistant("one"),
      Message::user("compare"),
      Message::assistant("two"),
      Message::user("save"),
    ]
  );
}

#[tokio::test]
async fn test_cancellation_releases_in_flight_capability() {
  let (factory, counters) = ScriptedFactory::new(&[
    ("s1", Script::Hang(vec!["x"])),
    ("s2", Script::Reply(vec!["never"])),
  ]);
  let orchestrator = Orchestrator::new(factory);
  let cancel = CancellationToken::new();

  let mut run = orchestrator
    .submit(
      &plan(&[("s1", "assistant", "a"), ("s2", "assistant", "b")]),
      cancel.clone(),
    )
    .unwrap();

  assert_eq!(run.next_event().await, Some(RunEvent::step_start("s1")));
  assert_eq!(run.next_event().await, Some(RunEvent::text_delta("x")));
  cancel.cancel();

  let progress = run.progress().clone();
  assert!(matches!(run.finish().await, Err(OrchestratorError::Cancelled)));
  assert_eq!(progress.state(), RunState::Cancelled);
  assert_eq!(progress.records()[0].status, StepStatus::Failed);
  assert_eq!(counters.constructed(), 1);
  assert_eq!(counters.released(), 1);
}

#[tokio::test]
async fn test_dropping_the_run_cancels_it() {
  let (factory, counters) = ScriptedFactory::new(&[("s1", Script::Hang(vec!["x"]))]);
  let orchestrator = Orchestrator::new(factory);

  let mut run = orchestrator
    .submit(&plan(&[("s1", "assistant", "a")]), CancellationToken::new())
    .unwrap();
  assert_eq!(run.next_event().await, Some(RunEvent::step_start("s1")));
  drop(run);

  tokio::time::timeout(Duration::from_secs(2), async {
    while counters.released() == 0 {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .unwrap();
}

#[tokio::test]
async fn test_runs_are_independent() {
  let (factory, _counters) = ScriptedFactory::new(&[
    ("s1", Script::Reply(vec!["first"])),
    ("s2", Script::Reply(vec!["second"])),
  ]);
  let orchestrator = Orchestrator::new(factory);

  let a = orchestrator
    .submit(&plan(&[("s1", "assistant", "a")]), CancellationToken::new())
    .unwrap();
  let b = orchestrator
    .submit(&plan(&[("s2", "assistant", "b")]), CancellationToken::new())
    .unwrap();
  assert_ne!(a.run_id(), b.run_id());

  let (a, b) = tokio::join!(a.finish(), b.finish());
  assert_eq!(a.unwrap().final_output(), Some("first"));
  assert_eq!(b.unwrap().final_output(), Some("second"));
}

#[tokio::test]
async fn test_execute_step_runs_one_step_without_streaming() {
  let (factory, counters) = ScriptedFactory::new(&[("s2", Script::Reply(vec!["short"]))]);
  let orchestrator = Orchestrator::new(factory);
  let context = ExecutionContext::new().with_step("list", Message::assistant("a.txt"));

  let output = orchestrator
    .execute_step(&TaskStep::new("s2", "assistant", "summarize"), &context)
    .await
    .unwrap();

  assert_eq!(output, Message::assistant("short"));
  assert_eq!(counters.input_of("s2").len(), 3);
  assert_eq!(counters.released(), 1);

  let err = orchestrator
    .execute_step(&TaskStep::new("s9", "nope", ""), &context)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    OrchestratorError::Validation(ValidationError::UnknownCapabilityType { .. })
  ));
}
