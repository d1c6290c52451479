//! Session manager: concurrent agent runs with streamed reasoning.
//!
//! Each session maps an opaque id to one running [`Agent`], one event
//! channel, and one transition history. A session is a single-writer task:
//! the driver loop alone touches the agent, and observers see it only
//! through [`SessionEvent`]s. Capability calls are the only suspension
//! points; they run on blocking threads so many sessions interleave freely.
//!
//! Event publication is best effort — a slow or disconnected observer never
//! stalls the driving loop. Within one session, narration and state
//! snapshots are delivered strictly before the step that realizes them, and
//! the terminal result plus context snapshot exactly once, before teardown.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use miette::Diagnostic;
use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::agent::{Agent, State, StateTag, StepOutcome, narrate};
use crate::capability::{CapabilitySuite, ImageRef};
use crate::config::EngineConfig;
use crate::event::SessionEvent;

// ── Errors ───────────────────────────────────────────────────────────────

/// Errors specific to session lifecycle management.
#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error("session \"{session_id}\" is already active")]
    #[diagnostic(
        code(vantage::session::duplicate),
        help("Stop the existing session first, or create one under a fresh id.")
    )]
    DuplicateSession { session_id: String },

    #[error("session not found: \"{session_id}\"")]
    #[diagnostic(
        code(vantage::session::not_found),
        help("The session was never created, or it already terminated and was reaped.")
    )]
    SessionNotFound { session_id: String },

    #[error("session \"{session_id}\" is already being driven")]
    #[diagnostic(
        code(vantage::session::already_driving),
        help("drive() may be called once per session; subscribe() to observe it.")
    )]
    AlreadyDriving { session_id: String },
}

/// Convenience alias for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;

// ── Manager ──────────────────────────────────────────────────────────────

/// Events buffered per session before slow observers start losing them.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct SessionHandle {
    events: broadcast::Sender<SessionEvent>,
    stop: watch::Sender<bool>,
    /// Taken by `drive()`; a session is driven at most once.
    agent: Mutex<Option<Agent>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the collection of concurrently running agents.
///
/// Sessions never share agents or knowledge stores with each other; the
/// process-wide cost ledger is the only state they all touch.
pub struct SessionManager {
    /// Shared with driver tasks so terminal runs can reap themselves.
    sessions: Arc<DashMap<String, Arc<SessionHandle>>>,
    suite: Arc<CapabilitySuite>,
    config: EngineConfig,
}

impl SessionManager {
    pub fn new(suite: Arc<CapabilitySuite>, config: EngineConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            suite,
            config,
        }
    }

    /// A fresh random session id for transport layers that don't bring
    /// their own.
    pub fn random_session_id() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect()
    }

    /// Allocate an agent in the initial state under `session_id`.
    ///
    /// Fails if the id is already active — the caller must stop it first.
    pub fn create(&self, session_id: &str, image: ImageRef, query: &str) -> SessionResult<()> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(SessionError::DuplicateSession {
                session_id: session_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let agent = Agent::new(image, query, Arc::clone(&self.suite), &self.config);
                let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
                let (stop, _) = watch::channel(false);
                slot.insert(Arc::new(SessionHandle {
                    events,
                    stop,
                    agent: Mutex::new(Some(agent)),
                    driver: Mutex::new(None),
                }));
                tracing::info!(session = session_id, query, "session created");
                Ok(())
            }
        }
    }

    /// Subscribe to a session's event stream.
    pub fn subscribe(&self, session_id: &str) -> SessionResult<broadcast::Receiver<SessionEvent>> {
        Ok(self.handle(session_id)?.events.subscribe())
    }

    /// Spawn the driver task that steps the agent to completion,
    /// publishing narration and state snapshots ahead of every step.
    pub fn drive(&self, session_id: &str) -> SessionResult<()> {
        let handle = self.handle(session_id)?;
        let agent = handle
            .agent
            .lock()
            .expect("agent slot lock")
            .take()
            .ok_or_else(|| SessionError::AlreadyDriving {
                session_id: session_id.to_string(),
            })?;

        let sessions = Arc::clone(&self.sessions);
        let task_handle = Arc::clone(&handle);
        let id = session_id.to_string();
        let task = tokio::spawn(async move {
            drive_loop(sessions, id, task_handle, agent).await;
        });
        *handle.driver.lock().expect("driver slot lock") = Some(task);
        Ok(())
    }

    /// Cooperatively stop a session: publish a cancellation event, raise the
    /// stop flag, and tear the session down. An in-flight capability call is
    /// not interrupted — the driver observes the flag between steps.
    pub fn stop(&self, session_id: &str) -> SessionResult<()> {
        let handle = self.handle(session_id)?;
        // Published before the flag goes up so observers see the cancellation.
        let _ = handle
            .events
            .send(SessionEvent::error("stopped", "execution stopped by user"));
        let _ = handle.stop.send(true);
        tracing::info!(session = session_id, "session stopped");
        self.teardown(session_id);
        Ok(())
    }

    /// Release the event channel, agent, and history. Idempotent.
    pub fn teardown(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            tracing::debug!(session = session_id, "session torn down");
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn handle(&self, session_id: &str) -> SessionResult<Arc<SessionHandle>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("active_sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

// ── Driver loop ──────────────────────────────────────────────────────────

/// Publish unless the session was stopped; failures (no observers) are
/// logged and swallowed — the run proceeds regardless.
fn publish(handle: &SessionHandle, stop_rx: &watch::Receiver<bool>, event: SessionEvent) {
    if *stop_rx.borrow() {
        return;
    }
    if handle.events.send(event).is_err() {
        tracing::trace!("no observers for session event, dropping");
    }
}

async fn drive_loop(
    sessions: Arc<DashMap<String, Arc<SessionHandle>>>,
    session_id: String,
    handle: Arc<SessionHandle>,
    mut agent: Agent,
) {
    let stop_rx = handle.stop.subscribe();
    let mut prev: Option<State> = None;
    let mut history: Vec<StateTag> = Vec::new();
    let mut current: Option<StateTag> = None;

    loop {
        if *stop_rx.borrow() {
            tracing::info!(session = %session_id, "stop observed between steps");
            break;
        }

        // Narrate the upcoming transition. An unmatched state pair is a
        // contract violation and kills this run only.
        match narrate::intermediate_messages(&agent, prev.as_ref()) {
            Ok(messages) => {
                for message in messages {
                    publish(&handle, &stop_rx, message);
                }
            }
            Err(err) => {
                tracing::error!(session = %session_id, error = %err, "narration contract violation");
                publish(
                    &handle,
                    &stop_rx,
                    SessionEvent::error("contract", err.to_string()),
                );
                break;
            }
        }

        // State snapshot, delivered strictly before the step realizing it.
        if let Some(tag) = current {
            history.push(tag);
        }
        current = Some(agent.state().tag());
        publish(
            &handle,
            &stop_rx,
            SessionEvent::StateInfo {
                current_state: current,
                history: history.clone(),
            },
        );

        prev = Some(agent.state().clone());

        // The step blocks on model calls; keep it off the async workers.
        let step_result = tokio::task::spawn_blocking(move || {
            let outcome = agent.step();
            (agent, outcome)
        })
        .await;

        let outcome = match step_result {
            Ok((returned, outcome)) => {
                agent = returned;
                outcome
            }
            Err(join_err) => {
                tracing::error!(session = %session_id, error = %join_err, "step task failed");
                publish(
                    &handle,
                    &stop_rx,
                    SessionEvent::error("panic", join_err.to_string()),
                );
                break;
            }
        };

        match outcome {
            Ok(StepOutcome::Continue) => {}
            Ok(StepOutcome::Finished(result)) => {
                let content = narrate::final_message(agent.query(), result.as_ref());
                publish(
                    &handle,
                    &stop_rx,
                    SessionEvent::Result {
                        entity: result,
                        content,
                    },
                );

                if let Some(tag) = current {
                    history.push(tag);
                }
                history.push(StateTag::Output);
                publish(
                    &handle,
                    &stop_rx,
                    SessionEvent::StateInfo {
                        current_state: Some(StateTag::Output),
                        history: history.clone(),
                    },
                );

                if let Some(context) = agent.memory().snapshot() {
                    publish(&handle, &stop_rx, SessionEvent::Context { context });
                }
                break;
            }
            Err(err) => {
                // Run-level failure: report it on this session's stream and
                // leave every other session untouched.
                tracing::error!(session = %session_id, error = %err, "run failed");
                publish(
                    &handle,
                    &stop_rx,
                    SessionEvent::error("run_failed", err.to_string()),
                );
                break;
            }
        }
    }

    if sessions.remove(&session_id).is_some() {
        tracing::debug!(session = %session_id, "session reaped after terminal state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{
        Answerer, CapabilityError, CapabilityResult, FallbackPerceiver, LogicGenerator,
        LogicReasoner, Metered, Perceiver, PerceptionOutput, Verdict,
    };
    use crate::context::{Context, Entity};
    use std::time::Duration;

    fn entity(id: u64, category: &str) -> Entity {
        Entity {
            id,
            category: category.into(),
            bbox: [0.0, 0.0, 10.0, 10.0],
            bbox_confidence: 0.9,
        }
    }

    /// Suite whose perception always finds one entity and whose answerer
    /// always confirms; optionally sleeps to simulate model latency.
    struct OneShotSuite {
        delay: Duration,
        fail_generation: bool,
        entities: Vec<Entity>,
    }

    impl Perceiver for OneShotSuite {
        fn perceive(&self, _: &ImageRef) -> CapabilityResult<Metered<PerceptionOutput>> {
            std::thread::sleep(self.delay);
            Ok(Metered::free(PerceptionOutput {
                entities: self.entities.clone(),
                relations: vec![],
                attributes: vec![],
            }))
        }
    }
    impl FallbackPerceiver for OneShotSuite {
        fn locate(&self, _: &ImageRef, _: &str) -> CapabilityResult<Metered<Option<Entity>>> {
            Ok(Metered::free(None))
        }
    }
    impl LogicGenerator for OneShotSuite {
        fn generate(&self, _: &str, _: &Context, _: Option<&str>) -> CapabilityResult<Metered<String>> {
            if self.fail_generation {
                Err(CapabilityError::Failed {
                    capability: "logic_generation".into(),
                    message: "model crashed".into(),
                })
            } else {
                Ok(Metered::free("pick_first".into()))
            }
        }
    }
    impl LogicReasoner for OneShotSuite {
        fn reason(&self, _: &str, ctx: &Context, _: usize) -> CapabilityResult<Metered<Option<Entity>>> {
            Ok(Metered::free(ctx.entities().next().cloned()))
        }
    }
    impl Answerer for OneShotSuite {
        fn verify(&self, _: &Entity, _: &str, _: &Context) -> CapabilityResult<Metered<Verdict>> {
            Ok(Metered::free(Verdict {
                confirmed: true,
                reason: None,
            }))
        }
    }

    fn manager_with(
        delay: Duration,
        fail_generation: bool,
        entities: Vec<Entity>,
    ) -> Arc<SessionManager> {
        let make = || OneShotSuite {
            delay,
            fail_generation,
            entities: entities.clone(),
        };
        let suite = CapabilitySuite {
            perceiver: Box::new(make()),
            fallback: Box::new(make()),
            generator: Box::new(make()),
            reasoner: Box::new(make()),
            answerer: Box::new(make()),
        };
        Arc::new(SessionManager::new(
            Arc::new(suite),
            EngineConfig::default(),
        ))
    }

    async fn collect_events(
        mut rx: broadcast::Receiver<SessionEvent>,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(event)) => events.push(event),
                Ok(Err(_)) | Err(_) => break,
            }
        }
        events
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let manager = manager_with(Duration::ZERO, false, vec![entity(1, "dog")]);
        manager
            .create("s-1", ImageRef("/tmp/a.jpg".into()), "the dog")
            .unwrap();
        let err = manager
            .create("s-1", ImageRef("/tmp/a.jpg".into()), "the dog")
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateSession { .. }));
    }

    #[tokio::test]
    async fn single_entity_session_streams_ordered_events() {
        let manager = manager_with(Duration::ZERO, false, vec![entity(1, "dog")]);
        manager
            .create("s-1", ImageRef("/tmp/a.jpg".into()), "the dog")
            .unwrap();
        let rx = manager.subscribe("s-1").unwrap();
        manager.drive("s-1").unwrap();

        let events = collect_events(rx).await;

        // Iteration 1: initial narration pair + Perception snapshot.
        assert!(matches!(events[0], SessionEvent::Thinking { .. }));
        assert!(matches!(events[1], SessionEvent::Action { .. }));
        assert_eq!(
            events[2],
            SessionEvent::StateInfo {
                current_state: Some(StateTag::Perception),
                history: vec![],
            }
        );
        // Iteration 2: one-entity narration pair + Answering snapshot.
        assert!(matches!(events[3], SessionEvent::Thinking { .. }));
        assert!(matches!(events[4], SessionEvent::Action { .. }));
        assert_eq!(
            events[5],
            SessionEvent::StateInfo {
                current_state: Some(StateTag::Answering),
                history: vec![StateTag::Perception],
            }
        );
        // Terminal: result, Output snapshot, context — exactly once, in order.
        match &events[6] {
            SessionEvent::Result { entity: Some(e), .. } => assert_eq!(e.id, 1),
            other => panic!("expected result, got {other:?}"),
        }
        assert_eq!(
            events[7],
            SessionEvent::StateInfo {
                current_state: Some(StateTag::Output),
                history: vec![StateTag::Perception, StateTag::Answering, StateTag::Output],
            }
        );
        assert!(matches!(events[8], SessionEvent::Context { .. }));
        assert_eq!(events.len(), 9);

        // Terminal implies teardown.
        assert!(!manager.is_active("s-1"));
    }

    #[tokio::test]
    async fn capability_failure_aborts_only_that_session() {
        let failing = manager_with(
            Duration::ZERO,
            true,
            vec![entity(1, "dog"), entity(2, "cat")],
        );
        failing
            .create("bad", ImageRef("/tmp/a.jpg".into()), "the dog")
            .unwrap();
        let rx = failing.subscribe("bad").unwrap();
        failing.drive("bad").unwrap();

        let events = collect_events(rx).await;
        assert!(
            events
                .iter()
                .any(|e| matches!(e, SessionEvent::Error { code, .. } if code == "run_failed"))
        );
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, SessionEvent::Result { .. }))
        );

        // The manager survives and can run another session.
        failing
            .create("good", ImageRef("/tmp/b.jpg".into()), "the cat")
            .unwrap();
        assert!(failing.is_active("good"));
    }

    #[tokio::test]
    async fn stop_suppresses_further_events() {
        // Slow perception keeps the driver in-flight while we stop.
        let manager = manager_with(Duration::from_millis(200), false, vec![entity(1, "dog")]);
        manager
            .create("s-1", ImageRef("/tmp/a.jpg".into()), "the dog")
            .unwrap();
        let rx = manager.subscribe("s-1").unwrap();
        manager.drive("s-1").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.stop("s-1").unwrap();
        assert!(!manager.is_active("s-1"));

        let events = collect_events(rx).await;
        let stop_index = events
            .iter()
            .position(|e| matches!(e, SessionEvent::Error { code, .. } if code == "stopped"))
            .expect("cancellation event published");
        // Nothing after the cancellation: no result, no context.
        assert!(events[stop_index + 1..].is_empty());
    }

    #[tokio::test]
    async fn stopping_one_session_leaves_others_running() {
        let manager = manager_with(Duration::from_millis(100), false, vec![entity(1, "dog")]);
        manager
            .create("a", ImageRef("/tmp/a.jpg".into()), "the dog")
            .unwrap();
        manager
            .create("b", ImageRef("/tmp/b.jpg".into()), "the dog")
            .unwrap();
        let rx_b = manager.subscribe("b").unwrap();
        manager.drive("a").unwrap();
        manager.drive("b").unwrap();

        manager.stop("a").unwrap();

        let events = collect_events(rx_b).await;
        assert!(
            events
                .iter()
                .any(|e| matches!(e, SessionEvent::Result { .. })),
            "session b still completed"
        );
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let manager = manager_with(Duration::ZERO, false, vec![entity(1, "dog")]);
        manager
            .create("s-1", ImageRef("/tmp/a.jpg".into()), "the dog")
            .unwrap();
        manager.teardown("s-1");
        manager.teardown("s-1");
        assert!(!manager.is_active("s-1"));

        // The id is reusable after teardown.
        manager
            .create("s-1", ImageRef("/tmp/a.jpg".into()), "the dog")
            .unwrap();
    }

    #[tokio::test]
    async fn drive_twice_is_rejected() {
        let manager = manager_with(Duration::from_millis(50), false, vec![entity(1, "dog")]);
        manager
            .create("s-1", ImageRef("/tmp/a.jpg".into()), "the dog")
            .unwrap();
        manager.drive("s-1").unwrap();
        let err = manager.drive("s-1").unwrap_err();
        assert!(matches!(err, SessionError::AlreadyDriving { .. }));
    }

    #[test]
    fn random_session_ids_are_distinct() {
        let a = SessionManager::random_session_id();
        let b = SessionManager::random_session_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
