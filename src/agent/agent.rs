//! The agent: one (image, query) task coupled to its state and memory bank.
//!
//! [`Agent::step`] performs exactly one state transition: it invokes the
//! capability the current state calls for, updates the memory bank from that
//! result, and either advances to a fresh state or yields the terminal
//! result. The full transition table lives here; any (state, outcome) pair
//! outside it fails loudly instead of defaulting.

use std::sync::Arc;

use crate::capability::{CapabilitySuite, ImageRef, Metered};
use crate::config::EngineConfig;
use crate::context::Entity;
use crate::cost::COST;

use super::error::{AgentError, AgentResult};
use super::memory::MemoryBank;
use super::state::{State, StateTag};

/// What one call to [`Agent::step`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The agent advanced to its next state.
    Continue,
    /// The run terminated: a confirmed entity, or `None` when the target was
    /// not found.
    Finished(Option<Entity>),
}

/// Retry and iteration caps for one run, copied out of [`EngineConfig`].
#[derive(Debug, Clone, Copy)]
struct RunBudgets {
    perception_retries: usize,
    feedback_rounds: usize,
    steps: usize,
}

/// An autonomous visual-grounding agent for a single task.
///
/// Created once per task and destroyed when its run terminates (success,
/// exhaustion, or external stop). The memory bank is owned exclusively —
/// nothing is shared with other agents.
pub struct Agent {
    image: ImageRef,
    query: String,
    state: State,
    memory: MemoryBank,
    fallback_result: Option<Entity>,
    suite: Arc<CapabilitySuite>,
    budgets: RunBudgets,
    perception_retries: usize,
    generation_rounds: usize,
    steps_taken: usize,
}

impl Agent {
    /// Create an agent in the initial [`State::Perception`] state.
    pub fn new(
        image: ImageRef,
        query: impl Into<String>,
        suite: Arc<CapabilitySuite>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            image,
            query: query.into(),
            state: State::Perception,
            memory: MemoryBank::new(),
            fallback_result: None,
            suite,
            budgets: RunBudgets {
                perception_retries: config.max_perception_retries,
                feedback_rounds: config.max_feedback_rounds,
                steps: config.max_steps,
            },
            perception_retries: 0,
            generation_rounds: 0,
            steps_taken: 0,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn memory(&self) -> &MemoryBank {
        &self.memory
    }

    /// Result of the inline fallback perception, if it ran.
    pub fn fallback_result(&self) -> Option<&Entity> {
        self.fallback_result.as_ref()
    }

    /// Execute the current state's capability and advance.
    pub fn step(&mut self) -> AgentResult<StepOutcome> {
        self.steps_taken += 1;
        if self.steps_taken > self.budgets.steps {
            return Err(AgentError::BudgetExhausted {
                budget: "run step",
                limit: self.budgets.steps,
            });
        }

        tracing::debug!(state = %self.state, step = self.steps_taken, "executing step");

        match self.state.clone() {
            State::Perception => self.step_perception(),
            State::LogicGeneration { feedback } => self.step_logic_generation(feedback.as_deref()),
            State::LogicReasoning {
                logic_query,
                skip_top,
            } => self.step_logic_reasoning(&logic_query, skip_top),
            State::Answering {
                candidate,
                logic_query,
                skip_top,
            } => self.step_answering(candidate, logic_query, skip_top),
        }
    }

    /// Drive the agent until it terminates. Used by the CLI and batch
    /// runner; sessions step manually so they can narrate between steps.
    pub fn run(&mut self) -> AgentResult<Option<Entity>> {
        loop {
            if let StepOutcome::Finished(result) = self.step()? {
                return Ok(result);
            }
        }
    }

    fn step_perception(&mut self) -> AgentResult<StepOutcome> {
        let output = match self.suite.perceiver.perceive(&self.image) {
            Ok(metered) => metered,
            Err(err) => {
                // Transient by contract: retry until the budget runs out.
                self.perception_retries += 1;
                if self.perception_retries > self.budgets.perception_retries {
                    tracing::error!(error = %err, "perception retry budget exhausted");
                    return Err(AgentError::BudgetExhausted {
                        budget: "perception retry",
                        limit: self.budgets.perception_retries,
                    });
                }
                tracing::warn!(
                    error = %err,
                    retry = self.perception_retries,
                    "perception failed, retrying"
                );
                self.state = State::Perception;
                return Ok(StepOutcome::Continue);
            }
        };

        COST.record(&output.usage);
        let perceived = output.value;
        self.memory.record_perception(
            perceived.entities,
            perceived.relations,
            perceived.attributes,
        )?;

        let entity_count = self
            .memory
            .context()
            .map(|c| c.entity_count())
            .unwrap_or(0);

        match entity_count {
            0 => {
                // Fallback perception runs inline; its result, possibly
                // absent, becomes the candidate.
                let Metered { value, usage } =
                    self.suite.fallback.locate(&self.image, &self.query)?;
                COST.record(&usage);
                self.fallback_result = value.clone();
                self.state = State::Answering {
                    candidate: value,
                    logic_query: None,
                    skip_top: 0,
                };
            }
            1 => {
                // Single-entity scenes skip logic synthesis entirely.
                let candidate = self
                    .memory
                    .context()
                    .and_then(|c| c.sole_entity())
                    .cloned();
                self.state = State::Answering {
                    candidate,
                    logic_query: None,
                    skip_top: 0,
                };
            }
            n => {
                tracing::debug!(entities = n, "multi-entity scene, synthesizing logic");
                self.state = State::LogicGeneration { feedback: None };
            }
        }
        Ok(StepOutcome::Continue)
    }

    fn step_logic_generation(&mut self, feedback: Option<&str>) -> AgentResult<StepOutcome> {
        self.generation_rounds += 1;
        if self.generation_rounds > self.budgets.feedback_rounds {
            return Err(AgentError::BudgetExhausted {
                budget: "logic synthesis",
                limit: self.budgets.feedback_rounds,
            });
        }

        let context = self.memory.context().ok_or(AgentError::MissingContext {
            state: StateTag::LogicGeneration,
        })?;
        let Metered { value, usage } = self.suite.generator.generate(&self.query, context, feedback)?;
        COST.record(&usage);

        self.memory.set_logic_query(value.clone());
        self.state = State::LogicReasoning {
            logic_query: value,
            skip_top: 0,
        };
        Ok(StepOutcome::Continue)
    }

    fn step_logic_reasoning(
        &mut self,
        logic_query: &str,
        skip_top: usize,
    ) -> AgentResult<StepOutcome> {
        let context = self.memory.context().ok_or(AgentError::MissingContext {
            state: StateTag::LogicReasoning,
        })?;
        let Metered { value, usage } = self.suite.reasoner.reason(logic_query, context, skip_top)?;
        COST.record(&usage);

        match value {
            Some(candidate) => {
                self.state = State::Answering {
                    candidate: Some(candidate),
                    logic_query: Some(logic_query.to_string()),
                    skip_top,
                };
            }
            None => {
                // Synthesis is redone with the accumulated failure feedback.
                self.memory.push_feedback(format!(
                    "logic query {logic_query:?} produced no candidate (skip_top {skip_top})"
                ));
                self.state = State::LogicGeneration {
                    feedback: self.memory.combined_feedback(),
                };
            }
        }
        Ok(StepOutcome::Continue)
    }

    fn step_answering(
        &mut self,
        candidate: Option<Entity>,
        logic_query: Option<String>,
        skip_top: usize,
    ) -> AgentResult<StepOutcome> {
        // Fallback perception found nothing: the target is not in the image.
        let Some(candidate) = candidate else {
            return Ok(StepOutcome::Finished(None));
        };

        let context = self.memory.context().ok_or(AgentError::MissingContext {
            state: StateTag::Answering,
        })?;
        let Metered { value: verdict, usage } =
            self.suite.answerer.verify(&candidate, &self.query, context)?;
        COST.record(&usage);

        if verdict.confirmed {
            return Ok(StepOutcome::Finished(Some(candidate)));
        }

        self.memory.push_feedback(
            verdict
                .reason
                .unwrap_or_else(|| format!("candidate #{} rejected by verification", candidate.id)),
        );

        match logic_query {
            Some(query) => {
                // The next reasoning pass must exclude this candidate too.
                self.memory.bump_skip();
                self.state = State::LogicReasoning {
                    logic_query: query,
                    skip_top: skip_top + 1,
                };
                Ok(StepOutcome::Continue)
            }
            // No logic to re-run on the single-entity and fallback paths:
            // the only candidate was rejected, so the target is not found.
            None => Ok(StepOutcome::Finished(None)),
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("image", &self.image)
            .field("query", &self.query)
            .field("state", &self.state)
            .field("steps_taken", &self.steps_taken)
            .finish_non_exhaustive()
    }
}
