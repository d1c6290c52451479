//! Narration: human-readable descriptions of upcoming transitions.
//!
//! A second, derived state machine over *pairs* of primary states. Each
//! documented row of the transition table maps to one narration category;
//! classification is a pure function of the state pair (entity count and the
//! fallback result feed only the wording). Unmatched pairs are contract
//! violations, mirroring the transition table itself.

use rand::seq::SliceRandom;

use crate::context::{Context, Entity};
use crate::event::SessionEvent;

use super::agent::Agent;
use super::error::{AgentError, AgentResult};
use super::state::State;

/// One narration category per documented transition-table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationCategory {
    /// First iteration: no previous state yet.
    InitialInput,
    PerceptionMultipleFound,
    PerceptionRetry,
    PerceptionNoEntity,
    PerceptionOneEntity,
    LogicGenerationFresh,
    LogicGenerationWithFeedback,
    LogicReasoningSuccess,
    LogicReasoningSuccessAfterSkip,
    LogicReasoningFailed,
    AnsweringRejected,
}

/// Classify the `(previous, upcoming)` state pair.
///
/// `entity_count` disambiguates the two perception→answering rows: the
/// zero-entity row leaves an empty context behind, the one-entity row does
/// not — the states alone carry identical field shapes when the fallback
/// found something.
pub fn classify(
    prev: Option<&State>,
    next: &State,
    entity_count: usize,
) -> AgentResult<NarrationCategory> {
    use NarrationCategory::*;

    let Some(prev) = prev else {
        return match next {
            State::Perception => Ok(InitialInput),
            other => Err(AgentError::UnknownTransition {
                from: "start".into(),
                to: other.to_string(),
            }),
        };
    };

    match (prev, next) {
        (State::Perception, State::LogicGeneration { .. }) => Ok(PerceptionMultipleFound),
        (State::Perception, State::Perception) => Ok(PerceptionRetry),
        (
            State::Perception,
            State::Answering {
                logic_query: None,
                skip_top: 0,
                ..
            },
        ) => Ok(if entity_count == 0 {
            PerceptionNoEntity
        } else {
            PerceptionOneEntity
        }),
        (
            State::LogicGeneration { feedback: None },
            State::LogicReasoning { skip_top: 0, .. },
        ) => Ok(LogicGenerationFresh),
        (
            State::LogicGeneration { feedback: Some(_) },
            State::LogicReasoning { skip_top: 0, .. },
        ) => Ok(LogicGenerationWithFeedback),
        (State::LogicReasoning { skip_top: 0, .. }, State::Answering { .. }) => {
            Ok(LogicReasoningSuccess)
        }
        (State::LogicReasoning { skip_top, .. }, State::Answering { .. }) if *skip_top > 0 => {
            Ok(LogicReasoningSuccessAfterSkip)
        }
        (State::LogicReasoning { .. }, State::LogicGeneration { .. }) => Ok(LogicReasoningFailed),
        (State::Answering { .. }, State::LogicReasoning { .. }) => Ok(AnsweringRejected),
        (from, to) => Err(AgentError::UnknownTransition {
            from: from.to_string(),
            to: to.to_string(),
        }),
    }
}

// ── Templates ────────────────────────────────────────────────────────────
//
// Several phrasings per category so long sessions don't read like a stuck
// record; one is chosen at random per narration.

const INITIAL_INPUT: &[&str] = &[
    "As requested, I'm starting to look for {query} in the image. First, an initial perception pass.",
    "Let me begin searching for {query}. I'll open with a full perception scan of the scene.",
    "New task: locate {query}. Starting with perception to see what the image contains.",
];

const PERCEPTION_MULTIPLE_FOUND: &[&str] = &[
    "I found {entities} in the image. With this many entities, I need to synthesize logic to pick out the {query}.",
    "Perception turned up {entities}. Multiple objects means I'll generate a logic query to isolate the {query}.",
    "The scene contains {entities}. I'll build reasoning logic to find which one is the {query}.",
];

const PERCEPTION_RETRY: &[&str] = &[
    "Something went wrong during perception. Let me retry it.",
    "The perception pass didn't work as expected. I'll run it again.",
    "Perception hit a transient problem. Retrying.",
];

const PERCEPTION_NO_ENTITY: &[&str] = &[
    "I didn't find any entity in the image. Let me try the fallback method to find the {query}.",
    "The perception pass came up empty. Switching to the fallback detector for the {query}.",
    "No entities detected so far. I'll use the backup approach to look for the {query}.",
];

const FALLBACK_NO_ENTITY: &[&str] = &[
    "Even the fallback method couldn't find the {query} in this image. I'm sorry.",
    "I've exhausted my detection methods without finding the {query}. My apologies.",
    "Despite the backup approach, the {query} doesn't seem to be present. Sorry about that.",
];

const FALLBACK_ONE_ENTITY: &[&str] = &[
    "The fallback method found the {query}. I'll proceed with that result.",
    "Success — the backup detector located the {query}. Using its result.",
    "The fallback approach turned up the {query}. Moving on with this detection.",
];

const PERCEPTION_ONE_ENTITY: &[&str] = &[
    "I found a single entity ({category}) in the image. No need for logic synthesis — let me check whether it's the {query}.",
    "Exactly one entity ({category}) was detected. I can skip reasoning and directly verify it against the {query}.",
    "Just one object here ({category}). I'll verify right away whether it matches the {query}.",
];

const LOGIC_GENERATION_FRESH: &[&str] = &[
    "I now have a logic query. Next, reasoning over the scene to find the {query}.",
    "Logic synthesis succeeded. Time to evaluate it and locate the {query}.",
    "The logic query is ready. I'll run reasoning to pick out the {query}.",
];

const LOGIC_GENERATION_WITH_FEEDBACK: &[&str] = &[
    "With the earlier feedback folded in, I have a new logic query. Running reasoning for the {query} again.",
    "The feedback produced a refined logic query. Let me evaluate it to find the {query}.",
    "Armed with feedback from the failed attempt, I'll reason over the scene for the {query} once more.",
];

const LOGIC_REASONING_SUCCESS: &[&str] = &[
    "Logic reasoning produced a candidate. Let me double-check it before answering.",
    "I have a potential target from reasoning. Running the final verification.",
    "Reasoning found a possible match. One last check to confirm it.",
];

const LOGIC_REASONING_SUCCESS_AFTER_SKIP: &[&str] = &[
    "This time reasoning produced a fresh candidate. Let me verify it.",
    "After skipping the rejected ones, reasoning found another target. Checking it now.",
    "The retry worked — a new candidate came back. On to final verification.",
];

const LOGIC_REASONING_FAILED: &[&str] = &[
    "Reasoning found no target. I'll regenerate the logic query with what I learned.",
    "No candidate came out of logic reasoning. Time to synthesize a new query.",
    "The logic evaluation came up empty. Let me produce fresh logic and try again.",
];

const ANSWERING_REJECTED: &[&str] = &[
    "Final verification failed. Let me try the next reasoning candidate.",
    "That candidate didn't pass the check. Moving on to another one.",
    "Verification rejected the candidate. I'll re-run reasoning, excluding it.",
];

const FINAL_RESULT: &[&str] = &[
    "I found the {query} in the image. The result is {bbox}.",
    "Success — the {query} is located at {bbox}.",
    "Done. The {query} sits at {bbox}.",
];

const NOT_FOUND_RESULT: &[&str] = &[
    "I could not find the {query} in this image.",
    "After every approach, the {query} doesn't appear to be in the image.",
    "No region matching the {query} survived verification.",
];

fn pick(templates: &[&str]) -> String {
    templates
        .choose(&mut rand::thread_rng())
        .expect("template set is non-empty")
        .to_string()
}

// ── Rendering ────────────────────────────────────────────────────────────

/// Thinking/action messages for the upcoming transition of `agent`.
pub fn intermediate_messages(
    agent: &Agent,
    prev: Option<&State>,
) -> AgentResult<Vec<SessionEvent>> {
    render(
        agent.query(),
        agent.memory().context(),
        agent.fallback_result(),
        prev,
        agent.state(),
    )
}

/// Message for the terminal result event.
pub fn final_message(query: &str, entity: Option<&Entity>) -> String {
    match entity {
        Some(entity) => pick(FINAL_RESULT)
            .replace("{query}", query)
            .replace("{bbox}", &format!("{:?}", entity.bbox)),
        None => pick(NOT_FOUND_RESULT).replace("{query}", query),
    }
}

fn render(
    query: &str,
    context: Option<&Context>,
    fallback: Option<&Entity>,
    prev: Option<&State>,
    next: &State,
) -> AgentResult<Vec<SessionEvent>> {
    use NarrationCategory::*;

    let entity_count = context.map(|c| c.entity_count()).unwrap_or(0);
    let category = classify(prev, next, entity_count)?;

    let pair = |templates, action: &str| {
        vec![
            SessionEvent::thinking(pick(templates).replace("{query}", query)),
            SessionEvent::action(action),
        ]
    };

    Ok(match category {
        InitialInput => pair(INITIAL_INPUT, "Run Perception()"),
        PerceptionRetry => pair(PERCEPTION_RETRY, "Run Perception()"),
        PerceptionMultipleFound => {
            let summary = context
                .map(|c| {
                    c.category_counts()
                        .into_iter()
                        .map(|(category, n)| format!("{n} {category}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            vec![
                SessionEvent::thinking(
                    pick(PERCEPTION_MULTIPLE_FOUND)
                        .replace("{entities}", &summary)
                        .replace("{query}", query),
                ),
                SessionEvent::action("Run LogicGeneration()"),
            ]
        }
        PerceptionNoEntity => {
            // The fallback already ran inline during the perception step, so
            // its outcome is narrated here in the same breath.
            let mut messages = pair(PERCEPTION_NO_ENTITY, "Run fallback perception");
            let followup = if fallback.is_none() {
                FALLBACK_NO_ENTITY
            } else {
                FALLBACK_ONE_ENTITY
            };
            messages.push(SessionEvent::thinking(
                pick(followup).replace("{query}", query),
            ));
            messages.push(SessionEvent::action("Run Answering(result=...)"));
            messages
        }
        PerceptionOneEntity => {
            let category = match next {
                State::Answering {
                    candidate: Some(entity),
                    ..
                } => entity.category.clone(),
                _ => String::new(),
            };
            vec![
                SessionEvent::thinking(
                    pick(PERCEPTION_ONE_ENTITY)
                        .replace("{category}", &category)
                        .replace("{query}", query),
                ),
                SessionEvent::action("Run Answering(result=...)"),
            ]
        }
        LogicGenerationFresh => pair(
            LOGIC_GENERATION_FRESH,
            "Run LogicReasoning(logic_query=...)",
        ),
        LogicGenerationWithFeedback => pair(
            LOGIC_GENERATION_WITH_FEEDBACK,
            "Run LogicReasoning(logic_query=...)",
        ),
        LogicReasoningSuccess => pair(LOGIC_REASONING_SUCCESS, "Run Answering(result=...)"),
        LogicReasoningSuccessAfterSkip => pair(
            LOGIC_REASONING_SUCCESS_AFTER_SKIP,
            "Run Answering(result=...)",
        ),
        LogicReasoningFailed => pair(LOGIC_REASONING_FAILED, "Run LogicGeneration(feedback=...)"),
        AnsweringRejected => pair(
            ANSWERING_REJECTED,
            "Run LogicReasoning(logic_query=..., skip_top=...)",
        ),
    })
}
