//! The agent's memory bank: everything one run accumulates across retries.
//!
//! Owned exclusively by one agent, never shared across sessions. Holds the
//! current [`Context`] plus the auxiliary state that survives transitions:
//! the most recent logic query, feedback from failed verification, and the
//! skip counter that excludes already-rejected candidates from the next
//! reasoning pass.

use crate::context::{Attribute, Context, Entity, Relation};
use crate::error::ContextResult;

#[derive(Debug, Default)]
pub struct MemoryBank {
    context: Option<Context>,
    logic_query: Option<String>,
    feedback: Vec<String>,
    skip_top: usize,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one perception result, replacing the context atomically.
    ///
    /// Validation happens before the swap, so a malformed result leaves the
    /// previous context untouched. On retry the old context is discarded in
    /// full — partial merges would let stale entity ids leak into later
    /// relations.
    pub fn record_perception(
        &mut self,
        entities: Vec<Entity>,
        relations: Vec<Relation>,
        attributes: Vec<Attribute>,
    ) -> ContextResult<()> {
        let context = Context::new(entities, relations, attributes)?;
        self.context = Some(context);
        Ok(())
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Immutable copy of the context for external reporting.
    pub fn snapshot(&self) -> Option<Context> {
        self.context.as_ref().map(Context::snapshot)
    }

    /// Store a freshly synthesized logic query. A new query opens a fresh
    /// exclusion window: candidates rejected under the old query don't rank
    /// the same way under the new one, so the skip counter restarts.
    pub fn set_logic_query(&mut self, query: impl Into<String>) {
        self.logic_query = Some(query.into());
        self.skip_top = 0;
    }

    pub fn logic_query(&self) -> Option<&str> {
        self.logic_query.as_deref()
    }

    /// Append feedback from a failed reasoning pass or rejected verification.
    pub fn push_feedback(&mut self, feedback: impl Into<String>) {
        self.feedback.push(feedback.into());
    }

    /// All accumulated feedback joined for the next synthesis attempt, or
    /// `None` if nothing failed yet.
    pub fn combined_feedback(&self) -> Option<String> {
        if self.feedback.is_empty() {
            None
        } else {
            Some(self.feedback.join("\n"))
        }
    }

    pub fn feedback_count(&self) -> usize {
        self.feedback.len()
    }

    /// Count one more rejected candidate; returns the new exclusion count.
    pub fn bump_skip(&mut self) -> usize {
        self.skip_top += 1;
        self.skip_top
    }

    pub fn skip_top(&self) -> usize {
        self.skip_top
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContextError;

    fn entity(id: u64) -> Entity {
        Entity {
            id,
            category: "dog".into(),
            bbox: [0.0, 0.0, 5.0, 5.0],
            bbox_confidence: 0.7,
        }
    }

    #[test]
    fn perception_replaces_context_wholesale() {
        let mut memory = MemoryBank::new();
        memory
            .record_perception(vec![entity(1), entity(2)], vec![], vec![])
            .unwrap();
        assert_eq!(memory.context().unwrap().entity_count(), 2);

        memory
            .record_perception(vec![entity(9)], vec![], vec![])
            .unwrap();
        let ctx = memory.context().unwrap();
        assert_eq!(ctx.entity_count(), 1);
        assert!(ctx.entity(1).is_none());
        assert!(ctx.entity(9).is_some());
    }

    #[test]
    fn invalid_perception_leaves_old_context_intact() {
        let mut memory = MemoryBank::new();
        memory
            .record_perception(vec![entity(1)], vec![], vec![])
            .unwrap();

        let result = memory.record_perception(
            vec![entity(2)],
            vec![Relation {
                subject_entity_id: 2,
                object_entity_id: 404,
                relation_name: "near".into(),
            }],
            vec![],
        );
        assert!(matches!(
            result.unwrap_err(),
            ContextError::DanglingRelation { .. }
        ));
        // The previous context is still there.
        assert!(memory.context().unwrap().entity(1).is_some());
    }

    #[test]
    fn new_logic_query_resets_skip_counter() {
        let mut memory = MemoryBank::new();
        memory.set_logic_query("above(dog, sofa)");
        assert_eq!(memory.bump_skip(), 1);
        assert_eq!(memory.bump_skip(), 2);

        memory.set_logic_query("left_of(dog, cat)");
        assert_eq!(memory.skip_top(), 0);
        assert_eq!(memory.logic_query(), Some("left_of(dog, cat)"));
    }

    #[test]
    fn feedback_accumulates_in_order() {
        let mut memory = MemoryBank::new();
        assert!(memory.combined_feedback().is_none());

        memory.push_feedback("no candidate matched");
        memory.push_feedback("candidate 3 rejected: wrong color");
        assert_eq!(
            memory.combined_feedback().unwrap(),
            "no candidate matched\ncandidate 3 rejected: wrong color"
        );
        assert_eq!(memory.feedback_count(), 2);
    }

    #[test]
    fn snapshot_is_independent_of_later_replacement() {
        let mut memory = MemoryBank::new();
        memory
            .record_perception(vec![entity(1)], vec![], vec![])
            .unwrap();
        let snapshot = memory.snapshot().unwrap();

        memory
            .record_perception(vec![entity(2)], vec![], vec![])
            .unwrap();
        assert!(snapshot.entity(1).is_some());
        assert!(snapshot.entity(2).is_none());
    }
}
