//! Stage workflow model
//!
//! An ordered set of named stages. Each stage has exactly one successor
//! except the last. Stages marked `optional` may be skipped: from stage S
//! the allowed next stages are the immediate successor and, while that
//! successor is optional, the stage after it.
//!
//! The workflow is read-only once constructed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const QUEUE_JOIN: &str = "QUEUE_JOIN";
pub const SERVICE_START: &str = "SERVICE_START";
pub const SUBSTANCE_RETURNED: &str = "SUBSTANCE_RETURNED";
pub const EXIT: &str = "EXIT";

/// A single stage definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage identifier (e.g. `QUEUE_JOIN`)
    pub name: String,
    /// Position in the total order; lower comes first
    pub order: u32,
    /// Whether the stage may be skipped without a sequence warning
    #[serde(default)]
    pub optional: bool,
}

impl Stage {
    pub fn new(name: impl Into<String>, order: u32) -> Self {
        Self {
            name: name.into(),
            order,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, order: u32) -> Self {
        Self {
            name: name.into(),
            order,
            optional: true,
        }
    }
}

/// Workflow construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("workflow must contain at least one stage")]
    Empty,

    #[error("duplicate stage name: {0}")]
    DuplicateName(String),

    #[error("duplicate stage order {order} ({first} and {second})")]
    DuplicateOrder {
        order: u32,
        first: String,
        second: String,
    },

    #[error("stage name must not be blank")]
    BlankName,

    #[error("final stage {0} cannot be optional")]
    OptionalFinalStage(String),
}

/// Ordered stage workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageWorkflow {
    /// Stages sorted by `order`
    stages: Vec<Stage>,
}

impl StageWorkflow {
    /// Build a workflow from stage definitions in any order.
    pub fn new(mut stages: Vec<Stage>) -> Result<Self, WorkflowError> {
        if stages.is_empty() {
            return Err(WorkflowError::Empty);
        }
        stages.sort_by_key(|s| s.order);

        for (i, stage) in stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(WorkflowError::BlankName);
            }
            if stages[..i].iter().any(|s| s.name == stage.name) {
                return Err(WorkflowError::DuplicateName(stage.name.clone()));
            }
            if i > 0 && stages[i - 1].order == stage.order {
                return Err(WorkflowError::DuplicateOrder {
                    order: stage.order,
                    first: stages[i - 1].name.clone(),
                    second: stage.name.clone(),
                });
            }
        }

        if let Some(last) = stages.last() {
            if last.optional {
                return Err(WorkflowError::OptionalFinalStage(last.name.clone()));
            }
        }

        Ok(Self { stages })
    }

    /// The default event workflow:
    /// QUEUE_JOIN → SERVICE_START → SUBSTANCE_RETURNED (optional) → EXIT
    pub fn standard() -> Self {
        Self {
            stages: default_stages(),
        }
    }

    /// Stages in workflow order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stage names in workflow order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    pub fn first_stage(&self) -> &str {
        &self.stages[0].name
    }

    pub fn final_stage(&self) -> &str {
        &self.stages[self.stages.len() - 1].name
    }

    pub fn is_final(&self, name: &str) -> bool {
        self.final_stage() == name
    }

    /// The single immediate successor of `name`, if any.
    pub fn next_stage(&self, name: &str) -> Option<&str> {
        let idx = self.position(name)?;
        self.stages.get(idx + 1).map(|s| s.name.as_str())
    }

    /// Stages a token currently at `name` may validly tap next.
    ///
    /// The immediate successor always; further stages only past a run of
    /// optional ones.
    pub fn allowed_next_stages(&self, name: &str) -> Vec<&str> {
        let Some(idx) = self.position(name) else {
            return Vec::new();
        };
        let mut allowed = Vec::new();
        for stage in &self.stages[idx + 1..] {
            allowed.push(stage.name.as_str());
            if !stage.optional {
                break;
            }
        }
        allowed
    }

    /// True if `stage` and `other` are the same or directly follow one
    /// another in either direction.
    pub fn are_adjacent(&self, stage: &str, other: &str) -> bool {
        match (self.position(stage), self.position(other)) {
            (Some(a), Some(b)) => a.abs_diff(b) <= 1,
            _ => false,
        }
    }
}

impl Default for StageWorkflow {
    fn default() -> Self {
        Self::standard()
    }
}

/// Default stage definitions, also used by configuration defaults.
pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new(QUEUE_JOIN, 1),
        Stage::new(SERVICE_START, 2),
        Stage::optional(SUBSTANCE_RETURNED, 3),
        Stage::new(EXIT, 4),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_order() {
        let wf = StageWorkflow::standard();
        assert_eq!(
            wf.stage_names(),
            vec![QUEUE_JOIN, SERVICE_START, SUBSTANCE_RETURNED, EXIT]
        );
        assert_eq!(wf.first_stage(), QUEUE_JOIN);
        assert_eq!(wf.final_stage(), EXIT);
    }

    #[test]
    fn test_sorted_by_order_field() {
        let wf = StageWorkflow::new(vec![
            Stage::new("B", 20),
            Stage::new("A", 10),
            Stage::new("C", 30),
        ])
        .unwrap();
        assert_eq!(wf.stage_names(), vec!["A", "B", "C"]);
        assert_eq!(wf.next_stage("A"), Some("B"));
        assert_eq!(wf.next_stage("C"), None);
    }

    #[test]
    fn test_optional_stage_is_skippable() {
        let wf = StageWorkflow::standard();
        assert_eq!(
            wf.allowed_next_stages(SERVICE_START),
            vec![SUBSTANCE_RETURNED, EXIT]
        );
        assert_eq!(wf.allowed_next_stages(QUEUE_JOIN), vec![SERVICE_START]);
        assert!(wf.allowed_next_stages(EXIT).is_empty());
        assert!(wf.allowed_next_stages("NOPE").is_empty());
    }

    #[test]
    fn test_mandatory_stage_is_not_skippable() {
        let wf = StageWorkflow::new(vec![
            Stage::new(QUEUE_JOIN, 1),
            Stage::new(SERVICE_START, 2),
            Stage::new(SUBSTANCE_RETURNED, 3),
            Stage::new(EXIT, 4),
        ])
        .unwrap();
        assert_eq!(
            wf.allowed_next_stages(SERVICE_START),
            vec![SUBSTANCE_RETURNED]
        );
    }

    #[test]
    fn test_rejects_invalid_definitions() {
        assert_eq!(StageWorkflow::new(vec![]), Err(WorkflowError::Empty));
        assert!(matches!(
            StageWorkflow::new(vec![Stage::new("A", 1), Stage::new("A", 2)]),
            Err(WorkflowError::DuplicateName(_))
        ));
        assert!(matches!(
            StageWorkflow::new(vec![Stage::new("A", 1), Stage::new("B", 1)]),
            Err(WorkflowError::DuplicateOrder { .. })
        ));
        assert!(matches!(
            StageWorkflow::new(vec![Stage::new("A", 1), Stage::optional("B", 2)]),
            Err(WorkflowError::OptionalFinalStage(_))
        ));
    }

    #[test]
    fn test_adjacency() {
        let wf = StageWorkflow::standard();
        assert!(wf.are_adjacent(QUEUE_JOIN, QUEUE_JOIN));
        assert!(wf.are_adjacent(QUEUE_JOIN, SERVICE_START));
        assert!(wf.are_adjacent(SERVICE_START, QUEUE_JOIN));
        assert!(!wf.are_adjacent(QUEUE_JOIN, EXIT));
    }
}
