//! The change plan handed to callers.
//!
//! A plan is the pipeline's whole output: the validation issues found, the
//! ordered operations (empty when blocked), aggregate counts, and the
//! `applicable` verdict the apply driver gates on.

use serde::Serialize;
use std::fmt;

use crate::diff::{ChangeOp, OpKind};
use crate::error::Error;
use crate::validate::{Severity, ValidationIssue};

/// Aggregate counts over a plan's operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub creates: usize,
    pub alters: usize,
    pub drops: usize,
    pub tag_ops: usize,
    pub destructive: usize,
}

impl PlanSummary {
    pub fn of(ops: &[ChangeOp]) -> Self {
        let mut summary = PlanSummary::default();
        for op in ops {
            match op.kind() {
                OpKind::Create => summary.creates += 1,
                OpKind::Alter | OpKind::ToggleConstraintFlag => summary.alters += 1,
                OpKind::Drop => summary.drops += 1,
                OpKind::SetTag | OpKind::UnsetTag => summary.tag_ops += 1,
            }
            if op.destructive {
                summary.destructive += 1;
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.creates + self.alters + self.drops + self.tag_ops
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} create, {} alter, {} drop, {} tag ({} destructive)",
            self.creates, self.alters, self.drops, self.tag_ops, self.destructive
        )
    }
}

/// An ordered, validated set of changes converging a target onto the desired
/// state.
#[derive(Debug, Clone, Serialize)]
pub struct ChangePlan {
    pub issues: Vec<ValidationIssue>,
    /// Empty when the plan is blocked by ERROR issues.
    pub ops: Vec<ChangeOp>,
    pub summary: PlanSummary,
    pub applicable: bool,
}

impl ChangePlan {
    /// A plan from issues and already-ordered ops. ERROR issues block: the
    /// ops are discarded and the plan marked non-applicable.
    pub fn new(issues: Vec<ValidationIssue>, ops: Vec<ChangeOp>) -> Self {
        let blocked = issues.iter().any(|i| i.severity == Severity::Error);
        let ops = if blocked { Vec::new() } else { ops };
        let summary = PlanSummary::of(&ops);
        ChangePlan {
            issues,
            ops,
            summary,
            applicable: !blocked,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.applicable && self.ops.is_empty()
    }

    /// The gate the apply driver uses before executing anything.
    pub fn ensure_applicable(&self) -> Result<(), Error> {
        if self.applicable {
            Ok(())
        } else {
            Err(Error::Validation {
                issues: self.issues.clone(),
            })
        }
    }
}

impl fmt::Display for ChangePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{issue}")?;
        }
        for op in &self.ops {
            writeln!(f, "{op}")?;
        }
        write!(f, "{}", self.summary)
    }
}
