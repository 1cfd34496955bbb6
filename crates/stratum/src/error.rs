use thiserror::Error;

use crate::inspect::InspectError;
use crate::validate::{Severity, ValidationIssue};

/// Errors the planning pipeline can surface to the caller.
///
/// None of these are retried internally; retry policy belongs to the external
/// inspection/execution collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// The desired state has structural problems. Diffing never ran.
    #[error("desired state failed validation ({} error(s))", .issues.iter().filter(|i| i.severity == Severity::Error).count())]
    Validation { issues: Vec<ValidationIssue> },

    /// Fetching the observed state failed. This is never conflated with
    /// absence: an unreachable entity must not turn into a CREATE.
    #[error("inspection failed: {0}")]
    Inspection(#[from] InspectError),

    /// The change set cannot be ordered. Lists the participating entities.
    #[error("dependency cycle detected, cannot order: {}", .members.join(" -> "))]
    DependencyCycle { members: Vec<String> },
}
