//! Ordered application of a plan through an external executor.
//!
//! The core does not run DDL. A collaborator implements [`ChangeExecutor`];
//! [`apply`] drives it over the plan's operations in order, gating destructive
//! operations behind an explicit opt-in. All gating happens before the first
//! side effect.

use async_trait::async_trait;
use thiserror::Error;

use crate::diff::ChangeOp;
use crate::plan::ChangePlan;
use crate::validate::{Severity, ValidationIssue};

/// Failure executing one operation against the target.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExecuteError {
    pub message: String,
}

impl ExecuteError {
    pub fn new(message: impl Into<String>) -> Self {
        ExecuteError {
            message: message.into(),
        }
    }
}

/// Applies one structured operation to a live target.
#[async_trait]
pub trait ChangeExecutor: Send + Sync {
    async fn execute(&self, op: &ChangeOp) -> Result<(), ExecuteError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Without this, a plan containing any destructive op is refused before
    /// anything runs.
    pub allow_destructive: bool,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    /// The plan was blocked by validation; nothing ran.
    #[error("plan is not applicable: {} blocking issue(s)", .issues.iter().filter(|i| i.severity == Severity::Error).count())]
    Blocked { issues: Vec<ValidationIssue> },

    /// The plan contains destructive ops and the caller did not opt in;
    /// nothing ran.
    #[error("plan contains {count} destructive op(s), refusing without explicit opt-in")]
    DestructiveNotAllowed { count: usize },

    /// An op failed mid-drive. `applied` ops before it took effect; the
    /// caller decides whether to re-plan or roll forward.
    #[error("op {index} ({op}) failed after {applied} applied: {source}")]
    Execution {
        index: usize,
        op: String,
        applied: usize,
        #[source]
        source: ExecuteError,
    },
}

/// Number of operations successfully applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
}

/// Drive `executor` over the plan's ops in order.
pub async fn apply(
    plan: &ChangePlan,
    executor: &dyn ChangeExecutor,
    options: ApplyOptions,
) -> Result<ApplyReport, ApplyError> {
    if plan.ensure_applicable().is_err() {
        return Err(ApplyError::Blocked {
            issues: plan.issues.clone(),
        });
    }

    if !options.allow_destructive && plan.summary.destructive > 0 {
        return Err(ApplyError::DestructiveNotAllowed {
            count: plan.summary.destructive,
        });
    }

    for (index, op) in plan.ops.iter().enumerate() {
        tracing::info!(%op, index, "applying");
        executor
            .execute(op)
            .await
            .map_err(|source| ApplyError::Execution {
                index,
                op: op.to_string(),
                applied: index,
                source,
            })?;
    }

    tracing::info!(applied = plan.ops.len(), "plan applied");
    Ok(ApplyReport {
        applied: plan.ops.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::order::order;
    use std::sync::Mutex;
    use stratum_model::{Catalog, Column, Schema, Table};

    /// Records executed ops; fails on any op whose rendered form contains
    /// `fail_on`.
    struct RecordingExecutor {
        log: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            RecordingExecutor {
                log: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn executed(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChangeExecutor for RecordingExecutor {
        async fn execute(&self, op: &ChangeOp) -> Result<(), ExecuteError> {
            let rendered = op.to_string();
            if let Some(needle) = &self.fail_on {
                if rendered.contains(needle.as_str()) {
                    return Err(ExecuteError::new(format!("target rejected: {rendered}")));
                }
            }
            self.log.lock().unwrap().push(rendered);
            Ok(())
        }
    }

    fn make_catalog(tables: Vec<Table>) -> Catalog {
        let mut catalog = Catalog::new("prod");
        let mut schema = Schema::new("sales");
        schema.tables = tables;
        catalog.schemas.push(schema);
        catalog
    }

    fn plan_between(desired: &Catalog, observed: &Catalog) -> ChangePlan {
        ChangePlan::new(Vec::new(), order(diff(desired, Some(observed))).unwrap())
    }

    #[tokio::test]
    async fn test_destructive_plan_refused_without_opt_in() {
        let desired = make_catalog(vec![]);
        let observed = make_catalog(vec![Table::new("orders")]);
        let plan = plan_between(&desired, &observed);
        let executor = RecordingExecutor::new();

        let err = apply(&plan, &executor, ApplyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplyError::DestructiveNotAllowed { count: 1 }
        ));
        // Refused before any side effect.
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn test_destructive_plan_runs_with_opt_in() {
        let desired = make_catalog(vec![]);
        let observed = make_catalog(vec![Table::new("orders")]);
        let plan = plan_between(&desired, &observed);
        let executor = RecordingExecutor::new();

        let report = apply(
            &plan,
            &executor,
            ApplyOptions {
                allow_destructive: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(executor.executed(), vec!["- table prod.sales.orders"]);
    }

    #[tokio::test]
    async fn test_ops_execute_in_plan_order() {
        let mut table = Table::new("orders");
        table.columns.push(Column::new("order_id", "BIGINT"));
        let desired = make_catalog(vec![table]);
        let observed = make_catalog(vec![]);
        let plan = plan_between(&desired, &observed);
        let executor = RecordingExecutor::new();

        apply(&plan, &executor, ApplyOptions::default())
            .await
            .unwrap();
        let expected: Vec<String> = plan.ops.iter().map(|op| op.to_string()).collect();
        assert_eq!(executor.executed(), expected);
    }

    #[tokio::test]
    async fn test_mid_plan_failure_reports_progress() {
        let mut alpha = Table::new("alpha");
        alpha.columns.push(Column::new("id", "BIGINT"));
        let mut beta = Table::new("beta");
        beta.columns.push(Column::new("id", "BIGINT"));
        let desired = make_catalog(vec![alpha, beta]);
        let observed = make_catalog(vec![]);
        let plan = plan_between(&desired, &observed);

        let mut executor = RecordingExecutor::new();
        executor.fail_on = Some("beta".to_string());

        let err = apply(&plan, &executor, ApplyOptions::default())
            .await
            .unwrap_err();
        match err {
            ApplyError::Execution { index, applied, .. } => {
                assert_eq!(index, 1);
                assert_eq!(applied, 1);
            }
            other => panic!("expected execution error, got {other}"),
        }
        assert_eq!(executor.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_plan_never_executes() {
        use crate::path::EntityPath;
        let plan = ChangePlan::new(
            vec![ValidationIssue::error(
                EntityPath::root("prod"),
                "duplicate schema name 'sales'",
            )],
            Vec::new(),
        );
        let executor = RecordingExecutor::new();

        let err = apply(&plan, &executor, ApplyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Blocked { .. }));
        assert!(executor.executed().is_empty());
    }
}
