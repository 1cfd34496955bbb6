//! Declarative schema planning for hierarchical data catalogs.
//!
//! A desired-state tree (catalog → schema → {table, volume} → {column,
//! constraint}, see [`stratum_model`]) is reconciled, validated, diffed
//! against the observed state of a live target, and turned into a
//! dependency-ordered [`ChangePlan`] of typed operations. Execution is the
//! caller's: implement [`CatalogInspector`] to supply observed state and
//! [`ChangeExecutor`] to run the plan.
//!
//! ```no_run
//! # async fn demo(desired: stratum_model::Catalog, inspector: &dyn stratum::CatalogInspector) -> Result<(), stratum::Error> {
//! let plan = stratum::observe_and_plan(&desired, inspector, 8).await?;
//! for op in &plan.ops {
//!     println!("{op}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod diff;
pub mod error;
pub mod inspect;
pub mod order;
pub mod path;
pub mod plan;
pub mod reconcile;
pub mod sql;
pub mod validate;

pub use apply::{apply, ApplyError, ApplyOptions, ApplyReport, ChangeExecutor, ExecuteError};
pub use diff::{Change, ChangeOp, ConstraintFlag, OpKind};
pub use error::Error;
pub use inspect::{observe, CatalogInspector, CatalogSummary, InspectError};
pub use path::{EntityKind, EntityPath};
pub use plan::{ChangePlan, PlanSummary};
pub use validate::{Severity, ValidationIssue};

use stratum_model::Catalog;

/// Run the pure pipeline: reconcile both trees, validate the desired state,
/// diff, order, and assemble the plan.
///
/// `observed = None` means the target catalog does not exist. ERROR issues
/// block: the returned plan carries the issues, no ops, and
/// `applicable = false`. An unorderable change set (mutual foreign keys
/// between new tables) is the one hard error here.
pub fn plan(desired: &Catalog, observed: Option<&Catalog>) -> Result<ChangePlan, Error> {
    let span = tracing::debug_span!("plan", catalog = %desired.name);
    let _guard = span.enter();

    let mut desired = desired.clone();
    let mut issues = reconcile::reconcile(&mut desired);
    issues.extend(validate::validate(&desired));

    let observed = observed.map(|o| {
        let mut o = o.clone();
        // Observed-side conflicts are the target's problem, not a reason to
        // block; canonicalizing is still required for FK drop ordering.
        let observed_issues = reconcile::reconcile(&mut o);
        if !observed_issues.is_empty() {
            tracing::warn!(
                count = observed_issues.len(),
                "observed state has primary-key conflicts"
            );
        }
        o
    });

    if issues.iter().any(|i| i.severity == Severity::Error) {
        tracing::warn!(issues = issues.len(), "plan blocked by validation");
        return Ok(ChangePlan::new(issues, Vec::new()));
    }

    let ops = diff::diff(&desired, observed.as_ref());
    let ordered = order::order(ops)?;
    Ok(ChangePlan::new(issues, ordered))
}

/// Observe the target through `inspector`, then [`plan`] against it.
///
/// `concurrency` bounds in-flight schema fetches. Inspection failure aborts
/// with [`Error::Inspection`]; a missing catalog is not a failure and plans a
/// full create.
pub async fn observe_and_plan(
    desired: &Catalog,
    inspector: &dyn CatalogInspector,
    concurrency: usize,
) -> Result<ChangePlan, Error> {
    let observed = inspect::observe(inspector, &desired.name, concurrency).await?;
    plan(desired, observed.as_ref())
}
