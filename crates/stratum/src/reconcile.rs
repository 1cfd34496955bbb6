//! Canonicalization pass run before validation.
//!
//! Two things happen here:
//!
//! 1. The redundant primary-key representations (a `primary_key: true` column
//!    flag vs. an explicit PRIMARY_KEY constraint) are merged into exactly one
//!    canonical constraint per table. After this pass the constraint list is
//!    the single source of truth and the differ never looks at the flags.
//!
//! 2. Shorthand foreign-key table references are resolved against the
//!    declaring schema, so table identity is a fully qualified
//!    (catalog, schema, table) tuple everywhere downstream.

use stratum_model::{Catalog, Constraint, ConstraintDef};

use crate::path::EntityPath;
use crate::validate::ValidationIssue;

/// Canonicalize a tree in place. Returns the conflicts found while merging;
/// these are ERROR-severity issues and block diffing like any other.
pub fn reconcile(catalog: &mut Catalog) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let catalog_name = catalog.name.clone();

    for schema in &mut catalog.schemas {
        let schema_name = schema.name.clone();
        for table in &mut schema.tables {
            let path = EntityPath::root(&catalog_name)
                .child(&schema_name)
                .child(&table.name);

            // Qualify FK references.
            for constraint in &mut table.constraints {
                if let ConstraintDef::ForeignKey {
                    referenced_table, ..
                } = &mut constraint.def
                {
                    *referenced_table = referenced_table.resolve_in(&catalog_name, &schema_name);
                }
            }

            // Merge flag-style PK declarations into the constraint list.
            let flagged: Vec<String> = table
                .columns
                .iter()
                .filter(|c| c.primary_key)
                .map(|c| c.name.clone())
                .collect();

            match table.primary_key() {
                Some(pk) => {
                    let pk_columns = pk.def.columns().to_vec();
                    let pk_name = pk.name.clone();
                    for col in &flagged {
                        if !pk_columns.contains(col) {
                            issues.push(ValidationIssue::error(
                                path.child(col),
                                format!(
                                    "column is flagged primary_key but constraint '{pk_name}' does not include it"
                                ),
                            ));
                        }
                    }
                }
                None if !flagged.is_empty() => {
                    table.constraints.push(Constraint {
                        name: format!("{}_pk", table.name),
                        def: ConstraintDef::PrimaryKey {
                            columns: flagged,
                            rely: false,
                        },
                    });
                }
                None => {}
            }

            for column in &mut table.columns {
                column.primary_key = false;
            }
        }
    }

    issues
}
