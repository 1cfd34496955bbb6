//! Static consistency checks on a desired-state tree.
//!
//! Validation never mutates the model and runs after [`crate::reconcile`],
//! so the constraint list is already the single source of truth for primary
//! keys. ERROR issues block diffing; WARNING issues are informational.

use std::collections::HashSet;

use stratum_model::{Catalog, ConstraintDef, Schema, StorageKind, Table, Tag, Volume};

use crate::path::EntityPath;

/// How serious a validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

/// One validation finding, tied to the entity it concerns.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub path: EntityPath,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(path: EntityPath, message: impl Into<String>) -> Self {
        ValidationIssue {
            severity: Severity::Error,
            path,
            message: message.into(),
        }
    }

    pub fn warning(path: EntityPath, message: impl Into<String>) -> Self {
        ValidationIssue {
            severity: Severity::Warning,
            path,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.path, self.message)
    }
}

/// Run all static checks against a (reconciled) desired-state tree.
pub fn validate(catalog: &Catalog) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let root = EntityPath::root(&catalog.name);

    check_name(&mut issues, &root, "catalog", &catalog.name);
    check_duplicates(
        &mut issues,
        &root,
        "schema",
        catalog.schemas.iter().map(|s| s.name.as_str()),
    );
    check_tags(&mut issues, &root, &catalog.tags);

    for schema in &catalog.schemas {
        validate_schema(&mut issues, catalog, &root.child(&schema.name), schema);
    }

    tracing::debug!(
        errors = issues.iter().filter(|i| i.severity == Severity::Error).count(),
        warnings = issues.iter().filter(|i| i.severity == Severity::Warning).count(),
        "validated desired state"
    );
    issues
}

fn validate_schema(
    issues: &mut Vec<ValidationIssue>,
    catalog: &Catalog,
    path: &EntityPath,
    schema: &Schema,
) {
    check_name(issues, path, "schema", &schema.name);
    check_duplicates(
        issues,
        path,
        "table",
        schema.tables.iter().map(|t| t.name.as_str()),
    );
    check_duplicates(
        issues,
        path,
        "volume",
        schema.volumes.iter().map(|v| v.name.as_str()),
    );
    check_tags(issues, path, &schema.tags);

    for table in &schema.tables {
        validate_table(issues, catalog, schema, &path.child(&table.name), table);
    }
    for volume in &schema.volumes {
        validate_volume(issues, &path.child(&volume.name), volume);
    }
}

fn validate_table(
    issues: &mut Vec<ValidationIssue>,
    catalog: &Catalog,
    schema: &Schema,
    path: &EntityPath,
    table: &Table,
) {
    check_name(issues, path, "table", &table.name);
    check_duplicates(
        issues,
        path,
        "column",
        table.columns.iter().map(|c| c.name.as_str()),
    );
    check_duplicates(
        issues,
        path,
        "constraint",
        table.constraints.iter().map(|c| c.name.as_str()),
    );
    check_tags(issues, path, &table.tags);
    check_location(issues, path, "table", table.kind, table.location.as_deref());

    let column_names: HashSet<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();

    for col in &table.partitioned_by {
        if !column_names.contains(col.as_str()) {
            issues.push(ValidationIssue::error(
                path.clone(),
                format!("partitioned_by names unknown column '{col}'"),
            ));
        }
    }
    for col in &table.cluster_by {
        if !column_names.contains(col.as_str()) {
            issues.push(ValidationIssue::error(
                path.clone(),
                format!("cluster_by names unknown column '{col}'"),
            ));
        }
    }
    if !table.partitioned_by.is_empty() && !table.cluster_by.is_empty() {
        issues.push(ValidationIssue::warning(
            path.clone(),
            "both partitioned_by and cluster_by are set; most targets accept only one",
        ));
    }

    for column in &table.columns {
        let cpath = path.child(&column.name);
        check_name(issues, &cpath, "column", &column.name);
        check_tags(issues, &cpath, &column.tags);
    }

    let pk_count = table
        .constraints
        .iter()
        .filter(|c| matches!(c.def, ConstraintDef::PrimaryKey { .. }))
        .count();
    if pk_count > 1 {
        issues.push(ValidationIssue::error(
            path.clone(),
            format!("table declares {pk_count} PRIMARY KEY constraints, at most one is allowed"),
        ));
    }

    for constraint in &table.constraints {
        let cpath = path.child(&constraint.name);
        check_name(issues, &cpath, "constraint", &constraint.name);
        match &constraint.def {
            ConstraintDef::PrimaryKey { columns, .. } => {
                if columns.is_empty() {
                    issues.push(ValidationIssue::error(
                        cpath.clone(),
                        "PRIMARY KEY constraint has no columns",
                    ));
                }
                for col in columns {
                    match table.column(col) {
                        None => issues.push(ValidationIssue::error(
                            cpath.clone(),
                            format!("PRIMARY KEY names unknown column '{col}'"),
                        )),
                        Some(c) if c.nullable => issues.push(ValidationIssue::warning(
                            cpath.clone(),
                            format!("PRIMARY KEY column '{col}' is nullable; NOT NULL is best practice"),
                        )),
                        Some(_) => {}
                    }
                }
            }
            ConstraintDef::ForeignKey {
                columns,
                referenced_table,
                referenced_columns,
            } => {
                if columns.is_empty() {
                    issues.push(ValidationIssue::error(
                        cpath.clone(),
                        "FOREIGN KEY constraint has no columns",
                    ));
                }
                if columns.len() != referenced_columns.len() {
                    issues.push(ValidationIssue::error(
                        cpath.clone(),
                        format!(
                            "FOREIGN KEY has {} local column(s) but {} referenced column(s)",
                            columns.len(),
                            referenced_columns.len()
                        ),
                    ));
                }
                for col in columns {
                    if !column_names.contains(col.as_str()) {
                        issues.push(ValidationIssue::error(
                            cpath.clone(),
                            format!("FOREIGN KEY names unknown column '{col}'"),
                        ));
                    }
                }
                match catalog.resolve_table(referenced_table, &schema.name) {
                    None => issues.push(ValidationIssue::error(
                        cpath.clone(),
                        format!("FOREIGN KEY references unknown table '{referenced_table}'"),
                    )),
                    Some(target) => {
                        for col in referenced_columns {
                            if target.column(col).is_none() {
                                issues.push(ValidationIssue::error(
                                    cpath.clone(),
                                    format!(
                                        "FOREIGN KEY references unknown column '{col}' on '{referenced_table}'"
                                    ),
                                ));
                            }
                        }
                    }
                }
            }
            ConstraintDef::Check { expression, .. } => {
                if expression.trim().is_empty() {
                    issues.push(ValidationIssue::error(
                        cpath.clone(),
                        "CHECK constraint has an empty expression",
                    ));
                }
            }
        }
    }
}

fn validate_volume(issues: &mut Vec<ValidationIssue>, path: &EntityPath, volume: &Volume) {
    check_name(issues, path, "volume", &volume.name);
    check_tags(issues, path, &volume.tags);
    check_location(
        issues,
        path,
        "volume",
        volume.kind,
        volume.location.as_deref(),
    );
}

fn check_location(
    issues: &mut Vec<ValidationIssue>,
    path: &EntityPath,
    what: &str,
    kind: StorageKind,
    location: Option<&str>,
) {
    let has_location = location.is_some_and(|l| !l.trim().is_empty());
    match kind {
        StorageKind::External if !has_location => {
            issues.push(ValidationIssue::error(
                path.clone(),
                format!("EXTERNAL {what} must specify a non-empty location"),
            ));
        }
        StorageKind::Managed if has_location => {
            issues.push(ValidationIssue::warning(
                path.clone(),
                format!("MANAGED {what} declares a location; it will be ignored"),
            ));
        }
        _ => {}
    }
}

fn check_name(issues: &mut Vec<ValidationIssue>, path: &EntityPath, what: &str, name: &str) {
    if name.trim().is_empty() {
        issues.push(ValidationIssue::error(
            path.clone(),
            format!("{what} name must not be empty"),
        ));
    }
}

fn check_duplicates<'a>(
    issues: &mut Vec<ValidationIssue>,
    path: &EntityPath,
    what: &str,
    names: impl Iterator<Item = &'a str>,
) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for name in names {
        if !seen.insert(name) && reported.insert(name) {
            issues.push(ValidationIssue::error(
                path.child(name),
                format!("duplicate {what} name '{name}'"),
            ));
        }
    }
}

fn check_tags(issues: &mut Vec<ValidationIssue>, path: &EntityPath, tags: &[Tag]) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for tag in tags {
        if !seen.insert(tag.key.as_str()) && reported.insert(tag.key.as_str()) {
            issues.push(ValidationIssue::warning(
                path.clone(),
                format!("duplicate tag key '{}'; the last declaration wins", tag.key),
            ));
        }
    }
}
