//! Fully qualified entity paths.
//!
//! Every validation issue and change operation carries the dotted path of the
//! entity it targets, e.g. `prod.sales.orders.customer_id`. Paths are what
//! downstream collaborators key confirmation prompts and audit logs on.

use serde::Serialize;
use std::fmt;

use stratum_model::TableRef;

/// The level of the entity a path (or op) targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Catalog,
    Schema,
    Table,
    Volume,
    Column,
    Constraint,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Catalog => "catalog",
            EntityKind::Schema => "schema",
            EntityKind::Table => "table",
            EntityKind::Volume => "volume",
            EntityKind::Column => "column",
            EntityKind::Constraint => "constraint",
        };
        write!(f, "{s}")
    }
}

/// Dotted, fully qualified path from the catalog root down to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityPath(Vec<String>);

impl EntityPath {
    pub fn root(catalog: impl Into<String>) -> Self {
        EntityPath(vec![catalog.into()])
    }

    /// Extend the path by one level.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        EntityPath(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// True if `self` is an ancestor of (or equal to) `other`.
    pub fn contains(&self, other: &EntityPath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// The path truncated to `depth` levels.
    pub fn ancestor(&self, depth: usize) -> EntityPath {
        EntityPath(self.0[..depth.min(self.0.len())].to_vec())
    }

    /// Path of a fully qualified table reference.
    ///
    /// The reference must have been resolved first; unresolved qualifiers
    /// would otherwise produce a path that matches nothing.
    pub fn of_table_ref(table_ref: &TableRef) -> EntityPath {
        let mut segments = Vec::with_capacity(3);
        if let Some(catalog) = &table_ref.catalog {
            segments.push(catalog.clone());
        }
        if let Some(schema) = &table_ref.schema {
            segments.push(schema.clone());
        }
        segments.push(table_ref.table.clone());
        EntityPath(segments)
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl Serialize for EntityPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
