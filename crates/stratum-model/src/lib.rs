//! Catalog entity model for stratum.
//!
//! This crate contains the entity types shared between the desired-state tree
//! (declared by the user, materialized by an external loader) and the
//! observed-state tree (assembled from a live catalog inspection). Both sides
//! use the same shapes, so the differ compares like with like.
//!
//! The hierarchy is catalog → schema → {table, volume} → {column, constraint},
//! with tags attachable at every level. Tags are per-entity and do not
//! inherit: a table does not receive its schema's tags.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;


/// Whether an entity's storage is managed by the catalog or external.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageKind {
    Managed,
    External,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Managed => write!(f, "MANAGED"),
            StorageKind::External => write!(f, "EXTERNAL"),
        }
    }
}

/// Table data source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableFormat {
    Delta,
    Iceberg,
    Parquet,
    Csv,
    Json,
    Avro,
    Orc,
    Text,
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableFormat::Delta => "DELTA",
            TableFormat::Iceberg => "ICEBERG",
            TableFormat::Parquet => "PARQUET",
            TableFormat::Csv => "CSV",
            TableFormat::Json => "JSON",
            TableFormat::Avro => "AVRO",
            TableFormat::Orc => "ORC",
            TableFormat::Text => "TEXT",
        };
        write!(f, "{s}")
    }
}

/// A semantic column type token, e.g. `STRING`, `BIGINT`, `DECIMAL(10,2)`.
///
/// The token is kept opaque — the core never interprets parameters — but
/// equality ignores ASCII case and surrounding whitespace so that
/// `decimal(10,2)` observed in a live catalog matches `DECIMAL(10,2)` in a
/// declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeText(pub String);

impl TypeText {
    pub fn new(s: impl Into<String>) -> Self {
        TypeText(s.into())
    }

    /// Canonical form used for comparisons.
    pub fn normalized(&self) -> String {
        self.0.trim().to_ascii_uppercase()
    }
}

impl PartialEq for TypeText {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for TypeText {}

impl std::hash::Hash for TypeText {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl fmt::Display for TypeText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeText {
    fn from(s: &str) -> Self {
        TypeText(s.to_string())
    }
}

/// A key/value governance tag. Attachable at any entity level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.key, self.value)
    }
}

/// Error parsing a table reference from its dotted string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid table reference {input:?}: expected `table`, `schema.table` or `catalog.schema.table`")]
pub struct TableRefParseError {
    pub input: String,
}

/// Reference to a table, possibly qualified across schema or catalog
/// boundaries.
///
/// Table identity is a (catalog, schema, table) tuple internally. Shorthand
/// forms (`orders`, `sales.orders`) are allowed in declarations and resolved
/// against the declaring schema before validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn unqualified(table: impl Into<String>) -> Self {
        TableRef {
            catalog: None,
            schema: None,
            table: table.into(),
        }
    }

    pub fn qualified(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        TableRef {
            catalog: Some(catalog.into()),
            schema: Some(schema.into()),
            table: table.into(),
        }
    }

    pub fn is_fully_qualified(&self) -> bool {
        self.catalog.is_some() && self.schema.is_some()
    }

    /// Fill in missing qualifiers from the declaring context.
    pub fn resolve_in(&self, catalog: &str, schema: &str) -> TableRef {
        TableRef {
            catalog: Some(self.catalog.clone().unwrap_or_else(|| catalog.to_string())),
            schema: Some(self.schema.clone().unwrap_or_else(|| schema.to_string())),
            table: self.table.clone(),
        }
    }
}

impl FromStr for TableRef {
    type Err = TableRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        let err = || TableRefParseError {
            input: s.to_string(),
        };
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(err());
        }
        match parts.as_slice() {
            [table] => Ok(TableRef::unqualified(*table)),
            [schema, table] => Ok(TableRef {
                catalog: None,
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            [catalog, schema, table] => Ok(TableRef::qualified(*catalog, *schema, *table)),
            _ => Err(err()),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{catalog}.")?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{schema}.")?;
        }
        write!(f, "{}", self.table)
    }
}

// Serialized as the dotted string form so declarations can write
// `referenced_table: sales.orders`.
impl Serialize for TableRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TableRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn default_true() -> bool {
    true
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: TypeText,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub mask_expression: Option<String>,
    /// Convenience flag, reconciled into a canonical PRIMARY_KEY constraint
    /// before validation. After reconciliation the constraint list is the
    /// single source of truth.
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: impl Into<TypeText>) -> Self {
        Column {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
            default_value: None,
            comment: None,
            mask_expression: None,
            primary_key: false,
            tags: Vec::new(),
        }
    }
}

/// The typed body of a constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintDef {
    PrimaryKey {
        columns: Vec<String>,
        /// RELY tells the optimizer it may trust uniqueness without
        /// enforcement.
        #[serde(default)]
        rely: bool,
    },
    ForeignKey {
        columns: Vec<String>,
        referenced_table: TableRef,
        referenced_columns: Vec<String>,
    },
    Check {
        expression: String,
        #[serde(default = "default_true")]
        enforced: bool,
    },
}

impl ConstraintDef {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ConstraintDef::PrimaryKey { .. } => "PRIMARY KEY",
            ConstraintDef::ForeignKey { .. } => "FOREIGN KEY",
            ConstraintDef::Check { .. } => "CHECK",
        }
    }

    /// The columns this constraint covers (empty for CHECK).
    pub fn columns(&self) -> &[String] {
        match self {
            ConstraintDef::PrimaryKey { columns, .. } => columns,
            ConstraintDef::ForeignKey { columns, .. } => columns,
            ConstraintDef::Check { .. } => &[],
        }
    }

    /// Structural identity, ignoring the RELY/ENFORCED toggles.
    ///
    /// Two constraints with equal structure but different toggles can be
    /// reconciled with a flag flip instead of drop + add.
    pub fn same_structure(&self, other: &ConstraintDef) -> bool {
        match (self, other) {
            (
                ConstraintDef::PrimaryKey { columns: a, .. },
                ConstraintDef::PrimaryKey { columns: b, .. },
            ) => a == b,
            (
                ConstraintDef::ForeignKey {
                    columns: a,
                    referenced_table: at,
                    referenced_columns: ac,
                },
                ConstraintDef::ForeignKey {
                    columns: b,
                    referenced_table: bt,
                    referenced_columns: bc,
                },
            ) => a == b && at == bt && ac == bc,
            (
                ConstraintDef::Check { expression: a, .. },
                ConstraintDef::Check { expression: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

/// A named table constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    #[serde(flatten)]
    pub def: ConstraintDef,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.def {
            ConstraintDef::PrimaryKey { columns, rely } => {
                write!(f, "{} PRIMARY KEY ({})", self.name, columns.join(", "))?;
                if *rely {
                    write!(f, " RELY")?;
                }
                Ok(())
            }
            ConstraintDef::ForeignKey {
                columns,
                referenced_table,
                referenced_columns,
            } => write!(
                f,
                "{} FOREIGN KEY ({}) REFERENCES {} ({})",
                self.name,
                columns.join(", "),
                referenced_table,
                referenced_columns.join(", ")
            ),
            ConstraintDef::Check {
                expression,
                enforced,
            } => {
                write!(f, "{} CHECK ({expression})", self.name)?;
                if !*enforced {
                    write!(f, " NOT ENFORCED")?;
                }
                Ok(())
            }
        }
    }
}

/// A table: columns, constraints and storage/layout metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default = "Table::default_kind")]
    pub kind: StorageKind,
    #[serde(default = "Table::default_format")]
    pub format: TableFormat,
    /// Required iff `kind` is EXTERNAL.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub partitioned_by: Vec<String>,
    #[serde(default)]
    pub cluster_by: Vec<String>,
    #[serde(default)]
    pub row_filter: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Table {
    fn default_kind() -> StorageKind {
        StorageKind::Managed
    }

    fn default_format() -> TableFormat {
        TableFormat::Delta
    }

    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            kind: StorageKind::Managed,
            format: TableFormat::Delta,
            location: None,
            comment: None,
            owner: None,
            partitioned_by: Vec::new(),
            cluster_by: Vec::new(),
            row_filter: None,
            properties: IndexMap::new(),
            tags: Vec::new(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| matches!(c.def, ConstraintDef::PrimaryKey { .. }))
    }

    /// Foreign key constraints declared on this table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(|c| matches!(c.def, ConstraintDef::ForeignKey { .. }))
    }
}

/// A volume: unstructured file storage alongside tables in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(default = "Table::default_kind")]
    pub kind: StorageKind,
    /// Required iff `kind` is EXTERNAL.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Volume {
    pub fn new(name: impl Into<String>) -> Self {
        Volume {
            name: name.into(),
            kind: StorageKind::Managed,
            location: None,
            comment: None,
            owner: None,
            tags: Vec::new(),
        }
    }
}

/// A schema: a namespace of tables and volumes within a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Optional override of the catalog's managed storage root.
    #[serde(default)]
    pub managed_location: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            comment: None,
            owner: None,
            managed_location: None,
            tags: Vec::new(),
            tables: Vec::new(),
            volumes: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn volume(&self, name: &str) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.name == name)
    }
}

/// The root of a desired-state or observed-state tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub managed_location: Option<String>,
    #[serde(default)]
    pub bound_workspaces: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub schemas: Vec<Schema>,
}

impl Catalog {
    pub fn new(name: impl Into<String>) -> Self {
        Catalog {
            name: name.into(),
            comment: None,
            owner: None,
            managed_location: None,
            bound_workspaces: Vec::new(),
            tags: Vec::new(),
            schemas: Vec::new(),
        }
    }

    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.name == name)
    }

    /// Resolve a (possibly shorthand) table reference against this catalog.
    ///
    /// `default_schema` is the schema the reference was declared in. Returns
    /// `None` for references into other catalogs or to unknown tables.
    pub fn resolve_table(&self, table_ref: &TableRef, default_schema: &str) -> Option<&Table> {
        if let Some(catalog) = &table_ref.catalog
            && catalog != &self.name
        {
            return None;
        }
        let schema_name = table_ref.schema.as_deref().unwrap_or(default_schema);
        self.schema(schema_name)?.table(&table_ref.table)
    }
}
