//! Deterministic DDL rendering, Databricks-flavoured dialect.
//!
//! This is presentation only. Executors receive structured [`ChangeOp`]s; the
//! rendered script exists for review, dry runs and audit trails. Each op
//! renders to one statement (property changes may need a SET and an UNSET).
//! The few operations with no direct DDL form (workspace rebinding) render as
//! a SQL comment so the script stays a faithful transcript of the plan.

use stratum_model::{Column, Constraint, ConstraintDef, StorageKind, Table, Volume};

use crate::diff::{Change, ChangeOp, ConstraintFlag};
use crate::path::{EntityKind, EntityPath};
use crate::plan::ChangePlan;

fn ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn qualify(path: &EntityPath) -> String {
    path.segments()
        .iter()
        .map(|s| ident(s))
        .collect::<Vec<_>>()
        .join(".")
}

fn lit(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn ident_list(names: &[String]) -> String {
    names.iter().map(|n| ident(n)).collect::<Vec<_>>().join(", ")
}

fn entity_keyword(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Catalog => "CATALOG",
        EntityKind::Schema => "SCHEMA",
        EntityKind::Table => "TABLE",
        EntityKind::Volume => "VOLUME",
        EntityKind::Column => "COLUMN",
        EntityKind::Constraint => "CONSTRAINT",
    }
}

fn column_def(column: &Column) -> String {
    let mut def = format!("{} {}", ident(&column.name), column.column_type);
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default_value {
        def.push_str(&format!(" DEFAULT {default}"));
    }
    if let Some(comment) = &column.comment {
        def.push_str(&format!(" COMMENT {}", lit(comment)));
    }
    if let Some(mask) = &column.mask_expression {
        def.push_str(&format!(" MASK {mask}"));
    }
    def
}

fn constraint_body(def: &ConstraintDef) -> String {
    match def {
        ConstraintDef::PrimaryKey { columns, rely } => {
            let mut body = format!("PRIMARY KEY ({})", ident_list(columns));
            if *rely {
                body.push_str(" RELY");
            }
            body
        }
        ConstraintDef::ForeignKey {
            columns,
            referenced_table,
            referenced_columns,
        } => format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            ident_list(columns),
            qualify(&EntityPath::of_table_ref(referenced_table)),
            ident_list(referenced_columns)
        ),
        ConstraintDef::Check {
            expression,
            enforced,
        } => {
            let mut body = format!("CHECK ({expression})");
            if !*enforced {
                body.push_str(" NOT ENFORCED");
            }
            body
        }
    }
}

fn create_table_stmt(path: &EntityPath, table: &Table) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| format!("  {}", column_def(c)))
        .collect::<Vec<_>>()
        .join(",\n");

    let mut tail = format!("USING {}", table.format);
    if let Some(location) = &table.location {
        tail.push_str(&format!(" LOCATION {}", lit(location)));
    }
    if !table.partitioned_by.is_empty() {
        tail.push_str(&format!(" PARTITIONED BY ({})", ident_list(&table.partitioned_by)));
    }
    if !table.cluster_by.is_empty() {
        tail.push_str(&format!(" CLUSTER BY ({})", ident_list(&table.cluster_by)));
    }
    if let Some(comment) = &table.comment {
        tail.push_str(&format!(" COMMENT {}", lit(comment)));
    }
    if !table.properties.is_empty() {
        let props = table
            .properties
            .iter()
            .map(|(k, v)| format!("{} = {}", lit(k), lit(v)))
            .collect::<Vec<_>>()
            .join(", ");
        tail.push_str(&format!(" TBLPROPERTIES ({props})"));
    }

    format!("CREATE TABLE {} (\n{columns}\n) {tail};", qualify(path))
}

fn create_volume_stmt(path: &EntityPath, volume: &Volume) -> String {
    let external = match volume.kind {
        StorageKind::External => "EXTERNAL ",
        StorageKind::Managed => "",
    };
    let mut stmt = format!("CREATE {external}VOLUME {}", qualify(path));
    if let Some(location) = &volume.location {
        stmt.push_str(&format!(" LOCATION {}", lit(location)));
    }
    if let Some(comment) = &volume.comment {
        stmt.push_str(&format!(" COMMENT {}", lit(comment)));
    }
    stmt.push(';');
    stmt
}

fn alter_field_stmt(op: &ChangeOp, field: &str, after: &Option<String>) -> String {
    let table = qualify(&op.path.ancestor(op.path.depth() - 1));
    let target = qualify(&op.path);
    let column = op
        .path
        .segments()
        .last()
        .map(|s| ident(s))
        .unwrap_or_default();

    match (op.entity, field) {
        (EntityKind::Catalog | EntityKind::Schema | EntityKind::Table | EntityKind::Volume, "comment") => {
            let value = after.as_deref().map(lit).unwrap_or_else(|| "NULL".into());
            format!("COMMENT ON {} {target} IS {value};", entity_keyword(op.entity))
        }
        (_, "owner") if after.is_some() => {
            let owner = after.as_deref().map(ident).unwrap_or_default();
            format!("ALTER {} {target} SET OWNER TO {owner};", entity_keyword(op.entity))
        }
        (EntityKind::Catalog | EntityKind::Schema, "managed_location") if after.is_some() => {
            let location = after.as_deref().map(lit).unwrap_or_default();
            format!(
                "ALTER {} {target} SET MANAGED LOCATION {location};",
                entity_keyword(op.entity)
            )
        }
        (EntityKind::Table, "row_filter") => match after {
            Some(filter) => format!("ALTER TABLE {target} SET ROW FILTER {filter};"),
            None => format!("ALTER TABLE {target} DROP ROW FILTER;"),
        },
        (EntityKind::Table, "cluster_by") => match after {
            Some(columns) => format!("ALTER TABLE {target} CLUSTER BY ({columns});"),
            None => format!("ALTER TABLE {target} CLUSTER BY NONE;"),
        },
        (EntityKind::Column, "nullable") => {
            if after.as_deref() == Some("false") {
                format!("ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL;")
            } else {
                format!("ALTER TABLE {table} ALTER COLUMN {column} DROP NOT NULL;")
            }
        }
        (EntityKind::Column, "default_value") => match after {
            Some(default) => {
                format!("ALTER TABLE {table} ALTER COLUMN {column} SET DEFAULT {default};")
            }
            None => format!("ALTER TABLE {table} ALTER COLUMN {column} DROP DEFAULT;"),
        },
        (EntityKind::Column, "comment") => {
            let value = after.as_deref().map(lit).unwrap_or_else(|| "NULL".into());
            format!("ALTER TABLE {table} ALTER COLUMN {column} COMMENT {value};")
        }
        (EntityKind::Column, "mask_expression") => match after {
            Some(mask) => format!("ALTER TABLE {table} ALTER COLUMN {column} SET MASK {mask};"),
            None => format!("ALTER TABLE {table} ALTER COLUMN {column} DROP MASK;"),
        },
        _ => format!(
            "-- no direct DDL for {field} on {target}; reconcile out of band"
        ),
    }
}

impl ChangeOp {
    /// One deterministic DDL statement for this op.
    pub fn to_sql(&self) -> String {
        let target = qualify(&self.path);
        let table = qualify(&self.path.ancestor(self.path.depth().saturating_sub(1)));

        match &self.change {
            Change::CreateCatalog(catalog) => {
                let mut stmt = format!("CREATE CATALOG IF NOT EXISTS {target}");
                if let Some(location) = &catalog.managed_location {
                    stmt.push_str(&format!(" MANAGED LOCATION {}", lit(location)));
                }
                if let Some(comment) = &catalog.comment {
                    stmt.push_str(&format!(" COMMENT {}", lit(comment)));
                }
                stmt.push(';');
                stmt
            }
            Change::DropCatalog => format!("DROP CATALOG {target} CASCADE;"),
            Change::CreateSchema(schema) => {
                let mut stmt = format!("CREATE SCHEMA IF NOT EXISTS {target}");
                if let Some(location) = &schema.managed_location {
                    stmt.push_str(&format!(" MANAGED LOCATION {}", lit(location)));
                }
                if let Some(comment) = &schema.comment {
                    stmt.push_str(&format!(" COMMENT {}", lit(comment)));
                }
                stmt.push(';');
                stmt
            }
            Change::DropSchema => format!("DROP SCHEMA {target} CASCADE;"),
            Change::CreateTable(t) => create_table_stmt(&self.path, t),
            Change::DropTable => format!("DROP TABLE {target};"),
            Change::CreateVolume(v) => create_volume_stmt(&self.path, v),
            Change::DropVolume => format!("DROP VOLUME {target};"),
            Change::AddColumn(column) => {
                format!("ALTER TABLE {table} ADD COLUMN {};", column_def(column))
            }
            Change::DropColumn => {
                let column = self
                    .path
                    .segments()
                    .last()
                    .map(|s| ident(s))
                    .unwrap_or_default();
                format!("ALTER TABLE {table} DROP COLUMN {column};")
            }
            Change::AlterField { field, after, .. } => alter_field_stmt(self, field, after),
            Change::AlterProperties { before, after } => {
                let set: Vec<String> = after
                    .iter()
                    .filter(|(k, v)| before.get(*k) != Some(*v))
                    .map(|(k, v)| format!("{} = {}", lit(k), lit(v)))
                    .collect();
                let unset: Vec<String> = before
                    .keys()
                    .filter(|k| !after.contains_key(*k))
                    .map(|k| lit(k))
                    .collect();
                let mut statements = Vec::new();
                if !set.is_empty() {
                    statements.push(format!(
                        "ALTER TABLE {target} SET TBLPROPERTIES ({});",
                        set.join(", ")
                    ));
                }
                if !unset.is_empty() {
                    statements.push(format!(
                        "ALTER TABLE {target} UNSET TBLPROPERTIES ({});",
                        unset.join(", ")
                    ));
                }
                statements.join("\n")
            }
            Change::SetTag { key, value, .. } => match self.entity {
                EntityKind::Column => {
                    let column = self
                        .path
                        .segments()
                        .last()
                        .map(|s| ident(s))
                        .unwrap_or_default();
                    format!(
                        "ALTER TABLE {table} ALTER COLUMN {column} SET TAGS ({} = {});",
                        lit(key),
                        lit(value)
                    )
                }
                entity => format!(
                    "ALTER {} {target} SET TAGS ({} = {});",
                    entity_keyword(entity),
                    lit(key),
                    lit(value)
                ),
            },
            Change::UnsetTag { key, .. } => match self.entity {
                EntityKind::Column => {
                    let column = self
                        .path
                        .segments()
                        .last()
                        .map(|s| ident(s))
                        .unwrap_or_default();
                    format!(
                        "ALTER TABLE {table} ALTER COLUMN {column} UNSET TAGS ({});",
                        lit(key)
                    )
                }
                entity => format!(
                    "ALTER {} {target} UNSET TAGS ({});",
                    entity_keyword(entity),
                    lit(key)
                ),
            },
            Change::AddConstraint(Constraint { name, def }) => format!(
                "ALTER TABLE {table} ADD CONSTRAINT {} {};",
                ident(name),
                constraint_body(def)
            ),
            Change::DropConstraint(Constraint { name, .. }) => {
                format!("ALTER TABLE {table} DROP CONSTRAINT {};", ident(name))
            }
            Change::ToggleConstraintFlag { flag, value } => {
                let name = self
                    .path
                    .segments()
                    .last()
                    .map(|s| ident(s))
                    .unwrap_or_default();
                let clause = match (flag, value) {
                    (ConstraintFlag::Rely, true) => "RELY",
                    (ConstraintFlag::Rely, false) => "NORELY",
                    (ConstraintFlag::Enforced, true) => "ENFORCED",
                    (ConstraintFlag::Enforced, false) => "NOT ENFORCED",
                };
                format!("ALTER TABLE {table} ALTER CONSTRAINT {name} {clause};")
            }
        }
    }
}

impl ChangePlan {
    /// The full plan as an ordered DDL script.
    pub fn to_sql(&self) -> String {
        self.ops
            .iter()
            .map(|op| op.to_sql())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
