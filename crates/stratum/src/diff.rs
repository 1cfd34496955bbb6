//! Structural diffing of two catalog trees.
//!
//! The differ walks desired and observed state level by level, top-down
//! (catalog → schema → {table, volume} → {column, constraint}), and produces a
//! pre-ordered list of typed change operations. Final execution order is the
//! job of [`crate::order`].
//!
//! Matching is by name at every level; a renamed entity is reported as one
//! DROP and one CREATE. Attributes a target system cannot alter in place
//! (storage kind, format, location, partition layout, column type) produce an
//! explicit DROP + CREATE replacement pair with both operations flagged
//! destructive, so downstream collaborators can gate them behind
//! confirmation.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use stratum_model::{
    Catalog, Column, Constraint, ConstraintDef, Schema, StorageKind, Table, Tag, Volume,
};

use crate::path::{EntityKind, EntityPath};

/// Coarse category of a change operation, the vocabulary downstream
/// collaborators (executors, phrasing layers) speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    Create,
    Alter,
    Drop,
    SetTag,
    UnsetTag,
    ToggleConstraintFlag,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Create => "CREATE",
            OpKind::Alter => "ALTER",
            OpKind::Drop => "DROP",
            OpKind::SetTag => "SET_TAG",
            OpKind::UnsetTag => "UNSET_TAG",
            OpKind::ToggleConstraintFlag => "TOGGLE_CONSTRAINT_FLAG",
        };
        write!(f, "{s}")
    }
}

/// The RELY/ENFORCED toggles that can be flipped without restructuring a
/// constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConstraintFlag {
    Rely,
    Enforced,
}

impl fmt::Display for ConstraintFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintFlag::Rely => write!(f, "RELY"),
            ConstraintFlag::Enforced => write!(f, "ENFORCED"),
        }
    }
}

/// A single typed change.
///
/// Create payloads carry the entity's own attributes only; child entities get
/// their own operations (constraints of a new table arrive as separate
/// [`Change::AddConstraint`] ops so the orderer can move them after the
/// tables they depend on).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    CreateCatalog(Catalog),
    DropCatalog,
    CreateSchema(Schema),
    DropSchema,
    CreateTable(Table),
    DropTable,
    CreateVolume(Volume),
    DropVolume,
    AddColumn(Column),
    DropColumn,
    /// One mutable attribute changed in place.
    AlterField {
        field: &'static str,
        before: Option<String>,
        after: Option<String>,
    },
    /// The table property map changed. Carried whole for audit fidelity;
    /// renderers compute the SET/UNSET split.
    AlterProperties {
        before: IndexMap<String, String>,
        after: IndexMap<String, String>,
    },
    /// Set (or overwrite) one tag. An overwrite is a single SET, never
    /// UNSET + SET.
    SetTag {
        key: String,
        value: String,
        previous: Option<String>,
    },
    UnsetTag {
        key: String,
        value: String,
    },
    AddConstraint(Constraint),
    DropConstraint(Constraint),
    /// Flip RELY or ENFORCED without dropping the constraint.
    ToggleConstraintFlag {
        flag: ConstraintFlag,
        value: bool,
    },
}

impl Change {
    pub fn kind(&self) -> OpKind {
        match self {
            Change::CreateCatalog(_)
            | Change::CreateSchema(_)
            | Change::CreateTable(_)
            | Change::CreateVolume(_)
            | Change::AddColumn(_)
            | Change::AddConstraint(_) => OpKind::Create,
            Change::DropCatalog
            | Change::DropSchema
            | Change::DropTable
            | Change::DropVolume
            | Change::DropColumn
            | Change::DropConstraint(_) => OpKind::Drop,
            Change::AlterField { .. } | Change::AlterProperties { .. } => OpKind::Alter,
            Change::SetTag { .. } => OpKind::SetTag,
            Change::UnsetTag { .. } => OpKind::UnsetTag,
            Change::ToggleConstraintFlag { .. } => OpKind::ToggleConstraintFlag,
        }
    }
}

/// One atomic mutation, addressed to a fully qualified entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeOp {
    pub path: EntityPath,
    pub entity: EntityKind,
    pub change: Change,
    /// True for drops and for both halves of a DROP + CREATE substitution.
    pub destructive: bool,
}

impl ChangeOp {
    fn new(path: EntityPath, entity: EntityKind, change: Change) -> Self {
        let destructive = change.kind() == OpKind::Drop;
        ChangeOp {
            path,
            entity,
            change,
            destructive,
        }
    }

    fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    pub fn kind(&self) -> OpKind {
        self.change.kind()
    }
}

fn fmt_opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(none)")
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.change {
            Change::CreateCatalog(_)
            | Change::CreateSchema(_)
            | Change::CreateTable(_)
            | Change::CreateVolume(_)
            | Change::AddColumn(_) => {
                write!(f, "+ {} {}", self.entity, self.path)
            }
            Change::DropCatalog
            | Change::DropSchema
            | Change::DropTable
            | Change::DropVolume
            | Change::DropColumn => {
                write!(f, "- {} {}", self.entity, self.path)
            }
            Change::AlterField {
                field,
                before,
                after,
            } => write!(
                f,
                "~ {} {}: {} -> {}",
                self.path,
                field,
                fmt_opt(before),
                fmt_opt(after)
            ),
            Change::AlterProperties { before, after } => {
                let set = after.iter().filter(|(k, v)| before.get(*k) != Some(*v)).count();
                let unset = before.keys().filter(|k| !after.contains_key(*k)).count();
                write!(f, "~ {} properties: {set} set, {unset} unset", self.path)
            }
            Change::SetTag {
                key,
                value,
                previous,
            } => match previous {
                Some(prev) => write!(f, "~ {} tag {key}: {prev} -> {value}", self.path),
                None => write!(f, "+ {} tag {key} = {value}", self.path),
            },
            Change::UnsetTag { key, .. } => write!(f, "- {} tag {key}", self.path),
            Change::AddConstraint(c) => write!(f, "+ constraint {} [{c}]", self.path),
            Change::DropConstraint(_) => write!(f, "- constraint {}", self.path),
            Change::ToggleConstraintFlag { flag, value } => {
                write!(f, "~ constraint {} {flag} -> {value}", self.path)
            }
        }
    }
}

/// Compute the pre-ordered change set turning `observed` into `desired`.
///
/// `observed = None` means the catalog does not exist at all and the whole
/// desired tree is created. Both trees must have been through
/// [`crate::reconcile`] so constraints and references are canonical.
pub fn diff(desired: &Catalog, observed: Option<&Catalog>) -> Vec<ChangeOp> {
    let mut ops = Vec::new();
    let path = EntityPath::root(&desired.name);

    match observed {
        None => {
            let mut shallow = desired.clone();
            shallow.schemas = Vec::new();
            shallow.tags = Vec::new();
            ops.push(ChangeOp::new(
                path.clone(),
                EntityKind::Catalog,
                Change::CreateCatalog(shallow),
            ));
            set_tag_ops(&mut ops, &path, EntityKind::Catalog, &desired.tags);
            for schema in &desired.schemas {
                create_schema_ops(&mut ops, &path, schema);
            }
        }
        Some(observed) => {
            diff_catalog(&mut ops, &path, desired, observed);
            reattach_foreign_keys(&mut ops, desired, observed);
        }
    }

    tracing::debug!(ops = ops.len(), "computed structural diff");
    ops
}

/// Tags never ride inside create payloads; they always materialize as
/// explicit SET_TAG ops after the create, the same shape a tag change on an
/// existing entity takes. Duplicate keys collapse last-wins.
fn set_tag_ops(ops: &mut Vec<ChangeOp>, path: &EntityPath, entity: EntityKind, tags: &[Tag]) {
    let map: IndexMap<&str, &str> = tags
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();
    for (key, value) in map {
        ops.push(ChangeOp::new(
            path.clone(),
            entity,
            Change::SetTag {
                key: key.to_string(),
                value: value.to_string(),
                previous: None,
            },
        ));
    }
}

fn create_volume_op(path: EntityPath, volume: &Volume) -> ChangeOp {
    let mut shallow = volume.clone();
    shallow.tags = Vec::new();
    ChangeOp::new(path, EntityKind::Volume, Change::CreateVolume(shallow))
}

fn add_column_op(path: EntityPath, column: &Column) -> ChangeOp {
    let mut shallow = column.clone();
    shallow.tags = Vec::new();
    ChangeOp::new(path, EntityKind::Column, Change::AddColumn(shallow))
}

/// A drop of an entity cascades to the constraints inside it, but foreign
/// keys still pin drop order against the tables they reference. Emit an
/// explicit DROP CONSTRAINT for each of `table`'s foreign keys whose target
/// lies outside `scope` (the entity being dropped) so the orderer can place
/// it before the referenced table goes away.
fn drop_foreign_key_ops(ops: &mut Vec<ChangeOp>, table_path: &EntityPath, table: &Table, scope: &EntityPath) {
    for constraint in table.foreign_keys() {
        let ConstraintDef::ForeignKey {
            referenced_table, ..
        } = &constraint.def
        else {
            continue;
        };
        if scope.contains(&EntityPath::of_table_ref(referenced_table)) {
            continue;
        }
        ops.push(ChangeOp::new(
            table_path.child(&constraint.name),
            EntityKind::Constraint,
            Change::DropConstraint(constraint.clone()),
        ));
    }
}

/// Replacing a table severs every observed foreign key pointing at it. For
/// each such FK not already covered by its own table's diff, emit the DROP
/// before the replacement and, when the desired state keeps the constraint,
/// the ADD that restores it afterwards.
fn reattach_foreign_keys(ops: &mut Vec<ChangeOp>, desired: &Catalog, observed: &Catalog) {
    let replaced: HashSet<&EntityPath> = ops
        .iter()
        .filter(|o| matches!(o.change, Change::DropTable))
        .filter(|o| {
            ops.iter()
                .any(|c| matches!(c.change, Change::CreateTable(_)) && c.path == o.path)
        })
        .map(|o| &o.path)
        .collect();
    if replaced.is_empty() {
        return;
    }
    let covered: HashSet<&EntityPath> = ops
        .iter()
        .filter(|o| o.entity == EntityKind::Constraint)
        .map(|o| &o.path)
        .collect();

    let mut ripple = Vec::new();
    let root = EntityPath::root(&observed.name);
    for schema in &observed.schemas {
        for table in &schema.tables {
            let table_path = root.child(&schema.name).child(&table.name);
            for constraint in table.foreign_keys() {
                let ConstraintDef::ForeignKey {
                    referenced_table, ..
                } = &constraint.def
                else {
                    continue;
                };
                let referenced = EntityPath::of_table_ref(referenced_table);
                if referenced == table_path || !replaced.contains(&referenced) {
                    continue;
                }
                let path = table_path.child(&constraint.name);
                if covered.contains(&path) {
                    continue;
                }
                ripple.push(ChangeOp::new(
                    path.clone(),
                    EntityKind::Constraint,
                    Change::DropConstraint(constraint.clone()),
                ));
                let kept = desired
                    .schema(&schema.name)
                    .and_then(|s| s.table(&table.name))
                    .and_then(|t| t.constraint(&constraint.name));
                if let Some(want) = kept {
                    ripple.push(
                        ChangeOp::new(
                            path,
                            EntityKind::Constraint,
                            Change::AddConstraint(want.clone()),
                        )
                        .destructive(),
                    );
                }
            }
        }
    }
    ops.extend(ripple);
}

fn create_schema_ops(ops: &mut Vec<ChangeOp>, catalog_path: &EntityPath, schema: &Schema) {
    let path = catalog_path.child(&schema.name);
    let mut shallow = schema.clone();
    shallow.tables = Vec::new();
    shallow.volumes = Vec::new();
    shallow.tags = Vec::new();
    ops.push(ChangeOp::new(path.clone(), EntityKind::Schema, Change::CreateSchema(shallow)));
    set_tag_ops(ops, &path, EntityKind::Schema, &schema.tags);

    for table in &schema.tables {
        create_table_ops(ops, &path, table, false);
    }
    for volume in &schema.volumes {
        ops.push(create_volume_op(path.child(&volume.name), volume));
        set_tag_ops(ops, &path.child(&volume.name), EntityKind::Volume, &volume.tags);
    }
}

fn create_table_ops(ops: &mut Vec<ChangeOp>, schema_path: &EntityPath, table: &Table, destructive: bool) {
    let path = schema_path.child(&table.name);
    let mut shallow = table.clone();
    shallow.constraints = Vec::new();
    shallow.tags = Vec::new();
    for column in &mut shallow.columns {
        column.tags = Vec::new();
    }
    let op = ChangeOp::new(path.clone(), EntityKind::Table, Change::CreateTable(shallow));
    ops.push(if destructive { op.destructive() } else { op });
    set_tag_ops(ops, &path, EntityKind::Table, &table.tags);
    for column in &table.columns {
        set_tag_ops(ops, &path.child(&column.name), EntityKind::Column, &column.tags);
    }

    for constraint in &table.constraints {
        ops.push(ChangeOp::new(
            path.child(&constraint.name),
            EntityKind::Constraint,
            Change::AddConstraint(constraint.clone()),
        ));
    }
}

fn diff_catalog(ops: &mut Vec<ChangeOp>, path: &EntityPath, desired: &Catalog, observed: &Catalog) {
    alter_field(ops, path, EntityKind::Catalog, "comment", &observed.comment, &desired.comment);
    alter_field(ops, path, EntityKind::Catalog, "owner", &observed.owner, &desired.owner);
    alter_field(
        ops,
        path,
        EntityKind::Catalog,
        "managed_location",
        &observed.managed_location,
        &desired.managed_location,
    );

    // Workspace bindings are a set; order is not meaningful.
    let mut desired_ws = desired.bound_workspaces.clone();
    let mut observed_ws = observed.bound_workspaces.clone();
    desired_ws.sort();
    desired_ws.dedup();
    observed_ws.sort();
    observed_ws.dedup();
    if desired_ws != observed_ws {
        ops.push(ChangeOp::new(
            path.clone(),
            EntityKind::Catalog,
            Change::AlterField {
                field: "bound_workspaces",
                before: join_nonempty(&observed_ws),
                after: join_nonempty(&desired_ws),
            },
        ));
    }

    diff_tags(ops, path, EntityKind::Catalog, &desired.tags, &observed.tags);

    for schema in &desired.schemas {
        match observed.schema(&schema.name) {
            Some(current) => diff_schema(ops, &path.child(&schema.name), schema, current),
            None => create_schema_ops(ops, path, schema),
        }
    }
    for schema in &observed.schemas {
        if desired.schema(&schema.name).is_none() {
            let schema_path = path.child(&schema.name);
            for table in &schema.tables {
                drop_foreign_key_ops(ops, &schema_path.child(&table.name), table, &schema_path);
            }
            ops.push(ChangeOp::new(schema_path, EntityKind::Schema, Change::DropSchema));
        }
    }
}

fn diff_schema(ops: &mut Vec<ChangeOp>, path: &EntityPath, desired: &Schema, observed: &Schema) {
    alter_field(ops, path, EntityKind::Schema, "comment", &observed.comment, &desired.comment);
    alter_field(ops, path, EntityKind::Schema, "owner", &observed.owner, &desired.owner);
    alter_field(
        ops,
        path,
        EntityKind::Schema,
        "managed_location",
        &observed.managed_location,
        &desired.managed_location,
    );
    diff_tags(ops, path, EntityKind::Schema, &desired.tags, &observed.tags);

    for table in &desired.tables {
        match observed.table(&table.name) {
            Some(current) => diff_table(ops, &path.child(&table.name), table, current),
            None => create_table_ops(ops, path, table, false),
        }
    }
    for table in &observed.tables {
        if desired.table(&table.name).is_none() {
            let table_path = path.child(&table.name);
            drop_foreign_key_ops(ops, &table_path, table, &table_path);
            ops.push(ChangeOp::new(table_path, EntityKind::Table, Change::DropTable));
        }
    }

    for volume in &desired.volumes {
        match observed.volume(&volume.name) {
            Some(current) => diff_volume(ops, &path.child(&volume.name), volume, current),
            None => {
                ops.push(create_volume_op(path.child(&volume.name), volume));
                set_tag_ops(ops, &path.child(&volume.name), EntityKind::Volume, &volume.tags);
            }
        }
    }
    for volume in &observed.volumes {
        if desired.volume(&volume.name).is_none() {
            ops.push(ChangeOp::new(
                path.child(&volume.name),
                EntityKind::Volume,
                Change::DropVolume,
            ));
        }
    }
}

/// A MANAGED entity's location is target-assigned; only EXTERNAL locations
/// are part of the declared identity.
fn effective_location(kind: StorageKind, location: &Option<String>) -> Option<&String> {
    match kind {
        StorageKind::Managed => None,
        StorageKind::External => location.as_ref(),
    }
}

/// True when a table attribute the target cannot alter in place differs.
fn table_needs_replacement(desired: &Table, observed: &Table) -> bool {
    desired.kind != observed.kind
        || desired.format != observed.format
        || effective_location(desired.kind, &desired.location)
            != effective_location(observed.kind, &observed.location)
        || desired.partitioned_by != observed.partitioned_by
}

fn diff_table(ops: &mut Vec<ChangeOp>, path: &EntityPath, desired: &Table, observed: &Table) {
    if table_needs_replacement(desired, observed) {
        drop_foreign_key_ops(ops, path, observed, path);
        ops.push(ChangeOp::new(path.clone(), EntityKind::Table, Change::DropTable));
        let schema_path = path.ancestor(path.depth() - 1);
        create_table_ops(ops, &schema_path, desired, true);
        return;
    }

    alter_field(ops, path, EntityKind::Table, "comment", &observed.comment, &desired.comment);
    alter_field(ops, path, EntityKind::Table, "owner", &observed.owner, &desired.owner);
    alter_field(ops, path, EntityKind::Table, "row_filter", &observed.row_filter, &desired.row_filter);

    if desired.cluster_by != observed.cluster_by {
        ops.push(ChangeOp::new(
            path.clone(),
            EntityKind::Table,
            Change::AlterField {
                field: "cluster_by",
                before: join_nonempty(&observed.cluster_by),
                after: join_nonempty(&desired.cluster_by),
            },
        ));
    }

    if desired.properties != observed.properties {
        ops.push(ChangeOp::new(
            path.clone(),
            EntityKind::Table,
            Change::AlterProperties {
                before: observed.properties.clone(),
                after: desired.properties.clone(),
            },
        ));
    }

    diff_tags(ops, path, EntityKind::Table, &desired.tags, &observed.tags);
    diff_columns(ops, path, &desired.columns, &observed.columns);
    diff_constraints(ops, path, &desired.constraints, &observed.constraints);
}

fn diff_columns(ops: &mut Vec<ChangeOp>, table_path: &EntityPath, desired: &[Column], observed: &[Column]) {
    for column in desired {
        if !observed.iter().any(|c| c.name == column.name) {
            ops.push(add_column_op(table_path.child(&column.name), column));
            set_tag_ops(ops, &table_path.child(&column.name), EntityKind::Column, &column.tags);
        }
    }

    for column in observed {
        if !desired.iter().any(|c| c.name == column.name) {
            ops.push(ChangeOp::new(
                table_path.child(&column.name),
                EntityKind::Column,
                Change::DropColumn,
            ));
        }
    }

    for column in desired {
        let Some(current) = observed.iter().find(|c| c.name == column.name) else {
            continue;
        };
        let path = table_path.child(&column.name);

        // A fundamental type change cannot be expressed in place.
        if column.column_type != current.column_type {
            ops.push(ChangeOp::new(path.clone(), EntityKind::Column, Change::DropColumn));
            ops.push(add_column_op(path.clone(), column).destructive());
            set_tag_ops(ops, &path, EntityKind::Column, &column.tags);
            continue;
        }

        if column.nullable != current.nullable {
            ops.push(ChangeOp::new(
                path.clone(),
                EntityKind::Column,
                Change::AlterField {
                    field: "nullable",
                    before: Some(current.nullable.to_string()),
                    after: Some(column.nullable.to_string()),
                },
            ));
        }
        alter_field(ops, &path, EntityKind::Column, "default_value", &current.default_value, &column.default_value);
        alter_field(ops, &path, EntityKind::Column, "comment", &current.comment, &column.comment);
        alter_field(
            ops,
            &path,
            EntityKind::Column,
            "mask_expression",
            &current.mask_expression,
            &column.mask_expression,
        );
        diff_tags(ops, &path, EntityKind::Column, &column.tags, &current.tags);
    }
}

fn diff_constraints(
    ops: &mut Vec<ChangeOp>,
    table_path: &EntityPath,
    desired: &[Constraint],
    observed: &[Constraint],
) {
    for constraint in desired {
        if !observed.iter().any(|c| c.name == constraint.name) {
            ops.push(ChangeOp::new(
                table_path.child(&constraint.name),
                EntityKind::Constraint,
                Change::AddConstraint(constraint.clone()),
            ));
        }
    }

    for constraint in observed {
        if !desired.iter().any(|c| c.name == constraint.name) {
            ops.push(ChangeOp::new(
                table_path.child(&constraint.name),
                EntityKind::Constraint,
                Change::DropConstraint(constraint.clone()),
            ));
        }
    }

    for constraint in desired {
        let Some(current) = observed.iter().find(|c| c.name == constraint.name) else {
            continue;
        };
        let path = table_path.child(&constraint.name);

        if !constraint.def.same_structure(&current.def) {
            // Constraints are not alterable in place.
            ops.push(ChangeOp::new(
                path.clone(),
                EntityKind::Constraint,
                Change::DropConstraint(current.clone()),
            ));
            ops.push(
                ChangeOp::new(
                    path.clone(),
                    EntityKind::Constraint,
                    Change::AddConstraint(constraint.clone()),
                )
                .destructive(),
            );
            continue;
        }

        match (&constraint.def, &current.def) {
            (
                ConstraintDef::PrimaryKey { rely: want, .. },
                ConstraintDef::PrimaryKey { rely: have, .. },
            ) if want != have => {
                ops.push(ChangeOp::new(
                    path,
                    EntityKind::Constraint,
                    Change::ToggleConstraintFlag {
                        flag: ConstraintFlag::Rely,
                        value: *want,
                    },
                ));
            }
            (
                ConstraintDef::Check { enforced: want, .. },
                ConstraintDef::Check { enforced: have, .. },
            ) if want != have => {
                ops.push(ChangeOp::new(
                    path,
                    EntityKind::Constraint,
                    Change::ToggleConstraintFlag {
                        flag: ConstraintFlag::Enforced,
                        value: *want,
                    },
                ));
            }
            _ => {}
        }
    }
}

fn volume_needs_replacement(desired: &Volume, observed: &Volume) -> bool {
    desired.kind != observed.kind
        || effective_location(desired.kind, &desired.location)
            != effective_location(observed.kind, &observed.location)
}

fn diff_volume(ops: &mut Vec<ChangeOp>, path: &EntityPath, desired: &Volume, observed: &Volume) {
    if volume_needs_replacement(desired, observed) {
        ops.push(ChangeOp::new(path.clone(), EntityKind::Volume, Change::DropVolume));
        ops.push(create_volume_op(path.clone(), desired).destructive());
        set_tag_ops(ops, path, EntityKind::Volume, &desired.tags);
        return;
    }

    alter_field(ops, path, EntityKind::Volume, "comment", &observed.comment, &desired.comment);
    alter_field(ops, path, EntityKind::Volume, "owner", &observed.owner, &desired.owner);
    diff_tags(ops, path, EntityKind::Volume, &desired.tags, &observed.tags);
}

/// Tag sets are compared as maps keyed by tag key; duplicates within one
/// entity collapse last-wins. A value change is a single SET (overwrite) for
/// audit-log fidelity, never UNSET + SET.
fn diff_tags(
    ops: &mut Vec<ChangeOp>,
    path: &EntityPath,
    entity: EntityKind,
    desired: &[Tag],
    observed: &[Tag],
) {
    let desired_map: IndexMap<&str, &str> = desired
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();
    let observed_map: IndexMap<&str, &str> = observed
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();

    for (key, value) in &desired_map {
        match observed_map.get(key) {
            Some(current) if current == value => {}
            current => ops.push(ChangeOp::new(
                path.clone(),
                entity,
                Change::SetTag {
                    key: key.to_string(),
                    value: value.to_string(),
                    previous: current.map(|v| v.to_string()),
                },
            )),
        }
    }

    for (key, value) in &observed_map {
        if !desired_map.contains_key(key) {
            ops.push(ChangeOp::new(
                path.clone(),
                entity,
                Change::UnsetTag {
                    key: key.to_string(),
                    value: value.to_string(),
                },
            ));
        }
    }
}

fn alter_field(
    ops: &mut Vec<ChangeOp>,
    path: &EntityPath,
    entity: EntityKind,
    field: &'static str,
    before: &Option<String>,
    after: &Option<String>,
) {
    if before != after {
        ops.push(ChangeOp::new(
            path.clone(),
            entity,
            Change::AlterField {
                field,
                before: before.clone(),
                after: after.clone(),
            },
        ));
    }
}

fn join_nonempty(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stratum_model::{TableFormat, TableRef};

    fn make_column(name: &str, column_type: &str) -> Column {
        let mut col = Column::new(name, column_type);
        col.nullable = false;
        col
    }

    fn make_table(name: &str, columns: Vec<Column>) -> Table {
        let mut table = Table::new(name);
        table.columns = columns;
        table
    }

    fn make_catalog(tables: Vec<Table>) -> Catalog {
        let mut catalog = Catalog::new("prod");
        let mut schema = Schema::new("sales");
        schema.tables = tables;
        catalog.schemas.push(schema);
        catalog
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let catalog = make_catalog(vec![make_table(
            "orders",
            vec![make_column("order_id", "BIGINT")],
        )]);
        assert!(diff(&catalog, Some(&catalog)).is_empty());
    }

    #[test]
    fn test_diff_missing_catalog_creates_everything() {
        let mut table = make_table("customers", vec![make_column("customer_id", "BIGINT")]);
        table.constraints.push(Constraint {
            name: "customers_pk".into(),
            def: ConstraintDef::PrimaryKey {
                columns: vec!["customer_id".into()],
                rely: false,
            },
        });
        let catalog = make_catalog(vec![table]);

        let ops = diff(&catalog, None);
        let kinds: Vec<OpKind> = ops.iter().map(|o| o.kind()).collect();
        assert_eq!(
            kinds,
            vec![OpKind::Create, OpKind::Create, OpKind::Create, OpKind::Create]
        );
        assert!(matches!(ops[0].change, Change::CreateCatalog(_)));
        assert!(matches!(ops[1].change, Change::CreateSchema(_)));
        assert!(matches!(ops[2].change, Change::CreateTable(_)));
        assert!(matches!(ops[3].change, Change::AddConstraint(_)));
        assert!(ops.iter().all(|o| !o.destructive));
    }

    #[test]
    fn test_new_table_then_pk_constraint_order() {
        let mut table = make_table("customers", vec![make_column("customer_id", "BIGINT")]);
        table.constraints.push(Constraint {
            name: "customers_pk".into(),
            def: ConstraintDef::PrimaryKey {
                columns: vec!["customer_id".into()],
                rely: false,
            },
        });
        let desired = make_catalog(vec![table]);
        let observed = make_catalog(vec![]);

        let ops = diff(&desired, Some(&observed));
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0].change, Change::CreateTable(_)));
        assert!(matches!(ops[1].change, Change::AddConstraint(_)));
        assert_eq!(ops[1].path.to_string(), "prod.sales.customers.customers_pk");
    }

    #[test]
    fn test_dropped_column_is_destructive() {
        let desired = make_catalog(vec![make_table(
            "orders",
            vec![make_column("order_id", "BIGINT")],
        )]);
        let observed = make_catalog(vec![make_table(
            "orders",
            vec![
                make_column("order_id", "BIGINT"),
                make_column("legacy_flag", "BOOLEAN"),
            ],
        )]);

        let ops = diff(&desired, Some(&observed));
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0].change, Change::DropColumn));
        assert!(ops[0].destructive);
        assert_eq!(ops[0].path.to_string(), "prod.sales.orders.legacy_flag");
    }

    #[test]
    fn test_tag_value_change_is_single_set() {
        let mut desired = make_catalog(vec![]);
        desired.schemas[0].tags = vec![Tag::new("environment", "production")];
        let mut observed = make_catalog(vec![]);
        observed.schemas[0].tags = vec![Tag::new("environment", "staging")];

        let ops = diff(&desired, Some(&observed));
        assert_eq!(ops.len(), 1);
        match &ops[0].change {
            Change::SetTag {
                key,
                value,
                previous,
            } => {
                assert_eq!(key, "environment");
                assert_eq!(value, "production");
                assert_eq!(previous.as_deref(), Some("staging"));
            }
            other => panic!("expected single SetTag, got {other:?}"),
        }
    }

    #[test]
    fn test_new_table_tags_become_set_ops() {
        let mut table = make_table("orders", vec![make_column("order_id", "BIGINT")]);
        table.tags.push(Tag::new("tier", "gold"));
        table.columns[0].tags.push(Tag::new("pii", "false"));
        let desired = make_catalog(vec![table]);
        let observed = make_catalog(vec![]);

        let ops = diff(&desired, Some(&observed));
        match &ops[0].change {
            Change::CreateTable(t) => {
                assert!(t.tags.is_empty());
                assert!(t.columns[0].tags.is_empty());
            }
            other => panic!("expected create, got {other:?}"),
        }
        let tags: Vec<&ChangeOp> = ops
            .iter()
            .filter(|o| matches!(o.change, Change::SetTag { .. }))
            .collect();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].path.to_string(), "prod.sales.orders");
        assert_eq!(tags[1].path.to_string(), "prod.sales.orders.order_id");
    }

    fn make_fk(name: &str, column: &str, referenced: &str) -> Constraint {
        Constraint {
            name: name.into(),
            def: ConstraintDef::ForeignKey {
                columns: vec![column.into()],
                referenced_table: TableRef::qualified("prod", "sales", referenced),
                referenced_columns: vec!["id".into()],
            },
        }
    }

    #[test]
    fn test_dropped_table_sheds_foreign_keys_explicitly() {
        let mut orders = make_table("orders", vec![make_column("id", "BIGINT")]);
        orders.constraints.push(make_fk("orders_fk", "id", "customers"));
        let observed = make_catalog(vec![
            make_table("customers", vec![make_column("id", "BIGINT")]),
            orders,
        ]);
        let desired = make_catalog(vec![]);

        let ops = diff(&desired, Some(&observed));
        let drops: Vec<_> = ops
            .iter()
            .filter(|o| matches!(o.change, Change::DropConstraint(_)))
            .collect();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].path.to_string(), "prod.sales.orders.orders_fk");
        assert_eq!(
            ops.iter().filter(|o| matches!(o.change, Change::DropTable)).count(),
            2
        );
    }

    #[test]
    fn test_dropped_table_self_reference_needs_no_constraint_op() {
        let mut employees = make_table("employees", vec![make_column("id", "BIGINT")]);
        employees.constraints.push(make_fk("manager_fk", "id", "employees"));
        let observed = make_catalog(vec![employees]);
        let desired = make_catalog(vec![]);

        let ops = diff(&desired, Some(&observed));
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0].change, Change::DropTable));
    }

    #[test]
    fn test_dropped_schema_sheds_cross_schema_foreign_keys() {
        let desired = make_catalog(vec![make_table(
            "customers",
            vec![make_column("id", "BIGINT")],
        )]);
        let mut observed = desired.clone();
        let mut staging = Schema::new("staging");
        let mut mirror = make_table("mirror", vec![make_column("id", "BIGINT")]);
        mirror.constraints.push(make_fk("mirror_fk", "id", "customers"));
        staging.tables.push(mirror);
        observed.schemas.push(staging);

        let ops = diff(&desired, Some(&observed));
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0].change, Change::DropConstraint(_)));
        assert_eq!(ops[0].path.to_string(), "prod.staging.mirror.mirror_fk");
        assert!(matches!(ops[1].change, Change::DropSchema));
    }

    #[test]
    fn test_replaced_referenced_table_reattaches_foreign_keys() {
        let customers = || make_table("customers", vec![make_column("id", "BIGINT")]);
        let orders = || {
            let mut t = make_table("orders", vec![make_column("id", "BIGINT")]);
            t.constraints.push(make_fk("orders_fk", "id", "customers"));
            t
        };
        let mut desired_customers = customers();
        desired_customers.format = TableFormat::Iceberg;
        let desired = make_catalog(vec![desired_customers, orders()]);
        let observed = make_catalog(vec![customers(), orders()]);

        let ops = diff(&desired, Some(&observed));
        let constraint_ops: Vec<_> = ops
            .iter()
            .filter(|o| o.entity == EntityKind::Constraint)
            .collect();
        assert_eq!(constraint_ops.len(), 2);
        assert!(matches!(constraint_ops[0].change, Change::DropConstraint(_)));
        assert!(matches!(constraint_ops[1].change, Change::AddConstraint(_)));
        assert!(constraint_ops[1].destructive);
        assert!(constraint_ops
            .iter()
            .all(|o| o.path.to_string() == "prod.sales.orders.orders_fk"));
    }

    #[test]
    fn test_format_change_is_replacement() {
        let mut desired_table = make_table("events", vec![make_column("ts", "TIMESTAMP")]);
        desired_table.format = TableFormat::Iceberg;
        let observed_table = make_table("events", vec![make_column("ts", "TIMESTAMP")]);

        let desired = make_catalog(vec![desired_table]);
        let observed = make_catalog(vec![observed_table]);

        let ops = diff(&desired, Some(&observed));
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0].change, Change::DropTable));
        assert!(matches!(ops[1].change, Change::CreateTable(_)));
        assert!(ops[0].destructive && ops[1].destructive);
        assert_eq!(ops[0].path, ops[1].path);
    }

    #[test]
    fn test_managed_location_drift_is_ignored() {
        // Managed storage paths are assigned by the target; observing one is
        // not drift.
        let desired = make_catalog(vec![make_table("orders", vec![])]);
        let mut observed_table = make_table("orders", vec![]);
        observed_table.location = Some("s3://metastore/auto/orders".into());
        let observed = make_catalog(vec![observed_table]);

        assert!(diff(&desired, Some(&observed)).is_empty());
    }

    #[test]
    fn test_column_type_change_is_replacement() {
        let desired = make_catalog(vec![make_table(
            "orders",
            vec![make_column("amount", "DECIMAL(12,2)")],
        )]);
        let observed = make_catalog(vec![make_table(
            "orders",
            vec![make_column("amount", "DECIMAL(10,2)")],
        )]);

        let ops = diff(&desired, Some(&observed));
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0].change, Change::DropColumn));
        assert!(matches!(ops[1].change, Change::AddColumn(_)));
        assert!(ops[1].destructive);
    }

    #[test]
    fn test_column_type_case_difference_is_not_a_change() {
        let desired = make_catalog(vec![make_table(
            "orders",
            vec![make_column("amount", "decimal(10,2)")],
        )]);
        let observed = make_catalog(vec![make_table(
            "orders",
            vec![make_column("amount", "DECIMAL(10,2)")],
        )]);
        assert!(diff(&desired, Some(&observed)).is_empty());
    }

    #[test]
    fn test_rely_only_change_is_toggle() {
        let pk = |rely| Constraint {
            name: "orders_pk".into(),
            def: ConstraintDef::PrimaryKey {
                columns: vec!["order_id".into()],
                rely,
            },
        };
        let mut desired_table = make_table("orders", vec![make_column("order_id", "BIGINT")]);
        desired_table.constraints.push(pk(true));
        let mut observed_table = make_table("orders", vec![make_column("order_id", "BIGINT")]);
        observed_table.constraints.push(pk(false));

        let ops = diff(
            &make_catalog(vec![desired_table]),
            Some(&make_catalog(vec![observed_table])),
        );
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            ops[0].change,
            Change::ToggleConstraintFlag {
                flag: ConstraintFlag::Rely,
                value: true
            }
        ));
        assert!(!ops[0].destructive);
    }

    #[test]
    fn test_constraint_structure_change_is_drop_then_add() {
        let fk = |referenced: &str| Constraint {
            name: "orders_fk".into(),
            def: ConstraintDef::ForeignKey {
                columns: vec!["customer_id".into()],
                referenced_table: TableRef::qualified("prod", "sales", referenced),
                referenced_columns: vec!["id".into()],
            },
        };
        let mut desired_table = make_table("orders", vec![make_column("customer_id", "BIGINT")]);
        desired_table.constraints.push(fk("customers_v2"));
        let mut observed_table = make_table("orders", vec![make_column("customer_id", "BIGINT")]);
        observed_table.constraints.push(fk("customers"));

        let ops = diff(
            &make_catalog(vec![desired_table, make_table("customers_v2", vec![make_column("id", "BIGINT")])]),
            Some(&make_catalog(vec![observed_table, make_table("customers_v2", vec![make_column("id", "BIGINT")])])),
        );
        let constraint_ops: Vec<_> = ops
            .iter()
            .filter(|o| o.entity == EntityKind::Constraint)
            .collect();
        assert_eq!(constraint_ops.len(), 2);
        assert!(matches!(constraint_ops[0].change, Change::DropConstraint(_)));
        assert!(matches!(constraint_ops[1].change, Change::AddConstraint(_)));
        assert!(constraint_ops[0].destructive && constraint_ops[1].destructive);
    }

    #[test]
    fn test_properties_change_is_one_alter() {
        let mut desired_table = make_table("orders", vec![]);
        desired_table
            .properties
            .insert("delta.appendOnly".into(), "true".into());
        let observed_table = make_table("orders", vec![]);

        let ops = diff(
            &make_catalog(vec![desired_table]),
            Some(&make_catalog(vec![observed_table])),
        );
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0].change, Change::AlterProperties { .. }));
        assert_eq!(ops[0].kind(), OpKind::Alter);
    }

    #[test]
    fn test_observed_only_schema_is_dropped() {
        let desired = make_catalog(vec![]);
        let mut observed = make_catalog(vec![]);
        observed.schemas.push(Schema::new("scratch"));

        let ops = diff(&desired, Some(&observed));
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0].change, Change::DropSchema));
        assert!(ops[0].destructive);
    }

    #[test]
    fn test_op_display() {
        let catalog = make_catalog(vec![make_table("orders", vec![])]);
        let ops = diff(&catalog, Some(&make_catalog(vec![])));
        assert_eq!(ops[0].to_string(), "+ table prod.sales.orders");
    }

    // Keys drawn from a tiny alphabet so desired and observed overlap often.
    fn tag_set() -> impl Strategy<Value = Vec<Tag>> {
        proptest::collection::vec(
            ("[abc]{1,2}", "[xyz]{1,3}").prop_map(|(k, v)| Tag::new(k, v)),
            0..6,
        )
    }

    proptest! {
        /// Applying the SET/UNSET ops from diff(desired, observed) to the
        /// observed tag map must reproduce the desired tag map.
        #[test]
        fn prop_tag_ops_round_trip(desired_tags in tag_set(), observed_tags in tag_set()) {
            let mut desired = make_catalog(vec![]);
            desired.schemas[0].tags = desired_tags.clone();
            let mut observed = make_catalog(vec![]);
            observed.schemas[0].tags = observed_tags.clone();

            let mut result: IndexMap<String, String> = observed_tags
                .iter()
                .map(|t| (t.key.clone(), t.value.clone()))
                .collect();
            for op in diff(&desired, Some(&observed)) {
                match op.change {
                    Change::SetTag { key, value, .. } => {
                        result.insert(key, value);
                    }
                    Change::UnsetTag { key, .. } => {
                        result.shift_remove(&key);
                    }
                    other => prop_assert!(false, "unexpected op {other:?}"),
                }
            }

            let expected: IndexMap<String, String> = desired_tags
                .iter()
                .map(|t| (t.key.clone(), t.value.clone()))
                .collect();
            prop_assert_eq!(result, expected);
        }
    }
}
