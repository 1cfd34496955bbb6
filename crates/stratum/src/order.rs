//! Dependency ordering of a change set.
//!
//! The differ emits operations in tree pre-order; this module reorders them so
//! that every operation's prerequisites run first:
//!
//! - an entity is created before anything inside it is touched,
//! - a DROP at a path runs before a CREATE at the same path (replacement),
//! - drops run leaf-first (a drop below a path precedes the drop of the path),
//! - a foreign key is added only after its referenced table exists, and the
//!   CREATE of a referencing table is pinned after the CREATE of the table it
//!   references, so mutual references between two new tables surface as a
//!   cycle instead of an unexecutable plan,
//! - a foreign key referencing a table is dropped before that table (or any
//!   ancestor of it) is dropped.
//!
//! Ordering is Kahn's algorithm with a min-heap keyed on the operation's
//! pre-order index, so ops with no mutual dependency keep their tree order and
//! the output is deterministic for a given input pair.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use stratum_model::ConstraintDef;

use crate::diff::{Change, ChangeOp, OpKind};
use crate::error::Error;
use crate::path::EntityPath;

/// The referenced table path of a foreign-key constraint op, if any.
fn fk_referenced_path(op: &ChangeOp) -> Option<EntityPath> {
    let constraint = match &op.change {
        Change::AddConstraint(c) | Change::DropConstraint(c) => c,
        _ => return None,
    };
    match &constraint.def {
        ConstraintDef::ForeignKey {
            referenced_table, ..
        } => Some(EntityPath::of_table_ref(referenced_table)),
        _ => None,
    }
}

/// The table a constraint op belongs to.
fn constraint_table_path(op: &ChangeOp) -> EntityPath {
    op.path.ancestor(op.path.depth() - 1)
}

fn is_create(op: &ChangeOp) -> bool {
    op.kind() == OpKind::Create
}

fn is_drop(op: &ChangeOp) -> bool {
    op.kind() == OpKind::Drop
}

/// Topologically order `ops`. Returns [`Error::DependencyCycle`] naming the
/// entities involved when no valid order exists.
pub fn order(ops: Vec<ChangeOp>) -> Result<Vec<ChangeOp>, Error> {
    let n = ops.len();
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];

    fn add_edge(edges: &mut [Vec<usize>], indegree: &mut [usize], from: usize, to: usize) {
        if from != to && !edges[from].contains(&to) {
            edges[from].push(to);
            indegree[to] += 1;
        }
    }

    for (i, a) in ops.iter().enumerate() {
        for (j, b) in ops.iter().enumerate() {
            if i == j {
                continue;
            }

            // Creation precedes everything inside the created entity.
            if is_create(a) && !is_drop(b) && a.path.contains(&b.path) {
                add_edge(&mut edges, &mut indegree, i, j);
            }

            // Replacement at one path: the old entity goes away first.
            if is_drop(a) && is_create(b) && a.path == b.path {
                add_edge(&mut edges, &mut indegree, i, j);
            }

            // Drops run leaf-first.
            if is_drop(a) && is_drop(b) && b.path.contains(&a.path) && a.path != b.path {
                add_edge(&mut edges, &mut indegree, i, j);
            }
        }
    }

    for (i, op) in ops.iter().enumerate() {
        let Some(referenced) = fk_referenced_path(op) else {
            continue;
        };

        match op.kind() {
            OpKind::Create => {
                // The referenced table must exist before the FK is added, and
                // before the referencing table itself is created. The second
                // edge is what turns mutual references between two new tables
                // into a reportable cycle.
                let own_table = constraint_table_path(op);
                for (j, other) in ops.iter().enumerate() {
                    if !matches!(other.change, Change::CreateTable(_)) || other.path != referenced {
                        continue;
                    }
                    add_edge(&mut edges, &mut indegree, j, i);
                    if referenced != own_table {
                        if let Some(k) = ops
                            .iter()
                            .position(|o| matches!(o.change, Change::CreateTable(_)) && o.path == own_table)
                        {
                            add_edge(&mut edges, &mut indegree, j, k);
                        }
                    }
                }
            }
            OpKind::Drop => {
                // The FK must be gone before its referenced table (or any
                // ancestor of it) is dropped.
                for (j, other) in ops.iter().enumerate() {
                    if is_drop(other) && other.path.contains(&referenced) {
                        add_edge(&mut edges, &mut indegree, i, j);
                    }
                }
            }
            _ => {}
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut ordered = Vec::with_capacity(n);
    let mut emitted = vec![false; n];
    while let Some(Reverse(i)) = ready.pop() {
        emitted[i] = true;
        for &j in &edges[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
        ordered.push(i);
    }

    if ordered.len() < n {
        // The unemitted set contains both the cycle and everything downstream
        // of it. Peel off nodes with no outgoing edge into the unemitted
        // subgraph until only the cycle members remain.
        let mut on_cycle: Vec<bool> = emitted.iter().map(|e| !e).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..n {
                if on_cycle[i] && !edges[i].iter().any(|&j| on_cycle[j]) {
                    on_cycle[i] = false;
                    changed = true;
                }
            }
        }
        let mut members: Vec<String> = ops
            .iter()
            .enumerate()
            .filter(|(i, _)| on_cycle[*i])
            .map(|(_, op)| op.path.to_string())
            .collect();
        members.sort();
        members.dedup();
        return Err(Error::DependencyCycle { members });
    }

    let mut by_index: Vec<Option<ChangeOp>> = ops.into_iter().map(Some).collect();
    let ordered = ordered
        .into_iter()
        .filter_map(|i| by_index[i].take())
        .collect();
    Ok(ordered)
}
