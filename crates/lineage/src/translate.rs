//! Turning schema differences into migration operations.
//!
//! Upgrade operations follow the diff order; downgrade operations walk the
//! diffs backwards and undo each one. Unnamed indexes and constraints get
//! their conventional names here, so the upgrade and the downgrade agree on
//! what to call them.

use crate::diff::{Change, ColumnModification, Diff};
use crate::operations::{
    index_name, unique_name, ColumnChanges, ExistingColumn, MigrationOperation, Operations,
};
use crate::schema::{IndexShape, UniqueShape};

/// Operations that apply `diffs`.
#[must_use]
pub fn upgrade_operations(diffs: &[Diff]) -> Vec<MigrationOperation> {
    let mut ops = Operations::new();
    for diff in diffs {
        apply(diff, &mut ops);
    }
    ops.into_operations()
}

/// Operations that undo `diffs`.
#[must_use]
pub fn downgrade_operations(diffs: &[Diff]) -> Vec<MigrationOperation> {
    let mut ops = Operations::new();
    for diff in diffs.iter().rev() {
        apply(&invert(diff), &mut ops);
    }
    ops.into_operations()
}

/// Records the operation for one difference.
pub fn apply(diff: &Diff, ops: &mut Operations) {
    match diff {
        Diff::AddTable { table } => {
            ops.create_table(table.clone());
        }
        Diff::RemoveTable { table } => {
            ops.drop_table(table.key());
        }
        Diff::AddColumn { table, column } => {
            ops.add_column(table.clone(), column.clone());
        }
        Diff::RemoveColumn { table, column } => {
            ops.drop_column(table.clone(), &column.name);
        }
        Diff::ModifyColumn(modification) => {
            let (changes, existing) = column_changes(modification);
            ops.alter_column(
                modification.table.clone(),
                &modification.column,
                changes,
                existing,
            );
        }
        Diff::AddIndex { table, index } => {
            let named = IndexShape {
                name: Some(index_name(&table.name, index)),
                ..index.clone()
            };
            ops.create_index(table.clone(), named);
        }
        Diff::RemoveIndex { table, index } => {
            ops.drop_index(table.clone(), &index_name(&table.name, index));
        }
        Diff::AddConstraint { table, constraint } => {
            let named = UniqueShape {
                name: Some(unique_name(&table.name, constraint)),
                ..constraint.clone()
            };
            ops.create_unique_constraint(table.clone(), named);
        }
        Diff::RemoveConstraint { table, constraint } => {
            ops.drop_constraint(table.clone(), &unique_name(&table.name, constraint));
        }
    }
}

fn column_changes(modification: &ColumnModification) -> (ColumnChanges, ExistingColumn) {
    let mut changes = ColumnChanges::new();
    if let Some(change) = &modification.type_change {
        changes = changes.set_type(change.to.clone());
    }
    if let Some(change) = &modification.nullable_change {
        changes = changes.set_nullable(change.to);
    }
    if let Some(change) = &modification.default_change {
        changes = changes.set_server_default(change.to.clone());
    }

    let existing = ExistingColumn {
        sql_type: (!modification.existing_type.is_null())
            .then(|| modification.existing_type.clone()),
        nullable: Some(modification.existing_nullable),
        server_default: modification.existing_server_default.clone(),
    };
    (changes, existing)
}

fn swap<T: Clone>(change: &Change<T>) -> Change<T> {
    Change::new(change.to.clone(), change.from.clone())
}

/// The difference that undoes `diff`.
#[must_use]
pub fn invert(diff: &Diff) -> Diff {
    match diff {
        Diff::AddTable { table } => Diff::RemoveTable {
            table: table.clone(),
        },
        Diff::RemoveTable { table } => Diff::AddTable {
            table: table.clone(),
        },
        Diff::AddColumn { table, column } => Diff::RemoveColumn {
            table: table.clone(),
            column: column.clone(),
        },
        Diff::RemoveColumn { table, column } => Diff::AddColumn {
            table: table.clone(),
            column: column.clone(),
        },
        Diff::ModifyColumn(m) => Diff::ModifyColumn(ColumnModification {
            table: m.table.clone(),
            column: m.column.clone(),
            existing_type: m
                .type_change
                .as_ref()
                .map_or_else(|| m.existing_type.clone(), |c| c.to.clone()),
            existing_nullable: m.nullable_change.as_ref().map_or(m.existing_nullable, |c| c.to),
            existing_server_default: m
                .default_change
                .as_ref()
                .map_or_else(|| m.existing_server_default.clone(), |c| c.to.clone()),
            type_change: m.type_change.as_ref().map(swap),
            nullable_change: m.nullable_change.as_ref().map(swap),
            default_change: m.default_change.as_ref().map(swap),
        }),
        Diff::AddIndex { table, index } => Diff::RemoveIndex {
            table: table.clone(),
            index: index.clone(),
        },
        Diff::RemoveIndex { table, index } => Diff::AddIndex {
            table: table.clone(),
            index: index.clone(),
        },
        Diff::AddConstraint { table, constraint } => Diff::RemoveConstraint {
            table: table.clone(),
            constraint: constraint.clone(),
        },
        Diff::RemoveConstraint { table, constraint } => Diff::AddConstraint {
            table: table.clone(),
            constraint: constraint.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::DefaultChange;
    use crate::schema::{ColumnShape, SqlType, TableKey, TableShape};

    fn modify_x() -> Diff {
        let current = ColumnShape::new("x", SqlType::Integer).not_null();
        let mut modification = ColumnModification::new(TableKey::from("t"), &current);
        modification.default_change = Some(Change::new(None, Some("0".to_string())));
        modification.type_change = Some(Change::new(SqlType::Integer, SqlType::BigInt));
        Diff::ModifyColumn(modification)
    }

    #[test]
    fn test_upgrade_operations_follow_diff_order() {
        let diffs = vec![
            Diff::AddTable {
                table: TableShape::new("bat"),
            },
            Diff::AddIndex {
                table: TableKey::from("bat"),
                index: IndexShape::unnamed(&["a", "b"]),
            },
            Diff::RemoveColumn {
                table: TableKey::from("t"),
                column: ColumnShape::new("old_data", SqlType::Text),
            },
            modify_x(),
        ];

        let ops = upgrade_operations(&diffs);
        assert_eq!(ops.len(), 4);
        assert!(matches!(&ops[0], MigrationOperation::CreateTable { table } if table.name == "bat"));
        assert!(matches!(
            &ops[1],
            MigrationOperation::CreateIndex { index, .. } if index.name.as_deref() == Some("ix_bat_a_b")
        ));
        assert!(matches!(
            &ops[2],
            MigrationOperation::DropColumn { column_name, .. } if column_name == "old_data"
        ));
        let MigrationOperation::AlterColumn {
            changes, existing, ..
        } = &ops[3]
        else {
            panic!("expected ALTER COLUMN, got {:?}", ops[3]);
        };
        assert_eq!(changes.sql_type, Some(SqlType::BigInt));
        assert_eq!(changes.server_default, Some(DefaultChange::Set("0".to_string())));
        assert_eq!(changes.nullable, None);
        assert_eq!(existing.sql_type, Some(SqlType::Integer));
        assert_eq!(existing.nullable, Some(false));
    }

    #[test]
    fn test_downgrade_operations_undo_in_reverse() {
        let diffs = vec![
            Diff::AddTable {
                table: TableShape::new("bat"),
            },
            Diff::AddIndex {
                table: TableKey::from("bat"),
                index: IndexShape::unnamed(&["a"]),
            },
            modify_x(),
        ];

        let ops = downgrade_operations(&diffs);
        assert_eq!(ops.len(), 3);
        let MigrationOperation::AlterColumn {
            changes, existing, ..
        } = &ops[0]
        else {
            panic!("expected ALTER COLUMN, got {:?}", ops[0]);
        };
        assert_eq!(changes.sql_type, Some(SqlType::Integer));
        assert_eq!(changes.server_default, Some(DefaultChange::Drop));
        assert_eq!(existing.sql_type, Some(SqlType::BigInt));
        assert_eq!(existing.server_default.as_deref(), Some("0"));

        assert!(matches!(
            &ops[1],
            MigrationOperation::DropIndex { name, .. } if name == "ix_bat_a"
        ));
        assert!(matches!(&ops[2], MigrationOperation::DropTable { table } if table.name == "bat"));
    }

    #[test]
    fn test_invert_twice_is_identity() {
        let diff = modify_x();
        assert_eq!(invert(&invert(&diff)), diff);

        let diff = Diff::AddConstraint {
            table: TableKey::from("t"),
            constraint: UniqueShape::unnamed(&["email"]),
        };
        assert_eq!(invert(&invert(&diff)), diff);
    }

    #[test]
    fn test_constraint_names_filled_in() {
        let diffs = vec![Diff::AddConstraint {
            table: TableKey::from("users"),
            constraint: UniqueShape::unnamed(&["email"]),
        }];
        let up = upgrade_operations(&diffs);
        assert!(matches!(
            &up[0],
            MigrationOperation::AddUniqueConstraint { constraint, .. }
                if constraint.name.as_deref() == Some("uq_users_email")
        ));
        let down = downgrade_operations(&diffs);
        assert!(matches!(
            &down[0],
            MigrationOperation::DropUniqueConstraint { name, .. } if name == "uq_users_email"
        ));
    }
}
