//! Schema comparison for autogenerate.
//!
//! [`SchemaComparator`] compares the current schema (usually reflected from
//! a live database) with a declared target schema and reports the
//! differences as [`Diff`] values, in a deterministic order: added tables
//! (each followed by its indexes), removed tables, then per common table the
//! column differences followed by index and unique constraint differences.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::dialect::MigrationDialect;
use crate::diff::{Change, ColumnModification, Diff};
use crate::matcher::{
    columns_by_name, match_constraints, normalized_tables, partition, ConstraintChange,
    ConstraintRef, ConstraintSig,
};
use crate::schema::{
    ColumnShape, IndexShape, SchemaSnapshot, TableKey, TableShape, UniqueShape,
};

/// Name of the version table when none is configured.
pub const DEFAULT_VERSION_TABLE: &str = "lineage_version";

/// An object handed to an include filter.
#[derive(Debug, Clone, Copy)]
pub enum SchemaObject<'a> {
    Table(&'a TableShape),
    Column(&'a ColumnShape),
    Index(&'a IndexShape),
    UniqueConstraint(&'a UniqueShape),
}

impl<'a> From<&ConstraintSig<'a>> for SchemaObject<'a> {
    fn from(sig: &ConstraintSig<'a>) -> Self {
        match sig.object {
            ConstraintRef::Index(index) => Self::Index(index),
            ConstraintRef::Unique(constraint) => Self::UniqueConstraint(constraint),
        }
    }
}

/// Include filter: `(object, name, reflected, compare_to)`.
///
/// `reflected` is true for objects that exist only in the current schema;
/// `compare_to` is the current-side counterpart of a target object, if any.
pub type IncludeObject =
    Arc<dyn Fn(SchemaObject<'_>, &str, bool, Option<SchemaObject<'_>>) -> bool + Send + Sync>;

/// Type comparison hook: `Some(changed)` decides, `None` defers to the
/// dialect. Called with `(current, target)`.
pub type TypeComparator = Arc<dyn Fn(&ColumnShape, &ColumnShape) -> Option<bool> + Send + Sync>;

/// Server default comparison hook, called with both columns and both
/// normalized defaults. `None` defers to the dialect.
pub type DefaultComparator = Arc<
    dyn Fn(&ColumnShape, &ColumnShape, Option<&str>, Option<&str>) -> Option<bool> + Send + Sync,
>;

/// Options for schema comparison.
#[derive(Clone)]
pub struct CompareOptions {
    /// Compare column types.
    pub compare_type: bool,
    /// Compare column nullability.
    pub compare_nullable: bool,
    /// Compare server defaults.
    pub compare_server_default: bool,
    /// Reflect every schema, not only the default one.
    pub include_schemas: bool,
    /// Table holding the applied revision, never reported as a difference.
    pub version_table: String,
    include_object: Vec<IncludeObject>,
    type_comparator: Option<TypeComparator>,
    default_comparator: Option<DefaultComparator>,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            compare_type: true,
            compare_nullable: true,
            compare_server_default: true,
            include_schemas: false,
            version_table: DEFAULT_VERSION_TABLE.to_string(),
            include_object: Vec::new(),
            type_comparator: None,
            default_comparator: None,
        }
    }
}

impl CompareOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an include filter. Every filter must accept an object.
    #[must_use]
    pub fn with_include_object<F>(mut self, filter: F) -> Self
    where
        F: Fn(SchemaObject<'_>, &str, bool, Option<SchemaObject<'_>>) -> bool
            + Send
            + Sync
            + 'static,
    {
        self.include_object.push(Arc::new(filter));
        self
    }

    /// Sets the type comparison hook.
    #[must_use]
    pub fn with_type_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&ColumnShape, &ColumnShape) -> Option<bool> + Send + Sync + 'static,
    {
        self.type_comparator = Some(Arc::new(comparator));
        self
    }

    /// Sets the server default comparison hook.
    #[must_use]
    pub fn with_default_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&ColumnShape, &ColumnShape, Option<&str>, Option<&str>) -> Option<bool>
            + Send
            + Sync
            + 'static,
    {
        self.default_comparator = Some(Arc::new(comparator));
        self
    }

    /// Uses a different version table name.
    #[must_use]
    pub fn with_version_table(mut self, name: impl Into<String>) -> Self {
        self.version_table = name.into();
        self
    }

    /// Reflects all schemas.
    #[must_use]
    pub fn with_schemas(mut self) -> Self {
        self.include_schemas = true;
        self
    }

    fn include(
        &self,
        object: SchemaObject<'_>,
        name: &str,
        reflected: bool,
        compare_to: Option<SchemaObject<'_>>,
    ) -> bool {
        self.include_object
            .iter()
            .all(|filter| filter(object, name, reflected, compare_to))
    }
}

impl fmt::Debug for CompareOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompareOptions")
            .field("compare_type", &self.compare_type)
            .field("compare_nullable", &self.compare_nullable)
            .field("compare_server_default", &self.compare_server_default)
            .field("include_schemas", &self.include_schemas)
            .field("version_table", &self.version_table)
            .field("include_object", &self.include_object.len())
            .field("type_comparator", &self.type_comparator.is_some())
            .field("default_comparator", &self.default_comparator.is_some())
            .finish()
    }
}

/// Compares a current schema with a target schema.
#[derive(Clone)]
pub struct SchemaComparator {
    dialect: Arc<dyn MigrationDialect>,
    options: CompareOptions,
}

impl fmt::Debug for SchemaComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaComparator")
            .field("dialect", &self.dialect.name())
            .field("options", &self.options)
            .finish()
    }
}

impl SchemaComparator {
    /// Creates a comparator for the given dialect.
    #[must_use]
    pub fn new(dialect: Arc<dyn MigrationDialect>, options: CompareOptions) -> Self {
        Self { dialect, options }
    }

    /// Options in use.
    #[must_use]
    pub fn options(&self) -> &CompareOptions {
        &self.options
    }

    /// Differences that turn `current` into `target`.
    #[must_use]
    pub fn compare(&self, current: &SchemaSnapshot, target: &SchemaSnapshot) -> Vec<Diff> {
        let default_schema = current.default_schema.as_deref();
        let current_tables = normalized_tables(current, default_schema);
        let target_tables = normalized_tables(target, default_schema);

        let current_keys: BTreeSet<TableKey> = current_tables.keys().cloned().collect();
        let target_keys: BTreeSet<TableKey> = target_tables.keys().cloned().collect();
        let keys = partition(&current_keys, &target_keys);

        let mut diffs = Vec::new();

        for key in &keys.only_target {
            let table = target_tables[key];
            if !self
                .options
                .include(SchemaObject::Table(table), &key.name, false, None)
            {
                continue;
            }
            let mut added = table.clone();
            added.schema.clone_from(&key.schema);
            push(&mut diffs, Diff::AddTable { table: added });

            for index in &table.indexes {
                if self.options.include(
                    SchemaObject::Index(index),
                    index.name.as_deref().unwrap_or_default(),
                    false,
                    None,
                ) {
                    push(
                        &mut diffs,
                        Diff::AddIndex {
                            table: key.clone(),
                            index: index.clone(),
                        },
                    );
                }
            }
        }

        for key in &keys.only_current {
            let table = current_tables[key];
            if !self
                .options
                .include(SchemaObject::Table(table), &key.name, true, None)
            {
                continue;
            }
            // Indexes go first so the downgrade recreates them after the table.
            let mut uniques = table.unique_constraints.clone();
            let mut indexes = table.indexes.clone();
            self.dialect
                .correct_for_autogen(&mut uniques, &mut indexes, &mut Vec::new(), &mut Vec::new());
            for index in indexes {
                if self.options.include(
                    SchemaObject::Index(&index),
                    index.name.as_deref().unwrap_or_default(),
                    true,
                    None,
                ) {
                    push(
                        &mut diffs,
                        Diff::RemoveIndex {
                            table: key.clone(),
                            index,
                        },
                    );
                }
            }

            let mut removed = table.clone();
            removed.schema.clone_from(&key.schema);
            push(&mut diffs, Diff::RemoveTable { table: removed });
        }

        for key in &keys.both {
            let (existing, wanted) = (current_tables[key], target_tables[key]);
            if !self.options.include(
                SchemaObject::Table(wanted),
                &key.name,
                false,
                Some(SchemaObject::Table(existing)),
            ) {
                continue;
            }
            self.compare_columns(key, existing, wanted, &mut diffs);
            self.compare_constraints(
                key,
                existing,
                wanted,
                current.unique_constraints_reflected,
                &mut diffs,
            );
        }

        debug!(count = diffs.len(), "Schema comparison finished");
        diffs
    }

    fn compare_columns(
        &self,
        table: &TableKey,
        current: &TableShape,
        target: &TableShape,
        diffs: &mut Vec<Diff>,
    ) {
        let current_columns = columns_by_name(current);
        let target_columns = columns_by_name(target);
        let names = partition(
            &current_columns.keys().copied().collect(),
            &target_columns.keys().copied().collect(),
        );

        for name in names.only_target {
            let column = target_columns[name];
            if self
                .options
                .include(SchemaObject::Column(column), name, false, None)
            {
                push(
                    diffs,
                    Diff::AddColumn {
                        table: table.clone(),
                        column: column.clone(),
                    },
                );
            }
        }

        for name in names.only_current {
            let column = current_columns[name];
            if self
                .options
                .include(SchemaObject::Column(column), name, true, None)
            {
                push(
                    diffs,
                    Diff::RemoveColumn {
                        table: table.clone(),
                        column: column.clone(),
                    },
                );
            }
        }

        for name in names.both {
            let (existing, wanted) = (current_columns[name], target_columns[name]);
            if !self.options.include(
                SchemaObject::Column(wanted),
                name,
                false,
                Some(SchemaObject::Column(existing)),
            ) {
                continue;
            }
            if let Some(modification) = self.compare_column(table, existing, wanted) {
                push(diffs, Diff::ModifyColumn(modification));
            }
        }
    }

    fn compare_column(
        &self,
        table: &TableKey,
        current: &ColumnShape,
        target: &ColumnShape,
    ) -> Option<ColumnModification> {
        let mut modification = ColumnModification::new(table.clone(), current);

        if self.options.compare_type
            && !current.sql_type.is_null()
            && !target.sql_type.is_null()
        {
            let changed = self
                .options
                .type_comparator
                .as_ref()
                .and_then(|hook| hook(current, target))
                .unwrap_or_else(|| self.dialect.compare_type(current, target));
            if changed {
                modification.type_change =
                    Some(Change::new(current.sql_type.clone(), target.sql_type.clone()));
            }
        }

        if self.options.compare_nullable && current.nullable != target.nullable {
            modification.nullable_change = Some(Change::new(current.nullable, target.nullable));
        }

        if self.options.compare_server_default {
            let rendered_current = current.rendered_default();
            let rendered_target = target.rendered_default();
            if rendered_current.is_some() || rendered_target.is_some() {
                let changed = self
                    .options
                    .default_comparator
                    .as_ref()
                    .and_then(|hook| {
                        hook(
                            current,
                            target,
                            rendered_current.as_deref(),
                            rendered_target.as_deref(),
                        )
                    })
                    .unwrap_or_else(|| {
                        self.dialect.compare_server_default(
                            current,
                            target,
                            rendered_current.as_deref(),
                            rendered_target.as_deref(),
                        )
                    });
                if changed {
                    modification.default_change = Some(Change::new(
                        current.server_default.clone(),
                        target.server_default.clone(),
                    ));
                }
            }
        }

        (!modification.is_empty()).then_some(modification)
    }

    fn compare_constraints(
        &self,
        table: &TableKey,
        current: &TableShape,
        target: &TableShape,
        uniques_known: bool,
        diffs: &mut Vec<Diff>,
    ) {
        let mut current_uniques = if uniques_known {
            current.unique_constraints.clone()
        } else {
            Vec::new()
        };
        let mut current_indexes = current.indexes.clone();
        let mut target_uniques = target.unique_constraints.clone();
        let mut target_indexes = target.indexes.clone();

        self.dialect.correct_for_autogen(
            &mut current_uniques,
            &mut current_indexes,
            &mut target_uniques,
            &mut target_indexes,
        );

        let current_sigs: Vec<ConstraintSig<'_>> = current_indexes
            .iter()
            .map(ConstraintSig::from_index)
            .chain(current_uniques.iter().map(ConstraintSig::from_unique))
            .collect();
        let target_sigs: Vec<ConstraintSig<'_>> = target_indexes
            .iter()
            .map(ConstraintSig::from_index)
            .chain(target_uniques.iter().map(ConstraintSig::from_unique))
            .collect();

        let mut changes = match_constraints(&current_sigs, &target_sigs);
        changes.sort_by_key(ConstraintChange::sort_key);

        for change in changes {
            match change {
                ConstraintChange::Added(sig) => {
                    if self.options.include((&sig).into(), &sig.sort_key(), false, None) {
                        self.emit_added(table, &sig, uniques_known, diffs);
                    }
                }
                ConstraintChange::Removed(sig) => {
                    if self.options.include((&sig).into(), &sig.sort_key(), true, None) {
                        self.emit_removed(table, &sig, uniques_known, diffs);
                    }
                }
                ConstraintChange::Changed { old, new } => {
                    if self.options.include(
                        (&new).into(),
                        &new.sort_key(),
                        false,
                        Some((&old).into()),
                    ) {
                        let removable = uniques_known
                            || !matches!(old.object, ConstraintRef::Index(ix) if ix.unique);
                        let addable =
                            uniques_known || matches!(new.object, ConstraintRef::Index(_));
                        if !(removable && addable) {
                            debug!(
                                table = %table,
                                constraint = %new.sort_key(),
                                "Keeping changed constraint, unique constraints are unknown"
                            );
                            continue;
                        }
                        self.emit_removed(table, &old, uniques_known, diffs);
                        self.emit_added(table, &new, uniques_known, diffs);
                    }
                }
            }
        }
    }

    fn emit_added(
        &self,
        table: &TableKey,
        sig: &ConstraintSig<'_>,
        uniques_known: bool,
        diffs: &mut Vec<Diff>,
    ) {
        match sig.object {
            ConstraintRef::Index(index) => push(
                diffs,
                Diff::AddIndex {
                    table: table.clone(),
                    index: index.clone(),
                },
            ),
            ConstraintRef::Unique(constraint) => {
                if !uniques_known {
                    debug!(
                        table = %table,
                        dialect = self.dialect.name(),
                        "Skipping unique constraint, backend doesn't report them"
                    );
                    return;
                }
                push(
                    diffs,
                    Diff::AddConstraint {
                        table: table.clone(),
                        constraint: constraint.clone(),
                    },
                );
            }
        }
    }

    fn emit_removed(
        &self,
        table: &TableKey,
        sig: &ConstraintSig<'_>,
        uniques_known: bool,
        diffs: &mut Vec<Diff>,
    ) {
        match sig.object {
            ConstraintRef::Index(index) => {
                if index.unique && !uniques_known {
                    debug!(
                        table = %table,
                        index = index.name.as_deref().unwrap_or_default(),
                        "Keeping unique index, unique constraints are unknown"
                    );
                    return;
                }
                push(
                    diffs,
                    Diff::RemoveIndex {
                        table: table.clone(),
                        index: index.clone(),
                    },
                );
            }
            ConstraintRef::Unique(constraint) => push(
                diffs,
                Diff::RemoveConstraint {
                    table: table.clone(),
                    constraint: constraint.clone(),
                },
            ),
        }
    }
}

fn push(diffs: &mut Vec<Diff>, diff: Diff) {
    info!("{diff}");
    diffs.push(diff);
}
