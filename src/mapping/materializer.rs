//! Filling entity instances from result rows.

use crate::error::{DbError, DbResult};
use crate::mapping::adapter::RowAdapter;
use crate::mapping::description::TypeDescription;
use crate::mapping::entity::{AnyEntity, Entity};
use crate::mapping::field::ValueKind;
use crate::models::{DataTable, Value};
use std::any::Any;

/// How much of an entity a load is expected to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Also load members flagged `only_load_all`.
    pub load_all: bool,
    /// Fail with `LoadIncomplete` when fewer members were set than expected.
    pub verify: bool,
}

impl LoadOptions {
    pub const fn partial() -> Self {
        Self {
            load_all: false,
            verify: true,
        }
    }

    pub const fn full() -> Self {
        Self {
            load_all: true,
            verify: true,
        }
    }

    pub const fn lenient(self) -> Self {
        Self {
            verify: false,
            ..self
        }
    }

    pub const fn strict(self) -> Self {
        Self {
            verify: true,
            ..self
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::partial()
    }
}

/// Fill `entity` from the adapter's current row and return how many members
/// were set.
///
/// A member whose column is absent or whose value cannot be coerced is left
/// untouched; NULL counts as set without touching the member. Nested members
/// are reset and filled from columns prefixed with their column name.
pub fn fill(
    adapter: &RowAdapter<'_>,
    entity: &mut dyn AnyEntity,
    options: LoadOptions,
) -> DbResult<usize> {
    let description = entity.description();
    description.ensure_entity()?;
    fill_prefixed(adapter, &description, entity.as_any_mut(), options, "")
}

fn fill_prefixed(
    adapter: &RowAdapter<'_>,
    description: &TypeDescription,
    entity: &mut dyn Any,
    options: LoadOptions,
    prefix: &str,
) -> DbResult<usize> {
    let mut loaded = 0;
    let mut failed = Vec::new();

    for field in description.fields() {
        if field.flags().ignore_load {
            continue;
        }

        if let Some(nested) = field.nested() {
            nested.reset(entity);
            let child_description = nested.description();
            let child = nested.get_mut(entity).ok_or_else(|| {
                DbError::internal(format!(
                    "nested member '{}' does not belong to {}",
                    field.name(),
                    description.type_name()
                ))
            })?;
            let child_prefix = format!("{}{}", prefix, field.column());
            fill_prefixed(
                adapter,
                &child_description,
                child.as_any_mut(),
                options,
                &child_prefix,
            )?;
            continue;
        }

        if !options.load_all && field.flags().only_load_all {
            continue;
        }

        let column = format!("{}{}", prefix, field.column()).to_uppercase();
        let set = match adapter.value_of_upper(&column) {
            None => false,
            Some(Value::Null) => true,
            Some(value) => field.set_value(entity, value),
        };
        if set {
            loaded += 1;
        } else if options.verify {
            failed.push(field.name());
        }
    }

    if options.verify && loaded != description.expected_count(options.load_all) {
        return Err(DbError::load_incomplete(description.type_name(), failed));
    }
    Ok(loaded)
}

/// Build one `T` from the adapter's current row.
pub fn load_item<T: Entity>(adapter: &RowAdapter<'_>, options: LoadOptions) -> DbResult<T> {
    let mut item = T::default();
    fill(adapter, &mut item, options)?;
    Ok(item)
}

/// Load every row of `table` with a full, unverified load.
pub fn load_all_from_table<T: Entity>(table: &DataTable) -> DbResult<Vec<T>> {
    let mut items = Vec::with_capacity(table.row_count());
    let mut adapter = RowAdapter::buffered(table, 0);
    for row in 0..table.row_count() {
        adapter.rebind(row);
        items.push(load_item(&adapter, LoadOptions::full().lenient())?);
    }
    Ok(items)
}

/// Replace every empty optional string member with "".
pub fn set_strings_to_empty(entity: &mut dyn AnyEntity) {
    let description = entity.description();
    let target = entity.as_any_mut();
    let empty = Value::String(String::new());
    for field in description.fields() {
        if field.is_loadable()
            && field.kind() == Some(ValueKind::String)
            && field.value_is_null(target)
        {
            field.set_value(target, &empty);
        }
    }
}
