//! Per-type member metadata and its process-wide cache.

use crate::error::{DbError, DbResult};
use crate::mapping::entity::{AnyEntity, Entity, FieldRegistry};
use crate::mapping::field::{FieldValue, ValueKind};
use crate::models::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::debug;

static DESCRIPTIONS: LazyLock<RwLock<HashMap<TypeId, Arc<TypeDescription>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Get the cached description of `T`, building it on first use.
///
/// Two threads racing on the first build both produce the same description;
/// whichever publishes last wins and readers never see a partial entry.
pub fn describe<T: Entity>() -> Arc<TypeDescription> {
    let key = TypeId::of::<T>();
    if let Some(found) = DESCRIPTIONS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return Arc::clone(found);
    }

    let description = Arc::new(TypeDescription::build::<T>());
    debug!(
        type_name = description.type_name(),
        fields = description.fields().len(),
        "Built type description"
    );
    DESCRIPTIONS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, Arc::clone(&description));
    description
}

/// Binding flags of one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldFlags {
    pub ignore_load: bool,
    pub only_load_all: bool,
    pub nested: bool,
    pub allow_missing: bool,
    pub empty_if_missing: bool,
    pub trim: bool,
}

impl Default for FieldFlags {
    fn default() -> Self {
        Self {
            ignore_load: false,
            only_load_all: false,
            nested: false,
            allow_missing: false,
            empty_if_missing: false,
            trim: true,
        }
    }
}

/// Type-erased get/set over one flat member.
pub(crate) trait ValueAccess: Send + Sync {
    fn get(&self, entity: &dyn Any) -> Option<Value>;
    fn set(&self, entity: &mut dyn Any, value: &Value) -> bool;
    fn set_text(&self, entity: &mut dyn Any, text: &str) -> bool;
    fn reset(&self, entity: &mut dyn Any);
    fn is_null(&self, entity: &dyn Any) -> bool;
}

/// Type-erased access to a nested entity member.
pub(crate) trait NestedAccess: Send + Sync {
    fn description(&self) -> Arc<TypeDescription>;
    fn get<'a>(&self, entity: &'a dyn Any) -> Option<&'a dyn AnyEntity>;
    fn get_mut<'a>(&self, entity: &'a mut dyn Any) -> Option<&'a mut dyn AnyEntity>;
    fn reset(&self, entity: &mut dyn Any);
}

pub(crate) struct ValueSlot<T, V> {
    pub(crate) get: fn(&T) -> &V,
    pub(crate) get_mut: fn(&mut T) -> &mut V,
}

impl<T: Entity, V: FieldValue> ValueSlot<T, V> {
    fn assign(&self, entity: &mut dyn Any, value: Option<V>) -> bool {
        match (entity.downcast_mut::<T>(), value) {
            (Some(target), Some(value)) => {
                *(self.get_mut)(target) = value;
                true
            }
            _ => false,
        }
    }
}

impl<T: Entity, V: FieldValue> ValueAccess for ValueSlot<T, V> {
    fn get(&self, entity: &dyn Any) -> Option<Value> {
        entity
            .downcast_ref::<T>()
            .map(|target| (self.get)(target).to_value())
    }

    fn set(&self, entity: &mut dyn Any, value: &Value) -> bool {
        self.assign(entity, V::from_value(value))
    }

    fn set_text(&self, entity: &mut dyn Any, text: &str) -> bool {
        self.assign(entity, V::from_text(text))
    }

    fn reset(&self, entity: &mut dyn Any) {
        self.assign(entity, Some(V::default()));
    }

    fn is_null(&self, entity: &dyn Any) -> bool {
        entity
            .downcast_ref::<T>()
            .is_some_and(|target| (self.get)(target).is_null())
    }
}

pub(crate) struct ComputedSlot<T, V> {
    pub(crate) get: fn(&T) -> V,
}

impl<T: Entity, V: FieldValue> ValueAccess for ComputedSlot<T, V> {
    fn get(&self, entity: &dyn Any) -> Option<Value> {
        entity
            .downcast_ref::<T>()
            .map(|target| (self.get)(target).to_value())
    }

    fn set(&self, _entity: &mut dyn Any, _value: &Value) -> bool {
        false
    }

    fn set_text(&self, _entity: &mut dyn Any, _text: &str) -> bool {
        false
    }

    fn reset(&self, _entity: &mut dyn Any) {}

    fn is_null(&self, entity: &dyn Any) -> bool {
        entity
            .downcast_ref::<T>()
            .is_some_and(|target| (self.get)(target).is_null())
    }
}

pub(crate) struct NestedSlot<T, N> {
    pub(crate) get: fn(&T) -> &N,
    pub(crate) get_mut: fn(&mut T) -> &mut N,
}

impl<T: Entity, N: Entity> NestedAccess for NestedSlot<T, N> {
    fn description(&self) -> Arc<TypeDescription> {
        describe::<N>()
    }

    fn get<'a>(&self, entity: &'a dyn Any) -> Option<&'a dyn AnyEntity> {
        entity
            .downcast_ref::<T>()
            .map(|target| (self.get)(target) as &dyn AnyEntity)
    }

    fn get_mut<'a>(&self, entity: &'a mut dyn Any) -> Option<&'a mut dyn AnyEntity> {
        entity
            .downcast_mut::<T>()
            .map(|target| (self.get_mut)(target) as &mut dyn AnyEntity)
    }

    fn reset(&self, entity: &mut dyn Any) {
        if let Some(target) = entity.downcast_mut::<T>() {
            *(self.get_mut)(target) = N::default();
        }
    }
}

pub(crate) enum Accessor {
    Value {
        slot: Box<dyn ValueAccess>,
        kind: ValueKind,
        nullable: bool,
    },
    Nested(Box<dyn NestedAccess>),
}

/// One persistable member.
pub struct FieldDescriptor {
    name: &'static str,
    pub(crate) column: String,
    pub(crate) flags: FieldFlags,
    pub(crate) key_name: Option<String>,
    pub(crate) accessor: Accessor,
}

impl FieldDescriptor {
    pub(crate) fn new(name: &'static str, flags: FieldFlags, accessor: Accessor) -> Self {
        Self {
            name,
            column: name.to_string(),
            flags,
            key_name: None,
            accessor,
        }
    }

    /// Member name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Mapped column name (defaults to the member name).
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Key used by request binding.
    pub fn key(&self) -> &str {
        self.key_name.as_deref().unwrap_or(self.name)
    }

    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    pub fn is_nested(&self) -> bool {
        self.flags.nested
    }

    /// Declared value category; `None` for nested members.
    pub fn kind(&self) -> Option<ValueKind> {
        match &self.accessor {
            Accessor::Value { kind, .. } => Some(*kind),
            Accessor::Nested(_) => None,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self.accessor, Accessor::Value { nullable: true, .. })
    }

    /// Flat members that take part in result loading.
    pub fn is_loadable(&self) -> bool {
        !self.flags.ignore_load && !self.flags.nested
    }

    pub(crate) fn get_value(&self, entity: &dyn Any) -> Option<Value> {
        match &self.accessor {
            Accessor::Value { slot, .. } => slot.get(entity),
            Accessor::Nested(_) => None,
        }
    }

    pub(crate) fn set_value(&self, entity: &mut dyn Any, value: &Value) -> bool {
        match &self.accessor {
            Accessor::Value { slot, .. } => slot.set(entity, value),
            Accessor::Nested(_) => false,
        }
    }

    pub(crate) fn set_text(&self, entity: &mut dyn Any, text: &str) -> bool {
        match &self.accessor {
            Accessor::Value { slot, .. } => slot.set_text(entity, text),
            Accessor::Nested(_) => false,
        }
    }

    pub(crate) fn reset(&self, entity: &mut dyn Any) {
        match &self.accessor {
            Accessor::Value { slot, .. } => slot.reset(entity),
            Accessor::Nested(nested) => nested.reset(entity),
        }
    }

    pub(crate) fn value_is_null(&self, entity: &dyn Any) -> bool {
        match &self.accessor {
            Accessor::Value { slot, .. } => slot.is_null(entity),
            Accessor::Nested(_) => false,
        }
    }

    pub(crate) fn nested(&self) -> Option<&dyn NestedAccess> {
        match &self.accessor {
            Accessor::Nested(nested) => Some(nested.as_ref()),
            Accessor::Value { .. } => None,
        }
    }
}

impl std::fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Immutable description of one entity type.
#[derive(Debug)]
pub struct TypeDescription {
    type_name: &'static str,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
    by_column: HashMap<String, usize>,
    partial_count: usize,
    all_count: usize,
}

impl TypeDescription {
    fn build<T: Entity>() -> Self {
        let mut registry = FieldRegistry::<T>::new();
        T::register(&mut registry);
        let fields = registry.into_fields();

        let mut by_name = HashMap::with_capacity(fields.len());
        let mut by_column = HashMap::with_capacity(fields.len());
        let (mut partial_count, mut all_count) = (0, 0);
        for (index, field) in fields.iter().enumerate() {
            by_name.insert(field.name.to_uppercase(), index);
            by_column.entry(field.column.to_uppercase()).or_insert(index);
            if field.is_loadable() {
                all_count += 1;
                if !field.flags.only_load_all {
                    partial_count += 1;
                }
            }
        }

        Self {
            type_name: T::type_name(),
            fields,
            by_name,
            by_column,
            partial_count,
            all_count,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// A type registering no members cannot be loaded or bound.
    pub fn ensure_entity(&self) -> DbResult<()> {
        if self.fields.is_empty() {
            return Err(DbError::invalid_data_item_type(self.type_name));
        }
        Ok(())
    }

    /// Members in registration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a member by name, then by column name (case-insensitive).
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        let upper = name.to_uppercase();
        self.by_name
            .get(&upper)
            .or_else(|| self.by_column.get(&upper))
            .map(|&index| &self.fields[index])
    }

    /// Look up a member by mapped column name (case-insensitive).
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.by_column
            .get(&column.to_uppercase())
            .map(|&index| &self.fields[index])
    }

    /// Members expected to load when `only_load_all` members are skipped.
    pub fn partial_count(&self) -> usize {
        self.partial_count
    }

    /// Members expected to load in a full load.
    pub fn all_count(&self) -> usize {
        self.all_count
    }

    pub fn expected_count(&self, load_all: bool) -> usize {
        if load_all {
            self.all_count
        } else {
            self.partial_count
        }
    }
}
