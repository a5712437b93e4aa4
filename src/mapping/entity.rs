//! Entity registration.
//!
//! An entity type opts into mapping by implementing [`Entity`] and listing its
//! persistable members once in [`Entity::register`]. The registration produces
//! the member table that the metadata cache, the materializer and the binder
//! work from.
//!
//! ```ignore
//! #[derive(Debug, Default)]
//! struct ShipInfo { city: String, zip: String }
//!
//! impl Entity for ShipInfo {
//!     fn register(fields: &mut FieldRegistry<Self>) {
//!         fields.field("City", |s| &s.city, |s| &mut s.city);
//!         fields.field("Zip", |s| &s.zip, |s| &mut s.zip);
//!     }
//! }
//!
//! #[derive(Debug, Default)]
//! struct Order { id: i32, ship: ShipInfo }
//!
//! impl Entity for Order {
//!     fn register(fields: &mut FieldRegistry<Self>) {
//!         fields.field("Id", |o| &o.id, |o| &mut o.id).column("OrderId");
//!         fields.nested("Ship", |o| &o.ship, |o| &mut o.ship);
//!     }
//! }
//! ```

use crate::mapping::description::{
    Accessor, ComputedSlot, FieldDescriptor, FieldFlags, NestedSlot, TypeDescription, ValueSlot,
    describe,
};
use crate::mapping::field::FieldValue;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

/// A caller-defined record type that can be materialized and bound.
pub trait Entity: Default + Send + Sync + 'static {
    /// List the persistable members of this type.
    fn register(fields: &mut FieldRegistry<Self>);

    /// Name used in error messages.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Object-safe view of an entity instance.
pub trait AnyEntity: Send + Sync {
    fn description(&self) -> Arc<TypeDescription>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Entity> AnyEntity for T {
    fn description(&self) -> Arc<TypeDescription> {
        describe::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Collects the member descriptors of one entity type.
pub struct FieldRegistry<T> {
    fields: Vec<FieldDescriptor>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> FieldRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            fields: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_fields(self) -> Vec<FieldDescriptor> {
        self.fields
    }

    fn push(&mut self, descriptor: FieldDescriptor) -> FieldOptions<'_> {
        self.fields.push(descriptor);
        let last = self.fields.len() - 1;
        FieldOptions {
            field: &mut self.fields[last],
        }
    }

    /// A readable and writable member.
    pub fn field<V: FieldValue>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &V,
        get_mut: fn(&mut T) -> &mut V,
    ) -> FieldOptions<'_> {
        self.push(FieldDescriptor::new(
            name,
            FieldFlags::default(),
            Accessor::Value {
                slot: Box::new(ValueSlot { get, get_mut }),
                kind: V::KIND,
                nullable: V::NULLABLE,
            },
        ))
    }

    /// A read-only member: bound into call parameters but never loaded.
    pub fn computed<V: FieldValue>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> V,
    ) -> FieldOptions<'_> {
        let flags = FieldFlags {
            ignore_load: true,
            ..FieldFlags::default()
        };
        self.push(FieldDescriptor::new(
            name,
            flags,
            Accessor::Value {
                slot: Box::new(ComputedSlot { get }),
                kind: V::KIND,
                nullable: V::NULLABLE,
            },
        ))
    }

    /// A member whose type is itself an entity, loaded from columns prefixed
    /// with this member's column name.
    pub fn nested<N: Entity>(
        &mut self,
        name: &'static str,
        get: fn(&T) -> &N,
        get_mut: fn(&mut T) -> &mut N,
    ) -> FieldOptions<'_> {
        let flags = FieldFlags {
            nested: true,
            ..FieldFlags::default()
        };
        self.push(FieldDescriptor::new(
            name,
            flags,
            Accessor::Nested(Box::new(NestedSlot { get, get_mut })),
        ))
    }
}

/// Per-member binding options, chained after registration.
pub struct FieldOptions<'a> {
    field: &'a mut FieldDescriptor,
}

impl FieldOptions<'_> {
    /// Column name, when it differs from the member name.
    pub fn column(self, name: impl Into<String>) -> Self {
        self.field.column = name.into();
        self
    }

    /// Never loaded from result rows.
    pub fn ignore_load(self) -> Self {
        self.field.flags.ignore_load = true;
        self
    }

    /// Only loaded when a full load is requested.
    pub fn only_load_all(self) -> Self {
        self.field.flags.only_load_all = true;
        self
    }

    /// Request binding: keep the default when the key is absent.
    pub fn allow_missing(self) -> Self {
        self.field.flags.allow_missing = true;
        self
    }

    /// Request binding: use "" when the key is absent.
    pub fn empty_if_missing(self) -> Self {
        self.field.flags.empty_if_missing = true;
        self
    }

    /// Request binding: do not trim surrounding whitespace.
    pub fn keep_whitespace(self) -> Self {
        self.field.flags.trim = false;
        self
    }

    /// Request binding: key to look up instead of the member name.
    pub fn key(self, key: impl Into<String>) -> Self {
        self.field.key_name = Some(key.into());
        self
    }
}
