//! Entity metadata, row adapters and materialization.

pub mod adapter;
pub mod description;
pub mod entity;
pub mod field;
pub mod materializer;
pub mod request;

pub use adapter::RowAdapter;
pub use description::{FieldDescriptor, FieldFlags, TypeDescription, describe};
pub use entity::{AnyEntity, Entity, FieldOptions, FieldRegistry};
pub use field::{FieldValue, ValueKind};
pub use materializer::{LoadOptions, fill, load_all_from_table, load_item, set_strings_to_empty};
pub use request::{ValueSource, fill_from_form, fill_from_source};
