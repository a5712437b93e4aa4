//! Binding entity members and positional values to procedure parameters.
//!
//! The parameter list of the current command is taken from the schema cache.
//! Each input parameter is resolved by its logical name (the context prefix
//! removed): a member of the bound entity mapped to that column wins, otherwise
//! the next unused extra value is consumed. Output parameters are attached
//! with a NULL value and, when an entity is bound, remembered so their
//! returned values can be copied back.

use crate::db::context::DbContext;
use crate::db::schema_cache::ParameterSchemaCache;
use crate::error::{DbError, DbResult};
use crate::mapping::{AnyEntity, TypeDescription};
use crate::models::{
    Command, PAGE_INDEX_PARAMETER, PAGE_SIZE_PARAMETER, Parameter, ParameterDirection,
    TOTAL_RECORDS_PARAMETER, Value,
};
use tracing::debug;

/// Logical names of the trailing parameters of a paginated procedure.
pub const PAGING_PARAMETERS: [&str; 3] = [
    PAGE_INDEX_PARAMETER,
    PAGE_SIZE_PARAMETER,
    TOTAL_RECORDS_PARAMETER,
];

/// An output parameter to copy into an entity member after the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    /// Full parameter name as attached to the command
    pub parameter: String,
    /// Parameter name without prefix; names the entity member
    pub logical: String,
}

/// Outputs of one call. Built by [`bind`], consumed by [`copy_outputs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBindingSet {
    bindings: Vec<OutputBinding>,
}

impl OutputBindingSet {
    pub fn iter(&self) -> impl Iterator<Item = &OutputBinding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Outcome of binding one call.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    /// Input parameters that received a value
    pub bound: usize,
    /// Present when an entity was bound and the procedure has outputs
    pub outputs: Option<OutputBindingSet>,
}

/// Parameter name with the context prefix removed.
pub fn logical_name<'a>(name: &'a str, prefix: &str) -> &'a str {
    name.strip_prefix(prefix).unwrap_or(name)
}

fn is_reserved(logical: &str, reserved: &[&str]) -> bool {
    reserved.iter().any(|r| r.eq_ignore_ascii_case(logical))
}

/// Bind the current procedure command from `entity` and `extra`.
pub async fn bind(
    context: &mut DbContext,
    entity: Option<&dyn AnyEntity>,
    extra: &[Value],
) -> DbResult<Binding> {
    bind_excluding(context, entity, extra, &[]).await
}

/// Like [`bind`], leaving the `reserved` parameters unset for the caller.
pub async fn bind_excluding(
    context: &mut DbContext,
    entity: Option<&dyn AnyEntity>,
    extra: &[Value],
    reserved: &[&str],
) -> DbResult<Binding> {
    let procedure = context.command().text.clone();
    let schema = ParameterSchemaCache::global()
        .schema_for(context.info(), &procedure)
        .await?;
    let prefix = context.param_prefix().to_string();
    let description = entity.map(|e| e.description());
    if let Some(description) = &description {
        description.ensure_entity()?;
    }

    let mut extra_values = extra.iter();
    let mut binding = Binding::default();
    let mut outputs = OutputBindingSet::default();
    let mut parameters = Vec::with_capacity(schema.len());

    for mut parameter in schema {
        let logical = logical_name(&parameter.name, &prefix).to_string();
        let reserved_name = is_reserved(&logical, reserved);

        if parameter.direction.is_input() && !reserved_name {
            let from_entity = match (entity, description.as_deref()) {
                (Some(entity), Some(description)) => member_value(description, entity, &logical),
                _ => None,
            };
            match from_entity.or_else(|| extra_values.next().cloned()) {
                Some(value) => {
                    parameter.value = value;
                    binding.bound += 1;
                }
                None if parameter.direction == ParameterDirection::InputOutput => {
                    parameter.value = Value::Null;
                }
                None => {
                    return Err(DbError::parameter_resolution(format!(
                        "no value for parameter '{}' of '{}': the bound entity has no member \
                         mapped to it and the extra values are used up",
                        parameter.name, procedure
                    )));
                }
            }
        }

        if parameter.direction.is_output() && entity.is_some() && !reserved_name {
            outputs.bindings.push(OutputBinding {
                parameter: parameter.name.clone(),
                logical,
            });
        }
        parameters.push(parameter);
    }

    debug!(
        procedure = %procedure,
        bound = binding.bound,
        outputs = outputs.len(),
        "Parameters bound"
    );
    context.command_mut().parameters = parameters;
    if !outputs.is_empty() {
        binding.outputs = Some(outputs);
    }
    Ok(binding)
}

/// Value of the flat member mapped to `column`, if the entity has one.
fn member_value(
    description: &TypeDescription,
    entity: &dyn AnyEntity,
    column: &str,
) -> Option<Value> {
    let field = description.field_by_column(column)?;
    if field.is_nested() {
        return None;
    }
    field.get_value(entity.as_any())
}

/// Bind the current procedure command from a parameters object, matching
/// parameters to members by name. There is no positional fallback.
pub async fn bind_named(
    context: &mut DbContext,
    params: &dyn AnyEntity,
    reserved: &[&str],
) -> DbResult<usize> {
    let procedure = context.command().text.clone();
    let schema = ParameterSchemaCache::global()
        .schema_for(context.info(), &procedure)
        .await?;
    let prefix = context.param_prefix().to_string();
    let description = params.description();
    description.ensure_entity()?;

    let mut bound = 0;
    let mut parameters: Vec<Parameter> = Vec::with_capacity(schema.len());
    for mut parameter in schema {
        let logical = logical_name(&parameter.name, &prefix);
        if parameter.direction.is_input() && !is_reserved(logical, reserved) {
            let value = description
                .field(logical)
                .filter(|f| !f.is_nested())
                .and_then(|f| f.get_value(params.as_any()));
            match value {
                Some(value) => {
                    parameter.value = value;
                    bound += 1;
                }
                None if parameter.direction == ParameterDirection::InputOutput => {}
                None => {
                    return Err(DbError::parameter_resolution(format!(
                        "{} has no member named '{}' for '{}'",
                        description.type_name(),
                        logical,
                        procedure
                    )));
                }
            }
        }
        parameters.push(parameter);
    }
    context.command_mut().parameters = parameters;
    Ok(bound)
}

/// Copy returned output values into the entity members they were bound from.
///
/// A NULL output leaves the member unchanged.
pub fn copy_outputs(
    command: &Command,
    outputs: &OutputBindingSet,
    entity: &mut dyn AnyEntity,
) -> DbResult<()> {
    let description = entity.description();
    for output in outputs.iter() {
        let field = description
            .field_by_column(&output.logical)
            .or_else(|| description.field(&output.logical))
            .ok_or_else(|| {
                DbError::parameter_resolution(format!(
                    "{} has no member for output parameter '{}'",
                    description.type_name(),
                    output.parameter
                ))
            })?;
        let parameter = command.parameter(&output.parameter).ok_or_else(|| {
            DbError::invalid_operation(format!(
                "output parameter '{}' is missing from '{}'",
                output.parameter, command.text
            ))
        })?;
        if parameter.value.is_null() {
            continue;
        }
        if !field.set_value(entity.as_any_mut(), &parameter.value) {
            return Err(DbError::invalid_operation(format!(
                "output parameter '{}' value {} cannot be stored in {}.{}",
                output.parameter,
                parameter.value,
                description.type_name(),
                field.name()
            )));
        }
    }
    Ok(())
}
