//! One-line stored procedure calls: create the command, bind, execute and
//! copy outputs back.

use crate::db::binder::{self, Binding, PAGING_PARAMETERS};
use crate::db::context::DbContext;
use crate::error::DbResult;
use crate::mapping::{AnyEntity, Entity, LoadOptions};
use crate::models::{
    DataTable, PAGE_INDEX_PARAMETER, PAGE_SIZE_PARAMETER, PagingInfo, TOTAL_RECORDS_PARAMETER, Value,
};
use tracing::info;

fn copy_back(
    context: &DbContext,
    binding: &Binding,
    entity: Option<&mut dyn AnyEntity>,
) -> DbResult<()> {
    if !context.options().auto_output_values {
        return Ok(());
    }
    match (&binding.outputs, entity) {
        (Some(outputs), Some(entity)) => binder::copy_outputs(context.command(), outputs, entity),
        _ => Ok(()),
    }
}

/// Call `procedure` for its side effects and return the rows affected.
pub async fn call_non_query(
    context: &mut DbContext,
    procedure: &str,
    entity: Option<&mut dyn AnyEntity>,
    extra: &[Value],
) -> DbResult<u64> {
    context.create_command(procedure);
    let binding = binder::bind(context, entity.as_deref(), extra).await?;
    let affected = context.execute_non_query().await?;
    copy_back(context, &binding, entity)?;
    Ok(affected)
}

/// Call `procedure` and return the first column of the first row.
pub async fn call_scalar(
    context: &mut DbContext,
    procedure: &str,
    entity: Option<&mut dyn AnyEntity>,
    extra: &[Value],
) -> DbResult<Value> {
    context.create_command(procedure);
    let binding = binder::bind(context, entity.as_deref(), extra).await?;
    let value = context.execute_scalar().await?;
    copy_back(context, &binding, entity)?;
    Ok(value)
}

/// Call `procedure` and materialize its first row.
pub async fn call_single<T: Entity>(
    context: &mut DbContext,
    procedure: &str,
    entity: Option<&mut dyn AnyEntity>,
    extra: &[Value],
    options: LoadOptions,
) -> DbResult<Option<T>> {
    context.create_command(procedure);
    let binding = binder::bind(context, entity.as_deref(), extra).await?;
    let item = context.execute_single(options).await?;
    copy_back(context, &binding, entity)?;
    Ok(item)
}

/// Call `procedure` and materialize every row of its first result set.
pub async fn call_list<T: Entity>(
    context: &mut DbContext,
    procedure: &str,
    entity: Option<&mut dyn AnyEntity>,
    extra: &[Value],
    options: LoadOptions,
) -> DbResult<Vec<T>> {
    context.create_command(procedure);
    let binding = binder::bind(context, entity.as_deref(), extra).await?;
    let items = context.execute_list(options).await?;
    copy_back(context, &binding, entity)?;
    Ok(items)
}

/// Call a paginated procedure with positional values for its leading
/// parameters.
///
/// The trailing PageIndex, PageSize and TotalRecords parameters are set from
/// `paging`, and `paging.total_records` is updated from the call. When a page
/// past the end comes back empty while the total is positive, the call is
/// repeated once for page 0 and `paging.page_index` is reset to 0.
pub async fn call_paged<T: Entity>(
    context: &mut DbContext,
    procedure: &str,
    paging: &mut PagingInfo,
    extra: &[Value],
    options: LoadOptions,
) -> DbResult<Vec<T>> {
    let table = call_paged_table(context, procedure, paging, extra).await?;
    context.materialize(&table, options)
}

/// Like [`call_paged`], returning the page as a table.
pub async fn call_paged_table(
    context: &mut DbContext,
    procedure: &str,
    paging: &mut PagingInfo,
    extra: &[Value],
) -> DbResult<DataTable> {
    context.create_command(procedure);
    binder::bind_excluding(context, None, extra, &PAGING_PARAMETERS).await?;
    run_paged(context, paging).await
}

/// Like [`call_paged`], binding the leading parameters by member name from
/// a parameters object.
pub async fn call_paged_with<T: Entity>(
    context: &mut DbContext,
    procedure: &str,
    paging: &mut PagingInfo,
    params: &dyn AnyEntity,
    options: LoadOptions,
) -> DbResult<Vec<T>> {
    context.create_command(procedure);
    binder::bind_named(context, params, &PAGING_PARAMETERS).await?;
    let table = run_paged(context, paging).await?;
    context.materialize(&table, options)
}

fn set_paging(context: &mut DbContext, page_index: i32, page_size: i32) -> DbResult<()> {
    let prefix = context.param_prefix().to_string();
    let command = context.command_mut();
    command.find_parameter_mut(&prefix, PAGE_INDEX_PARAMETER)?.value = Value::Int(page_index.into());
    command.find_parameter_mut(&prefix, PAGE_SIZE_PARAMETER)?.value = Value::Int(page_size.into());
    command.find_parameter_mut(&prefix, TOTAL_RECORDS_PARAMETER)?.value = Value::Null;
    Ok(())
}

async fn run_paged(context: &mut DbContext, paging: &mut PagingInfo) -> DbResult<DataTable> {
    set_paging(context, paging.page_index, paging.page_size)?;
    let mut page = context.execute_table().await?;
    paging.total_records = context.total_records_from_last_query();

    if page.is_empty() && paging.page_index > 0 && paging.total_records > 0 {
        info!(
            procedure = %context.command().text,
            page_index = paging.page_index,
            total_records = paging.total_records,
            "Requested page is past the end, retrying page 0"
        );
        paging.page_index = 0;
        set_paging(context, 0, paging.page_size)?;
        page = context.execute_table().await?;
        paging.total_records = context.total_records_from_last_query();
    }
    Ok(page)
}
