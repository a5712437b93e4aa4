//! Tests for paginated procedure calls.

mod common;

use common::{ScriptedProvider, Stats, input, paging_parameters, set_output, single, table, value_of};
use sproc_mapper::db::{ContextOptions, DbContext, call_paged, call_paged_with};
use sproc_mapper::mapping::{Entity, FieldRegistry, LoadOptions};
use sproc_mapper::models::{PagingInfo, Value};

#[derive(Debug, Default)]
struct OrderRow {
    id: i64,
}

impl Entity for OrderRow {
    fn register(fields: &mut FieldRegistry<Self>) {
        fields.field("Id", |o| &o.id, |o| &mut o.id).column("OrderId");
    }
}

#[derive(Debug, Default)]
struct OrderQuery {
    customer_id: i32,
}

impl Entity for OrderQuery {
    fn register(fields: &mut FieldRegistry<Self>) {
        fields.field("CustomerId", |q| &q.customer_id, |q| &mut q.customer_id);
    }
}

/// A procedure over `total` rows that reports the total and returns the
/// requested slice.
fn order_pages(total: i64) -> ScriptedProvider {
    let mut parameters = vec![input("@CustomerId", "int")];
    parameters.extend(paging_parameters());
    ScriptedProvider::new(move |command| {
        assert_eq!(value_of(command, "@TotalRecords"), Value::Null);
        let index = value_of(command, "@PageIndex").as_i64().unwrap_or(0);
        let size = value_of(command, "@PageSize").as_i64().unwrap_or(0);
        let rows = (index * size..((index + 1) * size).min(total))
            .map(|id| vec![Value::Int(id)])
            .collect();
        set_output(command, "@TotalRecords", total);
        single(table(&["OrderId"], rows))
    })
    .with_procedure("usp_OrderPage", parameters)
}

#[tokio::test]
async fn test_page_past_the_end_falls_back_to_first_page() {
    let provider = order_pages(57);
    let mut context = DbContext::connect(provider.info(), ContextOptions::default())
        .await
        .unwrap();
    let mut paging = PagingInfo::new(7, 10);

    let orders: Vec<OrderRow> = call_paged(
        &mut context,
        "usp_OrderPage",
        &mut paging,
        &[Value::Int(3)],
        LoadOptions::partial(),
    )
    .await
    .unwrap();

    assert_eq!(orders.len(), 10);
    assert_eq!(orders[0].id, 0);
    assert_eq!(paging.page_index, 0);
    assert_eq!(paging.total_records, 57);
    assert_eq!(paging.page_count(), 6);
    assert_eq!(Stats::get(&provider.stats.calls), 2);
    context.dispose().await;
}

#[tokio::test]
async fn test_last_partial_page() {
    let provider = order_pages(57);
    let mut context = DbContext::connect(provider.info(), ContextOptions::default())
        .await
        .unwrap();
    let mut paging = PagingInfo::new(5, 10);

    let orders: Vec<OrderRow> = call_paged(
        &mut context,
        "usp_OrderPage",
        &mut paging,
        &[Value::Int(3)],
        LoadOptions::partial(),
    )
    .await
    .unwrap();

    assert_eq!(orders.len(), 7);
    assert_eq!(orders[6].id, 56);
    assert_eq!(paging.page_index, 5);
    assert_eq!(context.total_records_from_last_query(), 57);
    assert_eq!(context.page_count_from_last_query(), 6);
    assert_eq!(Stats::get(&provider.stats.calls), 1);
    context.dispose().await;
}

#[tokio::test]
async fn test_no_retry_when_nothing_matches() {
    let provider = order_pages(0);
    let mut context = DbContext::connect(provider.info(), ContextOptions::default())
        .await
        .unwrap();
    let mut paging = PagingInfo::new(3, 10);

    let orders: Vec<OrderRow> = call_paged_with(
        &mut context,
        "usp_OrderPage",
        &mut paging,
        &OrderQuery { customer_id: 3 },
        LoadOptions::partial(),
    )
    .await
    .unwrap();

    assert!(orders.is_empty());
    assert_eq!(paging.page_index, 3);
    assert_eq!(paging.total_records, 0);
    assert_eq!(paging.page_count(), 0);
    assert_eq!(Stats::get(&provider.stats.calls), 1);
    context.dispose().await;
}

#[tokio::test]
async fn test_paging_by_parameters_object() {
    let provider = order_pages(25);
    let mut context = DbContext::connect(provider.info(), ContextOptions::auto_open_close())
        .await
        .unwrap();
    let mut paging = PagingInfo::new(2, 10);

    let orders: Vec<OrderRow> = call_paged_with(
        &mut context,
        "usp_OrderPage",
        &mut paging,
        &OrderQuery { customer_id: 3 },
        LoadOptions::partial(),
    )
    .await
    .unwrap();

    assert_eq!(orders.iter().map(|o| o.id).collect::<Vec<_>>(), (20..25).collect::<Vec<_>>());
    assert_eq!(value_of(context.command(), "@CustomerId"), Value::Int(3));
    assert!(!context.is_open());
}
