//! End-to-end tests against a SQLite database file.

use sproc_mapper::db::sqlite::SqliteProvider;
use sproc_mapper::db::{ConnectionInfo, ContextOptions, DbContext};
use sproc_mapper::error::DbError;
use sproc_mapper::mapping::{Entity, FieldRegistry, LoadOptions, load_all_from_table};
use sproc_mapper::models::Value;
use std::sync::Arc;
use tempfile::TempDir;

const SCHEMA: &str = "
CREATE TABLE product (
    product_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    price REAL NOT NULL,
    note TEXT
)
GO
INSERT INTO product (product_id, name, price, note) VALUES
    (1, 'Widget', 2.5, NULL),
    (2, 'Gadget', 10.0, 'fragile'),
    (3, 'Gizmo', 7.25, NULL)
GO
";

#[derive(Debug, Default)]
struct Product {
    id: i64,
    name: String,
    price: f64,
    note: Option<String>,
}

impl Entity for Product {
    fn register(fields: &mut FieldRegistry<Self>) {
        fields.field("Id", |p| &p.id, |p| &mut p.id).column("product_id");
        fields.field("Name", |p| &p.name, |p| &mut p.name);
        fields.field("Price", |p| &p.price, |p| &mut p.price);
        fields.field("Note", |p| &p.note, |p| &mut p.note).only_load_all();
    }
}

async fn setup() -> (TempDir, ConnectionInfo) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shop.db");
    let info = ConnectionInfo::new(
        Arc::new(SqliteProvider),
        "@",
        format!("sqlite:{}", path.display()),
    );
    let mut context = DbContext::connect(info.clone(), ContextOptions::default())
        .await
        .unwrap();
    assert_eq!(context.execute_script(SCHEMA).await.unwrap(), 3);
    context.dispose().await;
    (dir, info)
}

async fn count(info: &ConnectionInfo) -> i64 {
    let mut context = DbContext::connect(info.clone(), ContextOptions::auto_open_close())
        .await
        .unwrap();
    context.create_text_command("SELECT COUNT(*) FROM product");
    context.execute_scalar().await.unwrap().as_i64().unwrap()
}

#[tokio::test]
async fn test_list_and_single_from_text_commands() {
    let (_dir, info) = setup().await;
    let mut context = DbContext::connect(info, ContextOptions::default())
        .await
        .unwrap();

    context
        .create_text_command("SELECT product_id, name, price, note FROM product WHERE price > ? ORDER BY product_id")
        .add_parameter("MinPrice", 5);
    let products: Vec<Product> = context.execute_list(LoadOptions::full()).await.unwrap();
    assert_eq!(products.len(), 2);
    assert_eq!(products[0].name, "Gadget");
    assert_eq!(products[0].note.as_deref(), Some("fragile"));
    assert_eq!(products[1].price, 7.25);

    context
        .create_text_command("SELECT product_id, name, price FROM product WHERE product_id = ?")
        .add_parameter("Id", 1);
    let widget: Product = context
        .execute_single(LoadOptions::partial())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(widget.name, "Widget");

    // Full loads need the only-load-all column too
    assert!(matches!(
        context.execute_single::<Product>(LoadOptions::full()).await,
        Err(DbError::LoadIncomplete { .. })
    ));

    context.create_text_command("SELECT product_id, name, price FROM product WHERE product_id = 99");
    assert!(
        context
            .execute_single::<Product>(LoadOptions::partial())
            .await
            .unwrap()
            .is_none()
    );
    context.dispose().await;
}

#[tokio::test]
async fn test_maps_and_lists() {
    let (_dir, info) = setup().await;
    let mut context = DbContext::connect(info, ContextOptions::default())
        .await
        .unwrap();

    context.create_text_command("SELECT product_id, name, price FROM product");
    let by_id = context
        .execute_map_by_int::<Product>("PRODUCT_ID", LoadOptions::partial())
        .await
        .unwrap();
    assert_eq!(by_id[&3].name, "Gizmo");

    let by_name = context
        .execute_map_by_string::<Product>("name", LoadOptions::partial())
        .await
        .unwrap();
    assert_eq!(by_name["Widget"].id, 1);

    context.create_text_command("SELECT 1 AS product_id, 'a' AS name, 1.0 AS price UNION ALL SELECT 1, 'b', 2.0");
    assert!(matches!(
        context
            .execute_map_by_int::<Product>("product_id", LoadOptions::partial())
            .await,
        Err(DbError::InvalidOperation { .. })
    ));

    context.create_text_command("SELECT name FROM product ORDER BY name");
    assert_eq!(
        context.execute_string_list().await.unwrap(),
        vec!["Gadget", "Gizmo", "Widget"]
    );

    context.create_text_command("SELECT product_id, name, price, note FROM product ORDER BY product_id");
    let table = context.execute_table().await.unwrap();
    let all = load_all_from_table::<Product>(&table).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[1].note.as_deref(), Some("fragile"));
    context.dispose().await;
}

#[tokio::test]
async fn test_failed_statement_rolls_back_transaction() {
    let (_dir, info) = setup().await;
    let mut context = DbContext::connect(info.clone(), ContextOptions::transactional())
        .await
        .unwrap();

    context
        .create_text_command("INSERT INTO product (product_id, name, price) VALUES (?, ?, ?)")
        .add_parameter("Id", 4)
        .add_parameter("Name", "Doohickey")
        .add_parameter("Price", 1.0);
    assert_eq!(context.execute_non_query().await.unwrap(), 1);

    context.create_text_command("INSERT INTO missing_table VALUES (1)");
    assert!(context.execute_non_query().await.is_err());
    assert!(!context.is_open());
    assert!(!context.in_transaction());

    assert_eq!(count(&info).await, 3);
}

#[tokio::test]
async fn test_committed_transaction_persists() {
    let (_dir, info) = setup().await;
    let mut context = DbContext::connect(info.clone(), ContextOptions::transactional())
        .await
        .unwrap();

    context.create_text_command("DELETE FROM product WHERE price < 5");
    assert!(context.execute_bool().await.unwrap());
    context.commit_transaction().await.unwrap();
    context.dispose().await;

    assert_eq!(count(&info).await, 2);
}

#[tokio::test]
async fn test_procedure_calls_are_rejected() {
    let (_dir, info) = setup().await;
    let mut context = DbContext::connect(info, ContextOptions::default())
        .await
        .unwrap();
    let err = sproc_mapper::db::call_scalar(&mut context, "usp_Products", None, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidOperation { .. }));
    context.dispose().await;
}
