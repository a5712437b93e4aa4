//! Tests for the context execution envelope: transactions, connection
//! lifetime and notification hooks.

mod common;

use common::{ScriptedProvider, Stats, single, table};
use sproc_mapper::db::{ContextOptions, DbContext, hooks};
use sproc_mapper::error::DbError;
use sproc_mapper::models::{ExecuteResult, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// Hooks are process-wide, so every test keys its hooks on a command text
// nobody else uses.
fn unique_sql(tag: &str) -> String {
    format!("SELECT '{}-{}'", tag, rand::random::<u64>())
}

fn failing_provider(failing_sql: String) -> ScriptedProvider {
    ScriptedProvider::new(move |command| {
        if command.text == failing_sql {
            Err(DbError::database_native(
                "Violation of UNIQUE KEY constraint",
                None,
                Some(2601),
                Some(14),
            ))
        } else {
            Ok(ExecuteResult::new(Vec::new(), 1))
        }
    })
}

fn count_exceptions_for(sql: &str) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&counter);
    let sql = sql.to_string();
    hooks::on_exception(move |context, _err| {
        if context.command().text == sql {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });
    counter
}

#[tokio::test]
async fn test_failure_rolls_back_and_closes() {
    let sql = unique_sql("fail");
    let provider = failing_provider(sql.clone());
    let exceptions = count_exceptions_for(&sql);

    let mut context = DbContext::connect(provider.info(), ContextOptions::transactional())
        .await
        .unwrap();
    assert!(context.is_open());
    assert!(context.in_transaction());

    context.create_text_command(&sql);
    let err = context.execute_non_query().await.unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));

    assert!(!context.is_open());
    assert!(!context.in_transaction());
    assert_eq!(Stats::get(&provider.stats.begins), 1);
    assert_eq!(Stats::get(&provider.stats.rollbacks), 1);
    assert_eq!(Stats::get(&provider.stats.closes), 1);
    assert_eq!(exceptions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_keep_connection_on_exception() {
    let sql = unique_sql("keep");
    let provider = failing_provider(sql.clone());

    let mut context = DbContext::connect(provider.info(), ContextOptions::transactional())
        .await
        .unwrap();
    context.set_keep_connection_on_exception(true);

    context.create_text_command(&sql);
    assert!(context.execute_non_query().await.is_err());

    // The transaction is gone but the connection survives for the next call
    assert!(context.is_open());
    assert!(!context.in_transaction());
    assert_eq!(Stats::get(&provider.stats.rollbacks), 1);
    assert_eq!(Stats::get(&provider.stats.closes), 0);

    context.create_text_command("UPDATE t SET x = 1");
    assert_eq!(context.execute_non_query().await.unwrap(), 1);
    context.dispose().await;
}

#[tokio::test]
async fn test_ignore_error_event_applies_to_next_call_only() {
    let sql = unique_sql("silent");
    let provider = failing_provider(sql.clone());
    let exceptions = count_exceptions_for(&sql);

    let mut context = DbContext::connect(provider.info(), ContextOptions::default())
        .await
        .unwrap();
    context.set_keep_connection_on_exception(true);

    context.create_text_command(&sql);
    let err = context.ignore_error_event().execute_non_query().await;
    assert!(err.is_err());
    assert_eq!(exceptions.load(Ordering::SeqCst), 0);

    assert!(context.execute_non_query().await.is_err());
    assert_eq!(exceptions.load(Ordering::SeqCst), 1);
    context.dispose().await;
}

/// Log sink shared with a test subscriber.
#[derive(Clone, Default)]
struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn take(&self) -> String {
        String::from_utf8(std::mem::take(&mut *self.0.lock().unwrap())).unwrap()
    }
}

#[tokio::test]
async fn test_silent_failure_logs_below_error() {
    let sql = unique_sql("quiet-log");
    let provider = failing_provider(sql.clone());
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mut context = DbContext::connect(provider.info(), ContextOptions::default())
        .await
        .unwrap();
    context.set_keep_connection_on_exception(true);
    context.create_text_command(&sql);

    assert!(context.ignore_error_event().execute_non_query().await.is_err());
    let quiet = logs.take();
    let line = quiet.lines().find(|l| l.contains("Command failed")).unwrap();
    assert!(line.contains("DEBUG"));
    assert!(!quiet.contains("ERROR"));

    assert!(context.execute_non_query().await.is_err());
    let loud = logs.take();
    let line = loud.lines().find(|l| l.contains("Command failed")).unwrap();
    assert!(line.contains("ERROR"));
    context.dispose().await;
}

#[tokio::test]
async fn test_hooks_on_success() {
    let sql = unique_sql("hooks");
    let provider = ScriptedProvider::new(|_| single(table(&["n"], vec![vec![Value::Int(7)]])));

    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    let record = |label: &'static str| {
        let events = Arc::clone(&events);
        let sql = sql.clone();
        move |context: &DbContext| {
            if context.command().text == sql {
                events.lock().unwrap().push(label);
            }
        }
    };
    hooks::on_before_execute(record("before"));
    hooks::on_after_execute(record("after"));

    let mut context = DbContext::connect(provider.info(), ContextOptions::default())
        .await
        .unwrap();
    context.create_text_command(&sql);
    assert_eq!(context.execute_scalar().await.unwrap(), Value::Int(7));
    assert_eq!(*events.lock().unwrap(), vec!["before", "after"]);
    context.dispose().await;
}

#[tokio::test]
async fn test_auto_open_close_opens_per_call() {
    let provider = ScriptedProvider::new(|_| Ok(ExecuteResult::new(Vec::new(), 3)));
    let mut context = DbContext::connect(provider.info(), ContextOptions::auto_open_close())
        .await
        .unwrap();
    assert!(!context.is_open());

    context.create_text_command("DELETE FROM carts");
    assert_eq!(context.execute_non_query().await.unwrap(), 3);
    assert!(!context.is_open());
    assert!(context.execute_bool().await.unwrap());

    assert_eq!(Stats::get(&provider.stats.opens), 2);
    assert_eq!(Stats::get(&provider.stats.closes), 2);
}

#[tokio::test]
async fn test_commit_and_dispose() {
    let provider = ScriptedProvider::new(|_| Ok(ExecuteResult::new(Vec::new(), 1)));
    let mut context = DbContext::connect(provider.info(), ContextOptions::transactional())
        .await
        .unwrap();

    context.create_text_command("INSERT INTO audit VALUES (1)");
    context.execute_non_query().await.unwrap();
    context.commit_transaction().await.unwrap();
    assert!(!context.in_transaction());
    assert!(matches!(
        context.commit_transaction().await,
        Err(DbError::InvalidOperation { .. })
    ));

    context.dispose().await;
    assert!(!context.is_open());
    assert_eq!(Stats::get(&provider.stats.commits), 1);
    assert_eq!(Stats::get(&provider.stats.rollbacks), 0);
}

#[tokio::test]
async fn test_zero_result_capacity_rejected() {
    let provider = ScriptedProvider::new(|_| Ok(ExecuteResult::default()));
    let options = ContextOptions {
        result_capacity: 0,
        ..ContextOptions::default()
    };
    assert!(matches!(
        DbContext::connect(provider.info(), options).await,
        Err(DbError::Configuration { .. })
    ));
}

#[tokio::test]
async fn test_result_shapes() {
    let provider = ScriptedProvider::new(|_| {
        Ok(ExecuteResult::new(
            vec![
                table(
                    &["Name"],
                    vec![
                        vec![Value::from("north")],
                        vec![Value::Null],
                        vec![Value::from("south")],
                    ],
                ),
                table(&["Total"], vec![vec![Value::Int(2)]]),
                table(&["Ignored"], Vec::new()),
            ],
            0,
        ))
    });
    let mut context = DbContext::connect(provider.info(), ContextOptions::default())
        .await
        .unwrap();
    context.create_text_command("SELECT regions");

    assert_eq!(
        context.execute_string_list().await.unwrap(),
        vec!["north", "south"]
    );

    let set = context.execute_data_set(&["Regions", "Totals"]).await.unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.table("totals").unwrap().rows[0][0], Value::Int(2));

    let numbered = context.execute_data_set_count(3).await.unwrap();
    assert_eq!(numbered.tables[2].name, "Table3");

    let names = context
        .execute_reader_with(|reader| {
            let mut names = Vec::new();
            while reader.read() {
                names.push(reader.get(0).cloned().unwrap_or(Value::Null));
            }
            Ok(names)
        })
        .await
        .unwrap();
    assert_eq!(names.len(), 3);
    context.dispose().await;
}

#[tokio::test]
async fn test_execute_script_sums_batches() {
    let provider = ScriptedProvider::new(|command| {
        let affected = if command.text.starts_with("INSERT") { 2 } else { 0 };
        Ok(ExecuteResult::new(Vec::new(), affected))
    });
    let mut context = DbContext::connect(provider.info(), ContextOptions::default())
        .await
        .unwrap();
    let script = "CREATE TABLE t (id int)\nGO\nINSERT INTO t VALUES (1), (2)\nGO\nINSERT INTO t VALUES (3), (4)";
    assert_eq!(context.execute_script(script).await.unwrap(), 4);
    assert_eq!(Stats::get(&provider.stats.calls), 3);
    context.dispose().await;
}
