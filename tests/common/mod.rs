//! Shared test fixtures: a scripted provider whose results are produced by a
//! closure, so context, binder and paging behavior can be tested without a
//! database server.

#![allow(dead_code)]

use async_trait::async_trait;
use sproc_mapper::db::{Connection, ConnectionInfo, Provider};
use sproc_mapper::error::{DbError, DbResult};
use sproc_mapper::models::{
    Command, DataTable, ExecuteResult, Parameter, ParameterDirection, ProviderKind, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type Responder = Arc<dyn Fn(&mut Command) -> DbResult<ExecuteResult> + Send + Sync>;

/// Counters of connection activity across every connection of a provider.
#[derive(Debug, Default)]
pub struct Stats {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub derives: AtomicUsize,
    pub calls: AtomicUsize,
}

impl Stats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct ScriptedProvider {
    procedures: Arc<HashMap<String, Vec<Parameter>>>,
    responder: Responder,
    pub stats: Arc<Stats>,
}

impl ScriptedProvider {
    pub fn new(
        responder: impl Fn(&mut Command) -> DbResult<ExecuteResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            procedures: Arc::new(HashMap::new()),
            responder: Arc::new(responder),
            stats: Arc::new(Stats::default()),
        }
    }

    /// Declare a procedure and the parameters the server reports for it.
    pub fn with_procedure(mut self, name: &str, parameters: Vec<Parameter>) -> Self {
        Arc::make_mut(&mut self.procedures).insert(name.to_string(), parameters);
        self
    }

    /// Connection settings with a connection string no other test uses, so
    /// the process-wide schema cache never mixes entries between tests.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo::new(
            Arc::new(self.clone()),
            "@",
            format!("Provider=Scripted;Data Source=test-{}", rand::random::<u64>()),
        )
    }
}

impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OleDb
    }

    fn create_connection(&self, _connection_string: &str) -> DbResult<Box<dyn Connection>> {
        Ok(Box::new(ScriptedConnection {
            provider: self.clone(),
            open: false,
        }))
    }
}

struct ScriptedConnection {
    provider: ScriptedProvider,
    open: bool,
}

impl ScriptedConnection {
    fn count(&self, select: impl FnOnce(&Stats) -> &AtomicUsize) {
        select(&self.provider.stats).fetch_add(1, Ordering::SeqCst);
    }

    fn require_open(&self) -> DbResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DbError::invalid_operation("scripted connection is not open"))
        }
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OleDb
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> DbResult<()> {
        self.count(|s| &s.opens);
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if self.open {
            self.count(|s| &s.closes);
        }
        self.open = false;
        Ok(())
    }

    async fn begin_transaction(&mut self) -> DbResult<()> {
        self.require_open()?;
        self.count(|s| &s.begins);
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.require_open()?;
        self.count(|s| &s.commits);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.require_open()?;
        self.count(|s| &s.rollbacks);
        Ok(())
    }

    async fn derive_parameters(&mut self, procedure: &str) -> DbResult<Vec<Parameter>> {
        self.require_open()?;
        self.count(|s| &s.derives);
        self.provider
            .procedures
            .get(procedure)
            .cloned()
            .ok_or_else(|| {
                DbError::database(
                    format!("Could not find stored procedure '{}'", procedure),
                    Some("42000".to_string()),
                    "Check the procedure name",
                )
            })
    }

    async fn query(&mut self, command: &mut Command) -> DbResult<ExecuteResult> {
        self.require_open()?;
        self.count(|s| &s.calls);
        (self.provider.responder)(command)
    }

    async fn execute(&mut self, command: &mut Command) -> DbResult<u64> {
        Ok(self.query(command).await?.rows_affected)
    }
}

pub fn input(name: &str, type_name: &str) -> Parameter {
    Parameter::declared(name, type_name, None, ParameterDirection::Input)
}

pub fn output(name: &str, type_name: &str) -> Parameter {
    Parameter::declared(name, type_name, None, ParameterDirection::Output)
}

pub fn in_out(name: &str, type_name: &str) -> Parameter {
    Parameter::declared(name, type_name, None, ParameterDirection::InputOutput)
}

/// The trailing parameters of a paginated procedure.
pub fn paging_parameters() -> Vec<Parameter> {
    vec![
        input("@PageIndex", "int"),
        input("@PageSize", "int"),
        output("@TotalRecords", "int"),
    ]
}

pub fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> DataTable {
    DataTable::with_rows(columns.iter().map(|c| c.to_string()).collect(), rows)
}

pub fn single(table: DataTable) -> DbResult<ExecuteResult> {
    Ok(ExecuteResult::new(vec![table], 0))
}

pub fn value_of(command: &Command, name: &str) -> Value {
    command
        .parameter(name)
        .map(|p| p.value.clone())
        .unwrap_or(Value::Null)
}

pub fn set_output(command: &mut Command, name: &str, value: impl Into<Value>) {
    if let Some(parameter) = command.parameter_mut(name) {
        parameter.value = value.into();
    }
}
