//! Test doubles shared by the compiler tests

use async_trait::async_trait;
use snowflow_client::{ClientError, PutOptions, QueryResult, Result, WarehouseSession};
use std::path::PathBuf;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&str) -> Result<QueryResult> + Send + Sync>;

/// Records every statement and upload, answers with a scripted responder
pub struct RecordingSession {
    statements: Mutex<Vec<String>>,
    puts: Mutex<Vec<(String, String)>>,
    responder: Responder,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(QueryResult::default()))
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<QueryResult> + Send + Sync + 'static,
    {
        Self {
            statements: Mutex::new(Vec::new()),
            puts: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        }
    }

    /// Fail every statement containing `needle`
    pub fn failing_on(needle: &'static str) -> Self {
        Self::with_responder(move |sql| {
            if sql.contains(needle) {
                Err(ClientError::QueryFailed {
                    code: "000001".into(),
                    sql_state: "42000".into(),
                    message: "scripted failure".into(),
                    statement: sql.to_string(),
                })
            } else {
                Ok(QueryResult::default())
            }
        })
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// (local pattern, stage location) pairs
    pub fn puts(&self) -> Vec<(String, String)> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl WarehouseSession for RecordingSession {
    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.statements.lock().unwrap().push(sql.to_string());
        (self.responder)(sql)
    }

    async fn put(
        &self,
        local_pattern: &str,
        stage_location: &str,
        _options: &PutOptions,
    ) -> Result<()> {
        self.puts
            .lock()
            .unwrap()
            .push((local_pattern.to_string(), stage_location.to_string()));
        Ok(())
    }
}

/// Locator resolving every module inside a fixed directory
pub struct DirectoryLocator(pub PathBuf);

impl crate::packaging::ModuleLocator for DirectoryLocator {
    fn locate(&self, module: &str) -> crate::error::Result<PathBuf> {
        let dir = self.0.join(module);
        if dir.is_dir() {
            return Ok(dir);
        }
        let file = self.0.join(format!("{}.py", module));
        if file.is_file() {
            return Ok(file);
        }
        Err(crate::error::CompileError::ModuleNotFound {
            module: module.to_string(),
            reason: "not in test directory".to_string(),
        })
    }
}
