//! Stage uploads through the `snowsql` command line client
//!
//! File transfer to internal stages requires client-side encryption that is
//! only implemented by the official drivers, so uploads shell out to
//! `snowsql`. The password is passed through `SNOWSQL_PWD`, never on the
//! command line.

use snowflow_core::domain::config::ConnectionParameters;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ClientError, Result};
use crate::session::{PutOptions, put_statement};

const PASSWORD_ENV: &str = "SNOWSQL_PWD";

/// Uploads files to stages by running `snowsql -q "PUT ..."`
#[derive(Clone)]
pub struct SnowsqlStager {
    program: String,
    params: ConnectionParameters,
}

impl SnowsqlStager {
    pub fn new(params: ConnectionParameters) -> Self {
        Self {
            program: "snowsql".to_string(),
            params,
        }
    }

    /// Use a different `snowsql` executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Checks that `snowsql` can be started
    pub async fn check_available(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                ClientError::UploadFailed(format!(
                    "Failed to execute '{} --version'. Is snowsql installed? {}",
                    self.program, e
                ))
            })?;

        if !output.status.success() {
            return Err(ClientError::UploadFailed(format!(
                "'{}' is not working correctly",
                self.program
            )));
        }

        debug!(
            "snowsql is available: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    /// Command line arguments for one statement, password excluded
    pub fn arguments(&self, statement: &str) -> Vec<String> {
        let p = &self.params;
        let mut args = vec![
            "-a".to_string(),
            p.account.clone(),
            "-u".to_string(),
            p.user.clone(),
            "-w".to_string(),
            p.warehouse.clone(),
            "-d".to_string(),
            p.database.clone(),
            "-s".to_string(),
            p.schema.clone(),
        ];
        if let Some(role) = &p.role {
            args.push("-r".to_string());
            args.push(role.clone());
        }
        if let Some(host) = &p.host {
            args.push("-h".to_string());
            args.push(
                host.trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string(),
            );
        }
        for option in ["exit_on_error=true", "friendly=false", "quiet=true"] {
            args.push("-o".to_string());
            args.push(option.to_string());
        }
        args.push("-q".to_string());
        args.push(statement.to_string());
        args
    }

    /// Upload files matching `local_pattern` to `stage_location`
    pub async fn put(
        &self,
        local_pattern: &str,
        stage_location: &str,
        options: &PutOptions,
    ) -> Result<()> {
        let statement = put_statement(local_pattern, stage_location, options);
        info!("Uploading {} to {}", local_pattern, stage_location);
        debug!("{}", statement);

        let output = Command::new(&self.program)
            .args(self.arguments(&statement))
            .env(PASSWORD_ENV, &self.params.password)
            .output()
            .await
            .map_err(|e| {
                ClientError::UploadFailed(format!("Failed to execute {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(ClientError::UploadFailed(format!(
                "{} exited with {}: {}{}",
                self.program,
                output.status,
                stderr.trim(),
                stdout.trim()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParameters {
        ConnectionParameters {
            account: "acc".into(),
            user: "usr".into(),
            password: "secret".into(),
            warehouse: "wh".into(),
            database: "db".into(),
            schema: "public".into(),
            role: Some("dev".into()),
            host: None,
        }
    }

    #[test]
    fn test_arguments_exclude_password() {
        let stager = SnowsqlStager::new(params());
        let args = stager.arguments("PUT 'file:///tmp/x' @S");

        assert!(!args.iter().any(|a| a.contains("secret")));
        assert_eq!(&args[..2], &["-a".to_string(), "acc".to_string()]);
        assert!(args.windows(2).any(|w| w[0] == "-r" && w[1] == "dev"));
        assert_eq!(args.last().map(String::as_str), Some("PUT 'file:///tmp/x' @S"));
    }

    #[test]
    fn test_arguments_host_is_stripped() {
        let mut p = params();
        p.host = Some("https://acc.eu.snowflakecomputing.com/".into());
        let args = SnowsqlStager::new(p).arguments("select 1");
        assert!(
            args.windows(2)
                .any(|w| w[0] == "-h" && w[1] == "acc.eu.snowflakecomputing.com")
        );
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let stager = SnowsqlStager::new(params()).with_program("snowflow-no-such-binary");
        let err = stager
            .put("/tmp/x", "@S", &PutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UploadFailed(_)));
    }
}
