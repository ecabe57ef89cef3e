//! Snowflow warehouse client
//!
//! A small client for the pieces of Snowflake the compiler talks to:
//! executing statements over the SQL REST protocol and uploading files to
//! stages. Both sit behind the [`WarehouseSession`] trait so the compiler
//! can be driven by a recording double in tests.
//!
//! # Example
//!
//! ```no_run
//! use snowflow_client::{SnowflakeClient, WarehouseSession};
//! use snowflow_core::domain::config::ConnectionParameters;
//!
//! # async fn example(params: ConnectionParameters) -> snowflow_client::Result<()> {
//! let session = SnowflakeClient::connect(params).await?;
//! let result = session.execute("select current_version()").await?;
//! println!("{:?}", result.rows);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod session;
pub mod snowflake;
pub mod stage;

pub use error::{ClientError, Result};
pub use session::{PutOptions, QueryResult, WarehouseSession, put_statement};
pub use snowflake::SnowflakeClient;
pub use stage::SnowsqlStager;
