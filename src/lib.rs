//! Server-side query engine for interactive exploration of tabular
//! datasets, backed by an embedded `DuckDB` connection.
//!
//! Uploaded files are ingested into per-dataset tables and then served
//! through keyset-paginated page reads, structured table queries, column
//! profiling, CSV export, raw SQL, and a small code-cell expression
//! language. The HTTP boundary lives in [`server`]; everything else is the
//! engine and its compilers.

pub mod cell;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod export;
pub mod filter;
pub mod ident;
pub mod ingest;
pub mod page;
pub mod profile;
pub mod schema;
pub mod server;
pub mod table_query;
pub mod types;
pub mod value;

pub use engine::Engine;
pub use error::{Error, Result};
