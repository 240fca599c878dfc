//! Convenient imports for typical `pgbatch` usage.
//!
//! ```ignore
//! use pgbatch::prelude::*;
//! ```

pub use crate::{
    BatchConfig, BatchError, BatchExecutor, BatchInterface, BatchOutput, BatchResult, Record,
    Returning, TableMeta, TableSchema,
};

#[cfg(feature = "pool")]
pub use crate::{create_pool, create_pool_with_config};
