//! xfer-core: Core library for the xfer transfer tool
//!
//! This crate provides:
//! - Locator parsing (`s3://bucket/key`, `file:///path`, local paths)
//! - Credential resolution from an injected environment
//! - The backend capability registry
//! - Paginated listing, transfer planning and execution
//! - Local filesystem and in-memory backends
//!
//! Nothing here depends on a cloud SDK; the S3 backend lives in `xfer-s3`
//! and plugs in through [`BackendClient`].

pub mod capability;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod lister;
pub mod local;
pub mod locator;
pub mod memory;
pub mod planner;
pub mod report;
pub mod retry;
pub mod task;

pub use capability::{Capability, CapabilityRegistry, FeatureRow, IfExists, OperationKind};
pub use client::{BackendClient, ByteStream, ListPage, ObjectDescriptor, ObjectSink};
pub use config::{Config, ConfigManager, TransferSettings};
pub use credentials::{CredentialResolver, Credentials, Environment};
pub use error::{Error, Result};
pub use executor::{ExecutorConfig, ProgressFn, TransferExecutor, TransferRoute};
pub use lister::{ListCursor, ObjectLister};
pub use local::LocalClient;
pub use locator::{Locator, Scheme, parse_locator};
pub use memory::MemoryClient;
pub use planner::{Endpoint, PlanOptions, TransferIntent, TransferPlanner};
pub use report::{TaskReport, TransferReport};
pub use retry::{RetryBuilder, RetryConfig, is_retryable_error, retry_with_backoff};
pub use task::{FailureKind, TaskState, TransferPlan, TransferTask};

/// Run-level cancellation signal for [`TransferExecutor`]
pub use tokio_util::sync::CancellationToken;
