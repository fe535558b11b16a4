//! Conformance Core
//!
//! Validates archived event-stream messages against the JSON Schemas
//! declared for their topics, within a wall-clock budget shared by every
//! topic of one invocation.
//!
//! # Pipeline
//! 1. [`resolver`] expands `$ref` pointers into a self-contained schema.
//! 2. [`decompress`] streams an xz archive in fixed-size chunks.
//! 3. [`splitter`] recovers top-level `{...}` objects from each chunk.
//! 4. [`validator`] checks every object and records deduplicated findings.
//! 5. [`budget`] hands each topic a fair slice of the remaining time.
//!
//! # Design Principles
//! - Cooperative: every loop polls its budget and exits early, nothing is preempted
//! - Stateless: a run keeps no state beyond the findings it returns
//! - Injected: storage is reached only through the traits in [`store`]

pub mod budget;
pub mod decompress;
pub mod error;
pub mod findings;
pub mod processor;
pub mod resolver;
pub mod splitter;
pub mod store;
pub mod validator;

pub use budget::{BudgetAllocator, BudgetProbe, Deadline, TopicBudget};
pub use error::{DecompressionError, ResolutionError, ValidationFailure};
pub use findings::{ErrorDetail, Finding, FindingError, FindingKind, FindingSet};
pub use processor::{RunSummary, TopicProcessor, TopicReport, TopicSchemaBinding, TopicStatus};
pub use resolver::{resolve, SchemaResolver};
pub use store::{BlobHandle, BlobStore, SchemaSource, StoreError};
pub use validator::{BlobValidator, MessageValidator};
