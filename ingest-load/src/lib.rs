//! The load stage: idempotent create-or-update of standardized records
//! against a target service.
//!
//! A load walks the entity types of an [`AdapterSet`] in order. Each
//! record gets a unique key, duplicates are dropped, and the identity
//! cache decides between CREATE and UPDATE:
//!
//! ```text
//! record ─▶ key ─▶ dedup ─▶ existing id? ─▶ body ─▶ submit / simulate ─▶ cache
//! ```
//!
//! - [`adapter`]: the contract a target implements (protocol 1 or 2)
//! - [`descriptor`]: reference adapters for a REST dataservice
//! - [`LoadOrchestrator`]: the driver, with dry run and resume

pub mod adapter;
pub mod client;
pub mod descriptor;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod resume;
pub mod sent_log;
pub mod settings;
#[cfg(feature = "testing")]
pub mod testing;

pub use adapter::{
    AdapterSet, AdapterSetBuilder, Body, EntityV1, EntityV2, IdLookup, KeyComponents, KeyDerivation,
    LoaderVersion, SubmitV1, TargetAdapter, reported_id,
};
pub use client::DataServiceClient;
pub use descriptor::{DataServiceSubmitter, DescriptorEntityV1, DescriptorEntityV2, EntitySpec, build_adapter_set};
pub use error::{LoadError, LoadResult};
pub use orchestrator::{LoadOptions, LoadOrchestrator, LoadTarget, RecordDisposition, Tables};
pub use report::{LoadReport, SkipCounts};
pub use resume::{ResumeController, ResumeStep};
pub use sent_log::{SentMessage, read_sent_log, sent_log_path, write_sent_log};
pub use settings::LoadSettings;
