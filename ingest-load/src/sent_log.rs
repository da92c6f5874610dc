//! The per-run record of every message sent (or previewed).

use crate::adapter::Body;
use crate::error::LoadResult;
use ingest_cache::clean_destination;
use ingest_types::Method;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One entry of the sent-message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentMessage {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub method: Method,
    pub body: Body,
    /// Target host; only version 1 loads record it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// `<output_dir>/SentMessages_<clean destination>.json`
pub fn sent_log_path(output_dir: &Path, destination: &str) -> PathBuf {
    output_dir.join(format!("SentMessages_{}.json", clean_destination(destination)))
}

/// Writes the log as a pretty-printed JSON array, replacing any previous one.
pub fn write_sent_log(path: &Path, messages: &[SentMessage]) -> LoadResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, messages)?;
    writer.flush()?;
    Ok(())
}

pub fn read_sent_log(path: &Path) -> LoadResult<Vec<SentMessage>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
