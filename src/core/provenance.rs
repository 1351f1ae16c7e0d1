/*!
 * Provenance metadata of retrieved wind products
 *
 * Records the input datasets, the model valid time and its offset from the
 * acquisition, and the processing history entry appended to the SAR history.
 */

use crate::io::raster::MetadataSet;
use crate::types::Polarization;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Processor tag written to the history attribute
pub const PROCESSOR_NAME: &str = "SARWind";

/// Inputs and timing of one retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalProvenance {
    pub sar_filename: String,
    pub wind_filename: String,
    pub polarization: Polarization,
    pub time_coverage_start: DateTime<Utc>,
    pub time_coverage_end: DateTime<Utc>,
    pub aux_time: DateTime<Utc>,
    pub time_offset_minutes: f64,
    pub processing_time: DateTime<Utc>,
}

impl RetrievalProvenance {
    /// `<UTC ISO time>: SARWind(<wind>, <sar>)`
    pub fn history_entry(&self) -> String {
        format!(
            "{}: {}({}, {})",
            self.processing_time.to_rfc3339_opts(SecondsFormat::Micros, false),
            PROCESSOR_NAME,
            self.wind_filename,
            self.sar_filename
        )
    }

    /// Output metadata: the SAR metadata plus provenance keys
    pub fn to_metadata(&self, sar: &MetadataSet, aux: &MetadataSet) -> MetadataSet {
        let mut metadata = sar.clone();
        metadata.set("time_coverage_start", iso(&self.time_coverage_start));
        metadata.set("time_coverage_end", iso(&self.time_coverage_end));
        metadata.set("sar_filename", self.sar_filename.as_str());
        metadata.set("wind_filename", self.wind_filename.as_str());
        metadata.set("polarization", self.polarization.to_string());
        metadata.set("aux_time", iso(&self.aux_time));
        metadata.set("time_offset_minutes", format!("{:.1}", self.time_offset_minutes));
        metadata.set(
            "history",
            append_history(sar.get("history"), &self.history_entry()),
        );

        let related = related_dataset(&[
            (sar.get("naming_authority"), sar.get("id")),
            (aux.get("naming_authority"), aux.get("id")),
        ]);
        if !related.is_empty() {
            metadata.set("related_dataset", related);
        }
        metadata
    }
}

fn iso(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Append a history line to an existing history attribute
pub fn append_history(existing: Option<&str>, entry: &str) -> String {
    match existing {
        Some(history) if !history.trim().is_empty() => format!("{}\n{}", history, entry),
        _ => entry.to_string(),
    }
}

/// `<authority>:<id> (auxiliary)` per input, comma separated; inputs without an id are skipped
pub fn related_dataset(inputs: &[(Option<&str>, Option<&str>)]) -> String {
    inputs
        .iter()
        .filter_map(|(authority, id)| {
            let id = id.filter(|id| !id.is_empty())?;
            Some(match authority.filter(|a| !a.is_empty()) {
                Some(authority) => format!("{}:{} (auxiliary)", authority, id),
                None => format!("{} (auxiliary)", id),
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}
