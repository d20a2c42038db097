//! Batch import pipelines for the medical reference schema.
//!
//! Every importer follows the same shape: decode rows from its source
//! file, accumulate them in columnar arrays, and flush each full batch as
//! ONE multi-row `UNNEST` upsert keyed on the entity's natural identifier
//! (state code, IBGE city code, hospital/doctor code, CID-10 code,
//! patient `codigo`). Statements commit independently; re-running an
//! import only refreshes mutable columns and `updated_at`.
//!
//! # Import order
//!
//! States, cities and the CID-10 catalogue go first; the city and CID
//! snapshots (`crate::lookup`) are loaded from the database afterwards
//! and feed the hospital and patient mappers. Specialties resolve
//! hospital ids after the hospital pass.
//!
//! # Error policy
//!
//! The CSV and spreadsheet paths abort the run on the first decode or
//! database error. The streaming patient path is the exception: it drops
//! a failed batch, logs it, and keeps consuming the document.

pub mod cid;
pub mod cities;
pub mod doctors;
pub mod hospitals;
pub mod patients;
pub mod states;
pub mod stats;

pub use stats::ImportStats;
