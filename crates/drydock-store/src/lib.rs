//! Results storage for Drydock CI.
//!
//! Job records live in a directory tree mirroring their keys:
//! `<root>/<owner>/<repo>/<number>` holds one JSON document mapping each
//! image to its result record.

pub mod error;
pub mod numbering;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use numbering::BuildNumberer;
pub use store::ResultsStore;
