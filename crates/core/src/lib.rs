//! Strata pipeline core -- run identities, stage taxonomy, in-memory
//! tables, and data profiling.
//!
//! Everything downstream (store, governance, engine, stage runners)
//! builds on these types. The crate has no knowledge of the artifact
//! layout or of any remote capability; identities are plain values
//! threaded through component calls, never ambient state.

pub mod error;
pub mod profile;
pub mod runid;
pub mod stage;
pub mod table;
pub mod values;

pub use error::{RunIdError, TableError};
pub use profile::{ColumnProfile, InferredType, ProfileSummary, TableProfile};
pub use runid::{mint, RunId, RunIdentity};
pub use stage::Stage;
pub use table::Table;
