//! Visit session domain: the authoritative state snapshot, the partial
//! update shape shared by the optimistic and server-reconcile paths, and
//! the backend API seam.

pub mod api;
pub mod model;
pub mod patch;

pub use api::{ValidateResponse, VisitApi, VisitStatus};
pub use model::{AgentIdentity, VisitSession};
pub use patch::{MergeOutcome, VisitPatch};
