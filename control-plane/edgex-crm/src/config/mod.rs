mod types;

pub use types::{CrmConfig, ReconcileConfig};
