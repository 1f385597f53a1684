pub mod edgex;
pub mod edgex_v1alpha1;
pub mod yurt_app_set;

pub use edgex::{ComponentSpec, EdgeX, EdgeXSpec, EdgeXStatus};
pub use yurt_app_set::YurtAppSet;
