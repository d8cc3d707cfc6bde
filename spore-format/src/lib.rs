pub mod error;
pub mod types;

pub use error::SporeDataError;
pub use types::{ClusterData, LiveCell, OutPointRecord, SporeData};
