pub mod manager;
pub mod version_map;

pub use manager::{PathLockGuard, ProcessingQueue};
pub use version_map::VersionMap;
