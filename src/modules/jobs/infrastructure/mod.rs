pub mod repository;

pub use repository::JsonSnapshotStore;
