pub mod store;
pub mod workload;

pub use store::MemoryRecordStore;
pub use workload::MemoryWorkloadSource;
