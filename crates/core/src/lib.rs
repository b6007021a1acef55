//! Core types for the image certification inventory.
//!
//! Parsing of runtime image identifiers, deterministic record keys,
//! registry classification, and the record and payload shapes shared by
//! the client, store, and inventory crates.

pub mod certification;
pub mod error;
pub mod health;
pub mod key;
pub mod lifecycle;
pub mod record;
pub mod reference;
pub mod registry;
pub mod workload;

pub use certification::{CertificationData, HubRepository, VulnerabilitySummary, format_pull_count};
pub use error::ReferenceError;
pub use health::{HealthGrade, is_health_degraded};
pub use key::record_key;
pub use lifecycle::{
    EOL_NOTICE_HORIZON_DAYS, days_since, days_until, format_image_age, is_eol_approaching,
    parse_timestamp,
};
pub use record::{
    CVE_ANNOTATION, CertificationDetails, CertificationStatus, HubMetadata, ImageRecord,
    ImageSpec, ImageStatus, WorkloadReference,
};
pub use reference::{ImageReference, parse_image_id};
pub use registry::{RegistryType, classify_registry, is_certification_eligible, is_docker_hub};
pub use workload::{ContainerStatus, Workload, WorkloadPhase};
