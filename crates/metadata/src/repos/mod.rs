//! Repository traits for catalog operations.

pub mod certificates;
pub mod counts;
pub mod inventory;
pub mod software;
pub mod titles;
pub mod vulnerabilities;

pub use certificates::CertificateRepo;
pub use counts::{AllCountsSync, CountRepo, CountSyncStats, TitleListOptions};
pub use inventory::InventoryRepo;
pub use software::HostSoftwareRepo;
pub use titles::TitleRepo;
pub use vulnerabilities::{VulnerabilityListOptions, VulnerabilityRepo};
