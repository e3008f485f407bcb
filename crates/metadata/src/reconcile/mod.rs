//! Pure reconciliation decisions.
//!
//! Nothing in here touches the database. The stores read current state,
//! ask these functions what to do, and apply the answer inside a transaction.

pub mod certificates;
pub mod host_software;
pub mod titles;
pub mod upgrade_code;

pub use certificates::CertificatePlan;
pub use host_software::HostSoftwarePlan;
pub use titles::TitleDecision;
pub use upgrade_code::UpgradeCodePlan;
