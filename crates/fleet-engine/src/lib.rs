//! Fleet Engine
//!
//! The reconciliation engine that keeps a pool of CI agents sized to the
//! job queue, plus the loop that drives it.

pub mod autoscaler;
pub mod capacity;
pub mod driver;
pub mod report;

pub use autoscaler::Autoscaler;
pub use capacity::{QueueLoad, calc_agents};
pub use driver::ReconcileLoop;
pub use report::ReconcileReport;
