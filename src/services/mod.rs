//! Engine services: state machine, monitors, scheduler, dispute authority.

pub mod dispute;
pub mod lifecycle;
pub mod payment_monitor;
pub mod post_monitor;
pub mod scheduler;
