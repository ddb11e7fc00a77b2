pub mod app;
pub mod config;
pub mod metrics;
pub mod services;
pub mod state;
pub mod tasks;
pub mod vsphere;
pub mod web;

pub mod prelude {
    pub use crate::state::AppState;
    pub use crate::vsphere::Vsphere;
    pub use vmctl_common::prelude::{Error, Result};
}
