pub mod error;
pub mod telemetry;

pub mod prelude {
    pub use crate::error::{Error, Fault, Result, SelectorKind, VsphereError};
}
