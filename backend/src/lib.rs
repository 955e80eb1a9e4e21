//! Kernel side of the locus viewport bridge: the association table and the
//! authoritative widget state it is sliced by.

pub mod associations;
pub mod kernel;

pub use associations::{Association, AssociationError, AssociationTable};
pub use kernel::{Kernel, KernelError, PositionRequest, resolve_initial_position, validate_position};
