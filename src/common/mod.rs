pub mod command;
pub mod error;
pub mod fs;

pub use command::{CommandRunner, SystemRunner};
pub use error::{ControlError, ControlErrorKind};
