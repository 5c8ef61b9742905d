//! dexopt-service: system compile service bridge
//!
//! Asks the package service, through its shell command transaction, to compile
//! the application's secondary dex files in the background. Service lookup,
//! calling identity and transaction delivery sit behind capability traits.

pub mod command;
pub mod locator;
pub mod parcel;
pub mod shell;
pub mod trigger;

pub use command::{SHELL_COMMAND_TRANSACTION, ShellCommand};
pub use locator::{CallingIdentity, IdentityGuard, ProcessIdentity, ServiceHandle, ServiceLocator};
pub use parcel::Parcel;
pub use shell::ShellServiceLocator;
pub use trigger::{BackgroundCompile, ServiceTrigger};
