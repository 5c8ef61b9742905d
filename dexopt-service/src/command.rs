//! Shell command transaction
//!
//! The package service accepts the same commands as `cmd package ...` through a
//! generic shell-command transaction. Using it avoids depending on the
//! version-specific transaction code of the dexopt method itself.

use dexopt_error::{DexOptError, DexOptResult, ServiceError};

use crate::parcel::Parcel;

/// `'_CMD'`
pub const SHELL_COMMAND_TRANSACTION: u32 =
    ((b'_' as u32) << 24) | ((b'C' as u32) << 16) | ((b'M' as u32) << 8) | (b'D' as u32);

const STDIN_FD: i32 = 0;
const STDOUT_FD: i32 = 1;
const STDERR_FD: i32 = 2;

/// One shell command addressed to a system service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub args: Vec<String>,
}

impl ShellCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Force a `speed-profile` compile of the package's secondary dex files.
    ///
    /// `speed-profile` reuses the JIT profile and the `.art` cache while
    /// finishing in about the time `quicken` would take.
    pub fn compile_secondary(package_name: &str) -> Self {
        Self::new([
            "compile",
            "-f",
            "--secondary-dex",
            "-m",
            "speed-profile",
            package_name,
        ])
    }

    pub fn write_to(&self, data: &mut Parcel) {
        data.write_file_descriptor(STDIN_FD);
        data.write_file_descriptor(STDOUT_FD);
        data.write_file_descriptor(STDERR_FD);
        data.write_string_array(&self.args);
        // no ShellCallback
        data.write_strong_binder(None);
    }

    pub fn read_from(data: &mut Parcel) -> DexOptResult<Self> {
        for _ in 0..3 {
            data.read_file_descriptor()?;
        }
        let args = data.read_string_array()?;
        if args.is_empty() {
            return Err(DexOptError::service(ServiceError::MalformedParcel(
                "empty shell command".into(),
            )));
        }
        data.read_strong_binder()?;
        Ok(Self { args })
    }
}
