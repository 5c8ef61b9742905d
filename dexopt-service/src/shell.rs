//! Service backend that runs shell commands
//!
//! On a device without a binder binding the same command can be issued by
//! running `cmd <service> <args...>`. The handle decodes the transaction
//! payload and turns the process result back into a reply.

use std::process::Command;
use std::sync::Arc;

use dexopt_error::{DexOptError, DexOptResult, ServiceError};
use dexopt_osal::output_with_retry;

use crate::command::{SHELL_COMMAND_TRANSACTION, ShellCommand};
use crate::locator::{ServiceHandle, ServiceLocator};
use crate::parcel::{EX_ILLEGAL_ARGUMENT, EX_SERVICE_SPECIFIC, Parcel};

const SERVICE_GONE: &str = "Can't find service";

/// Locator backed by the `cmd` and `service` tools
#[derive(Debug, Clone)]
pub struct ShellServiceLocator {
    cmd_program: String,
    service_program: String,
}

impl ShellServiceLocator {
    pub fn new(cmd_program: impl Into<String>) -> Self {
        Self {
            cmd_program: cmd_program.into(),
            service_program: "service".into(),
        }
    }

    pub fn with_service_program(mut self, program: impl Into<String>) -> Self {
        self.service_program = program.into();
        self
    }
}

impl Default for ShellServiceLocator {
    fn default() -> Self {
        Self::new("cmd")
    }
}

impl ServiceLocator for ShellServiceLocator {
    fn get_service(&self, name: &str) -> DexOptResult<Arc<dyn ServiceHandle>> {
        let handle = ShellServiceHandle {
            name: name.to_string(),
            cmd_program: self.cmd_program.clone(),
            service_program: self.service_program.clone(),
        };
        if !handle.is_alive() {
            return Err(DexOptError::service(ServiceError::LookupFailed(
                name.to_string(),
                format!("{} check reported no such service", self.service_program),
            )));
        }
        Ok(Arc::new(handle))
    }
}

#[derive(Debug)]
struct ShellServiceHandle {
    name: String,
    cmd_program: String,
    service_program: String,
}

impl ServiceHandle for ShellServiceHandle {
    fn is_alive(&self) -> bool {
        match output_with_retry(Command::new(&self.service_program).arg("check").arg(&self.name)) {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout);
                text.contains(": found")
            }
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(service = %self.name, "liveness check failed: {e}");
                false
            }
        }
    }

    fn transact(
        &self,
        code: u32,
        data: &Parcel,
        reply: &mut Parcel,
        _flags: u32,
    ) -> DexOptResult<()> {
        if code != SHELL_COMMAND_TRANSACTION {
            reply.write_exception(EX_ILLEGAL_ARGUMENT, &format!("unsupported transaction {code:#x}"));
            return Ok(());
        }

        let mut data = Parcel::from_bytes(data.as_bytes().to_vec());
        let command = ShellCommand::read_from(&mut data)?;
        tracing::debug!(service = %self.name, args = ?command.args, "running shell command");

        let output = output_with_retry(Command::new(&self.cmd_program).arg(&self.name).args(&command.args))
            .map_err(|e| {
                DexOptError::service(ServiceError::TransactionFailed(format!(
                    "failed to run {}: {e}",
                    self.cmd_program
                )))
            })?;

        if output.status.success() {
            reply.write_no_exception();
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if stderr.trim().is_empty() { stdout } else { stderr };
        // `cmd` reports a service that went away between lookup and call this way
        if message.contains(SERVICE_GONE) {
            return Err(DexOptError::service(ServiceError::DeadObject(self.name.clone())));
        }
        reply.write_exception(EX_SERVICE_SPECIFIC, message.trim());
        Ok(())
    }
}
