//! Background compile trigger
//!
//! Asks the package service to compile the application's secondary dex files
//! itself. The service handle is cached and re-acquired whenever it is missing
//! or its remote side has died.

use std::sync::Arc;

use parking_lot::Mutex;

use dexopt_error::{DexOptError, DexOptResult, ServiceError};

use crate::command::{SHELL_COMMAND_TRANSACTION, ShellCommand};
use crate::locator::{CallingIdentity, IdentityGuard, ServiceHandle, ServiceLocator};
use crate::parcel::Parcel;

/// Narrow interface used by the optimizer: "please compile my secondary dex files"
pub trait BackgroundCompile: Send + Sync {
    fn request_secondary_compile(&self) -> DexOptResult<()>;
}

/// Sends the secondary compile command to the package service
pub struct ServiceTrigger {
    locator: Arc<dyn ServiceLocator>,
    identity: Arc<dyn CallingIdentity>,
    service_name: String,
    package_name: String,
    handle: Mutex<Option<Arc<dyn ServiceHandle>>>,
}

impl ServiceTrigger {
    pub fn new(
        locator: Arc<dyn ServiceLocator>,
        identity: Arc<dyn CallingIdentity>,
        service_name: impl Into<String>,
        package_name: impl Into<String>,
    ) -> Self {
        Self {
            locator,
            identity,
            service_name: service_name.into(),
            package_name: package_name.into(),
            handle: Mutex::new(None),
        }
    }

    fn service_handle(&self) -> DexOptResult<Arc<dyn ServiceHandle>> {
        let mut cached = self.handle.lock();
        if let Some(handle) = cached.as_ref()
            && handle.is_alive()
        {
            return Ok(handle.clone());
        }
        // Rebinding is idempotent; a concurrent caller just looks it up again
        let handle = self.locator.get_service(&self.service_name)?;
        *cached = Some(handle.clone());
        Ok(handle)
    }

    /// Issue one `compile -f --secondary-dex -m speed-profile <pkg>` transaction
    pub fn perform_dexopt_secondary(&self) -> DexOptResult<()> {
        let handle = self.service_handle()?;
        let command = ShellCommand::compile_secondary(&self.package_name);

        let _identity = IdentityGuard::new(self.identity.as_ref());
        tracing::info!(package = %self.package_name, "[+] Start trigger secondary dexopt.");

        let mut data = Parcel::obtain();
        let mut reply = Parcel::obtain();
        command.write_to(&mut data);

        handle
            .transact(SHELL_COMMAND_TRANSACTION, &data, &mut reply, 0)
            .map_err(|e| wrap_failure(&e))?;
        reply.rewind();
        reply.read_exception().map_err(|e| wrap_failure(&e))?;

        tracing::info!(package = %self.package_name, "[+] Secondary dexopt done.");
        Ok(())
    }
}

impl BackgroundCompile for ServiceTrigger {
    fn request_secondary_compile(&self) -> DexOptResult<()> {
        self.perform_dexopt_secondary()
    }
}

fn wrap_failure(cause: &DexOptError) -> DexOptError {
    match cause {
        // keep the remote code visible to callers
        DexOptError::Service {
            source: ServiceError::RemoteException(..),
            ..
        } => cause.clone(),
        other => DexOptError::service(ServiceError::TransactionFailed(format!(
            "Failure on triggering secondary dexopt: {other}"
        ))),
    }
}
