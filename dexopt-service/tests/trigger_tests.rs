//! ServiceTrigger behaviour against in-memory service doubles

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use dexopt_error::{DexOptError, DexOptResult, ServiceError};
use dexopt_service::parcel::EX_SERVICE_SPECIFIC;
use dexopt_service::{
    BackgroundCompile, CallingIdentity, Parcel, SHELL_COMMAND_TRANSACTION, ServiceHandle,
    ServiceLocator, ServiceTrigger, ShellCommand,
};
use parking_lot::Mutex;

#[derive(Clone, Copy)]
enum Reply {
    Ok,
    RemoteException,
    TransportError,
}

struct FakeHandle {
    alive: AtomicBool,
    reply: Reply,
    received: Mutex<Vec<(u32, ShellCommand)>>,
    identity_cleared: Arc<AtomicBool>,
    cleared_during_call: AtomicBool,
}

impl ServiceHandle for FakeHandle {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn transact(&self, code: u32, data: &Parcel, reply: &mut Parcel, _flags: u32) -> DexOptResult<()> {
        self.cleared_during_call
            .store(self.identity_cleared.load(Ordering::SeqCst), Ordering::SeqCst);
        let mut data = data.clone();
        data.rewind();
        let command = ShellCommand::read_from(&mut data)?;
        self.received.lock().push((code, command));
        match self.reply {
            Reply::Ok => reply.write_no_exception(),
            Reply::RemoteException => reply.write_exception(EX_SERVICE_SPECIFIC, "dexopt refused"),
            Reply::TransportError => {
                return Err(DexOptError::service(ServiceError::DeadObject("package".into())));
            }
        }
        Ok(())
    }
}

struct FakeLocator {
    lookups: AtomicUsize,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
    reply: Reply,
    identity_cleared: Arc<AtomicBool>,
    fail: bool,
}

impl FakeLocator {
    fn new(reply: Reply, identity_cleared: Arc<AtomicBool>) -> Self {
        Self {
            lookups: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
            reply,
            identity_cleared,
            fail: false,
        }
    }

    fn last_handle(&self) -> Arc<FakeHandle> {
        self.handles.lock().last().cloned().expect("no handle handed out")
    }
}

impl ServiceLocator for FakeLocator {
    fn get_service(&self, name: &str) -> DexOptResult<Arc<dyn ServiceHandle>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DexOptError::service(ServiceError::LookupFailed(
                name.into(),
                "no such service".into(),
            )));
        }
        let handle = Arc::new(FakeHandle {
            alive: AtomicBool::new(true),
            reply: self.reply,
            received: Mutex::new(Vec::new()),
            identity_cleared: self.identity_cleared.clone(),
            cleared_during_call: AtomicBool::new(false),
        });
        self.handles.lock().push(handle.clone());
        Ok(handle)
    }
}

struct FakeIdentity {
    cleared: Arc<AtomicBool>,
    restored_token: AtomicI64,
}

impl CallingIdentity for FakeIdentity {
    fn clear(&self) -> i64 {
        self.cleared.store(true, Ordering::SeqCst);
        42
    }

    fn restore(&self, token: i64) {
        self.cleared.store(false, Ordering::SeqCst);
        self.restored_token.store(token, Ordering::SeqCst);
    }
}

fn setup(reply: Reply) -> (Arc<FakeLocator>, Arc<FakeIdentity>, ServiceTrigger) {
    let cleared = Arc::new(AtomicBool::new(false));
    let locator = Arc::new(FakeLocator::new(reply, cleared.clone()));
    let identity = Arc::new(FakeIdentity {
        cleared,
        restored_token: AtomicI64::new(0),
    });
    let trigger = ServiceTrigger::new(locator.clone(), identity.clone(), "package", "com.example.app");
    (locator, identity, trigger)
}

#[test]
fn sends_compile_command_with_cleared_identity() {
    let (locator, identity, trigger) = setup(Reply::Ok);
    trigger.request_secondary_compile().unwrap();

    let handle = locator.last_handle();
    let received = handle.received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, SHELL_COMMAND_TRANSACTION);
    assert_eq!(received[0].1, ShellCommand::compile_secondary("com.example.app"));
    assert!(handle.cleared_during_call.load(Ordering::SeqCst));
    assert!(!identity.cleared.load(Ordering::SeqCst));
    assert_eq!(identity.restored_token.load(Ordering::SeqCst), 42);
}

#[test]
fn caches_live_handle() {
    let (locator, _identity, trigger) = setup(Reply::Ok);
    trigger.request_secondary_compile().unwrap();
    trigger.request_secondary_compile().unwrap();
    assert_eq!(locator.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(locator.last_handle().received.lock().len(), 2);
}

#[test]
fn reacquires_dead_handle() {
    let (locator, _identity, trigger) = setup(Reply::Ok);
    trigger.request_secondary_compile().unwrap();
    locator.last_handle().alive.store(false, Ordering::SeqCst);

    trigger.request_secondary_compile().unwrap();
    assert_eq!(locator.lookups.load(Ordering::SeqCst), 2);
    assert_eq!(locator.last_handle().received.lock().len(), 1);
}

#[test]
fn remote_exception_is_reported_and_identity_restored() {
    let (_locator, identity, trigger) = setup(Reply::RemoteException);
    let err = trigger.request_secondary_compile().unwrap_err();
    assert!(matches!(
        err,
        DexOptError::Service {
            source: ServiceError::RemoteException(EX_SERVICE_SPECIFIC, _),
            ..
        }
    ));
    assert!(!identity.cleared.load(Ordering::SeqCst));
}

#[test]
fn transport_error_is_wrapped() {
    let (_locator, identity, trigger) = setup(Reply::TransportError);
    let err = trigger.request_secondary_compile().unwrap_err();
    assert!(matches!(
        err,
        DexOptError::Service {
            source: ServiceError::TransactionFailed(_),
            ..
        }
    ));
    assert!(err.to_string().contains("Failure on triggering secondary dexopt"));
    assert!(!identity.cleared.load(Ordering::SeqCst));
}

#[test]
fn lookup_failure_propagates() {
    let cleared = Arc::new(AtomicBool::new(false));
    let mut locator = FakeLocator::new(Reply::Ok, cleared.clone());
    locator.fail = true;
    let locator = Arc::new(locator);
    let identity = Arc::new(FakeIdentity {
        cleared,
        restored_token: AtomicI64::new(0),
    });
    let trigger = ServiceTrigger::new(locator.clone(), identity, "package", "com.example.app");

    assert!(trigger.request_secondary_compile().is_err());
    assert!(trigger.request_secondary_compile().is_err());
    assert_eq!(locator.lookups.load(Ordering::SeqCst), 2);
}
