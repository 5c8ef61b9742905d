//! 异步产物等待
//!
//! 系统在后台生成的 odex/vdex 不受我们控制，只能轮询文件系统。
//! 两种策略：固定间隔有限次重试（超时为硬失败），以及有限的指数退避（超时只记录日志）。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dexopt_error::{DexOptError, DexOptResult};
use dexopt_osal::Sleeper;
use dexopt_service::BackgroundCompile;

/// 重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    /// 固定间隔，最多等待 `max_attempts` 次
    FixedDelay { max_attempts: u32, delay: Duration },
    /// 依次使用给定的间隔
    Backoff { delays: Vec<Duration> },
}

impl RetryPolicy {
    /// 依次产出每次等待的间隔
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration> + '_> {
        match self {
            RetryPolicy::FixedDelay {
                max_attempts,
                delay,
            } => Box::new(std::iter::repeat_n(*delay, *max_attempts as usize)),
            RetryPolicy::Backoff { delays } => Box::new(delays.iter().copied()),
        }
    }
}

/// 轮询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 产物出现前等待的次数
    Found { waits: u32 },
    /// 用尽所有等待仍未出现
    Exhausted { waits: u32 },
}

/// 产物等待器
pub struct ArtifactWaiter {
    sleeper: Arc<dyn Sleeper>,
    on_demand: RetryPolicy,
    companion: RetryPolicy,
}

impl ArtifactWaiter {
    pub fn new(sleeper: Arc<dyn Sleeper>, on_demand: RetryPolicy, companion: RetryPolicy) -> Self {
        Self {
            sleeper,
            on_demand,
            companion,
        }
    }

    /// 检查、等待、再检查，直到产物出现或策略用尽
    pub fn poll(&self, policy: &RetryPolicy, artifact: &Path) -> PollOutcome {
        let mut waits = 0u32;
        for delay in policy.delays() {
            if artifact.exists() {
                return PollOutcome::Found { waits };
            }
            self.sleeper.sleep(delay);
            waits += 1;
            tracing::warn!(
                artifact = %artifact.display(),
                waits,
                "[!] artifact does not exist after waiting, wait again."
            );
        }
        if artifact.exists() {
            PollOutcome::Found { waits }
        } else {
            PollOutcome::Exhausted { waits }
        }
    }

    /// 请求后台编译并等待 odex 出现
    ///
    /// odex 已存在时直接返回。触发失败只记录日志，系统仍可能自行生成产物；
    /// 等待用尽返回 [`DexOptError::Artifact`]。
    pub fn trigger_and_wait(&self, trigger: &dyn BackgroundCompile, oat_path: &Path) -> DexOptResult<()> {
        if oat_path.exists() {
            tracing::info!(oat = %oat_path.display(), "[+] Odex file exists, skip bg-dexopt triggering.");
            return Ok(());
        }

        if let Err(e) = trigger.request_secondary_compile() {
            tracing::warn!(oat = %oat_path.display(), "[-] Fail to trigger secondary dexopt: {e}");
        }

        match self.poll(&self.on_demand, oat_path) {
            PollOutcome::Found { waits } => {
                tracing::info!(oat = %oat_path.display(), waits, "[+] Bg-dexopt was triggered successfully.");
                Ok(())
            }
            PollOutcome::Exhausted { waits } => Err(DexOptError::artifact_timeout(oat_path, waits)),
        }
    }

    /// 等待伴随产物（vdex），超时只记录日志并返回 `false`
    pub fn wait_for_companion(&self, companion: &Path) -> bool {
        match self.poll(&self.companion, companion) {
            PollOutcome::Found { .. } => {
                tracing::info!(vdex = %companion.display(), "[+] Vdex was found.");
                true
            }
            PollOutcome::Exhausted { waits } => {
                tracing::error!(
                    vdex = %companion.display(),
                    waits,
                    "[-] Vdex does not exist after waiting."
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 记录每次休眠，并可在第 n 次休眠时创建产物
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
        create_on: Option<(usize, PathBuf)>,
    }

    impl RecordingSleeper {
        fn new(create_on: Option<(usize, PathBuf)>) -> Arc<Self> {
            Arc::new(Self {
                sleeps: Mutex::new(Vec::new()),
                create_on,
            })
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            let mut sleeps = self.sleeps.lock();
            sleeps.push(duration);
            if let Some((n, path)) = &self.create_on
                && sleeps.len() == *n
            {
                std::fs::write(path, b"oat").unwrap();
            }
        }
    }

    struct CountingTrigger {
        calls: AtomicUsize,
        fail: bool,
    }

    impl BackgroundCompile for CountingTrigger {
        fn request_secondary_compile(&self) -> DexOptResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DexOptError::service(dexopt_error::ServiceError::DeadObject(
                    "package".into(),
                )))
            } else {
                Ok(())
            }
        }
    }

    fn fixed() -> RetryPolicy {
        RetryPolicy::FixedDelay {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }

    fn backoff() -> RetryPolicy {
        RetryPolicy::Backoff {
            delays: [1, 2, 4, 8, 16, 32].map(Duration::from_secs).to_vec(),
        }
    }

    fn trigger(fail: bool) -> CountingTrigger {
        CountingTrigger {
            calls: AtomicUsize::new(0),
            fail,
        }
    }

    #[test]
    fn test_existing_artifact_skips_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let oat = dir.path().join("classes.odex");
        std::fs::write(&oat, b"oat").unwrap();
        let sleeper = RecordingSleeper::new(None);
        let waiter = ArtifactWaiter::new(sleeper.clone(), fixed(), backoff());
        let trigger = trigger(false);

        waiter.trigger_and_wait(&trigger, &oat).unwrap();
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 0);
        assert!(sleeper.sleeps.lock().is_empty());
    }

    #[test]
    fn test_artifact_created_during_second_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let oat = dir.path().join("classes.odex");
        let sleeper = RecordingSleeper::new(Some((2, oat.clone())));
        let waiter = ArtifactWaiter::new(sleeper.clone(), fixed(), backoff());
        let trigger = trigger(false);

        waiter.trigger_and_wait(&trigger, &oat).unwrap();
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*sleeper.sleeps.lock(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn test_fixed_delay_exhaustion_is_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let oat = dir.path().join("classes.odex");
        let sleeper = RecordingSleeper::new(None);
        let waiter = ArtifactWaiter::new(sleeper.clone(), fixed(), backoff());

        let err = waiter.trigger_and_wait(&trigger(false), &oat).unwrap_err();
        assert_eq!(err.category(), "artifact");
        assert_eq!(sleeper.sleeps.lock().len(), 3);
    }

    #[test]
    fn test_trigger_failure_still_polls() {
        let dir = tempfile::tempdir().unwrap();
        let oat = dir.path().join("classes.odex");
        let sleeper = RecordingSleeper::new(Some((1, oat.clone())));
        let waiter = ArtifactWaiter::new(sleeper.clone(), fixed(), backoff());
        let trigger = trigger(true);

        waiter.trigger_and_wait(&trigger, &oat).unwrap();
        assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.sleeps.lock().len(), 1);
    }

    #[test]
    fn test_backoff_exhaustion_is_soft() {
        let dir = tempfile::tempdir().unwrap();
        let vdex = dir.path().join("classes.vdex");
        let sleeper = RecordingSleeper::new(None);
        let waiter = ArtifactWaiter::new(sleeper.clone(), fixed(), backoff());

        assert!(!waiter.wait_for_companion(&vdex));
        assert_eq!(*sleeper.sleeps.lock(), backoff().delays().collect::<Vec<_>>());
    }

    #[test]
    fn test_backoff_stops_when_found() {
        let dir = tempfile::tempdir().unwrap();
        let vdex = dir.path().join("classes.vdex");
        let sleeper = RecordingSleeper::new(Some((3, vdex.clone())));
        let waiter = ArtifactWaiter::new(sleeper.clone(), fixed(), backoff());

        assert!(waiter.wait_for_companion(&vdex));
        assert_eq!(
            *sleeper.sleeps.lock(),
            [1, 2, 4].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn test_poll_outcome_counts_waits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never");
        let waiter = ArtifactWaiter::new(RecordingSleeper::new(None), fixed(), backoff());
        assert_eq!(waiter.poll(&fixed(), &path), PollOutcome::Exhausted { waits: 3 });
    }
}
