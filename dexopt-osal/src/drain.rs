//! 子进程输出排空
//!
//! 编译器的输出如果没人读，管道写满后子进程会阻塞，`wait` 永远等不到退出。
//! 所有排空任务都提交到同一个后台线程上串行执行。

use std::io::{self, Read};
use std::sync::OnceLock;
use std::sync::mpsc::{self, Sender};
use std::thread;

use parking_lot::Mutex;

type DrainJob = Box<dyn Read + Send>;

const DRAIN_BUFFER_SIZE: usize = 256;

/// 单线程排空通道
pub struct StreamDrain {
    tx: Mutex<Option<Sender<DrainJob>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl StreamDrain {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<DrainJob>();
        let worker = thread::Builder::new()
            .name("stream-drain".into())
            .spawn(move || {
                while let Ok(stream) = rx.recv() {
                    drain(stream);
                }
            })
            .ok();
        if worker.is_none() {
            tracing::error!("failed to spawn stream drain worker");
        }
        Self {
            tx: Mutex::new(Some(tx)),
            worker,
        }
    }

    /// 进程内共享的排空通道
    pub fn global() -> &'static StreamDrain {
        static INSTANCE: OnceLock<StreamDrain> = OnceLock::new();
        INSTANCE.get_or_init(StreamDrain::new)
    }

    /// 提交一个流；`None` 什么也不做
    pub fn consume<R>(&self, stream: Option<R>)
    where
        R: Read + Send + 'static,
    {
        let Some(stream) = stream else {
            return;
        };
        let job: DrainJob = Box::new(stream);
        let rejected = match self.tx.lock().as_ref() {
            Some(tx) => tx.send(job).err().map(|e| e.0),
            None => Some(job),
        };
        // 后台线程不可用时就地排空，子进程不能因此卡住
        if let Some(job) = rejected {
            tracing::warn!("stream drain worker unavailable, draining inline");
            drain(job);
        }
    }
}

impl Default for StreamDrain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamDrain {
    fn drop(&mut self) {
        // 关闭通道后 worker 处理完剩余任务即退出
        self.tx.lock().take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn drain(mut stream: DrainJob) {
    let mut buffer = [0u8; DRAIN_BUFFER_SIZE];
    loop {
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::debug!("stream drain stopped: {e}");
                break;
            }
        }
    }
    drop(stream);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Tracked {
        remaining: usize,
        read: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl Read for Tracked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.remaining.min(buf.len());
            self.remaining -= n;
            self.read.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Failing(Arc<AtomicBool>);

    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    impl Drop for Failing {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drains_to_end_and_closes() {
        let read = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let drain = StreamDrain::new();
        drain.consume(Some(Tracked {
            remaining: 10_000,
            read: read.clone(),
            closed: closed.clone(),
        }));
        // Drop 会等待已提交的任务完成
        drop(drain);
        assert_eq!(read.load(Ordering::SeqCst), 10_000);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_read_error_still_closes() {
        let closed = Arc::new(AtomicBool::new(false));
        let drain = StreamDrain::new();
        drain.consume(Some(Failing(closed.clone())));
        drop(drain);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_none_is_noop() {
        let drain = StreamDrain::new();
        drain.consume::<io::Empty>(None);
    }

    #[test]
    fn test_jobs_share_one_lane() {
        let read = Arc::new(AtomicUsize::new(0));
        let drain = StreamDrain::new();
        for _ in 0..4 {
            drain.consume(Some(Tracked {
                remaining: 1000,
                read: read.clone(),
                closed: Arc::new(AtomicBool::new(false)),
            }));
        }
        drop(drain);
        assert_eq!(read.load(Ordering::SeqCst), 4000);
    }
}
