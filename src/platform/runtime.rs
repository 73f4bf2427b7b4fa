use std::future::Future;
use std::sync::LazyLock;

use tokio::runtime::{Builder, Handle, Runtime};

static BACKGROUND_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("dataconnect-background")
        .enable_all()
        .build()
        .expect("failed to build background tokio runtime")
});

/// Spawns an async task that runs in the background.
///
/// Uses the ambient tokio runtime when called from within one. Otherwise the task goes to a
/// lazily created single-worker runtime that drives it without a caller blocking on it.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else {
        let _ = BACKGROUND_RUNTIME.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn spawn_detached_runs_on_ambient_runtime() {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        spawn_detached(async move {
            let _ = sender.send(42);
        });
        assert_eq!(receiver.await.unwrap(), 42);
    }

    #[test]
    fn spawn_detached_without_runtime_uses_background_worker() {
        let (sender, receiver) = std::sync::mpsc::channel();
        spawn_detached(async move {
            let _ = sender.send(std::thread::current().name().map(str::to_string));
        });
        let name = receiver
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        assert_eq!(name.as_deref(), Some("dataconnect-background"));
    }
}
