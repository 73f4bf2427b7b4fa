use std::sync::Mutex;

use tokio::sync::{oneshot, watch};

/// Counts calls into a fake and can hold them until the test releases them.
pub struct CallGate {
    state: Mutex<GateState>,
    started: watch::Sender<usize>,
}

struct GateState {
    paused: bool,
    waiters: Vec<oneshot::Sender<()>>,
}

impl CallGate {
    pub fn new() -> Self {
        let (started, _) = watch::channel(0);
        Self {
            state: Mutex::new(GateState {
                paused: false,
                waiters: Vec::new(),
            }),
            started,
        }
    }

    /// Subsequent calls block in [`CallGate::enter`] until [`CallGate::resume`].
    pub fn pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    pub fn resume(&self) {
        let waiters = {
            let mut state = self.state.lock().unwrap();
            state.paused = false;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Records a call and waits while the gate is paused.
    pub async fn enter(&self) {
        let gate = {
            let mut state = self.state.lock().unwrap();
            if state.paused {
                let (sender, receiver) = oneshot::channel();
                state.waiters.push(sender);
                Some(receiver)
            } else {
                None
            }
        };
        self.started.send_modify(|count| *count += 1);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }

    /// Resolves once at least `count` calls have entered the gate.
    pub async fn wait_for_calls(&self, count: usize) {
        let mut receiver = self.started.subscribe();
        receiver
            .wait_for(|started| *started >= count)
            .await
            .expect("call gate dropped");
    }

    pub fn started(&self) -> usize {
        *self.started.borrow()
    }
}

impl Default for CallGate {
    fn default() -> Self {
        Self::new()
    }
}
