use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::ViewerCount;
use crate::supervisor::ProcessControl;

/// Runs the gated processes only while someone is watching
pub struct EncoderGate {
    control: Arc<dyn ProcessControl>,
    ids: Vec<String>,
    active: bool,
}

impl EncoderGate {
    /// The gated processes must be registered stopped.
    pub fn new<I, S>(control: Arc<dyn ProcessControl>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            control,
            ids: ids.into_iter().map(Into::into).collect(),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// React to a new viewer count. Only zero crossings reach the supervisor.
    pub fn apply(&mut self, count: u32) {
        let want = count > 0;
        if want == self.active {
            return;
        }
        self.active = want;

        for id in &self.ids {
            let result = if want {
                tracing::info!(process = %id, viewers = count, "Starting encoder");
                self.control.start(id)
            } else {
                tracing::info!(process = %id, "No viewers, stopping encoder");
                self.control.stop(id)
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_already_in_state() => tracing::debug!("{}", e),
                Err(e) => tracing::warn!(process = %id, "Encoder gate: {}", e),
            }
        }
    }

    /// Follow `viewers` until it is dropped
    pub fn spawn(mut self, viewers: Arc<ViewerCount>) -> JoinHandle<()> {
        let mut rx = viewers.subscribe();
        self.apply(viewers.get());
        let viewers: Weak<ViewerCount> = Arc::downgrade(&viewers);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(count) => self.apply(count),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Encoder gate lagged, resyncing");
                        match viewers.upgrade() {
                            Some(viewers) => self.apply(viewers.get()),
                            None => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, Result};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    impl ProcessControl for Recorder {
        fn start(&self, id: &str) -> Result<()> {
            self.calls.lock().push(format!("start {}", id));
            Ok(())
        }

        fn stop(&self, id: &str) -> Result<()> {
            self.calls.lock().push(format!("stop {}", id));
            Err(AppError::AlreadyInState {
                id: id.to_string(),
                state: "stopped",
            })
        }
    }

    fn gate(recorder: &Arc<Recorder>) -> EncoderGate {
        EncoderGate::new(
            recorder.clone() as Arc<dyn ProcessControl>,
            ["video-encoder", "audio-encoder"],
        )
    }

    #[test]
    fn test_zero_crossings_only() {
        let recorder = Arc::new(Recorder::default());
        let mut gate = gate(&recorder);

        gate.apply(0);
        assert!(recorder.take().is_empty());

        gate.apply(1);
        assert_eq!(recorder.take(), ["start video-encoder", "start audio-encoder"]);

        for count in [2, 3, 2, 1, 2, 1] {
            gate.apply(count);
        }
        assert!(recorder.take().is_empty());
        assert!(gate.is_active());

        gate.apply(0);
        assert_eq!(recorder.take(), ["stop video-encoder", "stop audio-encoder"]);
        assert!(!gate.is_active());

        gate.apply(0);
        assert!(recorder.take().is_empty());
    }

    #[tokio::test]
    async fn test_follows_viewer_count() {
        let recorder = Arc::new(Recorder::default());
        let viewers = Arc::new(ViewerCount::new());
        let handle = gate(&recorder).spawn(viewers.clone());

        let first = viewers.join();
        let second = viewers.join();
        drop(first);
        drop(second);
        drop(viewers);

        // All senders gone: the loop drains the channel and exits
        handle.await.unwrap();
        assert_eq!(
            recorder.take(),
            [
                "start video-encoder",
                "start audio-encoder",
                "stop video-encoder",
                "stop audio-encoder"
            ]
        );
    }
}
