//! Log monitoring
//!
//! Fallback transport: attaches to a container's stdout/stderr stream via
//! `docker logs -f` and forwards each line to a callback. The bidirectional
//! controller channel is the primary path; this exists for containers that
//! have lost it.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to a running log follower. Dropping it cancels the follow.
pub struct LogMonitor {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl LogMonitor {
    /// Follow the child's stdout and stderr, forwarding each line
    pub fn spawn(
        mut child: Child,
        on_line: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let Some(stdout) = child.stdout.take() else {
                return;
            };
            let Some(stderr) = child.stderr.take() else {
                return;
            };

            let mut out_lines = BufReader::new(stdout).lines();
            let mut err_lines = BufReader::new(stderr).lines();
            let mut out_done = false;
            let mut err_done = false;

            loop {
                tokio::select! {
                    line = out_lines.next_line(), if !out_done => match line {
                        Ok(Some(line)) => on_line(line),
                        _ => out_done = true,
                    },
                    line = err_lines.next_line(), if !err_done => match line {
                        Ok(Some(line)) => on_line(line),
                        _ => err_done = true,
                    },
                    _ = &mut stop_rx => {
                        let _ = child.kill().await;
                        break;
                    }
                }

                if out_done && err_done {
                    break;
                }
            }

            let _ = child.wait().await;
            debug!("Log monitor finished");
        });

        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Stop following and wait for the reader to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}
