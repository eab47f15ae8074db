use log::error;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

pub(crate) mod tcp;

/// An accept loop running in the background.
pub(crate) struct RunningListener {
    token: CancellationToken,
    task: JoinHandle<JoinSet<()>>,
}

impl RunningListener {
    pub(crate) fn new(token: CancellationToken, task: JoinHandle<JoinSet<()>>) -> Self {
        Self { token, task }
    }

    /// Stops accepting and closes the listening socket.
    ///
    /// Open connections are asked to finish their current exchange and are
    /// handed back so the caller can wait for them.
    pub(crate) async fn close(self) -> JoinSet<()> {
        self.token
            .cancel();
        match self
            .task
            .await
        {
            Ok(connections) => connections,
            Err(e) => {
                error!("Accept loop failed: {}", e);
                JoinSet::new()
            }
        }
    }
}
