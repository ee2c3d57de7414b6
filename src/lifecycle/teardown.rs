//! Teardown convergence for the build host.

use tokio::time::sleep;

use crate::client::{BuilderClient, BuilderState};

use super::ImageBuilderLifecycle;

impl<C: BuilderClient> ImageBuilderLifecycle<C> {
    /// Converges the build host towards deletion.
    ///
    /// Runs after success and after failure alike, so it is lenient where
    /// the readiness wait is strict: transitional states are waited out,
    /// running hosts get a stop request, stopped or failed hosts get
    /// deleted, and a host the provider no longer lists counts as done.
    /// Nothing here fails the caller: stop and delete errors are reported
    /// and convergence continues, and a describe failure gives up with a
    /// report. A stuck host is an operator problem, not a build error.
    pub async fn teardown(&self) {
        let Some(name) = self.name.as_deref() else {
            return;
        };
        loop {
            let record = match self.client.describe_builder(name).await {
                Ok(record) => record,
                Err(err) => {
                    self.progress.error(&format!(
                        "unable to describe image builder {name} during teardown: {err}"
                    ));
                    return;
                }
            };
            let Some(record) = record else {
                self.progress
                    .say(&format!("Image builder {name} is already terminated"));
                return;
            };
            match record.state {
                BuilderState::Stopped | BuilderState::Failed => {
                    self.progress
                        .say(&format!("Deleting image builder {name}..."));
                    if let Err(err) = self.client.delete_builder(name).await {
                        self.progress
                            .error(&format!("unable to delete image builder {name}: {err}"));
                    }
                    return;
                }
                BuilderState::Pending | BuilderState::Stopping | BuilderState::Snapshotting => {
                    self.progress.say(&format!(
                        "Waiting for image builder {name} to settle (currently {})",
                        record.state
                    ));
                }
                BuilderState::Running => {
                    self.progress
                        .say(&format!("Stopping image builder {name}..."));
                    if let Err(err) = self.client.stop_builder(name).await {
                        self.progress
                            .error(&format!("unable to stop image builder {name}: {err}"));
                    }
                }
                BuilderState::Other(ref raw) => {
                    self.progress.error(&format!(
                        "image builder {name} in unexpected state {raw}; requesting stop"
                    ));
                    if let Err(err) = self.client.stop_builder(name).await {
                        self.progress
                            .error(&format!("unable to stop image builder {name}: {err}"));
                    }
                }
            }
            sleep(self.poll_interval).await;
        }
    }
}
