//! End-to-end build orchestration: launch a build host, capture an image
//! from it, wait for the image, and always tear the host down.

use std::sync::Arc;
use std::time::Duration;

use shell_escape::unix::escape;
use thiserror::Error;
use tokio::time::timeout;

use crate::client::{BuilderClient, ClientFuture, ImageRecord, ProviderError};
use crate::config::BuilderSpec;
use crate::lifecycle::{ImageBuilderLifecycle, LifecycleError};
use crate::progress::Progress;

const DEFAULT_IMAGE_WAIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Runs a command on a remote build host and reports its exit status.
///
/// Transport failures (unreachable host, broken session) surface as
/// provider errors; a command that ran but failed reports its status.
pub trait RemoteRunner: Send + Sync {
    /// Runs `command` on the host at `address`.
    fn run<'a>(&'a self, address: &'a str, command: &'a str) -> ClientFuture<'a, i32>;
}

/// Errors from one orchestrated build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build host failed to launch, become ready, or produce its image.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The capture command ran but exited nonzero.
    #[error("image capture command exited with status {status}")]
    CaptureFailed {
        /// Exit status of the capture command.
        status: i32,
    },
    /// The capture command could not be delivered to the host.
    #[error("unable to run capture command: {0}")]
    Remote(#[source] ProviderError),
    /// The produced image never settled within the overall deadline.
    #[error("timed out waiting for image {name} after {seconds}s")]
    ImageWaitTimeout {
        /// Name of the image being waited on.
        name: String,
        /// Deadline that expired.
        seconds: u64,
    },
}

/// Drives one image build from host creation to image availability.
///
/// Teardown runs on every exit path. Its own failures are reported through
/// progress but never mask the error that ended the build.
pub struct BuildOrchestrator<C, R> {
    lifecycle: ImageBuilderLifecycle<C>,
    runner: R,
    progress: Arc<dyn Progress>,
    image_wait_timeout: Duration,
}

impl<C: BuilderClient, R: RemoteRunner> BuildOrchestrator<C, R> {
    /// Creates an orchestrator with production poll and timeout settings.
    pub fn new(client: C, runner: R, progress: Arc<dyn Progress>) -> Self {
        Self {
            lifecycle: ImageBuilderLifecycle::new(client, Arc::clone(&progress)),
            runner,
            progress,
            image_wait_timeout: DEFAULT_IMAGE_WAIT_TIMEOUT,
        }
    }

    /// Overrides the lifecycle poll interval. Tests shorten it.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.lifecycle = self.lifecycle.with_poll_interval(interval);
        self
    }

    /// Overrides the overall image wait deadline.
    #[must_use]
    pub fn with_image_wait_timeout(mut self, deadline: Duration) -> Self {
        self.image_wait_timeout = deadline;
        self
    }

    /// Borrows the underlying lifecycle.
    #[must_use]
    pub fn lifecycle(&self) -> &ImageBuilderLifecycle<C> {
        &self.lifecycle
    }

    /// Runs the build end to end and returns the available image.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] when any stage fails; the build host is
    /// torn down first.
    pub async fn execute(
        &mut self,
        spec: &BuilderSpec,
        image_name: &str,
    ) -> Result<ImageRecord, BuildError> {
        self.lifecycle.create(spec).await?;

        let host = match self.lifecycle.await_ready().await {
            Ok(host) => host,
            Err(err) => return Err(self.fail(err.into()).await),
        };

        let command = capture_command(image_name, spec);
        self.progress.say(&format!(
            "Capturing image {image_name} on {}",
            host.address
        ));
        match self.runner.run(&host.address, &command).await {
            Ok(0) => {}
            Ok(status) => {
                self.progress.error(&format!(
                    "capture command exited with status {status}"
                ));
                return Err(self.fail(BuildError::CaptureFailed { status }).await);
            }
            Err(err) => return Err(self.fail(BuildError::Remote(err)).await),
        }

        let waited = timeout(self.image_wait_timeout, self.lifecycle.await_image(image_name)).await;
        let record = match waited {
            Ok(Ok(record)) => record,
            Ok(Err(err)) => return Err(self.fail(err.into()).await),
            Err(_) => {
                let err = BuildError::ImageWaitTimeout {
                    name: image_name.to_owned(),
                    seconds: self.image_wait_timeout.as_secs(),
                };
                return Err(self.fail(err).await);
            }
        };

        self.lifecycle.teardown().await;
        Ok(record)
    }

    async fn fail(&self, err: BuildError) -> BuildError {
        self.lifecycle.teardown().await;
        err
    }
}

fn capture_command(image_name: &str, spec: &BuilderSpec) -> String {
    let mut command = format!(
        "image-assistant create-image --name {}",
        escape(image_name.into())
    );
    if !spec.display_name.trim().is_empty() {
        command.push_str(&format!(
            " --display-name {}",
            escape(spec.display_name.as_str().into())
        ));
    }
    if !spec.description.trim().is_empty() {
        command.push_str(&format!(
            " --description {}",
            escape(spec.description.as_str().into())
        ));
    }
    command
}
