//! Readiness and image waits for the build host.

use crate::client::{BuilderClient, BuilderState, ImageRecord, ImageState};
use crate::poll::{PollStep, Poller};

use super::{ImageBuilderLifecycle, LifecycleError};

/// A ready build host with its reachable network address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildHost {
    /// Provider name of the host.
    pub name: String,
    /// Private address capture commands run against.
    pub address: String,
}

impl<C: BuilderClient> ImageBuilderLifecycle<C> {
    /// Waits until the created host is running and returns its address.
    ///
    /// Pending is the only state worth waiting through. Anything else is
    /// fatal immediately: a vanished host, a failure state, or a state this
    /// crate does not model all mean the host will never become ready.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotCreated`] when no host was created,
    /// [`LifecycleError::BuilderVanished`] when describe stops listing it,
    /// [`LifecycleError::UnexpectedState`] on any non-pending, non-running
    /// state, and [`LifecycleError::MissingAddress`] when the running host
    /// has no address.
    pub async fn await_ready(&self) -> Result<BuildHost, LifecycleError> {
        let name = self.created_name()?.to_owned();
        let poller = Poller::new(self.poll_interval, self.progress.as_ref());
        let record = poller
            .run(|| {
                let name = name.clone();
                async move {
                    match self.client.describe_builder(&name).await? {
                        None => Err(LifecycleError::BuilderVanished { name }),
                        Some(record) => match record.state {
                            BuilderState::Running => Ok(PollStep::Complete(record)),
                            BuilderState::Pending => Ok(PollStep::Wait {
                                note: format!(
                                    "Waiting for image builder ({name}) to become ready"
                                ),
                            }),
                            state => Err(LifecycleError::UnexpectedState { name, state }),
                        },
                    }
                }
            })
            .await?;
        let address = record
            .address
            .ok_or_else(|| LifecycleError::MissingAddress { name: name.clone() })?;
        self.progress
            .say(&format!("Image builder has address: {address}"));
        Ok(BuildHost { name, address })
    }

    /// Waits until the image produced by the host becomes available.
    ///
    /// The image may not be listed at all right after the capture command
    /// returns; absence is treated as one more wait, not an error. A failed
    /// image surfaces the provider's state reason when it gave one.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ImageFailed`] when the image reaches its
    /// failure state, or a provider error when describe calls fail.
    pub async fn await_image(&self, image_name: &str) -> Result<ImageRecord, LifecycleError> {
        let poller = Poller::new(self.poll_interval, self.progress.as_ref());
        poller
            .run(|| async move {
                match self.client.describe_image(image_name).await? {
                    None => Ok(PollStep::Wait {
                        note: format!("Image {image_name} is not yet listed"),
                    }),
                    Some(record) => match record.state {
                        ImageState::Available => Ok(PollStep::Complete(record)),
                        ImageState::Failed => Err(LifecycleError::ImageFailed {
                            name: image_name.to_owned(),
                            reason: record
                                .state_reason
                                .unwrap_or_else(|| "unknown reason".to_owned()),
                        }),
                        state => Ok(PollStep::Wait {
                            note: format!("Waiting for image {image_name} (currently {state})"),
                        }),
                    },
                }
            })
            .await
    }
}
