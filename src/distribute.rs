//! Fan-out of a finished streaming image to other accounts and regions.
//!
//! Replication at the machine-image layer is handled by [`crate::replicate`];
//! this module covers the streaming-image layer, where sharing is a
//! permission grant on the image itself and cross-region copies go through
//! the provider's image-copy call rather than snapshot plumbing.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::client::{BuilderClient, ImagePermissions, ImageRecord, ImageState, ProviderError};
use crate::poll::{PollStep, Poller};
use crate::progress::Progress;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A destination region and a client scoped to it.
///
/// Cross-region copies are issued through the source-region client, but the
/// copy only exists in the destination region, so waiting on it and sharing
/// it need a client configured for that region.
pub struct RegionTarget {
    /// Region identifier, for reporting.
    pub region: String,
    /// Client bound to the destination region.
    pub client: Arc<dyn BuilderClient>,
}

/// Errors from distributing a finished streaming image.
#[derive(Debug, Error)]
pub enum DistributeError {
    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The image being waited on reached its failure state.
    #[error("image {name} failed: {reason}")]
    ImageFailed {
        /// Name of the failed image.
        name: String,
        /// Provider-reported reason, when it gave one.
        reason: String,
    },
}

/// Shares a finished streaming image with accounts and copies it to regions.
pub struct ImageDistributor {
    progress: Arc<dyn Progress>,
    poll_interval: Duration,
    permissions: ImagePermissions,
}

impl ImageDistributor {
    /// Creates a distributor granting fleet and builder use to every account.
    #[must_use]
    pub fn new(progress: Arc<dyn Progress>) -> Self {
        Self {
            progress,
            poll_interval: DEFAULT_POLL_INTERVAL,
            permissions: ImagePermissions::default(),
        }
    }

    /// Overrides the interval between availability checks.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the usage rights granted to each account.
    #[must_use]
    pub fn with_permissions(mut self, permissions: ImagePermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Shares `image_name` with every account, then copies it into every
    /// region and shares the copy there too.
    ///
    /// The source image is waited on first: permission grants on an image
    /// still snapshotting are rejected by the provider. Each regional copy
    /// keeps the source image's name and is likewise waited on before its
    /// grants go out.
    ///
    /// # Errors
    ///
    /// Returns [`DistributeError::ImageFailed`] when the source image or a
    /// regional copy fails, or the first provider error from a grant or
    /// copy call.
    pub async fn distribute(
        &self,
        source: &dyn BuilderClient,
        image_name: &str,
        account_ids: &[String],
        regions: &[RegionTarget],
    ) -> Result<(), DistributeError> {
        self.await_available(source, image_name).await?;
        self.share(source, image_name, account_ids).await?;

        for target in regions {
            self.progress.say(&format!(
                "Copying image {image_name} to region {}",
                target.region
            ));
            let copied = source
                .copy_image_to_region(image_name, image_name, &target.region)
                .await?;
            self.await_available(target.client.as_ref(), &copied)
                .await?;
            self.share(target.client.as_ref(), &copied, account_ids)
                .await?;
        }
        Ok(())
    }

    /// Waits until `image_name` is listed and available.
    ///
    /// A copy that was just issued may not be listed yet; absence is one
    /// more wait, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`DistributeError::ImageFailed`] when the image reaches its
    /// failure state, or a provider error when describe calls fail.
    pub async fn await_available(
        &self,
        client: &dyn BuilderClient,
        image_name: &str,
    ) -> Result<ImageRecord, DistributeError> {
        let poller = Poller::new(self.poll_interval, self.progress.as_ref());
        poller
            .run(|| async move {
                match client.describe_image(image_name).await? {
                    None => Ok(PollStep::Wait {
                        note: format!("Image {image_name} is not yet listed"),
                    }),
                    Some(record) => match record.state {
                        ImageState::Available => Ok(PollStep::Complete(record)),
                        ImageState::Failed => Err(DistributeError::ImageFailed {
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

    async fn share(
        &self,
        client: &dyn BuilderClient,
        image_name: &str,
        account_ids: &[String],
    ) -> Result<(), DistributeError> {
        for account_id in account_ids {
            self.progress
                .say(&format!("Sharing image {image_name} with account {account_id}"));
            client
                .update_image_permissions(image_name, account_id, self.permissions)
                .await?;
        }
        Ok(())
    }
}
