//! A single image copy into one target account.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use crate::client::{CopyRequest, ImageClient, ImageState, ProviderError, SourceImage};
use crate::manifest::ManifestEntry;
use crate::progress::Progress;
use crate::retry::{RetryConfig, retry};

const DEFAULT_AVAILABILITY_ATTEMPTS: u32 = 30;
const DEFAULT_AVAILABILITY_INTERVAL: Duration = Duration::from_secs(60);

/// Errors from one replication task.
#[derive(Debug, Error)]
pub enum CopyError {
    /// Underlying provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The target account's identity could not be resolved while planning.
    #[error("unable to resolve target account identity: {0}")]
    Identity(ProviderError),
    /// The source image could not be shared with the target account.
    #[error("unable to share source image with target account: {0}")]
    Share(ProviderError),
    /// The copied image reached its failure state.
    #[error("copy {image_id} in account {account_id} reached a failure state")]
    CopyFailed {
        /// Identifier of the failed copy.
        image_id: String,
        /// Target account.
        account_id: String,
    },
    /// The copied image never became available within the configured wait.
    #[error("copy {image_id} in account {account_id} did not become available in time")]
    AvailabilityTimeout {
        /// Identifier of the still-pending copy.
        image_id: String,
        /// Target account.
        account_id: String,
    },
    /// The worker driving the task panicked or was cancelled.
    #[error("copy worker failed: {0}")]
    Worker(String),
}

/// One planned copy of a source image into a target account.
///
/// The task owns everything it needs so the engine can run it on any
/// worker: a client bound to the target's credentials, the source image
/// metadata, and the copy options.
pub struct CopyTask {
    client: Arc<dyn ImageClient>,
    source: SourceImage,
    target_account: String,
    region: Option<String>,
    encrypted: bool,
    kms_key_id: Option<String>,
    tags_only: bool,
    ensure_available: bool,
    extra_tags: BTreeMap<String, String>,
    tag_retry: RetryConfig,
    availability_attempts: u32,
    availability_interval: Duration,
}

impl CopyTask {
    /// Creates an unencrypted copy task with default waits.
    #[must_use]
    pub fn new(client: Arc<dyn ImageClient>, source: SourceImage, target_account: &str) -> Self {
        Self {
            client,
            source,
            target_account: target_account.to_owned(),
            region: None,
            encrypted: false,
            kms_key_id: None,
            tags_only: false,
            ensure_available: false,
            extra_tags: BTreeMap::new(),
            tag_retry: RetryConfig::tagging(),
            availability_attempts: DEFAULT_AVAILABILITY_ATTEMPTS,
            availability_interval: DEFAULT_AVAILABILITY_INTERVAL,
        }
    }

    /// Records the destination region for manifest reporting.
    #[must_use]
    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    /// Requests an encrypted copy, optionally under a specific KMS key.
    #[must_use]
    pub fn with_encryption(mut self, encrypted: bool, kms_key_id: Option<String>) -> Self {
        self.encrypted = encrypted;
        self.kms_key_id = kms_key_id;
        self
    }

    /// Skips the copy and only refreshes tags on the source image.
    #[must_use]
    pub fn with_tags_only(mut self, tags_only: bool) -> Self {
        self.tags_only = tags_only;
        self
    }

    /// Blocks the task until the copy is available.
    #[must_use]
    pub fn with_ensure_available(mut self, ensure_available: bool) -> Self {
        self.ensure_available = ensure_available;
        self
    }

    /// Tags applied on top of the source image's tags. Entries here win on
    /// key collisions.
    #[must_use]
    pub fn with_extra_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.extra_tags = tags;
        self
    }

    /// Overrides the tag retry policy. Tests shorten it.
    #[must_use]
    pub fn with_tag_retry(mut self, config: RetryConfig) -> Self {
        self.tag_retry = config;
        self
    }

    /// Overrides the availability wait. Tests shorten it.
    #[must_use]
    pub fn with_availability(mut self, attempts: u32, interval: Duration) -> Self {
        self.availability_attempts = attempts;
        self.availability_interval = interval;
        self
    }

    /// Target account this task copies into.
    #[must_use]
    pub fn target_account(&self) -> &str {
        &self.target_account
    }

    /// Runs the copy end to end and returns its manifest entry.
    ///
    /// Tagging retries through permission-propagation races on the fresh
    /// copy, and a tag call reporting the image as not found counts as
    /// success: the copy was deleted out from under us and there is nothing
    /// left to tag.
    ///
    /// # Errors
    ///
    /// Returns a [`CopyError`] when the copy call fails, tagging exhausts its
    /// retries, or the availability wait times out or observes a failure.
    pub async fn execute(&self, progress: &dyn Progress) -> Result<ManifestEntry, CopyError> {
        let region = self
            .region
            .clone()
            .unwrap_or_else(|| self.source.region.clone());

        let image_id = if self.tags_only {
            progress.say(&format!(
                "[{region}] Only copying tags to account {} as tags_only is set",
                self.target_account
            ));
            self.source.id.clone()
        } else {
            progress.say(&format!(
                "[{region}] Copying {} to account {} (encrypted: {})",
                self.source.id, self.target_account, self.encrypted
            ));
            let request = CopyRequest {
                name: self.source.name.clone().unwrap_or_else(|| self.source.id.clone()),
                description: self.source.description.clone().unwrap_or_default(),
                source_image_id: self.source.id.clone(),
                source_region: self.source.region.clone(),
                encrypted: self.encrypted,
                kms_key_id: self.kms_key_id.clone(),
            };
            self.client.copy_image(&request).await?
        };

        let mut tags = self.source.tags.clone();
        tags.extend(self.extra_tags.clone());
        if !tags.is_empty() {
            progress.say(&format!("[{region}] Adding tags to {image_id}"));
            retry(&self.tag_retry, ProviderError::is_unauthorized, || {
                let image_id = image_id.clone();
                let tags = tags.clone();
                async move {
                    match self.client.create_tags(&image_id, &tags).await {
                        Err(err) if err.is_not_found() => Ok(()),
                        other => other,
                    }
                }
            })
            .await?;
        }

        if self.ensure_available {
            self.await_available(&image_id, &region, progress).await?;
        }

        progress.say(&format!(
            "[{region}] Finished copying {} to account {} ({image_id})",
            self.source.id, self.target_account
        ));
        Ok(ManifestEntry {
            account_id: self.target_account.clone(),
            region,
            image_id,
        })
    }

    async fn await_available(
        &self,
        image_id: &str,
        region: &str,
        progress: &dyn Progress,
    ) -> Result<(), CopyError> {
        for attempt in 1..=self.availability_attempts {
            match self.client.image_state(image_id).await? {
                ImageState::Available => return Ok(()),
                ImageState::Failed => {
                    return Err(CopyError::CopyFailed {
                        image_id: image_id.to_owned(),
                        account_id: self.target_account.clone(),
                    });
                }
                state => {
                    progress.say(&format!(
                        "[{region}] {image_id} is {state}; waiting ({attempt}/{})",
                        self.availability_attempts
                    ));
                    sleep(self.availability_interval).await;
                }
            }
        }
        Err(CopyError::AvailabilityTimeout {
            image_id: image_id.to_owned(),
            account_id: self.target_account.clone(),
        })
    }
}
