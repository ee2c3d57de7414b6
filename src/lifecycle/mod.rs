//! Build-host lifecycle: create, wait for readiness, watch the produced
//! image, and tear down.
//!
//! A build host is a transient streaming instance that exists only to
//! produce a machine image. [`ImageBuilderLifecycle`] owns one host from
//! creation through deletion; teardown converges the host to deletion from
//! whatever state it is in, so it can run after any failure.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::client::{BuilderClient, BuilderRecord, BuilderState, ProviderError};
use crate::config::{BuilderSpec, ConfigError};
use crate::progress::Progress;

mod teardown;
mod wait;


pub use wait::BuildHost;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Errors raised while driving a build host.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// An operation that needs a live host ran before `create`.
    #[error("no image builder has been created yet")]
    NotCreated,
    /// Underlying provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The requested host spec failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The host disappeared while being watched.
    #[error("image builder {name} no longer exists")]
    BuilderVanished {
        /// Name of the vanished host.
        name: String,
    },
    /// The host entered a state it cannot become ready from.
    #[error("image builder {name} entered unexpected state {state}")]
    UnexpectedState {
        /// Name of the host.
        name: String,
        /// The state that ended the wait.
        state: BuilderState,
    },
    /// The host is running but the provider reported no network address.
    #[error("image builder {name} is running but has no network address")]
    MissingAddress {
        /// Name of the host.
        name: String,
    },
    /// The produced image reached its failure state.
    #[error("image {name} failed: {reason}")]
    ImageFailed {
        /// Name of the failed image.
        name: String,
        /// Provider failure reason, or `unknown reason` when absent.
        reason: String,
    },
}

/// Drives a single build host from creation to teardown.
pub struct ImageBuilderLifecycle<C> {
    client: C,
    progress: Arc<dyn Progress>,
    poll_interval: Duration,
    name: Option<String>,
}

impl<C: BuilderClient> ImageBuilderLifecycle<C> {
    /// Creates a lifecycle with the production poll interval.
    pub fn new(client: C, progress: Arc<dyn Progress>) -> Self {
        Self {
            client,
            progress,
            poll_interval: DEFAULT_POLL_INTERVAL,
            name: None,
        }
    }

    /// Overrides the poll interval. Tests shorten it to keep runs fast.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Name of the host this lifecycle created, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Borrows the underlying client.
    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Requests creation of the build host.
    ///
    /// A blank spec name gets a generated unique name so repeated runs never
    /// collide on the provider side.
    ///
    /// # Errors
    ///
    /// Returns an error when the spec fails validation or the provider
    /// rejects the create call.
    pub async fn create(&mut self, spec: &BuilderSpec) -> Result<BuilderRecord, LifecycleError> {
        spec.validate()?;
        let mut spec = spec.clone();
        if spec.name.trim().is_empty() {
            spec.name = format!("imageferry-{}", Uuid::new_v4().simple());
        }
        self.progress
            .say(&format!("Launching image builder {}...", spec.name));
        let record = self.client.create_builder(&spec).await?;
        self.name = Some(record.name.clone());
        Ok(record)
    }

    fn created_name(&self) -> Result<&str, LifecycleError> {
        self.name.as_deref().ok_or(LifecycleError::NotCreated)
    }
}
