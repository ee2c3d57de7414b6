//! Client abstractions for the cloud provider's compute-image API.
//!
//! The core never talks to a provider SDK directly. It consumes two narrow
//! traits: [`BuilderClient`] for the transient build host and its output
//! image, and [`ImageClient`] for machine-image replication (describe, copy,
//! tag, launch-permission management, identity lookup). Real implementations
//! live behind the `aws` feature; tests script the traits directly.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::config::BuilderSpec;

/// Future returned by client operations.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Error surfaced by a provider client.
///
/// Providers report structured failure codes alongside messages; the core
/// pattern-matches a small number of codes to distinguish transient
/// permission races and already-gone resources from hard failures.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("provider error: {message}")]
pub struct ProviderError {
    /// Provider failure code (for example `UnauthorizedOperation`), when the
    /// provider returned one.
    pub code: Option<String>,
    /// Human readable message.
    pub message: String,
}

impl ProviderError {
    /// Constructs an error carrying a provider failure code.
    #[must_use]
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Constructs an error without a failure code.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Returns true when the failure code equals `code`.
    #[must_use]
    pub fn is_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    /// True for permission-propagation races on freshly created resources.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.is_code("UnauthorizedOperation")
    }

    /// True when the referenced image or snapshot no longer exists.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.is_code("InvalidAMIID.NotFound") || self.is_code("InvalidSnapshot.NotFound")
    }
}

/// Lifecycle state of a build host as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuilderState {
    /// Requested but not yet running.
    Pending,
    /// Running with (eventually) a reachable address.
    Running,
    /// Stop requested, transition in progress.
    Stopping,
    /// Producing an image; cannot be stopped or deleted.
    Snapshotting,
    /// Stopped; deletable.
    Stopped,
    /// Failure terminal state; deletable.
    Failed,
    /// Any state this crate does not model.
    Other(String),
}

impl BuilderState {
    /// Parses a provider state string.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "STOPPING" => Self::Stopping,
            "SNAPSHOTTING" => Self::Snapshotting,
            "STOPPED" => Self::Stopped,
            "FAILED" => Self::Failed,
            _ => Self::Other(value.to_owned()),
        }
    }
}

impl std::fmt::Display for BuilderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Running => f.write_str("RUNNING"),
            Self::Stopping => f.write_str("STOPPING"),
            Self::Snapshotting => f.write_str("SNAPSHOTTING"),
            Self::Stopped => f.write_str("STOPPED"),
            Self::Failed => f.write_str("FAILED"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// State of a stored machine image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageState {
    /// Creation or copy still in progress.
    Pending,
    /// Usable terminal state.
    Available,
    /// Failure terminal state.
    Failed,
    /// Any state this crate does not model.
    Other(String),
}

impl ImageState {
    /// Parses a provider state string.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "available" => Self::Available,
            "failed" => Self::Failed,
            _ => Self::Other(value.to_owned()),
        }
    }
}

impl std::fmt::Display for ImageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Available => f.write_str("available"),
            Self::Failed => f.write_str("failed"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// Snapshot of a build host returned by describe calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuilderRecord {
    /// Provider-assigned (or caller-requested) unique name.
    pub name: String,
    /// Current lifecycle state.
    pub state: BuilderState,
    /// Network address, present only once the host is running.
    pub address: Option<String>,
}

/// Snapshot of an image produced by a build host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageRecord {
    /// Image name.
    pub name: String,
    /// Current image state.
    pub state: ImageState,
    /// Provider failure reason when the image transitioned to failed.
    pub state_reason: Option<String>,
}

/// Immutable reference to the source image of a replication run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceImage {
    /// Provider image identifier.
    pub id: String,
    /// Image name, when set by the producer.
    pub name: Option<String>,
    /// Image description, when set by the producer.
    pub description: Option<String>,
    /// Region the image lives in.
    pub region: String,
    /// Tags currently applied to the image.
    pub tags: BTreeMap<String, String>,
    /// Backing block-storage snapshot identifiers.
    pub snapshot_ids: Vec<String>,
}

/// Launch-permission view of an image.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchPermissions {
    /// True when the image is public.
    pub public: bool,
    /// Account identifiers the image is explicitly shared with.
    pub accounts: Vec<String>,
}

impl LaunchPermissions {
    /// Returns true when `account_id` can already see the image.
    #[must_use]
    pub fn grants(&self, account_id: &str) -> bool {
        self.public || self.accounts.iter().any(|account| account == account_id)
    }
}

/// Usage rights granted when sharing a streaming image with an account.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ImagePermissions {
    /// The account may launch fleets from the image.
    pub allow_fleet: bool,
    /// The account may launch build hosts from the image.
    pub allow_image_builder: bool,
}

impl Default for ImagePermissions {
    fn default() -> Self {
        Self {
            allow_fleet: true,
            allow_image_builder: true,
        }
    }
}

/// Identity of the credentials behind a client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallerIdentity {
    /// Numeric account identifier.
    pub account_id: String,
    /// Full principal ARN, for operator-facing reporting.
    pub arn: String,
}

/// Parameters of a single image copy call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopyRequest {
    /// Name for the copied image.
    pub name: String,
    /// Description for the copied image.
    pub description: String,
    /// Identifier of the image being copied.
    pub source_image_id: String,
    /// Region the source image lives in.
    pub source_region: String,
    /// Whether the copy should be encrypted.
    pub encrypted: bool,
    /// Optional KMS key for encryption; the provider default when unset.
    pub kms_key_id: Option<String>,
}

/// Client for the build-host side of the provider API.
pub trait BuilderClient: Send + Sync {
    /// Creates a build host from the desired spec and returns its record.
    fn create_builder<'a>(&'a self, spec: &'a BuilderSpec) -> ClientFuture<'a, BuilderRecord>;

    /// Describes a build host by name; `None` when it does not exist.
    fn describe_builder<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Option<BuilderRecord>>;

    /// Requests a stop of a running build host.
    fn stop_builder<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Deletes a stopped or failed build host.
    fn delete_builder<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()>;

    /// Describes an image produced from a build host; `None` while the
    /// provider has not listed it yet.
    fn describe_image<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Option<ImageRecord>>;

    /// Grants `account_id` the given usage rights on a finished image.
    fn update_image_permissions<'a>(
        &'a self,
        image_name: &'a str,
        account_id: &'a str,
        permissions: ImagePermissions,
    ) -> ClientFuture<'a, ()>;

    /// Copies a finished image into another region under `destination_name`
    /// and returns the name the destination region lists it under.
    fn copy_image_to_region<'a>(
        &'a self,
        image_name: &'a str,
        destination_name: &'a str,
        destination_region: &'a str,
    ) -> ClientFuture<'a, String>;
}

/// Client for the machine-image side of the provider API.
pub trait ImageClient: Send + Sync {
    /// Locates exactly one image by identifier, with its tags and snapshots.
    fn locate_source_image<'a>(&'a self, image_id: &'a str) -> ClientFuture<'a, SourceImage>;

    /// Reports the current state of an image.
    fn image_state<'a>(&'a self, image_id: &'a str) -> ClientFuture<'a, ImageState>;

    /// Copies an image into the account/region behind this client and
    /// returns the new image identifier.
    fn copy_image<'a>(&'a self, request: &'a CopyRequest) -> ClientFuture<'a, String>;

    /// Applies tags to an image.
    fn create_tags<'a>(
        &'a self,
        image_id: &'a str,
        tags: &'a BTreeMap<String, String>,
    ) -> ClientFuture<'a, ()>;

    /// Reads the launch permissions of an image.
    fn launch_permissions<'a>(&'a self, image_id: &'a str) -> ClientFuture<'a, LaunchPermissions>;

    /// Grants `account_id` launch permission on an image.
    fn share_image<'a>(&'a self, image_id: &'a str, account_id: &'a str) -> ClientFuture<'a, ()>;

    /// Grants `account_id` create-volume permission on a backing snapshot.
    fn share_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
        account_id: &'a str,
    ) -> ClientFuture<'a, ()>;

    /// Deregisters an image.
    fn deregister_image<'a>(&'a self, image_id: &'a str) -> ClientFuture<'a, ()>;

    /// Deletes a block-storage snapshot.
    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ClientFuture<'a, ()>;

    /// Resolves the identity of the credentials behind this client.
    fn caller_identity(&self) -> ClientFuture<'_, CallerIdentity>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_state_parses_known_states_case_insensitively() {
        assert_eq!(BuilderState::parse("pending"), BuilderState::Pending);
        assert_eq!(BuilderState::parse("RUNNING"), BuilderState::Running);
        assert_eq!(
            BuilderState::parse("Snapshotting"),
            BuilderState::Snapshotting
        );
        assert_eq!(
            BuilderState::parse("REBOOTING"),
            BuilderState::Other("REBOOTING".to_owned())
        );
    }

    #[test]
    fn launch_permissions_grant_by_account_or_public() {
        let perms = LaunchPermissions {
            public: false,
            accounts: vec!["222222222222".to_owned()],
        };
        assert!(perms.grants("222222222222"));
        assert!(!perms.grants("333333333333"));

        let public = LaunchPermissions {
            public: true,
            accounts: Vec::new(),
        };
        assert!(public.grants("333333333333"));
    }

    #[test]
    fn provider_error_code_matching() {
        let err = ProviderError::with_code("InvalidAMIID.NotFound", "gone");
        assert!(err.is_not_found());
        assert!(!err.is_unauthorized());
        assert!(!ProviderError::message("boom").is_not_found());
    }
}
