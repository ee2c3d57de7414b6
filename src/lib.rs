//! Core library for the imageferry machine-image pipeline.
//!
//! The crate is built around two subsystems: a build-host lifecycle state
//! machine (create → wait for readiness → capture → teardown) and a concurrent
//! replication engine that fans a finished image out to target accounts
//! and regions under a concurrency cap, with a manifest of what succeeded.
//! Streaming-image fan-out, where sharing is a permission grant and region
//! copies go through the provider's image-copy call, lives in [`distribute`].

pub mod cleanup;
pub mod client;
pub mod config;
pub mod distribute;
pub mod lifecycle;
pub mod manifest;
pub mod poll;
pub mod progress;
pub mod replicate;
pub mod retry;
pub mod run;
pub mod test_support;

#[cfg(feature = "aws")]
pub mod aws;

pub use cleanup::delete_image;
pub use client::{
    BuilderClient, BuilderRecord, BuilderState, CallerIdentity, ClientFuture, CopyRequest,
    ImageClient, ImagePermissions, ImageRecord, ImageState, LaunchPermissions, ProviderError,
    SourceImage,
};
pub use config::{
    BuilderSpec, BuilderSpecBuilder, ConfigError, DomainJoin, NetworkPlacement, ReplicationConfig,
    TargetConfig,
};
pub use distribute::{DistributeError, ImageDistributor, RegionTarget};
pub use lifecycle::{BuildHost, ImageBuilderLifecycle, LifecycleError};
pub use manifest::{ManifestEntry, ManifestError, read_manifest, write_manifest};
pub use poll::{PollStep, Poller};
pub use progress::{NullProgress, Progress, TracingProgress};
pub use replicate::{
    CopyError, CopyTask, ReplicationEngine, ReplicationError, ReplicationPlan, ResolvedTarget,
    TargetAccount, TaskFailure,
};
pub use retry::{RetryConfig, retry};
pub use run::{BuildError, BuildOrchestrator, RemoteRunner};
