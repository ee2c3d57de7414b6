//! AWS-backed provider clients, behind the `aws` feature.
//!
//! The factories here turn declarative config into clients the core traits
//! consume: AppStream for the build host, EC2 plus STS for replication.
//! Cross-account targets either carry their own credentials profile or are
//! reached by assuming a named role in the target account.

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{Region, SdkConfig};

use crate::client::ProviderError;
use crate::config::ReplicationConfig;
use crate::replicate::{ResolvedTarget, TargetAccount};

mod builder;
mod error;
mod images;

pub use builder::AppStreamBuilderClient;
pub use images::Ec2ImageClient;

const SESSION_NAME: &str = "imageferry";

async fn base_config(profile: Option<&str>, region: Option<String>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    if let Some(region) = region {
        loader = loader.region(Region::new(region));
    }
    loader.load().await
}

/// Full ARN of `role_name` inside `account_id`.
#[must_use]
pub fn role_arn_for(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/{role_name}")
}

/// Builds the AppStream client the build-host lifecycle runs against.
pub async fn builder_client(
    profile: Option<&str>,
    region: Option<String>,
) -> AppStreamBuilderClient {
    let config = base_config(profile, region).await;
    AppStreamBuilderClient::new(aws_sdk_appstream::Client::new(&config))
}

/// Builds an image client for one account, optionally through an assumed
/// role.
///
/// # Errors
///
/// Returns an error when no region can be determined for the client; the
/// region ends up in every manifest entry, so it cannot be left blank.
pub async fn image_client(
    profile: Option<&str>,
    role_arn: Option<String>,
    region: Option<String>,
) -> Result<Ec2ImageClient, ProviderError> {
    let base = base_config(profile, region).await;
    let config = if let Some(role_arn) = role_arn {
        let provider = AssumeRoleProvider::builder(role_arn)
            .configure(&base)
            .session_name(SESSION_NAME)
            .build()
            .await;
        aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(provider)
            .region(base.region().cloned())
            .load()
            .await
    } else {
        base
    };
    let region = config
        .region()
        .map(|region| region.to_string())
        .ok_or_else(|| ProviderError::message("no region configured for image client"))?;
    Ok(Ec2ImageClient::new(
        aws_sdk_ec2::Client::new(&config),
        aws_sdk_sts::Client::new(&config),
        &region,
    ))
}

/// Turns replication config into engine targets with live clients.
///
/// Explicit targets resolve their account at plan time; flat account ids
/// reuse the ambient credentials, assuming `role_name` in each account when
/// one is configured.
///
/// # Errors
///
/// Returns the first client-construction failure.
pub async fn resolve_targets(
    config: &ReplicationConfig,
) -> Result<Vec<ResolvedTarget>, ProviderError> {
    let mut targets = Vec::new();
    for target in &config.targets {
        let client = image_client(
            target.profile.as_deref(),
            target.role_arn.clone(),
            target.region.clone(),
        )
        .await?;
        targets.push(ResolvedTarget {
            account: TargetAccount::Resolve,
            client: Arc::new(client),
            region: target.region.clone(),
        });
    }
    for account_id in &config.account_ids {
        let role_arn = config
            .role_name
            .as_ref()
            .map(|role_name| role_arn_for(account_id, role_name));
        let client = image_client(None, role_arn, None).await?;
        targets.push(ResolvedTarget {
            account: TargetAccount::Known(account_id.clone()),
            client: Arc::new(client),
            region: None,
        });
    }
    Ok(targets)
}
