//! EC2/STS-backed implementation of [`ImageClient`].

use std::collections::BTreeMap;

use aws_sdk_ec2::types::{
    Image, ImageAttributeName, LaunchPermission, LaunchPermissionModifications, OperationType,
    PermissionGroup, SnapshotAttributeName, Tag,
};

use crate::client::{
    CallerIdentity, ClientFuture, CopyRequest, ImageClient, ImageState, LaunchPermissions,
    ProviderError, SourceImage,
};

use super::error::provider_error;

/// [`ImageClient`] bound to one account and region.
#[derive(Clone, Debug)]
pub struct Ec2ImageClient {
    ec2: aws_sdk_ec2::Client,
    sts: aws_sdk_sts::Client,
    region: String,
}

impl Ec2ImageClient {
    /// Wraps already-configured EC2 and STS clients for `region`.
    #[must_use]
    pub fn new(ec2: aws_sdk_ec2::Client, sts: aws_sdk_sts::Client, region: &str) -> Self {
        Self {
            ec2,
            sts,
            region: region.to_owned(),
        }
    }

    fn source_image(&self, image: &Image) -> SourceImage {
        // Keys in the provider's reserved namespace cannot be re-applied.
        let tags: BTreeMap<String, String> = image
            .tags()
            .iter()
            .filter_map(|tag| match (tag.key(), tag.value()) {
                (Some(key), Some(value)) if !key.starts_with("aws:") => {
                    Some((key.to_owned(), value.to_owned()))
                }
                _ => None,
            })
            .collect();
        let snapshot_ids = image
            .block_device_mappings()
            .iter()
            .filter_map(|mapping| mapping.ebs().and_then(|ebs| ebs.snapshot_id()))
            .map(str::to_owned)
            .collect();
        SourceImage {
            id: image.image_id().unwrap_or_default().to_owned(),
            name: image.name().map(str::to_owned),
            description: image.description().map(str::to_owned),
            region: self.region.clone(),
            tags,
            snapshot_ids,
        }
    }
}

impl ImageClient for Ec2ImageClient {
    fn locate_source_image<'a>(&'a self, image_id: &'a str) -> ClientFuture<'a, SourceImage> {
        Box::pin(async move {
            let response = self
                .ec2
                .describe_images()
                .image_ids(image_id)
                .send()
                .await
                .map_err(provider_error)?;
            match response.images() {
                [image] => Ok(self.source_image(image)),
                other => Err(ProviderError::message(format!(
                    "single source image not located for {image_id} (found: {} images)",
                    other.len()
                ))),
            }
        })
    }

    fn image_state<'a>(&'a self, image_id: &'a str) -> ClientFuture<'a, ImageState> {
        Box::pin(async move {
            let response = self
                .ec2
                .describe_images()
                .image_ids(image_id)
                .send()
                .await
                .map_err(provider_error)?;
            response
                .images()
                .first()
                .and_then(|image| image.state())
                .map(|state| ImageState::parse(state.as_str()))
                .ok_or_else(|| {
                    ProviderError::with_code(
                        "InvalidAMIID.NotFound",
                        format!("image {image_id} is not listed in {}", self.region),
                    )
                })
        })
    }

    fn copy_image<'a>(&'a self, request: &'a CopyRequest) -> ClientFuture<'a, String> {
        Box::pin(async move {
            let response = self
                .ec2
                .copy_image()
                .name(&request.name)
                .description(&request.description)
                .source_image_id(&request.source_image_id)
                .source_region(&request.source_region)
                .encrypted(request.encrypted)
                .set_kms_key_id(request.kms_key_id.clone())
                .send()
                .await
                .map_err(provider_error)?;
            response
                .image_id()
                .map(str::to_owned)
                .ok_or_else(|| {
                    ProviderError::message(format!(
                        "copy of {} returned no image id",
                        request.source_image_id
                    ))
                })
        })
    }

    fn create_tags<'a>(
        &'a self,
        image_id: &'a str,
        tags: &'a BTreeMap<String, String>,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            let mut request = self.ec2.create_tags().resources(image_id);
            for (key, value) in tags {
                request = request.tags(Tag::builder().key(key).value(value).build());
            }
            request.send().await.map_err(provider_error)?;
            Ok(())
        })
    }

    fn launch_permissions<'a>(&'a self, image_id: &'a str) -> ClientFuture<'a, LaunchPermissions> {
        Box::pin(async move {
            let response = self
                .ec2
                .describe_image_attribute()
                .image_id(image_id)
                .attribute(ImageAttributeName::LaunchPermission)
                .send()
                .await
                .map_err(provider_error)?;
            let grants = response.launch_permissions();
            Ok(LaunchPermissions {
                public: grants
                    .iter()
                    .any(|grant| grant.group() == Some(&PermissionGroup::All)),
                accounts: grants
                    .iter()
                    .filter_map(|grant| grant.user_id())
                    .map(str::to_owned)
                    .collect(),
            })
        })
    }

    fn share_image<'a>(&'a self, image_id: &'a str, account_id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.ec2
                .modify_image_attribute()
                .image_id(image_id)
                .launch_permission(
                    LaunchPermissionModifications::builder()
                        .add(LaunchPermission::builder().user_id(account_id).build())
                        .build(),
                )
                .send()
                .await
                .map_err(provider_error)?;
            Ok(())
        })
    }

    fn share_snapshot<'a>(
        &'a self,
        snapshot_id: &'a str,
        account_id: &'a str,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.ec2
                .modify_snapshot_attribute()
                .snapshot_id(snapshot_id)
                .attribute(SnapshotAttributeName::CreateVolumePermission)
                .operation_type(OperationType::Add)
                .user_ids(account_id)
                .send()
                .await
                .map_err(provider_error)?;
            Ok(())
        })
    }

    fn deregister_image<'a>(&'a self, image_id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.ec2
                .deregister_image()
                .image_id(image_id)
                .send()
                .await
                .map_err(provider_error)?;
            Ok(())
        })
    }

    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.ec2
                .delete_snapshot()
                .snapshot_id(snapshot_id)
                .send()
                .await
                .map_err(provider_error)?;
            Ok(())
        })
    }

    fn caller_identity(&self) -> ClientFuture<'_, CallerIdentity> {
        Box::pin(async move {
            let response = self
                .sts
                .get_caller_identity()
                .send()
                .await
                .map_err(provider_error)?;
            match (response.account(), response.arn()) {
                (Some(account_id), Some(arn)) => Ok(CallerIdentity {
                    account_id: account_id.to_owned(),
                    arn: arn.to_owned(),
                }),
                _ => Err(ProviderError::message(
                    "identity lookup returned no account",
                )),
            }
        })
    }
}
