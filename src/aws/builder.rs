//! AppStream-backed implementation of [`BuilderClient`].

use aws_sdk_appstream::types::{DomainJoinInfo, ImageBuilder, VisibilityType, VpcConfig};

use crate::client::{
    BuilderClient, BuilderRecord, BuilderState, ClientFuture, ImagePermissions, ImageRecord,
    ImageState, ProviderError,
};
use crate::config::BuilderSpec;

use super::error::provider_error;

/// [`BuilderClient`] over the AppStream API.
#[derive(Clone, Debug)]
pub struct AppStreamBuilderClient {
    client: aws_sdk_appstream::Client,
}

impl AppStreamBuilderClient {
    /// Wraps an already-configured AppStream client.
    #[must_use]
    pub fn new(client: aws_sdk_appstream::Client) -> Self {
        Self { client }
    }
}

fn builder_record(builder: &ImageBuilder) -> BuilderRecord {
    BuilderRecord {
        name: builder.name().unwrap_or_default().to_owned(),
        state: builder
            .state()
            .map(|state| BuilderState::parse(state.as_str()))
            .unwrap_or_else(|| BuilderState::Other("UNKNOWN".to_owned())),
        address: builder
            .network_access_configuration()
            .and_then(|network| network.eni_private_ip_address())
            .map(str::to_owned),
    }
}

fn image_record(image: &aws_sdk_appstream::types::Image) -> ImageRecord {
    ImageRecord {
        name: image.name().unwrap_or_default().to_owned(),
        state: image
            .state()
            .map(|state| ImageState::parse(state.as_str()))
            .unwrap_or_else(|| ImageState::Other("UNKNOWN".to_owned())),
        state_reason: image
            .state_change_reason()
            .and_then(|reason| reason.message())
            .map(str::to_owned),
    }
}

impl BuilderClient for AppStreamBuilderClient {
    fn create_builder<'a>(&'a self, spec: &'a BuilderSpec) -> ClientFuture<'a, BuilderRecord> {
        Box::pin(async move {
            let mut request = self
                .client
                .create_image_builder()
                .name(&spec.name)
                .image_name(&spec.source_image_name)
                .instance_type(&spec.instance_type)
                .enable_default_internet_access(spec.enable_default_internet_access);
            if !spec.description.trim().is_empty() {
                request = request.description(&spec.description);
            }
            if !spec.display_name.trim().is_empty() {
                request = request.display_name(&spec.display_name);
            }
            if let Some(arn) = &spec.iam_role_arn {
                request = request.iam_role_arn(arn);
            }
            if let Some(version) = &spec.agent_version {
                request = request.appstream_agent_version(version);
            }
            if let Some(join) = &spec.domain_join {
                request = request.domain_join_info(
                    DomainJoinInfo::builder()
                        .set_directory_name(join.directory_name.clone())
                        .set_organizational_unit_distinguished_name(
                            join.organizational_unit.clone(),
                        )
                        .build(),
                );
            }
            if !spec.network.subnet_ids.is_empty() || !spec.network.security_group_ids.is_empty() {
                request = request.vpc_config(
                    VpcConfig::builder()
                        .set_subnet_ids(Some(spec.network.subnet_ids.clone()))
                        .set_security_group_ids(Some(spec.network.security_group_ids.clone()))
                        .build(),
                );
            }
            for (key, value) in &spec.tags {
                request = request.tags(key.clone(), value.clone());
            }

            let response = request.send().await.map_err(provider_error)?;
            response
                .image_builder()
                .map(builder_record)
                .ok_or_else(|| {
                    ProviderError::message(format!(
                        "provider returned no image builder for {}",
                        spec.name
                    ))
                })
        })
    }

    fn describe_builder<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Option<BuilderRecord>> {
        Box::pin(async move {
            let response = self
                .client
                .describe_image_builders()
                .names(name)
                .send()
                .await;
            match response {
                Ok(output) => Ok(output.image_builders().first().map(builder_record)),
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(|service| service.is_resource_not_found_exception()) =>
                {
                    Ok(None)
                }
                Err(err) => Err(provider_error(err)),
            }
        })
    }

    fn stop_builder<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .stop_image_builder()
                .name(name)
                .send()
                .await
                .map_err(provider_error)?;
            Ok(())
        })
    }

    fn delete_builder<'a>(&'a self, name: &'a str) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .delete_image_builder()
                .name(name)
                .send()
                .await
                .map_err(provider_error)?;
            Ok(())
        })
    }

    fn describe_image<'a>(&'a self, name: &'a str) -> ClientFuture<'a, Option<ImageRecord>> {
        Box::pin(async move {
            let response = self
                .client
                .describe_images()
                .names(name)
                .r#type(VisibilityType::Private)
                .send()
                .await;
            match response {
                Ok(output) => Ok(output.images().first().map(image_record)),
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(|service| service.is_resource_not_found_exception()) =>
                {
                    Ok(None)
                }
                Err(err) => Err(provider_error(err)),
            }
        })
    }

    fn update_image_permissions<'a>(
        &'a self,
        image_name: &'a str,
        account_id: &'a str,
        permissions: ImagePermissions,
    ) -> ClientFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .update_image_permissions()
                .name(image_name)
                .shared_account_id(account_id)
                .image_permissions(
                    aws_sdk_appstream::types::ImagePermissions::builder()
                        .allow_fleet(permissions.allow_fleet)
                        .allow_image_builder(permissions.allow_image_builder)
                        .build(),
                )
                .send()
                .await
                .map_err(provider_error)?;
            Ok(())
        })
    }

    fn copy_image_to_region<'a>(
        &'a self,
        image_name: &'a str,
        destination_name: &'a str,
        destination_region: &'a str,
    ) -> ClientFuture<'a, String> {
        Box::pin(async move {
            let response = self
                .client
                .copy_image()
                .source_image_name(image_name)
                .destination_image_name(destination_name)
                .destination_region(destination_region)
                .send()
                .await
                .map_err(provider_error)?;
            Ok(response
                .destination_image_name()
                .unwrap_or(destination_name)
                .to_owned())
        })
    }
}
