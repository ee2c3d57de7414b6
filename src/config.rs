//! Declarative configuration for builds and replication runs.
//!
//! These types are plain data with construction-time validation; decoding
//! them from whatever configuration surface hosts the crate is the caller's
//! concern, so everything derives `serde`.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a spec or config is missing a required value.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required field is missing or blank.
    #[error("missing or empty field: {0}")]
    MissingField(String),
    /// The replication config names nothing to replicate to.
    #[error("account_ids or targets must be set")]
    NoTargets,
}

/// Directory-join parameters for a domain-joined build host.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DomainJoin {
    /// Fully qualified directory name.
    pub directory_name: Option<String>,
    /// Distinguished name of the organizational unit to place the host in.
    pub organizational_unit: Option<String>,
}

/// Network placement for a build host.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkPlacement {
    /// Subnets the host may be placed in.
    pub subnet_ids: Vec<String>,
    /// Security groups applied to the host.
    pub security_group_ids: Vec<String>,
}

/// Desired state of a build host.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BuilderSpec {
    /// Unique name for the build host. Generated per run when blank.
    #[serde(default)]
    pub name: String,
    /// Description applied to the host.
    #[serde(default)]
    pub description: String,
    /// Display name shown in the provider console.
    #[serde(default)]
    pub display_name: String,
    /// Name of the base image the host boots from.
    pub source_image_name: String,
    /// Instance class of the host.
    pub instance_type: String,
    /// IAM role attached to the host, when one is needed.
    #[serde(default)]
    pub iam_role_arn: Option<String>,
    /// Provider agent version to run; the provider default when unset.
    #[serde(default)]
    pub agent_version: Option<String>,
    /// Whether the host gets default outbound internet access.
    #[serde(default)]
    pub enable_default_internet_access: bool,
    /// Directory-join parameters.
    #[serde(default)]
    pub domain_join: Option<DomainJoin>,
    /// Subnet and security-group placement.
    #[serde(default)]
    pub network: NetworkPlacement,
    /// Software packages the provider installs on the host.
    #[serde(default)]
    pub softwares_to_install: Vec<String>,
    /// Software packages the provider removes from the host.
    #[serde(default)]
    pub softwares_to_uninstall: Vec<String>,
    /// Tags applied to the host.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl BuilderSpec {
    /// Starts a builder for a [`BuilderSpec`].
    #[must_use]
    pub fn builder() -> BuilderSpecBuilder {
        BuilderSpecBuilder::default()
    }

    /// Validates the spec.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when `source_image_name` or
    /// `instance_type` is blank. The name may be blank; a unique one is
    /// generated at create time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_image_name.trim().is_empty() {
            return Err(ConfigError::MissingField("source_image_name".to_owned()));
        }
        if self.instance_type.trim().is_empty() {
            return Err(ConfigError::MissingField("instance_type".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`BuilderSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default)]
pub struct BuilderSpecBuilder {
    name: String,
    description: String,
    display_name: String,
    source_image_name: String,
    instance_type: String,
    iam_role_arn: Option<String>,
    agent_version: Option<String>,
    enable_default_internet_access: bool,
    domain_join: Option<DomainJoin>,
    network: NetworkPlacement,
    softwares_to_install: Vec<String>,
    softwares_to_uninstall: Vec<String>,
    tags: BTreeMap<String, String>,
}

impl BuilderSpecBuilder {
    /// Sets the build-host name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = value.into();
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn display_name(mut self, value: impl Into<String>) -> Self {
        self.display_name = value.into();
        self
    }

    /// Sets the base image name.
    #[must_use]
    pub fn source_image_name(mut self, value: impl Into<String>) -> Self {
        self.source_image_name = value.into();
        self
    }

    /// Sets the instance class.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the IAM role.
    #[must_use]
    pub fn iam_role_arn(mut self, value: Option<String>) -> Self {
        self.iam_role_arn = value;
        self
    }

    /// Sets the agent version.
    #[must_use]
    pub fn agent_version(mut self, value: Option<String>) -> Self {
        self.agent_version = value;
        self
    }

    /// Enables or disables default internet access.
    #[must_use]
    pub fn enable_default_internet_access(mut self, value: bool) -> Self {
        self.enable_default_internet_access = value;
        self
    }

    /// Sets the directory-join parameters.
    #[must_use]
    pub fn domain_join(mut self, value: Option<DomainJoin>) -> Self {
        self.domain_join = value;
        self
    }

    /// Sets network placement.
    #[must_use]
    pub fn network(mut self, value: NetworkPlacement) -> Self {
        self.network = value;
        self
    }

    /// Sets the install list.
    #[must_use]
    pub fn softwares_to_install(mut self, value: Vec<String>) -> Self {
        self.softwares_to_install = value;
        self
    }

    /// Sets the uninstall list.
    #[must_use]
    pub fn softwares_to_uninstall(mut self, value: Vec<String>) -> Self {
        self.softwares_to_uninstall = value;
        self
    }

    /// Sets the tag set.
    #[must_use]
    pub fn tags(mut self, value: BTreeMap<String, String>) -> Self {
        self.tags = value;
        self
    }

    /// Builds and validates the spec, trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank.
    pub fn build(self) -> Result<BuilderSpec, ConfigError> {
        let spec = BuilderSpec {
            name: self.name.trim().to_owned(),
            description: self.description.trim().to_owned(),
            display_name: self.display_name.trim().to_owned(),
            source_image_name: self.source_image_name.trim().to_owned(),
            instance_type: self.instance_type.trim().to_owned(),
            iam_role_arn: self.iam_role_arn.map(|value| value.trim().to_owned()),
            agent_version: self.agent_version.map(|value| value.trim().to_owned()),
            enable_default_internet_access: self.enable_default_internet_access,
            domain_join: self.domain_join,
            network: self.network,
            softwares_to_install: self.softwares_to_install,
            softwares_to_uninstall: self.softwares_to_uninstall,
            tags: self.tags,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// An explicit replication target with its own credentials.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TargetConfig {
    /// Operator-facing label for the target.
    #[serde(default)]
    pub name: Option<String>,
    /// Named credentials profile to use for this target.
    #[serde(default)]
    pub profile: Option<String>,
    /// Role to assume for this target, as a full ARN.
    #[serde(default)]
    pub role_arn: Option<String>,
    /// Region override; the source image's region when unset.
    #[serde(default)]
    pub region: Option<String>,
}

/// Declarative description of a replication run.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReplicationConfig {
    /// Explicit targets carrying their own credentials.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    /// Flat account identifiers copied to with the source credentials
    /// (optionally via an assumed role).
    #[serde(default)]
    pub account_ids: Vec<String>,
    /// Role name assumed in each `account_ids` entry, when set.
    #[serde(default)]
    pub role_name: Option<String>,
    /// Maximum concurrent copies; 0 means one worker per task.
    #[serde(default)]
    pub copy_concurrency: usize,
    /// Whether to block until each copy reaches the available state.
    #[serde(default)]
    pub ensure_available: bool,
    /// Propagate tags only, without issuing new copies.
    #[serde(default)]
    pub tags_only: bool,
    /// Encrypt copied images.
    #[serde(default)]
    pub encrypted: bool,
    /// KMS key used for encryption; the provider default when unset.
    #[serde(default)]
    pub kms_key_id: Option<String>,
    /// Additional tags applied to every copied image.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Path the manifest of successful copies is written to.
    #[serde(default)]
    pub manifest_output: Option<Utf8PathBuf>,
}

impl ReplicationConfig {
    /// Validates the config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoTargets`] when neither explicit targets nor
    /// flat account identifiers are configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() && self.account_ids.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn builder_trims_and_validates() {
        let spec = BuilderSpec::builder()
            .name("  build-host ")
            .source_image_name(" base-image ")
            .instance_type("stream.standard.medium")
            .build()
            .unwrap_or_else(|err| panic!("build spec: {err}"));
        assert_eq!(spec.name, "build-host");
        assert_eq!(spec.source_image_name, "base-image");
    }

    #[rstest]
    #[case("", "stream.standard.medium", "source_image_name")]
    #[case("base", "  ", "instance_type")]
    fn builder_rejects_blank_required_fields(
        #[case] source_image: &str,
        #[case] instance_type: &str,
        #[case] field: &str,
    ) {
        let result = BuilderSpec::builder()
            .source_image_name(source_image)
            .instance_type(instance_type)
            .build();
        assert_eq!(result, Err(ConfigError::MissingField(field.to_owned())));
    }

    #[test]
    fn blank_name_is_allowed() {
        let spec = BuilderSpec::builder()
            .source_image_name("base")
            .instance_type("stream.standard.medium")
            .build()
            .unwrap_or_else(|err| panic!("build spec: {err}"));
        assert!(spec.name.is_empty());
    }

    #[test]
    fn replication_config_requires_some_target() {
        let empty = ReplicationConfig::default();
        assert_eq!(empty.validate(), Err(ConfigError::NoTargets));

        let with_accounts = ReplicationConfig {
            account_ids: vec!["222222222222".to_owned()],
            ..ReplicationConfig::default()
        };
        assert_eq!(with_accounts.validate(), Ok(()));
    }

    #[test]
    fn replication_config_round_trips_through_json() {
        let config = ReplicationConfig {
            account_ids: vec!["222222222222".to_owned()],
            copy_concurrency: 2,
            ensure_available: true,
            manifest_output: Some(Utf8PathBuf::from("/tmp/manifest.json")),
            ..ReplicationConfig::default()
        };
        let encoded = serde_json::to_string(&config)
            .unwrap_or_else(|err| panic!("encode config: {err}"));
        let decoded: ReplicationConfig = serde_json::from_str(&encoded)
            .unwrap_or_else(|err| panic!("decode config: {err}"));
        assert_eq!(decoded, config);
    }
}
