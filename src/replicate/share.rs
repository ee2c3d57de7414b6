//! Cross-account sharing of the source image.

use crate::client::{ImageClient, ProviderError, SourceImage};

/// Grants `account_id` launch permission on `image` and create-volume
/// permission on every backing snapshot.
///
/// Idempotent: when the image is public or already lists the account, no
/// permissions are modified. Snapshot grants are attempted for every
/// snapshot even when one fails, so a partial grant reports everything
/// still missing in one error.
pub(crate) async fn ensure_shared_with(
    client: &dyn ImageClient,
    image: &SourceImage,
    account_id: &str,
) -> Result<(), ProviderError> {
    let permissions = client.launch_permissions(&image.id).await?;
    if permissions.grants(account_id) {
        return Ok(());
    }

    client.share_image(&image.id, account_id).await?;

    let mut failures = Vec::new();
    for snapshot_id in &image.snapshot_ids {
        if let Err(err) = client.share_snapshot(snapshot_id, account_id).await {
            failures.push(format!("{snapshot_id}: {err}"));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ProviderError::message(format!(
            "unable to share snapshots of {} with {account_id}: {}",
            image.id,
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use crate::client::LaunchPermissions;
    use crate::test_support::{FakeImageClient, source_image};

    use super::*;

    #[tokio::test]
    async fn shares_image_and_snapshots_when_not_yet_granted() {
        let client = FakeImageClient::new("111111111111");
        let mut image = source_image("ami-1");
        image.snapshot_ids = vec!["snap-1".to_owned(), "snap-2".to_owned()];

        ensure_shared_with(&client, &image, "222222222222")
            .await
            .unwrap_or_else(|err| panic!("sharing should succeed: {err}"));

        assert_eq!(
            client.image_shares(),
            vec![("ami-1".to_owned(), "222222222222".to_owned())]
        );
        assert_eq!(client.snapshot_shares().len(), 2);
    }

    #[tokio::test]
    async fn a_failed_snapshot_grant_still_attempts_the_rest() {
        let client = FakeImageClient::new("111111111111");
        client.push_snapshot_share_result(Err(ProviderError::message("access denied")));
        let mut image = source_image("ami-1");
        image.snapshot_ids = vec!["snap-1".to_owned(), "snap-2".to_owned()];

        let err = ensure_shared_with(&client, &image, "222222222222")
            .await
            .expect_err("a failed snapshot grant fails the share");

        // Both snapshots were tried; only the first is reported missing.
        assert_eq!(client.snapshot_shares().len(), 2);
        let message = err.to_string();
        assert!(message.contains("unable to share snapshots of ami-1 with 222222222222"));
        assert!(message.contains("snap-1:"));
        assert!(message.contains("access denied"));
        assert!(!message.contains("snap-2:"));
    }

    #[tokio::test]
    async fn skips_granting_when_the_account_already_has_access() {
        let client = FakeImageClient::new("111111111111");
        client.set_permissions(LaunchPermissions {
            public: false,
            accounts: vec!["222222222222".to_owned()],
        });
        let mut image = source_image("ami-1");
        image.snapshot_ids = vec!["snap-1".to_owned()];

        ensure_shared_with(&client, &image, "222222222222")
            .await
            .unwrap_or_else(|err| panic!("sharing should succeed: {err}"));

        assert!(client.image_shares().is_empty());
        assert!(client.snapshot_shares().is_empty());
    }

    #[tokio::test]
    async fn skips_granting_on_a_public_image() {
        let client = FakeImageClient::new("111111111111");
        client.set_permissions(LaunchPermissions {
            public: true,
            accounts: Vec::new(),
        });

        ensure_shared_with(&client, &source_image("ami-1"), "222222222222")
            .await
            .unwrap_or_else(|err| panic!("sharing should succeed: {err}"));

        assert!(client.image_shares().is_empty());
    }
}
