//! Removal of a machine image and its backing snapshots.

use crate::client::{ImageClient, ProviderError};
use crate::progress::Progress;

/// Deregisters `image_id` and deletes every snapshot backing it.
///
/// The snapshot list is captured before deregistration because the provider
/// stops listing the image's block device mappings once it is gone.
///
/// # Errors
///
/// Returns the first provider failure; snapshots already deleted stay
/// deleted.
pub async fn delete_image(
    client: &dyn ImageClient,
    image_id: &str,
    progress: &dyn Progress,
) -> Result<(), ProviderError> {
    let image = client.locate_source_image(image_id).await?;
    progress.say(&format!("Deregistering image {image_id}"));
    client.deregister_image(&image.id).await?;
    for snapshot_id in &image.snapshot_ids {
        progress.say(&format!("Deleting snapshot {snapshot_id}"));
        client.delete_snapshot(snapshot_id).await?;
    }
    Ok(())
}
