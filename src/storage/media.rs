use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::MediaConfig;
use crate::core::error::{AppError, AppResult};

/// URL prefix the media root is served under.
pub const MEDIA_ROUTE: &str = "/media";

/// Uploaded images on local disk, addressed by paths relative to the media root.
pub struct MediaStore {
    root: PathBuf,
    base_url: String,
}

impl MediaStore {
    pub fn new(config: &MediaConfig, base_url: &str) -> Self {
        Self {
            root: PathBuf::from(&config.root),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the image and returns its relative path.
    pub async fn save(&self, board_id: Uuid, bytes: &[u8], extension: &str) -> AppResult<String> {
        let relative = format!("{}/{}.{}", board_id, Uuid::new_v4(), extension);
        let target = self.root.join(&relative);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, bytes).await?;

        info!("Stored {} byte image at {}", bytes.len(), relative);
        Ok(relative)
    }

    /// Removes a stored image. Missing files are not an error.
    pub async fn delete(&self, relative: &str) -> AppResult<()> {
        let target = self.resolve(relative)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Image already gone: {}", relative);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn public_url(&self, relative: &str) -> String {
        format!("{}{}/{}", self.base_url, MEDIA_ROUTE, relative)
    }

    fn resolve(&self, relative: &str) -> AppResult<PathBuf> {
        let path = Path::new(relative);
        if path
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(AppError::InvalidRequest(format!("Invalid media path: {}", relative)));
        }
        Ok(self.root.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MediaStore {
        let config = MediaConfig {
            root: std::env::temp_dir()
                .join(format!("art-wall-media-{}", Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
            max_upload_bytes: 1024,
        };
        MediaStore::new(&config, "http://wall.test/")
    }

    #[tokio::test]
    async fn saved_images_can_be_deleted_twice() {
        let media = store();
        let board_id = Uuid::new_v4();

        let relative = media.save(board_id, b"\x89PNG", "png").await.unwrap();
        assert!(relative.starts_with(&board_id.to_string()));
        assert!(media.root().join(&relative).exists());

        media.delete(&relative).await.unwrap();
        media.delete(&relative).await.unwrap();
        assert!(!media.root().join(&relative).exists());
    }

    #[test]
    fn public_url_is_rooted_at_the_media_route() {
        assert_eq!(store().public_url("b/p.jpg"), "http://wall.test/media/b/p.jpg");
    }

    #[tokio::test]
    async fn paths_escaping_the_root_are_rejected() {
        let err = store().delete("../etc/passwd").await.unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
    }
}
