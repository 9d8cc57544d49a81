use std::{fs, path::PathBuf};

use bytes::Bytes;
use log::warn;
use uuid::Uuid;

/// Writes uploaded listing pictures under the public images directory.
/// Names are minted from a UUID so two uploads sharing an original file
/// name cannot clobber each other.
#[derive(Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: &str) -> std::io::Result<Self> {
        let dir = PathBuf::from(dir);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Decodes and stores the upload, returning the stored file name.
    /// A payload that does not decode as an image is rejected.
    pub fn save(&self, content_type: &str, data: &Bytes) -> Result<String, image::ImageError> {
        let name = stored_name(content_type);
        let img = image::load_from_memory(data)?;
        img.save(self.dir.join(&name))?;
        Ok(name)
    }

    /// Best-effort removal of a picture whose listing insert did not land.
    pub fn remove(&self, name: &str) {
        if let Err(e) = fs::remove_file(self.dir.join(name)) {
            warn!("failed to remove orphaned image {}: {}", name, e);
        }
    }
}

// The extension comes from the declared content type, the body from a UUID.
fn stored_name(content_type: &str) -> String {
    let ext = content_type.strip_prefix("image/").unwrap_or("png");
    format!("{}.{}", Uuid::new_v4(), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_follows_content_type() {
        assert!(stored_name("image/jpeg").ends_with(".jpeg"));
        assert!(stored_name("image/png").ends_with(".png"));
    }

    #[test]
    fn unknown_content_types_fall_back_to_png() {
        assert!(stored_name("").ends_with(".png"));
        assert!(stored_name("application/pdf").ends_with(".png"));
    }

    #[test]
    fn names_do_not_collide() {
        assert_ne!(stored_name("image/png"), stored_name("image/png"));
    }
}
