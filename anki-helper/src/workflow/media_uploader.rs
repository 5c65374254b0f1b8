//! Media upload
//!
//! Copies local files (fonts, scripts, style sheets referenced by card
//! templates) into the collection's media folder, replacing existing files
//! with the same name.

use crate::config::UploadMedia;
use crate::error::{PipelineError, PipelineResult, StageContext};
use crate::types::NoteStore;
use std::sync::Arc;
use tracing::info;

pub struct MediaUploader {
    store: Arc<dyn NoteStore>,
}

impl MediaUploader {
    pub fn new(store: Arc<dyn NoteStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, media: &[UploadMedia]) -> PipelineResult<()> {
        for (i, entry) in media.iter().enumerate() {
            self.upload(entry).await.in_stage("upload media", i)?;
        }
        Ok(())
    }

    async fn upload(&self, entry: &UploadMedia) -> PipelineResult<()> {
        let data = tokio::fs::read(&entry.path).await.map_err(|e| {
            PipelineError::Config(format!(
                "failed to read media file {}: {}",
                entry.path.display(),
                e
            ))
        })?;

        info!(
            "Uploading file {} to Anki as {:?} ({} bytes)",
            entry.path.display(),
            entry.anki_name,
            data.len()
        );
        self.store
            .store_media_file(&entry.anki_name, &data, true)
            .await?;
        Ok(())
    }
}
