// Photo frame data source
//
// Lists the image files of a directory under /static so the page can
// cycle through them.

use async_trait::async_trait;
use homeboard_core::{DataSource, SourceContext, SourceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

/// `[dashboards.planer.pictures]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PictureSettings {
    /// Directory to scan; `<static_dir>/photos` when unset
    pub directory: Option<PathBuf>,
    /// URL under which the directory is served
    pub url_prefix: String,
    pub extensions: Vec<String>,
}

impl Default for PictureSettings {
    fn default() -> Self {
        Self {
            directory: None,
            url_prefix: "/static/photos".to_string(),
            extensions: ["jpg", "jpeg", "png", "gif"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Picture {
    pub url: String,
}

pub struct PictureSource {
    directory: PathBuf,
    url_prefix: String,
    extensions: Vec<String>,
}

impl PictureSource {
    pub fn new(directory: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            url_prefix: url_prefix.into(),
            extensions: PictureSettings::default().extensions,
        }
    }

    pub fn from_context(ctx: &SourceContext) -> homeboard_core::Result<Self> {
        let settings: PictureSettings = ctx.section("pictures")?;
        let directory = settings
            .directory
            .unwrap_or_else(|| ctx.static_dir.join("photos"));

        Ok(Self {
            directory,
            url_prefix: settings.url_prefix,
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        })
    }

    fn is_picture(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }

    /// Image files in the directory, sorted by file name
    pub async fn list(&self) -> Result<Vec<Picture>, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            // Follows symlinks; dangling links are skipped
            match tokio::fs::metadata(entry.path()).await {
                Ok(meta) if meta.is_file() => {}
                _ => continue,
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.is_picture(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        debug!(
            target: "pictures",
            directory = %self.directory.display(),
            count = names.len(),
            "Listed pictures"
        );

        let prefix = self.url_prefix.trim_end_matches('/');
        Ok(names
            .into_iter()
            .map(|name| Picture {
                url: format!("{}/{}", prefix, name),
            })
            .collect())
    }
}

#[async_trait]
impl DataSource for PictureSource {
    async fn get_data(&self) -> Result<Value, SourceError> {
        let pictures = self.list().await?;
        serde_json::to_value(pictures).map_err(|e| SourceError::Malformed(e.to_string()))
    }

    fn endpoint_name(&self) -> &str {
        "pictures"
    }
}
