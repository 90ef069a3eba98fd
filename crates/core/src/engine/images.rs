//! Image operations
//!
//! Builds stream the daemon's progress into the log and fail fast on the
//! first reported error. Identity labels are merged into every build; the
//! listing is scoped to managed images.

use super::{cancellable, managed_filters, Engine};
use crate::errors::{EngineError, Result};
use crate::naming;
use bollard::image::{
    BuildImageOptions, CreateImageOptions, ListImagesOptions, RemoveImageOptions,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default ceiling for one image build
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Inputs for a labelled image build
#[derive(Debug, Clone)]
pub struct ImageBuildRequest {
    /// Project slug the image belongs to
    pub project: String,
    /// Tag to apply, usually `clawker-<project>:latest`
    pub tag: String,
    /// User labels; identity labels are merged on top
    pub labels: HashMap<String, String>,
    /// Complete tar build context
    pub tar: Vec<u8>,
}

/// Summary of a managed image
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub id: String,
    pub tags: Vec<String>,
    pub created: i64,
    pub size: i64,
}

impl Engine {
    /// Build an image from a tar context under the global build timeout
    #[instrument(skip(self, ctx, request), fields(tag = %request.tag))]
    pub async fn build_image(
        &self,
        ctx: &CancellationToken,
        request: ImageBuildRequest,
        timeout: Duration,
    ) -> Result<()> {
        let mut labels = request.labels;
        for (key, value) in naming::image_labels(&request.project, "") {
            labels.insert(key, value);
        }

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: request.tag.clone(),
            labels,
            rm: true,
            forcerm: true,
            ..BuildImageOptions::default()
        };

        let body = bytes::Bytes::from(request.tar);
        let build = async {
            let mut stream = self.docker().build_image(options, None, Some(body));
            while let Some(item) = stream.next().await {
                let progress = item.map_err(|e| EngineError::BuildFailed {
                    message: e.to_string(),
                })?;
                if let Some(message) = progress.stream {
                    let message = message.trim_end();
                    if !message.is_empty() {
                        debug!(target: "clawker::build", "{message}");
                    }
                }
                if let Some(detail) = progress.error_detail {
                    return Err(EngineError::BuildFailed {
                        message: detail.message.unwrap_or_default(),
                    });
                }
            }
            Ok(())
        };

        match cancellable(ctx, tokio::time::timeout(timeout, build)).await? {
            Ok(result) => result?,
            Err(_) => {
                return Err(EngineError::BuildFailed {
                    message: format!("build exceeded {}s", timeout.as_secs()),
                }
                .into())
            }
        }
        info!(tag = %request.tag, "image built");
        Ok(())
    }

    /// Whether a reference resolves locally
    pub async fn image_exists(&self, ctx: &CancellationToken, reference: &str) -> Result<bool> {
        match cancellable(ctx, self.docker().inspect_image(reference)).await? {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(EngineError::from_bollard(e, "image", reference).into()),
        }
    }

    /// Pull a reference from its registry
    #[instrument(skip(self, ctx))]
    pub async fn pull_image(&self, ctx: &CancellationToken, reference: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..CreateImageOptions::default()
        };
        let pull = async {
            let mut stream = self.docker().create_image(Some(options), None, None);
            while let Some(item) = stream.next().await {
                item.map_err(|e| EngineError::ImageUnavailable {
                    reference: reference.to_string(),
                    message: e.to_string(),
                })?;
            }
            Ok::<(), EngineError>(())
        };
        cancellable(ctx, pull).await??;
        Ok(())
    }

    /// List managed images, newest last
    pub async fn list_images(&self, ctx: &CancellationToken) -> Result<Vec<ImageInfo>> {
        let options = ListImagesOptions {
            filters: managed_filters(HashMap::new()),
            ..ListImagesOptions::default()
        };
        let summaries = cancellable(ctx, self.docker().list_images(Some(options)))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "image", "<list>"))?;
        let mut infos: Vec<ImageInfo> = summaries
            .into_iter()
            .map(|image| ImageInfo {
                id: image.id,
                tags: image.repo_tags,
                created: image.created,
                size: image.size,
            })
            .collect();
        infos.sort_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then_with(|| a.tags.cmp(&b.tags))
        });
        Ok(infos)
    }

    /// Remove an image by reference
    pub async fn remove_image(
        &self,
        ctx: &CancellationToken,
        reference: &str,
        force: bool,
    ) -> Result<()> {
        cancellable(
            ctx,
            self.docker().remove_image(
                reference,
                Some(RemoveImageOptions {
                    force,
                    ..RemoveImageOptions::default()
                }),
                None,
            ),
        )
        .await?
        .map_err(|e| EngineError::from_bollard(e, "image", reference))?;
        Ok(())
    }
}
