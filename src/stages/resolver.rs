use crate::config::ImagesConfig;
use crate::container::{ContainerSpec, ImageRef};
use crate::errors::Result;

/// Turn an image reference into a spec. Nothing is pulled until the spec runs.
pub fn resolve(reference: &str) -> Result<ContainerSpec> {
    Ok(ContainerSpec::from_image(ImageRef::parse(reference)?))
}

/// Resolves variants of one base image (`docker:24` -> `docker:24-cli`, `docker:24-dind`)
#[derive(Debug, Clone)]
pub struct ImageResolver {
    base: ImageRef,
}

impl ImageResolver {
    pub fn new(base: &str) -> Result<Self> {
        Ok(Self {
            base: ImageRef::parse(base)?,
        })
    }

    pub fn from_config(config: &ImagesConfig) -> Result<Self> {
        Self::new(&config.base)
    }

    pub fn base(&self) -> &ImageRef {
        &self.base
    }

    /// Resolve `base + suffix` and label the spec's pipeline
    pub fn variant(&self, suffix: &str, pipeline: &str) -> Result<ContainerSpec> {
        let image = self.base.with_tag_suffix(suffix)?;
        tracing::debug!(image = %image, pipeline, "resolved image");
        Ok(ContainerSpec::from_image(image).pipeline(pipeline))
    }
}
