//! Closed-set provider factory.
//!
//! Every supported tag funnels into [`S3CompatProvider`] with
//! tag-specific defaults applied; adding a provider means adding a tag
//! and its defaults here. The wire transport is injected by the
//! embedder, keeping vendor SDKs out of the core.

use std::sync::Arc;

use tracing::debug;

use super::error::ProviderError;
use super::s3compat::S3CompatProvider;
use super::transport::ObjectTransport;
use super::types::{ProviderKind, S3Config};
use super::S3Provider;

/// Builds a wire transport for a validated configuration.
pub type TransportBuilder =
    Arc<dyn Fn(&S3Config) -> Result<Arc<dyn ObjectTransport>, ProviderError> + Send + Sync>;

/// Creates providers from configuration records.
#[derive(Clone)]
pub struct ProviderFactory {
    transport_builder: TransportBuilder,
}

impl ProviderFactory {
    pub fn new(transport_builder: TransportBuilder) -> Self {
        Self { transport_builder }
    }

    /// The closed set of supported provider tags.
    pub fn supported_providers() -> &'static [ProviderKind] {
        &[
            ProviderKind::Aws,
            ProviderKind::Minio,
            ProviderKind::Backblaze,
            ProviderKind::DigitalOcean,
            ProviderKind::Cloudflare,
            ProviderKind::Wasabi,
        ]
    }

    /// Build a provider for `config`, applying tag defaults and
    /// validating tag-specific requirements.
    pub fn create(&self, config: &S3Config) -> Result<Arc<dyn S3Provider>, ProviderError> {
        let mut config = config.clone();
        apply_provider_defaults(&mut config);
        validate_for_provider(&config)?;
        config.validate()?;

        let transport = (self.transport_builder)(&config)?;
        debug!(provider = %config.provider, bucket = %config.bucket, "provider created");
        Ok(Arc::new(S3CompatProvider::new(config, transport)))
    }
}

/// Tag-specific defaults: URL style and default regions.
fn apply_provider_defaults(config: &mut S3Config) {
    match config.provider {
        ProviderKind::Aws => {
            if config.endpoint.is_empty() {
                config.endpoint = "https://s3.amazonaws.com".to_string();
            }
            config.path_style = false;
        }
        ProviderKind::Minio => {
            config.path_style = true;
            if config.public_endpoint.is_empty() && !config.endpoint.is_empty() {
                config.public_endpoint = config.endpoint.clone();
            }
        }
        ProviderKind::Backblaze => {
            config.path_style = true;
            if config.region.is_empty() {
                config.region = "us-west-000".to_string();
            }
        }
        ProviderKind::DigitalOcean => {
            config.path_style = false;
            if config.region.is_empty() {
                config.region = "nyc3".to_string();
            }
        }
        ProviderKind::Cloudflare => {
            config.path_style = false;
            if config.region.is_empty() {
                config.region = "auto".to_string();
            }
        }
        ProviderKind::Wasabi => {
            config.path_style = false;
            if config.region.is_empty() {
                config.region = "us-east-1".to_string();
            }
        }
    }
}

fn validate_for_provider(config: &S3Config) -> Result<(), ProviderError> {
    match config.provider {
        ProviderKind::Aws | ProviderKind::DigitalOcean | ProviderKind::Wasabi => {
            if config.region.is_empty() {
                return Err(ProviderError::MissingRegion(
                    config.provider.as_str().to_string(),
                ));
            }
        }
        ProviderKind::Backblaze => {
            if !config.endpoint.contains("backblazeb2.com") {
                return Err(ProviderError::InvalidEndpoint(
                    "Backblaze B2".to_string(),
                    config.endpoint.clone(),
                ));
            }
        }
        ProviderKind::Minio | ProviderKind::Cloudflare => {
            if config.endpoint.is_empty() {
                return Err(ProviderError::MissingEndpoint);
            }
        }
    }
    Ok(())
}
