//! Request handling between the chat transport and the publish pipeline.
//!
//! The transport hands over who asked and what they sent; the relay checks
//! the access policy, materializes the upload, publishes it, and returns
//! the reply text to relay back. Every failure becomes a reply. Nothing
//! here returns an error to the caller, so one bad request cannot affect
//! the next.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{AccessConfig, Config};
use crate::materialize::{MaterializeError, Materializer};
use crate::models::Namespace;
use crate::publish::{DeleteError, PublishResult, Publisher};
use crate::store::ContentStore;

pub const ACCESS_DENIED: &str = "❌ Access denied.";

/// Owner allow-list gate, checked before any pipeline work.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    owner_only: bool,
    owner_id: Option<i64>,
}

impl AccessPolicy {
    pub fn open() -> Self {
        Self {
            owner_only: false,
            owner_id: None,
        }
    }

    pub fn owner_only(owner_id: i64) -> Self {
        Self {
            owner_only: true,
            owner_id: Some(owner_id),
        }
    }

    pub fn from_config(access: &AccessConfig) -> Self {
        Self {
            owner_only: access.owner_only,
            owner_id: access.owner_id,
        }
    }

    pub fn is_allowed(&self, requester: i64) -> bool {
        !self.owner_only || self.owner_id == Some(requester)
    }
}

/// A document received from the chat transport.
#[derive(Debug, Clone)]
pub struct InboundUpload {
    pub requester: i64,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub struct Relay {
    access: AccessPolicy,
    materializer: Materializer,
    publisher: Publisher,
}

impl Relay {
    pub fn new(config: &Config, store: Arc<dyn ContentStore>) -> Self {
        Self {
            access: AccessPolicy::from_config(&config.access),
            materializer: Materializer::new(config.archive.clone()),
            publisher: Publisher::new(store, config),
        }
    }

    pub fn with_materializer(mut self, materializer: Materializer) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn access(&self) -> &AccessPolicy {
        &self.access
    }

    pub async fn handle_upload(&self, upload: InboundUpload) -> String {
        self.handle_upload_with_cancel(upload, CancellationToken::new())
            .await
    }

    pub async fn handle_upload_with_cancel(
        &self,
        upload: InboundUpload,
        cancel: CancellationToken,
    ) -> String {
        if !self.access.is_allowed(upload.requester) {
            tracing::info!(requester = upload.requester, "upload refused by access policy");
            return ACCESS_DENIED.to_string();
        }

        let InboundUpload {
            requester,
            file_name,
            bytes,
        } = upload;
        let is_archive = file_name.to_ascii_lowercase().ends_with(".zip");

        let materializer = self.materializer.clone();
        let name = file_name.clone();
        let materialized =
            tokio::task::spawn_blocking(move || materializer.materialize(&bytes, &name)).await;

        let bundle = match materialized {
            Ok(Ok(bundle)) => bundle,
            Ok(Err(e)) => {
                tracing::info!(requester, file_name = %file_name, "upload rejected: {}", e);
                return materialize_reply(&e);
            }
            Err(e) => {
                tracing::error!(requester, "materializer task failed: {}", e);
                return "❌ Could not process the upload. Please try again.".to_string();
            }
        };

        let namespace = Namespace::for_user(requester);
        let result = self
            .publisher
            .publish_with_cancel(&namespace, bundle, cancel)
            .await;
        self.publish_reply(&namespace, &result, is_archive)
    }

    /// Remove the requester's site (its entry point only).
    pub async fn handle_delete(&self, requester: i64) -> String {
        if !self.access.is_allowed(requester) {
            return ACCESS_DENIED.to_string();
        }

        let namespace = Namespace::for_user(requester);
        match self.publisher.remove_site(&namespace).await {
            Ok(()) => "✅ Website deleted.".to_string(),
            Err(DeleteError::NotFound(_)) => "❌ No website found.".to_string(),
            Err(e) => {
                tracing::warn!(%namespace, "delete failed: {}", e);
                format!("❌ Could not delete website: {}", e)
            }
        }
    }

    pub async fn handle_stats(&self, requester: i64) -> String {
        if !self.access.is_allowed(requester) {
            return ACCESS_DENIED.to_string();
        }

        match self.publisher.list_sites().await {
            Ok(sites) => format!(
                "📊 Bot Stats\n\n👥 Users: {}\n🌐 Websites: {}",
                sites.len(),
                sites.len()
            ),
            Err(e) => {
                tracing::warn!("stats failed: {}", e);
                format!("❌ Could not load stats: {}", e)
            }
        }
    }

    fn publish_reply(&self, namespace: &Namespace, result: &PublishResult, is_archive: bool) -> String {
        match result {
            PublishResult::AllSucceeded { site_url, .. } if is_archive => {
                format!("✅ ZIP website live:\n{}", site_url)
            }
            PublishResult::AllSucceeded { site_url, .. } => {
                format!("✅ Website live:\n{}", site_url)
            }
            PublishResult::PartiallySucceeded { entries } if result.succeeded() == 0 => {
                let mut reply = format!(
                    "❌ Website not published: none of {} files were uploaded.\n\nFailed:",
                    entries.len()
                );
                push_failures(&mut reply, result);
                reply
            }
            PublishResult::PartiallySucceeded { entries } => {
                let mut reply = format!(
                    "⚠️ Website partially published ({} of {} files):\n{}\n\nFailed:",
                    result.succeeded(),
                    entries.len(),
                    self.publisher.site_url(namespace)
                );
                push_failures(&mut reply, result);
                reply
            }
        }
    }
}

fn push_failures(reply: &mut String, result: &PublishResult) {
    for failure in result.failures() {
        reply.push_str("\n- ");
        reply.push_str(&failure.to_string());
    }
}

fn materialize_reply(err: &MaterializeError) -> String {
    match err {
        MaterializeError::UnsupportedFormat(_) => {
            "❌ Only .html files or .zip archives are supported.".to_string()
        }
        MaterializeError::MissingEntryPoint => "❌ index.html missing in ZIP.".to_string(),
        MaterializeError::CorruptArchive(_) => "❌ Could not read the ZIP archive.".to_string(),
        MaterializeError::PathTraversalRejected(entry) => {
            format!("❌ ZIP rejected: '{}' points outside the site folder.", entry)
        }
        other => format!("❌ {}", other),
    }
}
