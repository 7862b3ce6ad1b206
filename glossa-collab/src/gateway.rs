//! Persistence Gateway adapter.
//!
//! The gateway is an external request/response collaborator: the initial
//! scope fetch and every durable write go through it, while the push channel
//! only fans results back out. Each request carries an opaque identity
//! header naming the acting user; the subsystem never inspects it.

use std::time::Duration;

use glossa_core::{AnnotationDraft, AnnotationId, AnnotationPatch, AnnotationRecord, Scope};
use serde::Deserialize;
use thiserror::Error;

/// Identity header attached to every request, passed through opaquely.
pub const IDENTITY_HEADER: &str = "x-acting-user";

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Non-success response to a fetch or durable write. For writes this is
    /// the signal to roll the optimistic mutation back.
    #[error("rejected by server: {status} {message}")]
    Rejected { status: u16, message: String },
    #[error("gateway transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Opaque value for the identity header.
    pub identity: String,
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            identity: "anonymous".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecordsEnvelope {
    records: Vec<AnnotationRecord>,
}

/// HTTP adapter for the annotation CRUD API.
pub struct PersistenceGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl PersistenceGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn scope_query(scope: &Scope) -> Vec<(&'static str, String)> {
        match scope {
            Scope::Project => vec![("scope", "project-wide".to_string())],
            Scope::Collection { collection_id } => vec![
                ("scope", "collection-scoped".to_string()),
                ("collectionId", collection_id.clone()),
            ],
            Scope::Document { document_id } => vec![
                ("scope", "document-scoped".to_string()),
                ("documentId", document_id.clone()),
            ],
        }
    }

    /// `GET /annotations?scope=...` — the working set for a scope.
    pub async fn fetch(&self, scope: &Scope) -> Result<Vec<AnnotationRecord>, GatewayError> {
        let response = self
            .http
            .get(self.url("/annotations"))
            .header(IDENTITY_HEADER, &self.config.identity)
            .query(&Self::scope_query(scope))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let envelope: RecordsEnvelope = response.json().await?;
        log::debug!("fetched {} records for scope {scope}", envelope.records.len());
        Ok(envelope.records)
    }

    /// `POST /annotations` — durable create; the server assigns the id.
    pub async fn create(&self, draft: &AnnotationDraft) -> Result<AnnotationRecord, GatewayError> {
        let response = self
            .http
            .post(self.url("/annotations"))
            .header(IDENTITY_HEADER, &self.config.identity)
            .json(draft)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// `PATCH /annotations/{id}` — partial durable update.
    pub async fn update(
        &self,
        id: &AnnotationId,
        patch: &AnnotationPatch,
    ) -> Result<AnnotationRecord, GatewayError> {
        let response = self
            .http
            .patch(self.url(&format!("/annotations/{id}")))
            .header(IDENTITY_HEADER, &self.config.identity)
            .json(patch)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// `DELETE /annotations/{id}` — durable delete, 204 on success.
    pub async fn delete(&self, id: &AnnotationId) -> Result<(), GatewayError> {
        let response = self
            .http
            .delete(self.url(&format!("/annotations/{id}")))
            .header(IDENTITY_HEADER, &self.config.identity)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}
