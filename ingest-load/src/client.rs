//! HTTP client for a Kids-First-style REST dataservice.
//!
//! Responses are wrapped in an envelope: `results` holds one entity or a
//! page of entities, `_status` carries the message, and `_links.next`
//! points at the following page.

use crate::adapter::{Body, drop_missing, reported_id};
use crate::error::{LoadError, LoadResult};
use ingest_types::stringify_value;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    results: Value,
    #[serde(default, rename = "_status")]
    status: Option<ResponseStatus>,
    #[serde(default, rename = "_links")]
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    #[serde(default)]
    message: Value,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    next: Option<String>,
}

/// Talks to the dataservice on behalf of the reference adapters.
#[derive(Debug, Clone)]
pub struct DataServiceClient {
    client: Client,
}

impl DataServiceClient {
    pub fn new() -> LoadResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| LoadError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing `reqwest` client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Creates or updates one entity and returns its id.
    ///
    /// A body carrying an id is PATCHed to `/{endpoint}/{id}`, falling back
    /// to POST when the service answers 404. A 400 saying the entity
    /// already exists is resolved by fetching the existing entity and, if
    /// needed, patching its `external_id`.
    pub async fn submit(&self, host: &str, endpoint: &str, id_field: &str, body: &Body) -> LoadResult<String> {
        let body = drop_missing(body.clone());

        let mut response = None;
        if let Some(id) = reported_id(body.get(id_field)) {
            let patched = self
                .client
                .patch(entity_url(host, endpoint, &id))
                .json(&body)
                .send()
                .await
                .map_err(|e| LoadError::Network(format!("PATCH {endpoint}/{id} failed: {e}")))?;
            if patched.status() != StatusCode::NOT_FOUND {
                response = Some(patched);
            }
        }
        let response = match response {
            Some(r) => r,
            None => self
                .client
                .post(collection_url(host, endpoint))
                .json(&body)
                .send()
                .await
                .map_err(|e| LoadError::Network(format!("POST {endpoint} failed: {e}")))?,
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LoadError::Network(format!("failed to read {endpoint} response: {e}")))?;

        if status == StatusCode::OK || status == StatusCode::CREATED {
            let envelope: Envelope = serde_json::from_str(&text)?;
            return reported_id(envelope.results.get(id_field)).ok_or_else(|| {
                LoadError::Submission(format!("response from {endpoint} has no {id_field}: {text}"))
            });
        }

        if status == StatusCode::BAD_REQUEST && already_exists(&text) {
            debug!("{endpoint} entity already exists; looking it up");
            return self.reconcile_existing(host, endpoint, id_field, body).await;
        }

        Err(LoadError::Submission(format!(
            "Sent to {endpoint}:\n{}\nGot:\n{text}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        )))
    }

    /// Ids of every entity under `endpoint` matching `filters`, following
    /// `_links.next` across pages.
    pub async fn query_ids(
        &self,
        host: &str,
        endpoint: &str,
        id_field: &str,
        filters: &[(String, String)],
    ) -> LoadResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut request = self.client.get(collection_url(host, endpoint)).query(filters);

        loop {
            let envelope = self.fetch(request, endpoint).await?;
            if let Value::Array(items) = &envelope.results {
                ids.extend(items.iter().filter_map(|item| reported_id(item.get(id_field))));
            }

            match envelope.links.and_then(|l| l.next) {
                Some(next) => request = self.client.get(next_page_url(host, &next)?),
                None => break,
            }
        }
        Ok(ids)
    }

    async fn reconcile_existing(&self, host: &str, endpoint: &str, id_field: &str, mut body: Body) -> LoadResult<String> {
        let external_id = body.remove("external_id");
        let filters: Vec<(String, String)> = body
            .iter()
            .filter(|(_, v)| !v.is_array() && !v.is_object())
            .filter_map(|(k, v)| stringify_value(v).map(|v| (k.clone(), v)))
            .collect();

        let request = self.client.get(collection_url(host, endpoint)).query(&filters);
        let envelope = self.fetch(request, endpoint).await?;
        let existing = envelope
            .results
            .as_array()
            .and_then(|items| items.first())
            .cloned()
            .ok_or_else(|| {
                LoadError::Submission(format!("{endpoint} reported an existing entity but none matched {filters:?}"))
            })?;
        let id = reported_id(existing.get(id_field))
            .ok_or_else(|| LoadError::Submission(format!("existing {endpoint} entity has no {id_field}")))?;

        match external_id {
            Some(ext) if !ext.is_null() && existing.get("external_id") != Some(&ext) => {
                let mut patch = Body::new();
                patch.insert("external_id".to_string(), ext);
                let response = self
                    .client
                    .patch(entity_url(host, endpoint, &id))
                    .json(&patch)
                    .send()
                    .await
                    .map_err(|e| LoadError::Network(format!("PATCH {endpoint}/{id} failed: {e}")))?;
                if !response.status().is_success() {
                    let error = response.text().await.unwrap_or_default();
                    return Err(LoadError::Submission(format!(
                        "failed to update external_id of {endpoint}/{id}: {error}"
                    )));
                }
                Ok(id)
            }
            _ => Ok(id),
        }
    }

    async fn fetch(&self, request: reqwest::RequestBuilder, endpoint: &str) -> LoadResult<Envelope> {
        let response = request
            .send()
            .await
            .map_err(|e| LoadError::Network(format!("GET {endpoint} failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(LoadError::Submission(format!("GET {endpoint} returned {status}: {error}")));
        }
        response
            .json()
            .await
            .map_err(|e| LoadError::Network(format!("failed to parse {endpoint} response: {e}")))
    }
}

fn collection_url(host: &str, endpoint: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), endpoint.trim_matches('/'))
}

fn entity_url(host: &str, endpoint: &str, id: &str) -> String {
    format!("{}/{}", collection_url(host, endpoint), urlencoding::encode(id))
}

fn next_page_url(host: &str, next: &str) -> LoadResult<Url> {
    let base = Url::parse(host).map_err(|e| LoadError::Network(format!("invalid host url {host}: {e}")))?;
    base.join(next)
        .map_err(|e| LoadError::Network(format!("invalid next page link {next}: {e}")))
}

fn already_exists(text: &str) -> bool {
    match serde_json::from_str::<Envelope>(text) {
        Ok(Envelope {
            status: Some(status), ..
        }) => status
            .message
            .as_str()
            .is_some_and(|m| m.contains("already exists")),
        _ => text.contains("already exists"),
    }
}
