use crate::client_config::ClientConfig;
use crate::errors::AppError;
use crate::lead_fetcher::dedup_by_id;
use crate::models::{CanonicalId, Contact, ContactId, Lead, PeriodWindow};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Kommo accepts at most this many ids per `filter[id]` contacts query.
pub const CONTACTS_BATCH_LIMIT: usize = 250;

/// Page size requested from `/leads`.
const PAGE_LIMIT: usize = 250;

/// Safety net against an upstream that keeps advertising a `next` link.
const MAX_PAGES: u32 = 500;

/// Query filters for `GET /leads`.
#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub pipeline_id: Option<CanonicalId>,
    pub status_id: Option<CanonicalId>,
    pub created: Option<PeriodWindow>,
    pub closed: Option<PeriodWindow>,
    pub updated: Option<PeriodWindow>,
}

impl LeadFilter {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(ref pipeline) = self.pipeline_id {
            params.push(("filter[pipeline_id][0]".to_string(), pipeline.to_string()));
        }
        if let Some(ref status) = self.status_id {
            params.push(("filter[status][0]".to_string(), status.to_string()));
        }
        for (key, window) in [
            ("created_at", self.created),
            ("closed_at", self.closed),
            ("updated_at", self.updated),
        ] {
            if let Some(w) = window {
                params.push((format!("filter[{}][from]", key), w.start.to_string()));
                params.push((format!("filter[{}][to]", key), w.last_second().to_string()));
            }
        }
        params
    }
}

/// HTTP session to one client's Kommo account.
///
/// Lead listing is best-effort: transport failures end pagination and return
/// whatever was collected so far instead of an error.
#[derive(Clone)]
pub struct KommoClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl KommoClient {
    /// Creates a new `KommoClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://acme.kommo.com/api/v4`.
    /// * `token` - Long-lived integration token.
    pub fn new(base_url: String, token: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Kommo client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Builds a session scoped to one client's credentials.
    pub fn for_client(config: &ClientConfig) -> Result<Self, AppError> {
        Self::new(config.kommo.api_base_url(), config.kommo.api_token.clone())
    }

    async fn get(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<reqwest::Response, AppError> {
        let url = format!("{}{}", self.base_url, endpoint);
        self.client
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Kommo request failed: {}", e)))
    }

    /// Walks every page of `endpoint`, collecting the items `extract` finds in each body.
    ///
    /// Stops at the first failed, empty, undecodable or last page.
    async fn collect_pages<F>(&self, endpoint: &str, params: &[(String, String)], extract: F) -> Vec<Value>
    where
        F: Fn(&Value) -> Vec<Value>,
    {
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let mut page_params = params.to_vec();
            page_params.push(("page".to_string(), page.to_string()));
            page_params.push(("limit".to_string(), PAGE_LIMIT.to_string()));

            let response = match self.get(endpoint, &page_params).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Kommo {} page {} failed, keeping {} items: {}", endpoint, page, items.len(), e);
                    break;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::NO_CONTENT {
                break;
            }
            if !status.is_success() {
                tracing::warn!(
                    "Kommo {} page {} returned {}, keeping {} items",
                    endpoint,
                    page,
                    status,
                    items.len()
                );
                break;
            }

            let body: Value = match response.json().await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("Failed to parse Kommo {} page {}: {}", endpoint, page, e);
                    break;
                }
            };

            let page_items = extract(&body);
            if page_items.is_empty() {
                break;
            }
            items.extend(page_items);

            let has_next = body
                .get("_links")
                .and_then(|links| links.get("next"))
                .is_some();
            if !has_next {
                break;
            }
            if page >= MAX_PAGES {
                tracing::warn!("Kommo {} exceeded {} pages, stopping", endpoint, MAX_PAGES);
                break;
            }
            page += 1;
        }

        items
    }

    /// Lists every lead matching `filter`, deduplicated by id.
    pub async fn list_leads(&self, filter: &LeadFilter) -> Vec<Lead> {
        let mut params = filter.to_query();
        params.push(("with".to_string(), "contacts".to_string()));

        let raw = self
            .collect_pages("/leads", &params, |body| embedded_array(body, "leads"))
            .await;
        let leads = dedup_by_id(raw.into_iter().filter_map(Lead::from_value).collect());
        tracing::debug!("Kommo /leads {:?} -> {} leads", params, leads.len());
        leads
    }

    /// Lists leads waiting in the "Incoming leads" inbox, created inside `window`.
    pub async fn list_unsorted(
        &self,
        pipeline_id: Option<&CanonicalId>,
        window: Option<PeriodWindow>,
    ) -> Vec<Lead> {
        let mut params = Vec::new();
        if let Some(pipeline) = pipeline_id {
            params.push(("filter[pipeline_id]".to_string(), pipeline.to_string()));
        }
        if let Some(w) = window {
            params.push(("filter[created_at][from]".to_string(), w.start.to_string()));
            params.push(("filter[created_at][to]".to_string(), w.last_second().to_string()));
        }

        let raw = self
            .collect_pages("/leads/unsorted", &params, |body| {
                embedded_array(body, "unsorted")
                    .iter()
                    .flat_map(|item| embedded_array(item, "leads"))
                    .collect()
            })
            .await;
        dedup_by_id(raw.into_iter().filter_map(Lead::from_value).collect())
    }

    /// Fetches up to [`CONTACTS_BATCH_LIMIT`] contacts in one request.
    ///
    /// Extra ids beyond the limit are ignored; use [`KommoClient::get_contacts`] to chunk.
    pub async fn list_contacts_batch(&self, ids: &[ContactId]) -> Vec<Contact> {
        if ids.is_empty() {
            return Vec::new();
        }

        let params: Vec<(String, String)> = ids
            .iter()
            .take(CONTACTS_BATCH_LIMIT)
            .enumerate()
            .map(|(i, id)| (format!("filter[id][{}]", i), id.to_string()))
            .chain(std::iter::once(("limit".to_string(), CONTACTS_BATCH_LIMIT.to_string())))
            .collect();

        let response = match self.get("/contacts", &params).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Kommo contacts batch failed: {}", e);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            if response.status() != reqwest::StatusCode::NO_CONTENT {
                tracing::warn!("Kommo contacts batch returned {}", response.status());
            }
            return Vec::new();
        }

        match response.json::<Value>().await {
            Ok(body) => embedded_array(&body, "contacts")
                .into_iter()
                .filter_map(|c| serde_json::from_value::<Contact>(c).ok())
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to parse Kommo contacts batch: {}", e);
                Vec::new()
            }
        }
    }

    /// Resolves contacts for any number of ids, chunking at the batch ceiling.
    pub async fn get_contacts(&self, ids: &[ContactId]) -> HashMap<ContactId, Contact> {
        let mut seen = HashSet::new();
        let unique: Vec<ContactId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let mut contacts = HashMap::with_capacity(unique.len());
        for chunk in unique.chunks(CONTACTS_BATCH_LIMIT) {
            for contact in self.list_contacts_batch(chunk).await {
                contacts.insert(contact.id, contact);
            }
        }
        tracing::debug!("Resolved {}/{} Kommo contacts", contacts.len(), unique.len());
        contacts
    }

    /// Verifies that the token and subdomain are valid.
    ///
    /// # Returns
    ///
    /// * `Result<String, AppError>` - The account name on success.
    pub async fn health_check(&self) -> Result<String, AppError> {
        let response = self.get("/account", &[]).await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Kommo account check returned {}: {}",
                status, error_text
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Kommo account response: {}", e))
        })?;

        let name = data
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or("unnamed")
            .to_string();
        tracing::info!("✓ Connected to Kommo account: {}", name);
        Ok(name)
    }
}

/// `body._embedded.<key>` as a list, or empty when any level is missing.
fn embedded_array(body: &Value, key: &str) -> Vec<Value> {
    body.get("_embedded")
        .and_then(|e| e.get(key))
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}
