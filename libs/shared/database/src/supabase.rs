use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Thin PostgREST client. Row filters are passed pre-encoded in `path`.
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    service_role_key: Option<String>,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
            service_role_key: config.supabase_service_role_key.clone(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Backend-owned tables fall back to the service role key
        if let Some(token) = auth_token.or(self.service_role_key.as_deref()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T>
    where T: DeserializeOwned {
        self.request_with_headers(method, path, auth_token, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        auth_token: Option<&str>,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers(auth_token)?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                409 => anyhow!("Constraint violation: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        // PostgREST answers 204 with an empty body when no representation is requested
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::from_value(Value::Array(vec![]))?);
        }

        let data = serde_json::from_slice::<T>(&bytes)?;
        Ok(data)
    }

    /// Fetch every row matching `path`'s filters.
    pub async fn select_rows<T>(&self, path: &str) -> Result<Vec<T>>
    where T: DeserializeOwned {
        let rows: Vec<Value> = self.request(Method::GET, path, None, None).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(Into::into))
            .collect()
    }

    /// Insert one row and return the stored representation.
    pub async fn insert_row<T>(&self, table: &str, row: Value) -> Result<T>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/{}", table);
        let mut rows: Vec<T> = self.request_with_headers(
            Method::POST,
            &path,
            None,
            Some(row),
            Some(Self::representation_headers()),
        ).await?;

        rows.pop().ok_or_else(|| anyhow!("Insert into {} returned no rows", table))
    }

    /// Patch the rows matching `filters` and return what was updated. An empty
    /// result means no row matched, which callers use as a failed
    /// compare-and-swap.
    pub async fn update_rows<T>(&self, table: &str, filters: &str, patch: Value) -> Result<Vec<T>>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/{}?{}", table, filters);
        self.request_with_headers(
            Method::PATCH,
            &path,
            None,
            Some(patch),
            Some(Self::representation_headers()),
        ).await
    }

    pub async fn delete_rows(&self, table: &str, filters: &str) -> Result<usize> {
        let path = format!("/rest/v1/{}?{}", table, filters);
        let rows: Vec<Value> = self.request_with_headers(
            Method::DELETE,
            &path,
            None,
            None,
            Some(Self::representation_headers()),
        ).await?;
        Ok(rows.len())
    }

    fn representation_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        headers
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

/// Encode a value for use inside a PostgREST filter (`col=eq.<value>`).
pub fn filter_value(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

/// Microsecond RFC 3339 in UTC, the precision Postgres stores for timestamptz.
pub fn timestamp_filter(ts: &chrono::DateTime<chrono::Utc>) -> String {
    filter_value(&ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
}
