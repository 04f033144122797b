// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP API abstraction used by the reference loaders

use crate::config::ApiConfig;
use crate::ClientError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Endpoint paths as unencoded segments, relative to the API base URL
pub mod paths {
    pub const APPS: &[&str] = &["apps"];
    pub const VARIANT_CONFIGS_QUERY: &[&str] = &["variants", "configs", "query"];
    pub const TESTSETS_QUERY: &[&str] = &["preview", "testsets", "query"];
    pub const EVALUATORS_QUERY: &[&str] = &["preview", "simple", "evaluators", "query"];
    pub const QUERY_REVISIONS_QUERY: &[&str] = &["preview", "queries", "revisions", "query"];

    pub fn app(id: &str) -> [&str; 2] {
        ["apps", id]
    }

    /// Display form for logs and errors
    pub fn display(path: &[&str]) -> String {
        format!("/{}", path.join("/"))
    }
}

/// Trait for the API the loaders talk to. Every call is project-scoped.
///
/// Paths are passed as raw segments; implementations encode them.
#[async_trait]
pub trait ReferenceApi: Send + Sync {
    /// GET a resource; `Ok(None)` on 404
    async fn get(&self, path: &[&str], project_id: &str) -> Result<Option<Value>, ClientError>;

    /// POST a JSON query body
    async fn post(&self, path: &[&str], project_id: &str, body: Value)
        -> Result<Value, ClientError>;
}

/// reqwest-backed API client
pub struct HttpApiClient {
    base_url: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpApiClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            api_key: None,
            client: reqwest::Client::new(),
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: parse_base_url(&config.base_url)?,
            api_key: config.api_key.clone(),
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL extended by `path`, each segment percent-encoded
    fn url(&self, path: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("ApiKey {}", key)),
            None => request,
        }
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, ClientError> {
    let url = Url::parse(base_url.trim())?;
    if url.cannot_be_a_base() {
        return Err(ClientError::Config(format!(
            "base URL {} cannot carry a path",
            base_url
        )));
    }
    Ok(url)
}

#[async_trait]
impl ReferenceApi for HttpApiClient {
    async fn get(&self, path: &[&str], project_id: &str) -> Result<Option<Value>, ClientError> {
        let url = self.url(path);
        debug!(url = %url, project_id, "GET");
        let request = self
            .client
            .get(url)
            .query(&[("project_id", project_id)]);
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                path: paths::display(path),
            });
        }

        Ok(Some(response.json().await?))
    }

    async fn post(
        &self,
        path: &[&str],
        project_id: &str,
        body: Value,
    ) -> Result<Value, ClientError> {
        let url = self.url(path);
        debug!(url = %url, project_id, "POST");
        let request = self
            .client
            .post(url)
            .query(&[("project_id", project_id)])
            .json(&body);
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                path: paths::display(path),
            });
        }

        Ok(response.json().await?)
    }
}
