//! HTTP clients for the collaborator services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    CollaboratorError, CompletionSink, KnowledgeRetriever, Passage, RecipeCatalog, SavedRecipes,
    UserPreferences,
};
use crate::models::{AdjustmentCompleted, OriginalRecipe, SavedRecipeRef, TasteProfile};

/// JSON over HTTP against one base URL.
#[derive(Clone)]
struct ServiceClient {
    client: Client,
    base_url: String,
}

impl ServiceClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("recipe-adjust/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CollaboratorError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        what: &'static str,
        id: &str,
    ) -> Result<T, CollaboratorError> {
        let url = self.url(path);
        debug!(%url, "GET");
        let resp = self.client.get(&url).send().await.map_err(transport)?;
        read_json(resp, what, id).await
    }
}

fn transport(e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Unavailable("request timed out".to_string())
    } else {
        CollaboratorError::Unavailable(e.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(
    resp: Response,
    what: &'static str,
    id: &str,
) -> Result<T, CollaboratorError> {
    match resp.status() {
        StatusCode::NOT_FOUND => Err(CollaboratorError::NotFound {
            what,
            id: id.to_string(),
        }),
        status if status.is_success() => resp
            .json()
            .await
            .map_err(|e| CollaboratorError::Invalid(format!("{}: {}", what, e))),
        status => Err(CollaboratorError::Unavailable(format!(
            "{} lookup returned HTTP {}",
            what, status
        ))),
    }
}

/// Cookbook service client: `GET {base}/saved-recipes/{id}`.
pub struct HttpSavedRecipes {
    inner: ServiceClient,
}

impl HttpSavedRecipes {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            inner: ServiceClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl SavedRecipes for HttpSavedRecipes {
    async fn get_saved_recipe(
        &self,
        saved_recipe_id: &str,
    ) -> Result<SavedRecipeRef, CollaboratorError> {
        self.inner
            .get(
                &format!("saved-recipes/{}", saved_recipe_id),
                "saved recipe",
                saved_recipe_id,
            )
            .await
    }
}

/// Recipe catalog client: `GET {base}/recipes/{id}`.
pub struct HttpRecipeCatalog {
    inner: ServiceClient,
}

impl HttpRecipeCatalog {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            inner: ServiceClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl RecipeCatalog for HttpRecipeCatalog {
    async fn get_original_recipe(
        &self,
        recipe_id: &str,
    ) -> Result<OriginalRecipe, CollaboratorError> {
        self.inner
            .get(&format!("recipes/{}", recipe_id), "recipe", recipe_id)
            .await
    }
}

/// User service client: `GET {base}/users/{id}/taste-profile`.
pub struct HttpUserPreferences {
    inner: ServiceClient,
}

impl HttpUserPreferences {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            inner: ServiceClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl UserPreferences for HttpUserPreferences {
    async fn get_taste_profile(&self, user_id: &str) -> Result<TasteProfile, CollaboratorError> {
        self.inner
            .get(
                &format!("users/{}/taste-profile", user_id),
                "taste profile",
                user_id,
            )
            .await
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

/// Accepts either `{"passages": [...]}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { passages: Vec<Passage> },
    Bare(Vec<Passage>),
}

/// Knowledge base client: `POST {base}/search`.
pub struct HttpKnowledgeRetriever {
    inner: ServiceClient,
}

impl HttpKnowledgeRetriever {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        Ok(Self {
            inner: ServiceClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl KnowledgeRetriever for HttpKnowledgeRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, CollaboratorError> {
        let resp = self
            .inner
            .client
            .post(self.inner.url("search"))
            .json(&SearchRequest { query, top_k })
            .send()
            .await
            .map_err(transport)?;
        let passages = match read_json(resp, "knowledge search", query).await? {
            SearchResponse::Wrapped { passages } => passages,
            SearchResponse::Bare(passages) => passages,
        };
        Ok(passages)
    }
}

/// POSTs each completion event as JSON to a fixed URL.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let inner = ServiceClient::new(url, timeout)?;
        Ok(Self {
            client: inner.client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl CompletionSink for WebhookSink {
    async fn deliver(&self, event: &AdjustmentCompleted) -> Result<(), CollaboratorError> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(CollaboratorError::Unavailable(format!(
                "webhook returned HTTP {}",
                status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = ServiceClient::new("http://cookbook:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url("/saved-recipes/abc"),
            "http://cookbook:8000/saved-recipes/abc"
        );
    }

    #[test]
    fn test_search_response_shapes() {
        let wrapped: SearchResponse =
            serde_json::from_str(r#"{"passages": [{"text": "salt draws water"}]}"#).unwrap();
        let bare: SearchResponse =
            serde_json::from_str(r#"[{"text": "salt draws water", "score": 0.9}]"#).unwrap();
        for response in [wrapped, bare] {
            let passages = match response {
                SearchResponse::Wrapped { passages } | SearchResponse::Bare(passages) => passages,
            };
            assert_eq!(passages[0].text, "salt draws water");
        }
    }
}
