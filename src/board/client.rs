use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::board::api_types::{
  normalize_lists, ApiCardLabelResponse, ApiCardMemberResponse, ApiCardResponse, ApiErrorBody,
  ApiLabelsResponse, ApiListResponse, ApiListsResponse, ArchiveListRequest, AttachLabelRequest,
  AttachMemberRequest, CreateCardRequest, CreateListRequest, MoveCardRequest, RenameListRequest,
  UpdateCardRequest,
};
use crate::board::types::{Card, CardLabel, CardMember, CardPatch, Label, List};
use crate::config::Config;
use crate::error::ApiError;

/// Remote authority for board data.
///
/// The store only talks to the backend through this trait, so tests can
/// swap in an in-memory implementation.
#[async_trait]
pub trait BoardApi: Send + Sync {
  /// Lists of a board with their cards embedded, normalized and ordered.
  async fn fetch_lists(&self, board_id: &str) -> Result<Vec<List>, ApiError>;

  /// Board-level label definitions.
  async fn fetch_labels(&self, board_id: &str) -> Result<Vec<Label>, ApiError>;

  async fn create_list(&self, board_id: &str, name: &str) -> Result<List, ApiError>;

  async fn rename_list(&self, list_id: &str, name: &str) -> Result<(), ApiError>;

  async fn archive_list(&self, list_id: &str) -> Result<(), ApiError>;

  async fn delete_list(&self, list_id: &str) -> Result<(), ApiError>;

  async fn create_card(&self, board_id: &str, list_id: &str, title: &str)
    -> Result<Card, ApiError>;

  async fn update_card(&self, card_id: &str, patch: &CardPatch) -> Result<Card, ApiError>;

  /// Reassign a card to `list_id` at index `position`.
  async fn move_card(&self, card_id: &str, list_id: &str, position: usize)
    -> Result<Card, ApiError>;

  async fn delete_card(&self, card_id: &str) -> Result<(), ApiError>;

  async fn attach_label(&self, card_id: &str, label_id: &str) -> Result<CardLabel, ApiError>;

  async fn detach_label(&self, card_label_id: &str) -> Result<(), ApiError>;

  async fn attach_member(&self, card_id: &str, profile_id: &str) -> Result<CardMember, ApiError>;

  async fn detach_member(&self, card_member_id: &str) -> Result<(), ApiError>;
}

/// JSON-over-HTTP board API client
#[derive(Clone)]
pub struct HttpBoardApi {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpBoardApi {
  pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self, ApiError> {
    let base_url = Url::parse(base_url)?;
    if base_url.cannot_be_a_base() {
      return Err(ApiError::InvalidUrl(base_url.to_string()));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ApiError::Network(e.to_string()))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    Self::new(
      &config.api.base_url,
      Duration::from_secs(config.api.timeout_secs),
      Config::get_api_token(),
    )
    .map_err(|e| eyre!("Failed to create board API client: {}", e))
  }

  /// Build an endpoint URL below the base, escaping each segment.
  fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    debug!("{} {}", method, url);
    let request = self.client.request(method, url);
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  /// Send a request and return the body of a 2xx response.
  async fn execute(&self, request: RequestBuilder) -> Result<Vec<u8>, ApiError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
      // Any non-2xx is a failure; the body is only used for the message
      let message = serde_json::from_slice::<ApiErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
          status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
        });
      return Err(ApiError::Server {
        status: status.as_u16(),
        message,
      });
    }

    Ok(body.to_vec())
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
    let body = self.execute(request).await?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
  }

  /// Send a request whose success body carries nothing we need.
  async fn send_empty(&self, request: RequestBuilder) -> Result<(), ApiError> {
    self.execute(request).await.map(|_| ())
  }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
  async fn fetch_lists(&self, board_id: &str) -> Result<Vec<List>, ApiError> {
    let mut url = self.endpoint(&["lists"])?;
    url.query_pairs_mut().append_pair("board_id", board_id);

    let response: ApiListsResponse = self.send(self.request(Method::GET, url)).await?;
    Ok(normalize_lists(response.lists, Utc::now()))
  }

  async fn fetch_labels(&self, board_id: &str) -> Result<Vec<Label>, ApiError> {
    let mut url = self.endpoint(&["labels"])?;
    url.query_pairs_mut().append_pair("board_id", board_id);

    let response: ApiLabelsResponse = self.send(self.request(Method::GET, url)).await?;
    Ok(response.labels)
  }

  async fn create_list(&self, board_id: &str, name: &str) -> Result<List, ApiError> {
    let url = self.endpoint(&["lists"])?;
    let body = CreateListRequest { name, board_id };

    let response: ApiListResponse = self
      .send(self.request(Method::POST, url).json(&body))
      .await?;
    Ok(response.list.into_list(Utc::now()))
  }

  async fn rename_list(&self, list_id: &str, name: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["lists"])?;
    let body = RenameListRequest { id: list_id, name };
    self
      .send_empty(self.request(Method::PUT, url).json(&body))
      .await
  }

  async fn archive_list(&self, list_id: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["lists"])?;
    let body = ArchiveListRequest {
      id: list_id,
      is_archived: true,
    };
    self
      .send_empty(self.request(Method::PATCH, url).json(&body))
      .await
  }

  async fn delete_list(&self, list_id: &str) -> Result<(), ApiError> {
    let mut url = self.endpoint(&["lists"])?;
    url.query_pairs_mut().append_pair("id", list_id);
    self.send_empty(self.request(Method::DELETE, url)).await
  }

  async fn create_card(
    &self,
    board_id: &str,
    list_id: &str,
    title: &str,
  ) -> Result<Card, ApiError> {
    let url = self.endpoint(&["cards"])?;
    let body = CreateCardRequest {
      title,
      list_id,
      board_id,
    };

    let response: ApiCardResponse = self
      .send(self.request(Method::POST, url).json(&body))
      .await?;
    Ok(response.card.into_card(Utc::now()))
  }

  async fn update_card(&self, card_id: &str, patch: &CardPatch) -> Result<Card, ApiError> {
    let url = self.endpoint(&["cards", card_id])?;
    let body = UpdateCardRequest { patch };

    let response: ApiCardResponse = self
      .send(self.request(Method::PATCH, url).json(&body))
      .await?;
    Ok(response.card.into_card(Utc::now()))
  }

  async fn move_card(
    &self,
    card_id: &str,
    list_id: &str,
    position: usize,
  ) -> Result<Card, ApiError> {
    let url = self.endpoint(&["cards", card_id])?;
    let body = MoveCardRequest { list_id, position };

    let response: ApiCardResponse = self
      .send(self.request(Method::PATCH, url).json(&body))
      .await?;
    Ok(response.card.into_card(Utc::now()))
  }

  async fn delete_card(&self, card_id: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["cards", card_id])?;
    self.send_empty(self.request(Method::DELETE, url)).await
  }

  async fn attach_label(&self, card_id: &str, label_id: &str) -> Result<CardLabel, ApiError> {
    let url = self.endpoint(&["card_labels"])?;
    let body = AttachLabelRequest { card_id, label_id };

    let response: ApiCardLabelResponse = self
      .send(self.request(Method::POST, url).json(&body))
      .await?;
    Ok(response.card_label.into())
  }

  async fn detach_label(&self, card_label_id: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["card_labels", card_label_id])?;
    self.send_empty(self.request(Method::DELETE, url)).await
  }

  async fn attach_member(&self, card_id: &str, profile_id: &str) -> Result<CardMember, ApiError> {
    let url = self.endpoint(&["card_members"])?;
    let body = AttachMemberRequest {
      card_id,
      profile_id,
    };

    let response: ApiCardMemberResponse = self
      .send(self.request(Method::POST, url).json(&body))
      .await?;
    Ok(response.card_member.into())
  }

  async fn detach_member(&self, card_member_id: &str) -> Result<(), ApiError> {
    let url = self.endpoint(&["card_members", card_member_id])?;
    self.send_empty(self.request(Method::DELETE, url)).await
  }
}
