//! Google Calendar v3 REST calls.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use calmerge_core::gateway::{EventGateway, RawEvent};
use calmerge_core::sync_range::SyncRange;
use calmerge_core::{Account, CalmergeError, CalmergeResult, Event, Provider};

use crate::config::GoogleConfig;
use crate::from_google::FromGoogle;
use crate::to_google::ToGoogle;

const PAGE_SIZE: &str = "250";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

pub struct GoogleGateway {
    config: GoogleConfig,
    http: reqwest::Client,
}

impl GoogleGateway {
    pub fn new(config: GoogleConfig) -> Self {
        GoogleGateway {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn events_url(&self, calendar_id: &str, event_id: Option<&str>) -> CalmergeResult<Url> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| CalmergeError::Config(format!("google.api_base: {e}")))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| CalmergeError::Config("google.api_base cannot be a base URL".into()))?;
            segments
                .pop_if_empty()
                .extend(["calendars", calendar_id, "events"]);
            if let Some(id) = event_id {
                segments.push(id);
            }
        }

        Ok(url)
    }

    fn calendar_of<'a>(&'a self, event: &'a Event) -> &'a str {
        event
            .calendar_id
            .as_deref()
            .unwrap_or(&self.config.calendar_id)
    }

    async fn send(
        &self,
        account: &Account,
        request: reqwest::RequestBuilder,
    ) -> CalmergeResult<reqwest::Response> {
        request
            .bearer_auth(&account.access_token)
            .send()
            .await
            .map_err(|e| CalmergeError::Network(e.to_string()))
    }

    async fn check(account: &Account, response: reqwest::Response) -> CalmergeResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CalmergeError::from_status(status.as_u16(), body, &account.email))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> CalmergeResult<T> {
        response
            .json()
            .await
            .map_err(|e| CalmergeError::MalformedData(format!("Google response: {e}")))
    }

    fn raw(&self, calendar_id: &str, payload: serde_json::Value) -> RawEvent {
        RawEvent::new(Provider::Google, Some(calendar_id.to_string()), payload)
    }

    fn require_id(event: &Event) -> CalmergeResult<&str> {
        if event.is_draft() {
            return Err(CalmergeError::MalformedData(
                "event has no Google id".to_string(),
            ));
        }
        Ok(&event.id)
    }
}

#[async_trait]
impl EventGateway for GoogleGateway {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn fetch(&self, account: &Account, range: &SyncRange) -> CalmergeResult<Vec<RawEvent>> {
        let calendar_id = self.config.calendar_id.as_str();
        let mut raws = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;

        loop {
            let mut url = self.events_url(calendar_id, None)?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("singleEvents", "true")
                    .append_pair("orderBy", "startTime")
                    .append_pair("maxResults", PAGE_SIZE)
                    .append_pair("timeMin", &range.from_rfc3339())
                    .append_pair("timeMax", &range.to_rfc3339());
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let response = self.send(account, self.http.get(url)).await?;
            let page: EventsPage = Self::json(Self::check(account, response).await?).await?;
            pages += 1;

            raws.extend(
                page.items
                    .into_iter()
                    .filter(|item| item["status"] != "cancelled")
                    .map(|item| self.raw(calendar_id, item)),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(account = %account.key(), events = raws.len(), pages, "fetched Google events");
        Ok(raws)
    }

    async fn create(&self, account: &Account, event: &Event) -> CalmergeResult<RawEvent> {
        let calendar_id = self.calendar_of(event);
        let body = event.to_google()?;

        let request = self.http.post(self.events_url(calendar_id, None)?).json(&body);
        let response = Self::check(account, self.send(account, request).await?).await?;

        Ok(self.raw(calendar_id, Self::json(response).await?))
    }

    async fn update(&self, account: &Account, event: &Event) -> CalmergeResult<RawEvent> {
        let calendar_id = self.calendar_of(event);
        let id = Self::require_id(event)?;
        let body = event.to_google()?;

        let request = self
            .http
            .put(self.events_url(calendar_id, Some(id))?)
            .json(&body);
        let response = Self::check(account, self.send(account, request).await?).await?;

        Ok(self.raw(calendar_id, Self::json(response).await?))
    }

    async fn delete(&self, account: &Account, event: &Event) -> CalmergeResult<()> {
        let calendar_id = self.calendar_of(event);
        let id = Self::require_id(event)?;

        let request = self.http.delete(self.events_url(calendar_id, Some(id))?);
        let response = self.send(account, request).await?;

        // Already deleted
        if response.status() == StatusCode::GONE {
            return Ok(());
        }
        Self::check(account, response).await?;
        Ok(())
    }

    fn normalize(&self, raw: &RawEvent, account_email: &str) -> CalmergeResult<Event> {
        Event::from_google(raw, account_email)
    }
}
