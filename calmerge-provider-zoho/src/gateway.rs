//! Zoho Calendar API v1 calls.
//!
//! Events live per calendar, so a fetch lists the account's calendars first.
//! Create and update send the event as an `eventdata` query parameter; update
//! and delete must present the event's current etag.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use calmerge_core::gateway::{EventGateway, RawEvent};
use calmerge_core::sync_range::SyncRange;
use calmerge_core::{Account, CalmergeError, CalmergeResult, Event, Provider};

use crate::authorization_header;
use crate::config::ZohoConfig;
use crate::from_zoho::FromZoho;
use crate::to_zoho::ToZoho;

#[derive(Debug, Deserialize)]
struct ZohoCalendar {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    isdefault: bool,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarsResponse {
    #[serde(default)]
    calendars: Vec<ZohoCalendar>,
}

#[derive(Debug, Default, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

pub struct ZohoGateway {
    config: ZohoConfig,
    http: reqwest::Client,
}

impl ZohoGateway {
    pub fn new(config: ZohoConfig) -> Self {
        ZohoGateway {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, segments: &[&str]) -> CalmergeResult<Url> {
        let mut url = Url::parse(&self.config.calendar_api)
            .map_err(|e| CalmergeError::Config(format!("zoho.calendar_api: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CalmergeError::Config("zoho.calendar_api cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send with the account's token and decode a JSON body. Zoho answers
    /// some empty listings with 204 and no body.
    async fn call<T>(&self, account: &Account, request: reqwest::RequestBuilder) -> CalmergeResult<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let body = self.send(account, request).await?;
        if body.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&body)
            .map_err(|e| CalmergeError::MalformedData(format!("Zoho response: {e}")))
    }

    async fn send(&self, account: &Account, request: reqwest::RequestBuilder) -> CalmergeResult<String> {
        let response = request
            .header(AUTHORIZATION, authorization_header(&account.access_token))
            .send()
            .await
            .map_err(|e| CalmergeError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CalmergeError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(CalmergeError::from_status(status.as_u16(), body, &account.email));
        }
        Ok(body)
    }

    async fn calendars(&self, account: &Account) -> CalmergeResult<Vec<ZohoCalendar>> {
        let response: CalendarsResponse = self
            .call(account, self.http.get(self.url(&["calendars"])?))
            .await?;
        Ok(response
            .calendars
            .into_iter()
            .filter(|c| !c.uid.is_empty())
            .collect())
    }

    /// The event's own calendar, or the account's default one for new events.
    async fn calendar_for(&self, account: &Account, event: &Event) -> CalmergeResult<String> {
        if let Some(uid) = event.calendar_id.as_deref().filter(|uid| !uid.is_empty()) {
            return Ok(uid.to_string());
        }

        let calendars = self.calendars(account).await?;
        calendars
            .iter()
            .find(|c| c.isdefault)
            .or_else(|| calendars.first())
            .map(|c| c.uid.clone())
            .ok_or_else(|| {
                CalmergeError::MalformedData(format!("{} has no Zoho calendar", account.email))
            })
    }

    fn first_event(&self, calendar_uid: &str, response: EventsResponse) -> CalmergeResult<RawEvent> {
        response
            .events
            .into_iter()
            .next()
            .map(|payload| RawEvent::new(Provider::Zoho, Some(calendar_uid.to_string()), payload))
            .ok_or_else(|| CalmergeError::MalformedData("Zoho returned no event".into()))
    }

    fn require_id(event: &Event) -> CalmergeResult<&str> {
        if event.is_draft() {
            return Err(CalmergeError::MalformedData("event has no Zoho uid".into()));
        }
        Ok(&event.id)
    }

    fn event_data(&self, event: &Event) -> CalmergeResult<String> {
        Ok(event.to_zoho(&self.config.timezone)?.to_string())
    }
}

#[async_trait]
impl EventGateway for ZohoGateway {
    fn provider(&self) -> Provider {
        Provider::Zoho
    }

    async fn fetch(&self, account: &Account, _range: &SyncRange) -> CalmergeResult<Vec<RawEvent>> {
        let calendars = self.calendars(account).await?;
        let mut raws = Vec::new();

        for calendar in &calendars {
            let request = self
                .http
                .get(self.url(&["calendars", calendar.uid.as_str(), "events"])?);
            // One unreadable calendar must not hide the account's others
            let response: EventsResponse = match self.call(account, request).await {
                Ok(response) => response,
                Err(e @ CalmergeError::TokenExpired(_)) => return Err(e),
                Err(e) => {
                    warn!(account = %account.key(), calendar = %calendar.uid, error = %e, "skipping Zoho calendar");
                    continue;
                }
            };

            raws.extend(response.events.into_iter().map(|payload| {
                RawEvent::new(Provider::Zoho, Some(calendar.uid.clone()), payload)
            }));
        }

        debug!(
            account = %account.key(),
            calendars = calendars.len(),
            events = raws.len(),
            "fetched Zoho events"
        );
        Ok(raws)
    }

    async fn create(&self, account: &Account, event: &Event) -> CalmergeResult<RawEvent> {
        let calendar_uid = self.calendar_for(account, event).await?;
        let mut url = self.url(&["calendars", calendar_uid.as_str(), "events"])?;
        url.query_pairs_mut()
            .append_pair("eventdata", &self.event_data(&event.as_new())?);

        let response: EventsResponse = self.call(account, self.http.post(url)).await?;
        self.first_event(&calendar_uid, response)
    }

    async fn update(&self, account: &Account, event: &Event) -> CalmergeResult<RawEvent> {
        let id = Self::require_id(event)?;
        let calendar_uid = self.calendar_for(account, event).await?;
        let mut url = self.url(&["calendars", calendar_uid.as_str(), "events", id])?;
        url.query_pairs_mut()
            .append_pair("eventdata", &self.event_data(event)?);

        let response: EventsResponse = self.call(account, self.http.put(url)).await?;
        self.first_event(&calendar_uid, response)
    }

    async fn delete(&self, account: &Account, event: &Event) -> CalmergeResult<()> {
        let id = Self::require_id(event)?;
        let calendar_uid = self.calendar_for(account, event).await?;

        let mut request = self
            .http
            .delete(self.url(&["calendars", calendar_uid.as_str(), "events", id])?);
        if let Some(etag) = &event.provider_event_tag {
            request = request.header("etag", etag.as_str());
        }

        self.send(account, request).await?;
        Ok(())
    }

    fn normalize(&self, raw: &RawEvent, account_email: &str) -> CalmergeResult<Event> {
        Event::from_zoho(raw, account_email)
    }
}
