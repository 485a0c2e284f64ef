// CalDAV client
//
// Read-only RFC 4791 access: principal and calendar-home discovery, calendar
// listing and time-range REPORTs. Multistatus bodies are matched on local
// element names.

use chrono::{DateTime, Utc};
use homeboard_core::SourceError;
use regex::Regex;
use reqwest::{Client, Method, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// CalDAV client errors
#[derive(Error, Debug)]
pub enum CalDavError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),
}

pub type CalDavResult<T> = Result<T, CalDavError>;

impl From<CalDavError> for SourceError {
    fn from(err: CalDavError) -> Self {
        match err {
            CalDavError::HttpError(e) => SourceError::Http(e),
            CalDavError::AuthenticationFailed => SourceError::Upstream {
                status: 401,
                message: "CalDAV authentication failed".to_string(),
            },
            CalDavError::ServerError { status, message } => {
                SourceError::Upstream { status, message }
            }
            other => SourceError::Malformed(other.to_string()),
        }
    }
}

/// A calendar collection on the server
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCalendar {
    pub url: Url,
    pub display_name: String,
}

/// CalDAV client for RFC 4791 read-only operations
pub struct CalDavClient {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
}

const PRINCIPAL_QUERY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:current-user-principal />
  </D:prop>
</D:propfind>"#;

const HOME_SET_QUERY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <C:calendar-home-set />
  </D:prop>
</D:propfind>"#;

const CALENDAR_LIST_QUERY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <D:displayname />
    <D:resourcetype />
  </D:prop>
</D:propfind>"#;

impl CalDavClient {
    /// Create a new CalDAV client
    pub fn new(base_url: &str, username: String, password: String) -> CalDavResult<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url =
            Url::parse(base_url).map_err(|e| CalDavError::InvalidUrl(format!("{base_url}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            username,
            password,
        })
    }

    /// Walk principal -> calendar home -> calendar collections
    pub async fn discover_calendars(&self) -> CalDavResult<Vec<RemoteCalendar>> {
        let principal = self
            .propfind(&self.base_url, "0", PRINCIPAL_QUERY)
            .await?;
        let principal_href = element_text(&principal, "current-user-principal")
            .and_then(|inner| element_text(&inner, "href"))
            .ok_or_else(|| CalDavError::DiscoveryFailed("no current-user-principal".into()))?;
        let principal_url = self.resolve(&principal_href)?;
        debug!(target: "caldav", principal = %principal_url, "Found principal");

        let home = self.propfind(&principal_url, "0", HOME_SET_QUERY).await?;
        let home_href = element_text(&home, "calendar-home-set")
            .and_then(|inner| element_text(&inner, "href"))
            .ok_or_else(|| CalDavError::DiscoveryFailed("no calendar-home-set".into()))?;
        let home_url = principal_url
            .join(&home_href)
            .map_err(|e| CalDavError::InvalidUrl(format!("{home_href}: {e}")))?;
        debug!(target: "caldav", home = %home_url, "Found calendar home");

        let listing = self.propfind(&home_url, "1", CALENDAR_LIST_QUERY).await?;
        parse_calendar_listing(&listing, &home_url)
    }

    /// Fetch raw iCalendar documents of events overlapping `[start, end)`,
    /// with recurrences expanded by the server
    pub async fn events_between(
        &self,
        calendar: &RemoteCalendar,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CalDavResult<Vec<String>> {
        let body = build_calendar_query(start, end);
        let text = self
            .send_request(report_method(), &calendar.url, "1", body)
            .await?;
        Ok(split_responses(&text)
            .iter()
            .filter_map(|response| element_text(response, "calendar-data"))
            .map(|data| decode_xml_text(&data))
            .collect())
    }

    fn resolve(&self, href: &str) -> CalDavResult<Url> {
        self.base_url
            .join(href)
            .map_err(|e| CalDavError::InvalidUrl(format!("{href}: {e}")))
    }

    async fn propfind(&self, url: &Url, depth: &str, body: &str) -> CalDavResult<String> {
        self.send_request(propfind_method(), url, depth, body.to_string())
            .await
    }

    /// Send HTTP request with authentication
    async fn send_request(
        &self,
        method: Method,
        url: &Url,
        depth: &str,
        body: String,
    ) -> CalDavResult<String> {
        let response = self
            .client
            .request(method, url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", depth)
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(CalDavError::AuthenticationFailed);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CalDavError::ServerError { status, message });
        }

        Ok(response.text().await?)
    }
}

fn propfind_method() -> Method {
    Method::from_bytes(b"PROPFIND").unwrap_or(Method::GET)
}

fn report_method() -> Method {
    Method::from_bytes(b"REPORT").unwrap_or(Method::GET)
}

/// Build calendar-query XML for VEVENTs in a time range
pub fn build_calendar_query(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let start = start.format("%Y%m%dT%H%M%SZ");
    let end = end.format("%Y%m%dT%H%M%SZ");
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<C:calendar-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <D:getetag />
    <C:calendar-data>
      <C:expand start="{start}" end="{end}" />
    </C:calendar-data>
  </D:prop>
  <C:filter>
    <C:comp-filter name="VCALENDAR">
      <C:comp-filter name="VEVENT">
        <C:time-range start="{start}" end="{end}" />
      </C:comp-filter>
    </C:comp-filter>
  </C:filter>
</C:calendar-query>"#
    )
}

// Servers pick their own namespace prefixes (or none), so elements are
// matched on the local name only.
fn element_regex(local_name: &str) -> Option<Regex> {
    let name = regex::escape(local_name);
    Regex::new(&format!(
        r"(?s)<(?:[\w.-]+:)?{name}(?:\s[^>]*)?>(.*?)</(?:[\w.-]+:)?{name}\s*>"
    ))
    .ok()
}

/// Inner text of the first element with the given local name
pub fn element_text(xml: &str, local_name: &str) -> Option<String> {
    element_regex(local_name)?
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn has_empty_or_open_element(xml: &str, local_name: &str) -> bool {
    let name = regex::escape(local_name);
    Regex::new(&format!(r"<(?:[\w.-]+:)?{name}(?:\s[^>]*)?/?>"))
        .map(|re| re.is_match(xml))
        .unwrap_or(false)
}

/// Every `<response>` body of a multistatus document
pub fn split_responses(xml: &str) -> Vec<String> {
    match element_regex("response") {
        Some(re) => re
            .captures_iter(xml)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect(),
        None => Vec::new(),
    }
}

/// Resolve XML entities and CDATA sections in element text
pub fn decode_xml_text(text: &str) -> String {
    if let Some(start) = text.find("<![CDATA[") {
        let rest = &text[start + "<![CDATA[".len()..];
        let end = rest.find("]]>").unwrap_or(rest.len());
        return rest[..end].to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#13;", "\r")
        .replace("&#xD;", "\r")
        .replace("&#10;", "\n")
        .replace("&amp;", "&")
}

/// Calendar collections from a Depth-1 PROPFIND on the calendar home
pub fn parse_calendar_listing(xml: &str, home_url: &Url) -> CalDavResult<Vec<RemoteCalendar>> {
    let mut calendars = Vec::new();
    for response in split_responses(xml) {
        let is_calendar = element_text(&response, "resourcetype")
            .map(|types| has_empty_or_open_element(&types, "calendar"))
            .unwrap_or(false);
        if !is_calendar {
            continue;
        }

        let href = match element_text(&response, "href") {
            Some(href) => decode_xml_text(&href),
            None => continue,
        };
        let url = home_url
            .join(&href)
            .map_err(|e| CalDavError::InvalidUrl(format!("{href}: {e}")))?;
        let display_name = element_text(&response, "displayname")
            .map(|name| decode_xml_text(&name))
            .unwrap_or_default();

        calendars.push(RemoteCalendar { url, display_name });
    }
    Ok(calendars)
}
