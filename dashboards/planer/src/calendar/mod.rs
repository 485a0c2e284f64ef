// Calendar data source
//
// A four-week grid of CalDAV events starting on the Monday of the current week.

pub mod caldav;
pub mod ics;

use async_trait::async_trait;
use chrono::{Datelike, Duration, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use homeboard_core::{DataSource, SourceContext, SourceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use caldav::CalDavClient;
pub use ics::{CalendarEvent, EventTime};

const WEEKS: usize = 4;
const DEFAULT_BACKGROUND: &str = "#6c757d";
const DEFAULT_COLOR: &str = "#000";

/// A calendar to show, with its colours
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarSpec {
    pub name: String,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default = "default_color")]
    pub color: String,
}

fn default_background() -> String {
    DEFAULT_BACKGROUND.to_string()
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

/// `[dashboards.planer.calendar]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    pub url: String,
    pub username_env: String,
    pub password_env: String,
    /// Calendars to show; every calendar when empty
    pub calendars: Vec<CalendarSpec>,
    /// Answer 304 to clients whose If-None-Match tag is still current
    pub conditional_fetch: bool,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            url: "https://caldav.icloud.com/".to_string(),
            username_env: "ICLOUD_USERNAME".to_string(),
            password_env: "ICLOUD_APP_PASSWORD".to_string(),
            calendars: Vec::new(),
            conditional_fetch: false,
        }
    }
}

impl CalendarSettings {
    fn wants(&self, calendar: &str) -> bool {
        self.calendars.is_empty() || self.spec(calendar).is_some()
    }

    fn spec(&self, calendar: &str) -> Option<&CalendarSpec> {
        self.calendars
            .iter()
            .find(|c| c.name.trim() == calendar.trim())
    }

    /// (background, text colour) for a calendar
    pub fn colors(&self, calendar: &str) -> (String, String) {
        match self.spec(calendar) {
            Some(spec) => (spec.background.clone(), spec.color.clone()),
            None => (default_background(), default_color()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AllDayEntry {
    pub title: String,
    pub background: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TimedEntry {
    pub title: String,
    pub start_time: String,
    pub background: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayCell {
    pub date: u32,
    pub all_day_events: Vec<AllDayEntry>,
    pub timed_events: Vec<TimedEntry>,
    pub in_month: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthView {
    pub today_day: u32,
    pub current_month: String,
    pub weeks: Vec<Vec<DayCell>>,
}

/// Monday of the week containing `day`
pub fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

/// Lay `events` out on a four-week grid starting on the Monday of `today`'s week
pub fn build_month_view(
    today: NaiveDate,
    events: &[CalendarEvent],
    settings: &CalendarSettings,
) -> MonthView {
    let start = week_start(today);
    let mut weeks = Vec::with_capacity(WEEKS);

    for w in 0..WEEKS {
        let mut week = Vec::with_capacity(7);
        for d in 0..7 {
            let day = start + Duration::days((w * 7 + d) as i64);
            let mut all_day_events = Vec::new();
            let mut timed_events = Vec::new();

            for event in events {
                let (background, color) = settings.colors(&event.calendar);
                match event.start {
                    EventTime::At(at) if at.date() == day => timed_events.push(TimedEntry {
                        title: event.title.clone(),
                        start_time: at.format("%H:%M").to_string(),
                        background,
                        color,
                    }),
                    EventTime::Date(date) if date == day => all_day_events.push(AllDayEntry {
                        title: event.title.clone(),
                        background,
                        color,
                    }),
                    _ => {}
                }
            }

            timed_events.sort_by(|a, b| a.start_time.cmp(&b.start_time));
            week.push(DayCell {
                date: day.day(),
                all_day_events,
                timed_events,
                in_month: day.month() == today.month(),
            });
        }
        weeks.push(week);
    }

    MonthView {
        today_day: today.day(),
        current_month: today.format("%B %Y").to_string(),
        weeks,
    }
}

/// Calendar data source backed by a CalDAV server
pub struct CalendarSource {
    settings: CalendarSettings,
}

impl CalendarSource {
    pub fn new(settings: CalendarSettings) -> Self {
        Self { settings }
    }

    pub fn from_context(ctx: &SourceContext) -> homeboard_core::Result<Self> {
        let settings: CalendarSettings = ctx.section("calendar")?;
        info!(
            target: "calendar",
            url = %settings.url,
            calendars = settings.calendars.len(),
            "Calendar source configured"
        );
        Ok(Self::new(settings))
    }

    fn credential(&self, var: &str) -> Result<String, SourceError> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SourceError::MissingCredentials(var.to_string()))
    }

    /// Events of the selected calendars between two local dates
    async fn fetch_events(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, SourceError> {
        let client = CalDavClient::new(
            &self.settings.url,
            self.credential(&self.settings.username_env)?,
            self.credential(&self.settings.password_env)?,
        )?;

        let range_start = local_midnight_utc(from);
        let range_end = local_midnight_utc(to);

        let mut events = Vec::new();
        for calendar in client.discover_calendars().await? {
            if !self.settings.wants(&calendar.display_name) {
                continue;
            }
            let documents = client
                .events_between(&calendar, range_start, range_end)
                .await?;
            for document in documents {
                events.extend(ics::parse_events(&document, &calendar.display_name, &Local));
            }
        }
        debug!(target: "calendar", events = events.len(), "Fetched calendar events");
        Ok(events)
    }
}

fn local_midnight_utc(date: NaiveDate) -> chrono::DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&midnight),
    }
}

#[async_trait]
impl DataSource for CalendarSource {
    async fn get_data(&self) -> Result<Value, SourceError> {
        let today = Local::now().date_naive();
        let start = week_start(today);
        let events = self
            .fetch_events(start, start + Duration::weeks(WEEKS as i64))
            .await?;

        let view = build_month_view(today, &events, &self.settings);
        serde_json::to_value(view).map_err(|e| SourceError::Malformed(e.to_string()))
    }

    fn endpoint_name(&self) -> &str {
        "calendar"
    }

    fn conditional_fetch(&self) -> bool {
        self.settings.conditional_fetch
    }
}
