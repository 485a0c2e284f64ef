// Weather data source
//
// Reads the OpenWeatherMap 5-day / 3-hour forecast and condenses it into
// today's daytime slots plus min/max digests for the next three days.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveTime, TimeZone};
use homeboard_core::{DataSource, SourceContext, SourceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const DAY_SECS: i64 = 86_400;
const TODAY_SLOTS: usize = 5;
const DIGEST_DAYS: i64 = 3;

/// `[dashboards.planer.weather]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSettings {
    /// Forecast API endpoint
    pub api_endpoint: String,
    /// Base URL for condition icons
    pub icon_base: String,
    pub api_key_env: String,
    pub location_env: String,
    /// Overrides the location environment variable
    pub location: Option<String>,
    pub units: String,
    /// Number of 3-hour entries to request (40 = five days)
    pub count: u32,
    /// Timeout for API requests in milliseconds
    pub timeout_ms: u64,
    /// Local hour after which today's slots start (exclusive)
    pub day_start_hour: u32,
    /// Local hour before which today's slots end (exclusive)
    pub day_end_hour: u32,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            api_endpoint: "https://api.openweathermap.org/data/2.5/forecast".to_string(),
            icon_base: "https://openweathermap.org/img/wn".to_string(),
            api_key_env: "OPEN_WEATHER_API_KEY".to_string(),
            location_env: "OPEN_WEATHER_LOCATION".to_string(),
            location: None,
            units: "metric".to_string(),
            count: 40,
            timeout_ms: 10_000,
            day_start_hour: 5,
            day_end_hour: 21,
        }
    }
}

/// Forecast response from OpenWeatherMap
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    pub list: Vec<ForecastEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastEntry {
    /// Unix timestamp (UTC)
    pub dt: i64,
    /// "YYYY-MM-DD HH:MM:SS" (UTC)
    #[serde(default)]
    pub dt_txt: String,
    pub main: MainReadings,
    #[serde(default)]
    pub weather: Vec<Condition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainReadings {
    pub temp: f64,
    pub temp_min: f64,
    pub temp_max: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    pub id: i64,
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TodaySlot {
    pub dt: String,
    pub icon: String,
    pub temp: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayDigest {
    pub day: String,
    pub temp_max: i64,
    pub temp_min: i64,
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeatherDigest {
    pub weather_today: Vec<TodaySlot>,
    pub weather_data: Vec<DayDigest>,
}

// Half to even
fn round_temp(value: f64) -> i64 {
    value.round_ties_even() as i64
}

fn icon_url(base: &str, icon: &str) -> String {
    format!("{}/{}@2x.png", base, icon)
}

fn local_timestamp<Tz: TimeZone>(tz: &Tz, date: NaiveDate, hour: u32) -> i64 {
    let naive = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN));
    match tz.from_local_datetime(&naive).earliest() {
        Some(at) => at.timestamp(),
        None => naive.and_utc().timestamp(),
    }
}

fn slot_time(dt_txt: &str) -> String {
    // "2025-01-28 09:00:00" -> "09:00"
    dt_txt
        .split(' ')
        .nth(1)
        .and_then(|t| t.get(..5))
        .unwrap_or_default()
        .to_string()
}

/// Condense a forecast relative to `today` in zone `tz`
pub fn digest_forecast<Tz: TimeZone>(
    forecast: &ForecastResponse,
    today: NaiveDate,
    tz: &Tz,
    settings: &WeatherSettings,
) -> WeatherDigest {
    let window_start = local_timestamp(tz, today, settings.day_start_hour);
    let window_end = local_timestamp(tz, today, settings.day_end_hour);
    let in_window =
        |entry: &&ForecastEntry, offset: i64| window_start + offset < entry.dt && entry.dt < window_end + offset;

    let weather_today = forecast
        .list
        .iter()
        .filter(|e| in_window(e, 0))
        .chain(forecast.list.iter().filter(|e| in_window(e, DAY_SECS)))
        .take(TODAY_SLOTS)
        .map(|entry| TodaySlot {
            dt: slot_time(&entry.dt_txt),
            icon: icon_url(
                &settings.icon_base,
                entry.weather.first().map(|w| w.icon.as_str()).unwrap_or_default(),
            ),
            temp: round_temp(entry.main.temp),
        })
        .collect();

    let mut weather_data = Vec::new();
    for offset in 1..=DIGEST_DAYS {
        let day = today + ChronoDuration::days(offset);
        let entries: Vec<&ForecastEntry> = forecast
            .list
            .iter()
            .filter(|e| {
                tz.timestamp_opt(e.dt, 0)
                    .single()
                    .map(|at| at.date_naive() == day)
                    .unwrap_or(false)
            })
            .collect();

        if entries.is_empty() {
            debug!(target: "weather", day = %day, "No forecast entries for day");
            continue;
        }

        let temp_max = entries
            .iter()
            .map(|e| e.main.temp_max)
            .fold(f64::NEG_INFINITY, f64::max);
        let temp_min = entries
            .iter()
            .map(|e| e.main.temp_min)
            .fold(f64::INFINITY, f64::min);

        // Lowest condition id is the most severe weather of the day
        let icon = entries
            .iter()
            .filter_map(|e| e.weather.first())
            .min_by_key(|w| w.id)
            .map(|w| day_icon(&w.icon))
            .unwrap_or_default();

        weather_data.push(DayDigest {
            day: day.format("%A").to_string(),
            temp_max: round_temp(temp_max),
            temp_min: round_temp(temp_min),
            icon: icon_url(&settings.icon_base, &icon),
        });
    }

    WeatherDigest {
        weather_today,
        weather_data,
    }
}

/// Force the daytime variant of an icon code ("10n" -> "10d")
fn day_icon(icon: &str) -> String {
    let mut chars = icon.chars();
    chars.next_back();
    format!("{}d", chars.as_str())
}

// `message` of a JSON error body, else the raw body
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string));
    match from_json {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => "Unknown error".to_string(),
    }
}

/// Weather data source backed by OpenWeatherMap
pub struct WeatherSource {
    settings: WeatherSettings,
    http_client: reqwest::Client,
}

impl WeatherSource {
    pub fn new(settings: WeatherSettings) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            settings,
            http_client,
        }
    }

    pub fn from_context(ctx: &SourceContext) -> homeboard_core::Result<Self> {
        Ok(Self::new(ctx.section("weather")?))
    }

    fn env(&self, var: &str) -> Result<String, SourceError> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SourceError::MissingCredentials(var.to_string()))
    }

    /// Fetch the raw forecast
    pub async fn fetch_forecast(&self) -> Result<ForecastResponse, SourceError> {
        let api_key = self.env(&self.settings.api_key_env)?;
        let location = match &self.settings.location {
            Some(location) => location.clone(),
            None => self.env(&self.settings.location_env)?,
        };
        debug!(target: "weather", location = %location, "Fetching forecast");

        let count = self.settings.count.to_string();
        let response = self
            .http_client
            .get(&self.settings.api_endpoint)
            .query(&[
                ("q", location.as_str()),
                ("appid", api_key.as_str()),
                ("units", self.settings.units.as_str()),
                ("cnt", count.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = error_message(&text);
            warn!(target: "weather", status = %status, message = %message, "Forecast API returned error");
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await?;
        serde_json::from_value(body)
            .map_err(|e| SourceError::Malformed(format!("forecast response: {}", e)))
    }
}

#[async_trait]
impl DataSource for WeatherSource {
    async fn get_data(&self) -> Result<Value, SourceError> {
        let forecast = self.fetch_forecast().await?;
        let digest = digest_forecast(&forecast, Local::now().date_naive(), &Local, &self.settings);
        serde_json::to_value(digest).map_err(|e| SourceError::Malformed(e.to_string()))
    }

    fn endpoint_name(&self) -> &str {
        "weather"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};
    use serde_json::json;

    /// Five days of 3-hourly entries starting at `first` (UTC midnight),
    /// temperatures derived from the slot so expectations are easy to compute
    fn five_day_forecast(first: NaiveDate) -> ForecastResponse {
        let start = Utc
            .from_utc_datetime(&first.and_time(NaiveTime::MIN))
            .timestamp();
        let list: Vec<Value> = (0..40)
            .map(|i| {
                let dt = start + i * 3 * 3600;
                let at = Utc.timestamp_opt(dt, 0).unwrap();
                let day = i / 8;
                let slot = i % 8;
                json!({
                    "dt": dt,
                    "dt_txt": at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    "main": {
                        "temp": 10.0 + slot as f64 + 0.4,
                        "temp_min": 5.0 + day as f64 - slot as f64 * 0.5,
                        "temp_max": 12.0 + day as f64 + slot as f64 * 0.6,
                    },
                    "weather": [{
                        "id": if slot == 4 { 500 } else { 800 + slot },
                        "icon": if slot == 4 { "10n" } else { "01d" },
                    }],
                })
            })
            .collect();
        serde_json::from_value(json!({ "list": list })).unwrap()
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn today_slots_are_strictly_inside_daytime_window() {
        let today = day(2025, 1, 28);
        let digest = digest_forecast(
            &five_day_forecast(today),
            today,
            &utc(),
            &WeatherSettings::default(),
        );

        // 06, 09, 12, 15, 18 today; 21:00 is excluded, then the list is capped at five
        let times: Vec<&str> = digest.weather_today.iter().map(|s| s.dt.as_str()).collect();
        assert_eq!(times, vec!["06:00", "09:00", "12:00", "15:00", "18:00"]);
        assert_eq!(digest.weather_today[0].temp, 12);
        assert_eq!(
            digest.weather_today[0].icon,
            "https://openweathermap.org/img/wn/01d@2x.png"
        );
    }

    #[test]
    fn late_in_the_day_tomorrow_fills_the_slots() {
        // Forecast starts tomorrow at midnight, so nothing is left for today
        let today = day(2025, 1, 28);
        let digest = digest_forecast(
            &five_day_forecast(day(2025, 1, 29)),
            today,
            &utc(),
            &WeatherSettings::default(),
        );
        let times: Vec<&str> = digest.weather_today.iter().map(|s| s.dt.as_str()).collect();
        assert_eq!(times, vec!["06:00", "09:00", "12:00", "15:00", "18:00"]);
    }

    #[test]
    fn next_three_days_have_rounded_min_max() {
        let today = day(2025, 1, 28);
        let digest = digest_forecast(
            &five_day_forecast(today),
            today,
            &utc(),
            &WeatherSettings::default(),
        );

        assert_eq!(digest.weather_data.len(), 3);
        let names: Vec<&str> = digest.weather_data.iter().map(|d| d.day.as_str()).collect();
        assert_eq!(names, vec!["Wednesday", "Thursday", "Friday"]);

        for (i, digest_day) in digest.weather_data.iter().enumerate() {
            let n = (i + 1) as f64;
            // max over slots 0..8 of 12 + n + 0.6 * slot -> slot 7
            assert_eq!(digest_day.temp_max, (12.0 + n + 4.2_f64).round_ties_even() as i64);
            // min over slots of 5 + n - 0.5 * slot -> slot 7
            assert_eq!(digest_day.temp_min, (5.0 + n - 3.5_f64).round_ties_even() as i64);
            // Slot 4 carries the lowest condition id, forced to its day icon
            assert_eq!(
                digest_day.icon,
                "https://openweathermap.org/img/wn/10d@2x.png"
            );
        }
    }

    #[test]
    fn days_are_taken_in_the_display_zone() {
        // At UTC+2 the 22:00 UTC entry already belongs to the next day
        let today = day(2025, 1, 28);
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let digest = digest_forecast(
            &five_day_forecast(today),
            today,
            &plus_two,
            &WeatherSettings::default(),
        );
        // Today's window is 03:00..19:00 UTC: 06, 09, 12, 15, 18
        assert_eq!(digest.weather_today.len(), 5);
        assert_eq!(digest.weather_today[0].dt, "06:00");
        assert_eq!(digest.weather_data.len(), 3);
    }

    #[test]
    fn missing_days_are_skipped() {
        let today = day(2025, 1, 28);
        let mut forecast = five_day_forecast(today);
        forecast.list.truncate(16);
        let digest = digest_forecast(&forecast, today, &utc(), &WeatherSettings::default());
        assert_eq!(digest.weather_data.len(), 1);
        assert_eq!(digest.weather_data[0].day, "Wednesday");
    }

    #[test]
    fn error_message_prefers_json_message_then_raw_body() {
        assert_eq!(
            error_message(r#"{"cod":401,"message":"Invalid API key"}"#),
            "Invalid API key"
        );
        assert_eq!(error_message("<html>bad gateway</html>\n"), "<html>bad gateway</html>");
        assert_eq!(error_message(""), "Unknown error");
    }

    #[test]
    fn rounding_and_icon_helpers() {
        assert_eq!(round_temp(2.5), 2);
        assert_eq!(round_temp(3.5), 4);
        assert_eq!(round_temp(-0.6), -1);
        assert_eq!(day_icon("04n"), "04d");
        assert_eq!(day_icon("04d"), "04d");
        assert_eq!(slot_time("2025-01-28 09:00:00"), "09:00");
        assert_eq!(slot_time("garbage"), "");
    }

    #[tokio::test]
    async fn missing_api_key_fails_the_fetch() {
        let source = WeatherSource::new(WeatherSettings {
            api_key_env: "HOMEBOARD_TEST_UNSET_WEATHER_KEY".into(),
            ..WeatherSettings::default()
        });
        let err = source.get_data().await.unwrap_err();
        assert!(matches!(err, SourceError::MissingCredentials(var) if var == "HOMEBOARD_TEST_UNSET_WEATHER_KEY"));
        assert_eq!(source.endpoint_name(), "weather");
    }
}
