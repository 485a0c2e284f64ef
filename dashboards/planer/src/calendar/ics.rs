// Minimal iCalendar (RFC 5545) reader for VEVENT components
//
// Only what the month view needs: SUMMARY, DTSTART and DTEND. Times with a
// `Z` suffix are converted into the display zone; floating times and times
// carrying a TZID are taken as wall-clock time in the display zone.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Start or end of an event, as wall-clock time in the display zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventTime {
    Date(NaiveDate),
    At(NaiveDateTime),
}

impl EventTime {
    pub fn date(&self) -> NaiveDate {
        match self {
            EventTime::Date(date) => *date,
            EventTime::At(at) => at.date(),
        }
    }
}

/// One calendar entry
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub title: String,
    pub calendar: String,
    pub start: EventTime,
    pub end: EventTime,
    pub all_day: bool,
}

struct Property<'a> {
    name: String,
    params: Vec<(String, String)>,
    value: &'a str,
}

impl Property<'_> {
    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Join folded lines (a line starting with a space or tab continues the
/// previous one).
pub fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = line.strip_prefix(' ').or_else(|| line.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

fn parse_property(line: &str) -> Option<Property<'_>> {
    // The value starts at the first ':' outside a quoted parameter
    let mut in_quotes = false;
    let mut split = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                split = Some(i);
                break;
            }
            _ => {}
        }
    }
    let split = split?;
    let (head, value) = (&line[..split], &line[split + 1..]);

    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    let params = parts
        .filter_map(|p| {
            let (k, v) = p.split_once('=')?;
            Some((k.trim().to_ascii_uppercase(), v.trim_matches('"').to_string()))
        })
        .collect();

    Some(Property {
        name,
        params,
        value,
    })
}

fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn parse_time<Tz: TimeZone>(prop: &Property<'_>, tz: &Tz) -> Option<(EventTime, bool)> {
    let value = prop.value.trim();
    let is_date = prop
        .param("VALUE")
        .map(|v| v.eq_ignore_ascii_case("DATE"))
        .unwrap_or(false)
        || (value.len() == 8 && !value.contains('T'));

    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return Some((EventTime::Date(date), true));
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        let local = Utc.from_utc_datetime(&naive).with_timezone(tz).naive_local();
        return Some((EventTime::At(local), false));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    Some((EventTime::At(naive), false))
}

#[derive(Default)]
struct EventBuilder {
    title: Option<String>,
    start: Option<(EventTime, bool)>,
    end: Option<EventTime>,
}

/// Extract every VEVENT of an iCalendar document. Events without a usable
/// DTSTART are skipped.
pub fn parse_events<Tz: TimeZone>(ics: &str, calendar: &str, tz: &Tz) -> Vec<CalendarEvent> {
    let mut events = Vec::new();
    let mut current: Option<EventBuilder> = None;
    // Depth of components nested inside the VEVENT (VALARM and friends)
    let mut nested = 0usize;

    for line in unfold(ics) {
        let prop = match parse_property(&line) {
            Some(prop) => prop,
            None => continue,
        };

        if current.is_none() {
            if prop.name == "BEGIN" && prop.value.eq_ignore_ascii_case("VEVENT") {
                current = Some(EventBuilder::default());
                nested = 0;
            }
            continue;
        }

        match prop.name.as_str() {
            "BEGIN" => nested += 1,
            "END" if nested > 0 => nested -= 1,
            "END" if prop.value.eq_ignore_ascii_case("VEVENT") => {
                if let Some(EventBuilder {
                    title,
                    start: Some((start, all_day)),
                    end,
                }) = current.take()
                {
                    events.push(CalendarEvent {
                        title: title.unwrap_or_default(),
                        calendar: calendar.to_string(),
                        start,
                        end: end.unwrap_or(start),
                        all_day,
                    });
                }
            }
            _ if nested > 0 => {}
            name => {
                if let Some(builder) = current.as_mut() {
                    match name {
                        "SUMMARY" => builder.title = Some(unescape_text(prop.value)),
                        "DTSTART" => builder.start = parse_time(&prop, tz),
                        "DTEND" => builder.end = parse_time(&prop, tz).map(|(t, _)| t),
                        _ => {}
                    }
                }
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    const SAMPLE: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:1\r\n\
SUMMARY:Dentist\\, check-up\r\n\
DTSTART:20250128T080000Z\r\n\
DTEND:20250128T090000Z\r\n\
BEGIN:VALARM\r\n\
SUMMARY:Alarm text\r\n\
END:VALARM\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:2\r\n\
SUMMARY:School\r\n\
\x20trip\r\n\
DTSTART;VALUE=DATE:20250130\r\n\
DTEND;VALUE=DATE:20250131\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:3\r\n\
SUMMARY:Dinner\r\n\
DTSTART;TZID=\"Europe/Berlin\":20250129T193000\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:4\r\n\
SUMMARY:No start\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    fn cet() -> FixedOffset {
        FixedOffset::east_opt(3600).unwrap()
    }

    fn at(date: &str, time: &str) -> EventTime {
        EventTime::At(
            NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M").unwrap(),
        )
    }

    #[test]
    fn unfolds_continuation_lines() {
        let lines = unfold("SUMMARY:Long\r\n  title\r\n\t again\r\nUID:1\r\n");
        assert_eq!(lines, vec!["SUMMARY:Long title again", "UID:1"]);
    }

    #[test]
    fn parses_timed_utc_event_into_display_zone() {
        let events = parse_events(SAMPLE, "Family", &cet());
        let dentist = &events[0];
        assert_eq!(dentist.title, "Dentist, check-up");
        assert_eq!(dentist.calendar, "Family");
        assert_eq!(dentist.start, at("2025-01-28", "09:00"));
        assert_eq!(dentist.end, at("2025-01-28", "10:00"));
        assert!(!dentist.all_day);
    }

    #[test]
    fn alarm_properties_do_not_leak_into_event() {
        let events = parse_events(SAMPLE, "Family", &cet());
        assert_ne!(events[0].title, "Alarm text");
    }

    #[test]
    fn parses_all_day_event() {
        let events = parse_events(SAMPLE, "Family", &cet());
        let trip = &events[1];
        assert_eq!(trip.title, "Schooltrip");
        assert!(trip.all_day);
        assert_eq!(
            trip.start,
            EventTime::Date(NaiveDate::from_ymd_opt(2025, 1, 30).unwrap())
        );
    }

    #[test]
    fn tzid_times_are_wall_clock_and_missing_end_defaults_to_start() {
        let events = parse_events(SAMPLE, "Family", &cet());
        let dinner = &events[2];
        assert_eq!(dinner.start, at("2025-01-29", "19:30"));
        assert_eq!(dinner.end, dinner.start);
    }

    #[test]
    fn events_without_start_are_skipped() {
        let events = parse_events(SAMPLE, "Family", &cet());
        assert_eq!(events.len(), 3);
    }
}
