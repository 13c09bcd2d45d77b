//! Date normalization and timeline reconstruction
//!
//! Dates are standardized to ISO 8601 (`YYYY-MM-DD`, or `YYYY-MM` / `YYYY`
//! when the source only gives that much). A value that cannot be read is
//! kept exactly as written and flagged, never discarded.

use crate::config::PipelineOptions;
use crate::types::{ExtractedFields, NormalizedFields, TimelineEntry};
use chrono::{DateTime, NaiveDate};
use fieldwise_domain::{FieldSpec, FieldType};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::debug;

/// Numeric dates: 2023/01/05, 05/15/1980, 15-05-1980, 3.4.21
static NUMERIC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,4})([/.-])(\d{1,2})([/.-])(\d{1,4})$").unwrap());

static BARE_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").unwrap());

/// Date-looking substrings inside longer text ("DOB: 05/15/1980")
static EMBEDDED_DATES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let month = r"(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?";
    vec![
        Regex::new(r"\b\d{4}-\d{1,2}-\d{1,2}\b").unwrap(),
        Regex::new(r"\b\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}\b").unwrap(),
        Regex::new(&format!(r"(?i)\b{month}\s+\d{{1,2}}(?:st|nd|rd|th)?,?\s+\d{{4}}\b")).unwrap(),
        Regex::new(&format!(r"(?i)\b\d{{1,2}}(?:st|nd|rd|th)?\s+(?:of\s+)?{month}\s+\d{{4}}\b"))
            .unwrap(),
    ]
});

/// Two-digit years below this map to 20xx, the rest to 19xx
const TWO_DIGIT_YEAR_PIVOT: i32 = 50;

/// A date read at whatever precision the source gave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsedDate {
    Day(NaiveDate),
    Month(i32, u32),
    Year(i32),
}

impl ParsedDate {
    fn to_iso(self) -> String {
        match self {
            ParsedDate::Day(d) => d.format("%Y-%m-%d").to_string(),
            ParsedDate::Month(y, m) => format!("{y:04}-{m:02}"),
            ParsedDate::Year(y) => format!("{y:04}"),
        }
    }
}

/// Standardize a date string
///
/// Returns the ISO 8601 form and `true`, or the input unchanged and `false`
/// when no reading succeeds. Ambiguous slash dates are read month-first
/// unless the first number cannot be a month.
pub fn normalize_date(raw: &str) -> (String, bool) {
    let trimmed = raw.trim();
    match parse_strict(trimmed).or_else(|| parse_fallback(trimmed)) {
        Some(date) => (date.to_iso(), true),
        None => (raw.to_string(), false),
    }
}

fn parse_strict(s: &str) -> Option<ParsedDate> {
    if s.is_empty() {
        return None;
    }
    let lower = s.to_lowercase();
    if matches!(lower.as_str(), "null" | "none" | "n/a" | "unknown" | "not_found") {
        return None;
    }

    // ISO passthrough, including the date part of a timestamp
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(ParsedDate::Day(d));
    }
    if let Some(head) = s.get(..10) {
        if matches!(s.as_bytes().get(10), Some(b'T') | Some(b' ')) {
            if let Ok(d) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
                return Some(ParsedDate::Day(d));
            }
        }
    }

    if let Some(date) = parse_numeric(s) {
        return Some(date);
    }
    if let Some(date) = parse_textual(&lower) {
        return Some(date);
    }
    if BARE_YEAR.is_match(s) {
        return s.parse().ok().map(ParsedDate::Year);
    }
    None
}

/// General parsers, then a search for a date inside surrounding text
fn parse_fallback(s: &str) -> Option<ParsedDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(ParsedDate::Day(dt.date_naive()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(ParsedDate::Day(dt.date_naive()));
    }
    EMBEDDED_DATES
        .iter()
        .filter_map(|re| re.find(s))
        .find_map(|m| parse_strict(m.as_str()))
}

fn parse_numeric(s: &str) -> Option<ParsedDate> {
    let caps = NUMERIC_DATE.captures(s)?;
    let (a, sep, b, c) = (&caps[1], &caps[2], &caps[3], &caps[5]);
    if &caps[2] != &caps[4] {
        return None;
    }

    // Year first: 2023/01/05
    if a.len() == 4 {
        if c.len() > 2 {
            return None;
        }
        return ymd(a.parse().ok()?, b.parse().ok()?, c.parse().ok()?);
    }

    if a.len() > 2 || !(c.len() == 2 || c.len() == 4) {
        return None;
    }
    let year = expand_year(c)?;
    let first: u32 = a.parse().ok()?;
    let second: u32 = b.parse().ok()?;

    // Slashes read M/D/Y; dashes and dots read D-M-Y. Either flips when
    // its primary reading is impossible.
    let (month, day) = match sep {
        "/" if first > 12 => (second, first),
        "/" => (first, second),
        _ if second > 12 => (first, second),
        _ => (second, first),
    };
    ymd(year, month, day)
}

fn parse_textual(lower: &str) -> Option<ParsedDate> {
    let tokens: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '-' | '/'))
        .map(|t| t.trim_end_matches('.'))
        .filter(|t| !t.is_empty() && *t != "of" && *t != "the")
        .collect();

    match tokens.as_slice() {
        // January 5, 2023 / Jan 5th 2023
        [m, d, y] if month_number(m).is_some() => {
            ymd(expand_year(y)?, month_number(m)?, day_number(d)?)
        }
        // 5 January 2023 / 5th of Jan 2023
        [d, m, y] if month_number(m).is_some() => {
            ymd(expand_year(y)?, month_number(m)?, day_number(d)?)
        }
        // 2023 January 5
        [y, m, d] if y.len() == 4 && month_number(m).is_some() => {
            ymd(y.parse().ok()?, month_number(m)?, day_number(d)?)
        }
        // March 2021
        [m, y] if month_number(m).is_some() && y.len() == 4 => {
            let year: i32 = y.parse().ok()?;
            Some(ParsedDate::Month(year, month_number(m)?))
        }
        _ => None,
    }
}

fn ymd(year: i32, month: u32, day: u32) -> Option<ParsedDate> {
    NaiveDate::from_ymd_opt(year, month, day).map(ParsedDate::Day)
}

fn expand_year(token: &str) -> Option<i32> {
    let token = token.trim_start_matches('\'');
    if !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let n: i32 = token.parse().ok()?;
    match token.len() {
        2 if n < TWO_DIGIT_YEAR_PIVOT => Some(2000 + n),
        2 => Some(1900 + n),
        4 => Some(n),
        _ => None,
    }
}

fn day_number(token: &str) -> Option<u32> {
    let digits = token
        .trim_end_matches("st")
        .trim_end_matches("nd")
        .trim_end_matches("rd")
        .trim_end_matches("th");
    if digits.is_empty() || digits.len() > 2 {
        return None;
    }
    digits.parse().ok()
}

fn month_number(token: &str) -> Option<u32> {
    let month = match token {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sept" | "sep" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Normalize every named date field, scalar or list
///
/// Values that fail are left untouched. Returns the names of fields where
/// at least one value could not be normalized.
pub fn normalize_fields(values: &mut BTreeMap<String, Value>, date_fields: &[&str]) -> Vec<String> {
    let mut failed = Vec::new();
    for name in date_fields {
        let Some(value) = values.get_mut(*name) else {
            continue;
        };
        let ok = match value {
            Value::Array(items) => items.iter_mut().fold(true, |ok, item| normalize_value(item) && ok),
            other => normalize_value(other),
        };
        if !ok {
            failed.push((*name).to_string());
        }
    }
    failed
}

/// Normalize one string value in place; non-strings are left alone
fn normalize_value(value: &mut Value) -> bool {
    match value {
        Value::String(s) => {
            let (iso, ok) = normalize_date(s);
            if ok {
                *s = iso;
            }
            ok
        }
        Value::Number(n) => {
            let (iso, ok) = normalize_date(&n.to_string());
            if ok {
                *value = Value::String(iso);
            }
            ok
        }
        Value::Null => true,
        _ => false,
    }
}

/// Accumulates dated entries, merging those that share a date
#[derive(Debug, Default)]
struct TimelineBuilder {
    entries: Vec<TimelineEntry>,
    by_date: HashMap<String, usize>,
}

impl TimelineBuilder {
    fn add(&mut self, date: String, normalized: bool, data: Map<String, Value>) {
        match self.by_date.get(&date) {
            Some(&i) => merge_payload(&mut self.entries[i].data, data),
            None => {
                self.by_date.insert(date.clone(), self.entries.len());
                self.entries.push(TimelineEntry { date, normalized, data });
            }
        }
    }

    fn finish(mut self, ascending: bool, segregate_unparsed: bool) -> Vec<TimelineEntry> {
        self.entries.sort_by(|a, b| {
            let group = if segregate_unparsed {
                b.normalized.cmp(&a.normalized)
            } else {
                std::cmp::Ordering::Equal
            };
            let by_date = if ascending {
                a.date.cmp(&b.date)
            } else {
                b.date.cmp(&a.date)
            };
            group.then(by_date)
        });
        self.entries
    }
}

/// Fold `incoming` into `existing`
///
/// A key seen again with the same value keeps the first value; differing
/// values accumulate into a deduplicated list.
fn merge_payload(existing: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match existing.get_mut(&key) {
            None => {
                existing.insert(key, value);
            }
            Some(current) if *current == value => {}
            Some(Value::Array(items)) => {
                let new_items = match value {
                    Value::Array(more) => more,
                    single => vec![single],
                };
                for item in new_items {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
            }
            Some(current) => {
                let first = current.take();
                let mut items = vec![first];
                match value {
                    Value::Array(more) => {
                        for item in more {
                            if !items.contains(&item) {
                                items.push(item);
                            }
                        }
                    }
                    single => items.push(single),
                }
                *current = Value::Array(items);
            }
        }
    }
}

/// Build a chronological timeline from date-bearing events
///
/// Events with no value under `date_field` are skipped (they stay in their
/// source field). Events whose date cannot be normalized are kept under the
/// raw text; with `segregate_unparsed` they sort after every normalized
/// entry. `payload_fields` selects the event keys copied into each entry;
/// when empty every key except the date is kept.
pub fn build_timeline(
    events: &[Value],
    date_field: &str,
    payload_fields: &[String],
    ascending: bool,
    segregate_unparsed: bool,
) -> Vec<TimelineEntry> {
    let mut builder = TimelineBuilder::default();

    for event in events {
        let Some(obj) = event.as_object() else {
            continue;
        };
        let raw_date = match obj.get(date_field) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                debug!(date_field, "Skipping timeline event without a date");
                continue;
            }
        };
        let (date, normalized) = normalize_date(&raw_date);

        let data: Map<String, Value> = obj
            .iter()
            .filter(|(k, v)| {
                k.as_str() != date_field
                    && !v.is_null()
                    && (payload_fields.is_empty() || payload_fields.iter().any(|p| p == *k))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        builder.add(date, normalized, data);
    }

    builder.finish(ascending, segregate_unparsed)
}

/// Combine several timelines into one, merging entries that share a date
pub fn merge_timelines<I>(timelines: I, ascending: bool, segregate_unparsed: bool) -> Vec<TimelineEntry>
where
    I: IntoIterator<Item = Vec<TimelineEntry>>,
{
    let mut builder = TimelineBuilder::default();
    for entry in timelines.into_iter().flatten() {
        builder.add(entry.date, entry.normalized, entry.data);
    }
    builder.finish(ascending, segregate_unparsed)
}

/// Normalize one chunk's validated values
///
/// Date fields are rewritten to ISO 8601 where possible and each timeline
/// field is projected into a per-chunk timeline.
pub fn normalize(
    mut fields: ExtractedFields,
    specs: &[FieldSpec],
    options: &PipelineOptions,
) -> NormalizedFields {
    let date_fields: Vec<&str> = specs
        .iter()
        .filter(|s| s.field_type == FieldType::Date)
        .map(|s| s.name.as_str())
        .collect();
    let failed = normalize_fields(&mut fields.values, &date_fields);
    if !failed.is_empty() {
        debug!(chunk = fields.chunk_index, ?failed, "Dates left as written");
    }

    let mut timelines = Vec::new();
    for spec in specs.iter().filter(|s| s.field_type == FieldType::Timeline) {
        let (Some(date_field), Some(Value::Array(events))) =
            (spec.date_field.as_deref(), fields.values.get(&spec.name))
        else {
            continue;
        };
        timelines.push(build_timeline(
            events,
            date_field,
            &spec.payload_fields,
            options.ascending_timeline,
            options.segregate_unparsed_dates,
        ));
    }

    let timeline = (!timelines.is_empty()).then(|| {
        merge_timelines(
            timelines,
            options.ascending_timeline,
            options.segregate_unparsed_dates,
        )
    });

    NormalizedFields { fields, timeline }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldwise_domain::TokenUsage;
    use serde_json::json;

    fn iso(raw: &str) -> String {
        let (value, ok) = normalize_date(raw);
        assert!(ok, "expected '{raw}' to normalize, got '{value}'");
        value
    }

    #[test]
    fn test_iso_passthrough() {
        assert_eq!(iso("2023-01-20"), "2023-01-20");
        assert_eq!(iso("2023-01-20T10:30:00Z"), "2023-01-20");
        assert_eq!(iso(" 2023-01-20 "), "2023-01-20");
    }

    #[test]
    fn test_us_slash_format() {
        assert_eq!(iso("12/20/2022"), "2022-12-20");
        assert_eq!(iso("05/15/1980"), "1980-05-15");
        assert_eq!(iso("5/6/2020"), "2020-05-06");
    }

    #[test]
    fn test_day_first_when_month_impossible() {
        assert_eq!(iso("20/12/2022"), "2022-12-20");
    }

    #[test]
    fn test_dash_reads_day_first() {
        assert_eq!(iso("15-05-1980"), "1980-05-15");
        assert_eq!(iso("05-06-2020"), "2020-06-05");
        assert_eq!(iso("05-15-1980"), "1980-05-15");
    }

    #[test]
    fn test_year_first_slash() {
        assert_eq!(iso("2023/01/05"), "2023-01-05");
    }

    #[test]
    fn test_two_digit_year() {
        assert_eq!(iso("05/15/80"), "1980-05-15");
        assert_eq!(iso("01/02/21"), "2021-01-02");
    }

    #[test]
    fn test_month_name_formats() {
        assert_eq!(iso("January 5, 2023"), "2023-01-05");
        assert_eq!(iso("Jan. 5, 2023"), "2023-01-05");
        assert_eq!(iso("March 3rd, 2021"), "2021-03-03");
        assert_eq!(iso("5 January 2023"), "2023-01-05");
        assert_eq!(iso("21st of Sept 2019"), "2019-09-21");
        assert_eq!(iso("5-Jan-2023"), "2023-01-05");
    }

    #[test]
    fn test_reduced_precision() {
        assert_eq!(iso("March 2021"), "2021-03");
        assert_eq!(iso("1999"), "1999");
    }

    #[test]
    fn test_general_fallback() {
        assert_eq!(iso("Tue, 1 Jul 2003 10:52:37 +0200"), "2003-07-01");
        assert_eq!(iso("DOB: 05/15/1980"), "1980-05-15");
        assert_eq!(iso("admitted on January 5, 2023 at noon"), "2023-01-05");
    }

    #[test]
    fn test_failure_keeps_original() {
        assert_eq!(normalize_date("sometime last spring"), ("sometime last spring".to_string(), false));
        assert_eq!(normalize_date("02/30/2020"), ("02/30/2020".to_string(), false));
        assert_eq!(normalize_date(""), (String::new(), false));
    }

    #[test]
    fn test_normalize_fields_scalar_and_list() {
        let mut values = BTreeMap::new();
        values.insert("dob".to_string(), json!("05/15/1980"));
        values.insert("visits".to_string(), json!(["January 5, 2023", "garbage"]));
        values.insert("name".to_string(), json!("12/20/2022"));

        let failed = normalize_fields(&mut values, &["dob", "visits", "absent"]);

        assert_eq!(values["dob"], json!("1980-05-15"));
        assert_eq!(values["visits"], json!(["2023-01-05", "garbage"]));
        assert_eq!(values["name"], json!("12/20/2022"));
        assert_eq!(failed, vec!["visits".to_string()]);
    }

    #[test]
    fn test_timeline_sorted() {
        let events = vec![
            json!({"date": "2023-01-20", "event": "Discharge"}),
            json!({"date": "12/20/2022", "event": "Referral"}),
            json!({"date": "January 5, 2023", "event": "Admission"}),
        ];
        let timeline = build_timeline(&events, "date", &[], true, true);
        let dates: Vec<&str> = timeline.iter().map(|e| e.date.as_str()).collect();
        assert_eq!(dates, vec!["2022-12-20", "2023-01-05", "2023-01-20"]);
        assert_eq!(timeline[1].data["event"], json!("Admission"));

        let descending = build_timeline(&events, "date", &[], false, true);
        assert_eq!(descending[0].date, "2023-01-20");
    }

    #[test]
    fn test_timeline_same_date_merges() {
        let events = vec![
            json!({"date": "2023-01-05", "event": "Admission", "ward": "B"}),
            json!({"date": "01/05/2023", "event": "Blood test", "ward": "B"}),
            json!({"date": "2023-01-05", "event": "Admission"}),
        ];
        let timeline = build_timeline(&events, "date", &[], true, true);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].data["event"], json!(["Admission", "Blood test"]));
        assert_eq!(timeline[0].data["ward"], json!("B"));
    }

    #[test]
    fn test_timeline_skips_undated_and_segregates_unparsed() {
        let events = vec![
            json!({"event": "No date at all"}),
            json!({"date": "early spring", "event": "Symptoms began"}),
            json!({"date": "2023-01-20", "event": "Visit"}),
            json!("not an object"),
        ];
        let timeline = build_timeline(&events, "date", &[], true, true);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].date, "2023-01-20");
        assert_eq!(timeline[1].date, "early spring");
        assert!(!timeline[1].normalized);

        let mixed = build_timeline(&events, "date", &[], true, false);
        assert_eq!(mixed[0].date, "2023-01-20");
        assert_eq!(mixed[1].date, "early spring");

        let descending_mixed = build_timeline(&events, "date", &[], false, false);
        assert_eq!(descending_mixed[0].date, "early spring");
    }

    #[test]
    fn test_timeline_payload_filter() {
        let events = vec![json!({"date": "2023-01-05", "event": "Admission", "noise": "x"})];
        let timeline = build_timeline(&events, "date", &["event".to_string()], true, true);
        assert_eq!(timeline[0].data.len(), 1);
        assert!(timeline[0].data.contains_key("event"));
    }

    #[test]
    fn test_merge_timelines() {
        let a = build_timeline(&[json!({"date": "2023-01-05", "event": "A"})], "date", &[], true, true);
        let b = build_timeline(
            &[
                json!({"date": "2022-12-01", "event": "B"}),
                json!({"date": "2023-01-05", "event": "C"}),
            ],
            "date",
            &[],
            true,
            true,
        );
        let merged = merge_timelines(vec![a, b], true, true);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].date, "2022-12-01");
        assert_eq!(merged[1].data["event"], json!(["A", "C"]));
    }

    #[test]
    fn test_normalize_stage() {
        let specs = vec![
            FieldSpec::new("dob", "", FieldType::Date).unique(),
            FieldSpec::new("events", "", FieldType::Timeline).with_date_field("date"),
        ];
        let mut values = BTreeMap::new();
        values.insert("dob".to_string(), json!("DOB: 05/15/1980"));
        values.insert(
            "events".to_string(),
            json!([{"date": "Jan 2, 2020", "what": "x"}]),
        );
        let fields = ExtractedFields {
            chunk_index: 0,
            values,
            confidence: BTreeMap::new(),
            issues: Vec::new(),
            token_usage: TokenUsage::default(),
        };

        let normalized = normalize(fields, &specs, &PipelineOptions::default());
        assert_eq!(normalized.fields.values["dob"], json!("1980-05-15"));
        let timeline = normalized.timeline.unwrap();
        assert_eq!(timeline[0].date, "2020-01-02");
    }
}
