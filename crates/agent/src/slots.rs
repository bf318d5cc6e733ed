//! `understandIntent`: intent classification and slot extraction.
//!
//! Generalizes `voice_agent_agent::intent::IntentDetector` (in the sibling
//! teacher tree) onto the five site-agnostic intents in
//! `voice_agent_core::slot::Intent`: a fixed example-utterance catalog scored
//! by unicode-word overlap, plus a compiled-regex-per-slot-name extraction
//! table built once at construction. Unlike the teacher's `RwLock<Vec<Intent>>`
//! (which supports runtime re-registration for a single evolving domain),
//! intents here are fixed across every tenant site, so the catalog is a plain
//! `Vec` behind no lock.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use voice_agent_core::slot::{Intent, SlotFrame, SlotSource, SlotValue};

/// A point on the globe, carried in [`crate::orchestrator::TurnContext`] when
/// the client has shared one (geolocation permission, site default store).
#[derive(Debug, Clone, Copy)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// "Summer" means different months depending which side of the equator the
/// user is on. Resolved from locale region since that's what's on hand at
/// `understandIntent` time; a client-supplied timezone would be a better
/// signal but isn't part of the turn contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    Northern,
    Southern,
}

const SOUTHERN_HEMISPHERE_REGIONS: &[&str] = &["AU", "NZ", "ZA", "AR", "BR", "CL", "UY", "PY"];

pub fn hemisphere_for_locale(locale: &str) -> Hemisphere {
    let region = locale.split(['-', '_']).nth(1).unwrap_or("").to_uppercase();
    if SOUTHERN_HEMISPHERE_REGIONS.contains(&region.as_str()) {
        Hemisphere::Southern
    } else {
        Hemisphere::Northern
    }
}

struct IntentExample {
    intent: Intent,
    examples: &'static [&'static str],
}

static INTENT_CATALOG: Lazy<Vec<IntentExample>> = Lazy::new(|| {
    vec![
        IntentExample {
            intent: Intent::BuyTickets,
            examples: &[
                "buy tickets",
                "book tickets for the concert",
                "i want two tickets to the show",
                "get me seats for tonight's game",
                "purchase tickets for the festival",
                "i'd like to buy tickets for friday",
            ],
        },
        IntentExample {
            intent: Intent::BookService,
            examples: &[
                "book an appointment",
                "schedule a haircut",
                "i need a cleaning service",
                "reserve a table for tonight",
                "make a booking for a repair",
                "can i book a consultation",
            ],
        },
        IntentExample {
            intent: Intent::FindProducts,
            examples: &[
                "find running shoes",
                "show me laptops under 500",
                "search for red dresses",
                "looking for a gift",
                "do you have any jackets",
                "i want to buy a new phone",
            ],
        },
        IntentExample {
            intent: Intent::GetInformation,
            examples: &[
                "what are your opening hours",
                "where are you located",
                "what is your return policy",
                "tell me about shipping",
                "how much does delivery cost",
                "do you offer refunds",
            ],
        },
        IntentExample {
            intent: Intent::Navigation,
            examples: &[
                "take me to the homepage",
                "go to checkout",
                "open my cart",
                "navigate to the contact page",
                "show me the faq page",
                "go back",
            ],
        },
    ]
});

/// Classifies free text against the fixed intent catalog: exact match scores
/// 1.0, a substring match scores 0.9, otherwise the best-matching example's
/// unicode-word overlap ratio is scaled by 0.8. Returns the winner plus up to
/// three runners-up, mirroring the teacher's `alternatives` field.
pub fn detect_intent(text: &str) -> (Intent, f32, Vec<(Intent, f32)>) {
    let text_lower = text.to_lowercase();
    let text_words: HashSet<&str> = text_lower.unicode_words().collect();

    let mut scores: Vec<(Intent, f32)> = INTENT_CATALOG
        .iter()
        .map(|entry| (entry.intent, score_intent(&text_lower, &text_words, entry)))
        .collect();

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (best_intent, best_score) = scores.first().copied().unwrap_or((Intent::GetInformation, 0.0));
    let alternatives = scores.into_iter().skip(1).take(3).collect();
    (best_intent, best_score, alternatives)
}

fn score_intent(text_lower: &str, text_words: &HashSet<&str>, entry: &IntentExample) -> f32 {
    let mut score: f32 = 0.0;
    for example in entry.examples {
        let example_lower = example.to_lowercase();
        if text_lower == example_lower {
            return 1.0;
        }
        if text_lower.contains(&example_lower) {
            score = score.max(0.9);
        }
        let example_words: HashSet<&str> = example_lower.unicode_words().collect();
        let overlap = example_words.intersection(text_words).count();
        if overlap > 0 {
            let overlap_score = overlap as f32 / example_words.len().max(1) as f32;
            score = score.max(overlap_score * 0.8);
        }
    }
    score
}

/// One regex-driven extraction rule for a slot, tried in priority order
/// (first match wins) against a fixed per-pattern confidence.
struct SlotPattern {
    regex: &'static Lazy<Regex>,
    confidence: f32,
    build: fn(&regex::Captures<'_>) -> serde_json::Value,
}

static QUANTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s*(?:tickets?|seats?|people|guests?|persons?)\b").unwrap());
static QUANTITY_PLAIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfor\s+(\d{1,2})\b").unwrap());

static PRICE_UNDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:under|below|less than|cheaper than)\s*\$?(\d+(?:\.\d{1,2})?)").unwrap());
static PRICE_EXACT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d+(?:\.\d{1,2})?)").unwrap());
static PRICE_BUDGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(cheap|budget|affordable|premium|high-end|luxury)\b").unwrap());

static NEAR_ME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bnear me\b").unwrap());
static LOCATION_IN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:in|at|near)\s+([A-Z][a-zA-Z.\- ]{2,30})\b").unwrap());

static GENRE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(rock|pop|jazz|classical|electronic|hip\s?hop|country|comedy|drama|sports|family|folk|metal)\b").unwrap()
});

static CATEGORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(shoes?|sneakers?|laptops?|phones?|dresses?|jackets?|electronics?|furniture|toys?|books?)\b").unwrap()
});

static SERVICE_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(haircut|cleaning|repair|consultation|massage|tutoring|plumbing|gardening|maintenance|installation)\b").unwrap()
});

static TIME_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(today|tonight|tomorrow|this weekend|next week|this week|summer|winter|spring|autumn|fall)\b").unwrap()
});
static TIME_WEEKDAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b").unwrap());

fn category_synonym(raw: &str) -> &'static str {
    match raw.to_lowercase().trim_end_matches('s') {
        "shoe" | "sneaker" => "footwear",
        "laptop" | "phone" | "electronic" => "electronics",
        "dress" | "jacket" => "apparel",
        "toy" => "toys",
        "book" => "books",
        "furniture" => "furniture",
        _ => "general",
    }
}

/// Resolves a temporal keyword to a `{start, end, label}` date range. Season
/// words are hemisphere-dependent; everything else is locale-independent.
fn resolve_temporal(raw: &str, hemisphere: Hemisphere, now: DateTime<Utc>) -> serde_json::Value {
    let lower = raw.to_lowercase();
    let day_start = |d: DateTime<Utc>| d.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
    let day_end = |d: DateTime<Utc>| d.date_naive().and_hms_opt(23, 59, 59).unwrap().and_utc();

    let (start, end) = match lower.as_str() {
        "today" | "tonight" => (day_start(now), day_end(now)),
        "tomorrow" => {
            let d = now + ChronoDuration::days(1);
            (day_start(d), day_end(d))
        }
        "this week" => (day_start(now), day_end(now + ChronoDuration::days(7 - now.weekday().num_days_from_monday() as i64))),
        "next week" => {
            let start_of_next = now + ChronoDuration::days(7 - now.weekday().num_days_from_monday() as i64 + 1);
            (day_start(start_of_next), day_end(start_of_next + ChronoDuration::days(6)))
        }
        "this weekend" => {
            let days_until_saturday = (Weekday::Sat.num_days_from_monday() as i64 - now.weekday().num_days_from_monday() as i64).rem_euclid(7);
            let saturday = now + ChronoDuration::days(days_until_saturday);
            (day_start(saturday), day_end(saturday + ChronoDuration::days(1)))
        }
        "summer" | "winter" | "spring" | "autumn" | "fall" => season_range(&lower, hemisphere, now),
        _ => (day_start(now), day_end(now)),
    };

    serde_json::json!({ "start": start.to_rfc3339(), "end": end.to_rfc3339(), "label": raw })
}

fn season_range(season: &str, hemisphere: Hemisphere, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    // (start_month, end_month) in the northern calendar; swapped six months for the south.
    let (start_month, end_month) = match (season, hemisphere) {
        ("summer", Hemisphere::Northern) | ("winter", Hemisphere::Southern) => (6, 8),
        ("winter", Hemisphere::Northern) | ("summer", Hemisphere::Southern) => (12, 2),
        ("spring", Hemisphere::Northern) | ("autumn", Hemisphere::Southern) | ("fall", Hemisphere::Southern) => (3, 5),
        _ => (9, 11),
    };

    let mut year = now.year();
    if start_month < now.month() as i32 - 1 {
        year += 1;
    }
    let start = chrono::NaiveDate::from_ymd_opt(year, start_month as u32, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    let (end_year, end_month_norm) = if end_month < start_month { (year + 1, end_month) } else { (year, end_month) };
    let end_month_days = days_in_month(end_year, end_month_norm as u32);
    let end = chrono::NaiveDate::from_ymd_opt(end_year, end_month_norm as u32, end_month_days)
        .unwrap()
        .and_hms_opt(23, 59, 59)
        .unwrap()
        .and_utc();
    (start, end)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let next = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap();
    (next - chrono::NaiveDate::from_ymd_opt(year, month, 1).unwrap()).num_days() as u32
}

/// Extracts normalized slots for the detected intent's critical slots (plus
/// `price`, which every intent may carry as a soft constraint).
pub struct SlotExtractor {
    hemisphere: Hemisphere,
    user_location: Option<GeoPoint>,
}

impl SlotExtractor {
    pub fn new(hemisphere: Hemisphere, user_location: Option<GeoPoint>) -> Self {
        Self { hemisphere, user_location }
    }

    /// Populates `frame.slots`/`resolved_slots`/`missing_slots` in place for
    /// every critical slot of `frame.intent`, plus opportunistic `price`.
    pub fn extract(&self, text: &str, now: DateTime<Utc>, frame: &mut SlotFrame) {
        let Some(intent) = frame.intent else { return };
        let mut wanted: Vec<&'static str> = intent.critical_slots().to_vec();
        if !wanted.contains(&"price") {
            wanted.push("price");
        }

        for slot_name in wanted {
            if let Some(value) = self.extract_one(slot_name, text, now) {
                frame.resolved_slots.push(slot_name.to_string());
                frame.slots.insert(slot_name.to_string(), value);
            } else if intent.critical_slots().contains(&slot_name) {
                frame.missing_slots.push(slot_name.to_string());
            }
        }
    }

    fn extract_one(&self, slot_name: &str, text: &str, now: DateTime<Utc>) -> Option<SlotValue> {
        match slot_name {
            "quantity" => self.extract_quantity(text),
            "time" => self.extract_time(text, now),
            "location" => self.extract_location(text),
            "genre" => extract_keyword(text, &GENRE_RE, |s| s.to_lowercase()),
            "category" => extract_keyword(text, &CATEGORY_RE, |s| category_synonym(s).to_string()),
            "service_type" => extract_keyword(text, &SERVICE_TYPE_RE, |s| s.to_lowercase().replace(' ', "_")),
            "price" => self.extract_price(text),
            _ => None,
        }
    }

    fn extract_quantity(&self, text: &str) -> Option<SlotValue> {
        if let Some(caps) = QUANTITY_RE.captures(text) {
            let raw = caps.get(0)?.as_str().to_string();
            let n: u32 = caps.get(1)?.as_str().parse().ok()?;
            return Some(SlotValue::new(raw, serde_json::json!(n), 0.9, SlotSource::UserInput));
        }
        if let Some(caps) = QUANTITY_PLAIN_RE.captures(text) {
            let raw = caps.get(0)?.as_str().to_string();
            let n: u32 = caps.get(1)?.as_str().parse().ok()?;
            return Some(SlotValue::new(raw, serde_json::json!(n), 0.6, SlotSource::UserInput));
        }
        None
    }

    fn extract_time(&self, text: &str, now: DateTime<Utc>) -> Option<SlotValue> {
        if let Some(caps) = TIME_WEEKDAY_RE.captures(text) {
            let raw = caps.get(1)?.as_str().to_string();
            let target = weekday_from_name(&raw)?;
            let days_ahead = (target.num_days_from_monday() as i64 - now.weekday().num_days_from_monday() as i64).rem_euclid(7);
            let days_ahead = if days_ahead == 0 { 7 } else { days_ahead };
            let resolved = now + ChronoDuration::days(days_ahead);
            let normalized = resolve_temporal("today", self.hemisphere, resolved);
            return Some(SlotValue::new(raw, normalized, 0.85, SlotSource::UserInput));
        }
        if let Some(caps) = TIME_KEYWORD_RE.captures(text) {
            let raw = caps.get(1)?.as_str().to_string();
            let normalized = resolve_temporal(&raw, self.hemisphere, now);
            return Some(SlotValue::new(raw, normalized, 0.85, SlotSource::UserInput));
        }
        None
    }

    fn extract_location(&self, text: &str) -> Option<SlotValue> {
        if NEAR_ME_RE.is_match(text) {
            return match self.user_location {
                Some(point) => Some(SlotValue::new(
                    "near me",
                    serde_json::json!({ "radius_km": 25, "center": { "lat": point.lat, "lon": point.lon } }),
                    0.9,
                    SlotSource::Context,
                )),
                None => {
                    let mut value = SlotValue::new("near me", serde_json::json!({ "radius_km": 25 }), 0.3, SlotSource::UserInput);
                    value.needs_confirmation = true;
                    Some(value)
                }
            };
        }
        if let Some(caps) = LOCATION_IN_RE.captures(text) {
            let raw = caps.get(1)?.as_str().trim().to_string();
            return Some(SlotValue::new(raw.clone(), serde_json::json!(raw), 0.75, SlotSource::UserInput));
        }
        None
    }

    fn extract_price(&self, text: &str) -> Option<SlotValue> {
        if let Some(caps) = PRICE_UNDER_RE.captures(text) {
            let raw = caps.get(0)?.as_str().to_string();
            let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
            return Some(SlotValue::new(raw, serde_json::json!({ "max": amount }), 0.9, SlotSource::UserInput));
        }
        if let Some(caps) = PRICE_EXACT_RE.captures(text) {
            let raw = caps.get(0)?.as_str().to_string();
            let amount: f64 = caps.get(1)?.as_str().parse().ok()?;
            return Some(SlotValue::new(raw, serde_json::json!({ "max": amount }), 0.7, SlotSource::UserInput));
        }
        if let Some(caps) = PRICE_BUDGET_RE.captures(text) {
            let raw = caps.get(1)?.as_str().to_lowercase();
            let tier = match raw.as_str() {
                "cheap" | "budget" | "affordable" => "low",
                _ => "high",
            };
            return Some(SlotValue::new(raw, serde_json::json!({ "tier": tier }), 0.65, SlotSource::Inference));
        }
        None
    }
}

fn extract_keyword(text: &str, regex: &Lazy<Regex>, normalize: impl Fn(&str) -> String) -> Option<SlotValue> {
    let caps = regex.captures(text)?;
    let raw = caps.get(1)?.as_str().to_string();
    let normalized = normalize(&raw);
    Some(SlotValue::new(raw, serde_json::json!(normalized), 0.8, SlotSource::UserInput))
}

fn weekday_from_name(name: &str) -> Option<Weekday> {
    match name.to_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_example_match_scores_one() {
        let (intent, score, _) = detect_intent("buy tickets");
        assert_eq!(intent, Intent::BuyTickets);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn partial_overlap_still_ranks_the_right_intent_first() {
        let (intent, score, _) = detect_intent("can i get two tickets for the saturday show");
        assert_eq!(intent, Intent::BuyTickets);
        assert!(score > 0.0);
    }

    #[test]
    fn hemisphere_is_read_from_locale_region() {
        assert_eq!(hemisphere_for_locale("en-AU"), Hemisphere::Southern);
        assert_eq!(hemisphere_for_locale("en-US"), Hemisphere::Northern);
        assert_eq!(hemisphere_for_locale("en"), Hemisphere::Northern);
    }

    #[test]
    fn summer_resolves_to_different_months_by_hemisphere() {
        let now = DateTime::parse_from_rfc3339("2026-01-15T00:00:00Z").unwrap().with_timezone(&Utc);
        let north = resolve_temporal("summer", Hemisphere::Northern, now);
        let south = resolve_temporal("summer", Hemisphere::Southern, now);
        assert_ne!(north["start"], south["start"]);
    }

    #[test]
    fn near_me_resolves_radius_when_location_known() {
        let extractor = SlotExtractor::new(Hemisphere::Northern, Some(GeoPoint { lat: 40.7, lon: -74.0 }));
        let mut frame = SlotFrame::new(Intent::FindProducts, 0.9);
        extractor.extract("find a coffee shop near me", Utc::now(), &mut frame);
        let slot = frame.slots.get("location").unwrap();
        assert_eq!(slot.normalized["radius_km"], 25);
        assert!(!slot.needs_confirmation);
    }

    #[test]
    fn near_me_without_known_location_needs_confirmation() {
        let extractor = SlotExtractor::new(Hemisphere::Northern, None);
        let mut frame = SlotFrame::new(Intent::FindProducts, 0.9);
        extractor.extract("find a coffee shop near me", Utc::now(), &mut frame);
        let slot = frame.slots.get("location").unwrap();
        assert!(slot.needs_confirmation);
    }

    #[test]
    fn missing_critical_slot_is_recorded() {
        let extractor = SlotExtractor::new(Hemisphere::Northern, None);
        let mut frame = SlotFrame::new(Intent::BuyTickets, 0.9);
        extractor.extract("buy tickets", Utc::now(), &mut frame);
        assert!(frame.missing_slots.contains(&"quantity".to_string()));
    }

    #[test]
    fn category_synonyms_normalize() {
        let extractor = SlotExtractor::new(Hemisphere::Northern, None);
        let mut frame = SlotFrame::new(Intent::FindProducts, 0.9);
        extractor.extract("show me some sneakers", Utc::now(), &mut frame);
        let slot = frame.slots.get("category").unwrap();
        assert_eq!(slot.normalized, serde_json::json!("footwear"));
    }
}
