//! Daily consumption stats

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A numeric field of the daily stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatField {
    Calories,
    Protein,
    Carbs,
    Fat,
    Water,
}

impl StatField {
    pub const ALL: [StatField; 5] = [
        StatField::Calories,
        StatField::Protein,
        StatField::Carbs,
        StatField::Fat,
        StatField::Water,
    ];

    /// Field name inside the stored stats document
    pub fn document_key(self) -> &'static str {
        match self {
            StatField::Calories => "caloriesConsumed",
            StatField::Protein => "proteinConsumed",
            StatField::Carbs => "carbsConsumed",
            StatField::Fat => "fatConsumed",
            StatField::Water => "waterIntake",
        }
    }
}

/// Midnight UTC of a calendar day; the timestamp of a zeroed snapshot
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// One day's consumption
///
/// Numeric fields are never negative or non-finite; setters clamp to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub date: NaiveDate,
    #[serde(default)]
    pub calories_consumed: f64,
    #[serde(default)]
    pub protein_consumed: f64,
    #[serde(default)]
    pub carbs_consumed: f64,
    #[serde(default)]
    pub fat_consumed: f64,
    /// Millilitres
    #[serde(default)]
    pub water_intake: u32,
    #[serde(default, rename = "completedMeals")]
    pub completed_meal_ids: BTreeSet<String>,
    pub last_updated: DateTime<Utc>,
}

impl DailyStats {
    /// All-zero stats for a day
    pub fn zeroed(date: NaiveDate) -> Self {
        Self {
            date,
            calories_consumed: 0.0,
            protein_consumed: 0.0,
            carbs_consumed: 0.0,
            fat_consumed: 0.0,
            water_intake: 0,
            completed_meal_ids: BTreeSet::new(),
            last_updated: start_of_day(date),
        }
    }

    pub fn get(&self, field: StatField) -> f64 {
        match field {
            StatField::Calories => self.calories_consumed,
            StatField::Protein => self.protein_consumed,
            StatField::Carbs => self.carbs_consumed,
            StatField::Fat => self.fat_consumed,
            StatField::Water => f64::from(self.water_intake),
        }
    }

    pub fn set(&mut self, field: StatField, value: f64) {
        let value = non_negative(value);
        match field {
            StatField::Calories => self.calories_consumed = value,
            StatField::Protein => self.protein_consumed = value,
            StatField::Carbs => self.carbs_consumed = value,
            StatField::Fat => self.fat_consumed = value,
            StatField::Water => self.water_intake = value.round().min(f64::from(u32::MAX)) as u32,
        }
    }

    /// Clamp every numeric field into its valid range
    pub fn sanitized(mut self) -> Self {
        for field in StatField::ALL {
            let v = self.get(field);
            self.set(field, v);
        }
        self
    }

    /// Parse the stats object stored under `key` in a remote document
    ///
    /// Missing or malformed data yields `None` rather than an error.
    pub fn from_document(doc: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<Self> {
        let value = doc.get(key)?;
        match serde_json::from_value::<DailyStats>(value.clone()) {
            Ok(stats) => Some(stats.sanitized()),
            Err(e) => {
                debug!("Ignoring malformed daily stats under '{}': {}", key, e);
                None
            }
        }
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { 0.0 }
}

/// Daily goals used for progress display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTargets {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub water_ml: u32,
    #[serde(default)]
    pub meals: usize,
}

/// Nutrition of one meal, added to the day's totals when it is completed
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealNutrition {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl MealNutrition {
    pub fn get(&self, field: StatField) -> f64 {
        match field {
            StatField::Calories => self.calories,
            StatField::Protein => self.protein,
            StatField::Carbs => self.carbs,
            StatField::Fat => self.fat,
            StatField::Water => 0.0,
        }
    }
}

/// Progress toward the daily targets, in percent (0-100, capped)
#[derive(Debug, Clone, PartialEq)]
pub struct DailyProgress {
    pub calories_pct: f64,
    pub protein_pct: f64,
    pub carbs_pct: f64,
    pub fat_pct: f64,
    pub water_pct: f64,
    pub meals_completed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn test_zeroed_is_empty() {
        let stats = DailyStats::zeroed(today());
        for field in StatField::ALL {
            assert_eq!(stats.get(field), 0.0);
        }
        assert!(stats.completed_meal_ids.is_empty());
        assert_eq!(stats.last_updated, start_of_day(today()));
    }

    #[test]
    fn test_set_clamps_invalid_values() {
        let mut stats = DailyStats::zeroed(today());
        stats.set(StatField::Calories, -5.0);
        stats.set(StatField::Protein, f64::NAN);
        stats.set(StatField::Water, 249.6);
        assert_eq!(stats.calories_consumed, 0.0);
        assert_eq!(stats.protein_consumed, 0.0);
        assert_eq!(stats.water_intake, 250);
    }

    #[test]
    fn test_from_document_parses_camel_case() {
        let doc = json!({
            "dailyStats": {
                "date": "2026-10-16",
                "caloriesConsumed": 1200.5,
                "waterIntake": 750,
                "completedMeals": ["breakfast", "lunch"],
                "lastUpdated": "2026-10-16T12:00:00Z"
            }
        });
        let stats = DailyStats::from_document(doc.as_object().unwrap(), "dailyStats").unwrap();
        assert_eq!(stats.calories_consumed, 1200.5);
        assert_eq!(stats.protein_consumed, 0.0);
        assert_eq!(stats.water_intake, 750);
        assert_eq!(stats.completed_meal_ids.len(), 2);
    }

    #[test]
    fn test_from_document_malformed_is_none() {
        let doc = json!({ "dailyStats": { "date": "not a date" } });
        assert!(DailyStats::from_document(doc.as_object().unwrap(), "dailyStats").is_none());
        let doc = json!({});
        assert!(DailyStats::from_document(doc.as_object().unwrap(), "dailyStats").is_none());
    }

    #[test]
    fn test_from_document_sanitizes_negative_numbers() {
        let doc = json!({
            "dailyStats": {
                "date": "2026-10-16",
                "fatConsumed": -3.0,
                "lastUpdated": "2026-10-16T12:00:00Z"
            }
        });
        let stats = DailyStats::from_document(doc.as_object().unwrap(), "dailyStats").unwrap();
        assert_eq!(stats.fat_consumed, 0.0);
    }
}
