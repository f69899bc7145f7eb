//! Lead aggregation: cohort vs. volume metrics, efficiency ratios and the
//! origin breakdown.
//!
//! Every entry point deduplicates its inputs by lead id before counting, so
//! results are independent of how many overlapping queries produced them.

use crate::field_extractor::extract_field_value;
use crate::lead_fetcher::dedup_by_id;
use crate::models::{CanonicalId, Lead};
use chrono::{Datelike, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Leads needed per sale. `Infinite` when nothing was sold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Ratio {
    Value(f64),
    Infinite,
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ratio::Value(v) => f.write_str(&fmt_decimal(*v)),
            Ratio::Infinite => f.write_str("∞"),
        }
    }
}

/// Per-origin leads-per-sale shown in report rows; `NotApplicable` when the
/// origin closed no sales.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OriginRatio {
    Value(f64),
    NotApplicable,
}

impl fmt::Display for OriginRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginRatio::Value(v) => f.write_str(&fmt_decimal(*v)),
            OriginRatio::NotApplicable => f.write_str("N/A"),
        }
    }
}

/// Origin label → lead count, ordered by count descending.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OriginBreakdown(pub Vec<(String, usize)>);

impl OriginBreakdown {
    pub fn iter(&self) -> impl Iterator<Item = &(String, usize)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count_of(&self, label: &str) -> usize {
        self.0
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.iter().map(|(_, c)| c).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResult {
    /// Leads created in the window.
    pub total_created: usize,
    /// Leads created in the window that are already won.
    pub cohort_won: usize,
    /// Leads won in the window, whenever they were created.
    pub total_closed_won: usize,
    pub ratio: Ratio,
    pub origins: OriginBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginEfficiency {
    pub label: String,
    pub count: usize,
    pub won: usize,
    pub ratio: OriginRatio,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Renders with one or two decimals: `5.0`, `3.3`, `3.33`.
pub fn fmt_decimal(x: f64) -> String {
    let two = format!("{:.2}", x);
    if two.ends_with('0') {
        format!("{:.1}", x)
    } else {
        two
    }
}

pub fn efficiency_ratio(total_leads: usize, total_won: usize) -> Ratio {
    if total_won == 0 {
        return Ratio::Infinite;
    }
    Ratio::Value(round2(total_leads as f64 / total_won as f64))
}

/// Cohort (new and already won) vs. volume (won in window) counts.
pub fn cohort_metrics(
    created: &[Lead],
    won_in_window: &[Lead],
    won_status: &CanonicalId,
) -> AggregationResult {
    let created = dedup_by_id(created.to_vec());
    let won = dedup_by_id(won_in_window.to_vec());

    let total_created = created.len();
    let cohort_won = created.iter().filter(|l| l.has_status(won_status)).count();
    let total_closed_won = won.len();

    AggregationResult {
        total_created,
        cohort_won,
        total_closed_won,
        ratio: efficiency_ratio(total_created, total_closed_won),
        origins: OriginBreakdown::default(),
    }
}

/// [`cohort_metrics`] plus the origin breakdown of the created set.
pub fn aggregate(
    created: &[Lead],
    won_in_window: &[Lead],
    won_status: &CanonicalId,
    origin_field: &CanonicalId,
) -> AggregationResult {
    let mut result = cohort_metrics(created, won_in_window, won_status);
    result.origins = group_by_origin(&dedup_by_id(created.to_vec()), origin_field);
    result
}

/// Counts leads per origin label in first-encountered order.
fn tally(leads: &[Lead], origin_field: &CanonicalId) -> Vec<(String, usize)> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<(String, usize)> = Vec::new();
    for lead in leads {
        let label = extract_field_value(lead, origin_field);
        match positions.get(&label) {
            Some(&i) => counts[i].1 += 1,
            None => {
                positions.insert(label.clone(), counts.len());
                counts.push((label, 1));
            }
        }
    }
    counts
}

/// Origin breakdown sorted by count descending; ties keep first-seen order.
pub fn group_by_origin(leads: &[Lead], origin_field: &CanonicalId) -> OriginBreakdown {
    let mut counts = tally(leads, origin_field);
    // sort_by is stable
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    OriginBreakdown(counts)
}

/// Per-origin created/won counts and leads-per-sale.
///
/// Rows exist only for origins with created leads. Won leads from origins
/// absent in the created set are ignored.
pub fn efficiency_by_origin(
    created: &[Lead],
    won: &[Lead],
    origin_field: &CanonicalId,
) -> Vec<OriginEfficiency> {
    let created = dedup_by_id(created.to_vec());
    let won = dedup_by_id(won.to_vec());

    let created_by_origin = group_by_origin(&created, origin_field);
    let won_by_origin: HashMap<String, usize> = tally(&won, origin_field).into_iter().collect();

    created_by_origin
        .iter()
        .map(|(label, count)| {
            let won_count = won_by_origin.get(label).copied().unwrap_or(0);
            let ratio = if won_count > 0 {
                OriginRatio::Value(round2(*count as f64 / won_count as f64))
            } else {
                OriginRatio::NotApplicable
            };
            OriginEfficiency {
                label: label.clone(),
                count: *count,
                won: won_count,
                ratio,
            }
        })
        .collect()
}

/// `part / total` as a percentage with one decimal; 0 when `total` is 0.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(part as f64 / total as f64 * 100.0)
}

pub fn conversion_rate(result: &AggregationResult) -> f64 {
    percentage(result.total_closed_won, result.total_created)
}

/// Won leads per calendar month `(year, month)`, most sales first.
///
/// Uses `closed_at`, falling back to `updated_at`; leads with neither are skipped.
pub fn sales_by_month(won: &[Lead], tz: Tz) -> Vec<((i32, u32), usize)> {
    let won = dedup_by_id(won.to_vec());
    let mut counts: Vec<((i32, u32), usize)> = Vec::new();
    for lead in &won {
        let Some(ts) = lead.closed_at.or(lead.updated_at) else {
            continue;
        };
        let Some(dt) = tz.timestamp_opt(ts, 0).single() else {
            continue;
        };
        let key = (dt.year(), dt.month());
        match counts.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 += 1,
            None => counts.push((key, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ORIGIN: i64 = 10;

    fn lead(id: i64, status: i64, origin: Option<&str>) -> Lead {
        let fields = match origin {
            Some(o) => json!([{"field_id": ORIGIN, "values": [{"value": o}]}]),
            None => json!([]),
        };
        Lead::from_value(json!({
            "id": id,
            "status_id": status,
            "custom_fields_values": fields
        }))
        .unwrap()
    }

    #[test]
    fn test_efficiency_ratio() {
        assert_eq!(efficiency_ratio(25, 5), Ratio::Value(5.0));
        assert_eq!(efficiency_ratio(10, 3), Ratio::Value(3.33));
        assert_eq!(efficiency_ratio(10, 0), Ratio::Infinite);
        assert_eq!(efficiency_ratio(0, 0), Ratio::Infinite);
        assert_eq!(efficiency_ratio(0, 4), Ratio::Value(0.0));
    }

    #[test]
    fn test_ratio_display() {
        assert_eq!(Ratio::Value(5.0).to_string(), "5.0");
        assert_eq!(Ratio::Value(3.33).to_string(), "3.33");
        assert_eq!(Ratio::Infinite.to_string(), "∞");
        assert_eq!(OriginRatio::NotApplicable.to_string(), "N/A");
        assert_eq!(OriginRatio::Value(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_cohort_vs_volume() {
        let won = CanonicalId::from(142);
        let mut created: Vec<Lead> = (1..=22).map(|i| lead(i, 1, None)).collect();
        created.extend((23..=25).map(|i| lead(i, 142, None)));
        let mut won_in_window: Vec<Lead> = (23..=25).map(|i| lead(i, 142, None)).collect();
        won_in_window.extend([lead(100, 142, None), lead(101, 142, None)]);

        let result = cohort_metrics(&created, &won_in_window, &won);
        assert_eq!(result.total_created, 25);
        assert_eq!(result.cohort_won, 3);
        assert_eq!(result.total_closed_won, 5);
        assert_eq!(result.ratio, Ratio::Value(5.0));
        assert!(result.origins.is_empty());
    }

    #[test]
    fn test_status_compared_canonically() {
        let created = vec![
            Lead::from_value(json!({"id": 1, "status_id": "142"})).unwrap(),
            Lead::from_value(json!({"id": 2, "status_id": 142})).unwrap(),
        ];
        let result = cohort_metrics(&created, &[], &CanonicalId::from("142"));
        assert_eq!(result.cohort_won, 2);
        assert_eq!(result.ratio, Ratio::Infinite);
    }

    #[test]
    fn test_duplicates_are_counted_once() {
        let won = CanonicalId::from(142);
        let created = vec![lead(1, 142, None), lead(1, 142, None), lead(2, 1, None)];
        let won_leads = vec![lead(1, 142, None), lead(1, 142, None)];
        let result = aggregate(&created, &won_leads, &won, &CanonicalId::from(ORIGIN));
        assert_eq!(result.total_created, 2);
        assert_eq!(result.cohort_won, 1);
        assert_eq!(result.total_closed_won, 1);
        assert_eq!(result.origins.total(), 2);
    }

    #[test]
    fn test_group_by_origin_is_stable_by_count() {
        let leads = vec![
            lead(1, 1, Some("Google")),
            lead(2, 1, Some("Instagram")),
            lead(3, 1, None),
            lead(4, 1, Some("Instagram")),
            lead(5, 1, Some("Google")),
            lead(6, 1, Some("Site")),
        ];
        let breakdown = group_by_origin(&leads, &CanonicalId::from(ORIGIN));
        assert_eq!(
            breakdown.0,
            vec![
                ("Google".to_string(), 2),
                ("Instagram".to_string(), 2),
                ("Unknown".to_string(), 1),
                ("Site".to_string(), 1),
            ]
        );
        assert_eq!(breakdown.total(), leads.len());
        assert_eq!(breakdown.count_of("Unknown"), 1);
        assert_eq!(breakdown.count_of("Missing"), 0);
    }

    #[test]
    fn test_efficiency_by_origin() {
        let created = vec![
            lead(1, 1, Some("Google")),
            lead(2, 1, Some("Google")),
            lead(3, 1, Some("Google")),
            lead(4, 1, Some("Instagram")),
        ];
        let won = vec![lead(1, 142, Some("Google")), lead(50, 142, Some("Indicação"))];
        let rows = efficiency_by_origin(&created, &won, &CanonicalId::from(ORIGIN));

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].label, "Google");
        assert_eq!(rows[0].count, 3);
        assert_eq!(rows[0].won, 1);
        assert_eq!(rows[0].ratio, OriginRatio::Value(3.0));
        assert_eq!(rows[1].label, "Instagram");
        assert_eq!(rows[1].ratio, OriginRatio::NotApplicable);
        assert!(!rows.iter().any(|r| r.label == "Indicação"));
    }

    #[test]
    fn test_percentage_with_zero_total() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(percentage(1, 3), 33.3);
        let empty = cohort_metrics(&[], &[], &CanonicalId::from(142));
        assert_eq!(conversion_rate(&empty), 0.0);
        assert_eq!(empty.ratio, Ratio::Infinite);
    }

    #[test]
    fn test_sales_by_month() {
        let tz: Tz = "America/Sao_Paulo".parse().unwrap();
        // 2024-03-10 and 2024-03-20 UTC, then 2024-01-31 23:30 local (02:30 UTC Feb 1)
        let leads = vec![
            Lead::from_value(json!({"id": 1, "closed_at": 1710072000})).unwrap(),
            Lead::from_value(json!({"id": 2, "updated_at": 1710936000})).unwrap(),
            Lead::from_value(json!({"id": 3, "closed_at": 1706754600})).unwrap(),
            Lead::from_value(json!({"id": 4})).unwrap(),
        ];
        let months = sales_by_month(&leads, tz);
        assert_eq!(months, vec![((2024, 3), 2), ((2024, 1), 1)]);
    }
}
