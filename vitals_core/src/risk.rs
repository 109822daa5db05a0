//! Risk classification of biometric readings.
//!
//! Classification is a pure function of a single reading, so the patient
//! self-view and the clinician cohort summary always agree:
//!
//! 1. **Critical**: systolic > 160 mmHg or glucose > 10 mmol/L
//! 2. **Warning**: systolic > 140 mmHg or glucose > 7 mmol/L
//! 3. **Stable**: everything else
//!
//! A subject with no reading at all is `RiskAssessment::NoData`, which is a
//! different type from any tier and can never be read as stable.

use crate::{Prescription, Reading};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CRITICAL_SYSTOLIC: u16 = 160;
const CRITICAL_GLUCOSE: f64 = 10.0;
const WARNING_SYSTOLIC: u16 = 140;
const WARNING_GLUCOSE: f64 = 7.0;

/// Severity tier derived from a reading
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Stable,
    Warning,
    Critical,
}

/// Outcome of assessing a subject's latest reading, if any
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RiskAssessment {
    NoData,
    Assessed(RiskTier),
}

impl RiskAssessment {
    pub fn tier(&self) -> Option<RiskTier> {
        match self {
            RiskAssessment::NoData => None,
            RiskAssessment::Assessed(tier) => Some(*tier),
        }
    }
}

impl std::fmt::Display for RiskAssessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskAssessment::NoData => write!(f, "no data"),
            RiskAssessment::Assessed(RiskTier::Stable) => write!(f, "stable"),
            RiskAssessment::Assessed(RiskTier::Warning) => write!(f, "warning"),
            RiskAssessment::Assessed(RiskTier::Critical) => write!(f, "critical"),
        }
    }
}

/// Classify a single reading
pub fn classify(reading: &Reading) -> RiskTier {
    if reading.systolic > CRITICAL_SYSTOLIC || reading.glucose > CRITICAL_GLUCOSE {
        RiskTier::Critical
    } else if reading.systolic > WARNING_SYSTOLIC || reading.glucose > WARNING_GLUCOSE {
        RiskTier::Warning
    } else {
        RiskTier::Stable
    }
}

/// Assess the most recent reading for a subject, if there is one
pub fn assess(latest: Option<&Reading>) -> RiskAssessment {
    match latest {
        Some(reading) => RiskAssessment::Assessed(classify(reading)),
        None => RiskAssessment::NoData,
    }
}

/// Most recent reading in a slice, by timestamp
pub fn latest(readings: &[Reading]) -> Option<&Reading> {
    readings.iter().max_by_key(|r| r.timestamp)
}

/// Latest reading per subject.
///
/// Subjects listed in `roster` with no reading still appear, so they
/// surface as `NoData` rather than disappearing from the cohort.
pub fn latest_by_subject<'a>(
    roster: &[String],
    readings: &'a [Reading],
) -> HashMap<String, Option<&'a Reading>> {
    let mut latest: HashMap<String, Option<&'a Reading>> =
        roster.iter().map(|s| (s.clone(), None)).collect();

    for reading in readings {
        let slot = latest.entry(reading.subject_id.clone()).or_insert(None);
        match *slot {
            Some(current) if current.timestamp >= reading.timestamp => {}
            _ => *slot = Some(reading),
        }
    }

    latest
}

// ============================================================================
// Cohort Summary
// ============================================================================

/// Taken and missed medication counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Adherence {
    pub taken: usize,
    pub missed: usize,
}

impl Adherence {
    pub fn record(&mut self, prescription: &Prescription) {
        if prescription.was_taken {
            self.taken += 1;
        } else {
            self.missed += 1;
        }
    }
}

/// Risk counts across a clinician's cohort
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CohortSummary {
    pub critical: usize,
    pub warning: usize,
    pub stable: usize,
    pub no_data: usize,
    /// Medication adherence of the same subjects
    pub adherence: Adherence,
}

impl CohortSummary {
    pub fn total(&self) -> usize {
        self.critical + self.warning + self.stable + self.no_data
    }

    fn record(&mut self, assessment: RiskAssessment) {
        match assessment {
            RiskAssessment::NoData => self.no_data += 1,
            RiskAssessment::Assessed(RiskTier::Stable) => self.stable += 1,
            RiskAssessment::Assessed(RiskTier::Warning) => self.warning += 1,
            RiskAssessment::Assessed(RiskTier::Critical) => self.critical += 1,
        }
    }
}

/// One row of the cohort list
#[derive(Clone, Debug)]
pub struct CohortEntry<'a> {
    pub subject_id: String,
    pub latest: Option<&'a Reading>,
    pub assessment: RiskAssessment,
}

/// Assess every subject in the cohort, most severe first
pub fn assess_cohort<'a>(roster: &[String], readings: &'a [Reading]) -> Vec<CohortEntry<'a>> {
    let mut entries: Vec<_> = latest_by_subject(roster, readings)
        .into_iter()
        .map(|(subject_id, latest)| CohortEntry {
            subject_id,
            latest,
            assessment: assess(latest),
        })
        .collect();

    // Critical, Warning, Stable, then NoData; ties by subject for stable output
    entries.sort_by(|a, b| {
        severity(b.assessment)
            .cmp(&severity(a.assessment))
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });
    entries
}

fn severity(assessment: RiskAssessment) -> u8 {
    match assessment {
        RiskAssessment::NoData => 0,
        RiskAssessment::Assessed(RiskTier::Stable) => 1,
        RiskAssessment::Assessed(RiskTier::Warning) => 2,
        RiskAssessment::Assessed(RiskTier::Critical) => 3,
    }
}

/// Count tiers across cohort entries
pub fn summarize(entries: &[CohortEntry<'_>]) -> CohortSummary {
    let mut summary = CohortSummary::default();
    for entry in entries {
        summary.record(entry.assessment);
    }
    summary
}

/// Adherence over the prescriptions of subjects in the cohort
pub fn cohort_adherence(entries: &[CohortEntry<'_>], prescriptions: &[Prescription]) -> Adherence {
    let mut adherence = Adherence::default();
    for prescription in prescriptions
        .iter()
        .filter(|p| entries.iter().any(|e| e.subject_id == p.subject_id))
    {
        adherence.record(prescription);
    }
    adherence
}

/// Keep entries matching `assessment` (all when None) whose subject
/// contains `search`, ignoring case
pub fn filter_cohort<'a, 'b>(
    entries: &'b [CohortEntry<'a>],
    assessment: Option<RiskAssessment>,
    search: &str,
) -> Vec<&'b CohortEntry<'a>> {
    let needle = search.to_lowercase();
    entries
        .iter()
        .filter(|e| assessment.map_or(true, |a| e.assessment == a))
        .filter(|e| needle.is_empty() || e.subject_id.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn reading(subject: &str, systolic: u16, glucose: f64, minutes: i64) -> Reading {
        Reading {
            subject_id: subject.into(),
            glucose,
            systolic,
            diastolic: 80,
            pulse: 70,
            weight: 70.0,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
                + Duration::minutes(minutes),
            note: None,
        }
    }

    #[test]
    fn test_thresholds_are_strict() {
        assert_eq!(classify(&reading("a", 160, 5.0, 0)), RiskTier::Warning);
        assert_eq!(classify(&reading("a", 161, 5.0, 0)), RiskTier::Critical);
        assert_eq!(classify(&reading("a", 140, 7.0, 0)), RiskTier::Stable);
        assert_eq!(classify(&reading("a", 141, 5.0, 0)), RiskTier::Warning);
        assert_eq!(classify(&reading("a", 120, 7.1, 0)), RiskTier::Warning);
        assert_eq!(classify(&reading("a", 120, 10.0, 0)), RiskTier::Warning);
        assert_eq!(classify(&reading("a", 120, 10.5, 0)), RiskTier::Critical);
    }

    #[test]
    fn test_either_measure_escalates() {
        // Normal pressure does not mask critical glucose
        assert_eq!(classify(&reading("a", 110, 12.0, 0)), RiskTier::Critical);
        assert_eq!(classify(&reading("a", 175, 5.0, 0)), RiskTier::Critical);
    }

    #[test]
    fn test_every_reading_gets_exactly_one_tier() {
        for systolic in (80..=200).step_by(5) {
            for tenth in (30..=150).step_by(5) {
                let glucose = tenth as f64 / 10.0;
                let tier = classify(&reading("a", systolic, glucose, 0));
                let expected = if systolic > 160 || glucose > 10.0 {
                    RiskTier::Critical
                } else if systolic > 140 || glucose > 7.0 {
                    RiskTier::Warning
                } else {
                    RiskTier::Stable
                };
                assert_eq!(tier, expected, "systolic={} glucose={}", systolic, glucose);
            }
        }
    }

    #[test]
    fn test_absent_reading_is_no_data_not_stable() {
        assert_eq!(assess(None), RiskAssessment::NoData);
        assert_ne!(assess(None), RiskAssessment::Assessed(RiskTier::Stable));
        assert_eq!(assess(None).tier(), None);
    }

    #[test]
    fn test_classification_independent_of_call_order() {
        let readings = vec![
            reading("a", 170, 5.0, 0),
            reading("b", 120, 5.0, 0),
            reading("c", 150, 5.0, 0),
        ];
        let forward: Vec<_> = readings.iter().map(classify).collect();
        let mut backward: Vec<_> = readings.iter().rev().map(classify).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_latest_by_subject_uses_newest_reading() {
        let readings = vec![
            reading("a", 170, 5.0, 10),
            reading("a", 120, 5.0, 0),
            reading("b", 150, 5.0, 5),
        ];
        let latest = latest_by_subject(&[], &readings);
        assert_eq!(latest["a"].unwrap().systolic, 170);
        assert_eq!(latest["b"].unwrap().systolic, 150);
    }

    #[test]
    fn test_cohort_summary_counts_no_data_separately() {
        let roster = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let readings = vec![
            reading("a", 170, 5.0, 0),
            reading("b", 150, 5.0, 0),
            reading("c", 120, 5.0, 0),
        ];

        let entries = assess_cohort(&roster, &readings);
        let summary = summarize(&entries);

        assert_eq!(
            summary,
            CohortSummary {
                critical: 1,
                warning: 1,
                stable: 1,
                no_data: 1,
                adherence: Adherence::default(),
            }
        );
        assert_eq!(summary.total(), 4);
        assert_eq!(entries[0].subject_id, "a");
        assert_eq!(entries[3].subject_id, "d");
    }

    #[test]
    fn test_filter_cohort_by_tier_and_search() {
        let readings = vec![
            reading("anna@example.com", 170, 5.0, 0),
            reading("boris@example.com", 165, 5.0, 0),
            reading("carl@example.com", 120, 5.0, 0),
        ];
        let entries = assess_cohort(&[], &readings);

        let critical = filter_cohort(
            &entries,
            Some(RiskAssessment::Assessed(RiskTier::Critical)),
            "",
        );
        assert_eq!(critical.len(), 2);

        let anna = filter_cohort(&entries, None, "ANNA");
        assert_eq!(anna.len(), 1);
        assert_eq!(anna[0].subject_id, "anna@example.com");
    }

    #[test]
    fn test_adherence_only_counts_cohort_subjects() {
        let roster = vec!["a".to_string(), "b".to_string()];
        let readings = vec![reading("a", 120, 5.0, 0)];
        let entries = assess_cohort(&roster, &readings);

        let prescription = |subject: &str, was_taken: bool| Prescription {
            id: format!("{}-{}", subject, was_taken),
            subject_id: subject.into(),
            drug: "Metformin".into(),
            was_taken,
        };
        let prescriptions = vec![
            prescription("a", true),
            prescription("a", false),
            prescription("b", true),
            prescription("z", false),
        ];

        assert_eq!(
            cohort_adherence(&entries, &prescriptions),
            Adherence { taken: 2, missed: 1 }
        );
    }
}
