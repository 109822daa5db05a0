//! Patient notifications derived from the latest reading and prescriptions.

use crate::risk::{self, RiskTier};
use crate::{Prescription, Reading};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
}

/// Build the alert list for one patient, most severe first.
///
/// A missing reading produces no reading alert; it never suppresses the
/// prescription alert.
pub fn build_alerts(latest: Option<&Reading>, prescriptions: &[Prescription]) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if let Some(reading) = latest {
        match risk::classify(reading) {
            RiskTier::Critical => alerts.push(Alert {
                level: AlertLevel::Critical,
                message: format!(
                    "Critical reading: blood pressure {}/{}, glucose {:.1} mmol/L. Contact your clinician.",
                    reading.systolic, reading.diastolic, reading.glucose
                ),
            }),
            RiskTier::Warning => alerts.push(Alert {
                level: AlertLevel::Warning,
                message: format!(
                    "Elevated reading: blood pressure {}/{}, glucose {:.1} mmol/L.",
                    reading.systolic, reading.diastolic, reading.glucose
                ),
            }),
            RiskTier::Stable => {}
        }
    }

    let missed: Vec<&str> = prescriptions
        .iter()
        .filter(|p| !p.was_taken)
        .map(|p| p.drug.as_str())
        .collect();
    if !missed.is_empty() {
        alerts.push(Alert {
            level: AlertLevel::Warning,
            message: format!("Missed medication: {}", missed.join(", ")),
        });
    }

    alerts.sort_by(|a, b| b.level.cmp(&a.level));
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(systolic: u16, glucose: f64) -> Reading {
        Reading {
            subject_id: "p-1".into(),
            glucose,
            systolic,
            diastolic: 85,
            pulse: 70,
            weight: 80.0,
            timestamp: Utc::now(),
            note: None,
        }
    }

    fn prescription(drug: &str, was_taken: bool) -> Prescription {
        Prescription {
            id: drug.to_lowercase(),
            subject_id: "p-1".into(),
            drug: drug.into(),
            was_taken,
        }
    }

    #[test]
    fn test_stable_reading_and_taken_meds_is_quiet() {
        let alerts = build_alerts(Some(&reading(120, 5.0)), &[prescription("Metformin", true)]);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_critical_reading_comes_first() {
        let alerts = build_alerts(
            Some(&reading(170, 5.0)),
            &[prescription("Metformin", false), prescription("Lisinopril", true)],
        );
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(alerts[1].message, "Missed medication: Metformin");
    }

    #[test]
    fn test_warning_reading() {
        let alerts = build_alerts(Some(&reading(120, 8.0)), &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
    }

    #[test]
    fn test_no_data_keeps_medication_alert() {
        let alerts = build_alerts(None, &[prescription("Metformin", false)]);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message.contains("Metformin"));

        assert!(build_alerts(None, &[]).is_empty());
    }
}
