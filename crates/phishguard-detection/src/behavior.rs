//! Behavioral anomaly detection against a sender's baseline.
//!
//! Compares the current message to the sender's established posting habits:
//! send hour, message length, URL sharing, emoji usage. An absent or
//! insufficient baseline produces no deviations at all — anomalies are never
//! fabricated against an empty history.

use chrono::{DateTime, Timelike, Utc};
use phishguard_core::{AnomalyKind, BaselineSnapshot, BehavioralAnomaly};
use regex::Regex;

/// Hours of circular distance before a send time counts as unusual.
const TIME_ANOMALY_THRESHOLD: u32 = 2;
/// Standard deviations before a message length counts as unusual.
const LENGTH_DEVIATION_THRESHOLD: f64 = 2.0;
/// Relative difference before emoji usage counts as unusual.
const STYLE_DEVIATION_THRESHOLD: f64 = 0.3;
/// Observed messages required before a first-time URL is meaningful.
const FIRST_URL_MIN_MESSAGES: u64 = 10;

/// Detects deviations from a sender's baseline behavior.
pub struct BehaviorAnalyzer {
    emoji_pattern: Regex,
}

impl Default for BehaviorAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl BehaviorAnalyzer {
    pub fn new() -> Self {
        let emoji_pattern = Regex::new(
            "[\u{1F600}-\u{1F64F}\u{1F300}-\u{1F5FF}\u{1F680}-\u{1F6FF}\u{1F1E0}-\u{1F1FF}\u{2702}-\u{27B0}\u{1F900}-\u{1F9FF}]",
        )
        .expect("invalid emoji pattern");
        Self { emoji_pattern }
    }

    /// Run every anomaly check. Returns nothing when the baseline has fewer
    /// than `min_messages` observations.
    #[must_use]
    pub fn analyze_all(
        &self,
        text: &str,
        sent_at: DateTime<Utc>,
        has_url: bool,
        baseline: Option<&BaselineSnapshot>,
        min_messages: u64,
    ) -> Vec<BehavioralAnomaly> {
        let Some(baseline) = baseline else {
            return Vec::new();
        };
        if !baseline.is_sufficient(min_messages) {
            return Vec::new();
        }

        let mut anomalies = Vec::new();

        if let Some(anomaly) =
            check_time_anomaly(sent_at.hour(), &baseline.typical_hours)
        {
            anomalies.push(anomaly);
        }

        if let Some(anomaly) = check_length_anomaly(
            text.chars().count() as f64,
            baseline.avg_message_length,
            baseline.length_std_dev,
        ) {
            anomalies.push(anomaly);
        }

        if let Some(anomaly) = check_first_time_url(
            has_url,
            baseline.url_sharing_rate,
            baseline.total_messages,
        ) {
            anomalies.push(anomaly);
        }

        let current_rate = self.emoji_rate(text);
        if let Some(anomaly) = check_emoji_anomaly(current_rate, baseline.emoji_rate) {
            anomalies.push(anomaly);
        }

        anomalies
    }

    /// Emoji characters per text character.
    #[must_use]
    pub fn emoji_rate(&self, text: &str) -> f64 {
        let total = text.chars().count();
        if total == 0 {
            return 0.0;
        }
        let emoji = self.emoji_pattern.find_iter(text).count();
        emoji as f64 / total as f64
    }
}

/// Unusual send hour: the circular distance to the nearest typical hour is
/// at least two hours.
#[must_use]
pub fn check_time_anomaly(message_hour: u32, typical_hours: &[u8]) -> Option<BehavioralAnomaly> {
    if typical_hours.is_empty() {
        return None;
    }
    if typical_hours.iter().any(|h| u32::from(*h) == message_hour) {
        return None;
    }

    let min_distance = typical_hours
        .iter()
        .map(|h| {
            let diff = message_hour.abs_diff(u32::from(*h));
            diff.min(24 - diff)
        })
        .min()?;

    if min_distance < TIME_ANOMALY_THRESHOLD {
        return None;
    }

    Some(BehavioralAnomaly {
        kind: AnomalyKind::TimeAnomaly,
        description: format!("Message sent at unusual hour ({message_hour}:00)"),
        deviation_score: (min_distance as f64 / 12.0).min(1.0),
        baseline_value: format!("{typical_hours:?}"),
        current_value: message_hour.to_string(),
    })
}

/// Message length more than two standard deviations from the baseline mean.
/// When the deviation is unknown, 30% of the mean stands in for it.
#[must_use]
pub fn check_length_anomaly(
    message_length: f64,
    avg_length: f64,
    std_dev: Option<f64>,
) -> Option<BehavioralAnomaly> {
    if avg_length <= 0.0 {
        return None;
    }
    let std_dev = match std_dev {
        Some(sd) if sd > 0.0 => sd,
        _ => avg_length * 0.3,
    };

    let z_score = (message_length - avg_length).abs() / std_dev;
    if z_score < LENGTH_DEVIATION_THRESHOLD {
        return None;
    }

    let direction = if message_length > avg_length {
        "longer"
    } else {
        "shorter"
    };
    Some(BehavioralAnomaly {
        kind: AnomalyKind::LengthAnomaly,
        description: format!("Message is significantly {direction} than usual"),
        deviation_score: (z_score / 5.0).min(1.0),
        baseline_value: format!("{avg_length:.0}"),
        current_value: format!("{message_length:.0}"),
    })
}

/// First URL ever from a sender with a meaningful history.
#[must_use]
pub fn check_first_time_url(
    has_url: bool,
    url_sharing_rate: f64,
    total_messages: u64,
) -> Option<BehavioralAnomaly> {
    if !has_url {
        return None;
    }
    if url_sharing_rate != 0.0 || total_messages < FIRST_URL_MIN_MESSAGES {
        return None;
    }

    Some(BehavioralAnomaly {
        kind: AnomalyKind::FirstTimeUrl,
        description: "Sender sharing a URL for the first time".to_string(),
        deviation_score: 0.7,
        baseline_value: "0".to_string(),
        current_value: "1".to_string(),
    })
}

/// Emoji usage relative difference of at least 30% against the baseline.
#[must_use]
pub fn check_emoji_anomaly(
    current_rate: f64,
    baseline_rate: f64,
) -> Option<BehavioralAnomaly> {
    if baseline_rate == 0.0 && current_rate == 0.0 {
        return None;
    }

    let diff = if baseline_rate == 0.0 {
        current_rate
    } else {
        (current_rate - baseline_rate).abs() / baseline_rate.max(0.01)
    };

    if diff < STYLE_DEVIATION_THRESHOLD {
        return None;
    }

    Some(BehavioralAnomaly {
        kind: AnomalyKind::EmojiAnomaly,
        description: "Unusual emoji usage pattern".to_string(),
        deviation_score: diff.min(1.0),
        baseline_value: format!("{baseline_rate:.3}"),
        current_value: format!("{current_rate:.3}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn baseline() -> BaselineSnapshot {
        BaselineSnapshot {
            avg_message_length: 100.0,
            length_std_dev: Some(20.0),
            typical_hours: vec![9, 10, 11, 14, 15],
            url_sharing_rate: 0.2,
            emoji_rate: 0.02,
            total_messages: 50,
        }
    }

    #[test]
    fn typical_hour_is_not_anomalous() {
        assert!(check_time_anomaly(10, &[9, 10, 11]).is_none());
    }

    #[test]
    fn adjacent_hour_is_below_threshold() {
        // Distance 1 < threshold 2.
        assert!(check_time_anomaly(12, &[11]).is_none());
    }

    #[test]
    fn distant_hour_is_anomalous_with_scaled_score() {
        let anomaly = check_time_anomaly(3, &[9, 10, 11]).unwrap();
        assert_eq!(anomaly.kind, AnomalyKind::TimeAnomaly);
        // Nearest typical hour is 9, distance 6 -> 6/12 = 0.5.
        assert!((anomaly.deviation_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn circular_hour_distance_wraps_midnight() {
        // 23:00 against a 01:00 habit is distance 2, not 22.
        let anomaly = check_time_anomaly(23, &[1]).unwrap();
        assert!((anomaly.deviation_score - (2.0 / 12.0)).abs() < 1e-9);
    }

    #[test]
    fn empty_typical_hours_yields_nothing() {
        assert!(check_time_anomaly(3, &[]).is_none());
    }

    #[test]
    fn length_within_two_sigma_is_normal() {
        assert!(check_length_anomaly(130.0, 100.0, Some(20.0)).is_none());
    }

    #[test]
    fn length_beyond_two_sigma_is_anomalous() {
        let anomaly = check_length_anomaly(200.0, 100.0, Some(20.0)).unwrap();
        assert_eq!(anomaly.kind, AnomalyKind::LengthAnomaly);
        // z = 5 -> score capped at 1.0.
        assert_eq!(anomaly.deviation_score, 1.0);
    }

    #[test]
    fn length_sigma_falls_back_to_thirty_percent_of_mean() {
        // sigma = 30, z = 90/30 = 3 -> score 0.6.
        let anomaly = check_length_anomaly(190.0, 100.0, None).unwrap();
        assert!((anomaly.deviation_score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn zero_average_length_yields_nothing() {
        assert!(check_length_anomaly(50.0, 0.0, None).is_none());
    }

    #[test]
    fn first_time_url_requires_history() {
        assert!(check_first_time_url(true, 0.0, 9).is_none());
        let anomaly = check_first_time_url(true, 0.0, 10).unwrap();
        assert_eq!(anomaly.deviation_score, 0.7);
    }

    #[test]
    fn url_sharer_never_triggers_first_time_url() {
        assert!(check_first_time_url(true, 0.2, 100).is_none());
        assert!(check_first_time_url(false, 0.0, 100).is_none());
    }

    #[test]
    fn emoji_rate_counts_emoji_per_char() {
        let analyzer = BehaviorAnalyzer::new();
        assert_eq!(analyzer.emoji_rate(""), 0.0);
        assert_eq!(analyzer.emoji_rate("halo"), 0.0);
        let rate = analyzer.emoji_rate("ok \u{1F600}");
        assert!(rate > 0.0);
    }

    #[test]
    fn emoji_anomaly_relative_difference() {
        // baseline 0.02, current 0.2 -> diff = 0.18/0.02 = 9 -> capped 1.0.
        let anomaly = check_emoji_anomaly(0.2, 0.02).unwrap();
        assert_eq!(anomaly.deviation_score, 1.0);

        // Small relative difference stays quiet.
        assert!(check_emoji_anomaly(0.021, 0.02).is_none());

        // Both zero: nothing to compare.
        assert!(check_emoji_anomaly(0.0, 0.0).is_none());
    }

    #[test]
    fn no_baseline_produces_no_anomalies() {
        let analyzer = BehaviorAnalyzer::new();
        let sent_at = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();
        let anomalies = analyzer.analyze_all("x".repeat(500).as_str(), sent_at, true, None, 5);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn insufficient_baseline_produces_no_anomalies() {
        let analyzer = BehaviorAnalyzer::new();
        let thin = BaselineSnapshot {
            total_messages: 3,
            ..baseline()
        };
        let sent_at = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();
        let anomalies =
            analyzer.analyze_all("x".repeat(500).as_str(), sent_at, true, Some(&thin), 5);
        assert!(anomalies.is_empty());
    }

    #[test]
    fn full_analysis_detects_multiple_anomalies() {
        let analyzer = BehaviorAnalyzer::new();
        let sent_at = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();
        let long_text = "x".repeat(500);
        let anomalies = analyzer.analyze_all(&long_text, sent_at, false, Some(&baseline()), 5);

        let kinds: Vec<AnomalyKind> = anomalies.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&AnomalyKind::TimeAnomaly));
        assert!(kinds.contains(&AnomalyKind::LengthAnomaly));
        assert!(!kinds.contains(&AnomalyKind::FirstTimeUrl));
    }
}
