//! Lenient parsing of structured model output.
//!
//! Providers occasionally wrap JSON in markdown fences, prepend commentary,
//! leave trailing commas, or answer with a bare label. These helpers keep
//! parsing tolerant so classifiers and agents fall back to safe defaults
//! instead of crashing.

use once_cell::sync::Lazy;
use phishguard_core::{Label, Stance};
use regex::Regex;
use serde_json::Value;

static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^```(?:json)?\s*").expect("invalid fence pattern"));
static FENCE_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*```$").expect("invalid fence pattern"));
static BARE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(PHISHING|SUSPICIOUS|LEGITIMATE|SAFE|AMAN|MENCURIGAKAN|PENIPUAN)\b(?:\s*[\-:,(].*)?$",
    )
    .expect("invalid label pattern")
});
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("invalid comma pattern"));
static KV_CLASSIFICATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:classification|klasifikasi)\b\s*[:=]\s*"?\s*(SAFE|SUSPICIOUS|PHISHING|AMAN|MENCURIGAKAN|PENIPUAN)\b"#,
    )
    .expect("invalid classification pattern")
});
static KV_STANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(?:stance|verdict|putusan)\b\s*[:=]\s*"?\s*(PHISHING|SUSPICIOUS|LEGITIMATE|SAFE|AMAN|MENCURIGAKAN|PENIPUAN)\b"#,
    )
    .expect("invalid stance pattern")
});
static KV_CONFIDENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:confidence|keyakinan)\b\s*[:=]?\s*\x22?\s*([0-9]+(?:\.[0-9]+)?)\s*%?")
        .expect("invalid confidence pattern")
});

/// Strip a leading/trailing markdown code fence, if present.
#[must_use]
pub fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    FENCE_CLOSE
        .replace(&FENCE_OPEN.replace(trimmed, ""), "")
        .trim()
        .to_string()
}

/// Best-effort extraction of a JSON object from a model reply.
///
/// Attempts, in order: a bare classification/stance label on the first line,
/// strict parsing of the whole text, strict parsing of the outermost brace
/// span, trailing-comma repair on both, and finally conservative key-value
/// extraction for the few fields the pipeline uses.
#[must_use]
pub fn parse_json_object(raw: &str) -> Option<Value> {
    let text = strip_fences(raw);
    if text.is_empty() {
        return None;
    }

    // Small models sometimes answer with just the label.
    if let Some(first_line) = text.lines().next() {
        if let Some(captures) = BARE_LABEL.captures(first_line.trim()) {
            return Some(bare_label_payload(&captures[1]));
        }
    }

    let mut candidates = vec![text.clone()];
    if let (Some(open), Some(close)) = (text.find('{'), text.rfind('}')) {
        if close > open {
            candidates.push(text[open..=close].to_string());
        }
    }

    for candidate in &candidates {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Some(Value::Object(map));
        }
        let repaired = TRAILING_COMMA.replace_all(candidate, "$1");
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&repaired) {
            return Some(Value::Object(map));
        }
    }

    extract_key_values(&text)
}

/// Payload for a bare-label reply: both classification and stance forms.
fn bare_label_payload(raw: &str) -> Value {
    let mut map = serde_json::Map::new();
    if let Some(label) = normalize_label(raw) {
        map.insert(
            "classification".to_string(),
            Value::String(label.to_string()),
        );
    }
    let stance = normalize_stance(Some(raw));
    map.insert("stance".to_string(), Value::String(stance.to_string()));
    Value::Object(map)
}

/// Conservative key-value extraction for providers that ignore "JSON only"
/// instructions. Only the fields the pipeline actually reads.
fn extract_key_values(text: &str) -> Option<Value> {
    let mut map = serde_json::Map::new();

    if let Some(captures) = KV_CLASSIFICATION.captures(text) {
        if let Some(label) = normalize_label(&captures[1]) {
            map.insert(
                "classification".to_string(),
                Value::String(label.to_string()),
            );
        }
    }

    if let Some(captures) = KV_STANCE.captures(text) {
        map.insert(
            "stance".to_string(),
            Value::String(normalize_stance(Some(&captures[1])).to_string()),
        );
    }

    if let Some(captures) = KV_CONFIDENCE.captures(text) {
        if let Ok(value) = captures[1].parse::<f64>() {
            map.insert(
                "confidence".to_string(),
                Value::from(normalize_confidence(Some(&Value::from(value)))),
            );
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

/// Normalise a stance string across languages and near-miss aliases.
/// Unrecognised input defaults to `Suspicious`.
#[must_use]
pub fn normalize_stance(raw: Option<&str>) -> Stance {
    let Some(raw) = raw else {
        return Stance::Suspicious;
    };
    match raw.trim().to_uppercase().as_str() {
        "PHISHING" | "SCAM" | "MALICIOUS" | "PENIPUAN" | "BERBAHAYA" => Stance::Phishing,
        "LEGITIMATE" | "LEGIT" | "SAFE" | "NORMAL" | "AMAN" => Stance::Legitimate,
        _ => Stance::Suspicious,
    }
}

/// Normalise a classification label. Unrecognised input yields `None` so the
/// caller can apply its own default.
#[must_use]
pub fn normalize_label(raw: &str) -> Option<Label> {
    match raw.trim().to_uppercase().as_str() {
        "SAFE" | "AMAN" | "LEGIT" | "LEGITIMATE" => Some(Label::Safe),
        "SUSPICIOUS" | "MENCURIGAKAN" => Some(Label::Suspicious),
        "PHISHING" | "SCAM" | "PENIPUAN" | "BERBAHAYA" | "MALICIOUS" => Some(Label::Phishing),
        _ => None,
    }
}

/// Normalise a confidence value: accepts numbers or numeric strings, rescales
/// percentage-style values (85 -> 0.85), clamps to [0, 1], defaults to 0.5.
#[must_use]
pub fn normalize_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.5),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().unwrap_or(0.5),
        _ => 0.5,
    };
    let scaled = if raw > 1.0 && raw <= 100.0 {
        raw / 100.0
    } else {
        raw
    };
    scaled.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
