//! Extracts the model's JSON verdict from free-form completion text.
//!
//! Models wrap their JSON in chatter ("Sure! {...} Hope that helps!") often
//! enough that the text is trimmed to the outermost braces before decoding.
//! Decoding of the classification is strict: a missing or mistyped field is
//! an error, never a default.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum VerdictError {
    #[error("malformed verdict: {0}")]
    Malformed(String),
}

/// Indicator flags the prompt asks the model to fill in. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SpamIndicators {
    #[serde(default)]
    pub excessive_caps: bool,
    #[serde(default)]
    pub suspicious_links: bool,
    #[serde(default)]
    pub aggressive_cta: bool,
    #[serde(default)]
    pub unrealistic_promises: bool,
    #[serde(default)]
    pub explanation: String,
}

/// The part of the verdict that drives moderation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Classification {
    pub is_spam: bool,
    /// Percent, 0 to 100.
    pub probability: f64,
    pub reason: String,
}

impl Classification {
    /// The model said "not spam" but with a spam-level probability.
    pub fn is_contradictory(&self, threshold: f64) -> bool {
        !self.is_spam && self.probability >= threshold
    }
}

/// Only `classification` is checked strictly. The descriptive fields are
/// dropped to `None` when missing or oddly shaped.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpamAssessment {
    pub classification: Classification,
    #[serde(default, deserialize_with = "lenient")]
    pub spam_indicators: Option<SpamIndicators>,
    #[serde(default, deserialize_with = "lenient")]
    pub context_usefulness: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub language_features: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Trim the text down to the span between the first `{` and the last `}`.
///
/// Each side is cut only when the text doesn't already start (end) with a
/// brace and a brace exists to cut to, so clean JSON comes back unchanged.
pub fn sanitize(raw: &str) -> &str {
    let mut text = raw.trim();
    if !text.starts_with('{')
        && let Some(idx) = text.find('{')
    {
        text = &text[idx..];
    }
    if !text.ends_with('}')
        && let Some(idx) = text.rfind('}')
    {
        text = &text[..=idx];
    }
    text
}

/// Sanitize and strictly decode the model's output.
pub fn parse_verdict(raw: &str) -> Result<SpamAssessment, VerdictError> {
    let cleaned = sanitize(raw);
    debug!("Sanitized verdict: {cleaned}");

    let assessment: SpamAssessment =
        serde_json::from_str(cleaned).map_err(|e| VerdictError::Malformed(e.to_string()))?;

    let probability = assessment.classification.probability;
    if !(0.0..=100.0).contains(&probability) {
        return Err(VerdictError::Malformed(format!(
            "probability {probability} is outside 0..=100"
        )));
    }

    Ok(assessment)
}
