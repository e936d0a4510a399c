use std::collections::HashSet;

use crate::config::FilterConfig;

/// Why a transcript was suppressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Engine returned no usable text
    Empty,
    /// Engine confidence below the rejection floor
    LowConfidence,
    /// Known spurious phrase over near-silent audio
    BlocklistedLowEnergy,
    /// Exact repeat of the previous accepted transcript
    Repetition,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Empty => "empty",
            RejectReason::LowConfidence => "low-confidence",
            RejectReason::BlocklistedLowEnergy => "blocklisted-low-energy",
            RejectReason::Repetition => "repetition",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectReason),
}

/// Post-inference gate against Whisper's favorite inventions.
///
/// Generative transcription models reliably produce phrases like
/// "thank you" from near-silent input. The filter rejects low-confidence
/// results, blocklisted phrases over low-energy audio (a genuinely spoken
/// "thank you" carries real energy and passes), and verbatim repeats of
/// the immediately preceding accepted text.
pub struct HallucinationFilter {
    blocklist: HashSet<String>,
    confidence_floor: f32,
    low_energy_threshold: f32,
    last_accepted: Option<String>,
}

impl HallucinationFilter {
    pub fn new(config: &FilterConfig) -> Self {
        HallucinationFilter {
            blocklist: config.blocklist.iter().map(|p| normalize(p)).collect(),
            confidence_floor: config.confidence_floor,
            low_energy_threshold: config.low_energy_threshold,
            last_accepted: None,
        }
    }

    /// Judge one transcript. Consumes the result exactly once: an accepted
    /// text becomes the new repetition reference, a rejected one leaves
    /// state untouched.
    pub fn evaluate(&mut self, text: &str, confidence: f32, peak_energy: f32) -> Verdict {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Verdict::Rejected(RejectReason::Empty);
        }

        if confidence < self.confidence_floor {
            return Verdict::Rejected(RejectReason::LowConfidence);
        }

        if peak_energy < self.low_energy_threshold && self.blocklist.contains(&normalized) {
            return Verdict::Rejected(RejectReason::BlocklistedLowEnergy);
        }

        if self.last_accepted.as_deref() == Some(normalized.as_str()) {
            return Verdict::Rejected(RejectReason::Repetition);
        }

        self.last_accepted = Some(normalized);
        Verdict::Accepted
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

/// Lowercase, strip punctuation, collapse whitespace - so "Thank you."
/// and " thank  you" compare equal against the blocklist.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in c.to_lowercase() {
                out.push(lower);
            }
        } else if c.is_whitespace() || c == '.' || c == ',' || c == '!' || c == '?' || c == '\'' {
            pending_space = true;
        } else {
            pending_space = true;
        }
    }
    out
}
