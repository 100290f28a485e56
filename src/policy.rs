use crate::verdict::Classification;

/// Probability (percent) at which spam is removed without a human.
pub const SPAM_THRESHOLD: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Clean,
    SuspectedSpam,
    ConfirmedSpam,
}

/// Map a classification to a moderation decision.
///
/// Probability only matters once the model has said "spam"; a "not spam"
/// answer is `Clean` whatever probability came with it.
pub fn decide(classification: &Classification) -> Decision {
    match classification.is_spam {
        false => Decision::Clean,
        true if classification.probability >= SPAM_THRESHOLD => Decision::ConfirmedSpam,
        true => Decision::SuspectedSpam,
    }
}
