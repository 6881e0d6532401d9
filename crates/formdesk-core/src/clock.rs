use chrono::{DateTime, SubsecRound, Utc};

/// Current time truncated to microseconds, the precision the document store keeps.
///
/// Cursors encode microseconds, so every stored timestamp must round-trip through them.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
