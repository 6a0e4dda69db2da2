//! One-time completion codes.
//!
//! On acceptance the engine mints a numeric code, hands it to the
//! notification collaborator for delivery to the requester, and forgets it.
//! Verifying the code at completion time belongs to the profile system; the
//! engine gates [`complete_service`](crate::engine::DispatchEngine::complete_service)
//! on assigned-provider identity only.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// How long a minted code stays valid.
pub const CODE_TTL: Duration = Duration::hours(1);

/// Number of digits in a code.
const CODE_DIGITS: u32 = 6;

/// A one-time numeric completion code with its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCode {
    code: String,
    expires_at: DateTime<Utc>,
}

impl CompletionCode {
    /// Mints a fresh 6-digit code valid for [`CODE_TTL`].
    pub fn generate() -> Self {
        let upper = 10u32.pow(CODE_DIGITS);
        let value = rand::thread_rng().gen_range(0..upper);
        Self {
            code: format!("{value:06}"),
            expires_at: Utc::now() + CODE_TTL,
        }
    }

    /// The code digits.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// When the code stops being valid.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True once the expiry has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
