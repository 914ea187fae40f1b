use std::fmt;

pub const MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;
pub const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Lifecycle of a single submission. `Retrying` carries the attempt that is
/// about to start so the UI can show "retrying (2/3)".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    Uploading { attempt: u32 },
    Retrying { attempt: u32 },
    Succeeded,
    Failed,
}

impl UploadPhase {
    /// A new submission is only accepted while nothing is in flight.
    pub fn can_submit(&self) -> bool {
        !self.in_flight()
    }

    pub fn in_flight(&self) -> bool {
        matches!(
            self,
            UploadPhase::Uploading { .. } | UploadPhase::Retrying { .. }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    UnsupportedType(String),
    TooLarge(u64),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::UnsupportedType(mime) => {
                write!(f, "Unsupported file type: {mime}. Allowed: JPEG, PNG, WEBP")
            }
            ValidationError::TooLarge(size) => {
                write!(
                    f,
                    "File is {:.1}MB, the maximum is {}MB",
                    *size as f64 / (1024.0 * 1024.0),
                    MAX_UPLOAD_BYTES / (1024 * 1024)
                )
            }
        }
    }
}

/// Client-side gate mirroring the server's checks, so obviously bad files
/// never leave the browser.
pub fn validate(mime: &str, size_bytes: u64) -> Result<(), ValidationError> {
    if !ALLOWED_MIME_TYPES.contains(&mime) {
        return Err(ValidationError::UnsupportedType(mime.to_string()));
    }
    if size_bytes > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge(size_bytes));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt that follows `completed_attempts` failures.
    pub fn backoff_ms(&self, completed_attempts: u32) -> u32 {
        completed_attempts * self.base_delay_ms
    }
}

/// Transient failures earn another attempt until the policy is exhausted;
/// terminal failures never do.
pub fn should_retry(attempt: u32, policy: &RetryPolicy, transient: bool) -> bool {
    transient && attempt < policy.max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_types_up_to_the_limit() {
        for mime in ALLOWED_MIME_TYPES {
            assert_eq!(validate(mime, MAX_UPLOAD_BYTES), Ok(()));
        }
    }

    #[test]
    fn rejects_unsupported_type_before_size() {
        let err = validate("image/gif", 10).unwrap_err();
        assert_eq!(err, ValidationError::UnsupportedType("image/gif".into()));
    }

    #[test]
    fn rejects_files_over_the_limit() {
        let err = validate("image/png", MAX_UPLOAD_BYTES + 1).unwrap_err();
        assert_eq!(err, ValidationError::TooLarge(MAX_UPLOAD_BYTES + 1));
    }

    #[test]
    fn backoff_grows_strictly_with_each_failure() {
        let policy = RetryPolicy::default();
        let delays: Vec<u32> = (1..policy.max_attempts)
            .map(|failed| policy.backoff_ms(failed))
            .collect();
        assert_eq!(delays, vec![1000, 2000]);
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn transient_failures_stop_at_three_attempts() {
        let policy = RetryPolicy::default();
        let mut attempt = 1;
        while should_retry(attempt, &policy, true) {
            attempt += 1;
        }
        assert_eq!(attempt, 3);
    }

    #[test]
    fn terminal_failures_never_retry() {
        let policy = RetryPolicy::default();
        assert!(!should_retry(1, &policy, false));
    }

    #[test]
    fn in_flight_phases_block_resubmission() {
        assert!(UploadPhase::Idle.can_submit());
        assert!(UploadPhase::Succeeded.can_submit());
        assert!(UploadPhase::Failed.can_submit());
        assert!(!UploadPhase::Uploading { attempt: 1 }.can_submit());
        assert!(!UploadPhase::Retrying { attempt: 2 }.can_submit());
    }
}
