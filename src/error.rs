//! Cycle-level error taxonomy

use thiserror::Error;

/// Failures surfaced at the cycle boundary.
///
/// Per-candidate probe failures never reach this level; they are recorded as
/// reason codes on the validation results. A cycle error marks the whole
/// cycle failed while the process keeps running.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("No working proxies after {attempts} validation attempts")]
    NoWorkingProxies { attempts: u32 },

    #[error("Message source error: {0}")]
    Source(#[source] anyhow::Error),

    #[error("Publish error: {0}")]
    Publish(#[source] anyhow::Error),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CycleError::NoWorkingProxies { attempts: 3 };
        assert_eq!(
            err.to_string(),
            "No working proxies after 3 validation attempts"
        );

        let err = CycleError::Source(anyhow::anyhow!("connection reset"));
        assert!(err.to_string().contains("connection reset"));
    }
}
