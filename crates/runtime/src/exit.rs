//! Process-level exit codes for the (out-of-tree) terminal surface.

use warden_domain::error::Error;

/// The exit-code contract: stable numbers external tooling can script on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    ConfigAbsent = 1,
    AuthorizationDenied = 2,
    ProviderUnavailable = 3,
    AuditChainBroken = 4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a runtime error onto the exit contract.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Config(_) => ExitCode::ConfigAbsent,
            Error::PolicyDenied(_) | Error::DriftDenied(_) => ExitCode::AuthorizationDenied,
            Error::Provider { .. } | Error::Http(_) | Error::Timeout(_) => {
                ExitCode::ProviderUnavailable
            }
            Error::Integrity { .. } => ExitCode::AuditChainBroken,
            _ => ExitCode::ProviderUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::ConfigAbsent.code(), 1);
        assert_eq!(ExitCode::AuthorizationDenied.code(), 2);
        assert_eq!(ExitCode::ProviderUnavailable.code(), 3);
        assert_eq!(ExitCode::AuditChainBroken.code(), 4);
    }

    #[test]
    fn errors_map_onto_the_contract() {
        assert_eq!(
            ExitCode::from_error(&Error::Config("missing".into())),
            ExitCode::ConfigAbsent
        );
        assert_eq!(
            ExitCode::from_error(&Error::PolicyDenied("no".into())),
            ExitCode::AuthorizationDenied
        );
        assert_eq!(
            ExitCode::from_error(&Error::Integrity {
                index: 3,
                reason: "hash mismatch".into()
            }),
            ExitCode::AuditChainBroken
        );
    }
}
