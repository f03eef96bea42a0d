use std::process::ExitCode;

use ipc_broker::BrokerError;

/// Errors surfaced by brokerctl.
///
/// Anything that stops a scenario from being loaded or interpreted exits
/// with 2. A scenario that ran but diverged from its expectations, or a
/// broker error escaping the runner, exits with 1.
#[derive(thiserror::Error, Debug)]
pub enum BrokerctlError {
    // Exit code 2
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Scenario step {step}: {message}")]
    Scenario { step: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Exit code 1
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Expectations not met: {failed} of {total} steps failed")]
    ExpectationFailed { failed: usize, total: usize },
}

impl BrokerctlError {
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_code_num())
    }

    /// `2` when the scenario could not be run, `1` when it misbehaved.
    pub fn exit_code_num(&self) -> u8 {
        match self {
            Self::ConfigParse(_)
            | Self::ScenarioParse(_)
            | Self::Scenario { .. }
            | Self::Io(_) => 2,

            Self::Broker(_) | Self::ExpectationFailed { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_exit_two() {
        let err = BrokerctlError::ScenarioParse("bad".into());
        assert_eq!(err.exit_code_num(), 2);
        let err = BrokerctlError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert_eq!(err.exit_code_num(), 2);
    }

    #[test]
    fn broker_errors_convert_and_exit_one() {
        let err: BrokerctlError = BrokerError::PermissionDenied.into();
        assert_eq!(err.exit_code_num(), 1);
        assert!(err.to_string().contains("permission denied"));
    }
}
