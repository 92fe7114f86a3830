use crate::coordination::CoordinationError;
use crate::error::FairlockError;

pub fn get_exit_code(error: &FairlockError) -> i32 {
    match error {
        FairlockError::InvalidPath(_)
        | FairlockError::InvalidConfig(_)
        | FairlockError::ConfigError(_) => 2,

        FairlockError::NoSession { .. } => 3,

        FairlockError::Deadlock { .. } | FairlockError::NotLocked { .. } => 4,

        FairlockError::MalformedSequence { .. } | FairlockError::NodeVanished { .. } => 5,

        FairlockError::Coordination(CoordinationError::SessionExpired) => 6,

        FairlockError::Coordination(_) => 20,

        FairlockError::Timeout { .. } => 75, // EX_TEMPFAIL

        FairlockError::Cancelled { .. } => 130, // Conventional SIGINT exit code

        _ => 1,
    }
}
