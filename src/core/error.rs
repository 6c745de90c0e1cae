use thiserror::Error;

pub type Result<T> = core::result::Result<T, SkeinError>;

/// Construction and validation failures.
///
/// Nothing inside a tick can fail: numeric edge cases are policy (NaN
/// sentinels, saturation), not errors. Everything here is raised while a
/// network is being assembled or finalized.
#[derive(Debug, Error)]
pub enum SkeinError {
    #[error("unknown group `{0}`")]
    UnknownGroup(String),

    #[error("group index {0} out of range")]
    GroupIndex(usize),

    #[error("group `{group}` expects {expected} units, got {got}")]
    SizeMismatch {
        group: String,
        expected: usize,
        got: usize,
    },

    #[error("network already finalized")]
    AlreadyFinalized,

    #[error("network not finalized")]
    NotFinalized,

    #[error("processor `{kind}` on group `{group}` needs a paired group of equal size")]
    BadPairing { kind: &'static str, group: String },

    #[error("invalid network description: {0}")]
    BadDescription(String),
}
