use thiserror::Error;

use warden_alert::AlertError;
use warden_core::ConfigError;
use warden_health::ControlApiError;
use warden_state::StateError;

#[derive(Debug, Error)]
pub enum EscalateError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Alert(#[from] AlertError),

    #[error(transparent)]
    ControlApi(#[from] ControlApiError),
}

pub type EscalateResult<T> = Result<T, EscalateError>;
