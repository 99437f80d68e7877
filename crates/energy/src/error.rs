use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnergyError {
    #[error("no energy account for {0}")]
    NoAccount(String),
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: f64, available: f64 },
}

pub type Result<T> = std::result::Result<T, EnergyError>;
