use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("timeout waiting for conversion")]
    Timeout,
    #[error("adc returned out-of-range sample")]
    BadSample,
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("spi error: {0}")]
    Spi(String),
}
