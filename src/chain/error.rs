use thiserror::Error;

/// Node-side error text for an underpriced transaction. The yield claim
/// retries with a doubled gas price when it sees this.
pub const GAS_TOO_LOW: &str = "max fee per gas less than block base fee";

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("signing failed: {0}")]
    Sign(String),
}

impl ChainError {
    /// True when the node rejected a submission because the offered gas
    /// price is below the current base fee.
    pub fn is_gas_too_low(&self) -> bool {
        matches!(self, ChainError::Rpc { message, .. } if message.contains(GAS_TOO_LOW))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_too_low_detection() {
        let err = ChainError::Rpc {
            code: -32000,
            message: format!("err: {GAS_TOO_LOW}: address 0x0"),
        };
        assert!(err.is_gas_too_low());

        let other = ChainError::Rpc {
            code: -32000,
            message: "nonce too low".to_string(),
        };
        assert!(!other.is_gas_too_low());
        assert!(!ChainError::NotConnected.is_gas_too_low());
    }
}
