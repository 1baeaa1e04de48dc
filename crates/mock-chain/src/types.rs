//! RPC-compatible types for the mock chain.
//!
//! These types are JSON-serializable versions of the core auction types.
//! Addresses, token ids, handles and request ids travel as hex strings.

use auction_fhe::EncryptedInput;
use auction_module::{RelayOutcome, SettlementParams};
use auction_types::{Handle, Width};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

/// Block info response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub timestamp: u64,
}

/// Parameters for registering a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTokenParams {
    pub symbol: String,
    /// Defaults to `U64`
    pub width: Option<Width>,
}

/// Parameters for deploying an auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployAuctionParams {
    pub sender: String,
    pub auction_token: String,
    pub supply: u64,
    pub base_token: String,
    pub end_time: u64,
    pub min_price: u64,
    pub max_price: u64,
    pub settlement: Option<SettlementParams>,
}

/// Client-side ciphertext for RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedInputRpc {
    /// Hex-encoded handle (32 bytes)
    pub handle: String,
    pub width: Width,
    /// Hex-encoded input proof (32 bytes)
    pub proof: String,
}

impl From<&EncryptedInput> for EncryptedInputRpc {
    fn from(input: &EncryptedInput) -> Self {
        Self {
            handle: input.handle.to_hex(),
            width: input.width,
            proof: hex::encode(input.proof),
        }
    }
}

impl TryFrom<&EncryptedInputRpc> for EncryptedInput {
    type Error = ErrorObjectOwned;

    fn try_from(input: &EncryptedInputRpc) -> Result<Self, Self::Error> {
        Ok(Self {
            handle: Handle(parse_hex32(&input.handle, "handle")?),
            width: input.width,
            proof: parse_hex32(&input.proof, "proof")?,
        })
    }
}

/// Parameters for submitting a bid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBidParams {
    pub sender: String,
    pub auction_id: u64,
    pub price: u64,
    pub quantity: EncryptedInputRpc,
}

/// Result of delivering one decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayOutcomeRpc {
    pub request_id: String,
    pub auction_id: Option<u64>,
    /// Rejection reason, if the auction refused the callback
    pub error: Option<String>,
}

impl From<RelayOutcome> for RelayOutcomeRpc {
    fn from(outcome: RelayOutcome) -> Self {
        Self {
            request_id: hex::encode(outcome.request_id),
            auction_id: outcome.auction_id,
            error: outcome.result.err().map(|e| e.to_string()),
        }
    }
}

pub fn rpc_error(msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(-32000, msg.to_string(), None::<()>)
}

/// Parse a 32-byte hex value, with or without a `0x` prefix.
pub fn parse_hex32(s: &str, what: &str) -> Result<[u8; 32], ErrorObjectOwned> {
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| rpc_error(&format!("Invalid {} hex: {}", what, e)))?
        .try_into()
        .map_err(|_| rpc_error(&format!("{} must be 32 bytes", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex32() {
        let hex = format!("0x{}", "ab".repeat(32));
        assert_eq!(parse_hex32(&hex, "address").unwrap(), [0xab; 32]);
        assert!(parse_hex32("abcd", "address").is_err());
        assert!(parse_hex32("zz", "address").is_err());
    }

    #[test]
    fn test_encrypted_input_round_trip() {
        let input = EncryptedInput {
            handle: Handle([3u8; 32]),
            width: Width::U64,
            proof: [9u8; 32],
        };
        let rpc = EncryptedInputRpc::from(&input);
        let json = serde_json::to_string(&rpc).unwrap();
        let back: EncryptedInputRpc = serde_json::from_str(&json).unwrap();
        assert_eq!(EncryptedInput::try_from(&back).unwrap(), input);
    }
}
