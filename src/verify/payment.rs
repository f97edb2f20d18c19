//! Paid reprieve verification.
//!
//! The client broadcasts the payment itself and hands over the transaction
//! hash. The server only confirms the transaction and refuses to redeem the
//! same hash twice.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::store::{keys, SharedStore, StoreError};
use super::VerifyError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// `0x` followed by 64 hex digits.
pub fn is_tx_hash(tx_hash: &str) -> bool {
    tx_hash.len() == 66
        && tx_hash.starts_with("0x")
        && tx_hash[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
}

/// `keccak256("Transfer(address,address,uint256)")`.
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// `0x` followed by 40 hex digits.
pub fn is_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// What a qualifying payment looks like on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTerms {
    /// ERC-20 contract the payment is made in.
    pub token: String,
    /// Address that must receive the transfer.
    pub recipient: String,
    /// Smallest accepted amount, in token base units.
    pub min_amount: u128,
}

impl PaymentTerms {
    /// Terms for a price in cents of a token with `decimals` decimals.
    pub fn for_price(
        token: impl Into<String>,
        recipient: impl Into<String>,
        price_cents: u32,
        decimals: u32,
    ) -> Self {
        let min_amount = u128::from(price_cents) * 10u128.pow(decimals.saturating_sub(2));
        Self { token: token.into(), recipient: recipient.into(), min_amount }
    }
}

/// Address held in an indexed topic (32 bytes, left padded).
fn topic_address(topic: &str) -> Option<&str> {
    let hex = topic.strip_prefix("0x")?;
    if hex.len() != 64 {
        return None;
    }
    Some(&hex[24..])
}

fn same_address(topic: &Value, address: &str) -> bool {
    match (topic.as_str().and_then(topic_address), address.strip_prefix("0x")) {
        (Some(held), Some(wanted)) => held.eq_ignore_ascii_case(wanted),
        _ => false,
    }
}

/// Whether a uint256 data word is at least `min`.
fn amount_at_least(data: &str, min: u128) -> bool {
    let Some(hex) = data.strip_prefix("0x") else {
        return false;
    };
    if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    let digits = hex.trim_start_matches('0');
    if digits.len() > 32 {
        return true;
    }
    if digits.is_empty() {
        return min == 0;
    }
    u128::from_str_radix(digits, 16).map(|v| v >= min).unwrap_or(false)
}

/// A receipt pays when it succeeded and one of its logs is a transfer of
/// the terms' token to the recipient for at least the minimum. With a
/// payer, the transfer must also come from it.
fn receipt_pays(receipt: &Value, terms: &PaymentTerms, payer: Option<&str>) -> bool {
    if receipt["status"].as_str() != Some("0x1") {
        return false;
    }
    let Some(logs) = receipt["logs"].as_array() else {
        return false;
    };

    logs.iter().any(|log| {
        let topics = &log["topics"];
        log["address"].as_str().is_some_and(|a| a.eq_ignore_ascii_case(&terms.token))
            && topics[0].as_str().is_some_and(|t| t.eq_ignore_ascii_case(TRANSFER_TOPIC))
            && same_address(&topics[2], &terms.recipient)
            && payer.map_or(true, |p| same_address(&topics[1], p))
            && log["data"].as_str().is_some_and(|d| amount_at_least(d, terms.min_amount))
    })
}

/// JSON-RPC node client.
#[derive(Debug, Clone)]
pub struct RpcPaymentClient {
    http: Client,
    rpc_url: String,
    terms: PaymentTerms,
}

impl RpcPaymentClient {
    /// Client for a node and the terms a payment must meet.
    pub fn new(rpc_url: impl Into<String>, terms: PaymentTerms) -> Result<Self, VerifyError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VerifyError::Upstream(e.to_string()))?;
        Ok(Self { http, rpc_url: rpc_url.into(), terms })
    }

    /// Terms payments are checked against.
    pub fn terms(&self) -> &PaymentTerms {
        &self.terms
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Value, VerifyError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_getTransactionReceipt",
            "params": [tx_hash],
        });
        let reply: RpcReply = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VerifyError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| VerifyError::Upstream(e.to_string()))?;

        match reply.error {
            Some(err) => Err(VerifyError::Upstream(err.to_string())),
            None => Ok(reply.result),
        }
    }
}

/// Payment verification backend.
#[derive(Debug, Clone)]
pub enum PaymentVerifier {
    /// Accepts any well-formed hash. Used when no node is configured.
    Mock,
    /// Reads the transaction receipt from a node.
    Rpc(RpcPaymentClient),
}

impl PaymentVerifier {
    /// Confirm a payment, optionally sent from `payer`. `Ok(false)` means
    /// the transaction exists but does not qualify or is still pending.
    pub async fn verify(&self, tx_hash: &str, payer: Option<&str>) -> Result<bool, VerifyError> {
        if !is_tx_hash(tx_hash) {
            return Err(VerifyError::Malformed(format!("bad transaction hash {}", tx_hash)));
        }
        if let Some(payer) = payer.filter(|p| !is_address(p)) {
            return Err(VerifyError::Malformed(format!("bad payer address {}", payer)));
        }

        match self {
            PaymentVerifier::Mock => {
                debug!(tx_hash, "mock payment verifier accepting payment");
                Ok(true)
            }
            PaymentVerifier::Rpc(client) => {
                let receipt = client.receipt(tx_hash).await?;
                if receipt.is_null() {
                    debug!(tx_hash, "no receipt yet");
                    return Ok(false);
                }
                let paid = receipt_pays(&receipt, &client.terms, payer);
                if !paid {
                    debug!(tx_hash, "receipt carries no qualifying transfer");
                }
                Ok(paid)
            }
        }
    }
}

/// Replay guard for redeemed payments.
#[derive(Clone)]
pub struct RedeemedPayments {
    store: SharedStore,
}

impl RedeemedPayments {
    /// Guard on a store.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Whether a hash was already redeemed.
    pub async fn is_redeemed(&self, tx_hash: &str) -> Result<bool, StoreError> {
        Ok(self.store.get(&keys::payment(tx_hash)).await?.is_some())
    }

    /// Record a redemption for a run.
    pub async fn redeem(&self, tx_hash: &str, run_id: &str) -> Result<(), StoreError> {
        self.store
            .set(&keys::payment(tx_hash), run_id, Some(keys::PAYMENT_REPLAY_TTL))
            .await
    }
}

impl std::fmt::Debug for RedeemedPayments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedeemedPayments").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::MemoryStore;

    const HASH: &str = "0x9f3c2a1b0e4d5c6b7a8f9e0d1c2b3a4f5e6d7c8b9a0f1e2d3c4b5a6f7e8d9c0b";

    #[test]
    fn test_tx_hash_format() {
        assert!(is_tx_hash(HASH));
        assert!(!is_tx_hash("0x1234"));
        assert!(!is_tx_hash(&HASH.replace("0x", "1x")));
        assert!(!is_tx_hash(&HASH.replace('f', "g")));
    }

    const USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
    const RECIPIENT: &str = "0xAbC0000000000000000000000000000000000001";
    const PAYER: &str = "0x1234567890abcdef1234567890abcdef12345678";

    fn terms() -> PaymentTerms {
        PaymentTerms::for_price(USDC, RECIPIENT, 100, 6)
    }

    fn padded(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x").to_ascii_lowercase())
    }

    fn transfer(token: &str, from: &str, to: &str, amount: u128) -> Value {
        json!({
            "address": token,
            "topics": [TRANSFER_TOPIC, padded(from), padded(to)],
            "data": format!("0x{:064x}", amount),
        })
    }

    fn receipt(logs: Vec<Value>) -> Value {
        json!({"status": "0x1", "to": USDC, "logs": logs})
    }

    #[test]
    fn test_terms_from_price() {
        assert_eq!(terms().min_amount, 1_000_000);
        let wei = PaymentTerms::for_price(USDC, RECIPIENT, 250, 18);
        assert_eq!(wei.min_amount, 2_500_000_000_000_000_000);
    }

    #[test]
    fn test_receipt_checks() {
        let paid = receipt(vec![transfer(USDC, PAYER, RECIPIENT, 1_000_000)]);
        assert!(receipt_pays(&paid, &terms(), None));
        assert!(receipt_pays(&paid, &terms(), Some(PAYER)));

        let mut reverted = paid.clone();
        reverted["status"] = json!("0x0");
        assert!(!receipt_pays(&reverted, &terms(), None));

        // A receipt addressed to the recipient with no transfer does not pay
        let bare = json!({"status": "0x1", "to": RECIPIENT, "logs": []});
        assert!(!receipt_pays(&bare, &terms(), None));
        assert!(!receipt_pays(&json!({}), &terms(), None));
    }

    #[test]
    fn test_zero_and_short_transfers_rejected() {
        let zero = receipt(vec![transfer(USDC, PAYER, RECIPIENT, 0)]);
        let short = receipt(vec![transfer(USDC, PAYER, RECIPIENT, 999_999)]);
        let over = receipt(vec![transfer(USDC, PAYER, RECIPIENT, u128::MAX)]);

        assert!(!receipt_pays(&zero, &terms(), None));
        assert!(!receipt_pays(&short, &terms(), None));
        assert!(receipt_pays(&over, &terms(), None));
    }

    #[test]
    fn test_transfer_must_match_recipient_token_and_payer() {
        let stranger = "0xdead000000000000000000000000000000000000";
        let elsewhere = receipt(vec![transfer(USDC, PAYER, stranger, 5_000_000)]);
        let other_token = receipt(vec![transfer(stranger, PAYER, RECIPIENT, 5_000_000)]);
        let someone_else = receipt(vec![transfer(USDC, stranger, RECIPIENT, 5_000_000)]);

        assert!(!receipt_pays(&elsewhere, &terms(), None));
        assert!(!receipt_pays(&other_token, &terms(), None));
        assert!(receipt_pays(&someone_else, &terms(), None));
        assert!(!receipt_pays(&someone_else, &terms(), Some(PAYER)));

        // Any one qualifying log is enough
        let mixed = receipt(vec![
            transfer(USDC, PAYER, stranger, 5_000_000),
            transfer(USDC, PAYER, RECIPIENT, 1_000_000),
        ]);
        assert!(receipt_pays(&mixed, &terms(), Some(PAYER)));
    }

    #[test]
    fn test_non_transfer_event_rejected() {
        let mut approval = transfer(USDC, PAYER, RECIPIENT, 5_000_000);
        approval["topics"][0] =
            json!("0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925");
        assert!(!receipt_pays(&receipt(vec![approval]), &terms(), None));
    }

    #[tokio::test]
    async fn test_mock_verifier() {
        assert!(PaymentVerifier::Mock.verify(HASH, None).await.unwrap());
        assert!(PaymentVerifier::Mock.verify(HASH, Some(PAYER)).await.unwrap());
        assert!(matches!(
            PaymentVerifier::Mock.verify("nope", None).await,
            Err(VerifyError::Malformed(_))
        ));
        assert!(matches!(
            PaymentVerifier::Mock.verify(HASH, Some("fid:42")).await,
            Err(VerifyError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_replay_guard() {
        let guard = RedeemedPayments::new(Arc::new(MemoryStore::new()));
        assert!(!guard.is_redeemed(HASH).await.unwrap());

        guard.redeem(HASH, "run-1").await.unwrap();
        assert!(guard.is_redeemed(HASH).await.unwrap());
        // Case does not matter
        assert!(guard.is_redeemed(&HASH.to_ascii_uppercase().replace("0X", "0x")).await.unwrap());
    }
}
