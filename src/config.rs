//! Server configuration.
//!
//! Everything comes from environment variables with a default for each.
//! Parsing goes through a lookup function so tests never touch the process
//! environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::core::clock::Clock;
use crate::game::reprieve::{ReprievePolicy, DEFAULT_PRICE_CENTS, DEFAULT_SHARE_THRESHOLD};
use crate::game::validator::ValidationPolicy;
use crate::network::auth::AuthConfig;
use crate::store::{keys, DisabledStore, MemoryStore, RemoteStore, SharedStore};
use crate::verify::payment::is_address;
use crate::verify::share::NEYNAR_BASE_URL;
use crate::verify::{
    NeynarClient, PaymentTerms, PaymentVerifier, RpcPaymentClient, ShareVerifier, VerifyError,
};

/// Decimals of the payment token (USDC).
pub const DEFAULT_TOKEN_DECIMALS: u32 = 6;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable has a value that does not parse.
    #[error("invalid value for {key}: {value}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
    /// A variable required by another one is missing.
    #[error("{0} must be set")]
    Missing(&'static str),
    /// A collaborator could not be built.
    #[error("failed to build {what}: {reason}")]
    Build {
        /// Collaborator.
        what: &'static str,
        /// Cause.
        reason: String,
    },
}

/// Where shared state lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process maps; state dies with the process.
    Memory,
    /// Redis REST service.
    Remote {
        /// Endpoint.
        url: String,
        /// Bearer token.
        token: String,
    },
    /// No store; every stateful feature runs degraded.
    Disabled,
}

/// Game rule knobs.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Run record expiry.
    pub run_ttl: Duration,
    /// Guess and submission checks.
    pub validation: ValidationPolicy,
    /// Reprieve offer table.
    pub reprieve: ReprievePolicy,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            run_ttl: keys::RUN_TTL,
            validation: ValidationPolicy::default(),
            reprieve: ReprievePolicy::default(),
        }
    }
}

/// Proof collaborator settings.
#[derive(Debug, Clone)]
pub struct ProofConfig {
    /// Neynar API key; mock share verification without it.
    pub neynar_api_key: Option<String>,
    /// Neynar API root.
    pub neynar_base_url: Option<String>,
    /// JSON-RPC node for payment receipts.
    pub payment_rpc_url: Option<String>,
    /// Address payments must go to.
    pub payment_recipient: Option<String>,
    /// ERC-20 contract payments are made in.
    pub payment_token: Option<String>,
    /// Decimals of that token.
    pub payment_token_decimals: u32,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            neynar_api_key: None,
            neynar_base_url: None,
            payment_rpc_url: None,
            payment_recipient: None,
            payment_token: None,
            payment_token_decimals: DEFAULT_TOKEN_DECIMALS,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections idle this long are closed.
    pub idle_timeout: Duration,
    /// JWT settings.
    pub auth: AuthConfig,
    /// Shared state backend.
    pub store: StoreBackend,
    /// Item list; the bundled sample when unset.
    pub catalog_path: Option<PathBuf>,
    /// Rule knobs.
    pub game: GameConfig,
    /// Proof collaborators.
    pub proofs: ProofConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(120),
            auth: AuthConfig::default(),
            store: StoreBackend::Memory,
            catalog_path: None,
            game: GameConfig::default(),
            proofs: ProofConfig::default(),
        }
    }
}

fn parse<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn flag(value: Option<String>) -> bool {
    value.map(|v| v == "true" || v == "1").unwrap_or(false)
}

impl ServerConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = match get("STORE_BACKEND").as_deref() {
            Some("memory") => StoreBackend::Memory,
            Some("disabled") => StoreBackend::Disabled,
            Some("remote") => StoreBackend::Remote {
                url: get("STORE_REST_URL").ok_or(ConfigError::Missing("STORE_REST_URL"))?,
                token: get("STORE_REST_TOKEN").ok_or(ConfigError::Missing("STORE_REST_TOKEN"))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid { key: "STORE_BACKEND", value: other.to_string() })
            }
            None => match (get("STORE_REST_URL"), get("STORE_REST_TOKEN")) {
                (Some(url), Some(token)) => StoreBackend::Remote { url, token },
                _ => StoreBackend::Memory,
            },
        };

        let game = GameConfig {
            run_ttl: Duration::from_secs(parse(
                "RUN_TTL_SECS",
                get("RUN_TTL_SECS"),
                keys::RUN_TTL.as_secs(),
            )?),
            validation: ValidationPolicy {
                min_guess_interval: Duration::from_millis(parse(
                    "MIN_GUESS_INTERVAL_MS",
                    get("MIN_GUESS_INTERVAL_MS"),
                    defaults.game.validation.min_guess_interval.as_millis() as u64,
                )?),
                streak_drift_tolerance: parse(
                    "STREAK_DRIFT_TOLERANCE",
                    get("STREAK_DRIFT_TOLERANCE"),
                    defaults.game.validation.streak_drift_tolerance,
                )?,
            },
            reprieve: ReprievePolicy {
                share_threshold: parse(
                    "REPRIEVE_SHARE_THRESHOLD",
                    get("REPRIEVE_SHARE_THRESHOLD"),
                    DEFAULT_SHARE_THRESHOLD,
                )?,
                price_cents: parse(
                    "REPRIEVE_PRICE_CENTS",
                    get("REPRIEVE_PRICE_CENTS"),
                    DEFAULT_PRICE_CENTS,
                )?,
                waive_paid: flag(get("WAIVE_PAID_REPRIEVES")),
            },
        };

        Ok(Self {
            bind_addr: parse("BIND_ADDR", get("BIND_ADDR"), defaults.bind_addr)?,
            max_connections: parse(
                "MAX_CONNECTIONS",
                get("MAX_CONNECTIONS"),
                defaults.max_connections,
            )?,
            idle_timeout: Duration::from_secs(parse(
                "IDLE_TIMEOUT_SECS",
                get("IDLE_TIMEOUT_SECS"),
                defaults.idle_timeout.as_secs(),
            )?),
            auth: AuthConfig::from_lookup(&get),
            store,
            catalog_path: get("CATALOG_PATH").map(PathBuf::from),
            game,
            proofs: ProofConfig {
                neynar_api_key: get("NEYNAR_API_KEY"),
                neynar_base_url: get("NEYNAR_BASE_URL"),
                payment_rpc_url: get("PAYMENT_RPC_URL"),
                payment_recipient: get("PAYMENT_RECIPIENT"),
                payment_token: get("PAYMENT_TOKEN_ADDRESS"),
                payment_token_decimals: parse(
                    "PAYMENT_TOKEN_DECIMALS",
                    get("PAYMENT_TOKEN_DECIMALS"),
                    DEFAULT_TOKEN_DECIMALS,
                )?,
            },
        })
    }

    /// Build the configured store.
    pub fn build_store(&self, clock: Arc<dyn Clock>) -> Result<SharedStore, ConfigError> {
        let store: SharedStore = match &self.store {
            StoreBackend::Memory => Arc::new(MemoryStore::with_clock(clock)),
            StoreBackend::Remote { url, token } => {
                let remote = RemoteStore::new(url.clone(), token.clone()).map_err(|e| {
                    ConfigError::Build { what: "remote store", reason: e.to_string() }
                })?;
                Arc::new(remote)
            }
            StoreBackend::Disabled => {
                warn!("store disabled, leaderboard and run validation run degraded");
                Arc::new(DisabledStore)
            }
        };
        Ok(store)
    }

    /// Build the share verifier.
    pub fn build_share_verifier(&self) -> Result<ShareVerifier, ConfigError> {
        match &self.proofs.neynar_api_key {
            Some(key) => {
                let base = self.proofs.neynar_base_url.as_deref().unwrap_or(NEYNAR_BASE_URL);
                let client = NeynarClient::new(key.clone(), base).map_err(verifier_error)?;
                Ok(ShareVerifier::Neynar(client))
            }
            None => {
                info!("NEYNAR_API_KEY not set, share verification is mocked");
                Ok(ShareVerifier::Mock)
            }
        }
    }

    /// Build the payment verifier. A node needs a recipient and a token;
    /// the minimum amount follows the reprieve price.
    pub fn build_payment_verifier(&self) -> Result<PaymentVerifier, ConfigError> {
        let Some(url) = &self.proofs.payment_rpc_url else {
            info!("PAYMENT_RPC_URL not set, payment verification is mocked");
            return Ok(PaymentVerifier::Mock);
        };
        let recipient = address("PAYMENT_RECIPIENT", self.proofs.payment_recipient.as_deref())?;
        let token = address("PAYMENT_TOKEN_ADDRESS", self.proofs.payment_token.as_deref())?;

        let terms = PaymentTerms::for_price(
            token,
            recipient,
            self.game.reprieve.price_cents,
            self.proofs.payment_token_decimals,
        );
        info!(token = %terms.token, min_amount = terms.min_amount, "payment verification via node");
        let client = RpcPaymentClient::new(url.clone(), terms).map_err(verifier_error)?;
        Ok(PaymentVerifier::Rpc(client))
    }
}

fn address(key: &'static str, value: Option<&str>) -> Result<String, ConfigError> {
    match value {
        Some(v) if is_address(v) => Ok(v.to_string()),
        Some(v) => Err(ConfigError::Invalid { key, value: v.to_string() }),
        None => Err(ConfigError::Missing(key)),
    }
}

fn verifier_error(e: VerifyError) -> ConfigError {
    ConfigError::Build { what: "verifier", reason: e.to_string() }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const RECIPIENT: &str = "0xAbC0000000000000000000000000000000000001";
    const TOKEN: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.store, StoreBackend::Memory);
        assert_eq!(cfg.game.run_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.game.validation.min_guess_interval, Duration::from_millis(500));
        assert_eq!(cfg.game.validation.streak_drift_tolerance, 1);
        assert_eq!(cfg.game.reprieve.share_threshold, 5);
        assert!(!cfg.game.reprieve.waive_paid);
        assert!(!cfg.auth.is_configured());
        assert!(cfg.catalog_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("STREAK_DRIFT_TOLERANCE", "3"),
            ("WAIVE_PAID_REPRIEVES", "true"),
            ("AUTH_SECRET", "s"),
            ("CATALOG_PATH", "/srv/catalog.json"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.game.validation.streak_drift_tolerance, 3);
        assert!(cfg.game.reprieve.waive_paid);
        assert!(cfg.auth.is_configured());
        assert_eq!(cfg.catalog_path, Some(PathBuf::from("/srv/catalog.json")));
    }

    #[test]
    fn test_store_backend_selection() {
        let remote =
            config(&[("STORE_REST_URL", "https://kv"), ("STORE_REST_TOKEN", "t")]).unwrap();
        assert!(matches!(remote.store, StoreBackend::Remote { .. }));

        let disabled = config(&[("STORE_BACKEND", "disabled")]).unwrap();
        assert_eq!(disabled.store, StoreBackend::Disabled);

        assert!(matches!(
            config(&[("STORE_BACKEND", "remote")]),
            Err(ConfigError::Missing("STORE_REST_URL"))
        ));
        assert!(matches!(
            config(&[("STORE_BACKEND", "etcd")]),
            Err(ConfigError::Invalid { key: "STORE_BACKEND", .. })
        ));
    }

    #[test]
    fn test_invalid_number() {
        assert!(matches!(
            config(&[("MAX_CONNECTIONS", "lots")]),
            Err(ConfigError::Invalid { key: "MAX_CONNECTIONS", .. })
        ));
    }

    #[test]
    fn test_verifier_selection() {
        let cfg = config(&[]).unwrap();
        assert!(matches!(cfg.build_share_verifier().unwrap(), ShareVerifier::Mock));
        assert!(matches!(cfg.build_payment_verifier().unwrap(), PaymentVerifier::Mock));

        let real = config(&[
            ("NEYNAR_API_KEY", "k"),
            ("PAYMENT_RPC_URL", "https://rpc"),
            ("PAYMENT_RECIPIENT", RECIPIENT),
            ("PAYMENT_TOKEN_ADDRESS", TOKEN),
        ])
        .unwrap();
        assert!(matches!(real.build_share_verifier().unwrap(), ShareVerifier::Neynar(_)));
        assert!(matches!(real.build_payment_verifier().unwrap(), PaymentVerifier::Rpc(_)));

        let half = config(&[("PAYMENT_RPC_URL", "https://rpc")]).unwrap();
        assert!(matches!(
            half.build_payment_verifier(),
            Err(ConfigError::Missing("PAYMENT_RECIPIENT"))
        ));

        let no_token = config(&[
            ("PAYMENT_RPC_URL", "https://rpc"),
            ("PAYMENT_RECIPIENT", RECIPIENT),
        ])
        .unwrap();
        assert!(matches!(
            no_token.build_payment_verifier(),
            Err(ConfigError::Missing("PAYMENT_TOKEN_ADDRESS"))
        ));

        let bad = config(&[
            ("PAYMENT_RPC_URL", "https://rpc"),
            ("PAYMENT_RECIPIENT", "0xabc"),
            ("PAYMENT_TOKEN_ADDRESS", TOKEN),
        ])
        .unwrap();
        assert!(matches!(
            bad.build_payment_verifier(),
            Err(ConfigError::Invalid { key: "PAYMENT_RECIPIENT", .. })
        ));
    }

    #[test]
    fn test_payment_minimum_follows_price() {
        let cfg = config(&[
            ("PAYMENT_RPC_URL", "https://rpc"),
            ("PAYMENT_RECIPIENT", RECIPIENT),
            ("PAYMENT_TOKEN_ADDRESS", TOKEN),
            ("REPRIEVE_PRICE_CENTS", "250"),
        ])
        .unwrap();
        match cfg.build_payment_verifier().unwrap() {
            PaymentVerifier::Rpc(client) => {
                assert_eq!(client.terms().min_amount, 2_500_000);
                assert_eq!(client.terms().recipient, RECIPIENT);
            }
            PaymentVerifier::Mock => panic!("expected a node verifier"),
        }
    }
}
