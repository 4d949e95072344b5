//! Chain-facing half of the engine: one `NetworkAdapter` per supported
//! network over a shared HTTP client, plus the services built on them
//! (price oracle, wallet aggregator, transaction verifier).

pub mod abi;
pub mod adapter;
pub mod aggregator;
pub mod bitcoin;
pub mod error;
pub mod evm;
pub mod http;
pub mod prices;
pub mod solana;
pub mod tron;
pub mod verifier;
pub mod xrp;

pub use adapter::{AdapterRegistry, NetworkAdapter, TransferQuery};
pub use aggregator::{AggregateError, Portfolio, WalletAggregator};
pub use error::{AdapterError, AdapterResult};
pub use http::HttpClient;
pub use prices::{fallback_prices, PriceFeed, PriceOracle};
pub use verifier::{TransactionVerifier, VerificationRequest, VerifyError};
