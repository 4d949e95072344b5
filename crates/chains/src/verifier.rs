//! Checks a claimed transaction hash against the expected recipient, amount
//! and confirmation threshold.
//!
//! Only configuration problems surface as `Err`. Everything the chain (or its
//! provider) says is folded into a `VerificationResult`:
//!
//! * provider unreachable: `is_valid` with `manual_review_required`, the
//!   expected values echoed back;
//! * hash unknown, transfer not decodable, failed on chain or any check
//!   failing: rejected with an explanatory `error`.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use donation_watch_domain::{
    policy::{self, ConfirmationPolicy},
    ChainTransaction, Network, TxStatus, VerificationChecks, VerificationResult,
};

use crate::{
    adapter::{AdapterRegistry, TransferQuery},
    error::AdapterError,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("no adapter registered for {0}")]
    UnsupportedNetwork(Network),
    #[error("{currency} is not supported on {network}")]
    UnsupportedAsset { network: Network, currency: String },
    #[error("no donation address configured for {0}")]
    MissingAddress(Network),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub tx_hash: String,
    pub network: Network,
    pub expected_amount: f64,
    pub expected_to_address: String,
    pub currency: String,
    /// XRP only: the tag the payment must carry.
    pub expected_destination_tag: Option<u32>,
}

impl VerificationRequest {
    pub fn new(
        tx_hash: impl Into<String>,
        network: Network,
        expected_amount: f64,
        expected_to_address: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        let tx_hash: String = tx_hash.into();
        Self {
            tx_hash: network.canonical_hash(&tx_hash),
            network,
            expected_amount,
            expected_to_address: expected_to_address.into().trim().to_string(),
            currency: currency.into().trim().to_ascii_uppercase(),
            expected_destination_tag: None,
        }
    }

    pub fn with_destination_tag(mut self, tag: Option<u32>) -> Self {
        self.expected_destination_tag = tag;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Verified,
    Rejected,
    NotFound,
    ManualReview,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Verified => "verified",
            Outcome::Rejected => "rejected",
            Outcome::NotFound => "not_found",
            Outcome::ManualReview => "manual_review",
        }
    }
}

#[derive(Clone)]
pub struct TransactionVerifier {
    registry: Arc<AdapterRegistry>,
    policy: ConfirmationPolicy,
}

impl TransactionVerifier {
    pub fn new(registry: Arc<AdapterRegistry>, policy: ConfirmationPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    pub async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationResult, VerifyError> {
        let network = request.network;
        if request.expected_to_address.is_empty() {
            return Err(VerifyError::MissingAddress(network));
        }
        let adapter = self
            .registry
            .get(network)
            .ok_or(VerifyError::UnsupportedNetwork(network))?;
        if !policy::supports_asset(network, &request.currency) {
            return Err(VerifyError::UnsupportedAsset {
                network,
                currency: request.currency.clone(),
            });
        }

        let query = TransferQuery::new(&request.currency)
            .with_recipient(request.expected_to_address.clone());
        let (outcome, result) = match adapter.fetch_transaction_by_hash(&request.tx_hash, &query).await
        {
            Ok(Some(tx)) => self.evaluate(request, &tx),
            Ok(None) => (
                Outcome::NotFound,
                self.rejected(
                    request,
                    format!("transaction {} not found on {network}", request.tx_hash),
                ),
            ),
            Err(AdapterError::UnsupportedAsset { network, currency }) => {
                return Err(VerifyError::UnsupportedAsset { network, currency });
            }
            Err(err) if err.is_provider_failure() => {
                warn!(
                    network = %network,
                    tx_hash = %request.tx_hash,
                    ?err,
                    "provider unavailable, deferring to manual review"
                );
                (Outcome::ManualReview, self.manual_review(request))
            }
            Err(err) => (Outcome::Rejected, self.rejected(request, err.to_string())),
        };

        counter!(
            "verifier_results_total",
            "network" => network.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
        info!(
            network = %network,
            tx_hash = %request.tx_hash,
            outcome = outcome.label(),
            "verification finished"
        );
        Ok(result)
    }

    /// Result carrying the expected values, used when there is no usable
    /// chain data.
    fn echo(&self, request: &VerificationRequest) -> VerificationResult {
        VerificationResult {
            is_valid: false,
            manual_review_required: false,
            network: request.network,
            currency: request.currency.clone(),
            confirmations: 0,
            required_confirmations: self.policy.required(request.network),
            amount: request.expected_amount,
            to_address: request.expected_to_address.clone(),
            from_address: String::new(),
            block_height: 0,
            timestamp: None,
            checks: VerificationChecks::default(),
            error: None,
        }
    }

    fn rejected(&self, request: &VerificationRequest, error: String) -> VerificationResult {
        VerificationResult {
            error: Some(error),
            ..self.echo(request)
        }
    }

    fn manual_review(&self, request: &VerificationRequest) -> VerificationResult {
        VerificationResult {
            is_valid: true,
            manual_review_required: true,
            ..self.echo(request)
        }
    }

    fn evaluate(
        &self,
        request: &VerificationRequest,
        tx: &ChainTransaction,
    ) -> (Outcome, VerificationResult) {
        let network = request.network;
        let required = self.policy.required(network);
        let tag_matches = request
            .expected_destination_tag
            .map_or(true, |tag| tx.destination_tag == Some(tag));
        let symbol_matches = tx.symbol().eq_ignore_ascii_case(&request.currency);
        let checks = VerificationChecks {
            address_matches: network.addresses_match(&request.expected_to_address, &tx.to_address)
                && tag_matches,
            amount_matches: symbol_matches
                && policy::amounts_match(&request.currency, request.expected_amount, tx.value),
            confirmations_met: self.policy.is_final(network, tx.confirmations),
        };

        let mut problems = Vec::new();
        if tx.status == TxStatus::Failed {
            problems.push("transaction failed on chain".to_string());
        }
        if !checks.address_matches {
            problems.push(match (tag_matches, request.expected_destination_tag) {
                (false, Some(tag)) => format!(
                    "destination tag mismatch: expected {tag}, got {}",
                    tx.destination_tag
                        .map_or_else(|| "none".to_string(), |t| t.to_string())
                ),
                _ => format!(
                    "recipient mismatch: expected {}, got {}",
                    request.expected_to_address, tx.to_address
                ),
            });
        }
        if !checks.amount_matches {
            problems.push(format!(
                "amount mismatch: expected {} {}, got {} {}",
                request.expected_amount,
                request.currency,
                tx.value,
                tx.symbol()
            ));
        }
        if !checks.confirmations_met {
            problems.push(format!(
                "insufficient confirmations: {} of {required}",
                tx.confirmations
            ));
        }

        let is_valid = problems.is_empty();
        let outcome = if is_valid {
            Outcome::Verified
        } else {
            Outcome::Rejected
        };
        let result = VerificationResult {
            is_valid,
            manual_review_required: false,
            network,
            currency: request.currency.clone(),
            confirmations: tx.confirmations,
            required_confirmations: required,
            amount: tx.value,
            to_address: tx.to_address.clone(),
            from_address: tx.from_address.clone(),
            block_height: tx.block_height,
            timestamp: Some(tx.timestamp),
            checks,
            error: (!is_valid).then(|| problems.join("; ")),
        };
        (outcome, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::NetworkAdapter,
        error::AdapterResult,
        evm::EvmAdapter,
        http::HttpClient,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use donation_watch_domain::{WalletAddress, WalletSnapshot};
    use std::time::Duration;

    const BTC_WALLET: &str = "bc1qdonationaddress000000000000000000000";
    const ETH_WALLET: &str = "0x5aeda56215b167893e80b4fe645ba6d5bab767de";

    /// Answers every hash lookup with a fixed result.
    struct CannedAdapter {
        network: Network,
        answer: AdapterResult<Option<ChainTransaction>>,
    }

    #[async_trait]
    impl NetworkAdapter for CannedAdapter {
        fn network(&self) -> Network {
            self.network
        }

        async fn fetch_wallet_snapshot(&self, _wallet: &WalletAddress) -> AdapterResult<WalletSnapshot> {
            Err(AdapterError::RateLimited)
        }

        async fn fetch_recent_transactions(
            &self,
            _wallet: &WalletAddress,
            _limit: usize,
        ) -> AdapterResult<Vec<ChainTransaction>> {
            Ok(Vec::new())
        }

        async fn fetch_transaction_by_hash(
            &self,
            _hash: &str,
            _query: &TransferQuery,
        ) -> AdapterResult<Option<ChainTransaction>> {
            self.answer.clone()
        }
    }

    fn transaction(network: Network, to: &str, value: f64, confirmations: u32) -> ChainTransaction {
        ChainTransaction {
            network,
            hash: "0xhash".into(),
            from_address: "sender".into(),
            to_address: to.into(),
            value,
            token_symbol: None,
            block_height: 800_000,
            confirmations,
            timestamp: Utc::now(),
            status: TxStatus::Success,
            destination_tag: None,
        }
    }

    fn verifier(
        network: Network,
        answer: AdapterResult<Option<ChainTransaction>>,
        policy: ConfirmationPolicy,
    ) -> TransactionVerifier {
        let registry = AdapterRegistry::new().with_adapter(Arc::new(CannedAdapter { network, answer }));
        TransactionVerifier::new(Arc::new(registry), policy)
    }

    fn btc_request() -> VerificationRequest {
        VerificationRequest::new("abc", Network::Bitcoin, 0.01, BTC_WALLET, "btc")
    }

    #[tokio::test]
    async fn bitcoin_payment_with_six_confirmations_is_valid() {
        let tx = transaction(Network::Bitcoin, BTC_WALLET, 0.01, 6);
        let result = verifier(Network::Bitcoin, Ok(Some(tx)), ConfirmationPolicy::default())
            .verify(&btc_request())
            .await
            .unwrap();

        assert!(result.is_verified());
        assert!(result.checks.all());
        assert_eq!(result.confirmations, 6);
        assert_eq!(result.required_confirmations, 1);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn bitcoin_payment_below_operator_threshold_is_rejected() {
        let tx = transaction(Network::Bitcoin, BTC_WALLET, 0.01, 3);
        let policy = ConfirmationPolicy::default().with_override(Network::Bitcoin, 6);
        let result = verifier(Network::Bitcoin, Ok(Some(tx)), policy)
            .verify(&btc_request())
            .await
            .unwrap();

        assert!(!result.is_valid);
        assert_eq!(result.confirmations, 3);
        assert!(result.checks.address_matches && result.checks.amount_matches);
        assert!(!result.checks.confirmations_met);
        assert!(result.error.unwrap().contains("3 of 6"));
    }

    #[tokio::test]
    async fn confirmation_boundary_is_inclusive() {
        let request = VerificationRequest::new("0xhash", Network::Ethereum, 1.5, ETH_WALLET, "ETH");
        for (confirmations, valid) in [(12, true), (11, false)] {
            let tx = transaction(Network::Ethereum, ETH_WALLET, 1.5, confirmations);
            let result = verifier(Network::Ethereum, Ok(Some(tx)), ConfirmationPolicy::default())
                .verify(&request)
                .await
                .unwrap();
            assert_eq!(result.is_valid, valid, "{confirmations} confirmations");
        }
    }

    #[tokio::test]
    async fn stablecoin_overpayment_beyond_tolerance_is_rejected() {
        let mut tx = transaction(
            Network::Ethereum,
            "0x5AEDA56215b167893e80B4fE645BA6d5Bab767DE",
            100.02,
            20,
        );
        tx.token_symbol = Some("USDT".into());
        let request = VerificationRequest::new("0xhash", Network::Ethereum, 100.0, ETH_WALLET, "USDT");
        let result = verifier(Network::Ethereum, Ok(Some(tx.clone())), ConfirmationPolicy::default())
            .verify(&request)
            .await
            .unwrap();

        assert!(!result.is_valid);
        assert!(result.checks.address_matches);
        assert!(!result.checks.amount_matches);
        assert!(result.error.unwrap().contains("amount mismatch"));

        tx.value = 100.01;
        let within = verifier(Network::Ethereum, Ok(Some(tx)), ConfirmationPolicy::default())
            .verify(&request)
            .await
            .unwrap();
        assert!(within.is_verified());
    }

    #[tokio::test]
    async fn wrong_asset_fails_the_amount_check() {
        let tx = transaction(Network::Ethereum, ETH_WALLET, 100.0, 20);
        let request = VerificationRequest::new("0xhash", Network::Ethereum, 100.0, ETH_WALLET, "USDC");
        let result = verifier(Network::Ethereum, Ok(Some(tx)), ConfirmationPolicy::default())
            .verify(&request)
            .await
            .unwrap();
        assert!(!result.checks.amount_matches);
    }

    #[tokio::test]
    async fn missing_api_key_defers_to_manual_review() {
        let http = Arc::new(HttpClient::new(Duration::from_secs(5)).unwrap());
        let registry =
            AdapterRegistry::new().with_adapter(Arc::new(EvmAdapter::new(Network::Ethereum, http, "", None)));
        let verifier = TransactionVerifier::new(Arc::new(registry), ConfirmationPolicy::default());
        let request = VerificationRequest::new("0xhash", Network::Ethereum, 250.0, ETH_WALLET, "USDT");

        let result = verifier.verify(&request).await.unwrap();
        assert!(result.is_valid);
        assert!(result.manual_review_required);
        assert!(!result.is_verified());
        assert!(result.error.is_none());
        assert_eq!(result.amount, 250.0);
        assert_eq!(result.to_address, ETH_WALLET);
        assert_eq!(result.confirmations, 0);
    }

    #[tokio::test]
    async fn undecodable_transfer_fails_closed() {
        let answer = Err(AdapterError::not_decoded("0xhash", "USDT"));
        let request = VerificationRequest::new("0xhash", Network::Ethereum, 10.0, ETH_WALLET, "USDT");
        let result = verifier(Network::Ethereum, answer, ConfirmationPolicy::default())
            .verify(&request)
            .await
            .unwrap();
        assert!(!result.is_valid);
        assert!(!result.manual_review_required);
        assert!(result.error.unwrap().contains("could be decoded"));
    }

    #[tokio::test]
    async fn unknown_hash_fails_closed() {
        let result = verifier(Network::Bitcoin, Ok(None), ConfirmationPolicy::default())
            .verify(&btc_request())
            .await
            .unwrap();
        assert!(!result.is_valid);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn failed_transaction_is_rejected() {
        let mut tx = transaction(Network::Bitcoin, BTC_WALLET, 0.01, 6);
        tx.status = TxStatus::Failed;
        let result = verifier(Network::Bitcoin, Ok(Some(tx)), ConfirmationPolicy::default())
            .verify(&btc_request())
            .await
            .unwrap();
        assert!(!result.is_valid);
        assert!(result.error.unwrap().contains("failed on chain"));
    }

    #[tokio::test]
    async fn destination_tag_must_match() {
        let mut tx = transaction(Network::Xrp, "rWallet", 25.0, 1);
        tx.destination_tag = Some(7);
        let request = VerificationRequest::new("ABC", Network::Xrp, 25.0, "rWallet", "XRP")
            .with_destination_tag(Some(42));
        let result = verifier(Network::Xrp, Ok(Some(tx)), ConfirmationPolicy::default())
            .verify(&request)
            .await
            .unwrap();
        assert!(!result.checks.address_matches);
        assert!(result.error.unwrap().contains("destination tag mismatch"));
    }

    #[tokio::test]
    async fn configuration_errors_are_raised() {
        let verifier = verifier(Network::Bitcoin, Ok(None), ConfirmationPolicy::default());

        let no_adapter = VerificationRequest::new("h", Network::Solana, 1.0, "wallet", "SOL");
        assert_eq!(
            verifier.verify(&no_adapter).await,
            Err(VerifyError::UnsupportedNetwork(Network::Solana))
        );

        let token_on_bitcoin = VerificationRequest::new("h", Network::Bitcoin, 1.0, BTC_WALLET, "USDT");
        assert!(matches!(
            verifier.verify(&token_on_bitcoin).await,
            Err(VerifyError::UnsupportedAsset { .. })
        ));

        let no_address = VerificationRequest::new("h", Network::Bitcoin, 1.0, "  ", "BTC");
        assert_eq!(
            verifier.verify(&no_address).await,
            Err(VerifyError::MissingAddress(Network::Bitcoin))
        );
    }

    #[test]
    fn request_hash_uses_canonical_spelling() {
        let evm = VerificationRequest::new(" 0xABCDEF ", Network::Ethereum, 1.0, ETH_WALLET, "eth");
        assert_eq!(evm.tx_hash, "0xabcdef");
        assert_eq!(evm.currency, "ETH");

        let tron = VerificationRequest::new("0xFEED", Network::Tron, 1.0, "TWallet", "TRX");
        assert_eq!(tron.tx_hash, "feed");
    }
}
