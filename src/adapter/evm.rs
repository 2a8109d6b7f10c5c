//! EVM payment adapter: Ethereum, BNB Smart Chain, and Polygon.
//!
//! One implementation serves all three networks; they differ only in chain id,
//! confirmation depth, and fee model, all of which come from
//! [`Network`](crate::network::Network). The on-chain side is a payment gateway
//! contract: ERC-20 payments run approve-then-`payWithToken`, native payments
//! attach value to `payWithNativeToken`, and the gateway emits `PaymentReceived`
//! with the session id as the correlation key.
//!
//! The adapter is generic over [`EvmGateway`], the narrow RPC boundary. The real
//! implementation is [`AlloyGateway`]; tests drive the orchestration logic with an
//! in-memory mock.

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::sol;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{ChainAdapter, PaymentOptions, PaymentReceivedEvent};
use crate::error::PaymentError;
use crate::monitor::PaymentMonitor;
use crate::network::{Network, NetworkFamily};
use crate::retry::{RetryPolicy, with_retry};
use crate::session::{PaymentStatus, SessionManager, SessionPatch};
use crate::types::{EvmAddress, SessionId, TokenRef, TransactionHash};
use crate::validation;

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IPaymentGateway {
        function isTokenSupported(address token) external view returns (bool);
        function payWithToken(address token, uint256 amount, string serviceType, string sessionId) external;
        function payWithNativeToken(string serviceType, string sessionId) external payable;
        event PaymentReceived(address indexed payer, address indexed token, uint256 amount, string serviceType, string sessionId);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// How often the event watcher re-checks confirmation depth for an observed
/// payment before declaring it final.
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// RPC boundary of the EVM adapter. Everything that talks to a node lives behind
/// this trait; the adapter above it holds the orchestration rules.
#[async_trait]
pub trait EvmGateway: Send + Sync + 'static {
    fn payer(&self) -> EvmAddress;

    async fn is_token_supported(&self, token: EvmAddress) -> Result<bool, PaymentError>;

    async fn native_balance(&self) -> Result<U256, PaymentError>;

    async fn token_balance(&self, token: EvmAddress) -> Result<U256, PaymentError>;

    /// Makes sure the gateway may pull `amount` of `token` from the payer,
    /// submitting an `approve` when the current allowance is short.
    async fn ensure_allowance(&self, token: EvmAddress, amount: U256)
    -> Result<(), PaymentError>;

    async fn submit_token_payment(
        &self,
        token: EvmAddress,
        amount: U256,
        service_type: &str,
        session_id: &SessionId,
        options: &PaymentOptions,
    ) -> Result<B256, PaymentError>;

    async fn submit_native_payment(
        &self,
        amount: U256,
        service_type: &str,
        session_id: &SessionId,
        options: &PaymentOptions,
    ) -> Result<B256, PaymentError>;

    /// Stream of decoded `PaymentReceived` events, starting from subscription time.
    async fn payment_events(
        &self,
    ) -> Result<BoxStream<'static, PaymentReceivedEvent>, PaymentError>;

    /// Blocks mined at or above the transaction's block, 0 while unmined.
    async fn confirmations(&self, tx_hash: &TransactionHash) -> Result<u64, PaymentError>;
}

/// Payment adapter for one EVM network.
pub struct EvmPaymentAdapter<G> {
    network: Network,
    gateway: Arc<G>,
    sessions: SessionManager,
    monitor: Option<Arc<PaymentMonitor>>,
    retry: RetryPolicy,
}

impl<G: EvmGateway> EvmPaymentAdapter<G> {
    pub fn new(
        network: Network,
        gateway: Arc<G>,
        sessions: SessionManager,
        monitor: Option<Arc<PaymentMonitor>>,
        retry: RetryPolicy,
    ) -> Result<Self, PaymentError> {
        if network.family() != NetworkFamily::Evm {
            return Err(PaymentError::Validation(format!(
                "{network} is not an EVM network"
            )));
        }
        Ok(EvmPaymentAdapter {
            network,
            gateway,
            sessions,
            monitor,
            retry,
        })
    }

    /// The account that signs and funds payments on this network.
    pub fn payer(&self) -> EvmAddress {
        self.gateway.payer()
    }

    /// Spawns the confirmation watcher: consumes gateway `PaymentReceived` events,
    /// waits until the network's confirmation depth is reached, then moves the
    /// session to CONFIRMED with the event's transaction hash. Events for sessions
    /// this manager does not know, or that are already terminal, are skipped.
    pub async fn start_event_watch(&self) -> Result<JoinHandle<()>, PaymentError> {
        let mut events = self.gateway.payment_events().await?;
        let gateway = Arc::clone(&self.gateway);
        let sessions = self.sessions.clone();
        let required_depth = self.network.confirmation_depth();
        let network = self.network;
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(session) = sessions.get_session(&event.session_id) else {
                    continue;
                };
                if session.status.is_terminal() {
                    continue;
                }
                loop {
                    match gateway.confirmations(&event.tx_hash).await {
                        Ok(depth) if depth >= required_depth => break,
                        Ok(depth) => {
                            debug!(
                                session_id = %event.session_id,
                                tx_hash = %event.tx_hash,
                                depth,
                                required_depth,
                                "Waiting for confirmations"
                            );
                        }
                        Err(error) => {
                            debug!(session_id = %event.session_id, %error, "Confirmation check failed");
                        }
                    }
                    tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
                }
                info!(
                    session_id = %event.session_id,
                    %network,
                    tx_hash = %event.tx_hash,
                    "Payment confirmed on-chain"
                );
                if let Err(error) = sessions.update_session_status(
                    &event.session_id,
                    PaymentStatus::Confirmed,
                    Some(event.tx_hash.clone()),
                    None,
                ) {
                    warn!(session_id = %event.session_id, %error, "Failed to record confirmation");
                }
            }
        });
        Ok(handle)
    }

    async fn execute(
        &self,
        session_id: &SessionId,
        options: &PaymentOptions,
    ) -> Result<TransactionHash, PaymentError> {
        let session = self
            .sessions
            .get_session(session_id)
            .ok_or_else(|| PaymentError::session_not_found(session_id))?;
        if session.network != self.network {
            return Err(PaymentError::Validation(format!(
                "Session {session_id} targets {}, not {}",
                session.network, self.network
            )));
        }
        validation::validate_amount(session.amount)?;
        validation::validate_token_ref(&session.token.address, self.network)?;
        validation::validate_gas_limit(options.gas_limit)?;
        if !self.is_token_supported(&session.token.address).await {
            return Err(PaymentError::Validation(format!(
                "Token {} is not supported by the payment gateway on {}",
                session.token.symbol, self.network
            )));
        }

        let amount = session.amount.0;
        let balance = match session.token.address {
            TokenRef::Native => self.gateway.native_balance().await?,
            TokenRef::Erc20(token) => self.gateway.token_balance(token).await?,
            TokenRef::Spl(_) => {
                return Err(PaymentError::Validation(
                    "SPL tokens cannot be paid through an EVM gateway".into(),
                ));
            }
        };
        if balance < amount {
            return Err(PaymentError::InsufficientFunds(format!(
                "balance {balance} is below the payment amount {amount}"
            )));
        }

        self.sessions
            .update_session_status(session_id, PaymentStatus::Processing, None, None)?;

        let gateway = &self.gateway;
        let service_type = session.service_type.as_str();
        let hash = with_retry(&self.retry, Some(session_id), || async {
            match session.token.address {
                TokenRef::Native => {
                    gateway
                        .submit_native_payment(amount, service_type, session_id, options)
                        .await
                }
                TokenRef::Erc20(token) => {
                    gateway.ensure_allowance(token, amount).await?;
                    gateway
                        .submit_token_payment(token, amount, service_type, session_id, options)
                        .await
                }
                TokenRef::Spl(_) => Err(PaymentError::Validation(
                    "SPL tokens cannot be paid through an EVM gateway".into(),
                )),
            }
        })
        .await?;

        // Provisional: the hash is recorded at submission, confirmation comes from
        // the event watcher.
        let tx_hash = TransactionHash::from(hash);
        self.sessions
            .update_session(session_id, SessionPatch::tx_hash(tx_hash.clone()))?;
        info!(
            session_id = %session_id,
            network = %self.network,
            payer = %self.gateway.payer(),
            tx_hash = %tx_hash,
            "Payment submitted"
        );
        Ok(tx_hash)
    }
}

#[async_trait]
impl<G: EvmGateway> ChainAdapter for EvmPaymentAdapter<G> {
    fn network(&self) -> Network {
        self.network
    }

    async fn is_token_supported(&self, token: &TokenRef) -> bool {
        match token {
            TokenRef::Native => true,
            TokenRef::Erc20(address) => match self.gateway.is_token_supported(*address).await {
                Ok(supported) => supported,
                Err(error) => {
                    debug!(%error, token = %address, "Token support probe failed");
                    false
                }
            },
            TokenRef::Spl(_) => false,
        }
    }

    async fn pay_with_token(
        &self,
        session_id: &SessionId,
        options: &PaymentOptions,
    ) -> Result<TransactionHash, PaymentError> {
        match self.execute(session_id, options).await {
            Ok(tx_hash) => Ok(tx_hash),
            Err(error) => {
                // The session record carries the failure even if the caller drops
                // the returned error.
                if let Err(update_error) = self.sessions.update_session_status(
                    session_id,
                    PaymentStatus::Failed,
                    None,
                    Some(error.to_string()),
                ) {
                    warn!(session_id = %session_id, %update_error, "Failed to mark session FAILED");
                }
                if let Some(monitor) = &self.monitor {
                    monitor.record_error(session_id, self.network, &error);
                }
                Err(error)
            }
        }
    }
}

/// Gateway implementation over an Alloy HTTP provider with a local signer.
pub struct AlloyGateway {
    provider: DynProvider,
    gateway_address: Address,
    payer: Address,
}

impl AlloyGateway {
    pub fn connect(
        rpc_url: &Url,
        gateway_address: EvmAddress,
        private_key: &str,
    ) -> Result<Self, PaymentError> {
        let signer = PrivateKeySigner::from_str(private_key)
            .map_err(|e| PaymentError::Wallet(format!("Invalid private key: {e}")))?;
        let payer = signer.address();
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(rpc_url.clone())
            .erased();
        info!(%payer, gateway = %gateway_address, "Connected EVM gateway");
        Ok(AlloyGateway {
            provider,
            gateway_address: gateway_address.into(),
            payer,
        })
    }

    fn gateway_contract(
        &self,
    ) -> IPaymentGateway::IPaymentGatewayInstance<DynProvider> {
        IPaymentGateway::new(self.gateway_address, self.provider.clone())
    }

    fn parse_tx_hash(tx_hash: &TransactionHash) -> Result<B256, PaymentError> {
        B256::from_str(tx_hash.as_str())
            .map_err(|e| PaymentError::Validation(format!("Malformed transaction hash: {e}")))
    }
}

fn rpc_error(context: &str, error: impl std::fmt::Display) -> PaymentError {
    PaymentError::Network(format!("{context}: {error}"))
}

fn send_error(context: &str, error: impl std::fmt::Display) -> PaymentError {
    PaymentError::TransactionFailed(format!("{context}: {error}"))
}

#[async_trait]
impl EvmGateway for AlloyGateway {
    fn payer(&self) -> EvmAddress {
        self.payer.into()
    }

    async fn is_token_supported(&self, token: EvmAddress) -> Result<bool, PaymentError> {
        self.gateway_contract()
            .isTokenSupported(token.into())
            .call()
            .await
            .map_err(|e| rpc_error("isTokenSupported call failed", e))
    }

    async fn native_balance(&self) -> Result<U256, PaymentError> {
        self.provider
            .get_balance(self.payer)
            .await
            .map_err(|e| rpc_error("eth_getBalance failed", e))
    }

    async fn token_balance(&self, token: EvmAddress) -> Result<U256, PaymentError> {
        let erc20 = IERC20::new(token.into(), &self.provider);
        erc20
            .balanceOf(self.payer)
            .call()
            .await
            .map_err(|e| rpc_error("balanceOf call failed", e))
    }

    async fn ensure_allowance(
        &self,
        token: EvmAddress,
        amount: U256,
    ) -> Result<(), PaymentError> {
        let erc20 = IERC20::new(token.into(), &self.provider);
        let allowance = erc20
            .allowance(self.payer, self.gateway_address)
            .call()
            .await
            .map_err(|e| rpc_error("allowance call failed", e))?;
        if allowance >= amount {
            return Ok(());
        }
        let pending = erc20
            .approve(self.gateway_address, amount)
            .send()
            .await
            .map_err(|e| send_error("approve failed", e))?;
        let hash = pending
            .watch()
            .await
            .map_err(|e| send_error("approve not mined", e))?;
        debug!(token = %token, %amount, tx_hash = %hash, "Approved gateway allowance");
        Ok(())
    }

    async fn submit_token_payment(
        &self,
        token: EvmAddress,
        amount: U256,
        service_type: &str,
        session_id: &SessionId,
        options: &PaymentOptions,
    ) -> Result<B256, PaymentError> {
        let contract = self.gateway_contract();
        let mut call = contract.payWithToken(
            token.into(),
            amount,
            service_type.to_string(),
            session_id.to_string(),
        );
        if let Some(gas_limit) = options.gas_limit {
            call = call.gas(gas_limit);
        }
        if let Some(max_fee) = options.max_fee_per_gas {
            call = call.max_fee_per_gas(max_fee);
        }
        if let Some(priority_fee) = options.max_priority_fee_per_gas {
            call = call.max_priority_fee_per_gas(priority_fee);
        }
        if let Some(nonce) = options.nonce {
            call = call.nonce(nonce);
        }
        let pending = call
            .send()
            .await
            .map_err(|e| send_error("payWithToken failed", e))?;
        Ok(*pending.tx_hash())
    }

    async fn submit_native_payment(
        &self,
        amount: U256,
        service_type: &str,
        session_id: &SessionId,
        options: &PaymentOptions,
    ) -> Result<B256, PaymentError> {
        let contract = self.gateway_contract();
        let mut call = contract
            .payWithNativeToken(service_type.to_string(), session_id.to_string())
            .value(amount);
        if let Some(gas_limit) = options.gas_limit {
            call = call.gas(gas_limit);
        }
        if let Some(max_fee) = options.max_fee_per_gas {
            call = call.max_fee_per_gas(max_fee);
        }
        if let Some(priority_fee) = options.max_priority_fee_per_gas {
            call = call.max_priority_fee_per_gas(priority_fee);
        }
        if let Some(nonce) = options.nonce {
            call = call.nonce(nonce);
        }
        let pending = call
            .send()
            .await
            .map_err(|e| send_error("payWithNativeToken failed", e))?;
        Ok(*pending.tx_hash())
    }

    async fn payment_events(
        &self,
    ) -> Result<BoxStream<'static, PaymentReceivedEvent>, PaymentError> {
        let (tx, rx) = tokio::sync::mpsc::channel::<PaymentReceivedEvent>(64);
        let provider = self.provider.clone();
        let address = self.gateway_address;
        tokio::spawn(async move {
            let contract = IPaymentGateway::new(address, provider);
            let poller = match contract.PaymentReceived_filter().watch().await {
                Ok(poller) => poller,
                Err(error) => {
                    warn!(%error, "Failed to install PaymentReceived watcher");
                    return;
                }
            };
            let mut stream = poller.into_stream();
            while let Some(item) = stream.next().await {
                let (event, log) = match item {
                    Ok(decoded) => decoded,
                    Err(error) => {
                        debug!(%error, "Dropping undecodable PaymentReceived log");
                        continue;
                    }
                };
                let Some(tx_hash) = log.transaction_hash else {
                    continue;
                };
                let token = if event.token == Address::ZERO {
                    TokenRef::Native
                } else {
                    TokenRef::Erc20(event.token.into())
                };
                let decoded = PaymentReceivedEvent {
                    payer: event.payer.to_string(),
                    token,
                    amount: event.amount.into(),
                    service_type: event.serviceType.clone(),
                    session_id: SessionId::from(event.sessionId.clone()),
                    tx_hash: TransactionHash::from(tx_hash),
                };
                if tx.send(decoded).await.is_err() {
                    break;
                }
            }
        });
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(stream.boxed())
    }

    async fn confirmations(&self, tx_hash: &TransactionHash) -> Result<u64, PaymentError> {
        let hash = Self::parse_tx_hash(tx_hash)?;
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| rpc_error("eth_getTransactionReceipt failed", e))?;
        let Some(mined_in) = receipt.and_then(|r| r.block_number) else {
            return Ok(0);
        };
        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| rpc_error("eth_blockNumber failed", e))?;
        Ok(head.saturating_sub(mined_in) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::supported_tokens;
    use crate::session::{NewSession, SessionConfig};
    use crate::sync::SyncChannel;
    use crate::types::TokenAmount;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    struct MockGateway {
        payer: EvmAddress,
        supported: Vec<Address>,
        probe_fails: bool,
        native_balance: U256,
        token_balance: U256,
        submit_failures: AtomicU32,
        submissions: AtomicU32,
        events: Mutex<Option<mpsc::Receiver<PaymentReceivedEvent>>>,
    }

    impl Default for MockGateway {
        fn default() -> Self {
            MockGateway {
                payer: "0x1111111111111111111111111111111111111111"
                    .parse()
                    .unwrap(),
                supported: vec![usdt_address().into()],
                probe_fails: false,
                native_balance: U256::MAX,
                token_balance: U256::MAX,
                submit_failures: AtomicU32::new(0),
                submissions: AtomicU32::new(0),
                events: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl EvmGateway for MockGateway {
        fn payer(&self) -> EvmAddress {
            self.payer
        }

        async fn is_token_supported(&self, token: EvmAddress) -> Result<bool, PaymentError> {
            if self.probe_fails {
                return Err(PaymentError::Network("rpc unreachable".into()));
            }
            Ok(self.supported.contains(&token.into()))
        }

        async fn native_balance(&self) -> Result<U256, PaymentError> {
            Ok(self.native_balance)
        }

        async fn token_balance(&self, _token: EvmAddress) -> Result<U256, PaymentError> {
            Ok(self.token_balance)
        }

        async fn ensure_allowance(
            &self,
            _token: EvmAddress,
            _amount: U256,
        ) -> Result<(), PaymentError> {
            Ok(())
        }

        async fn submit_token_payment(
            &self,
            _token: EvmAddress,
            _amount: U256,
            _service_type: &str,
            _session_id: &SessionId,
            _options: &PaymentOptions,
        ) -> Result<B256, PaymentError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            if self.submit_failures.load(Ordering::SeqCst) > 0 {
                self.submit_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(PaymentError::Network("connection reset".into()));
            }
            Ok(B256::repeat_byte(0xab))
        }

        async fn submit_native_payment(
            &self,
            _amount: U256,
            _service_type: &str,
            _session_id: &SessionId,
            _options: &PaymentOptions,
        ) -> Result<B256, PaymentError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(B256::repeat_byte(0xcd))
        }

        async fn payment_events(
            &self,
        ) -> Result<BoxStream<'static, PaymentReceivedEvent>, PaymentError> {
            let rx = self
                .events
                .lock()
                .unwrap()
                .take()
                .expect("payment_events requested twice");
            let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            });
            Ok(stream.boxed())
        }

        async fn confirmations(&self, _tx_hash: &TransactionHash) -> Result<u64, PaymentError> {
            Ok(64)
        }
    }

    fn usdt_address() -> EvmAddress {
        "0xdAC17F958D2ee523a2206206994597C13D831ec7"
            .parse()
            .unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 10,
            backoff_factor: 2.0,
            max_delay_ms: 40,
        }
    }

    fn adapter_with(
        gateway: MockGateway,
    ) -> (EvmPaymentAdapter<MockGateway>, SessionManager) {
        let sessions = SessionManager::new(SessionConfig::default(), &SyncChannel::new());
        let adapter = EvmPaymentAdapter::new(
            Network::Ethereum,
            Arc::new(gateway),
            sessions.clone(),
            None,
            fast_retry(),
        )
        .unwrap();
        (adapter, sessions)
    }

    fn usdt_session(sessions: &SessionManager, amount: &str) -> SessionId {
        sessions
            .create_session(NewSession {
                user_id: "user123".into(),
                amount: amount.parse().unwrap(),
                token: supported_tokens(Network::Ethereum)[1].clone(),
                service_type: "token_creation".into(),
            })
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_rejects_non_evm_network() {
        let sessions = SessionManager::new(SessionConfig::default(), &SyncChannel::new());
        let result = EvmPaymentAdapter::new(
            Network::Solana,
            Arc::new(MockGateway::default()),
            sessions.clone(),
            None,
            fast_retry(),
        );
        assert!(result.is_err());
        sessions.cleanup();
    }

    #[tokio::test]
    async fn test_payer_comes_from_gateway() {
        let (adapter, sessions) = adapter_with(MockGateway::default());
        assert_eq!(
            adapter.payer(),
            "0x1111111111111111111111111111111111111111"
                .parse()
                .unwrap()
        );
        sessions.cleanup();
    }

    #[tokio::test]
    async fn test_token_support_probe() {
        let (adapter, sessions) = adapter_with(MockGateway::default());
        assert!(adapter.is_token_supported(&TokenRef::Native).await);
        assert!(
            adapter
                .is_token_supported(&TokenRef::Erc20(usdt_address()))
                .await
        );
        let unknown = TokenRef::Erc20(
            "0x0000000000000000000000000000000000000001".parse().unwrap(),
        );
        assert!(!adapter.is_token_supported(&unknown).await);
        sessions.cleanup();
    }

    #[tokio::test]
    async fn test_probe_failure_reports_unsupported() {
        let gateway = MockGateway {
            probe_fails: true,
            ..Default::default()
        };
        let (adapter, sessions) = adapter_with(gateway);
        // Never an error, even when the RPC endpoint is down.
        assert!(
            !adapter
                .is_token_supported(&TokenRef::Erc20(usdt_address()))
                .await
        );
        sessions.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_submission_is_processing_not_confirmed() {
        let (adapter, sessions) = adapter_with(MockGateway::default());
        let id = usdt_session(&sessions, "1000000");

        let tx_hash = adapter
            .pay_with_token(&id, &PaymentOptions::default())
            .await
            .unwrap();

        let session = sessions.get_session(&id).unwrap();
        assert_eq!(session.status, PaymentStatus::Processing);
        assert_eq!(session.tx_hash, Some(tx_hash));
        sessions.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_watch_confirms_session() {
        let (events_tx, events_rx) = mpsc::channel(8);
        let gateway = MockGateway {
            events: Mutex::new(Some(events_rx)),
            ..Default::default()
        };
        let (adapter, sessions) = adapter_with(gateway);
        let id = usdt_session(&sessions, "1000000");
        let watcher = adapter.start_event_watch().await.unwrap();

        let tx_hash = adapter
            .pay_with_token(&id, &PaymentOptions::default())
            .await
            .unwrap();
        events_tx
            .send(PaymentReceivedEvent {
                payer: "0x1111111111111111111111111111111111111111".into(),
                token: TokenRef::Erc20(usdt_address()),
                amount: TokenAmount::from(1_000_000u64),
                service_type: "token_creation".into(),
                session_id: id.clone(),
                tx_hash: tx_hash.clone(),
            })
            .await
            .unwrap();
        // Let the watcher drain the event.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let session = sessions.get_session(&id).unwrap();
        assert_eq!(session.status, PaymentStatus::Confirmed);
        assert_eq!(session.tx_hash, Some(tx_hash));
        watcher.abort();
        sessions.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_session_event_is_skipped() {
        let (events_tx, events_rx) = mpsc::channel(8);
        let gateway = MockGateway {
            events: Mutex::new(Some(events_rx)),
            ..Default::default()
        };
        let (adapter, sessions) = adapter_with(gateway);
        let watcher = adapter.start_event_watch().await.unwrap();

        events_tx
            .send(PaymentReceivedEvent {
                payer: "0x1111111111111111111111111111111111111111".into(),
                token: TokenRef::Native,
                amount: TokenAmount::from(1u64),
                service_type: "token_creation".into(),
                session_id: SessionId::from("ps-unknown"),
                tx_hash: "0xabc".into(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(sessions.get_sessions().is_empty());
        watcher.abort();
        sessions.cleanup();
    }

    // A zero-amount session cannot be created through the manager; injecting one
    // directly shows the adapter rejects it before any network call.
    #[tokio::test(start_paused = true)]
    async fn test_zero_amount_rejected_before_any_network_call() {
        let (adapter, sessions) = adapter_with(MockGateway::default());
        let gateway = Arc::clone(&adapter.gateway);
        let id = usdt_session(&sessions, "1000000");
        let mut session = sessions.get_session(&id).unwrap();
        session.amount = TokenAmount::ZERO;
        sessions.adopt_session(session);

        let error = adapter
            .pay_with_token(&id, &PaymentOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Payment amount must be greater than 0");
        assert_eq!(gateway.submissions.load(Ordering::SeqCst), 0);
        assert_eq!(
            sessions.get_session(&id).unwrap().status,
            PaymentStatus::Failed
        );
        sessions.cleanup();
    }

    // Unsupported token: the failure lands on the session record before the error
    // is returned.
    #[tokio::test(start_paused = true)]
    async fn test_unsupported_token_marks_failed_then_returns_error() {
        let gateway = MockGateway {
            supported: vec![],
            ..Default::default()
        };
        let (adapter, sessions) = adapter_with(gateway);
        let id = usdt_session(&sessions, "1000000");

        let error = adapter
            .pay_with_token(&id, &PaymentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, PaymentError::Validation(_)));

        let session = sessions.get_session(&id).unwrap();
        assert_eq!(session.status, PaymentStatus::Failed);
        assert_eq!(session.error, Some(error.to_string()));
        sessions.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_funds() {
        let gateway = MockGateway {
            token_balance: U256::from(10u64),
            ..Default::default()
        };
        let (adapter, sessions) = adapter_with(gateway);
        let id = usdt_session(&sessions, "1000000");

        let error = adapter
            .pay_with_token(&id, &PaymentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, PaymentError::InsufficientFunds(_)));
        assert_eq!(
            sessions.get_session(&id).unwrap().status,
            PaymentStatus::Failed
        );
        sessions.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_submit_failures_are_retried() {
        let gateway = MockGateway {
            submit_failures: AtomicU32::new(2),
            ..Default::default()
        };
        let (adapter, sessions) = adapter_with(gateway);
        let gateway = Arc::clone(&adapter.gateway);
        let id = usdt_session(&sessions, "1000000");

        adapter
            .pay_with_token(&id, &PaymentOptions::default())
            .await
            .unwrap();
        assert_eq!(gateway.submissions.load(Ordering::SeqCst), 3);
        assert_eq!(
            sessions.get_session(&id).unwrap().status,
            PaymentStatus::Processing
        );
        sessions.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_mark_failed() {
        let gateway = MockGateway {
            submit_failures: AtomicU32::new(10),
            ..Default::default()
        };
        let (adapter, sessions) = adapter_with(gateway);
        let id = usdt_session(&sessions, "1000000");

        let error = adapter
            .pay_with_token(&id, &PaymentOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, PaymentError::Network(_)));

        let session = sessions.get_session(&id).unwrap();
        assert_eq!(session.status, PaymentStatus::Failed);
        assert_eq!(session.error, Some(error.to_string()));
        sessions.cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn test_gas_limit_override_validated() {
        let (adapter, sessions) = adapter_with(MockGateway::default());
        let id = usdt_session(&sessions, "1000000");

        let options = PaymentOptions {
            gas_limit: Some(0),
            ..Default::default()
        };
        let error = adapter.pay_with_token(&id, &options).await.unwrap_err();
        assert!(matches!(error, PaymentError::Validation(_)));
        sessions.cleanup();
    }
}
