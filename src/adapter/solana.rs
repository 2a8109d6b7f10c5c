//! Solana payment adapter.
//!
//! Structurally different from the EVM family: amounts are 64-bit (lamports and
//! SPL base units), transfers go directly to the receiver's account or associated
//! token account rather than through a gateway contract, and finality is a
//! commitment level on the transaction signature rather than a confirmation depth.
//! The [`ChainAdapter`] contract is identical regardless: infallible token probe,
//! FAILED-before-rethrow, and CONFIRMED only once the chain says so.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_keypair::Keypair;
use solana_message::Message;
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::Transaction;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{ChainAdapter, PaymentOptions};
use crate::error::PaymentError;
use crate::monitor::PaymentMonitor;
use crate::network::{Network, supported_tokens};
use crate::retry::{RetryPolicy, with_retry};
use crate::session::{PaymentStatus, SessionManager, SessionPatch};
use crate::types::{SessionId, SolanaAddress, TokenRef, TransactionHash};
use crate::validation;

const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Signature status polling cadence and budget. Ninety polls at two seconds is
/// comfortably beyond worst-case finalization.
const COMMITMENT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const COMMITMENT_POLL_ATTEMPTS: u32 = 90;

/// RPC boundary of the Solana adapter.
#[async_trait]
pub trait SolanaGateway: Send + Sync + 'static {
    fn payer(&self) -> SolanaAddress;

    async fn lamport_balance(&self) -> Result<u64, PaymentError>;

    async fn token_balance(&self, mint: SolanaAddress) -> Result<u64, PaymentError>;

    async fn transfer_lamports(&self, amount: u64) -> Result<TransactionHash, PaymentError>;

    async fn transfer_spl(
        &self,
        mint: SolanaAddress,
        amount: u64,
    ) -> Result<TransactionHash, PaymentError>;

    /// Whether the signature has reached the gateway's commitment level.
    /// `Ok(false)` while in flight; `Err(TransactionFailed)` if the transaction
    /// landed but failed on-chain.
    async fn is_confirmed(&self, signature: &TransactionHash) -> Result<bool, PaymentError>;
}

/// Payment adapter for Solana.
pub struct SolanaPaymentAdapter<G> {
    gateway: Arc<G>,
    sessions: SessionManager,
    monitor: Option<Arc<PaymentMonitor>>,
    retry: RetryPolicy,
}

impl<G: SolanaGateway> SolanaPaymentAdapter<G> {
    pub fn new(
        gateway: Arc<G>,
        sessions: SessionManager,
        monitor: Option<Arc<PaymentMonitor>>,
        retry: RetryPolicy,
    ) -> Self {
        SolanaPaymentAdapter {
            gateway,
            sessions,
            monitor,
            retry,
        }
    }

    /// The account that signs and funds payments.
    pub fn payer(&self) -> SolanaAddress {
        self.gateway.payer()
    }

    async fn execute(
        &self,
        session_id: &SessionId,
        _options: &PaymentOptions,
    ) -> Result<TransactionHash, PaymentError> {
        let session = self
            .sessions
            .get_session(session_id)
            .ok_or_else(|| PaymentError::session_not_found(session_id))?;
        if session.network != Network::Solana {
            return Err(PaymentError::Validation(format!(
                "Session {session_id} targets {}, not solana",
                session.network
            )));
        }
        validation::validate_amount(session.amount)?;
        validation::validate_token_ref(&session.token.address, Network::Solana)?;
        let amount = session.amount.try_as_u64().ok_or_else(|| {
            PaymentError::Validation(format!(
                "Amount {} does not fit the 64-bit range Solana amounts use",
                session.amount
            ))
        })?;
        if !self.is_token_supported(&session.token.address).await {
            return Err(PaymentError::Validation(format!(
                "Token {} is not supported on solana",
                session.token.symbol
            )));
        }

        let balance = match session.token.address {
            TokenRef::Native => self.gateway.lamport_balance().await?,
            TokenRef::Spl(mint) => self.gateway.token_balance(mint).await?,
            TokenRef::Erc20(_) => {
                return Err(PaymentError::Validation(
                    "ERC-20 tokens cannot be paid on Solana".into(),
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
        let signature = with_retry(&self.retry, Some(session_id), || async {
            match session.token.address {
                TokenRef::Native => gateway.transfer_lamports(amount).await,
                TokenRef::Spl(mint) => gateway.transfer_spl(mint, amount).await,
                TokenRef::Erc20(_) => Err(PaymentError::Validation(
                    "ERC-20 tokens cannot be paid on Solana".into(),
                )),
            }
        })
        .await?;

        self.sessions
            .update_session(session_id, SessionPatch::tx_hash(signature.clone()))?;
        info!(
            session_id = %session_id,
            payer = %self.gateway.payer(),
            signature = %signature,
            "Payment submitted, awaiting commitment"
        );
        self.spawn_confirmation_poll(session_id.clone(), signature.clone());
        Ok(signature)
    }

    /// Polls signature status until the commitment level is reached, then moves the
    /// session to CONFIRMED. A definite on-chain failure, or exhausting the poll
    /// budget, moves it to FAILED instead.
    fn spawn_confirmation_poll(&self, session_id: SessionId, signature: TransactionHash) {
        let gateway = Arc::clone(&self.gateway);
        let sessions = self.sessions.clone();
        let monitor = self.monitor.clone();
        tokio::spawn(async move {
            for _ in 0..COMMITMENT_POLL_ATTEMPTS {
                match gateway.is_confirmed(&signature).await {
                    Ok(true) => {
                        info!(session_id = %session_id, %signature, "Payment confirmed on-chain");
                        if let Err(error) = sessions.update_session_status(
                            &session_id,
                            PaymentStatus::Confirmed,
                            Some(signature.clone()),
                            None,
                        ) {
                            warn!(session_id = %session_id, %error, "Failed to record confirmation");
                        }
                        return;
                    }
                    Ok(false) => {}
                    Err(error @ PaymentError::TransactionFailed(_)) => {
                        warn!(session_id = %session_id, %error, "Payment failed on-chain");
                        let _ = sessions.update_session_status(
                            &session_id,
                            PaymentStatus::Failed,
                            None,
                            Some(error.to_string()),
                        );
                        if let Some(monitor) = &monitor {
                            monitor.record_error(&session_id, Network::Solana, &error);
                        }
                        return;
                    }
                    Err(error) => {
                        debug!(session_id = %session_id, %error, "Signature status check failed");
                    }
                }
                tokio::time::sleep(COMMITMENT_POLL_INTERVAL).await;
            }
            let error = PaymentError::Timeout(format!(
                "Signature {signature} did not reach commitment within the poll budget"
            ));
            let _ = sessions.update_session_status(
                &session_id,
                PaymentStatus::Failed,
                None,
                Some(error.to_string()),
            );
            if let Some(monitor) = &monitor {
                monitor.record_error(&session_id, Network::Solana, &error);
            }
        });
    }
}

#[async_trait]
impl<G: SolanaGateway> ChainAdapter for SolanaPaymentAdapter<G> {
    fn network(&self) -> Network {
        Network::Solana
    }

    async fn is_token_supported(&self, token: &TokenRef) -> bool {
        match token {
            TokenRef::Native => true,
            TokenRef::Spl(mint) => supported_tokens(Network::Solana)
                .iter()
                .any(|candidate| candidate.address == TokenRef::Spl(*mint)),
            TokenRef::Erc20(_) => false,
        }
    }

    async fn pay_with_token(
        &self,
        session_id: &SessionId,
        options: &PaymentOptions,
    ) -> Result<TransactionHash, PaymentError> {
        match self.execute(session_id, options).await {
            Ok(signature) => Ok(signature),
            Err(error) => {
                if let Err(update_error) = self.sessions.update_session_status(
                    session_id,
                    PaymentStatus::Failed,
                    None,
                    Some(error.to_string()),
                ) {
                    warn!(session_id = %session_id, %update_error, "Failed to mark session FAILED");
                }
                if let Some(monitor) = &self.monitor {
                    monitor.record_error(session_id, Network::Solana, &error);
                }
                Err(error)
            }
        }
    }
}

/// Gateway implementation over the nonblocking Solana RPC client with a local
/// keypair. Payments are direct transfers to the configured receiver.
pub struct SolanaRpcGateway {
    rpc_client: Arc<RpcClient>,
    keypair: Keypair,
    receiver: Pubkey,
    commitment: CommitmentConfig,
}

impl SolanaRpcGateway {
    pub fn connect(
        rpc_url: &Url,
        receiver: SolanaAddress,
        private_key_base58: &str,
        commitment: CommitmentConfig,
    ) -> Result<Self, PaymentError> {
        let bytes = bs58::decode(private_key_base58)
            .into_vec()
            .map_err(|e| PaymentError::Wallet(format!("Invalid private key: {e}")))?;
        let keypair = Keypair::try_from(bytes.as_slice())
            .map_err(|e| PaymentError::Wallet(format!("Invalid private key: {e}")))?;
        let rpc_client = Arc::new(RpcClient::new(rpc_url.to_string()));
        info!(payer = %keypair.pubkey(), receiver = %receiver, "Connected Solana gateway");
        Ok(SolanaRpcGateway {
            rpc_client,
            keypair,
            receiver: receiver.0,
            commitment,
        })
    }

    fn associated_token_account(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        let (ata, _) = Pubkey::find_program_address(
            &[owner.as_ref(), spl_token::id().as_ref(), mint.as_ref()],
            &ATA_PROGRAM_PUBKEY,
        );
        ata
    }
}

fn rpc_error(context: &str, error: impl std::fmt::Display) -> PaymentError {
    PaymentError::Network(format!("{context}: {error}"))
}

#[async_trait]
impl SolanaGateway for SolanaRpcGateway {
    fn payer(&self) -> SolanaAddress {
        SolanaAddress(self.keypair.pubkey())
    }

    async fn lamport_balance(&self) -> Result<u64, PaymentError> {
        self.rpc_client
            .get_balance(&self.keypair.pubkey())
            .await
            .map_err(|e| rpc_error("getBalance failed", e))
    }

    async fn token_balance(&self, mint: SolanaAddress) -> Result<u64, PaymentError> {
        let ata = Self::associated_token_account(&self.keypair.pubkey(), &mint.0);
        let balance = self
            .rpc_client
            .get_token_account_balance(&ata)
            .await
            .map_err(|e| rpc_error("getTokenAccountBalance failed", e))?;
        balance
            .amount
            .parse::<u64>()
            .map_err(|e| PaymentError::Network(format!("Unparseable token balance: {e}")))
    }

    async fn transfer_lamports(&self, amount: u64) -> Result<TransactionHash, PaymentError> {
        let payer = self.keypair.pubkey();
        let instruction =
            solana_system_interface::instruction::transfer(&payer, &self.receiver, amount);
        let blockhash = self
            .rpc_client
            .get_latest_blockhash()
            .await
            .map_err(|e| rpc_error("getLatestBlockhash failed", e))?;
        let message = Message::new(&[instruction], Some(&payer));
        let transaction = Transaction::new(&[&self.keypair], message, blockhash);
        let signature = self
            .rpc_client
            .send_transaction(&transaction)
            .await
            .map_err(|e| PaymentError::TransactionFailed(format!("sendTransaction failed: {e}")))?;
        Ok(signature.into())
    }

    async fn transfer_spl(
        &self,
        mint: SolanaAddress,
        amount: u64,
    ) -> Result<TransactionHash, PaymentError> {
        let payer = self.keypair.pubkey();
        let source = Self::associated_token_account(&payer, &mint.0);
        let destination = Self::associated_token_account(&self.receiver, &mint.0);
        let instruction = spl_token::instruction::transfer(
            &spl_token::id(),
            &source,
            &destination,
            &payer,
            &[],
            amount,
        )
        .map_err(|e| PaymentError::Validation(format!("Malformed transfer instruction: {e}")))?;
        let blockhash = self
            .rpc_client
            .get_latest_blockhash()
            .await
            .map_err(|e| rpc_error("getLatestBlockhash failed", e))?;
        let message = Message::new(&[instruction], Some(&payer));
        let transaction = Transaction::new(&[&self.keypair], message, blockhash);
        let signature = self
            .rpc_client
            .send_transaction(&transaction)
            .await
            .map_err(|e| PaymentError::TransactionFailed(format!("sendTransaction failed: {e}")))?;
        Ok(signature.into())
    }

    async fn is_confirmed(&self, signature: &TransactionHash) -> Result<bool, PaymentError> {
        let signature = Signature::from_str(signature.as_str())
            .map_err(|e| PaymentError::Validation(format!("Malformed signature: {e}")))?;
        let status = self
            .rpc_client
            .get_signature_status_with_commitment(&signature, self.commitment)
            .await
            .map_err(|e| rpc_error("getSignatureStatuses failed", e))?;
        match status {
            Some(Ok(())) => Ok(true),
            Some(Err(error)) => Err(PaymentError::TransactionFailed(format!(
                "Transaction failed on-chain: {error}"
            ))),
            None => Ok(false),
        }
    }
}
