//! Payment health monitoring.
//!
//! The monitor is a passive observer: the session manager and the chain adapters
//! feed it lifecycle transitions and errors, and it aggregates per-network counters,
//! a rolling window of confirmation latencies, and per-session error streaks. It
//! never mutates sessions. Crossing the error-streak thresholds emits structured
//! log events; nothing is exported beyond [`PaymentMonitor::report`].

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{error, warn};

use crate::error::{PaymentError, PaymentErrorKind};
use crate::network::Network;
use crate::session::{PaymentSession, PaymentStatus};
use crate::types::SessionId;

/// Confirmation latencies kept for averaging. Old samples fall off the back.
const PROCESSING_TIME_WINDOW: usize = 100;

/// Error-streak levels at which the monitor starts complaining in the logs.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct MonitorThresholds {
    #[serde(default = "monitor_defaults::warning")]
    pub warning: u32,
    #[serde(default = "monitor_defaults::critical")]
    pub critical: u32,
}

mod monitor_defaults {
    pub fn warning() -> u32 {
        3
    }
    pub fn critical() -> u32 {
        5
    }
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            warning: monitor_defaults::warning(),
            critical: monitor_defaults::critical(),
        }
    }
}

/// Counters for one network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkMetrics {
    pub created: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

impl NetworkMetrics {
    /// Confirmed share of resolved sessions, in [0, 1]. `None` until something resolves.
    pub fn success_rate(&self) -> Option<f64> {
        let resolved = self.confirmed + self.failed + self.timed_out;
        if resolved == 0 {
            return None;
        }
        Some(self.confirmed as f64 / resolved as f64)
    }
}

/// Aggregated snapshot returned by [`PaymentMonitor::report`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub networks: Vec<(Network, NetworkMetrics)>,
    pub error_kinds: Vec<(PaymentErrorKind, u64)>,
    /// Mean confirmation latency over the rolling window, in milliseconds.
    pub average_processing_ms: Option<u64>,
}

/// Shared, concurrency-safe payment health aggregator.
pub struct PaymentMonitor {
    thresholds: MonitorThresholds,
    networks: DashMap<Network, NetworkMetrics>,
    error_kinds: DashMap<PaymentErrorKind, u64>,
    session_errors: DashMap<SessionId, u32>,
    /// Sessions already counted against a terminal counter. Re-stamping a
    /// terminal status (a retry past the limit does this) must not count twice.
    resolutions: DashSet<SessionId>,
    processing_times: Mutex<VecDeque<u64>>,
}

impl Default for PaymentMonitor {
    fn default() -> Self {
        Self::new(MonitorThresholds::default())
    }
}

impl PaymentMonitor {
    pub fn new(thresholds: MonitorThresholds) -> Self {
        PaymentMonitor {
            thresholds,
            networks: DashMap::new(),
            error_kinds: DashMap::new(),
            session_errors: DashMap::new(),
            resolutions: DashSet::new(),
            processing_times: Mutex::new(VecDeque::with_capacity(PROCESSING_TIME_WINDOW)),
        }
    }

    pub fn record_created(&self, session: &PaymentSession) {
        self.networks.entry(session.network).or_default().created += 1;
    }

    /// Observes a status transition. Resolution statuses update the per-network
    /// counters; a confirmation also contributes its latency sample and clears the
    /// session's error streak. A session lands in the terminal counters at most
    /// once, however often its terminal status is re-stamped.
    pub fn observe_transition(&self, session: &PaymentSession) {
        match session.status {
            PaymentStatus::Confirmed => {
                if self.resolutions.insert(session.id.clone()) {
                    self.networks.entry(session.network).or_default().confirmed += 1;
                    self.record_processing_time(session.updated_at - session.created_at);
                }
                self.session_errors.remove(&session.id);
            }
            PaymentStatus::Failed | PaymentStatus::Expired => {
                if self.resolutions.insert(session.id.clone()) {
                    self.networks.entry(session.network).or_default().failed += 1;
                }
            }
            PaymentStatus::Timeout => {
                self.networks.entry(session.network).or_default().timed_out += 1;
            }
            PaymentStatus::Pending | PaymentStatus::Processing => {}
        }
    }

    /// Records a payment error against a session and logs when the session's
    /// streak crosses a threshold.
    pub fn record_error(&self, session_id: &SessionId, network: Network, error: &PaymentError) {
        let kind = error.kind();
        *self.error_kinds.entry(kind).or_insert(0) += 1;
        let streak = {
            let mut entry = self.session_errors.entry(session_id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        if streak >= self.thresholds.critical {
            error!(
                session_id = %session_id,
                %network,
                error_kind = ?kind,
                streak,
                "Session error streak crossed critical threshold"
            );
        } else if streak >= self.thresholds.warning {
            warn!(
                session_id = %session_id,
                %network,
                error_kind = ?kind,
                streak,
                "Session error streak crossed warning threshold"
            );
        }
    }

    pub fn error_streak(&self, session_id: &SessionId) -> u32 {
        self.session_errors
            .get(session_id)
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    pub fn network_metrics(&self, network: Network) -> NetworkMetrics {
        self.networks
            .get(&network)
            .map(|entry| *entry)
            .unwrap_or_default()
    }

    pub fn report(&self) -> MonitorReport {
        let mut networks: Vec<_> = self
            .networks
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        networks.sort_by_key(|(network, _)| *network as u8);
        let mut error_kinds: Vec<_> = self
            .error_kinds
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        error_kinds.sort_by_key(|(kind, _)| *kind as u8);
        MonitorReport {
            networks,
            error_kinds,
            average_processing_ms: self.average_processing_ms(),
        }
    }

    pub fn average_processing_ms(&self) -> Option<u64> {
        let samples = match self.processing_times.lock() {
            Ok(samples) => samples,
            Err(poisoned) => poisoned.into_inner(),
        };
        if samples.is_empty() {
            return None;
        }
        let sum: u64 = samples.iter().sum();
        Some(sum / samples.len() as u64)
    }

    pub fn reset(&self) {
        self.networks.clear();
        self.error_kinds.clear();
        self.session_errors.clear();
        self.resolutions.clear();
        let mut samples = match self.processing_times.lock() {
            Ok(samples) => samples,
            Err(poisoned) => poisoned.into_inner(),
        };
        samples.clear();
    }

    fn record_processing_time(&self, elapsed_ms: u64) {
        let mut samples = match self.processing_times.lock() {
            Ok(samples) => samples,
            Err(poisoned) => poisoned.into_inner(),
        };
        if samples.len() == PROCESSING_TIME_WINDOW {
            samples.pop_front();
        }
        samples.push_back(elapsed_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::supported_tokens;
    use crate::timestamp::UnixMillis;

    fn session(network: Network, status: PaymentStatus, elapsed_ms: u64) -> PaymentSession {
        let token = supported_tokens(network)[0].clone();
        let created_at = UnixMillis::from_millis(1_700_000_000_000);
        PaymentSession {
            id: SessionId::random(),
            user_id: "user123".into(),
            network,
            token,
            amount: "1000000".parse().unwrap(),
            service_type: "token_creation".into(),
            status,
            tx_hash: None,
            error: None,
            created_at,
            updated_at: created_at + elapsed_ms,
            expires_at: created_at + 10_000,
            retry_count: 0,
        }
    }

    #[test]
    fn test_network_counters() {
        let monitor = PaymentMonitor::default();
        let confirmed = session(Network::Ethereum, PaymentStatus::Confirmed, 4_000);
        monitor.record_created(&confirmed);
        monitor.observe_transition(&confirmed);
        let failed = session(Network::Ethereum, PaymentStatus::Failed, 2_000);
        monitor.record_created(&failed);
        monitor.observe_transition(&failed);
        let timed_out = session(Network::Polygon, PaymentStatus::Timeout, 10_000);
        monitor.record_created(&timed_out);
        monitor.observe_transition(&timed_out);

        let eth = monitor.network_metrics(Network::Ethereum);
        assert_eq!(eth.created, 2);
        assert_eq!(eth.confirmed, 1);
        assert_eq!(eth.failed, 1);
        assert_eq!(eth.success_rate(), Some(0.5));

        let polygon = monitor.network_metrics(Network::Polygon);
        assert_eq!(polygon.timed_out, 1);
        assert_eq!(polygon.success_rate(), Some(0.0));

        assert_eq!(
            monitor.network_metrics(Network::Solana),
            NetworkMetrics::default()
        );
    }

    #[test]
    fn test_restamped_terminal_status_counts_once() {
        let monitor = PaymentMonitor::default();
        // Each retry attempt past the limit re-stamps FAILED on the same session.
        let failed = session(Network::Ethereum, PaymentStatus::Failed, 2_000);
        monitor.observe_transition(&failed);
        monitor.observe_transition(&failed);
        monitor.observe_transition(&failed);
        assert_eq!(monitor.network_metrics(Network::Ethereum).failed, 1);

        let confirmed = session(Network::Ethereum, PaymentStatus::Confirmed, 4_000);
        monitor.observe_transition(&confirmed);
        monitor.observe_transition(&confirmed);
        let eth = monitor.network_metrics(Network::Ethereum);
        assert_eq!(eth.confirmed, 1);
        assert_eq!(eth.success_rate(), Some(0.5));
        assert_eq!(monitor.average_processing_ms(), Some(4_000));
    }

    #[test]
    fn test_pending_and_processing_are_not_resolutions() {
        let monitor = PaymentMonitor::default();
        monitor.observe_transition(&session(Network::Ethereum, PaymentStatus::Pending, 0));
        monitor.observe_transition(&session(Network::Ethereum, PaymentStatus::Processing, 100));
        assert_eq!(
            monitor.network_metrics(Network::Ethereum),
            NetworkMetrics::default()
        );
    }

    #[test]
    fn test_processing_time_average() {
        let monitor = PaymentMonitor::default();
        assert_eq!(monitor.average_processing_ms(), None);
        monitor.observe_transition(&session(Network::Ethereum, PaymentStatus::Confirmed, 2_000));
        monitor.observe_transition(&session(Network::Ethereum, PaymentStatus::Confirmed, 4_000));
        assert_eq!(monitor.average_processing_ms(), Some(3_000));
    }

    #[test]
    fn test_processing_window_is_bounded() {
        let monitor = PaymentMonitor::default();
        for _ in 0..PROCESSING_TIME_WINDOW {
            monitor.observe_transition(&session(
                Network::Ethereum,
                PaymentStatus::Confirmed,
                10_000,
            ));
        }
        for _ in 0..PROCESSING_TIME_WINDOW {
            monitor.observe_transition(&session(Network::Ethereum, PaymentStatus::Confirmed, 100));
        }
        // Only the most recent window's worth of samples survives.
        assert_eq!(monitor.average_processing_ms(), Some(100));
    }

    #[test]
    fn test_error_streaks_and_kinds() {
        let monitor = PaymentMonitor::default();
        let id = SessionId::from("ps-errors");
        let network_error = PaymentError::Network("rpc unreachable".into());
        monitor.record_error(&id, Network::BinanceSmartChain, &network_error);
        monitor.record_error(&id, Network::BinanceSmartChain, &network_error);
        assert_eq!(monitor.error_streak(&id), 2);
        assert_eq!(monitor.error_streak(&SessionId::from("other")), 0);

        let report = monitor.report();
        assert_eq!(
            report.error_kinds,
            vec![(PaymentErrorKind::NetworkError, 2)]
        );
    }

    #[test]
    fn test_confirmation_clears_streak() {
        let monitor = PaymentMonitor::default();
        let mut confirmed = session(Network::Ethereum, PaymentStatus::Confirmed, 1_000);
        monitor.record_error(
            &confirmed.id,
            Network::Ethereum,
            &PaymentError::Timeout("slow".into()),
        );
        assert_eq!(monitor.error_streak(&confirmed.id), 1);
        confirmed.status = PaymentStatus::Confirmed;
        monitor.observe_transition(&confirmed);
        assert_eq!(monitor.error_streak(&confirmed.id), 0);
    }

    #[test]
    fn test_reset() {
        let monitor = PaymentMonitor::default();
        monitor.observe_transition(&session(Network::Ethereum, PaymentStatus::Confirmed, 1_000));
        monitor.record_error(
            &SessionId::from("ps-1"),
            Network::Ethereum,
            &PaymentError::Network("boom".into()),
        );
        monitor.reset();
        let report = monitor.report();
        assert!(report.networks.is_empty());
        assert!(report.error_kinds.is_empty());
        assert_eq!(report.average_processing_ms, None);
    }
}
