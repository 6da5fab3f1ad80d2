// DANS : src/communication.rs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tracing::info;

use crate::monitoring::metrics::ALERTS_EMITTED;

// --- PROTOCOLE DES ALERTES ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionAlert {
    pub transaction_signature: String,
    pub risk_score: f64,
    pub detected_patterns: BTreeSet<String>,
    /// Secondes epoch.
    pub timestamp: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PoolEventType {
    Impact,
    Removal,
}

impl PoolEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Impact => "impact",
            Self::Removal => "removal",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PoolAlert {
    pub pool_mint: String,
    pub event_type: PoolEventType,
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    Transaction(TransactionAlert),
    Pool(PoolAlert),
}

impl Alert {
    /// Label utilisé pour les métriques.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transaction(_) => "transaction",
            Self::Pool(alert) => alert.event_type.as_str(),
        }
    }
}

impl From<TransactionAlert> for Alert {
    fn from(value: TransactionAlert) -> Self {
        Self::Transaction(value)
    }
}

impl From<PoolAlert> for Alert {
    fn from(value: PoolAlert) -> Self {
        Self::Pool(value)
    }
}

// --- SORTIES ---

/// Destination des alertes. Livraison "at-least-once" : un consommateur doit tolérer les doublons.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, alert: Alert) -> Result<()>;
}

/// Écrit chaque alerte comme une ligne de log structurée.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn emit(&self, alert: Alert) -> Result<()> {
        let payload = serde_json::to_string(&alert)?;
        info!(target: "sentinel::alerts", kind = alert.kind(), alert = %payload, "[Alerte] Anomalie détectée.");
        ALERTS_EMITTED.with_label_values(&[alert.kind()]).inc();
        Ok(())
    }
}

/// Pousse les alertes dans un canal tokio (tests, ou relais vers un autre service).
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    sender: mpsc::Sender<Alert>,
}

impl ChannelAlertSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl AlertSink for ChannelAlertSink {
    async fn emit(&self, alert: Alert) -> Result<()> {
        let kind = alert.kind();
        self.sender
            .send(alert)
            .await
            .map_err(|_| anyhow!("Le récepteur des alertes a été fermé"))?;
        ALERTS_EMITTED.with_label_values(&[kind]).inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pool_alert_wire_format() {
        let alert = Alert::from(PoolAlert {
            pool_mint: "PoolTokenMint123".into(),
            event_type: PoolEventType::Removal,
            value: 1.0,
            timestamp: 1678901234,
        });

        assert_eq!(
            serde_json::to_value(&alert).unwrap(),
            json!({
                "kind": "pool",
                "pool_mint": "PoolTokenMint123",
                "event_type": "removal",
                "value": 1.0,
                "timestamp": 1678901234
            })
        );
        assert_eq!(alert.kind(), "removal");
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelAlertSink::new(4);
        for signature in ["first", "second"] {
            let alert = TransactionAlert {
                transaction_signature: signature.into(),
                risk_score: 0.5,
                detected_patterns: BTreeSet::from(["cyclic".to_string()]),
                timestamp: 0,
            };
            sink.emit(alert.into()).await.unwrap();
        }

        let received: Vec<String> = [rx.recv().await.unwrap(), rx.recv().await.unwrap()]
            .into_iter()
            .map(|alert| match alert {
                Alert::Transaction(tx) => tx.transaction_signature,
                Alert::Pool(_) => unreachable!(),
            })
            .collect();
        assert_eq!(received, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_channel_sink_fails_when_receiver_dropped() {
        let (sink, rx) = ChannelAlertSink::new(1);
        drop(rx);
        let alert = PoolAlert { pool_mint: "M".into(), event_type: PoolEventType::Impact, value: 0.2, timestamp: 0 };
        assert!(sink.emit(alert.into()).await.is_err());
    }
}
