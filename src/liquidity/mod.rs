pub mod cache;
pub mod impact;
pub mod pool_state;
pub mod tracker;

pub use cache::PoolRegistry;
pub use impact::{calculate_liquidity_impact, detect_liquidity_removal, liquidity_events, removal_severity, LiquidityEvent};
pub use pool_state::{PoolDelta, PoolState};
pub use tracker::LiquidityTracker;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Baisse fractionnaire au-delà de laquelle un lot d'événements est un retrait suspect.
    pub removal_threshold: f64,
    pub impact_alert_threshold: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            removal_threshold: 0.1,
            impact_alert_threshold: 0.05,
        }
    }
}
