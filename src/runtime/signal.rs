//! The strategy-runtime output contract: the "Signal object" JSON shape a
//! strategy subprocess reports on stdout.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Long,
    Short,
    Hold,
    ExitLong,
    ExitShort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal: SignalType,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Signal {
    pub fn is_hold(&self) -> bool {
        matches!(self.signal, SignalType::Hold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_signal() {
        let s: Signal = serde_json::from_str(r#"{"signal":"LONG","price":50000.0}"#).unwrap();
        assert_eq!(s.signal, SignalType::Long);
        assert!(!s.is_hold());
    }

    #[test]
    fn hold_signal_detection() {
        let s: Signal = serde_json::from_str(r#"{"signal":"HOLD","price":1.0}"#).unwrap();
        assert!(s.is_hold());
    }
}
