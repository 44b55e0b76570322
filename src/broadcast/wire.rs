// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::delta::ChangeSet;
use crate::estimation::PositionSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeCounts {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireMessage<'a> {
    Initial {
        data: &'a [Arc<PositionSnapshot>],
        count: usize,
        timestamp: DateTime<Utc>,
    },
    Delta {
        changes: &'a ChangeSet,
        stats: ChangeCounts,
        timestamp: DateTime<Utc>,
    },
}

pub fn encode_initial(
    data: &[Arc<PositionSnapshot>],
    timestamp: DateTime<Utc>,
) -> Result<Arc<str>, serde_json::Error> {
    let message = WireMessage::Initial {
        data,
        count: data.len(),
        timestamp,
    };
    serde_json::to_string(&message).map(Arc::from)
}

pub fn encode_delta(
    changes: &ChangeSet,
    timestamp: DateTime<Utc>,
) -> Result<Arc<str>, serde_json::Error> {
    let message = WireMessage::Delta {
        changes,
        stats: ChangeCounts {
            added: changes.added.len(),
            updated: changes.updated.len(),
            removed: changes.removed.len(),
        },
        timestamp,
    };
    serde_json::to_string(&message).map(Arc::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::MovementState;
    use chrono::{FixedOffset, TimeZone};
    use serde_json::Value;

    fn snapshot(rid: &str) -> Arc<PositionSnapshot> {
        Arc::new(PositionSnapshot {
            rid: rid.to_string(),
            uid: Some("L1".to_string()),
            ts: FixedOffset::east_opt(3600)
                .unwrap()
                .with_ymd_and_hms(2025, 9, 5, 10, 5, 0)
                .unwrap(),
            from_tpl: "A".to_string(),
            to_tpl: "B".to_string(),
            lat: 52.1,
            lon: -1.2,
            ratio: 0.5,
            state: MovementState::Dwell,
            platform: None,
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 5, 9, 5, 1).unwrap()
    }

    #[test]
    fn initial_shape() {
        let text = encode_initial(&[snapshot("R1"), snapshot("R2")], now()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "initial");
        assert_eq!(value["count"], 2);
        assert_eq!(value["data"][0]["rid"], "R1");
        assert_eq!(value["data"][0]["state"], "dwell");
        assert_eq!(value["data"][0]["from_tpl"], "A");
        assert_eq!(value["data"][0]["ts"], "2025-09-05T10:05:00+01:00");
        assert_eq!(value["timestamp"], "2025-09-05T09:05:01Z");
    }

    #[test]
    fn delta_shape() {
        let changes = ChangeSet {
            added: vec![snapshot("R3")],
            updated: vec![],
            removed: vec!["R9".to_string()],
        };
        let text = encode_delta(&changes, now()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "delta");
        assert_eq!(value["changes"]["added"][0]["rid"], "R3");
        assert_eq!(value["changes"]["updated"], Value::Array(vec![]));
        assert_eq!(value["changes"]["removed"][0], "R9");
        assert_eq!(value["stats"]["removed"], 1);
        assert!(value["timestamp"].is_string());
    }
}
