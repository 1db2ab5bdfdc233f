use serde::Serialize;
use tokio::sync::broadcast;

use super::clause::FilterClause;

const EVENT_CAPACITY: usize = 256;

/// Notifications published while the catalog works.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CatalogEvent {
    /// A record was written into the product cache.
    RecordStored {
        product_id: String,
        sku_ids: Vec<String>,
    },
    /// A search call finished resolving.
    OperationSettled {
        clauses: Vec<FilterClause>,
        found: usize,
        empty: Vec<FilterClause>,
    },
}

/// Fan-out of [`CatalogEvent`]s to any number of subscribers. Publishing with
/// nobody listening is a no-op; slow subscribers observe `Lagged`.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<CatalogEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: CatalogEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = EventHub::new();
        hub.publish(CatalogEvent::RecordStored {
            product_id: "0".into(),
            sku_ids: vec![],
        });

        let mut rx = hub.subscribe();
        let event = CatalogEvent::RecordStored {
            product_id: "1".into(),
            sku_ids: vec!["2".into()],
        };
        hub.publish(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn events_serialize_with_tag() {
        let v = serde_json::to_value(CatalogEvent::OperationSettled {
            clauses: vec![FilterClause::product_id(1).unwrap()],
            found: 0,
            empty: vec![FilterClause::product_id(1).unwrap()],
        })
        .unwrap();
        assert_eq!(v["event"], "operation_settled");
        assert_eq!(v["empty"][0], "productId:1");
    }
}
