use ferrofeed_warehouse::{IngestReport, Warehouse, WarehouseError};

use crate::Event;

/// Storage collaborator fed by the polling loop.
///
/// Implementations must be idempotent on `Event::id`. Calls are blocking and
/// run on the blocking thread pool.
pub trait EventSink: Send + Sync {
    fn insert_events(&self, events: &[Event]) -> Result<IngestReport, WarehouseError>;
}

impl EventSink for Warehouse {
    fn insert_events(&self, events: &[Event]) -> Result<IngestReport, WarehouseError> {
        let records: Vec<_> = events.iter().map(Event::to_record).collect();
        Warehouse::insert_events(self, &records)
    }
}
