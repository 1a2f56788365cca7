//! Counter dump in the shape of Go's `expvar` page.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;

use crate::observability::MonitoringRegistry;

/// Every counter of every registry, keyed by full counter name.
pub fn snapshot(registries: &[Arc<MonitoringRegistry>]) -> BTreeMap<String, i64> {
    registries.iter().flat_map(|r| r.snapshot()).collect()
}

pub async fn dump(registries: Arc<Vec<Arc<MonitoringRegistry>>>) -> Json<BTreeMap<String, i64>> {
    Json(snapshot(&registries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::{CounterId, CounterRegistry};

    #[test]
    fn test_snapshot_merges_registries() {
        let server = Arc::new(MonitoringRegistry::new("apm-server.server"));
        let acm = Arc::new(MonitoringRegistry::new("apm-server.acm"));
        server.lookup(CounterId::RequestCount).unwrap().inc();
        server.lookup(CounterId::RequestCount).unwrap().inc();
        acm.lookup(CounterId::ResponseCount).unwrap().inc();

        let all = snapshot(&[server, acm]);
        assert_eq!(all["apm-server.server.request.count"], 2);
        assert_eq!(all["apm-server.acm.response.count"], 1);
        assert_eq!(all["apm-server.acm.request.count"], 0);
    }
}
