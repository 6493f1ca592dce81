use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::db::Database;
use crate::error::SyncError;
use crate::extract::sync_event_and_companies;
use crate::models::{Event, ListFilters};

/// One request against the event store, as carried over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteRequest {
    SyncEvent { user_id: String, event: Event },
    LoadEvent { user_id: String, url: String },
    DeleteEvent { user_id: String, url: String },
    ListEvents {
        user_id: String,
        #[serde(default)]
        filters: ListFilters,
    },
}

/// Every response carries a success flag and either data or an error string.
/// A lookup that finds nothing is a success with `data: null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Set when a sync failed part-way; the whole request should be retried.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retry: bool,
}

impl Envelope {
    fn ok<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self { success: true, data: Some(value).filter(|v| !v.is_null()), error: None, retry: false },
            Err(e) => Self::failed(format!("Failed to encode response: {}", e)),
        }
    }

    fn failed(error: String) -> Self {
        Self { success: false, data: None, error: Some(error), retry: false }
    }
}

pub fn handle(db: &Database, request: RemoteRequest) -> Envelope {
    let result = match &request {
        RemoteRequest::SyncEvent { user_id, event } => {
            if event.name.trim().is_empty() {
                return Envelope::failed("Event name is required".to_string());
            }
            sync_event_and_companies(db, user_id, event)
                .map(|(event_id, companies)| Envelope::ok(&serde_json::json!({ "event_id": event_id, "companies": companies })))
        }
        RemoteRequest::LoadEvent { user_id, url } => db.load_event(user_id, url).map(|e| Envelope::ok(&e)),
        RemoteRequest::DeleteEvent { user_id, url } => {
            db.delete_event(user_id, url).map(|deleted| Envelope::ok(&serde_json::json!({ "deleted": deleted })))
        }
        RemoteRequest::ListEvents { user_id, filters } => db.list_events(user_id, filters).map(|e| Envelope::ok(&e)),
    };

    result.unwrap_or_else(|err| {
        warn!(error = %format!("{:#}", err), "Remote request failed");
        let retry = err.downcast_ref::<SyncError>().is_some();
        Envelope { retry, ..Envelope::failed(format!("{:#}", err)) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sync_request(people: Value) -> RemoteRequest {
        serde_json::from_value(json!({
            "op": "sync_event",
            "user_id": "u1",
            "event": {
                "url": "https://x.com/e?ref=2",
                "name": "Summit",
                "people": people,
                "sponsors": [{"name": "Acme", "tier": "Gold"}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_sync_then_load() {
        let db = Database::open_in_memory().unwrap();
        let synced = handle(&db, sync_request(json!([{"name": "Jo", "company": "Acme"}])));
        assert!(synced.success);
        assert_eq!(synced.data.unwrap()["companies"], 1);

        let loaded = handle(
            &db,
            RemoteRequest::LoadEvent { user_id: "u1".to_string(), url: "https://x.com/e".to_string() },
        );
        assert!(loaded.success);
        assert_eq!(loaded.data.unwrap()["people"][0]["name"], "Jo");
    }

    #[test]
    fn test_second_sync_with_no_people_empties_list() {
        let db = Database::open_in_memory().unwrap();
        handle(&db, sync_request(json!([{"name": "Jo"}])));
        handle(&db, sync_request(json!([])));

        let loaded = handle(
            &db,
            RemoteRequest::LoadEvent { user_id: "u1".to_string(), url: "https://x.com/e".to_string() },
        );
        assert_eq!(loaded.data.unwrap()["people"], json!([]));
    }

    #[test]
    fn test_missing_event_is_success_without_data() {
        let db = Database::open_in_memory().unwrap();
        let loaded = handle(
            &db,
            RemoteRequest::LoadEvent { user_id: "u1".to_string(), url: "https://x.com/none".to_string() },
        );
        assert_eq!(loaded, Envelope { success: true, data: None, error: None, retry: false });
    }

    #[test]
    fn test_failed_sync_asks_for_retry() {
        let db = Database::open_in_memory().unwrap();
        db.conn_for_tests().execute_batch("DROP TABLE event_sponsors;").unwrap();
        let response = handle(&db, sync_request(json!([])));
        assert!(!response.success);
        assert!(response.retry);
        assert!(response.error.unwrap().contains("event_sponsors"));
    }

    #[test]
    fn test_list_request_defaults_filters() {
        let db = Database::open_in_memory().unwrap();
        handle(&db, sync_request(json!([])));
        let request: RemoteRequest = serde_json::from_value(json!({"op": "list_events", "user_id": "u1"})).unwrap();
        let listed = handle(&db, request);
        assert_eq!(listed.data.unwrap().as_array().unwrap().len(), 1);
    }
}
