use crate::catalog::directory::UserMeta;
use crate::permission::UserId;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const EVENT_FETCH_TABLE: &str = "fetch_table";
pub const EVENT_SET_CELL_VALUE: &str = "set_cell_value";
pub const EVENT_SET_CELL_BUSY: &str = "set_cell_busy";
pub const EVENT_SET_CELL_FREE: &str = "set_cell_free";
pub const EVENT_GO_AWAY_FROM_TABLE: &str = "go_away_from_table";
pub const EVENT_FETCH_DATABASES: &str = "fetch_databases";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetCellValueMessage {
    pub row_id: i64,
    pub column_id: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetCellBusyMessage {
    pub row_id: i64,
    pub column_id: String,
    pub user: UserMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetCellFreeMessage {
    pub row_id: i64,
    pub column_id: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoAwayFromTableMessage {
    pub table_id: String,
}

/// Event kinds pushed to live subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// Table contents changed; refetch.
    FetchTable,
    SetCellValue(SetCellValueMessage),
    SetCellBusy(SetCellBusyMessage),
    SetCellFree(SetCellFreeMessage),
    /// Sent to a user whose access to the table was revoked.
    GoAwayFromTable(GoAwayFromTableMessage),
    /// Membership or table set changed; refetch the database list.
    FetchDatabases,
}

impl HubEvent {
    pub fn action(&self) -> &'static str {
        match self {
            HubEvent::FetchTable => EVENT_FETCH_TABLE,
            HubEvent::SetCellValue(_) => EVENT_SET_CELL_VALUE,
            HubEvent::SetCellBusy(_) => EVENT_SET_CELL_BUSY,
            HubEvent::SetCellFree(_) => EVENT_SET_CELL_FREE,
            HubEvent::GoAwayFromTable(_) => EVENT_GO_AWAY_FROM_TABLE,
            HubEvent::FetchDatabases => EVENT_FETCH_DATABASES,
        }
    }

    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            HubEvent::FetchTable | HubEvent::FetchDatabases => Ok(serde_json::Value::Null),
            HubEvent::SetCellValue(m) => serde_json::to_value(m),
            HubEvent::SetCellBusy(m) => serde_json::to_value(m),
            HubEvent::SetCellFree(m) => serde_json::to_value(m),
            HubEvent::GoAwayFromTable(m) => serde_json::to_value(m),
        }
    }
}

/// Wire envelope handed to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubMessage {
    pub topic: String,
    #[serde(rename = "eventAction")]
    pub event_action: String,
    pub payload: serde_json::Value,
    #[serde(rename = "eventTime")]
    pub event_time: String,
}

impl HubMessage {
    pub fn new(topic: &str, event: &HubEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: topic.to_string(),
            event_action: event.action().to_string(),
            payload: event.payload()?,
            event_time: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{HubEvent, HubMessage, SetCellValueMessage};

    #[test]
    fn envelope_uses_wire_field_names() {
        let event = HubEvent::SetCellValue(SetCellValueMessage {
            row_id: 3,
            column_id: "col_1".into(),
            value: Some("750".into()),
        });
        let message = HubMessage::new("t_1", &event).expect("message");
        let json: serde_json::Value =
            serde_json::from_str(&message.to_json().expect("json")).expect("parse");
        assert_eq!(json["topic"], "t_1");
        assert_eq!(json["eventAction"], "set_cell_value");
        assert_eq!(json["payload"]["row_id"], 3);
        assert_eq!(json["payload"]["value"], "750");
        assert!(json["eventTime"].as_str().is_some_and(|t| t.ends_with('Z')));
    }

    #[test]
    fn refresh_events_carry_null_payload() {
        let message = HubMessage::new("7", &HubEvent::FetchDatabases).expect("message");
        assert_eq!(message.event_action, "fetch_databases");
        assert!(message.payload.is_null());
    }
}
