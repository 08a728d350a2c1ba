//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for live queries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A live query a client can subscribe to. Each topic is open at most once
/// per connection.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topic {
    /// Tasks assigned to the signed-in user.
    MyTasks,
    /// Every task (admins and supervisors).
    AllTasks,
    /// The signed-in user's notifications.
    MyNotifications,
    /// Every attendance record in an inclusive date range (admins and supervisors).
    Attendance { start: NaiveDate, end: NaiveDate },
}

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed { topic: Topic },

    /// The complete current result set of a topic.
    Snapshot { topic: Topic, records: serde_json::Value },

    Unsubscribed { topic: Topic },

    /// The live query failed and was closed; the client may resubscribe.
    SubscriptionEnded { topic: Topic, message: String },

    /// Reports an error that did not close any subscription.
    Error { message: String },
}
