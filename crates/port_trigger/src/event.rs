use std::fmt;

use serde::{Deserialize, Serialize};

/// What changed.  Wire names are `NEW_MESSAGE`, `FOLDER_UPDATE` and
/// `SUPERPORT_UPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerEvent {
    NewMessage,
    FolderUpdate,
    SuperportUpdate,
}

impl TriggerEvent {
    pub const ALL: [TriggerEvent; 3] = [
        TriggerEvent::NewMessage,
        TriggerEvent::FolderUpdate,
        TriggerEvent::SuperportUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::NewMessage => "NEW_MESSAGE",
            TriggerEvent::FolderUpdate => "FOLDER_UPDATE",
            TriggerEvent::SuperportUpdate => "SUPERPORT_UPDATE",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            TriggerEvent::NewMessage => 0,
            TriggerEvent::FolderUpdate => 1,
            TriggerEvent::SuperportUpdate => 2,
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to [`crate::TriggerBus::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    Publish(TriggerEvent),
    /// Unrecognised action name; dispatching it does nothing.
    Unknown(String),
}

impl TriggerAction {
    pub fn parse(name: &str) -> Self {
        TriggerEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == name)
            .map(TriggerAction::Publish)
            .unwrap_or_else(|| TriggerAction::Unknown(name.to_string()))
    }
}
