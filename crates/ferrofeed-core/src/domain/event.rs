use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use ferrofeed_warehouse::EventRecord;

use crate::{UtcDateTime, ValidationError};

/// Event kinds the poller keeps; everything else in the feed is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PullRequestEvent,
    WatchEvent,
    IssuesEvent,
}

impl EventKind {
    pub const ALL: [Self; 3] = [Self::PullRequestEvent, Self::WatchEvent, Self::IssuesEvent];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PullRequestEvent => "PullRequestEvent",
            Self::WatchEvent => "WatchEvent",
            Self::IssuesEvent => "IssuesEvent",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| ValidationError::UntrackedEventKind {
                value: value.to_owned(),
            })
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked feed event, identified by its upstream `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub kind: EventKind,
    pub repo_name: Option<String>,
    pub created_at: UtcDateTime,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        kind: EventKind,
        repo_name: Option<String>,
        created_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyEventId);
        }

        Ok(Self {
            id,
            kind,
            repo_name,
            created_at,
        })
    }

    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            id: self.id.clone(),
            kind: self.kind.as_str().to_owned(),
            repo_name: self.repo_name.clone(),
            created_at: self.created_at.format_rfc3339(),
        }
    }
}
