//! Record filters and index selection

use faultlog_core::{EventType, LogRecord};

/// Secondary index that can answer part of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagIndex {
    Username,
    ObjectName,
    EventType,
}

impl TagIndex {
    pub const ALL: [TagIndex; 3] = [TagIndex::Username, TagIndex::ObjectName, TagIndex::EventType];

    /// The value this index holds for a record, if any
    pub fn value_of<'a>(&self, record: &'a LogRecord) -> Option<&'a str> {
        match self {
            TagIndex::Username => record.username(),
            TagIndex::ObjectName => record.object_name.as_deref(),
            TagIndex::EventType => Some(record.event_type.as_str()),
        }
    }
}

/// Which index a scan should drive from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexHint<'a> {
    /// Primary `(occurred_at, id)` order
    Time,
    Code(i64),
    Tag(TagIndex, &'a str),
}

/// Conjunctive filter over the indexed dimensions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub code: Option<i64>,
    pub username: Option<String>,
    pub object_name: Option<String>,
    pub event_type: Option<EventType>,
}

impl RecordFilter {
    /// Filter that matches every record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_object_name(mut self, object_name: impl Into<String>) -> Self {
        self.object_name = Some(object_name.into());
        self
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Number of constrained dimensions
    pub fn dimensions(&self) -> usize {
        usize::from(self.code.is_some())
            + usize::from(self.username.is_some())
            + usize::from(self.object_name.is_some())
            + usize::from(self.event_type.is_some())
    }

    /// Pick the index to drive a scan from
    ///
    /// Code is the most selective dimension, event type the least.
    pub fn index_hint(&self) -> IndexHint<'_> {
        if let Some(code) = self.code {
            IndexHint::Code(code)
        } else if let Some(username) = self.username.as_deref() {
            IndexHint::Tag(TagIndex::Username, username)
        } else if let Some(object_name) = self.object_name.as_deref() {
            IndexHint::Tag(TagIndex::ObjectName, object_name)
        } else if let Some(event_type) = self.event_type.as_ref() {
            IndexHint::Tag(TagIndex::EventType, event_type.as_str())
        } else {
            IndexHint::Time
        }
    }

    /// Whether the chosen index alone answers the filter
    pub fn index_only(&self) -> bool {
        self.dimensions() <= 1
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        if self.code.is_some() && record.code != self.code {
            return false;
        }
        if let Some(username) = self.username.as_deref()
            && record.username() != Some(username)
        {
            return false;
        }
        if let Some(object_name) = self.object_name.as_deref()
            && record.object_name.as_deref() != Some(object_name)
        {
            return false;
        }
        // Tag comparison, as the event-type index does
        if let Some(event_type) = self.event_type.as_ref()
            && record.event_type.as_str() != event_type.as_str()
        {
            return false;
        }
        true
    }
}
