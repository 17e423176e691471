//! Record and sequence number types shared by readers and the checkpoint cache

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;

/// A record delivered on the consumer's output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Shard the record was read from
    pub shard_id: String,
    /// Position of the record within its shard
    pub sequence_number: String,
    /// Approximate arrival time, or the Unix epoch when the backend omits it
    pub arrival_timestamp: DateTime<Utc>,
    /// Record payload
    pub data: Bytes,
}

/// Position of a record within a shard.
///
/// Kinesis sequence numbers are decimal strings, so two all-digit values are
/// compared numerically. Other values sort after every all-digit value and
/// compare lexicographically among themselves.
#[derive(Debug, Clone)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric_digits(&self) -> Option<&str> {
        if !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit()) {
            Some(self.0.trim_start_matches('0'))
        } else {
            None
        }
    }
}

impl Ord for SequenceNumber {
    /// All-digit values sort before any other value, so mixed inputs still
    /// form a total order.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SequenceNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SequenceNumber {}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SequenceNumber {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SequenceNumber {
    fn from(value: String) -> Self {
        Self(value)
    }
}
