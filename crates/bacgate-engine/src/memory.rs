//! In-memory event log for the test suites.
//!
//! Supports both catch-up reads and group semantics with NAK redelivery,
//! with the same observable behaviour the Redis Streams backend has.

use crate::eventlog::{
    EventLog, EventLogError, EventStream, RecordedEvent, StartFrom, SubscriptionSettings,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct StoredEvent {
    revision: u64,
    created_ms: i64,
    data: Vec<u8>,
}

#[derive(Default)]
struct GroupState {
    /// Index of the next fresh event to hand out.
    next: usize,
    /// NAKed event indices awaiting redelivery, oldest first.
    redeliver: VecDeque<usize>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Vec<StoredEvent>>,
    groups: HashMap<(String, String), GroupState>,
}

#[derive(Default, Clone)]
pub struct InMemoryEventLog {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event, returning its revision.
    pub fn append(&self, stream: &str, data: impl Into<Vec<u8>>) -> u64 {
        let mut inner = self.inner.lock();
        let events = inner.streams.entry(stream.to_owned()).or_default();
        let revision = events.len() as u64;
        events.push(StoredEvent {
            revision,
            created_ms: chrono::Utc::now().timestamp_millis(),
            data: data.into(),
        });
        revision
    }

    pub fn stream_len(&self, stream: &str) -> usize {
        self.inner
            .lock()
            .streams
            .get(stream)
            .map_or(0, Vec::len)
    }

    fn start_index(&self, stream: &str, start_from: StartFrom) -> usize {
        let inner = self.inner.lock();
        let len = inner.streams.get(stream).map_or(0, Vec::len);
        match start_from {
            StartFrom::Begin => 0,
            StartFrom::End => len,
            StartFrom::Position(position) => (position as usize).min(len),
        }
    }
}

impl EventLog for InMemoryEventLog {
    fn subscribe(
        &self,
        settings: &SubscriptionSettings,
        start_from: StartFrom,
    ) -> Result<Box<dyn EventStream>, EventLogError> {
        match &settings.group_name {
            None => Ok(Box::new(CatchupStream {
                log: self.clone(),
                stream: settings.stream_name.clone(),
                next: self.start_index(&settings.stream_name, start_from),
            })),
            Some(group) => {
                let key = (settings.stream_name.clone(), group.clone());
                let start = self.start_index(&settings.stream_name, start_from);
                let mut inner = self.inner.lock();
                inner
                    .groups
                    .entry(key)
                    .or_insert_with(|| GroupState {
                        next: start,
                        redeliver: VecDeque::new(),
                    });
                Ok(Box::new(GroupStream {
                    log: self.clone(),
                    stream: settings.stream_name.clone(),
                    group: group.clone(),
                }))
            }
        }
    }
}

fn recorded(stream: &str, event: &StoredEvent, with_token: bool) -> RecordedEvent {
    RecordedEvent {
        event_id: format!("{stream}:{}", event.revision),
        stream_name: stream.to_owned(),
        revision: event.revision,
        created_ms: event.created_ms,
        data: event.data.clone(),
        ack_token: with_token.then(|| event.revision.to_string()),
    }
}

struct CatchupStream {
    log: InMemoryEventLog,
    stream: String,
    next: usize,
}

impl EventStream for CatchupStream {
    fn next_batch(
        &mut self,
        max_count: usize,
        _timeout: Duration,
    ) -> Result<Vec<RecordedEvent>, EventLogError> {
        let inner = self.log.inner.lock();
        let events = inner.streams.get(&self.stream);
        let batch: Vec<RecordedEvent> = events
            .into_iter()
            .flat_map(|events| events.iter().skip(self.next).take(max_count))
            .map(|event| recorded(&self.stream, event, false))
            .collect();
        self.next += batch.len();
        Ok(batch)
    }

    fn ack(&mut self, _event: &RecordedEvent) -> Result<(), EventLogError> {
        Ok(())
    }

    fn nak(&mut self, _event: &RecordedEvent, _reason: &str) -> Result<(), EventLogError> {
        Ok(())
    }
}

struct GroupStream {
    log: InMemoryEventLog,
    stream: String,
    group: String,
}

impl EventStream for GroupStream {
    fn next_batch(
        &mut self,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<RecordedEvent>, EventLogError> {
        let mut inner = self.log.inner.lock();
        let Inner { streams, groups } = &mut *inner;
        let events = streams.get(&self.stream);
        let state = groups
            .get_mut(&(self.stream.clone(), self.group.clone()))
            .ok_or(EventLogError::Closed)?;

        let mut batch = Vec::new();
        while batch.len() < max_count {
            let index = match state.redeliver.pop_front() {
                Some(index) => index,
                None => {
                    let index = state.next;
                    let available = events.map_or(0, Vec::len);
                    if index >= available {
                        break;
                    }
                    state.next += 1;
                    index
                }
            };
            if let Some(event) = events.and_then(|events| events.get(index)) {
                batch.push(recorded(&self.stream, event, true));
            }
        }
        if batch.is_empty() {
            // Emulate a blocking group read.
            drop(inner);
            std::thread::sleep(timeout.min(Duration::from_millis(50)));
        }
        Ok(batch)
    }

    fn ack(&mut self, _event: &RecordedEvent) -> Result<(), EventLogError> {
        Ok(())
    }

    fn nak(&mut self, event: &RecordedEvent, _reason: &str) -> Result<(), EventLogError> {
        let mut inner = self.log.inner.lock();
        let state = inner
            .groups
            .get_mut(&(self.stream.clone(), self.group.clone()))
            .ok_or(EventLogError::Closed)?;
        state.redeliver.push_back(event.revision as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryEventLog;
    use crate::eventlog::{EventLog, StartFrom, SubscriptionSettings};
    use std::time::Duration;

    fn settings(group: Option<&str>) -> SubscriptionSettings {
        SubscriptionSettings {
            subscription_id: "sub-1".to_owned(),
            stream_name: "building-a".to_owned(),
            group_name: group.map(str::to_owned),
            start_from: StartFrom::Begin,
            instance_offset: 0,
        }
    }

    #[test]
    fn catchup_drains_from_the_requested_position() {
        let log = InMemoryEventLog::new();
        for i in 0..5 {
            log.append("building-a", format!("event-{i}"));
        }

        let mut stream = log
            .subscribe(&settings(None), StartFrom::Position(3))
            .unwrap();
        let batch = stream
            .next_batch(100, Duration::from_millis(10))
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].revision, 3);
        assert!(stream
            .next_batch(100, Duration::from_millis(10))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn group_redelivers_nacked_events() {
        let log = InMemoryEventLog::new();
        log.append("building-a", "one");
        log.append("building-a", "two");

        let mut stream = log
            .subscribe(&settings(Some("gateway")), StartFrom::Begin)
            .unwrap();
        let batch = stream.next_batch(1, Duration::from_millis(10)).unwrap();
        assert_eq!(batch[0].revision, 0);
        stream.nak(&batch[0], "injected").unwrap();

        let batch = stream.next_batch(2, Duration::from_millis(10)).unwrap();
        let revisions: Vec<u64> = batch.iter().map(|event| event.revision).collect();
        assert_eq!(revisions, vec![0, 1]);
    }
}
