//! Redis Streams event-log backend.
//!
//! Catch-up subscriptions use plain `XREAD`; persistent subscriptions
//! use a consumer group (`XGROUP CREATE` + `XREADGROUP`) with `XACK` on
//! acknowledgement. A NAK leaves the entry pending and flips the stream
//! into recovery mode, so the next batch re-reads pending entries before
//! taking fresh ones.
//!
//! Entry ids are used as revisions: the part before the `-` is the
//! monotonic position. Producers that append with explicit
//! `<revision>-1` ids get exact positions; auto-generated ids degrade to
//! millisecond timestamps, which are still monotonic.

use crate::eventlog::{
    EventLog, EventLogError, EventStream, RecordedEvent, StartFrom, SubscriptionSettings,
};
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{Commands, Connection, ErrorKind, RedisError};
use std::time::Duration;

pub struct RedisEventLog {
    client: redis::Client,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl RedisEventLog {
    /// Opens the client and verifies connectivity once.
    pub fn connect(
        url: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, EventLogError> {
        let client = redis::Client::open(url).map_err(connect_error)?;
        let log = Self {
            client,
            connect_timeout,
            read_timeout,
        };
        log.open_connection()?;
        Ok(log)
    }

    fn open_connection(&self) -> Result<Connection, EventLogError> {
        let conn = self
            .client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(connect_error)?;
        // The blocking reads bound their own wait; leave headroom on the
        // socket so a full block never trips the io timeout.
        conn.set_read_timeout(Some(self.read_timeout + Duration::from_secs(5)))
            .map_err(transport_error)?;
        Ok(conn)
    }
}

fn connect_error(err: RedisError) -> EventLogError {
    if err.kind() == ErrorKind::AuthenticationFailed {
        EventLogError::Auth(err.to_string())
    } else {
        EventLogError::Connect(err.to_string())
    }
}

fn transport_error(err: RedisError) -> EventLogError {
    if err.is_timeout() {
        EventLogError::Timeout
    } else {
        EventLogError::Transport(err.to_string())
    }
}

impl EventLog for RedisEventLog {
    fn subscribe(
        &self,
        settings: &SubscriptionSettings,
        start_from: StartFrom,
    ) -> Result<Box<dyn EventStream>, EventLogError> {
        let mut conn = self.open_connection()?;
        let stream = settings.stream_name.clone();

        match &settings.group_name {
            Some(group) => {
                let start_id = match start_from {
                    StartFrom::Begin => "0".to_owned(),
                    StartFrom::End => "$".to_owned(),
                    StartFrom::Position(position) => format!("{}-0", position),
                };
                let created: Result<(), RedisError> =
                    conn.xgroup_create_mkstream(&stream, group, &start_id);
                if let Err(err) = created {
                    // The group surviving a restart is the normal case.
                    if err.code() != Some("BUSYGROUP") {
                        return Err(transport_error(err));
                    }
                }
                Ok(Box::new(RedisGroupStream {
                    conn,
                    stream,
                    group: group.clone(),
                    consumer: settings.subscription_id.clone(),
                    recovering: true,
                }))
            }
            None => {
                let last_id = match start_from {
                    StartFrom::Begin => "0-0".to_owned(),
                    StartFrom::End => latest_id(&mut conn, &stream)?,
                    StartFrom::Position(position) => {
                        format!("{}-0", position)
                    }
                };
                Ok(Box::new(RedisCatchupStream {
                    conn,
                    stream,
                    last_id,
                }))
            }
        }
    }
}

/// The id of the newest entry, or the stream origin when it is empty.
fn latest_id(conn: &mut Connection, stream: &str) -> Result<String, EventLogError> {
    let newest: StreamRangeReply = conn
        .xrevrange_count(stream, "+", "-", 1)
        .map_err(transport_error)?;
    Ok(newest
        .ids
        .into_iter()
        .next()
        .map(|entry| entry.id)
        .unwrap_or_else(|| "0-0".to_owned()))
}

fn parse_revision(id: &str) -> u64 {
    id.split_once('-')
        .map_or(id, |(position, _)| position)
        .parse()
        .unwrap_or(0)
}

fn to_events(stream_name: &str, reply: StreamReadReply, with_token: bool) -> Vec<RecordedEvent> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    reply
        .keys
        .into_iter()
        .flat_map(|key| key.ids)
        .filter_map(|entry| {
            let data: Option<Vec<u8>> = entry.get("data");
            let Some(data) = data else {
                log::warn!("stream {stream_name} entry {} has no data field", entry.id);
                return None;
            };
            Some(RecordedEvent {
                revision: parse_revision(&entry.id),
                event_id: entry.id.clone(),
                stream_name: stream_name.to_owned(),
                created_ms: now_ms,
                data,
                ack_token: with_token.then(|| entry.id.clone()),
            })
        })
        .collect()
}

struct RedisCatchupStream {
    conn: Connection,
    stream: String,
    last_id: String,
}

impl EventStream for RedisCatchupStream {
    fn next_batch(
        &mut self,
        max_count: usize,
        _timeout: Duration,
    ) -> Result<Vec<RecordedEvent>, EventLogError> {
        let options = StreamReadOptions::default().count(max_count);
        let reply: StreamReadReply = self
            .conn
            .xread_options(&[&self.stream], &[&self.last_id], &options)
            .map_err(transport_error)?;
        let events = to_events(&self.stream, reply, false);
        if let Some(last) = events.last() {
            self.last_id.clone_from(&last.event_id);
        }
        Ok(events)
    }

    fn ack(&mut self, _event: &RecordedEvent) -> Result<(), EventLogError> {
        Ok(())
    }

    fn nak(&mut self, _event: &RecordedEvent, _reason: &str) -> Result<(), EventLogError> {
        Ok(())
    }
}

struct RedisGroupStream {
    conn: Connection,
    stream: String,
    group: String,
    consumer: String,
    /// Whether the next read should re-claim pending entries (after a
    /// restart or a NAK) instead of taking fresh ones.
    recovering: bool,
}

impl EventStream for RedisGroupStream {
    fn next_batch(
        &mut self,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<RecordedEvent>, EventLogError> {
        if self.recovering {
            let options = StreamReadOptions::default()
                .group(&self.group, &self.consumer)
                .count(max_count);
            let reply: StreamReadReply = self
                .conn
                .xread_options(&[&self.stream], &["0"], &options)
                .map_err(transport_error)?;
            let events = to_events(&self.stream, reply, true);
            if !events.is_empty() {
                return Ok(events);
            }
            self.recovering = false;
        }

        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max_count)
            .block((timeout.as_millis() as usize).max(1));
        let reply: StreamReadReply = self
            .conn
            .xread_options(&[&self.stream], &[">"], &options)
            .map_err(transport_error)?;
        Ok(to_events(&self.stream, reply, true))
    }

    fn ack(&mut self, event: &RecordedEvent) -> Result<(), EventLogError> {
        let Some(token) = &event.ack_token else {
            return Ok(());
        };
        let _: i64 = self
            .conn
            .xack(&self.stream, &self.group, &[token])
            .map_err(transport_error)?;
        Ok(())
    }

    fn nak(&mut self, event: &RecordedEvent, reason: &str) -> Result<(), EventLogError> {
        // The entry is already pending for this consumer; re-reading the
        // pending list redelivers it.
        log::debug!(
            "stream {}: NAK {} ({reason}); entry stays pending",
            self.stream,
            event.event_id
        );
        self.recovering = true;
        Ok(())
    }
}
