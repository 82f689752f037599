//! Redis snapshot store backend.
//!
//! Records are stored as JSON documents under
//! `<prefix>object:<type>:<instance>`, with a set-valued index, a cursor
//! hash, a device-metadata hash, and an advisory pub/sub channel for
//! value changes.
//!
//! The backend holds one logical connection behind a mutex. On a
//! connection-level failure it drops the connection and enters a
//! reconnecting state: each subsequent call first attempts one
//! reconnect; while that keeps failing, writes fail fast with
//! [`StoreError::Connection`] and reads report [`StoreError::NotFound`]
//! through the callers that treat absence as a fresh start.

use crate::keys::KeySchema;
use crate::{SnapshotStore, StoreError, StoreResult};
use bacgate_core::{DeviceInfo, ObjectRecord, ObjectType, PresentValue, StatusFlags};
use parking_lot::Mutex;
use redis::{Commands, Connection, RedisError};
use std::time::Duration;

/// Connection tuning for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisOptions {
    pub key_prefix: String,
    /// Database selected with `SELECT` after connecting; 0 (the server
    /// default) is never selected explicitly.
    pub database: Option<i64>,
    /// Password sent with `AUTH` after connecting, when non-empty.
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            key_prefix: "bacgate:".to_owned(),
            database: None,
            password: None,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
        }
    }
}

pub struct RedisStore {
    client: redis::Client,
    conn: Mutex<Option<Connection>>,
    keys: KeySchema,
    options: RedisOptions,
}

impl RedisStore {
    /// Connects to the store. Fails if the initial connection cannot be
    /// established; later connection losses are handled internally.
    pub fn connect(url: &str, options: RedisOptions) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(connection_error)?;
        let store = Self {
            keys: KeySchema::new(options.key_prefix.clone()),
            conn: Mutex::new(None),
            client,
            options,
        };
        let conn = store.open().map_err(connection_error)?;
        *store.conn.lock() = Some(conn);
        Ok(store)
    }

    fn open(&self) -> Result<Connection, RedisError> {
        let mut conn = self
            .client
            .get_connection_with_timeout(self.options.connect_timeout)?;
        conn.set_read_timeout(Some(self.options.command_timeout))?;
        conn.set_write_timeout(Some(self.options.command_timeout))?;
        if let Some(password) = &self.options.password {
            if !password.is_empty() {
                let () = redis::cmd("AUTH").arg(password).query(&mut conn)?;
            }
        }
        if let Some(database) = self.options.database {
            if database > 0 {
                let () = redis::cmd("SELECT").arg(database).query(&mut conn)?;
            }
        }
        Ok(conn)
    }

    /// Runs one command batch against the connection, reconnecting on
    /// demand and dropping the connection on transport-level failures.
    fn with_conn<T>(
        &self,
        run: impl FnOnce(&mut Connection, &KeySchema) -> Result<T, RedisError>,
    ) -> StoreResult<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            match self.open() {
                Ok(conn) => *guard = Some(conn),
                Err(err) => {
                    log::debug!("redis reconnect failed: {err}");
                    return Err(connection_error(err));
                }
            }
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StoreError::Connection("not connected".to_owned()));
        };
        match run(conn, &self.keys) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_connection_dropped() || err.is_io_error() || err.is_timeout() {
                    *guard = None;
                }
                Err(connection_error(err))
            }
        }
    }
}

fn connection_error(err: RedisError) -> StoreError {
    StoreError::Connection(err.to_string())
}

impl SnapshotStore for RedisStore {
    fn store_object(&self, record: &ObjectRecord) -> StoreResult<()> {
        let json = serde_json::to_string(record)?;
        self.with_conn(|conn, keys| {
            let () = conn.set(keys.object(record.object_type, record.instance), &json)?;
            let _: i64 = conn.sadd(
                keys.object_index(),
                KeySchema::index_member(record.object_type, record.instance),
            )?;
            Ok(())
        })
    }

    fn load_object(&self, object_type: ObjectType, instance: u32) -> StoreResult<ObjectRecord> {
        let json: Option<String> =
            self.with_conn(|conn, keys| conn.get(keys.object(object_type, instance)))?;
        let json = json.ok_or(StoreError::NotFound)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn update_value(
        &self,
        object_type: ObjectType,
        instance: u32,
        value: PresentValue,
        flags: Option<StatusFlags>,
        timestamp_ms: i64,
    ) -> StoreResult<()> {
        // Read-modify-write under the connection lock; atomic relative to
        // the other writers in this process.
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.open().map_err(connection_error)?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(StoreError::Connection("not connected".to_owned()));
        };

        let key = self.keys.object(object_type, instance);
        let json: Option<String> = conn.get(&key).map_err(connection_error)?;
        let mut record: ObjectRecord = serde_json::from_str(&json.ok_or(StoreError::NotFound)?)?;

        record.present_value = value;
        if let Some(flags) = flags {
            record.status_flags = flags;
        }
        record.last_update_ms = timestamp_ms;

        let json = serde_json::to_string(&record)?;
        let result: Result<(), RedisError> = conn.set(&key, json);
        result.map_err(|err| {
            if err.is_connection_dropped() || err.is_io_error() || err.is_timeout() {
                *guard = None;
            }
            StoreError::Connection(err.to_string())
        })
    }

    fn delete_object(&self, object_type: ObjectType, instance: u32) -> StoreResult<()> {
        self.with_conn(|conn, keys| {
            let _: i64 = conn.del(keys.object(object_type, instance))?;
            let _: i64 = conn.srem(
                keys.object_index(),
                KeySchema::index_member(object_type, instance),
            )?;
            Ok(())
        })
    }

    fn iterate(
        &self,
        filter: Option<ObjectType>,
    ) -> StoreResult<Box<dyn Iterator<Item = StoreResult<ObjectRecord>> + '_>> {
        let members: Vec<String> =
            self.with_conn(|conn, keys| conn.smembers(keys.object_index()))?;

        let identities = members.into_iter().filter_map(move |member| {
            let identity = KeySchema::parse_index_member(&member);
            if identity.is_none() {
                log::warn!("discarding malformed index member {member:?}");
            }
            identity.filter(|(object_type, _)| filter.map_or(true, |wanted| *object_type == wanted))
        });

        Ok(Box::new(identities.map(
            move |(object_type, instance)| self.load_object(object_type, instance),
        )))
    }

    fn store_cursor(&self, subscription_id: &str, position: u64) -> StoreResult<()> {
        self.with_conn(|conn, keys| {
            let _: i64 = conn.hset(
                keys.stream_positions(),
                subscription_id,
                position.to_string(),
            )?;
            Ok(())
        })
    }

    fn load_cursor(&self, subscription_id: &str) -> StoreResult<u64> {
        let raw: Option<String> =
            self.with_conn(|conn, keys| conn.hget(keys.stream_positions(), subscription_id))?;
        let raw = raw.ok_or(StoreError::NotFound)?;
        raw.parse().map_err(|_| {
            log::warn!("stored cursor for {subscription_id} is not a number: {raw:?}");
            StoreError::NotFound
        })
    }

    fn store_device_meta(&self, info: &DeviceInfo) -> StoreResult<()> {
        self.with_conn(|conn, keys| {
            let () = conn.hset_multiple(
                keys.device_config(),
                &[
                    ("instance", info.instance.to_string()),
                    ("name", info.name.clone()),
                    ("description", info.description.clone()),
                    ("location", info.location.clone()),
                    ("vendor_id", info.vendor_id.to_string()),
                    ("vendor_name", info.vendor_name.clone()),
                    ("model_name", info.model_name.clone()),
                    ("application_version", info.application_version.clone()),
                ],
            )?;
            Ok(())
        })
    }

    fn publish_change(&self, object_type: ObjectType, instance: u32) {
        let result = self.with_conn(|conn, keys| {
            let _: i64 = conn.publish(
                keys.value_change_channel(),
                KeySchema::index_member(object_type, instance),
            )?;
            Ok(())
        });
        if let Err(err) = result {
            log::debug!("value-change publish skipped: {err}");
        }
    }
}
