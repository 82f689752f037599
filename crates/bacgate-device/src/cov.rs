//! The COV subscription table and notification fanout.
//!
//! Subscriptions live in a hash map keyed by a synthetic id and are
//! bounded by the configured maximum. A subscription's identity for
//! renewal purposes is the tuple (process id, address, object type,
//! instance). Lifetimes count down on a one-second tick; a subscription
//! whose lifetime reaches zero is removed and receives nothing further.

use crate::error::CovError;
use crate::registry::ObjectRegistry;
use crate::transport::{CovNotification, CovNotifier, PeerAddress};
use bacgate_core::ObjectType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A subscribe (or renew) request from a BACnet client.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    pub process_id: u32,
    pub address: PeerAddress,
    pub object_type: ObjectType,
    pub instance: u32,
    pub confirmed: bool,
    /// Requested lifetime in seconds; 0 selects the configured default.
    pub lifetime: u32,
}

/// A live subscription record.
#[derive(Debug, Clone, PartialEq)]
pub struct CovSubscription {
    pub id: u32,
    pub process_id: u32,
    pub address: PeerAddress,
    pub object_type: ObjectType,
    pub instance: u32,
    pub confirmed: bool,
    /// Remaining lifetime in seconds; always positive while the record
    /// exists.
    pub lifetime: u32,
    pub created_at_ms: i64,
    pub last_notification_ms: Option<i64>,
}

impl CovSubscription {
    fn matches_identity(&self, request: &SubscribeRequest) -> bool {
        self.process_id == request.process_id
            && self.address == request.address
            && self.object_type == request.object_type
            && self.instance == request.instance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    Renewed,
}

#[derive(Default)]
struct Table {
    subscriptions: HashMap<u32, CovSubscription>,
    next_id: u32,
}

pub struct CovEngine {
    table: Mutex<Table>,
    notifier: Arc<dyn CovNotifier>,
    device_instance: u32,
    max_subscriptions: usize,
    default_lifetime: u32,
    notifications_sent: AtomicU64,
}

impl CovEngine {
    pub fn new(
        device_instance: u32,
        max_subscriptions: usize,
        default_lifetime: u32,
        notifier: Arc<dyn CovNotifier>,
    ) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            notifier,
            device_instance,
            max_subscriptions,
            default_lifetime,
            notifications_sent: AtomicU64::new(0),
        }
    }

    /// Creates or renews a subscription.
    ///
    /// Fails with [`CovError::TargetMissing`] when the monitored object is
    /// not in the registry and with [`CovError::Capacity`] when the table
    /// is full.
    pub fn subscribe(
        &self,
        registry: &ObjectRegistry,
        request: SubscribeRequest,
    ) -> Result<SubscribeOutcome, CovError> {
        if !registry.contains(request.object_type, request.instance) {
            return Err(CovError::TargetMissing(
                request.object_type,
                request.instance,
            ));
        }

        let lifetime = if request.lifetime == 0 {
            self.default_lifetime
        } else {
            request.lifetime
        };

        let mut table = self.table.lock();
        if let Some(existing) = table
            .subscriptions
            .values_mut()
            .find(|subscription| subscription.matches_identity(&request))
        {
            existing.lifetime = lifetime;
            existing.confirmed = request.confirmed;
            existing.created_at_ms = now_ms();
            return Ok(SubscribeOutcome::Renewed);
        }

        if table.subscriptions.len() >= self.max_subscriptions {
            return Err(CovError::Capacity(table.subscriptions.len()));
        }

        let id = table.next_id;
        table.next_id = table.next_id.wrapping_add(1);
        table.subscriptions.insert(
            id,
            CovSubscription {
                id,
                process_id: request.process_id,
                address: request.address,
                object_type: request.object_type,
                instance: request.instance,
                confirmed: request.confirmed,
                lifetime,
                created_at_ms: now_ms(),
                last_notification_ms: None,
            },
        );
        Ok(SubscribeOutcome::Created)
    }

    /// Removes subscriptions matching process id, object identity, and
    /// (when given) subscriber address. Returns how many were removed.
    pub fn unsubscribe(
        &self,
        process_id: u32,
        address: Option<&PeerAddress>,
        object_type: ObjectType,
        instance: u32,
    ) -> usize {
        let mut table = self.table.lock();
        let before = table.subscriptions.len();
        table.subscriptions.retain(|_, subscription| {
            !(subscription.process_id == process_id
                && subscription.object_type == object_type
                && subscription.instance == instance
                && address.map_or(true, |address| &subscription.address == address))
        });
        before - table.subscriptions.len()
    }

    /// Drops every subscription monitoring a deleted object.
    pub fn drop_object(&self, object_type: ObjectType, instance: u32) -> usize {
        let mut table = self.table.lock();
        let before = table.subscriptions.len();
        table.subscriptions.retain(|_, subscription| {
            subscription.object_type != object_type || subscription.instance != instance
        });
        let dropped = before - table.subscriptions.len();
        if dropped > 0 {
            log::debug!("dropped {dropped} subscription(s) for deleted object {object_type}:{instance}");
        }
        dropped
    }

    /// Fans a change out to every live subscriber of the object and
    /// advances the object's `last_cov_value` exactly once, regardless of
    /// the subscriber count. Returns the number of notifications sent.
    pub fn fanout(&self, registry: &ObjectRegistry, object_type: ObjectType, instance: u32) -> usize {
        let Some(record) = registry.read(object_type, instance) else {
            return 0;
        };

        let targets: Vec<CovSubscription> = {
            let table = self.table.lock();
            table
                .subscriptions
                .values()
                .filter(|subscription| {
                    subscription.object_type == object_type
                        && subscription.instance == instance
                        && subscription.lifetime > 0
                })
                .cloned()
                .collect()
        };

        let mut sent = Vec::with_capacity(targets.len());
        for subscription in &targets {
            let notification = CovNotification {
                process_id: subscription.process_id,
                device_instance: self.device_instance,
                object_type,
                instance,
                time_remaining: subscription.lifetime,
                present_value: record.present_value,
                status_flags: record.status_flags,
            };
            match self
                .notifier
                .notify(&subscription.address, subscription.confirmed, &notification)
            {
                Ok(()) => sent.push(subscription.id),
                Err(err) => log::warn!(
                    "cov notification for {object_type}:{instance} to process {} failed: {err}",
                    subscription.process_id
                ),
            }
        }

        if !sent.is_empty() {
            let now = now_ms();
            let mut table = self.table.lock();
            for id in &sent {
                if let Some(subscription) = table.subscriptions.get_mut(id) {
                    subscription.last_notification_ms = Some(now);
                }
            }
        }

        registry.commit_cov_value(object_type, instance, record.present_value);
        self.notifications_sent
            .fetch_add(sent.len() as u64, Ordering::Relaxed);
        sent.len()
    }

    /// Ages the table by `elapsed_seconds`, deleting subscriptions whose
    /// lifetime reaches zero. Returns the number of expirations.
    pub fn tick(&self, elapsed_seconds: u32) -> usize {
        if elapsed_seconds == 0 {
            return 0;
        }
        let mut table = self.table.lock();
        let mut expired = 0;
        table.subscriptions.retain(|_, subscription| {
            subscription.lifetime = subscription.lifetime.saturating_sub(elapsed_seconds);
            if subscription.lifetime == 0 {
                log::debug!(
                    "cov subscription expired: process {} object {}:{}",
                    subscription.process_id,
                    subscription.object_type,
                    subscription.instance
                );
                expired += 1;
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn active_count(&self) -> usize {
        self.table.lock().subscriptions.len()
    }

    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    /// Live subscriptions for one object, for status reporting and tests.
    pub fn subscriptions_for(&self, object_type: ObjectType, instance: u32) -> Vec<CovSubscription> {
        self.table
            .lock()
            .subscriptions
            .values()
            .filter(|subscription| {
                subscription.object_type == object_type && subscription.instance == instance
            })
            .cloned()
            .collect()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::{CovEngine, SubscribeOutcome, SubscribeRequest};
    use crate::error::CovError;
    use crate::registry::ObjectRegistry;
    use crate::transport::{CovNotification, CovNotifier, PeerAddress, TransportError};
    use bacgate_core::{
        DeviceInfo, ObjectRecord, ObjectType, PresentValue, StatusFlags, ValueKind,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingNotifier {
        notifications: Mutex<Vec<(PeerAddress, bool, CovNotification)>>,
        fail: Mutex<bool>,
    }

    impl RecordingNotifier {
        fn taken(&self) -> Vec<(PeerAddress, bool, CovNotification)> {
            std::mem::take(&mut *self.notifications.lock())
        }
    }

    impl CovNotifier for RecordingNotifier {
        fn notify(
            &self,
            address: &PeerAddress,
            confirmed: bool,
            notification: &CovNotification,
        ) -> Result<(), TransportError> {
            if *self.fail.lock() {
                return Err(TransportError::NotificationTimeout);
            }
            self.notifications
                .lock()
                .push((address.clone(), confirmed, notification.clone()));
            Ok(())
        }
    }

    fn analog_input(instance: u32, cov_increment: f32) -> ObjectRecord {
        ObjectRecord {
            object_type: ObjectType::AnalogInput,
            instance,
            name: format!("AI-{instance}"),
            description: String::new(),
            value_kind: ValueKind::Real,
            units: 62,
            units_text: String::new(),
            cov_increment,
            min_value: 0.0,
            max_value: 0.0,
            state_texts: Vec::new(),
            inactive_text: String::new(),
            active_text: String::new(),
            supports_priority_array: false,
            present_value: PresentValue::Real(21.0),
            status_flags: StatusFlags::default(),
            reliability: 0,
            event_state: 0,
            last_cov_value: PresentValue::Real(21.0),
            last_update_ms: 0,
            source_id: "s1".to_owned(),
            stream_position: 0,
        }
    }

    fn setup(cov_increment: f32) -> (ObjectRegistry, CovEngine, Arc<RecordingNotifier>) {
        let registry = ObjectRegistry::new(DeviceInfo {
            instance: 1200,
            ..DeviceInfo::default()
        });
        registry.create_or_replace(analog_input(5, cov_increment));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = CovEngine::new(1200, 4, 300, Arc::clone(&notifier) as Arc<dyn CovNotifier>);
        (registry, engine, notifier)
    }

    fn subscribe_request(process_id: u32, lifetime: u32) -> SubscribeRequest {
        SubscribeRequest {
            process_id,
            address: PeerAddress::new(vec![0x01]).unwrap(),
            object_type: ObjectType::AnalogInput,
            instance: 5,
            confirmed: false,
            lifetime,
        }
    }

    #[test]
    fn subscribe_requires_an_existing_object() {
        let (registry, engine, _) = setup(0.5);
        let mut request = subscribe_request(1, 60);
        request.instance = 99;
        assert!(matches!(
            engine.subscribe(&registry, request),
            Err(CovError::TargetMissing(_, 99))
        ));
    }

    #[test]
    fn matching_identity_renews_instead_of_inserting() {
        let (registry, engine, _) = setup(0.5);
        assert_eq!(
            engine.subscribe(&registry, subscribe_request(1, 60)).unwrap(),
            SubscribeOutcome::Created
        );
        assert_eq!(
            engine.subscribe(&registry, subscribe_request(1, 120)).unwrap(),
            SubscribeOutcome::Renewed
        );
        assert_eq!(engine.active_count(), 1);
        assert_eq!(
            engine.subscriptions_for(ObjectType::AnalogInput, 5)[0].lifetime,
            120
        );
    }

    #[test]
    fn capacity_is_enforced() {
        let (registry, engine, _) = setup(0.5);
        for process_id in 0..4 {
            engine
                .subscribe(&registry, subscribe_request(process_id, 60))
                .unwrap();
        }
        assert!(matches!(
            engine.subscribe(&registry, subscribe_request(9, 60)),
            Err(CovError::Capacity(4))
        ));
    }

    #[test]
    fn zero_lifetime_selects_the_default() {
        let (registry, engine, _) = setup(0.5);
        engine.subscribe(&registry, subscribe_request(1, 0)).unwrap();
        assert_eq!(
            engine.subscriptions_for(ObjectType::AnalogInput, 5)[0].lifetime,
            300
        );
    }

    #[test]
    fn fanout_notifies_each_subscriber_and_commits_once() {
        let (registry, engine, notifier) = setup(0.5);
        engine.subscribe(&registry, subscribe_request(1, 60)).unwrap();
        engine.subscribe(&registry, subscribe_request(2, 90)).unwrap();

        registry
            .update_value(ObjectType::AnalogInput, 5, PresentValue::Real(21.6), None)
            .unwrap();
        let sent = engine.fanout(&registry, ObjectType::AnalogInput, 5);
        assert_eq!(sent, 2);

        let notifications = notifier.taken();
        assert_eq!(notifications.len(), 2);
        for (_, confirmed, notification) in &notifications {
            assert!(!confirmed);
            assert_eq!(notification.device_instance, 1200);
            assert_eq!(notification.present_value, PresentValue::Real(21.6));
        }
        let remaining: Vec<u32> = notifications
            .iter()
            .map(|(_, _, n)| n.time_remaining)
            .collect();
        assert!(remaining.contains(&60) && remaining.contains(&90));

        assert_eq!(
            registry.read(ObjectType::AnalogInput, 5).unwrap().last_cov_value,
            PresentValue::Real(21.6)
        );
    }

    #[test]
    fn fanout_with_no_subscribers_still_advances_the_reported_value() {
        let (registry, engine, notifier) = setup(0.5);
        registry
            .update_value(ObjectType::AnalogInput, 5, PresentValue::Real(25.0), None)
            .unwrap();
        assert_eq!(engine.fanout(&registry, ObjectType::AnalogInput, 5), 0);
        assert!(notifier.taken().is_empty());
        assert_eq!(
            registry.read(ObjectType::AnalogInput, 5).unwrap().last_cov_value,
            PresentValue::Real(25.0)
        );
    }

    #[test]
    fn notifier_failure_is_counted_out_but_still_commits() {
        let (registry, engine, notifier) = setup(0.5);
        engine.subscribe(&registry, subscribe_request(1, 60)).unwrap();
        *notifier.fail.lock() = true;

        registry
            .update_value(ObjectType::AnalogInput, 5, PresentValue::Real(30.0), None)
            .unwrap();
        assert_eq!(engine.fanout(&registry, ObjectType::AnalogInput, 5), 0);
        assert_eq!(
            registry.read(ObjectType::AnalogInput, 5).unwrap().last_cov_value,
            PresentValue::Real(30.0)
        );
    }

    #[test]
    fn lifetimes_expire_on_ticks() {
        let (registry, engine, notifier) = setup(0.5);
        engine.subscribe(&registry, subscribe_request(1, 60)).unwrap();

        let mut expired = 0;
        for _ in 0..61 {
            expired += engine.tick(1);
        }
        assert_eq!(expired, 1);
        assert_eq!(engine.active_count(), 0);

        registry
            .update_value(ObjectType::AnalogInput, 5, PresentValue::Real(22.5), None)
            .unwrap();
        assert_eq!(engine.fanout(&registry, ObjectType::AnalogInput, 5), 0);
        assert!(notifier.taken().is_empty());
    }

    #[test]
    fn large_tick_clamps_to_remaining_lifetime() {
        let (registry, engine, _) = setup(0.5);
        engine.subscribe(&registry, subscribe_request(1, 5)).unwrap();
        assert_eq!(engine.tick(3600), 1);
        assert_eq!(engine.active_count(), 0);
    }

    #[test]
    fn unsubscribe_and_object_drop_remove_records() {
        let (registry, engine, _) = setup(0.5);
        engine.subscribe(&registry, subscribe_request(1, 60)).unwrap();
        engine.subscribe(&registry, subscribe_request(2, 60)).unwrap();

        assert_eq!(
            engine.unsubscribe(1, None, ObjectType::AnalogInput, 5),
            1
        );
        assert_eq!(engine.active_count(), 1);

        assert_eq!(engine.drop_object(ObjectType::AnalogInput, 5), 1);
        assert_eq!(engine.active_count(), 0);
    }
}
