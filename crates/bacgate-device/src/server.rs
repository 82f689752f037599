//! The BACnet-facing request loop.
//!
//! [`DeviceServer`] polls the transport every 10 ms, serves reads and
//! writes from the object registry, routes subscription services to the
//! COV engine, and drives the engine's one-second lifetime tick. This is
//! the only periodic timer in the gateway.

use crate::cov::{CovEngine, SubscribeRequest};
use crate::error::{CovError, RegistryError};
use crate::registry::ObjectRegistry;
use crate::transport::{
    property, service, BacnetTransport, IAm, PeerAddress, PropertyValue, ReadAccessResult,
    ServiceError, ServiceReply, ServiceRequest, WireObject, DEVICE_TYPE_CODE,
};
use bacgate_core::{ObjectClass, ObjectRecord};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STATUS_INTERVAL: Duration = Duration::from_secs(60);
const MAX_APDU: u16 = 1476;
const SEGMENTATION_NONE: u8 = 3;
const SYSTEM_STATUS_OPERATIONAL: u32 = 0;

pub struct DeviceServer<T: BacnetTransport> {
    registry: Arc<ObjectRegistry>,
    cov: Arc<CovEngine>,
    transport: Arc<T>,
    read_requests: AtomicU64,
    write_requests: AtomicU64,
}

impl<T: BacnetTransport + 'static> DeviceServer<T> {
    pub fn new(registry: Arc<ObjectRegistry>, cov: Arc<CovEngine>, transport: Arc<T>) -> Self {
        Self {
            registry,
            cov,
            transport,
            read_requests: AtomicU64::new(0),
            write_requests: AtomicU64::new(0),
        }
    }

    /// Runs the wire loop until the shutdown flag is set.
    pub fn run(&self, shutdown: &AtomicBool) {
        let mut last_tick = Instant::now();
        let mut last_status = Instant::now();

        while !shutdown.load(Ordering::Relaxed) {
            match self.transport.poll(POLL_INTERVAL) {
                Ok(Some((peer, request))) => self.dispatch(&peer, request),
                Ok(None) => {}
                Err(err) => log::debug!("wire poll error: {err}"),
            }

            let now = Instant::now();
            let elapsed = now.duration_since(last_tick);
            if elapsed >= Duration::from_secs(1) {
                self.cov.tick(elapsed.as_secs() as u32);
                last_tick = now;
            }
            if now.duration_since(last_status) >= STATUS_INTERVAL {
                log::info!(
                    "objects: {}, cov subscriptions: {}, reads: {}, writes: {}, notifications: {}",
                    self.registry.len(),
                    self.cov.active_count(),
                    self.read_requests.load(Ordering::Relaxed),
                    self.write_requests.load(Ordering::Relaxed),
                    self.cov.notifications_sent(),
                );
                last_status = now;
            }
        }
    }

    /// Spawns the wire loop on its own thread.
    pub fn spawn(
        self,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<thread::JoinHandle<()>>
    where
        T: Send + Sync,
    {
        thread::Builder::new()
            .name("bacnet-wire".to_owned())
            .spawn(move || self.run(&shutdown))
    }

    fn dispatch(&self, peer: &PeerAddress, request: ServiceRequest) {
        let reply = self.handle_request(peer, request);
        if let Some(reply) = reply {
            if let Err(err) = self.transport.reply(peer, reply) {
                log::debug!("failed to send reply: {err}");
            }
        }
    }

    fn handle_request(&self, peer: &PeerAddress, request: ServiceRequest) -> Option<ServiceReply> {
        match request {
            ServiceRequest::WhoIs { low, high } => self.handle_who_is(low, high),
            ServiceRequest::ReadProperty {
                object,
                property: prop,
                array_index,
                invoke_id,
            } => {
                self.read_requests.fetch_add(1, Ordering::Relaxed);
                Some(match self.read_property_value(object, prop, array_index) {
                    Ok(value) => ServiceReply::ReadPropertyAck {
                        object,
                        property: prop,
                        array_index,
                        value,
                        invoke_id,
                    },
                    Err(error) => ServiceReply::Error {
                        invoke_id,
                        service: service::READ_PROPERTY,
                        error,
                    },
                })
            }
            ServiceRequest::ReadPropertyMultiple { items, invoke_id } => {
                self.read_requests.fetch_add(1, Ordering::Relaxed);
                let results = items
                    .into_iter()
                    .map(|item| ReadAccessResult {
                        object: item.object,
                        results: item
                            .properties
                            .iter()
                            .map(|&prop| {
                                (prop, self.read_property_value(item.object, prop, None))
                            })
                            .collect(),
                    })
                    .collect();
                Some(ServiceReply::ReadPropertyMultipleAck { results, invoke_id })
            }
            ServiceRequest::WriteProperty {
                object,
                property: prop,
                value,
                priority: _,
                invoke_id,
            } => {
                self.write_requests.fetch_add(1, Ordering::Relaxed);
                Some(self.handle_write(object, prop, value, invoke_id))
            }
            ServiceRequest::SubscribeCov {
                process_id,
                object,
                confirmed,
                lifetime,
                invoke_id,
            } => Some(self.handle_subscribe(peer, process_id, object, confirmed, lifetime, invoke_id)),
            ServiceRequest::SubscribeCovProperty { invoke_id, .. } => {
                // Property-granular COV is not offered; reject it rather
                // than silently accepting an object-level subscription.
                Some(ServiceReply::Error {
                    invoke_id,
                    service: service::SUBSCRIBE_COV_PROPERTY,
                    error: ServiceError::OPTIONAL_FUNCTIONALITY_NOT_SUPPORTED,
                })
            }
        }
    }

    fn handle_who_is(&self, low: Option<u32>, high: Option<u32>) -> Option<ServiceReply> {
        let device = self.registry.device();
        let in_range = match (low, high) {
            (Some(low), Some(high)) => (low..=high).contains(&device.instance),
            _ => true,
        };
        in_range.then(|| {
            ServiceReply::IAm(IAm {
                device_instance: device.instance,
                vendor_id: device.vendor_id,
                max_apdu: MAX_APDU,
                segmentation: SEGMENTATION_NONE,
            })
        })
    }

    fn handle_write(
        &self,
        object: WireObject,
        prop: u32,
        value: PropertyValue,
        invoke_id: u8,
    ) -> ServiceReply {
        let error = |error| ServiceReply::Error {
            invoke_id,
            service: service::WRITE_PROPERTY,
            error,
        };

        let (object_type, instance) = match object {
            WireObject::Standard {
                object_type,
                instance,
            } => (object_type, instance),
            WireObject::Device { .. } => return error(ServiceError::WRITE_ACCESS_DENIED),
            WireObject::Unknown { .. } => return error(ServiceError::UNKNOWN_OBJECT),
        };
        if prop != property::PRESENT_VALUE {
            return error(ServiceError::WRITE_ACCESS_DENIED);
        }
        let Some(value) = value.to_present_value() else {
            return error(ServiceError::INVALID_DATA_TYPE);
        };

        match self
            .registry
            .write_from_wire(object_type, instance, prop, value)
        {
            Ok(change) => {
                if change.cov_triggered {
                    self.cov.fanout(&self.registry, object_type, instance);
                }
                ServiceReply::SimpleAck {
                    invoke_id,
                    service: service::WRITE_PROPERTY,
                }
            }
            Err(RegistryError::NotFound { .. }) => error(ServiceError::UNKNOWN_OBJECT),
            Err(RegistryError::TypeMismatch { .. }) => error(ServiceError::INVALID_DATA_TYPE),
            Err(RegistryError::WriteDenied { .. }) => error(ServiceError::WRITE_ACCESS_DENIED),
        }
    }

    fn handle_subscribe(
        &self,
        peer: &PeerAddress,
        process_id: u32,
        object: WireObject,
        confirmed: Option<bool>,
        lifetime: Option<u32>,
        invoke_id: u8,
    ) -> ServiceReply {
        let error = |error| ServiceReply::Error {
            invoke_id,
            service: service::SUBSCRIBE_COV,
            error,
        };
        let WireObject::Standard {
            object_type,
            instance,
        } = object
        else {
            return error(ServiceError::UNKNOWN_OBJECT);
        };

        // SubscribeCOV with neither option is a cancellation.
        if confirmed.is_none() && lifetime.is_none() {
            self.cov
                .unsubscribe(process_id, Some(peer), object_type, instance);
            return ServiceReply::SimpleAck {
                invoke_id,
                service: service::SUBSCRIBE_COV,
            };
        }

        let request = SubscribeRequest {
            process_id,
            address: peer.clone(),
            object_type,
            instance,
            confirmed: confirmed.unwrap_or(false),
            lifetime: lifetime.unwrap_or(0),
        };
        match self.cov.subscribe(&self.registry, request) {
            Ok(_) => ServiceReply::SimpleAck {
                invoke_id,
                service: service::SUBSCRIBE_COV,
            },
            Err(CovError::TargetMissing(..)) => error(ServiceError::UNKNOWN_OBJECT),
            Err(CovError::Capacity(_)) => error(ServiceError::COV_SUBSCRIPTION_FAILED),
        }
    }

    fn read_property_value(
        &self,
        object: WireObject,
        prop: u32,
        array_index: Option<u32>,
    ) -> Result<PropertyValue, ServiceError> {
        match object {
            WireObject::Device { instance } => self.read_device_property(instance, prop, array_index),
            WireObject::Standard {
                object_type,
                instance,
            } => {
                let record = self
                    .registry
                    .read(object_type, instance)
                    .ok_or(ServiceError::UNKNOWN_OBJECT)?;
                read_record_property(&record, prop, array_index)
            }
            WireObject::Unknown { .. } => Err(ServiceError::UNKNOWN_OBJECT),
        }
    }

    fn read_device_property(
        &self,
        instance: u32,
        prop: u32,
        array_index: Option<u32>,
    ) -> Result<PropertyValue, ServiceError> {
        let device = self.registry.device();
        if instance != device.instance {
            return Err(ServiceError::UNKNOWN_OBJECT);
        }
        let value = match prop {
            property::OBJECT_IDENTIFIER => PropertyValue::ObjectId {
                type_code: DEVICE_TYPE_CODE,
                instance,
            },
            property::OBJECT_NAME => PropertyValue::CharacterString(device.name),
            property::OBJECT_TYPE => PropertyValue::Enumerated(u32::from(DEVICE_TYPE_CODE)),
            property::DESCRIPTION => PropertyValue::CharacterString(device.description),
            property::LOCATION => PropertyValue::CharacterString(device.location),
            property::VENDOR_NAME => PropertyValue::CharacterString(device.vendor_name),
            property::VENDOR_IDENTIFIER => PropertyValue::Unsigned(u32::from(device.vendor_id)),
            property::MODEL_NAME => PropertyValue::CharacterString(device.model_name),
            property::APPLICATION_SOFTWARE_VERSION => {
                PropertyValue::CharacterString(device.application_version)
            }
            property::SYSTEM_STATUS => PropertyValue::Enumerated(SYSTEM_STATUS_OPERATIONAL),
            property::OBJECT_LIST => return self.object_list(instance, array_index),
            _ => return Err(ServiceError::UNKNOWN_PROPERTY),
        };
        Ok(value)
    }

    fn object_list(
        &self,
        device_instance: u32,
        array_index: Option<u32>,
    ) -> Result<PropertyValue, ServiceError> {
        let mut records = self.registry.iterate();
        records.sort_by_key(|record| (record.object_type.to_u16(), record.instance));

        let mut ids = Vec::with_capacity(records.len() + 1);
        ids.push(PropertyValue::ObjectId {
            type_code: DEVICE_TYPE_CODE,
            instance: device_instance,
        });
        ids.extend(records.into_iter().map(|record| PropertyValue::ObjectId {
            type_code: record.object_type.to_u16(),
            instance: record.instance,
        }));

        match array_index {
            None => Ok(PropertyValue::List(ids)),
            Some(0) => Ok(PropertyValue::Unsigned(ids.len() as u32)),
            Some(n) => ids
                .get(n as usize - 1)
                .cloned()
                .ok_or(ServiceError::INVALID_ARRAY_INDEX),
        }
    }
}

fn read_record_property(
    record: &ObjectRecord,
    prop: u32,
    array_index: Option<u32>,
) -> Result<PropertyValue, ServiceError> {
    let class = record.object_type.class();
    let value = match prop {
        property::OBJECT_IDENTIFIER => PropertyValue::ObjectId {
            type_code: record.object_type.to_u16(),
            instance: record.instance,
        },
        property::OBJECT_NAME => PropertyValue::CharacterString(record.name.clone()),
        property::OBJECT_TYPE => PropertyValue::Enumerated(u32::from(record.object_type.to_u16())),
        property::PRESENT_VALUE => PropertyValue::from(record.present_value),
        property::STATUS_FLAGS => PropertyValue::status_flags(record.status_flags),
        property::DESCRIPTION => PropertyValue::CharacterString(record.description.clone()),
        property::UNITS => PropertyValue::Enumerated(u32::from(record.units)),
        property::COV_INCREMENT => PropertyValue::Real(record.cov_increment),
        property::OUT_OF_SERVICE => PropertyValue::Boolean(record.status_flags.out_of_service),
        property::RELIABILITY => PropertyValue::Enumerated(u32::from(record.reliability)),
        property::EVENT_STATE => PropertyValue::Enumerated(u32::from(record.event_state)),
        property::MIN_PRES_VALUE if class == ObjectClass::Analog => {
            PropertyValue::Real(record.min_value)
        }
        property::MAX_PRES_VALUE if class == ObjectClass::Analog => {
            PropertyValue::Real(record.max_value)
        }
        property::INACTIVE_TEXT if class == ObjectClass::Binary => {
            PropertyValue::CharacterString(record.inactive_text.clone())
        }
        property::ACTIVE_TEXT if class == ObjectClass::Binary => {
            PropertyValue::CharacterString(record.active_text.clone())
        }
        property::NUMBER_OF_STATES if class == ObjectClass::MultiState => {
            PropertyValue::Unsigned(record.state_texts.len() as u32)
        }
        property::STATE_TEXT if class == ObjectClass::MultiState => {
            let texts: Vec<PropertyValue> = record
                .state_texts
                .iter()
                .map(|text| PropertyValue::CharacterString(text.clone()))
                .collect();
            return match array_index {
                None => Ok(PropertyValue::List(texts)),
                Some(0) => Ok(PropertyValue::Unsigned(texts.len() as u32)),
                Some(n) => texts
                    .get(n as usize - 1)
                    .cloned()
                    .ok_or(ServiceError::INVALID_ARRAY_INDEX),
            };
        }
        _ => return Err(ServiceError::UNKNOWN_PROPERTY),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::DeviceServer;
    use crate::channel::{ChannelClient, ChannelTransport};
    use crate::cov::CovEngine;
    use crate::registry::ObjectRegistry;
    use crate::transport::{
        property, service, BacnetTransport, CovNotifier, PeerAddress, PropertyValue, ServiceError,
        ServiceReply, ServiceRequest, WireObject,
    };
    use bacgate_core::{
        DeviceInfo, ObjectRecord, ObjectType, PresentValue, StatusFlags, ValueKind,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn analog_input(instance: u32, cov_increment: f32) -> ObjectRecord {
        ObjectRecord {
            object_type: ObjectType::AnalogInput,
            instance,
            name: format!("AI-{instance}"),
            description: "zone temperature".to_owned(),
            value_kind: ValueKind::Real,
            units: 62,
            units_text: "degrees-celsius".to_owned(),
            cov_increment,
            min_value: -20.0,
            max_value: 60.0,
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

    struct Fixture {
        server: DeviceServer<ChannelTransport>,
        transport: Arc<ChannelTransport>,
        peer: PeerAddress,
        _client: ChannelClient,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ObjectRegistry::new(DeviceInfo {
            instance: 1200,
            name: "Gateway".to_owned(),
            vendor_id: 260,
            ..DeviceInfo::default()
        }));
        registry.create_or_replace(analog_input(5, 0.5));
        let (transport, client) = ChannelTransport::pair();
        let cov = Arc::new(CovEngine::new(
            1200,
            16,
            300,
            Arc::clone(&transport) as Arc<dyn CovNotifier>,
        ));
        let server = DeviceServer::new(registry, cov, Arc::clone(&transport));
        Fixture {
            server,
            transport,
            peer: PeerAddress::new(vec![0x01]).unwrap(),
            _client: client,
        }
    }

    fn request(fixture: &Fixture, request: ServiceRequest) -> Option<ServiceReply> {
        fixture.server.dispatch(&fixture.peer, request);
        fixture
            .transport
            .take_replies()
            .into_iter()
            .next()
            .map(|(_, reply)| reply)
    }

    #[test]
    fn who_is_answers_inside_range_only() {
        let fixture = fixture();
        let reply = request(
            &fixture,
            ServiceRequest::WhoIs {
                low: Some(1000),
                high: Some(2000),
            },
        );
        assert!(matches!(reply, Some(ServiceReply::IAm(iam)) if iam.device_instance == 1200));

        let reply = request(
            &fixture,
            ServiceRequest::WhoIs {
                low: Some(0),
                high: Some(100),
            },
        );
        assert!(reply.is_none());
    }

    #[test]
    fn read_property_serves_present_value_and_errors() {
        let fixture = fixture();
        let object = WireObject::Standard {
            object_type: ObjectType::AnalogInput,
            instance: 5,
        };
        let reply = request(
            &fixture,
            ServiceRequest::ReadProperty {
                object,
                property: property::PRESENT_VALUE,
                array_index: None,
                invoke_id: 1,
            },
        );
        assert!(matches!(
            reply,
            Some(ServiceReply::ReadPropertyAck {
                value: PropertyValue::Real(v),
                ..
            }) if v == 21.0
        ));

        let reply = request(
            &fixture,
            ServiceRequest::ReadProperty {
                object,
                property: 9999,
                array_index: None,
                invoke_id: 2,
            },
        );
        assert!(matches!(
            reply,
            Some(ServiceReply::Error { error, .. }) if error == ServiceError::UNKNOWN_PROPERTY
        ));

        let reply = request(
            &fixture,
            ServiceRequest::ReadProperty {
                object: WireObject::Standard {
                    object_type: ObjectType::AnalogInput,
                    instance: 404,
                },
                property: property::PRESENT_VALUE,
                array_index: None,
                invoke_id: 3,
            },
        );
        assert!(matches!(
            reply,
            Some(ServiceReply::Error { error, .. }) if error == ServiceError::UNKNOWN_OBJECT
        ));
    }

    #[test]
    fn device_object_list_includes_the_device_first() {
        let fixture = fixture();
        let reply = request(
            &fixture,
            ServiceRequest::ReadProperty {
                object: WireObject::Device { instance: 1200 },
                property: property::OBJECT_LIST,
                array_index: None,
                invoke_id: 4,
            },
        );
        let Some(ServiceReply::ReadPropertyAck {
            value: PropertyValue::List(ids),
            ..
        }) = reply
        else {
            panic!("expected an object list");
        };
        assert_eq!(
            ids[0],
            PropertyValue::ObjectId {
                type_code: 8,
                instance: 1200
            }
        );
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn write_property_applies_and_fans_out() {
        let fixture = fixture();
        let process_peer = PeerAddress::new(vec![0x02]).unwrap();
        fixture.server.dispatch(
            &process_peer,
            ServiceRequest::SubscribeCov {
                process_id: 9,
                object: WireObject::Standard {
                    object_type: ObjectType::AnalogInput,
                    instance: 5,
                },
                confirmed: Some(false),
                lifetime: Some(120),
                invoke_id: 5,
            },
        );
        fixture.transport.take_replies();

        let reply = request(
            &fixture,
            ServiceRequest::WriteProperty {
                object: WireObject::Standard {
                    object_type: ObjectType::AnalogInput,
                    instance: 5,
                },
                property: property::PRESENT_VALUE,
                value: PropertyValue::Real(23.0),
                priority: None,
                invoke_id: 6,
            },
        );
        assert!(matches!(reply, Some(ServiceReply::SimpleAck { .. })));

        let notifications = fixture.transport.take_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].2.present_value,
            PresentValue::Real(23.0)
        );

        // Writes to anything but present-value are denied.
        let reply = request(
            &fixture,
            ServiceRequest::WriteProperty {
                object: WireObject::Standard {
                    object_type: ObjectType::AnalogInput,
                    instance: 5,
                },
                property: property::OBJECT_NAME,
                value: PropertyValue::CharacterString("nope".to_owned()),
                priority: None,
                invoke_id: 7,
            },
        );
        assert!(matches!(
            reply,
            Some(ServiceReply::Error { error, .. }) if error == ServiceError::WRITE_ACCESS_DENIED
        ));
    }

    #[test]
    fn subscribe_cov_property_is_rejected() {
        let fixture = fixture();
        let reply = request(
            &fixture,
            ServiceRequest::SubscribeCovProperty {
                process_id: 1,
                object: WireObject::Standard {
                    object_type: ObjectType::AnalogInput,
                    instance: 5,
                },
                property: property::PRESENT_VALUE,
                invoke_id: 8,
            },
        );
        assert!(matches!(
            reply,
            Some(ServiceReply::Error { error, service: s, .. })
                if error == ServiceError::OPTIONAL_FUNCTIONALITY_NOT_SUPPORTED
                    && s == service::SUBSCRIBE_COV_PROPERTY
        ));
    }

    #[test]
    fn cancellation_removes_the_subscription() {
        let fixture = fixture();
        let object = WireObject::Standard {
            object_type: ObjectType::AnalogInput,
            instance: 5,
        };
        request(
            &fixture,
            ServiceRequest::SubscribeCov {
                process_id: 9,
                object,
                confirmed: Some(false),
                lifetime: Some(120),
                invoke_id: 9,
            },
        );
        assert_eq!(fixture.server.cov.active_count(), 1);

        let reply = request(
            &fixture,
            ServiceRequest::SubscribeCov {
                process_id: 9,
                object,
                confirmed: None,
                lifetime: None,
                invoke_id: 10,
            },
        );
        assert!(matches!(reply, Some(ServiceReply::SimpleAck { .. })));
        assert_eq!(fixture.server.cov.active_count(), 0);
    }

    #[test]
    fn rpm_mixes_values_and_embedded_errors() {
        let fixture = fixture();
        let object = WireObject::Standard {
            object_type: ObjectType::AnalogInput,
            instance: 5,
        };
        let reply = request(
            &fixture,
            ServiceRequest::ReadPropertyMultiple {
                items: vec![crate::transport::ReadAccessSpec {
                    object,
                    properties: vec![property::PRESENT_VALUE, 9999],
                }],
                invoke_id: 11,
            },
        );
        let Some(ServiceReply::ReadPropertyMultipleAck { results, .. }) = reply else {
            panic!("expected an RPM ack");
        };
        assert_eq!(results.len(), 1);
        assert!(results[0].results[0].1.is_ok());
        assert_eq!(
            results[0].results[1].1,
            Err(ServiceError::UNKNOWN_PROPERTY)
        );
    }

    #[test]
    fn poll_timeout_is_quiet() {
        let fixture = fixture();
        assert!(fixture
            .transport
            .poll(Duration::from_millis(1))
            .unwrap()
            .is_none());
    }
}
