//! Service-level codecs bridging raw frames and the decoded service model.

use crate::transport::{
    property, service, CovNotification, PropertyValue, ReadAccessSpec, ServiceReply,
    ServiceRequest, WireObject, DEVICE_TYPE_CODE,
};
use crate::wire::apdu::{
    ComplexAckHeader, ConfirmedRequestHeader, ErrorPdu, SimpleAck, UnconfirmedRequestHeader,
    APDU_CONFIRMED_REQUEST, APDU_SIMPLE_ACK, APDU_UNCONFIRMED_REQUEST,
};
use crate::wire::codec::{
    decode_signed, decode_unsigned, encode_app_bit_string, encode_app_boolean,
    encode_app_character_string, encode_app_enumerated, encode_app_null, encode_app_object_id,
    encode_app_real, encode_app_signed, encode_app_unsigned, encode_ctx_object_id,
    encode_ctx_unsigned, object_id_parts, AppTag, DecodeError, EncodeError, Reader, Tag, Writer,
};
use crate::wire::npdu::{decode_npdu, encode_npdu};

/// One decoded APDU from the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request(ServiceRequest),
    SimpleAck { invoke_id: u8, service: u8 },
    /// Traffic the gateway does not handle.
    Ignored,
}

/// Decodes an NPDU+APDU frame body into the service model.
pub fn decode_frame(body: &[u8]) -> Result<Incoming, DecodeError> {
    let mut r = Reader::new(body);
    decode_npdu(&mut r)?;
    decode_apdu(&mut r)
}

fn decode_apdu(r: &mut Reader<'_>) -> Result<Incoming, DecodeError> {
    match r.peek_u8()? >> 4 {
        APDU_UNCONFIRMED_REQUEST => {
            let header = UnconfirmedRequestHeader::decode(r)?;
            if header.service_choice == service::WHO_IS {
                decode_who_is(r).map(Incoming::Request)
            } else {
                Ok(Incoming::Ignored)
            }
        }
        APDU_CONFIRMED_REQUEST => {
            let header = ConfirmedRequestHeader::decode(r)?;
            let invoke_id = header.invoke_id;
            let request = match header.service_choice {
                service::READ_PROPERTY => decode_read_property(r, invoke_id)?,
                service::READ_PROPERTY_MULTIPLE => decode_read_property_multiple(r, invoke_id)?,
                service::WRITE_PROPERTY => decode_write_property(r, invoke_id)?,
                service::SUBSCRIBE_COV => decode_subscribe_cov(r, invoke_id)?,
                service::SUBSCRIBE_COV_PROPERTY => decode_subscribe_cov_property(r, invoke_id)?,
                _ => return Ok(Incoming::Ignored),
            };
            Ok(Incoming::Request(request))
        }
        APDU_SIMPLE_ACK => {
            let ack = SimpleAck::decode(r)?;
            Ok(Incoming::SimpleAck {
                invoke_id: ack.invoke_id,
                service: ack.service_choice,
            })
        }
        _ => Ok(Incoming::Ignored),
    }
}

fn decode_who_is(r: &mut Reader<'_>) -> Result<ServiceRequest, DecodeError> {
    if r.is_empty() {
        return Ok(ServiceRequest::WhoIs {
            low: None,
            high: None,
        });
    }
    let low = decode_ctx_unsigned_field(r, 0)?;
    let high = decode_ctx_unsigned_field(r, 1)?;
    Ok(ServiceRequest::WhoIs {
        low: Some(low),
        high: Some(high),
    })
}

fn decode_read_property(r: &mut Reader<'_>, invoke_id: u8) -> Result<ServiceRequest, DecodeError> {
    let object = decode_ctx_object(r, 0)?;
    let prop = decode_ctx_unsigned_field(r, 1)?;
    let array_index = if r.is_empty() {
        None
    } else {
        Some(decode_ctx_unsigned_field(r, 2)?)
    };
    Ok(ServiceRequest::ReadProperty {
        object,
        property: prop,
        array_index,
        invoke_id,
    })
}

fn decode_read_property_multiple(
    r: &mut Reader<'_>,
    invoke_id: u8,
) -> Result<ServiceRequest, DecodeError> {
    let mut items = Vec::new();
    while !r.is_empty() {
        let object = decode_ctx_object(r, 0)?;
        expect_tag(r, Tag::Open(1))?;
        let mut properties = Vec::new();
        loop {
            match Tag::decode(r)? {
                Tag::Close(1) => break,
                Tag::Ctx { num: 0, len } => properties.push(decode_unsigned(r, len as usize)?),
                Tag::Ctx { num: 1, len } => {
                    // Property array index; accepted and ignored.
                    decode_unsigned(r, len as usize)?;
                }
                _ => return Err(DecodeError::InvalidTag),
            }
        }
        items.push(ReadAccessSpec { object, properties });
    }
    if items.is_empty() {
        return Err(DecodeError::InvalidValue);
    }
    Ok(ServiceRequest::ReadPropertyMultiple { items, invoke_id })
}

fn decode_write_property(r: &mut Reader<'_>, invoke_id: u8) -> Result<ServiceRequest, DecodeError> {
    let object = decode_ctx_object(r, 0)?;
    let prop = decode_ctx_unsigned_field(r, 1)?;

    let tag = Tag::decode(r)?;
    let tag = if let Tag::Ctx { num: 2, len } = tag {
        // Property array index; accepted and ignored.
        decode_unsigned(r, len as usize)?;
        Tag::decode(r)?
    } else {
        tag
    };
    if tag != Tag::Open(3) {
        return Err(DecodeError::InvalidTag);
    }
    let value = decode_property_value(r)?;
    expect_tag(r, Tag::Close(3))?;

    let priority = if r.is_empty() {
        None
    } else {
        let raw = decode_ctx_unsigned_field(r, 4)?;
        if raw > u32::from(u8::MAX) {
            return Err(DecodeError::InvalidValue);
        }
        Some(raw as u8)
    };

    Ok(ServiceRequest::WriteProperty {
        object,
        property: prop,
        value,
        priority,
        invoke_id,
    })
}

fn decode_subscribe_cov(r: &mut Reader<'_>, invoke_id: u8) -> Result<ServiceRequest, DecodeError> {
    let process_id = decode_ctx_unsigned_field(r, 0)?;
    let object = decode_ctx_object(r, 1)?;
    let mut confirmed = None;
    let mut lifetime = None;
    while !r.is_empty() {
        match Tag::decode(r)? {
            Tag::Ctx { num: 2, len: 1 } => confirmed = Some(r.read_u8()? != 0),
            Tag::Ctx { num: 3, len } => lifetime = Some(decode_unsigned(r, len as usize)?),
            _ => return Err(DecodeError::InvalidTag),
        }
    }
    Ok(ServiceRequest::SubscribeCov {
        process_id,
        object,
        confirmed,
        lifetime,
        invoke_id,
    })
}

fn decode_subscribe_cov_property(
    r: &mut Reader<'_>,
    invoke_id: u8,
) -> Result<ServiceRequest, DecodeError> {
    let process_id = decode_ctx_unsigned_field(r, 0)?;
    let object = decode_ctx_object(r, 1)?;
    let mut monitored_property = None;
    while !r.is_empty() {
        match Tag::decode(r)? {
            Tag::Ctx { num: 2, len: 1 } => {
                let _confirmed = r.read_u8()?;
            }
            Tag::Ctx { num: 3, len } | Tag::Ctx { num: 5, len } => {
                // Lifetime or COV increment; irrelevant to the rejection.
                r.read_exact(len as usize)?;
            }
            Tag::Open(4) => {
                let prop = decode_ctx_unsigned_field(r, 0)?;
                loop {
                    match Tag::decode(r)? {
                        Tag::Close(4) => break,
                        Tag::Ctx { num: 1, len } => {
                            decode_unsigned(r, len as usize)?;
                        }
                        _ => return Err(DecodeError::InvalidTag),
                    }
                }
                monitored_property = Some(prop);
            }
            _ => return Err(DecodeError::InvalidTag),
        }
    }
    Ok(ServiceRequest::SubscribeCovProperty {
        process_id,
        object,
        property: monitored_property.ok_or(DecodeError::InvalidValue)?,
        invoke_id,
    })
}

/// Decodes one application-tagged value.
fn decode_property_value(r: &mut Reader<'_>) -> Result<PropertyValue, DecodeError> {
    let Tag::App { tag, len } = Tag::decode(r)? else {
        return Err(DecodeError::InvalidTag);
    };
    let len = len as usize;
    match tag {
        AppTag::Null => Ok(PropertyValue::Null),
        AppTag::Boolean => Ok(PropertyValue::Boolean(len == 1)),
        AppTag::UnsignedInt => Ok(PropertyValue::Unsigned(decode_unsigned(r, len)?)),
        AppTag::SignedInt => Ok(PropertyValue::Signed(decode_signed(r, len)?)),
        AppTag::Enumerated => Ok(PropertyValue::Enumerated(decode_unsigned(r, len)?)),
        AppTag::Real => {
            if len != 4 {
                return Err(DecodeError::InvalidLength);
            }
            Ok(PropertyValue::Real(f32::from_bits(r.read_be_u32()?)))
        }
        AppTag::CharacterString => {
            if len == 0 {
                return Err(DecodeError::InvalidLength);
            }
            let raw = r.read_exact(len)?;
            if raw[0] != 0 {
                // Only the UTF-8 character set is supported.
                return Err(DecodeError::Unsupported);
            }
            let text =
                std::str::from_utf8(&raw[1..]).map_err(|_| DecodeError::InvalidValue)?;
            Ok(PropertyValue::CharacterString(text.to_owned()))
        }
        AppTag::BitString => {
            if len == 0 {
                return Err(DecodeError::InvalidLength);
            }
            let raw = r.read_exact(len)?;
            Ok(PropertyValue::BitString {
                unused_bits: raw[0],
                data: raw[1..].to_vec(),
            })
        }
        AppTag::ObjectId => {
            if len != 4 {
                return Err(DecodeError::InvalidLength);
            }
            let (type_code, instance) = object_id_parts(r.read_be_u32()?);
            Ok(PropertyValue::ObjectId {
                type_code,
                instance,
            })
        }
        AppTag::Double | AppTag::OctetString | AppTag::Date | AppTag::Time => {
            Err(DecodeError::Unsupported)
        }
    }
}

fn encode_property_value(w: &mut Writer, value: &PropertyValue) -> Result<(), EncodeError> {
    match value {
        PropertyValue::Null => encode_app_null(w),
        PropertyValue::Boolean(v) => encode_app_boolean(w, *v),
        PropertyValue::Unsigned(v) => encode_app_unsigned(w, *v),
        PropertyValue::Signed(v) => encode_app_signed(w, *v),
        PropertyValue::Real(v) => encode_app_real(w, *v),
        PropertyValue::Enumerated(v) => encode_app_enumerated(w, *v),
        PropertyValue::CharacterString(v) => encode_app_character_string(w, v),
        PropertyValue::BitString { unused_bits, data } => {
            encode_app_bit_string(w, *unused_bits, data)
        }
        PropertyValue::ObjectId {
            type_code,
            instance,
        } => encode_app_object_id(w, *type_code, *instance),
        PropertyValue::List(values) => {
            for value in values {
                if matches!(value, PropertyValue::List(_)) {
                    return Err(EncodeError::Unsupported("nested value list"));
                }
                encode_property_value(w, value)?;
            }
        }
    }
    Ok(())
}

/// Encodes a reply into an NPDU+APDU frame body.
pub fn encode_reply(reply: &ServiceReply) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::new();
    encode_npdu(&mut w, false);

    match reply {
        ServiceReply::IAm(iam) => {
            UnconfirmedRequestHeader {
                service_choice: service::I_AM,
            }
            .encode(&mut w);
            encode_app_object_id(&mut w, DEVICE_TYPE_CODE, iam.device_instance);
            encode_app_unsigned(&mut w, u32::from(iam.max_apdu));
            encode_app_enumerated(&mut w, u32::from(iam.segmentation));
            encode_app_unsigned(&mut w, u32::from(iam.vendor_id));
        }
        ServiceReply::SimpleAck { invoke_id, service } => {
            SimpleAck {
                invoke_id: *invoke_id,
                service_choice: *service,
            }
            .encode(&mut w);
        }
        ServiceReply::Error {
            invoke_id,
            service,
            error,
        } => {
            ErrorPdu {
                invoke_id: *invoke_id,
                service_choice: *service,
                class: error.class,
                code: error.code,
            }
            .encode(&mut w);
        }
        ServiceReply::ReadPropertyAck {
            object,
            property: prop,
            array_index,
            value,
            invoke_id,
        } => {
            ComplexAckHeader {
                invoke_id: *invoke_id,
                service_choice: service::READ_PROPERTY,
            }
            .encode(&mut w);
            encode_ctx_object_id(&mut w, 0, object.type_code(), object.instance());
            encode_ctx_unsigned(&mut w, 1, *prop);
            if let Some(index) = array_index {
                encode_ctx_unsigned(&mut w, 2, *index);
            }
            Tag::Open(3).encode(&mut w);
            encode_property_value(&mut w, value)?;
            Tag::Close(3).encode(&mut w);
        }
        ServiceReply::ReadPropertyMultipleAck { results, invoke_id } => {
            ComplexAckHeader {
                invoke_id: *invoke_id,
                service_choice: service::READ_PROPERTY_MULTIPLE,
            }
            .encode(&mut w);
            for result in results {
                encode_ctx_object_id(&mut w, 0, result.object.type_code(), result.object.instance());
                Tag::Open(1).encode(&mut w);
                for (prop, outcome) in &result.results {
                    encode_ctx_unsigned(&mut w, 2, *prop);
                    match outcome {
                        Ok(value) => {
                            Tag::Open(4).encode(&mut w);
                            encode_property_value(&mut w, value)?;
                            Tag::Close(4).encode(&mut w);
                        }
                        Err(error) => {
                            Tag::Open(5).encode(&mut w);
                            encode_app_enumerated(&mut w, error.class);
                            encode_app_enumerated(&mut w, error.code);
                            Tag::Close(5).encode(&mut w);
                        }
                    }
                }
                Tag::Close(1).encode(&mut w);
            }
        }
    }

    Ok(w.into_bytes())
}

/// Encodes a COV notification into an NPDU+APDU frame body.
pub fn encode_cov_notification(
    confirmed: bool,
    invoke_id: u8,
    notification: &CovNotification,
) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::new();
    encode_npdu(&mut w, confirmed);

    if confirmed {
        ConfirmedRequestHeader {
            invoke_id,
            service_choice: service::CONFIRMED_COV_NOTIFICATION,
        }
        .encode(&mut w);
    } else {
        UnconfirmedRequestHeader {
            service_choice: service::UNCONFIRMED_COV_NOTIFICATION,
        }
        .encode(&mut w);
    }

    encode_ctx_unsigned(&mut w, 0, notification.process_id);
    encode_ctx_object_id(&mut w, 1, DEVICE_TYPE_CODE, notification.device_instance);
    encode_ctx_object_id(
        &mut w,
        2,
        notification.object_type.to_u16(),
        notification.instance,
    );
    encode_ctx_unsigned(&mut w, 3, notification.time_remaining);

    Tag::Open(4).encode(&mut w);
    encode_ctx_unsigned(&mut w, 0, property::PRESENT_VALUE);
    Tag::Open(2).encode(&mut w);
    encode_property_value(&mut w, &PropertyValue::from(notification.present_value))?;
    Tag::Close(2).encode(&mut w);
    encode_ctx_unsigned(&mut w, 0, property::STATUS_FLAGS);
    Tag::Open(2).encode(&mut w);
    encode_property_value(&mut w, &PropertyValue::status_flags(notification.status_flags))?;
    Tag::Close(2).encode(&mut w);
    Tag::Close(4).encode(&mut w);

    Ok(w.into_bytes())
}

fn decode_ctx_object(r: &mut Reader<'_>, expected: u8) -> Result<WireObject, DecodeError> {
    match Tag::decode(r)? {
        Tag::Ctx { num, len: 4 } if num == expected => {
            let (type_code, instance) = object_id_parts(r.read_be_u32()?);
            Ok(WireObject::from_code(type_code, instance))
        }
        _ => Err(DecodeError::InvalidTag),
    }
}

fn decode_ctx_unsigned_field(r: &mut Reader<'_>, expected: u8) -> Result<u32, DecodeError> {
    match Tag::decode(r)? {
        Tag::Ctx { num, len } if num == expected => decode_unsigned(r, len as usize),
        _ => Err(DecodeError::InvalidTag),
    }
}

fn expect_tag(r: &mut Reader<'_>, wanted: Tag) -> Result<(), DecodeError> {
    if Tag::decode(r)? == wanted {
        Ok(())
    } else {
        Err(DecodeError::InvalidTag)
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_frame, encode_cov_notification, encode_reply, Incoming};
    use crate::transport::{
        property, service, CovNotification, IAm, PropertyValue, ServiceReply, ServiceRequest,
        WireObject,
    };
    use crate::wire::apdu::{ConfirmedRequestHeader, UnconfirmedRequestHeader};
    use crate::wire::codec::{
        encode_app_real, encode_ctx_object_id, encode_ctx_unsigned, object_id_raw, Reader, Tag,
        Writer,
    };
    use crate::wire::npdu::encode_npdu;
    use bacgate_core::{ObjectType, PresentValue, StatusFlags};

    fn confirmed_request(service_choice: u8, invoke_id: u8) -> Writer {
        let mut w = Writer::new();
        encode_npdu(&mut w, true);
        ConfirmedRequestHeader {
            invoke_id,
            service_choice,
        }
        .encode(&mut w);
        w
    }

    #[test]
    fn who_is_with_and_without_limits() {
        let mut w = Writer::new();
        encode_npdu(&mut w, false);
        UnconfirmedRequestHeader {
            service_choice: service::WHO_IS,
        }
        .encode(&mut w);
        let body = w.into_bytes();
        assert_eq!(
            decode_frame(&body).unwrap(),
            Incoming::Request(ServiceRequest::WhoIs {
                low: None,
                high: None
            })
        );

        let mut w = Writer::new();
        encode_npdu(&mut w, false);
        UnconfirmedRequestHeader {
            service_choice: service::WHO_IS,
        }
        .encode(&mut w);
        encode_ctx_unsigned(&mut w, 0, 100);
        encode_ctx_unsigned(&mut w, 1, 2000);
        let body = w.into_bytes();
        assert_eq!(
            decode_frame(&body).unwrap(),
            Incoming::Request(ServiceRequest::WhoIs {
                low: Some(100),
                high: Some(2000)
            })
        );
    }

    #[test]
    fn read_property_request_decodes() {
        let mut w = confirmed_request(service::READ_PROPERTY, 7);
        encode_ctx_object_id(&mut w, 0, 0, 5);
        encode_ctx_unsigned(&mut w, 1, property::PRESENT_VALUE);
        let body = w.into_bytes();

        assert_eq!(
            decode_frame(&body).unwrap(),
            Incoming::Request(ServiceRequest::ReadProperty {
                object: WireObject::Standard {
                    object_type: ObjectType::AnalogInput,
                    instance: 5
                },
                property: property::PRESENT_VALUE,
                array_index: None,
                invoke_id: 7,
            })
        );
    }

    #[test]
    fn write_property_request_decodes() {
        let mut w = confirmed_request(service::WRITE_PROPERTY, 3);
        encode_ctx_object_id(&mut w, 0, 2, 9);
        encode_ctx_unsigned(&mut w, 1, property::PRESENT_VALUE);
        Tag::Open(3).encode(&mut w);
        encode_app_real(&mut w, 22.5);
        Tag::Close(3).encode(&mut w);
        encode_ctx_unsigned(&mut w, 4, 8);
        let body = w.into_bytes();

        assert_eq!(
            decode_frame(&body).unwrap(),
            Incoming::Request(ServiceRequest::WriteProperty {
                object: WireObject::Standard {
                    object_type: ObjectType::AnalogValue,
                    instance: 9
                },
                property: property::PRESENT_VALUE,
                value: PropertyValue::Real(22.5),
                priority: Some(8),
                invoke_id: 3,
            })
        );
    }

    #[test]
    fn subscribe_cov_request_decodes() {
        let mut w = confirmed_request(service::SUBSCRIBE_COV, 11);
        encode_ctx_unsigned(&mut w, 0, 1);
        encode_ctx_object_id(&mut w, 1, 0, 5);
        Tag::Ctx { num: 2, len: 1 }.encode(&mut w);
        w.push(0);
        encode_ctx_unsigned(&mut w, 3, 60);
        let body = w.into_bytes();

        assert_eq!(
            decode_frame(&body).unwrap(),
            Incoming::Request(ServiceRequest::SubscribeCov {
                process_id: 1,
                object: WireObject::Standard {
                    object_type: ObjectType::AnalogInput,
                    instance: 5
                },
                confirmed: Some(false),
                lifetime: Some(60),
                invoke_id: 11,
            })
        );
    }

    #[test]
    fn cancellation_form_has_no_options() {
        let mut w = confirmed_request(service::SUBSCRIBE_COV, 12);
        encode_ctx_unsigned(&mut w, 0, 1);
        encode_ctx_object_id(&mut w, 1, 0, 5);
        let body = w.into_bytes();

        let Incoming::Request(ServiceRequest::SubscribeCov {
            confirmed, lifetime, ..
        }) = decode_frame(&body).unwrap()
        else {
            panic!("wrong decode");
        };
        assert_eq!(confirmed, None);
        assert_eq!(lifetime, None);
    }

    #[test]
    fn read_property_multiple_decodes() {
        let mut w = confirmed_request(service::READ_PROPERTY_MULTIPLE, 2);
        encode_ctx_object_id(&mut w, 0, 0, 5);
        Tag::Open(1).encode(&mut w);
        encode_ctx_unsigned(&mut w, 0, property::PRESENT_VALUE);
        encode_ctx_unsigned(&mut w, 0, property::STATUS_FLAGS);
        Tag::Close(1).encode(&mut w);
        let body = w.into_bytes();

        let Incoming::Request(ServiceRequest::ReadPropertyMultiple { items, invoke_id: 2 }) =
            decode_frame(&body).unwrap()
        else {
            panic!("wrong decode");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].properties,
            vec![property::PRESENT_VALUE, property::STATUS_FLAGS]
        );
    }

    #[test]
    fn i_am_reply_encodes_expected_layout() {
        let body = encode_reply(&ServiceReply::IAm(IAm {
            device_instance: 1200,
            vendor_id: 260,
            max_apdu: 1476,
            segmentation: 3,
        }))
        .unwrap();

        // NPDU (2) + unconfirmed header (2) + object id tag.
        assert_eq!(body[2], 0x10);
        assert_eq!(body[3], service::I_AM);
        assert_eq!(body[4], 0xC4);
        let raw = u32::from_be_bytes([body[5], body[6], body[7], body[8]]);
        assert_eq!(raw, object_id_raw(8, 1200));
    }

    #[test]
    fn cov_notification_roundtrips_through_the_tag_layer() {
        let body = encode_cov_notification(
            false,
            0,
            &CovNotification {
                process_id: 1,
                device_instance: 1200,
                object_type: ObjectType::AnalogInput,
                instance: 5,
                time_remaining: 60,
                present_value: PresentValue::Real(21.6),
                status_flags: StatusFlags::default(),
            },
        )
        .unwrap();

        let mut r = Reader::new(&body);
        crate::wire::npdu::decode_npdu(&mut r).unwrap();
        let header = UnconfirmedRequestHeader::decode(&mut r).unwrap();
        assert_eq!(
            header.service_choice,
            service::UNCONFIRMED_COV_NOTIFICATION
        );
        // process id
        assert_eq!(Tag::decode(&mut r).unwrap(), Tag::Ctx { num: 0, len: 1 });
        assert_eq!(r.read_u8().unwrap(), 1);
        // initiating device
        assert_eq!(Tag::decode(&mut r).unwrap(), Tag::Ctx { num: 1, len: 4 });
        assert_eq!(r.read_be_u32().unwrap(), object_id_raw(8, 1200));
        // monitored object
        assert_eq!(Tag::decode(&mut r).unwrap(), Tag::Ctx { num: 2, len: 4 });
        assert_eq!(r.read_be_u32().unwrap(), object_id_raw(0, 5));
        // time remaining
        assert_eq!(Tag::decode(&mut r).unwrap(), Tag::Ctx { num: 3, len: 1 });
        assert_eq!(r.read_u8().unwrap(), 60);
        assert_eq!(Tag::decode(&mut r).unwrap(), Tag::Open(4));
    }
}
