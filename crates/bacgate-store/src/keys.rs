use bacgate_core::ObjectType;

/// Builds the store's key namespace.
///
/// Layout: `<prefix>object:<type>:<instance>` for records,
/// `<prefix>objects:index` for the identity set,
/// `<prefix>stream:positions` for the cursor hash,
/// `<prefix>device:config` for device metadata, and
/// `<prefix>events:value_change` for the advisory change channel.
#[derive(Debug, Clone)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn object(&self, object_type: ObjectType, instance: u32) -> String {
        format!("{}object:{}:{instance}", self.prefix, object_type.to_u16())
    }

    pub fn object_index(&self) -> String {
        format!("{}objects:index", self.prefix)
    }

    pub fn stream_positions(&self) -> String {
        format!("{}stream:positions", self.prefix)
    }

    pub fn device_config(&self) -> String {
        format!("{}device:config", self.prefix)
    }

    pub fn value_change_channel(&self) -> String {
        format!("{}events:value_change", self.prefix)
    }

    /// The `<type>:<instance>` member stored in the index set.
    pub fn index_member(object_type: ObjectType, instance: u32) -> String {
        format!("{}:{instance}", object_type.to_u16())
    }

    /// Parses an index-set member back into an identity pair.
    pub fn parse_index_member(member: &str) -> Option<(ObjectType, u32)> {
        let (type_code, instance) = member.split_once(':')?;
        let object_type = ObjectType::from_u16(type_code.parse().ok()?)?;
        Some((object_type, instance.parse().ok()?))
    }
}
