use serde::{Deserialize, Serialize};

/// Identity and descriptive properties of the exposed BACnet device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub instance: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub vendor_id: u16,
    #[serde(default)]
    pub vendor_name: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub application_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            instance: 0,
            name: "bacgate".to_owned(),
            description: String::new(),
            location: String::new(),
            vendor_id: 0,
            vendor_name: String::new(),
            model_name: String::new(),
            application_version: String::new(),
        }
    }
}

/// Partial device-metadata update carried by a `DeviceConfig` event.
///
/// `None` means the event did not supply the field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub model_name: Option<String>,
    pub vendor_name: Option<String>,
    pub application_version: Option<String>,
}

impl DeviceInfo {
    /// Applies the supplied fields of `update`, leaving the rest intact.
    pub fn apply(&mut self, update: &DeviceUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(description) = &update.description {
            self.description = description.clone();
        }
        if let Some(location) = &update.location {
            self.location = location.clone();
        }
        if let Some(model_name) = &update.model_name {
            self.model_name = model_name.clone();
        }
        if let Some(vendor_name) = &update.vendor_name {
            self.vendor_name = vendor_name.clone();
        }
        if let Some(application_version) = &update.application_version {
            self.application_version = application_version.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceInfo, DeviceUpdate};

    #[test]
    fn apply_only_touches_supplied_fields() {
        let mut info = DeviceInfo {
            instance: 1200,
            name: "Gateway".to_owned(),
            location: "Plant room".to_owned(),
            ..DeviceInfo::default()
        };

        info.apply(&DeviceUpdate {
            name: Some("Building A".to_owned()),
            ..DeviceUpdate::default()
        });

        assert_eq!(info.name, "Building A");
        assert_eq!(info.location, "Plant room");
        assert_eq!(info.instance, 1200);
    }
}
