mod device;
mod object_type;
mod record;
mod status_flags;
mod value;

pub use device::{DeviceInfo, DeviceUpdate};
pub use object_type::{ObjectClass, ObjectType};
pub use record::{ObjectRecord, UNITS_NO_UNITS};
pub use status_flags::StatusFlags;
pub use value::{PresentValue, ValueKind};
