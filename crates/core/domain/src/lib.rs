//! Hub 领域模型：ThingValue 信封、Thing 地址、主题与错误分类。

pub mod address;
pub mod error;
pub mod identity;
pub mod time;
pub mod topic;
pub mod value;

pub use address::ThingAddr;
pub use error::HubError;
pub use identity::{ClientIdentity, ClientType};
pub use topic::{MessageType, ThingTopic, thing_pattern, thing_topic};
pub use value::{CreatedRepair, ThingValue};
