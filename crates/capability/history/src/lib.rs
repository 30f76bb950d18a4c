//! # Hub 历史记录模块
//!
//! 每个 Thing 地址一个桶，键为 `{millis:015}/{name}/{e|a}/{seq}`，值为原始数据载荷。
//! 发布者、Thing、名称与 `created` 由桶 ID 和键还原，因此桶内字典序即时间顺序，
//! 按时间定位直接使用桶游标的 `seek`。
//!
//! ## 组成
//!
//! - `keys`：记录键编解码
//! - `cursor`：带名称过滤与上界的历史游标
//! - `latest`：最新值索引（`properties` 桶）
//! - `retention`：保留规则与周期清理
//! - `service`：`Historian`，签发写/读能力并自动收录发布/订阅中的事件与动作

pub mod keys;
pub mod retention;

mod cursor;
mod latest;
mod service;
mod traits;

pub use keys::{HistoryKey, RecordKind, encode_key, seek_key};
pub use latest::{LATEST_BUCKET, expand_properties};
pub use retention::{RetentionPolicy, RetentionRule, parse_max_age};
pub use service::{HISTORIAN_SERVICE_ID, Historian, HistorianConfig};
pub use traits::{AddHistory, HistoryCursor, HistoryService, ReadHistory};

/// 能力解析器中的登记名。
pub const CAPABILITY_NAME: &str = "history";
