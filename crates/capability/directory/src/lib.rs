//! Thing Description 目录：每个 Thing 地址至多一份 TD，提供读/写能力，
//! 并从发布/订阅自动收录设备发布的 TD。

mod cursor;
mod service;
mod traits;

pub use service::{DIRECTORY_SERVICE_ID, Directory, TD_BUCKET};
pub use traits::{DirectoryCursor, DirectoryService, ReadDirectory, UpdateDirectory};

/// 能力解析器中的登记名。
pub const CAPABILITY_NAME: &str = "directory";
