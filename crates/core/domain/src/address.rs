//! Thing 地址：`publisherID/thingID`。

use std::fmt;

/// Thing 地址，目录主键与历史桶名。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThingAddr {
    pub publisher_id: String,
    pub thing_id: String,
}

impl ThingAddr {
    pub fn new(publisher_id: impl Into<String>, thing_id: impl Into<String>) -> Self {
        Self {
            publisher_id: publisher_id.into(),
            thing_id: thing_id.into(),
        }
    }

    /// 以第一个 `/` 拆分；两段均非空才有效。
    pub fn parse(addr: &str) -> Option<Self> {
        let (publisher_id, thing_id) = addr.split_once('/')?;
        if publisher_id.is_empty() || thing_id.is_empty() {
            return None;
        }
        Some(Self::new(publisher_id, thing_id))
    }
}

impl fmt::Display for ThingAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.publisher_id, self.thing_id)
    }
}
