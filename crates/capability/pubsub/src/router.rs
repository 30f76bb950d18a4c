//! 主题路由：单层通配符 `+` 匹配与订阅登记。

use std::collections::HashMap;

/// 判断具体主题是否匹配模式：段数相同，且每段相等或为 `+`。
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (None, None) => return true,
            (Some(expected), Some(actual)) => {
                if expected != "+" && expected != actual {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// 预拆分的订阅模式。
#[derive(Debug, Clone)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<String>,
}

impl TopicPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            segments: pattern.split('/').map(str::to_string).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches_segments(&self, topic: &[&str]) -> bool {
        self.segments.len() == topic.len()
            && self
                .segments
                .iter()
                .zip(topic)
                .all(|(expected, actual)| expected == "+" || expected == actual)
    }
}

/// 按订阅 ID 登记的路由表。每次发布线性扫描全部模式。
#[derive(Debug)]
pub struct TopicRouter<T> {
    entries: HashMap<String, (TopicPattern, T)>,
}

impl<T> TopicRouter<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, pattern: &str, value: T) {
        self.entries
            .insert(id.into(), (TopicPattern::new(pattern), value));
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.entries.remove(id).map(|(_, value)| value)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有匹配该主题的登记项。
    pub fn matching(&self, topic: &str) -> Vec<&T> {
        let parts: Vec<&str> = topic.split('/').collect();
        self.entries
            .values()
            .filter(|(pattern, _)| pattern.matches_segments(&parts))
            .map(|(_, value)| value)
            .collect()
    }

    /// 清空并返回全部登记项。
    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain().map(|(_, (_, value))| value).collect()
    }
}

impl<T> Default for TopicRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}
