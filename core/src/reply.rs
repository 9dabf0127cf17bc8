use std::collections::HashMap;

/// 源消息 id 到目标消息 id 的映射，只追加不修改
#[derive(Debug, Default)]
pub struct ReplyResolver {
    mapping: HashMap<i32, i32>,
}

impl ReplyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同一源 id 只记录第一次成功的映射
    pub fn record(&mut self, source_id: i32, destination_id: i32) {
        self.mapping.entry(source_id).or_insert(destination_id);
    }

    pub fn resolve(&self, reply_to: Option<i32>) -> Option<i32> {
        reply_to.and_then(|id| self.mapping.get(&id).copied())
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}
