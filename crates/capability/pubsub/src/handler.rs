//! 订阅处理器。

use async_trait::async_trait;
use domain::ThingValue;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 订阅回调。同一订阅的处理器不会被并发调用。
#[async_trait]
pub trait ValueHandler: Send + Sync {
    async fn handle(&self, value: ThingValue);
}

/// 同步闭包处理器。
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> ValueHandler for FnHandler<F>
where
    F: Fn(ThingValue) + Send + Sync,
{
    async fn handle(&self, value: ThingValue) {
        (self.0)(value)
    }
}

/// 以闭包构造处理器。
pub fn handler_fn<F>(f: F) -> Arc<dyn ValueHandler>
where
    F: Fn(ThingValue) + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// 转发到无界通道的处理器；接收端关闭后丢弃。
pub struct ChannelHandler {
    sender: mpsc::UnboundedSender<ThingValue>,
}

#[async_trait]
impl ValueHandler for ChannelHandler {
    async fn handle(&self, value: ThingValue) {
        let _ = self.sender.send(value);
    }
}

/// 创建通道处理器及其接收端。
pub fn channel_handler() -> (Arc<dyn ValueHandler>, mpsc::UnboundedReceiver<ThingValue>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(ChannelHandler { sender }), receiver)
}
