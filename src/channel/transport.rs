use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ChannelError;

/// テキストメッセージの送信側
pub type MessageSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// テキストメッセージの受信側。None で切断
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// 接続を1本張る。タイムアウトとリトライは呼び出し側 (EnhancementChannel) が持つ
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(MessageSink, MessageStream), ChannelError>>;
}

/// tokio-tungstenite による WebSocket 接続
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(MessageSink, MessageStream), ChannelError>> {
        Box::pin(async move {
            let (ws, _response) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| ChannelError::Connect(format!("{}: {}", url, e)))?;
            let (sink, stream) = ws.split();

            let sink = sink.with(|text: String| future::ready(Ok::<_, ChannelError>(Message::Text(text))));
            let stream = stream.filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                    Ok(Message::Close(_)) => Some(Err(ChannelError::Closed)),
                    // ping/pong は tungstenite が応答する
                    Ok(_) => None,
                    Err(e) => Some(Err(ChannelError::from(e))),
                }
            });

            Ok((Box::pin(sink) as MessageSink, Box::pin(stream) as MessageStream))
        })
    }
}
