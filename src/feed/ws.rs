use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::error::FeedError;
use crate::feed::{FeedConnection, FeedConnector};

/// WebSocket connector rooted at the market-data server's `ws://` base URL.
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

impl FeedConnector for WsConnector {
    fn connect(
        &self,
        path: &str,
    ) -> BoxFuture<'_, Result<Box<dyn FeedConnection>, Report<FeedError>>> {
        let url = format!("{}{}", self.base_url, path);
        Box::pin(async move {
            let (stream, _) =
                connect_async(&url)
                    .await
                    .change_context(FeedError::Connection {
                        endpoint: url.clone(),
                    })?;

            info!(url = %url, "feed socket connected");

            Ok(Box::new(WsConnection {
                stream,
                endpoint: url,
            }) as Box<dyn FeedConnection>)
        })
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    endpoint: String,
}

impl FeedConnection for WsConnection {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), Report<FeedError>>> {
        Box::pin(async move {
            self.stream
                .send(Message::text(text))
                .await
                .change_context(FeedError::Send {
                    endpoint: self.endpoint.clone(),
                })
        })
    }

    fn next_text(&mut self) -> BoxFuture<'_, Option<Result<String, Report<FeedError>>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await? {
                    Err(e) => {
                        return Some(Err(Report::new(e).change_context(FeedError::Connection {
                            endpoint: self.endpoint.clone(),
                        })));
                    }
                    Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Ping(data)) => {
                        let _ = self.stream.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(endpoint = %self.endpoint, ?frame, "close frame received");
                        return None;
                    }
                    Ok(_) => {}
                }
            }
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        let WsConnection {
            mut stream,
            endpoint,
        } = *self;
        Box::pin(async move {
            let _ = stream.close(None).await;
            debug!(endpoint = %endpoint, "feed socket closed");
        })
    }
}
