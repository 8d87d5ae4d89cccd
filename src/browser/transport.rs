// src/browser/transport.rs

//! [`SocketTransport`] over a `tokio-tungstenite` stream.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::browser::connection::{SocketFrame, SocketTransport, TransportError, TransportFuture};

pub struct WebSocketTransport<S> {
    stream: WebSocketStream<S>,
}

impl<S> WebSocketTransport<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

impl<S> SocketTransport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send_text<'a>(&'a mut self, payload: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let text = String::from_utf8_lossy(payload).into_owned();
            self.stream.send(Message::Text(text)).await?;
            Ok(())
        })
    }

    fn receive(&mut self) -> TransportFuture<'_, SocketFrame> {
        Box::pin(async move {
            loop {
                let message = match self.stream.next().await {
                    None => return Ok(SocketFrame::Close),
                    Some(message) => message?,
                };
                let frame = match message {
                    Message::Text(text) => SocketFrame::Data {
                        bytes: text.into_bytes(),
                        end_of_message: true,
                    },
                    Message::Binary(bytes) => SocketFrame::Data {
                        bytes,
                        end_of_message: true,
                    },
                    Message::Frame(frame) => SocketFrame::Data {
                        end_of_message: frame.header().is_final,
                        bytes: frame.into_data(),
                    },
                    Message::Close(_) => SocketFrame::Close,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                return Ok(frame);
            }
        })
    }

    fn close_output(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            match self.stream.close(None).await {
                Ok(()) => Ok(()),
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}
