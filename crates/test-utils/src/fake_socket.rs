use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use devwatch::browser::connection::{SocketFrame, SocketTransport, TransportError, TransportFuture};

/// Shared view of a [`FakeSocket`] for assertions after it has been boxed.
#[derive(Default)]
pub struct FakeSocketState {
    pub sent: Vec<Vec<u8>>,
    pub incoming: VecDeque<Result<SocketFrame, String>>,
    pub fail_sends: bool,
    pub close_calls: usize,
}

/// A scripted socket transport that:
/// - records sent messages
/// - replays queued incoming frames, then reports a close
/// - optionally fails every send.
pub struct FakeSocket {
    state: Arc<Mutex<FakeSocketState>>,
}

impl FakeSocket {
    pub fn new() -> (Self, Arc<Mutex<FakeSocketState>>) {
        let state = Arc::new(Mutex::new(FakeSocketState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl SocketTransport for FakeSocket {
    fn send_text<'a>(&'a mut self, payload: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.fail_sends {
                return Err(TransportError::Protocol("broken pipe".to_string()));
            }
            state.sent.push(payload.to_vec());
            Ok(())
        })
    }

    fn receive(&mut self) -> TransportFuture<'_, SocketFrame> {
        Box::pin(async move {
            let next = self.state.lock().unwrap().incoming.pop_front();
            match next {
                Some(Ok(frame)) => Ok(frame),
                Some(Err(message)) => Err(TransportError::Protocol(message)),
                None => Ok(SocketFrame::Close),
            }
        })
    }

    fn close_output(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().unwrap().close_calls += 1;
            Ok(())
        })
    }
}
