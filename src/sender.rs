//! Sender worker (component C5): drains the outbound queue, applies a rate
//! gate and private-method token injection, and writes to the transport.

use crate::logging::Logger;
use crate::queue::SpscQueue;
use crate::ratelimit::TokenBucket;
use crate::transport::Transport;
use slog::{o, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Narrow capability the Sender needs from the facade: the current access
/// token, without naming the facade type (breaks the circular dependency
/// between the two).
pub trait AccessTokenProvider: Send + Sync {
    fn current_token(&self) -> String;
}

/// An `AccessTokenProvider` backed by a plain mutex. Read-mostly: the
/// dispatcher thread is the sole writer (on successful `public/auth`), the
/// Sender is the (much more frequent) reader.
pub struct SharedAccessToken(Arc<Mutex<String>>);

impl SharedAccessToken {
    pub fn new() -> SharedAccessToken {
        SharedAccessToken(Arc::new(Mutex::new(String::new())))
    }

    pub fn set(&self, token: String) {
        *self.0.lock().unwrap() = token;
    }

    pub fn handle(&self) -> Arc<Mutex<String>> {
        self.0.clone()
    }
}

impl AccessTokenProvider for SharedAccessToken {
    fn current_token(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}

/// A queued outbound frame. `is_private` is decided by the caller that
/// built the frame (whether the RPC method starts with `private/`).
pub struct OutboundFrame {
    pub text: String,
    pub is_private: bool,
}

pub struct Sender<T: Transport + 'static> {
    transport: Arc<Mutex<T>>,
    outbound: Arc<SpscQueue<OutboundFrame>>,
    token_provider: Arc<dyn AccessTokenProvider>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    log: Logger,
}

impl<T: Transport + 'static> Sender<T> {
    pub fn new(
        transport: Arc<Mutex<T>>,
        outbound: Arc<SpscQueue<OutboundFrame>>,
        token_provider: Arc<dyn AccessTokenProvider>,
        log: Logger,
    ) -> Sender<T> {
        Sender { transport, outbound, token_provider, running: Arc::new(AtomicBool::new(false)), handle: None, log }
    }

    pub fn start(&mut self) {
        self.running.store(true, Ordering::Release);

        let transport = self.transport.clone();
        let outbound = self.outbound.clone();
        let token_provider = self.token_provider.clone();
        let running = self.running.clone();
        let log = self.log.new(o!("component" => "sender"));

        self.handle = Some(thread::spawn(move || {
            let mut bucket = TokenBucket::new();

            while running.load(Ordering::Acquire) {
                if !bucket.try_admit() {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }

                let frame = match outbound.pop() {
                    Some(f) => f,
                    None => {
                        thread::yield_now();
                        continue;
                    }
                };

                let text = if frame.is_private {
                    let token = token_provider.current_token();
                    if token.is_empty() {
                        warn!(log, "sending private method without an access token");
                        frame.text
                    } else {
                        splice_access_token(&frame.text, &token)
                    }
                } else {
                    frame.text
                };

                transport.lock().unwrap().send_text(&text);
            }
        }));
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Splices `"access_token":"<token>"` into the `params` object itself, not
/// merely before the frame's own terminating brace - the frame always ends
/// `...,"params":{...}}`, so the params object's closing brace is the
/// second-to-last `}` in the frame.
fn splice_access_token(frame: &str, token: &str) -> String {
    let outer_idx = match frame.rfind('}') {
        Some(idx) => idx,
        None => return frame.to_owned(),
    };
    let params_idx = match frame[..outer_idx].rfind('}') {
        Some(idx) => idx,
        None => return frame.to_owned(),
    };

    let prefix = &frame[..params_idx];
    let empty_params = prefix.ends_with('{');

    let mut spliced = String::with_capacity(frame.len() + token.len() + 19);
    spliced.push_str(prefix);
    if !empty_params {
        spliced.push(',');
    }
    spliced.push_str("\"access_token\":\"");
    spliced.push_str(token);
    spliced.push('"');
    spliced.push_str(&frame[params_idx..]);
    spliced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::time::Duration as StdDuration;

    #[test]
    fn splice_inserts_inside_params_object() {
        let out = splice_access_token(r#"{"jsonrpc":"2.0","id":1,"method":"private/buy","params":{"amount":1}}"#, "tok-xyz");

        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["params"]["access_token"], "tok-xyz");
        assert_eq!(value["params"]["amount"], 1);
        assert!(value.get("access_token").is_none());
    }

    #[test]
    fn splice_handles_empty_params_object() {
        let out = splice_access_token(r#"{"jsonrpc":"2.0","id":1,"method":"private/ping","params":{}}"#, "tok-xyz");

        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["params"]["access_token"], "tok-xyz");
    }

    #[test]
    fn private_method_gets_token_on_wire() {
        let mock = MockTransport::new();
        let transport = Arc::new(Mutex::new(mock.clone()));
        let outbound = Arc::new(SpscQueue::new(64));
        let token = SharedAccessToken::new();
        token.set("tok-xyz".into());

        let mut sender = Sender::new(transport, outbound.clone(), Arc::new(token), crate::logging::discard_logger());
        sender.start();

        outbound.push(OutboundFrame {
            text: r#"{"jsonrpc":"2.0","id":5,"method":"private/buy","params":{}}"#.to_string(),
            is_private: true,
        });

        thread::sleep(StdDuration::from_millis(100));
        sender.stop();

        let sent = mock.sent_frames();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(r#""access_token":"tok-xyz""#));
    }

    #[test]
    fn public_method_unaffected() {
        let mock = MockTransport::new();
        let transport = Arc::new(Mutex::new(mock.clone()));
        let outbound = Arc::new(SpscQueue::new(64));
        let token = SharedAccessToken::new();

        let mut sender = Sender::new(transport, outbound.clone(), Arc::new(token), crate::logging::discard_logger());
        sender.start();

        outbound.push(OutboundFrame {
            text: r#"{"jsonrpc":"2.0","id":5,"method":"public/ping","params":{}}"#.to_string(),
            is_private: false,
        });

        thread::sleep(StdDuration::from_millis(100));
        sender.stop();

        let sent = mock.sent_frames();
        assert_eq!(sent, vec![r#"{"jsonrpc":"2.0","id":5,"method":"public/ping","params":{}}"#.to_string()]);
    }
}
