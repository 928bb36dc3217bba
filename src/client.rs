//! Client facade (component C7): wires the queues, workers and dispatcher
//! together and owns credentials, the access token, and the lifecycle of
//! every background thread.

use crate::config::Config;
use crate::dispatcher::{Dispatcher, ErrorHandler, SuccessHandler};
use crate::logging::Logger;
use crate::queue::SpscQueue;
use crate::ratelimit::TokenBucket;
use crate::receiver::Receiver;
use crate::sender::{AccessTokenProvider, OutboundFrame, Sender, SharedAccessToken};
use crate::transport::Transport;
use slog::{info, o, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const INBOUND_CAPACITY: usize = 4096;
const OUTBOUND_CAPACITY: usize = 1024;

pub const AUTH_RPC_ID: u64 = 9001;
pub const SUBSCRIBE_RPC_ID: u64 = 1001;

/// Wires C1-C6 together, owns credentials and the access token, and runs
/// the dispatcher loop.
pub struct ClientFacade<T: Transport + 'static> {
    config: Config,
    transport: Arc<Mutex<T>>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    inbound: Arc<SpscQueue<String>>,
    outbound: Arc<SpscQueue<OutboundFrame>>,
    receiver: Receiver<T>,
    sender: Sender<T>,
    precheck_bucket: Mutex<TokenBucket>,
    access_token: SharedAccessToken,
    connected: Arc<AtomicBool>,
    dispatcher_thread: Option<JoinHandle<()>>,
    log: Logger,
}

impl<T: Transport + 'static> ClientFacade<T> {
    pub fn new(config: Config, transport: T, log: Logger) -> ClientFacade<T> {
        let transport = Arc::new(Mutex::new(transport));
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new(log.new(o!("component" => "dispatcher")))));
        let inbound = Arc::new(SpscQueue::new(INBOUND_CAPACITY));
        let outbound = Arc::new(SpscQueue::new(OUTBOUND_CAPACITY));
        let access_token = SharedAccessToken::new();

        let receiver = Receiver::new(transport.clone(), inbound.clone(), log.new(o!()));
        let sender = Sender::new(
            transport.clone(),
            outbound.clone(),
            Arc::new(AccessTokenHandle(access_token.handle())) as Arc<dyn AccessTokenProvider>,
            log.new(o!()),
        );

        ClientFacade {
            config,
            transport,
            dispatcher,
            inbound,
            outbound,
            receiver,
            sender,
            precheck_bucket: Mutex::new(TokenBucket::new()),
            access_token,
            connected: Arc::new(AtomicBool::new(false)),
            dispatcher_thread: None,
            log,
        }
    }

    /// The access token captured from the last successful `public/auth`
    /// response. Empty until then.
    pub fn access_token(&self) -> String {
        self.access_token.handle().lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// A cloned handle to the facade's logger, for protocols built on top of
    /// the facade (the historical fetcher) that want consistent log context.
    pub fn log_handle(&self) -> Logger {
        self.log.new(o!())
    }

    /// Connects the transport, starts the worker threads and the dispatcher
    /// loop, then kicks off authentication.
    pub fn connect(&mut self) -> Result<(), crate::error::TransportError> {
        self.transport.lock().unwrap().connect()?;
        self.connected.store(true, Ordering::Release);

        self.receiver.start();
        self.sender.start();
        self.spawn_dispatcher_loop();
        self.authenticate();

        Ok(())
    }

    fn spawn_dispatcher_loop(&mut self) {
        let inbound = self.inbound.clone();
        let dispatcher = self.dispatcher.clone();
        let connected = self.connected.clone();
        let log = self.log.new(o!("component" => "dispatcher-loop"));

        self.dispatcher_thread = Some(thread::spawn(move || {
            loop {
                let frame = inbound.wait_and_pop();

                if frame.is_empty() || !connected.load(Ordering::Acquire) {
                    break;
                }

                dispatcher.lock().unwrap().dispatch(&frame);
            }

            info!(log, "dispatcher loop exiting");
        }));
    }

    /// Registers an RPC correlation slot at a reserved auth ID and sends
    /// `public/auth`. The success handler copies `result.access_token` into
    /// the facade.
    pub fn authenticate(&mut self) {
        let token_handle = self.access_token.handle();

        let on_success: SuccessHandler = Box::new(move |msg| {
            if !msg.access_token.is_empty() {
                *token_handle.lock().unwrap() = msg.access_token.clone();
            }
        });

        let log_err = self.log.new(o!());
        let on_error: ErrorHandler = Box::new(move |msg| {
            warn!(log_err, "authentication failed"; "code" => msg.error_code, "message" => msg.error_msg);
        });

        self.dispatcher.lock().unwrap().register_rpc(AUTH_RPC_ID, Some(on_success), Some(on_error));

        let params = format!(
            r#"{{"grant_type":"client_credentials","client_id":"{}","client_secret":"{}"}}"#,
            self.config.client_id, self.config.client_secret
        );
        let frame = format!(
            r#"{{"jsonrpc":"2.0","id":{},"method":"public/auth","params":{}}}"#,
            AUTH_RPC_ID, params
        );

        self.enqueue_outbound(frame, false);
    }

    /// Registers continuations for an arbitrary RPC id (for callers that
    /// want more than the fixed auth/subscribe/historical sentinels).
    pub fn register_rpc(&self, id: u64, on_success: Option<SuccessHandler>, on_error: Option<ErrorHandler>) {
        self.dispatcher.lock().unwrap().register_rpc(id, on_success, on_error);
    }

    pub fn register_subscription(&self, channel: &str, handler: crate::dispatcher::SubscriptionHandler) {
        self.dispatcher.lock().unwrap().register_subscription(channel, handler);
    }

    /// Rate-gated; formats and enqueues a `public/subscribe`. Failure is
    /// logged and the subscription silently dropped - callers get no
    /// feedback, matching the source behavior this was specified from.
    pub fn subscribe(&self, channel: &str) {
        if !self.precheck_bucket.lock().unwrap().try_admit() {
            warn!(self.log, "subscribe denied by rate limit"; "channel" => channel);
            return;
        }

        let frame = format!(
            r#"{{"jsonrpc":"2.0","id":{},"method":"public/subscribe","params":{{"channels":["{}"]}}}}"#,
            SUBSCRIBE_RPC_ID, channel
        );
        self.enqueue_outbound(frame, false);
    }

    /// Rate-gated; formats and enqueues the frame. Returns `false` without
    /// sending anything if the rate gate denies.
    pub fn send_rpc(&self, id: u64, method: &str, params_json: &str) -> bool {
        if !self.precheck_bucket.lock().unwrap().try_admit() {
            return false;
        }

        let frame = format!(r#"{{"jsonrpc":"2.0","id":{},"method":"{}","params":{}}}"#, id, method, params_json);
        self.enqueue_outbound(frame, method.starts_with("private/"));
        true
    }

    fn enqueue_outbound(&self, text: String, is_private: bool) {
        if !self.outbound.push(OutboundFrame { text, is_private }) {
            warn!(self.log, "outbound queue full, dropping submission");
        }
    }

    /// Exposes the dispatcher handle, needed by higher-level protocols
    /// (the historical fetcher) that register their own sentinel RPC slot
    /// and send frames directly.
    pub fn dispatcher(&self) -> Arc<Mutex<Dispatcher>> {
        self.dispatcher.clone()
    }

    /// Idempotent. Unwinds connect() in reverse: stop producing, wake the
    /// dispatcher, stop the workers, join everything.
    pub fn close(&mut self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        // Unblock the dispatcher loop's wait_and_pop with the empty sentinel.
        let _ = self.inbound.push(String::new());

        self.receiver.request_stop();
        thread::sleep(Duration::from_secs(1));

        self.sender.stop();
        self.receiver.stop();

        if let Some(handle) = self.dispatcher_thread.take() {
            let _ = handle.join();
        }
    }
}

impl<T: Transport + 'static> Drop for ClientFacade<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Adapts the facade's shared access-token mutex to the narrow
/// `AccessTokenProvider` capability the Sender depends on.
struct AccessTokenHandle(Arc<Mutex<String>>);

impl AccessTokenProvider for AccessTokenHandle {
    fn current_token(&self) -> String {
        self.0.lock().unwrap().clone()
    }
}
