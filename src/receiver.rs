//! Receiver worker (component C4): drains inbound frames from the
//! transport into the inbound queue. The transport is shared with the
//! Sender behind one mutex, so this loop only ever holds that lock for the
//! duration of one bounded `read_text` call - see `transport::ReadOutcome`.

use crate::logging::Logger;
use crate::queue::SpscQueue;
use crate::transport::{ReadOutcome, Transport};
use slog::{o, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Owns the receive-side worker thread. `T` is the transport type so the
/// loop can be driven against either the production `WsTransport` or a
/// mock in tests.
pub struct Receiver<T: Transport + 'static> {
    transport: Arc<Mutex<T>>,
    inbound: Arc<SpscQueue<String>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    log: Logger,
}

impl<T: Transport + 'static> Receiver<T> {
    pub fn new(transport: Arc<Mutex<T>>, inbound: Arc<SpscQueue<String>>, log: Logger) -> Receiver<T> {
        Receiver { transport, inbound, running: Arc::new(AtomicBool::new(false)), handle: None, log }
    }

    /// Spawns the worker thread.
    pub fn start(&mut self) {
        self.running.store(true, Ordering::Release);

        let transport = self.transport.clone();
        let inbound = self.inbound.clone();
        let running = self.running.clone();
        let log = self.log.new(o!("component" => "receiver"));

        self.handle = Some(thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                // Transport::read_text is bounded - it never holds the shared
                // transport lock across an indefinite block, so a Pending
                // result here costs one short poll, not a stall.
                match transport.lock().unwrap().read_text() {
                    ReadOutcome::Frame(frame) => {
                        if !inbound.push(frame) {
                            warn!(log, "inbound queue full, dropping frame");
                        }
                    }
                    ReadOutcome::Pending => continue,
                    ReadOutcome::Closed => break,
                }
            }
        }));
    }

    /// Flips the running flag so the loop exits at the next iteration
    /// boundary. Does not unblock an in-flight `read_text` by itself.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Requests stop, closes the transport (which unblocks the pending
    /// read), and joins the worker thread.
    pub fn stop(&mut self) {
        self.request_stop();
        self.transport.lock().unwrap().close();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
