//! Frame parsing and O(1) routing to per-request or per-channel handlers
//! (component C6).
//!
//! Dispatch tables are fixed power-of-two arrays of `Option<Handler>`
//! indexed by `id & mask` (RPC) or `fnv1a_32(channel) & mask`
//! (subscriptions). Registration overwrites whatever was in the slot; a
//! collision is a silent overwrite, not an error - callers are responsible
//! for choosing IDs and channel names that don't alias while in flight.

use crate::logging::Logger;
use serde::Deserialize;
use serde_json::value::RawValue;
use slog::debug;

pub const MAX_INFLIGHT: usize = 4096;
pub const SUB_TABLE: usize = 4096;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a, used to index the subscription table by channel name.
pub fn fnv1a_32(data: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in data.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// The classification of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    RpcOk,
    RpcError,
    Subscription,
    Ignored,
}

/// Zero-copy view over a single inbound frame, valid only for the duration
/// of the handler call that receives it. Everything but `access_token`
/// borrows directly from the frame buffer owned by the dispatcher loop.
#[derive(Debug)]
pub struct ParsedMessage<'a> {
    pub classification: Classification,
    pub id: u64,
    pub error_code: i64,
    pub error_msg: &'a str,
    pub channel: &'a str,
    pub data: &'a str,
    pub result: &'a str,
    pub access_token: String,
    pub us_in: Option<u64>,
    pub us_out: Option<u64>,
    pub us_diff: Option<u64>,
}

impl<'a> ParsedMessage<'a> {
    fn empty(classification: Classification) -> ParsedMessage<'static> {
        ParsedMessage {
            classification,
            id: 0,
            error_code: 0,
            error_msg: "",
            channel: "",
            data: "",
            result: "",
            access_token: String::new(),
            us_in: None,
            us_out: None,
            us_diff: None,
        }
    }

    #[inline]
    pub fn is_rpc(&self) -> bool {
        matches!(self.classification, Classification::RpcOk | Classification::RpcError)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.classification == Classification::RpcError
    }
}

pub type SuccessHandler = Box<dyn FnMut(&ParsedMessage) + Send>;
pub type ErrorHandler = Box<dyn FnMut(&ParsedMessage) + Send>;
pub type SubscriptionHandler = Box<dyn FnMut(&ParsedMessage) + Send>;

/// A single RPC correlation slot. Active iff either continuation is set.
#[derive(Default)]
pub struct RpcSlot {
    on_success: Option<SuccessHandler>,
    on_error: Option<ErrorHandler>,
}

impl RpcSlot {
    fn is_active(&self) -> bool {
        self.on_success.is_some() || self.on_error.is_some()
    }
}

#[derive(Deserialize)]
struct WireError<'a> {
    code: i64,
    #[serde(borrow)]
    message: &'a str,
}

#[derive(Deserialize)]
struct WireParams<'a> {
    channel: Option<&'a str>,
    #[serde(borrow)]
    data: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    id: Option<u64>,
    method: Option<&'a str>,
    #[serde(borrow)]
    error: Option<WireError<'a>>,
    #[serde(borrow)]
    result: Option<&'a RawValue>,
    #[serde(borrow)]
    params: Option<WireParams<'a>>,
    #[serde(rename = "usIn")]
    us_in: Option<u64>,
    #[serde(rename = "usOut")]
    us_out: Option<u64>,
    #[serde(rename = "usDiff")]
    us_diff: Option<u64>,
}

#[derive(Deserialize)]
struct ResultAccessToken<'a> {
    #[serde(borrow, default)]
    access_token: Option<&'a str>,
}

/// Parses frames and routes them to the handler registered for their `id`
/// or `channel`. A single dispatcher instance is driven by a single
/// dispatcher thread; handlers execute synchronously on that thread.
pub struct Dispatcher {
    rpc_table: Vec<RpcSlot>,
    sub_table: Vec<Option<SubscriptionHandler>>,
    log: Logger,
}

impl Dispatcher {
    pub fn new(log: Logger) -> Dispatcher {
        let mut rpc_table = Vec::with_capacity(MAX_INFLIGHT);
        rpc_table.resize_with(MAX_INFLIGHT, RpcSlot::default);

        let mut sub_table = Vec::with_capacity(SUB_TABLE);
        sub_table.resize_with(SUB_TABLE, || None);

        Dispatcher { rpc_table, sub_table, log }
    }

    /// Registers continuations for `id`, overwriting whatever was there.
    pub fn register_rpc(
        &mut self,
        id: u64,
        on_success: Option<SuccessHandler>,
        on_error: Option<ErrorHandler>,
    ) {
        let slot = &mut self.rpc_table[(id as usize) & (MAX_INFLIGHT - 1)];
        slot.on_success = on_success;
        slot.on_error = on_error;
    }

    /// Registers a notification handler for `channel`, overwriting whatever
    /// was there (including handlers for a different channel that happens
    /// to hash to the same slot).
    pub fn register_subscription(&mut self, channel: &str, handler: SubscriptionHandler) {
        let idx = (fnv1a_32(channel) as usize) & (SUB_TABLE - 1);
        self.sub_table[idx] = Some(handler);
    }

    /// Parses one frame and invokes at most one registered handler.
    pub fn dispatch(&mut self, frame: &str) {
        let envelope: Envelope = match serde_json::from_str(frame) {
            Ok(e) => e,
            Err(e) => {
                debug!(self.log, "discarding unparseable frame"; "error" => %e);
                return;
            }
        };

        if let Some(id) = envelope.id {
            self.dispatch_rpc(id, envelope);
        } else if envelope.method == Some("subscription") {
            self.dispatch_subscription(envelope);
        }
        // Anything else (no id, method != "subscription") is ignored.
    }

    fn dispatch_rpc(&mut self, id: u64, envelope: Envelope) {
        let slot = &mut self.rpc_table[(id as usize) & (MAX_INFLIGHT - 1)];
        if !slot.is_active() {
            return;
        }

        if let Some(err) = envelope.error {
            let msg = ParsedMessage {
                classification: Classification::RpcError,
                id,
                error_code: err.code,
                error_msg: err.message,
                channel: "",
                data: "",
                result: "",
                access_token: String::new(),
                us_in: envelope.us_in,
                us_out: envelope.us_out,
                us_diff: envelope.us_diff,
            };
            if let Some(handler) = slot.on_error.as_mut() {
                handler(&msg);
            }
            return;
        }

        // Neither `error` nor `result`: nothing to deliver. Timing fields are
        // already consumed by virtue of having parsed the envelope.
        if envelope.result.is_none() {
            return;
        }

        let result_text = envelope.result.map(RawValue::get).unwrap_or("");
        let access_token = envelope
            .result
            .and_then(|r| serde_json::from_str::<ResultAccessToken>(r.get()).ok())
            .and_then(|r| r.access_token)
            .map(|s| s.to_owned())
            .unwrap_or_default();

        let msg = ParsedMessage {
            classification: Classification::RpcOk,
            id,
            error_code: 0,
            error_msg: "",
            channel: "",
            data: "",
            result: result_text,
            access_token,
            us_in: envelope.us_in,
            us_out: envelope.us_out,
            us_diff: envelope.us_diff,
        };

        if let Some(handler) = slot.on_success.as_mut() {
            handler(&msg);
        }
    }

    fn dispatch_subscription(&mut self, envelope: Envelope) {
        let params = match envelope.params {
            Some(p) => p,
            None => return,
        };
        let channel = match params.channel {
            Some(c) => c,
            None => return,
        };
        let data = match params.data {
            Some(d) => d,
            None => return,
        };

        let idx = (fnv1a_32(channel) as usize) & (SUB_TABLE - 1);
        if let Some(handler) = self.sub_table[idx].as_mut() {
            let msg = ParsedMessage {
                classification: Classification::Subscription,
                id: 0,
                error_code: 0,
                error_msg: "",
                channel,
                data: data.get(),
                result: "",
                access_token: String::new(),
                us_in: envelope.us_in,
                us_out: envelope.us_out,
                us_diff: envelope.us_diff,
            };
            handler(&msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn fnv1a_matches_reference_vector() {
        // FNV-1a of the empty string is the offset basis itself.
        assert_eq!(fnv1a_32(""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn rpc_success_routes_once() {
        let mut dispatcher = Dispatcher::new(crate::logging::discard_logger());
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();

        dispatcher.register_rpc(
            1,
            Some(Box::new(move |msg| {
                assert!(msg.is_rpc());
                assert!(!msg.is_error());
                fired2.store(true, Ordering::SeqCst);
            })),
            None,
        );

        dispatcher.dispatch(r#"{"jsonrpc":"2.0","id":1,"result":{"foo":"bar"}}"#);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn rpc_error_routes_to_error_handler() {
        let mut dispatcher = Dispatcher::new(crate::logging::discard_logger());
        let code = Arc::new(AtomicU64::new(0));
        let code2 = code.clone();

        dispatcher.register_rpc(
            2,
            None,
            Some(Box::new(move |msg| {
                assert!(msg.is_error());
                code2.store(msg.error_code as u64, Ordering::SeqCst);
            })),
        );

        dispatcher.dispatch(r#"{"jsonrpc":"2.0","id":2,"error":{"code":10009,"message":"not_enough_funds"}}"#);
        assert_eq!(code.load(Ordering::SeqCst), 10009);
    }

    #[test]
    fn unregistered_id_is_silently_ignored() {
        let mut dispatcher = Dispatcher::new(crate::logging::discard_logger());
        // No panic, no handler fired - nothing to assert beyond "it returns".
        dispatcher.dispatch(r#"{"jsonrpc":"2.0","id":999,"result":{}}"#);
    }

    #[test]
    fn response_with_neither_result_nor_error_does_not_fire_on_success() {
        let mut dispatcher = Dispatcher::new(crate::logging::discard_logger());
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();

        dispatcher.register_rpc(3, Some(Box::new(move |_| fired2.store(true, Ordering::SeqCst))), None);
        dispatcher.dispatch(r#"{"jsonrpc":"2.0","id":3,"usIn":1,"usOut":2,"usDiff":1}"#);

        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn subscription_routes_by_channel() {
        let mut dispatcher = Dispatcher::new(crate::logging::discard_logger());
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();

        dispatcher.register_subscription(
            "deribit_price_index.btc_usd",
            Box::new(move |msg| {
                assert_eq!(msg.channel, "deribit_price_index.btc_usd");
                assert!(!msg.data.is_empty());
                seen2.store(true, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(
            r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"deribit_price_index.btc_usd","data":{"price":50000.0}}}"#,
        );
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn malformed_json_is_discarded_without_panic() {
        let mut dispatcher = Dispatcher::new(crate::logging::discard_logger());
        dispatcher.dispatch("not json at all {{{");
    }

    #[test]
    fn reregistering_replaces_old_handler() {
        let mut dispatcher = Dispatcher::new(crate::logging::discard_logger());
        let first_fired = Arc::new(AtomicBool::new(false));
        let second_fired = Arc::new(AtomicBool::new(false));

        let f1 = first_fired.clone();
        dispatcher.register_rpc(7, Some(Box::new(move |_| f1.store(true, Ordering::SeqCst))), None);

        let f2 = second_fired.clone();
        dispatcher.register_rpc(7, Some(Box::new(move |_| f2.store(true, Ordering::SeqCst))), None);

        dispatcher.dispatch(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#);

        assert!(!first_fired.load(Ordering::SeqCst));
        assert!(second_fired.load(Ordering::SeqCst));
    }

    #[test]
    fn access_token_extracted_from_result() {
        let mut dispatcher = Dispatcher::new(crate::logging::discard_logger());
        let token = Arc::new(Mutex::new(String::new()));
        let token2 = token.clone();

        dispatcher.register_rpc(
            9001,
            Some(Box::new(move |msg| {
                *token2.lock().unwrap() = msg.access_token.clone();
            })),
            None,
        );

        dispatcher.dispatch(r#"{"jsonrpc":"2.0","id":9001,"result":{"access_token":"tok-xyz"}}"#);
        assert_eq!(*token.lock().unwrap(), "tok-xyz");
    }
}
