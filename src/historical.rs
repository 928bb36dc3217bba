//! Historical fetcher (component C8): paginated retrieval of exactly `N`
//! candles for `(instrument, resolution)` over `public/get_tradingview_chart_data`.

use crate::candle::Candle;
use crate::client::ClientFacade;
use crate::transport::Transport;
use serde::Deserialize;
use slog::{debug, warn};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime};

/// Sentinel RPC id reserved for the historical fetcher. All batches of a
/// single `fetch_n` call reuse this id and are therefore strictly
/// serialized - the fetcher never has two batches in flight at once.
pub const HISTORICAL_RPC_ID: u64 = 0xC0FFEE;

const MAX_BATCH: usize = 1000;
const BATCH_TIMEOUT: Duration = Duration::from_secs(5);
const RATE_LIMIT_RETRY: Duration = Duration::from_millis(200);

/// Resolves a resolution string to the period, in milliseconds, it
/// represents. The literal `"1D"` is rewritten to 1440 minutes for this
/// calculation only - the string sent on the wire is always the original.
fn period_ms(resolution: &str) -> Option<i64> {
    let minutes: i64 = match resolution {
        "1" => 1,
        "5" => 5,
        "15" => 15,
        "60" => 60,
        "1D" => 1440,
        _ => return None,
    };
    Some(minutes * 60_000)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[derive(Deserialize)]
struct ChartResult {
    ticks: Vec<i64>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
    cost: Vec<f64>,
}

struct BatchState {
    candles: Vec<Candle>,
    done: bool,
}

/// Shared between the caller thread (waiting) and the dispatcher thread
/// (producing via the registered RPC continuations).
type SharedBatch = Arc<(Mutex<BatchState>, Condvar)>;

/// Fetches exactly `n` candles for `(instrument, resolution)`, blocking the
/// calling thread until done. Returns fewer than `n` only if the server ran
/// out of data or a batch timed out.
pub fn fetch_n<T: Transport + 'static>(
    facade: &ClientFacade<T>,
    instrument: &str,
    resolution: &str,
    n: usize,
) -> Vec<Candle> {
    let log = facade.log_handle();

    if n == 0 {
        return Vec::new();
    }

    let period = match period_ms(resolution) {
        Some(p) => p,
        None => {
            warn!(log, "unsupported resolution"; "resolution" => resolution);
            return Vec::new();
        }
    };

    let mut collected: Vec<Candle> = Vec::with_capacity(n);
    let mut current_end_ts = now_ms();

    while collected.len() < n {
        let batch = (n - collected.len()).min(MAX_BATCH);
        let current_start_ts = current_end_ts - (batch as i64 - 1) * period;

        let shared: SharedBatch = Arc::new((Mutex::new(BatchState { candles: Vec::new(), done: false }), Condvar::new()));

        register_batch_handlers(facade, shared.clone());

        let params = format!(
            r#"{{"instrument_name":"{}","resolution":"{}","start_timestamp":{},"end_timestamp":{}}}"#,
            instrument, resolution, current_start_ts, current_end_ts
        );

        loop {
            if facade.send_rpc(HISTORICAL_RPC_ID, "public/get_tradingview_chart_data", &params) {
                break;
            }
            std::thread::sleep(RATE_LIMIT_RETRY);
        }

        let (lock, condvar) = &*shared;
        let guard = lock.lock().unwrap();
        let (mut state, timeout_result) =
            condvar.wait_timeout_while(guard, BATCH_TIMEOUT, |s| !s.done).unwrap();

        if timeout_result.timed_out() {
            debug!(log, "historical batch timed out");
            break;
        }

        let before = collected.len();
        collected.append(&mut state.candles);

        if collected.len() == before {
            // Server returned nothing new for this window - no more data.
            break;
        }

        current_end_ts = current_start_ts - 1;
    }

    collected.sort_by_key(|c| c.ts_ms);

    if collected.len() > n {
        // Keep the most recent window; drop the oldest excess.
        let drop = collected.len() - n;
        collected.drain(0..drop);
    }

    collected
}

fn register_batch_handlers<T: Transport + 'static>(facade: &ClientFacade<T>, shared: SharedBatch) {
    let success_shared = shared.clone();
    let on_success: crate::dispatcher::SuccessHandler = Box::new(move |msg| {
        let (lock, condvar) = &*success_shared;
        let mut state = lock.lock().unwrap();

        if let Ok(chart) = serde_json::from_str::<ChartResult>(msg.result) {
            let len = chart.ticks.len();
            if chart.open.len() == len
                && chart.high.len() == len
                && chart.low.len() == len
                && chart.close.len() == len
                && chart.volume.len() == len
                && chart.cost.len() == len
            {
                for i in 0..len {
                    state.candles.push(Candle {
                        ts_ms: chart.ticks[i],
                        open: chart.open[i],
                        high: chart.high[i],
                        low: chart.low[i],
                        close: chart.close[i],
                        volume: chart.volume[i],
                        cost: chart.cost[i],
                    });
                }
            }
        }

        state.done = true;
        condvar.notify_one();
    });

    let on_error: crate::dispatcher::ErrorHandler = Box::new(move |_msg| {
        let (lock, condvar) = &*shared;
        let mut state = lock.lock().unwrap();
        state.done = true;
        condvar.notify_one();
    });

    facade.register_rpc(HISTORICAL_RPC_ID, Some(on_success), Some(on_error));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transport::mock::MockTransport;
    use std::thread;

    #[test]
    fn period_table_matches_spec() {
        assert_eq!(period_ms("1"), Some(60_000));
        assert_eq!(period_ms("5"), Some(300_000));
        assert_eq!(period_ms("15"), Some(900_000));
        assert_eq!(period_ms("60"), Some(3_600_000));
        assert_eq!(period_ms("1D"), Some(86_400_000));
        assert_eq!(period_ms("7"), None);
    }

    fn test_config() -> Config {
        Config { client_id: "id".into(), client_secret: "secret".into(), testnet: true }
    }

    #[test]
    fn fetch_n_zero_returns_empty_without_any_rpc() {
        let mock = MockTransport::new();
        let mut facade = ClientFacade::new(test_config(), mock.clone(), crate::logging::discard_logger());
        facade.connect().unwrap();

        let candles = fetch_n(&facade, "BTC-PERPETUAL", "60", 0);
        assert!(candles.is_empty());
        assert!(mock.sent_frames().is_empty());
        facade.close();
    }

    #[test]
    fn fetch_n_unsupported_resolution_returns_empty() {
        let mock = MockTransport::new();
        let mut facade = ClientFacade::new(test_config(), mock, crate::logging::discard_logger());
        facade.connect().unwrap();

        let candles = fetch_n(&facade, "BTC-PERPETUAL", "7", 10);
        assert!(candles.is_empty());
        facade.close();
    }

    #[test]
    fn fetch_n_single_batch_collects_and_sorts() {
        let mock = MockTransport::new();
        let mut facade = ClientFacade::new(test_config(), mock.clone(), crate::logging::discard_logger());
        facade.connect().unwrap();

        let responder = mock.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            responder.push_inbound(format!(
                r#"{{"jsonrpc":"2.0","id":{},"result":{{"ticks":[300,100,200],"open":[1.0,2.0,3.0],"high":[1.0,2.0,3.0],"low":[1.0,2.0,3.0],"close":[1.0,2.0,3.0],"volume":[1.0,2.0,3.0],"cost":[1.0,2.0,3.0]}}}}"#,
                HISTORICAL_RPC_ID
            ));
        });

        let candles = fetch_n(&facade, "BTC-PERPETUAL", "60", 3);
        assert_eq!(candles.len(), 3);
        assert!(candles.windows(2).all(|w| w[0].ts_ms < w[1].ts_ms));
        facade.close();
    }

    fn chart_response(base_ts: i64, len: usize) -> String {
        let ticks: Vec<String> = (0..len).map(|i| (base_ts - i as i64).to_string()).collect();
        let filler: Vec<String> = (0..len).map(|_| "1.0".to_string()).collect();
        format!(
            r#"{{"jsonrpc":"2.0","id":{},"result":{{"ticks":[{}],"open":[{f}],"high":[{f}],"low":[{f}],"close":[{f}],"volume":[{f}],"cost":[{f}]}}}}"#,
            HISTORICAL_RPC_ID,
            ticks.join(","),
            f = filler.join(",")
        )
    }

    /// Drives a multi-batch fetch: each RPC sent gets exactly one response,
    /// in order, avoiding any race between re-registration and delivery.
    #[test]
    fn fetch_n_paginates_across_multiple_batches() {
        let mock = MockTransport::new();
        let mut facade = ClientFacade::new(test_config(), mock.clone(), crate::logging::discard_logger());
        facade.connect().unwrap();

        let batch_sizes = [1000usize, 500];
        let responder = mock.clone();
        thread::spawn(move || {
            let mut seen = 0usize;
            let mut batch_no = 0usize;
            loop {
                let sent = responder.sent_frames().len();
                if sent > seen {
                    seen = sent;
                    let size = batch_sizes[batch_no];
                    let base = 2_000_000_000i64 - (batch_no as i64) * 10_000_000;
                    responder.push_inbound(chart_response(base, size));
                    batch_no += 1;
                    if batch_no >= batch_sizes.len() {
                        break;
                    }
                }
                thread::sleep(Duration::from_millis(5));
            }
        });

        let candles = fetch_n(&facade, "BTC-PERPETUAL", "60", 1500);
        assert_eq!(candles.len(), 1500);
        assert!(candles.windows(2).all(|w| w[0].ts_ms < w[1].ts_ms));
        assert!(mock.sent_frames().len() >= 2);
        facade.close();
    }
}
