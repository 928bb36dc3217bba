//! Demo driver: connects to Deribit, authenticates, subscribes to one
//! channel and fetches a window of historical candles, logging everything
//! to the terminal. Not part of the core's required surface - a convenience
//! for manually exercising the crate against the real exchange.

use deribit_core::client::ClientFacade;
use deribit_core::config::Config;
use deribit_core::logging;
use deribit_core::transport::WsTransport;
use deribit_core::{fetch_n, Candle};
use slog::info;
use sloggers::types::Severity;
use std::env;
use std::thread;
use std::time::Duration;

fn main() {
    let log = logging::root_logger(Severity::Info);

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("configuration error: {}", e);
        std::process::exit(1);
    });

    let instrument = env::args().nth(1).unwrap_or_else(|| "BTC-PERPETUAL".to_string());

    info!(log, "connecting"; "host" => config.host(), "testnet" => config.testnet);

    let transport = WsTransport::new(config.ws_url(), log.new(slog::o!("component" => "transport")));
    let mut facade = ClientFacade::new(config, transport, log.new(slog::o!("component" => "facade")));

    if let Err(e) = facade.connect() {
        eprintln!("failed to connect: {}", e);
        std::process::exit(1);
    }

    facade.register_subscription(
        "deribit_price_index.btc_usd",
        Box::new({
            let log = log.clone();
            move |msg| info!(log, "price update"; "channel" => msg.channel, "data" => msg.data)
        }),
    );
    facade.subscribe("deribit_price_index.btc_usd");

    thread::sleep(Duration::from_secs(2));

    let candles: Vec<Candle> = fetch_n(&facade, &instrument, "60", 100);
    info!(log, "fetched historical candles"; "count" => candles.len());

    let stdout = std::io::stdout();
    let _ = deribit_core::candle::write_csv(stdout.lock(), &candles);

    facade.close();
}
