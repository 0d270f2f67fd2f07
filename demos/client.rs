/// Example WebSocket client that subscribes to Bybit's public trade stream
use std::time::Duration;

use http::{HeaderMap, HeaderValue};
use tickws::{CloseCode, Event, Options, WebSocket};

#[tokio::main]
async fn main() {
    // Initialize logging
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let ws = WebSocket::builder()
        .with_options(Options::default().with_keepalive_interval(Duration::from_secs(20)))
        .build(tx);

    let mut headers = HeaderMap::new();
    headers.insert("origin", HeaderValue::from_static("https://www.bybit.com"));
    ws.open("wss://stream.bybit.com/v5/public/linear", headers)
        .expect("open");

    // JSON-formatted subscription request
    let text = r#"{
        "req_id": "1",
        "op": "subscribe",
        "args": [
            "publicTrade.BTCUSDT"
        ]
    }"#;

    let mut received = 0;
    while let Some(event) = rx.recv().await {
        match event {
            Event::StateChange(state) => log::debug!("state: {state}"),
            Event::Open => {
                ws.send_text(text);
            }
            Event::Message(text) => {
                log::info!("{text}");
                received += 1;
                if received == 20 {
                    ws.close();
                }
            }
            Event::Binary(data) => log::info!("{} binary bytes", data.len()),
            Event::Error(err) => log::error!("{err}"),
            Event::Close {
                was_clean,
                code,
                reason,
            } => {
                log::info!("closed: clean={was_clean} code={code} reason={reason:?}");
                if code != CloseCode::Normal {
                    std::process::exit(1);
                }
                break;
            }
        }
    }
}
