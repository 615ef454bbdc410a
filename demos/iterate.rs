//! Example: consuming an EventSource as an async stream
//!
//! Two independent consumers iterate over the same connection. The first one
//! closes the client when it sees an event named "done" (or after 20
//! messages), which ends the second consumer as well.
//!
//! Run with: cargo run --example iterate -- http://127.0.0.1:3000/

use futures_util::StreamExt;
use sse_eventsource::EventSource;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:3000/".to_string());

    let es = match EventSource::new(url) {
        Ok(es) => es,
        Err(e) => {
            eprintln!("Failed to create EventSource: {e}");
            return;
        }
    };

    let mut logger = es.messages();
    let log_task = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(msg) = logger.next().await {
            seen += 1;
            tracing::info!(id = ?msg.id, event = ?msg.event, "logger saw message");
        }
        seen
    });

    let mut messages = es.messages();
    let mut count = 0;
    while let Some(msg) = messages.next().await {
        count += 1;
        println!(
            "{count}: [{}] id={:?} {}",
            msg.event.as_deref().unwrap_or("message"),
            msg.id,
            msg.data
        );
        if msg.event.as_deref() == Some("done") || count >= 20 {
            es.close();
        }
    }

    match log_task.await {
        Ok(seen) => println!("Main consumer: {count} messages, logger: {seen} messages"),
        Err(e) => eprintln!("Logger task failed: {e}"),
    }
}
