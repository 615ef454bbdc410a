//! Example: callback-style EventSource with automatic reconnect
//!
//! Connects to an SSE endpoint and prints every message, connect, disconnect
//! and scheduled reconnect. Closes after 10 messages.
//!
//! Run with: cargo run --example counter -- http://127.0.0.1:3000/counter
//! Set RUST_LOG=sse_eventsource=debug to see the client's internal logs.

use sse_eventsource::{EventSource, EventSourceOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

const MAX_MESSAGES: usize = 10;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:3000/counter".to_string());

    let received = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(Notify::new());
    let (count, notify) = (received.clone(), done.clone());

    let options = EventSourceOptions::new(url)
        .on_message(move |msg| {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            println!("#{n} [{}] id={:?}: {}", msg.event.as_deref().unwrap_or("message"), msg.id, msg.data);
            if n >= MAX_MESSAGES {
                notify.notify_one();
            }
        })
        .on_connect(|es| println!("Connected to {}", es.url()))
        .on_disconnect(|es| println!("Disconnected (last event id: {:?})", es.last_event_id()))
        .on_schedule_reconnect(|_, info| println!("Reconnecting in {:?}", info.delay));

    let es = match EventSource::with_options(options) {
        Ok(es) => es,
        Err(e) => {
            eprintln!("Failed to create EventSource: {e}");
            return;
        }
    };

    tokio::select! {
        _ = done.notified() => println!("\nReceived {MAX_MESSAGES} messages, closing"),
        _ = tokio::signal::ctrl_c() => println!("\nInterrupted, closing"),
    }

    es.close();
    println!("Final state: {}", es.ready_state());
}
