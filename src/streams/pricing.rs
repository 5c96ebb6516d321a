//! Pricing-stream producer
//!
//! Reads the broker's line-delimited pricing stream and pushes every PRICE
//! message into the shared queue as a tick. Heartbeats are dropped. When the
//! stream ends or fails, a disconnect entry is pushed for every instrument so
//! the consumer stops cleanly.

use chrono::Utc;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::{Disconnect, QueueEntry, SharedQueue};
use crate::broker::models::StreamMessage;
use crate::broker::OandaClient;

/// Forward stream chunks line by line into `queue`; returns why the stream stopped
pub async fn pump_price_lines<S, T, E>(stream: S, queue: &SharedQueue) -> String
where
    S: Stream<Item = Result<T, E>>,
    T: AsRef<[u8]>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer: Vec<u8> = Vec::new();
    let mut ticks = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                error!("Pricing stream error after {} ticks: {}", ticks, e);
                return format!("stream error: {}", e);
            }
        };
        buffer.extend_from_slice(chunk.as_ref());
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            if push_line(&line, queue).await {
                ticks += 1;
            }
        }
    }
    if !buffer.is_empty() && push_line(&buffer, queue).await {
        ticks += 1;
    }
    info!("Pricing stream ended after {} ticks", ticks);
    "stream ended".to_string()
}

/// Returns true when a tick was queued
async fn push_line(line: &[u8], queue: &SharedQueue) -> bool {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    match serde_json::from_str::<StreamMessage>(text) {
        Ok(StreamMessage::Price(body)) => {
            let Some(snapshot) = body.to_snapshot() else {
                debug!("{}: empty book, skipped", body.instrument);
                return false;
            };
            let entry = QueueEntry::from(&snapshot.to_quote());
            match queue.push(&entry).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to queue tick: {}", e);
                    false
                }
            }
        }
        Ok(StreamMessage::Heartbeat { time }) => {
            debug!("Heartbeat: {}", time);
            false
        }
        Err(e) => {
            warn!("Unparsed stream line {}: {}", text, e);
            false
        }
    }
}

/// Push a disconnect entry for each instrument
pub async fn push_disconnects(queue: &SharedQueue, instruments: &[String], reason: &str) {
    for instrument in instruments {
        let entry = QueueEntry::Disconnect(Disconnect {
            instrument: instrument.clone(),
            time: Utc::now(),
            reason: reason.to_string(),
        });
        if let Err(e) = queue.push(&entry).await {
            error!("Failed to queue disconnect for {}: {}", instrument, e);
        }
    }
}

/// Run the pricing-stream producer as a background task
pub fn spawn_price_stream(
    client: OandaClient,
    instruments: Vec<String>,
    queue: SharedQueue,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = match client.open_price_stream(&instruments).await {
            Ok(response) => pump_price_lines(response.bytes_stream(), &queue).await,
            Err(e) => {
                error!("Failed to open pricing stream: {}", e);
                e.to_string()
            }
        };
        push_disconnects(&queue, &instruments, &reason).await;
    })
}
