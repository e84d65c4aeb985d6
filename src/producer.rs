//! Fragment production: the seam between the session loop and whatever
//! engine actually generates text.
//!
//! A producer turns one prompt into a lazy, finite, ordered stream of text
//! fragments. Fragments may be separated by arbitrary real-world delay, and
//! the stream may end with an error after having already yielded fragments;
//! the session relays whatever it gets, in order, and treats a mid-stream
//! error as a terminal condition for the connection.

use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use tokio::time::sleep;

use crate::GatewayError;

/// Ordered fragment sequence for one prompt. An `Err` item is terminal.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// A source of generated text, one invocation in flight per connection.
pub trait FragmentProducer: Send + Sync {
    /// Starts generation for `prompt`. The work happens lazily as the
    /// returned stream is polled.
    fn generate(&self, prompt: &str) -> FragmentStream;
}

/// Deterministic fallback producer used when no real engine is wired in:
/// echoes a canned sentence containing the prompt, one character at a time,
/// with a fixed per-character delay.
#[derive(Debug, Clone)]
pub struct EchoProducer {
    fragment_delay: Duration,
}

impl EchoProducer {
    pub fn new(fragment_delay: Duration) -> Self {
        Self { fragment_delay }
    }
}

impl Default for EchoProducer {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl FragmentProducer for EchoProducer {
    fn generate(&self, prompt: &str) -> FragmentStream {
        let reply = format!("This is a simulated response from the LLM. You said: {prompt}");
        let delay = self.fragment_delay;
        Box::pin(stream! {
            for ch in reply.chars() {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                yield Ok(ch.to_string());
            }
        })
    }
}
