//! Minimal server-sent-events framing over a response byte stream. Yields
//! the payload of each `data:` line; `[DONE]` terminates the stream.

use async_stream::stream;
use futures::{Stream, StreamExt};

use crate::error::AdapterError;

pub(crate) fn data_events(
    response: reqwest::Response,
    provider: &'static str,
) -> impl Stream<Item = Result<String, AdapterError>> {
    stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(AdapterError::request(provider, e));
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete lines, keeping any partial tail buffered.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return;
                }
                if !data.is_empty() {
                    yield Ok(data.to_string());
                }
            }
        }
    }
}
