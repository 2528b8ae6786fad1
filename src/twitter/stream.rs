// Filtered-stream decoding: raw body chunks -> lifecycle + data events.
//
// The stream body is newline-delimited JSON. Twitter sends a bare "\r\n"
// roughly every 20 seconds as a keep-alive, so silence longer than the
// keep-alive timeout means the connection is dead even if the socket is
// still open. The decoder turns all of that into a flat sequence of
// `StreamEvent`s that ends with exactly one terminal event.

use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};

use super::types::StreamPayload;

/// Everything the stream source reacts to.
#[derive(Debug)]
pub enum StreamEvent {
    /// The server accepted the connection.
    Connected,
    /// A matched tweet with its side-loaded includes.
    Data(Box<StreamPayload>),
    /// Heartbeat line.
    KeepAlive,
    /// A line that wasn't a usable tweet payload. Not terminal.
    Malformed(String),
    /// The server ended the response body.
    ConnectionClosed,
    /// Nothing arrived within the keep-alive timeout.
    ConnectionLost,
    /// Reading the body failed.
    ConnectionError(anyhow::Error),
}

impl StreamEvent {
    /// Whether this event ends the connection.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::ConnectionClosed
                | StreamEvent::ConnectionLost
                | StreamEvent::ConnectionError(_)
        )
    }
}

/// A live connection, as a stream of events.
pub type StreamEvents = BoxStream<'static, StreamEvent>;

struct LineDecoder<S> {
    body: S,
    buf: Vec<u8>,
    keep_alive: Duration,
}

impl<S> LineDecoder<S> {
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Decode a body stream into events, starting with `Connected`.
///
/// The returned stream always finishes with exactly one terminal event.
pub fn decode<S, B, E>(body: S, keep_alive: Duration) -> StreamEvents
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let decoder = LineDecoder {
        body,
        buf: Vec::new(),
        keep_alive,
    };

    let events = stream::unfold(Some(decoder), |state| async move {
        let mut dec = state?;
        loop {
            if let Some(line) = dec.next_line() {
                return Some((parse_line(&line), Some(dec)));
            }

            match tokio::time::timeout(dec.keep_alive, dec.body.next()).await {
                Err(_) => return Some((StreamEvent::ConnectionLost, None)),
                Ok(None) => return Some((StreamEvent::ConnectionClosed, None)),
                Ok(Some(Err(e))) => {
                    let err = anyhow::Error::new(e).context("Filtered stream read failed");
                    return Some((StreamEvent::ConnectionError(err), None));
                }
                Ok(Some(Ok(chunk))) => dec.buf.extend_from_slice(chunk.as_ref()),
            }
        }
    });

    stream::once(async { StreamEvent::Connected })
        .chain(events)
        .boxed()
}

fn parse_line(line: &[u8]) -> StreamEvent {
    if line.iter().all(u8::is_ascii_whitespace) {
        return StreamEvent::KeepAlive;
    }

    match serde_json::from_slice::<StreamPayload>(line) {
        Ok(payload) if payload.data.is_some() => StreamEvent::Data(Box::new(payload)),
        Ok(payload) => {
            let detail = payload
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            StreamEvent::Malformed(if detail.is_empty() {
                "stream line without tweet data".to_string()
            } else {
                detail
            })
        }
        Err(e) => StreamEvent::Malformed(format!("invalid JSON: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, io::Error>> + Send + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(p.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(events: StreamEvents) -> Vec<StreamEvent> {
        events.collect().await
    }

    const TWEET_LINE: &str = r#"{"data":{"id":"1","text":"hi @bot","author_id":"9"},"includes":{"users":[{"id":"9","username":"alice","name":"Alice"}]},"matching_rules":[{"id":"r1","tag":"mentions"}]}"#;

    #[tokio::test]
    async fn emits_connected_then_data_then_closed() {
        let body = format!("{TWEET_LINE}\r\n");
        let events = collect(decode(chunks(&[&body]), Duration::from_secs(20))).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StreamEvent::Connected));
        match &events[1] {
            StreamEvent::Data(payload) => {
                assert_eq!(payload.data.as_ref().unwrap().id, "1");
                assert_eq!(payload.includes.users[0].username, "alice");
                assert_eq!(payload.matching_rules[0].tag.as_deref(), Some("mentions"));
            }
            other => panic!("expected data, got {other:?}"),
        }
        assert!(matches!(events[2], StreamEvent::ConnectionClosed));
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_chunks() {
        let (head, tail) = TWEET_LINE.split_at(25);
        let tail = format!("{tail}\r\n\r\n");
        let events = collect(decode(chunks(&[head, &tail]), Duration::from_secs(20))).await;

        assert!(matches!(events[1], StreamEvent::Data(_)));
        assert!(matches!(events[2], StreamEvent::KeepAlive));
        assert!(events[3].is_terminal());
    }

    #[tokio::test]
    async fn bad_lines_are_not_terminal() {
        let body = "not json\r\n{\"errors\":[{\"title\":\"operational-disconnect\"}]}\r\n";
        let events = collect(decode(chunks(&[body]), Duration::from_secs(20))).await;

        assert!(matches!(&events[1], StreamEvent::Malformed(m) if m.starts_with("invalid JSON")));
        assert!(
            matches!(&events[2], StreamEvent::Malformed(m) if m.contains("operational-disconnect"))
        );
        assert!(matches!(events[3], StreamEvent::ConnectionClosed));
    }

    #[tokio::test]
    async fn read_error_becomes_connection_error() {
        let body = stream::iter(vec![
            Ok(b"\r\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
        ]);
        let events = collect(decode(body, Duration::from_secs(20))).await;

        assert!(matches!(events[1], StreamEvent::KeepAlive));
        match &events[2] {
            StreamEvent::ConnectionError(e) => assert!(format!("{e:#}").contains("reset by peer")),
            other => panic!("expected connection error, got {other:?}"),
        }
        assert_eq!(events.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_keep_alive_is_connection_lost() {
        let body = stream::pending::<Result<Vec<u8>, io::Error>>();
        let events = collect(decode(body, Duration::from_secs(20))).await;

        assert!(matches!(events[0], StreamEvent::Connected));
        assert!(matches!(events[1], StreamEvent::ConnectionLost));
        assert_eq!(events.len(), 2);
    }
}
