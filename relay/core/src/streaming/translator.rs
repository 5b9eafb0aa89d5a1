//! Stream Translator
//!
//! Drives one backend body to completion and forwards canonical events into
//! an `mpsc` channel. The producer stops as soon as a send fails.
//!
//! # Terminal Guarantee
//!
//! [`StreamTranslator::run`] sends exactly one terminal event (`Done` or
//! `Error`) unless the receiver is gone, and nothing after it. Every exit
//! path goes through `finish` or `fault`, which consume the translator.
//!
//! # Termination
//!
//! | Cause                                         | Terminal           |
//! |-----------------------------------------------|--------------------|
//! | body ends, `done`/`final` flag, `event: done` | `Done{total}`      |
//! | peer reset / broken pipe / unexpected EOF     | `Done{total}`      |
//! | idle timeout, max duration, other read error  | `Error{partial}`   |
//! | line longer than the buffer cap               | `Error{partial}`   |
//! | receiver dropped (client gone)                | none               |
//!
//! The maximum duration is measured from [`StreamTranslator::new`], so it
//! also bounds the time spent opening the backend stream.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::decode::{decode_line, BackendFrame, LineBuffer};
use crate::backend::BackendStream;
use crate::config::BackendSettings;
use crate::events::CanonicalEvent;

/// How a translated stream ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `Done` was sent
    Completed,
    /// `Error` was sent
    Faulted,
    /// The receiver went away; nothing more was sent
    ClientGone,
}

/// Peer closes that end a stream cleanly
#[must_use]
pub fn is_peer_close(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

enum Step {
    Continue,
    Complete,
    Overflow,
    ClientGone,
}

/// Per-connection translator state
#[derive(Debug)]
pub struct StreamTranslator {
    idle_timeout: Option<Duration>,
    max_duration: Option<Duration>,
    deadline: Option<Instant>,
    lines: LineBuffer,
    accumulated: String,
}

impl StreamTranslator {
    /// Create a translator with explicit limits; the max duration starts now
    #[must_use]
    pub fn new(idle_timeout: Option<Duration>, max_duration: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            max_duration,
            deadline: max_duration.map(|d| Instant::now() + d),
            lines: LineBuffer::new(),
            accumulated: String::new(),
        }
    }

    /// Replace the line buffer
    #[must_use]
    pub fn with_line_buffer(mut self, lines: LineBuffer) -> Self {
        self.lines = lines;
        self
    }

    /// Create a translator from backend settings
    #[must_use]
    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self::new(settings.stream_timeout, settings.max_stream_duration)
    }

    /// Transcript so far
    #[must_use]
    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// When the maximum duration runs out, if one is set
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Send the max-duration `Error` without reading any body
    pub async fn expire(self, tx: &mpsc::Sender<CanonicalEvent>) -> StreamOutcome {
        let limit = self.max_duration.unwrap_or_default();
        self.fault(tx, format!("stream exceeded maximum duration of {}s", limit.as_secs()))
            .await
    }

    /// Consume the body and forward canonical events to `tx`
    pub async fn run(
        mut self,
        mut body: BackendStream,
        tx: &mpsc::Sender<CanonicalEvent>,
    ) -> StreamOutcome {
        let deadline = self.deadline;

        loop {
            let next = tokio::select! {
                biased;
                () = tx.closed() => {
                    tracing::debug!("Client went away, dropping backend stream");
                    return StreamOutcome::ClientGone;
                }
                () = sleep_until(deadline) => return self.expire(tx).await,
                next = next_chunk(&mut body, self.idle_timeout) => next,
            };

            match next {
                Ok(Some(Ok(chunk))) => match self.consume(&chunk, tx).await {
                    Step::Continue => {}
                    Step::Complete => return self.finish(tx).await,
                    Step::Overflow => {
                        let limit = self.lines.limit();
                        return self
                            .fault(tx, format!("backend line exceeded {limit} bytes"))
                            .await;
                    }
                    Step::ClientGone => return StreamOutcome::ClientGone,
                },
                Ok(Some(Err(e))) if is_peer_close(e.kind()) => {
                    tracing::debug!(error = %e, "Backend closed the connection, ending stream");
                    return self.drain_and_finish(tx).await;
                }
                Ok(Some(Err(e))) => {
                    return self.fault(tx, format!("backend stream failed: {e}")).await;
                }
                Ok(None) => return self.drain_and_finish(tx).await,
                Err(idle) => {
                    return self
                        .fault(tx, format!("no data from backend within {}s", idle.as_secs()))
                        .await;
                }
            }
        }
    }

    async fn consume(&mut self, chunk: &Bytes, tx: &mpsc::Sender<CanonicalEvent>) -> Step {
        for line in self.lines.push(chunk) {
            match self.apply(&line, tx).await {
                Step::Continue => {}
                other => return other,
            }
        }
        if self.lines.overflowed() {
            Step::Overflow
        } else {
            Step::Continue
        }
    }

    async fn apply(&mut self, line: &str, tx: &mpsc::Sender<CanonicalEvent>) -> Step {
        let (texts, done) = match decode_line(line) {
            BackendFrame::Heartbeat | BackendFrame::StatusMarker => return Step::Continue,
            BackendFrame::DoneMarker => return Step::Complete,
            BackendFrame::Tokens { texts, done } => (texts, done),
            BackendFrame::Unrecognized(raw) => (vec![raw], false),
        };

        for token in texts {
            self.accumulated.push_str(&token);
            let event = CanonicalEvent::Token {
                token,
                accumulated: self.accumulated.clone(),
            };
            if tx.send(event).await.is_err() {
                return Step::ClientGone;
            }
        }

        if done {
            Step::Complete
        } else {
            Step::Continue
        }
    }

    /// Decode an unterminated last line, then finish
    async fn drain_and_finish(mut self, tx: &mpsc::Sender<CanonicalEvent>) -> StreamOutcome {
        if let Some(line) = self.lines.finish() {
            if let Step::ClientGone = self.apply(&line, tx).await {
                return StreamOutcome::ClientGone;
            }
        }
        self.finish(tx).await
    }

    async fn finish(self, tx: &mpsc::Sender<CanonicalEvent>) -> StreamOutcome {
        tracing::info!(chars = self.accumulated.chars().count(), "Backend stream completed");
        let event = CanonicalEvent::Done {
            total: self.accumulated,
        };
        if tx.send(event).await.is_err() {
            return StreamOutcome::ClientGone;
        }
        StreamOutcome::Completed
    }

    async fn fault(self, tx: &mpsc::Sender<CanonicalEvent>, message: String) -> StreamOutcome {
        tracing::warn!(
            error = %message,
            partial_chars = self.accumulated.chars().count(),
            "Backend stream faulted"
        );
        let event = CanonicalEvent::Error {
            message,
            detail: None,
            partial: (!self.accumulated.is_empty()).then_some(self.accumulated),
        };
        if tx.send(event).await.is_err() {
            return StreamOutcome::ClientGone;
        }
        StreamOutcome::Faulted
    }
}

/// Sleep until `deadline`, or forever when there is none
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Next body chunk; `Err(limit)` when the idle timeout elapsed first
async fn next_chunk(
    body: &mut BackendStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<io::Result<Bytes>>, Duration> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, body.next())
            .await
            .map_err(|_| limit),
        None => Ok(body.next().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;

    fn body(chunks: Vec<io::Result<&'static str>>) -> BackendStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(|s| Bytes::from_static(s.as_bytes()))),
        ))
    }

    async fn run(chunks: Vec<io::Result<&'static str>>) -> (StreamOutcome, Vec<CanonicalEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = StreamTranslator::new(Some(Duration::from_secs(5)), None)
            .run(body(chunks), &tx)
            .await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    fn token(t: &str, acc: &str) -> CanonicalEvent {
        CanonicalEvent::Token {
            token: t.to_string(),
            accumulated: acc.to_string(),
        }
    }

    fn done(total: &str) -> CanonicalEvent {
        CanonicalEvent::Done {
            total: total.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_body_yields_done() {
        let (outcome, events) = run(vec![]).await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(events, vec![done("")]);
    }

    #[tokio::test]
    async fn test_tokens_accumulate() {
        let (_, events) = run(vec![
            Ok("data: {\"text\":\"Hel\"}\n\n"),
            Ok("data: {\"token\":\"lo\"}\n"),
        ])
        .await;
        assert_eq!(
            events,
            vec![token("Hel", "Hel"), token("lo", "Hello"), done("Hello")]
        );
    }

    #[tokio::test]
    async fn test_done_flag_stops_reading() {
        let (outcome, events) = run(vec![
            Ok("data: {\"text\":\"a\",\"done\":true}\ndata: {\"text\":\"ignored\"}\n"),
            Ok("data: {\"text\":\"also ignored\"}\n"),
        ])
        .await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(events, vec![token("a", "a"), done("a")]);
    }

    #[tokio::test]
    async fn test_event_done_marker() {
        let (_, events) = run(vec![Ok("data: x\nevent: done\ndata: y\n")]).await;
        assert_eq!(events, vec![token("x", "x"), done("x")]);
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_decoded() {
        let (_, events) = run(vec![Ok("data: {\"text\":\"tail\"}")]).await;
        assert_eq!(events, vec![token("tail", "tail"), done("tail")]);
    }

    #[tokio::test]
    async fn test_peer_reset_is_clean_end() {
        let (outcome, events) = run(vec![
            Ok("data: {\"text\":\"a\"}\n"),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ])
        .await;
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(events, vec![token("a", "a"), done("a")]);
    }

    #[tokio::test]
    async fn test_other_read_error_carries_partial() {
        let (outcome, events) = run(vec![
            Ok("data: {\"text\":\"par\"}\n"),
            Err(io::Error::new(io::ErrorKind::Other, "decoder exploded")),
        ])
        .await;
        assert_eq!(outcome, StreamOutcome::Faulted);
        assert_eq!(events.len(), 2);
        match &events[1] {
            CanonicalEvent::Error { message, partial, .. } => {
                assert!(message.contains("decoder exploded"));
                assert_eq!(partial.as_deref(), Some("par"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_faults() {
        let (tx, mut rx) = mpsc::channel(8);
        let stalled: BackendStream = Box::pin(
            stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"data: a\n"))])
                .chain(stream::pending()),
        );

        let outcome = StreamTranslator::new(Some(Duration::from_secs(2)), None)
            .run(stalled, &tx)
            .await;
        assert_eq!(outcome, StreamOutcome::Faulted);

        assert_eq!(rx.recv().await, Some(token("a", "a")));
        assert!(matches!(
            rx.recv().await,
            Some(CanonicalEvent::Error { partial: Some(ref p), .. }) if p == "a"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_faults() {
        let (tx, mut rx) = mpsc::channel(8);
        let stalled: BackendStream = Box::pin(stream::pending::<io::Result<Bytes>>());

        let outcome = StreamTranslator::new(None, Some(Duration::from_secs(10)))
            .run(stalled, &tx)
            .await;
        assert_eq!(outcome, StreamOutcome::Faulted);
        assert!(matches!(rx.recv().await, Some(CanonicalEvent::Error { partial: None, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_counts_from_construction() {
        let translator = StreamTranslator::new(None, Some(Duration::from_secs(10)));
        tokio::time::sleep(Duration::from_secs(10)).await;

        let (tx, mut rx) = mpsc::channel(8);
        let outcome = translator.run(body(vec![Ok("data: a\n")]), &tx).await;
        assert_eq!(outcome, StreamOutcome::Faulted);
        assert!(matches!(
            rx.recv().await,
            Some(CanonicalEvent::Error { ref message, partial: None, .. })
                if message.contains("maximum duration")
        ));
    }

    #[tokio::test]
    async fn test_oversized_line_faults() {
        let (tx, mut rx) = mpsc::channel(8);
        let outcome = StreamTranslator::new(None, None)
            .with_line_buffer(LineBuffer::with_limit(8))
            .run(
                body(vec![
                    Ok("data: {\"text\":\"a\"}\ndata: 0"),
                    Ok("123"),
                    Ok("\ndata: {\"text\":\"never\"}\n"),
                ]),
                &tx,
            )
            .await;
        assert_eq!(outcome, StreamOutcome::Faulted);

        assert_eq!(rx.recv().await, Some(token("a", "a")));
        match rx.recv().await {
            Some(CanonicalEvent::Error { message, partial, .. }) => {
                assert_eq!(message, "backend line exceeded 8 bytes");
                assert_eq!(partial.as_deref(), Some("a"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_default_line_cap() {
        let (tx, mut rx) = mpsc::channel(8);
        let huge: BackendStream = Box::pin(stream::iter(vec![Ok::<_, io::Error>(Bytes::from(
            vec![b'x'; crate::streaming::MAX_LINE_BYTES + 1],
        ))]));
        let outcome = StreamTranslator::new(None, None).run(huge, &tx).await;
        assert_eq!(outcome, StreamOutcome::Faulted);
        assert!(matches!(
            rx.recv().await,
            Some(CanonicalEvent::Error { partial: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_without_terminal() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let outcome = StreamTranslator::new(None, None)
            .run(body(vec![Ok("data: a\n")]), &tx)
            .await;
        assert_eq!(outcome, StreamOutcome::ClientGone);
    }

    #[test]
    fn test_peer_close_kinds() {
        assert!(is_peer_close(io::ErrorKind::BrokenPipe));
        assert!(is_peer_close(io::ErrorKind::UnexpectedEof));
        assert!(!is_peer_close(io::ErrorKind::TimedOut));
        assert!(!is_peer_close(io::ErrorKind::Other));
    }
}
