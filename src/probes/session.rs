//! One probe run: a child process turned into an ordered event stream.

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::dialect::Dialect;
use super::launcher::ProbeProcess;
use super::parser::{OutputParser, ParsedLine};
use super::summary;
use super::{ProbeEvent, ReplyEvent, ReplyStatus, ResolvedTarget, SummaryEvent};

/// Where a session's events go.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Whether this transport can deliver events incrementally. A session is
    /// refused before launch when it cannot.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Deliver one event; an error means the consumer has gone away.
    async fn send(&mut self, event: ProbeEvent) -> Result<(), SinkClosed>;

    /// Resolves once the consumer has gone away.
    async fn closed(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

#[async_trait]
impl EventSink for mpsc::Sender<ProbeEvent> {
    async fn send(&mut self, event: ProbeEvent) -> Result<(), SinkClosed> {
        mpsc::Sender::send(self, event).await.map_err(|_| SinkClosed)
    }

    async fn closed(&mut self) {
        mpsc::Sender::closed(self).await
    }
}

/// How a [`ProbeSession::run`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed(SummaryEvent),
    /// The consumer went away; the process was terminated and reaped.
    Disconnected,
}

/// A running probe.
///
/// Events come out in output order. Exactly one summary is produced, and
/// only after the process has exited. Dropping a session kills the process.
pub struct ProbeSession {
    id: Uuid,
    target: ResolvedTarget,
    dialect: &'static Dialect,
    parser: OutputParser,
    process: ProbeProcess,
    finished: bool,
}

impl ProbeSession {
    pub fn new(target: ResolvedTarget, dialect: &'static Dialect, process: ProbeProcess) -> Self {
        let id = Uuid::new_v4();
        info!(
            session = %id,
            %target,
            dialect = dialect.name,
            pid = ?process.pid(),
            "probe session started"
        );
        Self {
            id,
            target,
            dialect,
            parser: OutputParser::new(dialect),
            process,
            finished: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> ResolvedTarget {
        self.target
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Next event, or `None` once the summary has been produced.
    ///
    /// Reads no further output than it needs for one event.
    pub async fn next_event(&mut self) -> Option<ProbeEvent> {
        if self.finished {
            return None;
        }

        while let Some(line) = self.process.next_line().await {
            let parsed = self.parser.classify(&line);
            if let Some(reply) = self.reply_event(parsed) {
                return Some(ProbeEvent::Reply(reply));
            }
        }

        let status = self.process.wait().await;
        self.finished = true;

        let summary = summary::aggregate(self.parser.unclassified(), self.dialect);
        info!(
            session = %self.id,
            exit_code = status.and_then(|s| s.code()),
            sent = summary.sent,
            recv = summary.recv,
            loss = summary.loss,
            "probe session finished"
        );
        Some(ProbeEvent::Summary(summary))
    }

    /// Stop the run early. No summary follows.
    pub async fn cancel(&mut self) {
        if !self.finished {
            debug!(session = %self.id, "cancelling probe session");
            self.process.terminate().await;
            self.finished = true;
        }
    }

    /// Pump every event into `sink` until the run completes or the sink
    /// goes away.
    pub async fn run<S: EventSink + ?Sized>(mut self, sink: &mut S) -> SessionOutcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => None,
                event = self.next_event() => Some(event),
            };

            match next {
                None => break,
                Some(None) => {
                    // next_event only ends after yielding the summary.
                    return SessionOutcome::Completed(SummaryEvent::default());
                }
                Some(Some(event)) => {
                    let summary = match &event {
                        ProbeEvent::Summary(s) => Some(s.clone()),
                        ProbeEvent::Reply(_) => None,
                    };
                    if sink.send(event).await.is_err() {
                        break;
                    }
                    if let Some(summary) = summary {
                        return SessionOutcome::Completed(summary);
                    }
                }
            }
        }

        info!(session = %self.id, "probe consumer disconnected");
        self.cancel().await;
        SessionOutcome::Disconnected
    }

    /// The session as a stream of events. Dropping the stream kills the
    /// process.
    pub fn into_stream(self) -> impl Stream<Item = ProbeEvent> + Send {
        futures::stream::unfold(self, |mut session| async move {
            session.next_event().await.map(|event| (event, session))
        })
    }

    fn reply_event(&self, parsed: ParsedLine) -> Option<ReplyEvent> {
        let time = parsed.rtt_ms();
        let (seq, ttl, status, detail) = match parsed {
            ParsedLine::Reply { seq, ttl, .. } => (seq, ttl, ReplyStatus::Received, None),
            ParsedLine::Timeout { seq } => (seq, 0, ReplyStatus::Timeout, None),
            ParsedLine::Unreachable { seq } => (seq, 0, ReplyStatus::Unreachable, None),
            ParsedLine::Failure { detail } => (0, 0, ReplyStatus::Failure, Some(detail)),
            ParsedLine::Unclassified => return None,
        };
        Some(ReplyEvent {
            seq,
            ttl,
            time,
            status,
            timestamp: Utc::now(),
            ip: self.target.to_string(),
            detail,
        })
    }
}

impl std::fmt::Debug for ProbeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSession")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("dialect", &self.dialect.name)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::net::IpAddr;
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::process::Command;

    use super::*;
    use crate::probes::target::HostLookup;
    use crate::probes::{ProbeError, ProbeLauncher, ProbeRequest, NO_RTT};

    const SCRIPTED_RUN: &str = "printf '%s\\n' \
        'PING 192.0.2.1 (192.0.2.1) 56(84) bytes of data.' \
        '64 bytes from 192.0.2.1: icmp_seq=1 ttl=64 time=0.512 ms' \
        'no answer yet for icmp_seq=2' \
        'garbage %%% line' \
        '' \
        '--- 192.0.2.1 ping statistics ---' \
        '3 packets transmitted, 2 received, 33% packet loss, time 2003ms' \
        'rtt min/avg/max/mdev = 0.400/0.456/0.512/0.056 ms'";

    fn scripted(script: &str) -> ProbeSession {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        let process = ProbeProcess::spawn(cmd).unwrap();
        let target = ResolvedTarget::new("192.0.2.1".parse().unwrap());
        ProbeSession::new(target, Dialect::by_name("linux").unwrap(), process)
    }

    fn alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    async fn wait_gone(pid: u32) -> bool {
        for _ in 0..100 {
            if !alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_events_then_single_summary() {
        let mut session = scripted(SCRIPTED_RUN);
        let mut events = Vec::new();
        while let Some(event) = session.next_event().await {
            events.push(event);
        }

        assert_eq!(events.len(), 3);
        match &events[0] {
            ProbeEvent::Reply(r) => {
                assert_eq!((r.seq, r.ttl, r.time), (1, 64, 0.512));
                assert_eq!(r.status, ReplyStatus::Received);
                assert_eq!(r.ip, "192.0.2.1");
            }
            other => panic!("expected reply, got {:?}", other),
        }
        match &events[1] {
            ProbeEvent::Reply(r) => {
                assert_eq!(r.seq, 2);
                assert_eq!(r.status, ReplyStatus::Timeout);
                assert_eq!(r.time, NO_RTT);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        match &events[2] {
            ProbeEvent::Summary(s) => {
                assert_eq!((s.sent, s.recv, s.loss), (3, 2, 33.0));
                assert_eq!(s.max, 0.512);
            }
            other => panic!("expected summary, got {:?}", other),
        }

        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_run_into_channel() {
        let session = scripted(SCRIPTED_RUN);
        let (mut tx, mut rx) = mpsc::channel::<ProbeEvent>(1);
        let handle = tokio::spawn(async move { session.run(&mut tx).await });

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.name());
        }
        assert_eq!(names, ["reply", "reply", "summary"]);

        match handle.await.unwrap() {
            SessionOutcome::Completed(s) => assert_eq!(s.sent, 3),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_output_still_summarizes() {
        let mut session = scripted("exit 2");
        match session.next_event().await {
            Some(ProbeEvent::Summary(s)) => assert_eq!(s, SummaryEvent::default()),
            other => panic!("expected summary, got {:?}", other),
        }
        assert!(session.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_terminates_process() {
        let session = scripted(
            "echo '64 bytes from 192.0.2.1: icmp_seq=1 ttl=64 time=0.5 ms'; exec sleep 30",
        );
        let pid = session.pid().unwrap();
        let (mut tx, mut rx) = mpsc::channel::<ProbeEvent>(1);
        let handle = tokio::spawn(async move { session.run(&mut tx).await });

        assert!(matches!(rx.recv().await, Some(ProbeEvent::Reply(_))));
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run must end after disconnect")
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Disconnected);
        assert!(!alive(pid), "probe process {} survived disconnect", pid);
    }

    #[tokio::test]
    async fn test_dropped_stream_kills_process() {
        let session = scripted(
            "echo '64 bytes from 192.0.2.1: icmp_seq=1 ttl=64 time=0.5 ms'; exec sleep 30",
        );
        let pid = session.pid().unwrap();
        let mut stream = Box::pin(session.into_stream());

        assert!(matches!(stream.next().await, Some(ProbeEvent::Reply(_))));
        drop(stream);

        assert!(wait_gone(pid).await, "probe process {} survived drop", pid);
    }

    #[tokio::test]
    async fn test_cancel_ends_without_summary() {
        let mut session = scripted("exec sleep 30");
        let pid = session.pid().unwrap();
        session.cancel().await;
        assert!(session.next_event().await.is_none());
        assert!(!alive(pid));
    }

    struct BufferedOnly;

    #[async_trait]
    impl EventSink for BufferedOnly {
        fn supports_streaming(&self) -> bool {
            false
        }

        async fn send(&mut self, _event: ProbeEvent) -> Result<(), SinkClosed> {
            Ok(())
        }

        async fn closed(&mut self) {
            futures::future::pending::<()>().await
        }
    }

    struct NoLookup;

    #[async_trait]
    impl HostLookup for NoLookup {
        async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", host),
            ))
        }
    }

    #[tokio::test]
    async fn test_unsupported_sink_refused_before_launch() {
        // A launch attempt would surface as ProbeError::Launch.
        let launcher = ProbeLauncher::new(Some("/nonexistent/netdash-ping".to_string()), None);
        let err = launcher
            .open(&ProbeRequest::new("192.0.2.1"), &NoLookup, &BufferedOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::StreamUnsupported));
    }

    #[tokio::test]
    async fn test_open_error_order() {
        let launcher = ProbeLauncher::new(Some("/nonexistent/netdash-ping".to_string()), None);
        let (tx, _rx) = mpsc::channel::<ProbeEvent>(1);

        let err = launcher
            .open(&ProbeRequest::new("-f"), &NoLookup, &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidInput(_)));

        let err = launcher
            .open(&ProbeRequest::new("nowhere.invalid"), &NoLookup, &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::ResolutionFailure(_)));

        let err = launcher
            .open(&ProbeRequest::new("192.0.2.1"), &NoLookup, &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Launch(_)));
    }
}
