use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Unique identifier of an in-flight query.
pub type SessionId = u64;

/// The ingestion channel a session arrived on, and where its result returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum Channel {
    /// Request/response: the caller awaits the result directly.
    SynchronousRequest,
    /// Publish/subscribe: the result is published on a reply topic.
    PublishSubscribe,
}

/// Microseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Wall-clock time now.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_micros();
        Timestamp(micros as u64)
    }

    /// Duration from `earlier` to `self`, saturating at zero.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// A start/end pair recorded when a session crosses a stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Encode, Decode)]
pub struct Span {
    /// When the stage picked the session up.
    pub start: Option<Timestamp>,
    /// When the stage finished with the session.
    pub end: Option<Timestamp>,
}

impl Span {
    /// Elapsed time when both ends are stamped.
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some(end.since(start)),
            _ => None,
        }
    }
}

/// Timing windows of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum Window {
    /// Submit to delivery.
    Overall,
    /// Decoding and feature extraction.
    Features,
    /// Descriptor quantization.
    Words,
    /// Candidate retrieval.
    Signatures,
    /// Pose estimation over candidates.
    Perspective,
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Window::Overall => "overall",
            Window::Features => "features",
            Window::Words => "words",
            Window::Signatures => "signatures",
            Window::Perspective => "perspective",
        };
        f.write_str(name)
    }
}

/// Bookkeeping for one query as it flows through the pipeline.
///
/// A session is owned by exactly one stage at a time, so it is mutated
/// sequentially; every stamp is clamped to the latest stamp already present,
/// which keeps the record ordered even when stages run on hosts with skewed
/// clocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Originating ingestion channel.
    pub channel: Channel,
    /// Submit to delivery.
    pub overall: Span,
    /// Feature extraction.
    pub features: Span,
    /// Word quantization.
    pub words: Span,
    /// Signature retrieval.
    pub signatures: Span,
    /// Pose estimation.
    pub perspective: Span,
}

impl Session {
    /// Create a session with no stamps.
    pub fn new(id: SessionId, channel: Channel) -> Self {
        Self {
            id,
            channel,
            overall: Span::default(),
            features: Span::default(),
            words: Span::default(),
            signatures: Span::default(),
            perspective: Span::default(),
        }
    }

    /// Read a window.
    pub fn span(&self, window: Window) -> &Span {
        match window {
            Window::Overall => &self.overall,
            Window::Features => &self.features,
            Window::Words => &self.words,
            Window::Signatures => &self.signatures,
            Window::Perspective => &self.perspective,
        }
    }

    fn span_mut(&mut self, window: Window) -> &mut Span {
        match window {
            Window::Overall => &mut self.overall,
            Window::Features => &mut self.features,
            Window::Words => &mut self.words,
            Window::Signatures => &mut self.signatures,
            Window::Perspective => &mut self.perspective,
        }
    }

    /// Stamp the start of a window.
    pub fn stamp_start(&mut self, window: Window) {
        let ts = self.next_stamp();
        self.span_mut(window).start = Some(ts);
    }

    /// Stamp the end of a window.
    pub fn stamp_end(&mut self, window: Window) {
        let ts = self.next_stamp();
        self.span_mut(window).end = Some(ts);
    }

    /// Overwrite `windows` with the spans another record of this session holds.
    pub fn copy_windows(&mut self, from: &Session, windows: &[Window]) {
        for &window in windows {
            *self.span_mut(window) = *from.span(window);
        }
    }

    /// Elapsed time of a window, if both ends are stamped.
    pub fn elapsed(&self, window: Window) -> Option<Duration> {
        self.span(window).elapsed()
    }

    /// All stamps in pipeline order, from `overall.start` to `overall.end`.
    pub fn timeline(&self) -> [Option<Timestamp>; 10] {
        [
            self.overall.start,
            self.features.start,
            self.features.end,
            self.words.start,
            self.words.end,
            self.signatures.start,
            self.signatures.end,
            self.perspective.start,
            self.perspective.end,
            self.overall.end,
        ]
    }

    /// The latest stamp recorded so far.
    pub fn latest(&self) -> Option<Timestamp> {
        self.timeline().into_iter().flatten().max()
    }

    fn next_stamp(&self) -> Timestamp {
        let now = Timestamp::now();
        match self.latest() {
            Some(latest) if latest > now => latest,
            _ => now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamps_are_monotonic() {
        let mut session = Session::new(7, Channel::SynchronousRequest);
        session.stamp_start(Window::Overall);
        for window in [
            Window::Features,
            Window::Words,
            Window::Signatures,
            Window::Perspective,
        ] {
            session.stamp_start(window);
            session.stamp_end(window);
        }
        session.stamp_end(Window::Overall);

        let stamps: Vec<Timestamp> = session.timeline().into_iter().flatten().collect();
        assert_eq!(stamps.len(), 10);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        assert!(session.elapsed(Window::Overall).is_some());
    }

    #[test]
    fn test_stamp_clamps_to_future_stamp() {
        let mut session = Session::new(1, Channel::PublishSubscribe);
        let future = Timestamp(Timestamp::now().0 + 60_000_000);
        session.features.end = Some(future);
        session.stamp_start(Window::Words);
        assert_eq!(session.words.start, Some(future));
    }

    #[test]
    fn test_stamp_touches_one_field() {
        let mut session = Session::new(3, Channel::SynchronousRequest);
        session.stamp_start(Window::Words);
        assert!(session.words.start.is_some());
        assert!(session.words.end.is_none());
        assert_eq!(session.features, Span::default());
        assert_eq!(session.overall, Span::default());
    }

    #[test]
    fn test_copy_windows_leaves_others_alone() {
        let mut local = Session::new(4, Channel::SynchronousRequest);
        local.overall.start = Some(Timestamp(10));
        local.words.end = Some(Timestamp(20));

        let mut remote = local.clone();
        remote.overall.start = Some(Timestamp(1));
        remote.words.end = None;
        remote.signatures = Span {
            start: Some(Timestamp(30)),
            end: Some(Timestamp(31)),
        };

        local.copy_windows(&remote, &[Window::Signatures]);
        assert_eq!(local.overall.start, Some(Timestamp(10)));
        assert_eq!(local.words.end, Some(Timestamp(20)));
        assert_eq!(local.signatures, remote.signatures);
    }
}
