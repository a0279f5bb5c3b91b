//! Caller-side callback capability and ready-made implementations.

use std::sync::{mpsc, Arc};

/// What a caller hands to `start_generation`.
///
/// Calls arrive on the session's worker thread: zero or more `on_token` in
/// generation order, then exactly one of `on_complete` / `on_error`.
/// A slow implementation throttles its own session only.
pub trait TokenCallback: Send + Sync {
    fn on_token(&self, text: &str);
    fn on_complete(&self);
    fn on_error(&self, message: &str);

    /// Whether all three operations are actually provided. Sessions are
    /// only started for callbacks that answer `true`.
    fn is_complete(&self) -> bool {
        true
    }
}

type TextFn = Box<dyn Fn(&str) + Send + Sync>;
type UnitFn = Box<dyn Fn() + Send + Sync>;

/// Closure-backed callback with three optional slots.
#[derive(Default)]
pub struct FnCallback {
    on_token: Option<TextFn>,
    on_complete: Option<UnitFn>,
    on_error: Option<TextFn>,
}

impl FnCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_token<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_token = Some(Box::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn into_arc(self) -> Arc<dyn TokenCallback> {
        Arc::new(self)
    }
}

impl TokenCallback for FnCallback {
    fn on_token(&self, text: &str) {
        if let Some(f) = &self.on_token {
            f(text);
        }
    }

    fn on_complete(&self) {
        if let Some(f) = &self.on_complete {
            f();
        }
    }

    fn on_error(&self, message: &str) {
        if let Some(f) = &self.on_error {
            f(message);
        }
    }

    fn is_complete(&self) -> bool {
        self.on_token.is_some() && self.on_complete.is_some() && self.on_error.is_some()
    }
}

/// One callback invocation, as delivered by [`channel_callback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Complete,
    Error(String),
}

impl StreamEvent {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Token(_))
    }
}

struct ChannelCallback {
    tx: mpsc::Sender<StreamEvent>,
}

// Send errors mean the receiver is gone; the session keeps running regardless.
impl TokenCallback for ChannelCallback {
    fn on_token(&self, text: &str) {
        let _ = self.tx.send(StreamEvent::Token(text.to_string()));
    }

    fn on_complete(&self) {
        let _ = self.tx.send(StreamEvent::Complete);
    }

    fn on_error(&self, message: &str) {
        let _ = self.tx.send(StreamEvent::Error(message.to_string()));
    }
}

/// Callback that forwards every invocation into a channel.
pub fn channel_callback() -> (Arc<dyn TokenCallback>, mpsc::Receiver<StreamEvent>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(ChannelCallback { tx }), rx)
}
