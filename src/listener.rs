/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LogoutReason {
    /// The application called `logout`.
    UserRequested,
    /// An expired access token could not be refreshed.
    RefreshFailed,
    /// The server kept rejecting credentials after a refresh and retry.
    Unauthorized,
    /// Stored session data could not be decoded at startup.
    InvalidSession,
}

/// Consumer-provided hook invoked after the session has been cleared.
///
/// Typically resets navigation to the sign-in screen. Called once clearing
/// the persisted keys has been attempted and the refresh lock is released,
/// so the listener may call back into the pipeline. A failure to clear
/// storage is logged and the listener is still called, except on
/// `logout`, which returns the error instead.
///
/// Any `Fn(LogoutReason) + Send + Sync` closure implements this trait.
pub trait SessionListener: Send + Sync + 'static {
    fn on_logout(&self, reason: LogoutReason);
}

impl<F> SessionListener for F
where
    F: Fn(LogoutReason) + Send + Sync + 'static,
{
    fn on_logout(&self, reason: LogoutReason) {
        self(reason);
    }
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl SessionListener for NoopListener {
    fn on_logout(&self, _reason: LogoutReason) {}
}
