//! One credential-acquisition attempt for a watched pair.
//!
//! A [`SessionHandle`] is owned by its registry entry. The asynchronous part
//! of the attempt runs elsewhere and is tied to the handle by two things:
//! a cancellation token the handle trips when it is cancelled or dropped,
//! and a generation number that completions must present to be accepted.

use tokio_util::sync::CancellationToken;

use crate::entities::{LoginParameters, SessionData, SessionRef};
use crate::error::LoginFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed(Result<(), LoginFailure>),
    Cancelled,
}

#[derive(Debug)]
pub struct SessionHandle {
    generation: u64,
    state: SessionState,
    session_ref: Option<SessionRef>,
    auth_parameters: Option<LoginParameters>,
    result: Option<SessionData>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            state: SessionState::Idle,
            session_ref: None,
            auth_parameters: None,
            result: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn session_ref(&self) -> Option<&SessionRef> {
        self.session_ref.as_ref()
    }

    pub fn auth_parameters(&self) -> Option<&LoginParameters> {
        self.auth_parameters.as_ref()
    }

    pub fn result(&self) -> Option<&SessionData> {
        self.result.as_ref()
    }

    pub fn failure(&self) -> Option<&LoginFailure> {
        match &self.state {
            SessionState::Completed(Err(failure)) => Some(failure),
            _ => None,
        }
    }

    /// Mark the attempt as in flight.
    ///
    /// Returns the token the in-flight work must watch; it fires when this
    /// handle is cancelled or dropped.
    pub fn start(
        &mut self,
        session_ref: SessionRef,
        parameters: LoginParameters,
    ) -> CancellationToken {
        self.session_ref = Some(session_ref);
        self.auth_parameters = Some(parameters);
        self.result = None;
        self.state = SessionState::Running;
        self.cancel.clone()
    }

    /// Whether a completion tagged with `generation` belongs to this attempt
    pub fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && self.is_running()
    }

    /// Store the provider's result. Only a running attempt takes a result.
    pub fn succeed(&mut self, data: SessionData) -> bool {
        if !self.is_running() {
            return false;
        }
        self.result = Some(data);
        self.state = SessionState::Completed(Ok(()));
        true
    }

    /// Record a failed attempt; credential material is dropped.
    pub fn fail(&mut self, failure: LoginFailure) {
        self.auth_parameters = None;
        self.result = None;
        self.state = SessionState::Completed(Err(failure));
    }

    /// Abandon the attempt. Safe on a handle in any state.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.auth_parameters = None;
        self.result = None;
        if matches!(self.state, SessionState::Idle | SessionState::Running) {
            self.state = SessionState::Cancelled;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, FailureKind};

    fn running_handle(generation: u64) -> (SessionHandle, CancellationToken) {
        let mut handle = SessionHandle::new(generation);
        let token = handle.start(
            SessionRef::new(1, "oauth2", generation),
            LoginParameters::from_pairs([("ClientId", "abc")]),
        );
        (handle, token)
    }

    #[test]
    fn test_new_handle_is_idle() {
        let handle = SessionHandle::new(1);
        assert_eq!(handle.state(), &SessionState::Idle);
        assert!(handle.session_ref().is_none());
        assert!(!handle.accepts(1));
    }

    #[test]
    fn test_start_and_succeed() {
        let (mut handle, token) = running_handle(3);
        assert!(handle.is_running());
        assert!(handle.accepts(3));
        assert!(!handle.accepts(2));

        assert!(handle.succeed(SessionData::default().with_access_token("xyz")));
        assert_eq!(handle.state(), &SessionState::Completed(Ok(())));
        assert_eq!(
            handle.result().and_then(|d| d.access_token.as_deref()),
            Some("xyz")
        );
        assert!(!token.is_cancelled());
        // A second result for the same attempt is refused.
        assert!(!handle.succeed(SessionData::default()));
    }

    #[test]
    fn test_fail_clears_credentials() {
        let (mut handle, _token) = running_handle(1);
        handle.fail(LoginFailure::process(&Error::SessionProcess("denied".into())));

        assert!(handle.auth_parameters().is_none());
        assert_eq!(
            handle.failure().map(|f| f.kind),
            Some(FailureKind::SessionProcess)
        );
    }

    #[test]
    fn test_cancel_trips_token_and_clears_data() {
        let (mut handle, token) = running_handle(1);
        handle.cancel();

        assert!(token.is_cancelled());
        assert_eq!(handle.state(), &SessionState::Cancelled);
        assert!(handle.auth_parameters().is_none());
        assert!(!handle.accepts(1));
    }

    #[test]
    fn test_cancel_is_safe_on_idle_and_completed() {
        let mut idle = SessionHandle::new(1);
        idle.cancel();
        idle.cancel();
        assert_eq!(idle.state(), &SessionState::Cancelled);

        let (mut done, _token) = running_handle(2);
        done.succeed(SessionData::default());
        done.cancel();
        assert_eq!(done.state(), &SessionState::Completed(Ok(())));
        assert!(done.result().is_none());
    }

    #[test]
    fn test_drop_cancels_in_flight_work() {
        let (handle, token) = running_handle(1);
        drop(handle);
        assert!(token.is_cancelled());
    }
}
