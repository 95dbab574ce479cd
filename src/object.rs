//! The open/closed/failed lifecycle every stream object tracks.

use crate::status::{Status, StreamResult};

/// Lifecycle state of a stream object.
///
/// Transitions are one-way except staying open. The first failure latches;
/// data-moving operations short-circuit with the latched status from then on,
/// and closing preserves it.
#[derive(Clone, Debug, Default)]
pub enum ObjectState {
    #[default]
    Open,
    OpenFailed(Status),
    Closed,
    ClosedFailed(Status),
}

impl ObjectState {
    /// True while open with no failure latched.
    pub fn healthy(&self) -> bool {
        matches!(self, ObjectState::Open)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ObjectState::Open | ObjectState::OpenFailed(_))
    }

    pub fn status(&self) -> Option<&Status> {
        match self {
            ObjectState::OpenFailed(status) | ObjectState::ClosedFailed(status) => Some(status),
            ObjectState::Open | ObjectState::Closed => None,
        }
    }

    /// Latches `status` unless a failure is latched already, and returns the
    /// one that sticks.
    pub fn fail(&mut self, status: Status) -> Status {
        match self {
            ObjectState::Open => {
                *self = ObjectState::OpenFailed(status.clone());
                status
            }
            ObjectState::Closed => {
                *self = ObjectState::ClosedFailed(status.clone());
                status
            }
            ObjectState::OpenFailed(first) | ObjectState::ClosedFailed(first) => first.clone(),
        }
    }

    /// Guards a data-moving operation: the latched status if failed, an error
    /// if closed.
    pub fn check_open(&self) -> StreamResult<()> {
        match self {
            ObjectState::Open => Ok(()),
            ObjectState::OpenFailed(status) | ObjectState::ClosedFailed(status) => {
                Err(status.clone())
            }
            ObjectState::Closed => Err(Status::failed_precondition("object is closed")),
        }
    }

    /// The latched status as a result, for reporting out of `close`.
    pub fn latched(&self) -> StreamResult<()> {
        match self.status() {
            Some(status) => Err(status.clone()),
            None => Ok(()),
        }
    }

    pub fn mark_closed(&mut self) {
        *self = match std::mem::take(self) {
            ObjectState::Open | ObjectState::Closed => ObjectState::Closed,
            ObjectState::OpenFailed(status) | ObjectState::ClosedFailed(status) => {
                ObjectState::ClosedFailed(status)
            }
        };
    }

    /// Clears a latched failure while still open. Used by decoders whose
    /// failures are recoverable.
    pub fn recover(&mut self) {
        if let ObjectState::OpenFailed(_) = self {
            *self = ObjectState::Open;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    #[test]
    fn first_failure_wins() {
        let mut state = ObjectState::default();
        assert!(state.healthy());

        let first = state.fail(Status::data_loss("first"));
        assert_eq!(first.message(), "first");

        let second = state.fail(Status::unknown("second"));
        assert_eq!(second.message(), "first");
        assert_eq!(second.code(), StatusCode::DataLoss);
        assert!(!state.healthy());
        assert!(state.is_open());
    }

    #[test]
    fn closing_preserves_the_failure() {
        let mut state = ObjectState::default();
        state.fail(Status::resource_exhausted("full"));
        state.mark_closed();
        assert!(!state.is_open());
        assert_eq!(state.status().map(Status::code), Some(StatusCode::ResourceExhausted));
        assert!(state.latched().is_err());
    }

    #[test]
    fn operations_on_closed_objects_are_rejected() {
        let mut state = ObjectState::default();
        state.mark_closed();
        let err = state.check_open().unwrap_err();
        assert_eq!(err.code(), StatusCode::FailedPrecondition);
        assert!(state.latched().is_ok());
    }
}
