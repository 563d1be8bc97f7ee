//! Tracking state machine.

/// State of the tracking front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// Bootstrap has not produced an initial map yet.
    #[default]
    NotInitialized,
    /// Tracking successfully.
    Ok,
    /// Coarse tracking confidence collapsed. Terminal for the session:
    /// no further frame touches the window or the history.
    Lost,
}
