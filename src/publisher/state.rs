/// Publisher lifecycle. `Terminated` is the only terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Connecting,
    Publishing,
    Reconnecting,
    StoppingManual,
    StoppingFailed,
    Terminated,
}

impl PublisherState {
    pub fn is_terminal(&self) -> bool {
        *self == PublisherState::Terminated
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            PublisherState::Connecting | PublisherState::Publishing | PublisherState::Reconnecting
        )
    }
}
