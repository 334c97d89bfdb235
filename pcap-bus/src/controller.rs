use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionState {
    /// Nothing received yet
    Pending,
    Running,
    /// Intake ended, waiting for open work to finish
    Draining,
    Done,
}

/// Lifecycle of one conversion. Every transition is an atomic check-and-set on a watch
/// channel, so `complete` succeeds for exactly one caller.
#[derive(Debug)]
pub struct ConversionController {
    state: watch::Sender<ConversionState>,
}

impl ConversionController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConversionState::Pending);
        Self { state }
    }

    pub fn state(&self) -> ConversionState {
        *self.state.borrow()
    }

    /// `Pending -> Running`. No-op in any other state.
    pub fn start(&self) -> bool {
        self.transition(|s| match s {
            ConversionState::Pending => Some(ConversionState::Running),
            _ => None,
        })
    }

    /// Intake signalled end-of-stream.
    pub fn drain(&self) -> bool {
        self.transition(|s| match s {
            ConversionState::Pending | ConversionState::Running => {
                Some(ConversionState::Draining)
            }
            _ => None,
        })
    }

    /// `Draining -> Done`. Returns `true` only for the call that performed the transition.
    pub fn complete(&self) -> bool {
        self.transition(|s| match s {
            ConversionState::Draining => Some(ConversionState::Done),
            _ => None,
        })
    }

    pub fn is_done(&self) -> bool {
        self.state() == ConversionState::Done
    }

    /// Resolves once the conversion reached `Done`.
    pub async fn wait_done(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|s| *s == ConversionState::Done).await;
    }

    fn transition(&self, next: impl FnOnce(ConversionState) -> Option<ConversionState>) -> bool {
        self.state.send_if_modified(|state| match next(*state) {
            Some(new_state) => {
                log::debug!("conversion state {:?} -> {:?}", state, new_state);
                *state = new_state;
                true
            }
            None => false,
        })
    }
}

impl Default for ConversionController {
    fn default() -> Self {
        Self::new()
    }
}
