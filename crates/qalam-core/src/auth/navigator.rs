use tracing::warn;

/// Sends the user back to sign in once their session cannot be recovered.
///
/// Called at most once per failed refresh flight, after the token store has
/// been purged.
pub trait AuthNavigator: Send + Sync {
    fn navigate(&self, target: &str);
}

/// Navigator for headless use: records the redirect in the log and does
/// nothing else.
#[derive(Debug, Default)]
pub struct LogNavigator;

impl AuthNavigator for LogNavigator {
    fn navigate(&self, target: &str) {
        warn!(target_path = target, "Session expired, re-authentication required");
    }
}

/// Keeps every redirect it is asked for.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingNavigator {
    visits: parking_lot::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingNavigator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn visits(&self) -> Vec<String> {
        self.visits.lock().clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.visits.lock().len()
    }
}

#[cfg(test)]
impl AuthNavigator for RecordingNavigator {
    fn navigate(&self, target: &str) {
        self.visits.lock().push(target.to_string());
    }
}
