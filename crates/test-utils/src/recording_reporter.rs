use std::fmt;
use std::sync::Mutex;

use devwatch::report::{MessageDescriptor, Reporter};

/// A reporter that records `(id, formatted message)` for every report.
#[derive(Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(&'static str, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.messages.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    pub fn count(&self, descriptor: &MessageDescriptor) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == descriptor.id)
            .count()
    }

    pub fn contains(&self, descriptor: &MessageDescriptor) -> bool {
        self.count(descriptor) > 0
    }

    /// Formatted text of every report of `descriptor`.
    pub fn texts(&self, descriptor: &MessageDescriptor) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == descriptor.id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, descriptor: &MessageDescriptor, args: &[&dyn fmt::Display]) {
        let text = descriptor.message(args);
        tracing::debug!(id = descriptor.id, "{text}");
        self.messages.lock().unwrap().push((descriptor.id, text));
    }
}
