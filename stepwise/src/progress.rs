//! Reporting of hyperparameter values to progress sinks.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// A sink for named scalar observations.
///
/// Any `FnMut(&str, f64)` closure is a [ProgressWriter].
pub trait ProgressWriter {
    fn write(&mut self, name: &str, value: f64);
}

impl<F: FnMut(&str, f64)> ProgressWriter for F {
    fn write(&mut self, name: &str, value: f64) {
        self(name, value)
    }
}

/// A writer shared between the training loop and one or more learners.
pub type SharedProgressWriter = Rc<RefCell<dyn ProgressWriter>>;

/// Forwards hyperparameter values to writers, but only when a value differs
/// from the one last reported under the same name.
#[derive(Default)]
pub struct TrainingParameterReporter {
    last_reported: HashMap<String, f64>,
    writers: Vec<SharedProgressWriter>,
}

impl std::fmt::Debug for TrainingParameterReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingParameterReporter")
            .field("last_reported", &self.last_reported)
            .field("writers", &self.writers.len())
            .finish()
    }
}

impl TrainingParameterReporter {
    pub fn add_writers(&mut self, writers: impl IntoIterator<Item = SharedProgressWriter>) {
        self.writers.extend(writers);
    }

    pub fn num_writers(&self) -> usize {
        self.writers.len()
    }

    /// Reports `value` as `"<name> [reference mbsize = <ref_mb_size>]"` if it
    /// changed since the last report under `name`.
    pub fn report(&mut self, name: &str, value: f64, ref_mb_size: u64) {
        if self.last_reported.get(name) == Some(&value) {
            return;
        }
        self.last_reported.insert(name.to_string(), value);
        let label = format!("{name} [reference mbsize = {ref_mb_size}]");
        for writer in self.writers.iter() {
            writer.borrow_mut().write(&label, value);
        }
    }
}
