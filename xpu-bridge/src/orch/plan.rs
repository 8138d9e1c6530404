//! Building blocks of coordinator procedures: the compensation stack that
//! unwinds a partially executed create plan, and the outcome recorder that
//! classifies a best-effort delete plan.

use crate::error::OpError;
use std::{future::Future, pin::Pin};

type CompensationFut = Pin<Box<dyn Future<Output = Result<(), OpError>> + Send>>;

/// Stack of compensations registered while a create plan makes progress.
/// On failure the stack is unwound in reverse registration order; each
/// compensation is best-effort and a failing one is logged without masking
/// the error that triggered the unwind.
#[derive(Default)]
pub struct CompensationStack {
    steps: Vec<(&'static str, CompensationFut)>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the compensation of a step that just completed.
    pub fn push<F>(&mut self, step: &'static str, compensation: F)
    where
        F: Future<Output = Result<(), OpError>> + Send + 'static,
    {
        self.steps.push((step, Box::pin(compensation)));
    }

    /// Run all registered compensations, most recent first.
    pub async fn unwind(mut self) {
        while let Some((step, compensation)) = self.steps.pop() {
            if let Err(error) = compensation.await {
                error!(%error, step, "compensation failed");
            } else {
                debug!(step, "compensation applied");
            }
        }
    }

    /// The plan committed; drop the compensations without running them.
    pub fn discard(mut self) {
        self.steps.clear();
    }
}

/// Outcomes of the independent steps of a delete plan.
pub struct DeleteReport {
    name: String,
    outcomes: Vec<(&'static str, Option<OpError>)>,
}

impl DeleteReport {
    pub fn new<T: Into<String>>(name: T) -> Self {
        Self {
            name: name.into(),
            outcomes: Vec::new(),
        }
    }

    /// Record one step's outcome; failures are logged as they happen.
    pub fn record(&mut self, step: &'static str, outcome: Result<(), OpError>) {
        match outcome {
            Ok(()) => self.outcomes.push((step, None)),
            Err(error) => {
                warn!(%error, step, name = %self.name, "delete step failed");
                self.outcomes.push((step, Some(error)));
            }
        }
    }

    /// Combine the step outcomes: every step succeeded is a success, every
    /// step failed means the device was not deleted at all, anything in
    /// between is a partial delete.
    pub fn classify(self) -> Result<(), OpError> {
        let failed: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|(step, error)| {
                error.as_ref().map(|error| format!("{}: {}", step, error))
            })
            .collect();
        if failed.is_empty() {
            return Ok(());
        }
        let detail = failed.join("; ");
        if failed.len() == self.outcomes.len() {
            Err(OpError::DeviceNotDeleted {
                name: self.name,
                detail,
            })
        } else {
            Err(OpError::DevicePartiallyDeleted {
                name: self.name,
                detail,
            })
        }
    }
}
