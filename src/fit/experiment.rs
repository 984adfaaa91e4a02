//! Lifecycle shared by every calibration experiment.
//!
//! ```text
//! Unconfigured --bind--> DataBound --run--> Fitting --> Fitted
//!                             ^                   \--> Failed
//!                             '---- bind (again) ------'
//! ```
//!
//! Binding copies the channel handles an experiment needs out of a
//! [`ChannelStore`] snapshot, so later changes to the caller's store are never
//! observed by a running fit.

use serde::{Deserialize, Serialize};

use crate::error::CalError;
use crate::store::ChannelStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentState {
    #[default]
    Unconfigured,
    DataBound,
    Fitting,
    Fitted,
    Failed,
}

/// Tracks and enforces state transitions for one experiment.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: ExperimentState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    /// Move to `DataBound` with the validated inputs, or to `Failed` with the
    /// validation error. Allowed from every state except `Fitting`.
    pub fn bind_checked<T>(&mut self, checked: Result<T, CalError>) -> Result<T, CalError> {
        if self.state == ExperimentState::Fitting {
            return Err(CalError::InvalidState("cannot rebind data while a fit is running".to_string()));
        }
        match checked {
            Ok(inputs) => {
                self.state = ExperimentState::DataBound;
                Ok(inputs)
            }
            Err(err) => {
                tracing::warn!(error = %err, "experiment inputs rejected");
                self.state = ExperimentState::Failed;
                Err(err)
            }
        }
    }

    /// Move `DataBound -> Fitting`.
    pub fn begin_run(&mut self) -> Result<(), CalError> {
        if self.state != ExperimentState::DataBound {
            return Err(CalError::InvalidState(format!(
                "run requires bound data, experiment is {:?}",
                self.state
            )));
        }
        self.state = ExperimentState::Fitting;
        Ok(())
    }

    /// Record the outcome of a run and pass it through.
    pub fn finish<T>(&mut self, result: Result<T, CalError>) -> Result<T, CalError> {
        self.state = match &result {
            Ok(_) => ExperimentState::Fitted,
            Err(err) => {
                tracing::warn!(error = %err, "experiment failed");
                ExperimentState::Failed
            }
        };
        result
    }
}

/// A calibration procedure that reads channels from a store and fits a model.
pub trait Experiment {
    /// Serializable result of a successful run.
    type Summary;

    fn name(&self) -> &'static str;

    /// Whether `store` holds every channel and response this experiment reads.
    fn has_enough_data(&self, store: &ChannelStore) -> bool;

    /// Snapshot the needed data. Fails with `InsufficientData` when
    /// [`has_enough_data`](Self::has_enough_data) is false; any rejected
    /// input leaves the experiment `Failed` with no outcome.
    fn bind(&mut self, store: &ChannelStore) -> Result<(), CalError>;

    /// Fit the bound data. Only valid from `DataBound`.
    fn run(&mut self) -> Result<Self::Summary, CalError>;

    fn state(&self) -> ExperimentState;

    fn run_experiment_on_data(&mut self, store: &ChannelStore) -> Result<Self::Summary, CalError> {
        self.bind(store)?;
        self.run()
    }
}

/// Shared check used by `bind` implementations.
pub(crate) fn require_data<E: Experiment + ?Sized>(experiment: &E, store: &ChannelStore) -> Result<(), CalError> {
    if experiment.has_enough_data(store) {
        Ok(())
    } else {
        Err(CalError::InsufficientData(format!(
            "{} experiment is missing channels or responses",
            experiment.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_bound_data() {
        let mut life = Lifecycle::new();
        assert!(matches!(life.begin_run(), Err(CalError::InvalidState(_))));

        life.bind_checked(Ok(())).unwrap();
        life.begin_run().unwrap();
        assert_eq!(life.state(), ExperimentState::Fitting);
        assert!(matches!(life.bind_checked(Ok(())), Err(CalError::InvalidState(_))));

        let out: Result<u8, CalError> = life.finish(Ok(1));
        assert_eq!(out.unwrap(), 1);
        assert_eq!(life.state(), ExperimentState::Fitted);
        assert!(matches!(life.begin_run(), Err(CalError::InvalidState(_))));
    }

    #[test]
    fn failure_is_recorded() {
        let mut life = Lifecycle::new();
        life.bind_checked(Ok(())).unwrap();
        life.begin_run().unwrap();
        let out: Result<(), CalError> = life.finish(Err(CalError::NumericalFailure("x".into())));
        assert!(out.is_err());
        assert_eq!(life.state(), ExperimentState::Failed);
        life.bind_checked(Ok(())).unwrap();
        assert_eq!(life.state(), ExperimentState::DataBound);
    }

    #[test]
    fn rejected_inputs_fail_the_lifecycle() {
        let mut life = Lifecycle::new();
        let bound: Result<u8, CalError> = life.bind_checked(Err(CalError::InsufficientData("x".into())));
        assert!(matches!(bound, Err(CalError::InsufficientData(_))));
        assert_eq!(life.state(), ExperimentState::Failed);
        assert!(matches!(life.begin_run(), Err(CalError::InvalidState(_))));

        assert_eq!(life.bind_checked(Ok(7)).unwrap(), 7);
        assert_eq!(life.state(), ExperimentState::DataBound);
    }
}
