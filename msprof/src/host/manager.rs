//! Mode selection and lifecycle
//!
//! [`MsprofManager`] picks the one [`RunningMode`] an invocation runs, by
//! priority: application, system (`--sys-devices` / `--host-sys`), parse,
//! query, export.

use log::info;
use std::collections::HashSet;

use super::cancel::CancelToken;
use super::modes::{AppMode, ExportMode, ParseMode, QueryMode, SystemMode};
use super::params::{ArgKind, ProfileParams};
use super::running_mode::RunningMode;
use crate::domain::ModeError;

pub struct MsprofManager {
    mode: Box<dyn RunningMode>,
}

impl MsprofManager {
    /// Select the running mode for `params`
    ///
    /// # Errors
    /// `NoModeSelected` if no mode switch is set
    pub fn generate_running_mode(
        params: ProfileParams,
        used: HashSet<ArgKind>,
        cancel: CancelToken,
    ) -> Result<Box<dyn RunningMode>, ModeError> {
        let mode: Box<dyn RunningMode> = if params.has_app() {
            Box::new(AppMode::new(params, used, cancel))
        } else if params.has_devices() || params.has_host_sys() {
            Box::new(SystemMode::new(params, used, cancel))
        } else if params.parse {
            Box::new(ParseMode::new(params, used, cancel))
        } else if params.query {
            Box::new(QueryMode::new(params, used, cancel))
        } else if params.export {
            Box::new(ExportMode::new(params, used, cancel))
        } else {
            return Err(ModeError::NoModeSelected);
        };
        Ok(mode)
    }

    /// Select the mode and check its parameter contract
    ///
    /// Nothing is spawned or created on disk before this succeeds.
    ///
    /// # Errors
    /// `NoModeSelected` or the mode's parameter check error
    pub fn init(
        params: ProfileParams,
        used: HashSet<ArgKind>,
        cancel: CancelToken,
    ) -> Result<Self, ModeError> {
        let mode = Self::generate_running_mode(params, used, cancel)?;
        Self::with_mode(mode)
    }

    /// Take an already constructed mode and check its parameter contract
    ///
    /// # Errors
    /// The mode's parameter check error
    pub fn with_mode(mut mode: Box<dyn RunningMode>) -> Result<Self, ModeError> {
        info!("Running mode: {}", mode.name());
        mode.mode_params_check()?;
        Ok(Self { mode })
    }

    #[must_use]
    pub fn mode_name(&self) -> &'static str {
        self.mode.name()
    }

    /// Run the selected mode; on failure everything it started is stopped
    ///
    /// # Errors
    /// The mode's error
    pub fn run_mode_tasks(&mut self) -> Result<(), ModeError> {
        let result = self.mode.run_mode_tasks();
        if result.is_err() {
            self.mode.stop_running_tasks();
        }
        result
    }

    pub fn stop_running_tasks(&mut self) {
        self.mode.stop_running_tasks();
    }
}
