use std::collections::HashSet;

use crate::domain::ModeError;
use crate::host::analysis::AnalysisStep;
use crate::host::cancel::CancelToken;
use crate::host::params::{ArgKind, ProfileParams};
use crate::host::running_mode::{ModeBase, ParamContract, RunningMode};

/// List the jobs found in a result directory
pub struct QueryMode {
    base: ModeBase,
}

impl QueryMode {
    #[must_use]
    pub fn new(params: ProfileParams, used: HashSet<ArgKind>, cancel: CancelToken) -> Self {
        let contract = ParamContract::new(
            &[ArgKind::Application, ArgKind::SysDevices, ArgKind::HostSys, ArgKind::Parse, ArgKind::Export],
            &[ArgKind::Output, ArgKind::Query],
            &[ArgKind::PythonPath],
        );
        Self { base: ModeBase::new("query", params, used, contract, cancel) }
    }
}

impl RunningMode for QueryMode {
    fn name(&self) -> &'static str {
        self.base.name
    }

    fn mode_params_check(&mut self) -> Result<(), ModeError> {
        self.base.check_params()
    }

    fn run_mode_tasks(&mut self) -> Result<(), ModeError> {
        super::run_single_step(&mut self.base, &AnalysisStep::Query)
    }

    fn stop_running_tasks(&mut self) {
        self.base.stop_running_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract() {
        let used = [ArgKind::Output, ArgKind::Query, ArgKind::Export].into_iter().collect();
        let mut mode = QueryMode::new(ProfileParams::default(), used, CancelToken::new());
        assert!(matches!(mode.mode_params_check(), Err(ModeError::ForbiddenParam { arg: "--export", .. })));

        let used = [ArgKind::Output, ArgKind::Query].into_iter().collect();
        let mut mode = QueryMode::new(ProfileParams::default(), used, CancelToken::new());
        assert!(mode.mode_params_check().is_ok());
    }
}
