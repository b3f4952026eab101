use std::collections::HashSet;

use crate::domain::ModeError;
use crate::host::analysis::AnalysisStep;
use crate::host::cancel::CancelToken;
use crate::host::params::{ArgKind, ProfileParams};
use crate::host::running_mode::{ModeBase, ParamContract, RunningMode};

/// Parse collected raw data into the analysis database
pub struct ParseMode {
    base: ModeBase,
}

impl ParseMode {
    #[must_use]
    pub fn new(params: ProfileParams, used: HashSet<ArgKind>, cancel: CancelToken) -> Self {
        let contract = ParamContract::new(
            &[ArgKind::Application, ArgKind::SysDevices, ArgKind::HostSys, ArgKind::Query, ArgKind::Export],
            &[ArgKind::Output, ArgKind::Parse],
            &[ArgKind::PythonPath],
        );
        Self { base: ModeBase::new("parse", params, used, contract, cancel) }
    }
}

impl RunningMode for ParseMode {
    fn name(&self) -> &'static str {
        self.base.name
    }

    fn mode_params_check(&mut self) -> Result<(), ModeError> {
        self.base.check_params()
    }

    fn run_mode_tasks(&mut self) -> Result<(), ModeError> {
        super::run_single_step(&mut self.base, &AnalysisStep::Import)
    }

    fn stop_running_tasks(&mut self) {
        self.base.stop_running_tasks();
    }
}
