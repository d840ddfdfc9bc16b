//! Runbook YAML parsing, validation, and template resolution (spec §4.1).

pub mod duration;
pub mod grammar;
pub mod parser;
pub mod template;
pub mod validated;

pub use duration::{parse_duration_secs, parse_offset};
pub use parser::{parse, RunbookInvalid};
pub use template::{resolve, resolve_init_params, TemplateResolutionError};
pub use validated::{
    BatchTimeMode, DataSourceDef, DataSourceType, MultiValuedColumn, MultiValuedFormat, PhaseDef,
    PollDef, RetryDef, RunbookDef, StepDef,
};
