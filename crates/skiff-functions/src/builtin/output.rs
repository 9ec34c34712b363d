//! Output function

use crate::context::{FuncContext, FuncOutput};
use crate::error::{FuncError, Result};
use crate::params::TemplateParams;
use crate::traits::Func;
use async_trait::async_trait;
use skiff_crd::{Value, ValueMap};

/// Publishes its `values` mapping as the phase output
///
/// Later phases and output artifacts see the entries under
/// `Phases.<phase>.Output`.
pub struct OutputFunc;

#[async_trait]
impl Func for OutputFunc {
    fn name(&self) -> &str {
        "Output"
    }

    fn description(&self) -> &str {
        "Copy the values mapping into the phase output"
    }

    fn required_args(&self) -> Vec<&str> {
        vec!["values"]
    }

    fn arguments(&self) -> Vec<&str> {
        vec!["values"]
    }

    async fn exec(
        &self,
        _ctx: &FuncContext,
        _params: &TemplateParams,
        args: &ValueMap,
    ) -> Result<FuncOutput> {
        match args.get("values") {
            Some(Value::Mapping(values)) => Ok(FuncOutput::from(values.clone())),
            Some(other) => Err(FuncError::InvalidArgument {
                arg: "values".to_string(),
                message: format!("expected mapping, got {}", other.type_name()),
            }),
            None => Err(FuncError::MissingArgument {
                func: self.name().to_string(),
                arg: "values".to_string(),
            }),
        }
    }
}
