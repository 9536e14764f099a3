//! Declarative pipeline description construction
//!
//! A description is a DAG of primitive steps compiled in declaration order:
//! the first step's `inputs` argument is bound to the pipeline input symbol,
//! every subsequent step chains off the previous step's first output, and
//! the pipeline output is the last step's first output.

mod steps;

pub use steps::{
    dataset_to_dataframe_step, remove_columns_step, row_filter_step, update_semantic_types_step,
    user_dataset_pipeline, ColumnUpdate,
};

use std::collections::{BTreeMap, HashMap};

use distil_common::{Error, Result};

use crate::api::{
    ContainerArgument, HyperparameterArgument, PipelineDescription, PipelineDescriptionOutput,
    PipelineDescriptionStep, Primitive, StepOutput, Value,
};

const STEP_INPUTS_KEY: &str = "inputs";
const PIPELINE_INPUTS_KEY: &str = "inputs";

/// One pipeline step under construction: a primitive reference, upstream
/// argument wiring, loosely-typed hyperparameters and the ordered output
/// methods.
#[derive(Debug, Clone)]
pub struct StepData {
    pub primitive: Primitive,
    pub arguments: BTreeMap<String, String>,
    pub hyperparameters: BTreeMap<String, serde_json::Value>,
    pub output_methods: Vec<String>,
}

impl StepData {
    pub fn new(primitive: Primitive, output_methods: Vec<String>) -> Self {
        StepData {
            primitive,
            arguments: BTreeMap::new(),
            hyperparameters: BTreeMap::new(),
            output_methods,
        }
    }

    pub fn with_hyperparameters(
        primitive: Primitive,
        output_methods: Vec<String>,
        hyperparameters: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        StepData {
            primitive,
            arguments: BTreeMap::new(),
            hyperparameters,
            output_methods,
        }
    }

    /// Compiles the step, constraining hyperparameter values to the closed
    /// set {int64, bool, string, list-of-string (serialised as JSON)}.
    fn build(&self) -> Result<PipelineDescriptionStep> {
        let mut arguments = HashMap::new();
        for (name, upstream) in &self.arguments {
            arguments.insert(
                name.clone(),
                ContainerArgument {
                    data: upstream.clone(),
                },
            );
        }

        let mut hyperparams = HashMap::new();
        for (name, value) in &self.hyperparameters {
            hyperparams.insert(
                name.clone(),
                HyperparameterArgument {
                    data: compile_hyperparameter(name, value)?,
                },
            );
        }

        let outputs = self
            .output_methods
            .iter()
            .map(|m| StepOutput { id: m.clone() })
            .collect();

        Ok(PipelineDescriptionStep {
            primitive: self.primitive.clone(),
            arguments,
            hyperparams,
            outputs,
        })
    }
}

fn compile_hyperparameter(name: &str, value: &serde_json::Value) -> Result<Value> {
    match value {
        serde_json::Value::Number(n) if n.is_i64() => Ok(Value::Int64(n.as_i64().unwrap())),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Array(items) if items.iter().all(|i| i.is_string()) => {
            // list-of-string travels as its JSON serialisation
            Ok(Value::String(serde_json::to_string(items)?))
        }
        other => Err(Error::UnsupportedHyperparameterType {
            name: name.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Assembles steps into a [`PipelineDescription`].
///
/// ```ignore
/// let description = DescriptionBuilder::new("name", "description")
///     .add(step_0)
///     .add(step_1)
///     .compile()?;
/// ```
pub struct DescriptionBuilder {
    name: String,
    description: String,
    steps: Vec<StepData>,
}

impl DescriptionBuilder {
    pub fn new(name: &str, description: &str) -> Self {
        DescriptionBuilder {
            name: name.to_string(),
            description: description.to_string(),
            steps: Vec::new(),
        }
    }

    pub fn add(mut self, step: StepData) -> Self {
        self.steps.push(step);
        self
    }

    /// Compiles the pipeline, wiring step inputs in declaration order.
    pub fn compile(mut self) -> Result<PipelineDescription> {
        if self.steps.is_empty() {
            return Err(Error::InvalidRequest(
                "pipeline requires at least 1 step".into(),
            ));
        }

        for (number, step) in self.steps.iter().enumerate() {
            if step.output_methods.is_empty() {
                return Err(Error::InvalidRequest(format!(
                    "expected at least 1 output for step {number}"
                )));
            }
            if step.arguments.contains_key(STEP_INPUTS_KEY) {
                return Err(Error::ReservedArgument(STEP_INPUTS_KEY.into()));
            }
        }

        // first step reads the pipeline input, each subsequent step chains
        // off the previous step's first output
        self.steps[0]
            .arguments
            .insert(STEP_INPUTS_KEY.into(), format!("{PIPELINE_INPUTS_KEY}.0"));
        for i in 1..self.steps.len() {
            let upstream = format!("steps.{}.{}", i - 1, self.steps[i - 1].output_methods[0]);
            self.steps[i].arguments.insert(STEP_INPUTS_KEY.into(), upstream);
        }

        let last = self.steps.len() - 1;
        let outputs = vec![PipelineDescriptionOutput {
            data: format!("steps.{}.{}", last, self.steps[last].output_methods[0]),
        }];

        let mut compiled = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            compiled.push(step.build()?);
        }

        Ok(PipelineDescription {
            name: self.name,
            description: self.description,
            steps: compiled,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primitive(name: &str) -> Primitive {
        Primitive {
            id: format!("test-{name}"),
            version: "0.1.0".into(),
            name: name.into(),
            path: format!("primitives.test.{name}"),
        }
    }

    #[test]
    fn wires_steps_in_declaration_order() {
        let description = DescriptionBuilder::new("p", "test pipeline")
            .add(StepData::new(primitive("a"), vec!["produce".into()]))
            .add(StepData::new(primitive("b"), vec!["produce".into()]))
            .add(StepData::new(primitive("c"), vec!["produce".into()]))
            .compile()
            .unwrap();

        assert_eq!(description.steps[0].arguments["inputs"].data, "inputs.0");
        assert_eq!(description.steps[1].arguments["inputs"].data, "steps.0.produce");
        assert_eq!(description.steps[2].arguments["inputs"].data, "steps.1.produce");
        assert_eq!(description.outputs[0].data, "steps.2.produce");
    }

    #[test]
    fn caller_supplied_inputs_argument_is_reserved() {
        let mut step = StepData::new(primitive("a"), vec!["produce".into()]);
        step.arguments.insert("inputs".into(), "steps.9.produce".into());
        let err = DescriptionBuilder::new("p", "test")
            .add(step)
            .compile()
            .unwrap_err();
        assert!(matches!(err, Error::ReservedArgument(_)));
    }

    #[test]
    fn float_hyperparameter_is_rejected() {
        let mut params = BTreeMap::new();
        params.insert("threshold".to_string(), serde_json::json!(0.5));
        let step = StepData::with_hyperparameters(primitive("a"), vec!["produce".into()], params);
        let err = DescriptionBuilder::new("p", "test")
            .add(step)
            .compile()
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedHyperparameterType { .. }));
    }

    #[test]
    fn string_list_hyperparameter_serialises_as_json() {
        let mut params = BTreeMap::new();
        params.insert("columns".to_string(), serde_json::json!(["a", "b"]));
        let step = StepData::with_hyperparameters(primitive("a"), vec!["produce".into()], params);
        let description = DescriptionBuilder::new("p", "test").add(step).compile().unwrap();
        assert_eq!(
            description.steps[0].hyperparams["columns"].data,
            Value::String(r#"["a","b"]"#.into())
        );
    }

    #[test]
    fn int_and_bool_hyperparameters_compile() {
        let mut params = BTreeMap::new();
        params.insert("limit".to_string(), serde_json::json!(50));
        params.insert("strict".to_string(), serde_json::json!(true));
        let step = StepData::with_hyperparameters(primitive("a"), vec!["produce".into()], params);
        let description = DescriptionBuilder::new("p", "test").add(step).compile().unwrap();
        assert_eq!(description.steps[0].hyperparams["limit"].data, Value::Int64(50));
        assert_eq!(description.steps[0].hyperparams["strict"].data, Value::Bool(true));
    }

    #[test]
    fn empty_pipeline_fails_compile() {
        assert!(DescriptionBuilder::new("p", "test").compile().is_err());
    }
}
