//! Primitive step constructors and the user-dataset pipeline
//!
//! The user-dataset pipeline reconciles the runtime's view of a dataset
//! with the analyst's choices: semantic type reassignments, deselected
//! columns, and row-level filters, all applied ahead of modelling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use distil_common::model::filter::Filter;
use distil_common::model::types::ROW_INDEX_KEY;
use distil_common::model::variable::Variable;
use distil_common::Result;

use crate::api::{PipelineDescription, Primitive};

use super::{DescriptionBuilder, StepData};

/// A column name paired with a semantic type to add or remove.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnUpdate {
    #[serde(rename = "col_name")]
    pub name: String,
    #[serde(rename = "semantic_type")]
    pub semantic_type: String,
}

/// Transforms the input dataset into a dataframe; always the first step.
pub fn dataset_to_dataframe_step() -> StepData {
    StepData::new(
        Primitive {
            id: "4b42ce1e-9b98-4a25-b68e-fad13311eb65".into(),
            version: "0.3.0".into(),
            name: "Dataset to DataFrame converter".into(),
            path: "primitives.data.DatasetToDataFrame".into(),
        },
        vec!["produce".into()],
    )
}

/// Adds and removes semantic type annotations on dataframe columns.
pub fn update_semantic_types_step(
    add: &[ColumnUpdate],
    remove: &[ColumnUpdate],
) -> Result<StepData> {
    let mut hyperparameters = BTreeMap::new();
    hyperparameters.insert(
        "add".to_string(),
        serde_json::Value::String(serde_json::to_string(add)?),
    );
    hyperparameters.insert(
        "remove".to_string(),
        serde_json::Value::String(serde_json::to_string(remove)?),
    );
    Ok(StepData::with_hyperparameters(
        Primitive {
            id: "98c79128-555a-4a6b-85fb-d4f4064c94ab".into(),
            version: "0.2.0".into(),
            name: "Semantic type updater".into(),
            path: "primitives.data.UpdateSemanticTypes".into(),
        },
        vec!["produce".into()],
        hyperparameters,
    ))
}

/// Removes named columns from a dataframe; the match is case insensitive.
pub fn remove_columns_step(columns: &[String]) -> Result<StepData> {
    let mut hyperparameters = BTreeMap::new();
    hyperparameters.insert(
        "columns".to_string(),
        serde_json::Value::Array(
            columns
                .iter()
                .map(|c| serde_json::Value::String(c.clone()))
                .collect(),
        ),
    );
    Ok(StepData::with_hyperparameters(
        Primitive {
            id: "2eeff053-395a-497d-88db-7374c27812e6".into(),
            version: "0.2.0".into(),
            name: "Column remover".into(),
            path: "primitives.data.RemoveColumns".into(),
        },
        vec!["produce".into()],
        hyperparameters,
    ))
}

/// Applies row-level filters to a dataframe. Each filter travels as its
/// JSON serialisation in a list-of-string hyperparameter.
pub fn row_filter_step(filters: &[Filter]) -> Result<StepData> {
    let mut serialised = Vec::with_capacity(filters.len());
    for filter in filters {
        serialised.push(serde_json::Value::String(serde_json::to_string(filter)?));
    }
    let mut hyperparameters = BTreeMap::new();
    hyperparameters.insert("filters".to_string(), serde_json::Value::Array(serialised));
    Ok(StepData::with_hyperparameters(
        Primitive {
            id: "8b1c1140-8c21-4f41-aeca-662b7d35aa29".into(),
            version: "0.1.0".into(),
            name: "Row filter".into(),
            path: "primitives.data.FilterRows".into(),
        },
        vec!["produce".into()],
        hyperparameters,
    ))
}

/// Synthesises the preprocessing pipeline enforcing the analyst's feature
/// selection, type reassignments and filters on the runtime side. The
/// engine always persists the full column set; deselected columns are
/// marked for removal here instead.
pub fn user_dataset_pipeline(
    dataset: &str,
    all_features: &[Variable],
    target: &str,
    selected: &[String],
    filters: &[Filter],
) -> Result<PipelineDescription> {
    let id = Uuid::new_v4();
    let name = format!("preprocessing-{dataset}-{id}");
    let description = format!(
        "Preprocessing pipeline capturing user feature selection and type information. \
         Dataset: `{dataset}` ID: `{id}`"
    );

    let mut builder =
        DescriptionBuilder::new(&name, &description).add(dataset_to_dataframe_step());

    // reconcile reassigned semantic types
    let mut add = Vec::new();
    let mut remove = Vec::new();
    for variable in all_features {
        if variable.ty != variable.original_type {
            add.push(ColumnUpdate {
                name: variable.key.clone(),
                semantic_type: variable.ty.clone(),
            });
            remove.push(ColumnUpdate {
                name: variable.key.clone(),
                semantic_type: variable.original_type.clone(),
            });
        }
    }
    if !add.is_empty() {
        builder = builder.add(update_semantic_types_step(&add, &remove)?);
    }

    // mark deselected columns for removal; the index and target always stay
    let removals: Vec<String> = all_features
        .iter()
        .filter(|v| {
            v.key != target
                && v.key != ROW_INDEX_KEY
                && !selected.iter().any(|s| s == &v.key)
        })
        .map(|v| v.key.clone())
        .collect();
    if !removals.is_empty() {
        builder = builder.add(remove_columns_step(&removals)?);
    }

    if !filters.is_empty() {
        builder = builder.add(row_filter_step(filters)?);
    }

    builder.compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use distil_common::model::filter::FilterMode;
    use distil_common::model::types::{CATEGORICAL_TYPE, FLOAT_TYPE, INTEGER_TYPE, TEXT_TYPE};
    use distil_common::model::variable::VariableRole;

    fn var(key: &str, ty: &str, original: &str) -> Variable {
        Variable {
            key: key.to_string(),
            display_label: key.to_string(),
            ty: ty.to_string(),
            original_type: original.to_string(),
            importance: 0.0,
            role: VariableRole::Data,
        }
    }

    #[test]
    fn pipeline_reflects_type_reassignment_and_deselection() {
        let features = vec![
            var("alpha", CATEGORICAL_TYPE, TEXT_TYPE),
            var("bravo", FLOAT_TYPE, FLOAT_TYPE),
            var("charlie", FLOAT_TYPE, FLOAT_TYPE),
            var(ROW_INDEX_KEY, INTEGER_TYPE, INTEGER_TYPE),
        ];
        let selected = vec!["alpha".to_string(), "bravo".to_string()];
        let description =
            user_dataset_pipeline("sales", &features, "bravo", &selected, &[]).unwrap();

        // dataframe conversion, type update, column removal
        assert_eq!(description.steps.len(), 3);
        let update = &description.steps[1];
        assert!(update.hyperparams["add"]
            .data
            .eq(&crate::api::Value::String(
                r#"[{"col_name":"alpha","semantic_type":"categorical"}]"#.into()
            )));
        let removal = &description.steps[2];
        assert_eq!(
            removal.hyperparams["columns"].data,
            crate::api::Value::String(r#"["charlie"]"#.into())
        );
    }

    #[test]
    fn pipeline_with_no_changes_is_single_step() {
        let features = vec![var("alpha", FLOAT_TYPE, FLOAT_TYPE)];
        let description = user_dataset_pipeline(
            "sales",
            &features,
            "alpha",
            &["alpha".to_string()],
            &[],
        )
        .unwrap();
        assert_eq!(description.steps.len(), 1);
        assert_eq!(description.outputs[0].data, "steps.0.produce");
    }

    #[test]
    fn filters_append_a_row_filter_step() {
        let features = vec![var("alpha", FLOAT_TYPE, FLOAT_TYPE)];
        let filters = vec![Filter::Numerical {
            key: "alpha".into(),
            mode: FilterMode::Include,
            min: 0.0,
            max: 1.0,
        }];
        let description = user_dataset_pipeline(
            "sales",
            &features,
            "alpha",
            &["alpha".to_string()],
            &filters,
        )
        .unwrap();
        assert_eq!(description.steps.len(), 2);
        assert_eq!(description.steps[1].primitive.name, "Row filter");
    }
}
