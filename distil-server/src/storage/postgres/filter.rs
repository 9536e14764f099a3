//! Filter compilation to parameterised SQL predicates
//!
//! Every clause is emitted with `$n` placeholders against a shared
//! parameter list, so fragments compose into larger statements without
//! renumbering. Include and exclude compile the same shape with opposite
//! operators; numeric comparisons cast through double precision to
//! tolerate text-stored numbers.

use distil_common::model::filter::{
    is_result_key, split_result_filters, strip_key_suffix, to_column_selection, Filter, FilterMode,
    FilterParams,
};
use distil_common::model::histogram::{CORRECT_CATEGORY, INCORRECT_CATEGORY};
use distil_common::model::types::ROW_INDEX_KEY;
use distil_common::model::variable::Variable;
use distil_common::{Error, Result};

/// A value bound into a compiled query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Float(f64),
    Int(i64),
}

/// Accumulates predicate fragments and their bound parameters.
#[derive(Debug, Default)]
pub struct WhereBuilder {
    pub wheres: Vec<String>,
    pub params: Vec<SqlParam>,
}

impl WhereBuilder {
    pub fn new() -> Self {
        WhereBuilder::default()
    }

    fn push_param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    /// Conjunction of all accumulated fragments, or `None` when empty.
    pub fn conjunction(&self) -> Option<String> {
        if self.wheres.is_empty() {
            None
        } else {
            Some(self.wheres.join(" AND "))
        }
    }
}

pub(crate) fn quote_column(key: &str) -> String {
    format!("\"{}\"", key.replace('"', "\"\""))
}

/// Result-column filters address the joined prediction value; everything
/// else addresses the named data column.
fn format_filter_key(key: &str) -> String {
    if is_result_key(key) {
        "result.value".to_string()
    } else {
        quote_column(key)
    }
}

fn numeric_cast(expr: &str) -> String {
    format!("cast({expr} as double precision)")
}

/// Derived residual expression for a numeric target.
pub(crate) fn error_expr(target: &str) -> String {
    format!(
        "(cast(result.value as double precision) - cast(data.{} as double precision))",
        quote_column(target)
    )
}

/// Appends one filter's predicate to the builder.
pub fn build_filter(builder: &mut WhereBuilder, filter: &Filter) {
    let include = filter.mode() == FilterMode::Include;
    match filter {
        Filter::Numerical { key, min, max, .. } => {
            let name = numeric_cast(&format_filter_key(key));
            let p_min = builder.push_param(SqlParam::Float(*min));
            let p_max = builder.push_param(SqlParam::Float(*max));
            let clause = if include {
                format!("{name} >= {p_min} AND {name} <= {p_max}")
            } else {
                format!("({name} < {p_min} OR {name} > {p_max})")
            };
            builder.wheres.push(clause);
        }
        Filter::Bivariate {
            key,
            min_x,
            max_x,
            min_y,
            max_y,
            ..
        } => {
            // composite `x:y` keys address two columns; a plain key
            // addresses an array-typed [lat, lon] column
            let (x_expr, y_expr) = match key.split_once(':') {
                Some((x, y)) => (
                    numeric_cast(&quote_column(x)),
                    numeric_cast(&quote_column(y)),
                ),
                None => {
                    let col = quote_column(key);
                    (format!("{col}[2]"), format!("{col}[1]"))
                }
            };
            let p_min_x = builder.push_param(SqlParam::Float(*min_x));
            let p_max_x = builder.push_param(SqlParam::Float(*max_x));
            let p_min_y = builder.push_param(SqlParam::Float(*min_y));
            let p_max_y = builder.push_param(SqlParam::Float(*max_y));
            let clause = if include {
                format!(
                    "{x_expr} >= {p_min_x} AND {x_expr} <= {p_max_x} AND \
                     {y_expr} >= {p_min_y} AND {y_expr} <= {p_max_y}"
                )
            } else {
                format!(
                    "(({x_expr} < {p_min_x} OR {x_expr} > {p_max_x}) OR \
                     ({y_expr} < {p_min_y} OR {y_expr} > {p_max_y}))"
                )
            };
            builder.wheres.push(clause);
        }
        Filter::Categorical { key, categories, .. } => {
            let name = format_filter_key(key);
            let placeholders: Vec<String> = categories
                .iter()
                .map(|c| builder.push_param(SqlParam::Text(c.clone())))
                .collect();
            let op = if include { "IN" } else { "NOT IN" };
            builder
                .wheres
                .push(format!("{name} {op} ({})", placeholders.join(", ")));
        }
        Filter::Row { indices, .. } => {
            let name = quote_column(ROW_INDEX_KEY);
            let placeholders: Vec<String> = indices
                .iter()
                .map(|i| builder.push_param(SqlParam::Int(*i)))
                .collect();
            let op = if include { "IN" } else { "NOT IN" };
            builder.wheres.push(format!(
                "cast({name} as bigint) {op} ({})",
                placeholders.join(", ")
            ));
        }
        Filter::Feature { key, categories, .. } | Filter::Text { key, categories, .. } => {
            // case-insensitive substring match per pattern
            let name = format_filter_key(key);
            let op = if include { "~*" } else { "!~*" };
            for category in categories {
                let p = builder.push_param(SqlParam::Text(category.clone()));
                builder.wheres.push(format!("{name} {op} ({p})"));
            }
        }
    }
}

/// Appends every generic filter's predicate to the builder.
pub fn build_filtered_query_where(builder: &mut WhereBuilder, filters: &[Filter]) {
    for filter in filters {
        build_filter(builder, filter);
    }
}

/// Builds the projection for a filtered fetch. Every column is cast to
/// text so row decoding is uniform over text-stored data; the index column
/// is always projected.
pub fn build_filtered_query_field(variables: &[Variable], selection: &[String]) -> String {
    let columns = to_column_selection(selection, variables);
    columns
        .iter()
        .map(|key| {
            let quoted = quote_column(key);
            format!("{quoted}::text AS {quoted}")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Projection for a joined result fetch: the selection minus the target
/// (projected separately as truth), index always included.
pub fn build_filtered_result_query_field(
    variables: &[Variable],
    selection: &[String],
    target: &str,
) -> String {
    let columns = to_column_selection(selection, variables);
    columns
        .iter()
        .filter(|key| key.as_str() != target)
        .map(|key| {
            let quoted = quote_column(key);
            format!("data.{quoted}::text AS {quoted}")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Appends a residual-range predicate over `predicted - truth`.
fn build_residual_where(builder: &mut WhereBuilder, target: &str, filter: &Filter) -> Result<()> {
    let Filter::Numerical { min, max, mode, .. } = filter else {
        return Err(Error::InvalidFilter(
            "residual filter must carry explicit numeric bounds".into(),
        ));
    };
    let expr = error_expr(target);
    let p_min = builder.push_param(SqlParam::Float(*min));
    let p_max = builder.push_param(SqlParam::Float(*max));
    let clause = if *mode == FilterMode::Include {
        format!("({expr} >= {p_min} AND {expr} <= {p_max})")
    } else {
        format!("({expr} < {p_min} OR {expr} > {p_max})")
    };
    builder.wheres.push(clause);
    Ok(())
}

/// Appends a correctness predicate comparing prediction to truth; the
/// correct/incorrect categories are well known and never materialised.
fn build_correctness_where(
    builder: &mut WhereBuilder,
    target: &str,
    filter: &Filter,
) -> Result<()> {
    let Filter::Categorical { categories, .. } = filter else {
        return Err(Error::InvalidFilter(
            "correctness filter must be categorical".into(),
        ));
    };
    let op = categories
        .iter()
        .find_map(|c| {
            if c.eq_ignore_ascii_case(CORRECT_CATEGORY) {
                Some("=")
            } else if c.eq_ignore_ascii_case(INCORRECT_CATEGORY) {
                Some("!=")
            } else {
                None
            }
        })
        .ok_or_else(|| {
            Error::InvalidFilter("correctness filter must name correct or incorrect".into())
        })?;
    builder
        .wheres
        .push(format!("result.value {op} data.{}", quote_column(target)));
    Ok(())
}

/// Compiles the full predicate set for a joined result query: generic
/// filters on the data side, predicted/residual/correctness on the result
/// side.
pub fn build_result_query_filters(
    builder: &mut WhereBuilder,
    target: &str,
    filter_params: &FilterParams,
) -> Result<()> {
    let split = split_result_filters(&filter_params.filters)?;
    build_filtered_query_where(builder, &split.generic);

    if let Some(predicted) = &split.predicted {
        build_filter(builder, predicted);
    }
    if let Some(residual) = &split.residual {
        let target = resolve_target(target, residual.key());
        build_residual_where(builder, &target, residual)?;
    }
    if let Some(correctness) = &split.correctness {
        let target = resolve_target(target, correctness.key());
        build_correctness_where(builder, &target, correctness)?;
    }
    Ok(())
}

fn resolve_target(target: &str, filter_key: &str) -> String {
    if target.is_empty() {
        strip_key_suffix(filter_key).to_string()
    } else {
        target.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distil_common::model::filter::error_key;

    #[test]
    fn include_and_exclude_compile_opposite_operators() {
        let include = Filter::Categorical {
            key: "region".into(),
            mode: FilterMode::Include,
            categories: vec!["N".into(), "S".into()],
        };
        let exclude = Filter::Categorical {
            key: "region".into(),
            mode: FilterMode::Exclude,
            categories: vec!["N".into(), "S".into()],
        };

        let mut b = WhereBuilder::new();
        build_filter(&mut b, &include);
        assert_eq!(b.wheres, vec![r#""region" IN ($1, $2)"#]);

        let mut b = WhereBuilder::new();
        build_filter(&mut b, &exclude);
        assert_eq!(b.wheres, vec![r#""region" NOT IN ($1, $2)"#]);
        assert_eq!(
            b.params,
            vec![SqlParam::Text("N".into()), SqlParam::Text("S".into())]
        );
    }

    #[test]
    fn numerical_filter_casts_through_double_precision() {
        let filter = Filter::Numerical {
            key: "price".into(),
            mode: FilterMode::Include,
            min: 1.0,
            max: 10.0,
        };
        let mut b = WhereBuilder::new();
        build_filter(&mut b, &filter);
        assert_eq!(
            b.wheres,
            vec![
                "cast(\"price\" as double precision) >= $1 AND \
                 cast(\"price\" as double precision) <= $2"
            ]
        );
    }

    #[test]
    fn parameter_numbering_continues_across_filters() {
        let mut b = WhereBuilder::new();
        build_filtered_query_where(
            &mut b,
            &[
                Filter::Numerical {
                    key: "a".into(),
                    mode: FilterMode::Include,
                    min: 0.0,
                    max: 1.0,
                },
                Filter::Categorical {
                    key: "b".into(),
                    mode: FilterMode::Include,
                    categories: vec!["x".into()],
                },
            ],
        );
        assert!(b.wheres[1].contains("$3"));
        assert_eq!(b.params.len(), 3);
    }

    #[test]
    fn residual_filter_compiles_derived_expression() {
        let params = FilterParams {
            size: 100,
            variables: vec![],
            filters: vec![Filter::Numerical {
                key: error_key("price", "sol-1"),
                mode: FilterMode::Include,
                min: -5.0,
                max: 5.0,
            }],
        };
        let mut b = WhereBuilder::new();
        build_result_query_filters(&mut b, "price", &params).unwrap();
        assert_eq!(
            b.wheres,
            vec![
                "((cast(result.value as double precision) - \
                 cast(data.\"price\" as double precision)) >= $1 AND \
                 (cast(result.value as double precision) - \
                 cast(data.\"price\" as double precision)) <= $2)"
            ]
        );
        assert_eq!(b.params, vec![SqlParam::Float(-5.0), SqlParam::Float(5.0)]);
    }

    #[test]
    fn correctness_filter_compares_prediction_to_truth() {
        let params = FilterParams {
            size: 100,
            variables: vec![],
            filters: vec![Filter::Categorical {
                key: error_key("species", "sol-1"),
                mode: FilterMode::Include,
                categories: vec!["incorrect".into()],
            }],
        };
        let mut b = WhereBuilder::new();
        build_result_query_filters(&mut b, "species", &params).unwrap();
        assert_eq!(b.wheres, vec![r#"result.value != data."species""#]);
    }

    #[test]
    fn bivariate_composite_key_addresses_both_columns() {
        let filter = Filter::Bivariate {
            key: "lon:lat".into(),
            mode: FilterMode::Include,
            min_x: -10.0,
            max_x: 10.0,
            min_y: -20.0,
            max_y: 20.0,
        };
        let mut b = WhereBuilder::new();
        build_filter(&mut b, &filter);
        let clause = &b.wheres[0];
        assert!(clause.contains(r#"cast("lon" as double precision) >= $1"#));
        assert!(clause.contains(r#"cast("lat" as double precision) >= $3"#));
    }

    #[test]
    fn bivariate_plain_key_addresses_array_column() {
        let filter = Filter::Bivariate {
            key: "coords".into(),
            mode: FilterMode::Exclude,
            min_x: 0.0,
            max_x: 1.0,
            min_y: 0.0,
            max_y: 1.0,
        };
        let mut b = WhereBuilder::new();
        build_filter(&mut b, &filter);
        assert!(b.wheres[0].contains(r#""coords"[2]"#));
        assert!(b.wheres[0].contains(r#""coords"[1]"#));
    }

    #[test]
    fn text_filter_uses_case_insensitive_match() {
        let filter = Filter::Text {
            key: "notes".into(),
            mode: FilterMode::Include,
            categories: vec!["late".into(), "storm".into()],
        };
        let mut b = WhereBuilder::new();
        build_filter(&mut b, &filter);
        assert_eq!(
            b.wheres,
            vec![r#""notes" ~* ($1)"#, r#""notes" ~* ($2)"#]
        );
    }
}
