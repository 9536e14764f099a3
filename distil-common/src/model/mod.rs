//! Dataset, variable, filter and request model shared across crates

pub mod extrema;
pub mod filter;
pub mod filtered;
pub mod histogram;
pub mod request;
pub mod types;
pub mod variable;

pub use extrema::Extrema;
pub use filter::{Filter, FilterMode, FilterParams, HighlightRoot, SplitFilters};
pub use filtered::{Column, FilteredData};
pub use histogram::{Bucket, Histogram};
pub use request::{Progress, Request, RequestFeature, Solution, SolutionResult, SolutionScore};
pub use variable::{Dataset, DatasetSource, Variable, VariableRole};
