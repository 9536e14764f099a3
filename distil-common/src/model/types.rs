//! Semantic type vocabulary and helpers
//!
//! Variable types travel as strings through the wire envelope, the metadata
//! catalogue and the SQL layer, so they are kept as string constants with
//! predicate helpers rather than an enum. Generated cluster/feature columns
//! reference their base variable by name prefix.

/// Reserved key of the row-identity column. Every dataset carries exactly
/// one variable with this key; it is appended to any projection that omits
/// it and is the join key between a data table and its result table.
pub const ROW_INDEX_KEY: &str = "row_index";

pub const INTEGER_TYPE: &str = "integer";
pub const FLOAT_TYPE: &str = "float";
pub const LATITUDE_TYPE: &str = "latitude";
pub const LONGITUDE_TYPE: &str = "longitude";
pub const CATEGORICAL_TYPE: &str = "categorical";
pub const ORDINAL_TYPE: &str = "ordinal";
pub const BOOL_TYPE: &str = "boolean";
pub const TEXT_TYPE: &str = "text";
pub const ADDRESS_TYPE: &str = "address";
pub const CITY_TYPE: &str = "city";
pub const STATE_TYPE: &str = "state";
pub const COUNTRY_TYPE: &str = "country";
pub const EMAIL_TYPE: &str = "email";
pub const PHONE_TYPE: &str = "phone";
pub const POSTAL_CODE_TYPE: &str = "postal_code";
pub const URI_TYPE: &str = "uri";
pub const KEYWORD_TYPE: &str = "keyword";
pub const DATE_TIME_TYPE: &str = "dateTime";
pub const TIMESERIES_TYPE: &str = "timeseries";
pub const IMAGE_TYPE: &str = "image";

/// Rendering class of a numeric histogram.
pub const NUMERICAL_SUMMARY: &str = "numerical";
/// Rendering class of a terms histogram.
pub const CATEGORICAL_SUMMARY: &str = "categorical";

/// Name prefix of a generated cluster column for a base variable.
pub const CLUSTER_VAR_PREFIX: &str = "_cluster_";
/// Name prefix of a generated feature column for a base variable.
pub const FEATURE_VAR_PREFIX: &str = "_feature_";

/// True when the type buckets as a numeric histogram.
pub fn is_numerical_type(ty: &str) -> bool {
    matches!(ty, INTEGER_TYPE | FLOAT_TYPE | LATITUDE_TYPE | LONGITUDE_TYPE)
}

/// True when the type buckets as a categorical (terms) histogram.
pub fn is_categorical_type(ty: &str) -> bool {
    matches!(
        ty,
        CATEGORICAL_TYPE
            | ORDINAL_TYPE
            | BOOL_TYPE
            | ADDRESS_TYPE
            | CITY_TYPE
            | STATE_TYPE
            | COUNTRY_TYPE
            | EMAIL_TYPE
            | PHONE_TYPE
            | POSTAL_CODE_TYPE
            | KEYWORD_TYPE
    )
}

pub fn is_floating_point_type(ty: &str) -> bool {
    matches!(ty, FLOAT_TYPE | LATITUDE_TYPE | LONGITUDE_TYPE)
}

/// Types that get a clustered companion column during featurisation.
pub fn has_cluster_var(ty: &str) -> bool {
    matches!(ty, IMAGE_TYPE | TIMESERIES_TYPE)
}

/// Types that get a featurised companion column during featurisation.
pub fn has_feature_var(ty: &str) -> bool {
    ty == IMAGE_TYPE
}

/// Normalises a dataset id into the backing table name: lowercased, spaces
/// collapsed to underscores, trailing `_dataset` suffix trimmed.
pub fn normalize_storage_name(dataset_id: &str) -> String {
    let lowered = dataset_id.trim().to_lowercase().replace([' ', '-'], "_");
    lowered
        .strip_suffix("_dataset")
        .unwrap_or(&lowered)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numerical_predicate_covers_geo_types() {
        assert!(is_numerical_type(LATITUDE_TYPE));
        assert!(is_numerical_type(INTEGER_TYPE));
        assert!(!is_numerical_type(CATEGORICAL_TYPE));
    }

    #[test]
    fn storage_name_is_normalised() {
        assert_eq!(normalize_storage_name("Iris Flowers_dataset"), "iris_flowers");
        assert_eq!(normalize_storage_name("o_185"), "o_185");
    }
}
