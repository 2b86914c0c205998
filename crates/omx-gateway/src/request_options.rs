//! Typed preprocessing and analysis options accepted by the gateway.
//!
//! Options arrive as JSON strings inside multipart forms. They are parsed into
//! these structs so unknown enum values are rejected before any engine work,
//! then re-encoded with defaults filled in for the engine and for the session
//! snapshots. Fields the gateway does not model are carried through untouched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api_error::GatewayApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FillMissingValues {
    #[default]
    None,
    Mean,
    Median,
    Knn5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transformation {
    #[default]
    None,
    Scale,
    Center,
    Standardize,
    Log,
    Log2,
    YeoJohnson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutlierMethod {
    #[default]
    Iqr,
    Zscore,
    Isolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingMethod {
    #[default]
    None,
    Tertiles,
    Threshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisType {
    Regression,
    Classification,
}

/// Column removal driven by the share of missing values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingDataRemovalOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub columns_to_remove: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_classification: Option<Value>,
    #[serde(default)]
    pub remove_null_values: bool,
    #[serde(default)]
    pub fill_missing_values: FillMissingValues,
    #[serde(default)]
    pub transformation: Transformation,
    #[serde(default)]
    pub remove_outliers: bool,
    #[serde(default)]
    pub outlier_method: OutlierMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_data_removal: Option<MissingDataRemovalOptions>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping_method: Option<GroupingMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_values: Option<Vec<f64>>,
    #[serde(default)]
    pub statistical_tests: Vec<String>,
    #[serde(default)]
    pub linear_regression: bool,
    #[serde(default)]
    pub linear_regression_without_influentials: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<AnalysisType>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PreprocessingOptions {
    fn validate(&self) -> Result<(), String> {
        if let Some(removal) = &self.missing_data_removal {
            if !removal.threshold.is_finite() || removal.threshold < 0.0 {
                return Err(format!(
                    "missingDataRemoval.threshold must be a non-negative number, got {}",
                    removal.threshold
                ));
            }
        }
        Ok(())
    }
}

impl AnalysisOptions {
    fn validate(&self) -> Result<(), String> {
        if self.grouping_method == Some(GroupingMethod::Threshold)
            && self
                .threshold_values
                .as_ref()
                .map(Vec::is_empty)
                .unwrap_or(true)
        {
            return Err("groupingMethod 'threshold' requires thresholdValues".to_string());
        }
        Ok(())
    }
}

/// Parses a preprocessing options form field into its normalized JSON form.
pub fn normalize_preprocessing_options(
    field: &str,
    raw: &str,
) -> Result<Value, GatewayApiError> {
    let options: PreprocessingOptions = parse_options(field, raw)?;
    options.validate().map_err(|message| invalid(field, message))?;
    encode(field, &options)
}

/// Parses an analysis options form field into its normalized JSON form.
pub fn normalize_analysis_options(field: &str, raw: &str) -> Result<Value, GatewayApiError> {
    let options: AnalysisOptions = parse_options(field, raw)?;
    options.validate().map_err(|message| invalid(field, message))?;
    encode(field, &options)
}

fn parse_options<T: DeserializeOwned>(field: &str, raw: &str) -> Result<T, GatewayApiError> {
    let raw = raw.trim();
    let raw = if raw.is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|error| invalid(field, error.to_string()))
}

fn encode<T: Serialize>(field: &str, options: &T) -> Result<Value, GatewayApiError> {
    serde_json::to_value(options).map_err(|error| {
        GatewayApiError::internal(format!("failed to encode {field}: {error}"))
    })
}

fn invalid(field: &str, message: impl std::fmt::Display) -> GatewayApiError {
    GatewayApiError::bad_request("validation_error", format!("invalid {field}: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn unit_preprocessing_defaults_fill_absent_fields() {
        let normalized = normalize_preprocessing_options("options", "").expect("defaults");
        assert_eq!(
            normalized,
            json!({
                "removeNullValues": false,
                "fillMissingValues": "none",
                "transformation": "none",
                "removeOutliers": false,
                "outlierMethod": "iqr",
            })
        );
    }

    #[test]
    fn unit_preprocessing_accepts_every_documented_value() {
        for value in ["none", "scale", "center", "standardize", "log", "log2", "yeo-johnson"] {
            let raw = json!({"transformation": value}).to_string();
            let normalized = normalize_preprocessing_options("options", &raw).expect("parse");
            assert_eq!(normalized["transformation"], value);
        }
        for value in ["none", "mean", "median", "knn5"] {
            let raw = json!({"fillMissingValues": value}).to_string();
            assert!(normalize_preprocessing_options("options", &raw).is_ok(), "{value}");
        }
        for value in ["iqr", "zscore", "isolation"] {
            let raw = json!({"outlierMethod": value}).to_string();
            assert!(normalize_preprocessing_options("options", &raw).is_ok(), "{value}");
        }
    }

    #[test]
    fn regression_preprocessing_rejects_unknown_enum_value() {
        let error = normalize_preprocessing_options("options", r#"{"transformation":"cube"}"#)
            .expect_err("unknown transformation");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, "validation_error");
        assert!(error.message.contains("invalid options"));

        let error = normalize_preprocessing_options(
            "options",
            r#"{"missingDataRemoval":{"enabled":true,"threshold":-5}}"#,
        )
        .expect_err("negative threshold");
        assert!(error.message.contains("missingDataRemoval.threshold"));
    }

    #[test]
    fn functional_preprocessing_preserves_unmodelled_fields() {
        let raw = json!({
            "columnClassification": {"subjectId": "id", "outcome": "y"},
            "removeOutliers": true,
            "sessionId": "S1",
        })
        .to_string();
        let normalized = normalize_preprocessing_options("options", &raw).expect("parse");
        assert_eq!(normalized["columnClassification"]["outcome"], "y");
        assert_eq!(normalized["removeOutliers"], true);
        assert_eq!(normalized["sessionId"], "S1");
    }

    #[test]
    fn functional_analysis_options_keep_multivariate_tree() {
        let raw = json!({
            "groupingMethod": "tertiles",
            "statisticalTests": ["anova", "welch"],
            "linearRegression": true,
            "analysisType": "classification",
            "multivariateAnalysis": {"ridge": {"enabled": true, "metric": "rmse"}},
        })
        .to_string();
        let normalized = normalize_analysis_options("analysisOptions", &raw).expect("parse");
        assert_eq!(normalized["groupingMethod"], "tertiles");
        assert_eq!(normalized["analysisType"], "classification");
        assert_eq!(normalized["statisticalTests"], json!(["anova", "welch"]));
        assert_eq!(
            normalized["multivariateAnalysis"]["ridge"]["metric"],
            "rmse"
        );
        assert_eq!(normalized["linearRegressionWithoutInfluentials"], false);
    }

    #[test]
    fn regression_threshold_grouping_requires_values() {
        let error = normalize_analysis_options(
            "analysisOptions",
            r#"{"groupingMethod":"threshold"}"#,
        )
        .expect_err("missing thresholds");
        assert!(error.message.contains("thresholdValues"));

        assert!(normalize_analysis_options(
            "analysisOptions",
            r#"{"groupingMethod":"threshold","thresholdValues":[1.5]}"#,
        )
        .is_ok());
        assert!(normalize_analysis_options("analysisOptions", "not json").is_err());
        assert!(
            normalize_analysis_options("analysisOptions", r#"{"analysisType":"survival"}"#)
                .is_err()
        );
    }
}
