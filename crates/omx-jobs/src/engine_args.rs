use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Argument file payloads understood by the engine scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineArguments {
    Analysis {
        input_file: PathBuf,
        output_dir: PathBuf,
        preprocessing_options: Value,
        analysis_options: Value,
        analysis_id: String,
    },
    Preprocessing {
        input_file: PathBuf,
        output_dir: PathBuf,
        options: Value,
    },
}

/// Fields every engine result carries; anything else is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub processed_file_path: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl EngineReport {
    /// Reads the common fields out of a raw engine result.
    pub fn from_value(result: &Value) -> Option<Self> {
        serde_json::from_value(result.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineArguments, EngineReport};
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn unit_preprocessing_arguments_use_engine_field_names() {
        let args = EngineArguments::Preprocessing {
            input_file: PathBuf::from("/s/U1_S1/original_data.csv"),
            output_dir: PathBuf::from("/s/U1_S1"),
            options: json!({"transformation": "log2"}),
        };
        assert_eq!(
            serde_json::to_value(&args).expect("encode"),
            json!({
                "input_file": "/s/U1_S1/original_data.csv",
                "output_dir": "/s/U1_S1",
                "options": {"transformation": "log2"},
            })
        );
    }

    #[test]
    fn unit_analysis_arguments_carry_analysis_id() {
        let args = EngineArguments::Analysis {
            input_file: PathBuf::from("in.csv"),
            output_dir: PathBuf::from("out"),
            preprocessing_options: json!({}),
            analysis_options: json!({"linearRegression": true}),
            analysis_id: "U1_S1".to_string(),
        };
        let encoded = serde_json::to_value(&args).expect("encode");
        assert_eq!(encoded["analysis_id"], "U1_S1");
        assert_eq!(encoded["analysis_options"]["linearRegression"], true);
        assert!(encoded.get("options").is_none());
    }

    #[test]
    fn unit_engine_report_keeps_unknown_fields() {
        let report = EngineReport::from_value(&json!({
            "success": true,
            "processed_file_path": "/s/processed.csv",
            "rows": 5,
        }))
        .expect("report");
        assert!(report.success);
        assert_eq!(report.message, None);
        assert_eq!(
            report.processed_file_path,
            Some(PathBuf::from("/s/processed.csv"))
        );
        assert_eq!(report.extra["rows"], 5);
        assert!(EngineReport::from_value(&json!([1, 2])).is_none());
    }
}
