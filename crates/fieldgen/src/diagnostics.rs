use std::collections::BTreeMap;

use fieldgen_contracts::FIELDGEN_DIAG_SCHEMA_VERSION;
use serde::Serialize;
use serde_json::Value;

use crate::generate::{GenError, GenErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Config,
    Bounds,
    Encoding,
    Codegen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl Diagnostic {
    pub fn new(code: &str, severity: Severity, stage: Stage, message: String) -> Self {
        Self {
            code: code.to_string(),
            severity,
            stage,
            message,
            notes: Vec::new(),
            data: BTreeMap::new(),
        }
    }

    pub fn error(code: &str, stage: Stage, message: String) -> Self {
        Self::new(code, Severity::Error, stage, message)
    }

    pub fn warning(code: &str, stage: Stage, message: String) -> Self {
        Self::new(code, Severity::Warning, stage, message)
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn from_gen_error(err: &GenError) -> Self {
        let (code, stage) = match err.kind {
            GenErrorKind::UnsupportedConfiguration => ("FG-CONFIG-UNSUPPORTED-0001", Stage::Config),
            GenErrorKind::BoundAnalysisNonconvergence => {
                ("FG-BOUNDS-NONCONVERGENCE-0001", Stage::Bounds)
            }
            GenErrorKind::EncodingIncompatibility => {
                ("FG-ENCODING-INCOMPATIBLE-0001", Stage::Encoding)
            }
            GenErrorKind::Internal => ("FG-CODEGEN-INTERNAL-0001", Stage::Codegen),
        };
        Self::error(code, stage, err.message.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub schema_version: String,
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn ok() -> Self {
        Self {
            schema_version: FIELDGEN_DIAG_SCHEMA_VERSION.to_string(),
            ok: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, mut diagnostics: Vec<Diagnostic>) -> Self {
        diagnostics.sort_by(|a, b| {
            a.stage
                .cmp(&b.stage)
                .then_with(|| a.code.cmp(&b.code))
                .then_with(|| a.message.cmp(&b.message))
        });
        self.ok = diagnostics.iter().all(|d| d.severity != Severity::Error);
        self.diagnostics = diagnostics;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_keep_report_ok_and_sort_by_stage() {
        let report = Report::ok().with_diagnostics(vec![
            Diagnostic::warning("FG-CODEGEN-0002", Stage::Codegen, "b".to_string()),
            Diagnostic::warning("FG-ENCODING-0001", Stage::Encoding, "a".to_string()),
        ]);
        assert!(report.ok);
        assert_eq!(report.diagnostics[0].stage, Stage::Encoding);

        let failed = report.with_diagnostics(vec![Diagnostic::from_gen_error(&GenError::new(
            GenErrorKind::BoundAnalysisNonconvergence,
            "no fixpoint".to_string(),
        ))]);
        assert!(!failed.ok);
        assert_eq!(failed.diagnostics[0].code, "FG-BOUNDS-NONCONVERGENCE-0001");
    }
}
