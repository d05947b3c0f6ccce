use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A judge's evaluation of one generated output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeResult {
    pub judge_id: String,
    pub judge_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub judge_model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<String>,
    pub verdict: String,
    pub overall_score: f64,
    #[serde(default)]
    pub factual_accuracy: i32,
    #[serde(default)]
    pub hallucination_score: i32,
    #[serde(default)]
    pub query_quality: i32,
    #[serde(default)]
    pub completeness: i32,
    #[serde(default)]
    pub dimension_scores: HashMap<String, f64>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    pub judged_at: DateTime<Utc>,
}

impl JudgeResult {
    pub fn new(
        judge_id: impl Into<String>,
        judge_name: impl Into<String>,
        verdict: impl Into<String>,
        overall_score: f64,
    ) -> Self {
        Self {
            judge_id: judge_id.into(),
            judge_name: judge_name.into(),
            judge_model: String::new(),
            criteria: Vec::new(),
            verdict: verdict.into(),
            overall_score,
            factual_accuracy: 0,
            hallucination_score: 0,
            query_quality: 0,
            completeness: 0,
            dimension_scores: HashMap::new(),
            reasoning: String::new(),
            issues: Vec::new(),
            judged_at: Utc::now(),
        }
    }
}
