//! Feature vectors for the land value model.
//!
//! Training and fitting of the regressor happen elsewhere; this module owns
//! the row cleaning rules, the column layout the model was trained on, and
//! the validation of user supplied prediction inputs.

use crate::types::PropertyRecord;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

pub const NUMERIC_COLUMNS: [&str; 3] = ["BIG_IMPROVEMENT_YEAR", "REPORT_YEAR", "AGE_SINCE_IMPROVEMENT"];
pub const TARGET_COLUMN: &str = "LOG_LAND_VALUE";
pub const CATEGORICAL_COLUMNS: [&str; 3] = ["ZONING_CLASSIFICATION", "LEGAL_TYPE", "NEIGHBOURHOOD_CODE"];

// Factories, malls and other non-residential zoning
const EXCLUDED_ZONING: [&str; 5] = [
    "Comprehensive Development",
    "Historical Area",
    "Industrial",
    "Other",
    "Commercial",
];

const MIN_IMPROVEMENT_YEAR: f64 = 1900.0;
const MIN_VALUE: f64 = 1e4;
const MAX_LAND_VALUE: f64 = 5e7;

/// A cleaned record usable for training.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub improvement_year: f64,
    pub report_year: f64,
    pub zoning: String,
    pub legal_type: String,
    pub neighbourhood_code: u32,
    pub land_value: f64,
}

impl TrainingRow {
    pub fn age_since_improvement(&self) -> f64 {
        self.report_year - self.improvement_year
    }

    /// Regression target, ln(1 + land value).
    pub fn target(&self) -> f64 {
        self.land_value.ln_1p()
    }

    fn from_record(record: &PropertyRecord) -> Option<Self> {
        let land_value = record.land_value?;
        let improvement_value = record.improvement_value?;
        let improvement_year = record.improvement_year?;
        let report_year = record.report_year?;
        let zoning = record.zoning_classification.clone()?;
        let legal_type = record.legal_type.clone()?;

        if legal_type == "OTHER" || EXCLUDED_ZONING.contains(&zoning.as_str()) {
            return None;
        }
        if !(improvement_year > MIN_IMPROVEMENT_YEAR
            && land_value > MIN_VALUE
            && improvement_value > MIN_VALUE
            && land_value < MAX_LAND_VALUE)
        {
            return None;
        }

        Some(TrainingRow {
            improvement_year,
            report_year,
            zoning,
            legal_type,
            neighbourhood_code: record.neighbourhood_code,
            land_value,
        })
    }

    fn categorical(&self, column: usize) -> String {
        match column {
            0 => self.zoning.clone(),
            1 => self.legal_type.clone(),
            _ => self.neighbourhood_code.to_string(),
        }
    }
}

/// Drops incomplete, non-residential and implausible records.
pub fn training_rows(records: &[PropertyRecord]) -> Vec<TrainingRow> {
    records.iter().filter_map(TrainingRow::from_record).collect()
}

/// Column layout fixed at training time: numeric columns, then one
/// `<COLUMN>_<value>` indicator per categorical value seen in training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    pub fn fit(rows: &[TrainingRow]) -> Self {
        let mut columns: Vec<String> = NUMERIC_COLUMNS.iter().map(|c| c.to_string()).collect();
        for (i, name) in CATEGORICAL_COLUMNS.iter().enumerate() {
            let mut values: Vec<String> = rows.iter().map(|r| r.categorical(i)).collect();
            values.sort();
            values.dedup();
            columns.extend(values.into_iter().map(|v| format!("{}_{}", name, v)));
        }
        FeatureSchema { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn encode_row(&self, row: &TrainingRow) -> Vec<f64> {
        self.encode_values(
            row.improvement_year,
            row.report_year,
            [row.categorical(0), row.categorical(1), row.categorical(2)],
        )
    }

    /// Unseen categorical values leave all of their indicators at zero.
    pub fn encode(&self, input: &ValidatedInput) -> Vec<f64> {
        self.encode_values(
            input.improvement_year as f64,
            input.report_year as f64,
            [
                input.zoning.clone(),
                input.legal_type.clone(),
                input.neighbourhood_code.to_string(),
            ],
        )
    }

    fn encode_values(&self, improvement_year: f64, report_year: f64, categories: [String; 3]) -> Vec<f64> {
        let mut vector = vec![0.0; self.columns.len()];
        let numeric = [improvement_year, report_year, report_year - improvement_year];
        for (name, value) in NUMERIC_COLUMNS.iter().zip(numeric) {
            if let Some(i) = self.index_of(name) {
                vector[i] = value;
            }
        }
        for (name, value) in CATEGORICAL_COLUMNS.iter().zip(categories.iter()) {
            if let Some(i) = self.index_of(&format!("{}_{}", name, value)) {
                vector[i] = 1.0;
            }
        }
        vector
    }
}

/// Writes one CSV line per row: the schema's columns, then the target.
pub fn write_training_matrix<W: io::Write>(schema: &FeatureSchema, rows: &[TrainingRow], writer: W) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header: Vec<&str> = schema.columns().iter().map(String::as_str).collect();
    header.push(TARGET_COLUMN);
    wtr.write_record(&header)?;

    for row in rows {
        let mut values: Vec<String> = schema.encode_row(row).iter().map(|v| v.to_string()).collect();
        values.push(row.target().to_string());
        wtr.write_record(&values)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Raw form input for a prediction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PredictionInput {
    pub improvement_year: Option<i32>,
    pub zoning: String,
    pub legal_type: String,
    pub neighbourhood_code: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInput {
    pub improvement_year: i32,
    pub report_year: i32,
    pub zoning: String,
    pub legal_type: String,
    pub neighbourhood_code: u32,
}

/// Problems with user input, shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("Provide improvement/build year.")]
    MissingYear,

    #[error("Improvement year cannot exceed current year.")]
    FutureYear,
}

pub fn validate_prediction_input(input: &PredictionInput, current_year: i32) -> Result<ValidatedInput, InputError> {
    let year = input.improvement_year.ok_or(InputError::MissingYear)?;
    if year > current_year {
        return Err(InputError::FutureYear);
    }
    Ok(ValidatedInput {
        improvement_year: year,
        report_year: current_year,
        zoning: input.zoning.clone(),
        legal_type: input.legal_type.clone(),
        neighbourhood_code: input.neighbourhood_code,
    })
}

pub fn current_year() -> i32 {
    chrono::Local::now().year()
}

/// A trained regressor predicting ln(1 + land value).
pub trait LandValueModel {
    fn predict_log(&self, features: &[f64]) -> f64;
}

/// Either "Predicted Land Value: $..." or the validation message.
pub fn predict_land_value<M: LandValueModel + ?Sized>(
    model: &M,
    schema: &FeatureSchema,
    input: &PredictionInput,
    current_year: i32,
) -> String {
    match validate_prediction_input(input, current_year) {
        Ok(valid) => {
            let features = schema.encode(&valid);
            let value = model.predict_log(&features).exp_m1();
            format!("Predicted Land Value: {}", format_dollars(value))
        }
        Err(e) => e.to_string(),
    }
}

/// "$1,234,567.89"
pub fn format_dollars(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}
