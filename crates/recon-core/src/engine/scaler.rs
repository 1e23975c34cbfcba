//! Per-feature standardization

use serde::{Deserialize, Serialize};

use super::features::FEATURE_COUNT;

type Row = [f64; FEATURE_COUNT];

/// Zero-mean, unit-variance scaling fitted on a training split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Row,
    /// Population standard deviation; constant features scale by 1
    pub scale: Row,
}

impl StandardScaler {
    pub fn fit(rows: &[Row]) -> Self {
        let mut mean = [0.0; FEATURE_COUNT];
        let mut scale = [1.0; FEATURE_COUNT];
        if rows.is_empty() {
            return Self { mean, scale };
        }

        let n = rows.len() as f64;
        for j in 0..FEATURE_COUNT {
            let m = rows.iter().map(|r| r[j]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r[j] - m).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            mean[j] = m;
            scale[j] = if std > f64::EPSILON { std } else { 1.0 };
        }
        Self { mean, scale }
    }

    pub fn transform(&self, row: &Row) -> Row {
        let mut out = [0.0; FEATURE_COUNT];
        for j in 0..FEATURE_COUNT {
            out[j] = (row[j] - self.mean[j]) / self.scale[j];
        }
        out
    }

    pub fn transform_all(&self, rows: &[Row]) -> Vec<Row> {
        rows.iter().map(|r| self.transform(r)).collect()
    }
}
