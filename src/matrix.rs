use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};

use crate::error::AppError;

/// Mapping between human-readable state labels, numeric state codes and
/// rendering colors. Validated once at construction and immutable afterwards.
#[derive(Debug, Clone)]
pub struct StateMapping {
    labels: Vec<String>,
    codes: Vec<u32>,
    colors: Vec<String>,
    code_by_label: HashMap<String, u32>,
}

impl StateMapping {
    /// Build a mapping from three parallel collections.
    ///
    /// The three collections must have equal length and labels/codes must be
    /// unique. Violations are configuration errors, raised here and never
    /// deferred to analysis time.
    pub fn new(
        labels: Vec<String>,
        codes: Vec<u32>,
        colors: Vec<String>,
    ) -> Result<Self, AppError> {
        if labels.len() != codes.len() || labels.len() != colors.len() {
            return Err(AppError::Configuration(format!(
                "State mapping collections must have equal length: {} labels, {} codes, {} colors",
                labels.len(),
                codes.len(),
                colors.len()
            )));
        }
        if labels.is_empty() {
            return Err(AppError::Configuration(
                "State mapping cannot be empty".to_string(),
            ));
        }

        let mut code_by_label = HashMap::new();
        for (label, &code) in labels.iter().zip(codes.iter()) {
            if code_by_label.insert(label.clone(), code).is_some() {
                return Err(AppError::Configuration(format!(
                    "Duplicate state label in mapping: {}",
                    label
                )));
            }
        }
        let mut seen_codes = HashSet::new();
        for &code in &codes {
            if !seen_codes.insert(code) {
                return Err(AppError::Configuration(format!(
                    "Duplicate state code in mapping: {}",
                    code
                )));
            }
        }

        Ok(Self {
            labels,
            codes,
            colors,
            code_by_label,
        })
    }

    /// Load a mapping from a CSV file with columns label,code,color.
    ///
    /// The color column may be omitted, in which case all states use "gray".
    pub fn from_csv(path: &str) -> Result<Self, AppError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let _header = lines
            .next()
            .ok_or_else(|| AppError::InvalidInput(format!("Mapping file is empty: {}", path)))??;

        let mut labels = Vec::new();
        let mut codes = Vec::new();
        let mut colors = Vec::new();
        for (idx, line) in lines.enumerate() {
            let l = line?;
            if l.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = l.split(',').map(|s| s.trim()).collect();
            if fields.len() < 2 {
                return Err(AppError::Configuration(format!(
                    "Mapping line {} needs at least label,code columns: {}",
                    idx + 2,
                    l
                )));
            }
            let code = fields[1].parse::<u32>().map_err(|_| {
                AppError::Configuration(format!(
                    "Mapping line {} has a non-numeric state code: {}",
                    idx + 2,
                    fields[1]
                ))
            })?;
            labels.push(fields[0].to_string());
            codes.push(code);
            colors.push(if fields.len() > 2 && !fields[2].is_empty() {
                fields[2].to_string()
            } else {
                "gray".to_string()
            });
        }

        Self::new(labels, codes, colors)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn codes(&self) -> &[u32] {
        &self.codes
    }

    pub fn colors(&self) -> &[String] {
        &self.colors
    }

    /// Look up the numeric code for a state label
    pub fn code(&self, label: &str) -> Option<u32> {
        self.code_by_label.get(label).copied()
    }
}

/// A cohort of N state sequences of equal length T. Row order is the
/// subject identity and is preserved through every downstream stage.
#[derive(Debug, Clone)]
pub struct SequenceMatrix {
    times: Vec<String>,
    rows: Vec<Vec<u32>>,
}

impl SequenceMatrix {
    /// Build a matrix from already-encoded rows.
    ///
    /// Every row must have the same length as the time header; a mismatch is
    /// an invalid-input error naming the offending row.
    pub fn new(times: Vec<String>, rows: Vec<Vec<u32>>) -> Result<Self, AppError> {
        let t = times.len();
        if t == 0 {
            return Err(AppError::InvalidInput(
                "Sequence matrix needs at least one time column".to_string(),
            ));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != t {
                return Err(AppError::InvalidInput(format!(
                    "Sequence length mismatch at row {}: expected {} time points, found {}",
                    i,
                    t,
                    row.len()
                )));
            }
        }
        Ok(Self { times, rows })
    }

    /// Load a wide-format sequence CSV.
    ///
    /// The header row holds the time-point labels; each following row is one
    /// subject, cells holding state labels that are translated to numeric
    /// codes through the mapping. Unknown labels are rejected with the
    /// offending row and column.
    pub fn from_csv(path: &str, mapping: &StateMapping) -> Result<Self, AppError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let header = lines
            .next()
            .ok_or_else(|| AppError::InvalidInput(format!("Sequence file is empty: {}", path)))??;
        let times: Vec<String> = header.split(',').map(|s| s.trim().to_string()).collect();

        let mut rows = Vec::new();
        for (idx, line) in lines.enumerate() {
            let l = line?;
            if l.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = l.split(',').map(|s| s.trim()).collect();
            if fields.len() != times.len() {
                return Err(AppError::InvalidInput(format!(
                    "Sequence length mismatch at row {}: expected {} time points, found {}",
                    idx,
                    times.len(),
                    fields.len()
                )));
            }
            let mut row = Vec::with_capacity(fields.len());
            for (col, field) in fields.iter().enumerate() {
                match mapping.code(field) {
                    Some(code) => row.push(code),
                    None => {
                        return Err(AppError::InvalidInput(format!(
                            "Unknown state label at row {} column {}: {}",
                            idx, col, field
                        )))
                    }
                }
            }
            rows.push(row);
        }

        Self::new(times, rows)
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.times.len()
    }

    pub fn times(&self) -> &[String] {
        &self.times
    }

    pub fn row(&self, i: usize) -> &[u32] {
        &self.rows[i]
    }

    pub fn rows(&self) -> &[Vec<u32>] {
        &self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping_abc() -> StateMapping {
        StateMapping::new(
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            vec![1, 2, 3],
            vec!["red".to_string(), "green".to_string(), "blue".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_mapping_lookup() {
        let m = mapping_abc();
        assert_eq!(m.len(), 3);
        assert!(!m.is_empty());
        assert_eq!(m.code("B"), Some(2));
        assert_eq!(m.code("Z"), None);
        assert_eq!(m.labels(), &["A", "B", "C"]);
        assert_eq!(m.codes(), &[1, 2, 3]);
        assert_eq!(m.colors(), &["red", "green", "blue"]);
    }

    #[test]
    fn test_mapping_arity_mismatch_is_configuration_error() {
        let err = StateMapping::new(
            vec!["A".to_string(), "B".to_string()],
            vec![1, 2],
            vec!["red".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_mapping_duplicate_label_rejected() {
        let err = StateMapping::new(
            vec!["A".to_string(), "A".to_string()],
            vec![1, 2],
            vec!["red".to_string(), "green".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_mapping_duplicate_code_rejected() {
        let err = StateMapping::new(
            vec!["A".to_string(), "B".to_string()],
            vec![1, 1],
            vec!["red".to_string(), "green".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_matrix_row_length_mismatch_rejected() {
        let err = SequenceMatrix::new(
            vec!["t1".to_string(), "t2".to_string()],
            vec![vec![1, 2], vec![1]],
        )
        .unwrap_err();
        match err {
            AppError::InvalidInput(msg) => assert!(msg.contains("row 1")),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_matrix_accessors() {
        let m = SequenceMatrix::new(
            vec!["t1".to_string(), "t2".to_string()],
            vec![vec![1, 2], vec![2, 2]],
        )
        .unwrap();
        assert_eq!(m.n_rows(), 2);
        assert_eq!(m.n_cols(), 2);
        assert_eq!(m.row(0), &[1, 2]);
        assert_eq!(m.times()[1], "t2");
    }
}
