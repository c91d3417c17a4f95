use clap::Args;
use rayon::prelude::*;
use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use crate::error::AppError;
use crate::matrix::{SequenceMatrix, StateMapping};

#[derive(Args)]
pub struct DistanceArgs {
    /// Input sequence CSV (wide format, one row per subject)
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// State mapping CSV (label,code,color)
    #[arg(short = 'm', long = "mapping")]
    pub mapping: String,
    /// Distance metric (hamming, levenshtein)
    #[arg(short = 'e', long = "metric", default_value = "hamming")]
    pub metric: String,
    /// Output condensed distance CSV path
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Number of parallel threads
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

/// Position-wise distance metric between two state sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Fraction of time points where the two sequences differ
    Hamming,
    /// Unit-cost edit distance, normalized by sequence length
    Levenshtein,
}

impl FromStr for Metric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hamming" | "hamming-normalized" => Ok(Metric::Hamming),
            "levenshtein" | "edit" => Ok(Metric::Levenshtein),
            other => Err(AppError::Configuration(format!(
                "Unknown distance metric: {}. Supported metrics: hamming, levenshtein",
                other
            ))),
        }
    }
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Hamming => "hamming",
            Metric::Levenshtein => "levenshtein",
        }
    }

    /// Distance between two sequences. Non-negative, symmetric, zero on
    /// identical input; both shipped metrics stay within [0,1].
    pub fn distance(&self, a: &[u32], b: &[u32]) -> f64 {
        match self {
            Metric::Hamming => hamming_normalized(a, b),
            Metric::Levenshtein => levenshtein_normalized(a, b),
        }
    }
}

/// Fraction of positions where the sequences disagree
fn hamming_normalized(a: &[u32], b: &[u32]) -> f64 {
    let t = a.len().max(b.len());
    if t == 0 {
        return 0.0;
    }
    let matched = a.len().min(b.len());
    let mismatches = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x != y)
        .count()
        + (t - matched);
    mismatches as f64 / t as f64
}

/// Unit-cost edit distance divided by the longer sequence length
fn levenshtein_normalized(a: &[u32], b: &[u32]) -> f64 {
    let t = a.len().max(b.len());
    if t == 0 {
        return 0.0;
    }
    levenshtein(a, b) as f64 / t as f64
}

// Two-row dynamic program
fn levenshtein(a: &[u32], b: &[u32]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + cost)
                .min(prev[j + 1] + 1)
                .min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Index of the unordered pair (i,j), i<j, in the canonical condensed
/// enumeration over n items
pub fn condensed_index(n: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < n);
    i * n - i * (i + 1) / 2 + (j - i - 1)
}

/// Condensed pairwise dissimilarity structure: one value per unordered pair
/// (i,j), i<j, in canonical enumeration order. Immutable once computed.
#[derive(Debug, Clone)]
pub struct CondensedMatrix {
    n: usize,
    values: Vec<f64>,
}

impl CondensedMatrix {
    pub fn new(n: usize, values: Vec<f64>) -> Result<Self, AppError> {
        let expected = n * n.saturating_sub(1) / 2;
        if values.len() != expected {
            return Err(AppError::InvalidInput(format!(
                "Condensed distance length {} does not match {} sequences (expected {})",
                values.len(),
                n,
                expected
            )));
        }
        Ok(Self { n, values })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Distance between items i and j (zero on the diagonal)
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        self.values[condensed_index(self.n, lo, hi)]
    }

    /// Read a condensed distance CSV (header i,j,distance) written by the
    /// distance stage, verifying the canonical pair order.
    pub fn from_csv(path: &str) -> Result<Self, AppError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let _header = lines
            .next()
            .ok_or_else(|| AppError::InvalidInput(format!("Distance file is empty: {}", path)))??;

        let mut triples: Vec<(usize, usize, f64)> = Vec::new();
        for (idx, line) in lines.enumerate() {
            let l = line?;
            if l.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = l.split(',').map(|s| s.trim()).collect();
            if fields.len() < 3 {
                return Err(AppError::InvalidInput(format!(
                    "Distance file line {} needs i,j,distance columns: {}",
                    idx + 2,
                    l
                )));
            }
            let i = fields[0].parse::<usize>().map_err(|_| {
                AppError::InvalidInput(format!(
                    "Distance file line {} has a non-numeric index: {}",
                    idx + 2,
                    fields[0]
                ))
            })?;
            let j = fields[1].parse::<usize>().map_err(|_| {
                AppError::InvalidInput(format!(
                    "Distance file line {} has a non-numeric index: {}",
                    idx + 2,
                    fields[1]
                ))
            })?;
            let d = fields[2].parse::<f64>().map_err(|_| {
                AppError::InvalidInput(format!(
                    "Distance file line {} has a non-numeric distance: {}",
                    idx + 2,
                    fields[2]
                ))
            })?;
            if !d.is_finite() || d < 0.0 {
                return Err(AppError::InvalidInput(format!(
                    "Distance file line {} has a negative or non-finite distance: {}",
                    idx + 2,
                    fields[2]
                )));
            }
            triples.push((i, j, d));
        }

        let m = triples.len();
        let n = ((1.0 + (1.0 + 8.0 * m as f64).sqrt()) / 2.0).round() as usize;
        if n < 2 || n * (n - 1) / 2 != m {
            return Err(AppError::InvalidInput(format!(
                "Distance file holds {} pairs, which is not a valid condensed pair count",
                m
            )));
        }

        let expected_pairs = (0..n).flat_map(|i| ((i + 1)..n).map(move |j| (i, j)));
        let mut values = Vec::with_capacity(m);
        for ((i, j), &(fi, fj, d)) in expected_pairs.zip(triples.iter()) {
            if fi != i || fj != j {
                return Err(AppError::InvalidInput(format!(
                    "Distance file out of canonical pair order: expected pair ({},{}), found ({},{})",
                    i, j, fi, fj
                )));
            }
            values.push(d);
        }

        Self::new(n, values)
    }

    /// Write the structure as a headered CSV in canonical pair order
    pub fn write_csv(&self, path: &str) -> Result<(), AppError> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "i,j,distance")?;
        let mut idx = 0;
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                writeln!(out, "{},{},{}", i, j, self.values[idx])?;
                idx += 1;
            }
        }
        out.flush()?;
        Ok(())
    }
}

/// Compute the condensed dissimilarity structure for a set of sequences.
///
/// Parameters:
/// rows: the state sequences, one per subject, all of equal length.
/// metric: the position-wise distance to apply to each pair.
///
/// Returns:
/// A condensed matrix with one value per unordered pair in canonical order.
/// The pairwise sweep runs on the current rayon thread pool; results are
/// collected back in canonical pair order regardless of completion order.
pub fn pairwise_distances(rows: &[Vec<u32>], metric: Metric) -> Result<CondensedMatrix, AppError> {
    if let Some(first) = rows.first() {
        let t = first.len();
        if t == 0 {
            return Err(AppError::InvalidInput(
                "Sequences must have at least one time point".to_string(),
            ));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != t {
                return Err(AppError::InvalidInput(format!(
                    "Sequence length mismatch between row 0 ({} time points) and row {} ({} time points)",
                    t,
                    i,
                    row.len()
                )));
            }
        }
    }

    let n = rows.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect();
    let values: Vec<f64> = pairs
        .par_iter()
        .map(|&(i, j)| metric.distance(&rows[i], &rows[j]))
        .collect();

    CondensedMatrix::new(n, values)
}

/// Validate distance command arguments
fn validate_distance_args(args: &DistanceArgs) -> Result<(), Box<dyn Error>> {
    if args.input.trim().is_empty() {
        return Err("Error: Input file path cannot be empty".into());
    }
    if !Path::new(&args.input).exists() {
        return Err(format!("Error: Input file does not exist: {}", args.input).into());
    }
    if !args.input.ends_with(".csv") {
        return Err(format!("Error: Input file path must end with .csv: {}", args.input).into());
    }

    if args.mapping.trim().is_empty() {
        return Err("Error: Mapping file path cannot be empty".into());
    }
    if !Path::new(&args.mapping).exists() {
        return Err(format!("Error: Mapping file does not exist: {}", args.mapping).into());
    }

    if args.output.trim().is_empty() {
        return Err("Error: Output file path cannot be empty".into());
    }
    if !args.output.ends_with(".csv") {
        return Err(format!(
            "Error: Output file path must end with .csv: {}",
            args.output
        )
        .into());
    }

    args.metric.parse::<Metric>()?;

    if let Some(threads) = args.threads {
        if threads == 0 {
            return Err("Error: Thread count must be at least 1".into());
        }
    }

    Ok(())
}

pub fn distance_csv(args: &DistanceArgs, logger: &mut crate::Logger) -> Result<(), Box<dyn Error>> {
    // Validate distance command parameters
    validate_distance_args(args)?;

    let start_time = Instant::now();
    let metric: Metric = args.metric.parse()?;

    let num_threads = args.threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });

    // Record environment information and parameters
    logger.log("=== Trajector Distance Function Log ===")?;
    logger.log(&format!("Software Version: v{}", crate::VERSION))?;
    logger.log(&format!(
        "Runtime: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    ))?;
    logger.log(&format!("Input File: {}", args.input))?;
    logger.log(&format!("Mapping File: {}", args.mapping))?;
    logger.log(&format!("Output File: {}", args.output))?;
    logger.log(&format!("Metric: {}", metric.name()))?;
    logger.log(&format!("Threads: {}", num_threads))?;
    logger.log("Starting distance computation...")?;

    // Set rayon thread pool size
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
        .unwrap_or(());

    println!("[Loading data]");
    println!("    Sequence data: {}", args.input);
    println!("    State mapping: {}", args.mapping);
    println!();

    let mapping = StateMapping::from_csv(&args.mapping)?;
    let matrix = SequenceMatrix::from_csv(&args.input, &mapping)?;
    logger.log(&format!(
        "Loaded {} sequences with {} time points over {} states",
        matrix.n_rows(),
        matrix.n_cols(),
        mapping.len()
    ))?;

    println!("[Params]");
    println!("    Metric: {}.", metric.name());
    println!("    Threads: {}.", num_threads);
    println!();

    let n = matrix.n_rows();
    let n_pairs = n * n.saturating_sub(1) / 2;
    let mut progress = crate::progress::SimpleProgress::new(n_pairs);
    progress.update(0)?;
    let condensed = pairwise_distances(matrix.rows(), metric)?;
    progress.finish()?;
    logger.log(&format!("Computed {} pairwise distances", condensed.len()))?;

    condensed.write_csv(&args.output)?;

    println!("\r[Output]                           ");
    println!("    Distance matrix: {}", args.output);
    let elapsed = start_time.elapsed();
    println!("{}", crate::progress::format_time_used(elapsed));
    logger.log("Distance computation completed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sequences over the alphabet {A=1, B=2}
    fn example_rows() -> Vec<Vec<u32>> {
        vec![
            vec![1, 1, 1],
            vec![1, 1, 2],
            vec![2, 2, 2],
            vec![2, 2, 1],
        ]
    }

    #[test]
    fn test_condensed_length_and_range() {
        let rows = example_rows();
        let d = pairwise_distances(&rows, Metric::Hamming).unwrap();
        assert_eq!(d.len(), 4 * 3 / 2);
        assert!(!d.is_empty());
        assert_eq!(d.n(), 4);
        for &v in d.values() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_hamming_concrete_values() {
        let rows = example_rows();
        let d = pairwise_distances(&rows, Metric::Hamming).unwrap();
        assert!((d.get(0, 1) - 1.0 / 3.0).abs() < 1e-12);
        assert!((d.get(0, 2) - 1.0).abs() < 1e-12);
        assert!((d.get(1, 2) - 2.0 / 3.0).abs() < 1e-12);
        assert!((d.get(0, 3) - 2.0 / 3.0).abs() < 1e-12);
        // Sequences 1 and 3 disagree at every position
        assert!((d.get(1, 3) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let rows = example_rows();
        for row in &rows {
            assert_eq!(Metric::Hamming.distance(row, row), 0.0);
            assert_eq!(Metric::Levenshtein.distance(row, row), 0.0);
        }
    }

    #[test]
    fn test_symmetry_table() {
        let cases = [
            (vec![1u32, 2, 3], vec![1u32, 3, 3], 1.0 / 3.0),
            (vec![1, 2], vec![2, 1], 1.0),
            (vec![5, 5, 5, 5], vec![5, 5, 5, 5], 0.0),
        ];
        for (a, b, expected) in &cases {
            let ab = Metric::Hamming.distance(a, b);
            let ba = Metric::Hamming.distance(b, a);
            assert_eq!(ab, ba);
            assert!((ab - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_levenshtein_values() {
        assert_eq!(levenshtein(&[1, 2, 3], &[1, 3, 3]), 1);
        assert_eq!(levenshtein(&[1, 2, 3], &[2, 3, 4]), 2);
        assert_eq!(levenshtein(&[], &[1, 2]), 2);
        // A shift costs one insert and one delete, cheaper than two substitutions
        assert_eq!(levenshtein(&[1, 2, 3, 4], &[2, 3, 4, 5]), 2);
        let d = Metric::Levenshtein.distance(&[1, 2, 3], &[1, 3, 3]);
        assert!((d - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let rows = vec![vec![1, 2, 3], vec![1, 2]];
        let err = pairwise_distances(&rows, Metric::Hamming).unwrap_err();
        match err {
            AppError::InvalidInput(msg) => {
                assert!(msg.contains("row 1"));
                assert!(msg.contains("2 time points"));
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("hamming".parse::<Metric>().unwrap(), Metric::Hamming);
        assert_eq!(
            "hamming-normalized".parse::<Metric>().unwrap(),
            Metric::Hamming
        );
        assert_eq!("edit".parse::<Metric>().unwrap(), Metric::Levenshtein);
        assert!("euclidean".parse::<Metric>().is_err());
    }

    #[test]
    fn test_condensed_index_enumeration() {
        let n = 5;
        let mut expected = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                assert_eq!(condensed_index(n, i, j), expected);
                expected += 1;
            }
        }
        assert_eq!(expected, n * (n - 1) / 2);
    }

    #[test]
    fn test_condensed_length_mismatch_rejected() {
        let err = CondensedMatrix::new(4, vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_get_is_symmetric_accessor() {
        let rows = example_rows();
        let d = pairwise_distances(&rows, Metric::Hamming).unwrap();
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(d.get(i, j), d.get(j, i));
            }
            assert_eq!(d.get(i, i), 0.0);
        }
    }
}
