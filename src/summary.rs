use clap::Args;
use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crate::error::AppError;
use crate::matrix::{SequenceMatrix, StateMapping};

#[derive(Args)]
pub struct SummaryArgs {
    /// Input sequence CSV (wide format, one row per subject)
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// State mapping CSV (label,code,color)
    #[arg(short = 'm', long = "mapping")]
    pub mapping: String,
    /// Cluster label CSV produced by the assign command (optional; without
    /// it the whole cohort is summarized as one group)
    #[arg(short = 'c', long = "labels")]
    pub labels: Option<String>,
    /// Output summary CSV path
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

/// Per-group occupancy percentages: one series per state, one value per
/// time point
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub label: u32,
    pub members: usize,
    /// Indexed [state][time], NaN where no group member ever holds the state
    pub percentages: Vec<Vec<f64>>,
}

/// Read a cluster label CSV (header row,cluster) written by the assign
/// command, checking that rows are consecutive from 0
pub fn read_labels_csv(path: &str) -> Result<Vec<u32>, AppError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let _header = lines
        .next()
        .ok_or_else(|| AppError::InvalidInput(format!("Label file is empty: {}", path)))??;

    let mut labels = Vec::new();
    for (idx, line) in lines.enumerate() {
        let l = line?;
        if l.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = l.split(',').map(|s| s.trim()).collect();
        if fields.len() < 2 {
            return Err(AppError::InvalidInput(format!(
                "Label file line {} needs row,cluster columns: {}",
                idx + 2,
                l
            )));
        }
        let row = fields[0].parse::<usize>().map_err(|_| {
            AppError::InvalidInput(format!(
                "Label file line {} has a non-numeric row index: {}",
                idx + 2,
                fields[0]
            ))
        })?;
        if row != labels.len() {
            return Err(AppError::InvalidInput(format!(
                "Label file rows out of order: expected row {}, found {}",
                labels.len(),
                row
            )));
        }
        let label = fields[1].parse::<u32>().map_err(|_| {
            AppError::InvalidInput(format!(
                "Label file line {} has a non-numeric cluster label: {}",
                idx + 2,
                fields[1]
            ))
        })?;
        if label == 0 {
            return Err(AppError::InvalidInput(format!(
                "Label file line {} has cluster label 0; labels start at 1",
                idx + 2
            )));
        }
        labels.push(label);
    }
    Ok(labels)
}

/// Compute per-group, per-time-point state occupancy percentages.
///
/// Parameters:
/// matrix: the sequence cohort.
/// mapping: the state alphabet, fixing the state order of the output.
/// labels: one cluster label per row, or None to treat the whole cohort as
/// a single group labeled 1.
///
/// Returns:
/// One summary per group, ordered by label. The denominator for a state is
/// the number of group members whose sequence contains that state anywhere,
/// so a state held by few members can still show high percentages; cells
/// for states no member ever holds are NaN.
pub fn state_percentages(
    matrix: &SequenceMatrix,
    mapping: &StateMapping,
    labels: Option<&[u32]>,
) -> Result<Vec<GroupSummary>, AppError> {
    let n = matrix.n_rows();
    let whole_cohort;
    let labels = match labels {
        Some(l) => {
            if l.len() != n {
                return Err(AppError::InvalidInput(format!(
                    "Label count {} does not match {} sequences",
                    l.len(),
                    n
                )));
            }
            l
        }
        None => {
            whole_cohort = vec![1u32; n];
            &whole_cohort[..]
        }
    };

    let mut groups: Vec<u32> = labels.to_vec();
    groups.sort_unstable();
    groups.dedup();

    let t = matrix.n_cols();
    let mut summaries = Vec::with_capacity(groups.len());
    for &group in &groups {
        let members: Vec<usize> = (0..n).filter(|&i| labels[i] == group).collect();
        let mut percentages = Vec::with_capacity(mapping.len());
        for &code in mapping.codes() {
            // Subjects in the group that ever hold this state; this is the
            // denominator, not the group size
            let holders: Vec<usize> = members
                .iter()
                .copied()
                .filter(|&i| matrix.row(i).contains(&code))
                .collect();
            let series: Vec<f64> = (0..t)
                .map(|time| {
                    if holders.is_empty() {
                        f64::NAN
                    } else {
                        let count = holders
                            .iter()
                            .filter(|&&i| matrix.row(i)[time] == code)
                            .count();
                        count as f64 / holders.len() as f64 * 100.0
                    }
                })
                .collect();
            percentages.push(series);
        }
        summaries.push(GroupSummary {
            label: group,
            members: members.len(),
            percentages,
        });
    }
    Ok(summaries)
}

/// Write summaries as a headered CSV, one row per group and time point,
/// one column per state. NaN cells are written literally.
pub fn write_summary_csv(
    path: &str,
    matrix: &SequenceMatrix,
    mapping: &StateMapping,
    summaries: &[GroupSummary],
) -> Result<(), AppError> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "cluster,time,{}", mapping.labels().join(","))?;
    for summary in summaries {
        for (time_idx, time) in matrix.times().iter().enumerate() {
            let cells: Vec<String> = summary
                .percentages
                .iter()
                .map(|series| {
                    let v = series[time_idx];
                    if v.is_nan() {
                        "NaN".to_string()
                    } else {
                        format!("{:.4}", v)
                    }
                })
                .collect();
            writeln!(out, "{},{},{}", summary.label, time, cells.join(","))?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Validate summary command arguments
fn validate_summary_args(args: &SummaryArgs) -> Result<(), Box<dyn Error>> {
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

    if let Some(labels) = &args.labels {
        if !Path::new(labels).exists() {
            return Err(format!("Error: Label file does not exist: {}", labels).into());
        }
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

    Ok(())
}

pub fn summary_csv(args: &SummaryArgs, logger: &mut crate::Logger) -> Result<(), Box<dyn Error>> {
    // Validate summary command parameters
    validate_summary_args(args)?;

    let start_time = Instant::now();

    // Record environment information and parameters
    logger.log("=== Trajector Summary Function Log ===")?;
    logger.log(&format!("Software Version: v{}", crate::VERSION))?;
    logger.log(&format!(
        "Runtime: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    ))?;
    logger.log(&format!("Input File: {}", args.input))?;
    logger.log(&format!("Mapping File: {}", args.mapping))?;
    logger.log(&format!(
        "Label File: {}",
        args.labels.as_deref().unwrap_or("(none, whole cohort)")
    ))?;
    logger.log(&format!("Output File: {}", args.output))?;
    logger.log("Starting cohort summary...")?;

    println!("[Loading data]");
    println!("    Sequence data: {}", args.input);
    println!("    State mapping: {}", args.mapping);
    if let Some(labels) = &args.labels {
        println!("    Cluster labels: {}", labels);
    }
    println!();

    let mapping = StateMapping::from_csv(&args.mapping)?;
    let matrix = SequenceMatrix::from_csv(&args.input, &mapping)?;
    let labels = match &args.labels {
        Some(path) => Some(read_labels_csv(path)?),
        None => None,
    };
    logger.log(&format!(
        "Loaded {} sequences with {} time points over {} states",
        matrix.n_rows(),
        matrix.n_cols(),
        mapping.len()
    ))?;

    let summaries = state_percentages(&matrix, &mapping, labels.as_deref())?;
    logger.log(&format!("Summarized {} groups", summaries.len()))?;
    for summary in &summaries {
        logger.log(&format!(
            "group_{}: {} members",
            summary.label, summary.members
        ))?;
    }

    write_summary_csv(&args.output, &matrix, &mapping, &summaries)?;

    println!("\r[Output]                           ");
    println!("    Cohort summary: {}", args.output);
    let elapsed = start_time.elapsed();
    println!("{}", crate::progress::format_time_used(elapsed));
    logger.log("Summary completed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping_ab() -> StateMapping {
        StateMapping::new(
            vec!["A".to_string(), "B".to_string()],
            vec![1, 2],
            vec!["blue".to_string(), "orange".to_string()],
        )
        .unwrap()
    }

    fn matrix_3x2() -> SequenceMatrix {
        SequenceMatrix::new(
            vec!["t1".to_string(), "t2".to_string()],
            vec![vec![1, 1], vec![1, 2], vec![2, 2]],
        )
        .unwrap()
    }

    #[test]
    fn test_group_percentages() {
        let matrix = matrix_3x2();
        let mapping = mapping_ab();
        let labels = vec![1u32, 1, 2];
        let summaries = state_percentages(&matrix, &mapping, Some(&labels)).unwrap();
        assert_eq!(summaries.len(), 2);

        // Group 1 holds rows 0 and 1; both ever hold A, only row 1 holds B
        let g1 = &summaries[0];
        assert_eq!(g1.label, 1);
        assert_eq!(g1.members, 2);
        assert_eq!(g1.percentages[0], vec![100.0, 50.0]);
        assert_eq!(g1.percentages[1], vec![0.0, 100.0]);

        // Group 2 is row 2 only; A never appears, so its cells are NaN
        let g2 = &summaries[1];
        assert_eq!(g2.label, 2);
        assert!(g2.percentages[0][0].is_nan());
        assert!(g2.percentages[0][1].is_nan());
        assert_eq!(g2.percentages[1], vec![100.0, 100.0]);
    }

    #[test]
    fn test_denominator_is_holders_not_group_size() {
        // Only one of three members ever holds B, so B shows 100 percent at
        // t2 even though just a third of the group is in that state
        let matrix = SequenceMatrix::new(
            vec!["t1".to_string(), "t2".to_string()],
            vec![vec![1, 1], vec![1, 1], vec![1, 2]],
        )
        .unwrap();
        let mapping = mapping_ab();
        let labels = vec![1u32, 1, 1];
        let summaries = state_percentages(&matrix, &mapping, Some(&labels)).unwrap();
        let b_series = &summaries[0].percentages[1];
        assert_eq!(b_series, &vec![0.0, 100.0]);
    }

    #[test]
    fn test_whole_cohort_mode() {
        let matrix = matrix_3x2();
        let mapping = mapping_ab();
        let summaries = state_percentages(&matrix, &mapping, None).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].label, 1);
        assert_eq!(summaries[0].members, 3);
        // A holders are rows 0 and 1; B holders are rows 1 and 2
        assert_eq!(summaries[0].percentages[0], vec![100.0, 50.0]);
        assert_eq!(summaries[0].percentages[1], vec![50.0, 100.0]);
    }

    #[test]
    fn test_label_count_mismatch_rejected() {
        let matrix = matrix_3x2();
        let mapping = mapping_ab();
        let labels = vec![1u32, 2];
        let err = state_percentages(&matrix, &mapping, Some(&labels)).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
