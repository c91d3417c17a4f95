use clap::Args;
use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use crate::cluster::Linkage;
use crate::error::AppError;

#[derive(Args)]
pub struct AssignArgs {
    /// Input linkage CSV produced by the cluster command
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Number of clusters to form
    #[arg(short = 'k', long = "clusters")]
    pub clusters: usize,
    /// Output cluster label CSV path
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

// Disjoint-set forest with path halving and union by size
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

/// Cut the merge tree into k flat clusters.
///
/// Parameters:
/// linkage: the merge tree over n sequences.
/// k: the number of clusters to form, 1 <= k <= n.
///
/// Returns:
/// One 1-indexed cluster label per sequence, aligned to input row order.
/// The n-k lowest merges (by distance, earliest first among equal heights)
/// are applied; labels are numbered by first appearance while scanning
/// leaves left to right, so repeated calls with the same tree and k give
/// identical assignments.
pub fn cut_tree(linkage: &Linkage, k: usize) -> Result<Vec<u32>, AppError> {
    let n = linkage.n();
    if k < 1 || k > n {
        return Err(AppError::InvalidInput(format!(
            "Cluster count must be between 1 and {}, got {}",
            n, k
        )));
    }
    let merges = linkage.merges();

    let mut order: Vec<usize> = (0..merges.len()).collect();
    order.sort_by(|&a, &b| {
        merges[a]
            .distance
            .partial_cmp(&merges[b].distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    // Representative leaf for every cluster id in the tree
    let mut rep: Vec<usize> = (0..n).collect();
    for merge in merges {
        rep.push(rep[merge.left]);
    }

    let mut uf = UnionFind::new(n);
    for &m in order.iter().take(n - k) {
        uf.union(rep[merges[m].left], rep[merges[m].right]);
    }

    let mut labels = vec![0u32; n];
    let mut label_of_root: HashMap<usize, u32> = HashMap::new();
    let mut next = 1u32;
    for (i, label) in labels.iter_mut().enumerate() {
        let root = uf.find(i);
        *label = *label_of_root.entry(root).or_insert_with(|| {
            let assigned = next;
            next += 1;
            assigned
        });
    }
    Ok(labels)
}

/// Member count per cluster label, sorted by label
pub fn census(labels: &[u32]) -> Vec<(u32, usize)> {
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    let mut rows: Vec<(u32, usize)> = counts.into_iter().collect();
    rows.sort_by_key(|&(label, _)| label);
    rows
}

/// Write cluster labels as a headered CSV aligned to input row order
pub fn write_labels_csv(path: &str, labels: &[u32]) -> Result<(), AppError> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "row,cluster")?;
    for (i, label) in labels.iter().enumerate() {
        writeln!(out, "{},{}", i, label)?;
    }
    out.flush()?;
    Ok(())
}

/// Validate assign command arguments
fn validate_assign_args(args: &AssignArgs) -> Result<(), Box<dyn Error>> {
    if args.input.trim().is_empty() {
        return Err("Error: Input file path cannot be empty".into());
    }
    if !Path::new(&args.input).exists() {
        return Err(format!("Error: Input file does not exist: {}", args.input).into());
    }
    if !args.input.ends_with(".csv") {
        return Err(format!("Error: Input file path must end with .csv: {}", args.input).into());
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

    if args.clusters == 0 {
        return Err("Error: Cluster count must be at least 1".into());
    }

    Ok(())
}

pub fn assign_csv(args: &AssignArgs, logger: &mut crate::Logger) -> Result<(), Box<dyn Error>> {
    // Validate assign command parameters
    validate_assign_args(args)?;

    let start_time = Instant::now();

    // Record environment information and parameters
    logger.log("=== Trajector Assign Function Log ===")?;
    logger.log(&format!("Software Version: v{}", crate::VERSION))?;
    logger.log(&format!(
        "Runtime: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    ))?;
    logger.log(&format!("Input File: {}", args.input))?;
    logger.log(&format!("Output File: {}", args.output))?;
    logger.log(&format!("Clusters: {}", args.clusters))?;
    logger.log("Starting cluster assignment...")?;

    println!("[Loading data]");
    println!("    Linkage matrix: {}", args.input);
    println!();

    let tree = Linkage::from_csv(&args.input)?;
    logger.log(&format!(
        "Loaded merge tree over {} sequences",
        tree.n()
    ))?;

    println!("[Params]");
    println!("    Clusters: {}.", args.clusters);
    println!();

    let labels = cut_tree(&tree, args.clusters)?;
    write_labels_csv(&args.output, &labels)?;

    let counts = census(&labels);
    println!("[Cluster census]");
    for (label, count) in &counts {
        println!("    group_{}: {}", label, count);
        logger.log(&format!("group_{}: {} members", label, count))?;
    }

    println!("\r[Output]                           ");
    println!("    Cluster labels: {}", args.output);
    let elapsed = start_time.elapsed();
    println!("{}", crate::progress::format_time_used(elapsed));
    logger.log("Assignment completed")?;

    Ok(())
}
