use clap::Args;
use std::collections::HashMap;
use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use crate::distance::CondensedMatrix;
use crate::error::AppError;

#[derive(Args)]
pub struct ClusterArgs {
    /// Input condensed distance CSV produced by the distance command
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Linkage method (ward, single, complete, average)
    #[arg(short = 'm', long = "method", default_value = "ward")]
    pub method: String,
    /// Disable optimal leaf ordering of the merge tree
    #[arg(long = "no-optimal-ordering", default_value_t = false)]
    pub no_optimal_ordering: bool,
    /// Output linkage CSV path
    #[arg(short = 'o', long = "output")]
    pub output: String,
    /// Optional inertia profile CSV path (merge heights per cluster count)
    #[arg(long = "inertia")]
    pub inertia: Option<String>,
    /// Log file path (optional)
    #[arg(short = 'l', long = "log")]
    pub log: Option<String>,
}

/// Rule for computing the distance between clusters during agglomeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkageMethod {
    /// Minimum-variance criterion; merge heights are non-decreasing
    Ward,
    Single,
    Complete,
    Average,
}

impl FromStr for LinkageMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ward" => Ok(LinkageMethod::Ward),
            "single" => Ok(LinkageMethod::Single),
            "complete" => Ok(LinkageMethod::Complete),
            "average" => Ok(LinkageMethod::Average),
            other => Err(AppError::Configuration(format!(
                "Unknown linkage method: {}. Supported methods: ward, single, complete, average",
                other
            ))),
        }
    }
}

impl LinkageMethod {
    pub fn name(&self) -> &'static str {
        match self {
            LinkageMethod::Ward => "ward",
            LinkageMethod::Single => "single",
            LinkageMethod::Complete => "complete",
            LinkageMethod::Average => "average",
        }
    }
}

/// One agglomeration step: the two cluster ids merged, the inter-cluster
/// distance at the merge, and the size of the resulting cluster
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

/// The full merge tree over n sequences: n-1 merge records. Leaf ids are
/// 0..n-1; the cluster created by merge m has id n+m. The tree is strictly
/// binary with a single root. Merge distances are non-decreasing under the
/// ward criterion only; consumers must tolerate non-monotone trees.
#[derive(Debug, Clone)]
pub struct Linkage {
    n: usize,
    merges: Vec<Merge>,
}

impl Linkage {
    pub fn new(n: usize, merges: Vec<Merge>) -> Result<Self, AppError> {
        if n < 2 {
            return Err(AppError::InvalidInput(format!(
                "A merge tree needs at least 2 sequences, got {}",
                n
            )));
        }
        if merges.len() != n - 1 {
            return Err(AppError::InvalidInput(format!(
                "Merge tree for {} sequences must hold {} merges, found {}",
                n,
                n - 1,
                merges.len()
            )));
        }
        for (m, merge) in merges.iter().enumerate() {
            let limit = n + m;
            if merge.left >= limit || merge.right >= limit {
                return Err(AppError::InvalidInput(format!(
                    "Merge {} references cluster id {} before it exists",
                    m,
                    merge.left.max(merge.right)
                )));
            }
            if merge.left == merge.right {
                return Err(AppError::InvalidInput(format!(
                    "Merge {} joins cluster {} with itself",
                    m, merge.left
                )));
            }
            if merge.size < 2 || merge.size > n {
                return Err(AppError::InvalidInput(format!(
                    "Merge {} has an impossible cluster size {}",
                    m, merge.size
                )));
            }
            if !merge.distance.is_finite() || merge.distance < 0.0 {
                return Err(AppError::InvalidInput(format!(
                    "Merge {} has a negative or non-finite distance {}",
                    m, merge.distance
                )));
            }
        }
        Ok(Self { n, merges })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Read a linkage CSV (header left,right,distance,size) written by the
    /// cluster stage
    pub fn from_csv(path: &str) -> Result<Self, AppError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let _header = lines
            .next()
            .ok_or_else(|| AppError::InvalidInput(format!("Linkage file is empty: {}", path)))??;

        let mut merges = Vec::new();
        for (idx, line) in lines.enumerate() {
            let l = line?;
            if l.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = l.split(',').map(|s| s.trim()).collect();
            if fields.len() < 4 {
                return Err(AppError::InvalidInput(format!(
                    "Linkage file line {} needs left,right,distance,size columns: {}",
                    idx + 2,
                    l
                )));
            }
            let parse_id = |s: &str| {
                s.parse::<usize>().map_err(|_| {
                    AppError::InvalidInput(format!(
                        "Linkage file line {} has a non-numeric cluster id: {}",
                        idx + 2,
                        s
                    ))
                })
            };
            let left = parse_id(fields[0])?;
            let right = parse_id(fields[1])?;
            let distance = fields[2].parse::<f64>().map_err(|_| {
                AppError::InvalidInput(format!(
                    "Linkage file line {} has a non-numeric distance: {}",
                    idx + 2,
                    fields[2]
                ))
            })?;
            let size = parse_id(fields[3])?;
            merges.push(Merge {
                left,
                right,
                distance,
                size,
            });
        }

        let n = merges.len() + 1;
        Self::new(n, merges)
    }

    /// Write the merge tree as a headered CSV, one merge per row
    pub fn write_csv(&self, path: &str) -> Result<(), AppError> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "left,right,distance,size")?;
        for merge in &self.merges {
            writeln!(
                out,
                "{},{},{},{}",
                merge.left, merge.right, merge.distance, merge.size
            )?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Build the merge tree by generic agglomeration over a working distance
/// matrix.
///
/// Parameters:
/// d: the condensed pairwise dissimilarity structure over n sequences.
/// method: the linkage criterion used to update inter-cluster distances.
///
/// Returns:
/// The linkage holding n-1 merge records. At every step the closest active
/// pair is merged; ties are broken by the lexicographically lowest
/// (smaller id, larger id) cluster-id pair so repeated runs produce
/// identical trees. Surviving distances are updated with the
/// Lance-Williams recurrence for the chosen criterion (ward operates on
/// squared distances).
pub fn linkage(d: &CondensedMatrix, method: LinkageMethod) -> Result<Linkage, AppError> {
    let n = d.n();
    if n < 2 {
        return Err(AppError::InvalidInput(format!(
            "Clustering requires at least 2 sequences, got {}",
            n
        )));
    }

    // Working state: slot-based full matrix, merged clusters collapse into
    // the lower slot and the higher slot retires
    let mut dist = vec![0.0f64; n * n];
    for i in 0..n {
        for j in (i + 1)..n {
            let v = d.get(i, j);
            dist[i * n + j] = v;
            dist[j * n + i] = v;
        }
    }
    let mut active = vec![true; n];
    let mut size = vec![1usize; n];
    let mut id: Vec<usize> = (0..n).collect();
    let mut merges = Vec::with_capacity(n - 1);

    for step in 0..(n - 1) {
        // Closest active pair, ties resolved by lowest id pair
        let mut best: Option<(f64, (usize, usize), (usize, usize))> = None;
        for a in 0..n {
            if !active[a] {
                continue;
            }
            for b in (a + 1)..n {
                if !active[b] {
                    continue;
                }
                let dd = dist[a * n + b];
                let pair = if id[a] < id[b] {
                    (id[a], id[b])
                } else {
                    (id[b], id[a])
                };
                let better = match &best {
                    None => true,
                    Some((bd, bp, _)) => dd < *bd || (dd == *bd && pair < *bp),
                };
                if better {
                    best = Some((dd, pair, (a, b)));
                }
            }
        }
        let (dd, pair, (a, b)) = best.ok_or_else(|| {
            AppError::InvalidInput("No active cluster pair remains to merge".to_string())
        })?;

        merges.push(Merge {
            left: pair.0,
            right: pair.1,
            distance: dd,
            size: size[a] + size[b],
        });

        let (sa, sb) = (size[a] as f64, size[b] as f64);
        for k in 0..n {
            if !active[k] || k == a || k == b {
                continue;
            }
            let sk = size[k] as f64;
            let dka = dist[k * n + a];
            let dkb = dist[k * n + b];
            let updated = match method {
                LinkageMethod::Ward => {
                    let s = sa + sb + sk;
                    (((sk + sa) * dka * dka + (sk + sb) * dkb * dkb - sk * dd * dd) / s)
                        .max(0.0)
                        .sqrt()
                }
                LinkageMethod::Single => dka.min(dkb),
                LinkageMethod::Complete => dka.max(dkb),
                LinkageMethod::Average => (sa * dka + sb * dkb) / (sa + sb),
            };
            dist[k * n + a] = updated;
            dist[a * n + k] = updated;
        }
        size[a] += size[b];
        id[a] = n + step;
        active[b] = false;
    }

    Linkage::new(n, merges)
}

/// In-order leaf traversal of the merge tree. After optimal ordering this
/// is the display order of the dendrogram leaves.
pub fn leaf_order(linkage: &Linkage) -> Vec<usize> {
    let n = linkage.n();
    let merges = linkage.merges();
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![n + merges.len() - 1];
    while let Some(node) = stack.pop() {
        if node < n {
            order.push(node);
        } else {
            let merge = &merges[node - n];
            stack.push(merge.right);
            stack.push(merge.left);
        }
    }
    order
}

// Per-node dynamic-programming table for the leaf-ordering search. Entry
// (u_i, w_i) is the minimal adjacent-leaf distance sum of an ordering of the
// node's leaves that starts at left-child leaf u and ends at right-child
// leaf w (a reversed ordering has the same cost), together with the chosen
// boundary leaves (end of left block, start of right block).
struct NodeTable {
    cost: Vec<f64>,
    arg: Vec<(usize, usize)>,
    right_count: usize,
}

/// Reorder the merge tree so adjacent dendrogram leaves are as similar as
/// possible.
///
/// Among all leaf orderings consistent with the merge structure (every merge
/// may flip its two subtrees) this picks the one minimizing the sum of
/// distances between adjacent leaves, by dynamic programming over subtree
/// boundary leaves. Merge distances and cluster membership are unchanged;
/// only the left/right orientation of merges is.
pub fn optimal_leaf_ordering(
    linkage: &Linkage,
    d: &CondensedMatrix,
) -> Result<Linkage, AppError> {
    let n = linkage.n();
    if d.n() != n {
        return Err(AppError::InvalidInput(format!(
            "Distance structure covers {} sequences but the merge tree covers {}",
            d.n(),
            n
        )));
    }
    let merges = linkage.merges();

    // Leaf list and leaf -> local position for every node id
    let total = 2 * n - 1;
    let mut leaves_of: Vec<Vec<usize>> = Vec::with_capacity(total);
    for i in 0..n {
        leaves_of.push(vec![i]);
    }
    for merge in merges {
        let mut combined = leaves_of[merge.left].clone();
        combined.extend_from_slice(&leaves_of[merge.right]);
        leaves_of.push(combined);
    }
    let mut pos_of: Vec<HashMap<usize, usize>> = Vec::with_capacity(total);
    for leaves in &leaves_of {
        pos_of.push(leaves.iter().enumerate().map(|(i, &l)| (l, i)).collect());
    }

    // Orderings of a child that start at a given leaf: (end leaf, cost)
    // pairs, indexed by the start leaf's local position
    let start_pairs = |node: usize, tables: &[NodeTable]| -> Vec<Vec<(usize, f64)>> {
        if node < n {
            return vec![vec![(node, 0.0)]];
        }
        let merge = &merges[node - n];
        let left = &leaves_of[merge.left];
        let right = &leaves_of[merge.right];
        let table = &tables[node - n];
        let mut pairs = vec![Vec::new(); left.len() + right.len()];
        for (u_i, _) in left.iter().enumerate() {
            for (w_i, &w) in right.iter().enumerate() {
                let c = table.cost[u_i * table.right_count + w_i];
                pairs[u_i].push((w, c));
            }
        }
        for (w_i, _) in right.iter().enumerate() {
            for (u_i, &u) in left.iter().enumerate() {
                let c = table.cost[u_i * table.right_count + w_i];
                pairs[left.len() + w_i].push((u, c));
            }
        }
        pairs
    };

    let mut tables: Vec<NodeTable> = Vec::with_capacity(n - 1);
    for merge in merges.iter() {
        let a_leaves = &leaves_of[merge.left];
        let b_leaves = &leaves_of[merge.right];
        let a_pairs = start_pairs(merge.left, &tables);
        let b_pairs = start_pairs(merge.right, &tables);
        let b_pos = &pos_of[merge.right];

        let mut cost = vec![f64::INFINITY; a_leaves.len() * b_leaves.len()];
        let mut arg = vec![(usize::MAX, usize::MAX); a_leaves.len() * b_leaves.len()];
        for (u_i, u_pairs) in a_pairs.iter().enumerate() {
            // Best left-block ending per right-block start
            let mut h: Vec<(f64, usize)> = Vec::with_capacity(b_leaves.len());
            for &k in b_leaves.iter() {
                let mut best = (f64::INFINITY, usize::MAX);
                for &(mm, ca) in u_pairs {
                    let c = ca + d.get(mm, k);
                    if c < best.0 {
                        best = (c, mm);
                    }
                }
                h.push(best);
            }
            for (k_i, k_pairs) in b_pairs.iter().enumerate() {
                let (hk, mm) = h[k_i];
                let k_leaf = b_leaves[k_i];
                for &(w, cb) in k_pairs {
                    let w_i = b_pos[&w];
                    let idx = u_i * b_leaves.len() + w_i;
                    let total_cost = hk + cb;
                    if total_cost < cost[idx] {
                        cost[idx] = total_cost;
                        arg[idx] = (mm, k_leaf);
                    }
                }
            }
        }
        tables.push(NodeTable {
            cost,
            arg,
            right_count: b_leaves.len(),
        });
    }

    // Best root entry, then walk back down collecting the order
    let root = n + merges.len() - 1;
    let root_table = &tables[root - n];
    let mut best_idx = 0;
    for (idx, &c) in root_table.cost.iter().enumerate() {
        if c < root_table.cost[best_idx] {
            best_idx = idx;
        }
    }
    let root_left = &leaves_of[merges[root - n].left];
    let root_right = &leaves_of[merges[root - n].right];
    let start = root_left[best_idx / root_table.right_count];
    let end = root_right[best_idx % root_table.right_count];

    let mut order = Vec::with_capacity(n);
    reconstruct_order(root, start, end, n, merges, &tables, &pos_of, &mut order);

    // Flip merges so the in-order traversal matches the optimal order
    let mut position = vec![0usize; n];
    for (p, &leaf) in order.iter().enumerate() {
        position[leaf] = p;
    }
    let first_position = |node: usize| -> usize {
        leaves_of[node]
            .iter()
            .map(|&l| position[l])
            .min()
            .unwrap_or(0)
    };
    let reordered = merges
        .iter()
        .map(|merge| {
            if first_position(merge.left) > first_position(merge.right) {
                Merge {
                    left: merge.right,
                    right: merge.left,
                    distance: merge.distance,
                    size: merge.size,
                }
            } else {
                merge.clone()
            }
        })
        .collect();

    Linkage::new(n, reordered)
}

fn reconstruct_order(
    node: usize,
    start: usize,
    end: usize,
    n: usize,
    merges: &[Merge],
    tables: &[NodeTable],
    pos_of: &[HashMap<usize, usize>],
    out: &mut Vec<usize>,
) {
    if node < n {
        out.push(node);
        return;
    }
    let merge = &merges[node - n];
    let table = &tables[node - n];
    if let Some(&u_i) = pos_of[merge.left].get(&start) {
        // Left block leads: start..mm in the left child, k..end in the right
        let w_i = pos_of[merge.right][&end];
        let (mm, k) = table.arg[u_i * table.right_count + w_i];
        reconstruct_order(merge.left, start, mm, n, merges, tables, pos_of, out);
        reconstruct_order(merge.right, k, end, n, merges, tables, pos_of, out);
    } else {
        // Right block leads: the stored entry describes the reversed ordering
        let u_i = pos_of[merge.left][&end];
        let w_i = pos_of[merge.right][&start];
        let (mm, k) = table.arg[u_i * table.right_count + w_i];
        reconstruct_order(merge.right, start, k, n, merges, tables, pos_of, out);
        reconstruct_order(merge.left, mm, end, n, merges, tables, pos_of, out);
    }
}

/// Heights of the last merges, keyed by the cluster count each merge height
/// corresponds to. Feeds elbow-style cluster-count selection.
pub fn inertia_profile(linkage: &Linkage) -> Vec<(usize, f64)> {
    let merges = linkage.merges();
    let take = merges.len().min(10);
    (0..take)
        .map(|j| (j + 2, merges[merges.len() - 1 - j].distance))
        .collect()
}

/// Validate cluster command arguments
fn validate_cluster_args(args: &ClusterArgs) -> Result<(), Box<dyn Error>> {
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

    if let Some(inertia) = &args.inertia {
        if !inertia.ends_with(".csv") {
            return Err(format!(
                "Error: Inertia file path must end with .csv: {}",
                inertia
            )
            .into());
        }
    }

    args.method.parse::<LinkageMethod>()?;

    Ok(())
}

pub fn cluster_csv(args: &ClusterArgs, logger: &mut crate::Logger) -> Result<(), Box<dyn Error>> {
    // Validate cluster command parameters
    validate_cluster_args(args)?;

    let start_time = Instant::now();
    let method: LinkageMethod = args.method.parse()?;

    // Record environment information and parameters
    logger.log("=== Trajector Cluster Function Log ===")?;
    logger.log(&format!("Software Version: v{}", crate::VERSION))?;
    logger.log(&format!(
        "Runtime: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
    ))?;
    logger.log(&format!("Input File: {}", args.input))?;
    logger.log(&format!("Output File: {}", args.output))?;
    logger.log(&format!("Linkage Method: {}", method.name()))?;
    logger.log(&format!(
        "Optimal Ordering: {}",
        !args.no_optimal_ordering
    ))?;
    logger.log("Starting hierarchical clustering...")?;

    println!("[Loading data]");
    println!("    Distance matrix: {}", args.input);
    println!();

    let d = CondensedMatrix::from_csv(&args.input)?;
    logger.log(&format!(
        "Loaded {} pairwise distances over {} sequences",
        d.len(),
        d.n()
    ))?;

    println!("[Params]");
    println!("    Linkage method: {}.", method.name());
    println!("    Optimal ordering: {}.", !args.no_optimal_ordering);
    println!();

    logger.log_and_progress(&format!("[Progressing] Merging {} clusters...", d.n()))?;
    let mut tree = linkage(&d, method)?;
    logger.log(&format!("Built merge tree with {} merges", tree.merges().len()))?;

    if !args.no_optimal_ordering {
        logger.log_and_progress("[Progressing] Optimizing leaf order...")?;
        tree = optimal_leaf_ordering(&tree, &d)?;
        logger.log("Applied optimal leaf ordering")?;
    }
    logger.finish_progress()?;

    tree.write_csv(&args.output)?;

    if let Some(inertia_path) = &args.inertia {
        let profile = inertia_profile(&tree);
        let mut out = BufWriter::new(File::create(inertia_path)?);
        writeln!(out, "clusters,height")?;
        for (k, height) in &profile {
            writeln!(out, "{},{}", k, height)?;
        }
        out.flush()?;
        logger.log(&format!("Wrote inertia profile: {}", inertia_path))?;
    }

    println!("\r[Output]                           ");
    println!("    Linkage matrix: {}", args.output);
    if let Some(inertia_path) = &args.inertia {
        println!("    Inertia profile: {}", inertia_path);
    }
    let elapsed = start_time.elapsed();
    println!("{}", crate::progress::format_time_used(elapsed));
    logger.log("Clustering completed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{pairwise_distances, Metric};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn example_distances() -> CondensedMatrix {
        // Sequences [A,A,A], [A,A,B], [B,B,B], [B,B,A] under normalized
        // position-wise mismatch
        let rows = vec![
            vec![1, 1, 1],
            vec![1, 1, 2],
            vec![2, 2, 2],
            vec![2, 2, 1],
        ];
        pairwise_distances(&rows, Metric::Hamming).unwrap()
    }

    #[test]
    fn test_linkage_record_count_and_sizes() {
        let d = example_distances();
        let tree = linkage(&d, LinkageMethod::Ward).unwrap();
        assert_eq!(tree.merges().len(), 3);
        assert_eq!(tree.merges().last().unwrap().size, 4);
    }

    #[test]
    fn test_ward_merges_expected_pairs() {
        let d = example_distances();
        let tree = linkage(&d, LinkageMethod::Ward).unwrap();
        let merges = tree.merges();
        // The two within-group pairs merge first at 1/3, then the groups join
        assert_eq!((merges[0].left, merges[0].right), (0, 1));
        assert!((merges[0].distance - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!((merges[1].left, merges[1].right), (2, 3));
        assert!((merges[1].distance - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!((merges[2].left, merges[2].right), (4, 5));
        assert!((merges[2].distance - (4.0f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_ward_monotone_on_random_inputs() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..30 {
            let n = rng.gen_range(3..9);
            let rows: Vec<Vec<u32>> = (0..n)
                .map(|_| (0..6).map(|_| rng.gen_range(0..3u32)).collect())
                .collect();
            let d = pairwise_distances(&rows, Metric::Hamming).unwrap();
            let tree = linkage(&d, LinkageMethod::Ward).unwrap();
            let mut prev = 0.0;
            for merge in tree.merges() {
                assert!(
                    merge.distance >= prev - 1e-9,
                    "ward merge heights decreased: {} after {}",
                    merge.distance,
                    prev
                );
                prev = merge.distance;
            }
        }
    }

    #[test]
    fn test_tie_break_lowest_id_pair() {
        // Four identical sequences: every pairwise distance is zero, so the
        // merge order is decided entirely by the id tie-break
        let d = CondensedMatrix::new(4, vec![0.0; 6]).unwrap();
        let tree = linkage(&d, LinkageMethod::Ward).unwrap();
        let merges = tree.merges();
        assert_eq!((merges[0].left, merges[0].right), (0, 1));
        assert_eq!((merges[1].left, merges[1].right), (2, 3));
        assert_eq!((merges[2].left, merges[2].right), (4, 5));
        for merge in merges {
            assert_eq!(merge.distance, 0.0);
        }
    }

    #[test]
    fn test_linkage_deterministic_across_runs() {
        let d = example_distances();
        let a = linkage(&d, LinkageMethod::Ward).unwrap();
        let b = linkage(&d, LinkageMethod::Ward).unwrap();
        assert_eq!(a.merges(), b.merges());
    }

    #[test]
    fn test_too_few_sequences_rejected() {
        let d = CondensedMatrix::new(1, vec![]).unwrap();
        let err = linkage(&d, LinkageMethod::Ward).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_single_linkage_uses_minimum() {
        // Chain 0 - 1 - 2 with a long 0..2 distance: single linkage joins the
        // merged {0,1} cluster to 2 at the short hop, not the long one
        let d = CondensedMatrix::new(3, vec![0.1, 0.9, 0.2]).unwrap();
        let tree = linkage(&d, LinkageMethod::Single).unwrap();
        let merges = tree.merges();
        assert_eq!((merges[0].left, merges[0].right), (0, 1));
        assert!((merges[1].distance - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_complete_and_average_linkage() {
        let d = CondensedMatrix::new(3, vec![0.1, 0.9, 0.2]).unwrap();
        let complete = linkage(&d, LinkageMethod::Complete).unwrap();
        assert!((complete.merges()[1].distance - 0.9).abs() < 1e-12);
        let average = linkage(&d, LinkageMethod::Average).unwrap();
        assert!((average.merges()[1].distance - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_leaf_order_covers_all_leaves() {
        let d = example_distances();
        let tree = linkage(&d, LinkageMethod::Ward).unwrap();
        let mut order = leaf_order(&tree);
        assert_eq!(order.len(), 4);
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    fn adjacent_cost(order: &[usize], d: &CondensedMatrix) -> f64 {
        order.windows(2).map(|w| d.get(w[0], w[1])).sum()
    }

    #[test]
    fn test_optimal_leaf_ordering_minimizes_adjacent_cost() {
        // Tree ((0,1),(2,3)); the cheapest boundary between the two blocks
        // is the 0..3 edge, so the optimal order puts 0 and 3 adjacent
        let d = CondensedMatrix::new(4, vec![0.5, 0.9, 0.1, 0.9, 0.9, 0.5]).unwrap();
        let tree = Linkage::new(
            4,
            vec![
                Merge { left: 0, right: 1, distance: 1.0, size: 2 },
                Merge { left: 2, right: 3, distance: 1.0, size: 2 },
                Merge { left: 4, right: 5, distance: 2.0, size: 4 },
            ],
        )
        .unwrap();
        let ordered = optimal_leaf_ordering(&tree, &d).unwrap();
        let order = leaf_order(&ordered);
        assert!((adjacent_cost(&order, &d) - 1.1).abs() < 1e-12);
        let mut middle = vec![order[1], order[2]];
        middle.sort_unstable();
        assert_eq!(middle, vec![0, 3]);
    }

    #[test]
    fn test_optimal_leaf_ordering_beats_or_matches_default() {
        let mut rng = StdRng::seed_from_u64(21);
        for _ in 0..20 {
            let n = rng.gen_range(3..9);
            let rows: Vec<Vec<u32>> = (0..n)
                .map(|_| (0..6).map(|_| rng.gen_range(0..4u32)).collect())
                .collect();
            let d = pairwise_distances(&rows, Metric::Hamming).unwrap();
            let tree = linkage(&d, LinkageMethod::Ward).unwrap();
            let ordered = optimal_leaf_ordering(&tree, &d).unwrap();
            let before = adjacent_cost(&leaf_order(&tree), &d);
            let after = adjacent_cost(&leaf_order(&ordered), &d);
            assert!(after <= before + 1e-9);
        }
    }

    #[test]
    fn test_optimal_leaf_ordering_preserves_merges() {
        let d = example_distances();
        let tree = linkage(&d, LinkageMethod::Ward).unwrap();
        let ordered = optimal_leaf_ordering(&tree, &d).unwrap();
        for (a, b) in tree.merges().iter().zip(ordered.merges().iter()) {
            let mut pa = [a.left, a.right];
            let mut pb = [b.left, b.right];
            pa.sort_unstable();
            pb.sort_unstable();
            assert_eq!(pa, pb);
            assert_eq!(a.distance, b.distance);
            assert_eq!(a.size, b.size);
        }
    }

    #[test]
    fn test_inertia_profile_orders_heights() {
        let d = example_distances();
        let tree = linkage(&d, LinkageMethod::Ward).unwrap();
        let profile = inertia_profile(&tree);
        assert_eq!(profile.len(), 3);
        assert_eq!(profile[0].0, 2);
        assert!((profile[0].1 - (4.0f64 / 3.0).sqrt()).abs() < 1e-9);
        assert_eq!(profile[2].0, 4);
        assert!((profile[2].1 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_linkage_validation_rejects_forward_reference() {
        let err = Linkage::new(
            3,
            vec![
                Merge { left: 0, right: 4, distance: 0.5, size: 2 },
                Merge { left: 1, right: 3, distance: 0.5, size: 3 },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
