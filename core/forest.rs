//! Random-forest ensemble evaluator for the final `O46` correction.
//!
//! Trees are distributed as `tree*.csv` files, one row per node:
//! `node_id,feature_id,threshold,left,right`. A leaf has `feature_id == -1`
//! and its `threshold` column holds the prediction. Traversal starts at node
//! 0 and recurses left when `features[feature_id] < threshold`, else right.

use std::path::Path;

use base::{bail_t, Error};

#[derive(Debug, Clone, Copy)]
struct Node {
    feature_id: i16,
    threshold: f64,
    left: u32,
    right: u32,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.feature_id < 0
    }
}

/// A loaded ensemble of regression trees, each a flat array of [`Node`]s
/// indexed by row/node id. Evaluation is an iterative walk from the root.
#[derive(Debug, Clone, Default)]
pub struct RandomForest {
    trees: Vec<Vec<Node>>,
}

impl RandomForest {
    /// Loads every `tree*.csv` file in `dir`, sorted by filename for
    /// determinism. Returns an empty (no-op) forest if `dir` has no such
    /// files, so callers that don't care about the RF blend can omit it.
    pub fn load_dir(dir: &Path) -> Result<RandomForest, Error> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| base::format_err_t!(SchemaError, "reading tree directory: {}", e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.starts_with("tree"))
                    .unwrap_or(false)
                    && p.extension().and_then(|e| e.to_str()) == Some("csv")
            })
            .collect();
        paths.sort();

        let mut trees = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| base::format_err_t!(SchemaError, "reading {}: {}", path.display(), e))?;
            trees.push(parse_tree(&contents)?);
        }
        Ok(RandomForest { trees })
    }

    /// An empty forest; `score` returns `0.0` and contributes nothing to the
    /// `O46` blend. Useful for tests that don't exercise the RF correction.
    pub fn empty() -> RandomForest {
        RandomForest { trees: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Arithmetic mean of every tree's prediction on `features`.
    pub fn score(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trees.iter().map(|t| eval_tree(t, features)).sum();
        sum / self.trees.len() as f64
    }
}

fn eval_tree(tree: &[Node], features: &[f64]) -> f64 {
    let mut idx = 0usize;
    loop {
        let node = &tree[idx];
        if node.is_leaf() {
            return node.threshold;
        }
        let feature = features[node.feature_id as usize];
        idx = if feature < node.threshold {
            node.left as usize
        } else {
            node.right as usize
        };
    }
}

fn parse_tree(csv: &str) -> Result<Vec<Node>, Error> {
    let mut rows: Vec<(u32, Node)> = Vec::new();
    for line in csv.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 5 {
            bail_t!(SchemaError, "malformed tree row: {}", line);
        }
        let parse = |s: &str| -> Result<f64, Error> {
            s.trim()
                .parse()
                .map_err(|_| base::format_err_t!(SchemaError, "malformed tree field: {}", s))
        };
        let node_id = parse(fields[0])? as u32;
        let node = Node {
            feature_id: parse(fields[1])? as i16,
            threshold: parse(fields[2])?,
            left: parse(fields[3])? as u32,
            right: parse(fields[4])? as u32,
        };
        rows.push((node_id, node));
    }
    rows.sort_by_key(|(id, _)| *id);
    Ok(rows.into_iter().map(|(_, n)| n).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STUMP: &str = "0,0,1.5,1,2\n1,-1,5.0,0,0\n2,-1,10.0,0,0\n";

    #[test]
    fn single_tree_takes_correct_branch() {
        let tree = parse_tree(STUMP).unwrap();
        assert_eq!(eval_tree(&tree, &[1.0]), 5.0);
        assert_eq!(eval_tree(&tree, &[2.0]), 10.0);
    }

    #[test]
    fn empty_forest_scores_zero() {
        let forest = RandomForest::empty();
        assert_eq!(forest.score(&[1.0, 2.0]), 0.0);
        assert!(forest.is_empty());
    }

    #[test]
    fn forest_averages_trees() {
        let forest = RandomForest {
            trees: vec![parse_tree(STUMP).unwrap(), parse_tree(STUMP).unwrap()],
        };
        assert_eq!(forest.score(&[1.0]), 5.0);
    }

    #[test]
    fn load_dir_reads_and_sorts_tree_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tree_b.csv"), STUMP).unwrap();
        std::fs::write(dir.path().join("tree_a.csv"), STUMP).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let forest = RandomForest::load_dir(dir.path()).unwrap();
        assert_eq!(forest.trees.len(), 2);
        assert_eq!(forest.score(&[1.0]), 5.0);
    }
}
