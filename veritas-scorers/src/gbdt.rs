//! Gradient-boosted tree models in LightGBM's text dump format
//!
//! Only numerical splits are supported. A model containing categorical splits
//! is rejected at load time rather than silently mis-evaluated.

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Model loading errors
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read model: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed model: {0}")]
    Malformed(String),

    #[error("Unsupported model: {0}")]
    Unsupported(String),
}

/// A loaded tree ensemble
pub trait TreeModel: Send + Sync {
    /// Number of input features the model was trained on
    fn num_features(&self) -> usize;

    /// Transformed outputs: one probability per class, or a single value
    fn predict(&self, features: &[f64]) -> Vec<f64>;
}

/// Loads a [`TreeModel`] from a file
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn TreeModel>, ModelError>;
}

/// Loader for LightGBM text models
#[derive(Debug, Default, Clone, Copy)]
pub struct LightGbmLoader;

impl ModelLoader for LightGbmLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn TreeModel>, ModelError> {
        Ok(Box::new(GbdtModel::from_file(path)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Objective {
    Binary { sigmoid: f64 },
    Multiclass,
    Regression,
}

impl Objective {
    fn parse(value: &str) -> Self {
        let mut tokens = value.split_whitespace();
        match tokens.next() {
            Some("binary") => {
                let sigmoid = tokens
                    .filter_map(|t| t.strip_prefix("sigmoid:"))
                    .find_map(|s| s.parse().ok())
                    .unwrap_or(1.0);
                Self::Binary { sigmoid }
            }
            Some("multiclass") | Some("multiclassova") => Self::Multiclass,
            _ => Self::Regression,
        }
    }
}

#[derive(Debug, Clone)]
struct Tree {
    split_feature: Vec<usize>,
    threshold: Vec<f64>,
    decision_type: Vec<u8>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_value: Vec<f64>,
}

const ZERO_THRESHOLD: f64 = 1e-35;
const MISSING_ZERO: u8 = 1;
const MISSING_NAN: u8 = 2;

impl Tree {
    fn from_fields(index: usize, fields: &HashMap<&str, &str>) -> Result<Self, ModelError> {
        let num_leaves: usize = parse_scalar(fields, "num_leaves", index)?;
        if fields
            .get("num_cat")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0)
            > 0
        {
            return Err(ModelError::Unsupported(format!(
                "tree {} uses categorical splits",
                index
            )));
        }

        let leaf_value: Vec<f64> = parse_list(fields, "leaf_value", index)?;
        if num_leaves == 0 || leaf_value.len() != num_leaves {
            return Err(ModelError::Malformed(format!(
                "tree {} has {} leaf values for {} leaves",
                index,
                leaf_value.len(),
                num_leaves
            )));
        }

        if num_leaves == 1 {
            return Ok(Self {
                split_feature: Vec::new(),
                threshold: Vec::new(),
                decision_type: Vec::new(),
                left_child: Vec::new(),
                right_child: Vec::new(),
                leaf_value,
            });
        }

        let internal = num_leaves - 1;
        let split_feature: Vec<usize> = parse_list(fields, "split_feature", index)?;
        let threshold: Vec<f64> = parse_list(fields, "threshold", index)?;
        let left_child: Vec<i32> = parse_list(fields, "left_child", index)?;
        let right_child: Vec<i32> = parse_list(fields, "right_child", index)?;
        let decision_type: Vec<u8> = if fields.contains_key("decision_type") {
            parse_list(fields, "decision_type", index)?
        } else {
            vec![0; internal]
        };

        for (name, len) in [
            ("split_feature", split_feature.len()),
            ("threshold", threshold.len()),
            ("decision_type", decision_type.len()),
            ("left_child", left_child.len()),
            ("right_child", right_child.len()),
        ] {
            if len != internal {
                return Err(ModelError::Malformed(format!(
                    "tree {} field {} has {} entries, expected {}",
                    index, name, len, internal
                )));
            }
        }

        // Internal children always follow their parent, which bounds traversal
        for node in 0..internal {
            for child in [left_child[node], right_child[node]] {
                let valid = if child < 0 {
                    ((!child) as usize) < num_leaves
                } else {
                    (child as usize) > node && (child as usize) < internal
                };
                if !valid {
                    return Err(ModelError::Malformed(format!(
                        "tree {} node {} has invalid child {}",
                        index, node, child
                    )));
                }
            }
        }

        Ok(Self {
            split_feature,
            threshold,
            decision_type,
            left_child,
            right_child,
            leaf_value,
        })
    }

    fn max_feature(&self) -> Option<usize> {
        self.split_feature.iter().copied().max()
    }

    fn go_left(&self, node: usize, value: f64) -> bool {
        let decision = self.decision_type[node];
        let default_left = decision & 2 != 0;
        let missing = (decision >> 2) & 3;

        let value = if value.is_nan() && missing != MISSING_NAN {
            0.0
        } else {
            value
        };

        if (missing == MISSING_ZERO && value.abs() <= ZERO_THRESHOLD)
            || (missing == MISSING_NAN && value.is_nan())
        {
            return default_left;
        }
        value <= self.threshold[node]
    }

    fn evaluate(&self, features: &[f64]) -> f64 {
        if self.split_feature.is_empty() {
            return self.leaf_value[0];
        }

        let mut node = 0usize;
        loop {
            let value = features
                .get(self.split_feature[node])
                .copied()
                .unwrap_or(f64::NAN);
            let next = if self.go_left(node, value) {
                self.left_child[node]
            } else {
                self.right_child[node]
            };
            if next < 0 {
                return self.leaf_value[(!next) as usize];
            }
            node = next as usize;
        }
    }
}

/// LightGBM ensemble parsed from its text format
#[derive(Debug, Clone)]
pub struct GbdtModel {
    objective: Objective,
    num_class: usize,
    num_features: usize,
    trees: Vec<Tree>,
}

impl GbdtModel {
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ModelError> {
        let mut header: HashMap<&str, &str> = HashMap::new();
        let mut blocks: Vec<HashMap<&str, &str>> = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line == "end of trees" {
                break;
            }
            if line.starts_with("Tree=") {
                blocks.push(HashMap::new());
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match blocks.last_mut() {
                Some(block) => {
                    block.insert(key, value);
                }
                None => {
                    header.insert(key, value);
                }
            }
        }

        let max_feature_idx: usize = parse_scalar(&header, "max_feature_idx", 0)?;
        let num_class: usize = header
            .get("num_class")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1)
            .max(1);
        let objective = header
            .get("objective")
            .map(|v| Objective::parse(v))
            .unwrap_or(Objective::Regression);

        if blocks.is_empty() {
            return Err(ModelError::Malformed("model has no trees".to_string()));
        }

        let trees = blocks
            .iter()
            .enumerate()
            .map(|(i, fields)| Tree::from_fields(i, fields))
            .collect::<Result<Vec<_>, _>>()?;

        let num_features = max_feature_idx + 1;
        if let Some(max) = trees.iter().filter_map(Tree::max_feature).max() {
            if max >= num_features {
                return Err(ModelError::Malformed(format!(
                    "split on feature {} exceeds max_feature_idx {}",
                    max, max_feature_idx
                )));
            }
        }

        Ok(Self {
            objective,
            num_class,
            num_features,
            trees,
        })
    }

    /// Sum of tree outputs per class before the objective transform
    pub fn raw_scores(&self, features: &[f64]) -> Vec<f64> {
        let mut raw = vec![0.0; self.num_class];
        for (i, tree) in self.trees.iter().enumerate() {
            raw[i % self.num_class] += tree.evaluate(features);
        }
        raw
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_class(&self) -> usize {
        self.num_class
    }
}

impl TreeModel for GbdtModel {
    fn num_features(&self) -> usize {
        self.num_features
    }

    fn predict(&self, features: &[f64]) -> Vec<f64> {
        let raw = self.raw_scores(features);
        match self.objective {
            Objective::Binary { sigmoid } => raw
                .iter()
                .map(|r| 1.0 / (1.0 + (-sigmoid * r).exp()))
                .collect(),
            Objective::Multiclass => softmax(&raw),
            Objective::Regression => raw,
        }
    }
}

fn softmax(raw: &[f64]) -> Vec<f64> {
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = raw.iter().map(|r| (r - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

fn parse_scalar<T: std::str::FromStr>(
    fields: &HashMap<&str, &str>,
    key: &str,
    tree: usize,
) -> Result<T, ModelError> {
    fields
        .get(key)
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| ModelError::Malformed(format!("missing or invalid {} (tree {})", key, tree)))
}

fn parse_list<T: std::str::FromStr>(
    fields: &HashMap<&str, &str>,
    key: &str,
    tree: usize,
) -> Result<Vec<T>, ModelError> {
    let value = fields
        .get(key)
        .ok_or_else(|| ModelError::Malformed(format!("tree {} is missing {}", tree, key)))?;
    value
        .split_whitespace()
        .map(|v| {
            v.parse().map_err(|_| {
                ModelError::Malformed(format!("tree {} has invalid {} value {:?}", tree, key, v))
            })
        })
        .collect()
}

/// Binary model over the eight credibility features, used by tests
#[cfg(test)]
pub(crate) const SAMPLE_BINARY_MODEL: &str = "tree
version=v3
num_class=1
num_tree_per_iteration=1
label_index=0
max_feature_idx=7
objective=binary sigmoid:1
feature_names=domain_trust length_adequacy hyperbole_density emotive_density url_presence semantic_strength length_ratio confidence_placeholder
feature_infos=[0:1] [0.5:1] [0:1] [0:1] [0:1] [0:1] [0:1] [0.3:0.9]
tree_sizes=300

Tree=0
num_leaves=3
num_cat=0
split_feature=0 2
split_gain=10 4
threshold=0.60000000000000009 0.25
decision_type=2 2
left_child=1 -1
right_child=-3 -2
leaf_value=0.5 -2 2
leaf_weight=10 10 10
leaf_count=10 10 10
internal_value=0 0
internal_weight=0 0
internal_count=30 20
is_linear=0
shrinkage=1


end of trees

feature_importances:
domain_trust=1
hyperbole_density=1

parameters:
[boosting: gbdt]
[objective: binary]
end of parameters
";
