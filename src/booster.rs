//! Evaluator for gradient-boosted tree models saved in XGBoost's JSON format.
//!
//! Only what inference needs is read from the file: the trees, the base
//! score, the objective name, and the expected feature count. Tree nodes keep
//! XGBoost's array-of-fields layout; a leaf stores its value in
//! `split_conditions`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::error::{Result, ServiceError};
use crate::features::FeatureVector;
use crate::model::Regressor;

// ---------- File format ----------

/// XGBoost writes `base_score` as `0.5`, `"5E-1"`, `"[5E-1]"` or `[0.5]`
/// depending on version; all collapse to the first scalar.
fn deserialize_base_score<'de, D>(deserializer: D) -> std::result::Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let mut cur = Value::deserialize(deserializer)?;
    loop {
        match cur {
            Value::Number(n) => {
                return n
                    .as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| D::Error::custom("invalid base_score number"))
            }
            Value::String(s) => {
                let t = s.trim();
                if let Ok(f) = t.parse::<f32>() {
                    return Ok(f);
                }
                let inner = t.trim_start_matches('[').trim_end_matches(']');
                return inner
                    .split(',')
                    .next()
                    .and_then(|first| first.trim().parse::<f32>().ok())
                    .ok_or_else(|| D::Error::custom(format!("cannot parse base_score from {:?}", s)));
            }
            Value::Array(arr) => {
                cur = arr
                    .into_iter()
                    .next()
                    .ok_or_else(|| D::Error::custom("empty base_score array"))?;
            }
            _ => return Err(D::Error::custom("base_score must be number, string, or array")),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct TreeParam {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    num_nodes: usize,
}

#[derive(Debug, Deserialize)]
struct TreeJson {
    tree_param: TreeParam,
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f32>,
    default_left: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct ModelTrees {
    trees: Vec<TreeJson>,
}

#[derive(Debug, Deserialize)]
struct DartTrees {
    model: ModelTrees,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
enum GradientBooster {
    Gbtree { model: ModelTrees },
    Gblinear {},
    Dart { gbtree: DartTrees, weight_drop: Vec<f32> },
}

#[derive(Debug, Deserialize)]
struct ObjectiveJson {
    name: String,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct LearnerModelParam {
    #[serde(deserialize_with = "deserialize_base_score")]
    base_score: f32,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    num_feature: usize,
}

#[derive(Debug, Deserialize)]
struct LearnerJson {
    gradient_booster: GradientBooster,
    objective: ObjectiveJson,
    learner_model_param: LearnerModelParam,
}

#[derive(Debug, Deserialize)]
struct ModelJson {
    learner: LearnerJson,
}

// ---------- In-memory model ----------

/// How the summed margin maps to the reported prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Link {
    Identity,
    Exp,
    Sigmoid,
}

impl Link {
    fn for_objective(name: &str) -> Self {
        match name {
            "binary:logistic" | "reg:logistic" => Link::Sigmoid,
            "reg:gamma" | "reg:tweedie" | "count:poisson" => Link::Exp,
            _ => Link::Identity,
        }
    }

    /// Inverse of `apply`, used to move `base_score` into margin space.
    fn to_margin(self, score: f32) -> f32 {
        match self {
            Link::Identity => score,
            Link::Exp => score.max(1e-7).ln(),
            Link::Sigmoid => {
                let p = score.clamp(1e-7, 1.0 - 1e-7);
                (p / (1.0 - p)).ln()
            }
        }
    }

    fn apply(self, margin: f32) -> f32 {
        match self {
            Link::Identity => margin,
            Link::Exp => margin.exp(),
            Link::Sigmoid => 1.0 / (1.0 + (-margin).exp()),
        }
    }
}

#[derive(Debug, Clone)]
struct Tree {
    left: Vec<i32>,
    right: Vec<i32>,
    feature: Vec<u32>,
    /// split threshold for inner nodes, leaf value for leaves
    value: Vec<f32>,
    default_left: Vec<bool>,
}

impl Tree {
    fn from_json(t: TreeJson, tree_idx: usize) -> Result<Self> {
        let n = t.tree_param.num_nodes;
        if n == 0 {
            return Err(ServiceError::Model(format!("tree {} has no nodes", tree_idx)));
        }
        let lens = [
            t.left_children.len(),
            t.right_children.len(),
            t.split_indices.len(),
            t.split_conditions.len(),
            t.default_left.len(),
        ];
        if lens.iter().any(|&len| len != n) {
            return Err(ServiceError::Model(format!(
                "tree {}: node arrays {:?} do not match num_nodes {}",
                tree_idx, lens, n
            )));
        }
        for node in 0..n {
            let (l, r) = (t.left_children[node], t.right_children[node]);
            if l == -1 {
                continue;
            }
            for child in [l, r] {
                if child <= 0 || child as usize >= n || child as usize == node {
                    return Err(ServiceError::Model(format!(
                        "tree {}: node {} references child {} but tree has {} nodes",
                        tree_idx, node, child, n
                    )));
                }
            }
        }
        Ok(Self {
            left: t.left_children,
            right: t.right_children,
            feature: t.split_indices,
            value: t.split_conditions,
            default_left: t.default_left.into_iter().map(|d| d != 0).collect(),
        })
    }

    fn leaf_value(&self, row: &FeatureVector) -> Result<f32> {
        let mut node = 0usize;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..=self.left.len() {
            if self.left[node] == -1 {
                return Ok(self.value[node]);
            }
            let go_left = match row.get(self.feature[node] as usize) {
                Some(x) => x < self.value[node],
                None => self.default_left[node],
            };
            let next = if go_left { self.left[node] } else { self.right[node] };
            node = next as usize;
        }
        Err(ServiceError::Model("tree traversal did not reach a leaf".to_string()))
    }
}

/// A loaded booster ready for single-threaded prediction.
#[derive(Debug, Clone)]
pub struct XgbBooster {
    trees: Vec<Tree>,
    tree_weights: Option<Vec<f32>>,
    base_margin: f32,
    link: Link,
    num_feature: usize,
}

impl XgbBooster {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let model: ModelJson = serde_json::from_slice(bytes)?;
        let learner = model.learner;
        let link = Link::for_objective(&learner.objective.name);

        let (model_trees, tree_weights) = match learner.gradient_booster {
            GradientBooster::Gbtree { model } => (model, None),
            GradientBooster::Dart {
                gbtree,
                weight_drop,
            } => (gbtree.model, Some(weight_drop)),
            GradientBooster::Gblinear {} => {
                return Err(ServiceError::Model(
                    "gblinear boosters are not supported for tree prediction".to_string(),
                ))
            }
        };
        if let Some(w) = &tree_weights {
            if w.len() != model_trees.trees.len() {
                return Err(ServiceError::Model(format!(
                    "dart weight_drop has {} entries for {} trees",
                    w.len(),
                    model_trees.trees.len()
                )));
            }
        }

        let trees = model_trees
            .trees
            .into_iter()
            .enumerate()
            .map(|(i, t)| Tree::from_json(t, i))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            trees,
            tree_weights,
            base_margin: link.to_margin(learner.learner_model_param.base_score),
            link,
            num_feature: learner.learner_model_param.num_feature,
        })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_feature(&self) -> usize {
        self.num_feature
    }

    pub fn link(&self) -> Link {
        self.link
    }

    pub fn predict_row(&self, row: &FeatureVector) -> Result<f32> {
        if self.num_feature > 0 && row.dim() > self.num_feature {
            return Err(ServiceError::Model(format!(
                "feature shape mismatch, expected: {}, got {}",
                self.num_feature,
                row.dim()
            )));
        }
        let mut margin = self.base_margin;
        for (i, tree) in self.trees.iter().enumerate() {
            let leaf = tree.leaf_value(row)?;
            margin += match &self.tree_weights {
                Some(w) => w[i] * leaf,
                None => leaf,
            };
        }
        Ok(self.link.apply(margin))
    }
}

impl Regressor for XgbBooster {
    fn predict_batch(&self, rows: &[FeatureVector]) -> Result<Vec<f32>> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}
