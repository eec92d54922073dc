//! Stage graph
//!
//! Stages form a directed acyclic graph keyed by name. The production
//! pipeline is a straight chain, but nothing here assumes that.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::stage::StageExecutor;

/// One stage of the pipeline
#[derive(Clone)]
pub struct StageDefinition {
    pub name: String,
    pub depends_on: Vec<String>,
    pub executor: Arc<dyn StageExecutor>,
    /// Verification stages have their candidate terms run through the safety gate
    pub verification: bool,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>, executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            executor,
            verification: false,
        }
    }

    pub fn depends_on<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = stages.into_iter().map(Into::into).collect();
        self
    }

    pub fn verification(mut self) -> Self {
        self.verification = true;
        self
    }
}

impl std::fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDefinition")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("verification", &self.verification)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("dependency cycle involving stage '{0}'")]
    Cycle(String),
}

/// Validated stage DAG with a precomputed execution order
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// Declaration order
    stages: Vec<StageDefinition>,
    /// Indices into `stages` in topological order
    order: Vec<usize>,
}

/// Collects stage definitions before validation
#[derive(Debug, Default)]
pub struct StageGraphBuilder {
    stages: Vec<StageDefinition>,
    index: HashMap<String, usize>,
}

impl StageGraphBuilder {
    pub fn add_stage(&mut self, stage: StageDefinition) -> Result<&mut Self, GraphError> {
        if self.index.contains_key(&stage.name) {
            return Err(GraphError::DuplicateStage(stage.name));
        }
        self.index.insert(stage.name.clone(), self.stages.len());
        self.stages.push(stage);
        Ok(self)
    }

    pub fn build(self) -> Result<StageGraph, GraphError> {
        let Self { stages, index } = self;
        if stages.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut in_degree = vec![0usize; stages.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
        for (i, stage) in stages.iter().enumerate() {
            for dep in &stage.depends_on {
                let &d = index.get(dep).ok_or_else(|| GraphError::UnknownDependency {
                    stage: stage.name.clone(),
                    dependency: dep.clone(),
                })?;
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        // Kahn's algorithm; ties resolved by declaration order
        let mut ready: BTreeSet<usize> = (0..stages.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(stages.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != stages.len() {
            let stuck = (0..stages.len())
                .find(|i| !order.contains(i))
                .map(|i| stages[i].name.clone())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(StageGraph { stages, order })
    }
}

impl StageGraph {
    pub fn builder() -> StageGraphBuilder {
        StageGraphBuilder::default()
    }

    /// Validates `stages` and computes the execution order
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, GraphError> {
        let mut builder = Self::builder();
        for stage in stages {
            builder.add_stage(stage)?;
        }
        builder.build()
    }

    /// Stages in declaration order
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Stages in the order they must execute
    pub fn execution_order(&self) -> impl Iterator<Item = &StageDefinition> {
        self.order.iter().map(|&i| &self.stages[i])
    }

    /// Declaration index of a stage
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
