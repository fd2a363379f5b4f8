//! Dependency graph - orders steps so every dependency runs first

use crate::error::GraphError;
use crate::step::{BoxedStep, Step};
use std::collections::{BTreeSet, HashMap};

/// Steps plus the dependency edges between them
///
/// Edges point from a dependency to its dependents. Steps keep their
/// insertion order, which breaks ties in [`DependencyGraph::topological_order`].
#[derive(Default)]
pub struct DependencyGraph {
    steps: Vec<BoxedStep>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step; identifiers must be unique
    ///
    /// Dependencies may name steps that are added later; they are resolved
    /// when the graph is validated.
    pub fn add_step(&mut self, step: BoxedStep) -> Result<(), GraphError> {
        let id = step.id().to_string();
        if self.index.contains_key(&id) {
            return Err(GraphError::DuplicateStep(id));
        }
        self.index.insert(id, self.steps.len());
        self.steps.push(step);
        Ok(())
    }

    /// Build a graph from a list of steps
    pub fn from_steps(steps: impl IntoIterator<Item = BoxedStep>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for step in steps {
            graph.add_step(step)?;
        }
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&dyn Step> {
        self.index.get(id).map(|&i| self.steps[i].as_ref())
    }

    /// Steps in insertion order
    pub fn steps(&self) -> impl Iterator<Item = &dyn Step> {
        self.steps.iter().map(|s| s.as_ref())
    }

    pub(crate) fn step_at(&self, index: usize) -> &dyn Step {
        self.steps[index].as_ref()
    }

    /// Deduplicated dependency indices of a step
    pub(crate) fn dependency_indices(&self, index: usize) -> Vec<usize> {
        let mut seen = BTreeSet::new();
        self.steps[index]
            .dependencies()
            .iter()
            .filter_map(|dep| self.index.get(dep).copied())
            .filter(|&i| seen.insert(i))
            .collect()
    }

    /// Dependents of each step, by index
    pub(crate) fn dependents_by_index(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.steps.len()];
        for index in 0..self.steps.len() {
            for dep in self.dependency_indices(index) {
                dependents[dep].push(index);
            }
        }
        dependents
    }

    /// Check every dependency exists and no step depends on itself
    pub fn validate(&self) -> Result<(), GraphError> {
        for step in &self.steps {
            for dep in step.dependencies() {
                if dep == step.id() {
                    return Err(GraphError::SelfDependency(dep.clone()));
                }
                if !self.index.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        step: step.id().to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Step identifiers with every dependency before its dependents
    ///
    /// Among steps that are ready at the same time, the one added first
    /// comes first, so repeated runs order steps identically.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        Ok(self
            .order_indices()?
            .into_iter()
            .map(|i| self.steps[i].id().to_string())
            .collect())
    }

    /// Kahn's algorithm over step indices
    pub(crate) fn order_indices(&self) -> Result<Vec<usize>, GraphError> {
        self.validate()?;

        let dependents = self.dependents_by_index();
        let mut in_degree: Vec<usize> = (0..self.steps.len())
            .map(|i| self.dependency_indices(i).len())
            .collect();

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut ordered = Vec::with_capacity(self.steps.len());
        while let Some(next) = ready.pop_first() {
            ordered.push(next);
            for &child in &dependents[next] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if ordered.len() != self.steps.len() {
            return Err(GraphError::Cycle {
                ids: self.cycle_members(&in_degree, &dependents),
            });
        }

        Ok(ordered)
    }

    /// Steps left over after Kahn's algorithm, minus those that merely hang
    /// off a cycle (no dependents among the leftovers)
    fn cycle_members(&self, in_degree: &[usize], dependents: &[Vec<usize>]) -> Vec<String> {
        let mut remaining: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > 0)
            .map(|(i, _)| i)
            .collect();

        loop {
            let leaves: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&i| !dependents[i].iter().any(|c| remaining.contains(c)))
                .collect();
            if leaves.is_empty() {
                break;
            }
            for leaf in leaves {
                remaining.remove(&leaf);
            }
        }

        remaining
            .into_iter()
            .map(|i| self.steps[i].id().to_string())
            .collect()
    }

    /// Every step that depends on `id`, directly or transitively, in insertion order
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let dependents = self.dependents_by_index();
        let mut found = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for &child in &dependents[current] {
                if found.insert(child) {
                    stack.push(child);
                }
            }
        }
        found
            .into_iter()
            .map(|i| self.steps[i].id().to_string())
            .collect()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field(
                "steps",
                &self.steps.iter().map(|s| s.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
