//! Dependency graph between calculated columns
//!
//! Each calculation's column maps to the names its expression reads. Names
//! that are not themselves calculations (source fields, or references left
//! dangling by a removal) are kept in the sets but never traversed.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::debug;
use thiserror::Error;

/// A dependency cycle, listed from the first repeated column back to itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dependency cycle: {}", .0.join(" -> "))]
pub struct Cycle(pub Vec<String>);

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Column -> names it depends on
    edges: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dependency set of a column
    pub fn set_dependencies<I, S>(&mut self, column: &str, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deps: BTreeSet<String> = dependencies.into_iter().map(Into::into).collect();
        debug!("Dependencies of {column}: {deps:?}");
        self.edges.insert(column.to_string(), deps);
    }

    /// Add a single edge `column -> dependency`
    pub fn link(&mut self, column: &str, dependency: &str) {
        self.edges
            .entry(column.to_string())
            .or_default()
            .insert(dependency.to_string());
    }

    /// Remove a column's own entry
    pub fn remove(&mut self, column: &str) -> Option<BTreeSet<String>> {
        self.edges.remove(column)
    }

    /// Remove `name` from every other column's dependency set
    pub fn strip(&mut self, name: &str) {
        for deps in self.edges.values_mut() {
            deps.remove(name);
        }
    }

    /// Re-key `old` as `new` and rewrite every reference to it
    pub fn rename(&mut self, old: &str, new: &str) {
        if let Some(deps) = self.edges.remove(old) {
            self.edges.insert(new.to_string(), deps);
        }
        for deps in self.edges.values_mut() {
            if deps.remove(old) {
                deps.insert(new.to_string());
            }
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.edges.contains_key(column)
    }

    pub fn dependencies(&self, column: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(column)
    }

    /// Columns whose dependency set names `column`
    pub fn direct_dependents(&self, column: &str) -> BTreeSet<String> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(column))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every column that depends on `column`, directly or through others
    pub fn transitive_dependents(&self, column: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut queue = vec![column.to_string()];
        while let Some(current) = queue.pop() {
            for dependent in self.direct_dependents(&current) {
                if dependent != column && found.insert(dependent.clone()) {
                    queue.push(dependent);
                }
            }
        }
        found
    }

    /// A cycle that passes through `column`, if any
    pub fn cycle_through(&self, column: &str) -> Option<Cycle> {
        let mut path = vec![column.to_string()];
        let mut visited = HashSet::new();
        if self.find_path_back(column, column, &mut path, &mut visited) {
            Some(Cycle(path))
        } else {
            None
        }
    }

    fn find_path_back(
        &self,
        target: &str,
        current: &str,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> bool {
        let Some(deps) = self.edges.get(current) else {
            return false;
        };
        for dep in deps {
            if dep == target {
                path.push(dep.clone());
                return true;
            }
            if !self.edges.contains_key(dep) || !visited.insert(dep.clone()) {
                continue;
            }
            path.push(dep.clone());
            if self.find_path_back(target, dep, path, visited) {
                return true;
            }
            path.pop();
        }
        false
    }

    /// Order `columns` so every column comes after the columns it depends on.
    ///
    /// Only dependencies accepted by `is_node` are traversed; they must also be
    /// in `columns` to appear in the output. Roots are visited in the given
    /// order, so the result is deterministic. Fails on the first cycle met.
    pub fn topological_order<'a, I, F>(&self, columns: I, is_node: F) -> Result<Vec<String>, Cycle>
    where
        I: IntoIterator<Item = &'a str>,
        F: Fn(&str) -> bool,
    {
        let roots: Vec<&str> = columns.into_iter().collect();
        let wanted: HashSet<&str> = roots.iter().copied().collect();

        let mut sorted = Vec::with_capacity(roots.len());
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for root in &roots {
            self.visit(root, &wanted, &is_node, &mut visited, &mut stack, &mut sorted)?;
        }
        Ok(sorted)
    }

    fn visit<F>(
        &self,
        column: &str,
        wanted: &HashSet<&str>,
        is_node: &F,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
        sorted: &mut Vec<String>,
    ) -> Result<(), Cycle>
    where
        F: Fn(&str) -> bool,
    {
        if let Some(pos) = stack.iter().position(|c| c == column) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(column.to_string());
            return Err(Cycle(cycle));
        }
        if visited.contains(column) {
            return Ok(());
        }

        stack.push(column.to_string());
        if let Some(deps) = self.edges.get(column) {
            for dep in deps {
                if self.edges.contains_key(dep) && is_node(dep) {
                    self.visit(dep, wanted, is_node, visited, stack, sorted)?;
                }
            }
        }
        stack.pop();

        visited.insert(column.to_string());
        if wanted.contains(column) {
            sorted.push(column.to_string());
        }
        Ok(())
    }
}
