//! Dependency graph construction and install ordering.
//!
//! [`graph_dependencies`] expands a package into a [`TopologicalHash`]: an
//! insertion-ordered map from package id to the ids of its runtime
//! dependencies. Insertion order is discovery order (pre-order), which is *not*
//! an install order; callers derive one with [`TopologicalHash::topological_order`]
//! or [`TopologicalHash::order_subset`].
//!
//! Nodes live in an arena keyed by [`PackageId`], so diamonds and cycles never
//! produce pointer cycles. The walk keeps an explicit "visiting" stack and
//! reports a cycle as [`DecantError::Cycle`] instead of recursing forever.

use crate::error::{DecantError, Result};
use crate::package::{DependencyKind, Package, PackageId};
use std::collections::{HashMap, HashSet};

/// Source of package definitions
pub trait DependencyResolver {
    /// Resolve an id to its latest known definition
    fn resolve(&self, id: &PackageId) -> Result<Package>;

    /// Resolve a user-supplied name (`name` or `tap/name`, formula or cask)
    fn find(&self, name: &str) -> Result<Package>;

    fn dependencies_of(&self, package: &Package) -> Result<Vec<(Package, DependencyKind)>> {
        package
            .dependencies
            .iter()
            .map(|dep| Ok((self.resolve(&dep.id)?, dep.kind)))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopologicalHash {
    order: Vec<PackageId>,
    edges: HashMap<PackageId, Vec<PackageId>>,
    packages: HashMap<PackageId, Package>,
}

impl TopologicalHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.edges.contains_key(id)
    }

    /// Ids in discovery order
    pub fn keys(&self) -> impl Iterator<Item = &PackageId> {
        self.order.iter()
    }

    pub fn package(&self, id: &PackageId) -> Option<&Package> {
        self.packages.get(id)
    }

    pub fn dependencies(&self, id: &PackageId) -> &[PackageId] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Insert a node with its direct dependencies. Re-inserting replaces the
    /// edge list but keeps the original discovery position.
    pub fn insert(&mut self, package: Package, dependencies: Vec<PackageId>) {
        let id = package.id.clone();
        if !self.edges.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.edges.insert(id.clone(), dependencies);
        self.packages.insert(id, package);
    }

    /// Every package reachable from `id`, excluding `id` itself
    pub fn transitive_dependencies(&self, id: &PackageId) -> HashSet<PackageId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&PackageId> = self.dependencies(id).iter().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependencies(next));
            }
        }
        seen.remove(id);
        seen
    }

    /// All nodes ordered so that every dependency precedes its dependents.
    /// Ties keep discovery order.
    pub fn topological_order(&self) -> Result<Vec<PackageId>> {
        let mut sorted = Vec::with_capacity(self.order.len());
        let mut visited = HashSet::new();
        let mut visiting = Vec::new();

        for id in &self.order {
            self.visit(id, &mut visited, &mut visiting, &mut sorted)?;
        }

        Ok(sorted)
    }

    /// Install order restricted to `subset`. Ordering constraints that pass
    /// through nodes outside the subset are still honored.
    pub fn order_subset(&self, subset: &HashSet<PackageId>) -> Result<Vec<PackageId>> {
        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|id| subset.contains(id))
            .collect())
    }

    fn visit(
        &self,
        id: &PackageId,
        visited: &mut HashSet<PackageId>,
        visiting: &mut Vec<PackageId>,
        sorted: &mut Vec<PackageId>,
    ) -> Result<()> {
        if visited.contains(id) {
            return Ok(());
        }
        if let Some(start) = visiting.iter().position(|v| v == id) {
            return Err(cycle_error(&visiting[start..], id));
        }

        visiting.push(id.clone());
        for dep in self.dependencies(id) {
            self.visit(dep, visited, visiting, sorted)?;
        }
        visiting.pop();

        visited.insert(id.clone());
        sorted.push(id.clone());
        Ok(())
    }
}

fn cycle_error(stack: &[PackageId], closing: &PackageId) -> DecantError {
    let mut path: Vec<String> = stack.iter().map(ToString::to_string).collect();
    path.push(closing.to_string());
    DecantError::Cycle { path }
}

/// Expand `root` and its runtime dependencies into `acc`.
///
/// Formula roots contribute their required/recommended formula dependencies
/// and any cask requirements; cask roots contribute their `depends_on`
/// formulae and casks. Unknown dependencies abort the whole expansion.
pub fn graph_dependencies(
    root: &Package,
    resolver: &dyn DependencyResolver,
    acc: &mut TopologicalHash,
) -> Result<()> {
    let mut visiting = Vec::new();
    expand(root, resolver, acc, &mut visiting)
}

fn expand(
    package: &Package,
    resolver: &dyn DependencyResolver,
    acc: &mut TopologicalHash,
    visiting: &mut Vec<PackageId>,
) -> Result<()> {
    if let Some(start) = visiting.iter().position(|v| v == &package.id) {
        return Err(cycle_error(&visiting[start..], &package.id));
    }
    if acc.contains(&package.id) {
        return Ok(());
    }

    let dependencies: Vec<Package> = resolver
        .dependencies_of(package)?
        .into_iter()
        .filter(|(_, kind)| kind.is_runtime())
        .map(|(dep, _)| dep)
        .collect();

    tracing::debug!(
        "graph: {} -> [{}]",
        package.id,
        dependencies
            .iter()
            .map(|d| d.id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    acc.insert(
        package.clone(),
        dependencies.iter().map(|d| d.id.clone()).collect(),
    );

    visiting.push(package.id.clone());
    for dep in &dependencies {
        expand(dep, resolver, acc, visiting)?;
    }
    visiting.pop();

    Ok(())
}

/// Expand several roots into one graph
pub fn build_graph(roots: &[Package], resolver: &dyn DependencyResolver) -> Result<TopologicalHash> {
    let mut acc = TopologicalHash::new();
    for root in roots {
        graph_dependencies(root, resolver, &mut acc)?;
    }
    Ok(acc)
}
