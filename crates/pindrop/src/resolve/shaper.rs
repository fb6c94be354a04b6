//! Shapes a finished assignment into the forms callers consume: the flat pin list, the
//! nested dependency tree, and the topologically ordered adjacency graph, all identified
//! by `pkg:pypi/<name>@<version>` Package-URLs.

use crate::resolve::target::TargetEnv;
use crate::types::{Extra, NormalizedPackageName, Requirement, Version};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::{Display, Formatter};

/// Where a requirement came from: supplied by the caller, or declared by a pinned
/// distribution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A root requirement supplied by the caller.
    Root,
    /// Declared by the metadata of a pinned `{name, version}`.
    Package(NormalizedPackageName, Version),
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Root => write!(f, "the input requirements"),
            Origin::Package(name, version) => write!(f, "{name} {version}"),
        }
    }
}

/// One parent→child edge of the resolved dependency graph: a requirement together with
/// the pin that declared it.
#[derive(Debug, Clone)]
pub struct ResolvedEdge {
    /// Who declared the requirement
    pub origin: Origin,
    /// The requirement as written in the metadata (or by the caller)
    pub requirement: Requirement,
    /// The normalized name the requirement resolves to
    pub child: NormalizedPackageName,
}

/// A single selected `{name, version}` binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinnedPackage {
    /// The normalized package name
    pub name: NormalizedPackageName,
    /// The selected version
    #[serde(serialize_with = "serialize_version")]
    pub version: Version,
    /// The extras activated on this pin during resolution
    pub extras: Vec<Extra>,
}

fn serialize_version<S: serde::Serializer>(v: &Version, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

impl PinnedPackage {
    /// The Package-URL of this pin.
    pub fn purl(&self) -> String {
        purl(&self.name, &self.version)
    }
}

impl Display for PinnedPackage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Formats a `pkg:pypi/<normalized-name>@<version>` identifier.
pub fn purl(name: &NormalizedPackageName, version: &Version) -> String {
    format!("pkg:pypi/{name}@{version}")
}

/// A node of the nested dependency tree. A package reached through several parents
/// appears below each of them; a dependency cycle is cut at the second visit along a
/// path, where the node repeats without children.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TreeNode {
    /// The Package-URL of the pin this node refers to
    pub package: String,
    /// The pins required by this node
    pub dependencies: Vec<TreeNode>,
}

/// One row of the flat adjacency-list form of the graph.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GraphEntry {
    /// The Package-URL of the pin
    pub package: String,
    /// The Package-URLs of its direct dependencies, alphabetically
    pub dependencies: Vec<String>,
}

/// The outcome of a successful resolution: the assignment in pin order plus the origin
/// edges that induce the dependency graph, and any warnings gathered along the way.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The selected packages, in the order they were pinned
    pub pins: Vec<PinnedPackage>,
    /// Every resolved requirement edge, roots included
    pub edges: Vec<ResolvedEdge>,
    /// Human-readable warnings (e.g. a yanked version selected by an exact pin)
    pub warnings: Vec<String>,
}

impl Resolution {
    /// The distinct pins in pin order. Guaranteed to contain each name exactly once.
    pub fn flat(&self) -> &[PinnedPackage] {
        &self.pins
    }

    fn pinned_versions(&self) -> HashMap<&NormalizedPackageName, &Version> {
        self.pins.iter().map(|pin| (&pin.name, &pin.version)).collect()
    }

    /// Builds the nested dependency tree: one root node per input requirement, children
    /// are the requirements whose origin is the node's pin.
    pub fn tree(&self) -> Vec<TreeNode> {
        let versions = self.pinned_versions();
        self.edges
            .iter()
            .filter(|edge| edge.origin == Origin::Root)
            .map(|edge| {
                let mut path = HashSet::new();
                self.tree_node(&edge.child, &versions, &mut path)
            })
            .collect()
    }

    fn tree_node(
        &self,
        name: &NormalizedPackageName,
        versions: &HashMap<&NormalizedPackageName, &Version>,
        path: &mut HashSet<NormalizedPackageName>,
    ) -> TreeNode {
        let version = versions
            .get(name)
            .expect("every recorded edge points at a pin");
        let mut node = TreeNode {
            package: purl(name, version),
            dependencies: Vec::new(),
        };
        if !path.insert(name.clone()) {
            // second visit along this path: cut the cycle here
            return node;
        }
        let origin = Origin::Package(name.clone(), (*version).clone());
        for edge in self.edges.iter().filter(|edge| edge.origin == origin) {
            node.dependencies.push(self.tree_node(&edge.child, versions, path));
        }
        path.remove(name);
        node
    }

    /// Builds the flat adjacency-list graph in topological order: parents before
    /// children, ties broken alphabetically.
    pub fn graph(&self) -> Vec<GraphEntry> {
        let versions = self.pinned_versions();

        // direct children per pin, deduplicated
        let mut children: BTreeMap<&NormalizedPackageName, BTreeSet<&NormalizedPackageName>> =
            self.pins.iter().map(|pin| (&pin.name, BTreeSet::new())).collect();
        for edge in &self.edges {
            if let Origin::Package(parent, _) = &edge.origin {
                if let Some(set) = children.get_mut(parent) {
                    set.insert(&edge.child);
                }
            }
        }

        let mut indegree: BTreeMap<&NormalizedPackageName, usize> =
            children.keys().map(|name| (*name, 0)).collect();
        for set in children.values() {
            for child in set {
                if let Some(count) = indegree.get_mut(child) {
                    *count += 1;
                }
            }
        }

        let mut ready: BTreeSet<&NormalizedPackageName> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut entries = Vec::with_capacity(self.pins.len());
        let mut emitted: HashSet<&NormalizedPackageName> = HashSet::new();
        while let Some(name) = ready.iter().next().copied() {
            ready.remove(name);
            emitted.insert(name);
            entries.push(self.graph_entry(name, &children, &versions));
            for child in &children[name] {
                let count = indegree.get_mut(child).expect("child is a pin");
                *count -= 1;
                if *count == 0 {
                    ready.insert(*child);
                }
            }
        }

        // Cycles cannot normally occur (cyclic edges are dropped during resolution), but
        // never silently lose a pin.
        for pin in &self.pins {
            if !emitted.contains(&pin.name) {
                entries.push(self.graph_entry(&pin.name, &children, &versions));
            }
        }

        entries
    }

    fn graph_entry(
        &self,
        name: &NormalizedPackageName,
        children: &BTreeMap<&NormalizedPackageName, BTreeSet<&NormalizedPackageName>>,
        versions: &HashMap<&NormalizedPackageName, &Version>,
    ) -> GraphEntry {
        GraphEntry {
            package: purl(name, versions[name]),
            dependencies: children[name]
                .iter()
                .map(|child| purl(child, versions[child]))
                .collect(),
        }
    }

    /// Renders the JSON document with the nested tree form.
    pub fn tree_document(&self, requirements: &[String], env: &TargetEnv) -> ResolutionDocument {
        ResolutionDocument {
            headers: Headers::new(requirements, env, &self.warnings),
            packages: self.pins.iter().map(PackageEntry::from).collect(),
            resolution: Some(self.tree()),
            resolved_dependencies_graph: None,
        }
    }

    /// Renders the JSON document with the flat adjacency-list form.
    pub fn graph_document(&self, requirements: &[String], env: &TargetEnv) -> ResolutionDocument {
        ResolutionDocument {
            headers: Headers::new(requirements, env, &self.warnings),
            packages: self.pins.iter().map(PackageEntry::from).collect(),
            resolution: None,
            resolved_dependencies_graph: Some(self.graph()),
        }
    }
}

/// The JSON document shape shared by both output forms.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionDocument {
    /// Information about the run that produced the document
    pub headers: Headers,
    /// The flat pin list
    pub packages: Vec<PackageEntry>,
    /// The nested tree, in the tree form of the document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Vec<TreeNode>>,
    /// The adjacency list, in the graph form of the document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_dependencies_graph: Option<Vec<GraphEntry>>,
}

/// Run description emitted at the head of a result document.
#[derive(Debug, Clone, Serialize)]
pub struct Headers {
    /// The producing tool
    pub tool_name: String,
    /// Its version
    pub tool_version: String,
    /// The input requirements as given
    pub requirements: Vec<String>,
    /// The targeted python version
    pub python_version: String,
    /// The targeted operating system
    pub operating_system: String,
    /// Warnings gathered during resolution
    pub warnings: Vec<String>,
}

impl Headers {
    fn new(requirements: &[String], env: &TargetEnv, warnings: &[String]) -> Self {
        Self {
            tool_name: "pindrop".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            requirements: requirements.to_vec(),
            python_version: env.python_version().to_string(),
            operating_system: env.os().to_string(),
            warnings: warnings.to_vec(),
        }
    }
}

/// One pin in the `packages` section of a result document.
#[derive(Debug, Clone, Serialize)]
pub struct PackageEntry {
    /// The Package-URL of the pin
    pub package: String,
    /// The normalized name
    pub name: String,
    /// The selected version
    pub version: String,
    /// Extras activated on the pin
    pub extras: Vec<String>,
}

impl From<&PinnedPackage> for PackageEntry {
    fn from(pin: &PinnedPackage) -> Self {
        Self {
            package: pin.purl(),
            name: pin.name.to_string(),
            version: pin.version.to_string(),
            extras: pin.extras.iter().map(|e| e.as_str().to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    fn name(s: &str) -> NormalizedPackageName {
        NormalizedPackageName::from_str(s).unwrap()
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn req(s: &str) -> Requirement {
        crate::types::PackageRequirement::from_str(s).unwrap().into_inner()
    }

    fn pin(n: &str, ver: &str) -> PinnedPackage {
        PinnedPackage {
            name: name(n),
            version: v(ver),
            extras: Vec::new(),
        }
    }

    fn edge(origin: Origin, requirement: &str, child: &str) -> ResolvedEdge {
        ResolvedEdge {
            origin,
            requirement: req(requirement),
            child: name(child),
        }
    }

    /// flask-like shape: a → {b, c→{d}, e→{d}}
    fn sample() -> Resolution {
        Resolution {
            pins: vec![
                pin("a", "1.0"),
                pin("b", "2.0"),
                pin("c", "3.0"),
                pin("d", "4.0"),
                pin("e", "5.0"),
            ],
            edges: vec![
                edge(Origin::Root, "a", "a"),
                edge(Origin::Package(name("a"), v("1.0")), "b", "b"),
                edge(Origin::Package(name("a"), v("1.0")), "c", "c"),
                edge(Origin::Package(name("a"), v("1.0")), "e", "e"),
                edge(Origin::Package(name("c"), v("3.0")), "d", "d"),
                edge(Origin::Package(name("e"), v("5.0")), "d", "d"),
            ],
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_tree_duplicates_shared_children() {
        let tree = sample().tree();
        assert_eq!(tree.len(), 1);
        let root = &tree[0];
        assert_eq!(root.package, "pkg:pypi/a@1.0");
        let children: Vec<&str> = root.dependencies.iter().map(|n| n.package.as_str()).collect();
        assert_eq!(
            children,
            vec!["pkg:pypi/b@2.0", "pkg:pypi/c@3.0", "pkg:pypi/e@5.0"]
        );
        // d appears under both c and e
        assert_eq!(root.dependencies[1].dependencies[0].package, "pkg:pypi/d@4.0");
        assert_eq!(root.dependencies[2].dependencies[0].package, "pkg:pypi/d@4.0");
    }

    #[test]
    fn test_graph_topological_alphabetical() {
        let graph = sample().graph();
        let order: Vec<&str> = graph.iter().map(|e| e.package.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "pkg:pypi/a@1.0",
                "pkg:pypi/b@2.0",
                "pkg:pypi/c@3.0",
                "pkg:pypi/e@5.0",
                "pkg:pypi/d@4.0",
            ]
        );
        assert_eq!(
            graph[0].dependencies,
            vec!["pkg:pypi/b@2.0", "pkg:pypi/c@3.0", "pkg:pypi/e@5.0"]
        );
        assert!(graph[4].dependencies.is_empty());
    }

    #[test]
    fn test_cycle_is_cut_at_second_visit() {
        // a → b → a, recorded as edges (cannot happen through resolution, which drops
        // cyclic edges, but the shaper stays robust)
        let resolution = Resolution {
            pins: vec![pin("a", "1.0"), pin("b", "2.0")],
            edges: vec![
                edge(Origin::Root, "a", "a"),
                edge(Origin::Package(name("a"), v("1.0")), "b", "b"),
                edge(Origin::Package(name("b"), v("2.0")), "a", "a"),
            ],
            warnings: Vec::new(),
        };
        let tree = resolution.tree();
        let root = &tree[0];
        let b = &root.dependencies[0];
        let a_again = &b.dependencies[0];
        assert_eq!(a_again.package, "pkg:pypi/a@1.0");
        assert!(a_again.dependencies.is_empty());
    }
}
