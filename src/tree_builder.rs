use tracing::debug;

use crate::error::OlmstedError;
use crate::phylo::PhyloTree;
use crate::sources::Topology;

/// Parses `newick` and, when an outgroup is given, reroots the tree on it.
pub fn build_tree(newick: &str, outgroup: Option<&str>) -> Result<PhyloTree, OlmstedError> {
    let tree = PhyloTree::parse_newick(newick)?;
    match outgroup {
        Some(name) => reroot(tree, name),
        None => Ok(tree),
    }
}

pub fn build_topology(
    topology: &Topology,
    outgroup: Option<&str>,
) -> Result<PhyloTree, OlmstedError> {
    let tree = match topology {
        Topology::Newick(newick) => PhyloTree::parse_newick(newick)?,
        Topology::Edges(edges) => PhyloTree::from_edges(edges)?,
    };
    match outgroup {
        Some(name) => reroot(tree, name),
        None => Ok(tree),
    }
}

/// Reroots `tree` on the node named `outgroup_name`.
///
/// When several nodes carry the name, the first one in preorder wins. The path from the
/// old root to the outgroup is reversed, so every edge keeps its length and the outgroup
/// ends up as a zero-length root. Rerooting on the current root returns the tree unchanged.
pub fn reroot(mut tree: PhyloTree, outgroup_name: &str) -> Result<PhyloTree, OlmstedError> {
    let outgroup = tree
        .find(outgroup_name)
        .ok_or_else(|| OlmstedError::OutgroupNotFound(outgroup_name.to_string()))?;
    if outgroup == tree.root() {
        return Ok(tree);
    }

    let old_root = tree.root();
    let old_root_becomes_leaf = tree.node(old_root).children.len() == 1;
    if old_root_becomes_leaf && tree.node(old_root).name.is_empty() {
        return Err(OlmstedError::MalformedTree(format!(
            "rerooting on {outgroup_name} would turn the unnamed root into a taxon"
        )));
    }

    debug!(
        outgroup = outgroup_name,
        old_root = tree.node(old_root).name.as_str(),
        "rerooting tree"
    );
    tree.reverse_path_to(outgroup);
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn reroot_on_root_is_identity() {
        let tree = PhyloTree::parse_newick("(A:0.1,B:0.2)naive;").unwrap();
        let rerooted = reroot(tree.clone(), "naive").unwrap();
        assert_eq!(rerooted, tree);
    }

    #[test]
    fn reroot_on_child_of_root() {
        let tree = PhyloTree::parse_newick("(naive:0.5,(A:1,B:2)X:0.25)R;").unwrap();
        let tree = reroot(tree, "naive").unwrap();
        let root = tree.node(tree.root());
        assert_eq!(root.name, "naive");
        assert_eq!(root.length, 0.0);
        assert!(root.parent.is_none());

        let old_root = tree.find("R").unwrap();
        assert_eq!(tree.node(old_root).parent, Some(tree.root()));
        assert_eq!(tree.node(old_root).length, 0.5);
        assert_eq!(tree.leaf_names(), vec!["A", "B"]);
    }

    #[test]
    fn reroot_reverses_multi_hop_path() {
        let tree = PhyloTree::parse_newick("((naive:1,A:2)X:3,B:4)R;").unwrap();
        let before_a = {
            let a = tree.find("A").unwrap();
            let b = tree.find("B").unwrap();
            tree.distance(a, b)
        };
        let tree = reroot(tree, "naive").unwrap();
        let x = tree.find("X").unwrap();
        let r = tree.find("R").unwrap();
        assert_eq!(tree.node(x).parent, Some(tree.root()));
        assert_eq!(tree.node(x).length, 1.0);
        assert_eq!(tree.node(r).parent, Some(x));
        assert_eq!(tree.node(r).length, 3.0);

        let a = tree.find("A").unwrap();
        let b = tree.find("B").unwrap();
        assert_eq!(tree.distance(a, b), before_a);
    }

    #[test]
    fn edges_build_the_same_tree_as_newick() {
        let edges = vec![
            ("naive".to_string(), "A".to_string(), 0.5),
            ("naive".to_string(), "B".to_string(), 1.5),
        ];
        let from_edges = build_topology(&Topology::Edges(edges), Some("naive")).unwrap();
        let from_newick = build_tree("(A:0.5,B:1.5)naive:0;", Some("naive")).unwrap();
        assert_eq!(from_edges.to_newick(), from_newick.to_newick());
    }

    #[test]
    fn missing_outgroup() {
        let tree = PhyloTree::parse_newick("(A:1,B:1)R;").unwrap();
        assert_matches!(
            reroot(tree, "germline"),
            Err(OlmstedError::OutgroupNotFound(name)) if name == "germline"
        );
    }

    #[test]
    fn unnamed_root_cannot_become_a_taxon() {
        let tree = PhyloTree::parse_newick("((naive:1,A:2)X:3);").unwrap();
        assert_matches!(
            reroot(tree, "naive"),
            Err(OlmstedError::MalformedTree(_))
        );
    }
}
