// mapache is an incremental backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Result;

use crate::{
    global::{BlobType, ID, SaveID},
    repository::{
        repo::Repository,
        streamers::StreamNode,
        tree::{Node, Tree},
    },
    utils,
};

/// Tracks directories whose `Tree` blob cannot be serialized yet because not
/// all of their children have streamed through, plus the directory `Node`
/// itself (without its `tree` field) for when that moment comes.
///
/// A directory becomes eligible for serialization once its pending count
/// reaches zero. Completing it may in turn complete its parent, and so on up
/// to the root, which is handled by calling code rather than being a node
/// itself (`init_pending_trees`/`handle_processed_item`'s `root` parameter).
pub struct PendingTrees {
    buckets: HashMap<PathBuf, (Vec<Node>, usize)>,
    pending_nodes: HashMap<PathBuf, Node>,
}

/// Seeds a [`PendingTrees`] for a walk rooted at `root`, given the full list
/// of top-level `paths` that will be streamed under it. The root itself is
/// never emitted by the node streamers, so its expected child count has to
/// be computed up front from the same intermediate-path logic the streamers
/// use internally.
pub fn init_pending_trees(root: &Path, paths: &[PathBuf]) -> PendingTrees {
    let (root_children_count, _intermediate) = utils::get_intermediate_paths(root, paths);

    let mut buckets = HashMap::new();
    buckets.insert(root.to_path_buf(), (Vec::new(), root_children_count));

    PendingTrees {
        buckets,
        pending_nodes: HashMap::new(),
    }
}

/// Folds one streamed `(path, node)` item into `pending_trees`, serializing
/// and saving any directory `Tree` that becomes complete as a result
/// (possibly cascading up through several ancestor directories at once).
/// Once the root directory itself completes, its tree ID is written to
/// `final_root_tree_id`.
///
/// Returns the `(raw, encoded)` byte totals of any tree blobs saved in this call.
pub fn handle_processed_item(
    item: (PathBuf, StreamNode),
    repo: &Repository,
    pending_trees: &mut PendingTrees,
    final_root_tree_id: &mut Option<ID>,
    root: &Path,
) -> Result<(u64, u64)> {
    let (path, stream_node) = item;
    let node = stream_node.node;

    if node.is_dir() {
        pending_trees
            .buckets
            .insert(path.clone(), (Vec::new(), stream_node.num_children));
        pending_trees.pending_nodes.insert(path.clone(), node);
        finalize(&path, repo, pending_trees, final_root_tree_id, root)
    } else {
        insert_into_parent(&path, node, repo, pending_trees, final_root_tree_id, root)
    }
}

fn insert_into_parent(
    path: &Path,
    node: Node,
    repo: &Repository,
    pending_trees: &mut PendingTrees,
    final_root_tree_id: &mut Option<ID>,
    root: &Path,
) -> Result<(u64, u64)> {
    if path == root {
        // The root has no parent bucket of its own; completion is reported
        // through `final_root_tree_id` by `finalize` instead.
        return Ok((0, 0));
    }

    let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());

    let bucket = pending_trees
        .buckets
        .entry(parent.clone())
        .or_insert_with(|| (Vec::new(), 0));
    bucket.0.push(node);
    bucket.1 = bucket.1.saturating_sub(1);

    finalize(&parent, repo, pending_trees, final_root_tree_id, root)
}

fn finalize(
    path: &Path,
    repo: &Repository,
    pending_trees: &mut PendingTrees,
    final_root_tree_id: &mut Option<ID>,
    root: &Path,
) -> Result<(u64, u64)> {
    let ready = matches!(pending_trees.buckets.get(path), Some((_, remaining)) if *remaining == 0);
    if !ready {
        return Ok((0, 0));
    }

    let (mut children, _) = pending_trees.buckets.remove(path).unwrap();
    children.sort_by(|a, b| a.name.cmp(&b.name));
    let tree = Tree { nodes: children };
    let data = serde_json::to_vec(&tree)?;
    let (tree_id, (raw, encoded), _) =
        repo.encode_and_save_blob(BlobType::Tree, data, SaveID::CalculateID)?;

    if path == root {
        *final_root_tree_id = Some(tree_id);
        return Ok((raw, encoded));
    }

    let mut dir_node = pending_trees
        .pending_nodes
        .remove(path)
        .expect("directory node must be stashed before its bucket can complete");
    dir_node.tree = Some(tree_id);

    let (raw2, encoded2) =
        insert_into_parent(path, dir_node, repo, pending_trees, final_root_tree_id, root)?;

    Ok((raw + raw2, encoded + encoded2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_pending_trees_seeds_root_bucket() {
        let root = PathBuf::from("/data");
        let paths = vec![PathBuf::from("/data/a"), PathBuf::from("/data/b/c")];
        let pending = init_pending_trees(&root, &paths);
        assert_eq!(pending.buckets.get(&root).unwrap().1, 2);
    }
}
