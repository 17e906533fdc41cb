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
    collections::{HashSet, VecDeque},
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::global::ID;
use crate::repository::repo::Repository;

/// The kind of filesystem entry a [`Node`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

/// Target of a symlink node. `target_type` is only ever populated on
/// Windows, which needs to know whether to create a file or directory
/// symlink ahead of time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymlinkInfo {
    pub target_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<NodeType>,
}

/// Filesystem metadata captured for a node, independent of its content.
///
/// `has_changed` is the cheap heuristic the archiver uses to decide whether
/// a file needs to be re-chunked against its parent snapshot: size, mtime,
/// ctime and inode together are treated as a reliable proxy for "unchanged"
/// without re-reading the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub size: u64,
    pub mode: Option<u32>,
    pub accessed_time: Option<SystemTime>,
    pub modified_time: Option<SystemTime>,
    pub changed_time: Option<SystemTime>,
    pub owner_uid: Option<u32>,
    pub owner_gid: Option<u32>,
    pub inode: Option<u64>,
    pub device_id: Option<u64>,
    pub links: Option<u64>,
}

impl NodeMetadata {
    #[cfg(unix)]
    fn from_std(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            size: metadata.size(),
            mode: Some(metadata.mode()),
            accessed_time: metadata.accessed().ok(),
            modified_time: metadata.modified().ok(),
            changed_time: std::time::UNIX_EPOCH.checked_add(std::time::Duration::new(
                metadata.ctime().max(0) as u64,
                metadata.ctime_nsec().max(0) as u32,
            )),
            owner_uid: Some(metadata.uid()),
            owner_gid: Some(metadata.gid()),
            inode: Some(metadata.ino()),
            device_id: Some(metadata.dev()),
            links: Some(metadata.nlink()),
        }
    }

    #[cfg(not(unix))]
    fn from_std(metadata: &std::fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            mode: None,
            accessed_time: metadata.accessed().ok(),
            modified_time: metadata.modified().ok(),
            changed_time: None,
            owner_uid: None,
            owner_gid: None,
            inode: None,
            device_id: None,
            links: None,
        }
    }

    /// Whether `other` looks like a different version of the same file,
    /// using size/mtime/ctime/inode as a stand-in for full content
    /// comparison.
    pub fn has_changed(&self, other: &NodeMetadata) -> bool {
        self.size != other.size
            || self.modified_time != other.modified_time
            || self.changed_time != other.changed_time
            || self.inode != other.inode
    }
}

/// A single entry in a [`Tree`]: a file, directory or other filesystem
/// object, plus whatever content/metadata is needed to restore it.
///
/// Directories carry `tree`, the ID of the subtree blob describing their
/// children; files carry `blobs`, the ordered list of content-chunk blob
/// IDs that make up the file. Every other node type is leaf metadata only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub metadata: NodeMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<ID>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blobs: Option<Vec<ID>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_info: Option<SymlinkInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_attributes: Option<Vec<(String, Vec<u8>)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Node {
    /// Builds a [`Node`] describing the filesystem entry at `path`,
    /// without descending into directories or reading file contents.
    pub fn from_path(path: &Path) -> Result<Node> {
        let metadata = std::fs::symlink_metadata(path)
            .with_context(|| format!("Could not stat '{}'", path.display()))?;

        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let file_type = metadata.file_type();
        let node_type = Self::classify(&file_type)
            .with_context(|| format!("Unsupported file type for '{}'", path.display()))?;

        let symlink_info = if node_type == NodeType::Symlink {
            let target_path = std::fs::read_link(path)
                .with_context(|| format!("Could not read symlink '{}'", path.display()))?;
            Some(SymlinkInfo {
                target_path,
                target_type: None,
            })
        } else {
            None
        };

        Ok(Node {
            name,
            node_type,
            metadata: NodeMetadata::from_std(&metadata),
            tree: None,
            blobs: None,
            symlink_info,
            extended_attributes: None,
            error: None,
        })
    }

    #[cfg(unix)]
    fn classify(file_type: &std::fs::FileType) -> Result<NodeType> {
        use std::os::unix::fs::FileTypeExt;

        Ok(if file_type.is_symlink() {
            NodeType::Symlink
        } else if file_type.is_dir() {
            NodeType::Directory
        } else if file_type.is_file() {
            NodeType::File
        } else if file_type.is_block_device() {
            NodeType::BlockDevice
        } else if file_type.is_char_device() {
            NodeType::CharDevice
        } else if file_type.is_fifo() {
            NodeType::Fifo
        } else if file_type.is_socket() {
            NodeType::Socket
        } else {
            bail!("unrecognized file type");
        })
    }

    #[cfg(not(unix))]
    fn classify(file_type: &std::fs::FileType) -> Result<NodeType> {
        Ok(if file_type.is_symlink() {
            NodeType::Symlink
        } else if file_type.is_dir() {
            NodeType::Directory
        } else if file_type.is_file() {
            NodeType::File
        } else {
            bail!("unrecognized file type");
        })
    }

    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.node_type == NodeType::Symlink
    }
}

/// A set of sibling nodes, addressed in the repository by the hash of
/// its serialized JSON form, same as any other blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads and deserializes the tree blob identified by `id`.
    pub fn load_from_repo(repo: &Repository, id: &ID) -> Result<Tree> {
        let data = repo
            .load_blob(id)
            .with_context(|| format!("Could not load tree blob {id}"))?;
        let tree: Tree = serde_json::from_slice(&data)
            .with_context(|| format!("Could not deserialize tree blob {id}"))?;
        Ok(tree)
    }
}

/// Controls how a tree walk proceeds after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitDecision {
    /// Keep walking normally.
    Continue,
    /// Don't descend into this node (a no-op for non-directories).
    SkipNode,
    /// Abort the walk entirely.
    Stop,
}

struct StackEntry {
    parent: Option<ID>,
    path: PathBuf,
    node: Node,
}

/// Walks the tree rooted at `root_id` in depth-first pre-order, calling
/// `visitor` for every node including the root's direct children.
///
/// `visitor` receives `(parent_tree_id, path, node, error)`: `error` is set
/// instead of `node`'s subtree being loaded when a subtree blob fails to
/// load, letting the caller decide (via the returned [`VisitDecision`])
/// whether to keep walking siblings. A tree ID already seen earlier in the
/// walk is skipped rather than re-visited, guarding against a corrupt or
/// adversarially crafted tree that references itself.
pub fn visit<F>(repo: &Repository, root_id: &ID, base_path: PathBuf, mut visitor: F) -> Result<()>
where
    F: FnMut(Option<&ID>, &Path, &Node, Option<&anyhow::Error>) -> VisitDecision,
{
    let mut visited_trees: HashSet<ID> = HashSet::new();
    visited_trees.insert(root_id.clone());

    let root_tree = Tree::load_from_repo(repo, root_id)?;
    let mut stack: Vec<StackEntry> = Vec::new();
    for node in root_tree.nodes.into_iter().rev() {
        let path = base_path.join(&node.name);
        stack.push(StackEntry {
            parent: Some(root_id.clone()),
            path,
            node,
        });
    }

    while let Some(entry) = stack.pop() {
        let StackEntry { parent, path, node } = entry;

        let subtree_id = node.tree.clone();
        let decision = visitor(parent.as_ref(), &path, &node, None);

        match decision {
            VisitDecision::Stop => return Ok(()),
            VisitDecision::SkipNode => continue,
            VisitDecision::Continue => {}
        }

        if let Some(subtree_id) = subtree_id {
            if !visited_trees.insert(subtree_id.clone()) {
                continue;
            }

            match Tree::load_from_repo(repo, &subtree_id) {
                Ok(subtree) => {
                    for child in subtree.nodes.into_iter().rev() {
                        let child_path = path.join(&child.name);
                        stack.push(StackEntry {
                            parent: Some(subtree_id.clone()),
                            path: child_path,
                            node: child,
                        });
                    }
                }
                Err(e) => {
                    if visitor(Some(&subtree_id), &path, &node, Some(&e)) == VisitDecision::Stop {
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}

/// Breadth-first variant of [`visit`], useful for callers that want to
/// bound how deep a walk goes or process a tree level by level.
pub fn visit_bfs<F>(
    repo: &Repository,
    root_id: &ID,
    base_path: PathBuf,
    mut visitor: F,
) -> Result<()>
where
    F: FnMut(Option<&ID>, &Path, &Node, Option<&anyhow::Error>) -> VisitDecision,
{
    let mut visited_trees: HashSet<ID> = HashSet::new();
    visited_trees.insert(root_id.clone());

    let root_tree = Tree::load_from_repo(repo, root_id)?;
    let mut frontier: VecDeque<StackEntry> = VecDeque::new();
    for node in root_tree.nodes {
        let path = base_path.join(&node.name);
        frontier.push_back(StackEntry {
            parent: Some(root_id.clone()),
            path,
            node,
        });
    }

    while let Some(entry) = frontier.pop_front() {
        let StackEntry { parent, path, node } = entry;

        let subtree_id = node.tree.clone();
        let decision = visitor(parent.as_ref(), &path, &node, None);

        match decision {
            VisitDecision::Stop => return Ok(()),
            VisitDecision::SkipNode => continue,
            VisitDecision::Continue => {}
        }

        if let Some(subtree_id) = subtree_id {
            if !visited_trees.insert(subtree_id.clone()) {
                continue;
            }

            match Tree::load_from_repo(repo, &subtree_id) {
                Ok(subtree) => {
                    for child in subtree.nodes {
                        let child_path = path.join(&child.name);
                        frontier.push_back(StackEntry {
                            parent: Some(subtree_id.clone()),
                            path: child_path,
                            node: child,
                        });
                    }
                }
                Err(e) => {
                    if visitor(Some(&subtree_id), &path, &node, Some(&e)) == VisitDecision::Stop {
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_from_path_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file_path = dir.path().join("mapachito.txt");
        std::fs::write(&file_path, b"raccoon")?;

        let node = Node::from_path(&file_path)?;
        assert_eq!(node.name, "mapachito.txt");
        assert!(node.is_file());
        assert_eq!(node.metadata.size, 7);
        Ok(())
    }

    #[test]
    fn test_node_from_path_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sub = dir.path().join("subdir");
        std::fs::create_dir(&sub)?;

        let node = Node::from_path(&sub)?;
        assert!(node.is_dir());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_node_from_path_symlink() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("target.txt");
        std::fs::write(&target, b"data")?;
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link)?;

        let node = Node::from_path(&link)?;
        assert!(node.is_symlink());
        assert_eq!(
            node.symlink_info.as_ref().unwrap().target_path,
            target
        );
        Ok(())
    }

    #[test]
    fn test_metadata_has_changed_on_size() {
        let mut a = NodeMetadata::default();
        a.size = 10;
        let mut b = a.clone();
        b.size = 11;
        assert!(a.has_changed(&b));
        assert!(!a.has_changed(&a.clone()));
    }

    #[test]
    fn test_tree_round_trips_through_json() -> Result<()> {
        let node = Node {
            name: "a.txt".to_string(),
            node_type: NodeType::File,
            metadata: NodeMetadata::default(),
            tree: None,
            blobs: Some(vec![ID::from_content(b"chunk")]),
            symlink_info: None,
            extended_attributes: None,
            error: None,
        };
        let tree = Tree {
            nodes: vec![node],
        };

        let json = serde_json::to_vec(&tree)?;
        let decoded: Tree = serde_json::from_slice(&json)?;
        assert_eq!(decoded.nodes.len(), 1);
        assert_eq!(decoded.nodes[0].name, "a.txt");
        Ok(())
    }
}
