use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use fathom_core::{is_within, DirNode, FileNode, NodeFlags, TreeNode};
use tokio_util::sync::CancellationToken;

fn file(name: &str, size: i64, parent: &Arc<DirNode>) -> TreeNode {
    TreeNode::File(FileNode::new(
        name,
        size,
        size,
        SystemTime::UNIX_EPOCH,
        0,
        NodeFlags::NONE,
        parent,
    ))
}

#[test]
fn test_deeply_nested_paths() {
    let root = DirNode::new_root("/base", SystemTime::UNIX_EPOCH);
    let mut current = Arc::clone(&root);
    for i in 0..50 {
        let child = DirNode::new_child(
            format!("d{i}"),
            SystemTime::UNIX_EPOCH,
            NodeFlags::NONE,
            &current,
        );
        current.append_child(TreeNode::Dir(Arc::clone(&child)));
        current = child;
    }

    let path = current.path();
    assert!(path.starts_with("/base/d0/d1"));
    assert!(path.ends_with("d49"));
    assert!(is_within(Path::new("/base"), &path));
}

#[test]
fn test_concurrent_append_preserves_all_children() {
    let root = DirNode::new_root("/base", SystemTime::UNIX_EPOCH);

    std::thread::scope(|scope| {
        for t in 0..8 {
            let root = Arc::clone(&root);
            scope.spawn(move || {
                for i in 0..100 {
                    root.append_child(file(&format!("t{t}-{i}"), 1, &root));
                }
            });
        }
    });

    assert_eq!(root.child_count(), 800);
    root.aggregate();
    assert_eq!(root.size(), 800);
    assert_eq!(root.item_count(), 800);
}

#[test]
fn test_hardlink_nodes_do_not_double_count() {
    let root = DirNode::new_root("/base", SystemTime::UNIX_EPOCH);
    root.append_child(TreeNode::File(FileNode::new(
        "original",
        100,
        100,
        SystemTime::UNIX_EPOCH,
        7,
        NodeFlags::NONE,
        &root,
    )));
    root.append_child(TreeNode::File(FileNode::new(
        "alias",
        0,
        0,
        SystemTime::UNIX_EPOCH,
        7,
        NodeFlags::HARDLINK,
        &root,
    )));

    root.aggregate_recursive(&CancellationToken::new());
    assert_eq!(root.size(), 100);
    assert_eq!(root.usage(), 100);
    assert_eq!(root.item_count(), 2);
}

#[test]
fn test_parent_chain_agrees_with_path() {
    let root = DirNode::new_root("/base", SystemTime::UNIX_EPOCH);
    let sub = DirNode::new_child("sub", SystemTime::UNIX_EPOCH, NodeFlags::NONE, &root);
    root.append_child(TreeNode::Dir(Arc::clone(&sub)));
    let leaf = FileNode::new(
        "leaf",
        1,
        1,
        SystemTime::UNIX_EPOCH,
        0,
        NodeFlags::NONE,
        &sub,
    );
    sub.append_child(TreeNode::File(Arc::clone(&leaf)));

    let parent = leaf.parent().expect("leaf has a parent");
    assert_eq!(parent.name, "sub");
    assert_eq!(leaf.path(), parent.path().join("leaf"));

    // Exactly one occurrence among the parent's children.
    let occurrences = parent
        .snapshot_children()
        .iter()
        .filter(|c| c.name() == "leaf")
        .count();
    assert_eq!(occurrences, 1);
}

#[test]
fn test_tree_drop_releases_nodes() {
    let root = DirNode::new_root("/base", SystemTime::UNIX_EPOCH);
    let sub = DirNode::new_child("sub", SystemTime::UNIX_EPOCH, NodeFlags::NONE, &root);
    root.append_child(TreeNode::Dir(Arc::clone(&sub)));

    // Parent links are weak: dropping the root must not be kept alive by
    // children holding back-references.
    let weak_root = Arc::downgrade(&root);
    drop(root);
    drop(sub);
    assert!(weak_root.upgrade().is_none());

    // A surviving child sees its parent disappear rather than leak.
    let root2 = DirNode::new_root("/base", SystemTime::UNIX_EPOCH);
    let orphan = DirNode::new_child("orphan", SystemTime::UNIX_EPOCH, NodeFlags::NONE, &root2);
    drop(root2);
    assert!(orphan.parent().is_none());
    assert_eq!(orphan.path(), PathBuf::from("orphan"));
}
