//! Trees far deeper than the call stack, as a backend can send them through
//! flattened transfer lists.

mod common;

use common::{Fixture, chunk};
use serde_json::json;
use tidepool_core::model::{Element, ElementId};
use tidepool_core::protocol::{BackendUpdate, RenderUpdate, TransferElem, UpdateType};
use tidepool_core::tree::{ElementTree, RenderOp, TransferIndex, flatten};

const DEPTH: usize = 100_000;

/// `n0 -> n1 -> ... -> n{depth}` as a transfer list, leaf first.
fn chain(depth: usize) -> Vec<TransferElem> {
    (0..=depth)
        .rev()
        .map(|level| TransferElem {
            id: ElementId::new(format!("n{level}")),
            kind: "box".into(),
            props: Default::default(),
            children: if level == depth {
                Vec::new()
            } else {
                vec![ElementId::new(format!("n{}", level + 1))]
            },
            text: None,
        })
        .collect()
}

fn root_by_id(id: &str) -> RenderUpdate {
    RenderUpdate {
        update_type: UpdateType::Root,
        target_id: None,
        index: None,
        node: None,
        node_id: Some(id.into()),
    }
}

#[test]
fn deep_chain_applies_and_is_replaced() {
    let elems = chain(DEPTH);
    let transfer = TransferIndex::new(&elems);
    let mut tree = ElementTree::new();
    let op = RenderOp::from_update(root_by_id("n0"), &transfer).unwrap();
    tree.apply_render_op(op).unwrap();

    let leaf = format!("n{DEPTH}");
    assert_eq!(tree.len(), DEPTH + 1);
    assert_eq!(tree.index().path(&leaf).map(|p| p.len()), Some(DEPTH));
    assert!(tree.get(&leaf).is_some());

    tree.apply_render_op(RenderOp::Append {
        parent: leaf.as_str().into(),
        node: Element::new("tip", "text"),
    })
    .unwrap();
    assert_eq!(tree.index().path("tip").map(|p| p.len()), Some(DEPTH + 1));

    let applied = tree
        .apply_render_op(RenderOp::Root(Element::new("fresh", "box")))
        .unwrap();
    assert_eq!(applied.removed.len(), DEPTH + 2);
    assert_eq!(tree.len(), 1);
    assert!(!tree.contains(&leaf));
    assert!(!tree.contains("tip"));
}

#[test]
fn deep_chain_clones_compares_and_flattens() {
    let elems = chain(DEPTH);
    let transfer = TransferIndex::new(&elems);
    let op = RenderOp::from_update(root_by_id("n0"), &transfer).unwrap();
    let RenderOp::Root(root) = op else {
        panic!("root op expected");
    };

    let copy = root.clone();
    assert!(copy == root);
    assert_eq!(flatten(&copy).len(), DEPTH + 1);
    drop(copy);
    drop(root);
}

#[test_timeout::tokio_timeout_test(paused)]
async fn session_survives_a_deep_root_swap() {
    let fixture = Fixture::confirmed(Vec::new()).await;

    fixture.transport.push_response(vec![BackendUpdate {
        render_updates: vec![root_by_id("n0")],
        transfer_elems: chain(DEPTH),
        ..Default::default()
    }]);
    fixture.session.send(true).await.unwrap();
    assert_eq!(fixture.session.with_tree(|tree| tree.len()), DEPTH + 1);
    let snapshot = fixture.session.root().unwrap();
    assert_eq!(snapshot.id.as_str(), "n0");

    fixture.transport.push_response(vec![chunk(json!({
        "renderupdates": [
            {"updatetype": "root", "node": {"id": "r", "type": "box"}}
        ]
    }))]);
    fixture.session.send(true).await.unwrap();
    assert_eq!(fixture.session.with_tree(|tree| tree.len()), 1);
    assert!(fixture.session.messages().is_empty());
    drop(snapshot);
}
