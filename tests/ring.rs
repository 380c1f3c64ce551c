use std::collections::HashMap;
use weir::{ConsistentHash, Node, Weight};

fn seeded_ring() -> ConsistentHash {
    let ring = ConsistentHash::new(3, 6);
    ring.add_nodes(&[
        Node::new("Node1", Weight::Low),
        Node::new("Node2", Weight::Mid),
        Node::new("Node3", Weight::High),
    ])
    .unwrap();
    ring
}

#[test]
fn million_keys_map_to_seeded_nodes() {
    let ring = seeded_ring();

    let mut census: HashMap<String, usize> = HashMap::new();
    for i in 0..1_000_000 {
        let key = format!("key{}", i);
        let node = ring.get(key.as_bytes()).unwrap();
        assert!(
            node == "Node1" || node == "Node2" || node == "Node3",
            "key {} mapped to unknown node {}",
            key,
            node
        );
        *census.entry(node).or_default() += 1;
    }

    // Every node owns some share of the keyspace.
    assert_eq!(census.len(), 3, "census: {:?}", census);
}

#[test]
fn removing_a_node_preserves_other_mappings() {
    let ring = seeded_ring();

    let owner_index = |node: &str| match node {
        "Node1" => 1u8,
        "Node2" => 2,
        "Node3" => 3,
        other => panic!("unknown node {}", other),
    };

    let before: Vec<u8> = (0..1_000_000)
        .map(|i| {
            let key = format!("key{}", i);
            owner_index(&ring.get(key.as_bytes()).unwrap())
        })
        .collect();

    ring.remove_nodes(&[Node::new("Node1", Weight::Low)]).unwrap();

    for (i, owner) in before.into_iter().enumerate() {
        let key = format!("key{}", i);
        let now = owner_index(&ring.get(key.as_bytes()).unwrap());
        if owner == 1 {
            assert!(now == 2 || now == 3, "key {} went to Node{}", key, now);
        } else {
            assert_eq!(now, owner, "key {} moved despite its owner surviving", key);
        }
    }
}

#[test]
fn permuted_insertion_yields_identical_ownership() {
    let nodes = [
        Node::new("Node1", Weight::Low),
        Node::new("Node2", Weight::Mid),
        Node::new("Node3", Weight::High),
    ];

    // All six insertion orders of the three nodes.
    let orders: [[usize; 3]; 6] =
        [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    let reference = seeded_ring();
    for order in orders {
        let ring = ConsistentHash::new(3, 6);
        for &i in &order {
            ring.add_nodes(std::slice::from_ref(&nodes[i])).unwrap();
        }
        for i in 0..10_000 {
            let key = format!("key{}", i);
            assert_eq!(
                ring.get(key.as_bytes()).unwrap(),
                reference.get(key.as_bytes()).unwrap(),
                "key {} differs under insertion order {:?}",
                key,
                order
            );
        }
    }
}

#[test]
fn rebuilt_ring_reproduces_ownership() {
    // Same node set, fresh ring, same hash function: identical routing.
    let a = seeded_ring();
    let b = seeded_ring();
    for i in 0..50_000 {
        let key = format!("session-{}", i);
        assert_eq!(a.get(key.as_bytes()).unwrap(), b.get(key.as_bytes()).unwrap());
    }
}

#[test]
fn draining_the_ring_surfaces_empty_node() {
    let ring = seeded_ring();
    ring.remove_nodes(&[
        Node::new("Node1", Weight::Low),
        Node::new("Node2", Weight::Mid),
        Node::new("Node3", Weight::High),
    ])
    .unwrap();
    assert!(ring.is_empty());
    assert_eq!(ring.get(b"key1"), Err(weir::WeirError::EmptyNode));
}
