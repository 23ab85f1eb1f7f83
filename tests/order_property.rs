//! Property tests for the layered topological sort.

use proptest::prelude::*;

use flowbuild::order::layer_sort;

/// Random DAGs: edges only point from a lower node index to a higher one.
fn arbitrary_dag() -> impl Strategy<Value = (Vec<String>, Vec<(String, String)>)> {
    (2usize..10).prop_flat_map(|n| {
        let nodes: Vec<String> = (0..n).map(|i| format!("v{i}")).collect();
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .collect();
        let edge_count = pairs.len();
        let nodes_for_edges = nodes.clone();
        proptest::sample::subsequence(pairs, 0..=edge_count).prop_map(move |chosen| {
            let edges = chosen
                .into_iter()
                .map(|(i, j)| (nodes_for_edges[i].clone(), nodes_for_edges[j].clone()))
                .collect();
            (nodes.clone(), edges)
        })
    })
}

fn layer_of(layers: &[Vec<String>], id: &str) -> usize {
    layers
        .iter()
        .position(|layer| layer.iter().any(|v| v == id))
        .expect("every node is placed")
}

proptest! {
    #[test]
    fn every_dependency_lands_in_a_strictly_earlier_layer(
        (nodes, edges) in arbitrary_dag()
    ) {
        let layers = layer_sort(&nodes, &edges).expect("acyclic graphs sort");

        let placed: usize = layers.iter().map(Vec::len).sum();
        prop_assert_eq!(placed, nodes.len());

        for (source, target) in &edges {
            prop_assert!(
                layer_of(&layers, source) < layer_of(&layers, target),
                "edge {} -> {} violates layering", source, target
            );
        }
    }

    #[test]
    fn adding_a_back_edge_makes_the_graph_cyclic(
        (nodes, mut edges) in arbitrary_dag().prop_filter("needs an edge", |(_, e)| !e.is_empty())
    ) {
        let (source, target) = edges[0].clone();
        edges.push((target, source));
        prop_assert!(layer_sort(&nodes, &edges).is_err());
    }
}
