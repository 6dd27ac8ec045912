use super::*;
use crate::test_utils::mem_clients;
use crate::test_utils::short_wait_opts;
use crate::Node;
use crate::ServiceInstance;

fn instance(
    id: &str,
    name: &str,
    node: &str,
    tags: &[&str],
) -> ServiceInstance {
    ServiceInstance {
        id: id.to_string(),
        name: name.to_string(),
        node: node.to_string(),
        address: format!("10.0.0.{}", id.len()),
        port: 8080,
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

#[test]
fn test_catalog_service_parses_tag_and_name() {
    let plain = CatalogServiceQuery::new(" web ").unwrap();
    assert_eq!(plain.name(), "web");
    assert_eq!(plain.tag(), None);

    let tagged = CatalogServiceQuery::new("prod.web").unwrap();
    assert_eq!(tagged.name(), "web");
    assert_eq!(tagged.tag(), Some("prod"));
    assert_eq!(tagged.key().to_string(), "catalog.service(prod.web)");

    // The name is whatever follows the last dot
    let dotted = CatalogServiceQuery::new("v1.2.web").unwrap();
    assert_eq!(dotted.tag(), Some("v1.2"));
    assert_eq!(dotted.name(), "web");
}

#[tokio::test]
async fn test_catalog_service_filters_by_tag() {
    let (store, clients) = mem_clients();
    store.register_service(instance("w1", "web", "n2", &["prod"]));
    store.register_service(instance("w2", "web", "n1", &["prod", "v2"]));
    store.register_service(instance("w3", "web", "n3", &["canary"]));
    store.register_service(instance("d1", "db", "n1", &["prod"]));

    let query = CatalogServiceQuery::new("prod.web").unwrap();
    let (data, _) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    let QueryData::ServiceInstances(instances) = data else {
        panic!("unexpected data: {data:?}");
    };
    let ids: Vec<_> = instances.iter().map(|i| i.id.as_str()).collect();
    // sorted by node
    assert_eq!(ids, vec!["w2", "w1"]);
}

#[tokio::test]
async fn test_catalog_services_merges_tags_per_name() {
    let (store, clients) = mem_clients();
    store.register_service(instance("w1", "web", "n1", &["prod"]));
    store.register_service(instance("w2", "web", "n2", &["v2", "prod"]));
    store.register_service(instance("d1", "db", "n1", &[]));

    let (data, _) = CatalogServicesQuery::new()
        .fetch(&clients, short_wait_opts(0))
        .await
        .unwrap();

    let QueryData::Services(services) = data else {
        panic!("unexpected data: {data:?}");
    };
    assert_eq!(services.len(), 2);
    assert_eq!(services[0].name, "db");
    assert_eq!(services[1].name, "web");
    assert_eq!(services[1].tags, vec!["prod".to_string(), "v2".to_string()]);
}

#[tokio::test]
async fn test_catalog_nodes_index_moves_on_registration() {
    let (store, clients) = mem_clients();
    store.register_node(Node {
        name: "n2".to_string(),
        address: "10.0.0.2".to_string(),
    });
    let query = CatalogNodesQuery::new();
    let (_, first) = query.fetch(&clients, short_wait_opts(0)).await.unwrap();

    store.register_node(Node {
        name: "n1".to_string(),
        address: "10.0.0.1".to_string(),
    });
    let (data, second) = query.fetch(&clients, short_wait_opts(first.last_index)).await.unwrap();

    assert!(second.last_index > first.last_index);
    let QueryData::Nodes(nodes) = data else {
        panic!("unexpected data: {data:?}");
    };
    let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["n1", "n2"]);
}

#[tokio::test]
async fn test_catalog_service_absent_is_empty_list() {
    let (_store, clients) = mem_clients();
    let (data, _) = CatalogServiceQuery::new("ghost")
        .unwrap()
        .fetch(&clients, short_wait_opts(0))
        .await
        .unwrap();
    assert_eq!(data, QueryData::ServiceInstances(vec![]));
}
