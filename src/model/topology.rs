// ABOUTME: Read snapshot of a deployment's templates and instances used while building task graphs
// ABOUTME: Provides lookups from instances to templates and to outgoing relationship instances

use serde::{Deserialize, Serialize};

use super::entities::{Deployment, Node, NodeInstance, Relationship, RelationshipInstance};

/// Everything graph construction needs to know about one deployment
///
/// Collections keep the stable order in which the storage layer returned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub node_instances: Vec<NodeInstance>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub relationship_instances: Vec<RelationshipInstance>,
}

/// A topology together with the deployment that owns it, as loaded from a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDocument {
    pub deployment: Deployment,
    #[serde(flatten)]
    pub topology: Topology,
}

impl Topology {
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_of(&self, instance: &NodeInstance) -> Option<&Node> {
        self.node(&instance.node_id)
    }

    pub fn node_instance(&self, instance_id: &str) -> Option<&NodeInstance> {
        self.node_instances.iter().find(|i| i.id == instance_id)
    }

    pub fn node_instance_by_name(&self, name: &str) -> Option<&NodeInstance> {
        self.node_instances.iter().find(|i| i.name == name)
    }

    pub fn relationship(&self, relationship_id: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.id == relationship_id)
    }

    pub fn relationship_of(&self, instance: &RelationshipInstance) -> Option<&Relationship> {
        self.relationship(&instance.relationship_id)
    }

    /// Relationship instances whose source is the given node instance
    pub fn outgoing_relationships<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> impl Iterator<Item = &'a RelationshipInstance> + 'a {
        self.relationship_instances
            .iter()
            .filter(move |r| r.source_instance_id == instance_id)
    }

    /// Node instances of a given node template
    pub fn instances_of<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a NodeInstance> + 'a {
        self.node_instances
            .iter()
            .filter(move |i| i.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_topology() -> Topology {
        let db = Node::new("db", "Database");
        let web = Node::new("web", "WebServer");
        let db_1 = NodeInstance::new("db_1", "db");
        let web_1 = NodeInstance::new("web_1", "web");
        let relationship = Relationship::new("web_to_db", "web", "db");
        let connection = RelationshipInstance::new("web_to_db", &web_1.id, &db_1.id);

        Topology {
            nodes: vec![db, web],
            node_instances: vec![db_1, web_1],
            relationships: vec![relationship],
            relationship_instances: vec![connection],
        }
    }

    #[test]
    fn test_instance_lookups() {
        let topology = create_test_topology();
        let web_1 = topology.node_instance_by_name("web_1").unwrap();

        assert_eq!(topology.node_of(web_1).unwrap().type_name, "WebServer");
        assert_eq!(topology.instances_of("db").count(), 1);
        assert!(topology.node_instance_by_name("missing").is_none());
    }

    #[test]
    fn test_outgoing_relationships() {
        let topology = create_test_topology();
        let web_1 = topology.node_instance_by_name("web_1").unwrap();
        let db_1 = topology.node_instance_by_name("db_1").unwrap();

        let outgoing: Vec<_> = topology.outgoing_relationships(&web_1.id).collect();
        assert_eq!(outgoing.len(), 1);
        assert_eq!(outgoing[0].target_instance_id, db_1.id);
        assert_eq!(topology.outgoing_relationships(&db_1.id).count(), 0);
    }

    #[test]
    fn test_document_parses_from_yaml() {
        let yaml = r#"
deployment:
  name: demo
nodes:
  - id: web
    type_name: WebServer
node_instances:
  - name: web_1
    node_id: web
"#;
        let document: TopologyDocument = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(document.deployment.name, "demo");
        assert_eq!(document.topology.nodes.len(), 1);
        assert_eq!(document.topology.node_instances[0].version, 1);
    }
}
