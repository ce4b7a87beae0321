use crate::document::Relationships;

#[derive(Clone, Copy)]
enum Edge {
    Outgoing,
    OutgoingExternal,
    Incoming,
    Peer,
}

/// Mermaid flowchart of one document's relationships, or `None` when it
/// has none.
pub fn relationship_graph(center: &str, relationships: &Relationships) -> Option<String> {
    if relationships.is_empty() {
        return None;
    }

    let groups: [(&[String], Edge); 5] = [
        (&relationships.depends_on, Edge::Outgoing),
        (&relationships.internal, Edge::Outgoing),
        (&relationships.external, Edge::OutgoingExternal),
        (&relationships.used_by, Edge::Incoming),
        (&relationships.integrates_with, Edge::Peer),
    ];

    let mut nodes: Vec<&str> = Vec::new();
    let mut lines = vec![
        "graph LR".to_string(),
        format!("    hub[\"{}\"]", label(center)),
    ];
    let mut edges = Vec::new();

    for (names, edge) in groups {
        for name in names {
            let index = match nodes.iter().position(|node| node == name) {
                Some(index) => index,
                None => {
                    nodes.push(name);
                    lines.push(format!("    n{}[\"{}\"]", nodes.len() - 1, label(name)));
                    nodes.len() - 1
                }
            };
            let line = match edge {
                Edge::Outgoing => format!("    hub --> n{index}"),
                Edge::OutgoingExternal => format!("    hub -->|external| n{index}"),
                Edge::Incoming => format!("    n{index} --> hub"),
                Edge::Peer => format!("    hub -.-> n{index}"),
            };
            if !edges.contains(&line) {
                edges.push(line);
            }
        }
    }

    lines.extend(edges);
    Some(lines.join("\n"))
}

fn label(text: &str) -> String {
    // Mermaid node labels must stay on one line.
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('"', "#quot;")
        .replace('<', "#lt;")
        .replace('>', "#gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_stay_on_one_line() {
        let relationships = Relationships {
            depends_on: vec!["billing\nengine".into()],
            ..Relationships::default()
        };
        let graph = relationship_graph("auth\r\nservice", &relationships).unwrap();
        assert!(graph.contains("    hub[\"auth service\"]"));
        assert!(graph.contains("    n0[\"billing engine\"]"));
        assert_eq!(graph.lines().count(), 4);
    }

    #[test]
    fn test_no_relationships_no_graph() {
        assert_eq!(relationship_graph("a", &Relationships::default()), None);
    }

    #[test]
    fn test_edges_by_relationship() {
        let relationships = Relationships {
            depends_on: vec!["db".into()],
            used_by: vec!["web".into()],
            integrates_with: vec!["queue".into(), "db".into()],
            internal: vec![],
            external: vec!["stripe \"v2\"".into()],
        };
        let graph = relationship_graph("svc/auth", &relationships).unwrap();
        assert_eq!(
            graph,
            [
                "graph LR",
                "    hub[\"svc/auth\"]",
                "    n0[\"db\"]",
                "    n1[\"stripe #quot;v2#quot;\"]",
                "    n2[\"web\"]",
                "    n3[\"queue\"]",
                "    hub --> n0",
                "    hub -->|external| n1",
                "    n2 --> hub",
                "    hub -.-> n3",
                "    hub -.-> n0",
            ]
            .join("\n")
        );
    }
}
