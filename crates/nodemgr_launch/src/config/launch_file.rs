//! Launch description XML schema

use super::substitution::{SubstitutionContext, SubstitutionError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A parsed launch description (`<launch>` document)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchFile {
    /// Absolute path the document was read from
    pub path: PathBuf,

    /// Top-level argument declarations, in document order
    pub args: IndexMap<String, ArgDeclaration>,

    /// Node declarations, including those nested in `<group>` elements
    pub nodes: Vec<NodeDeclaration>,
}

/// `<arg name=".." default=".."/>` or `<arg name=".." value=".."/>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDeclaration {
    pub name: String,
    /// Overridable default
    #[serde(default)]
    pub default: Option<String>,
    /// Fixed value; arguments with a value cannot be overridden
    #[serde(default)]
    pub value: Option<String>,
    /// Optional description
    #[serde(default)]
    pub doc: Option<String>,
}

impl ArgDeclaration {
    /// Whether a caller may supply this argument
    pub fn is_requestable(&self) -> bool {
        self.value.is_none()
    }
}

/// `<node pkg=".." type=".." name=".."/>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDeclaration {
    /// Raw name attribute (may contain substitutions)
    pub name: String,
    pub package: String,
    pub executable: String,
    /// Namespace from enclosing groups and the node's own `ns`, without leading slash
    #[serde(default)]
    pub namespace: String,
    /// Raw `if` / `unless` conditions
    #[serde(default)]
    pub condition: Condition,
}

/// Conditional attributes on an element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub if_: Option<String>,
    #[serde(default)]
    pub unless: Option<String>,
}

impl Condition {
    fn from_node(node: roxmltree::Node) -> Self {
        Self {
            if_: node.attribute("if").map(str::to_string),
            unless: node.attribute("unless").map(str::to_string),
        }
    }

    /// Evaluate after substitution. Unresolvable conditions count as enabled.
    pub fn is_enabled(&self, ctx: &SubstitutionContext) -> bool {
        let eval = |raw: &str| {
            ctx.substitute(raw)
                .map(|v| is_truthy(&v))
                .unwrap_or(true)
        };
        let if_ok = self.if_.as_deref().map(eval).unwrap_or(true);
        let unless_ok = self.unless.as_deref().map(|raw| !eval(raw)).unwrap_or(true);
        if_ok && unless_ok
    }
}

/// Check if value is truthy
pub fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty()
        && !value.eq_ignore_ascii_case("false")
        && !value.eq_ignore_ascii_case("0")
        && !value.eq_ignore_ascii_case("no")
}

impl LaunchFile {
    /// Load a launch description from a file
    pub fn from_file(path: &Path) -> Result<Self, LaunchFileError> {
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_xml(path, &content)
    }

    /// Parse a launch description from an XML string
    pub fn from_xml(path: &Path, content: &str) -> Result<Self, LaunchFileError> {
        let doc = roxmltree::Document::parse(content)
            .map_err(|e| LaunchFileError::Parse(format!("{}: {}", path.display(), e)))?;

        let root = doc.root_element();
        if !root.has_tag_name("launch") {
            return Err(LaunchFileError::Validation(format!(
                "{}: root element must be <launch>, got <{}>",
                path.display(),
                root.tag_name().name()
            )));
        }

        let mut args = IndexMap::new();
        for child in root.children().filter(|n| n.has_tag_name("arg")) {
            let Some(name) = child.attribute("name") else {
                return Err(LaunchFileError::Validation(format!(
                    "{}: <arg> on line {} has no name",
                    path.display(),
                    doc.text_pos_at(child.range().start).row
                )));
            };
            args.insert(
                name.to_string(),
                ArgDeclaration {
                    name: name.to_string(),
                    default: child.attribute("default").map(str::to_string),
                    value: child.attribute("value").map(str::to_string),
                    doc: child.attribute("doc").map(str::to_string),
                },
            );
        }

        let mut nodes = Vec::new();
        collect_nodes(root, "", &mut nodes);

        log::debug!(
            "Parsed launch description {}: {} args, {} nodes",
            path.display(),
            args.len(),
            nodes.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            args,
            nodes,
        })
    }

    /// Declared defaults of the arguments a caller may supply
    pub fn requestable_args(&self) -> IndexMap<String, String> {
        self.args
            .values()
            .filter(|arg| arg.is_requestable())
            .map(|arg| (arg.name.clone(), arg.default.clone().unwrap_or_default()))
            .collect()
    }

    /// Resolve every declared argument in declaration order.
    ///
    /// Fixed values win over `supplied`, `supplied` wins over defaults. Each
    /// value is substituted with the arguments resolved before it.
    pub fn resolve_args(
        &self,
        supplied: &IndexMap<String, String>,
        ctx: &SubstitutionContext,
    ) -> Result<IndexMap<String, String>, SubstitutionError> {
        let mut ctx = ctx.clone().with_current_file(&self.path);
        let mut resolved = IndexMap::new();

        for arg in self.args.values() {
            let raw = arg
                .value
                .as_ref()
                .or_else(|| supplied.get(&arg.name))
                .or(arg.default.as_ref())
                .ok_or_else(|| SubstitutionError::UndefinedArg(arg.name.clone()))?;

            let value = ctx.substitute(raw)?;
            ctx.args.insert(arg.name.clone(), value.clone());
            resolved.insert(arg.name.clone(), value);
        }

        Ok(resolved)
    }

    /// Fully qualified names of the enabled nodes under the resolved arguments
    pub fn node_names(&self, ctx: &SubstitutionContext) -> Vec<String> {
        let ctx = ctx.clone().with_current_file(&self.path);
        self.nodes
            .iter()
            .filter(|node| node.condition.is_enabled(&ctx))
            .map(|node| {
                let name = ctx.substitute(&node.name).unwrap_or_else(|_| node.name.clone());
                let namespace = ctx
                    .substitute(&node.namespace)
                    .unwrap_or_else(|_| node.namespace.clone());
                join_namespace(&namespace, &name)
            })
            .collect()
    }
}

/// Process arguments in `name:=value` form
pub fn argv(args: &IndexMap<String, String>) -> Vec<String> {
    args.iter()
        .map(|(name, value)| format!("{}:={}", name, value))
        .collect()
}

fn collect_nodes(parent: roxmltree::Node, namespace: &str, nodes: &mut Vec<NodeDeclaration>) {
    for child in parent.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "node" => {
                let ns = join_namespace(namespace, child.attribute("ns").unwrap_or(""));
                nodes.push(NodeDeclaration {
                    name: child.attribute("name").unwrap_or("").to_string(),
                    package: child.attribute("pkg").unwrap_or("").to_string(),
                    executable: child.attribute("type").unwrap_or("").to_string(),
                    namespace: ns.trim_start_matches('/').to_string(),
                    condition: Condition::from_node(child),
                });
            }
            "group" => {
                let ns = join_namespace(namespace, child.attribute("ns").unwrap_or(""));
                collect_nodes(child, ns.trim_start_matches('/'), nodes);
            }
            _ => {}
        }
    }
}

fn join_namespace(namespace: &str, name: &str) -> String {
    let namespace = namespace.trim_matches('/');
    let name = name.trim_start_matches('/');
    if namespace.is_empty() {
        format!("/{}", name)
    } else {
        format!("/{}/{}", namespace, name)
    }
}

/// Errors that can occur when loading a launch file
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse launch file: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<launch>
  <arg name="robot_name" default="r2"/>
  <arg name="use_sim" default="false" doc="run against the simulator"/>
  <arg name="config" default="$(dirname)/../config/$(arg robot_name).yaml"/>
  <arg name="required"/>
  <arg name="fixed" value="42"/>

  <node pkg="camera_driver" type="camera_node" name="camera"/>
  <node pkg="sim" type="gazebo" name="gazebo" if="$(arg use_sim)"/>
  <group ns="$(arg robot_name)">
    <node pkg="nav" type="planner" name="planner" ns="nav"/>
  </group>
</launch>
"#;

    fn parse() -> LaunchFile {
        LaunchFile::from_xml(Path::new("/ws/bringup/launch/robot.launch"), DESCRIPTION).unwrap()
    }

    #[test]
    fn test_parse_args_and_nodes() {
        let launch_file = parse();
        let names: Vec<&str> = launch_file.args.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["robot_name", "use_sim", "config", "required", "fixed"]
        );
        assert_eq!(launch_file.nodes.len(), 3);
        assert_eq!(launch_file.nodes[2].namespace, "$(arg robot_name)/nav");
    }

    #[test]
    fn test_requestable_args_exclude_fixed_values() {
        let requestable = parse().requestable_args();
        assert_eq!(requestable.len(), 4);
        assert_eq!(requestable["robot_name"], "r2");
        assert_eq!(requestable["required"], "");
        assert!(!requestable.contains_key("fixed"));
    }

    #[test]
    fn test_resolve_args_in_order() {
        let launch_file = parse();
        let mut supplied = IndexMap::new();
        supplied.insert("robot_name".to_string(), "c3po".to_string());
        supplied.insert("required".to_string(), "yes".to_string());
        supplied.insert("fixed".to_string(), "ignored".to_string());

        let resolved = launch_file
            .resolve_args(&supplied, &SubstitutionContext::new())
            .unwrap();
        assert_eq!(resolved["robot_name"], "c3po");
        assert_eq!(resolved["config"], "/ws/bringup/launch/../config/c3po.yaml");
        assert_eq!(resolved["fixed"], "42");

        let argv = argv(&resolved);
        assert_eq!(argv[0], "robot_name:=c3po");
        assert_eq!(argv.len(), 5);
    }

    #[test]
    fn test_resolve_args_missing_required() {
        let launch_file = parse();
        let result = launch_file.resolve_args(&IndexMap::new(), &SubstitutionContext::new());
        assert_eq!(
            result,
            Err(SubstitutionError::UndefinedArg("required".to_string()))
        );
    }

    #[test]
    fn test_node_names_follow_conditions_and_groups() {
        let launch_file = parse();
        let ctx = SubstitutionContext::new()
            .with_arg("robot_name", "r2")
            .with_arg("use_sim", "false");

        assert_eq!(
            launch_file.node_names(&ctx),
            vec!["/camera".to_string(), "/r2/nav/planner".to_string()]
        );
    }

    #[test]
    fn test_rejects_non_launch_root() {
        let result = LaunchFile::from_xml(Path::new("/x.launch"), "<robot name=\"r\"/>");
        assert!(matches!(result, Err(LaunchFileError::Validation(_))));
    }

    #[test]
    fn test_rejects_malformed_xml() {
        let result = LaunchFile::from_xml(Path::new("/x.launch"), "<launch><arg></launch>");
        assert!(matches!(result, Err(LaunchFileError::Parse(_))));
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy("true"));
        assert!(is_truthy("1"));
        assert!(!is_truthy("False"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}
