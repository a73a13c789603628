use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event as XmlEvent};
use quick_xml::{Reader, Writer};
use uuid::Uuid;

use super::bpmn_graph_struct::{BpmnGraph, FlowNodeKind};
use super::layout::{BpmnLayout, Bounds};

const OK: Result<(), quick_xml::Error> = Ok::<(), quick_xml::Error>(());

const XMLNS_BPMN: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";
const XMLNS_BPMNDI: &str = "http://www.omg.org/spec/BPMN/20100524/DI";
const XMLNS_DC: &str = "http://www.omg.org/spec/DD/20100524/DC";
const XMLNS_DI: &str = "http://www.omg.org/spec/DD/20100524/DI";
const XMLNS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

const PROCESS_ID: &str = "process_1";

fn element_name(kind: FlowNodeKind) -> &'static str {
    match kind {
        FlowNodeKind::StartEvent => "startEvent",
        FlowNodeKind::EndEvent => "endEvent",
        FlowNodeKind::Task => "task",
        FlowNodeKind::ExclusiveGateway => "exclusiveGateway",
        FlowNodeKind::ParallelGateway => "parallelGateway",
    }
}

///
/// Export a [`BpmnGraph`] with its [`BpmnLayout`] as a BPMN 2.0 XML document to the given writer
///
/// Emits the `<process>` elements plus the `bpmndi` diagram interchange section with shape
/// bounds and edge waypoints. Nodes missing from the layout are placed at the origin.
///
pub fn export_bpmn<W>(
    graph: &BpmnGraph,
    layout: &BpmnLayout,
    writer: &mut Writer<W>,
) -> Result<(), quick_xml::Error>
where
    W: Write,
{
    let definitions_id = format!("definitions_{}", Uuid::new_v4());
    writer.write_event(XmlEvent::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer
        .create_element("definitions")
        .with_attributes(vec![
            ("xmlns", XMLNS_BPMN),
            ("xmlns:bpmndi", XMLNS_BPMNDI),
            ("xmlns:dc", XMLNS_DC),
            ("xmlns:di", XMLNS_DI),
            ("xmlns:xsi", XMLNS_XSI),
            ("id", definitions_id.as_str()),
            ("targetNamespace", "https://alpha-bpmn.dev/schema/bpmn"),
        ])
        .write_inner_content(|writer| {
            writer
                .create_element("process")
                .with_attributes(vec![("id", PROCESS_ID), ("isExecutable", "true")])
                .write_inner_content(|writer| write_process_elements(graph, writer))?;
            write_diagram(graph, layout, writer)?;
            OK
        })?;
    Ok(())
}

fn write_process_elements<W: Write>(
    graph: &BpmnGraph,
    writer: &mut Writer<W>,
) -> Result<(), quick_xml::Error> {
    for node in graph.nodes() {
        let flow_node = graph.node(node);
        writer
            .create_element(element_name(flow_node.kind))
            .with_attributes(vec![
                ("id", flow_node.id.as_str()),
                ("name", flow_node.name.as_str()),
            ])
            .write_empty()?;
    }
    for flow in graph.flows() {
        let sequence_flow = graph.flow(flow);
        let source = graph.node(graph.flow_source(flow));
        let target = graph.node(graph.flow_target(flow));
        let element = writer
            .create_element("sequenceFlow")
            .with_attributes(vec![
                ("id", sequence_flow.id.as_str()),
                ("sourceRef", source.id.as_str()),
                ("targetRef", target.id.as_str()),
            ]);
        match &sequence_flow.condition {
            Some(condition) => {
                element.write_inner_content(|writer| {
                    writer
                        .create_element("conditionExpression")
                        .with_attribute(("xsi:type", "tFormalExpression"))
                        .write_text_content(BytesText::new(condition))?;
                    OK
                })?;
            }
            None => {
                element.write_empty()?;
            }
        }
    }
    OK
}

fn write_diagram<W: Write>(
    graph: &BpmnGraph,
    layout: &BpmnLayout,
    writer: &mut Writer<W>,
) -> Result<(), quick_xml::Error> {
    writer
        .create_element("bpmndi:BPMNDiagram")
        .with_attribute(("id", "diagram_1"))
        .write_inner_content(|writer| {
            writer
                .create_element("bpmndi:BPMNPlane")
                .with_attributes(vec![("id", "plane_1"), ("bpmnElement", PROCESS_ID)])
                .write_inner_content(|writer| {
                    for node in graph.nodes() {
                        let id = &graph.node(node).id;
                        let bounds = layout.node_bounds.get(id).copied().unwrap_or(Bounds {
                            x: 0.0,
                            y: 0.0,
                            width: 50.0,
                            height: 50.0,
                        });
                        writer
                            .create_element("bpmndi:BPMNShape")
                            .with_attributes(vec![
                                ("id", format!("{}_di", id).as_str()),
                                ("bpmnElement", id.as_str()),
                            ])
                            .write_inner_content(|writer| {
                                writer
                                    .create_element("dc:Bounds")
                                    .with_attributes(vec![
                                        ("x", bounds.x.to_string().as_str()),
                                        ("y", bounds.y.to_string().as_str()),
                                        ("width", bounds.width.to_string().as_str()),
                                        ("height", bounds.height.to_string().as_str()),
                                    ])
                                    .write_empty()?;
                                OK
                            })?;
                    }
                    for flow in graph.flows() {
                        let id = &graph.flow(flow).id;
                        let waypoints = layout
                            .flow_waypoints
                            .get(id)
                            .cloned()
                            .unwrap_or_default();
                        writer
                            .create_element("bpmndi:BPMNEdge")
                            .with_attributes(vec![
                                ("id", format!("{}_di", id).as_str()),
                                ("bpmnElement", id.as_str()),
                            ])
                            .write_inner_content(|writer| {
                                for (x, y) in &waypoints {
                                    writer
                                        .create_element("di:waypoint")
                                        .with_attributes(vec![
                                            ("x", x.to_string().as_str()),
                                            ("y", y.to_string().as_str()),
                                        ])
                                        .write_empty()?;
                                }
                                OK
                            })?;
                    }
                    OK
                })?;
            OK
        })?;
    OK
}

///
/// Export a [`BpmnGraph`] with its [`BpmnLayout`] to a BPMN 2.0 XML [`String`]
///
pub fn export_bpmn_to_string(
    graph: &BpmnGraph,
    layout: &BpmnLayout,
) -> Result<String, quick_xml::Error> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    export_bpmn(graph, layout, &mut writer)?;
    Ok(String::from_utf8_lossy(&writer.into_inner()).to_string())
}

///
/// Export a [`BpmnGraph`] with its [`BpmnLayout`] to a `.bpmn` file (specified through path)
///
pub fn export_bpmn_to_path<P: AsRef<Path>>(
    graph: &BpmnGraph,
    layout: &BpmnLayout,
    path: P,
) -> Result<(), quick_xml::Error> {
    let file = File::create(path)?;
    let mut writer = Writer::new_with_indent(file, b' ', 4);
    export_bpmn(graph, layout, &mut writer)
}

///
/// Error encountered while validating an exported BPMN document
///
#[derive(Debug)]
pub enum BpmnValidationError {
    /// XML error (e.g., incorrect XML format)
    XMLParsingError(quick_xml::Error),
    /// The document contains an element the format does not know (element name included)
    UnexpectedElement(String),
    /// A required attribute is missing on an element
    MissingAttribute {
        /// Element the attribute is missing on
        element: String,
        /// Name of the missing attribute
        attribute: &'static str,
    },
    /// Two elements share the same id
    DuplicateId(String),
    /// An element references an id that is not declared in the document
    DanglingReference {
        /// Id of the referencing element
        element: String,
        /// The unresolvable reference
        reference: String,
    },
    /// The document has no `<process>`
    MissingProcess,
}

impl std::fmt::Display for BpmnValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BPMN validation failed: {:?}", self)
    }
}

impl std::error::Error for BpmnValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BpmnValidationError::XMLParsingError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for BpmnValidationError {
    fn from(e: quick_xml::Error) -> Self {
        Self::XMLParsingError(e)
    }
}

const NODE_ELEMENTS: [&str; 5] = [
    "startEvent",
    "endEvent",
    "task",
    "exclusiveGateway",
    "parallelGateway",
];

const STRUCTURAL_ELEMENTS: [&str; 8] = [
    "definitions",
    "process",
    "conditionExpression",
    "bpmndi:BPMNDiagram",
    "bpmndi:BPMNPlane",
    "bpmndi:BPMNShape",
    "bpmndi:BPMNEdge",
    "dc:Bounds",
];

fn get_required_attribute(
    t: &BytesStart<'_>,
    name: &str,
    attribute: &'static str,
) -> Result<String, BpmnValidationError> {
    t.try_get_attribute(attribute)
        .map_err(quick_xml::Error::from)?
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
        .ok_or_else(|| BpmnValidationError::MissingAttribute {
            element: name.to_string(),
            attribute,
        })
}

///
/// Validate an exported BPMN 2.0 XML document structurally
///
/// Checks that only known elements occur, that ids are unique, that every sequence flow
/// references declared flow nodes and that every diagram shape/edge references a declared
/// element. A failed validation means the document must not be handed on.
///
pub fn validate_bpmn(document: &[u8]) -> Result<(), BpmnValidationError> {
    let mut reader = Reader::from_reader(BufReader::new(document));
    reader.config_mut().trim_text(true);
    let mut buf: Vec<u8> = Vec::new();

    let mut node_ids: HashSet<String> = HashSet::new();
    // flow id -> (source ref, target ref)
    let mut flows: HashMap<String, (String, String)> = HashMap::new();
    let mut shape_refs: Vec<String> = Vec::new();
    let mut edge_refs: Vec<String> = Vec::new();
    let mut saw_process = false;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(e) => e,
            Err(e) => return Err(BpmnValidationError::XMLParsingError(e)),
        };
        let element = match &event {
            XmlEvent::Start(t) | XmlEvent::Empty(t) => t,
            XmlEvent::Eof => break,
            _ => {
                buf.clear();
                continue;
            }
        };
        let name = String::from_utf8_lossy(element.name().as_ref()).to_string();

        if NODE_ELEMENTS.contains(&name.as_str()) {
            let id = get_required_attribute(element, &name, "id")?;
            if !node_ids.insert(id.clone()) {
                return Err(BpmnValidationError::DuplicateId(id));
            }
        } else if name == "sequenceFlow" {
            let id = get_required_attribute(element, &name, "id")?;
            let source = get_required_attribute(element, &name, "sourceRef")?;
            let target = get_required_attribute(element, &name, "targetRef")?;
            if node_ids.contains(&id) || flows.insert(id.clone(), (source, target)).is_some() {
                return Err(BpmnValidationError::DuplicateId(id));
            }
        } else if name == "bpmndi:BPMNShape" {
            shape_refs.push(get_required_attribute(element, &name, "bpmnElement")?);
        } else if name == "bpmndi:BPMNEdge" {
            edge_refs.push(get_required_attribute(element, &name, "bpmnElement")?);
        } else if name == "di:waypoint" {
            get_required_attribute(element, &name, "x")?;
            get_required_attribute(element, &name, "y")?;
        } else if STRUCTURAL_ELEMENTS.contains(&name.as_str()) {
            if name == "process" {
                saw_process = true;
            }
        } else {
            return Err(BpmnValidationError::UnexpectedElement(name));
        }
        buf.clear();
    }

    if !saw_process {
        return Err(BpmnValidationError::MissingProcess);
    }
    for (id, (source, target)) in &flows {
        for reference in [source, target] {
            if !node_ids.contains(reference) {
                return Err(BpmnValidationError::DanglingReference {
                    element: id.clone(),
                    reference: reference.clone(),
                });
            }
        }
    }
    for reference in &shape_refs {
        if !node_ids.contains(reference) && reference != PROCESS_ID {
            return Err(BpmnValidationError::DanglingReference {
                element: "bpmndi:BPMNShape".to_string(),
                reference: reference.clone(),
            });
        }
    }
    for reference in &edge_refs {
        if !flows.contains_key(reference) {
            return Err(BpmnValidationError::DanglingReference {
                element: "bpmndi:BPMNEdge".to_string(),
                reference: reference.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::relation_builder::RelationBuilder;
    use crate::event_log::activity::ActivityRegistry;
    use crate::bpmn::layout::layout_bpmn;
    use crate::synthesize;
    use crate::utils::test_utils::log_from_strings;

    fn exported(traces: &[&str]) -> String {
        let mut registry = ActivityRegistry::new();
        let log = log_from_strings(&mut registry, traces);
        let mut builder = RelationBuilder::new();
        builder.evaluate(&log, &registry);
        let graph = synthesize(
            &registry,
            &builder.activities().unwrap(),
            &builder.alternatives().unwrap(),
            &builder.abstractions().unwrap(),
            &builder.remaining_causalities().unwrap(),
            &builder.not_succession().unwrap(),
        )
        .unwrap();
        let layout = layout_bpmn(&graph);
        export_bpmn_to_string(&graph, &layout).unwrap()
    }

    #[test]
    fn exported_document_is_valid() {
        let xml = exported(&["abghjkil", "acdefgjhikl"]);

        assert_eq!(xml.matches("<task ").count(), 12);
        assert_eq!(xml.matches("<sequenceFlow ").count(), 19);
        assert_eq!(xml.matches("<conditionExpression").count(), 1);
        assert_eq!(xml.matches("<bpmndi:BPMNShape ").count(), 18);
        assert_eq!(xml.matches("<bpmndi:BPMNEdge ").count(), 19);

        validate_bpmn(xml.as_bytes()).unwrap();
    }

    #[test]
    fn unknown_element_fails_validation() {
        let xml = exported(&["ab"]).replace("task", "scriptTask");
        let result = validate_bpmn(xml.as_bytes());
        assert!(matches!(
            result,
            Err(BpmnValidationError::UnexpectedElement(_))
        ));
    }

    #[test]
    fn dangling_flow_reference_fails_validation() {
        let xml = exported(&["ab"]).replace("sourceRef=\"start\"", "sourceRef=\"ghost\"");
        let result = validate_bpmn(xml.as_bytes());
        assert!(matches!(
            result,
            Err(BpmnValidationError::DanglingReference { .. })
        ));
    }

    #[test]
    fn duplicate_id_fails_validation() {
        let xml = r#"<definitions><process id="process_1">
            <startEvent id="start" name="start"/>
            <task id="a" name="a"/>
            <task id="a" name="a"/>
        </process></definitions>"#;
        let result = validate_bpmn(xml.as_bytes());
        assert!(matches!(result, Err(BpmnValidationError::DuplicateId(_))));
    }

    #[test]
    fn missing_process_fails_validation() {
        let result = validate_bpmn(b"<definitions></definitions>");
        assert!(matches!(result, Err(BpmnValidationError::MissingProcess)));
    }
}
