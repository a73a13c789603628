#![warn(
    clippy::doc_markdown,
    missing_debug_implementations,
    rust_2018_idioms,
    missing_docs
)]
#![doc = include_str!("../README.md")]

///
/// Event logs: activity interning, the [`EventLog`] data model and XES import
///
pub mod event_log {
    /// Activity interning and the [`ActivityRegistry`]
    pub mod activity;
    /// XES attribute key constants
    pub mod constants;
    /// [`EventLog`] struct and sub-structs
    pub mod event_log_struct;
    /// XES import
    pub mod import_xes;

    pub use activity::{Activity, ActivityMatch, ActivityRegistry};
    pub use event_log_struct::{Event, EventLog, Trace};
}

///
/// Relation discovery: behavioral relations between activities, mined from trace order
///
pub mod discovery {
    /// [`RelationBuilder`] struct computing the relation sets of a log
    pub mod relation_builder;

    #[doc(inline)]
    pub use relation_builder::RelationBuilder;
}

///
/// BPMN process graphs: synthesis from relations, diagram layout and XML export
///
pub mod bpmn {
    /// [`BpmnGraph`] struct: the node/flow arena
    pub mod bpmn_graph_struct;
    /// BPMN 2.0 XML export and structural validation
    pub mod export_bpmn;
    /// Diagram layout (coordinates only, no structural change)
    pub mod layout;
    /// Graph synthesis from discovered relations
    pub mod synthesis;

    #[doc(inline)]
    pub use bpmn_graph_struct::BpmnGraph;
}


#[doc(inline)]
pub use event_log::activity::ActivityRegistry;

#[doc(inline)]
pub use event_log::event_log_struct::EventLog;

#[doc(inline)]
pub use event_log::import_xes::import_xes;

#[doc(inline)]
pub use event_log::import_xes::import_xes_file;

#[doc(inline)]
pub use event_log::import_xes::import_xes_slice;

#[doc(inline)]
pub use event_log::import_xes::import_xes_str;

#[doc(inline)]
pub use discovery::relation_builder::RelationBuilder;

#[doc(inline)]
pub use bpmn::bpmn_graph_struct::BpmnGraph;

#[doc(inline)]
pub use bpmn::synthesis::synthesize;

#[doc(inline)]
pub use bpmn::layout::layout_bpmn;

#[doc(inline)]
pub use bpmn::export_bpmn::export_bpmn;

#[doc(inline)]
pub use bpmn::export_bpmn::export_bpmn_to_path;

#[doc(inline)]
pub use bpmn::export_bpmn::export_bpmn_to_string;

#[doc(inline)]
pub use bpmn::export_bpmn::validate_bpmn;

///
/// Serialize a [`BpmnGraph`] as a JSON [`String`]
///
pub fn bpmn_to_json(graph: &BpmnGraph) -> String {
    serde_json::to_string(graph).unwrap()
}

///
/// Deserialize a [`BpmnGraph`] from a JSON [`String`]
///
pub fn json_to_bpmn(graph_json: &str) -> BpmnGraph {
    serde_json::from_str(graph_json).unwrap()
}
