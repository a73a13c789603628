use std::{env, error::Error, fs, process::ExitCode, time::Instant};

use alpha_bpmn::{
    export_bpmn_to_string, import_xes_file, layout_bpmn, synthesize, validate_bpmn,
    ActivityRegistry, RelationBuilder,
};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <input.xes[.gz]> <output.bpmn>", args[0]);
        return ExitCode::FAILURE;
    }
    match run(&args[1], &args[2]) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(input_path: &str, output_path: &str) -> Result<(), Box<dyn Error>> {
    let now = Instant::now();
    let mut registry = ActivityRegistry::new();
    let log = import_xes_file(input_path, &mut registry)?;
    println!(
        "Parsed XES with {} traces ({} events) in {:#?}",
        log.traces.len(),
        log.event_count(),
        now.elapsed()
    );

    let now = Instant::now();
    let mut relations = RelationBuilder::new();
    relations.evaluate(&log, &registry);
    println!(
        "Discovered relations over {} activities in {:#?}: {} causalities ({} remaining), {} parallel, {} alternatives, {} abstractions",
        relations.activities()?.len(),
        now.elapsed(),
        relations.causality()?.len(),
        relations.remaining_causalities()?.len(),
        relations.parallel()?.len(),
        relations.alternatives()?.len(),
        relations.abstractions()?.len(),
    );

    let now = Instant::now();
    let graph = synthesize(
        &registry,
        &relations.activities()?,
        &relations.alternatives()?,
        &relations.abstractions()?,
        &relations.remaining_causalities()?,
        &relations.not_succession()?,
    )?;
    println!(
        "Synthesized BPMN graph with {} nodes and {} flows in {:#?}",
        graph.node_count(),
        graph.flow_count(),
        now.elapsed()
    );

    let now = Instant::now();
    let layout = layout_bpmn(&graph);
    let document = export_bpmn_to_string(&graph, &layout)?;
    validate_bpmn(document.as_bytes())?;
    fs::write(output_path, document)?;
    println!(
        "Exported validated BPMN diagram to {} in {:#?}",
        output_path,
        now.elapsed()
    );

    Ok(())
}
