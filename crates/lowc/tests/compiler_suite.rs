//! Integration tests for the compiler bridge, driven by a toy engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use lowc::CompileOptions;
use lowc::CompilerContext;
use lowc::Diagnostic;
use lowc::DiagnosticHost;
use lowc::Error;
use lowc::HandlerStack;
use lowc::Location;
use lowc::OutputFormat;
use lowc::PrintOptions;
use lowc::engine::Engine;
use lowc::engine::Failure;
use lowc::engine::Lowering;
use lowc::engine::PassPlan;
use lowc::engine::SourceBuffer;
use lowc::sink::Handler;
use lowc::sink::HandlerId;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A line-oriented stand-in for a real compiler.
///
/// - `error <msg>` lines fail the parse, `warn <msg>` lines warn.
/// - every other line is an op.
#[derive(Default)]
struct ToyEngine {
    handlers: HandlerStack,
    crash_paths: Mutex<Vec<Option<PathBuf>>>,
}

struct ToyModule {
    ops: Vec<String>,
}

#[derive(Debug, Clone)]
enum ToyPipeline {
    Dedup,
    Reverse,
    Fail,
    Lower(String),
}

const SOURCE_FILE: &str = "/sandbox/exec.runfiles/models/toy.mlir";

impl DiagnosticHost for ToyEngine {
    fn register_handler(&self, handler: Handler) -> HandlerId {
        self.handlers.register_handler(handler)
    }

    fn erase_handler(&self, id: HandlerId) {
        self.handlers.erase_handler(id)
    }
}

impl Engine for ToyEngine {
    type Module = ToyModule;
    type Pipeline = ToyPipeline;

    fn parse_source(&self, source: &SourceBuffer<'_>) -> Option<ToyModule> {
        let mut ops = Vec::new();
        let mut failed = false;
        for (i, line) in source.text().lines().enumerate() {
            let loc = Location::file(SOURCE_FILE, i as u32 + 1, 1);
            if let Some(msg) = line.strip_prefix("error ") {
                self.handlers.emit(Diagnostic::error(msg, loc));
                failed = true;
            } else if let Some(msg) = line.strip_prefix("warn ") {
                self.handlers.emit(Diagnostic::warning(msg, loc));
            } else if !line.trim().is_empty() {
                ops.push(line.trim().to_string());
            }
        }
        if failed { None } else { Some(ToyModule { ops }) }
    }

    fn print_module(&self, module: &ToyModule, options: &PrintOptions) -> String {
        module
            .ops
            .iter()
            .map(|op| match options.large_element_limit {
                Some(limit) if op.len() as u64 > limit => "<elided>".to_string(),
                _ => op.clone(),
            })
            .map(|op| if options.debug_info { format!("{} loc(toy)", op) } else { op })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn parse_pipeline(&self, spec: &str) -> Result<ToyPipeline, String> {
        match spec {
            "dedup" => Ok(ToyPipeline::Dedup),
            "reverse" => Ok(ToyPipeline::Reverse),
            "fail" => Ok(ToyPipeline::Fail),
            other => Err(format!("'{}' does not refer to a registered pass", other)),
        }
    }

    fn lowering_pipeline(&self, stage: Lowering<'_>) -> ToyPipeline {
        match stage {
            Lowering::Generic => ToyPipeline::Lower("flow".to_string()),
            Lowering::Backend { targets } => {
                ToyPipeline::Lower(format!("hal[{}]", targets.join(",")))
            }
            Lowering::Bytecode => ToyPipeline::Lower("vm".to_string()),
        }
    }

    fn run_pipelines(
        &self,
        plan: &PassPlan<ToyPipeline>,
        module: &mut ToyModule,
    ) -> Result<(), Failure> {
        self.crash_paths.lock().unwrap().push(plan.crash_reproducer.clone());
        for stage in &plan.stages {
            match stage {
                ToyPipeline::Dedup => module.ops.dedup(),
                ToyPipeline::Reverse => module.ops.reverse(),
                ToyPipeline::Fail => {
                    self.handlers.emit(Diagnostic::error(
                        "pass failed",
                        Location::name("fail", Location::Unknown),
                    ));
                    return Err(Failure);
                }
                ToyPipeline::Lower(tag) => {
                    if module.ops.iter().any(|op| op == "unlowerable") {
                        self.handlers.emit(Diagnostic::error(
                            format!("cannot lower to {}", tag),
                            Location::Unknown,
                        ));
                        return Err(Failure);
                    }
                    let op = format!("lowered.{}", tag);
                    if !module.ops.contains(&op) {
                        module.ops.push(op);
                    }
                }
            }
        }
        Ok(())
    }

    fn translate_to_bytecode(
        &self,
        module: &ToyModule,
        options: &CompileOptions,
    ) -> Result<Vec<u8>, Failure> {
        if module.ops.iter().any(|op| op == "opaque") {
            self.handlers.emit(Diagnostic::error("op has no bytecode form", Location::Unknown));
            return Err(Failure);
        }
        let body = module.ops.join(";");
        let bytes = match options.output_format {
            OutputFormat::FlatbufferBinary => [b"TOYB".as_slice(), body.as_bytes()].concat(),
            OutputFormat::FlatbufferText | OutputFormat::DebugText => body.into_bytes(),
        };
        Ok(bytes)
    }
}

fn context() -> Arc<CompilerContext<ToyEngine>> {
    init_logging();
    CompilerContext::new(ToyEngine::default())
}

// --- Test 1: Parse And Print ---

#[test]
fn test_parse_and_print() -> anyhow::Result<()> {
    let ctx = context();
    let module = ctx.parse_module("a\nbbbbbbbb\n")?;
    assert_eq!(module.to_text(&PrintOptions::default()), "a\nbbbbbbbb");

    let elided = PrintOptions { large_element_limit: Some(4), ..PrintOptions::default() };
    assert_eq!(module.to_text(&elided), "a\n<elided>");

    let debug = PrintOptions { debug_info: true, ..PrintOptions::default() };
    assert_eq!(module.to_text(&debug), "a loc(toy)\nbbbbbbbb loc(toy)");
    Ok(())
}

#[test]
fn test_parse_accepts_trailing_nul() -> anyhow::Result<()> {
    let ctx = context();
    let module = ctx.parse_module("x\ny\0")?;
    assert_eq!(module.module().ops, vec!["x", "y"]);
    Ok(())
}

// --- Test 2: Parse Failure Carries Every Diagnostic ---

#[test]
fn test_parse_failure_renders_diagnostics() {
    let ctx = context();
    let err = match ctx.parse_module("ok\nerror expected '('\nwarn shadowed\nerror bad type") {
        Err(e) => e,
        Ok(_) => panic!("parse should fail"),
    };
    let Error::Parse(text) = &err else {
        panic!("expected a parse error, got {:?}", err);
    };
    assert!(text.starts_with("Error parsing source:\n\n[ERROR]: expected '('\n"));
    assert!(text.contains("  at: toy.mlir:2:1\t\t( models/toy.mlir:2:1 )\n"));
    assert!(text.contains("[WARNING]: shadowed"));
    assert!(text.contains("[ERROR]: bad type"));

    // The failed parse consumed its records.
    assert_eq!(ctx.diagnostics(), "");

    let again = ctx.parse_module("error only this");
    let Err(Error::Parse(text)) = again else {
        panic!("parse should fail");
    };
    assert!(!text.contains("expected '('"));
    assert!(text.contains("only this"));
}

// --- Test 3: Warnings Reach The Context Diagnostics ---

#[test]
fn test_warnings_forwarded_to_context() -> anyhow::Result<()> {
    let ctx = context();
    ctx.parse_module("warn first\nop\nwarn second")?;
    let text = ctx.diagnostics();
    let first = text.find("first").expect("first warning");
    let second = text.find("second").expect("second warning");
    assert!(first < second);
    assert_eq!(ctx.diagnostics(), "");

    ctx.parse_module("warn again")?;
    ctx.clear_diagnostics();
    assert_eq!(ctx.diagnostics(), "");
    Ok(())
}

// --- Test 4: Nested Capture ---

#[test]
fn test_nested_capture_forwards_once() {
    let ctx = context();
    let engine = ctx.engine();
    {
        let outer = ctx.capture_diagnostics();
        engine.handlers.emit(Diagnostic::note("outer-1", Location::Unknown));
        {
            let inner = outer.nested();
            engine.handlers.emit(Diagnostic::note("inner-1", Location::Unknown));
            engine.handlers.emit(Diagnostic::note("inner-2", Location::Unknown));
            assert_eq!(inner.diagnostics().len(), 2);
        }
        engine.handlers.emit(Diagnostic::note("outer-2", Location::Unknown));
        let messages: Vec<_> =
            outer.diagnostics().snapshot().into_iter().map(|d| d.message).collect();
        assert_eq!(messages, vec!["outer-1", "inner-1", "inner-2", "outer-2"]);
    }
    let text = ctx.diagnostics();
    assert_eq!(text.matches("inner-1").count(), 1);
    assert_eq!(text.matches("[NOTE]").count(), 4);
}

// --- Test 5: Pass Pipelines ---

#[test]
fn test_run_pipelines() -> anyhow::Result<()> {
    let ctx = context();
    let mut module = ctx.parse_module("a\na\nb")?;
    module.run_pipelines(&["dedup", "reverse"])?;
    assert_eq!(module.module().ops, vec!["b", "a"]);
    Ok(())
}

#[test]
fn test_malformed_pipeline_runs_nothing() -> anyhow::Result<()> {
    let ctx = context();
    let mut module = ctx.parse_module("a\na")?;
    let err = module.run_pipelines(&["dedup", "bogus", "fail"]).unwrap_err();
    assert_eq!(err, Error::Validation("'bogus' does not refer to a registered pass".to_string()));
    assert_eq!(module.module().ops, vec!["a", "a"]);
    assert!(ctx.engine().crash_paths.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn test_failing_pipeline() -> anyhow::Result<()> {
    let ctx = context();
    let mut module = ctx.parse_module("a")?;
    let err = module.run_pipelines(&["fail"]).unwrap_err();
    let Error::Compile(text) = err else {
        panic!("expected a compile error");
    };
    assert_eq!(text, "Error running pass pipelines:\n\n[ERROR]: pass failed\n  @'fail':\n");
    Ok(())
}

// --- Test 6: Compile ---

#[test]
fn test_compile_is_deterministic() -> anyhow::Result<()> {
    let ctx = context();
    let source = "load\nmul\nstore";
    let targets = ["vmla", "vulkan"];

    let mut a = ctx.parse_module(source)?;
    let mut b = ctx.parse_module(source)?;
    let blob_a = a.compile(&CompileOptions::default(), &targets)?;
    let blob_b = b.compile(&CompileOptions::default(), &targets)?;
    assert_eq!(blob_a.bytes(), blob_b.bytes());
    assert!(blob_a.bytes().starts_with(b"TOYB"));
    Ok(())
}

#[test]
fn test_compile_text_format() -> anyhow::Result<()> {
    let ctx = context();
    let mut module = ctx.parse_module("op")?;
    let options = CompileOptions::default().output_format(OutputFormat::FlatbufferText);
    let blob = module.compile(&options, &["vmla"])?;
    assert_eq!(blob.as_text()?, "op;lowered.flow;lowered.hal[vmla];lowered.vm");
    Ok(())
}

#[test]
fn test_compile_failures() -> anyhow::Result<()> {
    let ctx = context();

    let mut module = ctx.parse_module("unlowerable")?;
    let err = module.compile(&CompileOptions::default(), &["vmla"]).unwrap_err();
    assert!(matches!(&err, Error::Compile(_)));
    assert!(err.message().starts_with("Error compiling module:"));
    assert!(err.message().contains("cannot lower to flow"));

    let mut module = ctx.parse_module("opaque")?;
    let err = module.compile(&CompileOptions::default(), &["vmla"]).unwrap_err();
    assert!(matches!(&err, Error::Serialization(_)));
    assert!(err.message().starts_with("Error serializing to bytecode:"));
    assert!(err.message().contains("no bytecode form"));
    Ok(())
}

// --- Test 7: Crash Reproducer ---

#[test]
fn test_crash_reproducer_override() -> anyhow::Result<()> {
    let ctx = context();
    ctx.set_crash_reproducer_path(Some(PathBuf::from("/tmp/repro.mlir")));
    let mut module = ctx.parse_module("op")?;
    module.run_pipelines(&["dedup"])?;

    ctx.set_crash_reproducer_path(Some(PathBuf::new()));
    module.run_pipelines(&["dedup"])?;

    let paths = ctx.engine().crash_paths.lock().unwrap().clone();
    assert_eq!(paths, vec![Some(PathBuf::from("/tmp/repro.mlir")), None]);
    Ok(())
}

#[test]
fn test_default_crash_reproducer_snapshot() {
    let default = Some(PathBuf::from("/tmp/default.mlir"));
    CompilerContext::<ToyEngine>::set_default_crash_reproducer_path(default);
    let ctx = context();
    CompilerContext::<ToyEngine>::set_default_crash_reproducer_path(None);

    assert_eq!(ctx.crash_reproducer_path(), Some(PathBuf::from("/tmp/default.mlir")));
    ctx.set_crash_reproducer_path(Some(PathBuf::from("/tmp/mine.mlir")));
    assert_eq!(ctx.crash_reproducer_path(), Some(PathBuf::from("/tmp/mine.mlir")));
}

// --- Test 8: Ownership ---

#[test]
fn test_module_keeps_context_alive() -> anyhow::Result<()> {
    let ctx = context();
    let module = ctx.parse_module("op")?;
    assert_eq!(ctx.engine().handlers.len(), 1);

    let weak = Arc::downgrade(&ctx);
    drop(ctx);
    assert!(weak.upgrade().is_some());
    assert_eq!(module.to_text(&PrintOptions::default()), "op");
    drop(module);
    assert!(weak.upgrade().is_none());
    Ok(())
}
