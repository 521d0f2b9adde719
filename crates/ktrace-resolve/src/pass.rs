//! Pass-manager plumbing.
//!
//! Compilation is a sequence of passes over one `AstContext`. Passes run in
//! registration order, to completion, single-threaded; each one may decorate
//! the AST and append diagnostics. Failure is recorded, not thrown: a pass
//! "fails" when it leaves error diagnostics behind, and the pipeline only
//! short-circuits when a pass reports that the tree is not worth analysing
//! further.

use std::collections::BTreeSet;
use std::path::PathBuf;

use ktrace_ast::foundation::{Config, Features};
use ktrace_ast::AstContext;

/// Shared, pass-independent compilation state: configuration, kernel
/// features, positional parameters and the tracefs layout.
#[derive(Debug, Clone)]
pub struct CompileEnv {
    pub config: Config,
    pub features: Features,
    /// Positional parameter values (`$1` is `params[0]`)
    pub params: Vec<String>,
    /// A child command is attached (enables `cpid`)
    pub has_child: bool,
    /// A process monitor is attached (enables symbolic watchpoints)
    pub has_procmon: bool,
    /// Root of the tracefs `events` directory
    pub events_root: PathBuf,
    /// Type names to resolve from BTF instead of kernel headers;
    /// populated by the tracepoint format parser
    pub btf_idents: BTreeSet<String>,
}

impl Default for CompileEnv {
    fn default() -> Self {
        Self {
            config: Config::default(),
            features: Features::all(),
            params: Vec::new(),
            has_child: false,
            has_procmon: false,
            events_root: PathBuf::from("/sys/kernel/tracing/events"),
            btf_idents: BTreeSet::new(),
        }
    }
}

impl CompileEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional parameter by 1-based index; missing parameters read as
    /// empty, they are not an error by themselves.
    pub fn param(&self, n: usize) -> &str {
        if n == 0 {
            return "";
        }
        self.params.get(n - 1).map(String::as_str).unwrap_or("")
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Keep running later passes (diagnostics may still hold errors)
    Continue,
    /// The tree is too damaged for later passes to make progress
    Abort,
}

/// A named compilation pass.
pub struct Pass {
    name: &'static str,
    run: Box<dyn FnMut(&mut AstContext, &mut CompileEnv) -> PassOutcome>,
}

impl Pass {
    pub fn new(
        name: &'static str,
        run: impl FnMut(&mut AstContext, &mut CompileEnv) -> PassOutcome + 'static,
    ) -> Self {
        Self {
            name,
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Runs passes in registration order over one context.
pub struct PassManager<'ctx> {
    ast: &'ctx mut AstContext,
    env: CompileEnv,
    passes: Vec<Pass>,
}

impl<'ctx> PassManager<'ctx> {
    pub fn new(ast: &'ctx mut AstContext, env: CompileEnv) -> Self {
        Self {
            ast,
            env,
            passes: Vec::new(),
        }
    }

    pub fn add(mut self, pass: Pass) -> Self {
        self.passes.push(pass);
        self
    }

    /// Run all passes. Returns true when the pipeline ran to completion and
    /// no error diagnostics were recorded.
    pub fn run(mut self) -> bool {
        for pass in &mut self.passes {
            tracing::debug!(pass = pass.name, "running pass");
            let outcome = (pass.run)(self.ast, &mut self.env);
            if outcome == PassOutcome::Abort {
                tracing::debug!(pass = pass.name, "pipeline aborted");
                return false;
            }
        }
        self.ast.diagnostics.ok()
    }

    /// Run all passes and hand the environment back, for callers that need
    /// state a pass accumulated (e.g. the BTF ident set).
    pub fn run_into_env(mut self) -> (bool, CompileEnv) {
        for pass in &mut self.passes {
            tracing::debug!(pass = pass.name, "running pass");
            if (pass.run)(self.ast, &mut self.env) == PassOutcome::Abort {
                return (false, self.env);
            }
        }
        let ok = self.ast.diagnostics.ok();
        (ok, self.env)
    }
}

/// Applies `config = { ... }` entries from the program to the environment.
///
/// The recognized option set is closed; unknown keys and malformed values
/// are diagnosed at the entry's location.
pub fn create_config_pass() -> Pass {
    Pass::new("config", |ast, env| {
        let entries = ast.root.config.clone();
        for entry in &entries {
            if let Err(err) = env.config.set(&entry.key, &entry.value) {
                ast.diagnostics.error(entry.span, err.to_string());
            }
        }
        PassOutcome::Continue
    })
}
