use deno_ast::swc::ast::{CallExpr, Callee, ExportAll, Expr, ImportDecl, Lit, NamedExport};
use deno_ast::swc::ecma_visit::{Visit, VisitWith};
use deno_ast::{
    MediaType, ModuleSpecifier, ParseDiagnostic, ParseParams, ProgramRef, SourceRangedForSpanned,
    StartSourcePos,
};
use std::{collections::HashMap, ops::Range};

/// One module specifier and every byte range it occupies. Repeated
/// specifiers share a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedImport {
    pub specifier: String,
    /// Ranges of the string content, quotes excluded.
    pub ranges: Vec<Range<usize>>,
}

/// Parse `source` as an ES module and collect every specifier of a static
/// import, dynamic `import()`, re-export, or `export *`, in first-seen
/// order.
pub fn collect_imports(source: &str) -> Result<Vec<CollectedImport>, ParseDiagnostic> {
    let parsed = deno_ast::parse_module(ParseParams {
        specifier: ModuleSpecifier::parse("file:///module.mjs").expect("static specifier parses"),
        text: source.into(),
        media_type: MediaType::Mjs,
        capture_tokens: false,
        scope_analysis: false,
        maybe_syntax: None,
    })?;

    let mut collector = ImportCollector {
        source,
        program_start: parsed.text_info_lazy().range().start,
        found: Vec::new(),
        by_specifier: HashMap::new(),
    };
    let ProgramRef::Module(module) = parsed.program_ref() else {
        unreachable!("Mjs media type always parses as a module");
    };
    module.visit_with(&mut collector);
    Ok(collector.found)
}

struct ImportCollector<'a> {
    source: &'a str,
    program_start: StartSourcePos,
    found: Vec<CollectedImport>,
    by_specifier: HashMap<String, usize>,
}

impl ImportCollector<'_> {
    /// Record one string-literal node. The specifier text is read back from
    /// the source range rather than the cooked AST value so that the patched
    /// range and the recorded text can never disagree.
    fn record(&mut self, node: &impl SourceRangedForSpanned) {
        let literal = node.range().as_byte_range(self.program_start);
        if literal.len() < 2 {
            return;
        }
        let range = literal.start + 1..literal.end - 1;
        let specifier = self.source[range.clone()].to_string();
        match self.by_specifier.get(&specifier) {
            Some(&index) => self.found[index].ranges.push(range),
            None => {
                self.by_specifier.insert(specifier.clone(), self.found.len());
                self.found.push(CollectedImport { specifier, ranges: vec![range] });
            }
        }
    }
}

impl Visit for ImportCollector<'_> {
    fn visit_import_decl(&mut self, node: &ImportDecl) {
        self.record(&*node.src);
    }

    fn visit_named_export(&mut self, node: &NamedExport) {
        if let Some(src) = &node.src {
            self.record(&**src);
        }
    }

    fn visit_export_all(&mut self, node: &ExportAll) {
        self.record(&*node.src);
    }

    fn visit_call_expr(&mut self, node: &CallExpr) {
        if matches!(node.callee, Callee::Import(_)) {
            if let Some(argument) = node.args.first() {
                if let Expr::Lit(Lit::Str(src)) = &*argument.expr {
                    self.record(src);
                }
            }
        }
        // dynamic imports nest arbitrarily deep
        node.visit_children_with(self);
    }
}
