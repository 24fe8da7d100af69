mod collect;
mod text_edit;

pub use collect::{collect_imports, CollectedImport};
pub use text_edit::{apply_edits, TextEdit};

use futures_util::future::join_all;
use std::future::Future;

/// Result of rewriting one module.
#[derive(Debug, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub code: String,
    /// Canonical URLs discovered while rewriting, one per distinct
    /// specifier, for speculative prefetch.
    pub discovered: Vec<String>,
}

impl RewriteOutcome {
    fn pass_through(source: &str) -> Self {
        RewriteOutcome { code: source.to_string(), discovered: Vec::new() }
    }
}

/// Declaration files carry no runtime imports worth rewriting.
pub fn is_declaration_file(filename: &str) -> bool {
    filename.ends_with(".d.ts") || filename.ends_with(".d.mts") || filename.ends_with(".d.cts")
}

/// Replace every module specifier in `source` with whatever `resolve` maps
/// it to, range-accurately, resolving distinct specifiers concurrently.
///
/// Failure never propagates: a source that doesn't parse is returned as-is,
/// and a specifier `resolve` returns `None` for stays untouched. A broken
/// transform is strictly worse for clients than a passed-through module.
pub async fn rewrite_module<Resolve, Fut>(
    source: &str,
    filename: &str,
    resolve: Resolve,
) -> RewriteOutcome
where
    Resolve: Fn(String) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    if is_declaration_file(filename) {
        return RewriteOutcome::pass_through(source);
    }

    let imports = match collect_imports(source) {
        Ok(imports) => imports,
        Err(error) => {
            tracing::warn!(
                target: "modcdn::rewrite",
                filename,
                %error,
                "Parse failure, serving untransformed",
            );
            return RewriteOutcome::pass_through(source);
        }
    };

    let resolutions =
        join_all(imports.iter().map(|import| resolve(import.specifier.clone()))).await;

    let mut edits = Vec::new();
    let mut discovered = Vec::new();
    for (import, resolution) in imports.iter().zip(resolutions) {
        let Some(url) = resolution else {
            tracing::debug!(
                target: "modcdn::rewrite",
                specifier = %import.specifier,
                "Specifier left untouched",
            );
            continue;
        };
        for range in &import.ranges {
            edits.push(TextEdit { range: range.clone(), new_text: url.clone() });
        }
        discovered.push(url);
    }

    RewriteOutcome { code: apply_edits(source, edits), discovered }
}
