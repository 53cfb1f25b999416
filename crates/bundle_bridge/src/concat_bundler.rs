//! Concatenating reference bundler
//!
//! A deliberately small [`Bundler`] that loads modules through the plugin
//! chain, follows static relative `import`/`export ... from` statements and
//! emits every reachable module once, dependencies first. It does no scope
//! analysis or renaming: modules share one top-level scope in the output.
//!
//! Only single-line import and export statements are recognised. ES output
//! keeps the entry module's exports and external imports as written. CommonJS
//! output turns them into `exports` assignments and `require` calls. IIFE
//! output drops exports and rejects external imports.

use std::sync::{Arc, LazyLock};

use anyhow::{Result, bail};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};
use regex::Regex;

use crate::{
    plugin::{Bundle, Bundler, BuildOptions, GenerateOptions, GeneratedBundle, Plugin, load_with},
    types::{OutputFormat, SourceMap, SourceMapMode},
};

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:import|export)\s+(?:[^'";]*?\s*from\s*)?['"]([^'"]+)['"]\s*;?\s*$"#)
        .expect("import pattern is valid")
});

static EXPORT_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\s*)export\s+((?:async\s+)?function\*?|class|const|let|var)\s+([A-Za-z_$][\w$]*)",
    )
    .expect("export pattern is valid")
});

static EXPORT_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)export\s+default\s+").expect("export default pattern is valid")
});

static EXPORT_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*export\s*\{([^}]*)\}\s*;?\s*$").expect("export list pattern is valid")
});

static EXTERNAL_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^import\s+(?:(\*\s+as\s+[A-Za-z_$][\w$]*)|(\{[^}]*\})|([A-Za-z_$][\w$]*))?\s*(?:from\s*)?['"]([^'"]+)['"]\s*;?$"#,
    )
    .expect("external import pattern is valid")
});

/// One loaded module, with its import statements already split out
#[derive(Debug, Clone)]
struct ModuleSource {
    path: String,
    original: String,
    /// Remaining lines with their zero-based line number in `original`
    lines: Vec<(usize, String)>,
    /// Import specifiers in source order
    imports: Vec<String>,
    /// External import statements, kept verbatim
    external_statements: Vec<String>,
}

impl ModuleSource {
    fn parse(path: &str, source: String, external: &[String]) -> Self {
        let mut lines = Vec::new();
        let mut imports = Vec::new();
        let mut external_statements = Vec::new();

        for (idx, line) in source.lines().enumerate() {
            let Some(captures) = IMPORT_RE.captures(line) else {
                lines.push((idx, line.to_owned()));
                continue;
            };
            let specifier = &captures[1];
            if is_relative(specifier) {
                imports.push(specifier.to_owned());
            } else {
                if !external.iter().any(|id| id == specifier) {
                    warn!("'{specifier}' imported by {path} is treated as external");
                }
                external_statements.push(line.trim().to_owned());
            }
        }

        Self {
            path: path.to_owned(),
            original: source,
            lines,
            imports,
            external_statements,
        }
    }
}

/// Bundler that concatenates modules in dependency order
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatBundler;

impl ConcatBundler {
    pub fn new() -> Self {
        Self
    }
}

struct Frame {
    module: ModuleSource,
    next_import: usize,
}

#[async_trait]
impl Bundler for ConcatBundler {
    async fn build(&self, options: BuildOptions) -> Result<Box<dyn Bundle>> {
        let BuildOptions {
            entry,
            plugins,
            external,
        } = options;

        let Some(source) = load_with(&plugins, &entry).await? else {
            bail!("Could not load entry module {entry}");
        };

        let mut in_progress: IndexSet<String> = IndexSet::new();
        let mut done: IndexMap<String, ModuleSource> = IndexMap::new();
        let mut stack = vec![Frame {
            module: ModuleSource::parse(&entry, source, &external),
            next_import: 0,
        }];
        in_progress.insert(entry.clone());

        while let Some(frame) = stack.last_mut() {
            let Some(specifier) = frame.module.imports.get(frame.next_import).cloned() else {
                let Some(finished) = stack.pop() else { break };
                in_progress.shift_remove(&finished.module.path);
                debug!("Module {} complete", finished.module.path);
                done.insert(finished.module.path.clone(), finished.module);
                continue;
            };
            frame.next_import += 1;
            let importer = frame.module.path.clone();

            let (resolved, source) = resolve(&plugins, &importer, &specifier).await?;
            if done.contains_key(&resolved) || in_progress.contains(&resolved) {
                trace!("{resolved} already visited");
                continue;
            }
            in_progress.insert(resolved.clone());
            stack.push(Frame {
                module: ModuleSource::parse(&resolved, source, &external),
                next_import: 0,
            });
        }

        Ok(Box::new(ConcatBundle {
            entry,
            modules: done.into_values().collect(),
        }))
    }
}

/// Resolve a relative specifier against its importer and load it
async fn resolve(
    plugins: &[Arc<dyn Plugin>],
    importer: &str,
    specifier: &str,
) -> Result<(String, String)> {
    let joined = join_relative(importer, specifier);
    let mut candidates = vec![joined.clone()];
    if !joined.ends_with(".js") {
        candidates.push(format!("{joined}.js"));
    }

    for candidate in candidates {
        if let Some(source) = load_with(plugins, &candidate).await? {
            return Ok((candidate, source));
        }
    }
    bail!("Could not resolve '{specifier}' from {importer}")
}

/// What to do with export syntax in a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportMode {
    /// Leave exports as written
    Keep,
    /// Remove export syntax, keeping the declarations
    Strip,
    /// Turn exports into assignments on `exports`
    CommonJs,
}

/// Rewrite one line's export syntax, recording `(exported, local)` pairs
/// that still need an `exports` assignment
fn rewrite_exports(line: &str, mode: ExportMode, exported: &mut Vec<(String, String)>) -> String {
    if mode == ExportMode::Keep {
        return line.to_owned();
    }

    if let Some(captures) = EXPORT_DECL_RE.captures(line) {
        if mode == ExportMode::CommonJs {
            exported.push((captures[3].to_owned(), captures[3].to_owned()));
        }
        return EXPORT_DECL_RE.replace(line, "$1$2 $3").into_owned();
    }

    if EXPORT_DEFAULT_RE.is_match(line) {
        let replacement = if mode == ExportMode::CommonJs {
            "${1}exports.default = "
        } else {
            "$1"
        };
        return EXPORT_DEFAULT_RE.replace(line, replacement).into_owned();
    }

    if let Some(captures) = EXPORT_LIST_RE.captures(line) {
        if mode == ExportMode::CommonJs {
            for binding in captures[1].split(',').map(str::trim).filter(|b| !b.is_empty()) {
                let (local, exported_as) = binding
                    .split_once(" as ")
                    .map_or((binding, binding), |(l, e)| (l.trim(), e.trim()));
                exported.push((exported_as.to_owned(), local.to_owned()));
            }
        }
        return String::new();
    }

    line.to_owned()
}

/// Convert a hoisted external import for the output format
fn convert_external(statement: &str, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Es => Ok(statement.to_owned()),
        OutputFormat::Iife => {
            bail!("External import `{statement}` cannot be expressed in iife output")
        }
        OutputFormat::Cjs => {
            let Some(captures) = EXTERNAL_IMPORT_RE.captures(statement) else {
                bail!("External import `{statement}` cannot be converted to CommonJS");
            };
            let module = &captures[4];
            if let Some(namespace) = captures.get(1) {
                let name = namespace.as_str().rsplit(' ').next().unwrap_or_default();
                Ok(format!("const {name} = require('{module}');"))
            } else if let Some(named) = captures.get(2) {
                let bindings = named.as_str().replace(" as ", ": ");
                Ok(format!("const {bindings} = require('{module}');"))
            } else if let Some(default) = captures.get(3) {
                Ok(format!("const {} = require('{module}');", default.as_str()))
            } else {
                Ok(format!("require('{module}');"))
            }
        }
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Lexically join `specifier` onto the directory of `importer`
fn join_relative(importer: &str, specifier: &str) -> String {
    let absolute = importer.starts_with('/');
    let mut parts: Vec<&str> = importer.split('/').filter(|p| !p.is_empty()).collect();
    parts.pop();

    for segment in specifier.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

/// Modules loaded by [`ConcatBundler`], dependencies first
#[derive(Debug)]
struct ConcatBundle {
    entry: String,
    modules: Vec<ModuleSource>,
}

/// Output being assembled, with the origin of every generated line
#[derive(Debug, Default)]
struct Emitter {
    lines: Vec<String>,
    origins: Vec<Option<(usize, usize)>>,
}

impl Emitter {
    fn push(&mut self, line: impl Into<String>, origin: Option<(usize, usize)>) {
        self.lines.push(line.into());
        self.origins.push(origin);
    }
}

#[async_trait]
impl Bundle for ConcatBundle {
    async fn generate(&self, options: GenerateOptions) -> Result<GeneratedBundle> {
        let mut out = Emitter::default();
        match options.format {
            OutputFormat::Es => {}
            OutputFormat::Cjs => {
                out.push("'use strict';", None);
                out.push("", None);
            }
            OutputFormat::Iife => {
                out.push("(function () {", None);
                out.push("'use strict';", None);
                out.push("", None);
            }
        }

        let mut hoisted: IndexSet<&str> = IndexSet::new();
        for module in &self.modules {
            hoisted.extend(module.external_statements.iter().map(String::as_str));
        }
        for statement in &hoisted {
            out.push(convert_external(statement, options.format)?, None);
        }
        if !hoisted.is_empty() {
            out.push("", None);
        }

        let mut exported = Vec::new();
        for (source_idx, module) in self.modules.iter().enumerate() {
            let is_entry = module.path == self.entry;
            let mode = match (is_entry, options.format) {
                (true, OutputFormat::Es) => ExportMode::Keep,
                (true, OutputFormat::Cjs) => ExportMode::CommonJs,
                _ => ExportMode::Strip,
            };
            out.push(format!("// {}", module.path), None);
            for (line_no, line) in &module.lines {
                let line = rewrite_exports(line, mode, &mut exported);
                out.push(line, Some((source_idx, *line_no)));
            }
            out.push("", None);
        }
        for (exported_as, local) in &exported {
            out.push(format!("exports.{exported_as} = {local};"), None);
        }
        if !exported.is_empty() {
            out.push("", None);
        }

        if options.format == OutputFormat::Iife {
            out.push("})();", None);
        }

        let mut code = out.lines.join("\n");
        code.push('\n');

        let map = match options.source_map {
            SourceMapMode::Disabled => None,
            SourceMapMode::Inline => {
                let map = self.source_map(&out.origins);
                let json = serde_json::to_string(&map)?;
                code.push_str("//# sourceMappingURL=data:application/json;charset=utf-8;base64,");
                code.push_str(&STANDARD.encode(json));
                code.push('\n');
                Some(map)
            }
        };

        Ok(GeneratedBundle { code, map })
    }
}

impl ConcatBundle {
    fn source_map(&self, origins: &[Option<(usize, usize)>]) -> SourceMap {
        SourceMap {
            version: 3,
            file: self.entry.rsplit('/').next().map(str::to_owned),
            sources: self.modules.iter().map(|m| m.path.clone()).collect(),
            sources_content: self
                .modules
                .iter()
                .map(|m| Some(m.original.clone()))
                .collect(),
            names: Vec::new(),
            mappings: encode_mappings(origins),
        }
    }
}

/// Encode one segment per mapped line, each pointing at column 0 of its source line
#[allow(clippy::cast_possible_wrap)]
fn encode_mappings(origins: &[Option<(usize, usize)>]) -> String {
    let mut mappings = String::new();
    let mut prev_source = 0i64;
    let mut prev_line = 0i64;

    for (idx, origin) in origins.iter().enumerate() {
        if idx > 0 {
            mappings.push(';');
        }
        let Some((source, line)) = *origin else {
            continue;
        };
        let (source, line) = (source as i64, line as i64);
        encode_vlq(&mut mappings, 0);
        encode_vlq(&mut mappings, source - prev_source);
        encode_vlq(&mut mappings, line - prev_line);
        encode_vlq(&mut mappings, 0);
        prev_source = source;
        prev_line = line;
    }
    mappings
}

#[allow(clippy::cast_sign_loss)]
fn encode_vlq(out: &mut String, value: i64) {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = vlq & 0b1_1111;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b10_0000;
        }
        out.push(ALPHABET[digit as usize] as char);
        if vlq == 0 {
            break;
        }
    }
}
