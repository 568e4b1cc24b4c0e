//! The interpreter: the public entry point of the engine.
//!
//! Modules and documents are loaded up front; each query assembles a fresh
//! tree from them, runs the lowering pipeline with well-formedness checks at
//! every boundary, unifies the root query, and emits bindings.

use std::fs;
use std::path::{Path, PathBuf};

use dike_ast::{dump_tree, to_json, Ast, NodeId, NodeKind, Schema};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::builtins::BuiltIns;
use crate::error::{EngineError, Result};
use crate::json;
use crate::passes::{self, Pass};
use crate::reader;
use crate::rewrite::run_pass;
use crate::unifier::{resolve_query, EvalContext};

/// A Rego policy interpreter.
///
/// # Examples
///
/// ```rust
/// use dike_engine::Interpreter;
///
/// let mut interpreter = Interpreter::new();
/// interpreter
///     .add_module("policy.rego", "package p\nmsg = \"hello\"")
///     .unwrap();
/// let results = interpreter.query("data.p.msg").unwrap();
/// assert_eq!(results, "\"hello\"\n");
/// ```
#[derive(Debug)]
pub struct Interpreter {
    ast: Ast,
    modules: Vec<LoadedModule>,
    data_documents: Vec<NodeId>,
    input: Option<NodeId>,
    builtins: BuiltIns,
    debug_path: PathBuf,
    debug_enabled: bool,
    well_formed_checks_enabled: bool,
    executable: PathBuf,
}

#[derive(Debug)]
struct LoadedModule {
    package: String,
    file: NodeId,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Creates an interpreter with the standard builtin library.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ast: Ast::new(),
            modules: Vec::new(),
            data_documents: Vec::new(),
            input: None,
            builtins: BuiltIns::standard(),
            debug_path: PathBuf::from("."),
            debug_enabled: false,
            well_formed_checks_enabled: true,
            executable: PathBuf::from("dike"),
        }
    }

    /// Adds a policy module from source text.
    ///
    /// # Errors
    ///
    /// Returns an error if the source does not lex or group.
    #[instrument(skip(self, contents))]
    pub fn add_module(&mut self, name: &str, contents: &str) -> Result<&mut Self> {
        let source = dike_ast::Source::new(name, contents);
        let file = reader::parse_source(&mut self.ast, source, NodeKind::File)?;
        let package = extract_package(&self.ast, file);
        debug!(name, package, "module loaded");
        self.modules.push(LoadedModule { package, file });
        Ok(self)
    }

    /// Adds a policy module from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn add_module_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| EngineError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_module(&path.to_string_lossy(), &contents)
    }

    /// Adds a base data document from JSON text. Multiple documents merge key
    /// by key, later documents winning on conflicts.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object.
    pub fn add_data_json(&mut self, text: &str) -> Result<&mut Self> {
        let seq = json::parse_data_document(&mut self.ast, "data", text)?;
        self.data_documents.push(seq);
        Ok(self)
    }

    /// Adds a base data document from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn add_data_json_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| EngineError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_data_json(&contents)
    }

    /// Adds an already-built data item sequence node.
    pub fn add_data(&mut self, node: NodeId) -> &mut Self {
        self.data_documents.push(node);
        self
    }

    /// Sets the input document from JSON text. The input may be any JSON
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InputAlreadySet`] on a second call, or a parse
    /// error for invalid JSON.
    pub fn add_input_json(&mut self, text: &str) -> Result<&mut Self> {
        if self.input.is_some() {
            return Err(EngineError::InputAlreadySet);
        }
        let value: Value =
            serde_json::from_str(text).map_err(|source| EngineError::JsonError {
                source_name: "input".to_string(),
                source,
            })?;
        let node = if value.is_object() {
            json::parse_data_document(&mut self.ast, "input", text)?
        } else {
            json::data_term(&mut self.ast, &value)
        };
        self.input = Some(node);
        Ok(self)
    }

    /// Sets the input document from a file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InputAlreadySet`] on a second call, or a read
    /// or parse error.
    pub fn add_input_json_file(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| EngineError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_input_json(&contents)
    }

    /// Sets an already-built input node.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InputAlreadySet`] on a second call.
    pub fn add_input(&mut self, node: NodeId) -> Result<&mut Self> {
        if self.input.is_some() {
            return Err(EngineError::InputAlreadySet);
        }
        self.input = Some(node);
        Ok(self)
    }

    /// Sets the directory for debug dumps.
    pub fn debug_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.debug_path = path.into();
        self
    }

    /// Enables or disables per-pass debug dumps.
    pub fn debug_enabled(&mut self, enabled: bool) -> &mut Self {
        self.debug_enabled = enabled;
        self
    }

    /// Enables or disables well-formedness checking at pass boundaries.
    pub fn well_formed_checks_enabled(&mut self, enabled: bool) -> &mut Self {
        self.well_formed_checks_enabled = enabled;
        self
    }

    /// Records the host executable path, named in debug dump headers.
    pub fn executable(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.executable = path.into();
        self
    }

    /// Replaces the builtin registry.
    pub fn builtins(&mut self, builtins: BuiltIns) -> &mut Self {
        self.builtins = builtins;
        self
    }

    /// Runs a query, returning the root node of the result tree: a sequence
    /// of `Binding`, `Term`, `Undefined`, or `Error` children.
    ///
    /// # Errors
    ///
    /// Returns an error for parse failures, well-formedness violations, and
    /// static errors; evaluation errors surface as `Error` children of the
    /// result.
    #[instrument(skip(self))]
    pub fn raw_query(&mut self, query_expr: &str) -> Result<NodeId> {
        let top = self.assemble(query_expr)?;
        self.write_debug(0, "parse", top)?;
        if self.well_formed_checks_enabled {
            self.check(&passes::parser_schema(), top, "parse")?;
        }

        let pipeline = passes::pipeline(&self.builtins);
        for (index, Pass { def, schema }) in pipeline.iter().enumerate() {
            let report = run_pass(&mut self.ast, top, def).map_err(|details| {
                EngineError::PassError {
                    pass: def.name.to_string(),
                    details,
                }
            })?;
            debug!(pass = def.name, changes = report.change_count, "pass complete");
            self.write_debug(index + 1, def.name, top)?;
            if self.ast.has_error(top) {
                return Err(self.pass_failure(def.name, top));
            }
            if self.well_formed_checks_enabled {
                self.check(schema, top, def.name)?;
            }
        }

        // unify: evaluate the root query; evaluation errors are results, not
        // pipeline failures
        self.ast.build_symbols(top);
        let rego = self.ast.child(top, 0);
        let query = self.ast.child(rego, 0);
        let mut ctx = EvalContext::new(self.builtins.clone());
        let result = resolve_query(&mut self.ast, &mut ctx, query);
        self.ast.replace_child(rego, query, result);
        self.write_debug(pipeline.len() + 1, "unify", top)?;
        if self.well_formed_checks_enabled {
            self.check(&passes::unify_schema(), top, "unify")?;
        }

        // query: lift the results to the top of the tree
        let results: Vec<NodeId> = self.ast.children(result).to_vec();
        self.ast.detach(rego);
        for node in results {
            self.ast.push_back(top, node);
        }
        self.write_debug(pipeline.len() + 2, "query", top)?;
        if self.well_formed_checks_enabled {
            self.check(&passes::query_schema(), top, "query")?;
        }
        Ok(top)
    }

    /// Runs a query and renders one JSON line per result.
    ///
    /// # Errors
    ///
    /// Same as [`raw_query`](Self::raw_query).
    pub fn query(&mut self, query_expr: &str) -> Result<String> {
        let top = self.raw_query(query_expr)?;
        let mut out = String::new();
        let mut bindings: Vec<(String, String)> = Vec::new();
        for &child in self.ast.children(top) {
            match self.ast.kind(child) {
                NodeKind::Binding => {
                    let name = self.ast.text(self.ast.child(child, 0)).to_string();
                    let value = to_json(&self.ast, self.ast.child(child, 1));
                    bindings.push((name, value));
                }
                _ => {
                    out.push_str(&to_json(&self.ast, child));
                    out.push('\n');
                }
            }
        }
        if !bindings.is_empty() {
            let rendered: Vec<String> = bindings
                .iter()
                .map(|(name, value)| format!("\"{name}\":{value}"))
                .collect();
            out.push_str(&format!("{{\"bindings\":{{{}}}}}\n", rendered.join(",")));
        }
        Ok(out)
    }

    fn assemble(&mut self, query_expr: &str) -> Result<NodeId> {
        let query_source = dike_ast::Source::new("query", query_expr);
        let query = reader::parse_source(&mut self.ast, query_source, NodeKind::Query)?;
        if self.ast.is_empty(query) {
            return Err(EngineError::ParseError {
                source_name: "query".to_string(),
                location: "query".to_string(),
                message: "Must provide a query".to_string(),
            });
        }

        let input = self.ast.node(NodeKind::Input);
        match self.input {
            Some(node) => {
                let clone = self.ast.deep_clone(node);
                self.ast.push_back(input, clone);
            }
            None => {
                let undefined = self.ast.node(NodeKind::Undefined);
                self.ast.push_back(input, undefined);
            }
        }

        let data_seq = self.ast.node(NodeKind::DataSeq);
        let documents: Vec<NodeId> = self.data_documents.clone();
        for document in documents {
            let clone = self.ast.deep_clone(document);
            self.ast.push_back(data_seq, clone);
        }

        // deterministic merging: modules ordered by package name
        let mut ordered: Vec<(String, NodeId)> = self
            .modules
            .iter()
            .map(|m| (m.package.clone(), m.file))
            .collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        let module_seq = self.ast.node(NodeKind::ModuleSeq);
        for (_, file) in ordered {
            let clone = self.ast.deep_clone(file);
            self.ast.push_back(module_seq, clone);
        }

        let rego = self.ast.node(NodeKind::Rego);
        self.ast.push_back(rego, query);
        self.ast.push_back(rego, input);
        self.ast.push_back(rego, data_seq);
        self.ast.push_back(rego, module_seq);
        let top = self.ast.node(NodeKind::Top);
        self.ast.push_back(top, rego);
        Ok(top)
    }

    fn check(&mut self, schema: &Schema, root: NodeId, pass: &str) -> Result<()> {
        let violations = schema.check(&mut self.ast, root);
        if violations.is_empty() {
            return Ok(());
        }
        let details = violations
            .iter()
            .map(|v| {
                format!(
                    "{} at {}",
                    v.message,
                    self.ast.loc(v.node).describe()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        Err(EngineError::PassError {
            pass: pass.to_string(),
            details,
        })
    }

    fn pass_failure(&self, pass: &str, root: NodeId) -> EngineError {
        let details = self
            .ast
            .collect_errors(root)
            .iter()
            .map(|&error| {
                format!(
                    "{} at {}",
                    self.ast.error_message(error),
                    self.ast.loc(error).describe()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        EngineError::PassError {
            pass: pass.to_string(),
            details,
        }
    }

    fn write_debug(&self, index: usize, pass: &str, root: NodeId) -> Result<()> {
        if !self.debug_enabled {
            return Ok(());
        }
        if !self.debug_path.is_dir() {
            fs::create_dir_all(&self.debug_path).map_err(|source| {
                EngineError::DebugWriteError {
                    path: self.debug_path.clone(),
                    source,
                }
            })?;
        }
        let file = self.debug_path.join(format!("{index:02}_{pass}.trieste"));
        let tool = self
            .executable
            .file_stem()
            .map_or_else(|| "dike".to_string(), |s| s.to_string_lossy().to_string());
        let contents = format!("{tool}\n{pass}\n{}", dump_tree(&self.ast, root));
        fs::write(&file, contents).map_err(|source| EngineError::DebugWriteError {
            path: file.clone(),
            source,
        })?;
        Ok(())
    }
}

/// Best-effort package name, used only for deterministic module ordering.
fn extract_package(ast: &Ast, file: NodeId) -> String {
    for &group in ast.children(file) {
        let children = ast.children(group);
        if children
            .first()
            .is_some_and(|&c| ast.kind(c) == NodeKind::Package)
        {
            return children[1..]
                .iter()
                .map(|&c| ast.text(c))
                .collect::<Vec<_>>()
                .concat();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_already_set() {
        let mut interpreter = Interpreter::new();
        interpreter.add_input_json("{\"a\": 1}").unwrap();
        let result = interpreter.add_input_json("{\"a\": 2}");
        assert!(matches!(result, Err(EngineError::InputAlreadySet)));
    }

    #[test]
    fn test_module_package_extraction() {
        let mut interpreter = Interpreter::new();
        interpreter
            .add_module("b.rego", "package zebra\nx = 1")
            .unwrap();
        interpreter
            .add_module("a.rego", "package alpha\ny = 2")
            .unwrap();
        assert_eq!(interpreter.modules[0].package, "zebra");
        assert_eq!(interpreter.modules[1].package, "alpha");
    }

    #[test]
    fn test_missing_module_file() {
        let mut interpreter = Interpreter::new();
        let result = interpreter.add_module_file("/nonexistent/policy.rego");
        assert!(matches!(result, Err(EngineError::FileReadError { .. })));
    }

    #[test]
    fn test_empty_query_rejected() {
        let mut interpreter = Interpreter::new();
        let result = interpreter.raw_query("");
        assert!(matches!(result, Err(EngineError::ParseError { .. })));
    }
}
