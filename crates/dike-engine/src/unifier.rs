//! The unifier.
//!
//! For each rule body in normal form, a [`Unifier`] computes the dataflow
//! ordering of its statements, evaluates them over sets of candidate values,
//! and binds the survivors. Cycles in the dependency graph add retry passes;
//! candidates narrow monotonically across passes. Rule resolution recurses
//! through [`unify_body`], with recursion detected on a call stack shared by
//! the whole query evaluation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use dike_ast::{strip_quotes, Ast, Location, NodeId, NodeKind};
use tracing::{debug, trace};

use crate::args::{value_key, Args};
use crate::builtins::BuiltIns;
use crate::resolver;
use crate::value::{filter_by_rank, ValueDef, Values};
use crate::variable::{detect_cycles, Variable};

/// Evaluation context threaded through a query: builtins, the shared call
/// stack, the with-override stack, and the unifier cache.
#[derive(Debug)]
pub struct EvalContext {
    /// Builtin registry.
    pub builtins: BuiltIns,
    /// Rule locations currently being evaluated.
    pub call_stack: Vec<Location>,
    /// With-override frames, innermost last.
    pub with_stack: Vec<HashMap<String, Values>>,
    /// Rule-body node -> constructed unifier, reused across repeated calls.
    pub cache: HashMap<NodeId, Unifier>,
}

impl EvalContext {
    /// Creates a context with the given builtins.
    #[must_use]
    pub fn new(builtins: BuiltIns) -> Self {
        Self {
            builtins,
            call_stack: Vec::new(),
            with_stack: Vec::new(),
            cache: HashMap::new(),
        }
    }
}

/// Unifies a rule body, returning `JSONTrue`, `JSONFalse`, `Undefined`, or an
/// `Error` node.
///
/// Cached unifiers are taken out of the cache for the duration of the call
/// (re-entry builds a fresh one; true recursion is caught by the call stack
/// before any work happens).
pub fn unify_body(ast: &mut Ast, ctx: &mut EvalContext, rule: &Location, body: NodeId) -> NodeId {
    if ctx.call_stack.contains(rule) {
        debug!(rule = %rule, "recursion detected");
        return ast.error(body, "Recursion detected in rule body");
    }
    let mut unifier = match ctx.cache.remove(&body) {
        Some(mut cached) => {
            cached.reset();
            cached
        }
        None => Unifier::build(ast, rule.clone(), body),
    };
    ctx.call_stack.push(rule.clone());
    trace!(rule = %rule, retries = unifier.retries, "unifying body");
    for _ in 0..=unifier.retries {
        unifier.pass(ast, ctx);
        unifier.mark_invalid_values(ast);
        unifier.remove_invalid_values();
    }
    let result = unifier.bind_variables(ast);
    ctx.call_stack.pop();
    ctx.cache.insert(body, unifier);
    result
}

/// One rule body's unification state.
#[derive(Debug)]
pub struct Unifier {
    rule: Location,
    parent_kind: NodeKind,
    variables: BTreeMap<String, Variable>,
    statements: Vec<NodeId>,
    nested: HashMap<NodeId, Vec<NodeId>>,
    retries: usize,
    poison: Option<String>,
}

impl Unifier {
    fn build(ast: &Ast, rule: Location, body: NodeId) -> Self {
        let parent_kind = ast
            .parent(body)
            .map_or(NodeKind::Top, |parent| ast.kind(parent));
        let mut unifier = Self {
            rule,
            parent_kind,
            variables: BTreeMap::new(),
            statements: Vec::new(),
            nested: HashMap::new(),
            retries: 0,
            poison: None,
        };
        unifier.collect_variables(ast, body);
        let mut statements = Vec::new();
        unifier.collect_statements(ast, body, &mut statements);
        unifier.statements = statements;
        unifier.compute_dependency_scores(ast);
        unifier.retries = detect_cycles(&unifier.variables);
        if unifier.retries > 0 {
            debug!(rule = %unifier.rule, cycles = unifier.retries, "cycles in dependency graph");
        }
        unifier
    }

    fn collect_variables(&mut self, ast: &Ast, body: NodeId) {
        for &stmt in ast.children(body) {
            match ast.kind(stmt) {
                NodeKind::Local => {
                    let variable = Variable::new(ast, stmt);
                    self.variables
                        .insert(variable.name().view().to_string(), variable);
                }
                NodeKind::UnifyExprWith => {
                    self.collect_variables(ast, ast.child(stmt, 0));
                }
                _ => {}
            }
        }
    }

    fn collect_statements(&mut self, ast: &Ast, body: NodeId, statements: &mut Vec<NodeId>) {
        for &stmt in ast.children(body) {
            match ast.kind(stmt) {
                NodeKind::UnifyExpr => {
                    statements.push(stmt);
                    self.add_unifyexpr(ast, stmt);
                }
                NodeKind::UnifyExprWith => {
                    statements.push(stmt);
                    let mut nested = Vec::new();
                    self.collect_statements(ast, ast.child(stmt, 0), &mut nested);
                    self.nested.insert(stmt, nested);
                }
                _ => {}
            }
        }
    }

    fn add_unifyexpr(&mut self, ast: &Ast, stmt: NodeId) {
        let lhs = ast.child(stmt, 0);
        let rhs = ast.child(stmt, 1);
        let name = ast.text(lhs).to_string();
        if !self.variables.contains_key(&name) {
            self.poison = Some(format!(
                "Unification target {name} is not a local variable"
            ));
            return;
        }
        let (num_vars, deps) = self.scan_vars(ast, rhs);
        let variable = self.variables.get_mut(&name).expect("checked above");
        variable.increase_dependency_score(num_vars - deps.len());
        variable.insert_dependencies(deps);
    }

    fn scan_vars(&self, ast: &Ast, expr: NodeId) -> (usize, Vec<String>) {
        let mut num_vars = 0;
        let mut locals = Vec::new();
        for node in ast.descendants(expr) {
            if ast.kind(node) == NodeKind::Var {
                num_vars += 1;
                let name = ast.text(node);
                if self.variables.contains_key(name) {
                    locals.push(name.to_string());
                }
            }
        }
        (num_vars, locals)
    }

    fn compute_dependency_scores(&mut self, ast: &Ast) {
        let names: Vec<String> = self.variables.keys().cloned().collect();
        let mut visited = BTreeSet::new();
        for name in names {
            variable_score(&mut self.variables, &name, &mut visited);
        }
        let scores: Vec<(NodeId, usize)> = self
            .statements
            .iter()
            .map(|&stmt| (stmt, self.statement_score(ast, stmt)))
            .collect();
        let score_of: HashMap<NodeId, usize> = scores.into_iter().collect();
        self.statements.sort_by_key(|stmt| score_of[stmt]);
        let nested_keys: Vec<NodeId> = self.nested.keys().copied().collect();
        for key in nested_keys {
            let mut nested = self.nested.remove(&key).unwrap_or_default();
            let nested_scores: HashMap<NodeId, usize> = nested
                .iter()
                .map(|&stmt| (stmt, self.statement_score(ast, stmt)))
                .collect();
            nested.sort_by_key(|stmt| nested_scores[stmt]);
            self.nested.insert(key, nested);
        }
    }

    fn statement_score(&self, ast: &Ast, stmt: NodeId) -> usize {
        match ast.kind(stmt) {
            NodeKind::UnifyExprWith => {
                let mut score = 0;
                let body = ast.child(stmt, 0);
                for &child in ast.children(body) {
                    if ast.kind(child) != NodeKind::Local {
                        score += self.statement_score(ast, child);
                    }
                }
                let withseq = ast.child(stmt, 1);
                for &with in ast.children(withseq) {
                    score += self.expression_score(ast, ast.child(with, 1));
                }
                score
            }
            NodeKind::UnifyExpr => self.expression_score(ast, ast.child(stmt, 1)),
            _ => 0,
        }
    }

    fn expression_score(&self, ast: &Ast, expr: NodeId) -> usize {
        let (num_vars, deps) = self.scan_vars(ast, expr);
        let mut score = num_vars - deps.len();
        for dep in deps {
            score += self
                .variables
                .get(&dep)
                .map_or(0, Variable::dependency_score);
        }
        score
    }

    fn reset(&mut self) {
        for variable in self.variables.values_mut() {
            variable.reset();
        }
    }

    fn pass(&mut self, ast: &mut Ast, ctx: &mut EvalContext) {
        let statements = self.statements.clone();
        self.execute_statements(ast, ctx, &statements);
    }

    fn execute_statements(&mut self, ast: &mut Ast, ctx: &mut EvalContext, statements: &[NodeId]) {
        for &stmt in statements {
            match ast.kind(stmt) {
                NodeKind::UnifyExprWith => {
                    self.push_with(ast, ctx, ast.child(stmt, 1));
                    let nested = self.nested.get(&stmt).cloned().unwrap_or_default();
                    self.execute_statements(ast, ctx, &nested);
                    ctx.with_stack.pop();
                }
                NodeKind::UnifyExpr => {
                    let lhs = ast.child(stmt, 0);
                    let rhs = ast.child(stmt, 1);
                    let var = ast.loc(lhs).clone();
                    let name = var.view().to_string();
                    let values = self.evaluate(ast, ctx, &var, rhs);
                    if values.is_empty() {
                        continue;
                    }
                    if let Some(variable) = self.variables.get_mut(&name) {
                        variable.unify(ast, values);
                    }
                }
                _ => {}
            }
        }
    }

    fn mark_invalid_values(&mut self, ast: &Ast) {
        for variable in self.variables.values_mut() {
            // Only unification targets can invalidate candidates.
            if variable.is_unify() {
                variable.mark_invalid_values(ast);
            }
        }
    }

    fn remove_invalid_values(&mut self) {
        for variable in self.variables.values_mut() {
            variable.remove_invalid_values();
        }
    }

    fn bind_variables(&mut self, ast: &mut Ast) -> NodeId {
        if let Some(message) = &self.poison {
            let message = message.clone();
            let anchor = ast.node(NodeKind::Undefined);
            return ast.error(anchor, message);
        }
        let mut failed = false;
        let mut fatal: Option<NodeId> = None;
        for variable in self.variables.values() {
            let bound = variable.bind(ast);
            match ast.kind(bound) {
                NodeKind::Error | NodeKind::Undefined => {
                    fatal.get_or_insert(bound);
                }
                NodeKind::TermSet => {
                    if ast.is_empty(bound) && (variable.is_unify() || variable.is_user_var()) {
                        failed = true;
                    }
                }
                _ => {}
            }
        }
        if let Some(node) = fatal {
            return node;
        }
        if failed {
            ast.token(NodeKind::JSONFalse, "false")
        } else {
            ast.token(NodeKind::JSONTrue, "true")
        }
    }

    // ---- evaluation --------------------------------------------------------

    fn evaluate(
        &mut self,
        ast: &mut Ast,
        ctx: &mut EvalContext,
        var: &Location,
        value: NodeId,
    ) -> Values {
        match ast.kind(value) {
            NodeKind::Var => self
                .resolve_var(ast, ctx, value)
                .iter()
                .map(|v| ValueDef::copy_to(v, var.clone()))
                .collect(),
            NodeKind::Scalar => {
                let clone = ast.deep_clone(value);
                vec![ValueDef::new_for(var.clone(), clone)]
            }
            NodeKind::Function => {
                let name = strip_quotes(ast.text(ast.child(value, 0))).to_string();
                let argseq = ast.child(value, 1);
                self.evaluate_call(ast, ctx, var, &name, argseq)
            }
            _ => Vec::new(),
        }
    }

    fn evaluate_call(
        &mut self,
        ast: &mut Ast,
        ctx: &mut EvalContext,
        var: &Location,
        name: &str,
        argseq: NodeId,
    ) -> Values {
        match name {
            "enumerate" => {
                let container = ast.child(argseq, 0);
                self.enumerate(ast, ctx, var, container)
            }
            "to-values" => {
                let source = ast.child(argseq, 0);
                let termsets = self.resolve_var(ast, ctx, source);
                let mut values = Vec::new();
                for value in termsets {
                    match ast.kind(value.node()) {
                        NodeKind::Term => {
                            values.push(ValueDef::new_for(var.clone(), value.node()));
                        }
                        NodeKind::TermSet => {
                            for &term in ast.children(value.node()).to_vec().iter() {
                                values.push(ValueDef::new_for(var.clone(), term));
                            }
                        }
                        _ => {
                            let error = ast.error(value.node(), "Not a term");
                            values.push(ValueDef::new_for(var.clone(), error));
                        }
                    }
                }
                values
            }
            "merge" => {
                let source = ast.child(argseq, 0);
                let partials = self.resolve_var(ast, ctx, source);
                if partials.is_empty() {
                    return Vec::new();
                }
                let merged = merge_partials(ast, &partials);
                vec![ValueDef::with_sources(var.clone(), merged, partials)]
            }
            "array-compr" | "set-compr" | "object-compr" => {
                let source = ast.child(argseq, 0);
                let termsets = self.resolve_var(ast, ctx, source);
                let mut terms = Vec::new();
                for value in termsets {
                    match ast.kind(value.node()) {
                        NodeKind::Term => terms.push(value.node()),
                        NodeKind::TermSet => {
                            terms.extend(ast.children(value.node()).iter().copied());
                        }
                        _ => {
                            let error = ast.error(value.node(), "Not a term");
                            return vec![ValueDef::new_for(var.clone(), error)];
                        }
                    }
                }
                let result = match name {
                    "array-compr" => resolver::array(ast, &terms),
                    "set-compr" => resolver::set(ast, &terms),
                    _ => {
                        let mut pairs = Vec::new();
                        for term in terms {
                            let tuple = ast.front(term).unwrap_or(term);
                            if ast.len(tuple) == 2 {
                                pairs.push(ast.child(tuple, 0));
                                pairs.push(ast.child(tuple, 1));
                            }
                        }
                        resolver::object(ast, &pairs)
                    }
                };
                vec![ValueDef::new_for(var.clone(), result)]
            }
            _ => {
                let args = self.create_args(ast, ctx, argseq);
                self.evaluate_function(ast, ctx, var, name, &args)
            }
        }
    }

    fn create_args(&mut self, ast: &mut Ast, ctx: &mut EvalContext, argseq: NodeId) -> Args {
        let mut args = Args::new();
        for &arg in ast.children(argseq).to_vec().iter() {
            let mut values = if ast.kind(arg) == NodeKind::Var {
                self.resolve_var(ast, ctx, arg)
            } else {
                vec![ValueDef::new(arg)]
            };
            if values.is_empty() {
                let undefined = ast.node(NodeKind::Undefined);
                values.push(ValueDef::new(undefined));
            }
            args.push(values);
        }
        args
    }

    fn evaluate_function(
        &mut self,
        ast: &mut Ast,
        ctx: &mut EvalContext,
        var: &Location,
        name: &str,
        args: &Args,
    ) -> Values {
        trace!(name, tuples = args.len(), "calling function");
        let mut values = Vec::new();
        let mut valid_args: HashSet<usize> = HashSet::new();
        for index in 0..args.len() {
            let tuple = args.tuple(index);
            let results = self.call_function(ast, ctx, var, name, &tuple);
            if !results.is_empty() {
                for value in &tuple {
                    valid_args.insert(value_key(value));
                }
            }
            values.extend(results);
        }
        args.mark_invalid(&valid_args);
        values
    }

    #[allow(clippy::too_many_lines)]
    fn call_function(
        &mut self,
        ast: &mut Ast,
        ctx: &mut EvalContext,
        var: &Location,
        name: &str,
        args: &[crate::value::Value],
    ) -> Values {
        let sources: Values = args
            .iter()
            .filter(|a| self.variables.contains_key(a.var().view()))
            .cloned()
            .collect();
        let mut values = Vec::new();
        match name {
            "arithinfix" => {
                let result =
                    resolver::arithinfix(ast, args[0].node(), args[1].node(), args[2].node());
                values.push(ValueDef::with_sources(var.clone(), result, sources));
            }
            "bininfix" => {
                let result =
                    resolver::bininfix(ast, args[0].node(), args[1].node(), args[2].node());
                values.push(ValueDef::with_sources(var.clone(), result, sources));
            }
            "boolinfix" => {
                let result =
                    resolver::boolinfix(ast, args[0].node(), args[1].node(), args[2].node());
                values.push(ValueDef::with_sources(var.clone(), result, sources));
            }
            "unary" => {
                let result = resolver::unary(ast, args[0].node());
                values.push(ValueDef::with_sources(var.clone(), result, sources));
            }
            "not" => {
                let term = args[0].to_term(ast);
                let result = resolver::bool_token(ast, !resolver::is_truthy(ast, term));
                let result = resolver::term_of_scalar(ast, result);
                values.push(ValueDef::with_sources(var.clone(), result, sources));
            }
            "apply_access" => {
                let mut container = args[0].node();
                if ast.kind(container) == NodeKind::Term {
                    container = ast.front(container).unwrap_or(container);
                }
                if ast.kind(container) == NodeKind::Undefined {
                    values.push(ValueDef::with_sources(var.clone(), container, sources));
                } else if let Some(defs) = resolver::apply_access(ast, container, args[1].node()) {
                    values.extend(self.values_from_defs(ast, ctx, var, defs, &sources));
                }
            }
            "object" => {
                let mut items = Vec::new();
                for arg in args {
                    if ast.kind(arg.node()) == NodeKind::Undefined {
                        return values;
                    }
                    items.push(arg.node());
                }
                let result = resolver::object(ast, &items);
                values.push(ValueDef::with_sources(var.clone(), result, sources));
            }
            "array" => {
                let mut members = Vec::new();
                for arg in args {
                    if ast.kind(arg.node()) == NodeKind::Undefined {
                        return values;
                    }
                    members.push(arg.node());
                }
                let result = resolver::array(ast, &members);
                values.push(ValueDef::with_sources(var.clone(), result, sources));
            }
            "set" => {
                let mut members = Vec::new();
                for arg in args {
                    if ast.kind(arg.node()) == NodeKind::Undefined {
                        return values;
                    }
                    members.push(arg.node());
                }
                let result = resolver::set(ast, &members);
                values.push(ValueDef::with_sources(var.clone(), result, sources));
            }
            "every" => {
                let result = self.resolve_every(ast, ctx, args[0].node(), args[1].node());
                values.push(ValueDef::with_sources(var.clone(), result, sources));
            }
            "call" => {
                let function = args[0].node();
                let function_args: Vec<NodeId> = args[1..].iter().map(|a| a.node()).collect();
                let function_name = ast.text(function).to_string();
                if ast.kind(function) == NodeKind::BuiltInHook
                    || ctx.builtins.is_builtin(&function_name)
                {
                    let builtins = ctx.builtins.clone();
                    let result = builtins.call(ast, &function_name, &function_args);
                    values.push(ValueDef::with_sources(var.clone(), result, sources));
                } else if ast.kind(function) == NodeKind::RuleFunc {
                    if let Some(ranked) = resolve_rulefunc(ast, ctx, function, &function_args) {
                        values.push(ValueDef::from_ranked_for(var.clone(), ranked, sources));
                    }
                } else {
                    let error = ast.error(function, "Not a function");
                    values.push(ValueDef::with_sources(var.clone(), error, sources));
                }
            }
            _ => {
                let anchor = args
                    .first()
                    .map_or_else(|| ast.node(NodeKind::Undefined), |a| a.node());
                let error = ast.error(anchor, format!("unknown function {name}"));
                values.push(ValueDef::with_sources(var.clone(), error, sources));
            }
        }
        values
    }

    fn values_from_defs(
        &mut self,
        ast: &mut Ast,
        ctx: &mut EvalContext,
        var: &Location,
        defs: Vec<NodeId>,
        sources: &Values,
    ) -> Values {
        let mut values = Vec::new();
        let Some(&first) = defs.first() else {
            return values;
        };
        match ast.kind(first) {
            NodeKind::RuleSet => {
                if let Some(node) = resolve_ruleset(ast, ctx, &defs) {
                    values.push(ValueDef::new(node));
                }
            }
            NodeKind::RuleObj => {
                if let Some(node) = resolve_ruleobj(ast, ctx, &defs) {
                    values.push(ValueDef::new(node));
                }
            }
            _ => {
                for def in defs {
                    match ast.kind(def) {
                        NodeKind::RuleComp | NodeKind::DefaultRule => {
                            if let Some(ranked) = resolve_rulecomp(ast, ctx, def) {
                                values.push(ValueDef::from_ranked_for(
                                    var.clone(),
                                    ranked,
                                    sources.clone(),
                                ));
                            }
                        }
                        _ => {
                            values.push(ValueDef::with_sources(var.clone(), def, sources.clone()));
                        }
                    }
                }
            }
        }
        values
    }

    fn enumerate(
        &mut self,
        ast: &mut Ast,
        ctx: &mut EvalContext,
        var: &Location,
        container_var: NodeId,
    ) -> Values {
        let mut items = Vec::new();
        let container_values = self.resolve_var(ast, ctx, container_var);
        for container_value in container_values {
            let mut container = container_value.node();
            if matches!(ast.kind(container), NodeKind::Term | NodeKind::DataTerm) {
                container = ast.front(container).unwrap_or(container);
            }
            match ast.kind(container) {
                NodeKind::Array | NodeKind::DataArray => {
                    let members: Vec<NodeId> = ast.children(container).to_vec();
                    for (i, member) in members.into_iter().enumerate() {
                        let index = resolver::int_token(ast, i as i64);
                        let index = scalar_term(ast, index);
                        let element = ast.deep_clone(member);
                        let tuple = tuple_term(ast, index, element);
                        items.push(ValueDef::new_for(var.clone(), tuple));
                    }
                }
                NodeKind::Object | NodeKind::DataObject => {
                    let object_items: Vec<NodeId> = ast.children(container).to_vec();
                    for item in object_items {
                        let key_text = ast.text(ast.child(item, 0)).to_string();
                        let key = resolver::string_token(ast, &key_text);
                        let key = scalar_term(ast, key);
                        let value = ast.deep_clone(ast.child(item, 1));
                        let tuple = tuple_term(ast, key, value);
                        items.push(ValueDef::new_for(var.clone(), tuple));
                    }
                }
                NodeKind::Set | NodeKind::DataSet => {
                    let members: Vec<NodeId> = ast.children(container).to_vec();
                    for member in members {
                        let key = ast.deep_clone(member);
                        let value = ast.deep_clone(member);
                        let tuple = tuple_term(ast, key, value);
                        items.push(ValueDef::new_for(var.clone(), tuple));
                    }
                }
                _ => {}
            }
        }
        for item in &items {
            item.mark_as_valid();
        }
        items
    }

    fn resolve_every(
        &mut self,
        ast: &mut Ast,
        ctx: &mut EvalContext,
        varseq: NodeId,
        nestedbody: NodeId,
    ) -> NodeId {
        let vars: Vec<NodeId> = ast.children(varseq).to_vec();
        let lookup_local = |ast: &Ast, var: NodeId| ast.lookup(var).first().copied();
        let (key_local, val_local) = match vars.len() {
            2 => (None, lookup_local(ast, vars[1])),
            3 => (lookup_local(ast, vars[1]), lookup_local(ast, vars[2])),
            _ => return ast.error(varseq, "Invalid every declaration"),
        };
        let Some(val_local) = val_local else {
            return ast.error(varseq, "Invalid every declaration");
        };
        let name = ast.loc(ast.child(nestedbody, 0)).clone();
        let body = ast.child(nestedbody, 1);
        let item_values = self.resolve_var(ast, ctx, vars[0]);
        for item_value in item_values {
            let mut item = item_value.node();
            if ast.kind(item) == NodeKind::Undefined {
                return ast.token(NodeKind::JSONFalse, "false");
            }
            if ast.kind(item) == NodeKind::Term {
                item = ast.front(item).unwrap_or(item);
            } else {
                return ast.error(item, "Unsupported item node");
            }
            let value = ast.deep_clone(ast.child(item, 1));
            ast.set_child(val_local, 1, value);
            if let Some(key_local) = key_local {
                let key = ast.deep_clone(ast.child(item, 0));
                ast.set_child(key_local, 1, key);
            }
            let result = unify_body(ast, ctx, &name, body);
            match ast.kind(result) {
                NodeKind::JSONFalse => return result,
                NodeKind::Error => return result,
                _ => {}
            }
        }
        ast.token(NodeKind::JSONTrue, "true")
    }

    fn resolve_var(&mut self, ast: &mut Ast, ctx: &mut EvalContext, node: NodeId) -> Values {
        let name = ast.text(node).to_string();
        if let Some(values) = self.check_with(ast, ctx, &name) {
            if !values.is_empty() {
                return values;
            }
        }
        if let Some(variable) = self.variables.get(&name) {
            return variable.valid_values();
        }
        let defs = ast.lookup(node);
        if defs.is_empty() {
            return Vec::new();
        }
        let mut values = Vec::new();
        match ast.kind(defs[0]) {
            NodeKind::RuleSet => {
                if let Some(node) = resolve_ruleset(ast, ctx, &defs) {
                    values.push(ValueDef::new(node));
                }
            }
            NodeKind::RuleObj => {
                if let Some(node) = resolve_ruleobj(ast, ctx, &defs) {
                    values.push(ValueDef::new(node));
                }
            }
            _ => {
                for def in defs {
                    match ast.kind(def) {
                        NodeKind::Local | NodeKind::ArgVar => {
                            values.push(ValueDef::new(ast.child(def, 1)));
                        }
                        NodeKind::Skip => {
                            values.extend(self.resolve_skip(ast, ctx, def));
                        }
                        NodeKind::Data
                        | NodeKind::Module
                        | NodeKind::RuleFunc
                        | NodeKind::Input
                        | NodeKind::BuiltInHook => {
                            values.push(ValueDef::new(def));
                        }
                        NodeKind::RuleComp | NodeKind::DefaultRule => {
                            if let Some(ranked) = resolve_rulecomp(ast, ctx, def) {
                                values.push(ValueDef::from_ranked(ranked));
                            }
                        }
                        _ => {
                            let error = ast.error(def, "Unsupported definition type");
                            values.push(ValueDef::new(error));
                        }
                    }
                }
            }
        }
        filter_by_rank(ast, values)
    }

    fn check_with(&self, ast: &Ast, ctx: &EvalContext, name: &str) -> Option<Values> {
        for frame in ctx.with_stack.iter().rev() {
            if let Some(values) = frame.get(name) {
                if self.parent_kind == NodeKind::RuleFunc && ctx.builtins.is_builtin(name) {
                    // A builtin mocked by the rule currently being evaluated
                    // would recurse forever.
                    let recursive = values.iter().any(|value| {
                        ast.kind(value.node()) == NodeKind::RuleFunc
                            && ast.text(ast.child(value.node(), 0)) == self.rule.view()
                    });
                    if recursive {
                        debug!(name, "recursion detected in mocked builtin");
                        return Some(Vec::new());
                    }
                }
                return Some(values.clone());
            }
        }
        None
    }

    fn resolve_skip(&mut self, ast: &mut Ast, ctx: &mut EvalContext, skip: NodeId) -> Values {
        let key = ast.text(ast.child(skip, 0)).to_string();
        trace!(key, "resolving skip");
        if let Some(values) = self.check_with(ast, ctx, &key) {
            if !values.is_empty() {
                return values;
            }
        }
        let target = ast.child(skip, 1);
        match ast.kind(target) {
            NodeKind::Undefined => {
                let error = ast.error(skip, "Undefined reference (missing document or with?)");
                vec![ValueDef::new(error)]
            }
            NodeKind::BuiltInHook => vec![ValueDef::new(target)],
            NodeKind::RuleRef => {
                let varseq = ast.child(target, 0);
                self.resolve_rule_ref(ast, ctx, skip, varseq)
            }
            NodeKind::VarSeq => self.resolve_document_path(ast, ctx, target),
            _ => {
                let error = ast.error(skip, "Invalid skip");
                vec![ValueDef::new(error)]
            }
        }
    }

    fn resolve_rule_ref(
        &mut self,
        ast: &mut Ast,
        ctx: &mut EvalContext,
        skip: NodeId,
        varseq: NodeId,
    ) -> Values {
        let vars: Vec<NodeId> = ast.children(varseq).to_vec();
        let mut current: Option<NodeId> = None;
        let mut rules: Vec<NodeId> = Vec::new();
        for var in vars {
            match current {
                None => {
                    let defs = ast.lookup(var);
                    let Some(&head) = defs.first() else {
                        let error = ast.error(skip, "Undefined reference");
                        return vec![ValueDef::new(error)];
                    };
                    current = Some(head);
                }
                Some(scope) => {
                    let key = ast.text(var).to_string();
                    rules = ast.lookdown(scope, &key);
                    let Some(&first) = rules.first() else {
                        let error = ast.error(skip, format!("No definition found for {key}"));
                        return vec![ValueDef::new(error)];
                    };
                    current = Some(match ast.kind(first) {
                        NodeKind::DataItem | NodeKind::Submodule => ast.child(first, 1),
                        _ => first,
                    });
                }
            }
        }
        if rules.is_empty() {
            if let Some(head) = current {
                return vec![ValueDef::new(head)];
            }
            return Vec::new();
        }
        match ast.kind(rules[0]) {
            NodeKind::RuleSet => {
                return resolve_ruleset(ast, ctx, &rules)
                    .map(|node| vec![ValueDef::new(node)])
                    .unwrap_or_default();
            }
            NodeKind::RuleObj => {
                return resolve_ruleobj(ast, ctx, &rules)
                    .map(|node| vec![ValueDef::new(node)])
                    .unwrap_or_default();
            }
            _ => {}
        }
        let mut values = Vec::new();
        for rule in rules {
            match ast.kind(rule) {
                NodeKind::RuleComp => {
                    let body = ast.child(rule, 1);
                    let value = ast.child(rule, 2);
                    if ast.kind(body) == NodeKind::Empty && ast.kind(value) == NodeKind::Term {
                        let clone = ast.deep_clone(value);
                        values.push(ValueDef::new(clone));
                    } else if let Some(ranked) = resolve_rulecomp(ast, ctx, rule) {
                        values.push(ValueDef::from_ranked(ranked));
                    }
                }
                NodeKind::DefaultRule => {
                    if let Some(ranked) = resolve_rulecomp(ast, ctx, rule) {
                        values.push(ValueDef::from_ranked(ranked));
                    }
                }
                NodeKind::DataItem | NodeKind::Submodule => {
                    values.push(ValueDef::new(ast.child(rule, 1)));
                }
                _ => values.push(ValueDef::new(rule)),
            }
        }
        filter_by_rank(ast, values)
    }

    fn resolve_document_path(
        &mut self,
        ast: &mut Ast,
        ctx: &mut EvalContext,
        varseq: NodeId,
    ) -> Values {
        let vars: Vec<NodeId> = ast.children(varseq).to_vec();
        let Some((&head, rest)) = vars.split_first() else {
            return Vec::new();
        };
        let mut current = self.resolve_var(ast, ctx, head);
        for &var in rest {
            let key_text = ast.text(var).to_string();
            let key = resolver::string_token(ast, &key_text);
            let key = scalar_term(ast, key);
            let mut next = Vec::new();
            for value in current {
                let mut container = value.node();
                if matches!(ast.kind(container), NodeKind::Term | NodeKind::DataTerm) {
                    container = ast.front(container).unwrap_or(container);
                }
                if ast.kind(container) == NodeKind::Undefined {
                    next.push(value.clone());
                    continue;
                }
                if let Some(defs) = resolver::apply_access(ast, container, key) {
                    let var_loc = value.var().clone();
                    let sources = vec![Rc::clone(&value)];
                    for def in defs {
                        match ast.kind(def) {
                            NodeKind::RuleComp | NodeKind::DefaultRule => {
                                if let Some(ranked) = resolve_rulecomp(ast, ctx, def) {
                                    next.push(ValueDef::from_ranked_for(
                                        var_loc.clone(),
                                        ranked,
                                        sources.clone(),
                                    ));
                                }
                            }
                            _ => next.push(ValueDef::with_sources(
                                var_loc.clone(),
                                def,
                                sources.clone(),
                            )),
                        }
                    }
                }
            }
            current = filter_by_rank(ast, next);
        }
        current
    }

    fn push_with(&mut self, ast: &mut Ast, ctx: &mut EvalContext, withseq: NodeId) {
        let mut frame: HashMap<String, Values> = HashMap::new();
        for &with in ast.children(withseq).to_vec().iter() {
            let varseq = ast.child(with, 0);
            let key = ast
                .children(varseq)
                .iter()
                .map(|&v| ast.text(v))
                .collect::<Vec<_>>()
                .join(".");
            let value_var = ast.child(with, 1);
            let values = self.resolve_var(ast, ctx, value_var);
            frame.insert(key, values);
        }
        trace!(keys = ?frame.keys().collect::<Vec<_>>(), "pushing with frame");
        ctx.with_stack.push(frame);
    }
}

fn variable_score(
    variables: &mut BTreeMap<String, Variable>,
    name: &str,
    visited: &mut BTreeSet<String>,
) -> usize {
    if visited.contains(name) {
        return variables.get(name).map_or(0, Variable::dependency_score);
    }
    visited.insert(name.to_string());
    let Some(variable) = variables.get(name) else {
        return 0;
    };
    let base = variable.dependency_score();
    let deps: Vec<String> = variable.dependencies().iter().cloned().collect();
    let total = base
        + deps
            .iter()
            .map(|dep| variable_score(variables, dep, visited))
            .sum::<usize>();
    if let Some(variable) = variables.get_mut(name) {
        variable.set_dependency_score(total);
    }
    total
}

fn scalar_term(ast: &mut Ast, token: NodeId) -> NodeId {
    let scalar = ast.node(NodeKind::Scalar);
    ast.push_back(scalar, token);
    let term = ast.node(NodeKind::Term);
    ast.push_back(term, scalar);
    term
}

fn tuple_term(ast: &mut Ast, key: NodeId, value: NodeId) -> NodeId {
    let array = ast.node(NodeKind::Array);
    ast.push_back(array, key);
    ast.push_back(array, value);
    let term = ast.node(NodeKind::Term);
    ast.push_back(term, array);
    term
}

fn merge_partials(ast: &mut Ast, partials: &Values) -> NodeId {
    let mut members = Vec::new();
    let mut kind = NodeKind::Set;
    for partial in partials {
        let mut node = partial.node();
        if matches!(ast.kind(node), NodeKind::Term | NodeKind::DataTerm) {
            node = ast.front(node).unwrap_or(node);
        }
        match ast.kind(node) {
            NodeKind::Set | NodeKind::DataSet => {
                kind = NodeKind::Set;
                members.extend(ast.children(node).iter().copied());
            }
            NodeKind::Array | NodeKind::DataArray => {
                kind = NodeKind::Array;
                members.extend(ast.children(node).iter().copied());
            }
            NodeKind::Object | NodeKind::DataObject => {
                kind = NodeKind::Object;
                members.extend(ast.children(node).iter().copied());
            }
            _ => {}
        }
    }
    match kind {
        NodeKind::Array => resolver::array(ast, &members),
        NodeKind::Object => {
            let mut pairs = Vec::new();
            for item in members {
                let key = ast.child(item, 0);
                let key_text = ast.text(key).to_string();
                let key_token = resolver::string_token(ast, &key_text);
                let key_term = scalar_term(ast, key_token);
                pairs.push(key_term);
                pairs.push(ast.child(item, 1));
            }
            resolver::object(ast, &pairs)
        }
        _ => resolver::set(ast, &members),
    }
}

/// Evaluates the value slot of a rule, which is either a plain `Term` or a
/// nested `UnifyBody` whose `value$*` local carries the result.
enum RuleValue {
    Term(NodeId),
    None,
    Error(NodeId),
}

fn eval_rule_value(
    ast: &mut Ast,
    ctx: &mut EvalContext,
    rulename: &Location,
    value: NodeId,
) -> RuleValue {
    if ast.kind(value) != NodeKind::UnifyBody {
        return RuleValue::Term(value);
    }
    let result = unify_body(ast, ctx, rulename, value);
    if ast.kind(result) == NodeKind::Error {
        return RuleValue::Error(result);
    }
    for &child in ast.children(value) {
        if ast.kind(child) != NodeKind::Local {
            continue;
        }
        let var = ast.child(child, 0);
        if !ast.text(var).starts_with("value$") {
            continue;
        }
        let bound = ast.child(child, 1);
        return match ast.kind(bound) {
            NodeKind::Term => RuleValue::Term(bound),
            NodeKind::TermSet if !ast.is_empty(bound) => RuleValue::Term(bound),
            NodeKind::Error => RuleValue::Error(bound),
            _ => RuleValue::None,
        };
    }
    RuleValue::None
}

/// Resolves a complete rule (or default rule) to a ranked value.
pub fn resolve_rulecomp(
    ast: &mut Ast,
    ctx: &mut EvalContext,
    rule: NodeId,
) -> Option<(i64, NodeId)> {
    if ast.kind(rule) == NodeKind::DefaultRule {
        let term = ast.child(rule, 1);
        let content = ast.front(term)?;
        let content = ast.deep_clone(content);
        let default = ast.node(NodeKind::DefaultTerm);
        ast.push_back(default, content);
        return Some((crate::value::DEFAULT_RANK, default));
    }
    debug_assert_eq!(ast.kind(rule), NodeKind::RuleComp);
    let rulename = ast.loc(ast.child(rule, 0)).clone();
    let body = ast.child(rule, 1);
    let value = ast.child(rule, 2);
    let index = resolver::get_int(ast, ast.child(rule, 3));
    let body_result = if ast.kind(body) == NodeKind::Empty {
        ast.token(NodeKind::JSONTrue, "true")
    } else {
        unify_body(ast, ctx, &rulename, body)
    };
    if ast.kind(body_result) == NodeKind::Error {
        return Some((index, body_result));
    }
    if ast.kind(body_result) != NodeKind::JSONTrue {
        return None;
    }
    match eval_rule_value(ast, ctx, &rulename, value) {
        RuleValue::Term(term) => Some((index, term)),
        RuleValue::Error(error) => Some((index, error)),
        RuleValue::None => None,
    }
}

/// Resolves a function rule applied to actual arguments.
pub fn resolve_rulefunc(
    ast: &mut Ast,
    ctx: &mut EvalContext,
    rulefunc: NodeId,
    args: &[NodeId],
) -> Option<(i64, NodeId)> {
    debug_assert_eq!(ast.kind(rulefunc), NodeKind::RuleFunc);
    let index = resolver::get_int(ast, ast.child(rulefunc, 4));
    let injected = resolver::inject_args(ast, rulefunc, args);
    match ast.kind(injected) {
        NodeKind::Error => return Some((index, injected)),
        NodeKind::Undefined => return None,
        _ => {}
    }
    let rulename = ast.loc(ast.child(injected, 0)).clone();
    let body = ast.child(injected, 2);
    let body_result = if ast.kind(body) == NodeKind::Empty {
        ast.token(NodeKind::JSONTrue, "true")
    } else {
        unify_body(ast, ctx, &rulename, body)
    };
    if ast.kind(body_result) == NodeKind::Error {
        return Some((index, body_result));
    }
    if ast.kind(body_result) != NodeKind::JSONTrue {
        return None;
    }
    let value = ast.child(injected, 3);
    match eval_rule_value(ast, ctx, &rulename, value) {
        RuleValue::Term(term) => Some((index, term)),
        RuleValue::Error(error) => Some((index, error)),
        RuleValue::None => None,
    }
}

/// Resolves every matching partial set rule and unions the results.
pub fn resolve_ruleset(ast: &mut Ast, ctx: &mut EvalContext, rules: &[NodeId]) -> Option<NodeId> {
    let mut members = Vec::new();
    for &rule in rules {
        debug_assert_eq!(ast.kind(rule), NodeKind::RuleSet);
        let rulename = ast.loc(ast.child(rule, 0)).clone();
        let body = ast.child(rule, 1);
        let value = ast.child(rule, 2);
        let body_result = if ast.kind(body) == NodeKind::Empty {
            ast.token(NodeKind::JSONTrue, "true")
        } else {
            unify_body(ast, ctx, &rulename, body)
        };
        if ast.kind(body_result) == NodeKind::Error {
            return Some(body_result);
        }
        if ast.kind(body_result) != NodeKind::JSONTrue {
            continue;
        }
        let term = match eval_rule_value(ast, ctx, &rulename, value) {
            RuleValue::Term(term) => term,
            RuleValue::Error(error) => return Some(error),
            RuleValue::None => continue,
        };
        let inner = match ast.kind(term) {
            NodeKind::Term | NodeKind::DataTerm => ast.front(term),
            _ => Some(term),
        };
        if let Some(set) = inner {
            if matches!(ast.kind(set), NodeKind::Set | NodeKind::DataSet) {
                members.extend(ast.children(set).iter().copied());
            }
        }
    }
    if members.is_empty() {
        return None;
    }
    Some(resolver::set(ast, &members))
}

/// Resolves every matching partial object rule into one object.
pub fn resolve_ruleobj(ast: &mut Ast, ctx: &mut EvalContext, rules: &[NodeId]) -> Option<NodeId> {
    let mut pairs = Vec::new();
    for &rule in rules {
        debug_assert_eq!(ast.kind(rule), NodeKind::RuleObj);
        let rulename = ast.loc(ast.child(rule, 0)).clone();
        let body = ast.child(rule, 1);
        let value = ast.child(rule, 2);
        let body_result = if ast.kind(body) == NodeKind::Empty {
            ast.token(NodeKind::JSONTrue, "true")
        } else {
            unify_body(ast, ctx, &rulename, body)
        };
        if ast.kind(body_result) == NodeKind::Error {
            return Some(body_result);
        }
        if ast.kind(body_result) != NodeKind::JSONTrue {
            continue;
        }
        let term = match eval_rule_value(ast, ctx, &rulename, value) {
            RuleValue::Term(term) => term,
            RuleValue::Error(error) => return Some(error),
            RuleValue::None => continue,
        };
        let inner = match ast.kind(term) {
            NodeKind::Term | NodeKind::DataTerm => ast.front(term),
            _ => Some(term),
        };
        if let Some(object) = inner {
            if matches!(ast.kind(object), NodeKind::Object | NodeKind::DataObject) {
                for &item in ast.children(object).to_vec().iter() {
                    let key = ast.child(item, 0);
                    let key_text = ast.text(key).to_string();
                    let key_token = resolver::string_token(ast, &key_text);
                    let key_term = scalar_term(ast, key_token);
                    pairs.push(key_term);
                    pairs.push(ast.child(item, 1));
                }
            }
        }
    }
    if pairs.is_empty() {
        return None;
    }
    Some(resolver::object(ast, &pairs))
}

/// Resolves the root query: unifies the synthetic query rule's body and emits
/// `Binding` and bare `Term` children onto a fresh `Query` node.
pub fn resolve_query(ast: &mut Ast, ctx: &mut EvalContext, query: NodeId) -> NodeId {
    let varseq = ast.child(query, 0);
    let defs = resolve_varseq(ast, varseq);
    let result = ast.node(NodeKind::Query);
    if defs.len() != 1 {
        let error = ast.error(query, "query not found");
        ast.push_back(result, error);
        return result;
    }
    let rulebody = ast.child(defs[0], 2);
    let outcome = unify_body(ast, ctx, &Location::synthetic("query"), rulebody);
    if ast.kind(outcome) == NodeKind::Error {
        let error = ast.adopt(outcome);
        ast.push_back(result, error);
        return result;
    }
    for &child in ast.children(rulebody).to_vec().iter() {
        if ast.kind(child) == NodeKind::Error {
            let error = ast.deep_clone(child);
            ast.push_back(result, error);
            continue;
        }
        if ast.kind(child) != NodeKind::Local {
            continue;
        }
        let var = ast.child(child, 0);
        let bound = ast.child(child, 1);
        let name = ast.text(var).to_string();
        let term = match ast.kind(bound) {
            NodeKind::Error => {
                let error = ast.deep_clone(bound);
                ast.push_back(result, error);
                continue;
            }
            NodeKind::Undefined => continue,
            NodeKind::TermSet => {
                if ast.is_empty(bound) {
                    continue;
                }
                if name.starts_with("value$") {
                    ast.deep_clone(bound)
                } else {
                    let error = ast.error(child, "Multiple values for binding");
                    ast.push_back(result, error);
                    continue;
                }
            }
            _ => ast.deep_clone(bound),
        };
        if name.starts_with("value$") {
            ast.push_back(result, term);
        } else if !name.contains('$') || name.starts_with('$') {
            let var_clone = ast.deep_clone(var);
            let binding = ast.node(NodeKind::Binding);
            ast.push_back(binding, var_clone);
            ast.push_back(binding, term);
            ast.push_back(result, binding);
        }
    }
    if ast.is_empty(result) {
        let undefined = ast.node(NodeKind::Undefined);
        ast.push_back(result, undefined);
    }
    result
}

/// Walks a variable sequence through `lookup` then `lookdown`, unwrapping
/// `DataItem`/`Submodule` values.
#[must_use]
pub fn resolve_varseq(ast: &Ast, varseq: NodeId) -> Vec<NodeId> {
    let mut results: Vec<NodeId> = Vec::new();
    for &var in ast.children(varseq) {
        if results.is_empty() {
            results = ast.lookup(var);
            if results.is_empty() {
                return results;
            }
        } else {
            let key = ast.text(var).to_string();
            let mut next = Vec::new();
            for &result in &results {
                for def in ast.lookdown(result, &key) {
                    match ast.kind(def) {
                        NodeKind::DataItem | NodeKind::Submodule => {
                            next.push(ast.child(def, 1));
                        }
                        _ => next.push(def),
                    }
                }
            }
            results = next;
        }
    }
    results
}
