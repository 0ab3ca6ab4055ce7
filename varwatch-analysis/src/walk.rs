//! Statement and expression walk of the target function
//!
//! Mirrors the mutation rules the watcher cares about: an assignment-like
//! expression records the line of its left-most watchable symbol, reached
//! through casts, binary/logical/comparison chains and pre/post
//! increments; a call records its line unconditionally; a declaration with
//! an initialiser records its line when the declared name is watchable,
//! otherwise the initialiser is searched for embedded assignments.

use std::collections::BTreeSet;
use std::path::Path;

use lang_c::ast::{
    BinaryOperator, BlockItem, Declaration, Expression, ExternalDeclaration, ForInitializer,
    Initializer, Label, Statement, TranslationUnit, UnaryOperator,
};
use lang_c::span::Node;

use crate::linemap::LineMap;
use crate::scopes::{declarator_name, definition_name, WatchableNames};

/// Collect the source lines of `function` that may mutate a watchable
/// variable. Returns None when the function is not defined in the unit.
pub(crate) fn mutated_lines(
    unit: &TranslationUnit,
    function: &str,
    names: &WatchableNames,
    map: &LineMap,
    file_name: &str,
) -> Option<BTreeSet<u32>> {
    for external in &unit.0 {
        if let ExternalDeclaration::FunctionDefinition(def) = &external.node {
            if definition_name(&def.node) == Some(function) {
                let mut walker = Walker {
                    names,
                    map,
                    file_name,
                    lines: BTreeSet::new(),
                };
                walker.statement(&def.node.statement);
                return Some(walker.lines);
            }
        }
    }
    None
}

struct Walker<'a> {
    names: &'a WatchableNames,
    map: &'a LineMap<'a>,
    file_name: &'a str,
    lines: BTreeSet<u32>,
}

impl Walker<'_> {
    /// Record the line holding `offset`, if it belongs to the main source
    /// file
    fn record(&mut self, offset: usize) {
        if let Some(pos) = self.map.position(offset) {
            let base = Path::new(pos.file)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| pos.file.to_string());
            if base == self.file_name {
                self.lines.insert(pos.line);
            }
        }
    }

    fn statement(&mut self, stmt: &Node<Statement>) {
        match &stmt.node {
            Statement::Compound(items) => {
                for item in items {
                    match &item.node {
                        BlockItem::Declaration(decl) => self.declaration(decl),
                        BlockItem::Statement(inner) => self.statement(inner),
                        _ => {}
                    }
                }
            }
            Statement::Expression(Some(expr)) => self.expression(expr, false),
            Statement::Expression(None) => {}
            Statement::If(inner) => {
                self.expression(&inner.node.condition, false);
                self.statement(&inner.node.then_statement);
                if let Some(else_statement) = &inner.node.else_statement {
                    self.statement(else_statement);
                }
            }
            Statement::While(inner) => {
                self.expression(&inner.node.expression, false);
                self.statement(&inner.node.statement);
            }
            Statement::DoWhile(inner) => {
                self.statement(&inner.node.statement);
                self.expression(&inner.node.expression, false);
            }
            Statement::For(inner) => {
                match &inner.node.initializer.node {
                    ForInitializer::Expression(expr) => self.expression(expr, false),
                    ForInitializer::Declaration(decl) => self.declaration(decl),
                    _ => {}
                }
                if let Some(condition) = &inner.node.condition {
                    self.expression(condition, false);
                }
                if let Some(step) = &inner.node.step {
                    self.expression(step, false);
                }
                self.statement(&inner.node.statement);
            }
            Statement::Switch(inner) => {
                self.expression(&inner.node.expression, false);
                self.statement(&inner.node.statement);
            }
            Statement::Labeled(inner) => {
                if let Label::Case(expr) = &inner.node.label.node {
                    self.expression(expr, false);
                }
                self.statement(&inner.node.statement);
            }
            // A call inside a return can still mutate watched globals.
            Statement::Return(Some(expr)) => self.expression(expr, false),
            _ => {}
        }
    }

    fn declaration(&mut self, decl: &Node<Declaration>) {
        for init in &decl.node.declarators {
            let Some(initializer) = &init.node.initializer else {
                continue;
            };
            let name = declarator_name(&init.node.declarator.node);
            if name.is_some_and(|name| self.names.contains(name)) {
                self.record(init.span.start);
            } else {
                // The declared name is out of scope but its initialiser can
                // still assign to something in scope.
                self.initializer(initializer);
            }
        }
    }

    fn initializer(&mut self, initializer: &Node<Initializer>) {
        match &initializer.node {
            Initializer::Expression(expr) => self.expression(expr, false),
            Initializer::List(items) => {
                for item in items {
                    self.initializer(&item.node.initializer);
                }
            }
        }
    }

    fn expression(&mut self, expr: &Node<Expression>, assigning: bool) {
        match &expr.node {
            Expression::Identifier(id) => {
                if assigning && self.names.contains(&id.node.name) {
                    self.record(expr.span.start);
                }
            }
            Expression::BinaryOperator(binary) => {
                let inner = &binary.node;
                if is_assignment(&inner.operator.node) {
                    self.expression(&inner.lhs, true);
                    self.expression(&inner.rhs, false);
                } else {
                    // Looking for the left-most symbol of an assignment: once
                    // the left side bottomed out in a symbol, the right side
                    // is no longer an assignment target.
                    self.expression(&inner.lhs, assigning);
                    if assigning && matches!(inner.lhs.node, Expression::Identifier(_)) {
                        self.expression(&inner.rhs, false);
                    } else {
                        self.expression(&inner.rhs, assigning);
                    }
                }
            }
            Expression::UnaryOperator(unary) => {
                let inner = &unary.node;
                match inner.operator.node {
                    UnaryOperator::PreIncrement
                    | UnaryOperator::PreDecrement
                    | UnaryOperator::PostIncrement
                    | UnaryOperator::PostDecrement => self.expression(&inner.operand, true),
                    _ => self.expression(&inner.operand, assigning),
                }
            }
            Expression::Cast(cast) => self.expression(&cast.node.expression, assigning),
            Expression::Conditional(conditional) => {
                let inner = &conditional.node;
                self.expression(&inner.condition, false);
                self.expression(&inner.then_expression, false);
                self.expression(&inner.else_expression, false);
            }
            // Any call may alias any visible variable; the line is always
            // kept.
            Expression::Call(_) => self.record(expr.span.start),
            Expression::Comma(list) => {
                for element in list.iter() {
                    self.expression(element, false);
                }
            }
            Expression::Statement(stmt) => self.statement(stmt),
            _ => {}
        }
    }
}

fn is_assignment(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Assign
            | BinaryOperator::AssignMultiply
            | BinaryOperator::AssignDivide
            | BinaryOperator::AssignModulo
            | BinaryOperator::AssignPlus
            | BinaryOperator::AssignMinus
            | BinaryOperator::AssignShiftLeft
            | BinaryOperator::AssignShiftRight
            | BinaryOperator::AssignBitwiseAnd
            | BinaryOperator::AssignBitwiseXor
            | BinaryOperator::AssignBitwiseOr
    )
}
