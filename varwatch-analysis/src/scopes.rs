//! Collection of watchable symbol names
//!
//! A name is watchable when its declared type is scalar, array or pointer
//! and it has static storage, external linkage, or function scope in the
//! target function (parameters and top-level body declarations). Matching
//! is by name, so an inner-block shadow of a watchable name
//! over-approximates; extra breakpoint lines are harmless, missing ones are
//! not.

use std::collections::HashSet;

use lang_c::ast::{
    BlockItem, Declaration, DeclarationSpecifier, Declarator, DeclaratorKind, DerivedDeclarator,
    ExternalDeclaration, ForInitializer, FunctionDefinition, Statement, StorageClassSpecifier,
    TranslationUnit, TypeSpecifier,
};
use lang_c::span::Node;

/// The set of names the pre-pass treats as watchable
#[derive(Debug, Default)]
pub struct WatchableNames {
    names: HashSet<String>,
}

impl WatchableNames {
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Walk the translation unit and gather file-scope names plus the
    /// target function's parameters, top-level locals and nested statics
    pub fn collect(unit: &TranslationUnit, function: &str) -> Self {
        let mut set = Self::default();

        for external in &unit.0 {
            match &external.node {
                ExternalDeclaration::Declaration(decl) => {
                    set.add_from_declaration(&decl.node, false);
                }
                ExternalDeclaration::FunctionDefinition(def)
                    if definition_name(&def.node) == Some(function) =>
                {
                    set.add_from_function(&def.node);
                }
                _ => {}
            }
        }

        set
    }

    fn add_from_function(&mut self, def: &FunctionDefinition) {
        // Parameters share the function scope.
        for derived in &def.declarator.node.derived {
            if let DerivedDeclarator::Function(decl) = &derived.node {
                for param in &decl.node.parameters {
                    if let Some(declarator) = &param.node.declarator {
                        if watchable_type(&param.node.specifiers, &declarator.node) {
                            if let Some(name) = declarator_name(&declarator.node) {
                                self.names.insert(name.to_string());
                            }
                        }
                    }
                }
            }
        }

        if let Statement::Compound(items) = &def.statement.node {
            for item in items {
                match &item.node {
                    // Top-level declarations are in function scope.
                    BlockItem::Declaration(decl) => self.add_from_declaration(&decl.node, false),
                    // Deeper declarations only count when static.
                    BlockItem::Statement(stmt) => self.add_statics_from_statement(&stmt.node),
                    _ => {}
                }
            }
        }
    }

    /// Statics keep their storage regardless of block depth
    fn add_statics_from_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Compound(items) => {
                for item in items {
                    match &item.node {
                        BlockItem::Declaration(decl) => self.add_from_declaration(&decl.node, true),
                        BlockItem::Statement(inner) => self.add_statics_from_statement(&inner.node),
                        _ => {}
                    }
                }
            }
            Statement::If(stmt) => {
                self.add_statics_from_statement(&stmt.node.then_statement.node);
                if let Some(else_statement) = &stmt.node.else_statement {
                    self.add_statics_from_statement(&else_statement.node);
                }
            }
            Statement::While(stmt) => self.add_statics_from_statement(&stmt.node.statement.node),
            Statement::DoWhile(stmt) => self.add_statics_from_statement(&stmt.node.statement.node),
            Statement::For(stmt) => {
                if let ForInitializer::Declaration(decl) = &stmt.node.initializer.node {
                    self.add_from_declaration(&decl.node, true);
                }
                self.add_statics_from_statement(&stmt.node.statement.node);
            }
            Statement::Switch(stmt) => self.add_statics_from_statement(&stmt.node.statement.node),
            Statement::Labeled(stmt) => self.add_statics_from_statement(&stmt.node.statement.node),
            _ => {}
        }
    }

    fn add_from_declaration(&mut self, decl: &Declaration, statics_only: bool) {
        if is_typedef(&decl.specifiers) {
            return;
        }
        if statics_only && !is_static(&decl.specifiers) {
            return;
        }

        for declarator in &decl.declarators {
            let declarator = &declarator.node.declarator.node;
            if !watchable_type(&decl.specifiers, declarator) {
                continue;
            }
            if let Some(name) = declarator_name(declarator) {
                self.names.insert(name.to_string());
            }
        }
    }
}

/// Name of a function definition's declarator
pub(crate) fn definition_name(def: &FunctionDefinition) -> Option<&str> {
    declarator_name(&def.declarator.node)
}

/// Resolve a declarator to its identifier, descending nested declarators
pub(crate) fn declarator_name(declarator: &Declarator) -> Option<&str> {
    match &declarator.kind.node {
        DeclaratorKind::Identifier(id) => Some(&id.node.name),
        DeclaratorKind::Declarator(inner) => declarator_name(&inner.node),
        DeclaratorKind::Abstract => None,
    }
}

fn is_typedef(specifiers: &[Node<DeclarationSpecifier>]) -> bool {
    specifiers.iter().any(|s| {
        matches!(
            &s.node,
            DeclarationSpecifier::StorageClass(sc)
                if matches!(sc.node, StorageClassSpecifier::Typedef)
        )
    })
}

fn is_static(specifiers: &[Node<DeclarationSpecifier>]) -> bool {
    specifiers.iter().any(|s| {
        matches!(
            &s.node,
            DeclarationSpecifier::StorageClass(sc)
                if matches!(sc.node, StorageClassSpecifier::Static)
        )
    })
}

/// Scalar, array or pointer; aggregates and plain function declarations are
/// not watchable
fn watchable_type(specifiers: &[Node<DeclarationSpecifier>], declarator: &Declarator) -> bool {
    if has_pointer(declarator) {
        return true;
    }
    if declarator
        .derived
        .iter()
        .any(|d| matches!(d.node, DerivedDeclarator::Function(_) | DerivedDeclarator::KRFunction(_)))
    {
        return false;
    }
    if has_array(declarator) {
        // Array of a scalar base; aggregates fall through below.
        return scalar_base(specifiers);
    }
    scalar_base(specifiers)
}

fn has_pointer(declarator: &Declarator) -> bool {
    if declarator
        .derived
        .iter()
        .any(|d| matches!(d.node, DerivedDeclarator::Pointer(_)))
    {
        return true;
    }
    match &declarator.kind.node {
        DeclaratorKind::Declarator(inner) => has_pointer(&inner.node),
        _ => false,
    }
}

fn has_array(declarator: &Declarator) -> bool {
    if declarator
        .derived
        .iter()
        .any(|d| matches!(d.node, DerivedDeclarator::Array(_)))
    {
        return true;
    }
    match &declarator.kind.node {
        DeclaratorKind::Declarator(inner) => has_array(&inner.node),
        _ => false,
    }
}

/// True when the specifiers denote a scalar base type
fn scalar_base(specifiers: &[Node<DeclarationSpecifier>]) -> bool {
    let mut saw_type = false;
    for specifier in specifiers {
        if let DeclarationSpecifier::TypeSpecifier(type_specifier) = &specifier.node {
            saw_type = true;
            match &type_specifier.node {
                TypeSpecifier::Void
                | TypeSpecifier::Struct(_)
                | TypeSpecifier::Enum(_) => return false,
                // A typedef name cannot be resolved without a full symbol
                // table; treating it as scalar only over-approximates the
                // breakpoint set, which is the safe direction.
                _ => {}
            }
        }
    }
    saw_type
}
