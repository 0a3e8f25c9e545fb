//! Index of every generic declaration in the tree.
//!
//! Registration validates where type parameters may be introduced: only in the
//! first parenthesized list of a declaration (the parameter list of a function,
//! the type-parameter list of a type, the receiver of a method).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MonoError, MonoErrorKind};
use crate::tree::{receiver_type_name, Decl, Expr, FuncDecl, Restriction, SourceFile, Type};
use crate::visit::{walk_expr, walk_func_rest, walk_params, walk_type, VisitorMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GenericKind {
    Func,
    Type,
    Method,
}

impl GenericKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GenericKind::Func => "func",
            GenericKind::Type => "type",
            GenericKind::Method => "method",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParamSig {
    pub name: String,
    pub restrictions: Vec<Restriction>,
    /// Introduced by a value-less marker parameter: bound only by an explicit type literal.
    pub unnamed: bool,
}

#[derive(Debug, Clone)]
pub struct GenericDecl {
    pub kind: GenericKind,
    /// Registry key: the declaration name, or `Type.Method` for methods.
    pub key: String,
    pub type_params: Vec<TypeParamSig>,
    pub decl: Decl,
}

impl GenericDecl {
    pub fn arity(&self) -> usize {
        self.type_params.len()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    generics: BTreeMap<String, GenericDecl>,
    methods_by_type: BTreeMap<String, Vec<String>>,
    named_types: BTreeMap<String, Type>,
    declared: BTreeSet<String>,
    generic_indexes: BTreeSet<usize>,
}

impl Registry {
    pub fn register(file: &SourceFile) -> Result<Self, MonoError> {
        let mut reg = Registry::default();

        for decl in &file.decls {
            let is_method = matches!(decl, Decl::Func(f) if f.receiver.is_some());
            if !is_method && !reg.declared.insert(decl.name().to_string()) {
                return Err(MonoError::new(
                    MonoErrorKind::Malformed,
                    format!("duplicate declaration: {:?}", decl.name()),
                )
                .at(decl.pos()));
            }
        }

        // Types first: methods are validated against the arity of their receiver type.
        for (idx, decl) in file.decls.iter().enumerate() {
            let Decl::Type(t) = decl else {
                continue;
            };
            if t.type_params.is_empty() {
                reg.named_types.insert(t.name.clone(), t.underlying.clone());
                continue;
            }
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            for tp in &t.type_params {
                if !seen.insert(tp.name.as_str()) {
                    return Err(placement(
                        &t.name,
                        format!("type parameter {:?} introduced twice", tp.name),
                    )
                    .at(t.pos));
                }
            }
            let mut stored = decl.clone();
            if let Decl::Type(st) = &mut stored {
                IntroFinder {
                    decl: &t.name,
                    region: "type definition",
                }
                .visit_type(&mut st.underlying)
                .map_err(|e| e.at(t.pos))?;
            }
            let type_params = t
                .type_params
                .iter()
                .map(|tp| TypeParamSig {
                    name: tp.name.clone(),
                    restrictions: tp.restrictions.clone(),
                    unnamed: true,
                })
                .collect();
            reg.insert_generic(
                idx,
                GenericDecl {
                    kind: GenericKind::Type,
                    key: t.name.clone(),
                    type_params,
                    decl: stored,
                },
            )?;
        }

        for (idx, decl) in file.decls.iter().enumerate() {
            let Decl::Func(f) = decl else {
                continue;
            };
            match &f.receiver {
                Some(recv) if mentions_intro(&recv.ty) => {
                    let g = reg.register_method(f)?;
                    let type_name = receiver_type_name(&recv.ty).unwrap_or_default().to_string();
                    let key = g.key.clone();
                    reg.insert_generic(idx, g)?;
                    reg.methods_by_type.entry(type_name).or_default().push(key);
                }
                Some(_) => {
                    if f.params.iter().any(|p| mentions_intro(&p.ty)) {
                        return Err(placement(
                            &decl.display_name(),
                            "methods may introduce type parameters only in the receiver"
                                .to_string(),
                        )
                        .at(f.pos));
                    }
                }
                None => {
                    let type_params = collect_func_type_params(f)?;
                    if type_params.is_empty() {
                        continue;
                    }
                    let mut stored = f.clone();
                    walk_func_rest(
                        &mut IntroFinder {
                            decl: &f.name,
                            region: "result list or body",
                        },
                        &mut stored,
                    )
                    .map_err(|e| e.at(f.pos))?;
                    reg.insert_generic(
                        idx,
                        GenericDecl {
                            kind: GenericKind::Func,
                            key: f.name.clone(),
                            type_params,
                            decl: Decl::Func(stored),
                        },
                    )?;
                }
            }
        }

        Ok(reg)
    }

    fn register_method(&self, f: &FuncDecl) -> Result<GenericDecl, MonoError> {
        let decl_name = Decl::Func(f.clone()).display_name();
        let Some(recv) = &f.receiver else {
            return Err(MonoError::new(
                MonoErrorKind::Internal,
                format!("internal error: method {decl_name:?} has no receiver"),
            ));
        };

        let mut base = &recv.ty;
        if let Type::Pointer { elem } = base {
            base = &**elem;
        }
        let Type::Inst {
            name: type_name,
            args,
        } = base
        else {
            return Err(placement(
                &decl_name,
                "type parameters in a receiver must be the arguments of a generic type reference"
                    .to_string(),
            )
            .at(f.pos));
        };

        let owner = self
            .generics
            .get(type_name)
            .filter(|g| g.kind == GenericKind::Type)
            .ok_or_else(|| {
                MonoError::new(
                    MonoErrorKind::Malformed,
                    format!("receiver type {type_name:?} of {decl_name:?} is not a generic type"),
                )
                .at(f.pos)
            })?;
        if owner.arity() != args.len() {
            return Err(MonoError::new(
                MonoErrorKind::Malformed,
                format!(
                    "receiver of {decl_name:?} has {} type arguments, {type_name:?} declares {}",
                    args.len(),
                    owner.arity()
                ),
            )
            .at(f.pos));
        }

        let mut type_params: Vec<TypeParamSig> = Vec::with_capacity(args.len());
        for (arg, owner_tp) in args.iter().zip(owner.type_params.iter()) {
            let Type::Intro { name, .. } = arg else {
                return Err(placement(
                    &decl_name,
                    format!("receiver argument {arg} must introduce a type parameter"),
                )
                .at(f.pos));
            };
            if type_params.iter().any(|tp| &tp.name == name) {
                return Err(placement(
                    &decl_name,
                    format!("type parameter {name:?} introduced twice"),
                )
                .at(f.pos));
            }
            type_params.push(TypeParamSig {
                name: name.clone(),
                restrictions: owner_tp.restrictions.clone(),
                unnamed: true,
            });
        }

        let mut stored = f.clone();
        let mut finder = IntroFinder {
            decl: &decl_name,
            region: "method signature or body; methods bind type parameters in the receiver only",
        };
        walk_params(&mut finder, &mut stored.params).map_err(|e| e.at(f.pos))?;
        walk_func_rest(&mut finder, &mut stored).map_err(|e| e.at(f.pos))?;

        Ok(GenericDecl {
            kind: GenericKind::Method,
            key: format!("{type_name}.{}", f.name),
            type_params,
            decl: Decl::Func(stored),
        })
    }

    fn insert_generic(&mut self, idx: usize, g: GenericDecl) -> Result<(), MonoError> {
        if self.generics.contains_key(&g.key) {
            return Err(MonoError::new(
                MonoErrorKind::Malformed,
                format!("duplicate declaration: {:?}", g.key),
            )
            .at(g.decl.pos()));
        }
        self.generic_indexes.insert(idx);
        self.generics.insert(g.key.clone(), g);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&GenericDecl> {
        self.generics.get(key)
    }

    pub fn generic_func(&self, name: &str) -> Option<&GenericDecl> {
        self.get(name).filter(|g| g.kind == GenericKind::Func)
    }

    pub fn generic_type(&self, name: &str) -> Option<&GenericDecl> {
        self.get(name).filter(|g| g.kind == GenericKind::Type)
    }

    /// Generic methods declared on `type_name`, in source order.
    pub fn methods_of<'a>(&'a self, type_name: &str) -> impl Iterator<Item = &'a GenericDecl> + 'a {
        self.methods_by_type
            .get(type_name)
            .into_iter()
            .flatten()
            .filter_map(move |k| self.generics.get(k))
    }

    /// Underlying definition of a non-generic named type declared in the file.
    pub fn named_underlying(&self, name: &str) -> Option<&Type> {
        self.named_types.get(name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    pub fn is_generic_index(&self, idx: usize) -> bool {
        self.generic_indexes.contains(&idx)
    }

    pub fn len(&self) -> usize {
        self.generics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generics.is_empty()
    }
}

fn placement(decl: &str, message: String) -> MonoError {
    MonoError::new(
        MonoErrorKind::Placement,
        format!("invalid type parameter placement in {decl:?}: {message}"),
    )
    .in_decl(decl)
}

fn mentions_intro(ty: &Type) -> bool {
    let mut found = false;
    ty.for_each(&mut |t| {
        if matches!(t, Type::Intro { .. }) {
            found = true;
        }
    });
    found
}

/// Type parameters of a plain function, in order of first textual occurrence.
fn collect_func_type_params(f: &FuncDecl) -> Result<Vec<TypeParamSig>, MonoError> {
    let mut out: Vec<TypeParamSig> = Vec::new();
    let mut early_refs: Vec<String> = Vec::new();
    let mut dup: Option<String> = None;

    for p in &f.params {
        let unnamed = p.is_unnamed_marker();
        p.ty.for_each(&mut |t| match t {
            Type::Intro { name, restrictions } => {
                if out.iter().any(|tp| &tp.name == name) {
                    dup.get_or_insert_with(|| name.clone());
                    return;
                }
                out.push(TypeParamSig {
                    name: name.clone(),
                    restrictions: restrictions.clone(),
                    unnamed,
                });
            }
            Type::Param { name } => {
                if !out.iter().any(|tp| &tp.name == name) {
                    early_refs.push(name.clone());
                }
            }
            _ => {}
        });
    }

    if let Some(name) = dup {
        return Err(placement(
            &f.name,
            format!("type parameter {name:?} introduced twice"),
        )
        .at(f.pos));
    }
    if let Some(name) = early_refs.into_iter().next() {
        if out.iter().any(|tp| tp.name == name) {
            return Err(placement(
                &f.name,
                format!("type parameter {name:?} is used before its introduction"),
            )
            .at(f.pos));
        }
        return Err(MonoError::new(
            MonoErrorKind::Malformed,
            format!("unknown type parameter {name:?} in {:?}", f.name),
        )
        .in_decl(&f.name)
        .at(f.pos));
    }
    Ok(out)
}

/// Rejects any type-parameter introduction in the visited region.
struct IntroFinder<'a> {
    decl: &'a str,
    region: &'static str,
}

impl VisitorMut for IntroFinder<'_> {
    fn visit_type(&mut self, ty: &mut Type) -> Result<(), MonoError> {
        if let Type::Intro { name, .. } = ty {
            return Err(placement(
                self.decl,
                format!("type parameter {name:?} introduced in {}", self.region),
            ));
        }
        walk_type(self, ty)
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> Result<(), MonoError> {
        let pos = expr.pos();
        walk_expr(self, expr).map_err(|e| e.at(pos))
    }
}
