//! Per-site binding of type parameters to concrete types.
//!
//! Unnamed parameters take the type literal passed at their argument position.
//! Named parameters are matched structurally against the type-checked type of the
//! corresponding argument. Resolution never looks beyond the one site.

use std::collections::BTreeMap;

use crate::cache::InstantiationCache;
use crate::error::{MonoError, MonoErrorKind};
use crate::registry::GenericDecl;
use crate::restrict::{check_binding, TypeEnv};
use crate::tree::{Decl, Expr, Field, MethodSpec, Type};

const MAX_MATCH_DEPTH: usize = 64;

/// Type parameter -> concrete type, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    entries: Vec<(String, Type)>,
}

impl Binding {
    pub fn from_pairs(entries: Vec<(String, Type)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&Type> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn types(&self) -> Vec<Type> {
        self.entries.iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Canonical form of a concrete type: references to specialized types are expanded
/// back to the generic reference they stand for, so one instantiation has one key.
pub fn normalize(ty: &Type, cache: &InstantiationCache) -> Type {
    let n = |t: &Type| normalize(t, cache);
    let nb = |t: &Type| Box::new(normalize(t, cache));
    match ty {
        Type::Named { name } => match cache.type_instance(name) {
            Some((generic, args)) => Type::Inst {
                name: generic.to_string(),
                args: args.to_vec(),
            },
            None => ty.clone(),
        },
        Type::Param { .. } | Type::Intro { .. } => ty.clone(),
        Type::Inst { name, args } => Type::Inst {
            name: name.clone(),
            args: args.iter().map(n).collect(),
        },
        Type::Pointer { elem } => Type::Pointer { elem: nb(elem) },
        Type::Slice { elem } => Type::Slice { elem: nb(elem) },
        Type::Array { len, elem } => Type::Array {
            len: *len,
            elem: nb(elem),
        },
        Type::Map { key, value } => Type::Map {
            key: nb(key),
            value: nb(value),
        },
        Type::Chan { elem } => Type::Chan { elem: nb(elem) },
        Type::Func { params, results } => Type::Func {
            params: params.iter().map(n).collect(),
            results: results.iter().map(n).collect(),
        },
        Type::Struct { fields } => Type::Struct {
            fields: fields
                .iter()
                .map(|f| Field {
                    name: f.name.clone(),
                    ty: n(&f.ty),
                    embedded: f.embedded,
                })
                .collect(),
        },
        Type::Interface { methods } => Type::Interface {
            methods: methods
                .iter()
                .map(|m| MethodSpec {
                    name: m.name.clone(),
                    params: m.params.iter().map(n).collect(),
                    results: m.results.iter().map(n).collect(),
                })
                .collect(),
        },
    }
}

struct Matcher<'a> {
    g: &'a GenericDecl,
    cache: &'a InstantiationCache,
    env: &'a dyn TypeEnv,
    bound: BTreeMap<String, Type>,
}

impl Matcher<'_> {
    fn is_param(&self, name: &str) -> bool {
        self.g.type_params.iter().any(|tp| tp.name == name)
    }

    fn bind(&mut self, name: &str, ty: Type) -> Result<(), MonoError> {
        if !ty.is_concrete() {
            return Err(MonoError::new(
                MonoErrorKind::Malformed,
                format!(
                    "type argument {ty} for {name:?} of {:?} is not concrete",
                    self.g.key
                ),
            ));
        }
        match self.bound.get(name) {
            Some(prev) if *prev != ty => Err(MonoError::new(
                MonoErrorKind::BindingConflict,
                format!(
                    "type parameter {name:?} of {:?} is bound to both {prev} and {ty}",
                    self.g.key
                ),
            )),
            Some(_) => Ok(()),
            None => {
                self.bound.insert(name.to_string(), ty);
                Ok(())
            }
        }
    }

    fn unify(&mut self, pattern: &Type, actual: &Type, depth: usize) -> Result<(), MonoError> {
        if depth > MAX_MATCH_DEPTH {
            return Err(MonoError::new(
                MonoErrorKind::NonConvergence,
                format!(
                    "argument type nesting exceeds MAX_MATCH_DEPTH={MAX_MATCH_DEPTH} while binding {:?}",
                    self.g.key
                ),
            ));
        }
        match (pattern, actual) {
            (Type::Intro { name, .. } | Type::Param { name }, _) if self.is_param(name) => {
                self.bind(name, actual.clone())
            }
            (Type::Inst { name: pn, args: pa }, Type::Inst { name: an, args: aa })
                if pn == an && pa.len() == aa.len() =>
            {
                for (p, a) in pa.iter().zip(aa.iter()) {
                    self.unify(p, a, depth + 1)?;
                }
                Ok(())
            }
            (Type::Pointer { elem: p }, Type::Pointer { elem: a })
            | (Type::Slice { elem: p }, Type::Slice { elem: a })
            | (Type::Chan { elem: p }, Type::Chan { elem: a })
            | (Type::Array { elem: p, .. }, Type::Array { elem: a, .. }) => {
                self.unify(p, a, depth + 1)
            }
            (Type::Map { key: pk, value: pv }, Type::Map { key: ak, value: av }) => {
                self.unify(pk, ak, depth + 1)?;
                self.unify(pv, av, depth + 1)
            }
            (
                Type::Func {
                    params: pp,
                    results: pr,
                },
                Type::Func {
                    params: ap,
                    results: ar,
                },
            ) if pp.len() == ap.len() && pr.len() == ar.len() => {
                for (p, a) in pp.iter().zip(ap.iter()).chain(pr.iter().zip(ar.iter())) {
                    self.unify(p, a, depth + 1)?;
                }
                Ok(())
            }
            (Type::Struct { fields: pf }, Type::Struct { fields: af }) if pf.len() == af.len() => {
                for (p, a) in pf.iter().zip(af.iter()) {
                    self.unify(&p.ty, &a.ty, depth + 1)?;
                }
                Ok(())
            }
            // A defined type is assignable to a type literal with the same underlying type.
            (
                Type::Inst { .. }
                | Type::Pointer { .. }
                | Type::Slice { .. }
                | Type::Chan { .. }
                | Type::Array { .. }
                | Type::Map { .. }
                | Type::Func { .. }
                | Type::Struct { .. },
                Type::Named { name },
            ) => match self.env.underlying(name) {
                Some(u) => {
                    let u = normalize(&u, self.cache);
                    self.unify(pattern, &u, depth + 1)
                }
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    fn finish(self) -> Result<Binding, MonoError> {
        let mut entries: Vec<(String, Type)> = Vec::with_capacity(self.g.arity());
        for tp in &self.g.type_params {
            let Some(ty) = self.bound.get(&tp.name) else {
                let how = if tp.unnamed {
                    "an explicit type argument"
                } else {
                    "a typed argument to infer from"
                };
                return Err(MonoError::new(
                    MonoErrorKind::UnresolvedBinding,
                    format!(
                        "cannot bind type parameter {:?} of {:?}: the site provides no {how}",
                        tp.name, self.g.key
                    ),
                ));
            };
            check_binding(&self.g.key, &tp.name, &tp.restrictions, ty, self.env)?;
            entries.push((tp.name.clone(), ty.clone()));
        }
        Ok(Binding::from_pairs(entries))
    }
}

/// Bind the type parameters of generic function `g` at a call with `args`.
pub fn resolve_call(
    g: &GenericDecl,
    args: &[Expr],
    cache: &InstantiationCache,
    env: &dyn TypeEnv,
) -> Result<Binding, MonoError> {
    let Decl::Func(f) = &g.decl else {
        return Err(MonoError::new(
            MonoErrorKind::Internal,
            format!("internal error: {:?} is not a function", g.key),
        ));
    };

    let mut m = Matcher {
        g,
        cache,
        env,
        bound: BTreeMap::new(),
    };

    for (i, param) in f.params.iter().enumerate() {
        let arg = args.get(i);
        if param.is_unnamed_marker() {
            let Type::Intro { name, .. } = &param.ty else {
                continue;
            };
            match arg {
                Some(Expr::TypeLit { ty, .. }) => {
                    let ty = normalize(ty, cache);
                    m.bind(name, ty)?;
                }
                Some(other) => {
                    return Err(MonoError::new(
                        MonoErrorKind::UnresolvedBinding,
                        format!(
                            "type parameter {name:?} of {:?} must be passed as a type at argument {i}",
                            g.key
                        ),
                    )
                    .at(other.pos()));
                }
                None => {}
            }
            continue;
        }
        if param.ty.is_concrete() {
            continue;
        }
        if let Some(actual) = arg.and_then(Expr::ty) {
            let actual = normalize(actual, cache);
            m.unify(&param.ty, &actual, 0)
                .map_err(|e| e.at(arg.and_then(Expr::pos)))?;
        }
    }

    m.finish()
}

/// Bind all type parameters of `g` from explicit type arguments, in order.
pub fn resolve_explicit(
    g: &GenericDecl,
    type_args: &[Type],
    cache: &InstantiationCache,
    env: &dyn TypeEnv,
) -> Result<Binding, MonoError> {
    if type_args.len() != g.arity() {
        return Err(MonoError::new(
            MonoErrorKind::Malformed,
            format!(
                "{:?} expects {} type arguments, got {}",
                g.key,
                g.arity(),
                type_args.len()
            ),
        ));
    }
    let mut m = Matcher {
        g,
        cache,
        env,
        bound: BTreeMap::new(),
    };
    for (tp, ta) in g.type_params.iter().zip(type_args.iter()) {
        m.bind(&tp.name, normalize(ta, cache))?;
    }
    m.finish()
}
