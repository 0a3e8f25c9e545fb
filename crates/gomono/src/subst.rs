//! Type substitution: produce a fresh, fully concrete copy of a generic declaration.

use crate::binding::Binding;
use crate::error::{MonoError, MonoErrorKind};
use crate::registry::{GenericDecl, GenericKind};
use crate::tree::{Decl, Type};
use crate::visit::{walk_decl, walk_type, VisitorMut};

struct Substituter<'a> {
    key: &'a str,
    binding: &'a Binding,
}

impl VisitorMut for Substituter<'_> {
    fn visit_type(&mut self, ty: &mut Type) -> Result<(), MonoError> {
        match ty {
            Type::Intro { name, .. } | Type::Param { name } => {
                let Some(concrete) = self.binding.get(name) else {
                    return Err(MonoError::new(
                        MonoErrorKind::Internal,
                        format!(
                            "internal error: type parameter {name:?} of {:?} has no binding",
                            self.key
                        ),
                    ));
                };
                *ty = concrete.clone();
                Ok(())
            }
            _ => walk_type(self, ty),
        }
    }
}

/// Copy `g` with every type parameter replaced by its binding.
///
/// Functions and types take `specialized` as their new name and lose their
/// type-parameter markers. Methods keep their own name; only the receiver changes.
pub fn substitute(g: &GenericDecl, binding: &Binding, specialized: &str) -> Result<Decl, MonoError> {
    let mut decl = g.decl.clone();

    if let Decl::Func(f) = &mut decl {
        if g.kind == GenericKind::Func {
            f.params.retain(|p| !p.is_unnamed_marker());
        }
    }

    walk_decl(
        &mut Substituter {
            key: &g.key,
            binding,
        },
        &mut decl,
    )
    .map_err(|e| e.in_decl(&g.key))?;

    match (&mut decl, g.kind) {
        (Decl::Func(f), GenericKind::Func) => f.name = specialized.to_string(),
        (Decl::Type(t), GenericKind::Type) => {
            t.name = specialized.to_string();
            t.type_params.clear();
        }
        (Decl::Func(_), GenericKind::Method) => {}
        _ => {
            return Err(MonoError::new(
                MonoErrorKind::Internal,
                format!("internal error: {:?} has an unexpected declaration form", g.key),
            ))
        }
    }
    Ok(decl)
}

/// Underlying definition of generic type `g` applied to `args`, if it is one.
pub fn instantiate_underlying(g: &GenericDecl, args: &[Type]) -> Option<Type> {
    if g.kind != GenericKind::Type || g.arity() != args.len() {
        return None;
    }
    let binding = Binding::from_pairs(
        g.type_params
            .iter()
            .map(|tp| tp.name.clone())
            .zip(args.iter().cloned())
            .collect(),
    );
    match substitute(g, &binding, &g.key).ok()? {
        Decl::Type(t) => Some(t.underlying),
        _ => None,
    }
}
