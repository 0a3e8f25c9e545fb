//! Restriction checking (`eq`, `ord`, `num`) over concrete types.
//!
//! Types are first reduced to a closed `TypeClass`; a fixed table then says which
//! classes admit which restriction. Arrays and structs are equality-comparable only
//! when every element or field is.

use crate::error::{MonoError, MonoErrorKind};
use crate::tree::{Restriction, Type};

const MAX_CLASSIFY_DEPTH: usize = 64;

/// Resolves named and generic type references to their underlying definitions.
pub trait TypeEnv {
    /// Underlying definition of a concrete named type (declared or specialized).
    fn underlying(&self, name: &str) -> Option<Type>;

    /// Underlying definition of a generic type applied to concrete arguments.
    fn instantiated_underlying(&self, name: &str, args: &[Type]) -> Option<Type>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Bool,
    String,
    Signed,
    Unsigned,
    Float,
    Complex,
    Pointer,
    Chan,
    Interface,
    Array,
    Struct,
    Slice,
    Map,
    Func,
    Unknown,
}

impl TypeClass {
    /// The restriction table, before the element-wise condition on arrays and structs.
    pub fn admits(self, r: Restriction) -> bool {
        use TypeClass::*;
        match r {
            Restriction::Eq => matches!(
                self,
                Bool | String
                    | Signed
                    | Unsigned
                    | Float
                    | Complex
                    | Pointer
                    | Chan
                    | Interface
                    | Array
                    | Struct
            ),
            Restriction::Ord => matches!(self, String | Signed | Unsigned | Float),
            Restriction::Num => matches!(self, Signed | Unsigned | Float | Complex),
        }
    }
}

fn builtin_class(name: &str) -> Option<TypeClass> {
    Some(match name {
        "bool" => TypeClass::Bool,
        "string" => TypeClass::String,
        "int" | "int8" | "int16" | "int32" | "int64" | "rune" => TypeClass::Signed,
        "uint" | "uint8" | "uint16" | "uint32" | "uint64" | "uintptr" | "byte" => {
            TypeClass::Unsigned
        }
        "float32" | "float64" => TypeClass::Float,
        "complex64" | "complex128" => TypeClass::Complex,
        "error" | "any" => TypeClass::Interface,
        "unsafe.Pointer" => TypeClass::Pointer,
        _ => return None,
    })
}

/// Follows named and generic references down to a structural type.
fn resolve(ty: &Type, env: &dyn TypeEnv, depth: usize) -> Option<Type> {
    if depth > MAX_CLASSIFY_DEPTH {
        return None;
    }
    match ty {
        Type::Named { name } if builtin_class(name).is_none() => {
            resolve(&env.underlying(name)?, env, depth + 1)
        }
        Type::Inst { name, args } => resolve(&env.instantiated_underlying(name, args)?, env, depth + 1),
        _ => Some(ty.clone()),
    }
}

pub fn classify(ty: &Type, env: &dyn TypeEnv) -> TypeClass {
    let Some(ty) = resolve(ty, env, 0) else {
        return TypeClass::Unknown;
    };
    match &ty {
        Type::Named { name } => builtin_class(name).unwrap_or(TypeClass::Unknown),
        Type::Pointer { .. } => TypeClass::Pointer,
        Type::Chan { .. } => TypeClass::Chan,
        Type::Interface { .. } => TypeClass::Interface,
        Type::Array { .. } => TypeClass::Array,
        Type::Struct { .. } => TypeClass::Struct,
        Type::Slice { .. } => TypeClass::Slice,
        Type::Map { .. } => TypeClass::Map,
        Type::Func { .. } => TypeClass::Func,
        Type::Param { .. } | Type::Intro { .. } | Type::Inst { .. } => TypeClass::Unknown,
    }
}

fn comparable(ty: &Type, env: &dyn TypeEnv, depth: usize) -> bool {
    if depth > MAX_CLASSIFY_DEPTH {
        return false;
    }
    let Some(resolved) = resolve(ty, env, 0) else {
        return false;
    };
    if !classify(&resolved, env).admits(Restriction::Eq) {
        return false;
    }
    match &resolved {
        Type::Array { elem, .. } => comparable(elem, env, depth + 1),
        Type::Struct { fields } => fields.iter().all(|f| comparable(&f.ty, env, depth + 1)),
        _ => true,
    }
}

pub fn satisfies(ty: &Type, restriction: Restriction, env: &dyn TypeEnv) -> bool {
    match restriction {
        Restriction::Eq => comparable(ty, env, 0),
        Restriction::Ord | Restriction::Num => classify(ty, env).admits(restriction),
    }
}

pub fn satisfies_all(ty: &Type, restrictions: &[Restriction], env: &dyn TypeEnv) -> bool {
    restrictions.iter().all(|r| satisfies(ty, *r, env))
}

/// Check one binding of `param` (declared on `decl`) against its restrictions.
pub fn check_binding(
    decl: &str,
    param: &str,
    restrictions: &[Restriction],
    ty: &Type,
    env: &dyn TypeEnv,
) -> Result<(), MonoError> {
    for r in restrictions {
        if !satisfies(ty, *r, env) {
            return Err(MonoError::new(
                MonoErrorKind::RestrictionViolation,
                format!(
                    "restriction unsatisfied for type parameter {param:?} of {decl:?}: {ty} is not {}",
                    describe(*r)
                ),
            ));
        }
    }
    Ok(())
}

fn describe(r: Restriction) -> &'static str {
    match r {
        Restriction::Eq => "equality-comparable (eq)",
        Restriction::Ord => "orderable (ord)",
        Restriction::Num => "numeric (num)",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{check_binding, classify, satisfies, satisfies_all, TypeClass, TypeEnv};
    use crate::error::MonoErrorKind;
    use crate::tree::{Field, Restriction, Type};

    #[derive(Default)]
    struct Env {
        named: BTreeMap<String, Type>,
    }

    impl TypeEnv for Env {
        fn underlying(&self, name: &str) -> Option<Type> {
            self.named.get(name).cloned()
        }

        fn instantiated_underlying(&self, name: &str, args: &[Type]) -> Option<Type> {
            (name == "Wrap").then(|| Type::Struct {
                fields: vec![Field {
                    name: "v".to_string(),
                    ty: args[0].clone(),
                    embedded: false,
                }],
            })
        }
    }

    fn slice_of(t: Type) -> Type {
        Type::Slice { elem: Box::new(t) }
    }

    #[test]
    fn builtin_table() {
        let env = Env::default();
        let int = Type::named("int");
        let c128 = Type::named("complex128");
        let s = Type::named("string");
        assert!(satisfies_all(&int, &[Restriction::Ord, Restriction::Num], &env));
        assert!(satisfies(&c128, Restriction::Num, &env));
        assert!(satisfies(&c128, Restriction::Eq, &env));
        assert!(!satisfies(&c128, Restriction::Ord, &env));
        assert!(satisfies(&s, Restriction::Ord, &env));
        assert!(!satisfies(&s, Restriction::Num, &env));
        assert!(!satisfies(&Type::named("bool"), Restriction::Ord, &env));
    }

    #[test]
    fn slices_maps_and_funcs_are_not_comparable_transitively() {
        let mut env = Env::default();
        env.named.insert(
            "Row".to_string(),
            Type::Struct {
                fields: vec![Field {
                    name: "cells".to_string(),
                    ty: slice_of(Type::named("int")),
                    embedded: false,
                }],
            },
        );
        assert!(!satisfies(&slice_of(Type::named("int")), Restriction::Eq, &env));
        assert!(!satisfies(&Type::named("Row"), Restriction::Eq, &env));
        let arr = Type::Array {
            len: 2,
            elem: Box::new(Type::named("Row")),
        };
        assert!(!satisfies(&arr, Restriction::Eq, &env));
        let ptr = Type::Pointer {
            elem: Box::new(Type::named("Row")),
        };
        assert!(satisfies(&ptr, Restriction::Eq, &env));
    }

    #[test]
    fn named_types_classify_through_their_underlying_definition() {
        let mut env = Env::default();
        env.named.insert("Celsius".to_string(), Type::named("float64"));
        assert_eq!(classify(&Type::named("Celsius"), &env), TypeClass::Float);
        assert_eq!(classify(&Type::named("Mystery"), &env), TypeClass::Unknown);
        assert!(!satisfies(&Type::named("Mystery"), Restriction::Eq, &env));
    }

    #[test]
    fn generic_type_references_classify_structurally() {
        let env = Env::default();
        let ok = Type::Inst {
            name: "Wrap".to_string(),
            args: vec![Type::named("int")],
        };
        let bad = Type::Inst {
            name: "Wrap".to_string(),
            args: vec![slice_of(Type::named("int"))],
        };
        assert!(satisfies(&ok, Restriction::Eq, &env));
        assert!(!satisfies(&bad, Restriction::Eq, &env));
        assert!(!satisfies(&ok, Restriction::Ord, &env));
    }

    #[test]
    fn check_binding_names_decl_param_and_type() {
        let env = Env::default();
        let err = check_binding(
            "Min",
            "T",
            &[Restriction::Ord],
            &Type::named("complex128"),
            &env,
        )
        .expect_err("complex is not orderable");
        assert_eq!(err.kind, MonoErrorKind::RestrictionViolation);
        assert!(err.message.contains("\"Min\""), "{}", err.message);
        assert!(err.message.contains("\"T\""), "{}", err.message);
        assert!(err.message.contains("complex128"), "{}", err.message);
    }
}
