//! The instantiation cache: one specialization per (generic, type arguments) key.
//!
//! Specializations live in an arena and are never mutated after creation, apart
//! from the list of sites that requested them. The driver appends copies of newly
//! created declarations to the output and rewrites those copies.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use tracing::{debug, trace};

use crate::binding::Binding;
use crate::error::{MonoError, MonoErrorKind};
use crate::registry::{GenericDecl, GenericKind, Registry};
use crate::subst::substitute;
use crate::tree::{canon_value_jcs, Decl, Pos, Type};

pub const MONO_NAME_MARKER: &str = "__mono__";
pub const DEFAULT_MAX_SPECIALIZATIONS: usize = 4096;
pub const DEFAULT_MAX_TYPE_DEPTH: usize = 64;

const MAX_SITES_PER_ITEM: usize = 8;

/// Hash lengths tried, in order, when a shorter one is already taken by another key.
const NAME_HASH_HEX_LENS: &[usize] = &[8, 16, 64];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstantiationKey {
    pub generic: String,
    pub type_args_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpecId(pub usize);

/// Where a specialization was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteRef {
    pub decl: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<Pos>,
}

#[derive(Debug, Clone)]
pub struct Specialization {
    pub key: InstantiationKey,
    pub kind: GenericKind,
    pub type_args: Vec<Type>,
    /// Name of the emitted declaration; methods are listed as `Type.Method`.
    pub specialized: String,
    pub decl: Decl,
    pub sites: Vec<SiteRef>,
}

#[derive(Debug)]
pub struct InstantiationCache {
    specs: Vec<Specialization>,
    by_key: BTreeMap<InstantiationKey, SpecId>,
    by_name: BTreeMap<String, SpecId>,
    types_by_name: BTreeMap<String, SpecId>,
    drained: usize,
    max_specializations: usize,
    max_type_depth: usize,
}

impl InstantiationCache {
    pub fn new(max_specializations: usize, max_type_depth: usize) -> Self {
        Self {
            specs: Vec::new(),
            by_key: BTreeMap::new(),
            by_name: BTreeMap::new(),
            types_by_name: BTreeMap::new(),
            drained: 0,
            max_specializations,
            max_type_depth,
        }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, id: SpecId) -> &Specialization {
        &self.specs[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specialization> {
        self.specs.iter()
    }

    /// The generic reference a specialized type name stands for.
    pub fn type_instance(&self, specialized: &str) -> Option<(&str, &[Type])> {
        let id = self.types_by_name.get(specialized)?;
        let s = &self.specs[id.0];
        Some((s.key.generic.as_str(), s.type_args.as_slice()))
    }

    /// Underlying definition of a specialized type.
    pub fn type_underlying(&self, specialized: &str) -> Option<&Type> {
        let id = self.types_by_name.get(specialized)?;
        match &self.specs[id.0].decl {
            Decl::Type(t) => Some(&t.underlying),
            _ => None,
        }
    }

    /// Return the specialization for `(g, binding)`, creating it on first request.
    ///
    /// Creating a type specialization also creates one specialization per generic
    /// method declared on the type.
    pub fn get_or_create(
        &mut self,
        registry: &Registry,
        g: &GenericDecl,
        binding: &Binding,
        site: SiteRef,
    ) -> Result<SpecId, MonoError> {
        let type_args = binding.types();
        let key = InstantiationKey {
            generic: g.key.clone(),
            type_args_key: canonical_type_args_key(&type_args)?,
        };

        if let Some(id) = self.by_key.get(&key).copied() {
            let sites = &mut self.specs[id.0].sites;
            trace!(generic = %g.key, site = %site.decl, "instantiation cache hit");
            if sites.len() < MAX_SITES_PER_ITEM {
                sites.push(site);
            }
            return Ok(id);
        }

        self.check_budget(&g.key, &type_args)?;

        let specialized = self.fresh_name(registry, &g.key, &type_args)?;
        let decl = substitute(g, binding, &specialized)?;
        debug!(generic = %g.key, specialized = %specialized, "new specialization");
        let id = self.push(Specialization {
            key,
            kind: g.kind,
            type_args: type_args.clone(),
            specialized: specialized.clone(),
            decl,
            sites: vec![site.clone()],
        });
        self.by_name.insert(specialized.clone(), id);
        if g.kind == GenericKind::Type {
            self.types_by_name.insert(specialized.clone(), id);
            for m in registry.methods_of(&g.key) {
                self.create_method(m, &specialized, &type_args, &site)?;
            }
        }
        Ok(id)
    }

    /// The mangled name for `(generic, type_args)`, widening the hash while a
    /// shorter form already names a different specialization.
    fn fresh_name(
        &self,
        registry: &Registry,
        generic: &str,
        type_args: &[Type],
    ) -> Result<String, MonoError> {
        let bytes = canonical_type_args_bytes(type_args)?;
        let pretty = pretty_type_args(type_args);
        for &len in NAME_HASH_HEX_LENS {
            let name = format!(
                "{generic}{MONO_NAME_MARKER}{pretty}__h{}",
                sha256_hex(&bytes, len)
            );
            if registry.is_declared(&name) {
                return Err(MonoError::new(
                    MonoErrorKind::Malformed,
                    format!("specialized name {name:?} collides with an existing declaration"),
                ));
            }
            match self.by_name.get(&name) {
                None => return Ok(name),
                Some(other) => debug!(
                    name = %name,
                    taken_by = %self.specs[other.0].key.type_args_key,
                    "specialized name already in use, widening hash"
                ),
            }
        }
        Err(MonoError::new(
            MonoErrorKind::Internal,
            format!("internal error: no unique specialized name for {generic:?}"),
        ))
    }

    fn create_method(
        &mut self,
        m: &GenericDecl,
        type_specialized: &str,
        type_args: &[Type],
        site: &SiteRef,
    ) -> Result<(), MonoError> {
        let binding = Binding::from_pairs(
            m.type_params
                .iter()
                .map(|tp| tp.name.clone())
                .zip(type_args.iter().cloned())
                .collect(),
        );
        let key = InstantiationKey {
            generic: m.key.clone(),
            type_args_key: canonical_type_args_key(type_args)?,
        };
        if self.by_key.contains_key(&key) {
            return Ok(());
        }
        self.check_budget(&m.key, type_args)?;
        let decl = substitute(m, &binding, type_specialized)?;
        let method_name = decl.name().to_string();
        self.push(Specialization {
            key,
            kind: GenericKind::Method,
            type_args: type_args.to_vec(),
            specialized: format!("{type_specialized}.{method_name}"),
            decl,
            sites: vec![site.clone()],
        });
        Ok(())
    }

    fn check_budget(&self, generic: &str, type_args: &[Type]) -> Result<(), MonoError> {
        if self.specs.len() >= self.max_specializations {
            return Err(MonoError::new(
                MonoErrorKind::NonConvergence,
                format!(
                    "monomorphization explosion: max_specializations={} reached while instantiating {generic:?}",
                    self.max_specializations
                ),
            ));
        }
        if let Some(deep) = type_args
            .iter()
            .find(|t| t.max_depth() > self.max_type_depth)
        {
            return Err(MonoError::new(
                MonoErrorKind::NonConvergence,
                format!(
                    "type argument nesting exceeds max_type_depth={} while instantiating {generic:?} (depth {})",
                    self.max_type_depth,
                    deep.max_depth()
                ),
            ));
        }
        Ok(())
    }

    fn push(&mut self, spec: Specialization) -> SpecId {
        let id = SpecId(self.specs.len());
        self.by_key.insert(spec.key.clone(), id);
        self.specs.push(spec);
        id
    }

    /// Declarations created since the previous call, in creation order.
    pub fn drain_new(&mut self) -> Vec<Decl> {
        let out = self.specs[self.drained..]
            .iter()
            .map(|s| s.decl.clone())
            .collect();
        self.drained = self.specs.len();
        out
    }
}

fn canonical_type_args_bytes(type_args: &[Type]) -> Result<Vec<u8>, MonoError> {
    let internal = |e: serde_json::Error| {
        MonoError::new(
            MonoErrorKind::Internal,
            format!("internal error: serialize type arguments: {e}"),
        )
    };
    let mut v = serde_json::to_value(type_args).map_err(internal)?;
    canon_value_jcs(&mut v);
    serde_json::to_vec(&v).map_err(internal)
}

fn canonical_type_args_key(type_args: &[Type]) -> Result<String, MonoError> {
    let bytes = canonical_type_args_bytes(type_args)?;
    String::from_utf8(bytes).map_err(|e| {
        MonoError::new(
            MonoErrorKind::Internal,
            format!("internal error: type argument key is not UTF-8: {e}"),
        )
    })
}

/// `{generic}__mono__{readable args}__h{first 4 bytes of sha256, hex}`.
///
/// This is the preferred form; the cache widens the hash when two keys share it.
pub fn mangle_specialized_name(generic: &str, type_args: &[Type]) -> Result<String, MonoError> {
    let pretty = pretty_type_args(type_args);
    let hash = sha256_hex(&canonical_type_args_bytes(type_args)?, NAME_HASH_HEX_LENS[0]);
    Ok(format!("{generic}{MONO_NAME_MARKER}{pretty}__h{hash}"))
}

/// JSON form of a type argument, as recorded in the mono map.
pub fn type_value(ty: &Type) -> Value {
    serde_json::to_value(ty).unwrap_or(Value::Null)
}

fn sha256_hex(bytes: &[u8], hex_len: usize) -> String {
    let mut h = sha2::Sha256::new();
    h.update(bytes);
    let digest = h.finalize();
    let mut out = String::new();
    for b in digest.iter().take(hex_len / 2) {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn pretty_type_args(type_args: &[Type]) -> String {
    if type_args.is_empty() {
        return "no_targs".to_string();
    }
    type_args
        .iter()
        .map(pretty_type)
        .collect::<Vec<_>>()
        .join("__")
}

fn pretty_type(t: &Type) -> String {
    match t {
        Type::Named { name } => sanitize(name),
        Type::Param { name } | Type::Intro { name, .. } => format!("t_{}", sanitize(name)),
        Type::Inst { name, args } => {
            let mut out = sanitize(name);
            for a in args {
                out.push('_');
                out.push_str(&pretty_type(a));
            }
            out
        }
        Type::Pointer { elem } => format!("ptr_{}", pretty_type(elem)),
        Type::Slice { elem } => format!("slice_{}", pretty_type(elem)),
        Type::Array { len, elem } => format!("arr{len}_{}", pretty_type(elem)),
        Type::Map { key, value } => format!("map_{}_{}", pretty_type(key), pretty_type(value)),
        Type::Chan { elem } => format!("chan_{}", pretty_type(elem)),
        Type::Func { .. } => "func".to_string(),
        Type::Struct { .. } => "struct".to_string(),
        Type::Interface { .. } => "iface".to_string(),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
